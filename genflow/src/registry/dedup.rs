//! Create-or-find for content-addressed resources.
//!
//! Resources whose identity is fully determined by their content (variant
//! parameterizations) are looked up by the SHA-256 digest of their canonical
//! JSON payload before a new one is created.

use super::{RegistryResult, ResourceRegistry};
use crate::core::{NewResource, ResourceId};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Attribute holding the payload digest.
pub const DIGEST_ATTRIBUTE: &str = "contentDigest";

/// Computes the hex SHA-256 digest of the canonical JSON form of `payload`.
#[must_use]
pub fn content_digest(payload: &serde_json::Value) -> String {
    // serde_json maps are key-sorted, so the serialization is canonical
    let json = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// Returns the id of an existing resource with the same kind, digest and
/// attributes, creating one if none exists.
pub async fn create_or_find(
    registry: &dyn ResourceRegistry,
    resource: NewResource,
) -> RegistryResult<ResourceId> {
    let digest = content_digest(&resource.payload);
    let resource =
        resource.with_attribute(DIGEST_ATTRIBUTE, serde_json::Value::String(digest.clone()));

    if let Some(existing) = registry
        .find_resource_by_attributes(&resource.kind, &resource.attributes)
        .await?
    {
        debug!(kind = %resource.kind, %digest, id = %existing.id, "Matched existing resource");
        return Ok(existing.id);
    }

    let id = registry.create_resource(resource).await?;
    debug!(%digest, %id, "No existing resource found, created a new one");
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kinds;
    use crate::registry::InMemoryRegistry;
    use serde_json::json;

    #[test]
    fn test_digest_ignores_key_order() {
        let a: serde_json::Value = serde_json::from_str(r#"{"a": 1, "b": 2}"#).unwrap();
        let b: serde_json::Value = serde_json::from_str(r#"{"b": 2, "a": 1}"#).unwrap();
        assert_eq!(content_digest(&a), content_digest(&b));
        assert_ne!(content_digest(&a), content_digest(&json!({"a": 2, "b": 2})));
    }

    #[tokio::test]
    async fn test_create_or_find_reuses_identical_content() {
        let registry = InMemoryRegistry::new();
        let payload = json!({"density": 0.3});

        let first = create_or_find(
            &registry,
            NewResource::new(kinds::VARIANT_TASK_PARAMETERIZATION, payload.clone()),
        )
        .await
        .unwrap();
        let second = create_or_find(
            &registry,
            NewResource::new(kinds::VARIANT_TASK_PARAMETERIZATION, payload),
        )
        .await
        .unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_create_or_find_distinguishes_attributes() {
        let registry = InMemoryRegistry::new();
        let payload = json!({"density": 0.3});

        let ssp = create_or_find(
            &registry,
            NewResource::new(kinds::VARIANT_TASK_PARAMETERIZATION, payload.clone())
                .with_attribute("region", json!("SSp")),
        )
        .await
        .unwrap();
        let mop = create_or_find(
            &registry,
            NewResource::new(kinds::VARIANT_TASK_PARAMETERIZATION, payload)
                .with_attribute("region", json!("MOp")),
        )
        .await
        .unwrap();

        assert_ne!(ssp, mop);
    }
}
