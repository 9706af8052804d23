//! Variant catalogue.
//!
//! A variant is a named, versioned executable algorithm usable by a
//! multi-variant stage. Its identity is the triplet
//! `(generator_name, variant_name, version)`.

mod catalog;

pub use catalog::{
    CommandTemplate, ParameterSpec, ParameterType, ResolvedVariant, Variant, VariantCatalog,
    VariantKey,
};
