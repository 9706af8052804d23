//! Command line construction for variant sub-tasks.

use super::{ExecutionError, ResourceRequest};
use crate::variants::CommandTemplate;
use regex::{NoExpand, Regex};
use serde_json::Value;
use std::collections::BTreeMap;

/// Environment variables forwarded to sub-tasks when set.
pub const DEFAULT_ENV_VARS: &[&str] = &[
    "NEXUS_TOKEN",
    "NEXUS_WORKFLOW",
    "NEXUS_BASE",
    "NEXUS_USERINFO",
    "NEXUS_ORG",
    "NEXUS_PROJ",
    "NEXUS_NO_PROV",
    "NEXUS_DRY_RUN",
    "KC_SCR",
    "DEBUG",
];

/// Environment variables whose values never appear in logs.
pub const MASKED_ENV_VARS: &[&str] = &["NEXUS_TOKEN", "KC_SCR"];

/// Replaces the values of [`MASKED_ENV_VARS`] with a `$NAME` reference.
#[must_use]
pub fn mask_secrets(command: &str) -> String {
    let mut masked = command.to_string();
    for name in MASKED_ENV_VARS {
        if let Ok(re) = Regex::new(&format!(r"{name}=(\S+)")) {
            let replacement = format!("{name}=${name}");
            masked = re.replace_all(&masked, NoExpand(&replacement)).into_owned();
        }
    }
    masked
}

/// Quotes `value` for `sh` unless it is made of safe characters only.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@%+,".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Renders base command, named arguments, positional arguments (sorted by
/// position) and runtime arguments, in that order.
///
/// # Errors
///
/// Returns [`ExecutionError::InvalidCommand`] if the base command is empty or
/// an argument references a missing input.
pub fn render_core_command(
    template: &CommandTemplate,
    inputs: &BTreeMap<String, Value>,
    runtime_args: &[String],
) -> Result<String, ExecutionError> {
    if template.base_command.is_empty() {
        return Err(ExecutionError::InvalidCommand("empty base command".to_string()));
    }
    let input = |name: &str| {
        inputs
            .get(name)
            .map(|v| shell_quote(&render_value(v)))
            .ok_or_else(|| ExecutionError::InvalidCommand(format!("missing input '{name}'")))
    };

    let mut parts: Vec<String> = template.base_command.iter().map(|s| shell_quote(s)).collect();
    for (flag, name) in &template.named_arguments {
        parts.push(shell_quote(flag));
        parts.push(input(name)?);
    }

    let mut positional: Vec<&(usize, String)> = template.positional_arguments.iter().collect();
    positional.sort_by_key(|(position, _)| *position);
    for (_, name) in positional {
        parts.push(input(name)?);
    }

    parts.extend(runtime_args.iter().map(|arg| shell_quote(arg)));
    Ok(parts.join(" "))
}

/// Collects the forwarded environment: `passthrough` variables present in the
/// current process, overridden by `extra`.
#[must_use]
pub fn runtime_env<S: AsRef<str>>(
    passthrough: &[S],
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = passthrough
        .iter()
        .filter_map(|name| {
            std::env::var(name.as_ref())
                .ok()
                .map(|value| (name.as_ref().to_string(), value))
        })
        .collect();
    env.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

/// Renders `export K=V ...`, or `None` for an empty environment.
#[must_use]
pub fn render_exports(env: &BTreeMap<String, String>) -> Option<String> {
    if env.is_empty() {
        return None;
    }
    let pairs: Vec<String> = env
        .iter()
        .map(|(key, value)| format!("{key}={}", shell_quote(value)))
        .collect();
    Some(format!("export {}", pairs.join(" ")))
}

/// Renders `salloc` parameters for a resource request.
#[must_use]
pub fn slurm_params(request: &ResourceRequest) -> Vec<String> {
    let mut params = Vec::new();
    if let Some(partition) = &request.partition {
        params.push(format!("--partition={partition}"));
    }
    if let Some(nodes) = request.nodes {
        params.push(format!("--nodes={nodes}"));
    }
    if let Some(ntasks) = request.ntasks {
        params.push(format!("--ntasks={ntasks}"));
    }
    if let Some(time) = &request.time {
        params.push(format!("--time={time}"));
    }
    if let Some(memory) = &request.memory {
        params.push(format!("--mem={memory}"));
    }
    if request.exclusive {
        params.push("--exclusive".to_string());
    }
    if let Some(constraint) = &request.constraint {
        params.push(format!("--constraint={constraint}"));
    }
    if let Some(account) = &request.account {
        params.push(format!("--account={account}"));
    }
    params
}

/// Wraps `command` into a line-buffered `salloc ... srun` allocation.
#[must_use]
pub fn wrap_salloc(params: &[String], command: &str) -> String {
    let escaped = command.replace('\'', r"'\''");
    let mut line = String::from("stdbuf -oL -eL salloc");
    for param in params {
        line.push(' ');
        line.push_str(param);
    }
    line.push_str(&format!(" srun --mpi=none sh -c '{escaped}'"));
    line
}

/// Builds the full shell line of a sub-task.
#[derive(Debug, Clone)]
pub struct CommandBuilder<'a> {
    template: &'a CommandTemplate,
    inputs: &'a BTreeMap<String, Value>,
    runtime_args: Vec<String>,
    env: BTreeMap<String, String>,
    allocation: Option<ResourceRequest>,
}

impl<'a> CommandBuilder<'a> {
    /// Creates a builder for `template` bound to `inputs`.
    #[must_use]
    pub fn new(template: &'a CommandTemplate, inputs: &'a BTreeMap<String, Value>) -> Self {
        Self {
            template,
            inputs,
            runtime_args: Vec::new(),
            env: BTreeMap::new(),
            allocation: None,
        }
    }

    /// Appends runtime arguments.
    #[must_use]
    pub fn with_runtime_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.runtime_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the exported environment.
    #[must_use]
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Wraps the command into a SLURM allocation.
    #[must_use]
    pub fn with_allocation(mut self, request: ResourceRequest) -> Self {
        self.allocation = Some(request);
        self
    }

    /// Renders the command.
    ///
    /// # Errors
    ///
    /// See [`render_core_command`].
    pub fn build(&self) -> Result<String, ExecutionError> {
        let mut command = render_core_command(self.template, self.inputs, &self.runtime_args)?;
        if let Some(request) = &self.allocation {
            command = wrap_salloc(&slurm_params(request), &command);
        }
        if let Some(exports) = render_exports(&self.env) {
            command = format!("{exports} && {command}");
        }
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn template() -> CommandTemplate {
        CommandTemplate {
            base_command: vec!["foo".to_string(), "bar".to_string()],
            named_arguments: BTreeMap::from([
                ("--a".to_string(), "a".to_string()),
                ("--b".to_string(), "b".to_string()),
            ]),
            positional_arguments: vec![(1, "d".to_string()), (0, "c".to_string())],
        }
    }

    fn inputs() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("a".to_string(), json!(1)),
            ("b".to_string(), json!(2)),
            ("c".to_string(), json!(3)),
            ("d".to_string(), json!(4)),
        ])
    }

    #[test]
    fn test_core_command_order() {
        let command =
            render_core_command(&template(), &inputs(), &["--e".to_string(), "5".to_string()]).unwrap();
        assert_eq!(command, "foo bar --a 1 --b 2 3 4 --e 5");
    }

    #[test]
    fn test_core_command_missing_input() {
        let mut inputs = inputs();
        inputs.remove("d");
        let err = render_core_command(&template(), &inputs, &[]).unwrap_err();
        assert!(err.to_string().contains("missing input 'd'"));
    }

    #[test]
    fn test_full_command_with_allocation() {
        let inputs = inputs();
        let template = template();
        let request = ResourceRequest {
            partition: Some("prod".to_string()),
            ntasks: Some(1),
            constraint: Some("cpu".to_string()),
            ..ResourceRequest::default()
        };

        let command = CommandBuilder::new(&template, &inputs)
            .with_runtime_args(["--f", "6"])
            .with_env(BTreeMap::from([("NEXUS_TOKEN".to_string(), "my-token".to_string())]))
            .with_allocation(request)
            .build()
            .unwrap();

        assert_eq!(
            command,
            "export NEXUS_TOKEN=my-token && stdbuf -oL -eL salloc --partition=prod --ntasks=1 \
             --constraint=cpu srun --mpi=none sh -c 'foo bar --a 1 --b 2 3 4 --f 6'"
        );
    }

    #[test]
    fn test_salloc_escapes_single_quotes() {
        let wrapped = wrap_salloc(&["--exclusive".to_string()], "echo 'hi'");
        assert_eq!(
            wrapped,
            r"stdbuf -oL -eL salloc --exclusive srun --mpi=none sh -c 'echo '\''hi'\'''"
        );
    }

    #[test]
    fn test_slurm_params_render_bool_and_values() {
        let request = ResourceRequest {
            nodes: Some(2),
            time: Some("8:00:00".to_string()),
            memory: Some("0".to_string()),
            exclusive: true,
            account: Some("proj134".to_string()),
            ..ResourceRequest::default()
        };
        assert_eq!(
            slurm_params(&request),
            vec!["--nodes=2", "--time=8:00:00", "--mem=0", "--exclusive", "--account=proj134"]
        );
    }

    #[test]
    fn test_mask_secrets() {
        let masked = mask_secrets("A=12324 NEXUS_TOKEN=aasd.asdf-gdf B=3434 KC_SCR=ssda.3243 C=4");
        assert_eq!(masked, "A=12324 NEXUS_TOKEN=$NEXUS_TOKEN B=3434 KC_SCR=$KC_SCR C=4");

        let repeated = mask_secrets("NEXUS_TOKEN=x NEXUS_TOKEN=y");
        assert_eq!(repeated, "NEXUS_TOKEN=$NEXUS_TOKEN NEXUS_TOKEN=$NEXUS_TOKEN");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain/path.h5"), "plain/path.h5");
        assert_eq!(shell_quote("two words"), "'two words'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_exports_and_runtime_env() {
        assert_eq!(render_exports(&BTreeMap::new()), None);

        let extra = BTreeMap::from([("GENFLOW_STAGE".to_string(), "mmodel".to_string())]);
        let env = runtime_env(&["GENFLOW_SURELY_UNSET_VARIABLE"], &extra);
        assert_eq!(
            render_exports(&env),
            Some("export GENFLOW_STAGE=mmodel".to_string())
        );
    }
}
