//! ---
//! hm_section: "11-test-harness"
//! hm_subsection: "module"
//! hm_type: "source"
//! hm_scope: "code"
//! hm_description: "Scripted command runner for adapter tests."
//! hm_version: "v0.1.0"
//! hm_owner: "tbd"
//! ---
use async_trait::async_trait;
use hm_kind::{CommandOutput, CommandRunner, CommandSpec, ToolError};
use parking_lot::Mutex;

enum Reply {
    Output(CommandOutput),
    Timeout,
}

/// Runner answering by command-line prefix. Unmatched commands succeed with
/// empty output. The first matching rule wins.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Vec<(String, Reply)>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    /// Runner with no rules.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands starting with `prefix` with `output`.
    pub fn on(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.rules.push((prefix.to_owned(), Reply::Output(output)));
        self
    }

    /// Answer commands starting with `prefix` with a timeout.
    pub fn timeout_on(mut self, prefix: &str) -> Self {
        self.rules.push((prefix.to_owned(), Reply::Timeout));
        self
    }

    /// Every command line run so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(CommandSpec::command_line)
            .collect()
    }

    /// First recorded command whose line starts with `prefix`.
    pub fn call(&self, prefix: &str) -> Option<CommandSpec> {
        self.calls
            .lock()
            .iter()
            .find(|spec| spec.command_line().starts_with(prefix))
            .cloned()
    }

    /// Whether any recorded command starts with `prefix`.
    pub fn ran(&self, prefix: &str) -> bool {
        self.call(prefix).is_some()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> hm_kind::Result<CommandOutput> {
        self.calls.lock().push(spec.clone());
        let line = spec.command_line();
        match self
            .rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
        {
            Some((_, Reply::Output(output))) => Ok(output.clone()),
            Some((_, Reply::Timeout)) => Err(ToolError::Timeout {
                command: line,
                after: spec.timeout,
            }),
            None => Ok(CommandOutput::ok("")),
        }
    }
}
