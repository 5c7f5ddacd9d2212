//! Which exec requests this agent accepts.

use fedshell_proto::v1::ExecStart;

use super::error::ExecError;

#[derive(Debug, Clone, Default)]
pub struct ExecPolicy {
    /// Pod this agent runs in. `None` accepts any pod name.
    pub pod_name: Option<String>,
    /// Programs that may be started, matched exactly against `argv[0]`.
    /// Empty allows any program.
    pub allowed_programs: Vec<String>,
}

impl ExecPolicy {
    pub fn check(&self, start: &ExecStart) -> Result<(), ExecError> {
        if let Some(served) = &self.pod_name
            && *served != start.pod
        {
            return Err(ExecError::PodMismatch {
                requested: start.pod.clone(),
                served: served.clone(),
            });
        }

        let program = start.command.first().ok_or(ExecError::EmptyCommand)?;
        if program.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        if !self.allowed_programs.is_empty() && !self.allowed_programs.contains(program) {
            return Err(ExecError::ProgramNotAllowed(program.clone()));
        }
        Ok(())
    }
}
