//! Resolved shell target.

use std::fmt;

use fedshell_proto::v1 as pb;

/// Pod, container and command a session runs, plus the agent serving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    /// Program and arguments to execute.
    pub command: Vec<String>,
    /// gRPC endpoint of the pod's shell agent, e.g. `http://10.0.3.7:50080`.
    pub endpoint: String,
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

/// Terminal window dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub rows: u16,
    pub cols: u16,
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { rows: 24, cols: 80 }
    }
}

impl From<TerminalSize> for pb::TerminalSize {
    fn from(size: TerminalSize) -> Self {
        Self {
            rows: u32::from(size.rows),
            cols: u32::from(size.cols),
        }
    }
}
