/// Current state of the backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// Backend is not running
    Stopped,
    /// Backend spawned, waiting for readiness
    Starting { attempt: u32 },
    /// Backend passed a readiness probe
    Running { port: u16, pid: u32 },
    /// Backend crashed, respawn scheduled
    Restarting { attempt: u32, delay_ms: u64 },
    /// Shell is quitting and terminating the backend
    ShuttingDown,
    /// Backend has failed and won't restart
    Failed { error: String, hint: String },
}

impl ServerState {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}
