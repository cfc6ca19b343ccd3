//! Process exit status

/// How a command ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    /// Ctrl-C or termination signal
    Interrupted,
    /// Another process has taken over; this one exits quietly
    RestartRequested,
}

impl ExitStatus {
    /// OS exit code
    ///
    /// `RestartRequested` reports 0: the new process already runs.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success | ExitStatus::RestartRequested => 0,
            ExitStatus::Failure => 1,
            ExitStatus::Interrupted => 130,
        }
    }
}
