use std::time::{Duration, Instant};

/// How long a blocking call waits for a module or axis to finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Wait {
    /// Return as soon as the command is acknowledged
    #[default]
    NoWait,
    /// Wait at most this long, then fail with a timeout
    Timeout(Duration),
    /// Wait until done, however long it takes
    Forever,
}

impl Wait {
    /// Shorthand for a timeout in seconds
    pub fn secs(secs: f64) -> Self {
        Wait::Timeout(Duration::from_secs_f64(secs))
    }

    /// True for any variant but [`Wait::NoWait`]
    pub fn waits(&self) -> bool {
        !matches!(self, Wait::NoWait)
    }

    /// True once a wait started at `start` has used up its budget
    pub(crate) fn expired(&self, start: Instant) -> bool {
        match self {
            Wait::NoWait => true,
            Wait::Timeout(limit) => start.elapsed() >= *limit,
            Wait::Forever => false,
        }
    }
}

impl From<Duration> for Wait {
    fn from(value: Duration) -> Self {
        Wait::Timeout(value)
    }
}
