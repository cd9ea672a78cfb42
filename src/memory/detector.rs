use crate::core::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// A backend command, as seen by interceptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A cursor ran its query
    Query { set: String },
    /// A cursor read its next row
    Fetch { set: String },
    /// A cursor released its rows
    Close { set: String },
    /// A terminal operator ran
    Execute { set: String, terminal: &'static str },
    Find { set: String },
    /// A change tracker operation (add, attach, update, remove, entry, local)
    Track { set: String, operation: &'static str },
    /// Metadata lookup when building a set accessor
    Model { set: String },
    Save,
    AcceptAllChanges,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::Fetch { .. } => "fetch",
            Self::Close { .. } => "close",
            Self::Execute { terminal, .. } => *terminal,
            Self::Find { .. } => "find",
            Self::Track { operation, .. } => *operation,
            Self::Model { .. } => "model",
            Self::Save => "save_changes",
            Self::AcceptAllChanges => "accept_all_changes",
        }
    }

    pub fn set(&self) -> Option<&str> {
        match self {
            Self::Query { set }
            | Self::Fetch { set }
            | Self::Close { set }
            | Self::Execute { set, .. }
            | Self::Find { set }
            | Self::Track { set, .. }
            | Self::Model { set } => Some(set),
            Self::Save | Self::AcceptAllChanges => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.set() {
            Some(set) => write!(f, "{} on '{}'", self.name(), set),
            None => f.write_str(self.name()),
        }
    }
}

/// Observes every command a memory context runs.
///
/// Interceptors run inside the command, after the concurrency check. An
/// error aborts the command and is returned to the caller.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, command: &Command) -> Result<()>;
}

impl<F> Interceptor for F
where
    F: Fn(&Command) -> Result<()> + Send + Sync,
{
    fn intercept(&self, command: &Command) -> Result<()> {
        self(command)
    }
}

/// Detects a second command starting while one is running.
///
/// Does not serialize anything: the losing command fails immediately.
pub(crate) struct ConcurrencyDetector {
    enabled: bool,
    busy: AtomicBool,
}

impl ConcurrencyDetector {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            busy: AtomicBool::new(false),
        }
    }

    pub(crate) fn enter(&self, command: &Command) -> Result<CommandSection<'_>> {
        if !self.enabled {
            return Ok(CommandSection { detector: None });
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!(command = %command, "second operation started on a busy context");
            return Err(Error::ConcurrencyViolation(format!(
                "'{}' started before a previous operation on this context completed",
                command
            )));
        }

        Ok(CommandSection { detector: Some(self) })
    }
}

/// Marks the context busy until dropped
pub(crate) struct CommandSection<'a> {
    detector: Option<&'a ConcurrencyDetector>,
}

impl Drop for CommandSection<'_> {
    fn drop(&mut self) {
        if let Some(detector) = self.detector {
            detector.busy.store(false, Ordering::Release);
        }
    }
}
