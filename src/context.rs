use crate::command::ExitCode;
use crate::filesystem::ShellLocation;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// The two keyboard notifications the interpreter observes.
///
/// Clones share the same flags, so a host keyboard thread can hold one copy
/// and raise signals while the interpreter polls its own.
#[derive(Debug, Clone, Default)]
pub struct BreakSignals {
    cancel: Arc<AtomicBool>,
    halt: Arc<AtomicBool>,
}

impl BreakSignals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running command to stop at its next checkpoint.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    /// Suspend (`true`) or resume (`false`) console output.
    pub fn set_output_halted(&self, halted: bool) {
        self.halt.store(halted, Ordering::SeqCst);
    }

    pub fn output_halted(&self) -> bool {
        self.halt.load(Ordering::SeqCst)
    }
}

/// How far an `exit` request reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitScope {
    /// `exit /b`: only the innermost running script.
    Script,
    /// `exit`: the whole shell session.
    Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRequest {
    pub scope: ExitScope,
    pub code: ExitCode,
}

/// Process-wide execution state of one interpreter.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Current working location.
    pub location: ShellLocation,
    /// Status of the most recent command.
    pub last_error: ExitCode,
    /// Global script echo flag.
    pub echo: bool,
    /// Pending `exit` request, consumed by the script engine or the host.
    pub exit_request: Option<ExitRequest>,
    pub signals: BreakSignals,
}

impl ExecutionContext {
    pub fn new(location: ShellLocation, echo: bool) -> Self {
        Self {
            location,
            last_error: 0,
            echo,
            exit_request: None,
            signals: BreakSignals::new(),
        }
    }

    /// True once a session-wide exit has been requested.
    pub fn should_exit(&self) -> bool {
        matches!(
            self.exit_request,
            Some(ExitRequest {
                scope: ExitScope::Shell,
                ..
            })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_are_shared_between_clones() {
        let signals = BreakSignals::new();
        let keyboard = signals.clone();

        keyboard.request_cancel();
        keyboard.set_output_halted(true);
        assert!(signals.cancel_requested());
        assert!(signals.output_halted());

        signals.clear_cancel();
        assert!(!keyboard.cancel_requested());
        assert!(keyboard.output_halted());
    }
}
