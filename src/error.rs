use crate::command::ExitCode;
use std::io;

/// Shell status code reported for success.
pub const SUCCESS: ExitCode = 0;

/// Errors surfaced by the interpreter core.
///
/// Every variant maps onto a numeric shell status (see [`ShellError::status`]),
/// which is what ends up in the `lasterror` variable.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// Malformed syntax: bad quoting, conflicting redirection, unusable split.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unknown command, file, alias or variable target.
    #[error("not found: {0}")]
    NotFound(String),

    /// Allocation failure or nesting limit exceeded.
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// User or script requested early termination.
    #[error("aborted")]
    Aborted,

    /// Failure propagated from a stream, file-system or image service.
    #[error("device error: {0}")]
    DeviceError(String),
}

impl ShellError {
    /// Numeric shell status for this error.
    pub fn status(&self) -> ExitCode {
        match self {
            ShellError::InvalidParameter(_) => 2,
            ShellError::DeviceError(_) => 7,
            ShellError::OutOfResources(_) => 9,
            ShellError::NotFound(_) => 14,
            ShellError::Aborted => 21,
        }
    }

    /// Map an arbitrary error coming out of a built-in onto a status.
    pub fn status_of(err: &anyhow::Error) -> ExitCode {
        if let Some(e) = err.downcast_ref::<ShellError>() {
            return e.status();
        }
        if let Some(e) = err.downcast_ref::<io::Error>() {
            return ShellError::from_io(e).status();
        }
        ShellError::InvalidParameter(String::new()).status()
    }

    /// Classify an I/O error by kind, unwrapping a `ShellError` carried inside.
    pub fn from_io(err: &io::Error) -> Self {
        if let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<ShellError>()) {
            return inner.clone();
        }
        match err.kind() {
            io::ErrorKind::NotFound => ShellError::NotFound(err.to_string()),
            io::ErrorKind::Interrupted => ShellError::Aborted,
            io::ErrorKind::OutOfMemory => ShellError::OutOfResources(err.to_string()),
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                ShellError::InvalidParameter(err.to_string())
            }
            _ => ShellError::DeviceError(err.to_string()),
        }
    }
}

impl From<io::Error> for ShellError {
    fn from(err: io::Error) -> Self {
        ShellError::from_io(&err)
    }
}

/// Render a status the way the `lasterror` variable stores it.
pub fn format_status(status: ExitCode) -> String {
    format!("{status:#x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_shell_table() {
        assert_eq!(ShellError::InvalidParameter("x".into()).status(), 2);
        assert_eq!(ShellError::NotFound("x".into()).status(), 14);
        assert_eq!(ShellError::OutOfResources("x".into()).status(), 9);
        assert_eq!(ShellError::Aborted.status(), 21);
        assert_eq!(ShellError::DeviceError("x".into()).status(), 7);
    }

    #[test]
    fn test_io_errors_convert_by_kind() {
        let nf = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(ShellError::from(nf), ShellError::NotFound(_)));
        let int = io::Error::new(io::ErrorKind::Interrupted, "stop");
        assert_eq!(ShellError::from(int), ShellError::Aborted);
    }

    #[test]
    fn test_status_of_downcasts_anyhow() {
        let err = anyhow::Error::new(ShellError::NotFound("label".into()));
        assert_eq!(ShellError::status_of(&err), 14);
        let other = anyhow::anyhow!("plain failure");
        assert_eq!(ShellError::status_of(&other), 2);
    }

    #[test]
    fn test_format_status() {
        assert_eq!(format_status(0), "0x0");
        assert_eq!(format_status(14), "0xe");
    }
}
