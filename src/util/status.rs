use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    NotFound,
    Corruption,
    NotSupported,
    InvalidArgument,
    IOError,
    Incomplete,
    Busy,
    TimedOut,
    /// Write-write conflict detected against a transaction snapshot.
    Conflict,
    /// The database, transaction, snapshot or iterator was already closed.
    Closed,
}

/// Outcome of a fallible operation: a code plus an optional message.
///
/// Absent keys are reported as `Ok(None)` by point reads, so `NotFound` only
/// surfaces for missing files and directories.
#[derive(Debug, Clone, Error)]
#[error("{}", self.render())]
pub struct Status {
    code: Code,
    message: Option<String>,
}

impl Status {
    pub fn new(code: Code, msg: impl Into<String>) -> Self {
        Status {
            code,
            message: Some(msg.into()),
        }
    }

    pub fn ok() -> Self {
        Status {
            code: Code::Ok,
            message: None,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(Code::NotFound, msg)
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        Self::new(Code::Corruption, msg)
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::new(Code::NotSupported, msg)
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, msg)
    }

    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::new(Code::IOError, msg)
    }

    pub fn incomplete(msg: impl Into<String>) -> Self {
        Self::new(Code::Incomplete, msg)
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(Code::Busy, msg)
    }

    pub fn timed_out(msg: impl Into<String>) -> Self {
        Self::new(Code::TimedOut, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(Code::Conflict, msg)
    }

    pub fn closed(msg: impl Into<String>) -> Self {
        Self::new(Code::Closed, msg)
    }

    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    pub fn is_not_found(&self) -> bool {
        self.code == Code::NotFound
    }

    pub fn is_corruption(&self) -> bool {
        self.code == Code::Corruption
    }

    pub fn is_not_supported(&self) -> bool {
        self.code == Code::NotSupported
    }

    pub fn is_invalid_argument(&self) -> bool {
        self.code == Code::InvalidArgument
    }

    pub fn is_io_error(&self) -> bool {
        self.code == Code::IOError
    }

    pub fn is_busy(&self) -> bool {
        self.code == Code::Busy
    }

    pub fn is_timed_out(&self) -> bool {
        self.code == Code::TimedOut
    }

    pub fn is_conflict(&self) -> bool {
        self.code == Code::Conflict
    }

    pub fn is_closed(&self) -> bool {
        self.code == Code::Closed
    }

    /// Conflicts and lock waits may succeed when the caller tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self.code, Code::Conflict | Code::Busy | Code::TimedOut)
    }

    pub fn code(&self) -> Code {
        self.code
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn render(&self) -> String {
        match &self.message {
            Some(msg) => format!("{:?}: {}", self.code, msg),
            None => format!("{:?}", self.code),
        }
    }
}

impl From<std::io::Error> for Status {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Status::not_found(err.to_string()),
            _ => Status::io_error(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for Status {
    fn from(err: serde_json::Error) -> Self {
        Status::corruption(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ok() {
        let status = Status::ok();
        assert!(status.is_ok());
        assert_eq!(status.code(), Code::Ok);
        assert_eq!(status.to_string(), "Ok");
    }

    #[test]
    fn test_status_display() {
        let status = Status::io_error("disk full");
        assert_eq!(status.to_string(), "IOError: disk full");
        assert_eq!(status.message(), Some("disk full"));
    }

    #[test]
    fn test_retryable_codes() {
        assert!(Status::busy("lock wait").is_retryable());
        assert!(Status::conflict("write conflict").is_retryable());
        assert!(Status::timed_out("expired").is_retryable());
        assert!(!Status::closed("tx").is_retryable());
        assert!(!Status::corruption("bad block").is_retryable());
        assert!(!Status::invalid_argument("cf 9").is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(Status::from(missing).is_not_found());

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert!(Status::from(denied).is_io_error());
    }
}
