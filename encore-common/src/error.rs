use std::fmt;
use std::io;

use thiserror::Error;

/// Classification of a failure, shared by every Encore crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unexpected,
    OutOfBounds,
    ObjectDisposed,
    NotImplemented,
    InvalidCast,
    InvalidPointer,
    Failure,
    ProtocolNotSupported,
    FileNotFound,
    TooManyOpenFiles,
    AccessDenied,
    SeekError,
    WriteFault,
    ReadFault,
    EndOfFile,
    InvalidArgument,
    ArithmeticOverflow,
    InvalidUnicode,
    InvalidDataFormat,
    UnsupportedFormat,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Unexpected => "unexpected",
            ErrorKind::OutOfBounds => "out of bounds",
            ErrorKind::ObjectDisposed => "object disposed",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::InvalidCast => "invalid cast",
            ErrorKind::InvalidPointer => "invalid pointer",
            ErrorKind::Failure => "failure",
            ErrorKind::ProtocolNotSupported => "protocol not supported",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::TooManyOpenFiles => "too many open files",
            ErrorKind::AccessDenied => "access denied",
            ErrorKind::SeekError => "seek error",
            ErrorKind::WriteFault => "write fault",
            ErrorKind::ReadFault => "read fault",
            ErrorKind::EndOfFile => "end of file",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::ArithmeticOverflow => "arithmetic overflow",
            ErrorKind::InvalidUnicode => "invalid unicode",
            ErrorKind::InvalidDataFormat => "invalid data format",
            ErrorKind::UnsupportedFormat => "unsupported format",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error with a kind, a human-readable message and an optional cause.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Error {
            kind,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::Failure, message)
    }

    pub fn end_of_file() -> Self {
        Error::new(ErrorKind::EndOfFile, "end of file reached")
    }

    pub fn out_of_bounds(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::OutOfBounds, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_unicode(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidUnicode, message)
    }

    pub fn invalid_data_format(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::InvalidDataFormat, message)
    }

    pub fn unsupported_format(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnsupportedFormat, message)
    }

    pub fn protocol_not_supported(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::ProtocolNotSupported, message)
    }

    pub fn seek_error(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::SeekError, message)
    }

    pub fn read_fault(message: impl Into<String>) -> Self {
        Error::new(ErrorKind::ReadFault, message)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::NotFound => ErrorKind::FileNotFound,
            io::ErrorKind::PermissionDenied => ErrorKind::AccessDenied,
            io::ErrorKind::UnexpectedEof => ErrorKind::EndOfFile,
            io::ErrorKind::InvalidInput => ErrorKind::InvalidArgument,
            io::ErrorKind::InvalidData => ErrorKind::InvalidDataFormat,
            io::ErrorKind::WriteZero => ErrorKind::WriteFault,
            _ => ErrorKind::ReadFault,
        };
        Error::with_source(kind, err.to_string(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_kinds_map() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "nope").into();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);

        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(err.kind(), ErrorKind::EndOfFile);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::unsupported_format("odd channel mask");
        assert_eq!(err.to_string(), "unsupported format: odd channel mask");
    }
}
