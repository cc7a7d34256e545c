use std::{error::Error, fmt, sync::Arc};
use thiserror::Error;

/// Coarse classification of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misuse of the stream surfaced at the call site: a second reader while
    /// locked, enqueue after close, double close.
    ProtocolViolation,
    /// A start, pull or cancel algorithm failed, or the producer called
    /// `error()`.
    ProducerFailure,
    /// The consumer gave up on a read, e.g. by releasing its reader.
    ConsumerAbort,
    /// The driver task backing the stream is gone.
    Runtime,
}

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("Stream is locked to a reader")]
    Locked,
    #[error("Stream is closing")]
    Closing,
    #[error("Stream is closed")]
    Closed,
    #[error("Stream is errored")]
    Errored,
    #[error("Reader was released")]
    ReaderReleased,
    #[error("Stream task was dropped")]
    TaskDropped,
    #[error("{0}")]
    Other(#[source] Arc<dyn Error + Send + Sync>),
}

impl StreamError {
    /// Wrap any error type into `StreamError`
    pub fn other<E>(e: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        StreamError::Other(Arc::new(e))
    }

    /// Wrap a boxed error
    pub fn other_boxed(e: Box<dyn Error + Send + Sync>) -> Self {
        StreamError::Other(e.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::Locked
            | StreamError::Closing
            | StreamError::Closed
            | StreamError::Errored => ErrorKind::ProtocolViolation,
            StreamError::ReaderReleased => ErrorKind::ConsumerAbort,
            StreamError::TaskDropped => ErrorKind::Runtime,
            StreamError::Other(_) => ErrorKind::ProducerFailure,
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        self.kind() == ErrorKind::ProtocolViolation
    }
}

#[derive(Debug)]
struct SimpleError(String);

impl fmt::Display for SimpleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for SimpleError {}

impl From<&str> for StreamError {
    fn from(s: &str) -> Self {
        StreamError::Other(Arc::new(SimpleError(s.to_string())))
    }
}

impl From<String> for StreamError {
    fn from(s: String) -> Self {
        StreamError::Other(Arc::new(SimpleError(s)))
    }
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Other(Arc::new(e))
    }
}

impl From<Box<dyn Error + Send + Sync>> for StreamError {
    fn from(e: Box<dyn Error + Send + Sync>) -> Self {
        StreamError::Other(e.into())
    }
}

/// Macro for users to add direct `From` implementations for their error types.
/// This allows using `?` directly without `.map_err(StreamError::other)`.
///
/// # Example
/// ```rust
/// use pullstream::{impl_stream_error_from, StreamError};
///
/// #[derive(Debug)]
/// struct SensorFault;
///
/// impl std::fmt::Display for SensorFault {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         f.write_str("sensor fault")
///     }
/// }
///
/// impl std::error::Error for SensorFault {}
///
/// impl_stream_error_from!(SensorFault);
///
/// fn read_sensor() -> Result<u32, SensorFault> {
///     Err(SensorFault)
/// }
///
/// fn sample() -> Result<u32, StreamError> {
///     let value = read_sensor()?;
///     Ok(value)
/// }
///
/// assert_eq!(sample().unwrap_err().to_string(), "sensor fault");
/// ```
#[macro_export]
macro_rules! impl_stream_error_from {
    ($($error_type:ty),* $(,)?) => {
        $(
            impl From<$error_type> for $crate::streams::error::StreamError {
                fn from(e: $error_type) -> Self {
                    $crate::streams::error::StreamError::Other(std::sync::Arc::new(e))
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_conversions_work() {
        let _: StreamError = "error message".into();
        let _: StreamError = String::from("error").into();

        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "io error");
        let _: StreamError = io_err.into();

        #[derive(Debug)]
        struct CustomError;
        impl fmt::Display for CustomError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "custom error")
            }
        }
        impl Error for CustomError {}

        let err = StreamError::other(CustomError);
        assert_eq!(err.to_string(), "custom error");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_question_mark_works() -> Result<(), Box<dyn Error>> {
        fn returns_stream_error() -> Result<(), StreamError> {
            Err("stream error".into())
        }

        assert!(returns_stream_error().is_err());
        Ok(())
    }

    #[test]
    fn test_macro_usage_example() {
        #[derive(Debug)]
        struct UserCustomError(String);
        impl fmt::Display for UserCustomError {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "User error: {}", self.0)
            }
        }
        impl Error for UserCustomError {}

        impl_stream_error_from!(UserCustomError);

        fn user_function() -> Result<(), StreamError> {
            fn might_fail() -> Result<(), UserCustomError> {
                Err(UserCustomError("something went wrong".to_string()))
            }
            might_fail()?;
            Ok(())
        }

        let err = user_function().unwrap_err();
        assert_eq!(err.to_string(), "User error: something went wrong");
        assert_eq!(err.kind(), ErrorKind::ProducerFailure);
    }

    #[test]
    fn classifies_errors_by_kind() {
        assert!(StreamError::Locked.is_protocol_violation());
        assert!(StreamError::Closing.is_protocol_violation());
        assert!(StreamError::Closed.is_protocol_violation());
        assert!(StreamError::Errored.is_protocol_violation());
        assert_eq!(StreamError::ReaderReleased.kind(), ErrorKind::ConsumerAbort);
        assert_eq!(StreamError::TaskDropped.kind(), ErrorKind::Runtime);
        assert_eq!(StreamError::from("boom").kind(), ErrorKind::ProducerFailure);
    }
}
