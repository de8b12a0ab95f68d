//! Error types for MTP operations.

use crate::ptp::{OperationCode, ResponseCode};

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all MTP operations.
#[derive(Debug)]
pub enum Error {
    /// No matching MTP device was found.
    NoDevice,
    /// The device was unplugged or the USB connection dropped.
    Disconnected,
    /// An I/O deadline elapsed before the device responded.
    Timeout,
    /// The operation was cancelled through a [`CancellationToken`](crate::CancellationToken).
    Cancelled,
    /// An operation that requires an open session was attempted without one.
    SessionNotOpen,
    /// A previous failure left the session in an unrecoverable state.
    ///
    /// Produced when draining the bulk endpoint after a cancelled or aborted
    /// transfer did not bring the device back to a known state. Reconnect to
    /// recover.
    SessionBroken,
    /// The device answered with a non-OK response code.
    Protocol {
        /// The response code, preserved verbatim from the wire.
        code: ResponseCode,
        /// The operation that triggered the response.
        operation: OperationCode,
    },
    /// The device sent data that does not parse as valid MTP.
    ///
    /// Never retried: this indicates a device firmware bug or a decoder bug.
    InvalidData { message: String },
    /// A component of a virtual device path did not resolve to an object.
    PathNotFound { component: String },
    /// An object with this name already exists under the target parent.
    AlreadyExists { name: String },
    /// Local filesystem error.
    Io(std::io::Error),
    /// USB transport error.
    Usb(UsbError),
}

impl Error {
    /// Shorthand for [`Error::InvalidData`].
    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        Error::InvalidData {
            message: message.into(),
        }
    }

    /// Returns true if the error ends the session rather than a single
    /// operation. Recursive transfers abort on fatal errors and merely log
    /// per-file failures otherwise.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Disconnected | Error::SessionBroken | Error::Cancelled | Error::Usb(_)
        )
    }

    /// Returns true if the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout => true,
            Error::Protocol { code, .. } => *code == ResponseCode::DeviceBusy,
            _ => false,
        }
    }

    /// Returns a user-facing hint for errors with a known cause, such as a
    /// locked phone in charging-only mode.
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Error::Protocol { code, .. } if *code == ResponseCode::InvalidStorageId => Some(
                "The device may be locked or in charging-only mode. Unlock it and select \
                 the File transfer (MTP) mode, then try again.",
            ),
            Error::SessionBroken => Some("Reconnect the device to start a fresh session."),
            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NoDevice => write!(f, "no MTP device found"),
            Error::Disconnected => write!(f, "device disconnected"),
            Error::Timeout => write!(f, "operation timed out"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::SessionNotOpen => write!(f, "session not open"),
            Error::SessionBroken => write!(f, "session is broken; reconnect the device"),
            Error::Protocol { code, operation } => {
                write!(f, "device returned {code:?} for {operation:?}")
            }
            Error::InvalidData { message } => write!(f, "invalid data from device: {message}"),
            Error::PathNotFound { component } => {
                write!(f, "path component not found: {component}")
            }
            Error::AlreadyExists { name } => write!(f, "object already exists: {name}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Usb(e) => write!(f, "USB error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Usb(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

/// USB-level error, wrapping the backend's failure modes.
#[derive(Debug)]
pub enum UsbError {
    /// A submitted transfer failed.
    Transfer(nusb::transfer::TransferError),
    /// Opening the device, claiming the interface, or reading descriptors
    /// failed. On macOS this surfaces "exclusive access" when another process
    /// (such as ptpcamerad) holds the device.
    Setup(std::io::Error),
}

impl std::fmt::Display for UsbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsbError::Transfer(e) => write!(f, "{e}"),
            UsbError::Setup(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for UsbError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_preserves_response_code() {
        let err = Error::Protocol {
            code: ResponseCode::StoreFull,
            operation: OperationCode::SendObject,
        };
        let text = err.to_string();
        assert!(text.contains("StoreFull"), "text: {text}");
        assert!(text.contains("SendObject"), "text: {text}");
    }

    #[test]
    fn test_display_unknown_response_code() {
        let err = Error::Protocol {
            code: ResponseCode(0xA807),
            operation: OperationCode::GetObject,
        };
        assert!(err.to_string().contains("0xa807"), "text: {err}");
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::Timeout.is_retryable());
        assert!(
            Error::Protocol {
                code: ResponseCode::DeviceBusy,
                operation: OperationCode::GetObjectHandles,
            }
            .is_retryable()
        );
        assert!(!Error::Disconnected.is_retryable());
        assert!(
            !Error::Protocol {
                code: ResponseCode::AccessDenied,
                operation: OperationCode::DeleteObject,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_invalid_storage_hint() {
        let err = Error::Protocol {
            code: ResponseCode::InvalidStorageId,
            operation: OperationCode::GetStorageInfo,
        };
        let hint = err.user_hint().expect("hint expected");
        assert!(hint.contains("charging-only"));
        assert!(Error::Timeout.user_hint().is_none());
    }

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Disconnected.is_fatal());
        assert!(Error::SessionBroken.is_fatal());
        assert!(
            !Error::PathNotFound {
                component: "DCIM".into()
            }
            .is_fatal()
        );
        assert!(
            !Error::Protocol {
                code: ResponseCode::AccessDenied,
                operation: OperationCode::DeleteObject,
            }
            .is_fatal()
        );
    }
}
