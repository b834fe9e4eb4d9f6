use std::fmt;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::correlator::OperationKind;
use crate::Handle;

/// Errors reported by a GATT client session.
///
/// Every public operation either returns a value or fails with exactly one of
/// these kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("device is not connected")]
    NotConnected,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection to the device was lost")]
    ConnectionLost,

    #[error("characteristic {uuid} is ambiguous, candidates: {}", HandleList(.handles))]
    AmbiguousCharacteristic { uuid: Uuid, handles: Vec<Handle> },

    #[error("descriptor {uuid} is ambiguous, candidates: {}", HandleList(.handles))]
    AmbiguousDescriptor { uuid: Uuid, handles: Vec<Handle> },

    #[error("attribute {0} was not found")]
    AttributeNotFound(String),

    #[error("characteristic {handle} does not support {operation}")]
    PropertyNotSupported {
        handle: Handle,
        operation: &'static str,
    },

    #[error("{kind} on {handle} timed out after {timeout:?}")]
    OperationTimeout {
        kind: OperationKind,
        handle: Handle,
        timeout: Duration,
    },

    #[error("native operation failed{}: {message}", StatusCode(.code))]
    NativeOperationFailed { code: Option<i32>, message: String },

    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,

    #[error("a disconnect is already in progress")]
    AlreadyDisconnecting,
}

impl Error {
    /// Wraps a backend failure, keeping its status code for diagnostics.
    pub fn native(code: Option<i32>, message: impl Into<String>) -> Self {
        Error::NativeOperationFailed {
            code,
            message: message.into(),
        }
    }

    /// `AlreadyConnecting` and `AlreadyDisconnecting` only describe a transition
    /// that is already under way.
    pub fn is_benign(&self) -> bool {
        matches!(self, Error::AlreadyConnecting | Error::AlreadyDisconnecting)
    }

    /// Failures that came back from the device rather than from local validation.
    pub(crate) fn is_operation_failure(&self) -> bool {
        matches!(
            self,
            Error::OperationTimeout { .. } | Error::NativeOperationFailed { .. }
        )
    }
}

impl From<btleplug::Error> for Error {
    fn from(err: btleplug::Error) -> Self {
        Error::native(None, err.to_string())
    }
}

struct HandleList<'a>(&'a [Handle]);

impl fmt::Display for HandleList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, handle) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", handle)?;
        }
        Ok(())
    }
}

struct StatusCode<'a>(&'a Option<i32>);

impl fmt::Display for StatusCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self.0 {
            Some(code) => match gatt_status_name(code) {
                Some(name) => write!(f, " (status {:#06x} {})", code, name),
                None => write!(f, " (status {:#06x})", code),
            },
            None => Ok(()),
        }
    }
}

/// Name of a GATT status code as reported by the Android Bluetooth stack.
///
/// Codes up to `0x13` are ATT error codes from the core specification; Android
/// reuses the rest of the range for stack-internal failures.
pub fn gatt_status_name(code: i32) -> Option<&'static str> {
    let name = match code {
        0x0000 => "GATT_SUCCESS",
        0x0001 => "GATT_INVALID_HANDLE",
        0x0002 => "GATT_READ_NOT_PERMIT",
        0x0003 => "GATT_WRITE_NOT_PERMIT",
        0x0004 => "GATT_INVALID_PDU",
        0x0005 => "GATT_INSUF_AUTHENTICATION",
        0x0006 => "GATT_REQ_NOT_SUPPORTED",
        0x0007 => "GATT_INVALID_OFFSET",
        0x0008 => "GATT_INSUF_AUTHORIZATION",
        0x0009 => "GATT_PREPARE_Q_FULL",
        0x000A => "GATT_NOT_FOUND",
        0x000B => "GATT_NOT_LONG",
        0x000C => "GATT_INSUF_KEY_SIZE",
        0x000D => "GATT_INVALID_ATTR_LEN",
        0x000E => "GATT_ERR_UNLIKELY",
        0x000F => "GATT_INSUF_ENCRYPTION",
        0x0010 => "GATT_UNSUPPORT_GRP_TYPE",
        0x0011 => "GATT_INSUF_RESOURCE",
        0x0012 => "GATT_DATABASE_OUT_OF_SYNC",
        0x0013 => "GATT_VALUE_NOT_ALLOWED",
        0x0014 => "BLU_REM_TERM_CONN_LOW_RES",
        0x0015 => "BLU_REM_TERM_CONN_POW_OFF",
        0x0016 => "BLU_LOC_TERM_CONN",
        0x0017 => "BLU_REPEATED_ATTEMPTS",
        0x0018 => "BLU_PAIRING_NOT_ALLOWED",
        0x007F => "GATT_TOO_SHORT",
        0x0080 => "GATT_NO_RESOURCES",
        0x0081 => "GATT_INTERNAL_ERROR",
        0x0082 => "GATT_WRONG_STATE",
        0x0083 => "GATT_DB_FULL",
        0x0084 => "GATT_BUSY",
        0x0085 => "GATT_ERROR",
        0x0086 => "GATT_CMD_STARTED",
        0x0087 => "GATT_ILLEGAL_PARAMETER",
        0x0088 => "GATT_PENDING",
        0x0089 => "GATT_AUTH_FAIL",
        0x008A => "GATT_MORE",
        0x008B => "GATT_INVALID_CFG",
        0x008C => "GATT_SERVICE_STARTED",
        0x008D => "GATT_ENCRYPED_NO_MITM",
        0x008E => "GATT_NOT_ENCRYPTED",
        0x008F => "GATT_CONGESTED",
        0x0090 => "GATT_DUP_REG",
        0x0091 => "GATT_ALREADY_OPEN",
        0x0092 => "GATT_CANCEL",
        0x00FD => "GATT_CCC_CFG_ERR",
        0x00FE => "GATT_PRC_IN_PROGRESS",
        0x00FF => "GATT_OUT_OF_RANGE",
        0x0101 => "GATT_FAILURE",
        _ => return None,
    };
    Some(name)
}
