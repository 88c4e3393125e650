use serde::{Deserialize, Serialize};

/// User-visible completion status of a runtime operation.
///
/// Numeric values are opaque to user code; the names mirror the classic
/// error vocabulary the API surfaces. `Pending` is not a failure: it means
/// the operation was enqueued and completes when its blocking event fires.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error,
)]
#[repr(u8)]
pub enum StatusCode {
    #[default]
    #[error("OK")]
    Ok = 0,
    #[error("ENOMEM")]
    NoMemory = 1,
    #[error("EINVAL")]
    InvalidArg = 2,
    #[error("ENOTSUP")]
    NotSupported = 3,
    #[error("EBUSY")]
    Busy = 4,
    #[error("EPEND")]
    Pending = 5,
    #[error("EACCES")]
    Access = 6,
    #[error("EGUIDEXISTS")]
    GuidExists = 7,
    #[error("ENOENT")]
    NotFound = 8,
    #[error("EPERM")]
    NotPermitted = 9,
}

impl StatusCode {
    #[inline]
    pub fn is_ok(self) -> bool {
        self == StatusCode::Ok
    }

    /// Treat `Ok` as success, everything else as an error value.
    pub fn into_result(self) -> Result<(), StatusCode> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_is_default_and_success() {
        assert_eq!(StatusCode::default(), StatusCode::Ok);
        assert!(StatusCode::Ok.into_result().is_ok());
        assert_eq!(StatusCode::Busy.into_result(), Err(StatusCode::Busy));
    }

    #[test]
    fn display_uses_errno_vocabulary() {
        assert_eq!(StatusCode::GuidExists.to_string(), "EGUIDEXISTS");
        assert_eq!(StatusCode::Pending.to_string(), "EPEND");
    }
}
