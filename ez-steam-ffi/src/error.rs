//! Return codes and internal errors for the `ez_steam_*` surface.

/// Return codes for the C ABI surface.
///
/// Every `ez_steam_*` function returns one of these as `i32`. Boolean out
/// values use the same encoding.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiResult {
    Error = 0,
    Ok = 1,
}

impl FfiResult {
    pub fn from_bool(value: bool) -> i32 {
        if value {
            FfiResult::Ok as i32
        } else {
            FfiResult::Error as i32
        }
    }
}

/// Why an exported call failed. Logged, never handed to the caller.
#[derive(Debug, thiserror::Error)]
pub enum AbiError {
    #[error("null or invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("ez_steam_start has not been called")]
    NotStarted,
    #[error("already started")]
    AlreadyStarted,
    #[error(transparent)]
    Steam(#[from] ez_steam::Error),
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("string contains an interior NUL byte")]
    Nul(#[from] std::ffi::NulError),
}
