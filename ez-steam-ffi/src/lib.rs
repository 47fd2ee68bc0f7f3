//! C ABI bridge for ez-steam targeting native game clients.
//!
//! Exposes `ez_steam_*` functions over one process-global call manager.
//! Every function returns 1 on success and 0 on error; details go to the
//! `tracing` log. Strings handed out through out-pointers belong to the
//! caller and are released with `ez_steam_string_free`.

pub mod bridge;
pub mod error;

use std::sync::Arc;

use ez_steam::CallManager;
use ez_steam::sim::SimPlatform;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// Platform backend behind the C ABI.
pub type Backend = SimPlatform;

/// The running call manager, if `ez_steam_start` succeeded.
///
/// Callers clone the `Arc` and drop the lock before blocking so that
/// `ez_steam_stop` can abort their calls from another thread.
pub(crate) static MANAGER: Lazy<Mutex<Option<Arc<CallManager<Backend>>>>> =
    Lazy::new(|| Mutex::new(None));

/// Install a log subscriber unless the host already has one.
pub(crate) fn init_logging() {
    let json_logs = std::env::var("EZ_STEAM_LOG_JSON").unwrap_or_default() == "1";
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ez_steam=info"));
    let installed = if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if installed.is_ok() {
        tracing::debug!("ez-steam-ffi logging initialized");
    }
}
