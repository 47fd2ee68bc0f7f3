//! C ABI exports: the public surface consumed by native game clients.
//!
//! All functions are `extern "C"` and `#[unsafe(no_mangle)]`, return 1 on
//! success and 0 on error, and reset their out-pointers before doing any work.
//! Panics never cross the boundary.

use std::ffi::c_char;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use ez_steam::{CallManager, Config, LeaderboardHandle, Started};

use crate::bridge::strings::{give_string, read_c_str, take_string, write_out};
use crate::error::{AbiError, FfiResult};
use crate::{Backend, MANAGER, init_logging};

/// Names a TOML config file read by `ez_steam_start`.
pub const CONFIG_ENV: &str = "EZ_STEAM_CONFIG";

/// Run an export body, logging failures and containing panics.
fn guarded(name: &'static str, body: impl FnOnce() -> Result<(), AbiError>) -> i32 {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => FfiResult::Ok as i32,
        Ok(Err(e)) => {
            tracing::error!("{name}: {e}");
            FfiResult::Error as i32
        }
        Err(_) => {
            tracing::error!("{name}: panicked");
            FfiResult::Error as i32
        }
    }
}

/// Clone the running manager out of the global slot.
fn running() -> Result<Arc<CallManager<Backend>>, AbiError> {
    MANAGER.lock().clone().ok_or(AbiError::NotStarted)
}

fn load_config(app_id: u32) -> Result<Config, AbiError> {
    let config = match std::env::var_os(CONFIG_ENV) {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    Ok(Config { app_id, ..config }.with_env_overrides())
}

/// # Safety
///
/// `detail` must point to `count` readable `i32`s when `count` is positive.
unsafe fn read_details(detail: *const i32, count: i32) -> Result<Vec<i32>, AbiError> {
    match count {
        0 => Ok(Vec::new()),
        n if n < 0 || detail.is_null() => Err(AbiError::InvalidArgument("detail")),
        n => Ok(unsafe { std::slice::from_raw_parts(detail, n as usize) }.to_vec()),
    }
}

// ─── Lifecycle ───────────────────────────────────────────────────────

/// Initialize the platform and start the call manager.
///
/// `*out_should_restart` is set to 1 if the platform wants the game relaunched
/// through its client; the caller should then exit without calling anything
/// else.
///
/// # Safety
///
/// `out_should_restart` must be a valid pointer to an `i32`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_start(app_id: u32, out_should_restart: *mut i32) -> i32 {
    guarded("ez_steam_start", || {
        unsafe { write_out(out_should_restart, 0, "out_should_restart")? };
        init_logging();

        let mut slot = MANAGER.lock();
        if slot.is_some() {
            return Err(AbiError::AlreadyStarted);
        }
        let config = load_config(app_id)?;
        match CallManager::start(Arc::new(Backend::new()), &config)? {
            Started::Restart => unsafe { write_out(out_should_restart, 1, "out_should_restart")? },
            Started::Running(manager) => *slot = Some(Arc::new(manager)),
        }
        Ok(())
    })
}

/// Stop the call manager and shut the platform down.
///
/// Calls blocked on another thread fail. Safe to call multiple times.
/// Without a running manager this is a no-op: the platform was either never
/// initialized or already shut down by the manager that owned it, so no
/// shutdown call is made.
///
/// # Safety
///
/// No pointer arguments; marked unsafe for symmetry with the other exports.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_stop() -> i32 {
    guarded("ez_steam_stop", || {
        let manager = MANAGER.lock().take();
        match manager {
            Some(manager) => manager.stop(),
            None => tracing::debug!("ez_steam_stop: not running"),
        }
        Ok(())
    })
}

/// Free a string returned through an out-pointer.
///
/// # Safety
///
/// `data` must be a pointer previously handed out by this library and not
/// yet freed. Freeing null succeeds and does nothing.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_string_free(data: *mut c_char) -> i32 {
    guarded("ez_steam_string_free", || {
        unsafe { take_string(data) };
        Ok(())
    })
}

// ─── Identity ────────────────────────────────────────────────────────

/// Display name of the signed-in user.
///
/// # Safety
///
/// `out_user_name` must be a valid pointer. The string written there must be
/// released with `ez_steam_string_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_user_name_get(out_user_name: *mut *mut c_char) -> i32 {
    guarded("ez_steam_user_name_get", || {
        unsafe { write_out(out_user_name, std::ptr::null_mut(), "out_user_name")? };
        let name = running()?.user_name()?;
        unsafe { give_string(out_user_name, name, "out_user_name") }
    })
}

// ─── Leaderboards ────────────────────────────────────────────────────

/// Look up a leaderboard by name. Blocks until the platform answers.
///
/// # Safety
///
/// `name` must be a valid NUL-terminated UTF-8 C string and `out_leaderboard`
/// a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_leaderboard_get(
    name: *const c_char,
    out_leaderboard: *mut u64,
) -> i32 {
    guarded("ez_steam_leaderboard_get", || {
        unsafe { write_out(out_leaderboard, 0, "out_leaderboard")? };
        let name = unsafe { read_c_str(name, "name")? };
        let handle = running()?.get_leaderboard_handle(&name)?;
        unsafe { write_out(out_leaderboard, handle.0, "out_leaderboard") }
    })
}

/// Upload a score, keeping the better of the new and stored values.
///
/// `*out_score_updated` is 1 if the stored score changed.
///
/// # Safety
///
/// `detail` must point to `detail_count` integers (it may be null when the
/// count is 0). `out_score_updated` must be a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_leaderboard_set_score(
    leaderboard: u64,
    score: i32,
    detail: *const i32,
    detail_count: i32,
    out_score_updated: *mut i32,
) -> i32 {
    guarded("ez_steam_leaderboard_set_score", || {
        unsafe { write_out(out_score_updated, 0, "out_score_updated")? };
        let details = unsafe { read_details(detail, detail_count)? };
        let changed = running()?.set_leaderboard_score(
            LeaderboardHandle(leaderboard),
            score,
            &details,
        )?;
        unsafe { write_out(out_score_updated, FfiResult::from_bool(changed), "out_score_updated") }
    })
}

/// Friends' scores on a leaderboard as JSON.
///
/// Schema:
/// ```json
/// [{ "name": "Bob", "score": 950 }, { "name": "Alice", "score": 1200 }]
/// ```
///
/// # Safety
///
/// `out_json` must be a valid pointer. The string written there must be
/// released with `ez_steam_string_free`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_leaderboard_get_friend_scores(
    leaderboard: u64,
    out_json: *mut *mut c_char,
) -> i32 {
    guarded("ez_steam_leaderboard_get_friend_scores", || {
        unsafe { write_out(out_json, std::ptr::null_mut(), "out_json")? };
        let rows = running()?.get_friend_scores(LeaderboardHandle(leaderboard))?;
        let json = serde_json::to_string(&rows)?;
        unsafe { give_string(out_json, json, "out_json") }
    })
}

// ─── Achievements ────────────────────────────────────────────────────

/// # Safety
///
/// `id` must be a valid NUL-terminated UTF-8 C string and `out_achieved` a
/// valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_achievement_get(id: *const c_char, out_achieved: *mut i32) -> i32 {
    guarded("ez_steam_achievement_get", || {
        unsafe { write_out(out_achieved, 0, "out_achieved")? };
        let id = unsafe { read_c_str(id, "id")? };
        let achieved = running()?.get_achievement(&id)?;
        unsafe { write_out(out_achieved, FfiResult::from_bool(achieved), "out_achieved") }
    })
}

/// Unlock an achievement locally. `*out_newly_achieved` is 0 if it was
/// already unlocked. Call `ez_steam_achievements_store` to persist.
///
/// # Safety
///
/// `id` must be a valid NUL-terminated UTF-8 C string and
/// `out_newly_achieved` a valid pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_achievement_set(
    id: *const c_char,
    out_newly_achieved: *mut i32,
) -> i32 {
    guarded("ez_steam_achievement_set", || {
        unsafe { write_out(out_newly_achieved, 0, "out_newly_achieved")? };
        let id = unsafe { read_c_str(id, "id")? };
        let newly = running()?.set_achievement(&id)?;
        unsafe { write_out(out_newly_achieved, FfiResult::from_bool(newly), "out_newly_achieved") }
    })
}

/// Persist achievements set since the last store.
///
/// # Safety
///
/// No pointer arguments; marked unsafe for symmetry with the other exports.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ez_steam_achievements_store() -> i32 {
    guarded("ez_steam_achievements_store", || {
        running()?.store_achievements()?;
        Ok(())
    })
}

// ─── Tests ───────────────────────────────────────────────────────────
