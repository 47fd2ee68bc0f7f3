//! Blocking calls over a pump-driven game platform SDK.
//!
//! The platform starts leaderboard and stats operations asynchronously and
//! only delivers their results while its callback pump runs. [`CallManager`]
//! hides that: a single dispatch thread pumps whenever calls are outstanding,
//! and each operation kind goes through a [`bridge::CallBridge`] that blocks
//! the caller until its completion arrives.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ez_steam::{CallManager, Config, Started, sim::SimPlatform};
//!
//! # fn main() -> ez_steam::Result<()> {
//! let platform = Arc::new(SimPlatform::new());
//! let Started::Running(manager) = CallManager::start(platform, &Config::new(480))? else {
//!     return Ok(()); // relaunched through the platform client
//! };
//! let board = manager.get_leaderboard_handle("Best Times")?;
//! let changed = manager.set_leaderboard_score(board, 1000, &[])?;
//! manager.stop();
//! # let _ = changed;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod platform;
pub mod sim;

pub use config::Config;
pub use error::{Error, FailureReason, Result};
pub use manager::{CallManager, FriendLeaderboardRow, Started};
pub use platform::{AppId, LeaderboardHandle, Platform};
