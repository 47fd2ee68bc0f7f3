//! Blocking leaderboard, achievement and identity calls.
//!
//! Owns the dispatch thread, the outstanding-call counter, one bridge per
//! asynchronous operation kind and the handlers for the platform's
//! unsolicited stats events.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

use crate::bridge::{CallBridge, CompletionState};
use crate::config::Config;
use crate::dispatch::{DispatchThread, OutstandingCalls};
use crate::error::{Error, FailureReason, Result};
use crate::platform::{
    AppId, Callbacks, Friends, LeaderboardDataRequest, LeaderboardFindResult, LeaderboardHandle,
    LeaderboardScoreUploaded, LeaderboardScoresDownloaded, LeaderboardUploadMethod, Platform,
    PlatformResult, UserAchievementStored, UserStats, UserStatsReceived, UserStatsStored,
};

/// One row of a friends leaderboard download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FriendLeaderboardRow {
    pub name: String,
    pub score: i32,
}

/// Outcome of [`CallManager::start`].
pub enum Started<P: Platform> {
    /// The platform wants the process relaunched through its client. Nothing
    /// was initialized; the caller should exit.
    Restart,
    Running(CallManager<P>),
}

impl<P: Platform> Started<P> {
    pub fn should_restart(&self) -> bool {
        matches!(self, Started::Restart)
    }
}

type UploadArgs = (LeaderboardHandle, i32, Vec<i32>);

/// State the unsolicited-event handlers share with the manager.
struct Shared {
    app_id: AppId,
    calls: Arc<OutstandingCalls>,
    achievements_initialized: AtomicBool,
    /// Set while the startup stats request is unanswered.
    bootstrap_pending: AtomicBool,
    /// Stores issued whose stats-stored event has not arrived.
    stores_pending: AtomicUsize,
    /// Achievements set locally since the last store.
    pending_achievements: AtomicUsize,
}

impl Shared {
    fn on_user_stats_received(&self, event: &UserStatsReceived) {
        if event.game_id != self.app_id.game_id() {
            tracing::debug!(game_id = event.game_id.0, "stats received for another game");
            return;
        }
        if self.bootstrap_pending.swap(false, Ordering::SeqCst) {
            self.calls.decrement();
        }
        if event.result == PlatformResult::Ok {
            if !self.achievements_initialized.swap(true, Ordering::SeqCst) {
                tracing::info!(app_id = self.app_id.0, "achievements initialized");
            }
        } else {
            tracing::warn!(result = ?event.result, "user stats request failed");
        }
    }

    fn on_user_stats_stored(&self, event: &UserStatsStored) {
        if event.game_id != self.app_id.game_id() {
            return;
        }
        let owed = self
            .stores_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if owed {
            self.calls.decrement();
        } else {
            tracing::debug!("unsolicited stats-stored event");
        }
        if event.result != PlatformResult::Ok {
            tracing::warn!(result = ?event.result, "storing stats failed");
        }
    }

    fn on_achievement_stored(&self, event: &UserAchievementStored) {
        tracing::debug!(achievement = %event.achievement, "achievement stored");
    }

    fn subscriptions(self: &Arc<Self>) -> Callbacks {
        let received = Arc::clone(self);
        let stored = Arc::clone(self);
        let achievement = Arc::clone(self);
        Callbacks {
            user_stats_received: Some(Box::new(move |e: &UserStatsReceived| {
                received.on_user_stats_received(e)
            })),
            user_stats_stored: Some(Box::new(move |e: &UserStatsStored| stored.on_user_stats_stored(e))),
            achievement_stored: Some(Box::new(move |e: &UserAchievementStored| {
                achievement.on_achievement_stored(e)
            })),
        }
    }
}

fn user_stats<P: Platform>(platform: &P) -> Result<&dyn UserStats> {
    platform
        .user_stats()
        .ok_or(Error::PlatformUnavailable("user_stats"))
}

fn friends<P: Platform>(platform: &P) -> Result<&dyn Friends> {
    platform.friends().ok_or(Error::PlatformUnavailable("friends"))
}

pub struct CallManager<P: Platform> {
    platform: Arc<P>,
    shared: Arc<Shared>,
    dispatch: Mutex<DispatchThread>,
    stopped: AtomicBool,
    find_leaderboard: CallBridge<P, LeaderboardFindResult, LeaderboardHandle, String>,
    friend_scores:
        CallBridge<P, LeaderboardScoresDownloaded, Vec<FriendLeaderboardRow>, LeaderboardHandle>,
    upload_score: CallBridge<P, LeaderboardScoreUploaded, bool, UploadArgs>,
}

impl<P: Platform> CallManager<P> {
    /// Initialize the platform and bring up the dispatch machinery.
    pub fn start(platform: Arc<P>, config: &Config) -> Result<Started<P>> {
        config.validate()?;
        let app_id = config.app_id();
        if platform.restart_app_if_necessary(app_id) {
            tracing::info!(app_id = app_id.0, "platform requested a relaunch");
            return Ok(Started::Restart);
        }
        if !platform.init() {
            return Err(Error::InitFailed);
        }

        match Self::launch(Arc::clone(&platform), config) {
            Ok(manager) => Ok(Started::Running(manager)),
            Err(e) => {
                platform.clear_callbacks();
                platform.shutdown();
                Err(e)
            }
        }
    }

    fn launch(platform: Arc<P>, config: &Config) -> Result<Self> {
        user_stats(&*platform)?;

        let calls = Arc::new(OutstandingCalls::new());
        let shared = Arc::new(Shared {
            app_id: config.app_id(),
            calls: Arc::clone(&calls),
            achievements_initialized: AtomicBool::new(false),
            bootstrap_pending: AtomicBool::new(false),
            stores_pending: AtomicUsize::new(0),
            pending_achievements: AtomicUsize::new(0),
        });
        platform.set_callbacks(shared.subscriptions());

        let dispatch =
            DispatchThread::spawn(Arc::clone(&platform), Arc::clone(&calls), config.poll_interval())?;

        let find_leaderboard = CallBridge::new(
            "find_leaderboard",
            Arc::clone(&platform),
            Arc::clone(&calls),
            |p: &P, name: String| Ok(user_stats(p)?.find_leaderboard(&name)),
            |_p: &P, result: &LeaderboardFindResult, state: &mut CompletionState<LeaderboardHandle>| {
                if result.found {
                    state.data = result.handle;
                } else {
                    state.fail(FailureReason::Rejected);
                }
                Ok(())
            },
        );

        let friend_scores = CallBridge::new(
            "download_friend_scores",
            Arc::clone(&platform),
            Arc::clone(&calls),
            |p: &P, handle: LeaderboardHandle| {
                Ok(user_stats(p)?.download_leaderboard_entries(
                    handle,
                    LeaderboardDataRequest::Friends,
                    0,
                    0,
                ))
            },
            |p: &P,
             result: &LeaderboardScoresDownloaded,
             state: &mut CompletionState<Vec<FriendLeaderboardRow>>| {
                let stats = user_stats(p)?;
                let friends = friends(p)?;
                for i in 0..result.entry_count {
                    let entry = stats
                        .downloaded_leaderboard_entry(result.entries, i)
                        .ok_or(Error::Accessor {
                            call: "downloaded_leaderboard_entry",
                        })?;
                    state.data.push(FriendLeaderboardRow {
                        name: friends.friend_persona_name(entry.user),
                        score: entry.score,
                    });
                }
                Ok(())
            },
        );

        let upload_score = CallBridge::new(
            "upload_leaderboard_score",
            Arc::clone(&platform),
            Arc::clone(&calls),
            |p: &P, (handle, score, details): UploadArgs| {
                Ok(user_stats(p)?.upload_leaderboard_score(
                    handle,
                    LeaderboardUploadMethod::KeepBest,
                    score,
                    &details,
                ))
            },
            |_p: &P, result: &LeaderboardScoreUploaded, state: &mut CompletionState<bool>| {
                if result.success {
                    state.data = result.score_changed;
                } else {
                    state.fail(FailureReason::Rejected);
                }
                Ok(())
            },
        );

        let manager = Self {
            platform,
            shared,
            dispatch: Mutex::new(dispatch),
            stopped: AtomicBool::new(false),
            find_leaderboard,
            friend_scores,
            upload_score,
        };
        if config.bootstrap_stats {
            manager.request_stats()?;
        }
        tracing::info!(app_id = config.app_id, "call manager started");
        Ok(manager)
    }

    /// Ask for the current user's stats outside the bridge path. The answer
    /// arrives as a stats-received event, which settles the count.
    fn request_stats(&self) -> Result<()> {
        let stats = user_stats(&*self.platform)?;
        self.shared.bootstrap_pending.store(true, Ordering::SeqCst);
        self.shared.calls.increment();
        if !stats.request_current_stats() {
            tracing::warn!("requesting current stats failed");
            if self.shared.bootstrap_pending.swap(false, Ordering::SeqCst) {
                self.shared.calls.decrement();
            }
        }
        Ok(())
    }

    /// Fail in-flight calls, stop the dispatch thread and shut the platform
    /// down. Idempotent.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("stopping call manager");
        self.find_leaderboard.teardown();
        self.friend_scores.teardown();
        self.upload_score.teardown();
        self.dispatch.lock().shutdown();
        self.platform.clear_callbacks();
        self.platform.shutdown();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(Error::Stopped);
        }
        Ok(())
    }

    // ─── Identity ────────────────────────────────────────────────────

    /// Display name of the signed-in user.
    pub fn user_name(&self) -> Result<String> {
        self.ensure_running()?;
        Ok(friends(&*self.platform)?.persona_name())
    }

    // ─── Leaderboards ────────────────────────────────────────────────

    pub fn get_leaderboard_handle(&self, name: &str) -> Result<LeaderboardHandle> {
        self.ensure_running()?;
        self.find_leaderboard.call(name.to_string())
    }

    /// Upload a score, keeping the better of the new and stored values.
    /// Returns whether the stored score changed.
    pub fn set_leaderboard_score(
        &self,
        handle: LeaderboardHandle,
        score: i32,
        details: &[i32],
    ) -> Result<bool> {
        self.ensure_running()?;
        self.upload_score.call((handle, score, details.to_vec()))
    }

    /// Friends' entries (including the local user) in the order the platform
    /// delivered them.
    pub fn get_friend_scores(&self, handle: LeaderboardHandle) -> Result<Vec<FriendLeaderboardRow>> {
        self.ensure_running()?;
        self.friend_scores.call(handle)
    }

    // ─── Achievements ────────────────────────────────────────────────

    pub fn get_achievement(&self, id: &str) -> Result<bool> {
        self.ensure_running()?;
        user_stats(&*self.platform)?
            .achievement(id)
            .ok_or(Error::Accessor {
                call: "get_achievement",
            })
    }

    /// Unlock an achievement locally. Returns false if it was already
    /// unlocked. The change only reaches the backend after
    /// [`store_achievements`](Self::store_achievements).
    pub fn set_achievement(&self, id: &str) -> Result<bool> {
        self.ensure_running()?;
        let stats = user_stats(&*self.platform)?;
        let achieved = stats.achievement(id).ok_or(Error::Accessor {
            call: "get_achievement",
        })?;
        if achieved {
            return Ok(false);
        }
        if !stats.set_achievement(id) {
            return Err(Error::Accessor {
                call: "set_achievement",
            });
        }
        self.shared.pending_achievements.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(achievement = id, "achievement set, store pending");
        Ok(true)
    }

    /// Flush locally set achievements. Returns once the platform accepted the
    /// request; completion is observed through the stats-stored event.
    pub fn store_achievements(&self) -> Result<()> {
        self.ensure_running()?;
        let stats = user_stats(&*self.platform)?;
        self.shared.stores_pending.fetch_add(1, Ordering::SeqCst);
        self.shared.calls.increment();
        if !stats.store_stats() {
            if self
                .shared
                .stores_pending
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                self.shared.calls.decrement();
            }
            return Err(Error::Accessor { call: "store_stats" });
        }
        self.shared.pending_achievements.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Achievements set since the last successful store.
    pub fn pending_achievements(&self) -> usize {
        self.shared.pending_achievements.load(Ordering::SeqCst)
    }

    /// Whether the startup stats request came back successfully. Advisory:
    /// achievement calls do not wait for it.
    pub fn achievements_initialized(&self) -> bool {
        self.shared.achievements_initialized.load(Ordering::SeqCst)
    }

    // ─── Introspection ───────────────────────────────────────────────

    pub fn app_id(&self) -> AppId {
        self.shared.app_id
    }

    pub fn outstanding_calls(&self) -> usize {
        self.shared.calls.get()
    }

    pub fn platform(&self) -> &Arc<P> {
        &self.platform
    }
}

impl<P: Platform> Drop for CallManager<P> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::GameId;

    fn shared() -> Shared {
        Shared {
            app_id: AppId(480),
            calls: Arc::new(OutstandingCalls::new()),
            achievements_initialized: AtomicBool::new(false),
            bootstrap_pending: AtomicBool::new(false),
            stores_pending: AtomicUsize::new(0),
            pending_achievements: AtomicUsize::new(0),
        }
    }

    #[test]
    fn test_bootstrap_settles_once() {
        let s = shared();
        s.bootstrap_pending.store(true, Ordering::SeqCst);
        s.calls.increment();

        let event = UserStatsReceived {
            game_id: GameId(480),
            result: PlatformResult::Ok,
        };
        s.on_user_stats_received(&event);
        assert_eq!(s.calls.get(), 0);
        assert!(s.achievements_initialized.load(Ordering::SeqCst));

        // A second answer must not decrement again
        s.on_user_stats_received(&event);
        assert_eq!(s.calls.get(), 0);
    }

    #[test]
    fn test_stats_for_other_game_ignored() {
        let s = shared();
        s.bootstrap_pending.store(true, Ordering::SeqCst);
        s.calls.increment();
        s.on_user_stats_received(&UserStatsReceived {
            game_id: GameId(999),
            result: PlatformResult::Ok,
        });
        assert_eq!(s.calls.get(), 1);
        assert!(!s.achievements_initialized.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failed_bootstrap_still_settles() {
        let s = shared();
        s.bootstrap_pending.store(true, Ordering::SeqCst);
        s.calls.increment();
        s.on_user_stats_received(&UserStatsReceived {
            game_id: GameId(480),
            result: PlatformResult::Timeout,
        });
        assert_eq!(s.calls.get(), 0);
        assert!(!s.achievements_initialized.load(Ordering::SeqCst));
    }

    #[test]
    fn test_unsolicited_stats_stored_does_not_decrement() {
        let s = shared();
        s.on_user_stats_stored(&UserStatsStored {
            game_id: GameId(480),
            result: PlatformResult::Ok,
        });
        assert_eq!(s.calls.get(), 0);

        s.stores_pending.store(1, Ordering::SeqCst);
        s.calls.increment();
        s.on_user_stats_stored(&UserStatsStored {
            game_id: GameId(480),
            result: PlatformResult::Ok,
        });
        assert_eq!(s.calls.get(), 0);
        assert_eq!(s.stores_pending.load(Ordering::SeqCst), 0);
    }
}
