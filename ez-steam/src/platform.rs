//! The platform SDK as seen by the call manager.
//!
//! Everything asynchronous on the platform follows the same shape: an
//! operation is started and returns an [`ApiCall`] correlation handle, a
//! completion is registered for that handle, and the completion (plus any
//! unsolicited events) is only delivered while [`Platform::run_callbacks`] is
//! running.

use serde::Serialize;

/// Application id the platform was initialized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AppId(pub u32);

impl AppId {
    /// The id stats events carry for this application.
    pub fn game_id(self) -> GameId {
        GameId(u64::from(self.0))
    }
}

/// Game id carried on stats events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameId(pub u64);

/// Correlation handle for a started asynchronous operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ApiCall(pub u64);

impl ApiCall {
    /// Returned when the platform refused to start the operation.
    pub const INVALID: ApiCall = ApiCall(0);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

/// Opaque leaderboard handle. Zero never names a leaderboard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct LeaderboardHandle(pub u64);

/// Handle to a set of downloaded leaderboard entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EntriesHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SteamId(pub u64);

/// Subset of platform result codes reported by stats events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformResult {
    Ok,
    Fail,
    NoConnection,
    Timeout,
    InvalidParam,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardUploadMethod {
    /// Only replace the stored score if the new one is better.
    KeepBest,
    ForceUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardDataRequest {
    Global,
    GlobalAroundUser,
    Friends,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderboardSortMethod {
    /// Lower scores rank first (times, strokes).
    Ascending,
    Descending,
}

impl LeaderboardSortMethod {
    /// Whether `candidate` ranks strictly better than `current`.
    pub fn is_better(self, candidate: i32, current: i32) -> bool {
        match self {
            LeaderboardSortMethod::Ascending => candidate < current,
            LeaderboardSortMethod::Descending => candidate > current,
        }
    }
}

/// One row read back from a downloaded entry set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user: SteamId,
    pub global_rank: i32,
    pub score: i32,
    pub details: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardFindResult {
    pub handle: LeaderboardHandle,
    pub found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardScoresDownloaded {
    pub handle: LeaderboardHandle,
    pub entries: EntriesHandle,
    pub entry_count: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderboardScoreUploaded {
    pub success: bool,
    pub handle: LeaderboardHandle,
    pub score: i32,
    pub score_changed: bool,
    pub global_rank_new: i32,
    pub global_rank_previous: i32,
}

/// Raw completion records delivered for started calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCompletion {
    LeaderboardFind(LeaderboardFindResult),
    ScoresDownloaded(LeaderboardScoresDownloaded),
    ScoreUploaded(LeaderboardScoreUploaded),
}

/// Implemented by each raw record type so a bridge can pull its own record
/// out of a [`RawCompletion`].
pub trait CompletionRecord: Sized + Send + 'static {
    /// Name of the record, for diagnostics.
    const KIND: &'static str;

    fn from_completion(raw: RawCompletion) -> Option<Self>;
}

impl CompletionRecord for LeaderboardFindResult {
    const KIND: &'static str = "LeaderboardFindResult";

    fn from_completion(raw: RawCompletion) -> Option<Self> {
        match raw {
            RawCompletion::LeaderboardFind(r) => Some(r),
            _ => None,
        }
    }
}

impl CompletionRecord for LeaderboardScoresDownloaded {
    const KIND: &'static str = "LeaderboardScoresDownloaded";

    fn from_completion(raw: RawCompletion) -> Option<Self> {
        match raw {
            RawCompletion::ScoresDownloaded(r) => Some(r),
            _ => None,
        }
    }
}

impl CompletionRecord for LeaderboardScoreUploaded {
    const KIND: &'static str = "LeaderboardScoreUploaded";

    fn from_completion(raw: RawCompletion) -> Option<Self> {
        match raw {
            RawCompletion::ScoreUploaded(r) => Some(r),
            _ => None,
        }
    }
}

// ─── Unsolicited events ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStatsReceived {
    pub game_id: GameId,
    pub result: PlatformResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserStatsStored {
    pub game_id: GameId,
    pub result: PlatformResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAchievementStored {
    pub game_id: GameId,
    pub achievement: String,
}

pub type EventHandler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Subscription table for events not tied to a started call.
///
/// The platform delivers each event to the matching slot during
/// [`Platform::run_callbacks`]. Empty slots drop the event.
#[derive(Default)]
pub struct Callbacks {
    pub user_stats_received: Option<EventHandler<UserStatsReceived>>,
    pub user_stats_stored: Option<EventHandler<UserStatsStored>>,
    pub achievement_stored: Option<EventHandler<UserAchievementStored>>,
}

impl Callbacks {
    pub fn dispatch_user_stats_received(&self, event: &UserStatsReceived) {
        if let Some(ref handler) = self.user_stats_received {
            handler(event);
        }
    }

    pub fn dispatch_user_stats_stored(&self, event: &UserStatsStored) {
        if let Some(ref handler) = self.user_stats_stored {
            handler(event);
        }
    }

    pub fn dispatch_achievement_stored(&self, event: &UserAchievementStored) {
        if let Some(ref handler) = self.achievement_stored {
            handler(event);
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("user_stats_received", &self.user_stats_received.is_some())
            .field("user_stats_stored", &self.user_stats_stored.is_some())
            .field("achievement_stored", &self.achievement_stored.is_some())
            .finish()
    }
}

/// Completion registered for one started call. Receives the platform, the raw
/// record and whether the platform reported an I/O failure.
pub type CompletionFn<P> = Box<dyn FnOnce(&P, RawCompletion, bool) + Send>;

// ─── Accessors ───────────────────────────────────────────────────────

/// Leaderboard and achievement accessors.
pub trait UserStats: Send + Sync {
    fn find_leaderboard(&self, name: &str) -> ApiCall;

    fn upload_leaderboard_score(
        &self,
        handle: LeaderboardHandle,
        method: LeaderboardUploadMethod,
        score: i32,
        details: &[i32],
    ) -> ApiCall;

    fn download_leaderboard_entries(
        &self,
        handle: LeaderboardHandle,
        request: LeaderboardDataRequest,
        range_start: i32,
        range_end: i32,
    ) -> ApiCall;

    /// Read one entry of a downloaded set. Only valid while the completion
    /// that produced `entries` is being handled.
    fn downloaded_leaderboard_entry(
        &self,
        entries: EntriesHandle,
        index: i32,
    ) -> Option<LeaderboardEntry>;

    /// Ask for the current user's stats; answered by a `UserStatsReceived`
    /// event. Returns false if the request could not be sent.
    fn request_current_stats(&self) -> bool;

    /// `None` if the achievement is unknown or stats are unavailable.
    fn achievement(&self, id: &str) -> Option<bool>;

    fn set_achievement(&self, id: &str) -> bool;

    /// Flush local stats to the backend; answered by a `UserStatsStored` event.
    fn store_stats(&self) -> bool;
}

pub trait Friends: Send + Sync {
    /// Display name of the local user.
    fn persona_name(&self) -> String;

    fn friend_persona_name(&self, user: SteamId) -> String;
}

/// A pump-driven platform SDK.
pub trait Platform: Send + Sync + 'static {
    /// True if the process must be relaunched through the platform client.
    fn restart_app_if_necessary(&self, app_id: AppId) -> bool;

    fn init(&self) -> bool;

    fn shutdown(&self);

    /// Deliver queued completions and events on the calling thread. Must
    /// only be called from one thread at a time.
    fn run_callbacks(&self);

    fn register_call_result(&self, call: ApiCall, on_complete: CompletionFn<Self>)
    where
        Self: Sized;

    fn set_callbacks(&self, callbacks: Callbacks);

    fn clear_callbacks(&self);

    fn user_stats(&self) -> Option<&dyn UserStats>;

    fn friends(&self) -> Option<&dyn Friends>;
}
