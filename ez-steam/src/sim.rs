//! In-process platform backend.
//!
//! Behaves like the real SDK where it matters to the call manager: started
//! calls and unsolicited events are queued and only delivered from
//! [`Platform::run_callbacks`]. Seeded with a small Spacewar-like data set (a
//! local user, two friends, a `"Best Times"` board and four achievements) and
//! a handful of knobs for injecting failures.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::platform::{
    ApiCall, AppId, Callbacks, CompletionFn, EntriesHandle, Friends, LeaderboardDataRequest,
    LeaderboardEntry, LeaderboardFindResult, LeaderboardHandle, LeaderboardScoreUploaded,
    LeaderboardScoresDownloaded, LeaderboardSortMethod, LeaderboardUploadMethod, Platform,
    PlatformResult, RawCompletion, SteamId, UserAchievementStored, UserStats, UserStatsReceived,
    UserStatsStored,
};

pub const LOCAL_USER: SteamId = SteamId(76561197960287930);

/// Unsolicited events queued for the next pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    StatsReceived(UserStatsReceived),
    StatsStored(UserStatsStored),
    AchievementStored(UserAchievementStored),
}

#[derive(Debug, Clone)]
struct ScoreRow {
    user: SteamId,
    score: i32,
    details: Vec<i32>,
}

#[derive(Debug)]
struct Leaderboard {
    handle: LeaderboardHandle,
    name: String,
    sort: LeaderboardSortMethod,
    rows: Vec<ScoreRow>,
}

impl Leaderboard {
    fn ranked(&self) -> Vec<&ScoreRow> {
        let mut rows: Vec<&ScoreRow> = self.rows.iter().collect();
        match self.sort {
            LeaderboardSortMethod::Ascending => rows.sort_by_key(|r| r.score),
            LeaderboardSortMethod::Descending => rows.sort_by_key(|r| std::cmp::Reverse(r.score)),
        }
        rows
    }

    fn rank_of(&self, user: SteamId) -> i32 {
        self.ranked()
            .iter()
            .position(|r| r.user == user)
            .map(|i| i as i32 + 1)
            .unwrap_or(0)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Achievement {
    achieved: bool,
    stored: bool,
}

struct Registered {
    call: ApiCall,
    on_complete: CompletionFn<SimPlatform>,
    raw: RawCompletion,
    io_failed: bool,
}

struct SimState {
    app_id: AppId,
    initialized: bool,
    init_ok: bool,
    restart_required: bool,
    stats_result: PlatformResult,

    next_call: u64,
    next_entries: u64,
    personas: HashMap<SteamId, String>,
    friends: Vec<SteamId>,
    leaderboards: Vec<Leaderboard>,
    achievements: BTreeMap<String, Achievement>,
    downloads: HashMap<EntriesHandle, Vec<LeaderboardEntry>>,

    /// Started calls whose completion has not been registered yet.
    started: HashMap<ApiCall, (RawCompletion, bool)>,
    registered: Vec<Registered>,
    events: VecDeque<SimEvent>,

    hold: bool,
    fail_next: bool,
    refuse_next: bool,
    corrupt_downloads: bool,
    peak_pending: usize,
}

impl SimState {
    fn pending(&self) -> usize {
        self.started.len() + self.registered.len()
    }

    fn start(&mut self, raw: RawCompletion) -> ApiCall {
        if std::mem::take(&mut self.refuse_next) {
            return ApiCall::INVALID;
        }
        let call = ApiCall(self.next_call);
        self.next_call += 1;
        let io_failed = std::mem::take(&mut self.fail_next);
        self.started.insert(call, (raw, io_failed));
        self.peak_pending = self.peak_pending.max(self.pending());
        call
    }

    fn board(&self, handle: LeaderboardHandle) -> Option<&Leaderboard> {
        self.leaderboards.iter().find(|b| b.handle == handle)
    }

    fn entry_for(&self, board: &Leaderboard, row: &ScoreRow) -> LeaderboardEntry {
        LeaderboardEntry {
            user: row.user,
            global_rank: board.rank_of(row.user),
            score: row.score,
            details: row.details.clone(),
        }
    }
}

/// Platform backend that lives entirely in this process.
pub struct SimPlatform {
    state: Mutex<SimState>,
    callbacks: Mutex<Arc<Callbacks>>,
    stats_available: AtomicBool,
    pumps: AtomicUsize,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::for_app(AppId(480))
    }

    pub fn for_app(app_id: AppId) -> Self {
        let alice = SteamId(76561197960287931);
        let bob = SteamId(76561197960287932);
        let personas = HashMap::from([
            (LOCAL_USER, "Player One".to_string()),
            (alice, "Alice".to_string()),
            (bob, "Bob".to_string()),
        ]);
        let leaderboards = vec![
            Leaderboard {
                handle: LeaderboardHandle(1001),
                name: "Best Times".to_string(),
                sort: LeaderboardSortMethod::Ascending,
                rows: vec![
                    ScoreRow {
                        user: alice,
                        score: 1200,
                        details: Vec::new(),
                    },
                    ScoreRow {
                        user: bob,
                        score: 950,
                        details: Vec::new(),
                    },
                ],
            },
            Leaderboard {
                handle: LeaderboardHandle(1002),
                name: "High Scores".to_string(),
                sort: LeaderboardSortMethod::Descending,
                rows: Vec::new(),
            },
        ];
        let achievements = [
            "ACH_WIN_ONE_GAME",
            "ACH_WIN_100_GAMES",
            "ACH_TRAVEL_FAR_ACCUM",
            "ACH_TRAVEL_FAR_SINGLE",
        ]
        .into_iter()
        .map(|id| (id.to_string(), Achievement::default()))
        .collect();

        Self {
            state: Mutex::new(SimState {
                app_id,
                initialized: false,
                init_ok: true,
                restart_required: false,
                stats_result: PlatformResult::Ok,
                next_call: 1,
                next_entries: 1,
                personas,
                friends: vec![alice, bob],
                leaderboards,
                achievements,
                downloads: HashMap::new(),
                started: HashMap::new(),
                registered: Vec::new(),
                events: VecDeque::new(),
                hold: false,
                fail_next: false,
                refuse_next: false,
                corrupt_downloads: false,
                peak_pending: 0,
            }),
            callbacks: Mutex::new(Arc::new(Callbacks::default())),
            stats_available: AtomicBool::new(true),
            pumps: AtomicUsize::new(0),
        }
    }

    // ─── Knobs ───────────────────────────────────────────────────────

    /// Keep completions queued instead of delivering them. Events still flow.
    pub fn hold_completions(&self, hold: bool) {
        self.state.lock().hold = hold;
    }

    /// Report an I/O failure on the next started call.
    pub fn fail_next_call(&self) {
        self.state.lock().fail_next = true;
    }

    /// Return [`ApiCall::INVALID`] from the next start.
    pub fn refuse_next_call(&self) {
        self.state.lock().refuse_next = true;
    }

    /// Make reads of downloaded entries fail.
    pub fn corrupt_downloads(&self, corrupt: bool) {
        self.state.lock().corrupt_downloads = corrupt;
    }

    pub fn set_restart_required(&self, restart: bool) {
        self.state.lock().restart_required = restart;
    }

    pub fn set_init_ok(&self, ok: bool) {
        self.state.lock().init_ok = ok;
    }

    /// Result reported by the stats-received event.
    pub fn set_stats_result(&self, result: PlatformResult) {
        self.state.lock().stats_result = result;
    }

    /// Make `user_stats()` return `None`.
    pub fn remove_user_stats(&self) {
        self.stats_available.store(false, Ordering::SeqCst);
    }

    /// Queue an unsolicited event for the next pump.
    pub fn push_event(&self, event: SimEvent) {
        self.state.lock().events.push_back(event);
    }

    /// Add a friend with an optional score on the named board.
    pub fn add_friend(&self, id: SteamId, name: &str, score: Option<(&str, i32)>) {
        let mut state = self.state.lock();
        state.personas.insert(id, name.to_string());
        state.friends.push(id);
        if let Some((board, value)) = score {
            if let Some(board) = state.leaderboards.iter_mut().find(|b| b.name == board) {
                board.rows.push(ScoreRow {
                    user: id,
                    score: value,
                    details: Vec::new(),
                });
            }
        }
    }

    // ─── Inspection ──────────────────────────────────────────────────

    pub fn pump_count(&self) -> usize {
        self.pumps.load(Ordering::SeqCst)
    }

    /// Most calls ever started and not yet delivered at the same time.
    pub fn peak_pending(&self) -> usize {
        self.state.lock().peak_pending
    }

    pub fn pending_calls(&self) -> usize {
        self.state.lock().pending()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Whether an achievement has been flushed by `store_stats`.
    pub fn achievement_stored(&self, id: &str) -> bool {
        self.state
            .lock()
            .achievements
            .get(id)
            .is_some_and(|a| a.stored)
    }

    pub fn local_score(&self, board: &str) -> Option<i32> {
        let state = self.state.lock();
        let board = state.leaderboards.iter().find(|b| b.name == board)?;
        board
            .rows
            .iter()
            .find(|r| r.user == LOCAL_USER)
            .map(|r| r.score)
    }
}

impl UserStats for SimPlatform {
    fn find_leaderboard(&self, name: &str) -> ApiCall {
        let mut state = self.state.lock();
        let result = match state.leaderboards.iter().find(|b| b.name == name) {
            Some(board) => LeaderboardFindResult {
                handle: board.handle,
                found: true,
            },
            None => LeaderboardFindResult {
                handle: LeaderboardHandle(0),
                found: false,
            },
        };
        state.start(RawCompletion::LeaderboardFind(result))
    }

    fn upload_leaderboard_score(
        &self,
        handle: LeaderboardHandle,
        method: LeaderboardUploadMethod,
        score: i32,
        details: &[i32],
    ) -> ApiCall {
        let mut state = self.state.lock();
        let Some(board) = state.leaderboards.iter_mut().find(|b| b.handle == handle) else {
            return state.start(RawCompletion::ScoreUploaded(LeaderboardScoreUploaded {
                success: false,
                handle,
                score,
                score_changed: false,
                global_rank_new: 0,
                global_rank_previous: 0,
            }));
        };

        let previous_rank = board.rank_of(LOCAL_USER);
        let existing = board.rows.iter().position(|r| r.user == LOCAL_USER);
        let replace = match (existing, method) {
            (None, _) => true,
            (Some(i), LeaderboardUploadMethod::KeepBest) => board.sort.is_better(score, board.rows[i].score),
            (Some(i), LeaderboardUploadMethod::ForceUpdate) => board.rows[i].score != score,
        };
        if replace {
            let row = ScoreRow {
                user: LOCAL_USER,
                score,
                details: details.to_vec(),
            };
            match existing {
                Some(i) => board.rows[i] = row,
                None => board.rows.push(row),
            }
        }
        let result = LeaderboardScoreUploaded {
            success: true,
            handle,
            score,
            score_changed: replace,
            global_rank_new: board.rank_of(LOCAL_USER),
            global_rank_previous: previous_rank,
        };
        state.start(RawCompletion::ScoreUploaded(result))
    }

    fn download_leaderboard_entries(
        &self,
        handle: LeaderboardHandle,
        request: LeaderboardDataRequest,
        range_start: i32,
        range_end: i32,
    ) -> ApiCall {
        let mut state = self.state.lock();
        let entries: Vec<LeaderboardEntry> = match state.board(handle) {
            None => Vec::new(),
            Some(board) => {
                let ranked = board.ranked();
                let selected: Vec<&ScoreRow> = match request {
                    LeaderboardDataRequest::Friends => ranked
                        .into_iter()
                        .filter(|r| r.user == LOCAL_USER || state.friends.contains(&r.user))
                        .collect(),
                    LeaderboardDataRequest::Global => ranked
                        .into_iter()
                        .enumerate()
                        .filter(|(i, _)| {
                            let rank = *i as i32 + 1;
                            rank >= range_start && rank <= range_end
                        })
                        .map(|(_, r)| r)
                        .collect(),
                    LeaderboardDataRequest::GlobalAroundUser => {
                        let own = board.rank_of(LOCAL_USER);
                        ranked
                            .into_iter()
                            .enumerate()
                            .filter(|(i, _)| {
                                let rank = *i as i32 + 1;
                                own > 0 && rank >= own + range_start && rank <= own + range_end
                            })
                            .map(|(_, r)| r)
                            .collect()
                    }
                };
                selected.into_iter().map(|r| state.entry_for(board, r)).collect()
            }
        };

        let entries_handle = EntriesHandle(state.next_entries);
        state.next_entries += 1;
        let entry_count = entries.len() as i32;
        state.downloads.insert(entries_handle, entries);
        state.start(RawCompletion::ScoresDownloaded(LeaderboardScoresDownloaded {
            handle,
            entries: entries_handle,
            entry_count,
        }))
    }

    fn downloaded_leaderboard_entry(
        &self,
        entries: EntriesHandle,
        index: i32,
    ) -> Option<LeaderboardEntry> {
        let state = self.state.lock();
        if state.corrupt_downloads || index < 0 {
            return None;
        }
        state.downloads.get(&entries)?.get(index as usize).cloned()
    }

    fn request_current_stats(&self) -> bool {
        let mut state = self.state.lock();
        if !state.initialized {
            return false;
        }
        let event = UserStatsReceived {
            game_id: state.app_id.game_id(),
            result: state.stats_result,
        };
        state.events.push_back(SimEvent::StatsReceived(event));
        true
    }

    fn achievement(&self, id: &str) -> Option<bool> {
        self.state.lock().achievements.get(id).map(|a| a.achieved)
    }

    fn set_achievement(&self, id: &str) -> bool {
        match self.state.lock().achievements.get_mut(id) {
            Some(a) => {
                a.achieved = true;
                true
            }
            None => false,
        }
    }

    fn store_stats(&self) -> bool {
        let mut state = self.state.lock();
        if !state.initialized {
            return false;
        }
        let game_id = state.app_id.game_id();
        let newly_stored: Vec<String> = state
            .achievements
            .iter_mut()
            .filter(|(_, a)| a.achieved && !a.stored)
            .map(|(id, a)| {
                a.stored = true;
                id.clone()
            })
            .collect();
        state.events.push_back(SimEvent::StatsStored(UserStatsStored {
            game_id,
            result: PlatformResult::Ok,
        }));
        for achievement in newly_stored {
            state
                .events
                .push_back(SimEvent::AchievementStored(UserAchievementStored {
                    game_id,
                    achievement,
                }));
        }
        true
    }
}

impl Friends for SimPlatform {
    fn persona_name(&self) -> String {
        self.friend_persona_name(LOCAL_USER)
    }

    fn friend_persona_name(&self, user: SteamId) -> String {
        self.state
            .lock()
            .personas
            .get(&user)
            .cloned()
            .unwrap_or_else(|| "[unknown]".to_string())
    }
}

impl Platform for SimPlatform {
    fn restart_app_if_necessary(&self, app_id: AppId) -> bool {
        let mut state = self.state.lock();
        if state.restart_required {
            return true;
        }
        state.app_id = app_id;
        false
    }

    fn init(&self) -> bool {
        let mut state = self.state.lock();
        state.initialized = state.init_ok;
        state.initialized
    }

    fn shutdown(&self) {
        let mut state = self.state.lock();
        state.initialized = false;
        state.started.clear();
        state.registered.clear();
        state.events.clear();
        state.downloads.clear();
    }

    fn run_callbacks(&self) {
        self.pumps.fetch_add(1, Ordering::SeqCst);

        let (completions, events) = {
            let mut state = self.state.lock();
            if !state.initialized {
                return;
            }
            let completions = if state.hold {
                Vec::new()
            } else {
                std::mem::take(&mut state.registered)
            };
            let events: Vec<SimEvent> = state.events.drain(..).collect();
            (completions, events)
        };
        let callbacks = Arc::clone(&*self.callbacks.lock());

        for done in completions {
            let entries = match done.raw {
                RawCompletion::ScoresDownloaded(ref r) => Some(r.entries),
                _ => None,
            };
            tracing::trace!(handle = done.call.0, "delivering completion");
            (done.on_complete)(self, done.raw, done.io_failed);
            if let Some(entries) = entries {
                self.state.lock().downloads.remove(&entries);
            }
        }

        for event in events {
            match event {
                SimEvent::StatsReceived(ref e) => callbacks.dispatch_user_stats_received(e),
                SimEvent::StatsStored(ref e) => callbacks.dispatch_user_stats_stored(e),
                SimEvent::AchievementStored(ref e) => callbacks.dispatch_achievement_stored(e),
            }
        }
    }

    fn register_call_result(&self, call: ApiCall, on_complete: CompletionFn<Self>) {
        let mut state = self.state.lock();
        match state.started.remove(&call) {
            Some((raw, io_failed)) => state.registered.push(Registered {
                call,
                on_complete,
                raw,
                io_failed,
            }),
            None => tracing::warn!(handle = call.0, "completion registered for unknown call"),
        }
    }

    fn set_callbacks(&self, callbacks: Callbacks) {
        *self.callbacks.lock() = Arc::new(callbacks);
    }

    fn clear_callbacks(&self) {
        *self.callbacks.lock() = Arc::new(Callbacks::default());
    }

    fn user_stats(&self) -> Option<&dyn UserStats> {
        if self.stats_available.load(Ordering::SeqCst) {
            Some(self)
        } else {
            None
        }
    }

    fn friends(&self) -> Option<&dyn Friends> {
        Some(self)
    }
}
