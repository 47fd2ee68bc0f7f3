//! Achievement tests: startup stats request, set/store two-phase flow.
//!
//! Tests cover:
//! - The startup stats request settles the outstanding count and sets the
//!   initialized flag only on success
//! - set_achievement reports newly achieved once, starts no async call
//! - store_achievements flushes and is settled by the stats-stored event
//! - Unsolicited stats-stored events leave the count alone

use std::sync::Arc;
use std::time::{Duration, Instant};

use ez_steam::platform::{GameId, PlatformResult, UserStatsStored};
use ez_steam::sim::{SimEvent, SimPlatform};
use ez_steam::{CallManager, Config, Error, Started};

fn config() -> Config {
    Config {
        poll_interval_ms: 5,
        ..Config::new(480)
    }
}

fn running(sim: &Arc<SimPlatform>, config: &Config) -> CallManager<SimPlatform> {
    match CallManager::start(Arc::clone(sim), config).unwrap() {
        Started::Running(manager) => manager,
        Started::Restart => panic!("unexpected relaunch request"),
    }
}

fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    false
}

#[test]
fn startup_stats_initialize_achievements() {
    let sim = Arc::new(SimPlatform::new());
    let manager = running(&sim, &config());

    assert!(wait_until(|| manager.achievements_initialized()));
    assert!(wait_until(|| manager.outstanding_calls() == 0));
}

#[test]
fn failed_startup_stats_still_settle() {
    let sim = Arc::new(SimPlatform::new());
    sim.set_stats_result(PlatformResult::Timeout);
    let manager = running(&sim, &config());

    assert!(wait_until(|| manager.outstanding_calls() == 0));
    assert!(!manager.achievements_initialized());
}

#[test]
fn startup_stats_can_be_skipped() {
    let sim = Arc::new(SimPlatform::new());
    let config = Config {
        bootstrap_stats: false,
        ..config()
    };
    let manager = running(&sim, &config);

    assert_eq!(manager.outstanding_calls(), 0);
    std::thread::sleep(Duration::from_millis(25));
    assert!(!manager.achievements_initialized());
    assert_eq!(sim.pump_count(), 0);
}

#[test]
fn set_achievement_twice() {
    let sim = Arc::new(SimPlatform::new());
    let manager = running(&sim, &config());
    assert!(wait_until(|| manager.outstanding_calls() == 0));

    assert!(!manager.get_achievement("ACH_WIN_ONE_GAME").unwrap());
    assert!(manager.set_achievement("ACH_WIN_ONE_GAME").unwrap());
    assert!(!manager.set_achievement("ACH_WIN_ONE_GAME").unwrap());
    assert!(manager.get_achievement("ACH_WIN_ONE_GAME").unwrap());

    // Synchronous accessors only: nothing was started or counted
    assert_eq!(sim.peak_pending(), 0);
    assert_eq!(manager.outstanding_calls(), 0);
    assert_eq!(manager.pending_achievements(), 1);
    assert!(!sim.achievement_stored("ACH_WIN_ONE_GAME"));
}

#[test]
fn unknown_achievement_is_an_accessor_error() {
    let sim = Arc::new(SimPlatform::new());
    let manager = running(&sim, &config());

    assert!(matches!(
        manager.get_achievement("ACH_NOPE"),
        Err(Error::Accessor { .. })
    ));
    assert!(matches!(
        manager.set_achievement("ACH_NOPE"),
        Err(Error::Accessor { .. })
    ));
    assert_eq!(manager.pending_achievements(), 0);
}

#[test]
fn store_flushes_and_settles() {
    let sim = Arc::new(SimPlatform::new());
    let manager = running(&sim, &config());
    assert!(wait_until(|| manager.outstanding_calls() == 0));

    manager.set_achievement("ACH_WIN_ONE_GAME").unwrap();
    manager.set_achievement("ACH_TRAVEL_FAR_SINGLE").unwrap();
    assert_eq!(manager.pending_achievements(), 2);

    manager.store_achievements().unwrap();
    assert_eq!(manager.pending_achievements(), 0);
    assert!(sim.achievement_stored("ACH_WIN_ONE_GAME"));
    assert!(sim.achievement_stored("ACH_TRAVEL_FAR_SINGLE"));
    assert!(!sim.achievement_stored("ACH_WIN_100_GAMES"));

    // The stats-stored event arrives on a later pump
    assert!(wait_until(|| manager.outstanding_calls() == 0));
}

#[test]
fn unsolicited_stats_stored_is_harmless() {
    let sim = Arc::new(SimPlatform::new());
    let manager = running(&sim, &config());
    assert!(wait_until(|| manager.outstanding_calls() == 0));

    sim.push_event(SimEvent::StatsStored(UserStatsStored {
        game_id: GameId(480),
        result: PlatformResult::Ok,
    }));
    // A round trip pumps the queued event through
    manager.get_leaderboard_handle("Best Times").unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(manager.outstanding_calls(), 0);
}

#[test]
fn achievements_unavailable_after_stop() {
    let sim = Arc::new(SimPlatform::new());
    let manager = running(&sim, &config());
    manager.stop();

    assert!(matches!(
        manager.set_achievement("ACH_WIN_ONE_GAME"),
        Err(Error::Stopped)
    ));
    assert!(matches!(manager.store_achievements(), Err(Error::Stopped)));
}
