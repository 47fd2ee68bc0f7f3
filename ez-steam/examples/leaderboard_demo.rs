//! Leaderboard demo: start the call manager against the in-process platform,
//! post a score, list friends' scores, unlock an achievement.
//!
//! Usage:
//!   cargo run -p ez-steam --example leaderboard_demo -- --leaderboard "Best Times" --score 1000
//!
//! Set `EZ_STEAM_LOG_JSON=1` for JSON logs and `RUST_LOG` to adjust the filter.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ez_steam::sim::SimPlatform;
use ez_steam::{CallManager, Config, Started};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "leaderboard-demo", about = "ez-steam call manager demo")]
struct Args {
    /// Config file (TOML). Command-line flags override it.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    app_id: Option<u32>,
    /// Milliseconds between pumps while calls are outstanding.
    #[arg(long, env = "EZ_STEAM_POLL_MS")]
    poll_ms: Option<u64>,
    #[arg(long, default_value = "Best Times")]
    leaderboard: String,
    #[arg(long, default_value_t = 1000)]
    score: i32,
    #[arg(long, default_value = "ACH_WIN_ONE_GAME")]
    achievement: String,
}

fn init_logging() -> Result<()> {
    let json_logs = std::env::var("EZ_STEAM_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("ez_steam=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(app_id) = args.app_id {
        config.app_id = app_id;
    }
    if let Some(ms) = args.poll_ms.filter(|ms| *ms > 0) {
        config.poll_interval_ms = ms;
    }

    let platform = Arc::new(SimPlatform::new());
    let manager = match CallManager::start(platform, &config)? {
        Started::Restart => {
            tracing::info!("relaunching through the platform client");
            return Ok(());
        }
        Started::Running(manager) => manager,
    };

    println!("Signed in as {}", manager.user_name()?);

    let board = manager
        .get_leaderboard_handle(&args.leaderboard)
        .with_context(|| format!("finding leaderboard {:?}", args.leaderboard))?;
    let changed = manager.set_leaderboard_score(board, args.score, &[])?;
    println!(
        "Posted {} to {:?}: {}",
        args.score,
        args.leaderboard,
        if changed { "new best" } else { "kept previous best" }
    );

    for row in manager.get_friend_scores(board)? {
        println!("  {:<16} {}", row.name, row.score);
    }

    if manager.set_achievement(&args.achievement)? {
        manager.store_achievements()?;
        println!("Unlocked {}", args.achievement);
    }

    manager.stop();
    Ok(())
}
