use log::warn;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Process-wide settings, read once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub default_minutes: u64,
    pub default_increment_secs: u64,
    pub review_movetime_ms: u64,
    pub suggest_movetime_ms: u64,
    pub post_move_movetime_ms: u64,
    pub store_path: PathBuf,
    pub engine_path: Option<PathBuf>,
    /// Slack added on top of a time budget before an analyzer call is abandoned.
    pub analyzer_grace: Duration,
    /// Hard ceiling for depth-bounded analyzer calls.
    pub depth_ceiling: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            default_minutes: 5,
            default_increment_secs: 0,
            review_movetime_ms: 200,
            suggest_movetime_ms: 300,
            post_move_movetime_ms: 50,
            store_path: PathBuf::from("data/games.json"),
            engine_path: None,
            analyzer_grace: Duration::from_secs(2),
            depth_ceiling: Duration::from_secs(30),
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `CHESS_*` and `STOCKFISH_PATH` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(bind) = env::var("CHESS_BIND") {
            config.bind_addr = bind;
        }
        override_parsed("CHESS_DEFAULT_MINUTES", &mut config.default_minutes);
        override_parsed(
            "CHESS_DEFAULT_INCREMENT_SECS",
            &mut config.default_increment_secs,
        );
        override_parsed("CHESS_REVIEW_MOVETIME_MS", &mut config.review_movetime_ms);
        override_parsed("CHESS_SUGGEST_MOVETIME_MS", &mut config.suggest_movetime_ms);
        override_parsed(
            "CHESS_POST_MOVE_MOVETIME_MS",
            &mut config.post_move_movetime_ms,
        );
        if let Ok(path) = env::var("CHESS_STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("STOCKFISH_PATH") {
            if !path.trim().is_empty() {
                config.engine_path = Some(PathBuf::from(path));
            }
        }

        config
    }

    pub fn default_base_ms(&self) -> u64 {
        self.default_minutes.saturating_mul(60_000)
    }

    pub fn default_increment_ms(&self) -> u64 {
        self.default_increment_secs.saturating_mul(1000)
    }
}

fn override_parsed<T: FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = env::var(key) {
        match raw.trim().parse::<T>() {
            Ok(value) => *slot = value,
            Err(_) => warn!("Ignoring unparseable {}={:?}, keeping default", key, raw),
        }
    }
}
