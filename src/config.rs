//! Runtime settings read from `CREWDESK_*` environment variables.

use std::path::PathBuf;

use tracing::warn;

use crate::engine::DEFAULT_COMMIT_CONCURRENCY;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;
pub const WAL_FILE: &str = "crewdesk.wal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Bookings written at once during a commit.
    pub commit_concurrency: usize,
    /// Compact the WAL once this many events were appended since the last compaction.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            commit_concurrency: DEFAULT_COMMIT_CONCURRENCY,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers keep their default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = lookup("CREWDESK_DATA_DIR")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or(defaults.data_dir);
        let commit_concurrency = parse_or(
            &lookup,
            "CREWDESK_COMMIT_CONCURRENCY",
            defaults.commit_concurrency,
        )
        .max(1);
        let compact_threshold =
            parse_or(&lookup, "CREWDESK_COMPACT_THRESHOLD", defaults.compact_threshold);
        Self {
            data_dir,
            commit_concurrency,
            compact_threshold,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE)
    }
}

fn parse_or<T: std::str::FromStr + Copy>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(key, value = %raw, "invalid setting, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.wal_path(), PathBuf::from("./data/crewdesk.wal"));
    }

    #[test]
    fn reads_all_settings() {
        let config = Config::from_lookup(lookup(&[
            ("CREWDESK_DATA_DIR", "/var/lib/crewdesk"),
            ("CREWDESK_COMMIT_CONCURRENCY", "16"),
            ("CREWDESK_COMPACT_THRESHOLD", " 250 "),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/crewdesk"));
        assert_eq!(config.commit_concurrency, 16);
        assert_eq!(config.compact_threshold, 250);
        assert_eq!(config.wal_path(), PathBuf::from("/var/lib/crewdesk/crewdesk.wal"));
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("CREWDESK_COMMIT_CONCURRENCY", "lots"),
            ("CREWDESK_COMPACT_THRESHOLD", "-5"),
        ]));
        assert_eq!(config.commit_concurrency, DEFAULT_COMMIT_CONCURRENCY);
        assert_eq!(config.compact_threshold, DEFAULT_COMPACT_THRESHOLD);
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let config = Config::from_lookup(lookup(&[("CREWDESK_COMMIT_CONCURRENCY", "0")]));
        assert_eq!(config.commit_concurrency, 1);
    }

    #[test]
    fn empty_data_dir_keeps_default() {
        let config = Config::from_lookup(lookup(&[("CREWDESK_DATA_DIR", "")]));
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
    }
}
