use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{data_dir, expand_user, write_json_atomic, DEFAULT_USER_AGENT};

pub const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_WORKERS: usize = 2;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Runtime settings shared by the fetcher, the device channel and the scheduler.
///
/// Values come from `<data>/state/config.json` when present, then `PFLASH_*`
/// environment variables take precedence.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    pub workers: usize,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub chunk_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: data_dir(),
            workers: DEFAULT_WORKERS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let path = data_dir().join("state").join(CONFIG_FILE_NAME);
        let mut cfg = Self::load_from(&path);
        cfg.apply_overrides(|key| std::env::var(key).ok());
        cfg
    }

    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<Config>(&data) {
                Ok(cfg) => cfg.sanitized(),
                Err(err) => {
                    warn!("Failed to parse {}: {}", path.display(), err);
                    Config::default()
                }
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to read {}: {}", path.display(), err);
                }
                Config::default()
            }
        }
    }

    pub fn save(&self) -> io::Result<()> {
        write_json_atomic(&self.state_dir().join(CONFIG_FILE_NAME), self)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("PFLASH_DATA_DIR").filter(|v| !v.trim().is_empty()) {
            self.data_dir = expand_user(dir.trim());
        }
        if let Some(workers) = lookup("PFLASH_WORKERS") {
            match workers.trim().parse::<usize>() {
                Ok(value) => self.workers = value,
                Err(err) => warn!("Ignoring PFLASH_WORKERS={workers}: {err}"),
            }
        }
        if let Some(agent) = lookup("PFLASH_USER_AGENT").filter(|v| !v.trim().is_empty()) {
            self.user_agent = agent;
        }
        if let Some(secs) = lookup("PFLASH_FETCH_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(value) => self.fetch_timeout_secs = value,
                Err(err) => warn!("Ignoring PFLASH_FETCH_TIMEOUT_SECS={secs}: {err}"),
            }
        }
        *self = self.clone().sanitized();
    }

    fn sanitized(mut self) -> Self {
        if self.workers == 0 {
            self.workers = 1;
        }
        if self.fetch_timeout_secs == 0 {
            self.fetch_timeout_secs = DEFAULT_FETCH_TIMEOUT_SECS;
        }
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.user_agent.trim().is_empty() {
            self.user_agent = DEFAULT_USER_AGENT.to_string();
        }
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.data_dir.join("tools")
    }

    pub fn drivers_dir(&self) -> PathBuf {
        self.data_dir.join("drivers")
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        for path in [self.tools_dir(), self.drivers_dir(), self.downloads_dir()] {
            fs::create_dir_all(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.json"));
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.fetch_timeout_secs, 30);
        assert_eq!(cfg.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn file_values_are_read_and_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{ "workers": 0, "user_agent": "Custom/2.0" }"#).unwrap();

        let cfg = Config::load_from(&path);
        assert_eq!(cfg.workers, 1);
        assert_eq!(cfg.user_agent, "Custom/2.0");
        assert_eq!(cfg.chunk_size, 256 * 1024);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PFLASH_DATA_DIR", "/srv/pflash"),
            ("PFLASH_WORKERS", "4"),
            ("PFLASH_FETCH_TIMEOUT_SECS", "not-a-number"),
        ]);
        let mut cfg = Config::default();
        cfg.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.data_dir, PathBuf::from("/srv/pflash"));
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.fetch_timeout_secs, 30);
        assert_eq!(cfg.tools_dir(), PathBuf::from("/srv/pflash/tools"));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            data_dir: dir.path().to_path_buf(),
            workers: 3,
            ..Config::default()
        };
        cfg.save().unwrap();
        cfg.ensure_dirs().unwrap();

        let loaded = Config::load_from(&cfg.state_dir().join(CONFIG_FILE_NAME));
        assert_eq!(loaded, cfg);
        assert!(cfg.downloads_dir().is_dir());
    }
}
