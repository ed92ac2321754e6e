use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::Serialize;

mod config;

pub use config::{Config, CONFIG_FILE_NAME};

pub const DEFAULT_USER_AGENT: &str = "PhoneFlasher/1.0";

pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("PFLASH_DATA_DIR") {
        if !dir.trim().is_empty() {
            return expand_user(&dir);
        }
    }
    if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local/share/pflash")
    } else {
        PathBuf::from("/tmp/pflash")
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn expand_user(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Ok(home) = std::env::var("HOME") {
            let rest = path.strip_prefix("~/").unwrap_or("");
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// Directory key for a vendor driver: lowercased, spaces replaced by underscores.
pub fn normalize_name(name: &str) -> String {
    name.trim().replace(' ', "_").to_lowercase()
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Installs the global fmt subscriber. `RUST_LOG` directives apply on top of
/// an `info` default. Fails if a subscriber is already set.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .try_init()?;
    Ok(())
}
