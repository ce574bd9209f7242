use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub chat: ChatConfig,
    pub llm: LlmConfig,
    pub units: UnitsConfig,
    pub ipc: IpcConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// How many unpinned conversations a listing shows by default.
    pub visible_last_chats: usize,
    pub default_assistant: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            visible_last_chats: 10,
            default_assistant: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used when a unit does not force one, e.g. "openai" or "ollama".
    pub default_api: Option<String>,
    /// Per-API model alias tables, keyed by API name then alias.
    pub aliases: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    /// Additional directories scanned for snippet/assistant folders.
    pub extra_dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub socket: Option<PathBuf>,
    pub reply_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket: None,
            reply_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// Load the config file. A missing file falls back to defaults; an
    /// unparseable file is a startup error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(
                    "no config file at {}, continuing with defaults",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Credentials loaded from a `KEY=VALUE` secrets file, overlaid on the
/// process environment. Lookups hit the file first so a stale shell
/// environment never shadows what the user wrote down.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, String>,
    env_fallback: bool,
}

impl Secrets {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self {
                    values: HashMap::new(),
                    env_fallback: true,
                })
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Ok(Self {
            values: parse_env_lines(&raw),
            env_fallback: true,
        })
    }

    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.values.get(key) {
            return Some(value.clone());
        }
        if self.env_fallback {
            return std::env::var(key).ok();
        }
        None
    }
}

/// Hermetic construction, mainly for tests: no environment fallback.
impl FromIterator<(String, String)> for Secrets {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            env_fallback: false,
        }
    }
}

fn parse_env_lines(raw: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let mut value = value.trim();
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            value = &value[1..value.len() - 1];
        }
        if !key.is_empty() {
            values.insert(key.to_string(), value.to_string());
        }
    }
    values
}

/// Canonical file locations, XDG-style.
#[derive(Debug, Clone)]
pub struct Paths {
    pub config_file: PathBuf,
    pub secrets_file: PathBuf,
    pub data_dir: PathBuf,
    pub db_file: PathBuf,
    pub socket: PathBuf,
}

impl Paths {
    pub fn resolve() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill");
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("quill");
        let runtime_dir = dirs::runtime_dir().unwrap_or_else(|| data_dir.clone());
        Self {
            config_file: config_dir.join("config.toml"),
            secrets_file: config_dir.join("secrets.env"),
            db_file: data_dir.join("quill.db"),
            socket: runtime_dir.join("quill.sock"),
            data_dir,
        }
    }
}

/// Socket selection order: explicit flag, then `QUILL_SOCKET`, then the
/// config file, then the runtime-dir default.
pub fn resolve_socket(flag: Option<PathBuf>, config: &AppConfig, paths: &Paths) -> PathBuf {
    flag.or_else(|| std::env::var_os("QUILL_SOCKET").map(PathBuf::from))
        .or_else(|| config.ipc.socket.clone())
        .unwrap_or_else(|| paths.socket.clone())
}
