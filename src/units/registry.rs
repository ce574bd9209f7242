use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use super::types::{ContextFragment, PromptUnit, UnitConfigFile, UnitKind};

pub const PROMPT_FILE: &str = "prompt.md";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum UnitError {
    #[error("failed to read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid force_api: {0}")]
    InvalidForceApi(String),
}

/// A directory scanned for unit folders, together with the kind its
/// folders become.
#[derive(Debug, Clone)]
pub struct ScanRoot {
    pub path: PathBuf,
    pub kind: UnitKind,
}

/// The built-in roots under the data dir plus configured extra dirs. An
/// extra dir with `snippets/` or `assistants/` subfolders contributes
/// those; otherwise the dir itself is treated as a snippets root.
pub fn scan_roots(data_dir: &Path, extra_dirs: &[PathBuf]) -> Vec<ScanRoot> {
    let mut roots = vec![
        ScanRoot {
            path: data_dir.join("snippets"),
            kind: UnitKind::Snippet,
        },
        ScanRoot {
            path: data_dir.join("assistants"),
            kind: UnitKind::Assistant,
        },
    ];
    for dir in extra_dirs {
        let snippets = dir.join("snippets");
        let assistants = dir.join("assistants");
        if snippets.is_dir() || assistants.is_dir() {
            if snippets.is_dir() {
                roots.push(ScanRoot {
                    path: snippets,
                    kind: UnitKind::Snippet,
                });
            }
            if assistants.is_dir() {
                roots.push(ScanRoot {
                    path: assistants,
                    kind: UnitKind::Assistant,
                });
            }
        } else {
            roots.push(ScanRoot {
                path: dir.clone(),
                kind: UnitKind::Snippet,
            });
        }
    }
    roots
}

/// In-memory table of loaded units. Replaced wholesale on reload; no
/// partial updates.
#[derive(Debug, Default)]
pub struct UnitRegistry {
    snippets: HashMap<String, Arc<PromptUnit>>,
    assistants: HashMap<String, Arc<PromptUnit>>,
}

impl UnitRegistry {
    /// Scan never fails: unreadable roots and invalid folders are logged
    /// and skipped so one bad unit cannot take the host down.
    pub fn scan(roots: &[ScanRoot]) -> Self {
        let mut registry = Self::default();
        for root in roots {
            let entries = match std::fs::read_dir(&root.path) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(root = %root.path.display(), error = %e, "skipping unit root");
                    continue;
                }
            };
            let mut dirs: Vec<PathBuf> = entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.is_dir())
                .collect();
            dirs.sort();

            for dir in dirs {
                let name = match dir.file_name().and_then(|n| n.to_str()) {
                    Some(name) => name.to_string(),
                    None => continue,
                };
                if name.starts_with('_') || name.starts_with('.') {
                    tracing::debug!(unit = %name, "skipping excluded folder");
                    continue;
                }
                if !dir.join(PROMPT_FILE).exists() {
                    tracing::debug!(folder = %dir.display(), "not a unit folder");
                    continue;
                }
                match load_unit(&dir, name.clone(), root.kind) {
                    Ok(unit) => registry.insert(unit),
                    Err(e) => {
                        tracing::warn!(unit = %name, error = %e, "skipping invalid unit");
                    }
                }
            }
        }
        registry
    }

    fn insert(&mut self, unit: PromptUnit) {
        let table = match unit.kind {
            UnitKind::Snippet => &mut self.snippets,
            UnitKind::Assistant => &mut self.assistants,
        };
        if table.contains_key(&unit.name) {
            tracing::warn!(unit = %unit.name, kind = unit.kind.as_str(), "unit already exists, overriding");
        }
        table.insert(unit.name.clone(), Arc::new(unit));
    }

    pub fn get_snippet(&self, name: &str) -> Option<Arc<PromptUnit>> {
        self.snippets.get(name).cloned()
    }

    pub fn get_assistant(&self, name: &str) -> Option<Arc<PromptUnit>> {
        self.assistants.get(name).cloned()
    }

    pub fn snippet_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.snippets.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn assistant_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.assistants.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.snippets.len() + self.assistants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty() && self.assistants.is_empty()
    }
}

fn load_unit(dir: &Path, name: String, kind: UnitKind) -> Result<PromptUnit, UnitError> {
    let prompt_path = dir.join(PROMPT_FILE);
    let prompt = std::fs::read_to_string(&prompt_path).map_err(|source| UnitError::Io {
        path: prompt_path,
        source,
    })?;

    let config_path = dir.join(CONFIG_FILE);
    let file: UnitConfigFile = if config_path.exists() {
        let raw = std::fs::read_to_string(&config_path).map_err(|source| UnitError::Io {
            path: config_path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| UnitError::Config {
            path: config_path,
            source,
        })?
    } else {
        UnitConfigFile::default()
    };

    let (default_model, default_temperature, default_max_tokens) = match kind {
        UnitKind::Snippet => ("A", 0.5, Some(512)),
        UnitKind::Assistant => ("B", 0.7, None),
    };

    let force_api = match file.force_api {
        Some(raw) => Some(raw.parse().map_err(UnitError::InvalidForceApi)?),
        None => None,
    };

    let mut tools = Vec::new();
    for tool in file.tools.unwrap_or_default() {
        let tool = tool.to_lowercase();
        if !tools.contains(&tool) {
            tools.push(tool);
        }
    }

    let mut contexts = Vec::new();
    for fragment in file.contexts {
        match fragment {
            ContextFragment::Text { text } => contexts.push(text),
            ContextFragment::File { file } => {
                let path = dir.join(&file);
                match std::fs::read_to_string(&path) {
                    Ok(text) => contexts.push(text),
                    Err(e) => {
                        tracing::warn!(
                            unit = %name,
                            path = %path.display(),
                            error = %e,
                            "context file unreadable, fragment dropped"
                        );
                    }
                }
            }
        }
    }

    Ok(PromptUnit {
        name,
        kind,
        path: dir.to_path_buf(),
        prompt,
        contexts,
        model: file.model.unwrap_or_else(|| default_model.to_string()),
        temperature: file.temperature.unwrap_or(default_temperature),
        max_tokens: file.max_tokens.or(default_max_tokens),
        force_api,
        tools,
    })
}
