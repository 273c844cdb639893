/// Configuration for the Platto backend.
/// Reads backend.json from ~/.config/platto/backend.json (or platform
/// equivalent), then applies PLATTO_* environment overrides.
use platto_core::Program;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("Supabase mode needs {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    /// In-process table, optionally seeded from a JSON file.
    #[default]
    Memory,
    Supabase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub anon_key: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_channel")]
    pub channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default)]
    pub mode: ServiceMode,
    #[serde(default)]
    pub supabase: SupabaseConfig,
    /// Programs to preload in memory mode.
    #[serde(default)]
    pub seed_file: Option<PathBuf>,
    /// Sign in at startup with this token instead of waiting for POST /session.
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
}

fn default_port() -> u16 {
    8090
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_table() -> String {
    "platto_programs".to_string()
}

fn default_channel() -> String {
    "platto_programs_changes".to_string()
}

impl Default for SupabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            table: default_table(),
            channel: default_channel(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind_address: default_bind_address(),
            mode: ServiceMode::default(),
            supabase: SupabaseConfig::default(),
            seed_file: None,
            access_token: None,
        }
    }
}

impl BackendConfig {
    /// Apply PLATTO_* overrides from `lookup` (the process environment in
    /// production). A Supabase URL switches the mode to supabase.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PLATTO_SUPABASE_URL") {
            self.supabase.url = url;
            self.mode = ServiceMode::Supabase;
        }
        if let Some(key) = lookup("PLATTO_SUPABASE_ANON_KEY") {
            self.supabase.anon_key = key;
        }
        if let Some(table) = lookup("PLATTO_TABLE") {
            self.supabase.table = table;
        }
        if let Some(token) = lookup("PLATTO_ACCESS_TOKEN") {
            self.access_token = Some(token);
        }
        if let Some(addr) = lookup("PLATTO_BIND_ADDRESS") {
            self.bind_address = addr;
        }
        if let Some(port) = lookup("PLATTO_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => log::warn!("Ignoring invalid PLATTO_PORT {:?}", port),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mode == ServiceMode::Supabase {
            if self.supabase.url.trim().is_empty() {
                return Err(ConfigError::Missing("supabase.url"));
            }
            if self.supabase.anon_key.trim().is_empty() {
                return Err(ConfigError::Missing("supabase.anon_key"));
            }
        }
        Ok(())
    }
}

/// Default config path: ~/.config/platto/backend.json
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("platto")
        .join("backend.json")
}

/// Load config from path. Returns default if file doesn't exist.
pub fn load_config(path: &Path) -> BackendConfig {
    match fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!("Failed to parse config {}: {}", path.display(), e);
            BackendConfig::default()
        }),
        Err(_) => {
            log::info!("No config at {}, using defaults", path.display());
            BackendConfig::default()
        }
    }
}

/// Read a seed file: a JSON array of program rows, newest first.
pub fn load_seed(path: &Path) -> Result<Vec<Program>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}
