use crate::crypto;
use crate::error::{Result, TexError};
use crate::keyboard::InjectionTiming;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const PID_FILENAME: &str = "tex-daemon.pid";
pub const EXPANSIONS_FILENAME: &str = "expansions.json";
pub const CATEGORIES_FILENAME: &str = "categories.json";
pub const SETTINGS_FILENAME: &str = "settings.json";
pub const LOG_DIRNAME: &str = "logs";
pub const API_TOKEN_FILENAME: &str = "api-token";

/// Secret store service name and token holding the encryption key.
pub const KEYRING_SERVICE: &str = "TExApp";
pub const KEYRING_TOKEN: &str = "TExEncryptionKey";

pub const DEFAULT_BUFFER_CAPACITY: usize = 50;
pub const DEFAULT_API_PORT: u16 = 3377;

/// Get the configuration directory, `$TEX_HOME` or `~/.tex`
pub fn get_config_dir() -> PathBuf {
    if let Ok(dir) = env::var("TEX_HOME") {
        return PathBuf::from(dir);
    }
    env::var("HOME")
        .map(|home| PathBuf::from(home).join(".tex"))
        .unwrap_or_else(|_| PathBuf::from(".tex"))
}

/// Ensure the configuration directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let config_dir = get_config_dir();
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }
    Ok(config_dir)
}

/// Get the path to the PID file
pub fn get_pid_file_path() -> PathBuf {
    get_config_dir().join(PID_FILENAME)
}

pub fn get_expansions_file_path() -> PathBuf {
    get_config_dir().join(EXPANSIONS_FILENAME)
}

pub fn get_categories_file_path() -> PathBuf {
    get_config_dir().join(CATEGORIES_FILENAME)
}

pub fn get_settings_file_path() -> PathBuf {
    get_config_dir().join(SETTINGS_FILENAME)
}

pub fn get_log_dir() -> PathBuf {
    get_config_dir().join(LOG_DIRNAME)
}

pub fn get_api_token_path() -> PathBuf {
    get_config_dir().join(API_TOKEN_FILENAME)
}

/// Read the control API token, generating it on first use. The file is
/// readable by its owner only.
pub fn load_or_create_api_token(path: &Path) -> Result<String> {
    if let Ok(existing) = fs::read_to_string(path) {
        let token = existing.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let token = crypto::generate_token();
    write_private(path, &token)?;
    info!(path = %path.display(), "Generated control API token");
    Ok(token)
}

fn write_private(path: &Path, contents: &str) -> Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    Ok(())
}

/// Check if daemon is running
pub fn is_daemon_running() -> Result<Option<u32>> {
    let pid_file = get_pid_file_path();

    if !pid_file.exists() {
        return Ok(None);
    }

    let pid_str = fs::read_to_string(&pid_file)?;
    let pid = pid_str
        .trim()
        .parse::<u32>()
        .map_err(|_| TexError::InvalidPid)?;

    #[cfg(unix)]
    {
        let alive = std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .status()
            .map(|status| status.success())
            .unwrap_or(false);

        if alive {
            return Ok(Some(pid));
        }
        // Stale PID file left behind by a crashed worker
        let _ = fs::remove_file(&pid_file);
        Ok(None)
    }

    // For non-Unix systems, assume it's running if PID file exists
    #[cfg(not(unix))]
    {
        Ok(Some(pid))
    }
}

/// Tunables read from `settings.json`. Every field has a default so a partial
/// or missing file is fine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Maximum number of characters kept in the input buffer
    pub buffer_capacity: usize,
    /// Port of the loopback control API
    pub api_port: u16,
    /// Pause between synthetic backspaces
    pub backspace_delay_ms: u64,
    /// Quiet period the keyboard hook must show after an expansion is typed
    /// before capture resumes
    pub settle_delay_ms: u64,
    /// Pause after each typed line of a multi-line expansion
    pub line_delay_ms: u64,
    /// Whether the daemon enables expansion at startup
    pub start_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            api_port: DEFAULT_API_PORT,
            backspace_delay_ms: 2,
            settle_delay_ms: 100,
            line_delay_ms: 10,
            start_enabled: true,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };

        if content.trim().is_empty() {
            return Self::default();
        }

        match serde_json::from_str::<Settings>(&content) {
            Ok(settings) => settings.sanitized(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Invalid settings file, using defaults");
                Self::default()
            }
        }
    }

    pub fn injection_timing(&self) -> InjectionTiming {
        InjectionTiming {
            backspace_delay: Duration::from_millis(self.backspace_delay_ms),
            line_delay: Duration::from_millis(self.line_delay_ms),
        }
    }

    fn sanitized(mut self) -> Self {
        if self.buffer_capacity == 0 {
            self.buffer_capacity = DEFAULT_BUFFER_CAPACITY;
        }
        self
    }
}
