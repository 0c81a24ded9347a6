//! Configuration file support

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use poly_ai::RetryConfig;
use poly_fs::FileEngineConfig;
use serde::{Deserialize, Serialize};

/// Configuration for poly
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API key for the chat endpoint (alternative to POLY_API_KEY)
    pub api_key: Option<String>,
    /// Default model to use
    pub model: Option<String>,
    /// Chat-completions endpoint
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Tavily key for the web tools (alternative to TAVILY_API_KEY)
    pub tavily_api_key: Option<String>,
    /// Custom system prompt file path
    pub system_prompt_file: Option<String>,
    pub file_engine: FileEngineConfig,
    pub retry: RetrySettings,
}

/// Backoff settings, in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_retries: defaults.max_retries,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            backoff_multiplier: defaults.backoff_multiplier,
        }
    }
}

impl RetrySettings {
    /// Convert to the transport's retry policy
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
            ..RetryConfig::default()
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        if let Ok(dir) = std::env::var("POLY_CONFIG_HOME") {
            return PathBuf::from(dir);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("polyagent")
    }

    /// Get the config file path; an explicit path wins over POLY_CONFIG_PATH
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("POLY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from `path`, falling back to defaults
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to parse config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save config to `path`
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file at `path` if it doesn't exist
    pub fn init(path: &Path) -> std::io::Result<PathBuf> {
        if !path.exists() {
            if let Some(dir) = path.parent() {
                fs::create_dir_all(dir)?;
            }
            fs::write(path, example_config())?;
        }
        Ok(path.to_path_buf())
    }

    /// Chat API key: config first, then POLY_API_KEY
    pub fn api_key(&self) -> Option<String> {
        non_empty(self.api_key.clone()).or_else(|| non_empty(std::env::var("POLY_API_KEY").ok()))
    }

    /// Tavily key: config first, then TAVILY_API_KEY
    pub fn tavily_api_key(&self) -> Option<String> {
        non_empty(self.tavily_api_key.clone())
            .or_else(|| non_empty(std::env::var("TAVILY_API_KEY").ok()))
    }

    /// Contents of the custom system prompt file, if one is configured
    pub fn system_prompt(&self) -> Option<String> {
        let file = self.system_prompt_file.as_deref()?;
        let path = expand_home(file);
        match fs::read_to_string(&path) {
            Ok(prompt) => Some(prompt),
            Err(e) => {
                tracing::warn!("Failed to read system prompt file {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# poly configuration file
# Place at ~/.config/polyagent/config.toml, or point POLY_CONFIG_PATH at it

# API key (optional - POLY_API_KEY works too)
# api_key = "..."

# Model and endpoint
model = "glm-4.5"
# base_url = "https://open.bigmodel.cn/api/paas/v4/chat/completions"
max_tokens = 4096
temperature = 0.6

# Tavily key for web_search / web_crawl (optional - TAVILY_API_KEY works too)
# tavily_api_key = "tvly-..."

# Custom system prompt file (optional)
# system_prompt_file = "~/.config/polyagent/system_prompt.txt"

[file_engine]
# Empty means the working directory
allowed_roots = []
blacklisted_extensions = [".exe", ".dll", ".so", ".dylib", ".bin"]
max_file_size = 10485760
enable_cache = true
backup_dir = ".polyagent-backups"
cache_ttl_secs = 300
cache_capacity = 100

[retry]
max_retries = 3
initial_delay_ms = 1000
max_delay_ms = 30000
backoff_multiplier = 2.0
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_example_config_parses() {
        let config: Config = toml::from_str(example_config()).unwrap();
        assert_eq!(config.model.as_deref(), Some("glm-4.5"));
        assert_eq!(config.max_tokens, Some(4096));
        assert_eq!(config.file_engine.cache_capacity, 100);
        assert_eq!(config.retry.max_retries, 3);
        let retry = config.retry.to_retry_config();
        assert_eq!(retry.initial_delay, Duration::from_secs(1));
        assert_eq!(retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_missing_and_broken_files_fall_back() {
        let dir = TempDir::new().unwrap();
        let missing = Config::load(&dir.path().join("nope.toml"));
        assert!(missing.model.is_none());

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "model = [unclosed").unwrap();
        let config = Config::load(&broken);
        assert!(config.model.is_none());
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "model = \"glm-4.6\"\n[file_engine]\nmax_file_size = 1024\n[retry]\nmax_retries = 5\n",
        )
        .unwrap();

        let config = Config::load(&path);
        assert_eq!(config.model.as_deref(), Some("glm-4.6"));
        assert_eq!(config.file_engine.max_file_size, 1024);
        assert!(config.file_engine.enable_cache);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.initial_delay_ms, 1000);
    }

    #[test]
    fn test_init_and_save_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        Config::init(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), example_config());

        let config = Config {
            api_key: Some("k".into()),
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).api_key.as_deref(), Some("k"));
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = PathBuf::from("/tmp/custom.toml");
        assert_eq!(Config::config_path(Some(&explicit)), explicit);
    }

    #[test]
    fn test_configured_key_wins_over_env() {
        let config = Config {
            api_key: Some("from-config".into()),
            tavily_api_key: Some("  ".into()),
            ..Config::default()
        };
        assert_eq!(config.api_key().as_deref(), Some("from-config"));
        // A blank configured key is treated as unset
        assert_eq!(
            config.tavily_api_key(),
            std::env::var("TAVILY_API_KEY").ok().filter(|v| !v.trim().is_empty())
        );
    }
}
