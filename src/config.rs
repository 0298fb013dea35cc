use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgentError, Result};
use crate::retry::RetryConfig;

/// File name looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "maps-agent.toml";

/// Settings for the runtime, the HTTP server, and the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Application name reported by `/list-apps` and stamped on sessions
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// User id for console sessions
    #[serde(default = "default_user_id")]
    pub default_user_id: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub tool_server: ToolServerConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Gemini model id
    #[serde(default = "default_model")]
    pub name: String,

    /// Usually supplied through `GOOGLE_API_KEY` instead
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Override for the provider endpoint (tests, proxies)
    #[serde(default)]
    pub base_url: Option<String>,

    /// System instruction sent with every request
    #[serde(default = "default_instruction")]
    pub instruction: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

/// How to launch and talk to the tool server subprocess
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolServerConfig {
    #[serde(default = "default_tool_command")]
    pub command: String,

    #[serde(default = "default_tool_args")]
    pub args: Vec<String>,

    /// Added to the inherited environment
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Bound on spawn + handshake
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Bound on a single tool call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Launch at startup instead of on first use
    #[serde(default = "default_true")]
    pub connect_on_startup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Upper bound on model calls per turn
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_app_name() -> String {
    "google_map_adk".to_string()
}

fn default_user_id() -> String {
    "local_user".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model() -> String {
    "gemini-2.5-flash-lite".to_string()
}

fn default_instruction() -> String {
    "You are a helpful maps assistant. Use the available Google Maps tools to look up \
     places, addresses, coordinates, directions, distances, and elevation. Prefer tool \
     results over guesses, and answer concisely with the details the user asked for."
        .to_string()
}

fn default_tool_command() -> String {
    "npx".to_string()
}

fn default_tool_args() -> Vec<String> {
    vec![
        "-y".to_string(),
        "@modelcontextprotocol/server-google-maps".to_string(),
    ]
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_call_timeout_secs() -> u64 {
    60
}

fn default_max_rounds() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            api_key: None,
            base_url: None,
            instruction: default_instruction(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            command: default_tool_command(),
            args: default_tool_args(),
            env: HashMap::new(),
            startup_timeout_secs: default_startup_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            connect_on_startup: default_true(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            default_user_id: default_user_id(),
            server: ServerConfig::default(),
            model: ModelConfig::default(),
            tool_server: ToolServerConfig::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl ToolServerConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl AgentConfig {
    /// Load configuration and apply environment overrides.
    ///
    /// An explicit path must exist. Otherwise `./maps-agent.toml`, then
    /// `<config dir>/maps-agent/config.toml`, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::candidate_paths().into_iter().find(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: AgentConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("maps-agent").join("config.toml"));
        }
        paths
    }

    /// Override settings from environment variables looked up via `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty("GOOGLE_API_KEY").or_else(|| non_empty("GEMINI_API_KEY")) {
            self.model.api_key = Some(key);
        }
        if let Some(model) = non_empty("MAPS_AGENT_MODEL") {
            self.model.name = model;
        }
        if let Some(host) = non_empty("HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| AgentError::Config(format!("PORT is not a valid port: {}", port)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool_server.command.trim().is_empty() {
            return Err(AgentError::Config("tool_server.command is empty".to_string()));
        }
        if self.tool_server.call_timeout_secs == 0 || self.tool_server.startup_timeout_secs == 0 {
            return Err(AgentError::Config(
                "tool server timeouts must be at least one second".to_string(),
            ));
        }
        if self.runner.max_rounds == 0 {
            return Err(AgentError::Config("runner.max_rounds must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Server bind address, e.g. "127.0.0.1:8000"
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.app_name, "google_map_adk");
        assert_eq!(config.model.name, "gemini-2.5-flash-lite");
        assert_eq!(config.tool_server.command, "npx");
        assert_eq!(
            config.tool_server.args,
            vec!["-y", "@modelcontextprotocol/server-google-maps"]
        );
        assert_eq!(config.runner.max_rounds, 10);
        assert_eq!(config.bind_address(), "127.0.0.1:8000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml_str = r#"
            app_name = "maps"

            [server]
            port = 9000

            [tool_server]
            command = "stub-tool-server"
            args = []
            call_timeout_secs = 5

            [tool_server.env]
            GOOGLE_MAPS_API_KEY = "test"

            [runner]
            max_rounds = 3
        "#;
        let config: AgentConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.app_name, "maps");
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.tool_server.command, "stub-tool-server");
        assert!(config.tool_server.args.is_empty());
        assert_eq!(config.tool_server.call_timeout(), Duration::from_secs(5));
        assert_eq!(config.tool_server.startup_timeout(), Duration::from_secs(30));
        assert_eq!(config.tool_server.env["GOOGLE_MAPS_API_KEY"], "test");
        assert_eq!(config.runner.max_rounds, 3);
        assert_eq!(config.model.retry.max_retries, 3);
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = AgentConfig::default();
        config.model.api_key = Some("secret".to_string());
        let serialized = toml::to_string_pretty(&config).unwrap();
        assert!(!serialized.contains("secret"));
        assert!(serialized.contains("gemini-2.5-flash-lite"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AgentConfig::default();
        config
            .apply_env(env_from(&[
                ("GEMINI_API_KEY", "gemini-key"),
                ("PORT", "8123"),
                ("MAPS_AGENT_MODEL", "gemini-2.5-flash"),
            ]))
            .unwrap();
        assert_eq!(config.model.api_key.as_deref(), Some("gemini-key"));
        assert_eq!(config.server.port, 8123);
        assert_eq!(config.model.name, "gemini-2.5-flash");

        config
            .apply_env(env_from(&[("GOOGLE_API_KEY", "google-key"), ("GEMINI_API_KEY", "other")]))
            .unwrap();
        assert_eq!(config.model.api_key.as_deref(), Some("google-key"));
    }

    #[test]
    fn test_env_invalid_port() {
        let mut config = AgentConfig::default();
        let err = config.apply_env(env_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_zero_rounds() {
        let mut config = AgentConfig::default();
        config.runner.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        std::fs::write(&path, "default_user_id = \"alice\"\n[server]\nhost = \"0.0.0.0\"\n").unwrap();

        let config = AgentConfig::from_file(&path).unwrap();
        assert_eq!(config.default_user_id, "alice");
        assert_eq!(config.server.host, "0.0.0.0");
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AgentConfig::load(Some(&dir.path().join("missing.toml"))).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_from_file_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            AgentConfig::from_file(&path).unwrap_err(),
            AgentError::TomlDe(_)
        ));
    }
}
