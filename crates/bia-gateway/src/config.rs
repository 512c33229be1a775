//! Typed TOML configuration, following the `#[serde(default = "d_xxx")]`
//! per-field pattern: every field has a standalone default so a config
//! file can override just the one knob it cares about.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors: CorsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Origins allowed for CORS. Use `["*"]` for permissive (not recommended
    /// outside local development).
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: d_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_provider_id")]
    pub provider_id: String,
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Left empty in config files; overridden by the env var named in
    /// `api_key_env` at startup so secrets never live in the TOML.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "d_model")]
    pub default_model: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider_id: d_provider_id(),
            base_url: d_base_url(),
            api_key_env: None,
            default_model: d_model(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

/// Bounds on the agent loop, independent of any one agent's implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Hard cap on tool iterations per analyst turn. Exceeding this yields
    /// a "maximum iterations reached" final message rather than looping
    /// forever on a misbehaving agent.
    #[serde(default = "d_max_iterations")]
    pub max_tool_iterations: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: d_max_iterations(),
        }
    }
}

/// Issues found by [`Config::validate`], ranked by how badly they'd hurt
/// a running gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Config {
    /// Load from a TOML file, falling back to all-defaults if it's absent.
    pub fn load(path: &std::path::Path) -> bia_domain::error::Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| bia_domain::error::Error::Config(format!("{}: {e}", path.display())))
    }

    /// Checks that don't require a TOML parser to catch: an empty API key
    /// env var name can't be read at startup, and a zero iteration cap
    /// would never let an agent make progress.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.llm.api_key_env.as_deref().map(str::is_empty).unwrap_or(false) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "llm.api_key_env is set but empty".into(),
            });
        }
        if self.llm.api_key_env.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "llm.api_key_env not set — LLM calls will fail until configured".into(),
            });
        }
        if self.orchestrator.max_tool_iterations == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "orchestrator.max_tool_iterations must be > 0".into(),
            });
        }
        issues
    }
}

fn d_port() -> u16 {
    8080
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:*".into()]
}
fn d_provider_id() -> String {
    "openai".into()
}
fn d_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_model() -> String {
    "gpt-4o".into()
}
fn d_timeout_ms() -> u64 {
    120_000
}
fn d_max_iterations() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
    }

    #[test]
    fn missing_api_key_env_warns_not_errors() {
        let issues = Config::default().validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Warning));
        assert!(!issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn zero_iteration_cap_is_an_error() {
        let mut cfg = Config::default();
        cfg.orchestrator.max_tool_iterations = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error));
    }
}
