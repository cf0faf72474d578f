use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18020;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (atelier.toml + ATELIER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtelierConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

impl Default for AtelierConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            storage: StorageConfig::default(),
            sandbox: SandboxConfig::default(),
            providers: ProvidersConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth: AuthConfig::default(),
        }
    }
}

/// Session-token auth: the token maps to a username supplied per request.
/// `mode = "none"` treats every caller as anonymous.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub mode: AuthMode,
    /// `token → username` pairs for bearer auth.
    #[serde(default)]
    pub tokens: Vec<TokenEntry>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            tokens: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    #[default]
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenEntry {
    pub token: String,
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default model bound to new conversations.
    #[serde(default = "default_model")]
    pub model: String,
    /// Hard cap on ReAct iterations per turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Max tokens requested per completion.
    #[serde(default = "default_max_completion_tokens")]
    pub max_completion_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Number of recent turns kept verbatim during compression.
    #[serde(default = "default_recent_turns")]
    pub recent_turns: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_iterations: default_max_iterations(),
            max_completion_tokens: default_max_completion_tokens(),
            temperature: default_temperature(),
            recent_turns: default_recent_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root for per-conversation JSON files; `index.json` sits one level up.
    #[serde(default = "default_conversations_dir")]
    pub conversations_dir: String,
    /// Root for per-conversation workspaces.
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            conversations_dir: default_conversations_dir(),
            outputs_dir: default_outputs_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock timeout for code execution, seconds.
    #[serde(default = "default_code_timeout")]
    pub code_timeout_secs: u64,
    /// Wall-clock timeout for shell commands, seconds.
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Interpreter used for the code executor. Empty means the `python3` on
    /// PATH.
    #[serde(default)]
    pub python_interpreter: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            code_timeout_secs: default_code_timeout(),
            shell_timeout_secs: default_shell_timeout(),
            python_interpreter: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub openai: Option<OpenAiProviderConfig>,
    pub anthropic: Option<AnthropicConfig>,
    pub gemini: Option<GeminiConfig>,
    /// Optional web search backend key (tool-level, opaque to the core).
    pub search_api_key: Option<String>,
}

/// Any OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    /// Path appended to base_url. Some gateways omit the /v1.
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "gpt-5".to_string()
}
fn default_max_iterations() -> u32 {
    100
}
fn default_max_completion_tokens() -> u32 {
    16384
}
fn default_temperature() -> f64 {
    0.3
}
fn default_recent_turns() -> usize {
    3
}
fn default_conversations_dir() -> String {
    "data/conversations".to_string()
}
fn default_outputs_dir() -> String {
    "outputs".to_string()
}
fn default_code_timeout() -> u64 {
    120
}
fn default_shell_timeout() -> u64 {
    120
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_chat_path() -> String {
    "/v1/chat/completions".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

impl AtelierConfig {
    /// Load config from a TOML file with ATELIER_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AtelierConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ATELIER_").split("_"))
            .extract()
            .map_err(|e| crate::error::AtelierError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.atelier/atelier.toml", home)
}
