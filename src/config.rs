use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    #[default]
    Openai,
    Openrouter,
    Ollama,
}

impl std::fmt::Display for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmProvider::Openai => write!(f, "openai"),
            LlmProvider::Openrouter => write!(f, "openrouter"),
            LlmProvider::Ollama => write!(f, "ollama"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::default(),
            model: default_model(),
            base_url: String::new(),
            api_key: String::new(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl LlmConfig {
    /// Returns the effective base_url: if the stored value is empty,
    /// fall back to the canonical URL for the configured provider.
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return &self.base_url;
        }
        match self.provider {
            LlmProvider::Openai => "https://api.openai.com/v1",
            LlmProvider::Openrouter => "https://openrouter.ai/api/v1",
            LlmProvider::Ollama => "http://localhost:11434/v1",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
}

/// Thresholds for the inbound reply path.
#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    /// Upper bound of the random draw that still lets an unmentioned message through.
    #[serde(default = "default_reply_probability")]
    pub reply_probability: f64,
    /// Minimum gap between two engaged replies to the same user.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            reply_probability: default_reply_probability(),
            cooldown_ms: default_cooldown_ms(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

impl AdmissionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Settings for unsolicited messages into the last active group.
#[derive(Debug, Deserialize, Clone)]
pub struct IdleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_idle_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_idle_probability")]
    pub probability: f64,
    #[serde(default = "default_idle_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_activity_window_secs")]
    pub activity_window_secs: u64,
    #[serde(default = "default_idle_phrases")]
    pub phrases: Vec<String>,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_idle_interval_secs(),
            probability: default_idle_probability(),
            cooldown_secs: default_idle_cooldown_secs(),
            activity_window_secs: default_activity_window_secs(),
            phrases: default_idle_phrases(),
        }
    }
}

impl IdleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn activity_window(&self) -> Duration {
        Duration::from_secs(self.activity_window_secs)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub idle: IdleConfig,
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    300
}

fn default_system_prompt() -> String {
    "Ты пёс, который живёт в этом чате. Отвечай коротко, дружелюбно и по-собачьи, \
     иногда вставляя \"гав\" и 🐾. Не пиши длинных текстов и не выходи из роли."
        .to_string()
}

fn default_reply_probability() -> f64 {
    0.45
}

fn default_cooldown_ms() -> u64 {
    25_000
}

fn default_fallback_reply() -> String {
    "гав 🐾 я тут".to_string()
}

fn default_idle_interval_secs() -> u64 {
    10 * 60
}

fn default_idle_probability() -> f64 {
    0.15
}

fn default_idle_cooldown_secs() -> u64 {
    2 * 60 * 60
}

fn default_activity_window_secs() -> u64 {
    60 * 60
}

fn default_idle_phrases() -> Vec<String> {
    [
        "гав 🐾",
        "кто-нибудь хочет поиграть? 🎾",
        "*виляет хвостом*",
        "тут так тихо... гав?",
        "я принёс палочку 🪵",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Config {
    /// Load the config file if it exists, apply environment overrides and validate.
    /// A missing file is not an error: every field has a default except the
    /// Telegram token, which can come from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// `TELEGRAM_BOT_TOKEN` and `OPENAI_API_KEY` take precedence over the file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|v| !v.is_empty()) {
            self.telegram.bot_token = token;
        }
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("TELEGRAM_BOT_TOKEN is not defined (env or [telegram] bot_token)");
        }
        if !(0.0..=1.0).contains(&self.admission.reply_probability) {
            anyhow::bail!(
                "admission.reply_probability must be within [0, 1], got {}",
                self.admission.reply_probability
            );
        }
        if !(0.0..=1.0).contains(&self.idle.probability) {
            anyhow::bail!(
                "idle.probability must be within [0, 1], got {}",
                self.idle.probability
            );
        }
        if self.idle.interval_secs == 0 {
            anyhow::bail!("idle.interval_secs must be greater than zero");
        }
        Ok(())
    }
}
