//! Agent configuration from the environment.
//!
//! Every knob follows the same rule: unset or empty means the default, a
//! value that does not parse is an error, numeric values are clamped.

use crate::prompt::PromptLimits;

pub const SIFT_MAX_STEPS_ENV: &str = "SIFT_MAX_STEPS";
pub const SIFT_MAX_STEPS_CAP_ENV: &str = "SIFT_MAX_STEPS_CAP";
pub const SIFT_STRICT_VALIDATION_ENV: &str = "SIFT_STRICT_VALIDATION";
pub const SIFT_PROMPT_MAX_HISTORY_ITEMS_ENV: &str = "SIFT_PROMPT_MAX_HISTORY_ITEMS";
pub const SIFT_LLM_MAX_OUTPUT_TOKENS_ENV: &str = "SIFT_LLM_MAX_OUTPUT_TOKENS";

pub const DEFAULT_MAX_STEPS: usize = 8;
pub const DEFAULT_MAX_STEPS_CAP: usize = 32;
pub const DEFAULT_MAX_OUTPUT_TOKENS: usize = 1_200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("no LLM provider configured (set OPENAI_API_KEY, ANTHROPIC_API_KEY or LOCAL_LLM_URL)")]
    NoProviderConfigured,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Model turns allowed per run, re-prompts included.
    pub max_steps: usize,
    /// Residual violations after the correction re-prompt fail the run
    /// instead of being returned alongside the query.
    pub strict_validation: bool,
    pub prompt_limits: PromptLimits,
    pub max_output_tokens: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            strict_validation: false,
            prompt_limits: PromptLimits::default(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let cap = env_usize(SIFT_MAX_STEPS_CAP_ENV, DEFAULT_MAX_STEPS_CAP, 1, 256)?;
        let defaults = PromptLimits::default();
        Ok(Self {
            max_steps: env_usize(SIFT_MAX_STEPS_ENV, DEFAULT_MAX_STEPS.min(cap), 1, cap)?,
            strict_validation: env_bool(SIFT_STRICT_VALIDATION_ENV, false)?,
            prompt_limits: PromptLimits {
                max_history_items: env_usize(
                    SIFT_PROMPT_MAX_HISTORY_ITEMS_ENV,
                    defaults.max_history_items,
                    1,
                    256,
                )?,
                ..defaults
            },
            max_output_tokens: env_usize(
                SIFT_LLM_MAX_OUTPUT_TOKENS_ENV,
                DEFAULT_MAX_OUTPUT_TOKENS,
                64,
                32_000,
            )?,
        })
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_strict_validation(mut self, strict: bool) -> Self {
        self.strict_validation = strict;
        self
    }
}

pub fn env_usize(name: &str, default: usize, min: usize, max: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                return Ok(default);
            }
            let parsed = v
                .parse::<usize>()
                .map_err(|_| ConfigError::Invalid(format!("{name}={v:?} (expected integer)")))?;
            Ok(parsed.clamp(min, max))
        }
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(ConfigError::Invalid(format!("failed to read {name}: {e}"))),
    }
}

pub fn env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid(format!(
                "{name}={other:?} (expected true/false)"
            ))),
        },
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(ConfigError::Invalid(format!("failed to read {name}: {e}"))),
    }
}
