use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub model_text: String,
    pub temperature: f32,
    pub llm_timeout_secs: u64,
    pub system_prompt: String,

    // Storage locations
    pub database_path: PathBuf,
    pub style_sample_dir: PathBuf,
    pub knowledge_hints_path: PathBuf,

    // Memory behaviour
    pub context_limit: usize,
    pub refresh_window: usize,
    pub relevant_facts: usize,
    pub refresh_interval: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            openai_api_key: env::var("OPENAI_API_KEY")
                .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY must be set"))?,
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model_text: env::var("KI_KUMPEL_MODEL_TEXT")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: parse_or("KI_KUMPEL_TEMPERATURE", 0.3),
            llm_timeout_secs: parse_or("KI_KUMPEL_LLM_TIMEOUT_SECS", 120),
            system_prompt: env::var("KI_KUMPEL_SYSTEM_PROMPT")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_PROMPT.to_string()),
            database_path: env::var("KI_KUMPEL_DATABASE_PATH")
                .unwrap_or_else(|_| "data/memory.sqlite".to_string())
                .into(),
            style_sample_dir: env::var("KI_KUMPEL_STYLE_SAMPLE_DIR")
                .unwrap_or_else(|_| "data/style_samples".to_string())
                .into(),
            knowledge_hints_path: env::var("KI_KUMPEL_KNOWLEDGE_HINTS")
                .unwrap_or_else(|_| "knowledge_hints.toml".to_string())
                .into(),
            context_limit: parse_or("KI_KUMPEL_CONTEXT_LIMIT", 30),
            refresh_window: parse_or("KI_KUMPEL_REFRESH_WINDOW", 200),
            relevant_facts: parse_or("KI_KUMPEL_RELEVANT_FACTS", 5),
            refresh_interval: env::var("KI_KUMPEL_REFRESH_INTERVAL")
                .ok()
                .and_then(|v| humantime::parse_duration(&v).ok())
                .filter(|d| !d.is_zero())
                .unwrap_or(Duration::from_secs(600)),
        })
    }
}

/// Reads and parses an env var, falling back to `default` when unset or invalid.
fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("openai_api_key", &"[REDACTED]")
            .field("openai_base_url", &self.openai_base_url)
            .field("model_text", &self.model_text)
            .field("temperature", &self.temperature)
            .field("llm_timeout_secs", &self.llm_timeout_secs)
            .field("system_prompt", &self.system_prompt)
            .field("database_path", &self.database_path)
            .field("style_sample_dir", &self.style_sample_dir)
            .field("knowledge_hints_path", &self.knowledge_hints_path)
            .field("context_limit", &self.context_limit)
            .field("refresh_window", &self.refresh_window)
            .field("relevant_facts", &self.relevant_facts)
            .field(
                "refresh_interval",
                &humantime::format_duration(self.refresh_interval).to_string(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_logic() {
        // 1. Test missing vars
        env::remove_var("OPENAI_API_KEY");
        let result = Config::build();
        assert!(result.is_err(), "Should fail when the API key is missing");

        // 2. Test defaults
        env::set_var("OPENAI_API_KEY", "sk-secret-test-key");
        let config = Config::build().unwrap();
        assert_eq!(config.model_text, "gpt-4o-mini");
        assert_eq!(config.database_path, PathBuf::from("data/memory.sqlite"));
        assert_eq!(config.context_limit, 30);
        assert_eq!(config.refresh_interval, Duration::from_secs(600));

        // 3. Test overrides and invalid fallbacks
        env::set_var("KI_KUMPEL_REFRESH_INTERVAL", "90s");
        env::set_var("KI_KUMPEL_CONTEXT_LIMIT", "not-a-number");
        let config = Config::build().unwrap();
        assert_eq!(config.refresh_interval, Duration::from_secs(90));
        assert_eq!(config.context_limit, 30);

        // 4. Test debug redaction
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("sk-secret-test-key"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(debug_output.contains("1m 30s"));

        // Cleanup
        env::remove_var("OPENAI_API_KEY");
        env::remove_var("KI_KUMPEL_REFRESH_INTERVAL");
        env::remove_var("KI_KUMPEL_CONTEXT_LIMIT");
    }
}
