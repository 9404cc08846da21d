use std::env;
use std::time::Duration;

use crate::pipeline::PipelineSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub environment: String,
    pub database_url: String,
    pub llm_provider: String,
    pub llm_model: String,
    pub fallback_provider: String,
    pub fallback_model: String,
    pub ollama_base_url: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub llm_timeout_secs: u64,
    pub llm_max_attempts: u32,
    pub daily_report_batch_size: usize,
    pub site_url: Option<String>,
    pub revalidate_secret: Option<String>,
    pub cron_secret: Option<String>,
    pub admin_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub otel_service_name: String,
    pub otel_exporter_endpoint: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env::var("APP_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("APP_PORT must be a number"),
            environment: env::var("SHORTS_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            llm_provider: env::var("LLM_PROVIDER").unwrap_or_else(|_| "anthropic".to_string()),
            llm_model: env::var("LLM_MODEL")
                .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string()),
            fallback_provider: env::var("FALLBACK_PROVIDER")
                .unwrap_or_else(|_| "none".to_string()),
            fallback_model: env::var("FALLBACK_MODEL")
                .unwrap_or_else(|_| "gpt-4.1-mini".to_string()),
            ollama_base_url: env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            openai_api_key: env::var("OPENAI_API_KEY").ok(),
            anthropic_api_key: env::var("ANTHROPIC_API_KEY").ok(),
            google_api_key: env::var("GOOGLE_API_KEY").ok(),
            llm_timeout_secs: env::var("LLM_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .expect("LLM_TIMEOUT_SECS must be a number"),
            llm_max_attempts: env::var("LLM_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .expect("LLM_MAX_ATTEMPTS must be a number"),
            daily_report_batch_size: env::var("DAILY_REPORT_BATCH_SIZE")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .expect("DAILY_REPORT_BATCH_SIZE must be a number"),
            site_url: non_empty_var("SITE_URL"),
            revalidate_secret: non_empty_var("REVALIDATE_SECRET"),
            cron_secret: non_empty_var("CRON_SECRET"),
            admin_secret: non_empty_var("ADMIN_SECRET"),
            webhook_secret: non_empty_var("WEBHOOK_SECRET"),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "shorts-generator".to_string()),
            otel_exporter_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            model: self.llm_model.clone(),
            daily_batch_size: self.daily_report_batch_size.max(1),
        }
    }
}

/// Treats an empty variable the same as an unset one, so `CRON_SECRET=`
/// never enables an empty bearer token.
fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            port: 8080,
            environment: "development".to_string(),
            database_url: "postgres://localhost/shorts".to_string(),
            llm_provider: "anthropic".to_string(),
            llm_model: "claude-sonnet-4-5-20250929".to_string(),
            fallback_provider: "none".to_string(),
            fallback_model: "gpt-4.1-mini".to_string(),
            ollama_base_url: "http://localhost:11434".to_string(),
            openai_api_key: None,
            anthropic_api_key: None,
            google_api_key: None,
            llm_timeout_secs: 45,
            llm_max_attempts: 1,
            daily_report_batch_size: 0,
            site_url: None,
            revalidate_secret: None,
            cron_secret: None,
            admin_secret: None,
            webhook_secret: None,
            otel_service_name: "shorts-generator".to_string(),
            otel_exporter_endpoint: "http://localhost:4317".to_string(),
        }
    }

    #[test]
    fn test_pipeline_settings_clamps_batch_size() {
        let settings = sample().pipeline_settings();
        assert_eq!(settings.daily_batch_size, 1);
        assert_eq!(settings.model, "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn test_llm_timeout() {
        assert_eq!(sample().llm_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_is_production() {
        let mut config = sample();
        assert!(!config.is_production());
        config.environment = "production".to_string();
        assert!(config.is_production());
    }
}
