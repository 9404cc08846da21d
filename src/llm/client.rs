use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::Instrument;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::{GenerateRequest, GenerateResponse, LlmError, Provider};
use crate::telemetry::metrics::{
    GEN_AI_ERROR_COUNT, GEN_AI_FALLBACK_COUNT, GEN_AI_OPERATION_DURATION, GEN_AI_RETRY_COUNT,
    GEN_AI_TOKEN_USAGE,
};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

static PROVIDER_SERVERS: LazyLock<HashMap<&str, (&str, i64)>> = LazyLock::new(|| {
    HashMap::from([
        ("openai", ("api.openai.com", 443_i64)),
        ("anthropic", ("api.anthropic.com", 443)),
        ("google", ("generativelanguage.googleapis.com", 443)),
        ("ollama", ("localhost", 11434)),
    ])
});

struct Fallback {
    provider: Arc<dyn Provider>,
    name: String,
    model: String,
}

/// Generation client shared by every stage. Applies the per-call timeout,
/// a bounded retry on transport-level failures, and an optional fallback
/// provider. It never inspects response content.
pub struct LlmClient {
    primary: Arc<dyn Provider>,
    primary_name: String,
    fallback: Option<Fallback>,
    timeout: Duration,
    max_attempts: u32,
}

impl LlmClient {
    pub fn new(primary: Arc<dyn Provider>) -> Self {
        let primary_name = primary.name().to_string();
        Self {
            primary,
            primary_name,
            fallback: None,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: 1,
        }
    }

    pub fn with_fallback(mut self, provider: Arc<dyn Provider>, model: &str) -> Self {
        self.fallback = Some(Fallback {
            name: provider.name().to_string(),
            provider,
            model: model.to_string(),
        });
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn primary_name(&self) -> &str {
        &self.primary_name
    }

    pub fn fallback_name(&self) -> Option<&str> {
        self.fallback.as_ref().map(|f| f.name.as_str())
    }

    pub async fn generate_once(
        &self,
        provider: &dyn Provider,
        provider_name: &str,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, LlmError> {
        let span_display_name = format!("gen_ai.chat {}", req.model);
        let start = Instant::now();

        let (server_addr, server_port) = PROVIDER_SERVERS
            .get(provider_name)
            .copied()
            .unwrap_or(("unknown", 443));

        let span = tracing::info_span!(
            "gen_ai.chat",
            otel.name = %span_display_name,
            gen_ai.operation.name = "chat",
            gen_ai.provider.name = %provider_name,
            gen_ai.request.model = %req.model,
            server.address = %server_addr,
            server.port = server_port,
            gen_ai.request.temperature = req.temperature,
            gen_ai.request.max_tokens = req.max_tokens as i64,
            gen_ai.response.model = tracing::field::Empty,
            gen_ai.usage.input_tokens = tracing::field::Empty,
            gen_ai.usage.output_tokens = tracing::field::Empty,
            gen_ai.response.finish_reasons = tracing::field::Empty,
            shorts.stage = %req.stage,
            otel.status_code = tracing::field::Empty,
            error.type = tracing::field::Empty,
        );

        // Prompts for the sanitize stage carry raw report text, so only
        // the size goes on the span.
        span.add_event(
            "gen_ai.user.message",
            vec![KeyValue::new(
                "gen_ai.prompt.chars",
                req.prompt.chars().count() as i64,
            )],
        );

        let result = match tokio::time::timeout(
            self.timeout,
            provider.generate(req).instrument(span.clone()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(LlmError::Timeout(self.timeout)),
        };

        let duration = start.elapsed().as_secs_f64();

        match result {
            Ok(mut resp) => {
                resp.provider = provider_name.to_string();

                span.record("gen_ai.response.model", resp.model.as_str());
                span.record("gen_ai.usage.input_tokens", resp.input_tokens as i64);
                span.record("gen_ai.usage.output_tokens", resp.output_tokens as i64);
                if !resp.finish_reason.is_empty() {
                    span.record(
                        "gen_ai.response.finish_reasons",
                        resp.finish_reason.as_str(),
                    );
                }

                let op_kv = KeyValue::new("gen_ai.operation.name", "chat");
                let provider_kv = KeyValue::new("gen_ai.provider.name", provider_name.to_string());
                let model_kv = KeyValue::new("gen_ai.request.model", resp.model.clone());

                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.input_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "input"),
                        op_kv.clone(),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_TOKEN_USAGE.record(
                    f64::from(resp.output_tokens),
                    &[
                        KeyValue::new("gen_ai.token.type", "output"),
                        op_kv.clone(),
                        provider_kv.clone(),
                        model_kv.clone(),
                    ],
                );
                GEN_AI_OPERATION_DURATION.record(duration, &[op_kv, provider_kv, model_kv]);

                Ok(resp)
            }
            Err(err) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.type", err.error_type());

                GEN_AI_ERROR_COUNT.add(
                    1,
                    &[
                        KeyValue::new("gen_ai.provider.name", provider_name.to_string()),
                        KeyValue::new("gen_ai.request.model", req.model.clone()),
                        KeyValue::new("error.type", err.error_type()),
                    ],
                );

                Err(err)
            }
        }
    }

    pub async fn generate_with_retry(
        &self,
        provider: &dyn Provider,
        provider_name: &str,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, LlmError> {
        let mut attempt: u32 = 0;

        loop {
            match self.generate_once(provider, provider_name, req).await {
                Ok(resp) => return Ok(resp),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !is_retryable(&err) {
                        return Err(err);
                    }

                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        provider = provider_name,
                        model = %req.model,
                        error = %err,
                        "Generation call failed, retrying"
                    );

                    GEN_AI_RETRY_COUNT.add(
                        1,
                        &[
                            KeyValue::new("gen_ai.provider.name", provider_name.to_string()),
                            KeyValue::new("gen_ai.request.model", req.model.clone()),
                        ],
                    );

                    tokio::time::sleep(backoff_delay(attempt - 1)).await;
                }
            }
        }
    }

    pub async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        let primary_err = match self
            .generate_with_retry(self.primary.as_ref(), &self.primary_name, req)
            .await
        {
            Ok(resp) => return Ok(resp),
            Err(err) => err,
        };

        let Some(fallback) = &self.fallback else {
            return Err(primary_err);
        };

        tracing::warn!(
            primary_provider = %self.primary_name,
            fallback_provider = %fallback.name,
            error = %primary_err,
            "Primary provider failed, falling back"
        );

        GEN_AI_FALLBACK_COUNT.add(1, &[]);

        let fallback_req = GenerateRequest {
            model: fallback.model.clone(),
            ..req.clone()
        };

        self.generate_with_retry(fallback.provider.as_ref(), &fallback.name, &fallback_req)
            .await
    }
}

fn is_retryable(err: &LlmError) -> bool {
    match err {
        LlmError::Timeout(_) | LlmError::Transport(_) => true,
        LlmError::Upstream { status, .. } => matches!(status, Some(429) | Some(500..=599)),
        LlmError::InvalidRequest(_) => false,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = Duration::from_secs(1) * 2u32.pow(attempt.min(4));
    let base = base.min(Duration::from_secs(10));
    let jitter_ms = fastrand::u64(0..=base.as_millis() as u64 / 4);
    base + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Stage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        name: &'static str,
        calls: AtomicUsize,
        fail: bool,
        delay: Option<Duration>,
    }

    impl Scripted {
        fn new(name: &'static str, fail: bool) -> Self {
            Self {
                name,
                calls: AtomicUsize::new(0),
                fail,
                delay: None,
            }
        }
    }

    #[async_trait::async_trait]
    impl Provider for Scripted {
        async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(LlmError::Upstream {
                    status: Some(400),
                    message: "rejected".to_string(),
                });
            }
            Ok(GenerateResponse {
                content: format!("{} says hi", self.name),
                model: req.model.clone(),
                input_tokens: 1,
                output_tokens: 1,
                finish_reason: "end_turn".to_string(),
                provider: String::new(),
            })
        }

        fn name(&self) -> &str {
            self.name
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest {
            model: "primary-model".to_string(),
            system: String::new(),
            prompt: "hello".to_string(),
            temperature: 0.2,
            max_tokens: 16,
            stage: Stage::Draft,
        }
    }

    #[tokio::test]
    async fn test_primary_success_sets_provider() {
        let client = LlmClient::new(Arc::new(Scripted::new("anthropic", false)));
        let resp = client.generate(&request()).await.unwrap();
        assert_eq!(resp.provider, "anthropic");
        assert_eq!(resp.content, "anthropic says hi");
    }

    #[tokio::test]
    async fn test_fallback_used_with_fallback_model() {
        let primary = Arc::new(Scripted::new("anthropic", true));
        let fallback = Arc::new(Scripted::new("openai", false));
        let client = LlmClient::new(primary.clone()).with_fallback(fallback.clone(), "gpt-4.1-mini");

        let resp = client.generate(&request()).await.unwrap();
        assert_eq!(resp.provider, "openai");
        assert_eq!(resp.model, "gpt-4.1-mini");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let primary = Arc::new(Scripted::new("anthropic", true));
        let client = LlmClient::new(primary.clone()).with_max_attempts(3);

        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Upstream { status: Some(400), .. }));
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_typed_error() {
        let mut slow = Scripted::new("anthropic", false);
        slow.delay = Some(Duration::from_millis(200));
        let client = LlmClient::new(Arc::new(slow)).with_timeout(Duration::from_millis(10));

        let err = client.generate(&request()).await.unwrap_err();
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable(&LlmError::Timeout(Duration::from_secs(1))));
        assert!(is_retryable(&LlmError::Transport("reset".to_string())));
        assert!(is_retryable(&LlmError::Upstream {
            status: Some(503),
            message: String::new()
        }));
        assert!(!is_retryable(&LlmError::Upstream {
            status: Some(401),
            message: String::new()
        }));
        assert!(!is_retryable(&LlmError::InvalidRequest("bad".to_string())));
    }

    #[test]
    fn test_backoff_is_capped() {
        for attempt in 0..8 {
            let delay = backoff_delay(attempt);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay <= Duration::from_millis(12_500));
        }
    }
}
