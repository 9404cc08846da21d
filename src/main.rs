use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Request, Response, StatusCode};
use opentelemetry::KeyValue;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{MakeSpan, OnResponse, TraceLayer},
};
use tracing::Span;

use shorts_generator::AppState;
use shorts_generator::config::Config;
use shorts_generator::db::{self, PgStore, Store};
use shorts_generator::llm::{self, LlmClient, Provider};
use shorts_generator::pipeline::ShortsPipeline;
use shorts_generator::revalidate;
use shorts_generator::routes;
use shorts_generator::telemetry::{HTTP_REQUEST_DURATION, HTTP_REQUESTS_TOTAL, init_telemetry};

#[derive(Clone)]
struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let method = request.method().as_str();
        let path = request.uri().path();

        tracing::info_span!(
            "HTTP request",
            otel.name = %format!("{} {}", method, path),
            http.method = %method,
            http.route = %path,
            http.target = %request.uri(),
            http.scheme = "http",
            http.flavor = ?request.version(),
            http.user_agent = request.headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
            http.response.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        )
    }
}

#[derive(Clone)]
struct HttpOnResponse;

impl<B> OnResponse<B> for HttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status().as_u16();

        span.record("http.response.status_code", status as i64);

        if status >= 500 {
            span.record("otel.status_code", "ERROR");
        } else {
            span.record("otel.status_code", "OK");
        }

        let latency_ms = latency.as_secs_f64() * 1000.0;
        let status_class = format!("{}xx", status / 100);

        HTTP_REQUESTS_TOTAL.add(
            1,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class.clone()),
            ],
        );

        HTTP_REQUEST_DURATION.record(
            latency_ms,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class),
            ],
        );

        tracing::info!(
            http.response.status_code = status,
            latency_ms = latency_ms,
            "finished processing request"
        );
    }
}

fn provider_for(name: &str, config: &Config) -> Option<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match name {
        "anthropic" => Arc::new(llm::anthropic::AnthropicProvider::new(
            config.anthropic_api_key.as_deref().unwrap_or(""),
        )),
        "openai" => Arc::new(llm::openai::OpenAIProvider::new(
            config.openai_api_key.as_deref().unwrap_or(""),
        )),
        "google" => Arc::new(llm::openai::OpenAIProvider::new_google(
            config.google_api_key.as_deref().unwrap_or(""),
        )),
        "ollama" => Arc::new(llm::openai::OpenAIProvider::new_ollama(
            &config.ollama_base_url,
        )),
        _ => return None,
    };
    Some(provider)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let telemetry_guard = init_telemetry(&config)?;

    tracing::info!(
        port = config.port,
        environment = %config.environment,
        "Starting shorts-generator"
    );

    let pool = db::create_pool(&config.database_url).await?;
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));

    let primary = provider_for(&config.llm_provider, &config).ok_or_else(|| {
        anyhow::anyhow!("unsupported LLM_PROVIDER: {}", config.llm_provider)
    })?;

    let mut llm_client = LlmClient::new(primary)
        .with_timeout(config.llm_timeout())
        .with_max_attempts(config.llm_max_attempts);
    if let Some(fallback) = provider_for(&config.fallback_provider, &config) {
        llm_client = llm_client.with_fallback(fallback, &config.fallback_model);
    }

    tracing::info!(
        primary_provider = llm_client.primary_name(),
        fallback_provider = llm_client.fallback_name().unwrap_or("none"),
        timeout_secs = config.llm_timeout_secs,
        "LLM client initialized"
    );

    let invalidator = revalidate::from_settings(
        config.site_url.as_deref(),
        config.revalidate_secret.as_deref(),
    );

    let pipeline = ShortsPipeline::new(
        store.clone(),
        Arc::new(llm_client),
        invalidator.clone(),
        config.pipeline_settings(),
    );

    let state = AppState {
        pipeline,
        store,
        config: config.clone(),
        invalidator,
    };

    let app = routes::router()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(HttpMakeSpan)
                .on_response(HttpOnResponse),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(300),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    telemetry_guard.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
