use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
};
use std::sync::LazyLock;

pub static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("shorts-generator"));

// --- Generation client metrics ---

pub static GEN_AI_TOKEN_USAGE: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("gen_ai.client.token.usage")
        .with_description("Number of tokens used per generation call")
        .with_unit("{token}")
        .build()
});

pub static GEN_AI_OPERATION_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("gen_ai.client.operation.duration")
        .with_description("Duration of generation calls in seconds")
        .with_unit("s")
        .build()
});

pub static GEN_AI_RETRY_COUNT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("gen_ai.client.retry.count")
        .with_description("Number of generation call retries")
        .with_unit("{retry}")
        .build()
});

pub static GEN_AI_FALLBACK_COUNT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("gen_ai.client.fallback.count")
        .with_description("Number of fallback provider activations")
        .with_unit("{fallback}")
        .build()
});

pub static GEN_AI_ERROR_COUNT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("gen_ai.client.error.count")
        .with_description("Number of generation call errors")
        .with_unit("{error}")
        .build()
});

// --- Pipeline metrics ---

pub static PIPELINE_STAGE_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("shorts.pipeline.stage.duration")
        .with_description("Duration of a pipeline stage in milliseconds")
        .with_unit("ms")
        .build()
});

pub static SHORTS_GENERATED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("shorts.generated")
        .with_description("Shorts persisted by the pipeline, by final status")
        .with_unit("{short}")
        .build()
});

pub static AUDIT_RISK_SCORE: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("shorts.audit.risk_score")
        .with_description("PII risk score reported by the audit stage")
        .with_unit("{score}")
        .with_boundaries(vec![0.0, 10.0, 20.0, 30.0, 50.0, 75.0, 100.0])
        .build()
});

pub static REVALIDATION_FAILURES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("shorts.revalidation.failures")
        .with_description("Failed downstream cache invalidation calls")
        .with_unit("{failure}")
        .build()
});

// --- HTTP Metrics ---

pub static HTTP_REQUESTS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("http.requests.total")
        .with_description("Total number of HTTP requests")
        .with_unit("{request}")
        .build()
});

pub static HTTP_REQUEST_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("http.request.duration")
        .with_description("HTTP request duration in milliseconds")
        .with_unit("ms")
        .with_boundaries(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ])
        .build()
});
