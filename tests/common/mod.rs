#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta, Utc};
use serde_json::json;
use uuid::Uuid;

use shorts_generator::db::{MemoryStore, Store};
use shorts_generator::llm::{GenerateRequest, GenerateResponse, LlmClient, LlmError, Provider};
use shorts_generator::models::{Report, Stage};
use shorts_generator::pipeline::{PipelineSettings, ShortsPipeline};
use shorts_generator::revalidate::{InvalidationError, Invalidator};

pub const MODEL: &str = "scripted-model";
pub const TITLE: &str = "穏やかな一日";

#[derive(Clone)]
pub enum Reply {
    Content(String),
    Upstream(u16),
    Hang(Duration),
}

/// Answers each stage with a fixed reply and counts every call.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<HashMap<Stage, Reply>>,
    calls: AtomicUsize,
    stages_called: Mutex<Vec<Stage>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, stage: Stage, reply: Reply) -> Self {
        self.replies.lock().unwrap().insert(stage, reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stages_called(&self) -> Vec<Stage> {
        self.stages_called.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.stages_called.lock().unwrap().push(req.stage);

        let reply = self.replies.lock().unwrap().get(&req.stage).cloned();
        match reply {
            Some(Reply::Content(content)) => Ok(GenerateResponse {
                content,
                model: req.model.clone(),
                input_tokens: 100,
                output_tokens: 50,
                finish_reason: "end_turn".to_string(),
                provider: String::new(),
            }),
            Some(Reply::Upstream(status)) => Err(LlmError::Upstream {
                status: Some(status),
                message: "service unavailable".to_string(),
            }),
            Some(Reply::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                Err(LlmError::Transport("hung provider woke up".to_string()))
            }
            None => Err(LlmError::InvalidRequest(format!(
                "no scripted reply for {}",
                req.stage
            ))),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Counts invalidation calls; optionally rejects them.
#[derive(Default)]
pub struct RecordingInvalidator {
    events: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingInvalidator {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Invalidator for RecordingInvalidator {
    async fn invalidate(&self, event: &str) -> Result<(), InvalidationError> {
        self.events.lock().unwrap().push(event.to_string());
        if self.fail {
            Err(InvalidationError::Rejected(500))
        } else {
            Ok(())
        }
    }
}

pub fn report(content: &str, days_ago: i64) -> Report {
    let today = Utc::now().date_naive();
    Report {
        id: Uuid::new_v4(),
        title: Some("Daily report".to_string()),
        content: content.to_string(),
        report_date: today - TimeDelta::days(days_ago),
        created_at: Utc::now(),
    }
}

pub fn three_reports() -> Vec<Report> {
    vec![
        report("Tanaka Hanako visited with her mother from Minato school.", 0),
        report("A first-time client was nervous about the sound of the device.", 1),
        report("A regular client asked for a shorter session and a quiet room.", 2),
    ]
}

pub fn fixed_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 10).unwrap()
}

pub fn summary_text() -> String {
    // 100 characters.
    "配".repeat(40) + &"慮".repeat(30) + &"支".repeat(30)
}

pub fn sanitize_reply(reports: &[Report]) -> Reply {
    let items: Vec<_> = reports
        .iter()
        .map(|r| {
            json!({
                "report_id": r.id,
                "safe_summary": summary_text(),
                "flags": ["name", "school"],
            })
        })
        .collect();
    Reply::Content(format!(
        "Here are the summaries:\n```json\n{}\n```",
        serde_json::Value::Array(items)
    ))
}

pub fn body(chars: usize) -> String {
    "寄".repeat(chars)
}

pub fn draft_reply(title: &str, body_chars: usize) -> Reply {
    Reply::Content(
        json!({
            "title": title,
            "body_md": body(body_chars),
            "tags": ["個別支援", "安心"],
        })
        .to_string(),
    )
}

pub fn audit_reply(score: i64, recommended: &str, ok_version: Option<&str>) -> Reply {
    let mut value = json!({
        "pii_risk_score": score,
        "issues_found": [],
        "recommended_status": recommended,
    });
    if let Some(ok) = ok_version {
        value["ok_version_md"] = json!(ok);
    }
    Reply::Content(format!("Audit complete. {value}"))
}

/// Provider scripted for a clean run over `reports`.
pub fn happy_provider(reports: &[Report], score: i64, recommended: &str) -> ScriptedProvider {
    ScriptedProvider::new()
        .reply(Stage::Sanitize, sanitize_reply(reports))
        .reply(Stage::Draft, draft_reply(TITLE, 200))
        .reply(Stage::Audit, audit_reply(score, recommended, None))
}

pub fn pipeline(
    store: Arc<dyn Store>,
    provider: Arc<ScriptedProvider>,
    invalidator: Arc<dyn Invalidator>,
) -> ShortsPipeline {
    let llm = LlmClient::new(provider).with_timeout(Duration::from_secs(5));
    pipeline_with_client(store, llm, invalidator)
}

pub fn pipeline_with_client(
    store: Arc<dyn Store>,
    llm: LlmClient,
    invalidator: Arc<dyn Invalidator>,
) -> ShortsPipeline {
    ShortsPipeline::new(
        store,
        Arc::new(llm),
        invalidator,
        PipelineSettings {
            model: MODEL.to_string(),
            daily_batch_size: 3,
        },
    )
}

pub fn memory_store(reports: Vec<Report>) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_reports(reports))
}
