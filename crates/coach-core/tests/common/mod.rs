//! Shared fixtures for coach-core integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coach_core::config::CoachConfig;
use coach_core::db::Database;
use coach_core::error::{Error, Result};
use coach_core::models::InitialQuota;
use coach_core::services::ai::{
    AiGenerationPort, LlmUsage, PromptContext, PromptKind, StreamSummary, StructuredResult,
    TextStream, STREAM_BUFFER,
};
use coach_core::services::alert::RecordingAlertSink;
use coach_core::services::document::{DocumentError, DocumentTextExtractor};
use coach_core::SessionOrchestrator;
use serde_json::{json, Value};
use tempfile::TempDir;

pub const RESUME: &str = "Name: Alice Chen\nEmail: alice@example.com\n\
    Education: BSc Computer Science, Example University\n\
    Experience: 5 years building backend services in Rust and Go at Example Company\n\
    Project: high-throughput ingestion pipeline with tokio and Kafka\n\
    Skills: Rust, async, SQL, distributed systems";

/// Helper to create a test database
pub async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db = Database::open(db_path).await.expect("Failed to create test database");
    (db, temp_dir)
}

pub enum Reply {
    Json(Value),
    Chunks(Vec<&'static str>),
    Fail(&'static str),
}

/// AI port that plays back canned replies in order
pub struct ScriptedAi {
    replies: Mutex<VecDeque<Reply>>,
    delay: Duration,
    pub seen: Mutex<Vec<PromptKind>>,
}

impl ScriptedAi {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self::with_delay(replies, Duration::ZERO)
    }

    /// Wait `delay` before a structured reply and before each streamed chunk
    pub fn with_delay(replies: Vec<Reply>, delay: Duration) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            delay,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn next(&self, kind: PromptKind) -> Reply {
        self.seen.lock().unwrap().push(kind);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Reply::Fail("no scripted reply left"))
    }
}

fn usage() -> LlmUsage {
    LlmUsage {
        model: "scripted-model".to_string(),
        prompt_tokens: Some(100),
        completion_tokens: Some(50),
        duration_ms: 5,
    }
}

#[async_trait]
impl AiGenerationPort for ScriptedAi {
    async fn generate_structured(&self, ctx: &PromptContext) -> Result<StructuredResult> {
        let reply = self.next(ctx.kind);
        tokio::time::sleep(self.delay).await;
        match reply {
            Reply::Json(value) => Ok(StructuredResult { value, usage: usage() }),
            Reply::Chunks(_) => Err(Error::generation("scripted: expected a structured reply")),
            Reply::Fail(msg) => Err(Error::generation(msg)),
        }
    }

    async fn generate_stream(&self, ctx: &PromptContext) -> Result<TextStream> {
        let chunks = match self.next(ctx.kind) {
            Reply::Chunks(chunks) => chunks,
            Reply::Json(_) => return Err(Error::generation("scripted: expected a stream reply")),
            Reply::Fail(msg) => return Err(Error::generation(msg)),
        };
        if self.delay.is_zero() {
            return Ok(TextStream::from_chunks(chunks, usage()));
        }

        let (writer, stream) = TextStream::channel(STREAM_BUFFER);
        let delay = self.delay;
        tokio::spawn(async move {
            let mut full_text = String::new();
            for chunk in chunks {
                tokio::time::sleep(delay).await;
                full_text.push_str(chunk);
                if !writer.send(chunk).await {
                    return;
                }
            }
            writer.finish(StreamSummary {
                full_text,
                usage: usage(),
            });
        });
        Ok(stream)
    }

    fn model_name(&self) -> String {
        "scripted-model".to_string()
    }
}

/// Extractor serving fixed documents by URL
#[derive(Default)]
pub struct StaticDocuments {
    documents: HashMap<String, String>,
}

impl StaticDocuments {
    pub fn with(mut self, url: &str, text: &str) -> Self {
        self.documents.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl DocumentTextExtractor for StaticDocuments {
    async fn fetch_and_extract(&self, url: &str) -> std::result::Result<String, DocumentError> {
        self.documents
            .get(url)
            .cloned()
            .ok_or_else(|| DocumentError::DownloadFailed(format!("404 for {}", url)))
    }
}

pub struct Harness {
    pub orchestrator: SessionOrchestrator,
    pub alerts: Arc<RecordingAlertSink>,
    pub ai: Arc<ScriptedAi>,
    pub db: Database,
    _dir: TempDir,
}

pub async fn harness(ai: ScriptedAi) -> Harness {
    harness_with(ai, StaticDocuments::default(), CoachConfig::default()).await
}

pub async fn harness_with(ai: ScriptedAi, documents: StaticDocuments, config: CoachConfig) -> Harness {
    let (db, dir) = create_test_db().await;
    let ai = Arc::new(ai);
    let alerts = Arc::new(RecordingAlertSink::new());
    let orchestrator = SessionOrchestrator::new(&db, ai.clone(), Arc::new(documents), config)
        .with_alert_sink(alerts.clone());
    Harness {
        orchestrator,
        alerts,
        ai,
        db,
        _dir: dir,
    }
}

pub async fn create_user(orchestrator: &SessionOrchestrator, user_id: &str, quota: InitialQuota) {
    orchestrator
        .ledger()
        .create_account(user_id, user_id, &quota)
        .await
        .expect("Failed to create user");
}

pub fn question_set(count: usize) -> Value {
    let questions: Vec<Value> = (0..count)
        .map(|i| {
            json!({
                "question": format!("Question {}", i + 1),
                "answer": format!("Answer {}", i + 1),
                "category": "backend",
                "difficulty": "medium",
            })
        })
        .collect();
    json!({ "questions": questions })
}

pub fn analysis() -> Value {
    json!({
        "matchScore": 76,
        "matchLevel": "good",
        "missingSkills": ["Kubernetes"],
        "strengths": ["Rust"],
        "summary": "Solid match",
    })
}
