//! Integration tests for metered resume quiz runs

mod common;

use std::time::Duration;

use coach_core::config::CoachConfig;
use coach_core::models::{
    ConsumptionStatus, InitialQuota, InterviewContext, InterviewKind, QuotaKind, ResumeQuizRequest,
    StartInterviewRequest,
};
use coach_core::services::events::{ProgressEmitter, QuizStage, StreamEvent};
use coach_core::Error;
use common::*;

fn request(user: &str, key: &str) -> ResumeQuizRequest {
    ResumeQuizRequest {
        user_id: user.to_string(),
        idempotency_key: key.to_string(),
        company: Some("Acme".to_string()),
        position_name: "Backend Engineer".to_string(),
        job_description: "Build Rust services".to_string(),
        resume_text: Some(RESUME.to_string()),
        ..Default::default()
    }
}

fn quiz_quota(n: i64) -> InitialQuota {
    InitialQuota {
        resume_quiz: n,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_same_request_id_charges_once() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Json(question_set(10)),
        Reply::Json(analysis()),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(3)).await;

    let first = h.orchestrator.resume_quiz(request("u1", "req-1")).collect_all().await;
    let second = h.orchestrator.resume_quiz(request("u1", "req-1")).collect_all().await;

    let first_result = match first.last() {
        Some(StreamEvent::Complete { data }) => data.clone(),
        other => panic!("expected complete, got {:?}", other),
    };
    assert!(!first_result.from_cache);

    // Replay is exactly one completion event
    assert_eq!(second.len(), 1);
    match &second[0] {
        StreamEvent::Complete { data } => {
            assert!(data.from_cache);
            assert_eq!(data.result.result_id, first_result.result.result_id);
            assert_eq!(data.consumption_record_id, first_result.consumption_record_id);
        }
        other => panic!("expected complete, got {:?}", other),
    }

    let balance = h.orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap();
    assert_eq!(balance, 2);
    // Only the first run reached the model
    assert_eq!(h.ai.seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_success_without_artifact_is_inconsistent() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Json(question_set(10)),
        Reply::Json(analysis()),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(3)).await;

    let (emitter, _events) = ProgressEmitter::channel();
    let outcome = h.orchestrator.run_resume_quiz(request("u1", "req-1"), &emitter).await.unwrap();

    sqlx::query("DELETE FROM resume_quiz_results WHERE id = ?")
        .bind(&outcome.result.result_id)
        .execute(&h.db.pool)
        .await
        .unwrap();

    let (emitter, _events) = ProgressEmitter::channel();
    let err = h
        .orchestrator
        .run_resume_quiz(request("u1", "req-1"), &emitter)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DataInconsistency(_)));
    assert_eq!(h.orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_requests_never_overdraw() {
    let h = harness(ScriptedAi::with_delay(
        vec![
            Reply::Json(question_set(10)),
            Reply::Json(analysis()),
            Reply::Fail("unexpected"),
            Reply::Fail("unexpected"),
        ],
        Duration::from_millis(30),
    ))
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;

    let runs = (0..3).map(|i| {
        let orchestrator = h.orchestrator.clone();
        tokio::spawn(async move {
            let (emitter, _events) = ProgressEmitter::channel();
            orchestrator
                .run_resume_quiz(request("u1", &format!("req-{}", i)), &emitter)
                .await
        })
    });
    let results: Vec<_> = futures::future::join_all(runs)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(Error::QuotaExceeded(_))))
        .count();
    assert_eq!(successes, 1);
    assert_eq!(rejected, 2);
    assert_eq!(h.orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_same_key_runs_once() {
    let h = harness(ScriptedAi::with_delay(
        vec![Reply::Json(question_set(10)), Reply::Json(analysis())],
        Duration::from_millis(50),
    ))
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(5)).await;

    let (a_emitter, _a) = ProgressEmitter::channel();
    let (b_emitter, _b) = ProgressEmitter::channel();
    let (a, b) = tokio::join!(
        h.orchestrator.run_resume_quiz(request("u1", "same"), &a_emitter),
        h.orchestrator.run_resume_quiz(request("u1", "same"), &b_emitter),
    );

    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected one success and one rejection, got {:?}", other),
    };
    assert!(!ok.from_cache);
    assert!(matches!(err, Error::AlreadyInProgress(_)));
    assert_eq!(h.orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap(), 4);
}

#[tokio::test]
async fn test_failure_refunds_even_after_disconnect() {
    let h = harness(ScriptedAi::new(vec![Reply::Fail("model overloaded")])).await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;

    let (emitter, mut events) = ProgressEmitter::channel();
    events.disconnect();
    let err = h
        .orchestrator
        .run_resume_quiz(request("u1", "req-1"), &emitter)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GenerationFailed(_)));

    assert_eq!(h.orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap(), 1);
    let history = h.orchestrator.consumption_history("u1", 0, 20).await.unwrap();
    assert_eq!(history.records.len(), 1);
    assert_eq!(history.records[0].status, ConsumptionStatus::Failed);
    assert!(history.records[0].refunded);
    assert!(history.records[0].error_message.is_some());
    assert!(h.alerts.alerts().is_empty());
}

#[tokio::test]
async fn test_failed_request_id_can_be_retried() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Fail("timeout"),
        Reply::Json(question_set(10)),
        Reply::Json(analysis()),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;

    let (emitter, _events) = ProgressEmitter::channel();
    assert!(h.orchestrator.run_resume_quiz(request("u1", "req-1"), &emitter).await.is_err());

    let (emitter, _events) = ProgressEmitter::channel();
    let outcome = h.orchestrator.run_resume_quiz(request("u1", "req-1"), &emitter).await.unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(outcome.remaining_count, Some(0));

    let stats = h.orchestrator.consumption_history("u1", 0, 20).await.unwrap().stats;
    let quiz = &stats[&QuotaKind::ResumeQuiz];
    assert_eq!(quiz.total, 2);
    assert_eq!(quiz.success, 1);
    assert_eq!(quiz.failed, 1);
    assert_eq!(quiz.refunded, 1);
}

#[tokio::test]
async fn test_failed_refund_is_alerted() {
    let h = harness(ScriptedAi::new(vec![Reply::Fail("model overloaded")])).await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;

    // Simulate a ledger that rejects increments
    sqlx::query(
        r#"
        CREATE TRIGGER block_refunds BEFORE UPDATE OF resume_quiz_count ON users
        WHEN NEW.resume_quiz_count > OLD.resume_quiz_count
        BEGIN SELECT RAISE(ABORT, 'ledger unavailable'); END
        "#,
    )
    .execute(&h.db.pool)
    .await
    .unwrap();

    let (emitter, events) = ProgressEmitter::channel();
    let err = h
        .orchestrator
        .run_resume_quiz(request("u1", "req-1"), &emitter)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::GenerationFailed(_)));

    // The client still sees the original failure
    let events = events.collect_all().await;
    assert!(matches!(events.last(), Some(StreamEvent::Error { message }) if message.contains("model overloaded")));

    let alerts = h.alerts.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, QuotaKind::ResumeQuiz);
    assert!(alerts[0].original_error.contains("model overloaded"));

    let history = h.orchestrator.consumption_history("u1", 0, 20).await.unwrap();
    assert_eq!(history.records[0].status, ConsumptionStatus::Failed);
    assert!(!history.records[0].refunded);
    assert_eq!(h.orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap(), 0);
}

#[tokio::test]
async fn test_resume_from_url() {
    let documents = StaticDocuments::default().with("https://cdn.example.com/alice.txt", RESUME);
    let h = harness_with(
        ScriptedAi::new(vec![Reply::Json(question_set(12)), Reply::Json(analysis())]),
        documents,
        CoachConfig::default(),
    )
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;

    let mut req = request("u1", "req-1");
    req.resume_text = None;
    req.resume_url = Some("https://cdn.example.com/alice.txt".to_string());

    let (emitter, _events) = ProgressEmitter::channel();
    let outcome = h.orchestrator.run_resume_quiz(req, &emitter).await.unwrap();
    assert_eq!(outcome.result.resume_source, "url");
    assert_eq!(outcome.result.question_distribution().get("backend"), Some(&12));
}

#[tokio::test]
async fn test_ticker_stops_before_completion() {
    let mut config = CoachConfig::default();
    config.quiz.ticker_interval_ms = 50;
    let h = harness_with(
        ScriptedAi::with_delay(
            vec![Reply::Json(question_set(10)), Reply::Json(analysis())],
            Duration::from_millis(120),
        ),
        StaticDocuments::default(),
        config,
    )
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;

    let events = h.orchestrator.resume_quiz(request("u1", "req-1")).collect_all().await;

    let ticks = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Progress { percent, .. } if (10..=50).contains(percent)))
        .count();
    assert!(ticks > 0, "expected synthetic progress while the model was busy");

    let complete = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Complete { .. }))
        .expect("complete event");
    assert_eq!(complete, events.len() - 1);
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
}

#[tokio::test]
async fn test_progress_reports_each_stage_in_order() {
    let mut config = CoachConfig::default();
    config.quiz.ticker_interval_ms = 20;
    let h = harness_with(
        ScriptedAi::with_delay(
            vec![Reply::Json(question_set(10)), Reply::Json(analysis())],
            Duration::from_millis(100),
        ),
        StaticDocuments::default(),
        config,
    )
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;

    let events = h.orchestrator.resume_quiz(request("u1", "req-1")).collect_all().await;

    let mut stages: Vec<QuizStage> = Vec::new();
    for event in &events {
        if let StreamEvent::Progress { stage: Some(stage), .. } = event {
            if stages.last() != Some(stage) {
                stages.push(*stage);
            }
        }
    }
    assert_eq!(
        stages,
        vec![
            QuizStage::Prepare,
            QuizStage::GeneratingQuestions,
            QuizStage::GeneratingAnalysis,
            QuizStage::Saving,
            QuizStage::Done,
        ]
    );

    let analysis_ticks = events
        .iter()
        .filter(|e| {
            matches!(e, StreamEvent::Progress { stage: Some(QuizStage::GeneratingAnalysis), percent, .. } if *percent > 60)
        })
        .count();
    assert!(analysis_ticks > 0, "expected synthetic progress during the analysis call");
    assert!(matches!(events.last(), Some(StreamEvent::Complete { .. })));
}

#[tokio::test]
async fn test_key_used_by_interview_does_not_block_quiz() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Chunks(vec!["Welcome."]),
        Reply::Json(question_set(10)),
        Reply::Json(analysis()),
    ]))
    .await;
    create_user(
        &h.orchestrator,
        "u1",
        InitialQuota {
            resume_quiz: 1,
            behavior_interview: 1,
            ..Default::default()
        },
    )
    .await;

    let (emitter, _events) = ProgressEmitter::channel();
    h.orchestrator
        .run_start_interview(
            StartInterviewRequest {
                user_id: "u1".to_string(),
                interview_kind: InterviewKind::Behavior,
                idempotency_key: Some("shared".to_string()),
                context: InterviewContext::default(),
                resume_text: Some(RESUME.to_string()),
                resume_url: None,
            },
            &emitter,
        )
        .await
        .unwrap();

    let (emitter, _events) = ProgressEmitter::channel();
    let outcome = h
        .orchestrator
        .run_resume_quiz(request("u1", "shared"), &emitter)
        .await
        .unwrap();
    assert!(!outcome.from_cache);
    assert_eq!(outcome.result.total_questions(), 10);
    assert_eq!(
        h.orchestrator.ledger().balance("u1", QuotaKind::ResumeQuiz).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn test_reports_are_owner_only() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Json(question_set(10)),
        Reply::Json(analysis()),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", quiz_quota(1)).await;
    create_user(&h.orchestrator, "u2", quiz_quota(1)).await;

    let (emitter, _events) = ProgressEmitter::channel();
    let outcome = h.orchestrator.run_resume_quiz(request("u1", "req-1"), &emitter).await.unwrap();

    let viewed = h
        .orchestrator
        .view_quiz_report("u1", &outcome.result.result_id)
        .await
        .unwrap();
    assert_eq!(viewed.view_count, 1);

    let err = h
        .orchestrator
        .view_quiz_report("u2", &outcome.result.result_id)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}
