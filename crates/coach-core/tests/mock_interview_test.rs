//! Integration tests for the mock interview lifecycle

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use coach_core::config::CoachConfig;
use coach_core::models::{
    EndReason, InitialQuota, InterviewContext, InterviewKind, InterviewStatus, QuotaKind,
    StartInterviewRequest,
};
use coach_core::services::events::{ProgressEmitter, StreamEvent};
use coach_core::{AnswerOutcome, Error, SessionOrchestrator, StartInfo};
use common::*;

fn start_request(user: &str) -> StartInterviewRequest {
    StartInterviewRequest {
        user_id: user.to_string(),
        interview_kind: InterviewKind::Behavior,
        idempotency_key: Some(format!("start-{}", user)),
        context: InterviewContext {
            candidate_name: Some("Alice".to_string()),
            company: Some("Acme".to_string()),
            position_name: Some("Team Lead".to_string()),
            ..Default::default()
        },
        resume_text: Some(RESUME.to_string()),
        resume_url: None,
    }
}

fn interview_quota(n: i64) -> InitialQuota {
    InitialQuota {
        behavior_interview: n,
        ..Default::default()
    }
}

async fn start(h: &Harness, user: &str) -> StartInfo {
    let (emitter, _events) = ProgressEmitter::channel();
    h.orchestrator
        .run_start_interview(start_request(user), &emitter)
        .await
        .expect("interview should start")
}

#[tokio::test]
async fn test_full_turn_event_order() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Chunks(vec!["Hi Alice, ", "tell me about yourself."]),
        Reply::Chunks(vec![
            "Describe a conflict ",
            "you resolved.[REFERENCE_",
            "ANSWER]Use the STAR ",
            "method.",
        ]),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;

    let opening = h.orchestrator.start_interview(start_request("u1")).collect_all().await;
    let session_id = match opening.last() {
        Some(StreamEvent::Waiting { session_id }) => session_id.clone(),
        other => panic!("expected waiting, got {:?}", other),
    };
    let starts: Vec<&StreamEvent> = opening
        .iter()
        .filter(|e| matches!(e, StreamEvent::Start { .. }))
        .collect();
    assert_eq!(starts.len(), 3);
    match starts[1] {
        StreamEvent::Start { content, .. } => assert_eq!(content, "Hi Alice, tell me about yourself."),
        _ => unreachable!(),
    }

    let turn = h
        .orchestrator
        .submit_answer("u1", &session_id, "I lead a team of five.")
        .collect_all()
        .await;
    let kinds: Vec<&str> = turn.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds.first(), Some(&"thinking"));

    let waiting = kinds.iter().position(|k| *k == "waiting").expect("waiting event");
    let final_question = turn
        .iter()
        .position(|e| matches!(e, StreamEvent::Question { is_streaming: false, .. }))
        .expect("final question");
    assert_eq!(final_question + 1, waiting);
    assert!(kinds[waiting + 1..].iter().all(|k| *k == "reference_answer"));

    match &turn[final_question] {
        StreamEvent::Question { content, .. } => assert_eq!(content, "Describe a conflict you resolved."),
        _ => unreachable!(),
    }
    match turn.last() {
        Some(StreamEvent::ReferenceAnswer { content, is_streaming, .. }) => {
            assert_eq!(content, "Use the STAR method.");
            assert!(!is_streaming);
        }
        other => panic!("expected final reference answer, got {:?}", other),
    }
    // A turn that continues the interview has no terminal event
    assert!(turn.iter().all(|e| !e.is_terminal()));
}

#[tokio::test]
async fn test_concurrent_answer_is_rejected() {
    let h = harness(ScriptedAi::with_delay(
        vec![
            Reply::Chunks(vec!["Welcome."]),
            Reply::Chunks(vec!["Next ", "question?", "[REFERENCE_ANSWER]", "Answer."]),
        ],
        Duration::from_millis(20),
    ))
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    let (first_emitter, _first) = ProgressEmitter::channel();
    let (second_emitter, _second) = ProgressEmitter::channel();
    let (first, second) = tokio::join!(
        h.orchestrator
            .run_answer("u1", &info.session_id, "first answer", &first_emitter),
        h.orchestrator
            .run_answer("u1", &info.session_id, "second answer", &second_emitter),
    );

    assert!(matches!(first, Ok(AnswerOutcome::NextQuestion { .. })));
    assert!(matches!(second, Err(Error::AlreadyInProgress(_))));

    let live = h.orchestrator.sessions().get(&info.session_id).await.unwrap().unwrap();
    assert_eq!(live.question_count, 1);
    assert_eq!(live.conversation_history.len(), 3);
}

#[tokio::test]
async fn test_pause_during_answer_is_rejected() {
    let h = harness(ScriptedAi::with_delay(
        vec![
            Reply::Chunks(vec!["Welcome."]),
            Reply::Chunks(vec!["Why ", "Rust?"]),
        ],
        Duration::from_millis(30),
    ))
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    let (emitter, _events) = ProgressEmitter::channel();
    let (answered, paused) = tokio::join!(
        h.orchestrator.run_answer("u1", &info.session_id, "hello", &emitter),
        async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            h.orchestrator.pause_interview("u1", &info.session_id).await
        }
    );
    assert!(answered.is_ok());
    assert!(matches!(paused, Err(Error::AlreadyInProgress(_))));

    // Once the turn finished, pausing works
    let paused = h.orchestrator.pause_interview("u1", &info.session_id).await.unwrap();
    assert_eq!(paused.question_count, 1);
}

#[tokio::test]
async fn test_pause_and_resume_restore_state() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Chunks(vec!["Welcome."]),
        Reply::Chunks(vec!["Q1?[REFERENCE_ANSWER]R1"]),
        Reply::Chunks(vec!["Q2?[REFERENCE_ANSWER]R2"]),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    let (emitter, _events) = ProgressEmitter::channel();
    h.orchestrator
        .run_answer("u1", &info.session_id, "intro", &emitter)
        .await
        .unwrap();
    let before = h.orchestrator.sessions().get(&info.session_id).await.unwrap().unwrap();

    h.orchestrator.pause_interview("u1", &info.session_id).await.unwrap();

    // Paused sessions are not live
    let (emitter, _events) = ProgressEmitter::channel();
    let err = h
        .orchestrator
        .run_answer("u1", &info.session_id, "too early", &emitter)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionNotFound(_)));

    // Pausing twice finds nothing live
    assert!(h.orchestrator.pause_interview("u1", &info.session_id).await.is_err());

    let resumed = h.orchestrator.resume_interview("u1", &info.result_id).await.unwrap();
    assert_eq!(resumed.session_id, info.session_id);
    assert_eq!(resumed.question_count, before.question_count);
    assert_eq!(resumed.conversation_history, before.conversation_history);
    assert_eq!(resumed.last_question.as_deref(), Some("Q1?"));

    let (emitter, _events) = ProgressEmitter::channel();
    let outcome = h
        .orchestrator
        .run_answer("u1", &info.session_id, "second", &emitter)
        .await
        .unwrap();
    assert!(matches!(outcome, AnswerOutcome::NextQuestion { ref question, .. } if question == "Q2?"));

    let report = h.orchestrator.interviews().get(&info.result_id).await.unwrap().unwrap();
    assert!(report.paused_at.is_some());
    assert!(report.resumed_at.is_some());
    assert_eq!(report.qa.len(), 3);
}

#[tokio::test]
async fn test_resume_after_interrupted_turn_keeps_qa_consistent() {
    let h = harness(ScriptedAi::with_delay(
        vec![
            Reply::Chunks(vec!["Welcome."]),
            Reply::Chunks(vec!["Q2 ", "part?", "[REFERENCE_ANSWER]", "A2"]),
        ],
        Duration::from_millis(30),
    ))
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    // The process goes away while the next question is still streaming
    let (emitter, _events) = ProgressEmitter::channel();
    let interrupted = tokio::time::timeout(
        Duration::from_millis(50),
        h.orchestrator.run_answer("u1", &info.session_id, "first answer", &emitter),
    )
    .await;
    assert!(interrupted.is_err());

    let partial = h.orchestrator.interviews().get(&info.result_id).await.unwrap().unwrap();
    assert_eq!(partial.qa.len(), 2);

    let restarted = SessionOrchestrator::new(
        &h.db,
        Arc::new(ScriptedAi::new(vec![Reply::Chunks(vec!["Q2?[REFERENCE_ANSWER]A2"])])),
        Arc::new(StaticDocuments::default()),
        CoachConfig::default(),
    );
    let resumed = restarted.resume_interview("u1", &info.result_id).await.unwrap();
    assert_eq!(resumed.last_question.as_deref(), Some("Welcome."));
    assert_eq!(resumed.question_count, 0);

    let (emitter, _events) = ProgressEmitter::channel();
    let outcome = restarted
        .run_answer("u1", &info.session_id, "retried answer", &emitter)
        .await
        .unwrap();
    assert!(matches!(outcome, AnswerOutcome::NextQuestion { ref question, .. } if question == "Q2?"));

    let report = restarted.interviews().get(&info.result_id).await.unwrap().unwrap();
    assert_eq!(report.qa.len(), 2);
    assert_eq!(report.qa[0].slot, 1);
    assert_eq!(report.qa[0].answer.as_deref(), Some("retried answer"));
    assert_eq!(report.qa[1].slot, 2);
    assert_eq!(report.qa[1].question, "Q2?");
    assert_eq!(report.qa[1].reference_answer.as_deref(), Some("A2"));
    assert!(report.qa[1].answer.is_none());
}

#[tokio::test]
async fn test_resume_by_another_user_is_unauthorized() {
    let h = harness(ScriptedAi::new(vec![Reply::Chunks(vec!["Welcome."])])).await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    create_user(&h.orchestrator, "u2", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    h.orchestrator.pause_interview("u1", &info.session_id).await.unwrap();
    let err = h.orchestrator.resume_interview("u2", &info.result_id).await.unwrap_err();
    assert!(matches!(err, Error::Unauthorized(_)));
}

#[tokio::test]
async fn test_timeout_ends_interview() {
    let mut config = CoachConfig::default();
    config.interview.behavior_max_minutes = 1;
    let h = harness_with(
        ScriptedAi::new(vec![
            Reply::Chunks(vec!["Welcome."]),
            Reply::Chunks(vec!["We are out of time, ", "thank you."]),
        ]),
        StaticDocuments::default(),
        config,
    )
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    // Pretend the interview started a while ago
    let mut live = h.orchestrator.sessions().get(&info.session_id).await.unwrap().unwrap();
    live.start_time = Utc::now() - chrono::Duration::minutes(5);
    h.orchestrator.sessions().put(live).await.unwrap();

    let events = h
        .orchestrator
        .submit_answer("u1", &info.session_id, "my last answer")
        .collect_all()
        .await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::End {
            reason,
            content,
            question_count,
            elapsed_minutes,
            ..
        } => {
            assert_eq!(*reason, EndReason::Timeout);
            assert_eq!(content, "We are out of time, thank you.");
            assert_eq!(*question_count, 1);
            assert!(*elapsed_minutes >= 5);
        }
        other => panic!("expected end, got {:?}", other),
    }

    let report = h.orchestrator.interviews().get(&info.result_id).await.unwrap().unwrap();
    assert_eq!(report.status, InterviewStatus::Completed);
    assert_eq!(report.end_reason, Some(EndReason::Timeout));
    assert_eq!(report.qa[0].answer.as_deref(), Some("my last answer"));

    // The ended session stays readable but refuses more answers
    let (emitter, _events) = ProgressEmitter::channel();
    let err = h
        .orchestrator
        .run_answer("u1", &info.session_id, "one more", &emitter)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SessionExpired(_)));
}

#[tokio::test]
async fn test_ai_decided_end_after_reference() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Chunks(vec!["Welcome."]),
        Reply::Chunks(vec!["Last one?[REFERENCE_ANSWER]Sure.[END_INTERVIEW]That wraps it up."]),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    let events = h
        .orchestrator
        .submit_answer("u1", &info.session_id, "answer")
        .collect_all()
        .await;
    match events.last() {
        Some(StreamEvent::End { reason, content, .. }) => {
            assert_eq!(*reason, EndReason::AiDecision);
            assert_eq!(content, "That wraps it up.");
        }
        other => panic!("expected end, got {:?}", other),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let report = h.orchestrator.interviews().get(&info.result_id).await.unwrap().unwrap();
    assert_eq!(report.status, InterviewStatus::Completed);
    assert_eq!(report.qa.len(), 2);
    assert_eq!(report.qa[1].question, "Last one?");
}

#[tokio::test]
async fn test_start_with_same_key_is_rejected() {
    let h = harness(ScriptedAi::new(vec![Reply::Chunks(vec!["Welcome."])])).await;
    create_user(&h.orchestrator, "u1", interview_quota(3)).await;
    start(&h, "u1").await;

    let (emitter, _events) = ProgressEmitter::channel();
    let err = h
        .orchestrator
        .run_start_interview(start_request("u1"), &emitter)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyInProgress(_)));

    let balance = h
        .orchestrator
        .ledger()
        .balance("u1", QuotaKind::BehaviorInterview)
        .await
        .unwrap();
    assert_eq!(balance, 2);
}

#[tokio::test]
async fn test_report_counts_views() {
    let h = harness(ScriptedAi::new(vec![
        Reply::Chunks(vec!["Welcome."]),
        Reply::Chunks(vec!["Bye."]),
    ]))
    .await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;
    h.orchestrator.end_interview("u1", &info.session_id).await.unwrap();

    h.orchestrator.view_interview_report("u1", &info.result_id).await.unwrap();
    let report = h.orchestrator.view_interview_report("u1", &info.result_id).await.unwrap();
    assert_eq!(report.view_count, 2);
    assert_eq!(report.end_reason, Some(EndReason::UserEnded));
    assert!(report.duration_minutes.is_some());
}

#[tokio::test]
async fn test_purge_keeps_durable_record() {
    let h = harness(ScriptedAi::new(vec![Reply::Chunks(vec!["Welcome."])])).await;
    create_user(&h.orchestrator, "u1", interview_quota(1)).await;
    let info = start(&h, "u1").await;

    tokio::time::sleep(Duration::from_millis(20)).await;
    let purged = h
        .orchestrator
        .purge_idle_sessions(Duration::from_millis(1))
        .await
        .unwrap();
    assert_eq!(purged, vec![info.session_id.clone()]);

    // In-progress interview that is no longer live can be picked up again
    let resumed = h.orchestrator.resume_interview("u1", &info.result_id).await.unwrap();
    assert_eq!(resumed.last_question.as_deref(), Some("Welcome."));
}
