//! Stream events and the progress emitter
//!
//! Every orchestrator entry point that streams owns one [`ProgressEmitter`];
//! the caller holds the matching [`EventStream`].
//!
//! ```text
//! orchestrator task                         caller / transport
//! ┌──────────────────┐   unbounded mpsc   ┌──────────────────┐
//! │ ProgressEmitter  │ ─────────────────▶ │   EventStream    │
//! │  send / close    │                    │ next / disconnect│
//! └──────────────────┘                    └──────────────────┘
//!         ▲  clones shared with the SyntheticProgressTicker
//! ```
//!
//! Sends after close (or after the receiver went away) are silent no-ops. At most
//! one terminal event (`complete`, `end`, `error`) is delivered; the emitter closes
//! itself right after it.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use crate::models::EndReason;
use crate::models::QuizOutcome;

// ============================================================================
// Event Types
// ============================================================================

/// Resume quiz pipeline stage reported with progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuizStage {
    Prepare,
    GeneratingQuestions,
    GeneratingAnalysis,
    Saving,
    Done,
}

/// One event on a per-request stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    Progress {
        percent: u8,
        label: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<QuizStage>,
    },
    /// Opening statement; `content` is cumulative
    Start {
        session_id: String,
        result_id: String,
        interviewer_name: String,
        content: String,
        is_streaming: bool,
        total_questions: u32,
    },
    /// Next question; `content` is cumulative
    Question {
        session_id: String,
        content: String,
        is_streaming: bool,
        question_number: u32,
        total_questions: u32,
        elapsed_minutes: i64,
    },
    /// Reference answer for the current question; `content` is cumulative
    ReferenceAnswer {
        session_id: String,
        content: String,
        is_streaming: bool,
        question_number: u32,
    },
    Waiting {
        session_id: String,
    },
    Thinking {
        session_id: String,
    },
    End {
        session_id: String,
        result_id: String,
        reason: EndReason,
        /// Closing statement
        content: String,
        elapsed_minutes: i64,
        question_count: u32,
    },
    Error {
        message: String,
    },
    Complete {
        data: Box<QuizOutcome>,
    },
}

impl StreamEvent {
    pub fn progress(percent: u8, label: impl Into<String>, stage: Option<QuizStage>) -> Self {
        StreamEvent::Progress {
            percent,
            label: label.into(),
            stage,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StreamEvent::Error {
            message: message.into(),
        }
    }

    /// `complete`, `end` and `error` finish a stream
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Complete { .. } | StreamEvent::End { .. } | StreamEvent::Error { .. }
        )
    }

    /// Wire name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Start { .. } => "start",
            StreamEvent::Question { .. } => "question",
            StreamEvent::ReferenceAnswer { .. } => "reference_answer",
            StreamEvent::Waiting { .. } => "waiting",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::End { .. } => "end",
            StreamEvent::Error { .. } => "error",
            StreamEvent::Complete { .. } => "complete",
        }
    }
}

// ============================================================================
// ProgressEmitter
// ============================================================================

struct EmitterInner {
    tx: Mutex<Option<mpsc::UnboundedSender<StreamEvent>>>,
    terminated: AtomicBool,
}

/// Sending half of an event stream; cheap to clone
#[derive(Clone)]
pub struct ProgressEmitter {
    inner: Arc<EmitterInner>,
}

impl ProgressEmitter {
    /// Create a connected emitter / stream pair
    pub fn channel() -> (ProgressEmitter, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = ProgressEmitter {
            inner: Arc::new(EmitterInner {
                tx: Mutex::new(Some(tx)),
                terminated: AtomicBool::new(false),
            }),
        };
        (emitter, EventStream { rx })
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<StreamEvent>>> {
        // A panic while holding the lock leaves the Option itself intact
        match self.inner.tx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Deliver an event. Returns `false` if it was dropped because the emitter is
    /// closed, already terminated, or the receiver disconnected.
    pub fn send(&self, event: StreamEvent) -> bool {
        let mut guard = self.sender();

        if self.inner.terminated.load(Ordering::SeqCst) {
            log::debug!("[events] Dropping {} after terminal event", event.kind());
            return false;
        }

        let Some(tx) = guard.as_ref() else {
            log::debug!("[events] Dropping {} on closed emitter", event.kind());
            return false;
        };

        let terminal = event.is_terminal();
        let delivered = tx.send(event).is_ok();

        if terminal {
            self.inner.terminated.store(true, Ordering::SeqCst);
            *guard = None;
        } else if !delivered {
            log::debug!("[events] Receiver gone, closing emitter");
            *guard = None;
        }

        delivered
    }

    /// Close without a terminal event. Idempotent.
    pub fn close(&self) {
        self.sender().take();
    }

    /// True once closed, terminated, or the receiver has disconnected
    pub fn is_closed(&self) -> bool {
        match self.sender().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }
}

// ============================================================================
// EventStream
// ============================================================================

/// Receiving half of an event stream
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
}

impl EventStream {
    /// Next event, or `None` once the emitter closed and the buffer drained
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Drain every event until the stream closes
    pub async fn collect_all(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Client went away. Pending and future sends become no-ops.
    pub fn disconnect(&mut self) {
        self.rx.close();
    }
}

impl Stream for EventStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
