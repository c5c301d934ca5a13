//! Synthetic progress ticker
//!
//! Emits cosmetic progress while exactly one real operation is awaited:
//!
//! ```text
//! start() ──▶ spawn ──▶ loop {
//!                         select! {
//!                           interval.tick() => emit progress(percent, label)
//!                           shutdown_rx     => break
//!                         }
//!                       }
//! stop()  ──▶ shutdown_tx.send(()) + join
//! drop    ──▶ abort (caller cancelled mid-operation)
//! ```
//!
//! The percentage grows by one per tick and wraps from `cap` back to `floor`,
//! so the feed never reaches a value that would suggest completion.

use std::future::Future;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::QuizConfig;
use crate::services::events::{ProgressEmitter, QuizStage, StreamEvent};

/// Cycled in order, one per tick
pub const PROGRESS_MESSAGES: [&str; 7] = [
    "Reading your resume...",
    "Matching skills against the job description...",
    "Drafting technical questions...",
    "Preparing reference answers...",
    "Reviewing project experience...",
    "Identifying knowledge gaps...",
    "Polishing the question set...",
];

/// Percentage after `current`: +1, wrapping to `floor` once past `cap`
pub fn next_percent(current: u8, floor: u8, cap: u8) -> u8 {
    let next = current.saturating_add(1);
    if next > cap {
        floor
    } else {
        next
    }
}

#[derive(Debug, Clone)]
pub struct SyntheticProgressTicker {
    interval: Duration,
    floor: u8,
    cap: u8,
    start: u8,
    stage: Option<QuizStage>,
}

impl SyntheticProgressTicker {
    pub fn new(interval: Duration, floor: u8, cap: u8) -> Self {
        Self {
            interval,
            floor: floor.min(cap),
            cap,
            start: 0,
            stage: None,
        }
    }

    pub fn from_config(config: &QuizConfig) -> Self {
        Self::new(config.ticker_interval(), config.progress_floor, config.progress_cap)
    }

    /// Stage attached to every emitted progress event
    pub fn with_stage(mut self, stage: QuizStage) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Count up from `percent` instead of zero
    pub fn starting_at(mut self, percent: u8) -> Self {
        self.start = percent.min(self.cap);
        self
    }

    /// Spawn the ticking task
    pub fn start(&self, emitter: ProgressEmitter) -> TickerHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let period = self.interval;
        let floor = self.floor;
        let cap = self.cap;
        let start = self.start;
        let stage = self.stage;

        log::debug!("[ticker] Starting with {:?} interval", period);

        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            // The first tick completes immediately; progress starts one period in
            timer.tick().await;

            let mut percent = start;
            let mut index = 0usize;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        percent = next_percent(percent, floor, cap);
                        let label = PROGRESS_MESSAGES[index % PROGRESS_MESSAGES.len()];
                        index += 1;

                        if !emitter.send(StreamEvent::progress(percent, label, stage)) && emitter.is_closed() {
                            log::debug!("[ticker] Emitter closed, stopping");
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => {
                        log::debug!("[ticker] Received shutdown signal after {} ticks", index);
                        break;
                    }
                }
            }
        });

        TickerHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Run `operation` with the ticker going; the ticker is stopped before the
    /// result is returned, and aborted if this future is dropped early
    pub async fn wrap<F, T>(&self, emitter: &ProgressEmitter, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let handle = self.start(emitter.clone());
        let output = operation.await;
        handle.stop().await;
        output
    }
}

/// Owner of a running ticker task
pub struct TickerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TickerHandle {
    /// Signal shutdown and wait for the task; no tick is emitted after this returns
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    log::warn!("[ticker] Ticker task ended abnormally: {}", e);
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, |t| t.is_finished())
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
