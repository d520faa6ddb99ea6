//! Weighted stage progress for a single receipt run.
//!
//! The 0–100 scale is split across named stages in proportion to their
//! weights. Reports only ever move forward: a value that rounds to the last
//! reported integer or below is dropped.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;

use crate::config::StageWeight;

/// Token progress never exceeds this share of its stage by default.
pub const DEFAULT_TOKEN_CAP: f64 = 0.95;

/// Steepness of the token curve `1 - e^(-k * tokens / expected)`.
const TOKEN_CURVE_RATE: f64 = 1.5;

pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: u8);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percent: u8) {}
}

/// Adapts a closure into a reporter.
pub struct FnProgress<F>(pub F);

impl<F> ProgressReporter for FnProgress<F>
where
    F: Fn(u8) + Send + Sync,
{
    fn report(&self, percent: u8) {
        (self.0)(percent)
    }
}

#[derive(Debug, Clone)]
struct StageRange {
    name: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Default)]
struct TrackerState {
    last_reported: u8,
    /// Stage started but not yet completed.
    open_stage: Option<usize>,
}

pub struct ProgressTracker {
    stages: Vec<StageRange>,
    token_cap: f64,
    reporter: Arc<dyn ProgressReporter>,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(stages: &[StageWeight], reporter: Arc<dyn ProgressReporter>) -> Self {
        let total: f64 = stages.iter().map(|s| s.weight.max(0.0)).sum();
        let mut cumulative = 0.0;
        let ranges = stages
            .iter()
            .map(|stage| {
                let weight = stage.weight.max(0.0);
                let (start, end) = if total > 0.0 {
                    (
                        cumulative / total * 100.0,
                        (cumulative + weight) / total * 100.0,
                    )
                } else {
                    (0.0, 0.0)
                };
                cumulative += weight;
                StageRange {
                    name: stage.name.clone(),
                    start,
                    end,
                }
            })
            .collect();

        Self {
            stages: ranges,
            token_cap: DEFAULT_TOKEN_CAP,
            reporter,
            state: Mutex::new(TrackerState::default()),
        }
    }

    /// A tracker with no stages that reports nowhere.
    pub fn noop() -> Self {
        Self::new(&[], Arc::new(NoopProgress))
    }

    pub fn with_token_cap(mut self, cap: f64) -> Self {
        self.token_cap = cap.clamp(0.0, 1.0);
        self
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Reports the start of the named stage, first closing any stage left
    /// open. Unknown names are ignored.
    pub fn start_stage(&self, name: &str) {
        let Some(index) = self.index_of(name) else {
            return;
        };
        let unfinished = self.lock_state().open_stage.replace(index);
        if let Some(previous) = unfinished.filter(|p| *p != index) {
            self.report(self.stages[previous].end);
        }
        self.report(self.stages[index].start);
    }

    /// Reports the end of the named stage. Unknown names are ignored.
    pub fn complete_stage(&self, name: &str) {
        let Some(index) = self.index_of(name) else {
            return;
        };
        {
            let mut state = self.lock_state();
            if state.open_stage == Some(index) {
                state.open_stage = None;
            }
        }
        self.report(self.stages[index].end);
    }

    /// Interpolates within a stage; `fraction` is clamped to [0, 1].
    pub fn sub_progress(&self, index: usize, fraction: f64) {
        let Some(stage) = self.stages.get(index) else {
            return;
        };
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        self.report(stage.start + (stage.end - stage.start) * fraction);
    }

    /// Returns a handle mapping token counts onto the named stage.
    pub fn token_progress(&self, name: &str, expected_tokens: u32) -> TokenProgress<'_> {
        TokenProgress {
            tracker: self,
            index: self.index_of(name),
            expected: f64::from(expected_tokens.max(1)),
        }
    }

    /// Drains a token-count channel into the named stage until the sender closes.
    pub async fn track_tokens(
        &self,
        name: &str,
        expected_tokens: u32,
        mut tokens: mpsc::Receiver<u32>,
    ) {
        let progress = self.token_progress(name, expected_tokens);
        while let Some(count) = tokens.recv().await {
            progress.update(count);
        }
    }

    pub fn complete(&self) {
        self.report(100.0);
    }

    pub fn last_reported(&self) -> u8 {
        self.lock_state().last_reported
    }

    fn report(&self, value: f64) {
        let rounded = value.round().clamp(0.0, 100.0) as u8;
        let mut state = self.lock_state();
        if rounded > state.last_reported {
            state.last_reported = rounded;
            // Held across the call so concurrent reports reach the sink in order.
            self.reporter.report(rounded);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            log::warn!("Progress tracker lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Token-driven progress for one stage.
pub struct TokenProgress<'a> {
    tracker: &'a ProgressTracker,
    index: Option<usize>,
    expected: f64,
}

impl TokenProgress<'_> {
    /// Fraction of the stage covered after `tokens_so_far` tokens.
    pub fn fraction(&self, tokens_so_far: u32) -> f64 {
        let raw = 1.0 - (-TOKEN_CURVE_RATE * f64::from(tokens_so_far) / self.expected).exp();
        raw.min(self.tracker.token_cap)
    }

    pub fn update(&self, tokens_so_far: u32) {
        if let Some(index) = self.index {
            self.tracker.sub_progress(index, self.fraction(tokens_so_far));
        }
    }
}
