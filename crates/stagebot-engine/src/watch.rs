use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use stagebot_contracts::events::WorkerEvent;
use stagebot_contracts::jobs::JobOutcome;
use tracing::{error, info, warn};

use crate::clock::Sleeper;
use crate::config::WatchConfig;
use crate::http::error_chain_text;
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub file_id: String,
    pub file_name: String,
    pub error: String,
}

/// What one pass over the inbox did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub listed: usize,
    pub images: usize,
    pub outcomes: Vec<JobOutcome>,
    pub failures: Vec<FileFailure>,
}

impl PassReport {
    pub fn had_fault(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub passes: u64,
    pub faulted_passes: u64,
    pub jobs: usize,
    pub archived: usize,
    pub uploaded: usize,
}

impl RunSummary {
    fn record(&mut self, report: &PassReport) {
        self.jobs += report.outcomes.len();
        self.archived += report.outcomes.iter().filter(|outcome| outcome.archived()).count();
        self.uploaded += report
            .outcomes
            .iter()
            .map(|outcome| outcome.uploaded().len())
            .sum::<usize>();
    }
}

#[derive(Debug, Clone, Copy)]
enum Pause {
    Idle,
    Cooldown,
}

/// Polls the inbox and feeds image files to the pipeline, one at a time.
pub struct WatchLoop {
    pipeline: Pipeline,
    config: WatchConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl WatchLoop {
    pub fn new(pipeline: Pipeline, config: WatchConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            pipeline,
            config,
            sleeper,
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Fails only when the inbox cannot be listed; per-file faults are
    /// recorded in the report and the pass moves on.
    pub fn run_pass(&self) -> Result<PassReport> {
        let inbox = &self.pipeline.folders().inbox;
        let listed = self
            .pipeline
            .store()
            .list(inbox)
            .with_context(|| format!("listing inbox {inbox} failed"))?;
        let images: Vec<_> = listed.iter().filter(|file| file.is_image()).collect();
        let mut report = PassReport {
            listed: listed.len(),
            images: images.len(),
            ..PassReport::default()
        };
        if !images.is_empty() {
            info!(count = images.len(), "new photos found");
        }

        for file in images {
            match self.pipeline.process_file(file) {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(err) => {
                    let detail = error_chain_text(&err, 500);
                    error!(file = %file.name, error = %detail, "job failed");
                    self.pipeline.emit(WorkerEvent::JobFailed {
                        file_id: file.id.clone(),
                        file_name: file.name.clone(),
                        error: detail.clone(),
                    });
                    report.failures.push(FileFailure {
                        file_id: file.id.clone(),
                        file_name: file.name.clone(),
                        error: detail,
                    });
                }
            }
        }
        Ok(report)
    }

    /// Runs passes until `max_passes` is reached, or forever when `None`.
    /// An empty inbox is followed by the idle pause, a pass with any fault by
    /// the cool-down; no pause follows the final pass.
    pub fn run(&self, max_passes: Option<u64>) -> RunSummary {
        let mut summary = RunSummary::default();
        loop {
            summary.passes += 1;
            self.pipeline.emit(WorkerEvent::PassStarted {
                pass: summary.passes,
            });
            let pause = match self.run_pass() {
                Ok(report) => {
                    summary.record(&report);
                    if report.had_fault() {
                        summary.faulted_passes += 1;
                        Some(Pause::Cooldown)
                    } else if report.images == 0 {
                        Some(Pause::Idle)
                    } else {
                        None
                    }
                }
                Err(err) => {
                    let detail = error_chain_text(&err, 500);
                    error!(error = %detail, "pass failed");
                    self.pipeline.emit(WorkerEvent::PassFailed {
                        pass: summary.passes,
                        error: detail,
                    });
                    summary.faulted_passes += 1;
                    Some(Pause::Cooldown)
                }
            };

            if max_passes.is_some_and(|limit| summary.passes >= limit) {
                break;
            }
            match pause {
                Some(Pause::Idle) => self.sleeper.sleep(self.config.idle_interval),
                Some(Pause::Cooldown) => self.cooldown(self.config.cooldown_interval),
                None => {}
            }
        }
        summary
    }

    fn cooldown(&self, pause: Duration) {
        warn!(seconds = pause.as_secs(), "cooling down after fault");
        self.pipeline.emit(WorkerEvent::Cooldown {
            seconds: pause.as_secs(),
        });
        self.sleeper.sleep(pause);
    }
}
