//! Experiment runner — the application entry point into the domain.
//!
//! [`ExperimentRunner`] validates configuration, owns the sequencer and its
//! shared state, and runs experiments one after another.  All I/O flows
//! through port traits injected at construction or call sites, making the
//! whole service testable with mock adapters.
//!
//! ```text
//!  ProcessHardware ──▶ ┌────────────────────────┐ ──▶ EventSink
//!                      │   ExperimentRunner      │
//!  SweepRunner     ◀── │  Sequencer · Loop       │ ──▶ ResultSink
//!                      └────────────────────────┘
//! ```

use std::sync::Arc;

use log::{error, info, warn};

use crate::config::SystemConfig;
use crate::error::{Error, Result};
use crate::fsm::context::SharedProcessState;
use crate::fsm::{ProcessSequencer, RunOutcome, RunSummary};

use super::events::ExperimentLabel;
use super::ports::{EventSink, ProcessHardware, ResultSink, SweepRunner};

/// Outcome of a batch.  `hardware` is `None` if a run lost control of it,
/// in which case the batch stopped early.
pub struct BatchOutcome<H> {
    pub hardware: Option<H>,
    pub completed: Vec<RunSummary>,
    /// `(experiment_number, error)` for each failed run.
    pub failures: Vec<(u32, Error)>,
}

impl<H> BatchOutcome<H> {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.hardware.is_some()
    }
}

pub struct ExperimentRunner<R> {
    config: SystemConfig,
    sequencer: ProcessSequencer<R>,
}

impl<R: SweepRunner> ExperimentRunner<R> {
    /// Construct from configuration.  Invalid configuration is rejected
    /// here, before any hardware is touched.
    pub fn new(config: SystemConfig, sink: Arc<dyn EventSink>, runner: R) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(SharedProcessState::from_config(&config.control, &config.process));
        let sequencer = ProcessSequencer::new(&config, state, sink, runner);
        Ok(Self { config, sequencer })
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &ProcessSequencer<R> {
        &self.sequencer
    }

    /// Run a single experiment.
    pub fn run_one<H>(&mut self, hw: H, label: &ExperimentLabel, results: &mut dyn ResultSink) -> RunOutcome<H>
    where
        H: ProcessHardware + Send + 'static,
    {
        self.sequencer.run(hw, label, results)
    }

    /// Run `count` experiments back to back, numbered from
    /// `template.experiment_number`.  A failed experiment is recorded and
    /// the batch moves on; losing the hardware ends the batch.
    pub fn run_batch<H>(
        &mut self,
        hw: H,
        template: &ExperimentLabel,
        count: u32,
        results: &mut dyn ResultSink,
    ) -> BatchOutcome<H>
    where
        H: ProcessHardware + Send + 'static,
    {
        let mut outcome = BatchOutcome {
            hardware: Some(hw),
            completed: Vec::new(),
            failures: Vec::new(),
        };

        for offset in 0..count {
            let Some(hw) = outcome.hardware.take() else {
                break;
            };
            let number = template.experiment_number + offset;
            info!("Running experiment {} of {}", offset + 1, count);

            let run = self.sequencer.run(hw, &template.with_number(number), results);
            match run.result {
                Ok(summary) => outcome.completed.push(summary),
                Err(e) => {
                    warn!("Experiment {} failed: {}", number, e);
                    outcome.failures.push((number, e));
                }
            }
            outcome.hardware = run.hardware;
            if outcome.hardware.is_none() {
                error!("Hardware not recovered after experiment {}, stopping batch", number);
            }
        }

        info!(
            "Batch finished: {} completed, {} failed",
            outcome.completed.len(),
            outcome.failures.len()
        );
        outcome
    }
}
