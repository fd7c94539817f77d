//! Sequenced verification pipeline.
//!
//! A [Pipeline] is an ordered list of [VerificationStep]s executed one after
//! another by a single driver loop. Each step sees every repository update made
//! by the steps before it. There is no branching back and no automatic retry:
//! a step that raises findings is followed by the next step exactly like one
//! that raises none.
//!
//! The run stops early in three cases only:
//! * the caller cancels it through a [CancelToken] (checked between steps)
//! * the bus fails ([crate::VerifyError::Transport])
//! * a step with [NoResponsePolicy::AbortRun] gets no response ([crate::VerifyError::RunAborted])
//!
//! Layouts for every requested message kind are checked before the first step
//! runs; a missing one is a configuration error ([crate::VerifyError::MissingLayout]).

pub mod checks;
pub mod step;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{error, info, warn};

pub use checks::{CheckInput, CrossCheck, DtcContainment, FnCheck, LampConsistency, LampRequiresDtc, NoDtcs};
pub use step::{Condition, FnStep, NoResponsePolicy, RequestStep, Targets, VerificationStep};

use crate::{
    VerifyError, VerifyResult,
    bus::BusFacade,
    finding::{Finding, ResultsSink, Severity},
    layout::{LayoutCatalog, Pgn},
    repository::ModuleRepository,
};

/// Run-wide verifier options
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VerifierOptions {
    /// Addresses probed by steps targeting [Targets::Candidates]
    pub candidate_addresses: Vec<u8>,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            // 0xFE is the null address, 0xFF is global
            candidate_addresses: (0x00..=0xFD).collect(),
        }
    }
}

/// Everything a step works with. Lives for one run
pub struct StepContext<'a> {
    repository: &'a mut ModuleRepository,
    bus: &'a mut dyn BusFacade,
    sink: &'a mut dyn ResultsSink,
    catalog: &'a LayoutCatalog,
    options: &'a VerifierOptions,
    reported: usize,
}

impl std::fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("repository", &self.repository)
            .field("options", &self.options)
            .field("reported", &self.reported)
            .finish()
    }
}

impl<'a> StepContext<'a> {
    /// Creates a context for one run
    pub fn new(
        repository: &'a mut ModuleRepository,
        bus: &'a mut dyn BusFacade,
        sink: &'a mut dyn ResultsSink,
        catalog: &'a LayoutCatalog,
        options: &'a VerifierOptions,
    ) -> Self {
        Self {
            repository,
            bus,
            sink,
            catalog,
            options,
            reported: 0,
        }
    }

    /// Module state repository
    pub fn repository(&self) -> &ModuleRepository {
        &*self.repository
    }

    /// Mutable module state repository
    pub fn repository_mut(&mut self) -> &mut ModuleRepository {
        &mut *self.repository
    }

    /// Bus request facade
    pub fn bus(&mut self) -> &mut (dyn BusFacade + 'a) {
        &mut *self.bus
    }

    /// Message layouts
    pub fn catalog(&self) -> &'a LayoutCatalog {
        self.catalog
    }

    /// Run options
    pub fn options(&self) -> &'a VerifierOptions {
        self.options
    }

    /// Logs a finding and hands it to the results sink
    pub fn report(&mut self, finding: Finding) {
        match finding.severity {
            Severity::Fail => error!("{finding}"),
            Severity::Warn => warn!("{finding}"),
            Severity::Info => info!("{finding}"),
        }
        self.reported += 1;
        self.sink.add_finding(finding);
    }

    /// Number of findings reported through this context
    pub fn findings_reported(&self) -> usize {
        self.reported
    }
}

/// Cancels a run between steps. Clones share the same flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The step in progress still completes
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed)
    }

    /// Returns true once cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one completed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    /// Step name
    pub name: String,
    /// Findings raised by the step
    pub findings: usize,
}

/// Outcome of a run that was not stopped by an error
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Completed steps, in execution order
    pub steps: Vec<StepSummary>,
    /// Number of steps in the pipeline
    pub total_steps: usize,
    /// The run was cancelled before every step completed
    pub cancelled: bool,
}

impl RunSummary {
    /// Returns true if every step ran
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.steps.len() == self.total_steps
    }

    /// Total findings raised across all steps
    pub fn findings(&self) -> usize {
        self.steps.iter().map(|s| s.findings).sum()
    }
}

/// Ordered list of verification steps
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn VerificationStep>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("steps", &self.step_names()).finish()
    }
}

impl Pipeline {
    /// Creates an empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step
    pub fn with_step<S: VerificationStep + 'static>(mut self, step: S) -> Self {
        self.push(step);
        self
    }

    /// Appends a step
    pub fn push<S: VerificationStep + 'static>(&mut self, step: S) {
        self.steps.push(Box::new(step));
    }

    /// Names of the steps in execution order
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the pipeline has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the first message kind requested by a step that has no layout in `catalog`
    pub fn missing_layout(&self, catalog: &LayoutCatalog) -> Option<Pgn> {
        self.steps
            .iter()
            .filter_map(|s| s.pgn())
            .find(|pgn| catalog.get(*pgn).is_none())
    }

    /// Runs every step in order.
    ///
    /// Findings never stop the run. Transport failures and run aborts are
    /// returned as errors, after any findings the failing step already raised.
    ///
    /// A step requesting a message kind with no layout is a configuration
    /// error. It is reported as [crate::VerifyError::MissingLayout] before any
    /// request goes out on the bus
    pub fn run(&self, ctx: &mut StepContext<'_>, cancel: &CancelToken) -> VerifyResult<RunSummary> {
        if let Some(pgn) = self.missing_layout(ctx.catalog()) {
            error!("No layout for {pgn}, run not started");
            return Err(VerifyError::MissingLayout(pgn));
        }
        let mut summary = RunSummary {
            total_steps: self.steps.len(),
            ..Default::default()
        };
        for step in &self.steps {
            if cancel.is_cancelled() {
                warn!("Run cancelled before step '{}'", step.name());
                summary.cancelled = true;
                break;
            }
            info!("Starting step '{}'", step.name());
            let before = ctx.findings_reported();
            if let Err(e) = step.run(ctx) {
                error!("Step '{}' ended the run: {e}", step.name());
                return Err(e);
            }
            let findings = ctx.findings_reported() - before;
            info!("Step '{}' complete with {findings} finding(s)", step.name());
            summary.steps.push(StepSummary {
                name: step.name().to_string(),
                findings,
            });
        }
        Ok(summary)
    }
}
