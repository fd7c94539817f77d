//! Verification steps

use std::collections::HashSet;

use log::debug;

use super::{StepContext, checks::CheckInput, checks::CrossCheck};
use crate::{
    VerifyError, VerifyResult,
    bus::BusResponse,
    decoder::decode,
    finding::{Finding, FindingKind},
    layout::Pgn,
    module_name,
    repository::{ModuleRecord, ModuleRepository},
};

/// One entry of a [super::Pipeline]
pub trait VerificationStep: Send + Sync {
    /// Name used in logs and run summaries
    fn name(&self) -> &str;

    /// Message kind the step requests, checked against the layout catalog
    /// before a run starts
    fn pgn(&self) -> Option<Pgn> {
        None
    }

    /// Executes the step. Findings go to the context's sink; only transport
    /// failures and run aborts are returned as errors
    fn run(&self, ctx: &mut StepContext<'_>) -> VerifyResult<()>;
}

/// Step backed by a closure
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F>
where
    F: Fn(&mut StepContext<'_>) -> VerifyResult<()> + Send + Sync,
{
    /// Wraps `f` as a named step
    pub fn new<N: Into<String>>(name: N, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> std::fmt::Debug for FnStep<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

impl<F> VerificationStep for FnStep<F>
where
    F: Fn(&mut StepContext<'_>) -> VerifyResult<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> VerifyResult<()> {
        (self.f)(ctx)
    }
}

/// Predicate over the state a module was left in by earlier steps
pub struct Condition {
    desc: String,
    f: Box<dyn Fn(&ModuleRecord) -> bool + Send + Sync>,
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Condition").field(&self.desc).finish()
    }
}

impl Condition {
    /// Creates a condition from a predicate
    pub fn new<D, F>(desc: D, f: F) -> Self
    where
        D: Into<String>,
        F: Fn(&ModuleRecord) -> bool + Send + Sync + 'static,
    {
        Self {
            desc: desc.into(),
            f: Box::new(f),
        }
    }

    /// The module has reported `pgn` in an earlier step
    pub fn reported(pgn: Pgn) -> Self {
        Self::new(format!("reported {pgn}"), move |r: &ModuleRecord| r.get(pgn).is_some())
    }

    /// The module reported at least one DTC in its latest `pgn`
    pub fn reported_dtcs(pgn: Pgn) -> Self {
        Self::new(format!("reported DTCs in {pgn}"), move |r: &ModuleRecord| {
            r.get(pgn).is_some_and(|p| !p.dtcs().is_empty())
        })
    }

    /// The module's latest `pgn` had the MIL on but no DTCs
    pub fn mil_on_without_dtcs(pgn: Pgn) -> Self {
        Self::new(format!("MIL on without DTCs in {pgn}"), move |r: &ModuleRecord| {
            r.get(pgn)
                .is_some_and(|p| p.dtcs().is_empty() && p.mil().is_some_and(|m| m.is_on()))
        })
    }

    /// Evaluates the condition. Unknown modules never match
    pub fn evaluate(&self, record: Option<&ModuleRecord>) -> bool {
        record.is_some_and(|r| (self.f)(r))
    }

    /// Description of the condition
    pub fn desc(&self) -> &str {
        &self.desc
    }
}

/// Which modules a step sends its request to
#[derive(Debug)]
pub enum Targets {
    /// Every module registered by earlier steps
    Registered,
    /// The configured candidate addresses, used to discover modules
    Candidates,
    /// A fixed list of addresses
    Addresses(Vec<u8>),
    /// Registered modules whose state matches the condition
    Matching(Condition),
}

/// What happens after a mandatory request goes unanswered
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NoResponsePolicy {
    /// Raise a finding and carry on
    #[default]
    Record,
    /// Raise a finding and skip the module in every later step
    ExcludeModule,
    /// Raise a finding, finish the step, then end the run with [VerifyError::RunAborted]
    AbortRun,
}

/// Every targeted module must answer with data or a NACK
#[derive(Debug)]
struct ResponseRule {
    rule_id: String,
    policy: NoResponsePolicy,
}

/// Modules matching `condition` must answer with a NACK
#[derive(Debug)]
struct NackRule {
    rule_id: String,
    condition: Condition,
}

/// Generic request step: request a message kind from a set of modules, decode
/// and store every response, then cross-check what was decoded.
///
/// All responses are decoded and written to the repository before any check
/// runs. Checks compare against the repository as it was when the step began.
pub struct RequestStep {
    name: String,
    pgn: Pgn,
    targets: Targets,
    malformed_rule: String,
    response_rule: Option<ResponseRule>,
    nack_rule: Option<NackRule>,
    checks: Vec<Box<dyn CrossCheck>>,
}

impl std::fmt::Debug for RequestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestStep")
            .field("name", &self.name)
            .field("pgn", &self.pgn)
            .field("targets", &self.targets)
            .field("response_rule", &self.response_rule)
            .field("nack_rule", &self.nack_rule)
            .field("checks", &self.checks.iter().map(|c| c.rule_id()).collect::<Vec<_>>())
            .finish()
    }
}

impl RequestStep {
    /// Creates a step requesting `pgn` from every registered module.
    /// Malformed responses are reported under the step name until
    /// [RequestStep::malformed_rule] says otherwise
    pub fn new<N: Into<String>>(name: N, pgn: Pgn) -> Self {
        let name = name.into();
        Self {
            malformed_rule: name.clone(),
            name,
            pgn,
            targets: Targets::Registered,
            response_rule: None,
            nack_rule: None,
            checks: Vec::new(),
        }
    }

    /// Sets the modules the request is sent to
    pub fn targets(mut self, targets: Targets) -> Self {
        self.targets = targets;
        self
    }

    /// Rule raised when a response does not fit its layout
    pub fn malformed_rule<R: Into<String>>(mut self, rule_id: R) -> Self {
        self.malformed_rule = rule_id.into();
        self
    }

    /// Makes a response (data or NACK) mandatory for every targeted module
    pub fn require_response<R: Into<String>>(mut self, rule_id: R, policy: NoResponsePolicy) -> Self {
        self.response_rule = Some(ResponseRule {
            rule_id: rule_id.into(),
            policy,
        });
        self
    }

    /// Makes a NACK mandatory for modules matching `condition`
    pub fn require_nack_when<R: Into<String>>(mut self, rule_id: R, condition: Condition) -> Self {
        self.nack_rule = Some(NackRule {
            rule_id: rule_id.into(),
            condition,
        });
        self
    }

    /// Adds a cross-check run against every decoded response
    pub fn check<C: CrossCheck + 'static>(mut self, check: C) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    fn resolve_targets(&self, repo: &ModuleRepository, candidates: &[u8]) -> Vec<u8> {
        let addresses: Vec<u8> = match &self.targets {
            Targets::Registered => repo.all_modules().collect(),
            Targets::Candidates => candidates.to_vec(),
            Targets::Addresses(a) => a.clone(),
            Targets::Matching(c) => repo
                .records()
                .filter(|r| c.evaluate(Some(*r)))
                .map(ModuleRecord::address)
                .collect(),
        };
        let mut seen = HashSet::new();
        addresses
            .into_iter()
            .filter(|a| seen.insert(*a) && !repo.is_excluded(*a))
            .collect()
    }
}

impl VerificationStep for RequestStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn pgn(&self) -> Option<Pgn> {
        Some(self.pgn)
    }

    fn run(&self, ctx: &mut StepContext<'_>) -> VerifyResult<()> {
        let layout = ctx.catalog().get(self.pgn).ok_or(VerifyError::MissingLayout(self.pgn))?;
        let before = ctx.repository().snapshot();
        let addresses = self.resolve_targets(&before, &ctx.options().candidate_addresses);
        if addresses.is_empty() {
            debug!("{}: no modules to request {} from", self.name, self.pgn);
            return Ok(());
        }
        let responses = ctx.bus().request_all(self.pgn, &addresses)?;

        // Write phase. Nothing below reads the live repository until every response is stored
        let mut decoded = Vec::with_capacity(responses.len());
        let mut abort = None;
        for (address, response) in responses {
            let nack_rule = self
                .nack_rule
                .as_ref()
                .filter(|r| r.condition.evaluate(before.record(address)));
            match response {
                BusResponse::Data(bytes) => {
                    ctx.repository_mut().put_module(address);
                    if let Some(rule) = nack_rule {
                        ctx.report(Finding::fail(
                            &rule.rule_id,
                            FindingKind::UnexpectedResponse,
                            address,
                            format!(
                                "{} did not provide a NACK for the {} request",
                                module_name(address),
                                self.pgn
                            ),
                        ));
                    }
                    match decode(address, &bytes, layout) {
                        Ok(packet) => decoded.push((address, ctx.repository_mut().put(address, packet))),
                        Err(e) => ctx.report(Finding::fail(
                            &self.malformed_rule,
                            FindingKind::MalformedPacket,
                            address,
                            format!("{} sent a malformed {} response: {e}", module_name(address), self.pgn),
                        )),
                    }
                }
                BusResponse::Nack => {
                    debug!("{} NACKed {}", module_name(address), self.pgn);
                    ctx.repository_mut().put_module(address);
                }
                BusResponse::NoResponse => {
                    if let Some(rule) = nack_rule {
                        ctx.report(Finding::fail(
                            &rule.rule_id,
                            FindingKind::MissingRequiredResponse,
                            address,
                            format!(
                                "{} did not provide a NACK for the {} request",
                                module_name(address),
                                self.pgn
                            ),
                        ));
                    } else if let Some(rule) = &self.response_rule {
                        ctx.report(Finding::fail(
                            &rule.rule_id,
                            FindingKind::MissingRequiredResponse,
                            address,
                            format!("{} did not respond to the {} request", module_name(address), self.pgn),
                        ));
                    } else {
                        debug!("{} did not respond to {}", module_name(address), self.pgn);
                    }
                    // The response policy applies whether or not a NACK was expected
                    if let Some(rule) = &self.response_rule {
                        match rule.policy {
                            NoResponsePolicy::Record => {}
                            NoResponsePolicy::ExcludeModule => ctx.repository_mut().exclude(address),
                            NoResponsePolicy::AbortRun => {
                                abort.get_or_insert(address);
                            }
                        }
                    }
                }
            }
        }

        // Check phase
        for (address, packet) in &decoded {
            let input = CheckInput {
                address: *address,
                current: packet,
                prior: before.record(*address),
            };
            for check in &self.checks {
                if let Some(message) = check.check(&input) {
                    ctx.report(Finding::new(
                        check.rule_id(),
                        check.severity(),
                        FindingKind::InconsistentState,
                        *address,
                        message,
                    ));
                }
            }
        }

        match abort {
            Some(address) => Err(VerifyError::RunAborted { address, pgn: self.pgn }),
            None => Ok(()),
        }
    }
}
