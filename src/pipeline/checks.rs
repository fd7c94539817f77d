//! Cross-step consistency checks

use crate::{
    decoder::DiagnosticPacket,
    finding::Severity,
    lamp::Lamp,
    layout::Pgn,
    module_name,
    repository::ModuleRecord,
};

/// Data a check compares: the packet decoded in this step, and the module's
/// record as it stood before the step started
#[derive(Debug, Clone, Copy)]
pub struct CheckInput<'a> {
    /// Module address
    pub address: u8,
    /// Packet decoded in the current step
    pub current: &'a DiagnosticPacket,
    /// Module state left by earlier steps. None if the module is new
    pub prior: Option<&'a ModuleRecord>,
}

impl<'a> CheckInput<'a> {
    /// Packet of `pgn` stored by an earlier step
    pub fn prior_packet(&self, pgn: Pgn) -> Option<&'a DiagnosticPacket> {
        self.prior.and_then(|r| r.get(pgn))
    }
}

/// A rule comparing newly decoded data against earlier data for the same module
pub trait CrossCheck: Send + Sync {
    /// Rule identifier raised on violation
    fn rule_id(&self) -> &str;

    /// Severity raised on violation
    fn severity(&self) -> Severity {
        Severity::Fail
    }

    /// Returns a description of the discrepancy, or None if the rule holds.
    /// At most one discrepancy is reported per module
    fn check(&self, input: &CheckInput<'_>) -> Option<String>;
}

/// Every DTC reported earlier in `prior` must still be reported, matched by SPN and FMI
#[derive(Debug, Clone)]
pub struct DtcContainment {
    rule_id: String,
    prior: Pgn,
    severity: Severity,
}

impl DtcContainment {
    /// Creates the check against DTCs previously stored for `prior`
    pub fn new<R: Into<String>>(rule_id: R, prior: Pgn) -> Self {
        Self {
            rule_id: rule_id.into(),
            prior,
            severity: Severity::Fail,
        }
    }

    /// Overrides the severity raised on violation
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl CrossCheck for DtcContainment {
    fn rule_id(&self) -> &str {
        &self.rule_id
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn check(&self, input: &CheckInput<'_>) -> Option<String> {
        let prior = input.prior_packet(self.prior)?;
        let missing: Vec<String> = prior
            .dtcs()
            .iter()
            .filter(|d| !input.current.has_dtc(d))
            .map(ToString::to_string)
            .collect();
        if missing.is_empty() {
            return None;
        }
        Some(format!(
            "{} {} response does not include {} reported in {}: {}",
            module_name(input.address),
            input.current.pgn(),
            if missing.len() == 1 { "the DTC" } else { "the DTCs" },
            self.prior,
            missing.join(", ")
        ))
    }
}

/// A lamp must report the same status as it did in `prior`
#[derive(Debug, Clone)]
pub struct LampConsistency {
    rule_id: String,
    prior: Pgn,
    lamp: Lamp,
    severity: Severity,
}

impl LampConsistency {
    /// Creates the check for the MIL
    pub fn new<R: Into<String>>(rule_id: R, prior: Pgn) -> Self {
        Self {
            rule_id: rule_id.into(),
            prior,
            lamp: Lamp::Mil,
            severity: Severity::Fail,
        }
    }

    /// Checks `lamp` instead of the MIL
    pub fn for_lamp(mut self, lamp: Lamp) -> Self {
        self.lamp = lamp;
        self
    }

    /// Overrides the severity raised on violation
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl CrossCheck for LampConsistency {
    fn rule_id(&self) -> &str {
        &self.rule_id
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn check(&self, input: &CheckInput<'_>) -> Option<String> {
        let before = input.prior_packet(self.prior)?.lamps()?.get(self.lamp);
        let now = input.current.lamps()?.get(self.lamp);
        (before != now).then(|| {
            format!(
                "{} reported {} {} in {}, but {} in {}",
                module_name(input.address),
                self.lamp,
                now,
                input.current.pgn(),
                before,
                self.prior
            )
        })
    }
}

/// The current response must not report any DTC
#[derive(Debug, Clone)]
pub struct NoDtcs {
    rule_id: String,
    severity: Severity,
}

impl NoDtcs {
    /// Creates the check
    pub fn new<R: Into<String>>(rule_id: R) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity: Severity::Fail,
        }
    }

    /// Overrides the severity raised on violation
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl CrossCheck for NoDtcs {
    fn rule_id(&self) -> &str {
        &self.rule_id
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn check(&self, input: &CheckInput<'_>) -> Option<String> {
        let dtcs = input.current.dtcs();
        if dtcs.is_empty() {
            return None;
        }
        let list: Vec<String> = dtcs.iter().map(ToString::to_string).collect();
        Some(format!(
            "{} reported {} DTC(s) in {}: {}",
            module_name(input.address),
            dtcs.len(),
            input.current.pgn(),
            list.join(", ")
        ))
    }
}

/// An illuminated lamp must be backed by at least one DTC in the same response
#[derive(Debug, Clone)]
pub struct LampRequiresDtc {
    rule_id: String,
    lamp: Lamp,
    severity: Severity,
}

impl LampRequiresDtc {
    /// Creates the check for the MIL, raising a warning
    pub fn new<R: Into<String>>(rule_id: R) -> Self {
        Self {
            rule_id: rule_id.into(),
            lamp: Lamp::Mil,
            severity: Severity::Warn,
        }
    }

    /// Checks `lamp` instead of the MIL
    pub fn for_lamp(mut self, lamp: Lamp) -> Self {
        self.lamp = lamp;
        self
    }

    /// Overrides the severity raised on violation
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl CrossCheck for LampRequiresDtc {
    fn rule_id(&self) -> &str {
        &self.rule_id
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn check(&self, input: &CheckInput<'_>) -> Option<String> {
        let status = input.current.lamps()?.get(self.lamp);
        (status.is_on() && input.current.dtcs().is_empty()).then(|| {
            format!(
                "{} reported {} {} with no DTCs in {}",
                module_name(input.address),
                self.lamp,
                status,
                input.current.pgn()
            )
        })
    }
}

/// Check backed by a closure, for rules with no built-in counterpart
pub struct FnCheck<F> {
    rule_id: String,
    severity: Severity,
    f: F,
}

impl<F> FnCheck<F>
where
    F: Fn(&CheckInput<'_>) -> Option<String> + Send + Sync,
{
    /// Wraps `f` as a fail severity check
    pub fn new<R: Into<String>>(rule_id: R, f: F) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity: Severity::Fail,
            f,
        }
    }

    /// Overrides the severity raised on violation
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

impl<F> std::fmt::Debug for FnCheck<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCheck")
            .field("rule_id", &self.rule_id)
            .field("severity", &self.severity)
            .finish()
    }
}

impl<F> CrossCheck for FnCheck<F>
where
    F: Fn(&CheckInput<'_>) -> Option<String> + Send + Sync,
{
    fn rule_id(&self) -> &str {
        &self.rule_id
    }

    fn severity(&self) -> Severity {
        self.severity
    }

    fn check(&self, input: &CheckInput<'_>) -> Option<String> {
        (self.f)(input)
    }
}
