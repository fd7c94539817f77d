//! Findings raised by verification steps, and the sinks that collect them

use std::fmt;

use strum_macros::Display;

/// Severity of a finding
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    /// Rule violated
    #[strum(serialize = "FAIL")]
    Fail,
    /// Suspicious, but not a violation
    #[strum(serialize = "WARN")]
    Warn,
    /// Informational
    #[strum(serialize = "INFO")]
    Info,
}

/// What went wrong
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FindingKind {
    /// Response did not fit its layout
    MalformedPacket,
    /// Neither data nor a NACK where one was mandatory
    MissingRequiredResponse,
    /// Data where a NACK was required
    UnexpectedResponse,
    /// Response disagrees with data from an earlier step
    InconsistentState,
}

/// Immutable record of a rule outcome
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Finding {
    /// Dotted section number of the rule, EG `6.1.2.1.a`
    pub rule_id: String,
    /// Severity of the outcome
    pub severity: Severity,
    /// Category of the outcome
    pub kind: FindingKind,
    /// Module the finding is about, if any
    pub address: Option<u8>,
    /// Human readable description
    pub message: String,
}

impl Finding {
    /// Creates a finding about a module
    pub fn new<R: Into<String>, M: Into<String>>(
        rule_id: R,
        severity: Severity,
        kind: FindingKind,
        address: u8,
        message: M,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            kind,
            address: Some(address),
            message: message.into(),
        }
    }

    /// Creates a fail severity finding about a module
    pub fn fail<R: Into<String>, M: Into<String>>(rule_id: R, kind: FindingKind, address: u8, message: M) -> Self {
        Self::new(rule_id, Severity::Fail, kind, address, message)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} - {}", self.severity, self.rule_id, self.message)
    }
}

/// Receiver of findings, in step execution order
pub trait ResultsSink {
    /// Records a finding
    fn add_finding(&mut self, finding: Finding);
}

impl ResultsSink for Vec<Finding> {
    fn add_finding(&mut self, finding: Finding) {
        self.push(finding)
    }
}

/// Finding counts by severity
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct FindingSummary {
    /// Number of failures
    pub fail: usize,
    /// Number of warnings
    pub warn: usize,
    /// Number of informational findings
    pub info: usize,
}

/// In-memory results sink
#[derive(Debug, Clone, Default)]
pub struct FindingLog {
    findings: Vec<Finding>,
}

impl FindingLog {
    /// Creates an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// All findings, in the order they were raised
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    /// Findings for a single rule
    pub fn for_rule<'a>(&'a self, rule_id: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.rule_id == rule_id)
    }

    /// Findings about a single module
    pub fn for_module(&self, address: u8) -> impl Iterator<Item = &Finding> + '_ {
        self.findings.iter().filter(move |f| f.address == Some(address))
    }

    /// Counts findings by severity
    pub fn summary(&self) -> FindingSummary {
        let mut s = FindingSummary::default();
        for f in &self.findings {
            match f.severity {
                Severity::Fail => s.fail += 1,
                Severity::Warn => s.warn += 1,
                Severity::Info => s.info += 1,
            }
        }
        s
    }

    /// Number of findings
    pub fn len(&self) -> usize {
        self.findings.len()
    }

    /// Returns true if nothing was raised
    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }
}

impl ResultsSink for FindingLog {
    fn add_finding(&mut self, finding: Finding) {
        self.findings.push(finding)
    }
}
