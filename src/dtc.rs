//! Module for J1939-73 Diagnostic trouble code data

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::layout::DTC_WIDTH;

/// Diagnostic trouble code (DTC) as reported in DM messages.
///
/// Two DTCs are equal when their SPN and FMI match. The occurrence count and
/// conversion method describe the report, not the fault, and take no part
/// in comparisons between messages.
#[derive(Debug, Copy, Clone, Eq)]
pub struct DTC {
    /// Suspect parameter number (19 bits)
    pub spn: u32,
    /// Failure mode identifier (5 bits)
    pub fmi: u8,
    /// Number of times the fault went from inactive to active (7 bits)
    pub occurrence_count: u8,
    /// SPN conversion method bit
    pub conversion_method: bool,
}

impl DTC {
    /// Creates a DTC with an occurrence count of 1
    pub fn new(spn: u32, fmi: u8) -> Self {
        Self {
            spn: spn & 0x7FFFF,
            fmi: fmi & 0x1F,
            occurrence_count: 1,
            conversion_method: false,
        }
    }

    /// Decodes a 4 byte DTC record
    ///
    /// ## Layout
    /// * byte 0 - SPN bits 0-7
    /// * byte 1 - SPN bits 8-15
    /// * byte 2 - SPN bits 16-18 (upper 3 bits), FMI (lower 5 bits)
    /// * byte 3 - conversion method (bit 7), occurrence count (lower 7 bits)
    pub fn from_bytes(b: [u8; DTC_WIDTH]) -> Self {
        Self {
            spn: b[0] as u32 | (b[1] as u32) << 8 | ((b[2] & 0xE0) as u32) << 11,
            fmi: b[2] & 0x1F,
            occurrence_count: b[3] & 0x7F,
            conversion_method: b[3] & 0x80 != 0,
        }
    }

    /// Encodes the DTC into its 4 byte record
    pub fn to_bytes(&self) -> [u8; DTC_WIDTH] {
        [
            (self.spn & 0xFF) as u8,
            ((self.spn >> 8) & 0xFF) as u8,
            (((self.spn >> 11) & 0xE0) as u8) | (self.fmi & 0x1F),
            (self.occurrence_count & 0x7F) | if self.conversion_method { 0x80 } else { 0x00 },
        ]
    }

    /// Returns true if the record is the "no DTC" filler sent by modules
    /// with nothing to report (all zero, or all not-available)
    pub fn is_placeholder(b: &[u8]) -> bool {
        b.iter().all(|x| *x == 0x00) || b.iter().all(|x| *x == 0xFF)
    }
}

impl PartialEq for DTC {
    fn eq(&self, other: &Self) -> bool {
        self.spn == other.spn && self.fmi == other.fmi
    }
}

impl Hash for DTC {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.spn.hash(state);
        self.fmi.hash(state);
    }
}

impl fmt::Display for DTC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SPN {} FMI {}", self.spn, self.fmi)
    }
}
