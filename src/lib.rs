#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate for checking that a population of heavy-duty ECUs follows a multi-step
//! J1939 diagnostic test procedure.
//!
//! The crate is made of two halves:
//!
//! ## Packet decoding
//!
//! Diagnostic messages (DM1, DM12, DM23, ...) are decoded from raw bytes into a
//! [decoder::DiagnosticPacket] by walking a [layout::MessageLayout]. Layouts are
//! configuration, so new message kinds can be added without touching the decoder.
//! A layout describes
//! * an optional two byte lamp status header (MIL, red stop, amber warning, protect)
//! * fixed header fields, each 1 to 4 bytes with a fixed resolution
//! * a body of J1939-73 DTCs, or of repeated field groups
//!
//! ## Verification
//!
//! A [pipeline::Pipeline] runs an ordered list of steps against a bus. Each step
//! requests a message kind from a set of modules through a [bus::BusFacade],
//! decodes the responses, stores them in the [repository::ModuleRepository], and
//! compares them against what earlier steps stored. Every discrepancy becomes a
//! [finding::Finding] tied to a rule identifier. Findings never stop a run; only
//! a failure of the bus itself does.
//!
//! The physical bus is not part of this crate. Implement [bus::BusFacade] for your
//! adapter, or use [bus::simulation::SimulatedBus] in tests.

pub mod bus;
pub mod decoder;
pub mod dtc;
pub mod finding;
pub mod lamp;
pub mod layout;
pub mod pipeline;
pub mod repository;

use bus::BusError;
use layout::Pgn;

/// Verification result
pub type VerifyResult<T> = Result<T, VerifyError>;

#[derive(Debug, thiserror::Error)]
/// Errors that end a verification run
pub enum VerifyError {
    /// The bus could not carry the request. No further data can be obtained
    #[error("Bus transport failure")]
    Transport(
        #[from]
        #[source]
        BusError,
    ),
    /// A mandatory request went unanswered and the step's policy is to stop the run
    #[error("Run aborted: module {address} did not respond to mandatory {pgn} request")]
    RunAborted {
        /// Address of the silent module
        address: u8,
        /// Requested message kind
        pgn: Pgn,
    },
    /// A step requested a message kind with no layout in the catalog
    #[error("No field layout defined for {0}")]
    MissingLayout(Pgn),
    /// Layout configuration could not be parsed
    #[cfg(feature = "serde")]
    #[error("Invalid layout configuration")]
    Config(
        #[from]
        #[source]
        serde_json::Error,
    ),
}

/// Returns the J1939 name of a source address, EG "Engine #1 (0)"
pub fn module_name(address: u8) -> String {
    let name = match address {
        0x00 => "Engine #1",
        0x01 => "Engine #2",
        0x03 => "Transmission #1",
        0x0B => "Brakes - System Controller",
        0x11 => "Cruise Control",
        0x17 => "Instrument Cluster #1",
        0x21 => "Body Controller",
        0x3D => "Exhaust Emission Controller",
        0xF9 => "Off Board Diagnostic-Service Tool #1",
        0xFA => "Off Board Diagnostic-Service Tool #2",
        0xFE => "Null",
        0xFF => "Global",
        _ => "Unknown",
    };
    format!("{name} ({address})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_names() {
        assert_eq!(module_name(0), "Engine #1 (0)");
        assert_eq!(module_name(0x3D), "Exhaust Emission Controller (61)");
        assert_eq!(module_name(5), "Unknown (5)");
    }

    #[test]
    fn error_display() {
        let e = VerifyError::RunAborted {
            address: 0,
            pgn: Pgn::DM12,
        };
        assert_eq!(e.to_string(), "Run aborted: module 0 did not respond to mandatory DM12 request");
        let e: VerifyError = BusError::InterfaceNotOpen.into();
        assert!(std::error::Error::source(&e).is_some());
    }
}
