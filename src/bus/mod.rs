//! Request/response contract toward the bus transport layer.
//!
//! Addressing, transport protocol segmentation and timeouts all live behind
//! [BusFacade]. The verifier only sees the outcome of each request.

pub mod simulation;

use crate::layout::Pgn;

/// Bus result
pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug)]
/// Error produced by the transport layer. Any of these ends the run
pub enum BusError {
    /// Underlying IO Error with the adapter
    IOError(std::io::Error),
    /// The adapter is not open
    InterfaceNotOpen,
    /// The bus cannot carry traffic (bus off, adapter unplugged)
    Unavailable(String),
    /// Underlying API error with hardware
    APIError {
        /// Name of the API EG: 'socketCAN', 'Passthru'
        api_name: String,
        /// Internal API error code
        code: u32,
        /// API error description
        desc: String,
    },
}

impl std::fmt::Display for BusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusError::IOError(e) => write!(f, "IO error: {e}"),
            BusError::InterfaceNotOpen => write!(f, "bus interface is not open"),
            BusError::Unavailable(reason) => write!(f, "bus unavailable: {reason}"),
            BusError::APIError {
                api_name,
                code,
                desc,
            } => write!(f, "underlying {api_name} API error ({code}): {desc}"),
        }
    }
}

impl std::error::Error for BusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Self::IOError(io_err) = self {
            Some(io_err)
        } else {
            None
        }
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(err)
    }
}

/// Outcome of a single destination specific request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusResponse {
    /// The module answered with a payload
    Data(Vec<u8>),
    /// The module explicitly declined (J1939 acknowledgment, control byte NACK)
    Nack,
    /// Nothing was received before the timeout
    NoResponse,
}

/// Request/response access to the bus
pub trait BusFacade: Send {
    /// Requests `pgn` from the module at `address`, waiting for its response,
    /// its NACK, or the transport timeout
    fn request(&mut self, pgn: Pgn, address: u8) -> BusResult<BusResponse>;

    /// Requests `pgn` from every address, returning once each has an outcome.
    ///
    /// Outcomes are returned in the order of `addresses`. Implementations that
    /// talk to several modules concurrently must still keep that order.
    fn request_all(&mut self, pgn: Pgn, addresses: &[u8]) -> BusResult<Vec<(u8, BusResponse)>> {
        let mut responses = Vec::with_capacity(addresses.len());
        for address in addresses {
            let response = self.request(pgn, *address)?;
            log::debug!("{pgn} request to {address}: {response:02X?}");
            responses.push((*address, response));
        }
        Ok(responses)
    }
}

impl<T: BusFacade + ?Sized> BusFacade for Box<T> {
    fn request(&mut self, pgn: Pgn, address: u8) -> BusResult<BusResponse> {
        (**self).request(pgn, address)
    }

    fn request_all(&mut self, pgn: Pgn, addresses: &[u8]) -> BusResult<Vec<(u8, BusResponse)>> {
        (**self).request_all(pgn, addresses)
    }
}
