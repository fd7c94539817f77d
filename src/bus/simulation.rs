//! Simulated bus for testing verification pipelines without hardware

use std::collections::{HashMap, HashSet, VecDeque};

use super::{BusError, BusFacade, BusResponse, BusResult};
use crate::layout::Pgn;

/// Scripted bus. Each (PGN, address) pair has a queue of responses;
/// the last queued response is repeated once the others are used up, and
/// pairs with nothing queued answer [BusResponse::NoResponse]
#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    responses: HashMap<(Pgn, u8), VecDeque<BusResponse>>,
    failing: HashSet<Pgn>,
    requests: Vec<(Pgn, u8)>,
}

impl SimulatedBus {
    /// Creates a bus where nobody answers
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response to the next request of `pgn` sent to `address`
    pub fn add_response(&mut self, pgn: Pgn, address: u8, response: BusResponse) -> &mut Self {
        self.responses.entry((pgn, address)).or_default().push_back(response);
        self
    }

    /// Queues a data response
    pub fn add_data(&mut self, pgn: Pgn, address: u8, payload: &[u8]) -> &mut Self {
        self.add_response(pgn, address, BusResponse::Data(payload.to_vec()))
    }

    /// Queues a NACK
    pub fn add_nack(&mut self, pgn: Pgn, address: u8) -> &mut Self {
        self.add_response(pgn, address, BusResponse::Nack)
    }

    /// Makes every request for `pgn` fail at the transport level
    pub fn fail_transport(&mut self, pgn: Pgn) -> &mut Self {
        self.failing.insert(pgn);
        self
    }

    /// Requests issued so far, in order
    pub fn requests(&self) -> &[(Pgn, u8)] {
        &self.requests
    }

    /// Drops all scripted responses and the request log
    pub fn clear(&mut self) {
        self.responses.clear();
        self.failing.clear();
        self.requests.clear();
    }
}

impl BusFacade for SimulatedBus {
    fn request(&mut self, pgn: Pgn, address: u8) -> BusResult<BusResponse> {
        self.requests.push((pgn, address));
        if self.failing.contains(&pgn) {
            return Err(BusError::Unavailable(format!("simulated failure requesting {pgn}")));
        }
        let response = match self.responses.get_mut(&(pgn, address)) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        };
        Ok(response.unwrap_or(BusResponse::NoResponse))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_responses() {
        let mut bus = SimulatedBus::new();
        bus.add_data(Pgn::DM1, 0, &[0x40, 0xFF]).add_data(Pgn::DM1, 0, &[0x00, 0xFF]).add_nack(Pgn::DM1, 1);

        assert_eq!(bus.request(Pgn::DM1, 0).unwrap(), BusResponse::Data(vec![0x40, 0xFF]));
        assert_eq!(bus.request(Pgn::DM1, 0).unwrap(), BusResponse::Data(vec![0x00, 0xFF]));
        assert_eq!(bus.request(Pgn::DM1, 0).unwrap(), BusResponse::Data(vec![0x00, 0xFF]));
        assert_eq!(bus.request(Pgn::DM1, 1).unwrap(), BusResponse::Nack);
        assert_eq!(bus.request(Pgn::DM1, 2).unwrap(), BusResponse::NoResponse);
        assert_eq!(bus.requests().len(), 5);
    }

    #[test]
    fn transport_failure() {
        let mut bus = SimulatedBus::new();
        bus.fail_transport(Pgn::DM12);
        assert!(matches!(bus.request(Pgn::DM12, 0), Err(BusError::Unavailable(_))));
        assert!(matches!(bus.request_all(Pgn::DM12, &[0, 1]), Err(BusError::Unavailable(_))));
    }
}
