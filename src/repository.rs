//! Per-module store of the most recent decoded packet of each message kind

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{decoder::DiagnosticPacket, layout::Pgn};

/// Everything known about one module during a run
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    address: u8,
    packets: HashMap<Pgn, Arc<DiagnosticPacket>>,
}

impl ModuleRecord {
    fn new(address: u8) -> Self {
        Self {
            address,
            packets: HashMap::new(),
        }
    }

    /// Source address of the module
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Latest packet of a message kind, None if the module never sent one
    pub fn get(&self, pgn: Pgn) -> Option<&DiagnosticPacket> {
        self.packets.get(&pgn).map(Arc::as_ref)
    }

    /// Message kinds this module has reported
    pub fn kinds(&self) -> impl Iterator<Item = Pgn> + '_ {
        self.packets.keys().copied()
    }
}

/// Module state repository.
///
/// Records are created on first contact, never deleted, and iterated in
/// the order modules were first registered. Packets are shared behind [Arc]
/// so [ModuleRepository::snapshot] is cheap.
#[derive(Debug, Clone, Default)]
pub struct ModuleRepository {
    order: Vec<u8>,
    records: HashMap<u8, ModuleRecord>,
    excluded: HashSet<u8>,
}

impl ModuleRepository {
    /// Creates an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module if absent. Returns true if the module is new
    pub fn put_module(&mut self, address: u8) -> bool {
        if self.records.contains_key(&address) {
            return false;
        }
        log::debug!("Registering module {}", crate::module_name(address));
        self.order.push(address);
        self.records.insert(address, ModuleRecord::new(address));
        true
    }

    /// Stores `packet` as the latest of its kind for `address`, registering
    /// the module if needed. Returns the stored packet
    pub fn put(&mut self, address: u8, packet: DiagnosticPacket) -> Arc<DiagnosticPacket> {
        self.put_module(address);
        let packet = Arc::new(packet);
        if let Some(record) = self.records.get_mut(&address) {
            record.packets.insert(packet.pgn(), packet.clone());
        }
        packet
    }

    /// Latest packet of `pgn` from `address`
    pub fn get(&self, address: u8, pgn: Pgn) -> Option<Arc<DiagnosticPacket>> {
        self.records.get(&address)?.packets.get(&pgn).cloned()
    }

    /// Record of a registered module
    pub fn record(&self, address: u8) -> Option<&ModuleRecord> {
        self.records.get(&address)
    }

    /// Registered addresses in first-registration order
    pub fn all_modules(&self) -> impl Iterator<Item = u8> + '_ {
        self.order.iter().copied()
    }

    /// Records in first-registration order
    pub fn records(&self) -> impl Iterator<Item = &ModuleRecord> + '_ {
        self.order.iter().filter_map(|a| self.records.get(a))
    }

    /// Returns true if the module has been registered
    pub fn contains(&self, address: u8) -> bool {
        self.records.contains_key(&address)
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no module has been registered
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Removes a module from all later steps. Its record is kept
    pub fn exclude(&mut self, address: u8) {
        if self.excluded.insert(address) {
            log::warn!("Excluding {} from remaining steps", crate::module_name(address));
        }
    }

    /// Returns true if the module was excluded
    pub fn is_excluded(&self, address: u8) -> bool {
        self.excluded.contains(&address)
    }

    /// Copy of the current state, sharing packet storage
    pub fn snapshot(&self) -> Self {
        self.clone()
    }
}
