//! Process-wide run state (spec §9: "bundle them in a single world value
//! passed to cooperative steps rather than truly mutable globals").
//!
//! Owns the storages registry, the state-catalog counters, the set of
//! active clients, and the control flags a host (CLI or embedder) can flip
//! mid-run (spec §6: "Control interfaces consumed from host").

use std::cell::RefCell;
use std::rc::Rc;

use crate::catalog::RuntimeCounters;
use crate::client::Client;
use crate::config::{Config, UserCredential};
use crate::mailbox::storage::StorageRegistry;

/// Global flags a host can flip mid-run (spec §6).
#[derive(Debug, Default)]
pub struct ControlFlags {
    pub disconnect_clients: bool,
    pub stalled: bool,
    pub no_new_clients: bool,
}

/// Everything process-wide a cooperative step needs (spec §9).
pub struct World {
    pub config: Rc<Config>,
    pub storages: StorageRegistry,
    pub counters: RuntimeCounters,
    pub clients: Vec<Client>,
    pub flags: ControlFlags,
    pub failure_count: u64,
    credential: Rc<UserCredential>,
}

impl World {
    #[must_use]
    pub fn new(config: Config, credential: UserCredential) -> Self {
        Self {
            config: Rc::new(config),
            storages: StorageRegistry::new(),
            counters: RuntimeCounters::default(),
            clients: Vec::new(),
            flags: ControlFlags::default(),
            failure_count: 0,
            credential: Rc::new(credential),
        }
    }

    /// Spawn one more simulated client, up to `config.clients_count`.
    /// Returns `false` if the cap is already reached or spawning is
    /// currently disallowed.
    pub fn spawn_client(&mut self) -> bool {
        if self.flags.stalled || self.flags.no_new_clients {
            return false;
        }
        if self.clients.len() as u32 >= self.config.clients_count {
            return false;
        }
        let idx = self.clients.len();
        self.clients
            .push(Client::new(idx, Rc::clone(&self.credential), Rc::clone(&self.config)));
        true
    }

    /// Spawn up to `n` more clients (spec §4.6: "on first successful auth,
    /// spawn up to 3 additional clients").
    pub fn spawn_up_to(&mut self, n: usize) -> usize {
        (0..n).take_while(|_| self.spawn_client()).count()
    }

    pub fn record_issued(&mut self, state: crate::catalog::State) {
        self.counters.issued[state.index()] += 1;
    }

    pub fn record_failure(&mut self, message: &str) {
        self.failure_count += 1;
        tracing::warn!(message, "model invariant violation");
    }

    #[must_use]
    pub fn live_storage_count(&self) -> usize {
        self.storages.live_count()
    }
}
