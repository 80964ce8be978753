// src/core/routing/mod.rs

//! The slot table (component E): a fixed-size routing table mutated only by
//! the topology watcher and read on every dispatch. Each slot is stored
//! behind its own `RwLock` so readers never observe a torn mix of
//! `group_id`/`status`/`migrate_from` from two different writes, while the
//! table as a whole never needs a single global lock on the read path --
//! matching the per-slot `RwLock<Option<String>>` array this codebase's
//! cluster state keeps for the same reason.

use crate::core::cluster::SlotStatus;
use dashmap::DashMap;
use parking_lot::RwLock;

/// A single routing slot. Cloneable as a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRecord {
    pub index: u32,
    pub group_id: u32,
    pub status: SlotStatus,
    pub migrate_from: Option<u32>,
}

impl SlotRecord {
    fn offline(index: u32) -> Self {
        Self {
            index,
            group_id: 0,
            status: SlotStatus::Offline,
            migrate_from: None,
        }
    }
}

/// A replica set backing a slot range; at most one master at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: u32,
    pub master_endpoint: Option<String>,
    pub replicas: Vec<String>,
}

/// The in-memory routing table: `SLOT_COUNT` slot records plus a
/// `group_id -> Group` map. Constructed at startup from the coordinator's
/// current state; mutated only by the topology watcher; read concurrently
/// by the dispatcher on every request.
pub struct RoutingTable {
    slots: Vec<RwLock<SlotRecord>>,
    groups: DashMap<u32, Group>,
    slot_count: u32,
}

impl RoutingTable {
    pub fn new(slot_count: u32) -> Self {
        Self {
            slots: (0..slot_count).map(|i| RwLock::new(SlotRecord::offline(i))).collect(),
            groups: DashMap::new(),
            slot_count,
        }
    }

    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// A consistent snapshot of slot `index`'s fields.
    pub fn slot(&self, index: u32) -> Option<SlotRecord> {
        self.slots.get(index as usize).map(|s| s.read().clone())
    }

    /// Replaces slot `index` atomically with respect to readers: a reader
    /// either observes the pre- or post-mutation record in full, never a mix.
    pub fn set_slot(
        &self,
        index: u32,
        group_id: u32,
        status: SlotStatus,
        migrate_from: Option<u32>,
    ) -> Result<(), String> {
        let slot = self
            .slots
            .get(index as usize)
            .ok_or_else(|| format!("slot index {index} out of range"))?;
        if status == SlotStatus::Migrate {
            match migrate_from {
                Some(from) if from == group_id => {
                    return Err("migrate_from must differ from destination group_id".into());
                }
                None => return Err("MIGRATE status requires migrate_from".into()),
                _ => {}
            }
        }
        let mut guard = slot.write();
        guard.group_id = group_id;
        guard.status = status;
        guard.migrate_from = if status == SlotStatus::Migrate {
            migrate_from
        } else {
            None
        };
        Ok(())
    }

    pub fn group(&self, id: u32) -> Option<Group> {
        self.groups.get(&id).map(|g| g.clone())
    }

    /// Replaces (or inserts) a group record. Returns the previous master
    /// endpoint, if any, so the caller can instruct the backend pool to
    /// drain-and-close sessions against it.
    pub fn set_group(
        &self,
        id: u32,
        master: Option<String>,
        replicas: Vec<String>,
    ) -> Option<String> {
        let previous_master = self.groups.get(&id).and_then(|g| g.master_endpoint.clone());
        self.groups.insert(
            id,
            Group {
                id,
                master_endpoint: master,
                replicas,
            },
        );
        previous_master
    }

    /// Resolves the master endpoint a request for `group_id` should be sent to.
    pub fn master_endpoint(&self, group_id: u32) -> Option<String> {
        self.groups.get(&group_id).and_then(|g| g.master_endpoint.clone())
    }
}
