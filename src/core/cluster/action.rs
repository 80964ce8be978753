// src/core/cluster/action.rs

//! The coordinator action envelope consumed by the topology watcher (§4.G).
//!
//! Action bodies are JSON blobs in the coordinator's action queue; unknown
//! `kind` values are rejected explicitly rather than guessed at.

use serde::{Deserialize, Serialize};

/// A slot status as carried in action payloads and the slot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SlotStatus {
    Online,
    Migrate,
    Offline,
    PreMigrate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotChangedPayload {
    pub slot: u32,
    pub group_id: u32,
    pub status: SlotStatus,
    #[serde(default)]
    pub migrate_from: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupChangedPayload {
    pub group_id: u32,
    pub master: String,
    #[serde(default)]
    pub replicas: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotePayload {
    pub group_id: u32,
    pub new_master: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareMigratePayload {
    pub slot: u32,
    pub from_group: u32,
    pub to_group: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitMigratePayload {
    pub slot: u32,
    pub to_group: u32,
}

/// The action kinds a controller may publish. Deserializing an action whose
/// `kind` tag doesn't match one of these fails explicitly with `TopologyStale`
/// rather than being silently ignored or guessed at.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ActionKind {
    SlotChanged(SlotChangedPayload),
    GroupChanged(GroupChangedPayload),
    Promote(PromotePayload),
    PrepareMigrate(PrepareMigratePayload),
    CommitMigrate(CommitMigratePayload),
    Shutdown,
}

/// A sequentially-numbered action as published under `proxy/<product>/actions/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub seq: u64,
    #[serde(flatten)]
    pub kind: ActionKind,
}
