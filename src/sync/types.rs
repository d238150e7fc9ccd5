//! Sync protocol types
//!
//! Wire types for the incremental sync protocol: client-submitted
//! operations, batch and single-operation requests and responses,
//! conflict reports, and realtime push events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::SyncLogEntry;

/// Kinds of change an operation can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncAction {
    Add,
    Update,
    Delete,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Add => "ADD",
            SyncAction::Update => "UPDATE",
            SyncAction::Delete => "DELETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ADD" => Some(SyncAction::Add),
            "UPDATE" => Some(SyncAction::Update),
            "DELETE" => Some(SyncAction::Delete),
            _ => None,
        }
    }
}

/// Kinds of entity the protocol syncs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Collection,
    Tab,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Collection => "collection",
            EntityKind::Tab => "tab",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collection" => Some(EntityKind::Collection),
            "tab" => Some(EntityKind::Tab),
            _ => None,
        }
    }
}

/// A single change submitted by a client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientOperation {
    /// Type of change
    #[serde(rename = "type")]
    pub action: SyncAction,
    /// Entity kind being changed
    #[serde(rename = "entityType")]
    pub entity_type: EntityKind,
    /// Client-assigned entity id
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Parent collection id, required for tab operations
    #[serde(rename = "collectionId", skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    /// Entity payload; deletes carry none
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Entity version the client last saw, for conflict detection
    #[serde(rename = "clientVersion", skip_serializing_if = "Option::is_none")]
    pub client_version: Option<i64>,
    /// Set when the entity was created while offline under a temporary id
    #[serde(rename = "isOfflineCreated", default)]
    pub is_offline_created: bool,
}

/// Request body for the batch sync endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSyncRequest {
    /// Device submitting the batch
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    /// Highest version this device claims to have seen
    #[serde(rename = "lastSyncVersion", default)]
    pub last_sync_version: i64,
    /// Changes to apply, in client order
    #[serde(default)]
    pub operations: Vec<ClientOperation>,
}

/// An accepted operation as replayed to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogOperation {
    /// Log sequence id, or the allocated version for direct responses
    pub id: i64,
    /// Type of change
    #[serde(rename = "type")]
    pub action: SyncAction,
    /// Entity kind
    #[serde(rename = "entityType")]
    pub entity_type: EntityKind,
    /// Entity id
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Parent collection id for tab operations
    #[serde(rename = "collectionId", skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    /// Payload as submitted; deletes carry an empty object
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Version assigned when the operation was accepted
    pub version: i64,
    /// Server time the operation was accepted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl From<SyncLogEntry> for LogOperation {
    fn from(entry: SyncLogEntry) -> Self {
        Self {
            id: entry.id,
            action: entry.action,
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            collection_id: entry.collection_id,
            data: Some(entry.data),
            version: entry.version,
            timestamp: Some(entry.created_at),
        }
    }
}

/// A detected version conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Entity kind in conflict
    #[serde(rename = "entityType")]
    pub entity_type: EntityKind,
    /// Entity id in conflict
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Server-side snapshot, always carrying the current version
    #[serde(rename = "serverData")]
    pub server_data: Value,
    /// Client payload annotated with the version it claimed
    #[serde(rename = "clientData")]
    pub client_data: Value,
}

/// Response body for the batch sync endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSyncResponse {
    /// Version the device is current with after this exchange
    #[serde(rename = "serverVersion")]
    pub server_version: i64,
    /// Log entries the device has not yet seen
    pub operations: Vec<LogOperation>,
    /// Conflicts detected while applying the batch; omitted when none
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub conflicts: Vec<SyncConflict>,
}

/// Request body for the single-operation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleSyncRequest {
    /// Device submitting the operation
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    /// The change to apply
    pub operation: Option<ClientOperation>,
    /// Highest version this device claims to have seen
    #[serde(rename = "lastSyncVersion", default)]
    pub last_sync_version: i64,
}

/// Mapping from a temporary offline id to its canonical server id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdMapping {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "serverId")]
    pub server_id: String,
}

/// Response body for the single-operation endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleSyncResponse {
    /// New server version on success; the client's claimed version on conflict
    #[serde(rename = "serverVersion")]
    pub server_version: i64,
    /// The accepted operation, echoed with its assigned version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<LogOperation>,
    /// The conflict that rejected the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<SyncConflict>,
    /// Present when an offline-created id was remapped
    #[serde(rename = "idMapping", skip_serializing_if = "Option::is_none")]
    pub id_mapping: Option<IdMapping>,
}

/// An accepted operation as pushed to a user's other devices
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationEvent {
    /// Type of change
    #[serde(rename = "type")]
    pub action: SyncAction,
    /// Entity kind
    #[serde(rename = "entityType")]
    pub entity_type: EntityKind,
    /// Entity id
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Parent collection id for tab operations
    #[serde(rename = "collectionId", skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    /// Payload as submitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Version assigned to the operation
    pub version: i64,
    /// Device that made the change
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Server time of the push
    pub timestamp: String,
}

/// Response body for the sync status endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    /// Latest version issued for this user
    #[serde(rename = "serverVersion")]
    pub server_version: i64,
    /// Version the requesting device is known to have seen
    #[serde(rename = "lastSyncVersion")]
    pub last_sync_version: i64,
    /// When the device last synced
    #[serde(rename = "lastSyncTime", skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
    /// Log entries the device has not yet pulled
    #[serde(rename = "pendingOperations")]
    pub pending_operations: i64,
}
