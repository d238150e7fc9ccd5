//! Sync engine
//!
//! Applies client-submitted operations against the entity stores with
//! optimistic concurrency control, records accepted mutations in the
//! operation log, and keeps device cursors moving forward.
//!
//! Two entry points share the per-operation rules but not their
//! protocol: the batch path records conflicts and keeps going, then
//! replays missed log entries; the single-operation path aborts on the
//! first conflict and pushes accepted changes to the user's other
//! connected devices.

use chrono::Utc;
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::db::{
    CasOutcome, Collection, CollectionFields, CollectionRepository, CursorRepository,
    DeleteOutcome, InsertOutcome, SyncLogRepository, Tab, TabFields, TabRepository,
    VersionAllocator,
};
use crate::error::Result;
use crate::realtime::ConnectionHub;

use super::types::{
    BatchSyncResponse, ClientOperation, EntityKind, IdMapping, LogOperation, OperationEvent,
    SingleSyncResponse, SyncAction, SyncConflict, SyncStatusResponse,
};

/// How one operation landed
enum OpOutcome {
    Applied,
    Skipped,
    Conflict(SyncConflict),
}

/// Result of the single-operation protocol
pub enum SingleSyncOutcome {
    /// Operation accepted, or idempotently skipped
    Accepted(SingleSyncResponse),
    /// Version conflict; the operation was not applied
    Conflict(SingleSyncResponse),
}

/// Conflict-checked application of sync operations
pub struct SyncEngine<'a> {
    pool: &'a SqlitePool,
    hub: &'a ConnectionHub,
}

impl<'a> SyncEngine<'a> {
    pub fn new(pool: &'a SqlitePool, hub: &'a ConnectionHub) -> Self {
        Self { pool, hub }
    }

    /// Apply a batch of operations and replay everything the device missed.
    ///
    /// Each operation consumes one version from a block allocated up
    /// front. Conflicting operations are reported but never block the
    /// rest of the batch. The response's `serverVersion` is the version
    /// of the newest change the device is now current with.
    pub async fn apply_batch(
        &self,
        user_id: i64,
        device_id: &str,
        last_sync_version: i64,
        operations: &[ClientOperation],
    ) -> Result<BatchSyncResponse> {
        let allocator = VersionAllocator::new(self.pool);
        let cursors = CursorRepository::new(self.pool);
        let log = SyncLogRepository::new(self.pool);

        // A device may understate its own progress; the stored cursor
        // keeps the replay watermark from moving backwards.
        let stored_cursor = cursors.read(user_id, device_id).await?;
        let effective_since = last_sync_version.max(stored_cursor);

        tracing::debug!(
            user_id = user_id,
            device_id = %device_id,
            operations = operations.len(),
            since = effective_since,
            "Applying sync batch"
        );

        let versions = allocator.allocate_block(user_id, operations.len()).await?;

        let mut server_version = 0;
        let mut conflicts = Vec::new();

        for (op, version) in operations.iter().zip(versions) {
            match self.apply_operation(user_id, op, version).await? {
                OpOutcome::Applied => server_version = version,
                OpOutcome::Skipped => {}
                OpOutcome::Conflict(conflict) => conflicts.push(conflict),
            }
        }

        let entries = log.entries_since(user_id, effective_since).await?;
        let replayed: Vec<LogOperation> = entries.into_iter().map(LogOperation::from).collect();

        if let Some(last) = replayed.last() {
            server_version = last.version;
        }

        cursors.advance(user_id, device_id, server_version).await?;

        Ok(BatchSyncResponse {
            server_version,
            operations: replayed,
            conflicts,
        })
    }

    /// Apply one operation and push it to the user's other devices.
    ///
    /// Unlike the batch path, a conflict here rejects the request
    /// outright; the device cursor is left where it was so the client
    /// re-pulls the server state before retrying.
    pub async fn apply_single(
        &self,
        user_id: i64,
        device_id: &str,
        last_sync_version: i64,
        op: &ClientOperation,
    ) -> Result<SingleSyncOutcome> {
        let allocator = VersionAllocator::new(self.pool);
        let cursors = CursorRepository::new(self.pool);

        tracing::debug!(
            user_id = user_id,
            device_id = %device_id,
            action = op.action.as_str(),
            entity_id = %op.entity_id,
            "Applying single operation"
        );

        let version = allocator.next(user_id).await?;

        match self.apply_operation(user_id, op, version).await? {
            OpOutcome::Conflict(conflict) => Ok(SingleSyncOutcome::Conflict(SingleSyncResponse {
                server_version: last_sync_version,
                operation: None,
                conflict: Some(conflict),
                id_mapping: None,
            })),
            OpOutcome::Skipped => {
                cursors.advance(user_id, device_id, version).await?;
                Ok(SingleSyncOutcome::Accepted(SingleSyncResponse {
                    server_version: version,
                    operation: Some(echo_operation(op, version)),
                    conflict: None,
                    id_mapping: None,
                }))
            }
            OpOutcome::Applied => {
                cursors.advance(user_id, device_id, version).await?;

                let id_mapping = if op.is_offline_created {
                    let server_id = self.canonical_entity_id(&op.entity_id);
                    if server_id != op.entity_id {
                        Some(IdMapping {
                            client_id: op.entity_id.clone(),
                            server_id,
                        })
                    } else {
                        None
                    }
                } else {
                    None
                };

                let mut echoed = echo_operation(op, version);
                if let Some(mapping) = &id_mapping {
                    echoed.entity_id = mapping.server_id.clone();
                }

                let event = OperationEvent {
                    action: op.action,
                    entity_type: op.entity_type,
                    entity_id: echoed.entity_id.clone(),
                    collection_id: op.collection_id.clone(),
                    data: op.data.clone(),
                    version,
                    device_id: device_id.to_string(),
                    timestamp: Utc::now().to_rfc3339(),
                };
                let message = serde_json::to_string(&json!({
                    "type": "operation",
                    "data": event,
                }))?;
                self.hub.publish(user_id, &message, Some(device_id)).await;

                Ok(SingleSyncOutcome::Accepted(SingleSyncResponse {
                    server_version: version,
                    operation: Some(echoed),
                    conflict: None,
                    id_mapping,
                }))
            }
        }
    }

    /// Sync progress for one device
    pub async fn status(&self, user_id: i64, device_id: &str) -> Result<SyncStatusResponse> {
        let allocator = VersionAllocator::new(self.pool);
        let cursors = CursorRepository::new(self.pool);
        let log = SyncLogRepository::new(self.pool);

        let server_version = allocator.current(user_id).await?;
        let cursor = cursors.get(user_id, device_id).await?;
        let last_sync_version = cursor.as_ref().map(|c| c.last_sync_version).unwrap_or(0);
        let pending_operations = log.count_since(user_id, last_sync_version).await?;

        Ok(SyncStatusResponse {
            server_version,
            last_sync_version,
            last_sync_time: cursor.map(|c| c.last_sync_time),
            pending_operations,
        })
    }

    /// Canonical id for an offline-created entity.
    ///
    /// Identity for now; a server-issued id scheme would slot in here
    /// and surface to the client through `idMapping`.
    fn canonical_entity_id(&self, entity_id: &str) -> String {
        entity_id.to_string()
    }

    async fn apply_operation(
        &self,
        user_id: i64,
        op: &ClientOperation,
        version: i64,
    ) -> Result<OpOutcome> {
        match op.entity_type {
            EntityKind::Collection => self.apply_collection_operation(user_id, op, version).await,
            EntityKind::Tab => self.apply_tab_operation(user_id, op, version).await,
        }
    }

    async fn apply_collection_operation(
        &self,
        user_id: i64,
        op: &ClientOperation,
        version: i64,
    ) -> Result<OpOutcome> {
        let collections = CollectionRepository::new(self.pool);
        let log = SyncLogRepository::new(self.pool);

        match op.action {
            SyncAction::Add => {
                let Some(data) = op.data.as_ref() else {
                    return Ok(OpOutcome::Skipped);
                };
                let Some(fields) = CollectionFields::from_payload(data) else {
                    return Ok(OpOutcome::Skipped);
                };
                if collections.find(user_id, &op.entity_id).await?.is_some() {
                    return Ok(OpOutcome::Skipped);
                }

                match collections.insert(user_id, &op.entity_id, &fields, version).await? {
                    InsertOutcome::Inserted => {
                        log.append(
                            user_id,
                            SyncAction::Add,
                            EntityKind::Collection,
                            &op.entity_id,
                            None,
                            data,
                            version,
                        )
                        .await?;
                        Ok(OpOutcome::Applied)
                    }
                    // Lost a race with an identical concurrent ADD
                    InsertOutcome::AlreadyExists => Ok(OpOutcome::Skipped),
                }
            }
            SyncAction::Update => {
                let Some(data) = op.data.as_ref() else {
                    return Ok(OpOutcome::Skipped);
                };
                let Some(fields) = CollectionFields::from_payload(data) else {
                    return Ok(OpOutcome::Skipped);
                };
                let Some(existing) = collections.find(user_id, &op.entity_id).await? else {
                    return Ok(OpOutcome::Skipped);
                };

                if let Some(claimed) = op.client_version {
                    if claimed != existing.version {
                        return Ok(OpOutcome::Conflict(SyncConflict {
                            entity_type: EntityKind::Collection,
                            entity_id: op.entity_id.clone(),
                            server_data: collection_snapshot(&existing),
                            client_data: annotate_version(data, op.client_version),
                        }));
                    }
                }

                match collections
                    .update_if_version_matches(user_id, &op.entity_id, existing.version, &fields, version)
                    .await?
                {
                    CasOutcome::Applied => {
                        log.append(
                            user_id,
                            SyncAction::Update,
                            EntityKind::Collection,
                            &op.entity_id,
                            None,
                            data,
                            version,
                        )
                        .await?;
                        Ok(OpOutcome::Applied)
                    }
                    CasOutcome::VersionMismatch => Ok(OpOutcome::Conflict(SyncConflict {
                        entity_type: EntityKind::Collection,
                        entity_id: op.entity_id.clone(),
                        server_data: json!({ "version": existing.version }),
                        client_data: annotate_version(data, op.client_version),
                    })),
                }
            }
            SyncAction::Delete => {
                let Some(existing) = collections.find(user_id, &op.entity_id).await? else {
                    return Ok(OpOutcome::Skipped);
                };

                if let Some(claimed) = op.client_version {
                    if claimed != existing.version {
                        return Ok(OpOutcome::Conflict(SyncConflict {
                            entity_type: EntityKind::Collection,
                            entity_id: op.entity_id.clone(),
                            server_data: collection_snapshot(&existing),
                            client_data: claimed_version(op.client_version),
                        }));
                    }
                }

                match collections
                    .delete_if_version_matches(user_id, &op.entity_id, existing.version)
                    .await?
                {
                    DeleteOutcome::Applied => {
                        log.append(
                            user_id,
                            SyncAction::Delete,
                            EntityKind::Collection,
                            &op.entity_id,
                            None,
                            &json!({}),
                            version,
                        )
                        .await?;
                        Ok(OpOutcome::Applied)
                    }
                    // Row changed or vanished between lookup and delete
                    DeleteOutcome::VersionMismatch | DeleteOutcome::NotFound => {
                        Ok(OpOutcome::Conflict(SyncConflict {
                            entity_type: EntityKind::Collection,
                            entity_id: op.entity_id.clone(),
                            server_data: json!({ "version": existing.version }),
                            client_data: claimed_version(op.client_version),
                        }))
                    }
                }
            }
        }
    }

    async fn apply_tab_operation(
        &self,
        user_id: i64,
        op: &ClientOperation,
        version: i64,
    ) -> Result<OpOutcome> {
        let collections = CollectionRepository::new(self.pool);
        let tabs = TabRepository::new(self.pool);
        let log = SyncLogRepository::new(self.pool);

        // Tab operations are meaningless without a live parent; a client
        // may legitimately submit them before learning the collection is
        // gone, so this skips rather than errors.
        let Some(collection_id) = op.collection_id.as_deref() else {
            return Ok(OpOutcome::Skipped);
        };
        if collections.find(user_id, collection_id).await?.is_none() {
            return Ok(OpOutcome::Skipped);
        }

        match op.action {
            SyncAction::Add => {
                let Some(data) = op.data.as_ref() else {
                    return Ok(OpOutcome::Skipped);
                };
                let fields = TabFields::from_payload(data);
                if tabs.find(user_id, collection_id, &op.entity_id).await?.is_some() {
                    return Ok(OpOutcome::Skipped);
                }

                match tabs
                    .insert(user_id, collection_id, &op.entity_id, &fields, version)
                    .await?
                {
                    InsertOutcome::Inserted => {
                        log.append(
                            user_id,
                            SyncAction::Add,
                            EntityKind::Tab,
                            &op.entity_id,
                            Some(collection_id),
                            data,
                            version,
                        )
                        .await?;
                        Ok(OpOutcome::Applied)
                    }
                    InsertOutcome::AlreadyExists => Ok(OpOutcome::Skipped),
                }
            }
            SyncAction::Update => {
                let Some(data) = op.data.as_ref() else {
                    return Ok(OpOutcome::Skipped);
                };
                let fields = TabFields::from_payload(data);
                let Some(existing) = tabs.find(user_id, collection_id, &op.entity_id).await? else {
                    return Ok(OpOutcome::Skipped);
                };

                if let Some(claimed) = op.client_version {
                    if claimed != existing.version {
                        return Ok(OpOutcome::Conflict(SyncConflict {
                            entity_type: EntityKind::Tab,
                            entity_id: op.entity_id.clone(),
                            server_data: tab_snapshot(&existing),
                            client_data: annotate_version(data, op.client_version),
                        }));
                    }
                }

                match tabs
                    .update_if_version_matches(
                        user_id,
                        collection_id,
                        &op.entity_id,
                        existing.version,
                        &fields,
                        version,
                    )
                    .await?
                {
                    CasOutcome::Applied => {
                        log.append(
                            user_id,
                            SyncAction::Update,
                            EntityKind::Tab,
                            &op.entity_id,
                            Some(collection_id),
                            data,
                            version,
                        )
                        .await?;
                        Ok(OpOutcome::Applied)
                    }
                    CasOutcome::VersionMismatch => Ok(OpOutcome::Conflict(SyncConflict {
                        entity_type: EntityKind::Tab,
                        entity_id: op.entity_id.clone(),
                        server_data: json!({ "version": existing.version }),
                        client_data: annotate_version(data, op.client_version),
                    })),
                }
            }
            SyncAction::Delete => {
                let Some(existing) = tabs.find(user_id, collection_id, &op.entity_id).await? else {
                    return Ok(OpOutcome::Skipped);
                };

                if let Some(claimed) = op.client_version {
                    if claimed != existing.version {
                        return Ok(OpOutcome::Conflict(SyncConflict {
                            entity_type: EntityKind::Tab,
                            entity_id: op.entity_id.clone(),
                            server_data: tab_snapshot(&existing),
                            client_data: claimed_version(op.client_version),
                        }));
                    }
                }

                match tabs
                    .delete_if_version_matches(user_id, collection_id, &op.entity_id, existing.version)
                    .await?
                {
                    DeleteOutcome::Applied => {
                        log.append(
                            user_id,
                            SyncAction::Delete,
                            EntityKind::Tab,
                            &op.entity_id,
                            Some(collection_id),
                            &json!({}),
                            version,
                        )
                        .await?;
                        Ok(OpOutcome::Applied)
                    }
                    DeleteOutcome::VersionMismatch | DeleteOutcome::NotFound => {
                        Ok(OpOutcome::Conflict(SyncConflict {
                            entity_type: EntityKind::Tab,
                            entity_id: op.entity_id.clone(),
                            server_data: json!({ "version": existing.version }),
                            client_data: claimed_version(op.client_version),
                        }))
                    }
                }
            }
        }
    }
}

/// Echo an accepted operation back with its assigned version
fn echo_operation(op: &ClientOperation, version: i64) -> LogOperation {
    LogOperation {
        id: version,
        action: op.action,
        entity_type: op.entity_type,
        entity_id: op.entity_id.clone(),
        collection_id: op.collection_id.clone(),
        data: op.data.clone(),
        version,
        timestamp: None,
    }
}

/// Server-side snapshot of a collection for conflict reports
fn collection_snapshot(collection: &Collection) -> Value {
    json!({
        "version": collection.version,
        "title": collection.title,
        "order_num": collection.order_num,
    })
}

/// Server-side snapshot of a tab for conflict reports
fn tab_snapshot(tab: &Tab) -> Value {
    json!({
        "version": tab.version,
        "title": tab.title,
        "url": tab.url,
        "favicon": tab.favicon,
        "sort_order": tab.sort_order,
    })
}

/// Client payload annotated with the version it claimed
fn annotate_version(data: &Value, claimed: Option<i64>) -> Value {
    let mut map = match data {
        Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };
    if let Some(v) = claimed {
        map.insert("version".to_string(), Value::from(v));
    }
    Value::Object(map)
}

/// Just the claimed version, for deletes that carry no payload
fn claimed_version(claimed: Option<i64>) -> Value {
    match claimed {
        Some(v) => json!({ "version": v }),
        None => json!({}),
    }
}
