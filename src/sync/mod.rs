//! Sync module for multi-device synchronization
//!
//! Provides:
//! - Per-user monotonic version allocation over an append-only log
//! - Optimistic-concurrency conflict detection
//! - Batch and single-operation sync protocols with catch-up replay
//!
//! # Sync Protocol
//!
//! 1. Client sends a batch of operations with its `lastSyncVersion`
//! 2. Server applies each operation, checking claimed versions against
//!    current entity versions
//! 3. Conflicting operations are reported back; the rest apply
//! 4. Server replays every logged operation the device has not seen
//!    and advances the device cursor
//!
//! # Conflict Handling
//!
//! The server never merges. A conflict carries the server's current
//! snapshot next to the client's submission so the client can decide.

mod engine;
mod types;

pub use engine::{SingleSyncOutcome, SyncEngine};
pub use types::{
    BatchSyncRequest, BatchSyncResponse, ClientOperation, EntityKind, IdMapping, LogOperation,
    OperationEvent, SingleSyncRequest, SingleSyncResponse, SyncAction, SyncConflict,
    SyncStatusResponse,
};
