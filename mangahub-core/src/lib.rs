//! # mangahub-core: Reading-progress domain for MangaHub
//!
//! Value types shared by every broadcast domain, the persistence
//! collaborator interface, and the offline reconciliation merge.
//!
//! ```text
//! ┌──────────────┐  ProgressUpdate   ┌──────────────────┐
//! │ device       │ ────────────────► │ ProgressStore    │
//! └──────┬───────┘                   │ (load / save)    │
//!        │ local snapshot            └────────┬─────────┘
//!        ▼                                    │ remote snapshot
//! ┌──────────────────────────────────────────┴─┐
//! │ merge(): last-writer-wins on updated_at    │
//! │   → apply_to_local / apply_to_remote        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`progress`]: `ProgressRecord`, `ProgressUpdate`, `ReadingStatus`
//! - [`notification`]: `NotificationPayload`
//! - [`chat`]: `ChatMessage`, `ChatIdentity`
//! - [`store`]: `ProgressStore` trait and the in-memory store
//! - [`merge`]: reconciliation of two library snapshots

pub mod chat;
pub mod merge;
pub mod notification;
pub mod progress;
pub mod store;

pub use chat::{ChatIdentity, ChatMessage};
pub use merge::{absorb, merge, reconcile_stores, MergeOutcome, ReconcileReport};
pub use notification::NotificationPayload;
pub use progress::{ProgressError, ProgressRecord, ProgressUpdate, ReadingStatus};
pub use store::{persist_update, MemoryStore, ProgressStore, StoreError};

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
