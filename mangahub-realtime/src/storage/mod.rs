//! Durable progress storage.
//!
//! ```text
//! ┌─────────────┐  persist_update  ┌────────────────────┐
//! │ SyncServer  │ ───────────────► │ RocksProgressStore │
//! └─────────────┘                  └─────────┬──────────┘
//!                                            │
//!                                  CF "progress"
//!                                  key   user_id 0x00 manga_id
//!                                  value bincode(ProgressRecord)
//! ```
//!
//! Keys sort by user first, so one user's library is a single contiguous
//! range and `list_records` is a prefix scan.

pub mod rocks;

pub use rocks::{RocksProgressStore, StoreConfig};
