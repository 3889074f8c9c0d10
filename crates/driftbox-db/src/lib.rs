//! Driftbox persistent store
//!
//! [`TransferStore`] is the durable contract shared by the transfer queue and anything else
//! that observes transfer progress. [`SqliteTransferStore`] is the bundled implementation.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteTransferStore;
pub use store::{StoreError, StoreHandle, StoreResolver, StoreResult, TransferStore};
