//! Per-collection synchronization between the UI runtime and the remote store.

mod controller;

pub use controller::{CollectionSyncController, SyncContext, SyncControllers, WriteOutcome};
