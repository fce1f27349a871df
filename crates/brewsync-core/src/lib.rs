//! brewsync-core - Core library for brewsync
//!
//! Keeps the brewery client's three collections (reservations, brews,
//! inventories) in sync with a remote store: session gating, store adapters,
//! per-collection sync controllers, the UI message bridge and the bootstrap
//! sequence that wires them together.

pub mod auth;
pub mod bootstrap;
pub mod bridge;
pub mod config;
pub mod error;
pub mod models;
pub mod report;
pub mod store;
pub mod sync;
mod util;

pub use bootstrap::{Bootstrap, BridgeHandle, InitFlags, UiChannels, UiRuntime, SEED_BOUND};
pub use error::{Error, Result};
pub use models::{CollectionName, CollectionsBundle, Payload};
pub use report::{ErrorReporter, SyncFailure};
