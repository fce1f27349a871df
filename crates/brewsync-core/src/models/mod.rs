//! Data models for brewsync

mod collection;

pub use collection::{CollectionName, CollectionsBundle, Payload};
