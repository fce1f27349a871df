//! Collection model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// One of the three collections kept in sync with the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionName {
    /// Table and tasting-room reservations
    Reservations,
    /// Brew logs
    Brews,
    /// Ingredient and keg inventories
    Inventories,
}

impl CollectionName {
    /// Every collection, in the order the client lists them.
    pub const ALL: [Self; 3] = [Self::Reservations, Self::Brews, Self::Inventories];

    /// Stable name used as the remote store key
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reservations => "reservations",
            Self::Brews => "brews",
            Self::Inventories => "inventories",
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reservations" => Ok(Self::Reservations),
            "brews" => Ok(Self::Brews),
            "inventories" => Ok(Self::Inventories),
            other => Err(Error::InvalidInput(format!("unknown collection '{other}'"))),
        }
    }
}

/// Serialized collection value.
///
/// The bridge never looks inside a payload: it is stored, forwarded and
/// compared as an opaque text blob. Every write replaces the previous value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(String);

impl Payload {
    /// The value a collection takes before anything was ever stored.
    #[must_use]
    pub const fn empty() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// All three collections carried together, as emitted by the client's save
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionsBundle {
    #[serde(default)]
    pub reservations: Payload,
    #[serde(default)]
    pub brews: Payload,
    #[serde(default)]
    pub inventories: Payload,
}

impl CollectionsBundle {
    #[must_use]
    pub const fn get(&self, name: CollectionName) -> &Payload {
        match name {
            CollectionName::Reservations => &self.reservations,
            CollectionName::Brews => &self.brews,
            CollectionName::Inventories => &self.inventories,
        }
    }

    pub fn set(&mut self, name: CollectionName, payload: Payload) {
        match name {
            CollectionName::Reservations => self.reservations = payload,
            CollectionName::Brews => self.brews = payload,
            CollectionName::Inventories => self.inventories = payload,
        }
    }

    /// Split the bundle into one entry per collection.
    #[must_use]
    pub fn into_entries(self) -> [(CollectionName, Payload); 3] {
        [
            (CollectionName::Reservations, self.reservations),
            (CollectionName::Brews, self.brews),
            (CollectionName::Inventories, self.inventories),
        ]
    }
}
