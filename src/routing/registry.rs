//! Destination registry: canonical sender address → chat destination.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::ConfigError;

/// Registry key that catches every sender without an explicit mapping.
pub const WILDCARD: &str = "*";

/// Telegram chat identifier a message is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DestinationId(pub i64);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable routing table built once at startup.
#[derive(Debug, Clone)]
pub struct DestinationRegistry {
    routes: HashMap<String, DestinationId>,
    wildcard: DestinationId,
}

impl DestinationRegistry {
    /// Build the registry from raw `address -> chat id` pairs.
    ///
    /// Fails when the wildcard entry is missing or an id is not an integer.
    /// `source` names the configuration key the pairs came from.
    pub fn from_pairs<I, K, V>(pairs: I, source: &str) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut routes = HashMap::new();
        for (address, id) in pairs {
            let address = address.as_ref().trim().to_lowercase();
            let raw_id = id.as_ref().trim();
            let id = raw_id
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidDestination {
                    address: address.clone(),
                    value: raw_id.to_string(),
                })?;
            routes.insert(address, DestinationId(id));
        }

        let wildcard = routes
            .remove(WILDCARD)
            .ok_or_else(|| ConfigError::MissingWildcard {
                key: source.to_string(),
            })?;

        Ok(Self { routes, wildcard })
    }

    /// Destination for a canonical sender address, falling back to the wildcard.
    pub fn resolve(&self, canonical: &str) -> DestinationId {
        self.routes.get(canonical).copied().unwrap_or(self.wildcard)
    }

    /// The wildcard destination.
    pub fn wildcard(&self) -> DestinationId {
        self.wildcard
    }

    /// Every distinct destination, in ascending order.
    pub fn destinations(&self) -> BTreeSet<DestinationId> {
        self.routes
            .values()
            .copied()
            .chain(std::iter::once(self.wildcard))
            .collect()
    }
}
