//! Backend Profile Registry
//!
//! The static description of every configured backend: capacity ceiling,
//! call budget, and the relative speed / quality / cost ranks the selection
//! policy scores with.
//!
//! # Reload Semantics
//!
//! The table is held as an `Arc<BTreeMap>` behind a lock that is only taken
//! long enough to clone or replace the `Arc`. A reload validates the complete
//! new table first and swaps it in one store, so readers observe either the
//! old table or the new one. A rejected reload leaves the old table in place.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Lowest allowed rank
pub const MIN_SCORE: u8 = 1;

/// Highest allowed rank
pub const MAX_SCORE: u8 = 10;

// ============================================================================
// Backend Profile
// ============================================================================

/// Static description of one backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendProfile {
    /// Unique symbolic name (e.g. "fast-a")
    pub id: String,

    /// Relative speed, 1 (slowest) to 10 (fastest)
    pub speed_score: u8,

    /// Relative answer quality, 1 to 10
    pub quality_score: u8,

    /// Relative cost, 1 (cheapest) to 10 (most expensive)
    pub cost_score: u8,

    /// Largest prompt, in tokens, the backend accepts
    pub max_context_tokens: u32,

    /// Longest a single call may take
    #[serde(with = "duration_ms")]
    pub call_timeout: Duration,
}

impl BackendProfile {
    /// Create a profile with mid-range scores
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            speed_score: 5,
            quality_score: 5,
            cost_score: 5,
            max_context_tokens: 8192,
            call_timeout: Duration::from_secs(30),
        }
    }

    /// Set speed, quality, and cost ranks
    #[must_use]
    pub fn with_scores(mut self, speed: u8, quality: u8, cost: u8) -> Self {
        self.speed_score = speed;
        self.quality_score = quality;
        self.cost_score = cost;
        self
    }

    /// Set the context ceiling
    #[must_use]
    pub fn with_max_context_tokens(mut self, tokens: u32) -> Self {
        self.max_context_tokens = tokens;
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Check the profile's own invariants
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }

        for (field, value) in [
            ("speed_score", self.speed_score),
            ("quality_score", self.quality_score),
            ("cost_score", self.cost_score),
        ] {
            if !(MIN_SCORE..=MAX_SCORE).contains(&value) {
                return Err(RegistryError::ScoreOutOfRange {
                    id: self.id.clone(),
                    field,
                    value,
                });
            }
        }

        if self.max_context_tokens == 0 {
            return Err(RegistryError::ZeroCapacity(self.id.clone()));
        }

        if self.call_timeout.is_zero() {
            return Err(RegistryError::ZeroTimeout(self.id.clone()));
        }

        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Rejected registry operations
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Lookup of an id that is not in the table
    #[error("backend '{0}' is not registered")]
    NotFound(String),

    /// Two profiles share an id
    #[error("duplicate backend id '{0}'")]
    DuplicateId(String),

    /// A profile has a blank id
    #[error("backend id must not be empty")]
    EmptyId,

    /// A rank is outside `1..=10`
    #[error("backend '{id}': {field} = {value} is outside 1..=10")]
    ScoreOutOfRange {
        /// Backend id
        id: String,
        /// Offending field
        field: &'static str,
        /// Offending value
        value: u8,
    },

    /// `max_context_tokens` is zero
    #[error("backend '{0}': max_context_tokens must be greater than zero")]
    ZeroCapacity(String),

    /// `call_timeout` is zero
    #[error("backend '{0}': call_timeout must be greater than zero")]
    ZeroTimeout(String),

    /// The table has no backends
    #[error("at least one backend must be configured")]
    Empty,
}

// ============================================================================
// Registry
// ============================================================================

type ProfileTable = BTreeMap<String, BackendProfile>;

/// Reloadable table of backend profiles
#[derive(Debug)]
pub struct BackendRegistry {
    table: RwLock<Arc<ProfileTable>>,
    generation: AtomicU64,
}

impl BackendRegistry {
    /// Build a registry from `profiles`, failing on the first invalid entry
    pub fn new(profiles: impl IntoIterator<Item = BackendProfile>) -> Result<Self, RegistryError> {
        let table = Self::build_table(profiles)?;
        Ok(Self {
            table: RwLock::new(Arc::new(table)),
            generation: AtomicU64::new(0),
        })
    }

    fn build_table(
        profiles: impl IntoIterator<Item = BackendProfile>,
    ) -> Result<ProfileTable, RegistryError> {
        let mut table = ProfileTable::new();
        for profile in profiles {
            profile.validate()?;
            if table.contains_key(&profile.id) {
                return Err(RegistryError::DuplicateId(profile.id));
            }
            table.insert(profile.id.clone(), profile);
        }

        if table.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(table)
    }

    /// All profiles, ordered by id
    #[must_use]
    pub fn list(&self) -> Vec<BackendProfile> {
        self.current().values().cloned().collect()
    }

    /// Profile for `id`
    pub fn get(&self, id: &str) -> Result<BackendProfile, RegistryError> {
        self.current()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.current().contains_key(id)
    }

    /// Number of registered backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.current().len()
    }

    /// Always false for a constructed registry; present for API symmetry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current().is_empty()
    }

    /// Consistent view of the whole table
    ///
    /// Holding the returned `Arc` pins that version even across a reload.
    #[must_use]
    pub fn current(&self) -> Arc<ProfileTable> {
        Arc::clone(&*self.table.read())
    }

    /// Replace the whole table, or leave it untouched if `profiles` is invalid
    pub fn reload(
        &self,
        profiles: impl IntoIterator<Item = BackendProfile>,
    ) -> Result<(), RegistryError> {
        let table = match Self::build_table(profiles) {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected backend registry reload");
                return Err(e);
            }
        };

        let count = table.len();
        *self.table.write() = Arc::new(table);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::info!(backends = count, generation, "Backend registry reloaded");
        Ok(())
    }

    /// Number of successful reloads since construction
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}
