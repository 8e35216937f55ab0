//! In-memory staging store with TTL and simulated replication lag

use std::{
  sync::Arc,
  time::{Duration, Instant},
};

use moka::{Expiry, sync::Cache};

use super::{StagingError, StagingStore};

/// How quickly a write becomes visible to eventually-consistent reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Replication {
  #[default]
  Immediate,
  /// Visible to eventual reads this long after the write
  Lagged(Duration),
  /// Only ever visible to quorum reads
  Stalled,
}

#[derive(Debug, Clone)]
struct StagedValue {
  value: Arc<String>,
  ttl: Duration,
  /// `None` when the write never replicates
  replicated_at: Option<Instant>,
}

struct TtlExpiry;

impl Expiry<String, StagedValue> for TtlExpiry {
  fn expire_after_create(&self, _key: &String, value: &StagedValue, _created_at: Instant) -> Option<Duration> {
    Some(value.ttl)
  }
}

/// Staging store backed by a moka cache.
///
/// Entries expire after their TTL. Quorum reads always see the latest write;
/// eventual reads only see it once the configured replication lag has passed.
#[derive(Clone)]
pub struct InMemoryStagingStore {
  entries: Cache<String, StagedValue>,
  replication: Replication,
}

impl InMemoryStagingStore {
  pub fn new() -> Self {
    Self::with_replication(Replication::Immediate)
  }

  pub fn with_replication(replication: Replication) -> Self {
    Self {
      entries: Cache::builder().expire_after(TtlExpiry).build(),
      replication,
    }
  }

  /// Drop a key everywhere, simulating a lost write
  pub fn remove(&self, key: &str) {
    self.entries.invalidate(key);
  }

  pub fn entry_count(&self) -> u64 {
    self.entries.run_pending_tasks();
    self.entries.entry_count()
  }
}

impl Default for InMemoryStagingStore {
  fn default() -> Self {
    Self::new()
  }
}

impl StagingStore for InMemoryStagingStore {
  fn put_string(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StagingError> {
    let now = Instant::now();
    let replicated_at = match self.replication {
      Replication::Immediate => Some(now),
      Replication::Lagged(lag) => now.checked_add(lag),
      Replication::Stalled => None,
    };

    self.entries.insert(
      key.to_string(),
      StagedValue {
        value: Arc::new(value.to_string()),
        ttl: Duration::from_secs(ttl_secs),
        replicated_at,
      },
    );
    Ok(())
  }

  fn get_string(&self, key: &str) -> Result<Option<String>, StagingError> {
    let now = Instant::now();
    Ok(
      self
        .entries
        .get(key)
        .filter(|staged| staged.replicated_at.is_some_and(|at| at <= now))
        .map(|staged| staged.value.as_ref().clone()),
    )
  }

  fn get_string_high_consistency(&self, key: &str) -> Result<Option<String>, StagingError> {
    Ok(self.entries.get(key).map(|staged| staged.value.as_ref().clone()))
  }
}
