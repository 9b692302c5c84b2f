//! Scheduler configuration.
//!
//! [`SchedulerConfig`] collects the tunables of the tick loop. It is plain data:
//! build it with `with_*` methods or deserialize it with serde from whatever
//! configuration source the embedding application uses. Durations are encoded
//! as integer milliseconds.
//!
//! ```rust
//! use std::time::Duration;
//! use weavecore::config::{FairnessRatio, SchedulerConfig};
//!
//! let config = SchedulerConfig::default()
//!     .with_fairness(FairnessRatio::new(4, 8, 2))
//!     .with_max_batch_per_node(16)
//!     .with_idle_sleep(Duration::from_millis(2));
//! assert!(config.validate().is_ok());
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-tick service quotas for the three traffic classes.
///
/// Each tick services at most `control` edges whose head message is CONTROL,
/// then at most `data` edges whose head is DATA, then calls `on_tick` on at
/// most `management` idle nodes. Within a class, service rotates round-robin.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessRatio {
  /// Data edges serviced per tick.
  pub data: u32,
  /// Control edges serviced per tick.
  pub control: u32,
  /// Self-paced `on_tick` invocations per tick.
  pub management: u32,
}

impl FairnessRatio {
  /// Creates a ratio from `(data, control, management)` weights.
  pub const fn new(data: u32, control: u32, management: u32) -> Self {
    Self {
      data,
      control,
      management,
    }
  }

  /// Checks every weight is positive.
  pub fn validate(&self) -> Result<(), ConfigError> {
    for (class, weight) in [
      ("data", self.data),
      ("control", self.control),
      ("management", self.management),
    ] {
      if weight == 0 {
        return Err(ConfigError::ZeroWeight { class });
      }
    }
    Ok(())
  }
}

impl Default for FairnessRatio {
  fn default() -> Self {
    Self::new(8, 8, 8)
  }
}

/// Tunables of the scheduler loop.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Service quotas per traffic class.
  pub fairness: FairnessRatio,
  /// Minimum spacing between the starts of two busy ticks. Zero runs them
  /// back-to-back, yielding to the runtime in between.
  #[serde(with = "millis")]
  pub tick_interval: Duration,
  /// Most messages delivered to one node in one tick.
  pub max_batch_per_node: usize,
  /// Back-off after a tick with no work.
  #[serde(with = "millis")]
  pub idle_sleep: Duration,
  /// Drain budget used when shutdown is requested without an explicit timeout.
  #[serde(with = "millis")]
  pub shutdown_timeout: Duration,
  /// Request shutdown after this long without work. `None` runs until told.
  #[serde(with = "opt_millis")]
  pub idle_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      fairness: FairnessRatio::default(),
      tick_interval: Duration::ZERO,
      max_batch_per_node: 32,
      idle_sleep: Duration::from_millis(5),
      shutdown_timeout: Duration::from_secs(5),
      idle_timeout: None,
    }
  }
}

impl SchedulerConfig {
  /// Sets the fairness ratio.
  pub fn with_fairness(mut self, fairness: FairnessRatio) -> Self {
    self.fairness = fairness;
    self
  }

  /// Sets the tick interval.
  pub fn with_tick_interval(mut self, interval: Duration) -> Self {
    self.tick_interval = interval;
    self
  }

  /// Sets the per-node batch cap.
  pub fn with_max_batch_per_node(mut self, n: usize) -> Self {
    self.max_batch_per_node = n;
    self
  }

  /// Sets the idle back-off.
  pub fn with_idle_sleep(mut self, sleep: Duration) -> Self {
    self.idle_sleep = sleep;
    self
  }

  /// Sets the default shutdown drain budget.
  pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
    self.shutdown_timeout = timeout;
    self
  }

  /// Sets (or clears) the idle timeout.
  pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.idle_timeout = timeout;
    self
  }

  /// Rejects zero batch sizes and zero weights.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.max_batch_per_node == 0 {
      return Err(ConfigError::ZeroBatch);
    }
    self.fairness.validate()
  }
}

mod millis {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    u64::deserialize(d).map(Duration::from_millis)
  }
}

mod opt_millis {
  use serde::{Deserialize, Deserializer, Serializer};
  use std::time::Duration;

  pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
      Some(d) => s.serialize_some(&(d.as_millis() as u64)),
      None => s.serialize_none(),
    }
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
    Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
  }
}
