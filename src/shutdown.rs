//! Cooperative shutdown signalling.
//!
//! A [`ShutdownHandle`] is the only way to cancel a running scheduler. Requesting
//! shutdown sets a one-shot flag: the loop stops producing, drains what is
//! already queued, and stops every node once the queues are empty or the drain
//! budget runs out. The first request fixes the budget; later requests change
//! nothing.

use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// When shutdown was requested and how long draining may take.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ShutdownRequest {
  /// Time of the first request.
  pub requested_at: Instant,
  /// Drain budget.
  pub timeout: Duration,
}

impl ShutdownRequest {
  /// Point after which draining is abandoned.
  pub fn deadline(&self) -> Instant {
    self.requested_at + self.timeout
  }
}

/// Cloneable handle that requests scheduler shutdown.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
  request: Arc<OnceLock<ShutdownRequest>>,
  token: CancellationToken,
  default_timeout: Duration,
}

impl ShutdownHandle {
  pub(crate) fn new(default_timeout: Duration) -> Self {
    Self {
      request: Arc::new(OnceLock::new()),
      token: CancellationToken::new(),
      default_timeout,
    }
  }

  /// Requests a graceful drain with the given budget, or the scheduler's
  /// configured `shutdown_timeout` when `None`. Idempotent.
  pub fn shutdown(&self, timeout: Option<Duration>) {
    let timeout = timeout.unwrap_or(self.default_timeout);
    let mut first = false;
    self.request.get_or_init(|| {
      first = true;
      ShutdownRequest {
        requested_at: Instant::now(),
        timeout,
      }
    });
    if first {
      info!(?timeout, "shutdown requested");
    } else {
      debug!("shutdown already requested");
    }
    self.token.cancel();
  }

  /// Whether shutdown has been requested.
  pub fn is_requested(&self) -> bool {
    self.request.get().is_some()
  }

  /// The first request, if any.
  pub fn request(&self) -> Option<ShutdownRequest> {
    self.request.get().copied()
  }

  /// Completes once shutdown has been requested.
  pub async fn requested(&self) {
    self.token.cancelled().await
  }
}
