//! # Shutdown Handle Test Suite

use crate::shutdown::ShutdownHandle;
use std::time::Duration;

#[test]
fn test_not_requested_initially() {
  let handle = ShutdownHandle::new(Duration::from_secs(5));
  assert!(!handle.is_requested());
  assert!(handle.request().is_none());
}

#[test]
fn test_default_timeout_applies() {
  let handle = ShutdownHandle::new(Duration::from_secs(5));
  handle.shutdown(None);
  let request = handle.request().unwrap();
  assert_eq!(request.timeout, Duration::from_secs(5));
  assert_eq!(request.deadline(), request.requested_at + Duration::from_secs(5));
}

#[test]
fn test_first_request_wins() {
  let handle = ShutdownHandle::new(Duration::from_secs(5));
  let clone = handle.clone();
  clone.shutdown(Some(Duration::from_millis(50)));
  let first = handle.request().unwrap();
  handle.shutdown(Some(Duration::from_secs(60)));
  handle.shutdown(None);
  assert_eq!(handle.request(), Some(first));
  assert_eq!(first.timeout, Duration::from_millis(50));
}

#[tokio::test]
async fn test_requested_completes_across_tasks() {
  let handle = ShutdownHandle::new(Duration::from_secs(1));
  let waiter = {
    let handle = handle.clone();
    tokio::spawn(async move { handle.requested().await })
  };
  tokio::task::yield_now().await;
  assert!(!waiter.is_finished());
  handle.shutdown(None);
  tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .unwrap()
    .unwrap();
}
