//! Edge overflow behaviour through the public API.

use std::sync::Arc;
use std::time::Duration;
use weavecore::{Edge, EdgeError, Endpoint, Message, OverflowPolicy, PushOutcome};

fn edge(capacity: usize, policy: OverflowPolicy) -> Edge {
  Edge::new(
    Endpoint::new("a", "out"),
    Endpoint::new("b", "in"),
    capacity,
    policy,
  )
  .unwrap()
}

fn drain(edge: &Edge) -> Vec<&'static str> {
  edge
    .pop_batch(usize::MAX)
    .iter()
    .map(|m| *m.payload_as::<&'static str>().unwrap())
    .collect()
}

#[test]
fn test_drop_keeps_queue_and_counts() {
  let edge = edge(2, OverflowPolicy::Drop);
  edge.try_push(Message::data("A")).unwrap();
  edge.try_push(Message::data("B")).unwrap();
  assert_eq!(
    edge.try_push(Message::data("C")).unwrap(),
    PushOutcome::Dropped
  );
  assert_eq!(edge.stats().snapshot().dropped, 1);
  assert_eq!(drain(&edge), vec!["A", "B"]);
}

#[test]
fn test_latest_keeps_newest() {
  let edge = edge(2, OverflowPolicy::Latest);
  for item in ["A", "B", "C"] {
    edge.try_push(Message::data(item)).unwrap();
  }
  assert_eq!(drain(&edge), vec!["B", "C"]);
}

#[test]
fn test_coalesce_aggregates() {
  #[derive(Clone, Copy, Debug, PartialEq)]
  struct Agg {
    count: u64,
    sum: i64,
    min: i64,
    max: i64,
  }

  let policy = OverflowPolicy::coalesce_typed::<Agg, _>(|a, b| Agg {
    count: a.count + b.count,
    sum: a.sum + b.sum,
    min: a.min.min(b.min),
    max: a.max.max(b.max),
  });
  let edge = edge(1, policy);
  for v in [4i64, -2, 9, 7] {
    edge
      .try_push(Message::data(Agg {
        count: 1,
        sum: v,
        min: v,
        max: v,
      }))
      .unwrap();
    assert_eq!(edge.len(), 1);
  }
  let merged = edge.pop().unwrap();
  assert_eq!(
    merged.payload_as::<Agg>(),
    Some(&Agg {
      count: 4,
      sum: 18,
      min: -2,
      max: 9,
    })
  );
}

#[tokio::test]
async fn test_block_capacity_one_preserves_order() {
  let edge = edge(1, OverflowPolicy::Block);
  let produce = async {
    for i in 0..50i64 {
      edge.push(Message::data(i)).await.unwrap();
    }
  };
  let consume = async {
    let mut seen = Vec::new();
    while seen.len() < 50 {
      assert!(edge.len() <= 1);
      match edge.pop() {
        Some(m) => seen.push(*m.payload_as::<i64>().unwrap()),
        None => tokio::task::yield_now().await,
      }
    }
    seen
  };
  let ((), seen) = futures::join!(produce, consume);
  assert_eq!(seen, (0..50).collect::<Vec<i64>>());
}

#[tokio::test]
async fn test_backpressure_timeout_leaves_queue() {
  let edge = Arc::new(edge(2, OverflowPolicy::Block));
  edge.try_push(Message::data("A")).unwrap();
  edge.try_push(Message::data("B")).unwrap();
  let err = edge
    .push_timeout(Message::data("C"), Duration::from_millis(5))
    .await
    .unwrap_err();
  assert!(matches!(err, EdgeError::BackpressureTimeout { .. }));
  assert_eq!(drain(&edge), vec!["A", "B"]);
}
