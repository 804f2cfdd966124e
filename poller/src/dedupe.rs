use crate::model::{Marker, TriggerItem};
use std::collections::HashSet;
use trigger_core::{Error, Result};

/// The rule for deciding which fetched items are new, given the previous
/// marker. A closed set of two variants; connectors pick one at
/// configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupeStrategy {
    /// New iff the item's timestamp is strictly greater than the marker.
    /// Sources that can emit several items at the same instant must use
    /// `Identity` instead, because equal-timestamp items are dropped.
    Timebased,
    /// New iff the item's identifier is not in the remembered set. The set
    /// keeps at most `capacity` identifiers, oldest insertions evicted
    /// first.
    Identity { capacity: usize },
}

/// Result of filtering one batch. `next_marker` is `None` when the cycle
/// leaves the previous marker unchanged and nothing needs persisting.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub new_items: Vec<TriggerItem>,
    pub next_marker: Option<Marker>,
}

impl DedupeStrategy {
    /// Pure: decides which items of `batch` are new and computes the next
    /// marker. All persistence is the caller's job.
    pub fn filter(
        &self,
        previous: Option<&Marker>,
        batch: Vec<TriggerItem>,
    ) -> Result<FilterOutcome> {
        match self {
            DedupeStrategy::Timebased => filter_timebased(previous, batch),
            DedupeStrategy::Identity { capacity } => filter_identity(previous, batch, *capacity),
        }
    }
}

fn filter_timebased(previous: Option<&Marker>, batch: Vec<TriggerItem>) -> Result<FilterOutcome> {
    let last_seen = match previous {
        None => None,
        Some(Marker::Timestamp { last_epoch_ms }) => Some(*last_epoch_ms),
        Some(Marker::SeenIds { .. }) => {
            return Err(Error::Config(
                "persisted marker does not match the timebased strategy".to_string(),
            ))
        }
    };

    let mut max_ts = last_seen;
    let mut new_items = Vec::new();

    for item in batch {
        let ts = item.epoch_ms.ok_or_else(|| {
            Error::Config("timebased strategy requires a timestamp on every item".to_string())
        })?;

        if max_ts.map_or(true, |m| ts > m) {
            max_ts = Some(ts);
        }

        // Equal timestamps count as already seen.
        if last_seen.map_or(true, |m| ts > m) {
            new_items.push(item);
        }
    }

    let next_marker = match (max_ts, last_seen) {
        (Some(max), Some(prev)) if max > prev => Some(Marker::Timestamp { last_epoch_ms: max }),
        (Some(max), None) => Some(Marker::Timestamp { last_epoch_ms: max }),
        // Empty batch, or nothing newer than the marker: leave it alone.
        _ => None,
    };

    Ok(FilterOutcome {
        new_items,
        next_marker,
    })
}

fn filter_identity(
    previous: Option<&Marker>,
    batch: Vec<TriggerItem>,
    capacity: usize,
) -> Result<FilterOutcome> {
    let mut ids: Vec<String> = match previous {
        None => Vec::new(),
        Some(Marker::SeenIds { ids }) => ids.clone(),
        Some(Marker::Timestamp { .. }) => {
            return Err(Error::Config(
                "persisted marker does not match the identity strategy".to_string(),
            ))
        }
    };

    let mut remembered: HashSet<String> = ids.iter().cloned().collect();
    let mut new_items = Vec::new();

    for item in batch {
        let id = item.id.clone().ok_or_else(|| {
            Error::Config("identity strategy requires an identifier on every item".to_string())
        })?;

        if remembered.insert(id.clone()) {
            ids.push(id);
            new_items.push(item);
        }
    }

    if new_items.is_empty() {
        return Ok(FilterOutcome {
            new_items,
            next_marker: None,
        });
    }

    // Insertion-order eviction once the remembered set exceeds capacity.
    if ids.len() > capacity {
        ids.drain(..ids.len() - capacity);
    }

    Ok(FilterOutcome {
        new_items,
        next_marker: Some(Marker::SeenIds { ids }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn ts_item(id: u64, epoch_ms: i64) -> TriggerItem {
        TriggerItem::timebased(epoch_ms, json!({ "id": id }))
    }

    fn id_item(id: &str) -> TriggerItem {
        TriggerItem::identity(id, json!({ "id": id }))
    }

    fn ids_of(items: &[TriggerItem]) -> Vec<String> {
        items.iter().map(|i| i.id.clone().unwrap()).collect()
    }

    #[test]
    fn timebased_first_run_admits_whole_batch() {
        let batch = vec![ts_item(1, 100), ts_item(2, 200)];
        let outcome = DedupeStrategy::Timebased.filter(None, batch.clone()).unwrap();

        assert_eq!(outcome.new_items, batch);
        assert_eq!(
            outcome.next_marker,
            Some(Marker::Timestamp { last_epoch_ms: 200 })
        );
    }

    #[test]
    fn timebased_overlapping_polls_emit_each_item_once() {
        // Poll #1: no prior marker.
        let first = DedupeStrategy::Timebased
            .filter(None, vec![ts_item(1, 100), ts_item(2, 200)])
            .unwrap();
        assert_eq!(first.new_items.len(), 2);
        let marker = first.next_marker.unwrap();
        assert_eq!(marker, Marker::Timestamp { last_epoch_ms: 200 });

        // Poll #2 overlaps with item 2.
        let second = DedupeStrategy::Timebased
            .filter(Some(&marker), vec![ts_item(2, 200), ts_item(3, 300)])
            .unwrap();
        assert_eq!(second.new_items, vec![ts_item(3, 300)]);
        assert_eq!(
            second.next_marker,
            Some(Marker::Timestamp { last_epoch_ms: 300 })
        );
    }

    #[test]
    fn timebased_equal_timestamp_counts_as_seen() {
        let marker = Marker::Timestamp { last_epoch_ms: 200 };
        let outcome = DedupeStrategy::Timebased
            .filter(Some(&marker), vec![ts_item(9, 200)])
            .unwrap();

        assert!(outcome.new_items.is_empty());
        assert_eq!(outcome.next_marker, None);
    }

    #[test]
    fn timebased_empty_batch_leaves_marker_unchanged() {
        let marker = Marker::Timestamp { last_epoch_ms: 500 };
        let outcome = DedupeStrategy::Timebased
            .filter(Some(&marker), vec![])
            .unwrap();

        assert!(outcome.new_items.is_empty());
        assert_eq!(outcome.next_marker, None);
    }

    #[test]
    fn timebased_replay_of_consumed_batch_is_idempotent() {
        let batch = vec![ts_item(1, 100), ts_item(2, 200)];
        let first = DedupeStrategy::Timebased.filter(None, batch.clone()).unwrap();
        let marker = first.next_marker.unwrap();

        let replay = DedupeStrategy::Timebased
            .filter(Some(&marker), batch)
            .unwrap();
        assert!(replay.new_items.is_empty());
        assert_eq!(replay.next_marker, None);
    }

    #[test]
    fn timebased_rejects_items_without_timestamps() {
        let item = TriggerItem::identity("a", json!({}));
        let err = DedupeStrategy::Timebased.filter(None, vec![item]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn timebased_rejects_mismatched_marker_shape() {
        let marker = Marker::SeenIds { ids: vec![] };
        let err = DedupeStrategy::Timebased
            .filter(Some(&marker), vec![ts_item(1, 100)])
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn identity_eviction_is_insertion_ordered() {
        let strategy = DedupeStrategy::Identity { capacity: 2 };

        let first = strategy
            .filter(None, vec![id_item("a"), id_item("b"), id_item("c")])
            .unwrap();
        assert_eq!(ids_of(&first.new_items), vec!["a", "b", "c"]);
        let marker = first.next_marker.unwrap();
        // a was the oldest insertion and is evicted.
        assert_eq!(
            marker,
            Marker::SeenIds {
                ids: vec!["b".into(), "c".into()]
            }
        );

        // a comes back as new; b is still remembered.
        let second = strategy
            .filter(Some(&marker), vec![id_item("a"), id_item("b")])
            .unwrap();
        assert_eq!(ids_of(&second.new_items), vec!["a"]);
        assert_eq!(
            second.next_marker,
            Some(Marker::SeenIds {
                ids: vec!["c".into(), "a".into()]
            })
        );
    }

    #[test]
    fn identity_duplicate_within_one_batch_emits_once() {
        let strategy = DedupeStrategy::Identity { capacity: 8 };
        let outcome = strategy
            .filter(None, vec![id_item("x"), id_item("x"), id_item("y")])
            .unwrap();

        assert_eq!(ids_of(&outcome.new_items), vec!["x", "y"]);
    }

    #[test]
    fn identity_all_seen_leaves_marker_unchanged() {
        let marker = Marker::SeenIds {
            ids: vec!["a".into(), "b".into()],
        };
        let outcome = DedupeStrategy::Identity { capacity: 4 }
            .filter(Some(&marker), vec![id_item("a"), id_item("b")])
            .unwrap();

        assert!(outcome.new_items.is_empty());
        assert_eq!(outcome.next_marker, None);
    }

    proptest! {
        /// nextMarker is the maximum timestamp over batch and previous
        /// marker, and never moves backward.
        #[test]
        fn timebased_marker_is_max_and_monotonic(
            prev in proptest::option::of(0i64..1_000_000),
            stamps in proptest::collection::vec(0i64..1_000_000, 0..32),
        ) {
            let previous = prev.map(|last_epoch_ms| Marker::Timestamp { last_epoch_ms });
            let batch: Vec<_> = stamps.iter()
                .enumerate()
                .map(|(i, &ts)| ts_item(i as u64, ts))
                .collect();

            let outcome = DedupeStrategy::Timebased
                .filter(previous.as_ref(), batch)
                .unwrap();

            let expected_max = stamps.iter().copied().chain(prev).max();
            match outcome.next_marker {
                Some(Marker::Timestamp { last_epoch_ms }) => {
                    prop_assert_eq!(Some(last_epoch_ms), expected_max);
                    if let Some(p) = prev {
                        prop_assert!(last_epoch_ms >= p);
                    }
                }
                None => {
                    // Unchanged: nothing in the batch was newer.
                    prop_assert_eq!(expected_max, prev);
                }
                Some(Marker::SeenIds { .. }) => prop_assert!(false, "wrong marker shape"),
            }
        }

        /// Every emitted item is strictly newer than the previous marker;
        /// nothing at or below it slips through.
        #[test]
        fn timebased_emits_only_strictly_newer_items(
            prev in 0i64..1_000_000,
            stamps in proptest::collection::vec(0i64..1_000_000, 0..32),
        ) {
            let previous = Marker::Timestamp { last_epoch_ms: prev };
            let batch: Vec<_> = stamps.iter()
                .enumerate()
                .map(|(i, &ts)| ts_item(i as u64, ts))
                .collect();

            let outcome = DedupeStrategy::Timebased
                .filter(Some(&previous), batch)
                .unwrap();

            for item in &outcome.new_items {
                prop_assert!(item.epoch_ms.unwrap() > prev);
            }
            let expected: usize = stamps.iter().filter(|&&ts| ts > prev).count();
            prop_assert_eq!(outcome.new_items.len(), expected);
        }

        /// The remembered set never exceeds capacity, however many distinct
        /// identifiers flow through.
        #[test]
        fn identity_set_is_capacity_bounded(
            capacity in 1usize..16,
            ids in proptest::collection::vec("[a-z]{1,8}", 0..64),
        ) {
            let strategy = DedupeStrategy::Identity { capacity };
            let batch: Vec<_> = ids.iter().map(|id| id_item(id)).collect();

            let outcome = strategy.filter(None, batch).unwrap();
            if let Some(Marker::SeenIds { ids }) = outcome.next_marker {
                prop_assert!(ids.len() <= capacity);
            }
        }
    }
}
