// Unit tests for the item store and the diff-wait engine

use crate::error::store::StoreError;
use crate::store::ItemStore;

use common::item::{Item, ItemKey, status_label};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

const SHORT_IDLE_RETRY: Duration = Duration::from_millis(50);
const WAIT_BUDGET: Duration = Duration::from_secs(2);

fn test_store() -> Arc<ItemStore> {
    Arc::new(ItemStore::with_idle_retry(SHORT_IDLE_RETRY))
}

/// **VALUE**: Verifies id uniqueness and `max_id` monotonicity across
/// interleaved adds and deletes.
///
/// **WHY THIS MATTERS**: Ids are the identity half of the diff-wait
/// comparison. If a deleted id were reused, a client whose baseline still
/// references the old item would silently treat a brand-new item as
/// already-known and never see it.
///
/// **BUG THIS CATCHES**: Would catch `max_id` being derived from the map
/// size or decremented on delete.
#[tokio::test]
async fn given_add_delete_sequence_when_ids_inspected_then_unique_and_monotonic() {
    // GIVEN: A store with three items
    let store = test_store();
    let first = store.add().await;
    let second = store.add().await;
    let third = store.add().await;
    assert_eq!(
        vec![first.id, second.id, third.id],
        vec![1, 2, 3],
        "ids are assigned monotonically"
    );

    // WHEN: Deleting the middle item and adding another
    store.delete(second.id).await.expect("delete existing");
    let fourth = store.add().await;

    // THEN: The freed id is never reused and max_id keeps growing
    assert_eq!(fourth.id, 4);
    assert_eq!(store.max_id().await, 4);
    let ids: Vec<u64> = store.snapshot().await.iter().map(|item| item.id).collect();
    assert_eq!(ids, vec![1, 3, 4]);
}

/// **VALUE**: Verifies an empty baseline returns the full current set
/// immediately, including the empty set.
///
/// **WHY THIS MATTERS**: A client that knows nothing yet must not block —
/// it needs the initial snapshot to build its view, and an empty store is
/// a valid snapshot.
///
/// **BUG THIS CATCHES**: Would catch the empty-baseline fast path being
/// folded into the "no delta means wait" branch, deadlocking fresh
/// clients against an empty store.
#[tokio::test]
async fn given_empty_baseline_when_diff_wait_called_then_returns_immediately() {
    let store = test_store();
    let cancel = CancellationToken::new();

    // Empty store: still returns immediately, with nothing
    let empty = timeout(Duration::from_millis(100), store.diff_wait(&[], &cancel))
        .await
        .expect("must not block")
        .expect("must not fail");
    assert!(empty.is_empty());

    // Non-empty store: returns every current item
    store.add().await;
    store.add().await;
    let all = timeout(Duration::from_millis(100), store.diff_wait(&[], &cancel))
        .await
        .expect("must not block")
        .expect("must not fail");
    assert_eq!(all.len(), 2);
}

/// **VALUE**: Verifies the reference long-poll scenario: a matching
/// baseline blocks, a mutation wakes it, and only the changed subset is
/// returned.
///
/// **WHY THIS MATTERS**: This is the central contract of the engine. The
/// host must receive exactly the changed slice (not a full snapshot)
/// within one idle-retry interval of the mutation.
///
/// **BUG THIS CATCHES**: Would catch a missed wake-up between the delta
/// check and the suspend, the delta containing unchanged items, or the
/// change signal being required for correctness instead of the retry
/// timer.
#[tokio::test]
async fn given_matching_baseline_when_item_mutates_then_returns_changed_subset() {
    // GIVEN: Two items, one of which the caller's baseline matches
    let store = test_store();
    let first = store.add().await;
    let second = store.add().await;
    let baseline = vec![
        ItemKey {
            id: first.id,
            status: status_label(0.0),
        },
        ItemKey {
            id: second.id,
            status: status_label(0.0),
        },
    ];

    // WHEN: A diff-wait is pending against the matching baseline
    let cancel = CancellationToken::new();
    let waiter = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        tokio::spawn(async move { store.diff_wait(&baseline, &cancel).await })
    };

    sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished(), "matching baseline must block");

    // AND: Item one's progress moves to 0.5
    store
        .mutate_all(|item| {
            if item.id == 1 {
                Item {
                    progress: 0.5,
                    status: status_label(0.5),
                    ..item.clone()
                }
            } else {
                item.clone()
            }
        })
        .await;

    // THEN: The pending wait yields exactly the changed item
    let delta = timeout(WAIT_BUDGET, waiter)
        .await
        .expect("must wake within the idle-retry interval")
        .expect("task must not panic")
        .expect("diff-wait must succeed");
    assert_eq!(delta.len(), 1, "only the changed subset is returned");
    assert_eq!(delta[0].id, 1);
    assert_eq!(delta[0].status, "50.00 %");
    assert!((delta[0].progress - 0.5).abs() < f64::EPSILON);
}

/// **VALUE**: Verifies a progress change below label precision does not
/// wake a pending diff-wait.
///
/// **WHY THIS MATTERS**: The comparison is over `(id, status)` pairs, and
/// status is the externally observable progress representation. Waking on
/// raw progress noise would turn the long-poll into a busy loop.
///
/// **BUG THIS CATCHES**: Would catch the delta computation comparing the
/// `progress` field instead of the derived status string.
#[tokio::test]
async fn given_status_invisible_change_when_diff_wait_pending_then_stays_blocked() {
    let store = test_store();
    let item = store.add().await;

    // GIVEN: The item sits at 50.00 % and the baseline matches it
    store
        .mutate_all(|current| Item {
            progress: 0.5,
            status: status_label(0.5),
            ..current.clone()
        })
        .await;
    let baseline = vec![ItemKey {
        id: item.id,
        status: status_label(0.5),
    }];

    let cancel = CancellationToken::new();
    let waiter = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        tokio::spawn(async move { store.diff_wait(&baseline, &cancel).await })
    };

    // WHEN: Progress moves by less than label precision
    sleep(Duration::from_millis(50)).await;
    store
        .mutate_all(|current| Item {
            progress: 0.500001,
            ..current.clone()
        })
        .await;

    // THEN: The wait is still blocked after several idle-retry rounds
    sleep(SHORT_IDLE_RETRY * 4).await;
    assert!(
        !waiter.is_finished(),
        "status-invisible change must not produce a delta"
    );

    cancel.cancel();
    let result = timeout(WAIT_BUDGET, waiter)
        .await
        .expect("cancel must unblock")
        .expect("task must not panic");
    assert!(matches!(result, Err(StoreError::Cancelled { .. })));
}

/// **VALUE**: Verifies cancellation unblocks a pending diff-wait promptly
/// with the distinct cancelled condition.
///
/// **WHY THIS MATTERS**: Server shutdown cancels all in-flight long-polls;
/// any wait that ignores the token would keep the process alive and leak
/// a blocked request.
///
/// **BUG THIS CATCHES**: Would catch the select arm for cancellation being
/// dropped, or cancellation being reported as a generic store error.
#[tokio::test]
async fn given_blocked_diff_wait_when_cancelled_then_returns_cancelled_error() {
    let store = test_store();
    let item = store.add().await;
    let baseline = vec![item.key()];

    let cancel = CancellationToken::new();
    let waiter = {
        let store = Arc::clone(&store);
        let cancel = cancel.clone();
        tokio::spawn(async move { store.diff_wait(&baseline, &cancel).await })
    };

    sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let result = timeout(Duration::from_millis(500), waiter)
        .await
        .expect("cancellation must unblock promptly")
        .expect("task must not panic");
    assert!(matches!(result, Err(StoreError::Cancelled { .. })));
}

/// **VALUE**: Verifies deleting a nonexistent id fails without touching
/// the store.
///
/// **WHY THIS MATTERS**: Not-found is a reportable request error, never
/// fatal to the store; the map must be bit-for-bit identical afterwards.
///
/// **BUG THIS CATCHES**: Would catch a delete path that inserts, clears,
/// or re-keys entries while handling the miss.
#[tokio::test]
async fn given_missing_id_when_deleted_then_not_found_and_store_unchanged() {
    let store = test_store();
    store.add().await;
    let before = store.snapshot().await;

    let result = store.delete(99).await;

    assert!(matches!(result, Err(StoreError::NotFound { .. })));
    assert_eq!(store.snapshot().await, before, "store must be unchanged");
}

/// **VALUE**: Verifies the add-then-delete round trip leaves an empty
/// store with `max_id` still at 1.
///
/// **WHY THIS MATTERS**: The id counter outlives the item, so a retired
/// id is never handed out again.
///
/// **BUG THIS CATCHES**: Would catch `max_id` being reset when the map
/// empties.
#[tokio::test]
async fn given_add_then_delete_when_store_inspected_then_empty_with_max_id_one() {
    let store = test_store();

    let item = store.add().await;
    store.delete(item.id).await.expect("delete returned id");

    assert!(store.is_empty().await);
    assert_eq!(store.max_id().await, 1);
}
