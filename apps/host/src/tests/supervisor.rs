// Unit tests for the local view delta fold

use crate::supervisor::apply_delta;

use common::item::{Item, status_label};

fn item(id: u64, progress: f64) -> Item {
    Item {
        id,
        name: format!("entry {id}"),
        status: status_label(progress),
        progress,
        error: None,
    }
}

/// **VALUE**: Verifies a delta replaces known items in place and appends
/// new ones, keeping the view ordered by id.
///
/// **WHY THIS MATTERS**: The view is what the host shows and builds its
/// next baseline from; a mis-folded delta makes the next ping ask for the
/// wrong thing and the session drifts.
///
/// **BUG THIS CATCHES**: Would catch updates being appended as duplicates
/// instead of replacing their item.
#[test]
fn given_mixed_delta_when_applied_then_updates_replace_and_new_items_append() {
    // GIVEN: A view tracking two items
    let mut view = vec![item(1, 0.0), item(2, 0.25)];

    // WHEN: A delta updates item 1 and introduces item 3
    apply_delta(&mut view, vec![item(3, 0.0), item(1, 0.5)]);

    // THEN: Item 1 is replaced, item 3 appended, order by id
    assert_eq!(view.len(), 3);
    assert_eq!(view[0].id, 1);
    assert_eq!(view[0].status, "50.00 %");
    assert_eq!(view[1].id, 2);
    assert_eq!(view[1].status, "25.00 %");
    assert_eq!(view[2].id, 3);
}

/// **VALUE**: Verifies an empty delta leaves the view untouched.
///
/// **WHY THIS MATTERS**: An empty-store bootstrap legitimately returns no
/// items; the fold must be a clean no-op.
///
/// **BUG THIS CATCHES**: Would catch the fold clearing or reordering the
/// view when there is nothing to apply.
#[test]
fn given_empty_delta_when_applied_then_view_unchanged() {
    let mut view = vec![item(1, 0.0)];
    let before = view.clone();

    apply_delta(&mut view, Vec::new());

    assert_eq!(view, before);
}
