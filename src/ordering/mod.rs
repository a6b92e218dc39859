//! Position maintenance for ordered sibling sets.
//!
//! Every ordered scope in the menu (labels globally, categories globally,
//! categories within a label, products within a category) stores an integer
//! position per member. At rest those positions are a contiguous zero-based
//! permutation of the member count. All position arithmetic lives here so
//! every caller gets the same contiguity guarantee; the gateway only decides
//! *which* scope to rewrite, never *how*.

use uuid::Uuid;

/// A member of an ordered scope.
pub trait OrderedMember {
    fn id(&self) -> Uuid;
    fn position(&self) -> i32;
    fn set_position(&mut self, position: i32);
}

/// Rewrite positions to `0..n` following the collection's current order.
pub fn assign_sequential<T: OrderedMember>(members: &mut [T]) {
    for (idx, member) in members.iter_mut().enumerate() {
        member.set_position(idx as i32);
    }
}

/// Check that positions form exactly `{0, 1, .., n-1}`.
pub fn is_contiguous<T: OrderedMember>(members: &[T]) -> bool {
    let mut positions: Vec<i32> = members.iter().map(|m| m.position()).collect();
    positions.sort_unstable();
    positions
        .iter()
        .enumerate()
        .all(|(idx, pos)| *pos == idx as i32)
}

/// Insert `new_member` at `position`, shifting every member at or after that
/// index down by one. Positions beyond the current bounds clamp to the end.
/// Untouched members keep their relative order.
pub fn insert_at<T: OrderedMember>(members: &mut Vec<T>, position: usize, new_member: T) {
    members.sort_by_key(OrderedMember::position);
    let idx = position.min(members.len());
    members.insert(idx, new_member);
    assign_sequential(members);
}

/// Remove the member with `removed_id` and close the gap it leaves.
/// Returns the removed member, or `None` when the id is not present
/// (the collection passes through unchanged).
pub fn remove_and_compact<T: OrderedMember>(members: &mut Vec<T>, removed_id: Uuid) -> Option<T> {
    members.sort_by_key(OrderedMember::position);
    let idx = members.iter().position(|m| m.id() == removed_id)?;
    let removed = members.remove(idx);
    assign_sequential(members);
    Some(removed)
}

/// Move the member with `moved_id` so it ends up at index `new_position` of
/// the resulting list. Equivalent to `remove_and_compact` followed by
/// `insert_at`; removing first is what keeps a downward move landing on the
/// requested index instead of one past it. Returns `false` when the id is
/// not present.
pub fn reorder_to<T: OrderedMember>(members: &mut Vec<T>, moved_id: Uuid, new_position: usize) -> bool {
    members.sort_by_key(OrderedMember::position);
    let Some(idx) = members.iter().position(|m| m.id() == moved_id) else {
        return false;
    };
    let moved = members.remove(idx);
    let target = new_position.min(members.len());
    members.insert(target, moved);
    assign_sequential(members);
    true
}

/// Sort by a display key using case-folded comparison, ties broken by the
/// pre-existing position so repeated application with unchanged input is a
/// no-op.
pub fn sort_alphabetical<T: OrderedMember>(members: &mut Vec<T>, key: impl Fn(&T) -> String) {
    members.sort_by_key(OrderedMember::position);
    let mut decorated: Vec<(String, T)> = members
        .drain(..)
        .map(|m| (key(&m).to_lowercase(), m))
        .collect();
    decorated.sort_by(|a, b| a.0.cmp(&b.0));
    members.extend(decorated.into_iter().map(|(_, m)| m));
    assign_sequential(members);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Member {
        id: Uuid,
        name: String,
        position: i32,
    }

    impl OrderedMember for Member {
        fn id(&self) -> Uuid {
            self.id
        }
        fn position(&self) -> i32 {
            self.position
        }
        fn set_position(&mut self, position: i32) {
            self.position = position;
        }
    }

    fn member(name: &str, position: i32) -> Member {
        Member {
            id: Uuid::new_v4(),
            name: name.to_string(),
            position,
        }
    }

    fn names(members: &[Member]) -> Vec<&str> {
        members.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn insert_shifts_members_at_and_after_position() {
        let mut members = vec![member("a", 0), member("b", 1), member("c", 2)];
        insert_at(&mut members, 1, member("x", 0));

        assert_eq!(names(&members), vec!["a", "x", "b", "c"]);
        assert!(is_contiguous(&members));
    }

    #[test]
    fn insert_position_beyond_bounds_clamps_to_end() {
        let mut members = vec![member("a", 0), member("b", 1)];
        insert_at(&mut members, 99, member("x", 0));

        assert_eq!(names(&members), vec!["a", "b", "x"]);
        assert_eq!(members.last().unwrap().position, 2);
    }

    #[test]
    fn insert_into_empty_collection_yields_position_zero() {
        let mut members: Vec<Member> = Vec::new();
        insert_at(&mut members, 5, member("only", 7));

        assert_eq!(members.len(), 1);
        assert_eq!(members[0].position, 0);
    }

    #[test]
    fn remove_compacts_the_gap() {
        let mut members = vec![member("x", 0), member("y", 1), member("z", 2)];
        let removed_id = members[1].id;

        let removed = remove_and_compact(&mut members, removed_id);

        assert_eq!(removed.unwrap().name, "y");
        assert_eq!(names(&members), vec!["x", "z"]);
        assert_eq!(
            members.iter().map(|m| m.position).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn remove_unknown_id_leaves_collection_unchanged() {
        let mut members = vec![member("x", 0), member("y", 1)];
        let before = members.clone();

        assert!(remove_and_compact(&mut members, Uuid::new_v4()).is_none());
        assert_eq!(members, before);
    }

    #[test]
    fn reorder_moves_downward_onto_the_requested_index() {
        // Moving "a" to index 2 must land it *at* 2, not past it.
        let mut members = vec![member("a", 0), member("b", 1), member("c", 2), member("d", 3)];
        let moved = members[0].id;

        assert!(reorder_to(&mut members, moved, 2));
        assert_eq!(names(&members), vec!["b", "c", "a", "d"]);
        assert!(is_contiguous(&members));
    }

    #[test]
    fn reorder_matches_remove_then_insert() {
        let mut one_pass = vec![member("a", 0), member("b", 1), member("c", 2), member("d", 3)];
        let mut two_pass = one_pass.clone();
        let moved = one_pass[3].id;

        reorder_to(&mut one_pass, moved, 1);
        let taken = remove_and_compact(&mut two_pass, moved).unwrap();
        insert_at(&mut two_pass, 1, taken);

        assert_eq!(one_pass, two_pass);
    }

    #[test]
    fn reorder_is_idempotent() {
        let mut members = vec![member("a", 0), member("b", 1), member("c", 2)];
        let moved = members[2].id;

        reorder_to(&mut members, moved, 0);
        let first = members.clone();
        reorder_to(&mut members, moved, 0);

        assert_eq!(members, first);
    }

    #[test]
    fn reorder_single_member_is_noop_at_position_zero() {
        let mut members = vec![member("only", 0)];
        let id = members[0].id;

        assert!(reorder_to(&mut members, id, 4));
        assert_eq!(members[0].position, 0);
    }

    #[test]
    fn contiguity_survives_mixed_operation_sequences() {
        let mut members: Vec<Member> = Vec::new();
        for i in 0..6 {
            insert_at(&mut members, 0, member(&format!("m{i}"), 0));
        }
        let second = members[1].id;
        let fourth = members[3].id;

        remove_and_compact(&mut members, second);
        reorder_to(&mut members, fourth, 0);
        insert_at(&mut members, 3, member("late", 0));
        let first_id = members[0].id();
        remove_and_compact(&mut members, first_id);

        assert!(is_contiguous(&members));
        assert_eq!(members.len(), 5);
    }

    #[test]
    fn alphabetical_sort_is_case_folded_and_idempotent() {
        let mut members = vec![
            member("espresso", 0),
            member("Blends", 1),
            member("accessories", 2),
        ];

        sort_alphabetical(&mut members, |m| m.name.clone());
        assert_eq!(names(&members), vec!["accessories", "Blends", "espresso"]);

        let first = members.clone();
        sort_alphabetical(&mut members, |m| m.name.clone());
        assert_eq!(members, first);
    }

    #[test]
    fn alphabetical_sort_breaks_ties_by_prior_position() {
        let mut members = vec![member("Same", 0), member("same", 1), member("same", 2)];
        let order_before: Vec<Uuid> = members.iter().map(|m| m.id).collect();

        sort_alphabetical(&mut members, |m| m.name.clone());

        let order_after: Vec<Uuid> = members.iter().map(|m| m.id).collect();
        assert_eq!(order_before, order_after);
        assert!(is_contiguous(&members));
    }
}
