//! Most-recently-active ranking of a sector's contacts.

/// Compute ranks after moving `target` to the front.
///
/// `rows` holds `(contact id, current rank)` for every contact of one sector
/// in creation order. Returns the full new assignment, or `None` when
/// `target` is not among `rows`.
///
/// A sector that was never ranked gets ranks in creation order first.
/// Contacts added after that carry rank 0 and are appended behind the
/// current tail, again in creation order. Then every contact ranked ahead
/// of the target moves back one place and the target takes rank 1.
pub fn move_to_front(rows: &[(i64, i64)], target: i64) -> Option<Vec<(i64, i64)>> {
    let mut ranks = rows.to_vec();

    if ranks.iter().all(|(_, rank)| *rank == 0) {
        for (i, (_, rank)) in ranks.iter_mut().enumerate() {
            *rank = i as i64 + 1;
        }
    } else {
        let mut next = ranks.iter().map(|(_, rank)| *rank).max().unwrap_or(0) + 1;
        for (_, rank) in ranks.iter_mut().filter(|(_, rank)| *rank <= 0) {
            *rank = next;
            next += 1;
        }
    }

    let target_rank = ranks
        .iter()
        .find(|(id, _)| *id == target)
        .map(|(_, rank)| *rank)?;

    for (id, rank) in ranks.iter_mut() {
        if *id == target {
            *rank = 1;
        } else if *rank < target_rank {
            *rank += 1;
        }
    }
    Some(ranks)
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, std::collections::HashSet};

    fn assert_unique(ranks: &[(i64, i64)]) {
        let seen: HashSet<i64> = ranks.iter().map(|(_, r)| *r).collect();
        assert_eq!(seen.len(), ranks.len(), "duplicate rank in {ranks:?}");
    }

    fn rank_of(ranks: &[(i64, i64)], id: i64) -> i64 {
        ranks.iter().find(|(i, _)| *i == id).unwrap().1
    }

    #[test]
    fn initializes_unranked_sector_in_creation_order() {
        let ranks = move_to_front(&[(10, 0), (11, 0), (12, 0)], 12).unwrap();
        assert_eq!(ranks, vec![(10, 2), (11, 3), (12, 1)]);
    }

    #[test]
    fn contacts_behind_target_keep_their_rank() {
        // 20 is rank 2; 21 and 22 sit behind it.
        let rows = [(19, 1), (20, 2), (21, 3), (22, 4)];
        let ranks = move_to_front(&rows, 20).unwrap();
        assert_eq!(ranks, vec![(19, 2), (20, 1), (21, 3), (22, 4)]);
    }

    #[test]
    fn already_first_is_a_no_op() {
        let rows = [(1, 1), (2, 2), (3, 3)];
        assert_eq!(move_to_front(&rows, 1).unwrap(), rows.to_vec());
    }

    #[test]
    fn new_contact_is_appended_before_moving() {
        // 4 was created after ranking started.
        let rows = [(1, 2), (2, 1), (3, 3), (4, 0)];
        let ranks = move_to_front(&rows, 4).unwrap();
        assert_eq!(ranks, vec![(1, 3), (2, 2), (3, 4), (4, 1)]);
        assert_unique(&ranks);
    }

    #[test]
    fn unknown_target() {
        assert!(move_to_front(&[(1, 1)], 99).is_none());
        assert!(move_to_front(&[], 1).is_none());
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(4)]
    #[case(5)]
    fn repeated_moves_keep_ranks_unique(#[case] target: i64) {
        let mut rows: Vec<(i64, i64)> = (1..=5).map(|id| (id, 0)).collect();
        for step in [3, 1, 5, target, 2, target] {
            rows = move_to_front(&rows, step).unwrap();
            assert_eq!(rank_of(&rows, step), 1);
            assert_unique(&rows);
        }
    }
}
