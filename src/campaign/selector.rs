//! Recipient selection: at most one unsent recipient per group, up to a cap.

use std::collections::{HashMap, HashSet};

use rand::Rng;
use rand::seq::SliceRandom;

use crate::campaign::table::{RecipientRow, normalize_email};

/// Select up to `daily_cap` rows, at most one per value of `group_column`,
/// skipping every row whose normalized address is in `sent`.
///
/// Groups are visited in order of first appearance in `rows`. Rows with a
/// blank group value share the group named by the empty string. An address
/// picked for one group counts as sent for the groups after it.
pub fn select<R: Rng + ?Sized>(
    rows: &[RecipientRow],
    group_column: &str,
    sent: &HashSet<String>,
    daily_cap: usize,
    rng: &mut R,
) -> Vec<RecipientRow> {
    let mut selected = Vec::new();
    if daily_cap == 0 {
        return selected;
    }

    let mut picked: HashSet<String> = HashSet::new();
    for group in partition(rows, group_column) {
        let candidates: Vec<&RecipientRow> = group
            .into_iter()
            .filter(|row| {
                let email = normalize_email(row.email());
                !sent.contains(&email) && !picked.contains(&email)
            })
            .collect();

        let Some(choice) = candidates.choose(rng) else {
            continue;
        };
        picked.insert(normalize_email(choice.email()));
        selected.push((*choice).clone());

        if selected.len() >= daily_cap {
            break;
        }
    }
    selected
}

/// Number of rows still eligible (unsent) across all groups.
pub fn eligible_count(rows: &[RecipientRow], sent: &HashSet<String>) -> usize {
    rows.iter()
        .filter(|row| !sent.contains(&normalize_email(row.email())))
        .count()
}

/// Split rows into groups keyed by the trimmed group value, in order of first
/// appearance.
fn partition<'a>(rows: &'a [RecipientRow], group_column: &str) -> Vec<Vec<&'a RecipientRow>> {
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut groups: Vec<Vec<&'a RecipientRow>> = Vec::new();
    for row in rows {
        let key = row.get(group_column).map(str::trim).unwrap_or_default();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(row);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn row(email: &str, brand: &str) -> RecipientRow {
        RecipientRow::new([("Email", email), ("Brand", brand)])
    }

    fn brands(rows: &[RecipientRow]) -> Vec<String> {
        let mut b: Vec<String> = rows
            .iter()
            .map(|r| r.get("Brand").unwrap_or_default().to_string())
            .collect();
        b.sort();
        b
    }

    fn sample() -> Vec<RecipientRow> {
        vec![
            row("a1@a.com", "A"),
            row("a2@a.com", "A"),
            row("b1@b.com", "B"),
            row("c1@c.com", "C"),
        ]
    }

    #[test]
    fn one_per_group_when_ledger_empty() {
        let mut rng = StdRng::seed_from_u64(7);
        let picked = select(&sample(), "Brand", &HashSet::new(), 10, &mut rng);
        assert_eq!(picked.len(), 3);
        assert_eq!(brands(&picked), vec!["A", "B", "C"]);
    }

    #[test]
    fn exhausted_group_is_skipped() {
        let rows = vec![row("a1@a.com", "A"), row("b1@b.com", "B")];
        let sent: HashSet<String> = ["b1@b.com".to_string()].into();
        let mut rng = StdRng::seed_from_u64(1);
        let picked = select(&rows, "Brand", &sent, 10, &mut rng);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].email(), "a1@a.com");
    }

    #[test]
    fn cap_limits_total() {
        let mut rng = StdRng::seed_from_u64(3);
        let picked = select(&sample(), "Brand", &HashSet::new(), 1, &mut rng);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn zero_cap_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(select(&sample(), "Brand", &HashSet::new(), 0, &mut rng).is_empty());
    }

    #[test]
    fn empty_input_selects_nothing() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(select(&[], "Brand", &HashSet::new(), 10, &mut rng).is_empty());
    }

    #[test]
    fn all_groups_exhausted_selects_nothing() {
        let sent: HashSet<String> = sample()
            .iter()
            .map(|r| normalize_email(r.email()))
            .collect();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(select(&sample(), "Brand", &sent, 10, &mut rng).is_empty());
    }

    #[test]
    fn ledger_match_is_case_insensitive() {
        let rows = vec![row(" A1@A.com ", "A")];
        let sent: HashSet<String> = ["a1@a.com".to_string()].into();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(select(&rows, "Brand", &sent, 10, &mut rng).is_empty());
    }

    #[test]
    fn never_selects_sent_addresses() {
        let rows: Vec<RecipientRow> = (0..50)
            .map(|i| row(&format!("u{i}@x.com"), &format!("G{}", i % 7)))
            .collect();
        let sent: HashSet<String> = (0..50)
            .filter(|i| i % 2 == 0)
            .map(|i| format!("u{i}@x.com"))
            .collect();

        for seed in 0..25 {
            let mut rng = StdRng::seed_from_u64(seed);
            let picked = select(&rows, "Brand", &sent, 100, &mut rng);
            let mut seen_groups = HashSet::new();
            for r in &picked {
                assert!(!sent.contains(&normalize_email(r.email())));
                assert!(seen_groups.insert(r.get("Brand").unwrap().to_string()));
            }
            assert_eq!(picked.len(), 7);
        }
    }

    #[test]
    fn repeated_selection_draws_from_same_pool() {
        let rows = sample();
        let sent = HashSet::new();
        let pool: HashSet<String> = rows.iter().map(|r| r.email().to_string()).collect();
        for seed in 0..10 {
            let mut rng = StdRng::seed_from_u64(seed);
            let first = select(&rows, "Brand", &sent, 10, &mut rng);
            let second = select(&rows, "Brand", &sent, 10, &mut rng);
            assert_eq!(brands(&first), brands(&second));
            for r in first.iter().chain(second.iter()) {
                assert!(pool.contains(r.email()));
            }
        }
    }

    #[test]
    fn blank_group_values_share_one_group() {
        let rows = vec![row("x@x.com", ""), row("y@y.com", "  "), row("z@z.com", "Z")];
        let mut rng = StdRng::seed_from_u64(11);
        let picked = select(&rows, "Brand", &HashSet::new(), 10, &mut rng);
        assert_eq!(picked.len(), 2);
    }

    #[test]
    fn missing_group_column_is_one_group() {
        let mut rng = StdRng::seed_from_u64(5);
        let picked = select(&sample(), "Manufacturer", &HashSet::new(), 10, &mut rng);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn same_address_in_two_groups_is_picked_once() {
        let rows = vec![row("dup@x.com", "A"), row("DUP@x.com", "B")];
        let mut rng = StdRng::seed_from_u64(2);
        let picked = select(&rows, "Brand", &HashSet::new(), 10, &mut rng);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn eligible_count_ignores_sent() {
        let sent: HashSet<String> = ["a1@a.com".to_string()].into();
        assert_eq!(eligible_count(&sample(), &sent), 3);
    }
}
