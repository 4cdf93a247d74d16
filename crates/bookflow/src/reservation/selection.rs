use std::collections::HashMap;

use chrono::{NaiveDateTime, Timelike};

use super::Slot;

fn minute_key(t: &NaiveDateTime) -> NaiveDateTime {
    t.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(*t)
}

/// Candidate slots in booking order.
///
/// With preferences, the list follows the preference order (first preference first)
/// and contains only slots whose start matches a preferred time at minute
/// granularity. Without preferences, every slot is returned earliest first.
pub fn rank<'a>(preferred: &[NaiveDateTime], available: &'a [Slot]) -> Vec<&'a Slot> {
    if preferred.is_empty() {
        let mut all: Vec<&Slot> = available.iter().collect();
        // stable: exact ties keep insertion order
        all.sort_by_key(|s| s.start);
        return all;
    }

    let mut by_minute: HashMap<NaiveDateTime, &Slot> = HashMap::with_capacity(available.len());
    for slot in available {
        by_minute
            .entry(minute_key(&slot.start))
            .and_modify(|kept| {
                if slot.start < kept.start {
                    *kept = slot;
                }
            })
            .or_insert(slot);
    }

    let mut out: Vec<&Slot> = Vec::new();
    for p in preferred {
        if let Some(slot) = by_minute.remove(&minute_key(p)) {
            out.push(slot);
        }
    }
    out
}

/// The slot to book: first preferred time present, or the earliest slot when
/// there are no preferences. `None` means no match.
pub fn choose<'a>(preferred: &[NaiveDateTime], available: &'a [Slot]) -> Option<&'a Slot> {
    rank(preferred, available).into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(hh: u32, mm: u32, ss: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 15)
            .unwrap()
            .and_hms_opt(hh, mm, ss)
            .unwrap()
    }

    fn slot(hh: u32, mm: u32, tag: &str) -> Slot {
        Slot::new(at(hh, mm, 0)).with_meta("tag", tag)
    }

    #[test]
    fn first_preference_wins_over_earlier_slot() {
        let available = vec![slot(18, 30, "early"), slot(19, 0, "seven")];
        let preferred = vec![at(19, 0, 0), at(18, 45, 0)];

        let picked = choose(&preferred, &available).expect("match");
        assert_eq!(picked.meta("tag"), Some("seven"));
    }

    #[test]
    fn falls_through_preferences_in_order() {
        let available = vec![slot(18, 45, "a"), slot(20, 0, "b")];
        let preferred = vec![at(19, 0, 0), at(20, 0, 0), at(18, 45, 0)];

        let ranked: Vec<_> = rank(&preferred, &available)
            .into_iter()
            .filter_map(|s| s.meta("tag"))
            .collect();
        assert_eq!(ranked, vec!["b", "a"]);
    }

    #[test]
    fn no_preference_present_is_no_match() {
        let available = vec![slot(17, 0, "a"), slot(21, 30, "b")];
        assert!(choose(&[at(19, 0, 0)], &available).is_none());
        assert!(choose(&[at(19, 0, 0)], &[]).is_none());
    }

    #[test]
    fn matching_is_minute_granular() {
        let available = vec![Slot::new(at(19, 0, 42)).with_meta("tag", "x")];
        let picked = choose(&[at(19, 0, 0)], &available).expect("match");
        assert_eq!(picked.meta("tag"), Some("x"));
    }

    #[test]
    fn duplicate_minute_keeps_earlier_start() {
        let available = vec![
            Slot::new(at(19, 0, 30)).with_meta("tag", "later"),
            Slot::new(at(19, 0, 5)).with_meta("tag", "earlier"),
        ];
        let picked = choose(&[at(19, 0, 0)], &available).expect("match");
        assert_eq!(picked.meta("tag"), Some("earlier"));
    }

    #[test]
    fn empty_preferences_pick_earliest_regardless_of_order() {
        let a = vec![slot(20, 0, "c"), slot(18, 0, "a"), slot(19, 0, "b")];
        let mut b = a.clone();
        b.reverse();

        assert_eq!(choose(&[], &a).and_then(|s| s.meta("tag")), Some("a"));
        assert_eq!(choose(&[], &b).and_then(|s| s.meta("tag")), Some("a"));
        assert!(choose(&[], &[]).is_none());
    }

    #[test]
    fn empty_preferences_break_exact_ties_by_insertion() {
        let available = vec![slot(18, 0, "first"), slot(18, 0, "second")];
        assert_eq!(
            choose(&[], &available).and_then(|s| s.meta("tag")),
            Some("first")
        );
    }

    #[test]
    fn repeated_preference_does_not_repeat_candidate() {
        let available = vec![slot(19, 0, "a")];
        let preferred = vec![at(19, 0, 0), at(19, 0, 0)];
        assert_eq!(rank(&preferred, &available).len(), 1);
    }
}
