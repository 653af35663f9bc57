//! Schedule equivalence grouping (spec §4.5).
//!
//! Two schedule tables are equivalent iff their ordered
//! `(frame_name, delay_ms)` sequences are identical. Collapsing textually
//! distinct but semantically identical tables keeps the schedule-cursor
//! state machine (§4.7) from treating two copy-pasted tables as distinct
//! candidates it must disambiguate between.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use crate::ldf::ScheduleTable;

/// Output of grouping: the deduplicated tables plus the bidirectional
/// mapping between original names and their chosen representative.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedSchedules {
    /// Representative name → table.
    pub unique: BTreeMap<String, ScheduleTable>,
    /// Every original name → the representative it collapsed onto.
    pub original_to_representative: BTreeMap<String, String>,
    /// Representative name → every original name that collapsed onto it,
    /// sorted.
    pub representative_to_originals: BTreeMap<String, Vec<String>>,
}

fn canonical_key(table: &ScheduleTable) -> u64 {
    let mut hasher = DefaultHasher::new();
    for entry in &table.entries {
        entry.frame_name.hash(&mut hasher);
        // delay_ms is an f64; hash its bit pattern for determinism.
        entry.delay_ms.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

/// Groups schedule tables by structural equivalence, preserving the order
/// in which each distinct schedule was first seen to pick its
/// representative name.
pub fn group_equivalent_schedules(schedules: &[(String, ScheduleTable)]) -> GroupedSchedules {
    let mut unique = BTreeMap::new();
    let mut original_to_representative = BTreeMap::new();
    let mut representative_to_originals: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut first_seen: HashMap<u64, String> = HashMap::new();

    for (name, table) in schedules {
        let key = canonical_key(table);
        let representative = first_seen
            .entry(key)
            .or_insert_with(|| {
                unique.insert(name.clone(), table.clone());
                name.clone()
            })
            .clone();

        original_to_representative.insert(name.clone(), representative.clone());
        representative_to_originals
            .entry(representative)
            .or_default()
            .push(name.clone());
    }

    for originals in representative_to_originals.values_mut() {
        originals.sort();
    }

    GroupedSchedules {
        unique,
        original_to_representative,
        representative_to_originals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldf::ScheduleEntry;

    fn table(entries: &[(&str, f64)]) -> ScheduleTable {
        ScheduleTable {
            entries: entries
                .iter()
                .map(|(name, delay)| ScheduleEntry {
                    frame_name: name.to_string(),
                    delay_ms: *delay,
                })
                .collect(),
        }
    }

    #[test]
    fn identical_sequences_collapse() {
        let schedules = vec![
            ("A".to_string(), table(&[("F1", 10.0), ("F2", 10.0)])),
            ("B".to_string(), table(&[("F1", 10.0), ("F2", 10.0)])),
            ("C".to_string(), table(&[("F1", 10.0), ("F3", 10.0)])),
        ];
        let grouped = group_equivalent_schedules(&schedules);
        assert_eq!(grouped.unique.len(), 2);
        assert_eq!(grouped.original_to_representative["B"], "A");
        assert_eq!(grouped.original_to_representative["A"], "A");
        assert_eq!(
            grouped.representative_to_originals["A"],
            vec!["A".to_string(), "B".to_string()]
        );
    }

    #[test]
    fn grouping_is_idempotent() {
        let schedules = vec![
            ("A".to_string(), table(&[("F1", 10.0)])),
            ("B".to_string(), table(&[("F1", 10.0)])),
        ];
        let first = group_equivalent_schedules(&schedules);
        let reinput: Vec<(String, ScheduleTable)> = first.unique.clone().into_iter().collect();
        let second = group_equivalent_schedules(&reinput);
        assert_eq!(second.unique, first.unique);
    }
}
