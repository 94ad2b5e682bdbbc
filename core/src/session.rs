//! Per-query session state.
//!
//! A [`SessionState`] lives for one top-level query. It holds the working set
//! produced by the latest filter or search and the labeled groups built up
//! along the way. The caller creates it (or calls [`SessionState::clear`])
//! before the first tool call of each query and passes it to every call.

use std::sync::Arc;

use tracing::debug;

use crate::models::DiveRecord;

#[derive(Clone, Debug, Default)]
pub enum WorkingSet {
    #[default]
    Empty,
    Active {
        records: Vec<Arc<DiveRecord>>,
        description: String,
    },
}

#[derive(Clone, Debug)]
pub struct LabeledGroup {
    pub label: String,
    pub records: Vec<Arc<DiveRecord>>,
}

/// Records a computation runs over, and how to describe that scope.
#[derive(Clone, Debug)]
pub struct Target<'a> {
    pub records: &'a [Arc<DiveRecord>],
    pub scope: String,
    pub filtered: bool,
}

#[derive(Clone, Debug, Default)]
pub struct SessionState {
    working_set: WorkingSet,
    groups: Vec<LabeledGroup>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the working set and every labeled group.
    pub fn clear(&mut self) {
        debug!(groups = self.groups.len(), "session cleared");
        self.working_set = WorkingSet::Empty;
        self.groups.clear();
    }

    /// Replaces the working set. Earlier filters are not intersected.
    pub fn set_working_set(&mut self, records: Vec<Arc<DiveRecord>>, description: impl Into<String>) {
        let description = description.into();
        debug!(count = records.len(), description = %description, "working set replaced");
        self.working_set = WorkingSet::Active {
            records,
            description,
        };
    }

    pub fn working_set(&self) -> &WorkingSet {
        &self.working_set
    }

    pub fn is_active(&self) -> bool {
        matches!(self.working_set, WorkingSet::Active { .. })
    }

    /// Inserts or overwrites the group for `label`. Overwriting keeps the
    /// group's original position. Returns true when a group was replaced.
    pub fn add_labeled_group(&mut self, label: impl Into<String>, records: Vec<Arc<DiveRecord>>) -> bool {
        let label = label.into();
        debug!(label = %label, count = records.len(), "labeled group stored");
        match self.groups.iter_mut().find(|g| g.label == label) {
            Some(group) => {
                group.records = records;
                true
            }
            None => {
                self.groups.push(LabeledGroup { label, records });
                false
            }
        }
    }

    /// Groups in the order their labels were first added.
    pub fn labeled_groups(&self) -> &[LabeledGroup] {
        &self.groups
    }

    pub fn labeled_group(&self, label: &str) -> Option<&LabeledGroup> {
        self.groups.iter().find(|g| g.label == label)
    }

    /// The working set when one is active, otherwise the whole universe.
    pub fn target<'a>(&'a self, universe: &'a [Arc<DiveRecord>]) -> Target<'a> {
        match &self.working_set {
            WorkingSet::Active {
                records,
                description,
            } => Target {
                records,
                scope: format!(
                    "Calculated on {} filtered dives: {}",
                    records.len(),
                    description
                ),
                filtered: true,
            },
            WorkingSet::Empty => Target {
                records: universe,
                scope: format!("Calculated on all {} dives", universe.len()),
                filtered: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiveMetadata, RecordKey, Timeline};
    use chrono::NaiveDate;

    fn dives(keys: &[&str]) -> Vec<Arc<DiveRecord>> {
        keys.iter()
            .map(|key| {
                Arc::new(
                    DiveRecord::new(
                        RecordKey::from(*key),
                        NaiveDate::from_ymd_opt(2024, 4, 1)
                            .unwrap()
                            .and_hms_opt(10, 0, 0)
                            .unwrap(),
                        Timeline::default(),
                        DiveMetadata::default(),
                    )
                    .unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_target_falls_back_to_universe() {
        let universe = dives(&["a", "b", "c"]);
        let mut state = SessionState::new();

        let target = state.target(&universe);
        assert_eq!(target.records.len(), 3);
        assert!(!target.filtered);
        assert_eq!(target.scope, "Calculated on all 3 dives");

        state.set_working_set(universe[..1].to_vec(), "depth >20m");
        let target = state.target(&universe);
        assert_eq!(target.records.len(), 1);
        assert_eq!(target.scope, "Calculated on 1 filtered dives: depth >20m");
    }

    #[test]
    fn test_working_set_is_overwritten() {
        let universe = dives(&["a", "b", "c"]);
        let mut state = SessionState::new();
        state.set_working_set(universe[..1].to_vec(), "first");
        state.set_working_set(universe[1..].to_vec(), "second");

        match state.working_set() {
            WorkingSet::Active {
                records,
                description,
            } => {
                assert_eq!(records.len(), 2);
                assert_eq!(description, "second");
            }
            WorkingSet::Empty => panic!("expected an active working set"),
        }
    }

    #[test]
    fn test_labeled_groups_accumulate_and_overwrite() {
        let universe = dives(&["a", "b", "c"]);
        let mut state = SessionState::new();

        assert!(!state.add_labeled_group("Summer", universe[..1].to_vec()));
        assert!(!state.add_labeled_group("Fall", universe[1..2].to_vec()));
        assert!(state.add_labeled_group("Summer", universe[2..].to_vec()));
        assert!(!state.add_labeled_group("summer", Vec::new()));

        let labels: Vec<_> = state.labeled_groups().iter().map(|g| g.label.as_str()).collect();
        assert_eq!(labels, vec!["Summer", "Fall", "summer"]);
        assert_eq!(state.labeled_group("Summer").unwrap().records[0].key().0, "c");
        assert_eq!(state.labeled_group("Fall").unwrap().records[0].key().0, "b");
    }

    #[test]
    fn test_clear_resets_both_slices() {
        let universe = dives(&["a"]);
        let mut state = SessionState::new();
        state.set_working_set(universe.clone(), "anything");
        state.add_labeled_group("Night", universe.clone());

        state.clear();
        assert!(!state.is_active());
        assert!(state.labeled_groups().is_empty());
        assert!(!state.target(&universe).filtered);
    }
}
