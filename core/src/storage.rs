use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{DiveLogError, Result};
use crate::models::{DiveMetadata, DiveRecord, GearItem, RecordKey, Timeline};

/// A dive as handed over by the telemetry parser, before validation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecodedDive {
    pub key: RecordKey,
    pub start_time: NaiveDateTime,
    #[serde(default)]
    pub timeline: Timeline,
    #[serde(default)]
    pub metadata: DiveMetadata,
}

impl DecodedDive {
    pub fn into_record(self) -> Result<DiveRecord> {
        DiveRecord::new(self.key, self.start_time, self.timeline, self.metadata)
    }
}

/// Where decoded dives come from. The engine never sees the file format.
pub trait DiveSource {
    fn list_keys(&self) -> std::result::Result<Vec<RecordKey>, String>;
    fn load(&self, key: &RecordKey) -> std::result::Result<DecodedDive, String>;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum LoadOutcome {
    Loaded,
    Rejected(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LoadStatus {
    pub key: RecordKey,
    pub outcome: LoadOutcome,
}

/// Result of a bulk load: the accepted records plus one status per key.
#[derive(Clone, Debug, Default)]
pub struct LoadReport {
    pub records: Vec<Arc<DiveRecord>>,
    pub statuses: Vec<LoadStatus>,
}

impl LoadReport {
    pub fn rejected(&self) -> impl Iterator<Item = &LoadStatus> {
        self.statuses
            .iter()
            .filter(|s| matches!(s.outcome, LoadOutcome::Rejected(_)))
    }
}

/// Loads every dive the source lists. A dive that fails to load, violates
/// the record invariants, or repeats an earlier key is reported and skipped;
/// the rest still load.
pub fn load_universe<S: DiveSource + ?Sized>(source: &S) -> std::result::Result<LoadReport, String> {
    let keys = source.list_keys()?;
    let mut report = LoadReport::default();
    let mut seen = HashSet::new();

    for key in keys {
        if !seen.insert(key.clone()) {
            let reason = format!("duplicate key {}", key);
            warn!(key = %key, "duplicate dive key rejected during load");
            report.statuses.push(LoadStatus {
                key,
                outcome: LoadOutcome::Rejected(reason),
            });
            continue;
        }
        let outcome = match source.load(&key) {
            Ok(decoded) => match decoded.into_record() {
                Ok(record) => {
                    report.records.push(Arc::new(record));
                    LoadOutcome::Loaded
                }
                Err(err) => LoadOutcome::Rejected(err.to_string()),
            },
            Err(reason) => LoadOutcome::Rejected(reason),
        };
        if let LoadOutcome::Rejected(reason) = &outcome {
            warn!(key = %key, reason = %reason, "dive rejected during load");
        }
        report.statuses.push(LoadStatus { key, outcome });
    }

    info!(
        loaded = report.records.len(),
        rejected = report.statuses.len() - report.records.len(),
        "dive universe loaded"
    );
    Ok(report)
}

/// In-memory source in insertion order. Repeated keys are kept so the loader
/// can report them.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    dives: Vec<DecodedDive>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_dives(dives: impl IntoIterator<Item = DecodedDive>) -> Self {
        MemorySource {
            dives: dives.into_iter().collect(),
        }
    }

    pub fn insert(&mut self, dive: DecodedDive) {
        self.dives.push(dive);
    }
}

impl DiveSource for MemorySource {
    fn list_keys(&self) -> std::result::Result<Vec<RecordKey>, String> {
        Ok(self.dives.iter().map(|dive| dive.key.clone()).collect())
    }

    /// First dive stored under `key`.
    fn load(&self, key: &RecordKey) -> std::result::Result<DecodedDive, String> {
        self.dives
            .iter()
            .find(|dive| &dive.key == key)
            .cloned()
            .ok_or_else(|| format!("dive {} not found", key))
    }
}

/// Lifetime usage of one owned gear item.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GearUsage {
    pub name: String,
    pub kind: &'static str,
    pub number_of_dives: u32,
    pub total_dive_time_minutes: f64,
}

/// Gear owned independently of dives; dives refer to items by name.
#[derive(Clone, Debug, Default)]
pub struct GearStore {
    items: HashMap<String, GearItem>,
}

impl GearStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new item. Names are unique.
    pub fn insert(&mut self, item: GearItem) -> Result<()> {
        if self.items.contains_key(item.name()) {
            return Err(DiveLogError::validation(format!(
                "gear named '{}' already exists",
                item.name()
            )));
        }
        self.items.insert(item.name().to_string(), item);
        Ok(())
    }

    pub fn upsert(&mut self, item: GearItem) {
        self.items.insert(item.name().to_string(), item);
    }

    pub fn get(&self, name: &str) -> Option<&GearItem> {
        self.items.get(name)
    }

    /// All items sorted by name.
    pub fn list(&self) -> Vec<&GearItem> {
        let mut items: Vec<_> = self.items.values().collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        items
    }

    /// Usage totals per owned item, starting from the counts recorded on the
    /// item and adding every dive whose loadout references it. Rental gear
    /// and names missing from the store are skipped.
    pub fn lifetime_usage(&self, records: &[Arc<DiveRecord>]) -> Vec<GearUsage> {
        let mut usage: BTreeMap<&str, GearUsage> = self
            .items
            .values()
            .filter(|item| !item.info.is_rental)
            .map(|item| {
                (
                    item.name(),
                    GearUsage {
                        name: item.name().to_string(),
                        kind: item.kind.label(),
                        number_of_dives: item.info.number_of_dives,
                        total_dive_time_minutes: item.info.total_dive_time_minutes as f64,
                    },
                )
            })
            .collect();

        for record in records {
            for name in record.gear().item_names() {
                if let Some(entry) = usage.get_mut(name) {
                    entry.number_of_dives += 1;
                    entry.total_dive_time_minutes += record.duration_sec() / 60.0;
                }
            }
        }
        usage.into_values().collect()
    }
}
