//! Dive record model.
//!
//! A [`DiveRecord`] is built once from decoded telemetry plus the manually
//! supplied [`DiveMetadata`] and is read-only afterwards. Construction checks
//! the structural invariants and fails with `MalformedRecord` instead of
//! repairing the input.

use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::error::{DiveLogError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(pub String);

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordKey {
    fn from(value: &str) -> Self {
        RecordKey(value.to_string())
    }
}

/// Breathing gas used for a dive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasType {
    Air,
    Nitrox,
    Trimix,
}

impl GasType {
    pub const ALL: [GasType; 3] = [GasType::Air, GasType::Nitrox, GasType::Trimix];

    pub fn as_str(&self) -> &'static str {
        match self {
            GasType::Air => "air",
            GasType::Nitrox => "nitrox",
            GasType::Trimix => "trimix",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn parse(name: &str) -> Result<Self> {
        let wanted = name.trim().to_lowercase();
        GasType::ALL
            .into_iter()
            .find(|gas| gas.as_str() == wanted)
            .ok_or_else(|| {
                DiveLogError::validation(format!(
                    "Invalid gas type: {}. Valid types: air, nitrox, trimix",
                    name
                ))
            })
    }
}

impl fmt::Display for GasType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sample telemetry, stored as parallel sequences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Depth in meters at each sample
    pub depths: Vec<f64>,
    /// Water temperature in Celsius at each sample
    pub temperatures: Vec<i32>,
    /// Tissue N2 load at each sample
    pub n2_load: Vec<i32>,
    /// CNS oxygen toxicity load (percent) at each sample
    pub cns_load: Vec<i32>,
    /// Seconds elapsed since dive start
    pub timestamps: Vec<f64>,
}

impl Timeline {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn max_depth(&self) -> Option<f64> {
        self.depths.iter().copied().reduce(f64::max)
    }

    fn validate(&self, key: &RecordKey) -> Result<()> {
        let expected = self.timestamps.len();
        let lengths = [
            ("depths", self.depths.len()),
            ("temperatures", self.temperatures.len()),
            ("n2_load", self.n2_load.len()),
            ("cns_load", self.cns_load.len()),
        ];
        for (name, len) in lengths {
            if len != expected {
                return Err(DiveLogError::malformed(
                    key.0.as_str(),
                    format!("{} has {} samples, timestamps has {}", name, len, expected),
                ));
            }
        }

        if let Some(depth) = self.depths.iter().find(|d| !d.is_finite() || **d < 0.0) {
            return Err(DiveLogError::malformed(
                key.0.as_str(),
                format!("invalid depth sample {}", depth),
            ));
        }

        if let Some(first) = self.timestamps.first() {
            if *first != 0.0 {
                return Err(DiveLogError::malformed(
                    key.0.as_str(),
                    format!("first timestamp must be 0, got {}", first),
                ));
            }
        }
        for pair in self.timestamps.windows(2) {
            if !pair[1].is_finite() || pair[1] < pair[0] {
                return Err(DiveLogError::malformed(
                    key.0.as_str(),
                    format!("timestamps decrease from {} to {}", pair[0], pair[1]),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiveBasics {
    /// Dive duration in seconds
    pub duration_sec: f64,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct People {
    /// Dive buddy, empty when unknown
    pub buddy: String,
    pub divemaster: Option<String>,
    pub group: BTreeSet<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub entry: Option<Coordinates>,
    pub exit: Option<Coordinates>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GasUse {
    /// Unset when the diver never recorded the gas
    pub gas_type: Option<GasType>,
    /// Tank pressure at the start of the dive in bar, 0 when unset
    pub start_pressure_bar: i32,
    /// Tank pressure at the end of the dive in bar, 0 when unset
    pub end_pressure_bar: i32,
}

/// Gear used on a dive, referenced by gear name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GearLoadout {
    pub suit: Option<String>,
    pub mask: Option<String>,
    pub gloves: Option<String>,
    pub boots: Option<String>,
    pub bcd: Option<String>,
    pub fins: Option<String>,
    /// Lead weights in kilograms
    pub weights_kg: f64,
}

impl GearLoadout {
    /// Names of every referenced gear item.
    pub fn item_names(&self) -> impl Iterator<Item = &str> {
        [
            &self.suit,
            &self.mask,
            &self.gloves,
            &self.boots,
            &self.bcd,
            &self.fins,
        ]
        .into_iter()
        .filter_map(|slot| slot.as_deref())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GloveSize {
    S,
    M,
    L,
    XL,
}

/// Fields shared by every gear item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GearInfo {
    /// User-chosen unique identifier
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Rental gear is left out of lifetime usage statistics
    #[serde(default)]
    pub is_rental: bool,
    #[serde(default)]
    pub number_of_dives: u32,
    #[serde(default)]
    pub total_dive_time_minutes: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GearKind {
    Mask,
    Suit { thickness_mm: u32, size: u32 },
    Gloves { thickness_mm: u32, size: GloveSize },
    Boots { thickness_mm: u32, size: u32 },
    Bcd,
    Fins,
}

impl GearKind {
    pub fn label(&self) -> &'static str {
        match self {
            GearKind::Mask => "mask",
            GearKind::Suit { .. } => "suit",
            GearKind::Gloves { .. } => "gloves",
            GearKind::Boots { .. } => "boots",
            GearKind::Bcd => "bcd",
            GearKind::Fins => "fins",
        }
    }

    pub fn thickness_mm(&self) -> Option<u32> {
        match self {
            GearKind::Suit { thickness_mm, .. }
            | GearKind::Gloves { thickness_mm, .. }
            | GearKind::Boots { thickness_mm, .. } => Some(*thickness_mm),
            GearKind::Mask | GearKind::Bcd | GearKind::Fins => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GearItem {
    #[serde(flatten)]
    pub info: GearInfo,
    #[serde(flatten)]
    pub kind: GearKind,
}

impl GearItem {
    pub fn name(&self) -> &str {
        &self.info.name
    }
}

/// Manually supplied dive metadata.
///
/// Every field has a default, so callers only name what they know. The
/// duration override is used only when the timeline carries no samples.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiveMetadata {
    pub location_name: String,
    pub location_description: Option<String>,
    pub entry_coordinates: Option<Coordinates>,
    pub exit_coordinates: Option<Coordinates>,
    pub buddy: String,
    pub divemaster: Option<String>,
    pub group: BTreeSet<String>,
    pub gas_type: Option<GasType>,
    pub start_pressure_bar: i32,
    pub end_pressure_bar: i32,
    pub gear: GearLoadout,
    /// Duration in seconds for dives without samples
    pub duration_override_sec: Option<f64>,
}

/// One dive session. Identity is the storage key, not the contents.
#[derive(Clone, Debug)]
pub struct DiveRecord {
    key: RecordKey,
    timeline: Timeline,
    basics: DiveBasics,
    people: People,
    location: Location,
    gas: GasUse,
    gear: GearLoadout,
}

impl DiveRecord {
    pub fn new(
        key: RecordKey,
        start_time: NaiveDateTime,
        timeline: Timeline,
        metadata: DiveMetadata,
    ) -> Result<Self> {
        timeline.validate(&key)?;

        let DiveMetadata {
            location_name,
            location_description,
            entry_coordinates,
            exit_coordinates,
            buddy,
            divemaster,
            group,
            gas_type,
            start_pressure_bar,
            end_pressure_bar,
            gear,
            duration_override_sec,
        } = metadata;

        if start_pressure_bar < 0 || end_pressure_bar < 0 {
            return Err(DiveLogError::malformed(
                key.0.as_str(),
                format!(
                    "negative tank pressure ({} -> {} bar)",
                    start_pressure_bar, end_pressure_bar
                ),
            ));
        }
        if start_pressure_bar > 0 && end_pressure_bar > start_pressure_bar {
            return Err(DiveLogError::malformed(
                key.0.as_str(),
                format!(
                    "end pressure {} bar exceeds start pressure {} bar",
                    end_pressure_bar, start_pressure_bar
                ),
            ));
        }

        let duration_sec = match timeline.timestamps.last() {
            Some(last) => *last,
            None => duration_override_sec.unwrap_or(0.0),
        };
        if !duration_sec.is_finite() || duration_sec < 0.0 {
            return Err(DiveLogError::malformed(
                key.0.as_str(),
                format!("invalid duration {}", duration_sec),
            ));
        }
        let end_time = TimeDelta::try_milliseconds((duration_sec * 1000.0).round() as i64)
            .and_then(|delta| start_time.checked_add_signed(delta))
            .ok_or_else(|| {
                DiveLogError::malformed(key.0.as_str(), "end time out of range")
            })?;

        Ok(DiveRecord {
            key,
            timeline,
            basics: DiveBasics {
                duration_sec,
                start_time,
                end_time,
            },
            people: People {
                buddy,
                divemaster,
                group,
            },
            location: Location {
                name: location_name,
                entry: entry_coordinates,
                exit: exit_coordinates,
                description: location_description,
            },
            gas: GasUse {
                gas_type,
                start_pressure_bar,
                end_pressure_bar,
            },
            gear,
        })
    }

    /// Rebuilds the record under new metadata, keeping key and telemetry.
    pub fn with_metadata(&self, metadata: DiveMetadata) -> Result<Self> {
        DiveRecord::new(
            self.key.clone(),
            self.basics.start_time,
            self.timeline.clone(),
            metadata,
        )
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn basics(&self) -> &DiveBasics {
        &self.basics
    }

    pub fn people(&self) -> &People {
        &self.people
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn gas(&self) -> &GasUse {
        &self.gas
    }

    pub fn gear(&self) -> &GearLoadout {
        &self.gear
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.basics.start_time
    }

    pub fn duration_sec(&self) -> f64 {
        self.basics.duration_sec
    }

    pub fn max_depth(&self) -> Option<f64> {
        self.timeline.max_depth()
    }

    /// Mean of this dive's temperature samples.
    pub fn average_temperature(&self) -> Option<f64> {
        let temps = &self.timeline.temperatures;
        if temps.is_empty() {
            return None;
        }
        Some(temps.iter().map(|t| *t as f64).sum::<f64>() / temps.len() as f64)
    }

    pub fn max_cns_load(&self) -> Option<i32> {
        self.timeline.cns_load.iter().copied().max()
    }

    /// Bar consumed, when the pressures were recorded and show consumption.
    pub fn air_consumed(&self) -> Option<i32> {
        let gas = &self.gas;
        if gas.start_pressure_bar <= 0 || gas.end_pressure_bar < 0 {
            return None;
        }
        let consumed = gas.start_pressure_bar - gas.end_pressure_bar;
        (consumed > 0).then_some(consumed)
    }

    /// Consumption rate in bar per minute.
    pub fn air_consumption_rate(&self) -> Option<f64> {
        let consumed = self.air_consumed()?;
        let minutes = self.basics.duration_sec / 60.0;
        (minutes > 0.0).then(|| consumed as f64 / minutes)
    }
}

impl PartialEq for DiveRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for DiveRecord {}

impl Hash for DiveRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}
