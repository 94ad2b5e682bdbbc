//! Aggregate statistics over a set of dives.
//!
//! Every statistic is a pure function of the records it is given. An empty
//! input, or one with no data for the relevant signal, yields a zero value
//! with an explanatory context rather than an error.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{name_list, DiveLogError, Result};
use crate::grouping::{tabulate, CategoryCount, CategoryKey};
use crate::models::DiveRecord;

pub const NO_DIVES: &str = "No dives to analyze";

/// Registered statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatKind {
    AverageDepth,
    MinDepth,
    MaxDepth,
    DeepestDive,
    ShallowestDive,
    TotalDiveTime,
    AverageDiveTime,
    LongestDive,
    ShortestDive,
    DiveCount,
    AverageTemperature,
    TimeBelowDepth,
    DivesByYear,
    DivesByMonth,
    DivesByLocation,
    DivesByBuddy,
    DivesByGasType,
    TotalAirConsumption,
    AverageAirConsumptionRate,
    AverageCnsLoad,
    MaxCnsLoad,
    MostCommonBuddy,
    MostVisitedLocation,
}

impl StatKind {
    pub const ALL: [StatKind; 23] = [
        StatKind::AverageDepth,
        StatKind::MinDepth,
        StatKind::MaxDepth,
        StatKind::DeepestDive,
        StatKind::ShallowestDive,
        StatKind::TotalDiveTime,
        StatKind::AverageDiveTime,
        StatKind::LongestDive,
        StatKind::ShortestDive,
        StatKind::DiveCount,
        StatKind::AverageTemperature,
        StatKind::TimeBelowDepth,
        StatKind::DivesByYear,
        StatKind::DivesByMonth,
        StatKind::DivesByLocation,
        StatKind::DivesByBuddy,
        StatKind::DivesByGasType,
        StatKind::TotalAirConsumption,
        StatKind::AverageAirConsumptionRate,
        StatKind::AverageCnsLoad,
        StatKind::MaxCnsLoad,
        StatKind::MostCommonBuddy,
        StatKind::MostVisitedLocation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatKind::AverageDepth => "average_depth",
            StatKind::MinDepth => "min_depth",
            StatKind::MaxDepth => "max_depth",
            StatKind::DeepestDive => "deepest_dive",
            StatKind::ShallowestDive => "shallowest_dive",
            StatKind::TotalDiveTime => "total_dive_time",
            StatKind::AverageDiveTime => "average_dive_time",
            StatKind::LongestDive => "longest_dive",
            StatKind::ShortestDive => "shortest_dive",
            StatKind::DiveCount => "dive_count",
            StatKind::AverageTemperature => "average_temperature",
            StatKind::TimeBelowDepth => "time_below_depth",
            StatKind::DivesByYear => "dives_by_year",
            StatKind::DivesByMonth => "dives_by_month",
            StatKind::DivesByLocation => "dives_by_location",
            StatKind::DivesByBuddy => "dives_by_buddy",
            StatKind::DivesByGasType => "dives_by_gas_type",
            StatKind::TotalAirConsumption => "total_air_consumption",
            StatKind::AverageAirConsumptionRate => "average_air_consumption_rate",
            StatKind::AverageCnsLoad => "average_cns_load",
            StatKind::MaxCnsLoad => "max_cns_load",
            StatKind::MostCommonBuddy => "most_common_buddy",
            StatKind::MostVisitedLocation => "most_visited_location",
        }
    }

    /// Looks up a statistic by name or alias.
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_lowercase();
        let wanted = match wanted.as_str() {
            "total_time" => "total_dive_time",
            "average_duration" => "average_dive_time",
            "count" => "dive_count",
            other => other,
        };
        StatKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| DiveLogError::UnknownStatistic {
                name: name.to_string(),
                valid: name_list(StatKind::ALL.iter().map(|k| k.name())),
            })
    }

    pub fn unit(&self) -> &'static str {
        match self {
            StatKind::AverageDepth
            | StatKind::MinDepth
            | StatKind::MaxDepth
            | StatKind::DeepestDive
            | StatKind::ShallowestDive => "meters",
            StatKind::TotalDiveTime
            | StatKind::AverageDiveTime
            | StatKind::LongestDive
            | StatKind::ShortestDive
            | StatKind::TimeBelowDepth => "minutes",
            StatKind::DiveCount
            | StatKind::DivesByYear
            | StatKind::DivesByMonth
            | StatKind::DivesByLocation
            | StatKind::DivesByBuddy
            | StatKind::DivesByGasType
            | StatKind::MostCommonBuddy
            | StatKind::MostVisitedLocation => "dives",
            StatKind::AverageTemperature => "celsius",
            StatKind::TotalAirConsumption => "bar",
            StatKind::AverageAirConsumptionRate => "bar/min",
            StatKind::AverageCnsLoad | StatKind::MaxCnsLoad => "percent",
        }
    }

    fn has_breakdown(&self) -> bool {
        matches!(
            self,
            StatKind::DivesByYear
                | StatKind::DivesByMonth
                | StatKind::DivesByLocation
                | StatKind::DivesByBuddy
                | StatKind::DivesByGasType
                | StatKind::MostCommonBuddy
                | StatKind::MostVisitedLocation
        )
    }
}

impl fmt::Display for StatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BreakdownEntry {
    pub key: String,
    pub value: f64,
}

/// Outcome of one statistic.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateResult {
    pub stat_type: String,
    pub value: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<Vec<BreakdownEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl AggregateResult {
    fn new(kind: StatKind, value: f64) -> Self {
        AggregateResult {
            stat_type: kind.name().to_string(),
            value,
            unit: kind.unit().to_string(),
            breakdown: kind.has_breakdown().then(Vec::new),
            context: None,
        }
    }

    fn zero(kind: StatKind, context: &str) -> Self {
        AggregateResult::new(kind, 0.0).with_context(context)
    }

    fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    fn with_breakdown(mut self, entries: Vec<BreakdownEntry>) -> Self {
        self.breakdown = Some(entries);
        self
    }

    /// Prefixes the context with the scope the statistic was computed over.
    pub fn scoped(mut self, scope: &str) -> Self {
        self.context = Some(match self.context.take() {
            Some(existing) => format!("{}. {}", scope, existing),
            None => scope.to_string(),
        });
        self
    }
}

/// Parameters some statistics need.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatParams {
    /// Meters
    pub depth_threshold: Option<f64>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn minutes(record: &DiveRecord) -> f64 {
    record.duration_sec() / 60.0
}

fn dive_label(record: &DiveRecord) -> String {
    format!(
        "{} on {}",
        record.key(),
        record.start_time().format("%Y-%m-%d")
    )
}

/// Record with the largest (or smallest) value of `signal`, first wins ties.
fn extreme_by<F>(records: &[Arc<DiveRecord>], signal: F, largest: bool) -> Option<(&DiveRecord, f64)>
where
    F: Fn(&DiveRecord) -> Option<f64>,
{
    let mut best: Option<(&DiveRecord, f64)> = None;
    for record in records {
        let Some(value) = signal(record) else {
            continue;
        };
        let better = match best {
            None => true,
            Some((_, current)) if largest => value > current,
            Some((_, current)) => value < current,
        };
        if better {
            best = Some((record.as_ref(), value));
        }
    }
    best
}

fn breakdown_of(counts: &[CategoryCount]) -> Vec<BreakdownEntry> {
    counts
        .iter()
        .map(|c| BreakdownEntry {
            key: c.category.clone(),
            value: c.count as f64,
        })
        .collect()
}

/// Time spent in segments whose starting sample is deeper than `threshold`,
/// in seconds. Each such segment contributes the time to the next sample.
pub fn time_below_depth_sec(record: &DiveRecord, threshold: f64) -> f64 {
    let timeline = record.timeline();
    (0..timeline.len().saturating_sub(1))
        .filter(|&i| timeline.depths[i] > threshold)
        .map(|i| timeline.timestamps[i + 1] - timeline.timestamps[i])
        .sum()
}

pub fn compute_by_name(
    name: &str,
    records: &[Arc<DiveRecord>],
    params: &StatParams,
) -> Result<AggregateResult> {
    compute(StatKind::from_name(name)?, records, params)
}

/// Computes one statistic over `records`.
pub fn compute(
    kind: StatKind,
    records: &[Arc<DiveRecord>],
    params: &StatParams,
) -> Result<AggregateResult> {
    let threshold = if kind == StatKind::TimeBelowDepth {
        let threshold = params.depth_threshold.ok_or_else(|| {
            DiveLogError::validation("time_below_depth requires a depth_threshold")
        })?;
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(DiveLogError::validation(format!(
                "depth_threshold must be a non-negative number, got {}",
                threshold
            )));
        }
        threshold
    } else {
        0.0
    };

    if records.is_empty() {
        return Ok(AggregateResult::zero(kind, NO_DIVES));
    }

    let result = match kind {
        StatKind::AverageDepth | StatKind::MinDepth | StatKind::MaxDepth => {
            let maxima: Vec<f64> = records.iter().filter_map(|r| r.max_depth()).collect();
            let value = match kind {
                StatKind::AverageDepth => mean(&maxima),
                StatKind::MinDepth => maxima.iter().copied().reduce(f64::min),
                _ => maxima.iter().copied().reduce(f64::max),
            };
            match value {
                Some(value) => AggregateResult::new(kind, round2(value)),
                None => AggregateResult::zero(kind, "No depth data available"),
            }
        }
        StatKind::DeepestDive | StatKind::ShallowestDive => {
            let deepest = kind == StatKind::DeepestDive;
            match extreme_by(records, |r| r.max_depth(), deepest) {
                Some((record, depth)) => AggregateResult::new(kind, round2(depth))
                    .with_context(dive_label(record)),
                None => AggregateResult::zero(kind, "No depth data available"),
            }
        }
        StatKind::TotalDiveTime => {
            AggregateResult::new(kind, round2(records.iter().map(|r| minutes(r)).sum()))
        }
        StatKind::AverageDiveTime => {
            let durations: Vec<f64> = records.iter().map(|r| minutes(r)).collect();
            AggregateResult::new(kind, round2(mean(&durations).unwrap_or(0.0)))
        }
        StatKind::LongestDive | StatKind::ShortestDive => {
            let longest = kind == StatKind::LongestDive;
            match extreme_by(records, |r| Some(minutes(r)), longest) {
                Some((record, value)) => {
                    AggregateResult::new(kind, round2(value)).with_context(dive_label(record))
                }
                None => AggregateResult::zero(kind, NO_DIVES),
            }
        }
        StatKind::DiveCount => AggregateResult::new(kind, records.len() as f64),
        StatKind::AverageTemperature => {
            // Pooled over every sample, not averaged per dive.
            let samples: Vec<f64> = records
                .iter()
                .flat_map(|r| r.timeline().temperatures.iter().map(|t| *t as f64))
                .collect();
            match mean(&samples) {
                Some(value) => AggregateResult::new(kind, round1(value)),
                None => AggregateResult::zero(kind, "No temperature data available"),
            }
        }
        StatKind::TimeBelowDepth => {
            if records.iter().all(|r| r.timeline().is_empty()) {
                AggregateResult::zero(kind, "No depth data available")
            } else {
                let seconds: f64 = records
                    .iter()
                    .map(|r| time_below_depth_sec(r, threshold))
                    .sum();
                AggregateResult::new(kind, round2(seconds / 60.0))
                    .with_context(format!("Time spent deeper than {}m", threshold))
            }
        }
        StatKind::DivesByYear
        | StatKind::DivesByMonth
        | StatKind::DivesByLocation
        | StatKind::DivesByBuddy
        | StatKind::DivesByGasType => {
            let key = match kind {
                StatKind::DivesByYear => CategoryKey::Year,
                StatKind::DivesByMonth => CategoryKey::Month,
                StatKind::DivesByLocation => CategoryKey::Location,
                StatKind::DivesByBuddy => CategoryKey::Buddy,
                _ => CategoryKey::GasType,
            };
            let counts = tabulate(records, key);
            AggregateResult::new(kind, records.len() as f64)
                .with_breakdown(breakdown_of(&counts))
                .with_context(format!("Dives grouped by {}", key))
        }
        StatKind::TotalAirConsumption => {
            let consumed: Vec<f64> = records
                .iter()
                .filter_map(|r| r.air_consumed())
                .map(f64::from)
                .collect();
            if consumed.is_empty() {
                AggregateResult::zero(kind, "No air consumption data available")
            } else {
                AggregateResult::new(kind, round2(consumed.iter().sum()))
                    .with_context(format!("Across {} dives with pressure data", consumed.len()))
            }
        }
        StatKind::AverageAirConsumptionRate => {
            let rates: Vec<f64> = records
                .iter()
                .filter_map(|r| r.air_consumption_rate())
                .collect();
            match mean(&rates) {
                Some(value) => AggregateResult::new(kind, round2(value))
                    .with_context(format!("Across {} dives with pressure data", rates.len())),
                None => AggregateResult::zero(kind, "No air consumption data available"),
            }
        }
        StatKind::AverageCnsLoad | StatKind::MaxCnsLoad => {
            let maxima: Vec<f64> = records
                .iter()
                .filter_map(|r| r.max_cns_load())
                .map(f64::from)
                .collect();
            let value = if kind == StatKind::AverageCnsLoad {
                mean(&maxima)
            } else {
                maxima.iter().copied().reduce(f64::max)
            };
            match value {
                Some(value) => AggregateResult::new(kind, round2(value)),
                None => AggregateResult::zero(kind, "No CNS data available"),
            }
        }
        StatKind::MostCommonBuddy | StatKind::MostVisitedLocation => {
            let (key, missing) = if kind == StatKind::MostCommonBuddy {
                (CategoryKey::Buddy, "No buddy data available")
            } else {
                (CategoryKey::Location, "No location data available")
            };
            let top = tabulate(records, key)
                .into_iter()
                .find(|c| c.category != key.default_label());
            match top {
                Some(top) => AggregateResult::new(kind, top.count as f64)
                    .with_context(format!("Most frequent {}: {}", key, top.category))
                    .with_breakdown(breakdown_of(std::slice::from_ref(&top))),
                None => AggregateResult::zero(kind, missing),
            }
        }
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiveMetadata, GasType, RecordKey, Timeline};
    use chrono::NaiveDate;

    fn create_test_dive(
        key: &str,
        date: (i32, u32, u32),
        depths: &[f64],
        temps: &[i32],
        metadata: DiveMetadata,
    ) -> Arc<DiveRecord> {
        let start = NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let timeline = Timeline {
            depths: depths.to_vec(),
            temperatures: temps.to_vec(),
            n2_load: vec![0; depths.len()],
            cns_load: (0..depths.len()).map(|i| i as i32 * 2).collect(),
            timestamps: (0..depths.len()).map(|i| i as f64 * 60.0).collect(),
        };
        Arc::new(DiveRecord::new(RecordKey::from(key), start, timeline, metadata).unwrap())
    }

    fn create_test_dives() -> Vec<Arc<DiveRecord>> {
        vec![
            create_test_dive(
                "a",
                (2023, 7, 14),
                &[0.0, 12.0, 18.0, 10.0, 0.0],
                &[24, 22, 20, 21, 23],
                DiveMetadata {
                    location_name: "Blue Hole".to_string(),
                    buddy: "Ana".to_string(),
                    gas_type: Some(GasType::Air),
                    start_pressure_bar: 200,
                    end_pressure_bar: 80,
                    ..Default::default()
                },
            ),
            create_test_dive(
                "b",
                (2024, 1, 3),
                &[0.0, 25.0, 30.0, 26.0, 12.0, 0.0],
                &[18, 16, 15, 15, 16, 17],
                DiveMetadata {
                    location_name: "Blue Hole".to_string(),
                    buddy: "Marco".to_string(),
                    gas_type: Some(GasType::Nitrox),
                    start_pressure_bar: 210,
                    end_pressure_bar: 60,
                    ..Default::default()
                },
            ),
            create_test_dive(
                "c",
                (2024, 7, 20),
                &[0.0, 8.0, 0.0],
                &[26, 25, 26],
                DiveMetadata {
                    location_name: "House Reef".to_string(),
                    buddy: "Ana".to_string(),
                    ..Default::default()
                },
            ),
        ]
    }

    fn stat(kind: StatKind) -> AggregateResult {
        compute(kind, &create_test_dives(), &StatParams::default()).unwrap()
    }

    #[test]
    fn test_empty_input_is_zero_result() {
        for kind in StatKind::ALL {
            let params = StatParams {
                depth_threshold: Some(10.0),
            };
            let result = compute(kind, &[], &params).unwrap();
            assert_eq!(result.value, 0.0, "{}", kind);
            assert_eq!(result.context.as_deref(), Some(NO_DIVES), "{}", kind);
        }

        let result = compute_by_name("average_depth", &[], &StatParams::default()).unwrap();
        assert_eq!(result.unit, "meters");
        assert!(result.breakdown.is_none());
    }

    #[test]
    fn test_depth_statistics_use_per_dive_maxima() {
        assert_eq!(stat(StatKind::AverageDepth).value, 18.67);
        assert_eq!(stat(StatKind::MinDepth).value, 8.0);
        assert_eq!(stat(StatKind::MaxDepth).value, 30.0);

        let deepest = stat(StatKind::DeepestDive);
        assert_eq!(deepest.value, 30.0);
        assert_eq!(deepest.context.as_deref(), Some("b on 2024-01-03"));
    }

    #[test]
    fn test_duration_statistics() {
        assert_eq!(stat(StatKind::TotalDiveTime).value, 11.0);
        assert_eq!(stat(StatKind::AverageDiveTime).value, 3.67);
        assert_eq!(stat(StatKind::LongestDive).value, 5.0);
        assert_eq!(stat(StatKind::ShortestDive).value, 2.0);
        assert_eq!(stat(StatKind::DiveCount).value, 3.0);
    }

    #[test]
    fn test_average_temperature_is_pooled_over_samples() {
        // 110 + 97 + 77 over 14 samples, not the mean of per-dive means.
        assert_eq!(stat(StatKind::AverageTemperature).value, 20.3);
    }

    #[test]
    fn test_missing_signal_is_zero_with_context() {
        let dives = vec![create_test_dive("x", (2024, 1, 1), &[], &[], DiveMetadata::default())];
        let result = compute(StatKind::AverageTemperature, &dives, &StatParams::default()).unwrap();
        assert_eq!(result.value, 0.0);
        assert_eq!(result.context.as_deref(), Some("No temperature data available"));

        let result = compute(StatKind::AverageDepth, &dives, &StatParams::default()).unwrap();
        assert_eq!(result.context.as_deref(), Some("No depth data available"));
    }

    #[test]
    fn test_time_below_depth() {
        let params = StatParams {
            depth_threshold: Some(15.0),
        };
        // Segments starting at 18, 25, 30 and 26 meters.
        let result = compute(StatKind::TimeBelowDepth, &create_test_dives(), &params).unwrap();
        assert_eq!(result.value, 4.0);

        let err = compute(StatKind::TimeBelowDepth, &create_test_dives(), &StatParams::default())
            .unwrap_err();
        assert!(matches!(err, DiveLogError::Validation(_)));
    }

    #[test]
    fn test_air_consumption_excludes_unset_pressure() {
        assert_eq!(stat(StatKind::TotalAirConsumption).value, 270.0);
        // 120 bar over 4 min and 150 bar over 5 min; dive c has no pressures.
        assert_eq!(stat(StatKind::AverageAirConsumptionRate).value, 30.0);
    }

    #[test]
    fn test_breakdowns() {
        let by_year = stat(StatKind::DivesByYear);
        assert_eq!(by_year.value, 3.0);
        let keys: Vec<_> = by_year
            .breakdown
            .unwrap()
            .into_iter()
            .map(|e| (e.key, e.value))
            .collect();
        assert_eq!(keys, vec![("2023".to_string(), 1.0), ("2024".to_string(), 2.0)]);

        let by_month = stat(StatKind::DivesByMonth).breakdown.unwrap();
        assert_eq!(by_month[0].key, "January");
        assert_eq!(by_month[1].key, "July");
        assert_eq!(by_month[1].value, 2.0);

        let by_gas = stat(StatKind::DivesByGasType).breakdown.unwrap();
        assert_eq!(by_gas.len(), 3);
        assert!(by_gas.iter().any(|e| e.key == "Unknown"));
    }

    #[test]
    fn test_most_common() {
        let buddy = stat(StatKind::MostCommonBuddy);
        assert_eq!(buddy.value, 2.0);
        assert_eq!(buddy.breakdown.unwrap()[0].key, "Ana");

        let location = stat(StatKind::MostVisitedLocation);
        assert_eq!(location.breakdown.unwrap()[0].key, "Blue Hole");
    }

    #[test]
    fn test_cns_statistics() {
        // Per-dive maxima are 8, 10 and 4.
        assert_eq!(stat(StatKind::MaxCnsLoad).value, 10.0);
        assert_eq!(stat(StatKind::AverageCnsLoad).value, 7.33);
    }

    #[test]
    fn test_lookup_by_name() {
        assert_eq!(StatKind::from_name("total_time").unwrap(), StatKind::TotalDiveTime);
        assert_eq!(StatKind::from_name("COUNT").unwrap(), StatKind::DiveCount);
        assert_eq!(
            StatKind::from_name("average_duration").unwrap(),
            StatKind::AverageDiveTime
        );
        for kind in StatKind::ALL {
            assert_eq!(StatKind::from_name(kind.name()).unwrap(), kind);
        }
        match StatKind::from_name("median_depth").unwrap_err() {
            DiveLogError::UnknownStatistic { valid, .. } => {
                assert!(valid.contains("average_air_consumption_rate"))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_scoped_context() {
        let count = stat(StatKind::DiveCount).scoped("Calculated on 2 filtered dives: depth >20m");
        assert_eq!(
            count.context.as_deref(),
            Some("Calculated on 2 filtered dives: depth >20m")
        );

        let deepest = stat(StatKind::DeepestDive).scoped("Calculated on all 3 dives");
        assert_eq!(
            deepest.context.as_deref(),
            Some("Calculated on all 3 dives. b on 2024-01-03")
        );
    }
}
