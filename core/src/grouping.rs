//! Category tabulation and chart series data.
//!
//! Categories are either derived per record ([`CategoryKey`]) or supplied
//! ready-made by the caller as a map of counts. Pie tabulations are capped at
//! a fixed number of slices; anything past the cap is folded into "Other".

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{Datelike, Month};
use serde::{Deserialize, Serialize};

use crate::error::{DiveLogError, Result};
use crate::models::DiveRecord;

pub const OTHER: &str = "Other";

/// Per-record category used for auto-grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKey {
    Month,
    Year,
    Location,
    Buddy,
    GasType,
}

impl CategoryKey {
    pub const ALL: [CategoryKey; 5] = [
        CategoryKey::Month,
        CategoryKey::Year,
        CategoryKey::Location,
        CategoryKey::Buddy,
        CategoryKey::GasType,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CategoryKey::Month => "month",
            CategoryKey::Year => "year",
            CategoryKey::Location => "location",
            CategoryKey::Buddy => "buddy",
            CategoryKey::GasType => "gas_type",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_lowercase();
        CategoryKey::ALL
            .into_iter()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| {
                DiveLogError::validation(format!(
                    "Invalid category_by: {}. Valid options: month, year, location, buddy, gas_type",
                    name
                ))
            })
    }

    /// Label used when the record has no value for this key.
    pub fn default_label(&self) -> &'static str {
        match self {
            CategoryKey::Buddy => "Solo/Unknown",
            _ => "Unknown",
        }
    }

    pub fn is_chronological(&self) -> bool {
        matches!(self, CategoryKey::Month | CategoryKey::Year)
    }

    pub fn label_of(&self, record: &DiveRecord) -> String {
        self.order_and_label(record).1
    }

    fn order_and_label(&self, record: &DiveRecord) -> (i64, String) {
        let start = record.start_time();
        let or_default = |value: &str| {
            if value.trim().is_empty() {
                self.default_label().to_string()
            } else {
                value.to_string()
            }
        };
        match self {
            CategoryKey::Month => {
                let label = Month::try_from(start.month() as u8)
                    .map(|m| m.name().to_string())
                    .unwrap_or_else(|_| self.default_label().to_string());
                (start.month() as i64, label)
            }
            CategoryKey::Year => (start.year() as i64, start.year().to_string()),
            CategoryKey::Location => (0, or_default(&record.location().name)),
            CategoryKey::Buddy => (0, or_default(&record.people().buddy)),
            CategoryKey::GasType => (
                0,
                record
                    .gas()
                    .gas_type
                    .map(|gas| gas.as_str().to_string())
                    .unwrap_or_else(|| self.default_label().to_string()),
            ),
        }
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

fn by_count_desc(counts: &mut [CategoryCount]) {
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
}

/// Counts records per category. Month and year come back in calendar order,
/// everything else by descending count.
pub fn tabulate(records: &[Arc<DiveRecord>], key: CategoryKey) -> Vec<CategoryCount> {
    let mut counts: BTreeMap<(i64, String), u64> = BTreeMap::new();
    for record in records {
        *counts.entry(key.order_and_label(record)).or_insert(0) += 1;
    }

    let mut counts: Vec<CategoryCount> = counts
        .into_iter()
        .map(|((_, category), count)| CategoryCount { category, count })
        .collect();
    if !key.is_chronological() {
        by_count_desc(&mut counts);
    }
    counts
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Bar,
    Pie,
}

/// Category counts ready to plot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Tabulation {
    pub chart: ChartKind,
    pub categories: Vec<CategoryCount>,
    pub total: u64,
}

impl Tabulation {
    fn new(chart: ChartKind, categories: Vec<CategoryCount>) -> Self {
        let total = categories.iter().map(|c| c.count).sum();
        Tabulation {
            chart,
            categories,
            total,
        }
    }
}

/// Keeps the `top` largest slices and folds the remainder into "Other".
fn collapse_tail(mut counts: Vec<CategoryCount>, top: usize) -> Vec<CategoryCount> {
    if counts.len() <= top {
        return counts;
    }
    let tail: u64 = counts.split_off(top).iter().map(|c| c.count).sum();
    match counts.iter_mut().find(|c| c.category == OTHER) {
        Some(other) => other.count += tail,
        None => counts.push(CategoryCount {
            category: OTHER.to_string(),
            count: tail,
        }),
    }
    counts
}

pub fn bar_groups(records: &[Arc<DiveRecord>], key: CategoryKey) -> Tabulation {
    Tabulation::new(ChartKind::Bar, tabulate(records, key))
}

pub fn pie_groups(records: &[Arc<DiveRecord>], key: CategoryKey, top: usize) -> Result<Tabulation> {
    if key.is_chronological() {
        return Err(DiveLogError::validation(format!(
            "Pie charts can group by location, buddy or gas_type, not {}",
            key
        )));
    }
    Ok(Tabulation::new(
        ChartKind::Pie,
        collapse_tail(tabulate(records, key), top),
    ))
}

/// Tabulation from counts the caller already computed.
pub fn custom_groups(
    data: &HashMap<String, u64>,
    chart: ChartKind,
    top: usize,
) -> Result<Tabulation> {
    if data.is_empty() {
        return Err(DiveLogError::validation("custom_data must contain at least one category"));
    }
    let mut counts: Vec<CategoryCount> = data
        .iter()
        .map(|(category, count)| CategoryCount {
            category: category.clone(),
            count: *count,
        })
        .collect();
    by_count_desc(&mut counts);

    let counts = match chart {
        ChartKind::Bar => counts,
        ChartKind::Pie => collapse_tail(counts, top),
    };
    Ok(Tabulation::new(chart, counts))
}

/// Per-dive value plotted by histograms and scatter charts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Depth,
    Duration,
    Temperature,
    CnsLoad,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Depth,
        Metric::Duration,
        Metric::Temperature,
        Metric::CnsLoad,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Depth => "depth",
            Metric::Duration => "duration",
            Metric::Temperature => "temperature",
            Metric::CnsLoad => "cns_load",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Metric::Depth => "m",
            Metric::Duration => "min",
            Metric::Temperature => "°C",
            Metric::CnsLoad => "%",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim().to_lowercase();
        Metric::ALL
            .into_iter()
            .find(|metric| metric.name() == wanted)
            .ok_or_else(|| {
                DiveLogError::validation(format!(
                    "Invalid metric: {}. Valid metrics: depth, duration, temperature, cns_load",
                    name
                ))
            })
    }

    /// Max depth, duration in minutes, mean temperature, or peak CNS when
    /// it rose above zero.
    pub fn value(&self, record: &DiveRecord) -> Option<f64> {
        match self {
            Metric::Depth => record.max_depth(),
            Metric::Duration => Some(record.duration_sec() / 60.0),
            Metric::Temperature => record.average_temperature(),
            Metric::CnsLoad => record
                .max_cns_load()
                .filter(|cns| *cns > 0)
                .map(f64::from),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Histogram {
    pub metric: Metric,
    pub unit: String,
    pub bins: Vec<HistogramBin>,
    /// Dives that had a value for the metric.
    pub total: u64,
}

/// Equal-width bins spanning the observed range. The last bin is closed.
pub fn histogram(records: &[Arc<DiveRecord>], metric: Metric, bin_count: usize) -> Histogram {
    let values: Vec<f64> = records.iter().filter_map(|r| metric.value(r)).collect();
    let mut result = Histogram {
        metric,
        unit: metric.unit().to_string(),
        bins: Vec::new(),
        total: values.len() as u64,
    };
    let (Some(min), Some(max)) = (
        values.iter().copied().reduce(f64::min),
        values.iter().copied().reduce(f64::max),
    ) else {
        return result;
    };

    if max == min || bin_count == 0 {
        result.bins.push(HistogramBin {
            lower: min,
            upper: max,
            count: values.len() as u64,
        });
        return result;
    }

    let width = (max - min) / bin_count as f64;
    result.bins = (0..bin_count)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bin_count {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();
    for value in values {
        let index = (((value - min) / width).floor() as usize).min(bin_count - 1);
        result.bins[index].count += 1;
    }
    result
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub key: String,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScatterSeries {
    pub label: String,
    pub points: Vec<ScatterPoint>,
}

/// One series per labeled record set. Dives missing either metric are left
/// out; at least two points overall are required.
pub fn scatter(
    sources: &[(String, Vec<Arc<DiveRecord>>)],
    x: Metric,
    y: Metric,
) -> Result<Vec<ScatterSeries>> {
    let series: Vec<ScatterSeries> = sources
        .iter()
        .map(|(label, records)| ScatterSeries {
            label: label.clone(),
            points: records
                .iter()
                .filter_map(|record| {
                    Some(ScatterPoint {
                        key: record.key().to_string(),
                        x: x.value(record)?,
                        y: y.value(record)?,
                    })
                })
                .collect(),
        })
        .collect();

    let plotted: usize = series.iter().map(|s| s.points.len()).sum();
    if plotted < 2 {
        return Err(DiveLogError::validation(format!(
            "Not enough data to plot {} against {}: {} dive(s) have both values",
            y, x, plotted
        )));
    }
    Ok(series)
}
