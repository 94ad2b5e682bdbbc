//! Predicate filter library.
//!
//! Every predicate is a pure test over one record. [`FilterSpec`] is the
//! closed set of parameterized predicates; [`FilterKind`] names them for
//! lookup by string. Chains are applied left to right as an intersection,
//! so a chain can only narrow its input.

pub mod parser;

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime};

use crate::error::{name_list, DiveLogError, Result};
use crate::models::{DiveRecord, GasType};

pub use parser::{
    parse_chain, parse_date_param, parse_time_param, Argument, FilterCall, Literal,
};

pub fn deeper_than(record: &DiveRecord, depth: f64) -> bool {
    record.max_depth().is_some_and(|max| max > depth)
}

pub fn shallower_than(record: &DiveRecord, depth: f64) -> bool {
    record.max_depth().is_some_and(|max| max < depth)
}

pub fn longer_than(record: &DiveRecord, seconds: f64) -> bool {
    record.duration_sec() > seconds
}

pub fn shorter_than(record: &DiveRecord, seconds: f64) -> bool {
    record.duration_sec() < seconds
}

pub fn after_date(record: &DiveRecord, date: NaiveDateTime) -> bool {
    record.start_time() > date
}

pub fn before_date(record: &DiveRecord, date: NaiveDateTime) -> bool {
    record.start_time() < date
}

pub fn between_dates(record: &DiveRecord, start: NaiveDateTime, end: NaiveDateTime) -> bool {
    after_date(record, start) && before_date(record, end)
}

/// Compares only the time of day. A start later than the end is read as a
/// range across midnight.
pub fn between_start_times(record: &DiveRecord, start: NaiveTime, end: NaiveTime) -> bool {
    let time = record.start_time().time();
    if start <= end {
        time > start && time < end
    } else {
        time > start || time < end
    }
}

pub fn started_at_or_after(record: &DiveRecord, time: NaiveTime) -> bool {
    record.start_time().time() >= time
}

pub fn started_before(record: &DiveRecord, time: NaiveTime) -> bool {
    record.start_time().time() < time
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    !haystack.is_empty() && haystack.to_lowercase().contains(&needle.to_lowercase())
}

pub fn had_buddy(record: &DiveRecord, name: &str) -> bool {
    contains_ignore_case(&record.people().buddy, name)
}

pub fn at_location(record: &DiveRecord, name: &str) -> bool {
    contains_ignore_case(&record.location().name, name)
}

pub fn description_contains(record: &DiveRecord, text: &str) -> bool {
    record
        .location()
        .description
        .as_deref()
        .is_some_and(|description| contains_ignore_case(description, text))
}

pub fn used_gas(record: &DiveRecord, gas: GasType) -> bool {
    record.gas().gas_type == Some(gas)
}

pub fn deeper_than_for_duration(record: &DiveRecord, depth: f64, seconds: f64) -> bool {
    deeper_than(record, depth) && longer_than(record, seconds)
}

/// True once consecutive samples at or below `min_depth` add up to
/// `min_minutes`. Each qualifying sample contributes the time to the next
/// sample; any shallower sample resets the streak.
pub fn continuous_depth_duration(record: &DiveRecord, min_depth: f64, min_minutes: f64) -> bool {
    let timeline = record.timeline();
    let required = min_minutes * 60.0;
    let mut streak = 0.0;

    for i in 0..timeline.len().saturating_sub(1) {
        if timeline.depths[i] >= min_depth {
            streak += timeline.timestamps[i + 1] - timeline.timestamps[i];
            if streak >= required {
                return true;
            }
        } else {
            streak = 0.0;
        }
    }
    false
}

/// Dives without temperature samples never match.
pub fn average_temperature_between(
    record: &DiveRecord,
    min: Option<f64>,
    max: Option<f64>,
) -> bool {
    match record.average_temperature() {
        Some(avg) => min.is_none_or(|min| avg >= min) && max.is_none_or(|max| avg <= max),
        None => false,
    }
}

/// Dives without CNS samples match.
pub fn max_cns_at_most(record: &DiveRecord, limit: f64) -> bool {
    record
        .max_cns_load()
        .is_none_or(|max| max as f64 <= limit)
}

/// A predicate together with its thresholds.
#[derive(Clone, Debug, PartialEq)]
pub enum FilterSpec {
    DeeperThan(f64),
    ShallowerThan(f64),
    /// Seconds
    LongerThan(f64),
    /// Seconds
    ShorterThan(f64),
    AfterDate(NaiveDateTime),
    BeforeDate(NaiveDateTime),
    BetweenDates(NaiveDateTime, NaiveDateTime),
    BetweenStartTimes(NaiveTime, NaiveTime),
    StartedAtOrAfter(NaiveTime),
    StartedBefore(NaiveTime),
    HadBuddy(String),
    AtLocation(String),
    DescriptionContains(String),
    UsedGas(GasType),
    DeeperThanForDuration { depth: f64, seconds: f64 },
    ContinuousDepthDuration { min_depth: f64, min_minutes: f64 },
    AverageTemperatureBetween { min: Option<f64>, max: Option<f64> },
    MaxCnsAtMost(f64),
}

impl FilterSpec {
    pub fn kind(&self) -> FilterKind {
        match self {
            FilterSpec::DeeperThan(_) => FilterKind::DeeperThan,
            FilterSpec::ShallowerThan(_) => FilterKind::ShallowerThan,
            FilterSpec::LongerThan(_) => FilterKind::LongerThan,
            FilterSpec::ShorterThan(_) => FilterKind::ShorterThan,
            FilterSpec::AfterDate(_) => FilterKind::AfterDate,
            FilterSpec::BeforeDate(_) => FilterKind::BeforeDate,
            FilterSpec::BetweenDates(..) => FilterKind::BetweenDates,
            FilterSpec::BetweenStartTimes(..) => FilterKind::BetweenStartTimes,
            FilterSpec::StartedAtOrAfter(_) => FilterKind::StartedAtOrAfter,
            FilterSpec::StartedBefore(_) => FilterKind::StartedBefore,
            FilterSpec::HadBuddy(_) => FilterKind::HadBuddy,
            FilterSpec::AtLocation(_) => FilterKind::AtLocation,
            FilterSpec::DescriptionContains(_) => FilterKind::DescriptionContains,
            FilterSpec::UsedGas(_) => FilterKind::UsedGas,
            FilterSpec::DeeperThanForDuration { .. } => FilterKind::DeeperThanForDuration,
            FilterSpec::ContinuousDepthDuration { .. } => FilterKind::ContinuousDepthDuration,
            FilterSpec::AverageTemperatureBetween { .. } => FilterKind::AverageTemperatureBetween,
            FilterSpec::MaxCnsAtMost(_) => FilterKind::MaxCnsAtMost,
        }
    }

    pub fn matches(&self, record: &DiveRecord) -> bool {
        match self {
            FilterSpec::DeeperThan(depth) => deeper_than(record, *depth),
            FilterSpec::ShallowerThan(depth) => shallower_than(record, *depth),
            FilterSpec::LongerThan(seconds) => longer_than(record, *seconds),
            FilterSpec::ShorterThan(seconds) => shorter_than(record, *seconds),
            FilterSpec::AfterDate(date) => after_date(record, *date),
            FilterSpec::BeforeDate(date) => before_date(record, *date),
            FilterSpec::BetweenDates(start, end) => between_dates(record, *start, *end),
            FilterSpec::BetweenStartTimes(start, end) => between_start_times(record, *start, *end),
            FilterSpec::StartedAtOrAfter(time) => started_at_or_after(record, *time),
            FilterSpec::StartedBefore(time) => started_before(record, *time),
            FilterSpec::HadBuddy(name) => had_buddy(record, name),
            FilterSpec::AtLocation(name) => at_location(record, name),
            FilterSpec::DescriptionContains(text) => description_contains(record, text),
            FilterSpec::UsedGas(gas) => used_gas(record, *gas),
            FilterSpec::DeeperThanForDuration { depth, seconds } => {
                deeper_than_for_duration(record, *depth, *seconds)
            }
            FilterSpec::ContinuousDepthDuration {
                min_depth,
                min_minutes,
            } => continuous_depth_duration(record, *min_depth, *min_minutes),
            FilterSpec::AverageTemperatureBetween { min, max } => {
                average_temperature_between(record, *min, *max)
            }
            FilterSpec::MaxCnsAtMost(limit) => max_cns_at_most(record, *limit),
        }
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSpec::DeeperThan(depth) => write!(f, "depth >{}m", depth),
            FilterSpec::ShallowerThan(depth) => write!(f, "depth <{}m", depth),
            FilterSpec::LongerThan(seconds) => write!(f, "duration >{}min", seconds / 60.0),
            FilterSpec::ShorterThan(seconds) => write!(f, "duration <{}min", seconds / 60.0),
            FilterSpec::AfterDate(date) => write!(f, "date after {}", date.format("%Y-%m-%d")),
            FilterSpec::BeforeDate(date) => write!(f, "date before {}", date.format("%Y-%m-%d")),
            FilterSpec::BetweenDates(start, end) => write!(
                f,
                "date {} to {}",
                start.format("%Y-%m-%d"),
                end.format("%Y-%m-%d")
            ),
            FilterSpec::BetweenStartTimes(start, end) => write!(
                f,
                "start time {}-{}",
                start.format("%H:%M"),
                end.format("%H:%M")
            ),
            FilterSpec::StartedAtOrAfter(time) => write!(f, "start time >={}", time.format("%H:%M")),
            FilterSpec::StartedBefore(time) => write!(f, "start time <{}", time.format("%H:%M")),
            FilterSpec::HadBuddy(name) => write!(f, "buddy '{}'", name),
            FilterSpec::AtLocation(name) => write!(f, "location '{}'", name),
            FilterSpec::DescriptionContains(text) => write!(f, "description '{}'", text),
            FilterSpec::UsedGas(gas) => write!(f, "gas type '{}'", gas),
            FilterSpec::DeeperThanForDuration { depth, seconds } => {
                write!(f, "depth >{}m and duration >{}min", depth, seconds / 60.0)
            }
            FilterSpec::ContinuousDepthDuration {
                min_depth,
                min_minutes,
            } => write!(f, "at least {} min continuous at {}m+", min_minutes, min_depth),
            FilterSpec::AverageTemperatureBetween { min, max } => match (min, max) {
                (Some(min), Some(max)) => write!(f, "temperature {}°C-{}°C", min, max),
                (Some(min), None) => write!(f, "temperature >={}°C", min),
                (None, Some(max)) => write!(f, "temperature <={}°C", max),
                (None, None) => write!(f, "any temperature"),
            },
            FilterSpec::MaxCnsAtMost(limit) => write!(f, "CNS <={}%", limit),
        }
    }
}

/// Named parameters a filter chain draws from.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterParams {
    /// Meters
    pub depth: Option<f64>,
    pub seconds: Option<f64>,
    pub minutes: Option<f64>,
    pub date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub text: Option<String>,
    pub gas: Option<GasType>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    /// Percent
    pub cns: Option<f64>,
}

/// One named parameter of a filter, in positional order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamSlot {
    Depth,
    Seconds,
    Minutes,
    Date,
    EndDate,
    Time,
    EndTime,
    Text,
    Gas,
    MinTemp,
    MaxTemp,
    Cns,
}

impl ParamSlot {
    pub fn name(&self) -> &'static str {
        match self {
            ParamSlot::Depth => "depth",
            ParamSlot::Seconds => "seconds",
            ParamSlot::Minutes => "minutes",
            ParamSlot::Date => "date",
            ParamSlot::EndDate => "end_date",
            ParamSlot::Time => "time",
            ParamSlot::EndTime => "end_time",
            ParamSlot::Text => "text",
            ParamSlot::Gas => "gas",
            ParamSlot::MinTemp => "min_temp",
            ParamSlot::MaxTemp => "max_temp",
            ParamSlot::Cns => "cns",
        }
    }

    /// Stores a parsed argument into the matching field, checking its type.
    /// Text and gas slots take the argument as written.
    fn assign(&self, params: &mut FilterParams, arg: &Argument) -> Result<()> {
        let literal = &arg.value;
        let mismatch = |expected: &str| {
            DiveLogError::validation(format!(
                "parameter '{}' expects {}, got '{}'",
                self.name(),
                expected,
                arg.source
            ))
        };
        match self {
            ParamSlot::Depth
            | ParamSlot::Seconds
            | ParamSlot::Minutes
            | ParamSlot::MinTemp
            | ParamSlot::MaxTemp
            | ParamSlot::Cns => {
                let Literal::Number(value) = literal else {
                    return Err(mismatch("a number"));
                };
                let field = match self {
                    ParamSlot::Depth => &mut params.depth,
                    ParamSlot::Seconds => &mut params.seconds,
                    ParamSlot::Minutes => &mut params.minutes,
                    ParamSlot::MinTemp => &mut params.min_temp,
                    ParamSlot::MaxTemp => &mut params.max_temp,
                    _ => &mut params.cns,
                };
                *field = Some(*value);
            }
            ParamSlot::Date | ParamSlot::EndDate => {
                let Literal::Date(value) = literal else {
                    return Err(mismatch("a date (YYYY-MM-DD)"));
                };
                if *self == ParamSlot::Date {
                    params.date = Some(*value);
                } else {
                    params.end_date = Some(*value);
                }
            }
            ParamSlot::Time | ParamSlot::EndTime => {
                let Literal::Time(value) = literal else {
                    return Err(mismatch("a time (HH:MM)"));
                };
                if *self == ParamSlot::Time {
                    params.time = Some(*value);
                } else {
                    params.end_time = Some(*value);
                }
            }
            ParamSlot::Text => params.text = Some(arg.source.clone()),
            ParamSlot::Gas => params.gas = Some(GasType::parse(&arg.source)?),
        }
        Ok(())
    }
}

/// Registered filter names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterKind {
    DeeperThan,
    ShallowerThan,
    LongerThan,
    ShorterThan,
    AfterDate,
    BeforeDate,
    BetweenDates,
    BetweenStartTimes,
    StartedAtOrAfter,
    StartedBefore,
    HadBuddy,
    AtLocation,
    DescriptionContains,
    UsedGas,
    DeeperThanForDuration,
    ContinuousDepthDuration,
    AverageTemperatureBetween,
    MaxCnsAtMost,
}

impl FilterKind {
    pub const ALL: [FilterKind; 18] = [
        FilterKind::DeeperThan,
        FilterKind::ShallowerThan,
        FilterKind::LongerThan,
        FilterKind::ShorterThan,
        FilterKind::AfterDate,
        FilterKind::BeforeDate,
        FilterKind::BetweenDates,
        FilterKind::BetweenStartTimes,
        FilterKind::StartedAtOrAfter,
        FilterKind::StartedBefore,
        FilterKind::HadBuddy,
        FilterKind::AtLocation,
        FilterKind::DescriptionContains,
        FilterKind::UsedGas,
        FilterKind::DeeperThanForDuration,
        FilterKind::ContinuousDepthDuration,
        FilterKind::AverageTemperatureBetween,
        FilterKind::MaxCnsAtMost,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::DeeperThan => "deeper_than",
            FilterKind::ShallowerThan => "shallower_than",
            FilterKind::LongerThan => "longer_than",
            FilterKind::ShorterThan => "shorter_than",
            FilterKind::AfterDate => "after_date",
            FilterKind::BeforeDate => "before_date",
            FilterKind::BetweenDates => "between_dates",
            FilterKind::BetweenStartTimes => "between_start_times",
            FilterKind::StartedAtOrAfter => "started_at_or_after",
            FilterKind::StartedBefore => "started_before",
            FilterKind::HadBuddy => "had_buddy",
            FilterKind::AtLocation => "at_location",
            FilterKind::DescriptionContains => "description_contains",
            FilterKind::UsedGas => "used_gas",
            FilterKind::DeeperThanForDuration => "deeper_than_for_duration",
            FilterKind::ContinuousDepthDuration => "continuous_depth_duration",
            FilterKind::AverageTemperatureBetween => "average_temperature_between",
            FilterKind::MaxCnsAtMost => "max_cns_at_most",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim();
        FilterKind::ALL
            .into_iter()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| DiveLogError::FilterNotFound {
                name: name.to_string(),
                valid: name_list(FilterKind::ALL.iter().map(|k| k.name())),
            })
    }

    /// Parameters in the order positional arguments are bound.
    pub fn slots(&self) -> &'static [ParamSlot] {
        match self {
            FilterKind::DeeperThan | FilterKind::ShallowerThan => &[ParamSlot::Depth],
            FilterKind::LongerThan | FilterKind::ShorterThan => &[ParamSlot::Seconds],
            FilterKind::AfterDate | FilterKind::BeforeDate => &[ParamSlot::Date],
            FilterKind::BetweenDates => &[ParamSlot::Date, ParamSlot::EndDate],
            FilterKind::BetweenStartTimes => &[ParamSlot::Time, ParamSlot::EndTime],
            FilterKind::StartedAtOrAfter | FilterKind::StartedBefore => &[ParamSlot::Time],
            FilterKind::HadBuddy | FilterKind::AtLocation | FilterKind::DescriptionContains => {
                &[ParamSlot::Text]
            }
            FilterKind::UsedGas => &[ParamSlot::Gas],
            FilterKind::DeeperThanForDuration => &[ParamSlot::Depth, ParamSlot::Seconds],
            FilterKind::ContinuousDepthDuration => &[ParamSlot::Depth, ParamSlot::Minutes],
            FilterKind::AverageTemperatureBetween => &[ParamSlot::MinTemp, ParamSlot::MaxTemp],
            FilterKind::MaxCnsAtMost => &[ParamSlot::Cns],
        }
    }

    /// Builds the predicate from named parameters.
    pub fn build(&self, params: &FilterParams) -> Result<FilterSpec> {
        let missing = |slot: ParamSlot| {
            DiveLogError::validation(format!(
                "filter '{}' requires parameter '{}'",
                self.name(),
                slot.name()
            ))
        };
        let depth = || params.depth.ok_or_else(|| missing(ParamSlot::Depth));
        let seconds = || params.seconds.ok_or_else(|| missing(ParamSlot::Seconds));
        let date = || params.date.ok_or_else(|| missing(ParamSlot::Date));
        let time = || params.time.ok_or_else(|| missing(ParamSlot::Time));
        let text = || params.text.clone().ok_or_else(|| missing(ParamSlot::Text));

        Ok(match self {
            FilterKind::DeeperThan => FilterSpec::DeeperThan(depth()?),
            FilterKind::ShallowerThan => FilterSpec::ShallowerThan(depth()?),
            FilterKind::LongerThan => FilterSpec::LongerThan(seconds()?),
            FilterKind::ShorterThan => FilterSpec::ShorterThan(seconds()?),
            FilterKind::AfterDate => FilterSpec::AfterDate(date()?),
            FilterKind::BeforeDate => FilterSpec::BeforeDate(date()?),
            FilterKind::BetweenDates => FilterSpec::BetweenDates(
                date()?,
                params.end_date.ok_or_else(|| missing(ParamSlot::EndDate))?,
            ),
            FilterKind::BetweenStartTimes => FilterSpec::BetweenStartTimes(
                time()?,
                params.end_time.ok_or_else(|| missing(ParamSlot::EndTime))?,
            ),
            FilterKind::StartedAtOrAfter => FilterSpec::StartedAtOrAfter(time()?),
            FilterKind::StartedBefore => FilterSpec::StartedBefore(time()?),
            FilterKind::HadBuddy => FilterSpec::HadBuddy(text()?),
            FilterKind::AtLocation => FilterSpec::AtLocation(text()?),
            FilterKind::DescriptionContains => FilterSpec::DescriptionContains(text()?),
            FilterKind::UsedGas => {
                FilterSpec::UsedGas(params.gas.ok_or_else(|| missing(ParamSlot::Gas))?)
            }
            FilterKind::DeeperThanForDuration => FilterSpec::DeeperThanForDuration {
                depth: depth()?,
                seconds: seconds()?,
            },
            FilterKind::ContinuousDepthDuration => FilterSpec::ContinuousDepthDuration {
                min_depth: depth()?,
                min_minutes: params.minutes.ok_or_else(|| missing(ParamSlot::Minutes))?,
            },
            FilterKind::AverageTemperatureBetween => {
                if params.min_temp.is_none() && params.max_temp.is_none() {
                    return Err(DiveLogError::validation(format!(
                        "filter '{}' requires 'min_temp' or 'max_temp'",
                        self.name()
                    )));
                }
                FilterSpec::AverageTemperatureBetween {
                    min: params.min_temp,
                    max: params.max_temp,
                }
            }
            FilterKind::MaxCnsAtMost => {
                FilterSpec::MaxCnsAtMost(params.cns.ok_or_else(|| missing(ParamSlot::Cns))?)
            }
        })
    }

    /// Builds the predicate from positional arguments.
    pub fn build_positional(&self, args: &[Argument]) -> Result<FilterSpec> {
        let slots = self.slots();
        if args.len() > slots.len() {
            return Err(DiveLogError::validation(format!(
                "filter '{}' takes at most {} argument(s), got {}",
                self.name(),
                slots.len(),
                args.len()
            )));
        }
        let mut params = FilterParams::default();
        for (slot, arg) in slots.iter().zip(args) {
            slot.assign(&mut params, arg)?;
        }
        self.build(&params)
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Applies the filters in order, each to the previous output.
pub fn filter_records(records: &[Arc<DiveRecord>], filters: &[FilterSpec]) -> Vec<Arc<DiveRecord>> {
    let mut current = records.to_vec();
    for filter in filters {
        current.retain(|record| filter.matches(record));
    }
    current
}

/// Looks up each filter by name, binding all of them to the same parameter
/// bag. Every name is resolved before any record is touched.
pub fn filter_records_by_name(
    records: &[Arc<DiveRecord>],
    filter_names: &[&str],
    params: &FilterParams,
) -> Result<Vec<Arc<DiveRecord>>> {
    let specs = filter_names
        .iter()
        .map(|name| FilterKind::from_name(name)?.build(params))
        .collect::<Result<Vec<_>>>()?;
    Ok(filter_records(records, &specs))
}

/// Parses a textual chain such as `deeper_than(20), longer_than(600)`.
pub fn parse_filter_chain(input: &str) -> Result<Vec<FilterSpec>> {
    parse_chain(input)?
        .iter()
        .map(|call| FilterKind::from_name(&call.name)?.build_positional(&call.args))
        .collect()
}

/// Human-readable description of a chain, used as working-set provenance.
pub fn describe_chain(filters: &[FilterSpec]) -> String {
    filters
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join(" and ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiveMetadata, RecordKey, Timeline};
    use chrono::NaiveDate;

    fn at(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    fn dive(key: &str, start: NaiveDateTime, depths: &[f64], spacing: f64) -> DiveRecord {
        DiveRecord::new(
            RecordKey::from(key),
            start,
            Timeline {
                depths: depths.to_vec(),
                temperatures: vec![16; depths.len()],
                n2_load: vec![0; depths.len()],
                cns_load: vec![12; depths.len()],
                timestamps: (0..depths.len()).map(|i| i as f64 * spacing).collect(),
            },
            DiveMetadata {
                location_name: "Molasses Reef".to_string(),
                buddy: "Ana Lopez".to_string(),
                gas_type: Some(GasType::Nitrox),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn empty_dive() -> DiveRecord {
        DiveRecord::new(
            RecordKey::from("empty"),
            at((2024, 1, 1), (8, 0)),
            Timeline::default(),
            DiveMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_depth_predicates() {
        let d = dive("a", at((2024, 5, 1), (9, 0)), &[0.0, 18.0, 22.0, 4.0], 60.0);
        assert!(deeper_than(&d, 20.0));
        assert!(!deeper_than(&d, 22.0));
        assert!(shallower_than(&d, 25.0));
        assert!(!shallower_than(&d, 22.0));
    }

    #[test]
    fn test_empty_timeline_depth_predicates_are_false() {
        let d = empty_dive();
        assert!(!deeper_than(&d, 0.0));
        assert!(!shallower_than(&d, 100.0));
        assert!(!continuous_depth_duration(&d, 0.0, 0.0));
    }

    #[test]
    fn test_dates_are_exclusive() {
        let start = at((2024, 6, 1), (0, 0));
        let d = dive("a", start, &[0.0, 10.0], 60.0);
        assert!(!between_dates(&d, start, at((2024, 7, 1), (0, 0))));
        assert!(between_dates(&d, at((2024, 5, 31), (0, 0)), at((2024, 7, 1), (0, 0))));
    }

    #[test]
    fn test_start_time_of_day() {
        let d = dive("a", at((2023, 2, 10), (14, 30)), &[0.0, 10.0], 60.0);
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert!(between_start_times(&d, t(13, 0), t(16, 0)));
        assert!(!between_start_times(&d, t(14, 30), t(16, 0)));
        assert!(between_start_times(&d, t(22, 0), t(15, 0)));
        assert!(started_at_or_after(&d, t(14, 30)));
        assert!(!started_before(&d, t(14, 30)));
    }

    #[test]
    fn test_people_and_location_matching() {
        let d = dive("a", at((2024, 5, 1), (9, 0)), &[0.0, 10.0], 60.0);
        assert!(had_buddy(&d, "ana"));
        assert!(had_buddy(&d, "LOPEZ"));
        assert!(!had_buddy(&d, "marco"));
        assert!(at_location(&d, "molasses"));

        let solo = empty_dive();
        assert!(!had_buddy(&solo, ""));
        assert!(!at_location(&solo, ""));
    }

    #[test]
    fn test_used_gas() {
        let d = dive("a", at((2024, 5, 1), (9, 0)), &[0.0, 10.0], 60.0);
        assert!(used_gas(&d, GasType::parse("NITROX").unwrap()));
        assert!(!used_gas(&d, GasType::Air));
        assert!(!used_gas(&empty_dive(), GasType::Air));
    }

    #[test]
    fn test_continuous_depth_duration_requires_contiguous_streak() {
        let start = at((2024, 8, 3), (10, 0));
        let d = dive("a", start, &[10.0, 25.0, 26.0, 24.0, 10.0, 26.0, 26.0, 26.0], 60.0);
        assert!(continuous_depth_duration(&d, 25.0, 2.0));

        let broken = dive("b", start, &[10.0, 25.0, 24.0, 25.0, 24.0, 26.0, 24.0, 26.0], 60.0);
        assert!(!continuous_depth_duration(&broken, 25.0, 2.0));
        // Accumulated but non-contiguous time would reach three minutes.
        assert!(deeper_than(&broken, 25.0));
    }

    #[test]
    fn test_temperature_and_cns_filters() {
        let d = dive("a", at((2024, 5, 1), (9, 0)), &[0.0, 10.0], 60.0);
        assert!(average_temperature_between(&d, Some(15.0), Some(16.0)));
        assert!(!average_temperature_between(&d, Some(17.0), None));
        assert!(!average_temperature_between(&empty_dive(), None, Some(40.0)));
        assert!(max_cns_at_most(&d, 12.0));
        assert!(!max_cns_at_most(&d, 11.0));
        assert!(max_cns_at_most(&empty_dive(), 0.0));
    }

    #[test]
    fn test_filter_records_by_name() {
        let records: Vec<Arc<DiveRecord>> = vec![
            Arc::new(dive("shallow", at((2024, 1, 5), (9, 0)), &[0.0, 8.0, 0.0], 300.0)),
            Arc::new(dive("deep_short", at((2024, 1, 6), (9, 0)), &[0.0, 30.0, 0.0], 120.0)),
            Arc::new(dive("deep_long", at((2024, 1, 7), (9, 0)), &[0.0, 30.0, 0.0], 600.0)),
        ];
        let params = FilterParams {
            depth: Some(20.0),
            seconds: Some(600.0),
            ..Default::default()
        };
        let result =
            filter_records_by_name(&records, &["deeper_than", "longer_than"], &params).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].key().0, "deep_long");
    }

    #[test]
    fn test_unknown_filter_lists_valid_names() {
        let err = filter_records_by_name(&[], &["colder_than"], &FilterParams::default())
            .unwrap_err();
        match err {
            DiveLogError::FilterNotFound { name, valid } => {
                assert_eq!(name, "colder_than");
                assert!(valid.contains("continuous_depth_duration"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_missing_param_is_validation_error() {
        let err = FilterKind::DeeperThan.build(&FilterParams::default()).unwrap_err();
        assert_eq!(
            err,
            DiveLogError::Validation("filter 'deeper_than' requires parameter 'depth'".to_string())
        );
    }

    #[test]
    fn test_parse_filter_chain() {
        let specs = parse_filter_chain(
            "deeper_than(20), between_dates(2024-01-01, 2024-12-31) & had_buddy(\"Ana\") and used_gas(Nitrox)",
        )
        .unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0], FilterSpec::DeeperThan(20.0));
        assert_eq!(
            specs[1],
            FilterSpec::BetweenDates(at((2024, 1, 1), (0, 0)), at((2024, 12, 31), (0, 0)))
        );
        assert_eq!(specs[2], FilterSpec::HadBuddy("Ana".to_string()));
        assert_eq!(specs[3], FilterSpec::UsedGas(GasType::Nitrox));
        assert_eq!(
            describe_chain(&specs[..2]),
            "depth >20m and date 2024-01-01 to 2024-12-31"
        );
    }

    #[test]
    fn test_text_params_keep_written_form() {
        let specs =
            parse_filter_chain("at_location(2024-01-01), had_buddy(6:05), at_location(007)").unwrap();
        assert_eq!(specs[0], FilterSpec::AtLocation("2024-01-01".to_string()));
        assert_eq!(specs[1], FilterSpec::HadBuddy("6:05".to_string()));
        assert_eq!(specs[2], FilterSpec::AtLocation("007".to_string()));
    }

    #[test]
    fn test_parse_filter_chain_type_errors() {
        assert!(matches!(
            parse_filter_chain("deeper_than(deep)"),
            Err(DiveLogError::Validation(_))
        ));
        assert!(matches!(
            parse_filter_chain("deeper_than(20, 30)"),
            Err(DiveLogError::Validation(_))
        ));
        assert!(matches!(
            parse_filter_chain("warmer_than(20)"),
            Err(DiveLogError::FilterNotFound { .. })
        ));
    }
}
