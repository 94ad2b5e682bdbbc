//! Tool-call surface for the query orchestrator.
//!
//! [`DiveLogTools`] owns the loaded universe and the engine configuration.
//! Every call receives the caller's [`SessionState`]; filter and search tools
//! replace its working set, and statistics and charts read it back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{name_list, DiveLogError, Result};
use crate::filters::{
    describe_chain, filter_records, parse_date_param, parse_filter_chain, parse_time_param,
    FilterSpec,
};
use crate::grouping::{
    bar_groups, custom_groups, histogram, pie_groups, scatter, CategoryKey, ChartKind, Histogram,
    Metric, ScatterSeries, Tabulation,
};
use crate::metrics::{compute, AggregateResult, StatKind, StatParams};
use crate::models::{DiveRecord, GasType};
use crate::session::{SessionState, WorkingSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolName {
    FilterDivesByDepth,
    FilterDivesByDate,
    FilterDivesByDuration,
    FilterDivesByBuddy,
    FilterDivesByLocation,
    FilterDivesByStartTime,
    FilterDivesByTemperature,
    FilterDivesByCnsLoad,
    FilterDivesByGasType,
    FilterDivesByDurationAtDepth,
    FilterDives,
    SearchDives,
    LabelFilteredDives,
    CalculateStatistic,
    CalculateTimeBelowDepth,
    PlotBarChart,
    PlotPieChart,
    PlotHistogram,
    PlotScatter,
    ListDives,
    GetDiveSummary,
}

impl ToolName {
    pub const ALL: [ToolName; 21] = [
        ToolName::FilterDivesByDepth,
        ToolName::FilterDivesByDate,
        ToolName::FilterDivesByDuration,
        ToolName::FilterDivesByBuddy,
        ToolName::FilterDivesByLocation,
        ToolName::FilterDivesByStartTime,
        ToolName::FilterDivesByTemperature,
        ToolName::FilterDivesByCnsLoad,
        ToolName::FilterDivesByGasType,
        ToolName::FilterDivesByDurationAtDepth,
        ToolName::FilterDives,
        ToolName::SearchDives,
        ToolName::LabelFilteredDives,
        ToolName::CalculateStatistic,
        ToolName::CalculateTimeBelowDepth,
        ToolName::PlotBarChart,
        ToolName::PlotPieChart,
        ToolName::PlotHistogram,
        ToolName::PlotScatter,
        ToolName::ListDives,
        ToolName::GetDiveSummary,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolName::FilterDivesByDepth => "filter_dives_by_depth",
            ToolName::FilterDivesByDate => "filter_dives_by_date",
            ToolName::FilterDivesByDuration => "filter_dives_by_duration",
            ToolName::FilterDivesByBuddy => "filter_dives_by_buddy",
            ToolName::FilterDivesByLocation => "filter_dives_by_location",
            ToolName::FilterDivesByStartTime => "filter_dives_by_start_time",
            ToolName::FilterDivesByTemperature => "filter_dives_by_temperature",
            ToolName::FilterDivesByCnsLoad => "filter_dives_by_cns_load",
            ToolName::FilterDivesByGasType => "filter_dives_by_gas_type",
            ToolName::FilterDivesByDurationAtDepth => "filter_dives_by_duration_at_depth",
            ToolName::FilterDives => "filter_dives",
            ToolName::SearchDives => "search_dives",
            ToolName::LabelFilteredDives => "label_filtered_dives",
            ToolName::CalculateStatistic => "calculate_statistic",
            ToolName::CalculateTimeBelowDepth => "calculate_time_below_depth",
            ToolName::PlotBarChart => "plot_bar_chart",
            ToolName::PlotPieChart => "plot_pie_chart",
            ToolName::PlotHistogram => "plot_histogram",
            ToolName::PlotScatter => "plot_scatter",
            ToolName::ListDives => "list_dives",
            ToolName::GetDiveSummary => "get_dive_summary",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim();
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.name() == wanted)
            .ok_or_else(|| DiveLogError::UnknownTool {
                name: name.to_string(),
                valid: name_list(ToolName::ALL.iter().map(|t| t.name())),
            })
    }

    /// One-line description handed to the orchestrator.
    pub fn description(&self) -> &'static str {
        match self {
            ToolName::FilterDivesByDepth => {
                "Filter dives by max depth: min_depth (m) and/or max_depth (m)."
            }
            ToolName::FilterDivesByDate => {
                "Filter dives by date: start_date and optional end_date, both YYYY-MM-DD."
            }
            ToolName::FilterDivesByDuration => {
                "Filter dives by length: min_duration_minutes and/or max_duration_minutes."
            }
            ToolName::FilterDivesByBuddy => "Filter dives whose buddy contains buddy_name.",
            ToolName::FilterDivesByLocation => {
                "Filter dives whose location contains location_name."
            }
            ToolName::FilterDivesByStartTime => {
                "Filter dives by time of day: start_after and/or start_before, HH:MM."
            }
            ToolName::FilterDivesByTemperature => {
                "Filter dives by average water temperature: min_temp and/or max_temp in °C."
            }
            ToolName::FilterDivesByCnsLoad => "Filter dives whose peak CNS is at most max_cns_load %.",
            ToolName::FilterDivesByGasType => "Filter dives by gas_type: air, nitrox or trimix.",
            ToolName::FilterDivesByDurationAtDepth => {
                "Filter dives with min_duration continuous minutes at or below min_depth."
            }
            ToolName::FilterDives => {
                "Apply a filter chain such as \"deeper_than(20), had_buddy(Ana)\"."
            }
            ToolName::SearchDives => {
                "Search query text in search_field: location, buddy or description."
            }
            ToolName::LabelFilteredDives => {
                "Store the current filtered dives under label for grouped scatter plots."
            }
            ToolName::CalculateStatistic => {
                "Compute stat_type over the filtered dives, or all dives when none are filtered."
            }
            ToolName::CalculateTimeBelowDepth => {
                "Total minutes spent deeper than depth_threshold (m)."
            }
            ToolName::PlotBarChart => {
                "Bar chart by category_by (month, year, location, buddy, gas_type) or custom_data."
            }
            ToolName::PlotPieChart => {
                "Pie chart by category_by (location, buddy, gas_type) or custom_data."
            }
            ToolName::PlotHistogram => {
                "Histogram of metric (depth, duration, temperature, cns_load) with bin_count."
            }
            ToolName::PlotScatter => {
                "Scatter of y_metric against x_metric; use_labeled_groups for one series per label."
            }
            ToolName::ListDives => "List dives with limit and sort_by: date, depth or duration.",
            ToolName::GetDiveSummary => "Details for the dive at dive_index.",
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Parameters ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct DepthParams {
    min_depth: Option<f64>,
    max_depth: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DateParams {
    start_date: String,
    end_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DurationParams {
    min_duration_minutes: Option<f64>,
    max_duration_minutes: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct BuddyParams {
    buddy_name: String,
}

#[derive(Debug, Deserialize)]
struct LocationParams {
    location_name: String,
}

#[derive(Debug, Deserialize)]
struct StartTimeParams {
    start_after: Option<String>,
    start_before: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemperatureParams {
    min_temp: Option<f64>,
    max_temp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CnsParams {
    max_cns_load: f64,
}

#[derive(Debug, Deserialize)]
struct GasParams {
    gas_type: String,
}

#[derive(Debug, Deserialize)]
struct DurationAtDepthParams {
    min_depth: f64,
    min_duration: f64,
}

#[derive(Debug, Deserialize)]
struct ChainParams {
    filters: String,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    search_field: String,
}

#[derive(Debug, Deserialize)]
struct LabelParams {
    label: String,
}

#[derive(Debug, Deserialize)]
struct StatisticParams {
    stat_type: String,
    depth_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TimeBelowDepthParams {
    depth_threshold: f64,
}

#[derive(Debug, Deserialize)]
struct ChartParams {
    category_by: Option<String>,
    custom_data: Option<HashMap<String, u64>>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistogramParams {
    metric: String,
    bin_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ScatterParams {
    x_metric: String,
    y_metric: String,
    #[serde(default)]
    use_labeled_groups: bool,
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<usize>,
    sort_by: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    dive_index: i64,
}

fn parse_params<T: DeserializeOwned>(tool: ToolName, params: &Value) -> Result<T> {
    let params = match params {
        Value::Null => Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(params).map_err(|e| {
        DiveLogError::validation(format!("invalid parameters for {}: {}", tool, e))
    })
}

// ── Outputs ─────────────────────────────────────────────────────────────────

/// Short description of one dive.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiveSummary {
    pub key: String,
    pub date: NaiveDateTime,
    pub max_depth_m: f64,
    pub duration_min: f64,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub buddy: Option<String>,
}

impl DiveSummary {
    pub fn of(record: &DiveRecord) -> Self {
        let location = &record.location().name;
        let buddy = &record.people().buddy;
        DiveSummary {
            key: record.key().to_string(),
            date: record.start_time(),
            max_depth_m: record.max_depth().unwrap_or(0.0),
            duration_min: record.duration_sec() / 60.0,
            location: if location.is_empty() {
                "Unknown".to_string()
            } else {
                location.clone()
            },
            buddy: (!buddy.is_empty()).then(|| buddy.clone()),
        }
    }

    fn line(&self) -> String {
        format!(
            "{}: {:.1}m, {:.0}min at {}",
            self.date.format("%Y-%m-%d"),
            self.max_depth_m,
            self.duration_min,
            self.location
        )
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterSummary {
    pub description: String,
    pub total_count: usize,
    pub universe_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth_range: Option<(f64, f64)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_range: Option<(NaiveDateTime, NaiveDateTime)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_depth: Option<f64>,
    pub preview: Vec<DiveSummary>,
}

impl FilterSummary {
    fn build(
        description: String,
        matched: &[Arc<DiveRecord>],
        universe_count: usize,
        preview_limit: usize,
    ) -> Self {
        let depths: Vec<f64> = matched.iter().filter_map(|r| r.max_depth()).collect();
        let depth_range = depths
            .iter()
            .copied()
            .reduce(f64::min)
            .zip(depths.iter().copied().reduce(f64::max));
        let date_range = matched
            .iter()
            .map(|r| r.start_time())
            .min()
            .zip(matched.iter().map(|r| r.start_time()).max());
        let average_depth =
            (!depths.is_empty()).then(|| depths.iter().sum::<f64>() / depths.len() as f64);

        FilterSummary {
            description,
            total_count: matched.len(),
            universe_count,
            depth_range,
            date_range,
            average_depth,
            preview: matched
                .iter()
                .take(preview_limit)
                .map(|r| DiveSummary::of(r))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GroupSize {
    pub label: String,
    pub count: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ListedDive {
    pub index: usize,
    #[serde(flatten)]
    pub summary: DiveSummary,
}

/// Everything known about one dive.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiveDetail {
    pub index: usize,
    pub key: String,
    pub start_time: NaiveDateTime,
    pub duration_min: f64,
    pub max_depth_m: Option<f64>,
    pub average_depth_m: Option<f64>,
    pub location: String,
    pub description: Option<String>,
    pub buddy: Option<String>,
    pub divemaster: Option<String>,
    pub group: Vec<String>,
    pub gas_type: Option<GasType>,
    pub start_pressure_bar: i32,
    pub end_pressure_bar: i32,
    pub air_consumption_rate: Option<f64>,
    pub temperature_range: Option<(i32, i32)>,
    pub suit: Option<String>,
    pub weights_kg: f64,
}

impl DiveDetail {
    fn of(index: usize, record: &DiveRecord) -> Self {
        let timeline = record.timeline();
        let summary = DiveSummary::of(record);
        let temps = &timeline.temperatures;
        DiveDetail {
            index,
            key: summary.key,
            start_time: record.start_time(),
            duration_min: summary.duration_min,
            max_depth_m: record.max_depth(),
            average_depth_m: (!timeline.is_empty())
                .then(|| timeline.depths.iter().sum::<f64>() / timeline.len() as f64),
            location: summary.location,
            description: record.location().description.clone(),
            buddy: summary.buddy,
            divemaster: record.people().divemaster.clone(),
            group: record.people().group.iter().cloned().collect(),
            gas_type: record.gas().gas_type,
            start_pressure_bar: record.gas().start_pressure_bar,
            end_pressure_bar: record.gas().end_pressure_bar,
            air_consumption_rate: record.air_consumption_rate(),
            temperature_range: temps
                .iter()
                .copied()
                .min()
                .zip(temps.iter().copied().max()),
            suit: record.gear().suit.clone(),
            weights_kg: record.gear().weights_kg,
        }
    }
}

/// Structured result of a tool call.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutput {
    Filtered(FilterSummary),
    Labeled {
        label: String,
        count: usize,
        groups: Vec<GroupSize>,
    },
    Statistic(AggregateResult),
    CategoryChart {
        title: String,
        context: String,
        table: Tabulation,
    },
    Histogram {
        title: String,
        context: String,
        histogram: Histogram,
    },
    Scatter {
        title: String,
        context: String,
        x_metric: Metric,
        y_metric: Metric,
        series: Vec<ScatterSeries>,
    },
    DiveList {
        total: usize,
        sort_by: String,
        dives: Vec<ListedDive>,
    },
    DiveDetail(DiveDetail),
}

impl ToolOutput {
    /// Plain-text rendering for the orchestrator's transcript.
    pub fn to_text(&self) -> String {
        match self {
            ToolOutput::Filtered(summary) => filtered_text(summary),
            ToolOutput::Labeled {
                label,
                count,
                groups,
            } => {
                let groups = groups
                    .iter()
                    .map(|g| format!("'{}' ({} dives)", g.label, g.count))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "Labeled {} dives as '{}'. Current groups: {}. Use plot_scatter with use_labeled_groups=true to compare them.",
                    count, label, groups
                )
            }
            ToolOutput::Statistic(result) => statistic_text(result),
            ToolOutput::CategoryChart {
                title,
                context,
                table,
            } => {
                let mut lines = vec![format!(
                    "Created {} chart '{}'. {}. {} categories, {} dives.",
                    match table.chart {
                        ChartKind::Bar => "bar",
                        ChartKind::Pie => "pie",
                    },
                    title,
                    context,
                    table.categories.len(),
                    table.total
                )];
                lines.extend(
                    table
                        .categories
                        .iter()
                        .map(|c| format!("  - {}: {}", c.category, c.count)),
                );
                lines.join("\n")
            }
            ToolOutput::Histogram {
                title,
                context,
                histogram,
            } => {
                if histogram.bins.is_empty() {
                    return format!("No valid {} data found. {}.", histogram.metric, context);
                }
                let mut lines = vec![format!(
                    "Created histogram '{}'. {}. Showing {} data points.",
                    title, context, histogram.total
                )];
                lines.extend(histogram.bins.iter().map(|b| {
                    format!(
                        "  - {:.1}-{:.1}{}: {}",
                        b.lower, b.upper, histogram.unit, b.count
                    )
                }));
                lines.join("\n")
            }
            ToolOutput::Scatter {
                title,
                context,
                series,
                ..
            } => {
                let points: usize = series.iter().map(|s| s.points.len()).sum();
                let mut lines = vec![format!(
                    "Created scatter plot '{}'. {}. Showing {} data points.",
                    title, context, points
                )];
                lines.extend(
                    series
                        .iter()
                        .map(|s| format!("  - {}: {} points", s.label, s.points.len())),
                );
                lines.join("\n")
            }
            ToolOutput::DiveList {
                total,
                sort_by,
                dives,
            } => {
                if *total == 0 {
                    return "No dives in the log.".to_string();
                }
                let mut lines = vec![format!(
                    "Showing {} of {} dives (sorted by {}):",
                    dives.len(),
                    total,
                    sort_by
                )];
                lines.extend(
                    dives
                        .iter()
                        .map(|d| format!("[{}] {}", d.index, d.summary.line())),
                );
                if *total > dives.len() {
                    lines.push(format!("... and {} more dives", total - dives.len()));
                }
                lines.join("\n")
            }
            ToolOutput::DiveDetail(detail) => detail_text(detail),
        }
    }
}

fn filtered_text(summary: &FilterSummary) -> String {
    if summary.total_count == 0 {
        return format!("No dives found matching {}.", summary.description);
    }
    let mut lines = vec![format!(
        "Found {} of {} dives matching {}:",
        summary.total_count, summary.universe_count, summary.description
    )];
    if let Some((low, high)) = summary.depth_range {
        lines.push(format!("- Depth range: {:.1}m to {:.1}m", low, high));
    }
    if let Some(avg) = summary.average_depth {
        lines.push(format!("- Average max depth: {:.1}m", avg));
    }
    if let Some((first, last)) = summary.date_range {
        lines.push(format!(
            "- Date range: {} to {}",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        ));
    }
    lines.push("Dive summaries:".to_string());
    lines.extend(summary.preview.iter().map(|d| format!("  - {}", d.line())));
    if summary.total_count > summary.preview.len() {
        lines.push(format!(
            "  ... and {} more dives",
            summary.total_count - summary.preview.len()
        ));
    }
    lines.join("\n")
}

fn statistic_text(result: &AggregateResult) -> String {
    let mut lines = vec![format!("{}: {} {}", result.stat_type, result.value, result.unit)];
    if let Some(breakdown) = &result.breakdown {
        lines.extend(
            breakdown
                .iter()
                .map(|entry| format!("  - {}: {}", entry.key, entry.value)),
        );
    }
    if let Some(context) = &result.context {
        lines.push(context.clone());
    }
    lines.join("\n")
}

fn detail_text(detail: &DiveDetail) -> String {
    let mut lines = vec![
        format!("Dive #{} ({}) details:", detail.index, detail.key),
        format!("- Date: {}", detail.start_time.format("%Y-%m-%d %H:%M")),
        format!("- Duration: {:.0} minutes", detail.duration_min),
    ];
    if let (Some(max), Some(avg)) = (detail.max_depth_m, detail.average_depth_m) {
        lines.push(format!("- Max depth: {:.1}m", max));
        lines.push(format!("- Average depth: {:.1}m", avg));
    }
    lines.push(format!("- Location: {}", detail.location));
    if let Some(description) = &detail.description {
        lines.push(format!("- Description: {}", description));
    }
    lines.push(format!(
        "- Buddy: {}",
        detail.buddy.as_deref().unwrap_or("Not specified")
    ));
    if let Some(divemaster) = &detail.divemaster {
        lines.push(format!("- Divemaster: {}", divemaster));
    }
    if !detail.group.is_empty() {
        lines.push(format!("- Group: {}", detail.group.join(", ")));
    }
    lines.push(format!(
        "- Gas: {}",
        detail.gas_type.map(|g| g.as_str()).unwrap_or("Unknown")
    ));
    lines.push(format!(
        "- Tank pressure: {} -> {} bar",
        detail.start_pressure_bar, detail.end_pressure_bar
    ));
    if let Some(rate) = detail.air_consumption_rate {
        lines.push(format!("- Air consumption: {:.1} bar/minute", rate));
    }
    if let Some((low, high)) = detail.temperature_range {
        lines.push(format!("- Temperature: {}°C to {}°C", low, high));
    }
    if let Some(suit) = &detail.suit {
        lines.push(format!("- Suit: {}", suit));
    }
    if detail.weights_kg > 0.0 {
        lines.push(format!("- Weights: {}kg", detail.weights_kg));
    }
    lines.join("\n")
}

// ── Dispatch ────────────────────────────────────────────────────────────────

pub struct DiveLogTools {
    universe: Vec<Arc<DiveRecord>>,
    config: EngineConfig,
}

impl DiveLogTools {
    pub fn new(universe: Vec<Arc<DiveRecord>>, config: EngineConfig) -> Self {
        DiveLogTools { universe, config }
    }

    pub fn universe(&self) -> &[Arc<DiveRecord>] {
        &self.universe
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Swaps in a freshly loaded universe. Sessions holding records from the
    /// old one keep them until cleared.
    pub fn replace_universe(&mut self, universe: Vec<Arc<DiveRecord>>) {
        debug!(count = universe.len(), "universe replaced");
        self.universe = universe;
    }

    pub fn call(&self, state: &mut SessionState, name: &str, params: &Value) -> Result<ToolOutput> {
        let tool = ToolName::from_name(name)?;
        debug!(tool = %tool, active = state.is_active(), "tool call");

        match tool {
            ToolName::FilterDivesByDepth => {
                let p: DepthParams = parse_params(tool, params)?;
                let mut specs = Vec::new();
                if let Some(min) = p.min_depth {
                    specs.push(FilterSpec::DeeperThan(min));
                }
                if let Some(max) = p.max_depth {
                    specs.push(FilterSpec::ShallowerThan(max));
                }
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByDate => {
                let p: DateParams = parse_params(tool, params)?;
                let start = parse_date_param(&p.start_date).ok_or_else(|| {
                    DiveLogError::validation(format!(
                        "Invalid start_date format: {}. Use YYYY-MM-DD format.",
                        p.start_date
                    ))
                })?;
                let spec = match p.end_date {
                    Some(end_date) => {
                        let end = parse_date_param(&end_date).ok_or_else(|| {
                            DiveLogError::validation(format!(
                                "Invalid end_date format: {}. Use YYYY-MM-DD format.",
                                end_date
                            ))
                        })?;
                        FilterSpec::BetweenDates(start, end)
                    }
                    None => FilterSpec::AfterDate(start),
                };
                self.apply(state, tool, vec![spec], None, self.config.preview_limit)
            }
            ToolName::FilterDivesByDuration => {
                let p: DurationParams = parse_params(tool, params)?;
                let mut specs = Vec::new();
                if let Some(min) = p.min_duration_minutes {
                    specs.push(FilterSpec::LongerThan(min * 60.0));
                }
                if let Some(max) = p.max_duration_minutes {
                    specs.push(FilterSpec::ShorterThan(max * 60.0));
                }
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByBuddy => {
                let p: BuddyParams = parse_params(tool, params)?;
                let specs = vec![FilterSpec::HadBuddy(p.buddy_name)];
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByLocation => {
                let p: LocationParams = parse_params(tool, params)?;
                let specs = vec![FilterSpec::AtLocation(p.location_name)];
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByStartTime => {
                let p: StartTimeParams = parse_params(tool, params)?;
                let mut specs = Vec::new();
                if let Some(after) = p.start_after {
                    let time = parse_time_param(&after).ok_or_else(|| {
                        DiveLogError::validation(format!(
                            "Invalid start_after format: {}. Use HH:MM format.",
                            after
                        ))
                    })?;
                    specs.push(FilterSpec::StartedAtOrAfter(time));
                }
                if let Some(before) = p.start_before {
                    let time = parse_time_param(&before).ok_or_else(|| {
                        DiveLogError::validation(format!(
                            "Invalid start_before format: {}. Use HH:MM format.",
                            before
                        ))
                    })?;
                    specs.push(FilterSpec::StartedBefore(time));
                }
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByTemperature => {
                let p: TemperatureParams = parse_params(tool, params)?;
                let specs = if p.min_temp.is_some() || p.max_temp.is_some() {
                    vec![FilterSpec::AverageTemperatureBetween {
                        min: p.min_temp,
                        max: p.max_temp,
                    }]
                } else {
                    Vec::new()
                };
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByCnsLoad => {
                let p: CnsParams = parse_params(tool, params)?;
                let specs = vec![FilterSpec::MaxCnsAtMost(p.max_cns_load)];
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByGasType => {
                let p: GasParams = parse_params(tool, params)?;
                let specs = vec![FilterSpec::UsedGas(GasType::parse(&p.gas_type)?)];
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::FilterDivesByDurationAtDepth => {
                let p: DurationAtDepthParams = parse_params(tool, params)?;
                let specs = vec![FilterSpec::ContinuousDepthDuration {
                    min_depth: p.min_depth,
                    min_minutes: p.min_duration,
                }];
                self.apply(state, tool, specs, None, self.config.detail_limit)
            }
            ToolName::FilterDives => {
                let p: ChainParams = parse_params(tool, params)?;
                let specs = parse_filter_chain(&p.filters)?;
                self.apply(state, tool, specs, None, self.config.preview_limit)
            }
            ToolName::SearchDives => {
                let p: SearchParams = parse_params(tool, params)?;
                let field = p.search_field.trim().to_lowercase();
                let spec = match field.as_str() {
                    "location" => FilterSpec::AtLocation(p.query.clone()),
                    "buddy" => FilterSpec::HadBuddy(p.query.clone()),
                    "description" => FilterSpec::DescriptionContains(p.query.clone()),
                    _ => {
                        return Err(DiveLogError::validation(format!(
                            "Invalid search_field: {}. Use 'location', 'buddy', or 'description'.",
                            p.search_field
                        )))
                    }
                };
                let description = format!("search '{}' in {}", p.query, field);
                self.apply(state, tool, vec![spec], Some(description), self.config.preview_limit)
            }
            ToolName::LabelFilteredDives => {
                let p: LabelParams = parse_params(tool, params)?;
                self.label(state, p.label)
            }
            ToolName::CalculateStatistic => {
                let p: StatisticParams = parse_params(tool, params)?;
                let kind = StatKind::from_name(&p.stat_type)?;
                self.statistic(state, kind, p.depth_threshold)
            }
            ToolName::CalculateTimeBelowDepth => {
                let p: TimeBelowDepthParams = parse_params(tool, params)?;
                self.statistic(state, StatKind::TimeBelowDepth, Some(p.depth_threshold))
            }
            ToolName::PlotBarChart => {
                let p: ChartParams = parse_params(tool, params)?;
                self.category_chart(state, ChartKind::Bar, p)
            }
            ToolName::PlotPieChart => {
                let p: ChartParams = parse_params(tool, params)?;
                self.category_chart(state, ChartKind::Pie, p)
            }
            ToolName::PlotHistogram => {
                let p: HistogramParams = parse_params(tool, params)?;
                let metric = Metric::from_name(&p.metric)?;
                let target = state.target(&self.universe);
                let bins = self.config.clamp_bins(p.bin_count);
                Ok(ToolOutput::Histogram {
                    title: format!("Distribution of {} ({})", metric, metric.unit()),
                    context: target.scope.clone(),
                    histogram: histogram(target.records, metric, bins),
                })
            }
            ToolName::PlotScatter => {
                let p: ScatterParams = parse_params(tool, params)?;
                self.scatter_chart(state, p)
            }
            ToolName::ListDives => {
                let p: ListParams = parse_params(tool, params)?;
                self.list(p)
            }
            ToolName::GetDiveSummary => {
                let p: SummaryParams = parse_params(tool, params)?;
                self.detail(p.dive_index)
            }
        }
    }

    /// Filters the universe and makes the result the new working set.
    fn apply(
        &self,
        state: &mut SessionState,
        tool: ToolName,
        specs: Vec<FilterSpec>,
        description: Option<String>,
        preview_limit: usize,
    ) -> Result<ToolOutput> {
        if specs.is_empty() {
            return Err(DiveLogError::validation(format!(
                "{} needs at least one filter parameter",
                tool
            )));
        }
        let matched = filter_records(&self.universe, &specs);
        let description = description.unwrap_or_else(|| describe_chain(&specs));
        let summary = FilterSummary::build(
            description.clone(),
            &matched,
            self.universe.len(),
            preview_limit,
        );
        state.set_working_set(matched, description);
        Ok(ToolOutput::Filtered(summary))
    }

    fn label(&self, state: &mut SessionState, label: String) -> Result<ToolOutput> {
        if label.trim().is_empty() {
            return Err(DiveLogError::validation("label must not be empty"));
        }
        let records = match state.working_set() {
            WorkingSet::Active { records, .. } => records.clone(),
            WorkingSet::Empty => {
                return Err(DiveLogError::validation(
                    "No filtered dives to label. Apply a filter first, then label the result.",
                ))
            }
        };
        let count = records.len();
        state.add_labeled_group(label.clone(), records);
        let groups = state
            .labeled_groups()
            .iter()
            .map(|g| GroupSize {
                label: g.label.clone(),
                count: g.records.len(),
            })
            .collect();
        Ok(ToolOutput::Labeled {
            label,
            count,
            groups,
        })
    }

    fn statistic(
        &self,
        state: &SessionState,
        kind: StatKind,
        depth_threshold: Option<f64>,
    ) -> Result<ToolOutput> {
        let target = state.target(&self.universe);
        let result = compute(kind, target.records, &StatParams { depth_threshold })?;
        Ok(ToolOutput::Statistic(result.scoped(&target.scope)))
    }

    fn category_chart(
        &self,
        state: &SessionState,
        chart: ChartKind,
        p: ChartParams,
    ) -> Result<ToolOutput> {
        let top = self.config.pie_top_categories;
        if let Some(data) = &p.custom_data {
            let table = custom_groups(data, chart, top)?;
            return Ok(ToolOutput::CategoryChart {
                title: p.title.unwrap_or_else(|| "Custom grouping".to_string()),
                context: "Custom data".to_string(),
                table,
            });
        }
        let Some(category) = &p.category_by else {
            return Err(DiveLogError::validation(
                "Provide either category_by for auto-grouping or custom_data for custom groupings.",
            ));
        };
        let key = CategoryKey::from_name(category)?;
        let target = state.target(&self.universe);
        let table = match chart {
            ChartKind::Bar => bar_groups(target.records, key),
            ChartKind::Pie => pie_groups(target.records, key, top)?,
        };
        Ok(ToolOutput::CategoryChart {
            title: p.title.unwrap_or_else(|| format!("Dives by {}", key)),
            context: target.scope,
            table,
        })
    }

    fn scatter_chart(&self, state: &SessionState, p: ScatterParams) -> Result<ToolOutput> {
        let x = Metric::from_name(&p.x_metric)?;
        let y = Metric::from_name(&p.y_metric)?;
        let groups = state.labeled_groups();

        let (sources, context) = if p.use_labeled_groups && !groups.is_empty() {
            let sources: Vec<(String, Vec<Arc<DiveRecord>>)> = groups
                .iter()
                .map(|g| (g.label.clone(), g.records.clone()))
                .collect();
            let labels = groups
                .iter()
                .map(|g| g.label.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            (sources, format!("Grouped by labels: {}", labels))
        } else {
            let target = state.target(&self.universe);
            let label = if target.filtered {
                "Filtered dives"
            } else {
                "All dives"
            };
            (
                vec![(label.to_string(), target.records.to_vec())],
                target.scope,
            )
        };

        Ok(ToolOutput::Scatter {
            title: format!("{} vs {}", y, x),
            context,
            x_metric: x,
            y_metric: y,
            series: scatter(&sources, x, y)?,
        })
    }

    fn list(&self, p: ListParams) -> Result<ToolOutput> {
        let sort_by = p.sort_by.unwrap_or_else(|| "date".to_string()).to_lowercase();
        let limit = p.limit.unwrap_or(self.config.list_limit);

        let mut indexed: Vec<(usize, &Arc<DiveRecord>)> = self.universe.iter().enumerate().collect();
        match sort_by.as_str() {
            "date" => indexed.sort_by(|a, b| b.1.start_time().cmp(&a.1.start_time())),
            "depth" => indexed.sort_by(|a, b| {
                let (a, b) = (a.1.max_depth().unwrap_or(0.0), b.1.max_depth().unwrap_or(0.0));
                b.total_cmp(&a)
            }),
            "duration" => {
                indexed.sort_by(|a, b| b.1.duration_sec().total_cmp(&a.1.duration_sec()))
            }
            _ => {
                return Err(DiveLogError::validation(format!(
                    "Invalid sort_by: {}. Use 'date', 'depth', or 'duration'.",
                    sort_by
                )))
            }
        }

        Ok(ToolOutput::DiveList {
            total: self.universe.len(),
            sort_by,
            dives: indexed
                .into_iter()
                .take(limit)
                .map(|(index, record)| ListedDive {
                    index,
                    summary: DiveSummary::of(record),
                })
                .collect(),
        })
    }

    fn detail(&self, dive_index: i64) -> Result<ToolOutput> {
        if self.universe.is_empty() {
            return Err(DiveLogError::validation("No dives in the log."));
        }
        let record = usize::try_from(dive_index)
            .ok()
            .and_then(|index| self.universe.get(index).map(|record| (index, record)));
        match record {
            Some((index, record)) => Ok(ToolOutput::DiveDetail(DiveDetail::of(index, record))),
            None => Err(DiveLogError::validation(format!(
                "Invalid dive index: {}. Valid range: 0 to {}",
                dive_index,
                self.universe.len() - 1
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DiveMetadata, RecordKey, Timeline};
    use chrono::NaiveDate;
    use serde_json::json;

    fn dive(key: &str, date: (i32, u32, u32), hour: u32, max_depth: f64, meta: DiveMetadata) -> Arc<DiveRecord> {
        let start = NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap();
        let depths = vec![0.0, max_depth, max_depth, max_depth / 2.0, 0.0];
        Arc::new(
            DiveRecord::new(
                RecordKey::from(key),
                start,
                Timeline {
                    temperatures: vec![22, 20, 19, 20, 21],
                    n2_load: vec![0; depths.len()],
                    cns_load: vec![0, 3, 6, 8, 8],
                    timestamps: vec![0.0, 300.0, 1200.0, 2100.0, 2700.0],
                    depths,
                },
                meta,
            )
            .unwrap(),
        )
    }

    fn create_test_tools() -> DiveLogTools {
        let with = |location: &str, buddy: &str, gas: Option<GasType>| DiveMetadata {
            location_name: location.to_string(),
            buddy: buddy.to_string(),
            gas_type: gas,
            start_pressure_bar: 200,
            end_pressure_bar: 50,
            ..Default::default()
        };
        DiveLogTools::new(
            vec![
                dive("d0", (2023, 6, 10), 9, 12.0, with("House Reef", "Ana", Some(GasType::Air))),
                dive("d1", (2023, 11, 2), 14, 28.0, with("Blue Hole", "Marco", Some(GasType::Nitrox))),
                dive("d2", (2024, 3, 15), 7, 35.0, with("Blue Hole", "Ana", Some(GasType::Nitrox))),
                dive("d3", (2024, 7, 21), 16, 18.0, with("Canyon", "", None)),
            ],
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_unknown_tool() {
        let tools = create_test_tools();
        let err = tools
            .call(&mut SessionState::new(), "make_coffee", &json!({}))
            .unwrap_err();
        assert!(matches!(err, DiveLogError::UnknownTool { .. }));
        assert!(err.to_string().contains("filter_dives_by_depth"));
    }

    #[test]
    fn test_filter_then_statistic_uses_working_set() {
        let tools = create_test_tools();
        let mut state = SessionState::new();

        let out = tools
            .call(&mut state, "calculate_statistic", &json!({"stat_type": "dive_count"}))
            .unwrap();
        let ToolOutput::Statistic(result) = out else {
            panic!("expected a statistic");
        };
        assert_eq!(result.value, 4.0);
        assert!(result.context.unwrap().starts_with("Calculated on all 4 dives"));

        let out = tools
            .call(&mut state, "filter_dives_by_depth", &json!({"min_depth": 20}))
            .unwrap();
        let ToolOutput::Filtered(summary) = out else {
            panic!("expected a filter summary");
        };
        assert_eq!(summary.total_count, 2);
        assert_eq!(summary.description, "depth >20m");

        let out = tools
            .call(&mut state, "calculate_statistic", &json!({"stat_type": "average_depth"}))
            .unwrap();
        let ToolOutput::Statistic(result) = out else {
            panic!("expected a statistic");
        };
        assert_eq!(result.value, 31.5);
        assert_eq!(
            result.context.as_deref(),
            Some("Calculated on 2 filtered dives: depth >20m")
        );
    }

    #[test]
    fn test_summary_depths_skip_dives_without_samples() {
        let manual = |key: &str, location: &str| {
            let start = NaiveDate::from_ymd_opt(2024, 9, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap();
            let metadata = DiveMetadata {
                location_name: location.to_string(),
                duration_override_sec: Some(2400.0),
                ..Default::default()
            };
            Arc::new(DiveRecord::new(RecordKey::from(key), start, Timeline::default(), metadata).unwrap())
        };
        let located = |location: &str| DiveMetadata {
            location_name: location.to_string(),
            ..Default::default()
        };
        let tools = DiveLogTools::new(
            vec![
                dive("d1", (2023, 11, 2), 14, 28.0, located("Blue Hole")),
                dive("d2", (2024, 3, 15), 7, 35.0, located("Blue Hole")),
                manual("m1", "Blue Hole"),
                manual("m2", "Quarry"),
            ],
            EngineConfig::default(),
        );
        let mut state = SessionState::new();

        let out = tools
            .call(&mut state, "filter_dives_by_location", &json!({"location_name": "blue"}))
            .unwrap();
        let ToolOutput::Filtered(summary) = out else {
            panic!("expected a filter summary");
        };
        assert_eq!(summary.total_count, 3);
        assert_eq!(summary.depth_range, Some((28.0, 35.0)));
        assert_eq!(summary.average_depth, Some(31.5));

        let out = tools
            .call(&mut state, "filter_dives_by_location", &json!({"location_name": "quarry"}))
            .unwrap();
        let ToolOutput::Filtered(summary) = out else {
            panic!("expected a filter summary");
        };
        assert_eq!(summary.total_count, 1);
        assert_eq!(summary.depth_range, None);
        assert_eq!(summary.average_depth, None);
    }

    #[test]
    fn test_filters_overwrite_instead_of_intersecting() {
        let tools = create_test_tools();
        let mut state = SessionState::new();
        tools
            .call(&mut state, "filter_dives_by_buddy", &json!({"buddy_name": "marco"}))
            .unwrap();
        let out = tools
            .call(&mut state, "filter_dives_by_location", &json!({"location_name": "blue"}))
            .unwrap();
        let ToolOutput::Filtered(summary) = out else {
            panic!("expected a filter summary");
        };
        assert_eq!(summary.total_count, 2);
        assert_eq!(state.target(tools.universe()).records.len(), 2);
    }

    #[test]
    fn test_parameter_validation() {
        let tools = create_test_tools();
        let mut state = SessionState::new();

        let err = tools
            .call(&mut state, "filter_dives_by_date", &json!({"start_date": "2024/01/01"}))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid start_date format: 2024/01/01. Use YYYY-MM-DD format."
        );

        let err = tools
            .call(&mut state, "filter_dives_by_depth", &json!({}))
            .unwrap_err();
        assert!(matches!(err, DiveLogError::Validation(_)));

        let err = tools
            .call(&mut state, "filter_dives_by_cns_load", &json!({"max_cns_load": "high"}))
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid parameters for filter_dives_by_cns_load"));

        let err = tools
            .call(&mut state, "filter_dives_by_gas_type", &json!({"gas_type": "heliox"}))
            .unwrap_err();
        assert!(err.to_string().contains("Valid types: air, nitrox, trimix"));

        let err = tools
            .call(&mut state, "calculate_statistic", &json!({"stat_type": "median_depth"}))
            .unwrap_err();
        assert!(matches!(err, DiveLogError::UnknownStatistic { .. }));

        assert!(!state.is_active());
    }

    #[test]
    fn test_label_requires_working_set() {
        let tools = create_test_tools();
        let mut state = SessionState::new();
        assert!(tools
            .call(&mut state, "label_filtered_dives", &json!({"label": "Deep"}))
            .is_err());

        tools
            .call(&mut state, "filter_dives", &json!({"filters": "deeper_than(20)"}))
            .unwrap();
        tools
            .call(&mut state, "label_filtered_dives", &json!({"label": "Deep"}))
            .unwrap();
        tools
            .call(&mut state, "filter_dives_by_depth", &json!({"max_depth": 20}))
            .unwrap();
        let out = tools
            .call(&mut state, "label_filtered_dives", &json!({"label": "Shallow"}))
            .unwrap();
        let ToolOutput::Labeled { groups, .. } = out else {
            panic!("expected a label result");
        };
        assert_eq!(
            groups,
            vec![
                GroupSize { label: "Deep".into(), count: 2 },
                GroupSize { label: "Shallow".into(), count: 2 },
            ]
        );

        let out = tools
            .call(
                &mut state,
                "plot_scatter",
                &json!({"x_metric": "depth", "y_metric": "duration", "use_labeled_groups": true}),
            )
            .unwrap();
        let ToolOutput::Scatter { series, .. } = out else {
            panic!("expected a scatter chart");
        };
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "Deep");
    }

    #[test]
    fn test_charts() {
        let tools = create_test_tools();
        let mut state = SessionState::new();

        let out = tools
            .call(&mut state, "plot_bar_chart", &json!({"category_by": "year"}))
            .unwrap();
        let ToolOutput::CategoryChart { table, title, .. } = out else {
            panic!("expected a category chart");
        };
        assert_eq!(title, "Dives by year");
        assert_eq!(table.categories[0].category, "2023");
        assert_eq!(table.total, 4);

        assert!(tools
            .call(&mut state, "plot_pie_chart", &json!({"category_by": "month"}))
            .is_err());
        assert!(tools.call(&mut state, "plot_pie_chart", &json!({})).is_err());

        let out = tools
            .call(
                &mut state,
                "plot_pie_chart",
                &json!({"custom_data": {"Warm": 3, "Cold": 1}, "title": "Seasons"}),
            )
            .unwrap();
        assert!(out.to_text().starts_with("Created pie chart 'Seasons'"));

        let out = tools
            .call(&mut state, "plot_histogram", &json!({"metric": "depth", "bin_count": 1}))
            .unwrap();
        let ToolOutput::Histogram { histogram, .. } = out else {
            panic!("expected a histogram");
        };
        assert_eq!(histogram.bins.len(), 3);
    }

    #[test]
    fn test_list_and_detail() {
        let tools = create_test_tools();
        let mut state = SessionState::new();

        let out = tools
            .call(&mut state, "list_dives", &json!({"sort_by": "depth", "limit": 2}))
            .unwrap();
        let ToolOutput::DiveList { dives, total, .. } = &out else {
            panic!("expected a dive list");
        };
        assert_eq!(*total, 4);
        let order: Vec<usize> = dives.iter().map(|d| d.index).collect();
        assert_eq!(order, vec![2, 1]);
        assert!(out.to_text().contains("... and 2 more dives"));

        let out = tools
            .call(&mut state, "get_dive_summary", &json!({"dive_index": 3}))
            .unwrap();
        let text = out.to_text();
        assert!(text.contains("- Buddy: Not specified"));
        assert!(text.contains("- Gas: Unknown"));

        let err = tools
            .call(&mut state, "get_dive_summary", &json!({"dive_index": 9}))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid dive index: 9. Valid range: 0 to 3");
    }

    #[test]
    fn test_search_and_text_rendering() {
        let tools = create_test_tools();
        let mut state = SessionState::new();
        let out = tools
            .call(
                &mut state,
                "search_dives",
                &json!({"query": "canyon", "search_field": "Location"}),
            )
            .unwrap();
        let text = out.to_text();
        assert!(text.starts_with("Found 1 of 4 dives matching search 'canyon' in location:"));

        let out = tools
            .call(&mut state, "search_dives", &json!({"query": "wreck", "search_field": "buddy"}))
            .unwrap();
        assert_eq!(out.to_text(), "No dives found matching search 'wreck' in buddy.");
        assert!(state.is_active());
    }

    #[test]
    fn test_output_serializes_with_kind_tag() {
        let tools = create_test_tools();
        let out = tools
            .call(&mut SessionState::new(), "calculate_statistic", &json!({"stat_type": "count"}))
            .unwrap();
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["kind"], "statistic");
        assert_eq!(value["stat_type"], "dive_count");
    }
}
