use std::fmt;

use chrono::NaiveDate;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ConsoleError, FieldError, Result};

/// Query dimension. Row `keys` follow the order of the requested dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Dimension {
    Query,
    Page,
    Country,
    Device,
    SearchAppearance,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Query,
        Dimension::Page,
        Dimension::Country,
        Dimension::Device,
        Dimension::SearchAppearance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Query => "query",
            Dimension::Page => "page",
            Dimension::Country => "country",
            Dimension::Device => "device",
            Dimension::SearchAppearance => "searchAppearance",
        }
    }

    /// Parses a comma-separated dimension list such as `query,page`.
    /// Blank entries are skipped; an unknown name fails the whole list.
    pub fn parse_list(input: &str) -> std::result::Result<Vec<Dimension>, String> {
        let mut out = Vec::new();
        for raw in input.split(',') {
            let name = raw.trim();
            if name.is_empty() {
                continue;
            }
            let dim = parse_enum::<Dimension>(name).ok_or_else(|| {
                format!(
                    "unknown dimension `{name}`, expected one of query, page, country, device, searchAppearance"
                )
            })?;
            out.push(dim);
        }
        Ok(out)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Web,
    Image,
    Video,
    News,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AggregationType {
    Auto,
    ByNewsShowcasePanel,
    ByProperty,
    ByPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    #[default]
    Equals,
    Contains,
    NotEquals,
    NotContains,
    IncludingRegex,
    ExcludingRegex,
}

impl FilterOperator {
    pub fn is_regex(&self) -> bool {
        matches!(self, FilterOperator::IncludingRegex | FilterOperator::ExcludingRegex)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Device {
    Desktop,
    Mobile,
    Tablet,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Desktop => "DESKTOP",
            Device::Mobile => "MOBILE",
            Device::Tablet => "TABLET",
        }
    }
}

/// Parses a bare enum name through its serde representation.
pub fn parse_enum<T: DeserializeOwned>(name: &str) -> Option<T> {
    serde_json::from_value(Value::String(name.to_string())).ok()
}

/// Inclusive calendar range, always `start <= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(ConsoleError::Validation(vec![FieldError::new(
                "startDate",
                format!("must not be after endDate ({start} > {end})"),
            )]));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// Page/query/country/device filters as the caller supplied them.
/// `operator` only applies to page and query filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilters {
    pub page: Option<String>,
    pub query: Option<String>,
    pub country: Option<String>,
    pub device: Option<Device>,
    pub operator: FilterOperator,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.page.is_none() && self.query.is_none() && self.country.is_none() && self.device.is_none()
    }
}

/// One search analytics request. Built once from validated arguments and only
/// read afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    pub site_identifier: String,
    pub date_range: DateRange,
    pub dimensions: Vec<Dimension>,
    pub search_type: Option<SearchType>,
    pub aggregation_type: Option<AggregationType>,
    pub row_limit: u32,
    pub filters: QueryFilters,
    pub regex_filter: Option<String>,
}

pub const DEFAULT_ROW_LIMIT: u32 = 1000;
pub const MAX_ROW_LIMIT: u32 = 25_000;

impl QueryDescriptor {
    pub fn new(site_identifier: impl Into<String>, date_range: DateRange, dimensions: Vec<Dimension>) -> Self {
        Self {
            site_identifier: site_identifier.into(),
            date_range,
            dimensions,
            search_type: None,
            aggregation_type: None,
            row_limit: DEFAULT_ROW_LIMIT,
            filters: QueryFilters::default(),
            regex_filter: None,
        }
    }

    pub fn has_dimension(&self, dimension: Dimension) -> bool {
        self.dimensions.contains(&dimension)
    }
}

/// One analytics row. Numbers arrive as doubles; missing or malformed values read as 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRow {
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub clicks: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub impressions: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub ctr: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub position: f64,
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let number = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    Ok(if number.is_finite() { number } else { 0.0 })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchAnalyticsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<AnalyticsRow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_aggregation_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickWinThresholds {
    #[serde(default = "default_min_impressions")]
    pub min_impressions: f64,
    #[serde(default = "default_max_ctr")]
    pub max_ctr: f64,
    #[serde(default = "default_position_range_min")]
    pub position_range_min: f64,
    #[serde(default = "default_position_range_max")]
    pub position_range_max: f64,
    /// Value per click for ROI estimates; not used by detection.
    #[serde(default = "default_estimated_click_value")]
    pub estimated_click_value: f64,
    /// Conversion rate for ROI estimates; not used by detection.
    #[serde(default = "default_conversion_rate")]
    pub conversion_rate: f64,
}

fn default_min_impressions() -> f64 {
    50.0
}

fn default_max_ctr() -> f64 {
    2.0
}

fn default_position_range_min() -> f64 {
    4.0
}

fn default_position_range_max() -> f64 {
    10.0
}

fn default_estimated_click_value() -> f64 {
    1.0
}

fn default_conversion_rate() -> f64 {
    0.03
}

impl Default for QuickWinThresholds {
    fn default() -> Self {
        Self {
            min_impressions: default_min_impressions(),
            max_ctr: default_max_ctr(),
            position_range_min: default_position_range_min(),
            position_range_max: default_position_range_max(),
            estimated_click_value: default_estimated_click_value(),
            conversion_rate: default_conversion_rate(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opportunity {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickWinCandidate {
    pub query: String,
    pub page: String,
    pub current_position: f64,
    pub impressions: u64,
    pub current_clicks: u64,
    pub current_ctr: f64,
    pub potential_clicks: u64,
    pub additional_clicks: u64,
    pub opportunity: Opportunity,
    pub optimization_note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedFeatures {
    pub regex_filter_applied: bool,
    pub quick_wins_enabled: bool,
    pub row_limit: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnhancedOptions {
    pub enable_quick_wins: bool,
    pub thresholds: QuickWinThresholds,
}

/// Search analytics response, optionally carrying quick-wins output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnhancedResult {
    #[serde(flatten)]
    pub base: SearchAnalyticsResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_wins: Option<Vec<QuickWinCandidate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_wins_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enhanced_features: Option<EnhancedFeatures>,
}

impl From<SearchAnalyticsResponse> for EnhancedResult {
    fn from(base: SearchAnalyticsResponse) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuickWinsOutcome {
    Report(QuickWinsReport),
    NoData { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickWinsReport {
    pub quick_wins: Vec<QuickWinCandidate>,
    pub total_opportunities: usize,
    pub thresholds: DetectionThresholds,
    pub analysis: String,
}

/// The thresholds a report echoes: only those detection applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionThresholds {
    pub min_impressions: f64,
    pub max_ctr: f64,
    pub position_range_min: f64,
    pub position_range_max: f64,
}

impl From<&QuickWinThresholds> for DetectionThresholds {
    fn from(t: &QuickWinThresholds) -> Self {
        Self {
            min_impressions: t.min_impressions,
            max_ctr: t.max_ctr,
            position_range_min: t.position_range_min,
            position_range_max: t.position_range_max,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteEntry {
    #[serde(default)]
    pub site_url: String,
    #[serde(default)]
    pub permission_level: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SitesList {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_entry: Option<Vec<SiteEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sitemap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submitted: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_pending: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sitemaps_index: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_downloaded: Option<String>,
    // int64 values arrive as JSON strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contents: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SitemapsList {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sitemap: Vec<Sitemap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionRequest {
    pub inspection_url: String,
    pub site_url: String,
    pub language_code: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dimension_list_parses_and_rejects_unknown() {
        let dims = Dimension::parse_list("query, page,searchAppearance").unwrap();
        assert_eq!(
            dims,
            vec![Dimension::Query, Dimension::Page, Dimension::SearchAppearance]
        );
        let err = Dimension::parse_list("query,keyword").unwrap_err();
        assert!(err.contains("keyword"));
    }

    #[test]
    fn date_range_rejects_inverted_bounds() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(DateRange::new(start, end).is_err());
        assert!(DateRange::new(end, start).is_ok());
        assert!(DateRange::new(start, start).is_ok());
    }

    #[test]
    fn rows_treat_malformed_numbers_as_zero() {
        let row: AnalyticsRow = serde_json::from_value(json!({
            "keys": ["shoes"],
            "clicks": null,
            "impressions": "120",
            "position": 4.2
        }))
        .unwrap();
        assert_eq!(row.clicks, 0.0);
        assert_eq!(row.impressions, 120.0);
        assert_eq!(row.ctr, 0.0);
        assert_eq!(row.position, 4.2);
    }

    #[test]
    fn thresholds_fill_missing_fields_with_defaults() {
        let t: QuickWinThresholds = serde_json::from_value(json!({ "maxCtr": 3.5 })).unwrap();
        assert_eq!(t.max_ctr, 3.5);
        assert_eq!(t.min_impressions, 50.0);
        assert_eq!(t.position_range_min, 4.0);
        assert_eq!(t.position_range_max, 10.0);
    }

    #[test]
    fn enhanced_result_without_quick_wins_serializes_as_base() {
        let base = SearchAnalyticsResponse {
            rows: Some(vec![]),
            response_aggregation_type: Some("byProperty".into()),
        };
        let value = serde_json::to_value(EnhancedResult::from(base)).unwrap();
        assert_eq!(value, json!({ "rows": [], "responseAggregationType": "byProperty" }));
    }
}
