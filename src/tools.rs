//! MCP tools: argument validation, input schemas and dispatch to the service.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{ConsoleError, FieldError, Result};
use crate::model::{
    parse_enum, AggregationType, DateRange, Device, Dimension, EnhancedOptions, FilterOperator, InspectionRequest,
    QueryDescriptor, QueryFilters, QuickWinThresholds, SearchType, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT,
};
use crate::service::SearchConsoleService;

const DEFAULT_LANGUAGE_CODE: &str = "en-US";

pub const TOOL_NAMES: [&str; 8] = [
    "list_sites",
    "search_analytics",
    "enhanced_search_analytics",
    "detect_quick_wins",
    "index_inspect",
    "list_sitemaps",
    "get_sitemap",
    "submit_sitemap",
];

/// Reads tool arguments field by field, collecting every violation.
struct ArgReader<'a> {
    args: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> ArgReader<'a> {
    fn new(args: &'a Map<String, Value>) -> Self {
        Self {
            args,
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, field: &str, reason: impl Into<String>) {
        self.errors.push(FieldError::new(field, reason));
    }

    fn present(&self, field: &str) -> Option<&'a Value> {
        self.args.get(field).filter(|v| !v.is_null())
    }

    fn optional_str(&mut self, field: &str) -> Option<String> {
        match self.present(field)? {
            Value::String(s) => Some(s.clone()),
            _ => {
                self.fail(field, "expected string");
                None
            }
        }
    }

    fn required_str(&mut self, field: &str) -> Option<String> {
        if self.present(field).is_none() {
            self.fail(field, "required");
            return None;
        }
        self.optional_str(field)
    }

    fn date(&mut self, field: &str) -> Option<NaiveDate> {
        let raw = self.required_str(field)?;
        match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(d) => Some(d),
            Err(_) => {
                self.fail(field, format!("expected a YYYY-MM-DD date, got `{raw}`"));
                None
            }
        }
    }

    fn date_range(&mut self) -> Option<DateRange> {
        let start = self.date("startDate");
        let end = self.date("endDate");
        let (start, end) = (start?, end?);
        match DateRange::new(start, end) {
            Ok(range) => Some(range),
            Err(ConsoleError::Validation(mut errs)) => {
                self.errors.append(&mut errs);
                None
            }
            Err(e) => {
                self.fail("startDate", e.to_string());
                None
            }
        }
    }

    fn enum_value<T: DeserializeOwned>(&mut self, field: &str, expected: &str) -> Option<T> {
        let raw = self.optional_str(field)?;
        match parse_enum(&raw) {
            Some(v) => Some(v),
            None => {
                self.fail(field, format!("unknown value `{raw}`, expected one of {expected}"));
                None
            }
        }
    }

    fn number(&mut self, field: &str, default: f64) -> f64 {
        match self.present(field) {
            None => default,
            Some(v) => match v.as_f64() {
                Some(n) => n,
                None => {
                    self.fail(field, "expected number");
                    default
                }
            },
        }
    }

    fn boolean(&mut self, field: &str, default: bool) -> bool {
        match self.present(field) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                self.fail(field, "expected boolean");
                default
            }
        }
    }

    fn row_limit(&mut self) -> u32 {
        let Some(v) = self.present("rowLimit") else {
            return DEFAULT_ROW_LIMIT;
        };
        let in_range = v
            .as_f64()
            .filter(|n| n.fract() == 0.0 && *n >= 1.0 && *n <= f64::from(MAX_ROW_LIMIT));
        match in_range {
            Some(n) => n as u32,
            None => {
                self.fail("rowLimit", format!("must be an integer between 1 and {MAX_ROW_LIMIT}"));
                DEFAULT_ROW_LIMIT
            }
        }
    }

    fn dimensions(&mut self) -> Vec<Dimension> {
        let Some(raw) = self.optional_str("dimensions") else {
            return Vec::new();
        };
        match Dimension::parse_list(&raw) {
            Ok(dims) => dims,
            Err(reason) => {
                self.fail("dimensions", reason);
                Vec::new()
            }
        }
    }

    fn regex(&mut self, field: &str) -> Option<String> {
        let pattern = self.optional_str(field)?;
        if let Err(e) = regex::Regex::new(&pattern) {
            self.fail(field, format!("invalid regular expression: {e}"));
            return None;
        }
        Some(pattern)
    }

    fn thresholds(&mut self, prefix: Option<&str>) -> QuickWinThresholds {
        let first_error = self.errors.len();
        let d = QuickWinThresholds::default();
        let thresholds = QuickWinThresholds {
            min_impressions: self.number("minImpressions", d.min_impressions),
            max_ctr: self.number("maxCtr", d.max_ctr),
            position_range_min: self.number("positionRangeMin", d.position_range_min),
            position_range_max: self.number("positionRangeMax", d.position_range_max),
            estimated_click_value: self.number("estimatedClickValue", d.estimated_click_value),
            conversion_rate: self.number("conversionRate", d.conversion_rate),
        };
        if let Some(prefix) = prefix {
            for e in &mut self.errors[first_error..] {
                e.field = format!("{prefix}.{}", e.field);
            }
        }
        thresholds
    }

    fn finish<T>(self, value: Option<T>) -> Result<T> {
        match value {
            Some(v) if self.errors.is_empty() => Ok(v),
            _ => Err(ConsoleError::Validation(self.errors)),
        }
    }
}

fn argument_map(arguments: Option<Value>) -> Result<Map<String, Value>> {
    match arguments {
        Some(Value::Object(map)) => Ok(map),
        Some(Value::Null) | None => Err(ConsoleError::InvalidInput("Arguments are required".into())),
        Some(_) => Err(ConsoleError::InvalidInput("Arguments must be an object".into())),
    }
}

/// Validated arguments of `search_analytics` and `enhanced_search_analytics`.
pub fn parse_search_args(args: &Map<String, Value>) -> Result<QueryDescriptor> {
    let mut r = ArgReader::new(args);
    let descriptor = read_search_args(&mut r);
    r.finish(descriptor)
}

fn read_search_args(r: &mut ArgReader<'_>) -> Option<QueryDescriptor> {
    let site_url = r.required_str("siteUrl");
    let date_range = r.date_range();
    let dimensions = r.dimensions();
    let search_type = r.enum_value::<SearchType>("type", "web, image, video, news");
    let aggregation_type =
        r.enum_value::<AggregationType>("aggregationType", "auto, byNewsShowcasePanel, byProperty, byPage");
    let row_limit = r.row_limit();
    let operator = r
        .enum_value::<FilterOperator>(
            "filterOperator",
            "equals, contains, notEquals, notContains, includingRegex, excludingRegex",
        )
        .unwrap_or_default();
    let (page, query) = if operator.is_regex() {
        (r.regex("pageFilter"), r.regex("queryFilter"))
    } else {
        (r.optional_str("pageFilter"), r.optional_str("queryFilter"))
    };
    let filters = QueryFilters {
        page,
        query,
        country: r.optional_str("countryFilter"),
        device: r.enum_value::<Device>("deviceFilter", "DESKTOP, MOBILE, TABLET"),
        operator,
    };
    let regex_filter = r.regex("regexFilter");

    Some(QueryDescriptor {
        search_type,
        aggregation_type,
        row_limit,
        filters,
        regex_filter,
        ..QueryDescriptor::new(site_url?, date_range?, dimensions)
    })
}

pub fn parse_enhanced_args(args: &Map<String, Value>) -> Result<(QueryDescriptor, EnhancedOptions)> {
    let mut r = ArgReader::new(args);
    let descriptor = read_search_args(&mut r);
    let enable_quick_wins = r.boolean("enableQuickWins", false);
    let thresholds = match r.present("quickWinsThresholds") {
        None => QuickWinThresholds::default(),
        Some(Value::Object(nested)) => {
            let mut inner = ArgReader::new(nested);
            let t = inner.thresholds(Some("quickWinsThresholds"));
            r.errors.append(&mut inner.errors);
            t
        }
        Some(_) => {
            r.fail("quickWinsThresholds", "expected object");
            QuickWinThresholds::default()
        }
    };
    let options = EnhancedOptions {
        enable_quick_wins,
        thresholds,
    };
    r.finish(descriptor.map(|d| (d, options)))
}

pub fn parse_quick_wins_args(args: &Map<String, Value>) -> Result<(String, DateRange, QuickWinThresholds)> {
    let mut r = ArgReader::new(args);
    let site_url = r.required_str("siteUrl");
    let date_range = r.date_range();
    let thresholds = r.thresholds(None);
    let parsed = site_url.zip(date_range).map(|(s, d)| (s, d, thresholds));
    r.finish(parsed)
}

pub fn parse_inspect_args(args: &Map<String, Value>) -> Result<InspectionRequest> {
    let mut r = ArgReader::new(args);
    let site_url = r.required_str("siteUrl");
    let inspection_url = r.required_str("inspectionUrl");
    let language_code = r
        .optional_str("languageCode")
        .unwrap_or_else(|| DEFAULT_LANGUAGE_CODE.to_string());
    let parsed = site_url.zip(inspection_url).map(|(site_url, inspection_url)| InspectionRequest {
        inspection_url,
        site_url,
        language_code,
    });
    r.finish(parsed)
}

/// `(siteUrl, second)` where `second` is `sitemapIndex` or `feedpath`.
fn parse_sitemap_args(args: &Map<String, Value>, second: &str, second_required: bool) -> Result<(String, Option<String>)> {
    let mut r = ArgReader::new(args);
    let site_url = r.required_str("siteUrl");
    let other = if second_required {
        r.required_str(second)
    } else {
        r.optional_str(second)
    };
    r.finish(site_url.map(|s| (s, other)))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Runs one tool call and returns its JSON result.
pub async fn call_tool(service: &SearchConsoleService, name: &str, arguments: Option<Value>) -> Result<Value> {
    if !TOOL_NAMES.contains(&name) {
        return Err(ConsoleError::InvalidInput(format!("Unknown tool: {name}")));
    }
    info!(tool = name, "tool call");
    if name == "list_sites" {
        return to_json(&service.list_sites().await?);
    }

    let args = argument_map(arguments)?;
    match name {
        "search_analytics" => {
            let descriptor = parse_search_args(&args)?;
            to_json(&service.search_analytics(&descriptor).await?)
        }
        "enhanced_search_analytics" => {
            let (descriptor, options) = parse_enhanced_args(&args)?;
            to_json(&service.enhanced_search_analytics(Some(&descriptor), options).await?)
        }
        "detect_quick_wins" => {
            let (site_url, range, thresholds) = parse_quick_wins_args(&args)?;
            to_json(&service.detect_quick_wins(&site_url, range, thresholds).await?)
        }
        "index_inspect" => {
            let request = parse_inspect_args(&args)?;
            service.index_inspect(&request).await
        }
        "list_sitemaps" => {
            let (site_url, index) = parse_sitemap_args(&args, "sitemapIndex", false)?;
            to_json(&service.list_sitemaps(&site_url, index.as_deref()).await?)
        }
        "get_sitemap" => {
            let (site_url, feedpath) = parse_sitemap_args(&args, "feedpath", true)?;
            let feedpath = feedpath.unwrap_or_default();
            to_json(&service.get_sitemap(&site_url, &feedpath).await?)
        }
        "submit_sitemap" => {
            let (site_url, feedpath) = parse_sitemap_args(&args, "feedpath", true)?;
            let feedpath = feedpath.unwrap_or_default();
            service.submit_sitemap(&site_url, &feedpath).await?;
            Ok(json!({ "success": true, "siteUrl": site_url, "feedpath": feedpath }))
        }
        other => Err(ConsoleError::InvalidInput(format!("Unknown tool: {other}"))),
    }
}

fn site_url_schema() -> Value {
    json!({
        "type": "string",
        "description": "The site URL as defined in Search Console. Example: sc-domain:example.com (for domain resources) or http://www.example.com/ (for site prefix resources)"
    })
}

fn search_properties() -> Map<String, Value> {
    let props = json!({
        "siteUrl": site_url_schema(),
        "startDate": { "type": "string", "description": "Start date in YYYY-MM-DD format" },
        "endDate": { "type": "string", "description": "End date in YYYY-MM-DD format" },
        "dimensions": {
            "type": "string",
            "description": "Comma-separated list of dimensions to break down results by, such as query, page, country, device, searchAppearance"
        },
        "type": { "type": "string", "enum": ["web", "image", "video", "news"] },
        "aggregationType": { "type": "string", "enum": ["auto", "byNewsShowcasePanel", "byProperty", "byPage"] },
        "rowLimit": {
            "type": "integer", "minimum": 1, "maximum": MAX_ROW_LIMIT, "default": DEFAULT_ROW_LIMIT,
            "description": "Maximum number of rows to return (up to 25,000)"
        },
        "pageFilter": { "type": "string", "description": "Filter by a specific page URL. Use with filterOperator." },
        "queryFilter": { "type": "string", "description": "Filter by a specific query string. Use with filterOperator." },
        "countryFilter": { "type": "string", "description": "Filter by a country using ISO 3166-1 alpha-3 code (e.g., USA, CHN)." },
        "deviceFilter": { "type": "string", "enum": ["DESKTOP", "MOBILE", "TABLET"] },
        "filterOperator": {
            "type": "string",
            "enum": ["equals", "contains", "notEquals", "notContains", "includingRegex", "excludingRegex"],
            "default": "equals",
            "description": "Operator for page and query filters."
        },
        "regexFilter": { "type": "string", "description": "Regex applied to the query dimension" }
    });
    match props {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn threshold_properties(include_roi: bool) -> Value {
    let mut props = json!({
        "minImpressions": { "type": "number", "default": 50, "description": "Minimum impressions threshold for quick wins" },
        "maxCtr": { "type": "number", "default": 2.0, "description": "Maximum CTR percentage for quick wins detection" },
        "positionRangeMin": { "type": "number", "default": 4 },
        "positionRangeMax": { "type": "number", "default": 10 }
    });
    if include_roi {
        props["estimatedClickValue"] = json!({ "type": "number", "default": 1.0 });
        props["conversionRate"] = json!({ "type": "number", "default": 0.03 });
    }
    props
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({ "type": "object", "properties": properties, "required": required })
}

/// Tool descriptors for `tools/list`.
pub fn tool_definitions() -> Vec<Value> {
    let search = Value::Object(search_properties());
    let mut enhanced = search_properties();
    enhanced.insert(
        "enableQuickWins".into(),
        json!({ "type": "boolean", "default": false, "description": "Enable automatic quick wins detection" }),
    );
    enhanced.insert(
        "quickWinsThresholds".into(),
        json!({ "type": "object", "properties": threshold_properties(false) }),
    );
    let mut quick_wins = threshold_properties(true);
    quick_wins["siteUrl"] = site_url_schema();
    quick_wins["startDate"] = json!({ "type": "string", "description": "Start date in YYYY-MM-DD format" });
    quick_wins["endDate"] = json!({ "type": "string", "description": "End date in YYYY-MM-DD format" });

    let dated = ["siteUrl", "startDate", "endDate"];
    vec![
        json!({
            "name": "list_sites",
            "description": "List all sites in Google Search Console",
            "inputSchema": object_schema(json!({}), &[])
        }),
        json!({
            "name": "search_analytics",
            "description": "Get search performance data from Google Search Console",
            "inputSchema": object_schema(search, &dated)
        }),
        json!({
            "name": "enhanced_search_analytics",
            "description": "Enhanced search analytics with up to 25,000 rows, regex filters, and quick wins detection",
            "inputSchema": object_schema(Value::Object(enhanced), &dated)
        }),
        json!({
            "name": "detect_quick_wins",
            "description": "Automatically detect SEO quick wins and optimization opportunities",
            "inputSchema": object_schema(quick_wins, &dated)
        }),
        json!({
            "name": "index_inspect",
            "description": "Inspect a URL to see if it is indexed or can be indexed",
            "inputSchema": object_schema(json!({
                "siteUrl": site_url_schema(),
                "inspectionUrl": { "type": "string", "description": "The fully-qualified URL to inspect. Must be under the property specified in \"siteUrl\"" },
                "languageCode": { "type": "string", "default": DEFAULT_LANGUAGE_CODE }
            }), &["siteUrl", "inspectionUrl"])
        }),
        json!({
            "name": "list_sitemaps",
            "description": "List sitemaps for a site in Google Search Console",
            "inputSchema": object_schema(json!({
                "siteUrl": site_url_schema(),
                "sitemapIndex": { "type": "string", "description": "A URL of a site's sitemap index" }
            }), &["siteUrl"])
        }),
        json!({
            "name": "get_sitemap",
            "description": "Get a sitemap for a site in Google Search Console",
            "inputSchema": object_schema(json!({
                "siteUrl": site_url_schema(),
                "feedpath": { "type": "string", "description": "The URL of the actual sitemap" }
            }), &["siteUrl", "feedpath"])
        }),
        json!({
            "name": "submit_sitemap",
            "description": "Submit a sitemap for a site in Google Search Console",
            "inputSchema": object_schema(json!({
                "siteUrl": site_url_schema(),
                "feedpath": { "type": "string", "description": "The URL of the sitemap to add" }
            }), &["siteUrl", "feedpath"])
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn search_args_build_descriptor() {
        let d = parse_search_args(&args(json!({
            "siteUrl": "sc-domain:example.com",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "dimensions": "query,page",
            "type": "web",
            "rowLimit": 25000,
            "queryFilter": "shoes",
            "filterOperator": "contains",
            "deviceFilter": "MOBILE"
        })))
        .unwrap();
        assert_eq!(d.site_identifier, "sc-domain:example.com");
        assert_eq!(d.dimensions, vec![Dimension::Query, Dimension::Page]);
        assert_eq!(d.search_type, Some(SearchType::Web));
        assert_eq!(d.row_limit, 25_000);
        assert_eq!(d.filters.query.as_deref(), Some("shoes"));
        assert_eq!(d.filters.operator, FilterOperator::Contains);
        assert_eq!(d.filters.device, Some(Device::Mobile));
    }

    #[test]
    fn defaults_apply_when_omitted() {
        let d = parse_search_args(&args(json!({
            "siteUrl": "https://example.com/",
            "startDate": "2024-01-01",
            "endDate": "2024-01-01"
        })))
        .unwrap();
        assert_eq!(d.row_limit, 1000);
        assert_eq!(d.filters.operator, FilterOperator::Equals);
        assert!(d.dimensions.is_empty());
    }

    #[test]
    fn every_violation_is_reported_once() {
        let err = parse_search_args(&args(json!({
            "startDate": "01/02/2024",
            "endDate": "2024-01-31",
            "dimensions": "query,keyword",
            "type": "audio",
            "rowLimit": 30000
        })))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("Invalid arguments: "));
        for field in ["siteUrl: required", "startDate:", "dimensions:", "type:", "rowLimit:"] {
            assert!(msg.contains(field), "missing `{field}` in {msg}");
        }
        match err {
            ConsoleError::Validation(errors) => assert_eq!(errors.len(), 5),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn inverted_dates_are_rejected() {
        let err = parse_search_args(&args(json!({
            "siteUrl": "https://example.com/",
            "startDate": "2024-02-01",
            "endDate": "2024-01-01"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("startDate: must not be after endDate"));
    }

    #[test]
    fn bad_regex_is_a_validation_error() {
        let err = parse_search_args(&args(json!({
            "siteUrl": "https://example.com/",
            "startDate": "2024-01-01",
            "endDate": "2024-01-02",
            "regexFilter": "(unclosed"
        })))
        .unwrap_err();
        assert!(err.to_string().contains("regexFilter: invalid regular expression"));
    }

    #[test]
    fn enhanced_args_read_nested_thresholds() {
        let err = parse_enhanced_args(&args(json!({
            "siteUrl": "https://example.com/",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "quickWinsThresholds": { "minImpressions": 10, "maxCtr": "high" }
        })))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid arguments: quickWinsThresholds.maxCtr: expected number");

        let (d, options) = parse_enhanced_args(&args(json!({
            "siteUrl": "https://example.com/",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "dimensions": "query",
            "regexFilter": "^buy",
            "enableQuickWins": true,
            "quickWinsThresholds": { "minImpressions": 10 }
        })))
        .unwrap();
        assert_eq!(d.regex_filter.as_deref(), Some("^buy"));
        assert!(options.enable_quick_wins);
        assert_eq!(options.thresholds.min_impressions, 10.0);
        assert_eq!(options.thresholds.max_ctr, 2.0);
    }

    #[test]
    fn quick_wins_args_default_thresholds() {
        let (site, _, t) = parse_quick_wins_args(&args(json!({
            "siteUrl": "sc-domain:example.com",
            "startDate": "2024-01-01",
            "endDate": "2024-01-31",
            "positionRangeMax": 15
        })))
        .unwrap();
        assert_eq!(site, "sc-domain:example.com");
        assert_eq!(t.position_range_max, 15.0);
        assert_eq!(t.conversion_rate, 0.03);
    }

    #[test]
    fn inspect_args_default_language() {
        let req = parse_inspect_args(&args(json!({
            "siteUrl": "https://example.com/",
            "inspectionUrl": "https://example.com/a"
        })))
        .unwrap();
        assert_eq!(req.language_code, "en-US");
    }

    #[test]
    fn every_tool_has_an_object_schema() {
        let tools = tool_definitions();
        let names: Vec<_> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, TOOL_NAMES.to_vec());
        assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
        let enhanced = &tools[2]["inputSchema"]["properties"];
        assert!(enhanced.get("enableQuickWins").is_some());
        assert!(enhanced.get("regexFilter").is_some());
    }
}
