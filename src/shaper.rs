use serde::Serialize;
use tracing::debug;

use crate::model::{AggregationType, Dimension, FilterOperator, QueryDescriptor, SearchType};

/// Body of a `searchAnalytics/query` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireQuery {
    pub start_date: String,
    pub end_date: String,
    pub dimensions: Vec<Dimension>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_type: Option<SearchType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation_type: Option<AggregationType>,
    pub row_limit: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dimension_filter_groups: Vec<FilterGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    And,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterGroup {
    pub group_type: GroupType,
    pub filters: Vec<WireFilter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WireFilter {
    pub dimension: Dimension,
    pub operator: FilterOperator,
    pub expression: String,
}

/// Whether `shape` adds the regex group for this descriptor.
pub fn applies_regex_filter(descriptor: &QueryDescriptor) -> bool {
    descriptor.regex_filter.is_some() && descriptor.has_dimension(Dimension::Query)
}

/// Translates a descriptor into the remote request body.
///
/// Page and query filters use the caller's operator; country and device are
/// always `equals`. A regex filter adds its own group, and only when `query`
/// is one of the dimensions.
pub fn shape(descriptor: &QueryDescriptor) -> WireQuery {
    let mut groups = Vec::new();

    let filters = dimension_filters(descriptor);
    if !filters.is_empty() {
        groups.push(FilterGroup {
            group_type: GroupType::And,
            filters,
        });
    }

    if let Some(regex) = regex_group(descriptor) {
        groups.push(regex);
    }

    let query = WireQuery {
        start_date: descriptor.date_range.start().format("%Y-%m-%d").to_string(),
        end_date: descriptor.date_range.end().format("%Y-%m-%d").to_string(),
        dimensions: descriptor.dimensions.clone(),
        search_type: descriptor.search_type,
        aggregation_type: descriptor.aggregation_type,
        row_limit: descriptor.row_limit,
        dimension_filter_groups: groups,
    };
    debug!(
        site = %descriptor.site_identifier,
        groups = query.dimension_filter_groups.len(),
        row_limit = query.row_limit,
        "shaped search analytics query"
    );
    query
}

fn dimension_filters(descriptor: &QueryDescriptor) -> Vec<WireFilter> {
    let f = &descriptor.filters;
    let mut filters = Vec::new();
    if let Some(page) = &f.page {
        filters.push(WireFilter {
            dimension: Dimension::Page,
            operator: f.operator,
            expression: page.clone(),
        });
    }
    if let Some(query) = &f.query {
        filters.push(WireFilter {
            dimension: Dimension::Query,
            operator: f.operator,
            expression: query.clone(),
        });
    }
    if let Some(country) = &f.country {
        filters.push(WireFilter {
            dimension: Dimension::Country,
            operator: FilterOperator::Equals,
            expression: country.clone(),
        });
    }
    if let Some(device) = f.device {
        filters.push(WireFilter {
            dimension: Dimension::Device,
            operator: FilterOperator::Equals,
            expression: device.as_str().to_string(),
        });
    }
    filters
}

fn regex_group(descriptor: &QueryDescriptor) -> Option<FilterGroup> {
    if !applies_regex_filter(descriptor) {
        return None;
    }
    let pattern = descriptor.regex_filter.as_ref()?;
    Some(FilterGroup {
        group_type: GroupType::And,
        filters: vec![WireFilter {
            dimension: Dimension::Query,
            operator: FilterOperator::IncludingRegex,
            expression: pattern.clone(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DateRange, Device, QueryFilters};
    use chrono::NaiveDate;
    use serde_json::json;

    fn descriptor(dimensions: Vec<Dimension>) -> QueryDescriptor {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        QueryDescriptor::new("https://example.com/", range, dimensions)
    }

    #[test]
    fn no_filters_means_no_groups() {
        let shaped = shape(&descriptor(vec![Dimension::Query]));
        assert!(shaped.dimension_filter_groups.is_empty());
        let body = serde_json::to_value(&shaped).unwrap();
        assert_eq!(
            body,
            json!({
                "startDate": "2024-01-01",
                "endDate": "2024-01-31",
                "dimensions": ["query"],
                "rowLimit": 1000
            })
        );
    }

    #[test]
    fn country_and_device_always_use_equals() {
        let mut d = descriptor(vec![Dimension::Query, Dimension::Page]);
        d.filters = QueryFilters {
            page: Some("/blog".into()),
            query: Some("shoes".into()),
            country: Some("USA".into()),
            device: Some(Device::Mobile),
            operator: FilterOperator::NotContains,
        };
        let shaped = shape(&d);
        assert_eq!(shaped.dimension_filter_groups.len(), 1);
        let filters = &shaped.dimension_filter_groups[0].filters;
        let ops: Vec<_> = filters.iter().map(|f| (f.dimension, f.operator)).collect();
        assert_eq!(
            ops,
            vec![
                (Dimension::Page, FilterOperator::NotContains),
                (Dimension::Query, FilterOperator::NotContains),
                (Dimension::Country, FilterOperator::Equals),
                (Dimension::Device, FilterOperator::Equals),
            ]
        );
        assert_eq!(filters[3].expression, "MOBILE");
    }

    #[test]
    fn regex_group_is_appended_after_dimension_filters() {
        let mut d = descriptor(vec![Dimension::Query, Dimension::Page]);
        d.filters.country = Some("DEU".into());
        d.regex_filter = Some("^buy .*".into());
        let shaped = shape(&d);
        assert_eq!(shaped.dimension_filter_groups.len(), 2);
        assert!(applies_regex_filter(&d));
        let body = serde_json::to_value(&shaped).unwrap();
        assert_eq!(
            body["dimensionFilterGroups"][1],
            json!({
                "groupType": "and",
                "filters": [{ "dimension": "query", "operator": "includingRegex", "expression": "^buy .*" }]
            })
        );
    }

    #[test]
    fn regex_is_ignored_without_query_dimension() {
        let mut d = descriptor(vec![Dimension::Page, Dimension::Country]);
        d.regex_filter = Some("shoes".into());
        let shaped = shape(&d);
        assert!(shaped.dimension_filter_groups.is_empty());
        assert!(!applies_regex_filter(&d));
    }

    #[test]
    fn row_limit_is_passed_through() {
        let mut d = descriptor(vec![Dimension::Query]);
        d.row_limit = 25_000;
        d.search_type = Some(SearchType::News);
        d.aggregation_type = Some(AggregationType::ByPage);
        let body = serde_json::to_value(shape(&d)).unwrap();
        assert_eq!(body["rowLimit"], 25_000);
        assert_eq!(body["searchType"], "news");
        assert_eq!(body["aggregationType"], "byPage");
    }
}
