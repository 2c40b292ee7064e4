use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::client::AnalyticsApi;
use crate::error::{ConsoleError, Result};
use crate::model::{
    DateRange, DetectionThresholds, Dimension, EnhancedFeatures, EnhancedOptions, EnhancedResult, InspectionRequest,
    QueryDescriptor, QuickWinThresholds, QuickWinsOutcome, QuickWinsReport, SearchAnalyticsResponse, Sitemap,
    SitemapsList, SitesList, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT,
};
use crate::quick_wins::{detect_with_layout, KeyLayout};
use crate::shaper::{shape, WireQuery};
use crate::site_id::with_permission_fallback;

pub const NO_DATA_MESSAGE: &str = "No data available for quick wins analysis";

/// Search Console operations on top of one remote client.
#[derive(Clone)]
pub struct SearchConsoleService {
    api: Arc<dyn AnalyticsApi>,
}

impl SearchConsoleService {
    pub fn new(api: Arc<dyn AnalyticsApi>) -> Self {
        Self { api }
    }

    pub async fn list_sites(&self) -> Result<SitesList> {
        self.api.list_sites().await
    }

    /// Plain query. A regex filter on the descriptor is not applied here.
    pub async fn search_analytics(&self, descriptor: &QueryDescriptor) -> Result<SearchAnalyticsResponse> {
        let plain = QueryDescriptor {
            regex_filter: None,
            ..descriptor.clone()
        };
        self.execute(&descriptor.site_identifier, &shape(&plain)).await
    }

    pub async fn enhanced_search_analytics(
        &self,
        descriptor: Option<&QueryDescriptor>,
        options: EnhancedOptions,
    ) -> Result<EnhancedResult> {
        let descriptor =
            descriptor.ok_or_else(|| ConsoleError::InvalidInput("request body is required".into()))?;

        let wire = shape(descriptor);
        let base = self.execute(&descriptor.site_identifier, &wire).await?;

        let rows = match base.rows.as_deref() {
            Some(rows) if options.enable_quick_wins && !rows.is_empty() => rows,
            _ => return Ok(EnhancedResult::from(base)),
        };

        let layout = KeyLayout::for_dimensions(&descriptor.dimensions);
        let quick_wins = detect_with_layout(rows, layout, &options.thresholds);
        info!(
            site = %descriptor.site_identifier,
            rows = rows.len(),
            quick_wins = quick_wins.len(),
            "quick wins detected"
        );
        let features = EnhancedFeatures {
            regex_filter_applied: descriptor.regex_filter.is_some(),
            quick_wins_enabled: true,
            row_limit: if descriptor.row_limit == 0 {
                DEFAULT_ROW_LIMIT
            } else {
                descriptor.row_limit
            },
        };
        Ok(EnhancedResult {
            base,
            quick_wins_count: Some(quick_wins.len()),
            quick_wins: Some(quick_wins),
            enhanced_features: Some(features),
        })
    }

    /// Pulls `query × page` rows for the range and ranks their quick wins.
    pub async fn detect_quick_wins(
        &self,
        site_identifier: &str,
        date_range: DateRange,
        thresholds: QuickWinThresholds,
    ) -> Result<QuickWinsOutcome> {
        let descriptor = QueryDescriptor {
            row_limit: MAX_ROW_LIMIT,
            ..QueryDescriptor::new(site_identifier, date_range, vec![Dimension::Query, Dimension::Page])
        };
        let options = EnhancedOptions {
            enable_quick_wins: true,
            thresholds,
        };
        let result = self.enhanced_search_analytics(Some(&descriptor), options).await?;

        match result.quick_wins {
            Some(quick_wins) => Ok(QuickWinsOutcome::Report(QuickWinsReport {
                total_opportunities: quick_wins.len(),
                quick_wins,
                thresholds: DetectionThresholds::from(&thresholds),
                analysis: "Quick wins detection completed".to_string(),
            })),
            None => Ok(QuickWinsOutcome::NoData {
                message: NO_DATA_MESSAGE.to_string(),
            }),
        }
    }

    pub async fn index_inspect(&self, request: &InspectionRequest) -> Result<Value> {
        self.api.inspect_url(request).await
    }

    pub async fn list_sitemaps(&self, site_url: &str, sitemap_index: Option<&str>) -> Result<SitemapsList> {
        with_permission_fallback(site_url, |site| async move {
            self.api.list_sitemaps(&site, sitemap_index).await
        })
        .await
    }

    pub async fn get_sitemap(&self, site_url: &str, feedpath: &str) -> Result<Sitemap> {
        with_permission_fallback(site_url, |site| async move { self.api.get_sitemap(&site, feedpath).await })
            .await
    }

    pub async fn submit_sitemap(&self, site_url: &str, feedpath: &str) -> Result<()> {
        with_permission_fallback(site_url, |site| async move {
            self.api.submit_sitemap(&site, feedpath).await
        })
        .await
    }

    async fn execute(&self, site_url: &str, wire: &WireQuery) -> Result<SearchAnalyticsResponse> {
        with_permission_fallback(site_url, |site| async move { self.api.query(&site, wire).await }).await
    }
}
