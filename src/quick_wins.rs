//! Quick-wins detection: rows with enough impressions, a low CTR and a
//! mid-range position, ranked by how many clicks a 5% CTR would add.

use crate::model::{AnalyticsRow, Dimension, Opportunity, QuickWinCandidate, QuickWinThresholds};

/// CTR (percent) a page at these positions should reach.
pub const TARGET_CTR: f64 = 5.0;

const MISSING_KEY: &str = "N/A";

// enough digits to tell an exact half from a near miss at these magnitudes
const EXACT_DIGITS: usize = 30;

/// Where the query and page values sit inside `AnalyticsRow::keys`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLayout {
    query: Option<usize>,
    page: Option<usize>,
}

impl KeyLayout {
    pub fn for_dimensions(dimensions: &[Dimension]) -> Self {
        Self {
            query: dimensions.iter().position(|d| *d == Dimension::Query),
            page: dimensions.iter().position(|d| *d == Dimension::Page),
        }
    }
}

impl Default for KeyLayout {
    /// `[query, page]`, the layout of the quick-wins analysis query.
    fn default() -> Self {
        Self {
            query: Some(0),
            page: Some(1),
        }
    }
}

/// Detects quick wins in rows produced by a `[query, page]` query.
pub fn detect(rows: &[AnalyticsRow], thresholds: &QuickWinThresholds) -> Vec<QuickWinCandidate> {
    detect_with_layout(rows, KeyLayout::default(), thresholds)
}

pub fn detect_with_layout(
    rows: &[AnalyticsRow],
    layout: KeyLayout,
    thresholds: &QuickWinThresholds,
) -> Vec<QuickWinCandidate> {
    let mut candidates: Vec<QuickWinCandidate> = rows
        .iter()
        .filter(|row| qualifies(row, thresholds))
        .map(|row| to_candidate(row, layout))
        .collect();
    // stable: equal upside keeps row order
    candidates.sort_by(|a, b| b.additional_clicks.cmp(&a.additional_clicks));
    candidates
}

fn qualifies(row: &AnalyticsRow, t: &QuickWinThresholds) -> bool {
    let ctr_percent = row.ctr * 100.0;
    row.impressions >= t.min_impressions
        && ctr_percent <= t.max_ctr
        && row.position >= t.position_range_min
        && row.position <= t.position_range_max
}

fn to_candidate(row: &AnalyticsRow, layout: KeyLayout) -> QuickWinCandidate {
    let current_clicks = row.clicks.max(0.0);
    let potential = (row.impressions * TARGET_CTR / 100.0).round();
    let additional = (potential - current_clicks).max(0.0);
    let additional_clicks = additional as u64;
    let current_position = to_fixed(row.position, 1);

    QuickWinCandidate {
        query: key_at(row, layout.query),
        page: key_at(row, layout.page),
        current_position,
        impressions: row.impressions as u64,
        current_clicks: current_clicks as u64,
        current_ctr: to_fixed(row.ctr * 100.0, 2),
        potential_clicks: potential as u64,
        additional_clicks,
        opportunity: if additional_clicks > 0 {
            Opportunity::High
        } else {
            Opportunity::Low
        },
        optimization_note: format!("Move from position {current_position:.1} to improve CTR"),
    }
}

fn key_at(row: &AnalyticsRow, index: Option<usize>) -> String {
    index
        .and_then(|i| row.keys.get(i))
        .filter(|k| !k.is_empty())
        .cloned()
        .unwrap_or_else(|| MISSING_KEY.to_string())
}

/// Rounds to `decimals` places the way a `toFixed` display would: the exact
/// binary value decides the direction, so 4.35 (stored as 4.3499...) gives
/// 4.3, and only a value sitting exactly on a half rounds away from zero.
fn to_fixed(value: f64, decimals: usize) -> f64 {
    let expanded = format!("{:.*}", decimals + EXACT_DIGITS, value);
    let fraction = expanded.split_once('.').map(|(_, f)| f).unwrap_or_default();
    let exact_half = fraction[decimals..].starts_with('5') && fraction[decimals + 1..].bytes().all(|b| b == b'0');
    if exact_half {
        // k + 0.5 scaled by a power of ten stays exact
        let factor = 10f64.powi(decimals as i32);
        return (value * factor).round() / factor;
    }
    format!("{:.*}", decimals, value).parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(keys: &[&str], clicks: f64, impressions: f64, ctr: f64, position: f64) -> AnalyticsRow {
        AnalyticsRow {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            clicks,
            impressions,
            ctr,
            position,
        }
    }

    #[test]
    fn low_ctr_mid_position_row_is_a_high_opportunity() {
        let rows = vec![row(&["buy shoes", "/shoes"], 2.0, 100.0, 0.02, 6.5)];
        let wins = detect(&rows, &QuickWinThresholds::default());
        assert_eq!(wins.len(), 1);
        let w = &wins[0];
        assert_eq!(w.query, "buy shoes");
        assert_eq!(w.page, "/shoes");
        assert_eq!(w.current_position, 6.5);
        assert_eq!(w.impressions, 100);
        assert_eq!(w.current_clicks, 2);
        assert_eq!(w.current_ctr, 2.0);
        assert_eq!(w.potential_clicks, 5);
        assert_eq!(w.additional_clicks, 3);
        assert_eq!(w.opportunity, Opportunity::High);
        assert_eq!(w.optimization_note, "Move from position 6.5 to improve CTR");
    }

    #[test]
    fn ctr_above_threshold_is_filtered_out() {
        let rows = vec![row(&["buy shoes", "/shoes"], 3.0, 100.0, 0.03, 6.5)];
        assert!(detect(&rows, &QuickWinThresholds::default()).is_empty());
    }

    #[test]
    fn rows_below_min_impressions_never_appear() {
        let rows = vec![
            row(&["a"], 0.0, 49.0, 0.0, 5.0),
            row(&["b"], 0.0, 50.0, 0.0, 5.0),
        ];
        for min in [0.0, 10.0, 50.0, 51.0, 1_000.0] {
            let t = QuickWinThresholds {
                min_impressions: min,
                ..QuickWinThresholds::default()
            };
            let wins = detect(&rows, &t);
            assert!(wins.iter().all(|w| (w.impressions as f64) >= min));
        }
    }

    #[test]
    fn position_bounds_are_inclusive() {
        let rows = vec![
            row(&["top"], 0.0, 100.0, 0.0, 3.9),
            row(&["low"], 0.0, 100.0, 0.0, 4.0),
            row(&["high"], 0.0, 100.0, 0.0, 10.0),
            row(&["deep"], 0.0, 100.0, 0.0, 10.1),
        ];
        let wins = detect(&rows, &QuickWinThresholds::default());
        let queries: Vec<_> = wins.iter().map(|w| w.query.as_str()).collect();
        assert_eq!(queries, vec!["low", "high"]);
    }

    #[test]
    fn page_only_dimension_reports_missing_query() {
        let rows = vec![row(&["/pricing"], 1.0, 200.0, 0.005, 7.0)];
        let layout = KeyLayout::for_dimensions(&[Dimension::Page]);
        let wins = detect_with_layout(&rows, layout, &QuickWinThresholds::default());
        assert_eq!(wins[0].query, "N/A");
        assert_eq!(wins[0].page, "/pricing");

        let rows = vec![row(&["USA", "running shoes"], 1.0, 200.0, 0.005, 7.0)];
        let layout = KeyLayout::for_dimensions(&[Dimension::Country, Dimension::Query]);
        let wins = detect_with_layout(&rows, layout, &QuickWinThresholds::default());
        assert_eq!(wins[0].query, "running shoes");
        assert_eq!(wins[0].page, "N/A");
    }

    #[test]
    fn short_keys_default_to_missing() {
        let rows = vec![row(&[], 1.0, 200.0, 0.005, 7.0)];
        let wins = detect(&rows, &QuickWinThresholds::default());
        assert_eq!(wins[0].query, "N/A");
        assert_eq!(wins[0].page, "N/A");
    }

    #[test]
    fn output_sorted_descending_and_stable_on_ties() {
        let rows = vec![
            row(&["small"], 0.0, 60.0, 0.0, 5.0),
            row(&["big"], 0.0, 1_000.0, 0.01, 5.0),
            row(&["tie-a"], 1.0, 100.0, 0.01, 5.0),
            row(&["tie-b"], 1.0, 100.0, 0.01, 5.0),
        ];
        let wins = detect(&rows, &QuickWinThresholds::default());
        assert!(wins
            .windows(2)
            .all(|w| w[0].additional_clicks >= w[1].additional_clicks));
        let order: Vec<_> = wins.iter().map(|w| w.query.as_str()).collect();
        assert_eq!(order, vec!["big", "tie-a", "tie-b", "small"]);
    }

    #[test]
    fn already_at_target_is_low_opportunity() {
        let rows = vec![row(&["q", "/p"], 5.0, 100.0, 0.02, 5.0)];
        let wins = detect(&rows, &QuickWinThresholds::default());
        assert_eq!(wins[0].additional_clicks, 0);
        assert_eq!(wins[0].opportunity, Opportunity::Low);
    }

    #[test]
    fn potential_clicks_round_half_away_from_zero() {
        // 50 impressions * 5% = 2.5
        let rows = vec![row(&["q"], 0.0, 50.0, 0.0, 5.0)];
        let wins = detect(&rows, &QuickWinThresholds::default());
        assert_eq!(wins[0].potential_clicks, 3);
    }

    #[test]
    fn position_and_note_round_the_same_way() {
        let rows = vec![
            row(&["near half"], 0.0, 100.0, 0.0, 4.35),
            row(&["exact half"], 0.0, 100.0, 0.0, 6.25),
        ];
        let wins = detect(&rows, &QuickWinThresholds::default());
        assert_eq!(wins[0].current_position, 4.3);
        assert_eq!(wins[0].optimization_note, "Move from position 4.3 to improve CTR");
        assert_eq!(wins[1].current_position, 6.3);
        assert_eq!(wins[1].optimization_note, "Move from position 6.3 to improve CTR");
    }

    #[test]
    fn detection_is_repeatable() {
        let rows = vec![
            row(&["x", "/x"], 1.0, 333.0, 0.012345, 4.44),
            row(&["y", "/y"], 0.0, 77.0, 0.0, 9.96),
        ];
        let t = QuickWinThresholds::default();
        let first = detect(&rows, &t);
        assert_eq!(first, detect(&rows, &t));
        assert_eq!(first[0].current_ctr, 1.23);
        assert_eq!(first[0].current_position, 4.4);
        assert_eq!(first[1].current_position, 10.0);
    }
}
