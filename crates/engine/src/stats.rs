//! Presentation shaping of raw aggregates.
//!
//! Pure transformations only: raw maps become sorted label/value lists with
//! pre-formatted percentages. No I/O happens here.

use std::collections::HashMap;

use serde::Serialize;

use crate::store::AssetVulnerabilityCount;

/// One labelled count, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelledCount {
    pub label: String,
    pub value: i64,
}

/// A labelled count with its share of the filtered total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShareSlice {
    pub label: String,
    pub value: i64,
    pub percentage: String,
}

/// One entry in the top-assets list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopAssetEntry {
    /// Composite display label: `"<name> (<type>)"`.
    pub label: String,
    pub value: i64,
    pub critical_and_high: i64,
}

/// Sort a count map into a descending list. Empty labels are bucketed
/// under `unknown_label`; ties break on label so output is deterministic.
pub fn ranked_counts(map: &HashMap<String, i64>, unknown_label: &str) -> Vec<LabelledCount> {
    let mut merged: HashMap<String, i64> = HashMap::with_capacity(map.len());
    for (label, value) in map {
        let label = if label.trim().is_empty() {
            unknown_label.to_string()
        } else {
            label.clone()
        };
        *merged.entry(label).or_insert(0) += value;
    }

    let mut out: Vec<LabelledCount> = merged
        .into_iter()
        .map(|(label, value)| LabelledCount { label, value })
        .collect();
    out.sort_by(|a, b| b.value.cmp(&a.value).then_with(|| a.label.cmp(&b.label)));
    out
}

/// Format `count / total` as a percentage with one decimal place.
/// A zero total yields `"0.0%"`.
pub fn percentage(count: i64, total: i64) -> String {
    if total <= 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", (count as f64 / total as f64) * 100.0)
}

/// Ranked counts annotated with their share of `total`.
pub fn share_breakdown(
    map: &HashMap<String, i64>,
    total: i64,
    unknown_label: &str,
) -> Vec<ShareSlice> {
    ranked_counts(map, unknown_label)
        .into_iter()
        .map(|entry| ShareSlice {
            percentage: percentage(entry.value, total),
            label: entry.label,
            value: entry.value,
        })
        .collect()
}

/// Shape the raw top-asset rows for display. Assets without a stored name
/// fall back to their id; missing types display as "Unknown".
pub fn top_asset_list(rows: &[AssetVulnerabilityCount]) -> Vec<TopAssetEntry> {
    rows.iter()
        .map(|row| {
            let name = row
                .name
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(&row.target_id);
            let asset_type = row
                .asset_type
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("Unknown");
            TopAssetEntry {
                label: format!("{name} ({asset_type})"),
                value: row.total,
                critical_and_high: row.critical + row.high,
            }
        })
        .collect()
}

/// Average vulnerabilities per asset, rounded to two decimals.
/// Zero assets yields 0.0.
pub fn average_per_asset(total_vulnerabilities: i64, unique_assets: i64) -> f64 {
    if unique_assets <= 0 {
        return 0.0;
    }
    let avg = total_vulnerabilities as f64 / unique_assets as f64;
    (avg * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn ranked_counts_sort_descending() {
        let ranked = ranked_counts(&map(&[("HIGH", 2), ("CRITICAL", 5), ("LOW", 1)]), "UNKNOWN");
        let labels: Vec<&str> = ranked.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["CRITICAL", "HIGH", "LOW"]);
    }

    #[test]
    fn empty_labels_bucket_as_unknown() {
        let ranked = ranked_counts(&map(&[("", 3), ("UNKNOWN", 2), ("HIGH", 1)]), "UNKNOWN");
        assert_eq!(ranked[0].label, "UNKNOWN");
        assert_eq!(ranked[0].value, 5);
    }

    #[test]
    fn ties_break_on_label() {
        let ranked = ranked_counts(&map(&[("b", 1), ("a", 1)]), "UNKNOWN");
        assert_eq!(ranked[0].label, "a");
    }

    #[test]
    fn percentage_formats_one_decimal() {
        assert_eq!(percentage(1, 3), "33.3%");
        assert_eq!(percentage(2, 2), "100.0%");
        assert_eq!(percentage(0, 5), "0.0%");
    }

    #[test]
    fn zero_total_yields_zero_percent() {
        assert_eq!(percentage(5, 0), "0.0%");
        assert_eq!(percentage(0, 0), "0.0%");
    }

    #[test]
    fn share_breakdown_combines_rank_and_percentage() {
        let slices = share_breakdown(&map(&[("CRITICAL", 3), ("HIGH", 1)]), 4, "UNKNOWN");
        assert_eq!(slices[0].label, "CRITICAL");
        assert_eq!(slices[0].percentage, "75.0%");
        assert_eq!(slices[1].percentage, "25.0%");
    }

    #[test]
    fn top_asset_entries_use_composite_labels() {
        let rows = vec![
            AssetVulnerabilityCount {
                target_id: "a-1".into(),
                name: Some("web-1".into()),
                asset_type: Some("EC2Instance".into()),
                total: 7,
                critical: 2,
                high: 3,
            },
            AssetVulnerabilityCount {
                target_id: "a-2".into(),
                name: None,
                asset_type: None,
                total: 1,
                critical: 0,
                high: 0,
            },
        ];
        let entries = top_asset_list(&rows);
        assert_eq!(entries[0].label, "web-1 (EC2Instance)");
        assert_eq!(entries[0].critical_and_high, 5);
        assert_eq!(entries[1].label, "a-2 (Unknown)");
    }

    #[test]
    fn average_per_asset_rounds_to_two_decimals() {
        assert_eq!(average_per_asset(10, 3), 3.33);
        assert_eq!(average_per_asset(0, 3), 0.0);
        assert_eq!(average_per_asset(10, 0), 0.0);
    }
}
