//! Precedence merge helpers
//!
//! Sources are always combined lowest precedence first, so a later source
//! replaces an earlier one's entry for the same id as a whole.

use op_core::{CatalogMap, CatalogMetrics};
use std::collections::{BTreeMap, BTreeSet};

/// Whole-entry replacement: every key of `higher` wins over `lower`.
pub fn merge_keyed<V>(mut lower: BTreeMap<String, V>, higher: BTreeMap<String, V>) -> BTreeMap<String, V> {
    lower.extend(higher);
    lower
}

/// `merge(merge(primary, secondary), custom)`
pub fn merge_catalogs(primary: CatalogMap, secondary: CatalogMap, custom: CatalogMap) -> CatalogMap {
    merge_keyed(merge_keyed(primary, secondary), custom)
}

/// Sorted, de-duplicated union of string lists
pub fn merge_sorted<I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    lists
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// What one source contributed to the metrics aggregate. A failed source
/// contributes `None` for both.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsContribution<'a> {
    pub metrics: Option<&'a CatalogMetrics>,
    pub apis: Option<&'a CatalogMap>,
}

/// Sum per-source metrics and subtract what the precedence merge hides.
///
/// `contributions` are ordered lowest precedence first. For every id defined
/// by more than one source, each superseded copy removes one from `numAPIs`
/// and its version count from `numSpecs`. `numEndpoints` is a plain sum.
pub fn aggregate_metrics(contributions: &[MetricsContribution<'_>]) -> CatalogMetrics {
    let mut total = CatalogMetrics::default();
    for metrics in contributions.iter().filter_map(|c| c.metrics) {
        total.num_specs += metrics.num_specs;
        total.num_apis += metrics.num_apis;
        total.num_endpoints += metrics.num_endpoints;
        total.extra.extend(metrics.extra.clone());
    }

    let mut superseded_apis = 0u64;
    let mut superseded_specs = 0u64;
    for (i, contribution) in contributions.iter().enumerate() {
        let Some(apis) = contribution.apis else {
            continue;
        };
        let higher = &contributions[i + 1..];
        for (id, entry) in apis {
            let hidden = higher
                .iter()
                .filter_map(|c| c.apis)
                .any(|h| h.contains_key(id));
            if hidden {
                superseded_apis += 1;
                superseded_specs += entry.versions.len() as u64;
            }
        }
    }

    total.num_apis = total.num_apis.saturating_sub(superseded_apis);
    total.num_specs = total.num_specs.saturating_sub(superseded_specs);
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use op_core::{CatalogEntry, VersionRecord};

    fn entry(title: &str, versions: &[&str]) -> CatalogEntry {
        let records = versions
            .iter()
            .map(|v| {
                let mut record = VersionRecord::default();
                record.info.title = title.to_string();
                (v.to_string(), record)
            })
            .collect();
        CatalogEntry::new(versions[0], records)
    }

    fn catalog(entries: &[(&str, CatalogEntry)]) -> CatalogMap {
        entries.iter().map(|(id, e)| (id.to_string(), e.clone())).collect()
    }

    fn title(map: &CatalogMap, id: &str) -> String {
        map[id].preferred_version().unwrap().info.title.clone()
    }

    #[test]
    fn test_highest_precedence_wins() {
        let primary = catalog(&[("p:svc", entry("Old", &["1"])), ("p:only", entry("P", &["1"]))]);
        let secondary = catalog(&[("p:svc", entry("Mid", &["1"])), ("s:only", entry("S", &["1"]))]);
        let custom = catalog(&[("p:svc", entry("New", &["1"]))]);

        let merged = merge_catalogs(primary, secondary, custom);
        assert_eq!(merged.len(), 3);
        assert_eq!(title(&merged, "p:svc"), "New");
        assert_eq!(title(&merged, "p:only"), "P");
        assert_eq!(title(&merged, "s:only"), "S");
    }

    #[test]
    fn test_lower_source_cannot_win_back() {
        let primary = catalog(&[("x", entry("primary", &["1"]))]);
        let secondary = catalog(&[("x", entry("secondary", &["1"]))]);
        let custom = CatalogMap::new();

        let merged = merge_catalogs(primary.clone(), secondary.clone(), custom.clone());
        assert_eq!(title(&merged, "x"), "secondary");

        let only_primary = merge_catalogs(primary, CatalogMap::new(), custom);
        assert_eq!(title(&only_primary, "x"), "primary");
    }

    #[test]
    fn test_merge_sorted_union() {
        let merged = merge_sorted(vec![
            vec!["b.com".to_string(), "a.com".to_string()],
            vec!["c.com".to_string(), "a.com".to_string()],
        ]);
        assert_eq!(merged, vec!["a.com", "b.com", "c.com"]);
    }

    #[test]
    fn test_metrics_subtract_superseded_entries() {
        let primary_apis = catalog(&[("a", entry("A", &["1", "2"])), ("b", entry("B", &["1"]))]);
        let custom_apis = catalog(&[("a", entry("A2", &["3"]))]);

        let primary_metrics = CatalogMetrics {
            num_specs: 3,
            num_apis: 2,
            num_endpoints: 40,
            ..Default::default()
        };
        let custom_metrics = CatalogMetrics {
            num_specs: 1,
            num_apis: 1,
            num_endpoints: 5,
            ..Default::default()
        };

        let metrics = aggregate_metrics(&[
            MetricsContribution {
                metrics: Some(&primary_metrics),
                apis: Some(&primary_apis),
            },
            MetricsContribution::default(),
            MetricsContribution {
                metrics: Some(&custom_metrics),
                apis: Some(&custom_apis),
            },
        ]);

        assert_eq!(metrics.num_apis, 2);
        assert_eq!(metrics.num_specs, 2);
        assert_eq!(metrics.num_endpoints, 45);
    }
}
