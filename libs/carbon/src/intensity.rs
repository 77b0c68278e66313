//! Carbon intensity table.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

/// Region → carbon intensity, in the order the source returned it.
///
/// The source order matters: it breaks ties between regions with equal
/// intensity. Deserializing from a JSON object keeps the key order of the
/// document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarbonIntensityTable {
    entries: Vec<(String, f64)>,
}

/// A region's position in the ascending intensity order.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedRegion {
    /// 0-based rank; 0 is the cleanest region.
    pub rank: usize,
    pub region: String,
    pub intensity: f64,
}

impl CarbonIntensityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Intensity for a region.
    pub fn intensity(&self, region: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| name == region)
            .map(|(_, value)| *value)
    }

    /// Entries in source order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), *value))
    }

    /// Regions sorted ascending by intensity.
    ///
    /// The sort is stable, so equal intensities keep source order.
    pub fn ranked(&self) -> Vec<RankedRegion> {
        let mut sorted: Vec<&(String, f64)> = self.entries.iter().collect();
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1));
        sorted
            .into_iter()
            .enumerate()
            .map(|(rank, (region, intensity))| RankedRegion {
                rank,
                region: region.clone(),
                intensity: *intensity,
            })
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for CarbonIntensityTable {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut table = Self::new();
        for (region, value) in iter {
            let region = region.into();
            // A repeated key replaces the earlier value in place.
            match table.entries.iter_mut().find(|(name, _)| *name == region) {
                Some(entry) => entry.1 = value,
                None => table.entries.push((region, value)),
            }
        }
        table
    }
}

impl<'de> Deserialize<'de> for CarbonIntensityTable {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = CarbonIntensityTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of region to numeric carbon intensity")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((region, value)) = map.next_entry::<String, f64>()? {
                    entries.push((region, value));
                }
                Ok(entries.into_iter().collect())
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_keeps_document_order() {
        let table: CarbonIntensityTable =
            serde_json::from_str(r#"{"eu": 50, "us": 10, "asia": 90.5}"#).unwrap();

        let regions: Vec<&str> = table.entries().map(|(r, _)| r).collect();
        assert_eq!(regions, vec!["eu", "us", "asia"]);
        assert_eq!(table.intensity("asia"), Some(90.5));
        assert_eq!(table.intensity("mars"), None);
    }

    #[test]
    fn test_deserialize_rejects_non_numeric() {
        let result = serde_json::from_str::<CarbonIntensityTable>(r#"{"eu": "low"}"#);
        assert!(result.is_err());

        let result = serde_json::from_str::<CarbonIntensityTable>(r#"[1, 2, 3]"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_ranked_ascending() {
        let table: CarbonIntensityTable =
            [("eu", 50.0), ("us", 10.0), ("asia", 90.0)].into_iter().collect();

        let ranked = table.ranked();
        let order: Vec<(usize, &str)> = ranked
            .iter()
            .map(|r| (r.rank, r.region.as_str()))
            .collect();
        assert_eq!(order, vec![(0, "us"), (1, "eu"), (2, "asia")]);
    }

    #[test]
    fn test_ranked_ties_keep_source_order() {
        let table: CarbonIntensityTable =
            [("b", 20.0), ("a", 20.0), ("c", 5.0), ("d", 20.0)]
                .into_iter()
                .collect();

        let regions: Vec<String> = table.ranked().into_iter().map(|r| r.region).collect();
        assert_eq!(regions, vec!["c", "b", "a", "d"]);
    }

    #[test]
    fn test_repeated_region_replaces_value() {
        let table: CarbonIntensityTable = [("eu", 50.0), ("us", 10.0), ("eu", 5.0)]
            .into_iter()
            .collect();

        assert_eq!(table.len(), 2);
        assert_eq!(table.intensity("eu"), Some(5.0));
    }

    #[test]
    fn test_empty_table() {
        let table: CarbonIntensityTable = serde_json::from_str("{}").unwrap();
        assert!(table.is_empty());
        assert!(table.ranked().is_empty());
    }
}
