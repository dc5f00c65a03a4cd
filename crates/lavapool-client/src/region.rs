//! Region simplification and the node affinity table

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Reduce a guild's voice region to its affinity token.
///
/// Strips a leading `vip-` and keeps the text before the first `-`:
/// `vip-us-east` becomes `us`, `eu-west` becomes `eu`.
pub fn simplify_region(region: &str) -> &str {
    let region = region.strip_prefix("vip-").unwrap_or(region);
    region.split('-').next().unwrap_or(region)
}

/// Maps a node's region tag to the simplified guild regions it may serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionAffinity(BTreeMap<String, BTreeSet<String>>);

impl RegionAffinity {
    /// An empty table; no node has regional preference
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    /// Set the guild regions accepted by nodes tagged `node_region`
    pub fn insert<I, S>(&mut self, node_region: &str, guild_regions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.insert(
            node_region.to_string(),
            guild_regions.into_iter().map(Into::into).collect(),
        );
    }

    pub fn with<I, S>(mut self, node_region: &str, guild_regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(node_region, guild_regions);
        self
    }

    /// Whether a node tagged `node_region` serves the simplified `token`
    pub fn accepts(&self, node_region: &str, token: &str) -> bool {
        self.0
            .get(node_region)
            .map_or(false, |regions| regions.contains(token))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for RegionAffinity {
    fn default() -> Self {
        Self::empty()
            .with("us", ["us", "brazil"])
            .with("eu", ["eu", "europe", "russia", "amsterdam", "frankfurt", "london"])
            .with("asia", ["hongkong", "japan", "singapore", "india", "sydney", "southafrica"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplify_region() {
        assert_eq!(simplify_region("vip-us-east"), "us");
        assert_eq!(simplify_region("eu-west"), "eu");
        assert_eq!(simplify_region("brazil"), "brazil");
        assert_eq!(simplify_region("vip-amsterdam"), "amsterdam");
        assert_eq!(simplify_region(""), "");
    }

    #[test]
    fn test_only_leading_vip_is_stripped() {
        assert_eq!(simplify_region("us-vip-east"), "us");
        assert_eq!(simplify_region("vip-vip-x"), "vip");
    }

    #[test]
    fn test_default_table() {
        let table = RegionAffinity::default();
        assert!(table.accepts("us", "us"));
        assert!(table.accepts("us", "brazil"));
        assert!(table.accepts("eu", "russia"));
        assert!(!table.accepts("eu", "us"));
        assert!(!table.accepts("mars", "us"));
    }

    #[test]
    fn test_deserialize_from_toml() {
        let table: RegionAffinity = toml::from_str(
            r#"
            us = ["us"]
            eu = ["eu", "russia"]
            "#,
        )
        .unwrap();
        assert!(table.accepts("eu", "russia"));
        assert!(!table.accepts("us", "brazil"));
    }
}
