//! Hierarchical label taxonomy for marine acoustic classification
//!
//! Labels are stored on the wire as `" > "`-separated paths, e.g.
//! `"Biophony > Marine mammal > Cetacean > Baleen whale > Fin whale"`.
//! The taxonomy is read-only configuration: the validator takes a snapshot
//! as an explicit parameter rather than consulting process-wide state, so
//! documents can be checked against the exact tree their labels came from.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Level separator used in taxonomy path strings
pub const PATH_SEPARATOR: &str = " > ";

/// Embedded snapshot of the standardized marine acoustic taxonomy
const BUILTIN_TAXONOMY_JSON: &str = include_str!("builtin_taxonomy.json");

static BUILTIN: Lazy<Taxonomy> = Lazy::new(|| {
    // The embedded snapshot is compiled in; a decode failure is a build defect.
    Taxonomy::from_json_str(BUILTIN_TAXONOMY_JSON)
        .unwrap_or_else(|e| panic!("embedded taxonomy is invalid: {e}"))
});

/// Mapping from legacy flat label names to hierarchical paths.
///
/// Order matters: the first entry for a given path is the canonical legacy
/// name. Lookup is case-sensitive with a handful of observed variants.
static LEGACY_LABEL_MAPPING: &[(&str, &str)] = &[
    ("Unknown Feature", "Other > Unknown sound of interest"),
    ("Anomaly", "Other > Unknown sound of interest"),
    ("Data Gap", "Instrumentation > Malfunction > Data gap"),
    ("Dropout", "Instrumentation > Malfunction > Frequency dropout"),
    ("Engine Noise", "Anthropophony > Vessel"),
    ("Rain", "Geophony > Weather > Precipitation > Rain"),
    ("Sensitivity", "Instrumentation > Malfunction > Sensitivity change"),
    (
        "Tonal",
        "Instrumentation > Self-noise > Non-acoustic self noise > Tonal",
    ),
    ("Unknown Features", "Other > Unknown sound of interest"),
    ("Engine noise", "Anthropophony > Vessel"),
    ("rain", "Geophony > Weather > Precipitation > Rain"),
    (
        "tonal",
        "Instrumentation > Self-noise > Non-acoustic self noise > Tonal",
    ),
];

/// Fallback path for legacy labels that map to nothing
const UNKNOWN_SOUND_PATH: &str = "Other > Unknown sound of interest";

/// One node in the taxonomy tree; children keyed by label name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonomyNode(pub BTreeMap<String, TaxonomyNode>);

/// Read-only hierarchical label tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taxonomy {
    /// Optional taxonomy version tag carried into verification records
    version: Option<String>,
    root: BTreeMap<String, TaxonomyNode>,
}

impl Taxonomy {
    /// Shared snapshot of the embedded standardized taxonomy
    pub fn builtin() -> &'static Taxonomy {
        &BUILTIN
    }

    /// Decode a taxonomy from a JSON string
    pub fn from_json_str(s: &str) -> Result<Taxonomy> {
        let value: Value = serde_json::from_str(s)?;
        Self::from_json_value(value)
    }

    /// Decode a taxonomy from a JSON value.
    ///
    /// Accepts either a bare label tree, or a wrapper object with a
    /// `labels` tree and an optional `version` string.
    pub fn from_json_value(value: Value) -> Result<Taxonomy> {
        let obj = match value {
            Value::Object(obj) => obj,
            other => {
                return Err(SchemaError::Malformed(format!(
                    "taxonomy must be a JSON object, got {}",
                    json_type_name(&other)
                ))
                .into())
            }
        };

        let (version, tree) = if obj.contains_key("labels") {
            let version = obj
                .get("version")
                .and_then(Value::as_str)
                .map(str::to_string);
            let labels = obj
                .get("labels")
                .cloned()
                .unwrap_or(Value::Object(Default::default()));
            (version, labels)
        } else {
            (None, Value::Object(obj))
        };

        let root: BTreeMap<String, TaxonomyNode> = serde_json::from_value(tree)
            .map_err(|e| SchemaError::Malformed(format!("invalid taxonomy tree: {e}")))?;
        Ok(Taxonomy { version, root })
    }

    /// Taxonomy version tag, if the source file declared one
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Whether a `" > "`-separated path resolves to a node in the tree
    pub fn contains(&self, path: &str) -> bool {
        self.walk(path).is_some()
    }

    /// Whether a path resolves to a node with no children
    pub fn is_leaf(&self, path: &str) -> bool {
        self.walk(path).is_some_and(|node| node.0.is_empty())
    }

    /// Every valid path in the tree, including interior nodes
    pub fn all_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(&self.root, &mut Vec::new(), false, &mut paths);
        paths
    }

    /// Every path that ends at a childless node
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut paths = Vec::new();
        collect_paths(&self.root, &mut Vec::new(), true, &mut paths);
        paths
    }

    /// Total number of nodes in the tree
    pub fn len(&self) -> usize {
        self.all_paths().len()
    }

    /// True when the tree has no nodes at all
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    fn walk(&self, path: &str) -> Option<&TaxonomyNode> {
        let mut segments = split_path(path);
        let first = segments.next()?;
        let mut node = self.root.get(first)?;
        for segment in segments {
            node = node.0.get(segment)?;
        }
        Some(node)
    }
}

/// Split a path string on `>` with whitespace-tolerant segments
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('>').map(str::trim).filter(|s| !s.is_empty())
}

/// Join path segments with the canonical separator
pub fn join_path<'a>(segments: impl IntoIterator<Item = &'a str>) -> String {
    segments.into_iter().collect::<Vec<_>>().join(PATH_SEPARATOR)
}

/// Map a label written by the legacy tools onto a hierarchical path.
///
/// Hierarchical labels pass through re-joined with the canonical
/// separator; known legacy flat names map via the compatibility table;
/// anything else lands on the unknown-sound bucket, matching what the
/// legacy import always did.
pub fn to_hierarchical(label: &str) -> String {
    if label.contains('>') {
        return join_path(split_path(label));
    }
    for (legacy, hierarchical) in LEGACY_LABEL_MAPPING {
        if *legacy == label {
            return (*hierarchical).to_string();
        }
    }
    UNKNOWN_SOUND_PATH.to_string()
}

fn collect_paths(
    level: &BTreeMap<String, TaxonomyNode>,
    prefix: &mut Vec<String>,
    leaves_only: bool,
    out: &mut Vec<String>,
) {
    for (name, node) in level {
        prefix.push(name.clone());
        if !leaves_only || node.0.is_empty() {
            out.push(prefix.join(PATH_SEPARATOR));
        }
        collect_paths(&node.0, prefix, leaves_only, out);
        prefix.pop();
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_loads() {
        let taxonomy = Taxonomy::builtin();
        assert!(!taxonomy.is_empty());
        assert!(taxonomy.len() > 100, "expected a substantial tree");
    }

    #[test]
    fn test_builtin_contains_fin_whale() {
        let taxonomy = Taxonomy::builtin();
        assert!(taxonomy
            .contains("Biophony > Marine mammal > Cetacean > Baleen whale > Fin whale"));
        assert!(taxonomy
            .is_leaf("Biophony > Marine mammal > Cetacean > Baleen whale > Fin whale"));
    }

    #[test]
    fn test_interior_node_is_not_leaf() {
        let taxonomy = Taxonomy::builtin();
        assert!(taxonomy.contains("Biophony > Marine mammal"));
        assert!(!taxonomy.is_leaf("Biophony > Marine mammal"));
    }

    #[test]
    fn test_unknown_path_missing() {
        let taxonomy = Taxonomy::builtin();
        assert!(!taxonomy.contains("Biophony > Marine mammal > Kraken"));
        assert!(!taxonomy.contains(""));
    }

    #[test]
    fn test_contains_tolerates_loose_spacing() {
        let taxonomy = Taxonomy::builtin();
        assert!(taxonomy.contains("Biophony>Marine mammal"));
        assert!(taxonomy.contains("Biophony >  Marine mammal"));
    }

    #[test]
    fn test_leaf_paths_subset_of_all_paths() {
        let taxonomy = Taxonomy::builtin();
        let all = taxonomy.all_paths();
        let leaves = taxonomy.leaf_paths();
        assert!(leaves.len() < all.len());
        for leaf in &leaves {
            assert!(all.contains(leaf));
        }
    }

    #[test]
    fn test_versioned_wrapper_shape() {
        let taxonomy = Taxonomy::from_json_str(
            r#"{"version": "2024.1", "labels": {"Biophony": {"Fish": {}}}}"#,
        )
        .unwrap();
        assert_eq!(taxonomy.version(), Some("2024.1"));
        assert!(taxonomy.contains("Biophony > Fish"));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(Taxonomy::from_json_str("[1, 2, 3]").is_err());
    }

    #[test]
    fn test_to_hierarchical_passthrough() {
        assert_eq!(
            to_hierarchical("Biophony > Fish"),
            "Biophony > Fish".to_string()
        );
        // separator spacing is normalized
        assert_eq!(to_hierarchical("Biophony>Fish"), "Biophony > Fish");
    }

    #[test]
    fn test_to_hierarchical_legacy_names() {
        assert_eq!(
            to_hierarchical("Rain"),
            "Geophony > Weather > Precipitation > Rain"
        );
        assert_eq!(to_hierarchical("Engine Noise"), "Anthropophony > Vessel");
        assert_eq!(to_hierarchical("Mystery Hum"), UNKNOWN_SOUND_PATH);
    }
}
