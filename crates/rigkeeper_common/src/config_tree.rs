//! Settings Tree - ordered worker settings with merge and normalize
//!
//! A worker settings file is an ordered tree of objects, arrays and scalar
//! leaves. Every leaf is addressed by a [`ConfigPath`] made of key and index
//! segments, unique within one tree snapshot.
//!
//! Two reconciliation operations run over trees:
//! - [`merge_into`] copies values from a previously saved tree into a newer
//!   schema, converting each value into the new leaf's type. A failed
//!   conversion falls back to the new default for that leaf only.
//! - [`normalize_leaf`] coerces a freshly edited value into the type the
//!   persisted tree declares at the same path. Failures are returned.

use serde_json::{Map, Number, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Errors raised by path handling and normalization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigTreeError {
    #[error("Failed to parse '{value}' into {expected} at '{path}'")]
    Normalize {
        value: String,
        expected: String,
        path: String,
    },

    #[error("Invalid settings path: '{0}'")]
    InvalidPath(String),

    #[error("No setting at '{0}'")]
    PathNotFound(String),

    #[error("Setting at '{0}' is not a single value")]
    NotALeaf(String),
}

/// One step of a [`ConfigPath`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Address of a node inside a settings tree
///
/// Renders as `a.b[0].c`. Keys that contain `.`, `[` or `]` render in the
/// quoted bracket form `['a.b']`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ConfigPath(Vec<PathSegment>);

impl ConfigPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Path of a top-level member
    pub fn key(key: &str) -> Self {
        Self(vec![PathSegment::Key(key.to_string())])
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn child_key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self(segments)
    }

    pub fn child_index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
                PathSegment::Key(key) if key.contains(&['.', '[', ']'][..]) || key.is_empty() => {
                    write!(f, "['{}']", key)?
                }
                PathSegment::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for ConfigPath {
    type Err = ConfigTreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigTreeError::InvalidPath(s.to_string());
        let mut segments = Vec::new();
        let mut key = String::new();
        let mut after_bracket = false;
        let mut chars = s.chars();

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if key.is_empty() && !after_bracket {
                        return Err(invalid());
                    }
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    }
                    after_bracket = false;
                }
                '[' => {
                    if !key.is_empty() {
                        segments.push(PathSegment::Key(std::mem::take(&mut key)));
                    }
                    let mut inner = String::new();
                    loop {
                        match chars.next() {
                            Some(']') if !inner.starts_with('\'') || (inner.len() > 1 && inner.ends_with('\'')) => break,
                            Some(ch) => inner.push(ch),
                            None => return Err(invalid()),
                        }
                    }
                    let segment = if inner.len() >= 2 && inner.starts_with('\'') && inner.ends_with('\'') {
                        PathSegment::Key(inner[1..inner.len() - 1].to_string())
                    } else {
                        PathSegment::Index(inner.trim().parse().map_err(|_| invalid())?)
                    };
                    segments.push(segment);
                    after_bracket = true;
                }
                ']' => return Err(invalid()),
                _ => {
                    if after_bracket {
                        // `a[0]b` needs a separator between segments
                        return Err(invalid());
                    }
                    key.push(c);
                }
            }
        }

        if !key.is_empty() {
            segments.push(PathSegment::Key(key));
        } else if s.ends_with('.') {
            return Err(invalid());
        }

        Ok(Self(segments))
    }
}

/// Type declared by a scalar leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafKind {
    String,
    Bool,
    Int,
    Float,
    /// Untyped leaf; values pass through unchanged
    Null,
}

impl fmt::Display for LeafKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "String",
            Self::Bool => "Boolean",
            Self::Int => "Integer",
            Self::Float => "Float",
            Self::Null => "Null",
        })
    }
}

/// A settings tree node
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Object(Vec<(String, ConfigValue)>),
    Array(Vec<ConfigValue>),
    String(String),
    Bool(bool),
    /// Any JSON integer, `i64::MIN..=u64::MAX`
    Int(i128),
    Float(f64),
    Null,
}

impl ConfigValue {
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Object(
                map.into_iter()
                    .map(|(key, value)| (key, Self::from_json(value)))
                    .collect(),
            ),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from_json).collect()),
            Value::String(s) => Self::String(s),
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Self::Int(i128::from(i)),
                (None, Some(u)) => Self::Int(i128::from(u)),
                _ => Self::Float(n.as_f64().unwrap_or(0.0)),
            },
            Value::Null => Self::Null,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Object(members) => {
                let mut map = Map::new();
                for (key, value) in members {
                    map.insert(key.clone(), value.to_json());
                }
                Value::Object(map)
            }
            Self::Array(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => json_int(*i).map(Value::Number).unwrap_or(Value::Null),
            Self::Float(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            Self::Null => Value::Null,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, Self::Object(_) | Self::Array(_))
    }

    pub fn leaf_kind(&self) -> Option<LeafKind> {
        match self {
            Self::Object(_) | Self::Array(_) => None,
            Self::String(_) => Some(LeafKind::String),
            Self::Bool(_) => Some(LeafKind::Bool),
            Self::Int(_) => Some(LeafKind::Int),
            Self::Float(_) => Some(LeafKind::Float),
            Self::Null => Some(LeafKind::Null),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Text form of a value, as an operator would type it
    pub fn display_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Bool(b) => b.to_string(),
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Null => String::new(),
            Self::Object(_) | Self::Array(_) => self.to_json().to_string(),
        }
    }

    pub fn get(&self, path: &ConfigPath) -> Option<&ConfigValue> {
        let mut node = self;
        for segment in path.segments() {
            node = match (segment, node) {
                (PathSegment::Key(key), Self::Object(members)) => {
                    members.iter().find(|(k, _)| k == key).map(|(_, v)| v)?
                }
                (PathSegment::Index(index), Self::Array(items)) => items.get(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    pub fn get_mut(&mut self, path: &ConfigPath) -> Option<&mut ConfigValue> {
        let mut node = self;
        for segment in path.segments() {
            node = match (segment, node) {
                (PathSegment::Key(key), Self::Object(members)) => {
                    members.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)?
                }
                (PathSegment::Index(index), Self::Array(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        Some(node)
    }

    /// Every scalar leaf with its path, depth-first in document order
    pub fn leaves(&self) -> Vec<(ConfigPath, &ConfigValue)> {
        let mut out = Vec::new();
        collect_leaves(self, ConfigPath::root(), &mut out);
        out
    }

    /// Convert a scalar into `kind`, `None` when the value does not fit
    pub fn coerce(&self, kind: LeafKind) -> Option<ConfigValue> {
        if !self.is_leaf() {
            return None;
        }

        match kind {
            LeafKind::Null => Some(self.clone()),
            LeafKind::String => Some(Self::String(self.display_text())),
            LeafKind::Bool => match self {
                Self::Bool(b) => Some(Self::Bool(*b)),
                Self::Int(i) => Some(Self::Bool(*i != 0)),
                Self::String(s) => parse_bool(s).map(Self::Bool),
                _ => None,
            },
            LeafKind::Int => match self {
                Self::Int(i) => Some(Self::Int(*i)),
                Self::Bool(b) => Some(Self::Int(i128::from(*b))),
                Self::Float(f) => float_to_int(*f).map(Self::Int),
                Self::String(s) => {
                    let s = s.trim();
                    match s.parse::<i128>() {
                        Ok(i) => JSON_INT_RANGE.contains(&i).then_some(i),
                        Err(_) => s.parse::<f64>().ok().and_then(float_to_int),
                    }
                    .map(Self::Int)
                }
                _ => None,
            },
            LeafKind::Float => match self {
                Self::Float(f) => Some(Self::Float(*f)),
                Self::Int(i) => Some(Self::Float(*i as f64)),
                Self::Bool(b) => Some(Self::Float(if *b { 1.0 } else { 0.0 })),
                Self::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(Self::Float),
                _ => None,
            },
        }
    }

    /// Replace the leaf at `path` with free text awaiting normalization
    pub fn set_text(&mut self, path: &ConfigPath, text: &str) -> Result<(), ConfigTreeError> {
        let node = self
            .get_mut(path)
            .ok_or_else(|| ConfigTreeError::PathNotFound(path.to_string()))?;
        if !node.is_leaf() {
            return Err(ConfigTreeError::NotALeaf(path.to_string()));
        }
        *node = Self::String(text.to_string());
        Ok(())
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_text())
    }
}

impl From<Value> for ConfigValue {
    fn from(value: Value) -> Self {
        Self::from_json(value)
    }
}

fn collect_leaves<'a>(
    node: &'a ConfigValue,
    path: ConfigPath,
    out: &mut Vec<(ConfigPath, &'a ConfigValue)>,
) {
    match node {
        ConfigValue::Object(members) => {
            for (key, child) in members {
                collect_leaves(child, path.child_key(key), out);
            }
        }
        ConfigValue::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                collect_leaves(child, path.child_index(index), out);
            }
        }
        _ => out.push((path, node)),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

const JSON_INT_RANGE: std::ops::RangeInclusive<i128> = (i64::MIN as i128)..=(u64::MAX as i128);

fn json_int(i: i128) -> Option<Number> {
    i64::try_from(i)
        .map(Number::from)
        .or_else(|_| u64::try_from(i).map(Number::from))
        .ok()
}

fn float_to_int(f: f64) -> Option<i128> {
    // u64::MAX as f64 rounds up to 2^64
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < u64::MAX as f64 {
        Some(f as i128)
    } else {
        None
    }
}

/// Outcome counters of one [`merge_into`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Old values carried into the new tree
    pub copied: usize,
    /// Old leaves with no scalar counterpart in the new tree
    pub dropped: usize,
    /// Old values that failed conversion; the new default stands
    pub defaulted: usize,
}

/// Copy every old leaf into the same path of `new`, converted to the new type
pub fn merge_into(old: &ConfigValue, new: &mut ConfigValue) -> MergeStats {
    let mut stats = MergeStats::default();

    for (path, old_leaf) in old.leaves() {
        let Some(target) = new.get_mut(&path) else {
            stats.dropped += 1;
            continue;
        };
        let Some(kind) = target.leaf_kind() else {
            stats.dropped += 1;
            continue;
        };

        match old_leaf.coerce(kind) {
            Some(value) => {
                *target = value;
                stats.copied += 1;
            }
            None => {
                debug!("Keeping schema default at '{}': '{}' is not {}", path, old_leaf, kind);
                stats.defaulted += 1;
            }
        }
    }

    stats
}

/// Coerce `value` into the type `reference` declares at `path`
pub fn normalize_leaf(
    path: &ConfigPath,
    value: &ConfigValue,
    reference: &ConfigValue,
) -> Result<ConfigValue, ConfigTreeError> {
    let expected = reference.get(path).and_then(ConfigValue::leaf_kind);

    expected
        .and_then(|kind| value.coerce(kind))
        .ok_or_else(|| ConfigTreeError::Normalize {
            value: value.display_text(),
            expected: expected
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "unknown type".to_string()),
            path: path.to_string(),
        })
}

/// Apply a free-text edit to the leaf at `path`, typed after `reference`
///
/// `working` is untouched when the text does not convert.
pub fn edit_leaf(
    working: &mut ConfigValue,
    path: &ConfigPath,
    text: &str,
    reference: &ConfigValue,
) -> Result<ConfigValue, ConfigTreeError> {
    let mut candidate = working.clone();
    candidate.set_text(path, text)?;
    let edited = candidate
        .get(path)
        .ok_or_else(|| ConfigTreeError::PathNotFound(path.to_string()))?;
    let normalized = normalize_leaf(path, edited, reference)?;

    let slot = working
        .get_mut(path)
        .ok_or_else(|| ConfigTreeError::PathNotFound(path.to_string()))?;
    *slot = normalized.clone();
    Ok(normalized)
}

/// Normalize every leaf of `working` against `reference`
///
/// Either every leaf is rewritten or, on the first failure, none is.
/// Returns the number of leaves normalized.
pub fn normalize_tree(
    working: &mut ConfigValue,
    reference: &ConfigValue,
) -> Result<usize, ConfigTreeError> {
    let normalized = working
        .leaves()
        .into_iter()
        .map(|(path, value)| normalize_leaf(&path, value, reference).map(|v| (path, v)))
        .collect::<Result<Vec<_>, _>>()?;

    let count = normalized.len();
    for (path, value) in normalized {
        if let Some(slot) = working.get_mut(&path) {
            *slot = value;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tree(value: Value) -> ConfigValue {
        ConfigValue::from_json(value)
    }

    #[test]
    fn test_path_display_and_parse() {
        let path = ConfigPath::key("gpus").child_index(2).child_key("intensity");
        assert_eq!(path.to_string(), "gpus[2].intensity");
        assert_eq!("gpus[2].intensity".parse::<ConfigPath>().unwrap(), path);

        let dotted = ConfigPath::key("a.b").child_key("c");
        assert_eq!(dotted.to_string(), "['a.b'].c");
        assert_eq!("['a.b'].c".parse::<ConfigPath>().unwrap(), dotted);

        assert!("".parse::<ConfigPath>().unwrap().is_root());
        assert!("a..b".parse::<ConfigPath>().is_err());
        assert!("a[x]".parse::<ConfigPath>().is_err());
        assert!("a[0".parse::<ConfigPath>().is_err());
        assert!("a.".parse::<ConfigPath>().is_err());
    }

    #[test]
    fn test_leaves_are_depth_first_in_document_order() {
        let t = tree(json!({
            "b": 1,
            "a": { "x": [true, "s"], "y": null },
            "c": 2.5
        }));

        let paths: Vec<String> = t.leaves().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["b", "a.x[0]", "a.x[1]", "a.y", "c"]);
    }

    #[test]
    fn test_json_round_trip_keeps_types() {
        let original = json!({"i": 3, "f": 3.0, "s": "3", "b": false, "n": null, "a": [1, 2]});
        let t = tree(original.clone());
        assert_eq!(t.get(&ConfigPath::key("f")), Some(&ConfigValue::Float(3.0)));
        assert_eq!(t.to_json(), original);
    }

    #[test]
    fn test_large_unsigned_integers_stay_exact() {
        let original = json!({"nonce": u64::MAX, "big": 9_223_372_036_854_775_808u64});
        let t = tree(original.clone());

        assert_eq!(t.get(&ConfigPath::key("nonce")), Some(&ConfigValue::Int(i128::from(u64::MAX))));
        assert_eq!(t.get(&ConfigPath::key("nonce")).unwrap().leaf_kind(), Some(LeafKind::Int));
        assert_eq!(t.to_json(), original);
    }

    #[test]
    fn test_integer_text_outside_json_range_is_rejected() {
        let reference = tree(json!({"nonce": 1}));
        let path = ConfigPath::key("nonce");

        let fits = ConfigValue::String(u64::MAX.to_string());
        assert_eq!(
            normalize_leaf(&path, &fits, &reference).unwrap(),
            ConfigValue::Int(i128::from(u64::MAX))
        );

        let too_big = ConfigValue::String("18446744073709551616".into());
        assert!(normalize_leaf(&path, &too_big, &reference).is_err());
        let too_small = ConfigValue::String("-9223372036854775809".into());
        assert!(normalize_leaf(&path, &too_small, &reference).is_err());
    }

    #[test]
    fn test_merge_converts_into_new_type() {
        let old = tree(json!({"port": "4078", "enabled": "true", "rate": 2}));
        let mut new = tree(json!({"port": 0, "enabled": false, "rate": 0.5}));

        let stats = merge_into(&old, &mut new);

        assert_eq!(stats, MergeStats { copied: 3, dropped: 0, defaulted: 0 });
        assert_eq!(new, tree(json!({"port": 4078, "enabled": true, "rate": 2.0})));
    }

    #[test]
    fn test_merge_drops_removed_fields() {
        let old = tree(json!({"legacy": 1, "kept": "x", "nested": {"gone": true}}));
        let mut new = tree(json!({"kept": "default", "added": 7}));

        let stats = merge_into(&old, &mut new);

        assert_eq!(stats.copied, 1);
        assert_eq!(stats.dropped, 2);
        assert_eq!(new, tree(json!({"kept": "x", "added": 7})));
    }

    #[test]
    fn test_merge_failure_is_isolated_to_one_leaf() {
        let old = tree(json!({"a": "not a number", "b": "second", "c": 9}));
        let mut new = tree(json!({"a": 10, "b": "default", "c": 1}));

        let stats = merge_into(&old, &mut new);

        assert_eq!(stats.defaulted, 1);
        assert_eq!(stats.copied, 2);
        assert_eq!(new, tree(json!({"a": 10, "b": "second", "c": 9})));
    }

    #[test]
    fn test_merge_composite_target_counts_as_dropped() {
        let old = tree(json!({"pool": "stratum://x"}));
        let mut new = tree(json!({"pool": {"url": "stratum://y"}}));

        let stats = merge_into(&old, &mut new);

        assert_eq!(stats.dropped, 1);
        assert_eq!(new, tree(json!({"pool": {"url": "stratum://y"}})));
    }

    #[test]
    fn test_merge_array_elements_by_index() {
        let old = tree(json!({"devices": [{"id": 1}, {"id": 2}, {"id": 3}]}));
        let mut new = tree(json!({"devices": [{"id": 0}, {"id": 0}]}));

        let stats = merge_into(&old, &mut new);

        assert_eq!(stats.copied, 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(new, tree(json!({"devices": [{"id": 1}, {"id": 2}]})));
    }

    #[test]
    fn test_normalize_round_trip_per_kind() {
        let reference = tree(json!({"s": "x", "b": true, "i": -42, "f": 0.1}));

        for (key, value) in [
            ("s", ConfigValue::String("hello world".to_string())),
            ("b", ConfigValue::Bool(false)),
            ("i", ConfigValue::Int(i128::from(i64::MIN))),
            ("f", ConfigValue::Float(1234.5678)),
        ] {
            let path = ConfigPath::key(key);
            let edited = ConfigValue::String(value.display_text());
            assert_eq!(normalize_leaf(&path, &edited, &reference).unwrap(), value);
        }
    }

    #[test]
    fn test_normalize_error_names_value_type_and_path() {
        let reference = tree(json!({"gpu": [{"intensity": 24.5}]}));
        let path: ConfigPath = "gpu[0].intensity".parse().unwrap();

        let err = normalize_leaf(&path, &ConfigValue::String("fast".into()), &reference).unwrap_err();
        assert_eq!(err.to_string(), "Failed to parse 'fast' into Float at 'gpu[0].intensity'");
    }

    #[test]
    fn test_normalize_unknown_path_fails() {
        let reference = tree(json!({"a": 1}));
        let path = ConfigPath::key("missing");

        let err = normalize_leaf(&path, &ConfigValue::String("1".into()), &reference).unwrap_err();
        assert!(matches!(err, ConfigTreeError::Normalize { ref expected, .. } if expected == "unknown type"));
    }

    #[test]
    fn test_normalize_tree_is_all_or_nothing() {
        let reference = tree(json!({"a": 1, "b": 2}));
        let mut working = tree(json!({"a": "5", "b": "oops"}));

        assert!(normalize_tree(&mut working, &reference).is_err());
        assert_eq!(working, tree(json!({"a": "5", "b": "oops"})));

        let mut working = tree(json!({"a": "5", "b": "6"}));
        assert_eq!(normalize_tree(&mut working, &reference).unwrap(), 2);
        assert_eq!(working, tree(json!({"a": 5, "b": 6})));
    }

    #[test]
    fn test_set_text_rejects_composites() {
        let mut t = tree(json!({"a": {"b": 1}}));
        assert_eq!(
            t.set_text(&ConfigPath::key("a"), "x"),
            Err(ConfigTreeError::NotALeaf("a".to_string()))
        );
        assert!(t.set_text(&"a.b".parse().unwrap(), "2").is_ok());
        assert_eq!(t.get(&"a.b".parse().unwrap()), Some(&ConfigValue::String("2".into())));
        assert!(matches!(
            t.set_text(&ConfigPath::key("zzz"), "x"),
            Err(ConfigTreeError::PathNotFound(_))
        ));
    }

    #[test]
    fn test_edit_leaf_keeps_working_copy_on_rejection() {
        let reference = tree(json!({"gpuIntensity": 24, "submitStale": false}));
        let mut working = reference.clone();

        let value = edit_leaf(&mut working, &ConfigPath::key("gpuIntensity"), " 26 ", &reference).unwrap();
        assert_eq!(value, ConfigValue::Int(26));

        let err = edit_leaf(&mut working, &ConfigPath::key("submitStale"), "maybe", &reference).unwrap_err();
        assert!(matches!(err, ConfigTreeError::Normalize { .. }));
        assert_eq!(working, tree(json!({"gpuIntensity": 26, "submitStale": false})));
    }

    #[test]
    fn test_coercion_edges() {
        assert_eq!(ConfigValue::Float(3.0).coerce(LeafKind::Int), Some(ConfigValue::Int(3)));
        assert_eq!(ConfigValue::Float(3.5).coerce(LeafKind::Int), None);
        assert_eq!(ConfigValue::String(" 7.0 ".into()).coerce(LeafKind::Int), Some(ConfigValue::Int(7)));
        assert_eq!(ConfigValue::String("NaN".into()).coerce(LeafKind::Float), None);
        assert_eq!(ConfigValue::String("TRUE".into()).coerce(LeafKind::Bool), Some(ConfigValue::Bool(true)));
        assert_eq!(ConfigValue::Int(0).coerce(LeafKind::Bool), Some(ConfigValue::Bool(false)));
        assert_eq!(ConfigValue::Null.coerce(LeafKind::Int), None);
        assert_eq!(ConfigValue::Array(vec![]).coerce(LeafKind::String), None);
    }
}
