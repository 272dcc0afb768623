//! Column specifications and their normalized projection.
//!
//! A [`ColumnSpec`] says which columns a verb fetches, what to call them in
//! the output row, and optionally which [`ScalarKind`] to decode them as.
//! Configuration supplies it in one of four shapes; [`ColumnSpec::projection`]
//! reduces every shape to the same parallel arrays.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::ScalarKind;

/// One of the four supported column specification shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnSpec {
    /// Bare column names; each column keeps its name as label.
    Names(Vec<String>),
    /// `(name, type)` pairs; labels are the names.
    Typed(Vec<(String, ScalarKind)>),
    /// `name -> label` renames.
    Labeled(BTreeMap<String, String>),
    /// `name -> (label, type)`.
    LabeledTyped(BTreeMap<String, (String, ScalarKind)>),
}

/// Canonical form of a [`ColumnSpec`]: source columns, output labels and
/// optional declared types, aligned index by index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Projection {
    /// Source column names, in projection order.
    pub columns: Vec<String>,
    /// Output labels, one per column.
    pub labels: Vec<String>,
    /// Declared types, one per column, when the spec carries them.
    pub types: Option<Vec<ScalarKind>>,
}

impl Projection {
    /// Whether no columns were requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Comma-joined projection list, e.g. `id, x, y`.
    #[must_use]
    pub fn sql(&self) -> String {
        self.columns.join(", ")
    }

    /// Last-value projection, e.g. `LAST(id), LAST(x)`.
    ///
    /// In an append-only table this selects the current value of each column.
    #[must_use]
    pub fn last_sql(&self) -> String {
        if self.columns.is_empty() {
            return String::new();
        }
        format!("LAST({})", self.columns.join("), LAST("))
    }

    /// Labels as `Option`, `None` when nothing was requested.
    #[must_use]
    pub fn labels(&self) -> Option<&[String]> {
        if self.labels.is_empty() {
            None
        } else {
            Some(&self.labels)
        }
    }
}

impl ColumnSpec {
    /// A single bare column.
    #[must_use]
    pub fn single(name: &str) -> Self {
        Self::Names(vec![name.to_string()])
    }

    /// Bare column list from string slices.
    #[must_use]
    pub fn names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::Names(names.iter().map(|s| s.as_ref().to_string()).collect())
    }

    /// Number of configured columns.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Names(v) => v.len(),
            Self::Typed(v) => v.len(),
            Self::Labeled(m) => m.len(),
            Self::LabeledTyped(m) => m.len(),
        }
    }

    /// Whether the spec names no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reduces the spec to its canonical parallel arrays.
    #[must_use]
    pub fn projection(&self) -> Projection {
        match self {
            Self::Names(names) => Projection {
                columns: names.clone(),
                labels: names.clone(),
                types: None,
            },
            Self::Typed(pairs) => Projection {
                columns: pairs.iter().map(|(n, _)| n.clone()).collect(),
                labels: pairs.iter().map(|(n, _)| n.clone()).collect(),
                types: Some(pairs.iter().map(|(_, t)| *t).collect()),
            },
            Self::Labeled(map) => Projection {
                columns: map.keys().cloned().collect(),
                labels: map.values().cloned().collect(),
                types: None,
            },
            Self::LabeledTyped(map) => Projection {
                columns: map.keys().cloned().collect(),
                labels: map.values().map(|(l, _)| l.clone()).collect(),
                types: Some(map.values().map(|(_, t)| *t).collect()),
            },
        }
    }

    /// Keeps only the columns named in `fields`, preserving the shape.
    ///
    /// An empty allow-list keeps everything.
    #[must_use]
    pub fn restrict(&self, fields: &[String]) -> Self {
        if fields.is_empty() {
            return self.clone();
        }
        let keep = |name: &String| fields.contains(name);
        match self {
            Self::Names(v) => Self::Names(v.iter().filter(|n| keep(n)).cloned().collect()),
            Self::Typed(v) => Self::Typed(v.iter().filter(|(n, _)| keep(n)).cloned().collect()),
            Self::Labeled(m) => Self::Labeled(
                m.iter()
                    .filter(|(n, _)| keep(n))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            Self::LabeledTyped(m) => Self::LabeledTyped(
                m.iter()
                    .filter(|(n, _)| keep(n))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

impl Default for ColumnSpec {
    fn default() -> Self {
        Self::Names(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Configuration forms
// ---------------------------------------------------------------------------

/// A list entry in `edit_pars` / `topics_pars`: `"name"` or `["name", "type"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColumnEntry {
    Name(String),
    Typed([String; 2]),
}

/// A map value in `edit_hash` / `topics_hash`: `"label"` or `["label", "type"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LabelEntry {
    Label(String),
    Typed([String; 2]),
}

/// Builds the spec a verb uses from its configured hash and list forms.
///
/// The hash form wins when it is non-empty. Within a form, the typed shape
/// is chosen as soon as one entry carries a type; untyped entries in a
/// typed spec decode as [`ScalarKind::Dynamic`].
#[must_use]
pub fn spec_from_config(
    hash: &BTreeMap<String, LabelEntry>,
    pars: &[ColumnEntry],
) -> ColumnSpec {
    if !hash.is_empty() {
        let typed = hash.values().any(|v| matches!(v, LabelEntry::Typed(_)));
        if typed {
            return ColumnSpec::LabeledTyped(
                hash.iter()
                    .map(|(name, entry)| {
                        let pair = match entry {
                            LabelEntry::Label(l) => (l.clone(), ScalarKind::Dynamic),
                            LabelEntry::Typed([l, t]) => (l.clone(), kind(t)),
                        };
                        (name.clone(), pair)
                    })
                    .collect(),
            );
        }
        return ColumnSpec::Labeled(
            hash.iter()
                .filter_map(|(name, entry)| match entry {
                    LabelEntry::Label(l) => Some((name.clone(), l.clone())),
                    LabelEntry::Typed(_) => None,
                })
                .collect(),
        );
    }

    let typed = pars.iter().any(|v| matches!(v, ColumnEntry::Typed(_)));
    if typed {
        if pars.iter().any(|v| matches!(v, ColumnEntry::Name(_))) {
            tracing::debug!("mixed typed and untyped column entries; untyped decode dynamically");
        }
        return ColumnSpec::Typed(
            pars.iter()
                .map(|entry| match entry {
                    ColumnEntry::Name(n) => (n.clone(), ScalarKind::Dynamic),
                    ColumnEntry::Typed([n, t]) => (n.clone(), kind(t)),
                })
                .collect(),
        );
    }
    ColumnSpec::Names(
        pars.iter()
            .filter_map(|entry| match entry {
                ColumnEntry::Name(n) => Some(n.clone()),
                ColumnEntry::Typed(_) => None,
            })
            .collect(),
    )
}

fn kind(name: &str) -> ScalarKind {
    // Infallible: unknown names map to Dynamic.
    name.parse().unwrap_or(ScalarKind::Dynamic)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn single_column_projects_itself() {
        let p = ColumnSpec::single("firstname").projection();
        assert_eq!(p.sql(), "firstname");
        assert_eq!(p.labels, vec!["firstname"]);
        assert!(p.types.is_none());
    }

    #[test]
    fn name_list_joins_with_commas() {
        let p = ColumnSpec::names(&["firstname", "lastname", "id"]).projection();
        assert_eq!(p.sql(), "firstname, lastname, id");
        assert_eq!(p.labels[0], "firstname");
        assert!(p.types.is_none());
    }

    #[test]
    fn labeled_map_renames_columns() {
        let map: BTreeMap<String, String> = [
            ("firstname", "First"),
            ("lastname", "Last"),
            ("id", "ID"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let p = ColumnSpec::Labeled(map).projection();
        assert!(p.sql().contains("firstname"));
        assert!(p.labels.contains(&"First".to_string()));
        assert!(p.types.is_none());
        let i = p.columns.iter().position(|c| c == "lastname").unwrap();
        assert_eq!(p.labels[i], "Last");
    }

    #[test]
    fn typed_pairs_keep_types_aligned() {
        let spec = ColumnSpec::Typed(vec![
            ("id".into(), ScalarKind::Int64),
            ("x".into(), ScalarKind::String),
        ]);
        let p = spec.projection();
        assert_eq!(p.labels, vec!["id", "x"]);
        assert_eq!(p.types, Some(vec![ScalarKind::Int64, ScalarKind::String]));
    }

    #[test]
    fn last_projection_wraps_every_column() {
        let p = ColumnSpec::names(&["id", "x"]).projection();
        assert_eq!(p.last_sql(), "LAST(id), LAST(x)");
        assert_eq!(ColumnSpec::single("ts").projection().last_sql(), "LAST(ts)");
    }

    #[test]
    fn empty_spec_is_no_columns() {
        let p = ColumnSpec::default().projection();
        assert!(p.is_empty());
        assert_eq!(p.sql(), "");
        assert_eq!(p.last_sql(), "");
        assert!(p.labels().is_none());
    }

    #[test]
    fn restrict_keeps_allowed_fields_only() {
        let spec = ColumnSpec::names(&["id", "x", "y"]);
        let p = spec.restrict(&["y".to_string(), "id".to_string()]).projection();
        assert_eq!(p.columns, vec!["id", "y"]);
        assert_eq!(spec.restrict(&[]), spec);
    }

    #[test]
    fn config_hash_wins_over_list() {
        let hash: BTreeMap<String, LabelEntry> =
            serde_json::from_str(r#"{"x": "X", "y": ["Y", "int32"]}"#).unwrap();
        let pars: Vec<ColumnEntry> = serde_json::from_str(r#"["z"]"#).unwrap();
        let spec = spec_from_config(&hash, &pars);
        let p = spec.projection();
        assert_eq!(p.columns, vec!["x", "y"]);
        assert_eq!(p.labels, vec!["X", "Y"]);
        assert_eq!(p.types, Some(vec![ScalarKind::Dynamic, ScalarKind::Int32]));
    }

    #[test]
    fn config_list_with_types_becomes_typed() {
        let pars: Vec<ColumnEntry> =
            serde_json::from_str(r#"[["id", "int64"], "x"]"#).unwrap();
        let spec = spec_from_config(&BTreeMap::new(), &pars);
        assert_eq!(
            spec,
            ColumnSpec::Typed(vec![
                ("id".into(), ScalarKind::Int64),
                ("x".into(), ScalarKind::Dynamic)
            ])
        );
    }

    fn distinct_names() -> impl Strategy<Value = Vec<String>> {
        proptest::collection::btree_set("[a-z]{1,8}", 0..12)
            .prop_map(|s| s.into_iter().collect::<Vec<_>>())
    }

    proptest! {
        #[test]
        fn every_shape_projects_a_permutation_of_its_columns(names in distinct_names()) {
            let shapes = vec![
                ColumnSpec::Names(names.clone()),
                ColumnSpec::Typed(names.iter().map(|n| (n.clone(), ScalarKind::String)).collect()),
                ColumnSpec::Labeled(names.iter().map(|n| (n.clone(), n.to_uppercase())).collect()),
                ColumnSpec::LabeledTyped(
                    names.iter().map(|n| (n.clone(), (n.clone(), ScalarKind::Int))).collect(),
                ),
            ];
            let mut expected = names.clone();
            expected.sort();
            for spec in shapes {
                let p = spec.projection();
                let mut got = p.columns.clone();
                got.sort();
                prop_assert_eq!(&got, &expected);
                prop_assert_eq!(p.labels.len(), p.columns.len());
                if let Some(types) = &p.types {
                    prop_assert_eq!(types.len(), p.columns.len());
                }
            }
        }
    }
}
