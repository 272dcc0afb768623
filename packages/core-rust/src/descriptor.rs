//! Static entity configuration.
//!
//! A [`TableDescriptor`] is loaded once from JSON and never mutated. Column
//! specifications are normalized into [`ColumnSpec`]s at load time, so verbs
//! never re-inspect the raw configuration shapes.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::columns::{spec_from_config, ColumnEntry, ColumnSpec, LabelEntry};
use crate::predicate::Filter;
use crate::types::{Args, Row};

// ---------------------------------------------------------------------------
// Total-count policy
// ---------------------------------------------------------------------------

/// How a list verb computes the total row count for pagination.
///
/// Configured as an integer: `0` never, `-1` always, anything below `-1` a
/// fixed absolute count, anything else (or absent) counts only when the
/// caller did not supply a total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum TotalForce {
    Never,
    Always,
    Absolute(u64),
    #[default]
    UnlessSupplied,
}

impl From<i64> for TotalForce {
    fn from(v: i64) -> Self {
        match v {
            0 => Self::Never,
            -1 => Self::Always,
            n if n < -1 => Self::Absolute(n.unsigned_abs()),
            _ => Self::UnlessSupplied,
        }
    }
}

// ---------------------------------------------------------------------------
// Control parameter names
// ---------------------------------------------------------------------------

fn rowcount() -> String {
    "rowcount".into()
}
fn pageno() -> String {
    "pageno".into()
}
fn totalno() -> String {
    "totalno".into()
}
fn sortby() -> String {
    "sortby".into()
}
fn sortreverse() -> String {
    "sortreverse".into()
}
fn passid() -> String {
    "passid".into()
}
fn fields() -> String {
    "fields".into()
}
fn empties() -> String {
    "empties".into()
}

/// Names under which pagination, sort and filter controls arrive in caller
/// input. Each defaults to its own field name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControlNames {
    #[serde(default = "rowcount", alias = "rawcount")]
    pub rowcount: String,
    #[serde(default = "pageno")]
    pub pageno: String,
    #[serde(default = "totalno")]
    pub totalno: String,
    #[serde(default = "sortby")]
    pub sortby: String,
    #[serde(default = "sortreverse")]
    pub sortreverse: String,
    #[serde(default = "passid")]
    pub passid: String,
    #[serde(default = "fields")]
    pub fields: String,
    #[serde(default = "empties")]
    pub empties: String,
}

impl Default for ControlNames {
    fn default() -> Self {
        Self {
            rowcount: rowcount(),
            pageno: pageno(),
            totalno: totalno(),
            sortby: sortby(),
            sortreverse: sortreverse(),
            passid: passid(),
            fields: fields(),
            empties: empties(),
        }
    }
}

impl ControlNames {
    /// Keys stripped from args before they are handed to child actions.
    #[must_use]
    pub fn pagination_keys(&self) -> [&str; 6] {
        [
            self.sortby.as_str(),
            self.totalno.as_str(),
            self.pageno.as_str(),
            self.sortreverse.as_str(),
            self.rowcount.as_str(),
            self.passid.as_str(),
        ]
    }
}

// ---------------------------------------------------------------------------
// Relation edges
// ---------------------------------------------------------------------------

/// A "next page": run `action` on `model` after the parent action.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Page {
    pub model: String,
    pub action: String,
    /// Fixed constraints added to every child call.
    #[serde(default)]
    pub manual: Args,
    /// Parent column -> child parameter. Empty means the edge fires once per
    /// parent call and lands in the side channel.
    #[serde(default)]
    pub relate_item: BTreeMap<String, String>,
    /// Result key override; defaults to `model_action`.
    #[serde(default)]
    pub alias: Option<String>,
    /// Skip parent rows that already carry the result key.
    #[serde(default)]
    pub ignore: bool,
}

impl Page {
    /// The key child rows are attached under.
    #[must_use]
    pub fn result_key(&self) -> String {
        self.alias
            .clone()
            .unwrap_or_else(|| format!("{}_{}", self.model, self.action))
    }

    #[must_use]
    pub fn is_correlated(&self) -> bool {
        !self.relate_item.is_empty()
    }

    /// The fixed overlay as a filter. `_gsql` entries are trusted here since
    /// they come from static configuration.
    #[must_use]
    pub fn manual_filter(&self) -> Filter {
        Filter::from_config(&self.manual)
    }

    /// Per-row constraint from the correlation map, or `None` if the row
    /// carries none of the correlated columns.
    #[must_use]
    pub fn correlate(&self, row: &Row) -> Option<Filter> {
        let mut filter = Filter::new();
        for (parent, child) in &self.relate_item {
            if let Some(v) = row.get(parent) {
                filter.insert(child, v.clone());
            }
        }
        (!filter.is_empty()).then_some(filter)
    }
}

// ---------------------------------------------------------------------------
// Table descriptor
// ---------------------------------------------------------------------------

/// Raw JSON form of a [`TableDescriptor`].
#[derive(Debug, Deserialize)]
struct TableConfig {
    current_table: String,
    current_key: String,
    #[serde(default)]
    foreign_key: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    current_id_auto: Option<String>,
    #[serde(default)]
    insert_pars: Vec<String>,
    #[serde(default)]
    insupd_pars: Vec<String>,
    #[serde(default)]
    edit_pars: Vec<ColumnEntry>,
    #[serde(default)]
    edit_hash: BTreeMap<String, LabelEntry>,
    #[serde(default)]
    topics_pars: Vec<ColumnEntry>,
    #[serde(default)]
    topics_hash: BTreeMap<String, LabelEntry>,
    #[serde(default)]
    total_force: TotalForce,
    #[serde(default)]
    nextpages: BTreeMap<String, Vec<Page>>,
    #[serde(default)]
    actions: Vec<String>,
    #[serde(flatten)]
    controls: ControlNames,
}

/// One physical table as the CRUD layer sees it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "TableConfig")]
pub struct TableDescriptor {
    pub current_table: String,
    /// Primary key column; the store's timestamp key.
    pub current_key: String,
    pub foreign_key: Option<String>,
    /// Partition columns. Non-empty makes `current_table` a super table.
    pub tags: Vec<String>,
    pub current_id_auto: Option<String>,
    pub insert_pars: Vec<String>,
    /// Columns that identify a row for insert-or-fetch.
    pub insupd_pars: Vec<String>,
    pub edit_spec: ColumnSpec,
    pub topics_spec: ColumnSpec,
    pub total_force: TotalForce,
    pub nextpages: BTreeMap<String, Vec<Page>>,
    /// Exposed verb names; empty exposes every verb of the entity kind.
    pub actions: Vec<String>,
    pub controls: ControlNames,
}

impl From<TableConfig> for TableDescriptor {
    fn from(raw: TableConfig) -> Self {
        Self {
            edit_spec: spec_from_config(&raw.edit_hash, &raw.edit_pars),
            topics_spec: spec_from_config(&raw.topics_hash, &raw.topics_pars),
            current_table: raw.current_table,
            current_key: raw.current_key,
            foreign_key: raw.foreign_key,
            tags: raw.tags,
            current_id_auto: raw.current_id_auto,
            insert_pars: raw.insert_pars,
            insupd_pars: raw.insupd_pars,
            total_force: raw.total_force,
            nextpages: raw.nextpages,
            actions: raw.actions,
            controls: raw.controls,
        }
    }
}

impl TableDescriptor {
    /// A descriptor with only table and key set.
    #[must_use]
    pub fn new(table: &str, key: &str) -> Self {
        Self {
            current_table: table.to_string(),
            current_key: key.to_string(),
            foreign_key: None,
            tags: Vec::new(),
            current_id_auto: None,
            insert_pars: Vec::new(),
            insupd_pars: Vec::new(),
            edit_spec: ColumnSpec::default(),
            topics_spec: ColumnSpec::default(),
            total_force: TotalForce::default(),
            nextpages: BTreeMap::new(),
            actions: Vec::new(),
            controls: ControlNames::default(),
        }
    }

    /// Liveness column of a status table: the first insertable column that
    /// is not the foreign key.
    #[must_use]
    pub fn status_column(&self) -> Option<&str> {
        self.insert_pars
            .iter()
            .find(|c| Some(c.as_str()) != self.foreign_key.as_deref())
            .map(String::as_str)
    }

    /// Edges configured for `action`.
    #[must_use]
    pub fn next_pages(&self, action: &str) -> &[Page] {
        self.nextpages.get(action).map_or(&[], Vec::as_slice)
    }

    /// Whether `action` is exposed under the `actions` allow-list.
    #[must_use]
    pub fn exposes(&self, action: &str) -> bool {
        self.actions.is_empty() || self.actions.iter().any(|a| a == action)
    }

    /// `columns` narrowed to the caller's `fields` allow-list, if present.
    #[must_use]
    pub fn allowed<'a>(&self, columns: &'a [String], args: &Args) -> Vec<&'a String> {
        match args.get(&self.controls.fields).and_then(|v| v.to_string_list()) {
            Some(fields) => columns.iter().filter(|c| fields.contains(c)).collect(),
            None => columns.iter().collect(),
        }
    }

    /// A column spec narrowed to the caller's `fields` allow-list, if present.
    #[must_use]
    pub fn restricted(&self, spec: &ColumnSpec, args: &Args) -> ColumnSpec {
        match args.get(&self.controls.fields).and_then(|v| v.to_string_list()) {
            Some(fields) => spec.restrict(&fields),
            None => spec.clone(),
        }
    }
}
