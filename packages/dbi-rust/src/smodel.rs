//! Tag-partitioned entity over a super table.

use std::path::Path;

use serde::Deserialize;
use taodbi_core::{key_predicate, ColumnSpec, TableDescriptor, Value};
use tracing::debug;

use crate::call::{Call, Reply};
use crate::dbi::Dbi;
use crate::error::{Error, Result};
use crate::model::{with_value, Model};

/// A [`Model`] whose table is a super table partitioned by `tags`.
///
/// Inserts route into per-tag child tables; reads go through the super
/// table and see every partition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct SuperModel {
    model: Model,
}

impl SuperModel {
    #[must_use]
    pub fn new(table: TableDescriptor) -> Self {
        Self {
            model: Model::new(table),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// The plain verbs.
    #[must_use]
    pub fn model(&self) -> &Model {
        &self.model
    }

    #[must_use]
    pub fn table(&self) -> &TableDescriptor {
        self.model.table()
    }

    /// Tag values from the first extra constraint, else args.
    fn tag_values(&self, call: &Call) -> Result<Vec<Value>> {
        self.table()
            .tags
            .iter()
            .map(|tag| call.value(tag).ok_or_else(|| Error::MissingTag(tag.clone())))
            .collect()
    }

    /// Latest row per tag group for the foreign-key value(s).
    ///
    /// Each row carries the configured topics columns plus the tag columns.
    pub fn last_topics(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let crud = self.model.crud();
        let table = self.table();
        let fk = crud.foreign_key()?;
        let ids = call.ids(fk).ok_or_else(|| Error::MissingValue("fk".into()))?;

        let mut projection = table.restricted(&table.topics_spec, &call.args).projection();
        if projection.is_empty() {
            projection = ColumnSpec::single(crud.key()).projection();
        }
        let predicate = key_predicate(fk, &ids, call.filter_without(fk).as_ref());
        let sql = format!(
            "SELECT {} FROM {}{} GROUP BY {}",
            projection.last_sql(),
            table.current_table,
            predicate.where_clause(),
            table.tags.join(",")
        );
        let rows = dbi.select_projected(&sql, &predicate.args, &projection)?;
        Ok(Reply::new(rows, call.args))
    }

    /// Latest row for the foreign-key value, with tag values from args
    /// added to the constraint unless already present.
    pub fn last_edit(&self, dbi: &Dbi, mut call: Call) -> Result<Reply> {
        let table = self.table();
        let mut filter = call.filter().cloned().unwrap_or_default();
        for tag in &table.tags {
            if !filter.contains(tag) {
                if let Some(v) = call.args.get(tag) {
                    filter.insert(tag, v.clone());
                }
            }
        }
        match call.extra.first_mut() {
            Some(first) => *first = filter,
            None => call.extra.push(filter),
        }
        self.model.edit_fk(dbi, call)
    }

    /// Lists the rows of the latest release: the largest value of the first
    /// tag. Empty when the table holds no rows.
    pub fn release_topics(&self, dbi: &Dbi, mut call: Call) -> Result<Reply> {
        let table = self.table();
        let rtag = table
            .tags
            .first()
            .ok_or_else(|| Error::MissingTag("release".into()))?;
        let sql = format!(
            "SELECT LAST({})\nFROM {}\nGROUP BY {rtag}\nORDER BY {rtag} DESC LIMIT 1",
            table.current_key, table.current_table
        );
        let Some(release) = dbi
            .get_one(&sql, &[], None)?
            .and_then(|mut row| row.remove(rtag))
        else {
            return Ok(Reply::new(Vec::new(), call.args));
        };
        debug!(table = %table.current_table, release = %release, "latest release");
        let filter = with_value(call.filter(), rtag, release);
        match call.extra.first_mut() {
            Some(first) => *first = filter,
            None => call.extra.push(filter),
        }
        self.model.topics(dbi, call)
    }

    /// Creates the child table for the call's tag values, if missing.
    pub fn create_table(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let (name, using) = self.model.crud().child_table(&self.tag_values(&call)?);
        dbi.do_sql(&format!("CREATE TABLE IF NOT EXISTS {name} {using}"), &[])?;
        Ok(Reply::new(Vec::new(), call.args))
    }

    /// Drops the child table for the call's tag values, if present.
    pub fn drop_table(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let (name, _) = self.model.crud().child_table(&self.tag_values(&call)?);
        dbi.do_sql(&format!("DROP TABLE IF EXISTS {name}"), &[])?;
        Ok(Reply::new(Vec::new(), call.args))
    }
}
