//! Mutable records over insert-only tables.
//!
//! A logical record spans three tables:
//!
//! * **main** holds one row per record; its key is the record id. Its
//!   `insert_pars` are the record's unique columns.
//! * **profile** holds the record's fields. Every update appends a row; the
//!   current fields are in the row with the latest key for the record's id.
//! * **status** holds a liveness flag. Delete appends `false`, create and
//!   resurrect append `true`; the latest flag wins.
//!
//! None of these writes are transactional. A failure between statements
//! leaves the earlier ones in place.

use std::path::Path;

use serde::Deserialize;
use taodbi_core::{Args, ColumnSpec, Filter, Row, TableDescriptor, Value, TRUSTED_SUFFIX};
use tracing::{debug, warn};

use crate::crud::Crud;
use crate::dbi::Dbi;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct RestfulConfig {
    #[serde(flatten)]
    main: TableDescriptor,
    profile_table: TableDescriptor,
    status_table: TableDescriptor,
}

/// The main/profile/status triple.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RestfulConfig")]
pub struct Restful {
    pub main: Crud,
    pub profile: Crud,
    pub status: Crud,
}

impl From<RestfulConfig> for Restful {
    fn from(raw: RestfulConfig) -> Self {
        Self {
            main: Crud::new(raw.main),
            profile: Crud::new(raw.profile_table),
            status: Crud::new(raw.status_table),
        }
    }
}

/// Liveness statistics over the main table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RangeSummary {
    /// First live key, in key order.
    pub start: Option<i64>,
    /// Last key seen, live or not.
    pub end: Option<i64>,
    /// Live records.
    pub live: u64,
    /// All records.
    pub raw: u64,
}

impl Restful {
    #[must_use]
    pub fn new(main: TableDescriptor, profile: TableDescriptor, status: TableDescriptor) -> Self {
        Self {
            main: Crud::new(main),
            profile: Crud::new(profile),
            status: Crud::new(status),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    fn status_column(&self) -> Result<&str> {
        self.status
            .table
            .status_column()
            .ok_or_else(|| Error::MissingValue(format!("{} status column", self.status.table.current_table)))
    }

    /// Whether record `id` is live. A record with no status rows is not.
    pub fn is_live(&self, dbi: &Dbi, id: &Value) -> Result<bool> {
        let column = self.status_column()?;
        let fk = self.status.foreign_key()?;
        let sql = format!(
            "SELECT LAST({column}) FROM {} WHERE {fk}=?",
            self.status.table.current_table
        );
        let labels = [column.to_string()];
        Ok(dbi
            .get_one(&sql, std::slice::from_ref(id), Some(&labels))?
            .and_then(|row| row.get(column).and_then(Value::as_bool))
            .unwrap_or(false))
    }

    /// Appends a status row for `id`.
    pub fn mark(&self, dbi: &Dbi, id: &Value, live: bool) -> Result<()> {
        let column = self.status_column()?;
        let fk = self.status.foreign_key()?;
        let sql = format!(
            "INSERT INTO {} ({}, {fk}, {column}) VALUES (now, ?, {live})",
            self.status.table.current_table,
            self.status.key()
        );
        dbi.do_sql(&sql, std::slice::from_ref(id))?;
        Ok(())
    }

    /// The main table's unique columns, all required in `fields`.
    fn unique_values(&self, fields: &Args) -> Result<Args> {
        self.main
            .table
            .insert_pars
            .iter()
            .map(|k| match fields.get(k) {
                Some(v) if v.has_value() => Ok((k.clone(), v.clone())),
                _ => Err(Error::MissingValue(k.clone())),
            })
            .collect()
    }

    /// The key of the record holding `unique`, if one exists.
    fn find(&self, dbi: &Dbi, unique: &Args) -> Result<Option<Value>> {
        let mut found = self.main.keys_matching(dbi, unique)?;
        if found.len() > 1 {
            return Err(Error::Uniqueness {
                table: self.main.table.current_table.clone(),
            });
        }
        Ok(found.pop())
    }

    fn insert_profile(&self, dbi: &Dbi, fields: &Args, id: &Value) -> Result<()> {
        let fk = self.profile.foreign_key()?;
        let mut row: Args = self
            .profile
            .table
            .insert_pars
            .iter()
            .filter_map(|k| fields.get(k).map(|v| (k.clone(), v.clone())))
            .collect();
        row.insert(fk.to_string(), id.clone());
        self.profile.insert_hash(dbi, row)?;
        Ok(())
    }

    /// Creates a record and returns its id.
    ///
    /// With unique columns configured, an existing live record is a
    /// conflict and an existing dead one is resurrected under its old id.
    /// Without them a key-only placeholder main row is written.
    pub fn insert_rest(&self, dbi: &Dbi, fields: &Args) -> Result<i64> {
        let id = if self.main.table.insert_pars.is_empty() {
            Value::Int(self.main.insert_hash(dbi, Args::new())?)
        } else {
            let unique = self.unique_values(fields)?;
            match self.find(dbi, &unique)? {
                Some(id) if self.is_live(dbi, &id)? => {
                    return Err(Error::Conflict {
                        table: self.main.table.current_table.clone(),
                    })
                }
                Some(id) => {
                    debug!(id = %id, "resurrecting record");
                    id
                }
                None => Value::Int(self.main.insert_hash(dbi, unique)?),
            }
        };
        self.insert_profile(dbi, fields, &id)?;
        self.mark(dbi, &id, true)?;
        id.as_i64().ok_or_else(|| Error::MissingValue(self.main.key().to_string()))
    }

    /// Appends a new profile row for every record in `ids`.
    ///
    /// Each column takes its value from `fields`, is dropped when listed in
    /// `empties`, or else keeps the record's current value. Returns the
    /// number of records rewritten.
    pub fn update_rest(
        &self,
        dbi: &Dbi,
        fields: &Args,
        ids: &[Value],
        empties: &[String],
        extra: Option<&Filter>,
    ) -> Result<usize> {
        let fk = self.profile.foreign_key()?;
        let mut columns = self.profile.table.insert_pars.clone();
        if !columns.iter().any(|c| c == fk) {
            columns.push(fk.to_string());
        }
        let current = self.profile.edit_hash_fk(dbi, &ColumnSpec::Names(columns.clone()), ids, extra)?;
        if current.is_empty() {
            warn!(table = %self.profile.table.current_table, "update matched no records");
        }
        for item in &current {
            let mut row = Args::new();
            for k in &columns {
                if let Some(v) = fields.get(k) {
                    row.insert(k.clone(), v.clone());
                } else if empties.contains(k) {
                    continue;
                } else if let Some(v) = item.get(k) {
                    row.insert(k.clone(), v.clone());
                }
            }
            if let Some(id) = item.get(fk) {
                row.insert(fk.to_string(), id.clone());
            }
            self.profile.insert_hash(dbi, row)?;
        }
        Ok(current.len())
    }

    /// Marks every record in `ids` dead and returns their ids.
    pub fn delete_rest(&self, dbi: &Dbi, ids: &[Value], extra: Option<&Filter>) -> Result<Vec<Value>> {
        let fk = self.profile.foreign_key()?;
        let rows = self.profile.edit_hash_fk(dbi, &ColumnSpec::single(fk), ids, extra)?;
        let mut deleted = Vec::with_capacity(rows.len());
        for mut row in rows {
            if let Some(id) = row.remove(fk) {
                self.mark(dbi, &id, false)?;
                deleted.push(id);
            }
        }
        if deleted.is_empty() {
            warn!(table = %self.main.table.current_table, "delete matched no records");
        }
        Ok(deleted)
    }

    /// Updates the record holding the unique values, reviving it if dead,
    /// or creates it. Returns the id and whether it already existed.
    ///
    /// Unlike [`Restful::update_rest`], columns absent from `fields` are not
    /// carried over from the previous profile row.
    pub fn insupd_rest(&self, dbi: &Dbi, fields: &Args) -> Result<(i64, bool)> {
        let unique = self.unique_values(fields)?;
        let Some(id) = self.find(dbi, &unique)? else {
            return Ok((self.insert_rest(dbi, fields)?, false));
        };
        if !self.is_live(dbi, &id)? {
            self.mark(dbi, &id, true)?;
        }
        self.insert_profile(dbi, fields, &id)?;
        let id = id.as_i64().ok_or_else(|| Error::MissingValue(self.main.key().to_string()))?;
        Ok((id, true))
    }

    /// Up to `rowcount` main keys strictly after (or, reversed, before)
    /// `passid`, in key order.
    fn page_keys(&self, dbi: &Dbi, passid: i64, rowcount: usize, reverse: bool) -> Result<Vec<Value>> {
        let key = self.main.key();
        let (op, dir) = if reverse { ('<', " DESC") } else { ('>', "") };
        let mut bound = Filter::new();
        bound.trusted(TRUSTED_SUFFIX, format!("{key}{op}{passid}"));
        let order = format!("ORDER BY {key}{dir} LIMIT {rowcount}");
        let rows = self.main.topics_hash(dbi, &ColumnSpec::single(key), &order, Some(&bound))?;
        Ok(rows.into_iter().filter_map(|mut r| r.remove(key)).collect())
    }

    /// Cursor pagination over live records.
    ///
    /// Walks main keys in batches of `rowcount` from `passid`, keeps the live
    /// ones and collects their current profile rows until `rowcount` rows are
    /// found or every main row has been visited.
    pub fn topics_rest(
        &self,
        dbi: &Dbi,
        rowcount: usize,
        reverse: bool,
        passid: i64,
        spec: &ColumnSpec,
        extra: Option<&Filter>,
    ) -> Result<Vec<Row>> {
        if rowcount < 1 {
            return Err(Error::MissingValue("rowcount".into()));
        }
        let table_rows = self.main.total_hash(dbi, None)?;
        let mut cursor = passid;
        let mut visited = 0u64;
        let mut out = Vec::new();
        loop {
            let ids = self.page_keys(dbi, cursor, rowcount, reverse)?;
            let Some(last) = ids.last().and_then(Value::as_i64) else {
                break;
            };
            cursor = last;
            visited += u64::try_from(ids.len()).unwrap_or(u64::MAX);

            let mut live = Vec::with_capacity(ids.len());
            for id in ids {
                if self.is_live(dbi, &id)? {
                    live.push(id);
                }
            }
            if !live.is_empty() {
                for row in self.profile.edit_hash_fk(dbi, spec, &live, extra)? {
                    out.push(row);
                    if out.len() >= rowcount {
                        return Ok(out);
                    }
                }
            }
            if visited >= table_rows {
                break;
            }
        }
        Ok(out)
    }

    /// One pass over every main key, classifying each as live or dead.
    pub fn total_rest(&self, dbi: &Dbi) -> Result<RangeSummary> {
        let key = self.main.key();
        let rows = self.main.topics_hash(dbi, &ColumnSpec::single(key), &format!("ORDER BY {key}"), None)?;
        let mut summary = RangeSummary::default();
        for mut row in rows {
            let Some(id) = row.remove(key) else { continue };
            summary.raw += 1;
            summary.end = id.as_i64();
            if self.is_live(dbi, &id)? {
                summary.live += 1;
                if summary.start.is_none() {
                    summary.start = id.as_i64();
                }
            }
        }
        Ok(summary)
    }
}
