//! Mutable-record entity: the plain verbs re-expressed over a
//! main/profile/status triple.

use std::path::Path;

use serde::Deserialize;
use taodbi_core::{Args, Row, TableDescriptor, Value};
use tracing::debug;

use crate::call::{Call, Reply};
use crate::dbi::Dbi;
use crate::error::{Error, Result};
use crate::restful::Restful;

/// Page size used when the caller gives none.
pub const DEFAULT_ROWCOUNT: usize = 100;

/// A logical record table exposed through `topics`, `edit`, `insert`,
/// `insupd`, `update`, `delete` and `total`.
///
/// The main table's descriptor carries the entity's key, control names and
/// relation edges. Column lists come from the profile table.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RestModel {
    rest: Restful,
}

impl RestModel {
    #[must_use]
    pub fn new(rest: Restful) -> Self {
        Self { rest }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    #[must_use]
    pub fn rest(&self) -> &Restful {
        &self.rest
    }

    /// The main table's descriptor.
    #[must_use]
    pub fn table(&self) -> &TableDescriptor {
        &self.rest.main.table
    }

    fn key(&self) -> &str {
        self.rest.main.key()
    }

    fn ids(&self, call: &Call) -> Result<Vec<Value>> {
        call.ids(self.key())
            .ok_or_else(|| Error::MissingValue("pk".into()))
    }

    /// Profile insert columns plus any main-table unique column they lack.
    fn writable(&self) -> Vec<String> {
        let mut pars = self.rest.profile.table.insert_pars.clone();
        for par in &self.rest.main.table.insert_pars {
            if !pars.contains(par) {
                pars.push(par.clone());
            }
        }
        pars
    }

    /// Cursor-paged live records.
    ///
    /// `rowcount` defaults to [`DEFAULT_ROWCOUNT`]. Without a `passid` the
    /// walk starts at the first key, or at the last one when `sortreverse`
    /// is set.
    pub fn topics(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let controls = &self.table().controls;
        let rowcount = match call.int_arg(&controls.rowcount) {
            Some(n) => usize::try_from(n).map_err(|_| Error::MissingValue("rowcount".into()))?,
            None => DEFAULT_ROWCOUNT,
        };
        let reverse = call.flag(&controls.sortreverse);
        let passid = call
            .int_arg(&controls.passid)
            .unwrap_or(if reverse { i64::MAX } else { 0 });

        let profile = &self.rest.profile.table;
        let spec = profile.restricted(&profile.topics_spec, &call.args);
        let rows = self
            .rest
            .topics_rest(dbi, rowcount, reverse, passid, &spec, call.filter())?;
        debug!(table = %self.table().current_table, rows = rows.len(), passid, "rest topics");
        Ok(Reply::new(rows, call.args))
    }

    /// Current profile rows for the record ids in the call.
    pub fn edit(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let ids = self.ids(&call)?;
        let profile = &self.rest.profile.table;
        let spec = profile.restricted(&profile.edit_spec, &call.args);
        let rows = self
            .rest
            .profile
            .edit_hash_fk(dbi, &spec, &ids, call.filter_without(self.key()).as_ref())?;
        Ok(Reply::new(rows, call.args))
    }

    /// Creates a record. A dead record with the same unique values is
    /// resurrected; a live one is a conflict.
    pub fn insert(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let fields = call.field_values(&self.writable(), &self.table().controls);
        if fields.is_empty() {
            return Err(Error::NoData("insert"));
        }
        let id = self.rest.insert_rest(dbi, &fields)?;
        Ok(self.inserted(call.args, fields, id, false))
    }

    /// Creates the record or rewrites the one holding the same unique
    /// values, reviving it if dead. Shares the race of
    /// [`crate::Model::insupd`].
    pub fn insupd(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let fields = call.field_values(&self.writable(), &self.table().controls);
        if fields.is_empty() {
            return Err(Error::NoData("insupd"));
        }
        let (id, updated) = self.rest.insupd_rest(dbi, &fields)?;
        Ok(self.inserted(call.args, fields, id, updated))
    }

    /// Appends new profile rows for the record ids in the call.
    ///
    /// Columns named in the `empties` parameter are cleared. A call whose
    /// only field is the key changes nothing and echoes the key.
    pub fn update(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let ids = self.ids(&call)?;
        let controls = &self.table().controls;
        let mut fields = call.field_values(&self.rest.profile.table.insert_pars, controls);
        if fields.is_empty() {
            return Err(Error::NoData("update"));
        }
        let key = self.key().to_string();
        fields.remove(&key);
        if let Ok(fk) = self.rest.profile.foreign_key() {
            fields.remove(fk);
        }
        let empties = call
            .args
            .get(&controls.empties)
            .and_then(Value::to_string_list)
            .unwrap_or_default();

        if fields.is_empty() && empties.is_empty() {
            let rows = ids.into_iter().map(|id| Row::from([(key.clone(), id)])).collect();
            return Ok(Reply::new(rows, call.args));
        }

        self.rest.update_rest(
            dbi,
            &fields,
            &ids,
            &empties,
            call.filter_without(&key).as_ref(),
        )?;
        let rows = ids
            .into_iter()
            .map(|id| {
                let mut row = fields.clone();
                row.insert(key.clone(), id);
                row
            })
            .collect();
        Ok(Reply::new(rows, call.args))
    }

    /// Marks the record ids in the call dead. One row per record actually
    /// marked.
    pub fn delete(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let ids = self.ids(&call)?;
        let key = self.key().to_string();
        let deleted = self
            .rest
            .delete_rest(dbi, &ids, call.filter_without(&key).as_ref())?;
        let rows = deleted
            .into_iter()
            .map(|id| Row::from([(key.clone(), id)]))
            .collect();
        Ok(Reply::new(rows, call.args))
    }

    /// Range summary as a single row of `start`, `end`, `live` and `raw`.
    /// The live count also lands under `totalno` in the reply args.
    pub fn total(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let summary = self.rest.total_rest(dbi)?;
        let bound = |v: Option<i64>| v.map_or(Value::Null, Value::Int);
        let row = Row::from([
            ("start".to_string(), bound(summary.start)),
            ("end".to_string(), bound(summary.end)),
            ("live".to_string(), Value::from(summary.live)),
            ("raw".to_string(), Value::from(summary.raw)),
        ]);
        let mut args = call.args;
        args.insert(self.table().controls.totalno.clone(), Value::from(summary.live));
        Ok(Reply::new(vec![row], args))
    }

    fn inserted(&self, mut args: Args, mut row: Row, id: i64, updated: bool) -> Reply {
        let key = self.key().to_string();
        row.insert(key.clone(), Value::Int(id));
        args.insert(key, Value::Int(id));
        Reply {
            rows: vec![row],
            args,
            last_id: Some(id),
            updated,
        }
    }
}
