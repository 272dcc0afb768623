//! Plain record-table entity.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use taodbi_core::{Args, Filter, Row, TableDescriptor, TotalForce, Value};
use tracing::{debug, warn};

use crate::call::{Call, Reply};
use crate::crud::Crud;
use crate::dbi::Dbi;
use crate::error::{Error, Result};

/// Characters that may never reach a spliced `ORDER BY` clause.
static UNSAFE_ORDER: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r#"[;'"]"#).ok());

/// One table exposed through the plain verbs: `topics`, `edit`, `editfk`,
/// `insert`, `insupd` and `total`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Model {
    crud: Crud,
}

impl Model {
    #[must_use]
    pub fn new(table: TableDescriptor) -> Self {
        Self {
            crud: Crud::new(table),
        }
    }

    /// Parses a JSON entity descriptor.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads and parses a JSON entity descriptor from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    #[must_use]
    pub fn table(&self) -> &TableDescriptor {
        &self.crud.table
    }

    #[must_use]
    pub fn crud(&self) -> &Crud {
        &self.crud
    }

    /// `ORDER BY <col> [DESC] [LIMIT n OFFSET m]` from the call's sort and
    /// pagination parameters.
    ///
    /// Returns the empty string, meaning no ordering, when the clause would
    /// contain a quote or statement terminator.
    #[must_use]
    pub fn order_string(&self, call: &Call) -> String {
        let controls = &self.table().controls;
        let column = call
            .args
            .get(&controls.sortby)
            .filter(|v| v.has_value())
            .map_or_else(|| self.crud.key().to_string(), Value::to_string);

        let mut order = format!("ORDER BY {column}");
        if call.flag(&controls.sortreverse) {
            order.push_str(" DESC");
        }
        if let Some(rowcount) = call.int_arg(&controls.rowcount) {
            let pageno = call.int_arg(&controls.pageno).unwrap_or(1);
            let offset = pageno.saturating_sub(1).max(0).saturating_mul(rowcount);
            order.push_str(&format!(" LIMIT {rowcount} OFFSET {offset}"));
        }

        match UNSAFE_ORDER.as_ref() {
            Some(re) if !re.is_match(&order) => order,
            _ => {
                warn!(order = %order, "rejected order clause");
                String::new()
            }
        }
    }

    /// The total row count this call should report, per the configured
    /// policy, or `None` when no count applies.
    fn total_for(&self, dbi: &Dbi, call: &Call) -> Result<Option<u64>> {
        let table = self.table();
        let controls = &table.controls;
        let supplied = call.args.get(&controls.totalno);
        let first_page = call.int_arg(&controls.pageno) == Some(1);
        if table.total_force == TotalForce::Never
            || !call.flag(&controls.rowcount)
            || (supplied.is_some() && !first_page)
        {
            return Ok(None);
        }
        let total = match (table.total_force, supplied) {
            (TotalForce::Absolute(n), _) => n,
            (TotalForce::Always, _) | (_, None) => self.crud.total_hash(dbi, call.filter())?,
            (_, Some(v)) => crate::call::int_value(v)
                .and_then(|n| u64::try_from(n).ok())
                .unwrap_or(0),
        };
        Ok(Some(total))
    }

    /// Lists rows matching the first extra constraint, sorted and paged by
    /// the call's control parameters. A computed total lands in the reply
    /// args under the `totalno` name.
    pub fn topics(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let table = self.table();
        let mut args = call.args.clone();
        if let Some(total) = self.total_for(dbi, &call)? {
            args.insert(table.controls.totalno.clone(), Value::from(total));
        }
        let spec = table.restricted(&table.topics_spec, &call.args);
        let rows = self
            .crud
            .topics_hash(dbi, &spec, &self.order_string(&call), call.filter())?;
        debug!(table = %table.current_table, rows = rows.len(), "topics");
        Ok(Reply::new(rows, args))
    }

    /// Rows by primary key: from the first extra constraint, else args.
    pub fn edit(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let key = self.crud.key();
        let ids = call.ids(key).ok_or_else(|| Error::MissingValue("pk".into()))?;
        let table = self.table();
        let spec = table.restricted(&table.edit_spec, &call.args);
        let rows = self
            .crud
            .edit_hash(dbi, &spec, &ids, call.filter_without(key).as_ref())?;
        Ok(Reply::new(rows, call.args))
    }

    /// The latest row for each foreign-key value.
    pub fn edit_fk(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let fk = self.crud.foreign_key()?;
        let ids = call.ids(fk).ok_or_else(|| Error::MissingValue("fk".into()))?;
        let table = self.table();
        let spec = table.restricted(&table.edit_spec, &call.args);
        let rows = self
            .crud
            .edit_hash_fk(dbi, &spec, &ids, call.filter_without(fk).as_ref())?;
        Ok(Reply::new(rows, call.args))
    }

    /// Inserts the call's `insert_pars` values. The new key is added to the
    /// returned row and to the reply args.
    pub fn insert(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let table = self.table();
        let fields = call.field_values(&table.insert_pars, &table.controls);
        if fields.is_empty() {
            return Err(Error::NoData("insert"));
        }
        let id = self.crud.insert_hash(dbi, fields.clone())?;
        Ok(self.inserted(call.args, fields, id, false))
    }

    /// Insert-or-fetch on the `insupd_pars` columns.
    ///
    /// One match rewrites that row under its existing key and sets
    /// `updated`; none inserts a new row; more than one is a uniqueness
    /// error. The lookup and the write are separate statements, so two
    /// concurrent calls with the same values can both insert.
    pub fn insupd(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let table = self.table();
        let unique = call.field_values(&table.insupd_pars, &table.controls);
        if unique.is_empty() {
            return Err(Error::MissingValue("unique".into()));
        }
        let found = self.crud.keys_matching(dbi, &unique)?;
        if found.len() > 1 {
            return Err(Error::Uniqueness {
                table: table.current_table.clone(),
            });
        }
        let mut fields = call.field_values(&table.insert_pars, &table.controls);
        let updated = found.len() == 1;
        if let Some(key) = found.into_iter().next() {
            fields.insert(table.current_key.clone(), key);
        }
        let id = self.crud.insert_hash(dbi, fields.clone())?;
        Ok(self.inserted(call.args, fields, id, updated))
    }

    /// Row count under the first extra constraint, reported both as a row
    /// and under `totalno` in the reply args.
    pub fn total(&self, dbi: &Dbi, call: Call) -> Result<Reply> {
        let totalno = self.table().controls.totalno.clone();
        let n = Value::from(self.crud.total_hash(dbi, call.filter())?);
        let mut args = call.args;
        args.insert(totalno.clone(), n.clone());
        Ok(Reply::new(vec![Row::from([(totalno, n)])], args))
    }

    fn inserted(&self, mut args: Args, mut row: Row, id: i64, updated: bool) -> Reply {
        let key = self.crud.key().to_string();
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

/// Filter helper shared by the entity kinds: `base` with `field = value`.
pub(crate) fn with_value(base: Option<&Filter>, field: &str, value: Value) -> Filter {
    let mut filter = base.cloned().unwrap_or_default();
    filter.insert(field, value);
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATESTING: &str = r#"{
        "current_table": "atesting",
        "current_key": "id",
        "insert_pars": ["x", "y", "z"],
        "insupd_pars": ["x", "y"],
        "edit_pars": ["id", "x", "y", "z"],
        "topics_pars": ["id", "x", "y", "z"],
        "total_force": -1
    }"#;

    fn setup() -> (Dbi, Model) {
        let dbi = Dbi::memory();
        dbi.do_sql(
            "CREATE TABLE atesting (id timestamp, x binary(8), y binary(8), z binary(8))",
            &[],
        )
        .unwrap();
        (dbi, Model::from_json(ATESTING).unwrap())
    }

    fn call(pairs: &[(&str, Value)]) -> Call {
        Call::new(pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect())
    }

    #[test]
    fn order_string_pages() {
        let (_, model) = setup();
        let c = call(&[
            ("rowcount", Value::Int(20)),
            ("pageno", Value::Int(5)),
            ("sortreverse", Value::Bool(true)),
        ]);
        assert_eq!(model.order_string(&c), "ORDER BY id DESC LIMIT 20 OFFSET 80");
        assert_eq!(model.order_string(&call(&[])), "ORDER BY id");
        let c = call(&[("sortby", Value::from("x")), ("rowcount", Value::Int(10))]);
        assert_eq!(model.order_string(&c), "ORDER BY x LIMIT 10 OFFSET 0");
    }

    #[test]
    fn order_string_rejects_quotes() {
        let (_, model) = setup();
        assert_eq!(model.order_string(&call(&[("sortby", Value::from("x;drop"))])), "");
        assert_eq!(model.order_string(&call(&[("sortby", Value::from("x'"))])), "");
    }

    #[test]
    fn insert_then_edit() {
        let (dbi, model) = setup();
        let reply = model
            .insert(&dbi, call(&[("x", "a1234567".into()), ("y", "b1234567".into())]))
            .unwrap();
        let id = reply.last_id.unwrap();
        assert_eq!(reply.args["id"], Value::Int(id));
        assert_eq!(reply.rows[0]["id"], Value::Int(id));

        let reply = model.edit(&dbi, call(&[("id", Value::Int(id))])).unwrap();
        assert_eq!(reply.rows.len(), 1);
        assert_eq!(reply.rows[0]["y"], Value::from("b1234567"));

        assert!(matches!(model.edit(&dbi, call(&[])), Err(Error::MissingValue(_))));
        assert!(matches!(model.insert(&dbi, call(&[])), Err(Error::NoData("insert"))));
    }

    #[test]
    fn insupd_twice_reuses_key() {
        let (dbi, model) = setup();
        let first = model
            .insupd(&dbi, call(&[("x", "a".into()), ("y", "b".into()), ("z", "1".into())]))
            .unwrap();
        assert!(!first.updated);
        let second = model
            .insupd(&dbi, call(&[("x", "a".into()), ("y", "b".into()), ("z", "2".into())]))
            .unwrap();
        assert!(second.updated);
        assert_eq!(first.last_id, second.last_id);

        let reply = model.topics(&dbi, call(&[])).unwrap();
        assert_eq!(reply.rows.len(), 1);
        assert_eq!(reply.rows[0]["z"], Value::from("2"));
    }

    #[test]
    fn insupd_rejects_ambiguous_unique_values() {
        let (dbi, model) = setup();
        for _ in 0..2 {
            model
                .insert(&dbi, call(&[("x", "dup".into()), ("y", "dup".into())]))
                .unwrap();
        }
        let err = model
            .insupd(&dbi, call(&[("x", "dup".into()), ("y", "dup".into())]))
            .unwrap_err();
        assert!(matches!(err, Error::Uniqueness { .. }));
    }

    #[test]
    fn topics_reports_total() {
        let (dbi, model) = setup();
        for i in 0..5 {
            model.insert(&dbi, call(&[("x", Value::from(format!("r{i}")))])).unwrap();
        }
        let reply = model
            .topics(&dbi, call(&[("rowcount", Value::Int(2)), ("pageno", Value::Int(2))]))
            .unwrap();
        assert_eq!(reply.rows.len(), 2);
        assert_eq!(reply.rows[0]["x"], Value::from("r2"));
        assert_eq!(reply.args["totalno"], Value::UInt(5));

        let reply = model
            .topics(&dbi, call(&[("fields", Value::from(vec!["x"]))]))
            .unwrap();
        assert_eq!(reply.rows.len(), 5);
        assert_eq!(reply.rows[0].len(), 1);
        assert!(!reply.args.contains_key("totalno"));
    }

    #[test]
    fn total_policy() {
        let (dbi, mut model) = setup();
        model.insert(&dbi, call(&[("x", "a".into())])).unwrap();
        let paged = |pageno: i64, totalno: Option<i64>| {
            let mut c = call(&[("rowcount", Value::Int(10)), ("pageno", Value::Int(pageno))]);
            if let Some(t) = totalno {
                c.args.insert("totalno".into(), Value::Int(t));
            }
            c
        };

        model.crud.table.total_force = TotalForce::UnlessSupplied;
        assert_eq!(model.total_for(&dbi, &paged(1, None)).unwrap(), Some(1));
        assert_eq!(model.total_for(&dbi, &paged(1, Some(100))).unwrap(), Some(100));
        assert_eq!(model.total_for(&dbi, &paged(2, Some(100))).unwrap(), None);

        model.crud.table.total_force = TotalForce::Absolute(42);
        assert_eq!(model.total_for(&dbi, &paged(1, Some(100))).unwrap(), Some(42));

        model.crud.table.total_force = TotalForce::Never;
        assert_eq!(model.total_for(&dbi, &paged(1, None)).unwrap(), None);

        let reply = model.total(&dbi, call(&[])).unwrap();
        assert_eq!(reply.rows[0]["totalno"], Value::UInt(1));
    }
}
