//! Single-table operations every entity kind is built from.
//!
//! Only `INSERT` and `SELECT` are ever issued. "Current" values are read with
//! `LAST(...)`, and inserting an existing key is how a row gets rewritten.

use serde::Deserialize;
use taodbi_core::{key_predicate, quote, Args, ColumnSpec, Filter, Projection, Row, TableDescriptor, Value};

use crate::call::int_value;
use crate::dbi::Dbi;
use crate::error::{Error, Result};

/// A [`TableDescriptor`] plus the statements it can run.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Crud {
    pub table: TableDescriptor,
}

fn select_list(projection: &Projection) -> String {
    if projection.is_empty() {
        "*".to_string()
    } else {
        projection.sql()
    }
}

/// Tag value as it appears in a physical table name: identifier characters
/// kept, everything else replaced with `_`.
fn name_part(value: &Value) -> String {
    value
        .to_string()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

impl Crud {
    #[must_use]
    pub fn new(table: TableDescriptor) -> Self {
        Self { table }
    }

    /// Key column name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.table.current_key
    }

    /// Foreign key column, or a configuration error naming it missing.
    pub fn foreign_key(&self) -> Result<&str> {
        self.table
            .foreign_key
            .as_deref()
            .ok_or_else(|| Error::MissingValue(format!("{} foreign key", self.table.current_table)))
    }

    /// Physical child table of this super table for `values`, one per tag,
    /// plus its `USING ... TAGS (...)` clause.
    pub(crate) fn child_table(&self, values: &[Value]) -> (String, String) {
        let t = &self.table.current_table;
        let mut name = t.clone();
        for v in values {
            name.push('_');
            name.push_str(&name_part(v));
        }
        let literals: Vec<String> = values.iter().map(|v| quote(v).to_string()).collect();
        (name, format!("USING {t} TAGS ({})", literals.join(",")))
    }

    /// Tag values taken out of `fields`, in tag order.
    pub(crate) fn take_tags(&self, fields: &mut Args) -> Result<Vec<Value>> {
        self.table
            .tags
            .iter()
            .map(|tag| {
                fields
                    .remove(tag)
                    .filter(Value::has_value)
                    .ok_or_else(|| Error::MissingTag(tag.clone()))
            })
            .collect()
    }

    /// Inserts one row and returns its key.
    ///
    /// Tag columns route the row into its per-tag child table, created on
    /// first use. A missing key is filled with the store clock. `fields`
    /// may be empty, which writes a key-only placeholder row.
    pub fn insert_hash(&self, dbi: &Dbi, mut fields: Args) -> Result<i64> {
        let key = self.key();
        let mut target = self.table.current_table.clone();
        let mut using = String::new();
        if !self.table.tags.is_empty() {
            let tags = self.take_tags(&mut fields)?;
            let (child, clause) = self.child_table(&tags);
            target = child;
            using = format!(" {clause}");
        }

        let supplied = fields.get(key).and_then(int_value);
        let mut columns = Vec::with_capacity(fields.len() + 1);
        let mut marks = Vec::with_capacity(fields.len() + 1);
        if !fields.contains_key(key) {
            columns.push(key.to_string());
            marks.push("now");
        }
        let mut values = Vec::with_capacity(fields.len());
        for (column, value) in fields {
            columns.push(column);
            marks.push("?");
            values.push(value);
        }
        let sql = format!(
            "INSERT INTO {target}{using} ({}) VALUES ({})",
            columns.join(", "),
            marks.join(",")
        );
        dbi.do_sql(&sql, &values)?;

        if let Some(id) = supplied {
            return Ok(id);
        }
        let labels = [key.to_string()];
        dbi.get_one(&format!("SELECT LAST({key}) FROM {target}"), &[], Some(&labels))?
            .and_then(|row| row.get(key).and_then(Value::as_i64))
            .ok_or_else(|| Error::MissingValue(key.to_string()))
    }

    /// Rows whose key is one of `ids`, optionally narrowed by `extra`.
    pub fn edit_hash(&self, dbi: &Dbi, spec: &ColumnSpec, ids: &[Value], extra: Option<&Filter>) -> Result<Vec<Row>> {
        let projection = spec.projection();
        let predicate = key_predicate(self.key(), ids, extra);
        let sql = format!(
            "SELECT {}\nFROM {}{}",
            select_list(&projection),
            self.table.current_table,
            predicate.where_clause()
        );
        dbi.select_projected(&sql, &predicate.args, &projection)
    }

    /// For each foreign-key value, the rows carrying the most recent key
    /// written for it. Results are concatenated in `ids` order; values with
    /// no rows contribute nothing.
    pub fn edit_hash_fk(&self, dbi: &Dbi, spec: &ColumnSpec, ids: &[Value], extra: Option<&Filter>) -> Result<Vec<Row>> {
        let fk = self.foreign_key()?;
        let key = self.key();
        let projection = spec.projection();
        let labels = [key.to_string()];
        let detail = format!(
            "SELECT {}\nFROM {}\nWHERE {key}=?",
            select_list(&projection),
            self.table.current_table
        );
        let mut rows = Vec::new();
        for id in ids {
            let predicate = key_predicate(fk, std::slice::from_ref(id), extra);
            let sql = format!(
                "SELECT LAST({key})\nFROM {}{}",
                self.table.current_table,
                predicate.where_clause()
            );
            let Some(ts) = dbi
                .get_one(&sql, &predicate.args, Some(&labels))?
                .and_then(|mut row| row.remove(key))
            else {
                continue;
            };
            rows.extend(dbi.select_projected(&detail, &[ts], &projection)?);
        }
        Ok(rows)
    }

    /// All rows matching `extra`, followed by `order` when non-empty.
    pub fn topics_hash(&self, dbi: &Dbi, spec: &ColumnSpec, order: &str, extra: Option<&Filter>) -> Result<Vec<Row>> {
        let projection = spec.projection();
        let predicate = extra.map(Filter::predicate).unwrap_or_default();
        let mut sql = format!(
            "SELECT {}\nFROM {}{}",
            select_list(&projection),
            self.table.current_table,
            predicate.where_clause()
        );
        if !order.is_empty() {
            sql.push('\n');
            sql.push_str(order);
        }
        dbi.select_projected(&sql, &predicate.args, &projection)
    }

    /// Number of rows matching `extra`.
    pub fn total_hash(&self, dbi: &Dbi, extra: Option<&Filter>) -> Result<u64> {
        let predicate = extra.map(Filter::predicate).unwrap_or_default();
        let sql = format!(
            "SELECT COUNT(*) FROM\n{}{}",
            self.table.current_table,
            predicate.where_clause()
        );
        let set = dbi.query(&sql, &predicate.args)?;
        Ok(set
            .rows
            .first()
            .and_then(|r| r.first())
            .and_then(Value::as_i64)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0))
    }

    /// Keys of the rows matching every `=` in `unique`.
    pub fn keys_matching(&self, dbi: &Dbi, unique: &Args) -> Result<Vec<Value>> {
        let key = self.key();
        let rows = self.topics_hash(dbi, &ColumnSpec::single(key), "", Some(&Filter::from_values(unique)))?;
        Ok(rows.into_iter().filter_map(|mut r| r.remove(key)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (Dbi, Crud) {
        let dbi = Dbi::memory();
        dbi.do_sql(
            "CREATE TABLE atesting (id timestamp, x binary(8), y binary(8), z binary(8))",
            &[],
        )
        .unwrap();
        (dbi, Crud::new(TableDescriptor::new("atesting", "id")))
    }

    fn fields(pairs: &[(&str, &str)]) -> Args {
        pairs.iter().map(|(k, v)| ((*k).to_string(), Value::from(*v))).collect()
    }

    #[test]
    fn insert_fills_key_and_edit_finds_it() {
        let (dbi, crud) = setup();
        let id = crud.insert_hash(&dbi, fields(&[("x", "a1234567"), ("y", "b1234567")])).unwrap();
        assert!(id > 0);
        let rows = crud
            .edit_hash(&dbi, &ColumnSpec::names(&["id", "x", "z"]), &[Value::Int(id)], None)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::Int(id));
        assert_eq!(rows[0]["x"], Value::from("a1234567"));
        assert!(!rows[0].contains_key("z"));
    }

    #[test]
    fn numeric_string_key_is_echoed() {
        let (dbi, crud) = setup();
        let mut f = fields(&[("x", "k1")]);
        f.insert("id".into(), Value::from("4242"));
        assert_eq!(crud.insert_hash(&dbi, f).unwrap(), 4242);
        crud.insert_hash(&dbi, fields(&[("x", "later")])).unwrap();
        let rows = crud
            .edit_hash(&dbi, &ColumnSpec::names(&["x"]), &[Value::Int(4242)], None)
            .unwrap();
        assert_eq!(rows[0]["x"], Value::from("k1"));
    }

    #[test]
    fn topics_and_total_share_the_filter() {
        let (dbi, crud) = setup();
        for (x, y) in [("a", "1"), ("b", "1"), ("c", "2")] {
            crud.insert_hash(&dbi, fields(&[("x", x), ("y", y)])).unwrap();
        }
        let filter = Filter::new().with("y", "1");
        let rows = crud
            .topics_hash(&dbi, &ColumnSpec::names(&["x"]), "ORDER BY id DESC", Some(&filter))
            .unwrap();
        let xs: Vec<&Value> = rows.iter().map(|r| &r["x"]).collect();
        assert_eq!(xs, vec![&Value::from("b"), &Value::from("a")]);
        assert_eq!(crud.total_hash(&dbi, Some(&filter)).unwrap(), 2);
        assert_eq!(crud.total_hash(&dbi, None).unwrap(), 3);
        assert_eq!(crud.total_hash(&dbi, Some(&Filter::new().with("y", "9"))).unwrap(), 0);
    }

    #[test]
    fn edit_by_foreign_key_takes_latest() {
        let dbi = Dbi::memory();
        dbi.do_sql("CREATE TABLE testing (tid timestamp, child binary(8), id bigint)", &[])
            .unwrap();
        let mut table = TableDescriptor::new("testing", "tid");
        table.foreign_key = Some("id".into());
        let crud = Crud::new(table);
        for (child, id) in [("john", 1), ("sam", 1), ("mary", 2)] {
            let mut f = fields(&[("child", child)]);
            f.insert("id".into(), Value::Int(id));
            crud.insert_hash(&dbi, f).unwrap();
        }
        let spec = ColumnSpec::names(&["child", "id"]);
        let rows = crud
            .edit_hash_fk(&dbi, &spec, &[Value::Int(2), Value::Int(7), Value::Int(1)], None)
            .unwrap();
        let children: Vec<&Value> = rows.iter().map(|r| &r["child"]).collect();
        assert_eq!(children, vec![&Value::from("mary"), &Value::from("sam")]);
    }

    #[test]
    fn tags_route_to_child_table() {
        let dbi = Dbi::memory();
        dbi.do_sql(
            "CREATE TABLE st (ts timestamp, x binary(8), pubid int) TAGS (location binary(8))",
            &[],
        )
        .unwrap();
        let mut table = TableDescriptor::new("st", "ts");
        table.tags = vec!["location".into()];
        let crud = Crud::new(table);

        let err = crud.insert_hash(&dbi, fields(&[("x", "aa1")])).unwrap_err();
        assert!(matches!(err, Error::MissingTag(ref t) if t == "location"));

        let id = crud
            .insert_hash(&dbi, fields(&[("x", "aa1"), ("location", "yyz")]))
            .unwrap();
        let rows = dbi
            .select("SELECT ts, x FROM st_yyz", &[], None, None)
            .unwrap();
        assert_eq!(rows[0]["ts"], Value::Int(id));
        assert_eq!(
            crud.child_table(&[Value::from("y y;z")]).0,
            "st_y_y_z"
        );
    }

    #[test]
    fn unique_lookup() {
        let (dbi, crud) = setup();
        let id = crud.insert_hash(&dbi, fields(&[("x", "u1"), ("y", "v1")])).unwrap();
        crud.insert_hash(&dbi, fields(&[("x", "u2"), ("y", "v1")])).unwrap();
        let keys = crud.keys_matching(&dbi, &fields(&[("x", "u1"), ("y", "v1")])).unwrap();
        assert_eq!(keys, vec![Value::Int(id)]);
        assert_eq!(crud.keys_matching(&dbi, &fields(&[("y", "v1")])).unwrap().len(), 2);
    }
}
