//! Shared fixtures for the end-to-end scenarios.

#![allow(dead_code)]

use taodbi::{Dbi, Model, RestModel, SuperModel};
use taodbi_core::{Args, Value};

pub const ATESTING: &str = r#"{
    "current_table": "atesting",
    "current_key": "id",
    "insert_pars": ["x", "y", "z"],
    "insupd_pars": ["x", "y"],
    "edit_pars": ["id", "x", "y", "z"],
    "topics_pars": ["id", "x", "y", "z"],
    "nextpages": {
        "topics": [{"model": "testing", "action": "topics", "relate_item": {"id": "id"}}]
    }
}"#;

pub const TESTING: &str = r#"{
    "current_table": "testing",
    "current_key": "tid",
    "insert_pars": ["child", "id"],
    "topics_pars": ["tid", "child", "id"]
}"#;

pub const ST: &str = r#"{
    "current_table": "st",
    "current_key": "ts",
    "foreign_key": "pubid",
    "tags": ["location"],
    "insert_pars": ["x", "pubid", "location"],
    "edit_pars": ["ts", "x", "pubid"],
    "topics_pars": ["ts", "x", "pubid"]
}"#;

pub const USERS: &str = r#"{
    "current_table": "users",
    "current_key": "id",
    "insert_pars": ["username"],
    "profile_table": {
        "current_table": "users_profile",
        "current_key": "ts",
        "foreign_key": "id",
        "insert_pars": ["id", "username", "firstname", "lastname"],
        "edit_pars": ["id", "username", "firstname", "lastname"],
        "topics_pars": ["id", "username", "firstname"]
    },
    "status_table": {
        "current_table": "users_status",
        "current_key": "ts",
        "foreign_key": "id",
        "insert_pars": ["id", "status"]
    }
}"#;

pub fn args(pairs: &[(&str, Value)]) -> Args {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}

pub fn exec(dbi: &Dbi, statements: &[&str]) {
    for sql in statements {
        dbi.do_sql(sql, &[]).unwrap();
    }
}

pub fn atesting(dbi: &Dbi) -> Model {
    exec(
        dbi,
        &["CREATE TABLE atesting (id timestamp, x binary(8), y binary(8), z binary(8))"],
    );
    Model::from_json(ATESTING).unwrap()
}

pub fn testing(dbi: &Dbi) -> Model {
    exec(
        dbi,
        &["CREATE TABLE testing (tid timestamp, child binary(8), id bigint)"],
    );
    Model::from_json(TESTING).unwrap()
}

pub fn st(dbi: &Dbi) -> SuperModel {
    exec(
        dbi,
        &["CREATE TABLE st (ts timestamp, x binary(8), pubid int) TAGS (location binary(8))"],
    );
    SuperModel::from_json(ST).unwrap()
}

pub fn users(dbi: &Dbi) -> RestModel {
    exec(
        dbi,
        &[
            "CREATE TABLE users (id timestamp, username binary(16))",
            "CREATE TABLE users_profile (ts timestamp, id bigint, username binary(16), firstname binary(16), lastname binary(16))",
            "CREATE TABLE users_status (ts timestamp, id bigint, status bool)",
        ],
    );
    RestModel::from_json(USERS).unwrap()
}
