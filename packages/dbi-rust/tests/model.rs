mod common;

use std::io::Write;

use common::{args, atesting};
use taodbi::{Call, Dbi, Error, ErrorCategory, Model};
use taodbi_core::{Filter, Value};

#[test]
fn insert_without_key_is_retrievable_by_key() {
    let dbi = Dbi::memory();
    let model = atesting(&dbi);
    let reply = model
        .insert(&dbi, Call::new(args(&[("x", "a1234567".into()), ("y", "b1234567".into())])))
        .unwrap();
    let id = reply.last_id.unwrap();
    assert_eq!(reply.rows[0]["id"], Value::Int(id));

    let rows = model
        .edit(&dbi, Call::new(args(&[("id", Value::Int(id))])))
        .unwrap()
        .rows;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], Value::Int(id));
    assert_eq!(rows[0]["x"], Value::from("a1234567"));
    assert!(!rows[0].contains_key("z"));
}

#[test]
fn insupd_second_call_is_an_update() {
    let dbi = Dbi::memory();
    let model = atesting(&dbi);
    let values = args(&[("x", "c1234567".into()), ("y", "d1234567".into()), ("z", "e1234".into())]);
    let first = model.insupd(&dbi, Call::new(values.clone())).unwrap();
    let second = model.insupd(&dbi, Call::new(values)).unwrap();
    assert!(!first.updated);
    assert!(second.updated);
    assert_eq!(first.last_id, second.last_id);
}

#[test]
fn edit_with_list_and_extra_constraint() {
    let dbi = Dbi::memory();
    let model = atesting(&dbi);
    let mut ids = Vec::new();
    for (x, z) in [("a", "keep"), ("b", "drop"), ("c", "keep")] {
        let reply = model
            .insert(&dbi, Call::new(args(&[("x", x.into()), ("z", z.into())])))
            .unwrap();
        ids.push(Value::Int(reply.last_id.unwrap()));
    }
    let call = Call::new(args(&[("id", Value::Array(ids.clone()))]));
    assert_eq!(model.edit(&dbi, call).unwrap().rows.len(), 3);

    let call = Call::new(args(&[])).with_extra(
        Filter::new()
            .with("id", Value::Array(ids))
            .with("z", "keep"),
    );
    let rows = model.edit(&dbi, call).unwrap().rows;
    let xs: Vec<&Value> = rows.iter().map(|r| &r["x"]).collect();
    assert_eq!(xs, vec![&Value::from("a"), &Value::from("c")]);

    let none = Call::new(args(&[("id", Value::Int(1))]));
    assert!(model.edit(&dbi, none).unwrap().rows.is_empty());
}

#[test]
fn paged_topics_in_reverse() {
    let dbi = Dbi::memory();
    let model = atesting(&dbi);
    for i in 0..7 {
        model
            .insert(&dbi, Call::new(args(&[("x", Value::from(format!("r{i}")))])))
            .unwrap();
    }
    let call = Call::new(args(&[
        ("rowcount", Value::Int(3)),
        ("pageno", Value::Int(2)),
        ("sortreverse", Value::Bool(true)),
    ]));
    let reply = model.topics(&dbi, call).unwrap();
    let xs: Vec<&Value> = reply.rows.iter().map(|r| &r["x"]).collect();
    assert_eq!(xs, vec![&Value::from("r3"), &Value::from("r2"), &Value::from("r1")]);
    assert_eq!(reply.args["totalno"], Value::UInt(7));
}

#[test]
fn rejected_sort_column_falls_back_to_unordered() {
    let dbi = Dbi::memory();
    let model = atesting(&dbi);
    model.insert(&dbi, Call::new(args(&[("x", "a".into())]))).unwrap();
    let call = Call::new(args(&[("sortby", Value::from("x; DROP TABLE atesting"))]));
    assert_eq!(model.order_string(&call), "");
    assert_eq!(model.topics(&dbi, call).unwrap().rows.len(), 1);
}

#[test]
fn uniqueness_violation_is_a_validation_error() {
    let dbi = Dbi::memory();
    let model = atesting(&dbi);
    for _ in 0..2 {
        model
            .insert(&dbi, Call::new(args(&[("x", "same".into()), ("y", "same".into())])))
            .unwrap();
    }
    let err = model
        .insupd(&dbi, Call::new(args(&[("x", "same".into()), ("y", "same".into())])))
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert!(matches!(err, Error::Uniqueness { .. }));
}

#[test]
fn store_failures_surface_unchanged() {
    let dbi = Dbi::memory();
    let model = Model::from_json(common::ATESTING).unwrap();
    let err = model.topics(&dbi, Call::default()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Store);
}

#[test]
fn descriptor_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(common::ATESTING.as_bytes()).unwrap();
    let model = Model::from_file(file.path()).unwrap();
    assert_eq!(model.table().current_table, "atesting");
    assert_eq!(model.table().next_pages("topics").len(), 1);

    assert!(matches!(Model::from_file("/nonexistent/m.json"), Err(Error::Io(_))));
    assert!(matches!(Model::from_json("{"), Err(Error::Config(_))));
}
