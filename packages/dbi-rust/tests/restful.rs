mod common;

use common::{args, users};
use taodbi::{Call, Dbi, Error, ErrorCategory, RestModel};
use taodbi_core::Value;

fn create(dbi: &Dbi, m: &RestModel, username: &str, firstname: &str) -> i64 {
    m.insert(
        dbi,
        Call::new(args(&[("username", username.into()), ("firstname", firstname.into())])),
    )
    .unwrap()
    .last_id
    .unwrap()
}

#[test]
fn delete_excludes_from_live_results_but_not_raw_total() {
    let dbi = Dbi::memory();
    let m = users(&dbi);
    let ids: Vec<i64> = ["ann", "bob", "cy"]
        .iter()
        .map(|u| create(&dbi, &m, u, "X"))
        .collect();
    m.delete(&dbi, Call::new(args(&[("id", Value::Int(ids[1]))])))
        .unwrap();

    let rows = m.topics(&dbi, Call::default()).unwrap().rows;
    let names: Vec<&Value> = rows.iter().map(|r| &r["username"]).collect();
    assert_eq!(names, vec![&Value::from("ann"), &Value::from("cy")]);

    let summary = m.rest().total_rest(&dbi).unwrap();
    assert_eq!(summary.raw, 3);
    assert_eq!(summary.live, 2);
    assert_eq!(summary.start, Some(ids[0]));
    assert_eq!(summary.end, Some(ids[2]));
}

#[test]
fn update_returns_new_values_under_the_same_key() {
    let dbi = Dbi::memory();
    let m = users(&dbi);
    let id = create(&dbi, &m, "peter", "Peter");
    m.update(
        &dbi,
        Call::new(args(&[("id", Value::Int(id)), ("firstname", "Pete".into()), ("lastname", "P".into())])),
    )
    .unwrap();

    let rows = m
        .edit(&dbi, Call::new(args(&[("id", Value::Int(id))])))
        .unwrap()
        .rows;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["id"], Value::Int(id));
    assert_eq!(rows[0]["firstname"], Value::from("Pete"));
    assert_eq!(rows[0]["lastname"], Value::from("P"));
    assert_eq!(rows[0]["username"], Value::from("peter"));
}

#[test]
fn empties_clear_a_field() {
    let dbi = Dbi::memory();
    let m = users(&dbi);
    let id = create(&dbi, &m, "zed", "Zed");
    m.update(
        &dbi,
        Call::new(args(&[
            ("id", Value::Int(id)),
            ("username", "zed".into()),
            ("empties", Value::from(vec!["firstname"])),
        ])),
    )
    .unwrap();
    let rows = m
        .edit(&dbi, Call::new(args(&[("id", Value::Int(id))])))
        .unwrap()
        .rows;
    assert!(!rows[0].contains_key("firstname"));
    assert_eq!(rows[0]["username"], Value::from("zed"));
}

#[test]
fn recreating_a_live_record_conflicts_and_a_dead_one_resurrects() {
    let dbi = Dbi::memory();
    let m = users(&dbi);
    let id = create(&dbi, &m, "kim", "Kim");

    let err = m
        .insert(&dbi, Call::new(args(&[("username", "kim".into())])))
        .unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert_eq!(err.category(), ErrorCategory::Validation);

    m.delete(&dbi, Call::new(args(&[("id", Value::Int(id))])))
        .unwrap();
    assert!(m.topics(&dbi, Call::default()).unwrap().rows.is_empty());

    let again = create(&dbi, &m, "kim", "Kimberly");
    assert_eq!(again, id);
    let rows = m.topics(&dbi, Call::default()).unwrap().rows;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["firstname"], Value::from("Kimberly"));
}

#[test]
fn cursor_walks_forward_from_pass_id() {
    let dbi = Dbi::memory();
    let m = users(&dbi);
    let ids: Vec<i64> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|u| create(&dbi, &m, u, "X"))
        .collect();
    m.delete(&dbi, Call::new(args(&[("id", Value::Int(ids[2]))])))
        .unwrap();

    let first = m
        .topics(&dbi, Call::new(args(&[("rowcount", Value::Int(2))])))
        .unwrap()
        .rows;
    let last_seen = first[1]["id"].clone();
    assert_eq!(last_seen, Value::Int(ids[1]));

    let next = m
        .topics(
            &dbi,
            Call::new(args(&[("rowcount", Value::Int(2)), ("passid", last_seen)])),
        )
        .unwrap()
        .rows;
    let names: Vec<&Value> = next.iter().map(|r| &r["username"]).collect();
    assert_eq!(names, vec![&Value::from("d"), &Value::from("e")]);
}
