use eavql::{Combine, Criterion, EavError, parse};

#[test]
fn select_from_where_parses() {
    let select = parse("SELECT foo, bar FROM blet WHERE monkey = @something").expect("parse ok");
    assert_eq!(select.select, vec!["foo", "bar"]);
    assert_eq!(select.from, "blet");
    assert_eq!(select.where_.len(), 1, "one implicit AND group");
    assert_eq!(select.where_[0].combine, Combine::And);
    assert_eq!(
        select.where_[0].criteria,
        vec![Criterion::new("monkey", "=", "@something")]
    );
    assert!(select.order_by.is_empty());
    assert_eq!(select.limit, 0);
}

#[test]
fn keywords_are_case_insensitive() {
    let select = parse("select value from t order by value desc limit 5").expect("parse ok");
    assert_eq!(select.select, vec!["value"]);
    assert_eq!(select.order_by.len(), 1);
    assert_eq!(select.order_by[0].field, "value");
    assert!(select.order_by[0].descending);
    assert_eq!(select.limit, 5);
}

#[test]
fn order_by_defaults_to_ascending() {
    let select = parse("SELECT a, b FROM t ORDER BY a, b DESC LIMIT 3").expect("parse ok");
    let orders: Vec<(&str, bool)> = select
        .order_by
        .iter()
        .map(|o| (o.field.as_str(), o.descending))
        .collect();
    assert_eq!(orders, vec![("a", false), ("b", true)]);
    assert_eq!(select.limit, 3);
}

#[test]
fn criteria_join_with_and() {
    let select = parse("SELECT a FROM t WHERE a = @x AND b MATCHES @y AND c like @z").expect("parse ok");
    let ops: Vec<&str> = select.criteria().map(|c| c.op.as_str()).collect();
    assert_eq!(ops, vec!["=", "matches", "like"]);
}

#[test]
fn keywords_need_a_word_boundary() {
    let select = parse("SELECT andrew, fromage FROM t WHERE andrew = @a AND orderly > @b")
        .expect("parse ok");
    assert_eq!(select.select, vec!["andrew", "fromage"]);
    let names: Vec<&str> = select.criteria().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["andrew", "orderly"]);
}

#[test]
fn multi_line_statements_parse() {
    let select = parse("SELECT value,\n       multi\nFROM fun\nWHERE multi matches @search").expect("parse ok");
    assert_eq!(select.select, vec!["value", "multi"]);
    assert_eq!(select.from, "fun");
}

#[test]
fn empty_statement_is_a_parse_error() {
    match parse("   ") {
        Err(EavError::Parse { message, .. }) => assert_eq!(message, "No tokens"),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn parse_errors_carry_the_statement_and_position() {
    let sql = "SELECT a FROM t extra";
    match parse(sql) {
        Err(EavError::Parse {
            sql: carried, line, col, ..
        }) => {
            assert_eq!(carried, sql);
            assert_eq!(line, Some(1));
            assert!(col.is_some());
        }
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn malformed_statements_fail() {
    for sql in [
        "FROM t",
        "SELECT FROM t",
        "SELECT a",
        "SELECT a FROM",
        "SELECT a FROM t WHERE",
        "SELECT a FROM t WHERE a = @x AND",
        "SELECT a FROM t WHERE a =",
        "SELECT a FROM t ORDER a",
        "SELECT a FROM t ORDER BY a sideways",
        "SELECT a FROM t LIMIT",
        "SELECT a FROM t LIMIT 1 2",
    ] {
        assert!(
            matches!(parse(sql), Err(EavError::Parse { .. })),
            "{sql} should not parse"
        );
    }
}

#[test]
fn the_largest_signed_limit_still_parses() {
    let select = parse("SELECT a FROM t LIMIT 9223372036854775807").expect("parse ok");
    assert_eq!(select.limit, i64::MAX as u64);
}

#[test]
fn bad_limits_are_parse_errors() {
    for sql in [
        "SELECT a FROM t LIMIT x",
        "SELECT a FROM t LIMIT -1",
        "SELECT a FROM t LIMIT 9223372036854775808",
    ] {
        match parse(sql) {
            Err(EavError::Parse { message, .. }) => assert_eq!(message, "Invalid LIMIT value"),
            other => panic!("expected parse error for {sql}, got {other:?}"),
        }
    }
}

#[test]
fn bad_names_are_validation_errors() {
    for sql in [
        "SELECT a-b FROM t",
        "SELECT a FROM t_",
        "SELECT a FROM t WHERE a == @x",
        "SELECT a FROM t WHERE a = x",
        "SELECT a FROM t WHERE 1a = @x",
    ] {
        assert!(
            matches!(parse(sql), Err(EavError::Validation { .. })),
            "{sql} should fail validation"
        );
    }
}

#[test]
fn selects_travel_as_json_with_a_where_key() {
    let mut select = parse("SELECT value FROM blet WHERE monkey = @something LIMIT 3").unwrap();
    select.add_param("something", "banana");
    let json = serde_json::to_value(&select).expect("serialize");
    assert_eq!(json["where"][0]["combine"], "And");
    assert_eq!(json["where"][0]["criteria"][0]["param_name"], "@something");
    assert_eq!(json["params"]["@something"], "banana");
    assert_eq!(json["limit"], 3);
    let back: eavql::Select = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, select);
}
