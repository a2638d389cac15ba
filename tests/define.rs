use eavql::backend::{Params, Statements};
use eavql::{Context, Define, EavError, GetRequest, Scalar, parse};

fn text(s: &str) -> Option<Scalar> {
    Some(Scalar::from(s))
}

#[tokio::test]
async fn full_text_search_finds_multi_line_values() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(
        &Define::new("fun", "some")
            .set("num", 42)
            .set("str", "foobar")
            .set("multi", "blet\nmonkey"),
    )
    .await
    .expect("define");
    ctx.define(&Define::new("fun", "other").set("multi", "nothing to see"))
        .await
        .expect("define");

    let mut select = parse("SELECT value, multi FROM fun WHERE multi matches @search").expect("parse");
    select.add_param("@search", "monkey");
    let results = ctx.exec_select(&select).await.expect("query");
    assert_eq!(results.columns, vec!["value", "multi"]);
    assert_eq!(results.rows, vec![vec![text("some"), text("blet\nmonkey")]]);
}

#[tokio::test]
async fn primary_values_can_be_searched_too() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("books", "the quick fox")).await.unwrap();
    ctx.define(&Define::new("books", "a lazy dog")).await.unwrap();
    let mut select = parse("SELECT value FROM books WHERE value matches @q").unwrap();
    select.add_param("@q", "lazy");
    let found = ctx.exec_list(&select).await.unwrap();
    assert_eq!(found, vec![text("a lazy dog")]);
}

#[tokio::test]
async fn upserted_attributes_read_back_exactly() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("cars", "civic").set("doors", 4).set("color", "red"))
        .await
        .unwrap();
    ctx.define(&Define::new("cars", "civic").set("color", "blue").erase("doors"))
        .await
        .unwrap();
    let response = ctx
        .get(&GetRequest {
            table: "cars".to_string(),
            values: vec![Scalar::from("civic")],
        })
        .await
        .unwrap();
    let metadata = response.metadata[0].as_ref().expect("item exists");
    assert_eq!(metadata.len(), 1, "doors was erased");
    assert_eq!(metadata.get("color"), Some(&Scalar::from("blue")));
}

#[tokio::test]
async fn erasing_an_unknown_attribute_is_harmless() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("cars", "civic").erase("wings"))
        .await
        .expect("define");
    let schema = ctx.schema(Some("cars")).await.unwrap();
    assert!(schema.tables.is_empty(), "no attribute was created");
}

#[tokio::test]
async fn attribute_types_are_fixed_on_first_write() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("t", "a").set("num", 1)).await.unwrap();
    ctx.define(&Define::new("t", "b").set("num", 2.5)).await.expect("numbers still fit");
    let err = ctx
        .define(&Define::new("t", "c").set("other", "fine").set("num", "oops"))
        .await
        .expect_err("string into a numeric attribute");
    match err {
        EavError::TypeMismatch {
            name,
            value,
            value_numeric,
            name_numeric,
        } => {
            assert_eq!(name, "num");
            assert_eq!(value, Scalar::from("oops"));
            assert!(!value_numeric);
            assert!(name_numeric);
        }
        other => panic!("expected a type mismatch, got {other:?}"),
    }
    let response = ctx
        .get(&GetRequest {
            table: "t".to_string(),
            values: vec![Scalar::from("c")],
        })
        .await
        .unwrap();
    let written = response.metadata[0].clone().unwrap_or_default();
    assert!(written.is_empty(), "no slot of the failed call was written: {written:?}");
}

#[tokio::test]
async fn key_types_are_fixed_per_table() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("numbered", 1)).await.unwrap();
    assert!(matches!(
        ctx.define(&Define::new("numbered", "one")).await,
        Err(EavError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn deleted_items_disappear_from_queries() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("t", "some").set("num", 42).set("str", "x"))
        .await
        .unwrap();
    let select = parse("SELECT value FROM t").unwrap();
    assert_eq!(ctx.exec_select(&select).await.unwrap().len(), 1);
    ctx.delete("t", &[Scalar::from("some")]).await.expect("delete");
    assert_eq!(ctx.exec_select(&select).await.unwrap().len(), 0);
}

#[tokio::test]
async fn deleting_from_unknown_tables_or_keys_is_a_no_op() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.delete("nowhere", &[Scalar::from("x")]).await.expect("no table");
    ctx.define(&Define::new("t", "kept")).await.unwrap();
    ctx.delete("t", &[Scalar::from("missing")]).await.expect("no key");
    let select = parse("SELECT value FROM t").unwrap();
    assert_eq!(ctx.exec_list(&select).await.unwrap(), vec![text("kept")]);
}

#[tokio::test]
async fn unknown_attributes_come_back_null() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("somethin", "a").set("x", 1)).await.unwrap();
    ctx.define(&Define::new("somethin", "b").set("x", 2)).await.unwrap();
    let results = ctx
        .exec_select(&parse("SELECT nothin FROM somethin").unwrap())
        .await
        .expect("unknown column is not an error");
    assert_eq!(results.rows, vec![vec![None], vec![None]]);
}

#[tokio::test]
async fn unknown_tables_return_nothing() {
    let ctx = Context::open_in_memory().await.expect("open");
    let results = ctx
        .exec_select(&parse("SELECT value, nothin FROM nowhere").unwrap())
        .await
        .expect("unknown table is not an error");
    assert!(results.is_empty());
}

#[tokio::test]
async fn partial_attributes_keep_rows() {
    let ctx = Context::open_in_memory().await.expect("open");
    ctx.define(&Define::new("people", "ann").set("age", 31).set("city", "Oslo"))
        .await
        .unwrap();
    ctx.define(&Define::new("people", "bob").set("age", 45)).await.unwrap();
    let select = parse("SELECT value, city FROM people ORDER BY value").unwrap();
    let results = ctx.exec_select(&select).await.unwrap();
    assert_eq!(
        results.rows,
        vec![vec![text("ann"), text("Oslo")], vec![text("bob"), None]]
    );
}

#[tokio::test]
async fn upserts_bump_lastmodified_but_keep_created() {
    let ctx = Context::open_in_memory().await.expect("open");
    let item = ctx
        .define(&Define::new("cars", "civic").set("doors", 4))
        .await
        .unwrap();
    ctx.backend()
        .execute(
            "UPDATE items SET created = @old, lastmodified = @old WHERE id = @id",
            &Params::new()
                .bind("@old", "2000-01-01 00:00:00".to_string())
                .bind("@id", item),
        )
        .await
        .unwrap();
    let backdated = ctx.get_item(item).await.unwrap().expect("item exists");
    assert_eq!(backdated.created, backdated.lastmodified);

    let again = ctx
        .define(&Define::new("cars", "civic").set("doors", 5).set("color", "red"))
        .await
        .unwrap();
    assert_eq!(again, item, "same key, same item");
    let touched = ctx.get_item(item).await.unwrap().expect("item exists");
    assert_eq!(touched.created, backdated.created, "created never moves");
    assert!(
        touched.lastmodified > backdated.lastmodified,
        "lastmodified moved forward: {touched:?}"
    );
}
