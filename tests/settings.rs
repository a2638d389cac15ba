use std::fs;

use eavql::{Context, Define, Scalar, Settings};

#[test]
fn defaults_are_in_memory() {
    let settings = Settings::default();
    assert!(settings.database.path.is_none());
    assert_eq!(settings.database.journal_mode, "WAL");
    assert_eq!(settings.retry.attempts, 4);
    assert_eq!(settings.retry.value_attempts, 3);
    assert_eq!(settings.retry_policy().attempts(), 4);
    assert_eq!(settings.value_retry_policy().attempts(), 3);
    assert_eq!(settings.log_filter, "info");
}

#[test]
fn files_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let file = dir.path().join("eavql.toml");
    fs::write(
        &file,
        "log_filter = \"debug\"\n[retry]\nattempts = 7\n[database]\nsynchronous = \"FULL\"\n",
    )
    .expect("write settings");
    let settings = Settings::load(Some(file.to_str().unwrap())).expect("load");
    assert_eq!(settings.retry.attempts, 7);
    assert_eq!(settings.retry.value_attempts, 3, "unset keys keep defaults");
    assert_eq!(settings.database.synchronous, "FULL");
    assert_eq!(settings.database.journal_mode, "WAL");
    assert_eq!(settings.log_filter, "debug");
}

#[test]
fn missing_files_are_fine() {
    let settings = Settings::load(Some("/definitely/not/here/eavql")).expect("load");
    assert_eq!(settings.database.journal_mode, "WAL");
}

#[test]
fn logging_can_be_initialized_twice() {
    let settings = Settings::default();
    settings.init_logging();
    settings.init_logging();
}

#[tokio::test]
async fn file_databases_survive_reopening() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.db");
    let settings = Settings::with_path(path.to_str().unwrap());
    {
        let ctx = Context::open(&settings).await.expect("open");
        ctx.define(&Define::new("notes", "first").set("body", "hello there"))
            .await
            .expect("define");
    }
    let ctx = Context::open(&settings).await.expect("reopen");
    let id = ctx.get_row_id("notes", "first").await.unwrap();
    assert!(id.is_some(), "item persisted");
    let mut select = eavql::parse("SELECT value, body FROM notes WHERE body matches @q").unwrap();
    select.add_param("@q", "hello");
    let results = ctx.exec_select(&select).await.unwrap();
    assert_eq!(
        results.rows,
        vec![vec![Some(Scalar::from("first")), Some(Scalar::from("hello there"))]]
    );
}
