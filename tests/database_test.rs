use sqlx::Row;
use verifix::adapters::sqlite::{
    all_embedded_migrations, create_migrated_test_pool, database_url, initialize_database, Migrator,
};

#[tokio::test]
async fn test_migrations_create_all_tables() {
    let pool = create_migrated_test_pool()
        .await
        .expect("failed to create migrated pool");

    let rows = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(&pool)
    .await
    .expect("failed to query tables");
    let table_names: Vec<String> = rows.iter().map(|row| row.get("name")).collect();

    for expected in [
        "evidence_bundles",
        "fix_attempts",
        "fix_learnings",
        "red_flag_checks",
        "red_flags",
        "root_cause_analyses",
        "schema_migrations",
        "verification_reports",
        "workflow_states",
    ] {
        assert!(
            table_names.iter().any(|t| t == expected),
            "table {expected} missing from {table_names:?}"
        );
    }
}

#[tokio::test]
async fn test_migrations_are_applied_once() {
    let pool = create_migrated_test_pool()
        .await
        .expect("failed to create migrated pool");

    let migrator = Migrator::new(pool);
    let applied = migrator
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .expect("second migration run failed");
    assert_eq!(applied, 0);
    assert_eq!(migrator.get_current_version().await.unwrap(), 1);
}

#[tokio::test]
async fn test_file_database_is_created_with_parent_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("verifix.db");

    let pool = initialize_database(&database_url(&path.to_string_lossy()), None)
        .await
        .expect("failed to initialize file database");
    assert!(path.exists());
    assert!(!pool.is_closed());

    pool.close().await;
    assert!(pool.is_closed());
}
