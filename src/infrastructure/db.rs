use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

pub async fn init_db(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(database_url).await?;

    // Run migrations manually (simple SQL)
    run_migrations(&db).await?;

    Ok(db)
}

async fn run_migrations(db: &DatabaseConnection) -> Result<(), DbErr> {
    // Device directory: id -> address used by the execution connector
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            address TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#
        .to_owned(),
    ))
    .await?;

    // Change requests (list-valued columns are JSON arrays)
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS change_requests (
            id TEXT PRIMARY KEY NOT NULL,
            device_id TEXT NOT NULL,
            category TEXT NOT NULL,
            operation TEXT NOT NULL,
            target_type TEXT NOT NULL,
            target_id TEXT,
            target_name TEXT,
            previous_value TEXT,
            proposed_value TEXT,
            commands TEXT NOT NULL DEFAULT '[]',
            rollback_commands TEXT NOT NULL DEFAULT '[]',
            impact TEXT NOT NULL DEFAULT 'medium',
            requires_reboot BOOLEAN NOT NULL DEFAULT 0,
            affected_services TEXT NOT NULL DEFAULT '[]',
            dependencies TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'pending',
            created_by TEXT,
            created_at TEXT NOT NULL,
            reviewed_by TEXT,
            reviewed_at TEXT,
            review_notes TEXT,
            executed_at TEXT,
            result TEXT,
            error_message TEXT,
            duration_ms INTEGER,
            annotations TEXT NOT NULL DEFAULT '[]',
            updated_at TEXT NOT NULL
        )
        "#
        .to_owned(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "CREATE INDEX IF NOT EXISTS idx_change_requests_device_status ON change_requests(device_id, status)"
            .to_owned(),
    ))
    .await?;

    // Queue entries: one row per execution attempt
    db.execute(Statement::from_string(
        db.get_database_backend(),
        r#"
        CREATE TABLE IF NOT EXISTS queue_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_id TEXT NOT NULL,
            change_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'queued',
            queued_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            error TEXT
        )
        "#
        .to_owned(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "CREATE INDEX IF NOT EXISTS idx_queue_entries_device_status ON queue_entries(device_id, status, queued_at, id)"
            .to_owned(),
    ))
    .await?;

    db.execute(Statement::from_string(
        db.get_database_backend(),
        "CREATE INDEX IF NOT EXISTS idx_queue_entries_change ON queue_entries(change_id)"
            .to_owned(),
    ))
    .await?;

    Ok(())
}
