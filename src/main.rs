use anyhow::Result;
use impactgraph::api::ImpactServer;
use impactgraph::db::{migrate, Db};
use impactgraph::{Config, ImpactError};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", &config.impact.log_level)
    ).init();

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve" => run_http_server(config).await?,
        "verify" => run_schema_verification(config).await?,
        other => {
            eprintln!("Unknown command: {}", other);
            eprintln!("Usage: impactd [serve|verify]");
            std::process::exit(2);
        }
    }

    Ok(())
}

async fn open_and_migrate(config: &Config) -> Result<Db> {
    let db = Db::new(config.db_path());
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;
    log::info!("Database ready at {}", db.path().display());
    Ok(db)
}

/// Run the impact graph HTTP API
async fn run_http_server(config: Config) -> Result<()> {
    log::info!("Starting impactd v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Graphable kinds: {}", config.assets.allowed_kinds.join(", "));

    let db = open_and_migrate(&config).await?;
    let server = ImpactServer::new(db, &config);
    server.run(config.http_server.port).await?;

    Ok(())
}

/// Run database schema verification
async fn run_schema_verification(config: Config) -> Result<()> {
    log::info!("Verifying impactd v{} database", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());

    let db = open_and_migrate(&config).await?;
    verify_database_schema(&db).await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}

/// Verify that all expected database objects exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let missing = migrate::missing_tables(conn)?;
        if !missing.is_empty() {
            for table in &missing {
                log::error!("Missing table: {}", table);
            }
            return Err(ImpactError::Config("Not all required tables exist".to_string()));
        }
        log::debug!("✓ {} required tables exist", migrate::REQUIRED_TABLES.len());

        let applied = migrate::get_applied_migrations(conn)?;
        if applied.len() < 3 {
            return Err(ImpactError::Config(format!("Expected at least 3 migrations, found {}", applied.len())));
        }
        log::debug!("✓ {} migrations applied", applied.len());

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(ImpactError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }
        log::debug!("✓ Journal mode: WAL");

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(ImpactError::Config("Foreign keys not enabled".to_string()));
        }
        log::debug!("✓ Foreign keys enabled");

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(ImpactError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    }).await?;

    Ok(())
}
