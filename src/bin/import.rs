use clap::Parser;
use impactgraph::db::import::{import_dataset, Dataset};
use impactgraph::db::{migrate, Db};
use impactgraph::{Config, KindRegistry};
use std::path::PathBuf;
use std::time::Instant;
use anyhow::{Context, Result};

#[derive(Parser, Debug)]
#[command(name = "import")]
#[command(about = "Import entities, links, work items and relations from a JSON dataset")]
struct Args {
    /// Dataset file
    dataset: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());

    let raw = std::fs::read_to_string(&args.dataset)
        .with_context(|| format!("Failed to read dataset: {}", args.dataset.display()))?;
    let dataset: Dataset = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", args.dataset.display()))?;

    let db = Db::new(config.db_path());
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;

    let start = Instant::now();
    let allowed = config.assets.allowed_kinds.clone();
    let stats = db
        .with_connection(move |conn| {
            import_dataset(conn, &dataset, &KindRegistry::builtin(), &allowed)
        })
        .await?;

    println!(
        "Imported {} entities, {} links, {} work items, {} relations in {:.2}s",
        stats.entities,
        stats.links,
        stats.work_items,
        stats.relations,
        start.elapsed().as_secs_f64()
    );
    if stats.rejected_relations > 0 {
        println!("{} relations rejected (see relation_operations)", stats.rejected_relations);
    }

    Ok(())
}
