use clap::Parser;
use impactgraph::db::{migrate, Db, SqliteStore};
use impactgraph::{AssetGate, AssetRef, Config, GraphBuilder, ImpactError, KindRegistry};
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "graph")]
#[command(about = "Print the impact graph of an asset as JSON")]
struct Args {
    /// Asset kind, e.g. Computer
    #[arg(short, long)]
    kind: String,

    /// Asset id
    #[arg(short, long)]
    id: i64,

    /// Pretty-print the payload
    #[arg(short, long)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "warn")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;

    let db = Db::new(config.db_path());
    let migrations_dir = config.migrations_dir().to_path_buf();
    db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
        .await?;

    let start = AssetRef::new(args.kind, args.id);
    let allowed = config.assets.allowed_kinds.clone();
    let payload = db
        .with_connection(move |conn| {
            let registry = KindRegistry::builtin();
            let store = SqliteStore::new(conn);
            let gate = AssetGate::new(&registry, &allowed, &store);
            let entity = gate
                .resolve(&start)
                .ok_or_else(|| ImpactError::NotFound(format!("Unknown asset {}", start)))?;
            let graph = GraphBuilder::new(&store, &gate)
                .with_work_items(&store)
                .build(&entity)?;
            Ok(graph.to_payload())
        })
        .await?;

    log::info!("{} nodes, {} edges", payload.nodes.len(), payload.edges.len());

    let output = if args.pretty {
        serde_json::to_string_pretty(&payload)?
    } else {
        serde_json::to_string(&payload)?
    };
    println!("{}", output);

    Ok(())
}
