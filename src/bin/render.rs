use clap::Parser;
use impactgraph::assets::EntityStore;
use impactgraph::db::{migrate, Db, SqliteStore};
use impactgraph::template::{builtin_schemas, OutputMode};
use impactgraph::{AssetRef, Config, ImpactError, TemplateEngine};
use serde_json::{Map, Value};
use std::path::PathBuf;
use anyhow::Result;

#[derive(Parser, Debug)]
#[command(name = "render")]
#[command(about = "Render a notification template, optionally against an entity")]
struct Args {
    /// Template file
    template: PathBuf,

    /// Kind of the context entity
    #[arg(short, long, requires = "id")]
    kind: Option<String>,

    /// Id of the context entity
    #[arg(short, long, requires = "kind")]
    id: Option<i64>,

    /// Only check the template, do not render
    #[arg(long)]
    check: bool,

    /// Escape the output for storage instead of display
    #[arg(long)]
    storage: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "warn")
    ).init();

    let args = Args::parse();
    let config = Config::load()?;
    let source = std::fs::read_to_string(&args.template)?;

    let mode = if args.storage {
        OutputMode::Storage
    } else {
        config.templates.output_mode
    };
    let engine = TemplateEngine::new(mode);

    if args.check {
        match engine.validate(&source) {
            Ok(()) => println!("{}: ok", args.template.display()),
            Err(failure) => {
                eprintln!("{}: {}", args.template.display(), failure.error);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let values = match (args.kind, args.id) {
        (Some(kind), Some(id)) => {
            let db = Db::new(config.db_path());
            let migrations_dir = config.migrations_dir().to_path_buf();
            db.with_connection(move |conn| migrate::run_migrations(conn, &migrations_dir))
                .await?;

            let asset = AssetRef::new(kind, id);
            let max_depth = config.templates.max_value_depth;
            db.with_connection(move |conn| {
                let schema = builtin_schemas()
                    .for_kind(&asset.kind)
                    .ok_or_else(|| ImpactError::NotFound(format!("No template schema for {}", asset.kind)))?;
                let store = SqliteStore::new(conn);
                let entity = store
                    .load(&asset)?
                    .ok_or_else(|| ImpactError::NotFound(format!("Unknown entity {}", asset)))?;
                Ok(Value::Object(schema.get_values(&entity, true, &store, max_depth)?))
            })
            .await?
        }
        _ => Value::Object(Map::new()),
    };

    match engine.render(&source, &values) {
        Ok(output) => println!("{}", output),
        Err(err) => {
            eprintln!("{}: {}", args.template.display(), err);
            std::process::exit(1);
        }
    }

    Ok(())
}
