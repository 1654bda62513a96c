use anyhow::Context;
use clap::Parser;
use rusty_mini_query::{Database, TableDef};
use std::io::BufRead;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Runs SQL against an in-memory or sled-backed database and prints each
/// result as JSON.
#[derive(Debug, Parser)]
#[command(name = "rusty-mini-query", version)]
struct Args {
    /// Directory of a sled database; tables live in memory when omitted.
    #[arg(long)]
    data: Option<PathBuf>,

    /// JSON file with an array of table definitions to create at startup.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Statement to run; repeatable. Reads statements line by line from stdin
    /// when absent.
    #[arg(short = 'e', long = "execute")]
    execute: Vec<String>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log: String,
}

fn load_schema(db: &Database, path: &PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading schema {}", path.display()))?;
    let defs: Vec<TableDef> = serde_json::from_str(&text)?;
    let existing = db.table_names();
    for def in defs {
        // Keyed databases keep their tables between runs.
        if existing.iter().any(|n| n.eq_ignore_ascii_case(&def.name)) {
            continue;
        }
        db.create_table(def)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let db = match &args.data {
        Some(dir) => Database::open_keyed(dir)?,
        None => Database::new(),
    };
    if let Some(path) = &args.schema {
        load_schema(&db, path)?;
    }
    info!(tables = ?db.table_names(), "database ready");

    let scripts = if args.execute.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        args.execute
    };

    for script in &scripts {
        match db.execute_script(script).await {
            Ok(outputs) => {
                for out in outputs {
                    println!("{}", out.to_json());
                }
            }
            Err(e) => {
                error!(%e, "statement failed");
                anyhow::bail!(e);
            }
        }
    }
    Ok(())
}
