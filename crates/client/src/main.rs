use std::collections::HashMap;
use std::sync::Arc;

use shq_catalog::ShardCatalog;
use shq_client::{Engine, MemoryBackend};
use shq_common::EngineConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let opts = parse_opts(&args)?;

    let config = match &opts.config {
        Some(path) => EngineConfig::load_from_json(path)?,
        None => EngineConfig::default(),
    };
    let catalog = match &opts.catalog {
        Some(path) => ShardCatalog::load_from_json(path)?,
        None => ShardCatalog::new(),
    };
    let backend = match &opts.data {
        Some(path) => MemoryBackend::load_from_json(&catalog, path)?,
        None => MemoryBackend::from_catalog(&catalog, HashMap::new())?,
    };
    let engine = Engine::new(config, Arc::new(catalog), Arc::new(backend))?;
    let session = engine.session();

    if opts.plan_only {
        print!("{}", session.explain(&opts.sql)?);
        return Ok(());
    }

    let mut rows = if opts.for_update {
        session.query_for_update(&opts.sql).await?
    } else {
        session.query(&opts.sql).await?
    };
    println!("{}", rows.column_names().join("\t"));
    let mut count = 0usize;
    let outcome = loop {
        match rows.next_row().await {
            Ok(Some(row)) => {
                let cells = row.iter().map(|v| v.to_string()).collect::<Vec<_>>();
                println!("{}", cells.join("\t"));
                count += 1;
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };
    rows.close().await?;
    session.close().await?;
    outcome?;
    println!("({count} rows)");
    Ok(())
}

#[derive(Debug, Clone)]
struct QueryOpts {
    sql: String,
    plan_only: bool,
    for_update: bool,
    catalog: Option<String>,
    data: Option<String>,
    config: Option<String>,
}

fn parse_opts(args: &[String]) -> Result<QueryOpts, Box<dyn std::error::Error>> {
    let mut sql = None;
    let mut plan_only = false;
    let mut for_update = false;
    let mut catalog = None;
    let mut data = None;
    let mut config = None;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--catalog" => {
                i += 1;
                catalog = Some(args.get(i).cloned().ok_or("missing value for --catalog")?);
            }
            "--data" => {
                i += 1;
                data = Some(args.get(i).cloned().ok_or("missing value for --data")?);
            }
            "--config" => {
                i += 1;
                config = Some(args.get(i).cloned().ok_or("missing value for --config")?);
            }
            "--plan" => plan_only = true,
            "--for-update" => for_update = true,
            other if other.starts_with("--") => {
                return Err(format!("unknown argument: {other}").into());
            }
            other => {
                if sql.replace(other.to_string()).is_some() {
                    return Err("only one SQL statement may be given".into());
                }
            }
        }
        i += 1;
    }

    Ok(QueryOpts {
        sql: sql.ok_or("missing SQL statement")?,
        plan_only,
        for_update,
        catalog,
        data,
        config,
    })
}

fn print_usage() {
    eprintln!(
        "Usage:\n  shq [--catalog PATH] [--data PATH] [--config PATH] [--plan] [--for-update] SQL\n\n\
         --catalog PATH   JSON list of logical tables with their shards/replicas\n\
         --data PATH      JSON object of physical table name -> rows for the in-memory backends\n\
         --config PATH    JSON engine configuration\n\
         --plan           print the logical and distributed plan instead of running\n\
         --for-update     run as a locking read\n\n\
         Set RUST_LOG (e.g. RUST_LOG=shq_execution=debug) for logs on stderr."
    );
}
