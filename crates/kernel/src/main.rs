//! Sift command-line tool.
//!
//! Compiles a query string against a JSON row file (in memory) or a
//! PostgreSQL table and prints the list response.
//!
//! Usage:
//!   sift --rows products.json --allow isPopular,price --query 'isPopular=true&sort=-price'
//!   sift --table product --allow name --relation category=category:category_id:id --query 'category.name=Brakes'

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sift_kernel::config::Config;
use sift_kernel::db;
use sift_kernel::query::{
    AllowedFields, Diagnostics, InMemoryAdapter, ListResponse, ParameterBag, PgAdapter,
    QueryCompiler, Relation, RequestContext, SearchField, SqlQueryBuilder, StoreAdapter,
};

/// Query compiler command-line options.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding an array of rows to query in memory.
    #[arg(long, conflicts_with = "table")]
    rows: Option<PathBuf>,

    /// PostgreSQL table to query (requires DATABASE_URL).
    #[arg(long)]
    table: Option<String>,

    /// URL query string, e.g. `price[gte]=10&sort=-createdAt&page=2`.
    #[arg(long, default_value = "")]
    query: String,

    /// Comma-separated filterable fields.
    #[arg(long, value_delimiter = ',')]
    allow: Vec<String>,

    /// Comma-separated search descriptors, e.g. `name,category.name,offerings.some.title`.
    #[arg(long, value_delimiter = ',')]
    search_fields: Vec<String>,

    /// Relation mapping `field=table:local_key:foreign_key[:many]` (repeatable).
    #[arg(long = "relation")]
    relations: Vec<String>,

    /// Entity name used in log context.
    #[arg(long)]
    entity: Option<String>,

    /// Print dropped parameters to stderr.
    #[arg(long)]
    diagnostics: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let args = Args::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    let bag = ParameterBag::from_query_str(&args.query);
    let allowed: AllowedFields = args.allow.iter().map(|f| f.trim()).collect();
    let search_fields = args
        .search_fields
        .iter()
        .map(|s| s.trim().parse::<SearchField>())
        .collect::<Result<Vec<_>, _>>()
        .context("invalid --search-fields")?;

    let mut ctx = RequestContext::new();
    if let Some(entity) = &args.entity {
        ctx = ctx.for_entity(entity.clone());
    }
    info!(request_id = %ctx.request_id, params = bag.len(), "compiling query");

    let (response, diagnostics) = match &args.table {
        Some(table) => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required with --table")?;
            let pool = db::create_pool(database_url, config.database_max_connections).await?;

            let mut builder = SqlQueryBuilder::new(table.clone());
            for raw in &args.relations {
                let (field, relation) = parse_relation(raw)?;
                builder = builder.with_relation(field, relation);
            }

            run(PgAdapter::new(pool, builder), &bag, &config, &ctx, &allowed, &search_fields)
                .await?
        }
        None => {
            let path = args
                .rows
                .as_ref()
                .context("either --rows or --table is required")?;
            let rows = load_rows(path)?;
            info!(rows = rows.len(), path = %path.display(), "rows loaded");

            run(InMemoryAdapter::new(rows), &bag, &config, &ctx, &allowed, &search_fields).await?
        }
    };

    if args.diagnostics {
        for diagnostic in diagnostics.entries() {
            eprintln!("{}", serde_json::to_string(diagnostic)?);
        }
    }

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn run<A: StoreAdapter>(
    adapter: A,
    bag: &ParameterBag,
    config: &Config,
    ctx: &RequestContext,
    allowed: &AllowedFields,
    search_fields: &[SearchField],
) -> Result<(ListResponse, Diagnostics)> {
    QueryCompiler::new(adapter, bag, &config.compiler, ctx)
        .filter(allowed)
        .search(search_fields)
        .sort()
        .project()
        .paginate()
        .execute_with_diagnostics()
        .await
        .context("query execution failed")
}

fn load_rows(path: &PathBuf) -> Result<Vec<Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<Value>(&raw).context("rows file is not valid JSON")? {
        Value::Array(rows) => Ok(rows),
        _ => anyhow::bail!("rows file must contain a JSON array"),
    }
}

/// Parse `field=table:local_key:foreign_key[:many]`.
fn parse_relation(raw: &str) -> Result<(String, Relation)> {
    let (field, spec) = raw
        .split_once('=')
        .with_context(|| format!("relation '{raw}' must look like field=table:local:foreign"))?;
    let parts: Vec<&str> = spec.split(':').collect();
    let relation = match parts.as_slice() {
        [table, local, foreign] => Relation::one(*table, *local, *foreign),
        [table, local, foreign, "many"] => Relation::many(*table, *local, *foreign),
        _ => anyhow::bail!("relation '{raw}' must look like field=table:local:foreign[:many]"),
    };
    Ok((field.trim().to_string(), relation))
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
