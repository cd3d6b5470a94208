//! isomapper — inspect and serve query descriptors
//!
//! # Usage
//!
//! ```bash
//! # Check rendered SQL against the allow-list
//! isomapper validate 'select * from "items"' --table items
//!
//! # Replay a descriptor file and show the SQL it renders to
//! isomapper render query.json --table items
//!
//! # Replay a descriptor on the configured store
//! isomapper run query.json --table items
//!
//! # Send descriptors to the configured peer
//! isomapper send first.json second.json --table items
//!
//! # Serve tables to remote clients over WebSocket
//! isomapper serve --table items --table users
//! ```

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use isomapper::prelude::*;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "isomapper")]
#[command(version)]
#[command(about = "Inspect, validate and serve isomorphic query descriptors", long_about = None)]
#[command(after_help = "EXAMPLES:
    isomapper validate 'select * from \"users\"' --table users
    isomapper render descriptor.json --table items
    isomapper serve --table items --bind 127.0.0.1:8080")]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "ISOMAPPER_CONFIG")]
    config: Option<PathBuf>,

    /// Database connection URL (overrides the configuration file)
    #[arg(long, global = true, env = "ISOMAPPER_DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the default validator on rendered SQL
    Validate {
        sql: String,
        #[arg(short, long)]
        table: String,
    },
    /// Replay a JSON descriptor (file or '-' for stdin) and print its SQL
    Render {
        file: String,
        #[arg(short, long)]
        table: String,
    },
    /// Replay a JSON descriptor on the configured store
    Run {
        file: String,
        #[arg(short, long)]
        table: String,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Print the resolved configuration
    Config,
    /// Report whether a table exists in the configured store
    Check {
        #[arg(short, long)]
        table: String,
    },
    /// Send JSON descriptors to the configured peer, in order
    Send {
        #[arg(required = true)]
        files: Vec<String>,
        #[arg(short, long)]
        table: String,
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Serve tables to remote clients
    Serve {
        #[arg(short, long, required = true)]
        table: Vec<String>,
        /// Bind address (overrides the configuration file)
        #[arg(short, long)]
        bind: Option<String>,
    },
}

/// A mapper over an existing table with no schema hooks; rows stay JSON.
struct TableEntity {
    table: String,
    cache: Option<Arc<QueryCache>>,
}

impl TableEntity {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            cache: None,
        }
    }

    fn cached(table: &str, config: &CacheConfig) -> Self {
        Self {
            table: table.to_string(),
            cache: config
                .enabled
                .then(|| Arc::new(QueryCache::new(config.clone()))),
        }
    }
}

#[async_trait::async_trait]
impl Entity for TableEntity {
    type Model = serde_json::Value;

    fn table_name(&self) -> Option<&str> {
        Some(self.table.as_str())
    }

    fn create_missing_table(&self) -> bool {
        false
    }

    fn cache(&self) -> Option<Arc<dyn CacheEngine>> {
        self.cache
            .as_ref()
            .map(|c| Arc::clone(c) as Arc<dyn CacheEngine>)
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Validate { sql, table } => {
            validate(sql, table);
            Ok(())
        }
        Commands::Render { file, table } => render(file, table),
        Commands::Run {
            file,
            table,
            format,
        } => {
            let config = load_config(&cli)?;
            run_descriptor(&config, file, table, format).await
        }
        Commands::Send {
            files,
            table,
            format,
        } => {
            let config = load_config(&cli)?;
            send_descriptors(&config, files, table, format).await
        }
        Commands::Config => {
            let config = load_config(&cli)?;
            show_config(&cli, &config)
        }
        Commands::Check { table } => {
            let config = load_config(&cli)?;
            check_table(&config, table).await
        }
        Commands::Serve { table, bind } => {
            let config = load_config(&cli)?;
            serve(&config, table, bind.as_deref()).await
        }
    }
}

fn load_config(cli: &Cli) -> Result<MapperConfig> {
    let mut config = MapperConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        config.store.url = url.clone();
    }
    Ok(config)
}

fn validate(sql: &str, table: &str) {
    if let Some(keyword) = DefaultValidator::forbidden_keyword(sql) {
        println!("{} contains '{}'", "✗ rejected:".red().bold(), keyword.yellow());
    } else if DefaultValidator.validate(sql, table) {
        println!("{} scoped to {}", "✓ accepted:".green().bold(), table.cyan());
    } else {
        println!(
            "{} no from clause targets {}",
            "✗ rejected:".red().bold(),
            table.cyan()
        );
    }
}

fn read_descriptor(file: &str) -> Result<Descriptor> {
    let text = if file == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(Path::new(file)).with_context(|| format!("failed to read {}", file))?
    };
    let value: serde_json::Value = serde_json::from_str(&text).context("descriptor is not JSON")?;
    Ok(Descriptor::from_json(value)?)
}

fn render(file: &str, table: &str) -> Result<()> {
    let descriptor = read_descriptor(file)?;
    let query = from_descriptor(descriptor, Query::table(table), &TransformRegistry::new())?;
    let sql = query.to_sql();

    println!("{}", "Rendered SQL:".green().bold());
    println!("  {}", sql.white());

    let compiled = query.compile();
    if !compiled.bindings.is_empty() {
        println!();
        println!("{}", "Bindings:".cyan());
        for (i, b) in compiled.bindings.iter().enumerate() {
            println!("  ${} = {}", i + 1, b.to_string().yellow());
        }
    }

    println!();
    validate(&sql, table);
    Ok(())
}

async fn run_descriptor(
    config: &MapperConfig,
    file: &str,
    table: &str,
    format: &OutputFormat,
) -> Result<()> {
    let descriptor = read_descriptor(file)?;
    let store = ConnectionRegistry::global().connection(&config.store)?;
    let mapper = Mapper::new(TableEntity::new(table), ExecutionContext::server(store))?;
    let rows = mapper.from_descriptor(descriptor).await?;
    format_output(&rows, format);
    Ok(())
}

async fn send_descriptors(
    config: &MapperConfig,
    files: &[String],
    table: &str,
    format: &OutputFormat,
) -> Result<()> {
    let transport = WsTransport::from_config(&config.peer).await?;
    let entity = TableEntity::cached(table, &config.cache);
    let cache = entity.cache.clone();
    let mapper = Mapper::new(entity, ExecutionContext::client(Arc::new(transport)))?;

    for file in files {
        let descriptor = read_descriptor(file)?;
        println!("{} {}", "▶".green(), file.white().bold());
        let rows = mapper.query_from(descriptor)?.await?;
        format_output(&rows, format);
        println!();
    }

    if let Some(cache) = cache {
        let stats = cache.stats();
        println!(
            "{} {} hits, {} misses ({:.0}%)",
            "Cache:".dimmed(),
            stats.hits,
            stats.misses,
            stats.hit_rate()
        );
    }
    Ok(())
}

fn show_config(cli: &Cli, config: &MapperConfig) -> Result<()> {
    match MapperConfig::locate(cli.config.as_deref()) {
        Some(path) => println!("{} {}", "Config file:".dimmed(), path.display()),
        None => println!("{}", "No config file found, using defaults".dimmed()),
    }
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    println!("{} {}", "Store key:".dimmed(), config.store.key().cyan());
    Ok(())
}

async fn check_table(config: &MapperConfig, table: &str) -> Result<()> {
    let store = PgStore::connect(&config.store).await?;
    if store.has_table(table).await? {
        println!("{} table {} exists", "✓".green(), table.cyan());
    } else {
        println!("{} table {} does not exist", "✗".red(), table.cyan());
    }
    Ok(())
}

async fn serve(config: &MapperConfig, tables: &[String], bind: Option<&str>) -> Result<()> {
    if tables.is_empty() {
        bail!("at least one --table is required");
    }
    let store = ConnectionRegistry::global().connection(&config.store)?;
    let peer = Arc::new(RemotePeer::new());
    for table in tables {
        let mapper = Mapper::new(TableEntity::new(table), ExecutionContext::server(store.clone()))?;
        mapper
            .table_ready()
            .await
            .with_context(|| format!("cannot serve '{}'", table))?;
        peer.register_mapper(mapper);
    }

    let addr = bind.unwrap_or(&config.peer.bind_address);
    println!(
        "{} serving {} on {}",
        "▶".green(),
        tables.join(", ").cyan(),
        addr.white().bold()
    );
    isomapper::server::serve(peer, addr).await?;
    Ok(())
}

fn format_output(rows: &[Row], format: &OutputFormat) {
    if rows.is_empty() {
        println!("{}", "(no results)".dimmed());
        return;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(rows).unwrap_or_default());
        }
        OutputFormat::Table => {
            let columns: Vec<&String> = rows[0].keys().collect();
            let widths: Vec<usize> = columns
                .iter()
                .map(|c| {
                    rows.iter()
                        .filter_map(|r| r.get(*c))
                        .map(|v| cell(v).chars().count())
                        .fold(c.chars().count(), usize::max)
                })
                .collect();

            let header: Vec<String> = columns
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{:w$}", c, w = w))
                .collect();
            println!("{}", header.join(" │ ").white().bold());

            let sep: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
            println!("{}", sep.join("─┼─").dimmed());

            for row in rows {
                let cells: Vec<String> = columns
                    .iter()
                    .zip(&widths)
                    .map(|(c, w)| format!("{:w$}", row.get(*c).map(cell).unwrap_or_default(), w = w))
                    .collect();
                println!("{}", cells.join(" │ "));
            }

            println!();
            println!("{} row(s) returned", rows.len().to_string().cyan());
        }
    }
}

fn cell(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
