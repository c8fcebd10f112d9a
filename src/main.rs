use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::Parser as ClapParser;
use clap::Subcommand;
use data_lineage::{
    catalog::{
        CatalogDefinition, CatalogGateway, CatalogReader, InMemoryCatalog, Schema, SourceId,
    },
    config::{Config, SqlDialect},
    scan::{
        CatalogDefinitionScanner, ConnectionInfo, ScanJob, ScanJobId, ScanJobStatus, ScanQueue,
    },
    service::{AnalyzeRequest, LineageService},
};
use serde::Serialize;

#[derive(clap::Parser)]
#[command(name = "data-lineage")]
#[command(about = "SQL column-level lineage binder and recorder", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// SQL dialect; overrides the configuration file.
    #[arg(long, global = true)]
    dialect: Option<SqlDialect>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the tables read and the columns produced by the statements of a SQL file.
    Parse(ParseCommand),
    /// Record one run of a job: bind its SQL, extract lineage, persist the execution.
    Analyze(AnalyzeCommand),
    /// Refresh the catalog metadata of a source through the scan queue.
    Scan(ScanCommand),
}

#[derive(clap::Args)]
struct CatalogArgs {
    /// Path to the catalog definition (JSON, or TOML with a `.toml` extension).
    #[arg(short, long)]
    catalog: PathBuf,
    /// Name of the analysed source in the catalog.
    #[arg(short, long)]
    source: String,
    /// Pretty-print the output.
    #[arg(long)]
    pretty: bool,
}

#[derive(clap::Args)]
struct ParseCommand {
    #[command(flatten)]
    catalog: CatalogArgs,
    #[arg(value_name = "SQL_FILE")]
    sql: PathBuf,
}

#[derive(clap::Args)]
struct AnalyzeCommand {
    #[command(flatten)]
    catalog: CatalogArgs,
    /// Job name.
    #[arg(short, long)]
    job: String,
    /// Execution start, `YYYY-MM-DDTHH:MM:SS`.
    #[arg(long)]
    start: String,
    /// Execution end, `YYYY-MM-DDTHH:MM:SS`.
    #[arg(long)]
    end: String,
    #[arg(value_name = "SQL_FILE")]
    sql: PathBuf,
}

#[derive(clap::Args)]
struct ScanCommand {
    #[command(flatten)]
    catalog: CatalogArgs,
    /// Metadata the scan reads instead of a live database (JSON, or TOML with a `.toml` extension).
    #[arg(long)]
    definition: PathBuf,
    #[arg(long, default_value = "localhost")]
    host: String,
    #[arg(long, default_value_t = 5432)]
    port: u16,
    #[arg(long, default_value = "")]
    database: String,
    #[arg(long, default_value = "")]
    user: String,
}

const SCAN_PASSWORD_ENV: &str = "DATA_LINEAGE_SCAN_PASSWORD";

#[derive(Serialize)]
struct ScanReport {
    job: ScanJob,
    schemas: Vec<Schema>,
}

fn load_definition(path: &Path) -> anyhow::Result<CatalogDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
    let definition: CatalogDefinition = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&content).map_err(|err| {
            anyhow!(
                "Failed to parse TOML catalog in file {} due to error: {}",
                path.display(),
                err
            )
        })?
    } else {
        serde_json::from_str(&content).map_err(|err| {
            anyhow!(
                "Failed to parse JSON catalog in file {} due to error: {}",
                path.display(),
                err
            )
        })?
    };
    Ok(definition)
}

fn load_catalog(path: &Path) -> anyhow::Result<InMemoryCatalog> {
    Ok(InMemoryCatalog::from_definition(&load_definition(path)?)?)
}

fn source_id(catalog: &InMemoryCatalog, name: &str) -> anyhow::Result<SourceId> {
    let source = catalog
        .begin()?
        .get_source_by_name(name)?
        .ok_or_else(|| anyhow!("Source `{}` is not in the catalog.", name))?;
    Ok(source.id)
}

fn read_sql(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read sql file {}", path.display()))
}

async fn wait_for_scan(queue: &ScanQueue, id: ScanJobId) -> anyhow::Result<ScanJobStatus> {
    loop {
        let status = queue.get_status(id)?;
        if status.is_terminal() {
            return Ok(status);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn run_scan(command: &ScanCommand, config: &Config) -> anyhow::Result<ScanReport> {
    let catalog = load_catalog(&command.catalog.catalog)?;
    let source_id = source_id(&catalog, &command.catalog.source)?;
    let definition = load_definition(&command.definition)?;
    let scanner = CatalogDefinitionScanner::new(catalog.clone(), definition);
    let connection = ConnectionInfo {
        user: command.user.clone(),
        password: std::env::var(SCAN_PASSWORD_ENV).unwrap_or_default(),
        database: command.database.clone(),
        host: command.host.clone(),
        port: command.port,
    };

    let runtime = tokio::runtime::Runtime::new().context("Failed to start the scan runtime")?;
    let job = runtime.block_on(async {
        let queue = ScanQueue::from_config(&config.scan, Arc::new(scanner));
        let job = queue.enqueue(connection, source_id)?;
        let status = wait_for_scan(&queue, job.id).await?;
        queue.shutdown().await;
        anyhow::Ok(ScanJob { id: job.id, status })
    })?;

    let schemas = catalog.begin()?.get_schemas(source_id)?;
    Ok(ScanReport { job, schemas })
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<String> {
    Ok(if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    })
}

fn main() -> anyhow::Result<()> {
    let now = Instant::now();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.log.level.as_str()),
    )
    .init();
    let dialect = cli.dialect.unwrap_or(config.parser.dialect);

    let out_str = match &cli.command {
        Commands::Parse(command) => {
            let catalog = load_catalog(&command.catalog.catalog)?;
            let source_id = source_id(&catalog, &command.catalog.source)?;
            let service = LineageService::new(catalog, dialect);
            let summary = service.parse(&read_sql(&command.sql)?, source_id)?;
            to_json(&summary, command.catalog.pretty)?
        }
        Commands::Analyze(command) => {
            let catalog = load_catalog(&command.catalog.catalog)?;
            let source_id = source_id(&catalog, &command.catalog.source)?;
            let service = LineageService::new(catalog, dialect);
            let summary = service.analyze(&AnalyzeRequest {
                query: read_sql(&command.sql)?,
                name: command.job.clone(),
                start_time: command.start.clone(),
                end_time: command.end.clone(),
                source_id,
            })?;
            to_json(&summary, command.catalog.pretty)?
        }
        Commands::Scan(command) => to_json(&run_scan(command, &config)?, command.catalog.pretty)?,
    };
    println!("{}", out_str);

    let elapsed = now.elapsed();
    log::info!("Elapsed: {:.2?}", elapsed);

    Ok(())
}
