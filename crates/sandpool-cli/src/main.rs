use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use sandpool_core::config::{ConfigLoader, SandboxConfig};
use sandpool_core::executors::{ExecutionRequest, PooledCodeExecutor};
use sandpool_core::language::Language;
use sandpool_core::pool::ContainerPool;
use sandpool_core::runtime::InMemoryRuntime;
use sandpool_core::security::analyze_code_safety;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(name = "sandpool", author, version = "0.1.0", about = "Sandboxed code execution pool")]
struct Cli {
    #[clap(subcommand)]
    command: Commands,

    #[clap(long, short, help = "YAML configuration file; SANDBOX_* variables still apply")]
    config: Option<PathBuf>,

    #[clap(long, short, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the static security gate over a source file
    Analyze {
        file: PathBuf,
        #[clap(long, help = "Source language; guessed from the file extension when omitted")]
        language: Option<String>,
    },
    /// Execute a source file in a pooled sandbox container
    Run {
        file: PathBuf,
        #[clap(long)]
        language: Option<String>,
        #[clap(long, default_value = "{}", help = "JSON object passed to the program's main")]
        args: String,
        #[clap(long, help = "Use an in-memory runtime instead of the container engine")]
        dry_run: bool,
        #[clap(long, help = "Fail at once instead of waiting when every container is busy")]
        no_wait: bool,
    },
    /// Provision the pools, print their status and tear them down
    PoolCheck {
        #[clap(long, help = "Containers per language; defaults to the configured pool size")]
        size: Option<usize>,
        #[clap(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level_filter = cli.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::Builder::new()
        .filter_level(log_level_filter)
        .init();

    let config = match &cli.config {
        Some(path) => ConfigLoader::from_file(path).await?,
        None => ConfigLoader::from_env()?,
    };

    match cli.command {
        Commands::Analyze { file, language } => analyze(&file, language.as_deref()).await,
        Commands::Run {
            file,
            language,
            args,
            dry_run,
            no_wait,
        } => run(config, &file, language.as_deref(), &args, dry_run, no_wait).await,
        Commands::PoolCheck { size, dry_run } => pool_check(config, size, dry_run).await,
    }
}

fn resolve_language(file: &Path, language: Option<&str>) -> Result<Language> {
    if let Some(language) = language {
        return Ok(language.parse()?);
    }
    match file.extension().and_then(|ext| ext.to_str()) {
        Some("py") => Ok(Language::Python),
        Some("js") | Some("mjs") | Some("cjs") => Ok(Language::Nodejs),
        _ => anyhow::bail!(
            "Cannot tell the language of {}; pass --language",
            file.display()
        ),
    }
}

async fn read_source(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

fn build_pool(config: SandboxConfig, dry_run: bool) -> Result<Arc<ContainerPool>> {
    let pool = if dry_run {
        ContainerPool::new(Arc::new(InMemoryRuntime::new()), config)
    } else {
        ContainerPool::with_docker(config)?
    };
    Ok(Arc::new(pool))
}

async fn analyze(file: &Path, language: Option<&str>) -> Result<()> {
    let language = resolve_language(file, language)?;
    let code = read_source(file).await?;
    let verdict = analyze_code_safety(&code, language);

    println!("{}", serde_json::to_string_pretty(&verdict)?);
    if !verdict.is_safe {
        std::process::exit(1);
    }
    Ok(())
}

async fn run(
    config: SandboxConfig,
    file: &Path,
    language: Option<&str>,
    args: &str,
    dry_run: bool,
    no_wait: bool,
) -> Result<()> {
    let language = resolve_language(file, language)?;
    let code = read_source(file).await?;
    let arguments: serde_json::Value =
        serde_json::from_str(args).context("--args must be a JSON object")?;
    if !arguments.is_object() {
        anyhow::bail!("--args must be a JSON object");
    }

    let size = config.pool_size;
    let pool = build_pool(config, dry_run)?;
    let report = pool.init_pools(size).await;
    log::info!(
        "Provisioned {}/{} containers",
        report.succeeded,
        report.attempted
    );

    let executor = PooledCodeExecutor::new(pool.clone()).reject_when_busy(no_wait);
    let outcome = executor
        .execute(ExecutionRequest::new(language, code).with_arguments(arguments))
        .await;
    pool.teardown().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn pool_check(config: SandboxConfig, size: Option<usize>, dry_run: bool) -> Result<()> {
    let size = size.unwrap_or(config.pool_size);
    let pool = build_pool(config, dry_run)?;

    let report = pool.init_pools(size).await;
    let status = pool.status().await;
    pool.teardown().await;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "report": report,
            "pools": status,
        }))?
    );
    if !report.is_complete() {
        anyhow::bail!(
            "Only {} of {} containers could be provisioned",
            report.succeeded,
            report.attempted
        );
    }
    Ok(())
}
