use clap::{Args, Parser, Subcommand, ValueEnum};
use solbatch::config::{
    load_app_config, load_identifiers, load_run_config, load_templates, AppConfig, RunConfig,
    RunMode, TemplateSet,
};
use solbatch::db::{Database, SqlDialect};
use solbatch::error::{common, describe_error_code, BatchError, ErrorCode};
use solbatch::execution::{build_work_items, BatchReport, BatchRunner, BatchSettings};
use solbatch::execution::TerminalProgressObserver;
use solbatch::spool::ensure_unambiguous_names;
use solbatch::statements::plan_statements;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::EnvFilter;

/// Exit code of a strict run that finished with failed items
const EXIT_STRICT_FAILURES: i32 = 2;

/// Run SOL batch extracts and inserts against a database
#[derive(Parser)]
#[command(name = "solbatch", version)]
#[command(about = "Run SOL batch extracts and inserts against a database", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Application config (database, concurrency, log and SOL file paths)
    #[arg(long, value_name = "PATH")]
    app_config: PathBuf,

    /// Run config (package, procedures, output layout)
    #[arg(long, value_name = "PATH")]
    run_config: PathBuf,

    /// E/extract or I/insert
    #[arg(short, long, value_parser = parse_mode)]
    mode: RunMode,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DialectArg {
    Oracle,
    Postgres,
}

impl From<DialectArg> for SqlDialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Oracle => SqlDialect::Oracle,
            DialectArg::Postgres => SqlDialect::Postgres,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the batch
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        /// Exit with code 2 when any item or merge failed
        #[arg(long)]
        strict: bool,

        /// Disable the terminal progress bar (progress is still logged)
        #[arg(long)]
        no_progress: bool,
    },
    /// Validate every input and print the statements without touching the database
    Check {
        #[command(flatten)]
        inputs: InputArgs,

        /// SQL dialect used to render the statements
        #[arg(long, value_enum, default_value_t = DialectArg::Postgres)]
        dialect: DialectArg,
    },
}

fn parse_mode(value: &str) -> Result<RunMode, String> {
    value.parse::<RunMode>().map_err(|e| e.user_message())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,sqlx=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose >= 2)
        .with_thread_ids(cli.verbose >= 3)
        .with_line_number(cli.verbose >= 3)
        .with_writer(std::io::stderr)
        .init();

    debug!("solbatch started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Run {
            inputs,
            strict,
            no_progress,
        } => run_batch(inputs, strict, no_progress).await,
        Commands::Check { inputs, dialect } => run_check(inputs, dialect.into()).await,
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            if let Some(batch) = e.downcast_ref::<BatchError>() {
                debug!(
                    code = batch.code(),
                    kind = describe_error_code(batch.code()),
                    "Error classification"
                );
            }
            error!("Fatal error: {}", e);
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

struct Inputs {
    app: AppConfig,
    run: RunConfig,
    identifiers: Vec<String>,
    templates: TemplateSet,
}

fn ensure_exists(path: &Path) -> Result<(), BatchError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(common::config_not_found(path))
    }
}

async fn load_inputs(args: &InputArgs) -> anyhow::Result<Inputs> {
    ensure_exists(&args.app_config)?;
    ensure_exists(&args.run_config)?;

    let app = load_app_config(&args.app_config).await?;
    let run = load_run_config(&args.run_config, args.mode).await?;
    let identifiers = load_identifiers(&app.sol_file_path).await?;
    let templates = match args.mode {
        RunMode::Extract => load_templates(&run.template_path, &run.procedures)?,
        RunMode::Insert => TemplateSet::new(),
    };
    info!(
        mode = %args.mode,
        identifiers = identifiers.len(),
        procedures = run.procedures.len(),
        concurrency = app.concurrency,
        "Loaded run inputs"
    );
    Ok(Inputs {
        app,
        run,
        identifiers,
        templates,
    })
}

#[cfg_attr(not(feature = "postgres"), allow(unreachable_code))]
async fn run_batch(args: InputArgs, strict: bool, no_progress: bool) -> anyhow::Result<i32> {
    let inputs = load_inputs(&args).await?;
    let strict = strict || inputs.run.strict;
    let settings = BatchSettings::from_configs(&inputs.app, &inputs.run, args.mode);
    let total = (inputs.identifiers.len() * inputs.run.procedures.len()) as u64;

    let backend = connect(&inputs.app).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let mut runner = BatchRunner::new(backend.database(), settings).with_cancellation(cancel);
    if !no_progress && std::io::stderr().is_terminal() {
        runner = runner.with_observer(Box::new(TerminalProgressObserver::new(total)));
    }

    let result = runner.run(inputs.identifiers, inputs.templates).await;
    backend.close().await;
    let report = result?;

    print_report(&report);
    if strict && report.has_failures() {
        warn!(failed = report.failed, merge_errors = report.merge_errors.len(), "Strict mode: run had failures");
        return Ok(EXIT_STRICT_FAILURES);
    }
    Ok(0)
}

fn print_report(report: &BatchReport) {
    println!(
        "{} {} items: {} succeeded, {} failed{}",
        report.mode,
        report.total,
        report.succeeded,
        report.failed,
        if report.cancelled {
            format!(
                ", cancelled ({} abandoned, {} not started)",
                report.abandoned, report.not_started
            )
        } else {
            String::new()
        }
    );
    println!("Execution log: {}", report.log_path.display());
    println!("Summary:       {}", report.summary_path.display());
    for merge in &report.merges {
        println!(
            "Merged {} spool files ({} lines) into {}",
            merge.files_merged,
            merge.lines,
            merge.path.display()
        );
    }
    for e in &report.merge_errors {
        println!("Merge error: {}", e.user_message());
    }
}

async fn run_check(args: InputArgs, dialect: SqlDialect) -> anyhow::Result<i32> {
    let inputs = load_inputs(&args).await?;
    if args.mode == RunMode::Extract {
        ensure_unambiguous_names(&inputs.run.procedures, &inputs.identifiers)?;
    }
    let items = build_work_items(&inputs.identifiers, &inputs.run.procedures);
    let plans = plan_statements(
        dialect,
        args.mode,
        &inputs.run.procedures,
        &inputs.run.package_name,
        &inputs.templates,
        &inputs.run.identifier_column,
    )?;

    println!("Mode:        {}", args.mode);
    println!("Identifiers: {}", inputs.identifiers.len());
    println!("Procedures:  {}", inputs.run.procedures.len());
    println!("Work items:  {}", items.len());
    println!("Workers:     {}", inputs.app.concurrency);
    for plan in &plans {
        println!("{}: {}", plan.key, plan.sql);
    }
    Ok(0)
}

/// Database handle plus whatever must be shut down after the run
#[cfg(feature = "postgres")]
struct Backend {
    pg: Arc<solbatch::db::postgres::PgDatabase>,
}

#[cfg(feature = "postgres")]
impl Backend {
    fn database(&self) -> Arc<dyn Database> {
        self.pg.clone()
    }

    async fn close(&self) {
        self.pg.close().await;
    }
}

/// Without a backend feature no value of this type exists
#[cfg(not(feature = "postgres"))]
enum Backend {}

#[cfg(not(feature = "postgres"))]
impl Backend {
    fn database(&self) -> Arc<dyn Database> {
        match *self {}
    }

    async fn close(&self) {
        match *self {}
    }
}

#[cfg(feature = "postgres")]
async fn connect(app: &AppConfig) -> Result<Backend, BatchError> {
    let pg = solbatch::db::postgres::PgDatabase::connect(
        &app.connection_url(),
        app.concurrency,
        app.connection_max_lifetime,
    )
    .await
    .map_err(|e| {
        BatchError::setup_with_code(ErrorCode::SETUP_CONNECT_FAILED, e.to_string(), None)
    })?;
    Ok(Backend { pg: Arc::new(pg) })
}

#[cfg(not(feature = "postgres"))]
async fn connect(_app: &AppConfig) -> Result<Backend, BatchError> {
    Err(BatchError::setup_with_code(
        ErrorCode::SETUP_BACKEND_UNAVAILABLE,
        "no database backend compiled in; rebuild with `--features postgres`",
        None,
    ))
}
