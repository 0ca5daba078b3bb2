//! Stackweave CLI entrypoint.
//!
//! This is the main entrypoint for the stackweave command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use stackweave::cli::{Cli, Commands, LogFormat, ManifestCommands, OutputFormatter};
use stackweave::config::{
    ConfigParser, ConfigValidator, StackConfig, StateBackend, find_stack_file,
};
use stackweave::error::{ConfigError, Result, StackError};
use stackweave::provider::{EchoProvider, Provider};
use stackweave::reconciler::Reconciler;
use stackweave::state::{LocalManifestStore, ManifestStore, S3ManifestStore, STATE_DIR};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// A loaded stack with its store and the directory it lives in.
struct Workspace {
    config: StackConfig,
    store: Box<dyn ManifestStore>,
    base_dir: PathBuf,
}

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    init_logging(cli.verbose, cli.log_format);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(delay) = e.retry_delay_secs() {
                eprintln!("This error is usually temporary, retry in {delay}s.");
            }
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// Logs go to stderr so that stdout only carries command output.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate { warnings } => cmd_validate(config_path, warnings, &formatter),
        Commands::Plan => cmd_plan(config_path, &formatter).await,
        Commands::Apply {
            yes,
            concurrency,
            dry_run,
            timeout,
        } => {
            let overrides = ApplyOverrides {
                concurrency,
                dry_run,
                timeout,
            };
            cmd_apply(config_path, yes, overrides, &formatter).await
        }
        Commands::Sync { target } => cmd_sync(config_path, &target, &formatter).await,
        Commands::Manifest { command } => cmd_manifest(config_path, command, &formatter).await,
    }
}

/// Validate the stack file.
fn cmd_validate(
    config_path: Option<&Path>,
    show_warnings: bool,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, _) = load_config(config_path)?;
    let result = ConfigValidator::new().check(&config);

    println!("{}", formatter.format_validation(&config, &result, show_warnings));

    if result.is_valid() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Show the apply plan.
async fn cmd_plan(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let workspace = load_workspace(config_path).await?;
    let provider = EchoProvider::new();

    let prepared = Reconciler::new(&workspace.config, &*workspace.store, &provider)
        .with_base_dir(&workspace.base_dir)
        .prepare()
        .await?;

    println!("{}", formatter.format_plan(&prepared.plan));
    Ok(ExitCode::SUCCESS)
}

/// Command-line overrides of the stack's execution settings.
struct ApplyOverrides {
    concurrency: Option<usize>,
    dry_run: bool,
    timeout: Option<u64>,
}

/// Execute the apply plan.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    overrides: ApplyOverrides,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let mut workspace = load_workspace(config_path).await?;

    let execution = &mut workspace.config.execution;
    if let Some(limit) = overrides.concurrency {
        if limit == 0 {
            return Err(ConfigError::validation("Concurrency must be greater than 0", "concurrency").into());
        }
        execution.concurrency_limit = limit;
    }
    execution.dry_run |= overrides.dry_run;
    if overrides.timeout.is_some() {
        execution.timeout_secs = overrides.timeout;
    }

    let provider = EchoProvider::new();
    info!("Using provider: {}", provider.name());

    let cancel = CancellationToken::new();
    let reconciler = Reconciler::new(&workspace.config, &*workspace.store, &provider)
        .with_base_dir(&workspace.base_dir)
        .with_timeout(workspace.config.execution.timeout_secs.map(Duration::from_secs))
        .with_cancellation(cancel.clone());

    let outcome = if workspace.config.execution.dry_run {
        interruptible(&cancel, reconciler.apply()).await?
    } else {
        let prepared = reconciler.prepare().await?;
        if prepared.is_up_to_date() {
            eprintln!("No changes to apply.");
            return Ok(ExitCode::SUCCESS);
        }

        eprintln!("{}", formatter.format_plan(&prepared.plan));

        if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ")? {
            eprintln!("Apply cancelled.");
            return Ok(ExitCode::SUCCESS);
        }

        interruptible(&cancel, reconciler.apply_prepared(prepared)).await?
    };

    println!("{}", formatter.format_outcome(&outcome));

    if outcome.success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Runs `pass`, cancelling it on Ctrl-C.
async fn interruptible<F: Future>(cancel: &CancellationToken, pass: F) -> F::Output {
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, letting in-flight calls finish");
                cancel.cancel();
            }
        })
    };

    let output = pass.await;
    interrupt.abort();
    output
}

/// Show the sync plan of one target.
async fn cmd_sync(
    config_path: Option<&Path>,
    target: &str,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = load_workspace(config_path).await?;
    let provider = EchoProvider::new();

    let plan = Reconciler::new(&workspace.config, &*workspace.store, &provider)
        .with_base_dir(&workspace.base_dir)
        .plan_sync(target)
        .await?;

    println!("{}", formatter.format_sync_plan(&plan));
    Ok(ExitCode::SUCCESS)
}

/// Manifest store commands.
async fn cmd_manifest(
    config_path: Option<&Path>,
    command: ManifestCommands,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let workspace = load_workspace(config_path).await?;
    let store = &workspace.store;

    match command {
        ManifestCommands::Show { target } => {
            if let Some(manifest) = store.load(&target).await? {
                println!("{}", formatter.format_manifest(&manifest));
            } else {
                eprintln!("No manifest stored for '{target}'.");
            }
        }
        ManifestCommands::History { limit } => {
            let history = store.load_history().await?;
            println!("{}", formatter.format_history(&history, limit));
        }
        ManifestCommands::Unlock { lock_id, force } => {
            if force {
                store.force_unlock().await?;
                eprintln!("Lock forcefully removed.");
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("Lock released.");
            } else if let Some(lock) = store.get_lock_info().await? {
                eprintln!(
                    "Locked by {} since {} (lock id {}, expires in {}s).",
                    lock.holder,
                    lock.acquired_at,
                    lock.lock_id,
                    lock.remaining_secs()
                );
                eprintln!("Pass --lock-id to release it or --force to remove it.");
                return Ok(ExitCode::FAILURE);
            } else {
                eprintln!("Store is not locked.");
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Asks for confirmation on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_stack_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads the stack file and returns it with its directory.
fn load_config(config_path: Option<&Path>) -> Result<(StackConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    let base_dir = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(&base_dir);
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    Ok((config, base_dir))
}

/// Loads and validates the stack, then opens its manifest store.
async fn load_workspace(config_path: Option<&Path>) -> Result<Workspace> {
    let (config, base_dir) = load_config(config_path)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    let store: Box<dyn ManifestStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config
                .state
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(STATE_DIR), |p| base_dir.join(p));
            debug!("Using local manifest store at {}", path.display());
            Box::new(LocalManifestStore::with_base_dir(path))
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| StackError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Box::new(S3ManifestStore::new(bucket, prefix, region).await)
        }
    };

    Ok(Workspace {
        config,
        store,
        base_dir,
    })
}
