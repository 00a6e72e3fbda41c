// pdk: run hosted CI pipelines on your own machine.

mod commands;
mod logging;
mod output;
mod update_check;

use clap::{Args, Parser, Subcommand, ValueEnum};
use commands::AppContext;
use pdk_core::{LogLevel, SecretMasker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(
    name = "pdk",
    version,
    about = "Run GitHub Actions and Azure DevOps pipelines locally",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Debug, Clone, Args)]
struct GlobalOpts {
    /// Pipeline file (auto-detected when omitted).
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// More output.
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Trace-level output.
    #[arg(long, global = true)]
    trace: bool,

    /// Warnings and errors only.
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Errors only.
    #[arg(long, global = true)]
    silent: bool,

    /// Mirror log output to a file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Mirror log output to a JSON-lines file.
    #[arg(long, global = true)]
    log_json: Option<PathBuf>,

    /// Disable secret redaction in all output.
    #[arg(long, global = true)]
    no_redact: bool,
}

impl GlobalOpts {
    fn log_level(&self) -> LogLevel {
        if self.silent {
            LogLevel::Silent
        } else if self.quiet {
            LogLevel::Quiet
        } else if self.trace {
            LogLevel::Trace
        } else if self.verbose {
            LogLevel::Verbose
        } else {
            LogLevel::Normal
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Args)]
struct RunArgs {
    /// Validate and show the execution plan without running anything.
    #[arg(short = 'n', long)]
    dry_run: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Run only this job (repeatable).
    #[arg(long = "job")]
    jobs: Vec<String>,

    /// Run only steps matching this name (repeatable).
    #[arg(long = "step")]
    steps: Vec<String>,

    /// 1-based step indices, e.g. "1,3-5,7".
    #[arg(long)]
    step_index: Option<String>,

    /// Step range, numeric "2-5" or named "\"Build\"-\"Test\"".
    #[arg(long)]
    step_range: Option<String>,

    /// Skip steps matching this name (repeatable).
    #[arg(long = "skip-step")]
    skip_steps: Vec<String>,

    /// Variable overlay, KEY=VALUE (repeatable).
    #[arg(long = "var")]
    vars: Vec<String>,

    /// Run steps directly on this machine.
    #[arg(long, conflicts_with = "docker")]
    host: bool,

    /// Require the Docker driver.
    #[arg(long)]
    docker: bool,

    /// Re-run on file changes. Mutually exclusive with --dry-run.
    #[arg(long, conflicts_with = "dry_run")]
    watch: bool,

    /// Workspace root (defaults to the current directory).
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Per-step timeout: 90, 30s, 10m, 2h.
    #[arg(long)]
    timeout: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[derive(Debug, Clone, Args)]
struct ValidateArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    #[arg(long = "var")]
    vars: Vec<String>,

    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct WatchArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Debounce window in milliseconds.
    #[arg(long, default_value_t = pdk_core::constants::DEFAULT_DEBOUNCE_MS)]
    debounce: u64,
}

#[derive(Debug, Subcommand)]
enum SecretCommands {
    /// Store a secret (value read from stdin when omitted).
    Set { name: String, value: Option<String> },
    /// Print a secret value.
    Get { name: String },
    /// Remove a secret.
    Delete { name: String },
    /// List secret names.
    List,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute the pipeline.
    Run(RunArgs),
    /// Show the jobs and steps of the pipeline.
    List(ListArgs),
    /// Validate the pipeline without executing it.
    Validate(ValidateArgs),
    /// Check the local environment (docker, git, pipeline files).
    Doctor,
    /// Print version information.
    Version,
    /// Pick and run jobs interactively.
    Interactive,
    /// Manage the encrypted secret store.
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },
    /// Run the pipeline and re-run it on file changes.
    Watch(WatchArgs),
}

fn main() {
    let cli = Cli::parse();

    let masker = Arc::new(SecretMasker::new());
    if let Err(e) = logging::init(
        cli.global.log_level(),
        Arc::clone(&masker),
        cli.global.no_redact,
        cli.global.log_file.as_deref(),
        cli.global.log_json.as_deref(),
    ) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(1);
    }

    // Ctrl-C cancels the top-level token; everything in flight observes
    // it cooperatively.
    let cancel = CancellationToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("cancellation requested");
        handler_token.cancel();
    }) {
        tracing::debug!("could not install signal handler: {e}");
    }

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("failed to start runtime: {e}");
            std::process::exit(1);
        }
    };

    let exit_code = runtime.block_on(dispatch(cli, masker, cancel));
    std::process::exit(exit_code);
}

async fn dispatch(cli: Cli, masker: Arc<SecretMasker>, cancel: CancellationToken) -> i32 {
    update_check::maybe_check();

    let workspace = |ws: &Option<PathBuf>| {
        ws.clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    };

    match cli.command {
        Commands::Run(args) => {
            let app = AppContext::bootstrap(workspace(&args.workspace), masker);
            commands::run::execute(args, &cli.global, app, cancel).await
        }
        Commands::Watch(args) => {
            let app = AppContext::bootstrap(workspace(&args.run.workspace), masker);
            commands::watch::execute(args.run, args.debounce, &cli.global, app, cancel).await
        }
        Commands::List(args) => {
            let app = AppContext::bootstrap(workspace(&None), masker);
            commands::list::execute(&args, &cli.global, app)
        }
        Commands::Validate(args) => {
            let app = AppContext::bootstrap(workspace(&args.workspace), masker);
            commands::validate::execute(&args, &cli.global, app)
        }
        Commands::Doctor => {
            let app = AppContext::bootstrap(workspace(&None), masker);
            commands::doctor::execute(&cli.global, app).await
        }
        Commands::Version => {
            println!("pdk {}", pdk_core::constants::PDK_VERSION);
            0
        }
        Commands::Interactive => {
            let app = AppContext::bootstrap(workspace(&None), masker);
            commands::interactive::execute(&cli.global, app, cancel).await
        }
        Commands::Secret { command } => {
            let app = AppContext::bootstrap(workspace(&None), masker);
            commands::secret::execute(command, app)
        }
    }
}
