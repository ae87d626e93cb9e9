use branchlink::automation::{
    AutoTimerState, AutomationOrchestrator, JsonFileStore, LocalTimer, StateStore, UiSink,
};
use branchlink::automation::state::StateStoreError;
use branchlink::config::{Config, ConfigError};
use branchlink::detect::hooks::install_hooks;
use branchlink::engine::{self, Engine, EngineCommand, EngineHandle, EngineOptions};
use branchlink::repo::discover_with_depth;
use branchlink::ticket::TicketCorrelator;
use clap::{Parser, Subcommand, ValueEnum};
use colored::control;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod console;

use console::{ConsoleSink, RepoStatus};

#[derive(Parser)]
#[command(name = "branchlink")]
#[command(version)]
#[command(about = "Follow git branch switches, link them to tickets and track time automatically")]
struct Cli {
    /// Workspace root(s) to search for repositories (default: current directory)
    #[arg(short, long = "workspace", global = true)]
    workspaces: Vec<PathBuf>,

    /// Config file (default: <workspace>/.branchlink/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch for branch switches and commits; reads commands from stdin
    Watch {
        #[arg(long, help = "Print events as JSON lines")]
        json: bool,
    },
    /// Show each repository's branch and linked ticket
    Status {
        #[arg(long, help = "Output results as JSON")]
        json: bool,
    },
    /// Print the raw HEAD pointer file of each repository
    Head,
    /// Flip an automation setting
    Toggle {
        #[arg(value_enum)]
        setting: Setting,
    },
    /// Install the post-checkout and post-commit hooks in every repository
    InstallHooks,
}

#[derive(Clone, Copy, ValueEnum)]
enum Setting {
    AutoStart,
    AutoLog,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Watch(#[from] branchlink::detect::WatchError),
}

/// Resolved workspace, config and state store
struct Context {
    workspaces: Vec<PathBuf>,
    config: Config,
    store: Arc<JsonFileStore>,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, CliError> {
        let workspaces = if cli.workspaces.is_empty() {
            vec![std::env::current_dir()?]
        } else {
            cli.workspaces.clone()
        };
        let primary = &workspaces[0];
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default_path(primary));
        let config = Config::load(&config_path)?;
        tracing::debug!(config = %config_path.display(), "configuration loaded");

        Ok(Self {
            store: Arc::new(JsonFileStore::for_workspace(primary)),
            workspaces,
            config,
        })
    }

    fn correlator(&self) -> Result<Arc<TicketCorrelator>, CliError> {
        Ok(Arc::new(TicketCorrelator::new(
            self.config.tracker.build()?,
            self.config.tracker.correlator_options(),
        )))
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "branchlink=debug"
    } else {
        "branchlink=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(command) = &cli.command else {
        println!("Branchlink v{}", env!("CARGO_PKG_VERSION"));
        println!("Try 'branchlink --help' for more information.");
        return;
    };

    let json = matches!(
        command,
        Commands::Watch { json: true } | Commands::Status { json: true }
    );
    control::set_override(!json);

    let result = match Context::load(&cli) {
        Ok(ctx) => match command {
            Commands::Watch { json } => run_watch(&ctx, *json).await,
            Commands::Status { json } => run_status(&ctx, *json).await,
            Commands::Head => run_head(&ctx),
            Commands::Toggle { setting } => run_toggle(&ctx, *setting),
            Commands::InstallHooks => run_install_hooks(&ctx),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_watch(ctx: &Context, json: bool) -> Result<(), CliError> {
    let ui: Arc<dyn UiSink> = Arc::new(ConsoleSink::new(json));
    let orchestrator = AutomationOrchestrator::new(
        ctx.correlator()?,
        ctx.config.accounting.build()?,
        Box::new(LocalTimer::new()),
        ctx.store.clone(),
        ui,
    );

    let engine = Engine::start(
        EngineOptions::from_config(ctx.workspaces.clone(), &ctx.config),
        orchestrator,
        engine::hook_integration(),
    )
    .await;
    if engine.repositories().is_empty() {
        tracing::warn!("no git repositories found in the workspace");
    }

    let handle = engine.handle();
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let stdin_handle = handle.clone();
    let stdin_cancel = cancel.clone();
    tokio::spawn(async move {
        read_commands(stdin_handle, json).await;
        stdin_cancel.cancel();
    });

    engine.run(cancel).await;
    Ok(())
}

/// Console commands, one per line, until `quit` or end of input
async fn read_commands(handle: EngineHandle, json: bool) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                return;
            }
        };
        let line = line.trim();
        let (word, rest) = line.split_once(' ').unwrap_or((line, ""));

        match word {
            "" => {}
            "refresh" => {
                handle.refresh();
            }
            "auto-start" => {
                // The orchestrator reports the new value through the sink
                handle.toggle_auto_start().await;
            }
            "auto-log" => {
                handle.toggle_auto_log().await;
            }
            "commit" if rest.trim().is_empty() => println!("usage: commit <message>"),
            "commit" => {
                if let Some(outcome) = handle.log_commit(rest).await {
                    if json {
                        if let Ok(text) = serde_json::to_string(&outcome) {
                            println!("{text}");
                        }
                    } else {
                        console::show_commit_outcome(&outcome);
                    }
                }
            }
            "status" => {
                if let Some(status) = handle.status().await {
                    if json {
                        if let Ok(text) = serde_json::to_string(&status) {
                            println!("{text}");
                        }
                    } else {
                        console::show_engine_status(&status);
                    }
                }
            }
            "watchers" => {
                if let Some(watchers) = handle.watchers().await {
                    console::show_watchers(&watchers);
                }
            }
            "head" => {
                if let Some(heads) = handle.head_contents().await {
                    console::show_heads(&heads);
                }
            }
            "recheck" => {
                handle.send(EngineCommand::Recheck);
            }
            "quit" | "exit" => {
                handle.shutdown();
                return;
            }
            other => println!(
                "unknown command '{other}' (refresh, recheck, auto-start, auto-log, commit <message>, status, watchers, head, quit)"
            ),
        }
    }
}

async fn run_status(ctx: &Context, json: bool) -> Result<(), CliError> {
    let handles = discover_with_depth(&ctx.workspaces, ctx.config.discovery.depth);
    let options = EngineOptions::from_config(ctx.workspaces.clone(), &ctx.config);
    let correlator = ctx.correlator()?;

    let mut repos = Vec::new();
    for handle in &handles {
        let status = match options.reader.read_branch(handle).await {
            Ok(branch) => RepoStatus {
                path: handle.root.clone(),
                ticket: correlator.correlate(&branch).await,
                branch: Some(branch),
                error: None,
            },
            Err(e) => RepoStatus {
                path: handle.root.clone(),
                branch: None,
                error: Some(e.to_string()),
                ticket: None,
            },
        };
        repos.push(status);
    }

    let settings = AutoTimerState::load(ctx.store.as_ref());
    console::show_status(&repos, &settings, json);
    Ok(())
}

fn run_head(ctx: &Context) -> Result<(), CliError> {
    let handles = discover_with_depth(&ctx.workspaces, ctx.config.discovery.depth);
    console::show_heads(&engine::head_contents(&handles));
    Ok(())
}

fn run_toggle(ctx: &Context, setting: Setting) -> Result<(), CliError> {
    let store: &dyn StateStore = ctx.store.as_ref();
    let mut state = AutoTimerState::load(store);
    match setting {
        Setting::AutoStart => state.auto_start = !state.auto_start,
        Setting::AutoLog => state.auto_log = !state.auto_log,
    }
    state.save(store)?;
    println!(
        "auto-start {}, auto-log {}",
        if state.auto_start { "on" } else { "off" },
        if state.auto_log { "on" } else { "off" }
    );
    Ok(())
}

fn run_install_hooks(ctx: &Context) -> Result<(), CliError> {
    let handles = discover_with_depth(&ctx.workspaces, ctx.config.discovery.depth);
    if handles.is_empty() {
        println!("No git repositories found.");
        return Ok(());
    }
    for handle in &handles {
        let results = install_hooks(handle)?;
        console::show_hook_install(handle, &results);
    }
    Ok(())
}
