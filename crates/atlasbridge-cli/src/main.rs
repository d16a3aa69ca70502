mod commands;
mod lab;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use atlasbridge_types::paths::DataDir;
use atlasbridge_types::ExitCode;

/// AtlasBridge -- human-in-the-loop prompt relay for CLI agents.
#[derive(Parser, Debug)]
#[command(name = "atlasbridge", version, about)]
struct Cli {
    /// Increase logging verbosity (same as RUST_LOG=debug)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Data directory override (default: $ATLASBRIDGE_HOME or ~/.atlasbridge)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a tool under supervision, relaying its prompts
    Run {
        /// Adapter to use (claude, codex, generic, or auto-detect)
        #[arg(long, default_value = "auto")]
        adapter: String,

        /// Human-readable session tag (e.g. "deploy-v2.1")
        #[arg(long)]
        label: Option<String>,

        /// Command and arguments to supervise
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        command: Vec<String>,
    },

    /// Start the background daemon (recovery + sweeping + channel)
    Start,

    /// Stop the background daemon
    Stop,

    /// Report sessions, prompt queues, and channel health
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,

        /// Refresh every two seconds
        #[arg(long)]
        watch: bool,
    },

    /// List supervised sessions
    Sessions,

    /// Show audit log entries (or the autopilot decision trace)
    Logs {
        /// Show only the last N entries
        #[arg(long)]
        tail: Option<usize>,

        /// Filter by session id
        #[arg(long)]
        session: Option<String>,

        /// Show the autopilot decision trace instead
        #[arg(long)]
        decisions: bool,
    },

    /// Self-diagnose the environment and state files
    Doctor {
        /// Repair what can be repaired (permissions, chain reset)
        #[arg(long)]
        fix: bool,
    },

    /// Policy tooling
    Policy {
        #[command(subcommand)]
        action: PolicyCommands,
    },

    /// Autopilot mode control and kill switch
    Autopilot {
        #[command(subcommand)]
        action: AutopilotCommands,
    },

    /// Deterministic regression scenarios
    Lab {
        #[command(subcommand)]
        action: LabCommands,
    },

    /// (internal) The daemon process entry point
    #[command(hide = true)]
    DaemonRun,
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    /// Parse and validate a policy file
    Validate { file: PathBuf },

    /// Evaluate the policy against a synthetic prompt
    Test {
        /// Policy file (defaults to the data directory's policy.yaml)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Prompt excerpt to evaluate
        #[arg(long)]
        excerpt: String,

        /// Prompt type (yes_no, confirm_enter, multiple_choice, free_text)
        #[arg(long, default_value = "yes_no")]
        prompt_type: String,

        /// Detection confidence (low, medium, high)
        #[arg(long, default_value = "high")]
        confidence: String,

        /// Tool name
        #[arg(long, default_value = "*")]
        tool: String,
    },

    /// Migrate a v0 policy file to v1 (writes a .bak of the original)
    Migrate { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum AutopilotCommands {
    /// Set the autopilot mode
    Mode {
        /// off, assist, or full
        mode: String,
    },

    /// Kill switch: route everything to the human
    Pause,

    /// Lift the kill switch
    Resume,
}

#[derive(Subcommand, Debug)]
enum LabCommands {
    /// Run one scenario, or all of them
    Run {
        /// Scenario name (see `lab run --all` output for the list)
        scenario: Option<String>,

        /// Run every scenario
        #[arg(long)]
        all: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let data_dir = match resolve_data_dir(cli.data_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Cannot resolve the data directory: {e}.");
            eprintln!("Set ATLASBRIDGE_HOME or pass --data-dir. (exit {})", ExitCode::Config.code());
            std::process::exit(ExitCode::Config.code());
        }
    };

    let code = match cli.command {
        Commands::Run {
            adapter,
            label,
            command,
        } => commands::run::execute(&data_dir, &adapter, label, command),
        Commands::Start => commands::daemon::start(&data_dir),
        Commands::Stop => commands::daemon::stop(&data_dir),
        Commands::DaemonRun => commands::daemon::daemon_run(&data_dir),
        Commands::Status { json, watch } => commands::status::execute(&data_dir, json, watch),
        Commands::Sessions => commands::sessions::execute(&data_dir),
        Commands::Logs {
            tail,
            session,
            decisions,
        } => commands::logs::execute(&data_dir, tail, session.as_deref(), decisions),
        Commands::Doctor { fix } => commands::doctor::execute(&data_dir, fix),
        Commands::Policy { action } => match action {
            PolicyCommands::Validate { file } => commands::policy::validate(&file),
            PolicyCommands::Test {
                file,
                excerpt,
                prompt_type,
                confidence,
                tool,
            } => commands::policy::test(
                &data_dir,
                file.as_deref(),
                &excerpt,
                &prompt_type,
                &confidence,
                &tool,
            ),
            PolicyCommands::Migrate { file } => commands::policy::migrate(&file),
        },
        Commands::Autopilot { action } => match action {
            AutopilotCommands::Mode { mode } => commands::autopilot::set_mode(&data_dir, &mode),
            AutopilotCommands::Pause => commands::autopilot::pause(&data_dir),
            AutopilotCommands::Resume => commands::autopilot::resume(&data_dir),
        },
        Commands::Lab { action } => match action {
            LabCommands::Run { scenario, all } => lab::execute(scenario.as_deref(), all),
        },
    };

    std::process::exit(code.code());
}

fn resolve_data_dir(flag: Option<PathBuf>) -> Result<DataDir, atlasbridge_types::BridgeError> {
    match flag {
        Some(dir) => Ok(DataDir::at(dir)),
        None => DataDir::resolve(),
    }
}
