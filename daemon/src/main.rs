use std::path::Path;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;

use spoon::agent::AgentRegistry;
use spoon::config::Config;
use spoon::scheduler::Scheduler;
use spoon::sink;

/// Main daemon function.
///
/// The steps are:
/// - parse the CLI (`config generate` needs no config file and returns early)
/// - load, clean and validate the config file
/// - build the sink and every agent (construction errors abort startup)
/// - dispatch to the selected scheduling mode
///
/// About errors: we use `anyhow::Result` and `context` instead of `expect` to get
/// nicer error messages (`expect` prints errors with `Debug`).
fn main() -> anyhow::Result<()> {
    init_logger();

    let mut args = cli::Cli::parse();
    let command = args.command.take().unwrap_or(cli::Command::Run);

    if let cli::Command::Config(cli::ConfigArgs {
        command: cli::ConfigCommand::Generate,
    }) = command
    {
        let example = toml::to_string_pretty(&Config::example()).context("failed to serialize the example config")?;
        println!("{example}");
        return Ok(());
    }

    log::info!("Starting spoon v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Loading config from {}", args.config);
    let mut config = Config::load(Path::new(&args.config))?;
    config.clean_and_validate().context("invalid configuration")?;

    if let cli::Command::Config(cli::ConfigArgs {
        command: cli::ConfigCommand::Validate,
    }) = command
    {
        println!("No problems found in config from {}. Looks good to me!", args.config);
        return Ok(());
    }

    let sink = sink::build(&config.sink).context("failed to set up the metric sink")?;

    let registry = AgentRegistry::with_defaults();
    let mut scheduler = Scheduler::new(sink);
    for agent_config in config.agents {
        scheduler.add_agent(registry.build(agent_config)?);
    }

    match command {
        cli::Command::Run => {
            let running = scheduler.start()?;
            running.shutdown_on_ctrl_c();
            running.wait_for_shutdown();
            Ok(())
        }
        cli::Command::Once => scheduler.run_once(),
        cli::Command::Config(_) => unreachable!("config commands are handled before the scheduler starts"),
    }
}

/// Initializes the global logger.
fn init_logger() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
}

/// Daemon command-line interface (CLI).
///
/// We use `clap` to parse these options, therefore the structs
/// derive [`clap::Parser`] or other clap trait implementations.
mod cli {
    use clap::{Args, Parser, Subcommand};

    // NOTE: the doc comment attached to `Cli` is used by clap as the description of
    // the application. It is displayed at the start of the help message.

    /// Spoon is a simple metric gatherer for Linux systems. It runs a configurable
    /// set of gathering agents and forwards the results to a statsd-style sink.
    ///
    /// Spoon does not require root permissions to run, but might need them
    /// depending on which agents are configured.
    #[derive(Parser)]
    #[command(version)]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Option<Command>,

        /// Path to the config file.
        #[arg(long, env = "SPOON_CONFIG", default_value = "/etc/spoon.toml")]
        pub config: String,
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Run the agents continuously until interrupted.
        ///
        /// This is the default command.
        Run,

        /// Tick every enabled agent once, immediately, and then exit.
        ///
        /// The exit status reports whether every agent succeeded.
        Once,

        /// Manipulate the configuration.
        Config(ConfigArgs),
    }

    #[derive(Args)]
    pub struct ConfigArgs {
        #[command(subcommand)]
        pub command: ConfigCommand,
    }

    #[derive(Subcommand)]
    pub enum ConfigCommand {
        /// Generate a new example config and print it to stdout.
        Generate,

        /// Check the config file and report the problems found.
        Validate,
    }
}
