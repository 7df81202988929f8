///
/// platsync-soak - Stress harness entry point
///
/// Loads an optional runtime config, applies command-line overrides, starts
/// the platsync runtime and runs one scenario for the requested number of
/// rounds:
/// - platsync-soak count: N increments then N waits
/// - platsync-soak drain: destroy with K blocked waiters
/// - platsync-soak timeout: timed wait latency window
/// - platsync-soak jobs: inline vs background AsyncJob results
///

mod errors;
mod scenarios;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use errors::SoakError;
use platsync_runtime::RuntimeConfig;
use scenarios::Report;

#[derive(Parser)]
#[command(name = "platsync-soak")]
#[command(author, version, about = "Stress scenarios for the platsync runtime", long_about = None)]
struct Cli {
    /// Runtime config file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overrides [logging] level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Worker stack size in bytes, overrides [threads] stack_size
    #[arg(long, global = true)]
    stack_size: Option<usize>,

    /// Worker thread name prefix, overrides [threads] name_prefix
    #[arg(long, global = true)]
    name_prefix: Option<String>,

    /// How many times to repeat the scenario
    #[arg(long, global = true, default_value_t = 1)]
    rounds: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Commands {
    /// Post N units from N threads, then take them from N threads
    Count {
        #[arg(short, long, default_value_t = 32)]
        n: usize,
    },

    /// Destroy a semaphore while K threads are blocked on it
    Drain {
        #[arg(short, long, default_value_t = 8)]
        k: usize,
    },

    /// Check that a timed wait returns inside its window
    Timeout {
        /// Requested wait in milliseconds
        #[arg(long, default_value_t = 100)]
        wait_ms: u32,

        /// Allowed lateness in milliseconds
        #[arg(long, default_value_t = 250)]
        slack_ms: u32,
    },

    /// Compare inline and background AsyncJob results
    Jobs {
        #[arg(short, long, default_value_t = 16)]
        n: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match build_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    let _runtime = match platsync_runtime::init(&config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error starting runtime: {}", e);
            std::process::exit(2);
        }
    };

    for round in 1..=cli.rounds.max(1) {
        match run(cli.command) {
            Ok(report) => {
                tracing::debug!(round, scenario = report.scenario, "round passed");
                println!("[{}/{}] {}", round, cli.rounds.max(1), report);
            }
            Err(e) => {
                tracing::error!(round, %e, "round failed");
                eprintln!("[{}/{}] FAILED: {}", round, cli.rounds.max(1), e);
                std::process::exit(1);
            }
        }
    }
}

fn run(command: Commands) -> Result<Report, SoakError> {
    match command {
        Commands::Count { n } => scenarios::count(n),
        Commands::Drain { k } => scenarios::drain(k),
        Commands::Timeout { wait_ms, slack_ms } => scenarios::timeout(wait_ms, slack_ms),
        Commands::Jobs { n } => scenarios::jobs(n),
    }
}

fn build_config(cli: &Cli) -> Result<RuntimeConfig, SoakError> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.to_lowercase();
    }
    if let Some(size) = cli.stack_size {
        config.threads.stack_size = Some(size);
    }
    if let Some(prefix) = &cli.name_prefix {
        config.threads.name_prefix = Some(prefix.clone());
    }

    let origin = cli.config.as_deref().unwrap_or(Path::new("<command line>"));
    config.validate(origin)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use platsync_runtime::SyncError;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("platsync-soak").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_without_config() {
        let cli = parse(&["count"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert!(matches!(cli.command, Commands::Count { n: 32 }));
        assert_eq!(cli.rounds, 1);
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[threads]\nname_prefix = \"from-file\"\nstack_size = 262144\n\n[logging]\nlevel = \"warn\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = parse(&[
            "--config",
            &path,
            "--log-level",
            "DEBUG",
            "--name-prefix",
            "soak",
            "drain",
            "-k",
            "4",
        ]);
        let config = build_config(&cli).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.threads.name_prefix.as_deref(), Some("soak"));
        assert_eq!(config.threads.stack_size, Some(262144));
        assert!(matches!(cli.command, Commands::Drain { k: 4 }));
    }

    #[test]
    fn test_invalid_override_is_rejected() {
        let cli = parse(&["--stack-size", "1024", "jobs"]);
        let err = build_config(&cli).unwrap_err();
        assert!(matches!(err, SoakError::Runtime(SyncError::Config { .. })));
    }

    #[test]
    fn test_run_dispatches_scenario() {
        let report = run(Commands::Jobs { n: 2 }).unwrap();
        assert_eq!(report.scenario, "jobs");
    }
}
