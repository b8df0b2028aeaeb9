use std::{env, env::VarError};

use clap::Parser;

/// Loyalty points server.
///
/// Flags are overridden by the corresponding environment variables.
#[derive(Debug, Clone, Default, Parser)]
#[command(version, about)]
pub struct Cli {
    /// The address to listen on, e.g. `localhost:8080`. Overridden by RUN_ADDRESS.
    #[arg(short = 'a', long = "address")]
    pub run_address: Option<String>,
    /// The database URL. Overridden by DATABASE_URI.
    #[arg(short = 'd', long = "database")]
    pub database_uri: Option<String>,
    /// The base URL of the accrual service. Overridden by ACCRUAL_SYSTEM_ADDRESS.
    #[arg(short = 'r', long = "accrual")]
    pub accrual_address: Option<String>,
    /// Print the environment variables the server reads, and exit.
    #[arg(long)]
    pub show_env: bool,
}

/// Parses the command line. Returns `None` if the server should not start.
pub fn handle_command_line_args() -> Option<Cli> {
    let cli = Cli::parse();
    if cli.show_env {
        display_envs();
        return None;
    }
    Some(cli)
}

fn display_envs() {
    // DATABASE_URI is left out on purpose, since it may carry credentials
    const DISPLAY_ENVS: [&str; 8] = [
        "RUST_LOG",
        "RUN_ADDRESS",
        "ACCRUAL_SYSTEM_ADDRESS",
        "ACCRUAL_POLL_INTERVAL",
        "ACCRUAL_WORKERS",
        "ACCRUAL_QUEUE_CAPACITY",
        "ACCRUAL_SHUTDOWN_TIMEOUT",
        "ACCRUAL_SKIP_MIGRATIONS",
    ];

    println!("Current environment values (EXCLUDING variables that contain secrets):");
    DISPLAY_ENVS.iter().for_each(|&name| {
        let val = match env::var(name) {
            Ok(s) => s,
            Err(VarError::NotPresent) => "Not set".into(),
            Err(VarError::NotUnicode(s)) => format!("Invalid value: {}", s.to_string_lossy()),
        };
        println!("  {name:<35} {val:<15}");
    })
}
