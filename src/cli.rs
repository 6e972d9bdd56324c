// CLI module - command-line argument parsing
//
// Subcommands:
// - demo: run the simulated end-to-end session (default)
// - config --show / --path: inspect effective configuration

use clap::{Parser, Subcommand};

use rspy::config::{Config, VERSION};

/// rspy - runtime observability core for live React pages
#[derive(Parser)]
#[command(name = "rspy")]
#[command(version = VERSION)]
#[command(about = "Component instrumentation and telemetry capture for React pages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the demo against a simulated page
    Demo {
        /// Write captured telemetry to a JSONL session file
        #[arg(long)]
        export: bool,
    },
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Handle terminal CLI commands. Returns true if one was handled (exit after).
pub fn handle_config_command(command: &Commands) -> bool {
    let Commands::Config { show, path } = command else {
        return false;
    };

    if *path || !*show {
        match Config::config_path() {
            Some(p) => println!("{}", p.display()),
            None => println!("(no home directory; config file unavailable)"),
        }
    }
    if *show {
        println!("{:#?}", Config::load());
    }
    true
}
