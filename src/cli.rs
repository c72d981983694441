use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Clone)]
#[command(version, about = "HTTP API and launcher for WanGP video generation")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(
        short = 'v',
        long = "verbose",
        global = true,
        action = clap::ArgAction::Count,
        help = "Enable verbose logging (-v for debug, -vv for trace)"
    )]
    pub verbose: u8,

    /// Path to the YAML configuration file
    #[arg(
        short = 'c',
        long = "config",
        global = true,
        value_name = "CONFIG_PATH",
        default_value = "config.yaml",
        help = "Configuration file path"
    )]
    pub config_path: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Clone, Debug, PartialEq)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve {
        /// Override the configured listen address
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Detect GPUs and print the recommended profile and attention backend
    Detect {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create the virtual environment and install packages matching the GPU
    Install,
    /// Build or pull the application image and run it with GPU access
    Launch,
}

impl Default for Command {
    fn default() -> Self {
        Command::Serve {
            host: None,
            port: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default() {
        let cli = Cli::parse_from(["wangp_server", "-v"]);
        assert_eq!(cli.verbose, 1);
        assert_eq!(cli.command.unwrap_or_default(), Command::default());
    }

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["wangp_server", "serve", "--port", "8000", "-c", "alt.yaml"]);
        assert_eq!(cli.config_path, PathBuf::from("alt.yaml"));
        assert_eq!(
            cli.command,
            Some(Command::Serve {
                host: None,
                port: Some(8000)
            })
        );

        let cli = Cli::parse_from(["wangp_server", "detect", "--json"]);
        assert_eq!(cli.command, Some(Command::Detect { json: true }));

        let cli = Cli::parse_from(["wangp_server", "install"]);
        assert_eq!(cli.command, Some(Command::Install));
    }
}
