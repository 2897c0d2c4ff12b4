// Command Line Interface Module
// clap-based entry points for running and inspecting the container

pub mod commands;

use clap::{Parser, Subcommand};
use colored::*;

/// Pear Container - servlet-style application container
#[derive(Parser)]
#[command(name = "pear")]
#[command(author = "Pear Server Team")]
#[command(version)]
#[command(about = "🍐 Pear Container - hosts web applications behind filter chains and servlet pools", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the container and serve the configured contexts
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = "pear.toml")]
        config: String,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a configuration file and every descriptor it names
    Validate {
        /// Configuration file to validate
        #[arg(short, long, default_value = "pear.toml")]
        file: String,
    },

    /// Print the servlet and filter mappings of each configured context
    Routes {
        /// Configuration file path
        #[arg(short, long, default_value = "pear.toml")]
        config: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue().bold(), msg);
}

/// Print a warning message
pub fn warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}

/// Print the Pear Container banner
pub fn print_banner() {
    println!("{}", format!(r#"
╔═══════════════════════════════════════════════════════════╗
║                                                           ║
║   🍐  PEAR CONTAINER  v{:<10}                         ║
║                                                           ║
║   Servlet-style application container                     ║
║                                                           ║
╚═══════════════════════════════════════════════════════════╝
    "#, env!("CARGO_PKG_VERSION")).bright_cyan().bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["pear", "start", "--verbose"]);
        assert!(matches!(cli.command, Commands::Start { verbose: true, .. }));

        let cli = Cli::parse_from(["pear", "routes", "-c", "site.toml", "-f", "json"]);
        match cli.command {
            Commands::Routes { config, format } => {
                assert_eq!(config, "site.toml");
                assert_eq!(format, "json");
            }
            _ => panic!("expected routes"),
        }
    }

    #[test]
    fn test_validate_defaults_to_pear_toml() {
        let cli = Cli::parse_from(["pear", "validate"]);
        assert!(matches!(cli.command, Commands::Validate { file } if file == "pear.toml"));
    }
}
