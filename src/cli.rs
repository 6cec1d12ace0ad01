//! Command-line interface definitions for groupwatch.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! All arguments can be provided via command-line flags or environment variables.

use clap::Parser;

/// Command-line arguments for the groupwatch crawler.
///
/// Everything substantive lives in the JSON config file; the CLI only points
/// at the config and the data directory and lets the rendering-backend token
/// come from the environment instead of the config file.
///
/// # Examples
///
/// ```sh
/// # Default: ./config.json, snapshots in the current directory
/// groupwatch
///
/// # Separate data directory and token from the environment
/// BROWSERLESS_TOKEN=secret groupwatch -c /etc/groupwatch.json -d /var/lib/groupwatch
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(short, long, default_value = "config.json")]
    pub config: String,

    /// Directory holding the snapshot files (results, progress, frontier)
    #[arg(short, long, default_value = ".")]
    pub data_dir: String,

    /// Rendering backend token; overrides the one in the config file
    #[arg(long, env = "BROWSERLESS_TOKEN")]
    pub browserless_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(&["groupwatch"]);

        assert_eq!(cli.config, "config.json");
        assert_eq!(cli.data_dir, ".");
        assert!(cli.browserless_token.is_none());
    }

    #[test]
    fn test_cli_token_flag() {
        let cli = Cli::parse_from(&["groupwatch", "--browserless-token", "secret"]);

        assert_eq!(cli.browserless_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(&[
            "groupwatch",
            "-c",
            "/etc/groupwatch.json",
            "-d",
            "/var/lib/groupwatch",
        ]);

        assert_eq!(cli.config, "/etc/groupwatch.json");
        assert_eq!(cli.data_dir, "/var/lib/groupwatch");
    }
}
