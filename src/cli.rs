use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tunnelkeeper", about = "Keeps SSH port forwards alive", version)]
pub struct Cli {
    /// Tunnel config file (defaults to the user config directory)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the tunnels and keep them alive until Ctrl-C
    Run,
    /// Validate the config file and print the forwards
    Check {
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Copy a local file to the remote host
    Upload {
        /// Local file
        local: PathBuf,
        /// Remote destination (file or directory)
        remote: String,
    },
    /// Copy a remote file to the local host
    Download {
        /// Remote file
        remote: String,
        /// Local destination (file or directory)
        local: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_upload_with_config() {
        let cli = Cli::parse_from([
            "tunnelkeeper",
            "upload",
            "report.csv",
            "/tmp/",
            "--config",
            "/etc/tunnel.xml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/tunnel.xml")));
        match cli.command {
            Command::Upload { local, remote } => {
                assert_eq!(local, PathBuf::from("report.csv"));
                assert_eq!(remote, "/tmp/");
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn test_parse_check_json() {
        let cli = Cli::parse_from(["tunnelkeeper", "check", "--json"]);
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Command::Check { json: true }));
    }
}
