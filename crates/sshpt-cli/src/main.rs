use clap::Parser;
use sshpt_core::OutputFormat;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod commands;
mod credentials;
mod shutdown;

/// Exit code for configuration errors; nothing has been dispatched.
pub const EXIT_CONFIG: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "sshpt", version)]
#[command(
    about = "Run commands or deploy a file on many hosts over SSH",
    long_about = "SSH Power Tool: logs in to every host in a list, optionally uploads a file, \
                  runs commands (optionally through sudo) and reports one result per host. \
                  Meant for fleets where shared keys are not an option."
)]
pub struct Cli {
    /// Commands to run on every host
    pub commands: Vec<String>,

    /// File containing the host list (plain, .yaml/.yml or .json)
    #[arg(short = 'f', long = "file", value_name = "FILE", group = "source")]
    pub hostfile: Option<PathBuf>,

    /// Read the host list from standard input
    #[arg(short = 'S', long, group = "source")]
    pub stdin: bool,

    /// Comma-separated host list, e.g. --hosts host1,host2:user
    #[arg(long, value_name = "HOSTS", group = "source")]
    pub hosts: Option<String>,

    /// INI inventory and the section holding the hosts; names in its
    /// [Commands] section can be given as commands
    #[arg(
        short = 'i',
        long = "ini-file",
        num_args = 2,
        value_names = ["FILE", "SECTION"],
        group = "source"
    )]
    pub ini_file: Option<Vec<String>>,

    /// Private key file
    #[arg(short = 'k', long = "key-file", value_name = "FILE")]
    pub keyfile: Option<PathBuf>,

    /// Passphrase for the private key file
    #[arg(short = 'K', long = "key-pass", value_name = "PASSWORD")]
    pub keypass: Option<String>,

    /// Append results to this file
    #[arg(short = 'o', long, value_name = "FILE")]
    pub outfile: Option<PathBuf>,

    /// File whose first line is username:password
    #[arg(short = 'a', long, value_name = "FILE")]
    pub authfile: Option<PathBuf>,

    /// Number of simultaneous connections [default: 10]
    #[arg(short = 'T', long = "threads", value_name = "N")]
    pub max_threads: Option<usize>,

    /// Port to connect to [default: 22]
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Username to connect as [default: the current user]
    #[arg(short = 'u', long)]
    pub username: Option<String>,

    /// Password (prefer --authfile or the prompt)
    #[arg(short = 'p', long)]
    pub password: Option<String>,

    /// Don't print results to stdout (requires --outfile)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Remote directory the copied file is placed in [default: /tmp/]
    #[arg(short = 'd', long = "dest", value_name = "PATH")]
    pub remote_path: Option<String>,

    /// Execute the copied file
    #[arg(short = 'x', long)]
    pub execute: bool,

    /// Remove the copied file afterwards
    #[arg(short = 'r', long)]
    pub remove: bool,

    /// Connection timeout in seconds [default: 30]
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Run through sudo, as USER (default root)
    #[arg(short = 's', long, value_name = "USER", num_args = 0..=1, default_missing_value = "root")]
    pub sudo: Option<String>,

    /// Authenticate with ssh-agent keys; never prompt for a password
    #[arg(short = 'X', long)]
    pub passwordless: bool,

    /// Result format [default: csv]
    #[arg(short = 'O', long = "output-format", value_parser = parse_format)]
    pub output_format: Option<OutputFormat>,

    /// Local file to copy to every host (and optionally execute)
    #[arg(short = 'c', long = "copy-file", value_name = "FILE")]
    pub copy_file: Option<PathBuf>,

    /// Defaults file [default: ~/.config/sshpt/config.yaml]
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the defaults file path and contents, then exit
    #[arg(long)]
    pub show_config: bool,

    /// Write a sample defaults file, then exit
    #[arg(long)]
    pub init_config: bool,
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    s.parse()
}

fn init_logging(quiet: bool) {
    let default = if quiet { "warn" } else { "warn,sshpt_core=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.quiet);

    if cli.show_config || cli.init_config {
        return match commands::config::run(cli.config.as_deref(), cli.init_config) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::from(EXIT_CONFIG)
            }
        };
    }

    ExitCode::from(commands::run::run(cli).await)
}
