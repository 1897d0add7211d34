use crate::credentials;
use crate::shutdown::install_shutdown_handler;
use crate::{Cli, EXIT_CONFIG};
use anyhow::Context;
use sshpt_core::hosts::{load_hosts, load_ini, parse_host_args, parse_host_list, CommandAliases};
use sshpt_core::{Config, HostRecord, Job, RunConfig, Runner, RunnerError};
use sshpt_ssh::SshTransport;
use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Resolve the run, dispatch one job per host and report the exit code.
pub async fn run(cli: Cli) -> u8 {
    let (config, jobs) = match prepare(cli) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_CONFIG;
        }
    };

    debug!("dispatching {} jobs over {} workers", jobs.len(), config.max_threads);
    let runner = Runner::new(
        config.max_threads,
        config.sink_settings(),
        Arc::new(SshTransport::new()),
    );
    let report = runner.run(jobs, install_shutdown_handler()).await;

    if report.status == sshpt_core::RunStatus::Cancelled {
        eprintln!("\ncaught interrupt, exiting...");
    }
    report.status.exit_code()
}

/// Everything that can fail before a single host is contacted.
fn prepare(cli: Cli) -> anyhow::Result<(RunConfig, Vec<Job>)> {
    let defaults = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("reading {}", path.display()))?,
        None => Config::load_default()?,
    }
    .defaults;

    let (hosts, aliases) = read_hosts(&cli)?;
    let mut config = RunConfig::from_defaults(&defaults);
    apply_cli(&mut config, cli)?;
    config.commands = aliases.expand(config.commands);

    config.validate()?;
    credentials::resolve(&mut config, &hosts)?;

    let jobs = config.build_jobs(&hosts)?;
    if jobs.is_empty() {
        return Err(RunnerError::Config("no hosts given".into()).into());
    }
    Ok((config, jobs))
}

/// Hosts from whichever source was given, plus any named commands an INI
/// inventory defines.
fn read_hosts(cli: &Cli) -> anyhow::Result<(Vec<HostRecord>, CommandAliases)> {
    if let Some([path, section]) = cli.ini_file.as_deref() {
        let inventory = load_ini(Path::new(path), Some(section.as_str()))
            .with_context(|| format!("loading {}", path))?;
        return Ok((inventory.hosts, inventory.aliases));
    }
    let hosts = read_host_list(cli)?;
    Ok((hosts, CommandAliases::default()))
}

fn read_host_list(cli: &Cli) -> anyhow::Result<Vec<HostRecord>> {
    if let Some(path) = &cli.hostfile {
        return Ok(load_hosts(path).with_context(|| format!("loading {}", path.display()))?);
    }
    if let Some(list) = &cli.hosts {
        return Ok(parse_host_args(list));
    }
    if cli.stdin {
        let mut stdin = std::io::stdin();
        if stdin.is_terminal() {
            eprintln!("Enter list of hosts (one entry per line). Ctrl-D to end input.");
        }
        let mut text = String::new();
        stdin.read_to_string(&mut text)?;
        return Ok(parse_host_list(&text));
    }
    Err(RunnerError::Config("give hosts with --file, --stdin, --hosts or --ini-file".into()).into())
}

fn apply_cli(config: &mut RunConfig, cli: Cli) -> anyhow::Result<()> {
    if let Some(threads) = cli.max_threads {
        config.max_threads = threads;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout = Duration::from_secs(timeout);
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(username) = cli.username {
        config.username = username;
    }
    if let Some(path) = cli.authfile {
        let (username, password) = credentials::read_authfile(&path)?;
        config.username = username;
        config.password = Some(password);
    }
    if let Some(password) = cli.password {
        config.password = Some(password.into());
    }
    if let Some(remote_path) = cli.remote_path {
        config.remote_path = remote_path;
    }
    if let Some(format) = cli.output_format {
        config.output_format = format;
    }

    config.key_file = cli.keyfile;
    config.key_passphrase = cli.keypass.map(Into::into);
    config.passwordless = cli.passwordless;
    config.commands = cli.commands;
    config.copy_file = cli.copy_file;
    config.execute = cli.execute;
    config.remove = cli.remove;
    config.sudo = cli.sudo;
    config.outfile = cli.outfile;
    config.verbose = !cli.quiet;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use sshpt_core::Action;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn defaults_file() -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "defaults:\n  max_threads: 4\n  port: 2222").unwrap();
        file
    }

    fn parse(config: &NamedTempFile, args: &[&str]) -> Cli {
        let mut argv = vec!["sshpt", "--config", config.path().to_str().unwrap()];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[tokio::test]
    async fn test_config_error_exits_before_dispatch() {
        let config = defaults_file();
        // quiet with nowhere to write results
        let cli = parse(&config, &["--hosts", "web1", "-u", "ops", "-p", "pw", "-q"]);
        assert_eq!(run(cli).await, EXIT_CONFIG);

        let cli = parse(&config, &["-u", "ops", "-p", "pw"]);
        assert_eq!(run(cli).await, EXIT_CONFIG);
    }

    #[test]
    fn test_defaults_file_then_cli_overrides() {
        let config = defaults_file();
        let cli = parse(&config, &["--hosts", "web1,web2", "-u", "ops", "-p", "pw", "-T", "7"]);
        let (run_config, jobs) = prepare(cli).unwrap();

        assert_eq!(run_config.max_threads, 7);
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.port == 2222 && j.username == "ops"));
    }

    #[test]
    fn test_authfile_overrides_username_flag() {
        let config = defaults_file();
        let mut auth = NamedTempFile::new().unwrap();
        writeln!(auth, "admin:from-file").unwrap();

        let cli = parse(
            &config,
            &["--hosts", "web1", "-u", "bob", "-a", auth.path().to_str().unwrap()],
        );
        let (run_config, jobs) = prepare(cli).unwrap();

        assert_eq!(run_config.username, "admin");
        assert_eq!(jobs[0].username, "admin");
        assert_eq!(run_config.password.as_ref().map(|p| p.expose()), Some("from-file"));
    }

    #[test]
    fn test_bare_sudo_means_root() {
        let config = defaults_file();
        let cli = parse(&config, &["--hosts", "web1", "-u", "ops", "-p", "pw", "-s"]);
        let (_, jobs) = prepare(cli).unwrap();
        assert_eq!(jobs[0].escalation.as_ref().map(|e| e.run_as.as_str()), Some("root"));

        let cli = parse(&config, &["--hosts", "web1", "-u", "ops", "-p", "pw", "-s", "postgres"]);
        let (_, jobs) = prepare(cli).unwrap();
        assert_eq!(jobs[0].escalation.as_ref().map(|e| e.run_as.as_str()), Some("postgres"));
    }

    #[test]
    fn test_ini_file_expands_named_commands() {
        let config = defaults_file();
        let mut ini = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        write!(
            ini,
            "[servers]\nweb = web1.example.com\ndb = db1.example.com\n\n[Commands]\nload = cat /proc/loadavg\n"
        )
        .unwrap();

        let cli = parse(
            &config,
            &["load", "-i", ini.path().to_str().unwrap(), "servers", "-u", "ops", "-p", "pw"],
        );
        let (_, jobs) = prepare(cli).unwrap();

        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].host, "db1.example.com");
        assert_eq!(jobs[0].action, Action::Commands(vec!["cat /proc/loadavg".into()]));
    }

    #[test]
    fn test_unknown_ini_section_is_config_error() {
        let config = defaults_file();
        let mut ini = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        write!(ini, "[servers]\nweb = web1\n").unwrap();

        let cli = parse(
            &config,
            &["-i", ini.path().to_str().unwrap(), "prod", "-u", "ops", "-p", "pw"],
        );
        let err = prepare(cli).unwrap_err();
        assert!(format!("{:#}", err).contains("[prod]"));
    }
}
