use anyhow::Context;
use sshpt_core::{HostRecord, RunConfig, RunnerError, Secret};
use std::io::BufRead;
use std::path::Path;

/// Read `username:password` from the first line of an auth file.
pub fn read_authfile(path: &Path) -> anyhow::Result<(String, Secret)> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading auth file {}", path.display()))?;
    parse_authfile(&contents).ok_or_else(|| {
        RunnerError::Config(format!(
            "{}: expected username:password on the first line",
            path.display()
        ))
        .into()
    })
}

fn parse_authfile(contents: &str) -> Option<(String, Secret)> {
    let line = contents.lines().next()?.trim_end_matches(['\r', '\n']);
    let (username, password) = line.split_once(':')?;
    if username.is_empty() {
        return None;
    }
    Some((username.to_string(), Secret::new(password)))
}

/// Fill in whatever the command line left out: username from the
/// environment or a prompt, then a passphrase or password prompt unless
/// passwordless mode is on or every host brings its own password.
pub fn resolve(config: &mut RunConfig, hosts: &[HostRecord]) -> anyhow::Result<()> {
    if config.username.is_empty() {
        config.username = match std::env::var("USER") {
            Ok(user) if !user.is_empty() => user,
            _ => prompt_line("Username: ")?,
        };
    }

    if config.passwordless {
        return Ok(());
    }

    if config.key_file.is_some() {
        if config.key_passphrase.is_none() {
            let passphrase = rpassword::prompt_password("Passphrase: ")
                .context("reading key passphrase")?;
            if !passphrase.is_empty() {
                config.key_passphrase = Some(passphrase.into());
            }
        }
        // the key logs in; sudo still wants the account password
        if config.sudo.is_some() && config.password.is_none() {
            let password =
                rpassword::prompt_password("Sudo password: ").context("reading sudo password")?;
            if !password.is_empty() {
                config.password = Some(password.into());
            }
        }
        return Ok(());
    }

    let every_host_has_password = !hosts.is_empty() && hosts.iter().all(|h| h.password.is_some());
    if config.password.is_none() && !every_host_has_password {
        let password = rpassword::prompt_password("Password: ").context("reading password")?;
        if password.is_empty() {
            return Err(RunnerError::Config("an empty password was given".into()).into());
        }
        config.password = Some(password.into());
    }
    Ok(())
}

fn prompt_line(prompt: &str) -> anyhow::Result<String> {
    eprint!("{}", prompt);
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
