use sshpt_core::Config;
use std::path::{Path, PathBuf};

const SAMPLE_CONFIG: &str = r#"# sshpt defaults
# Command-line options override every value here.

defaults:
  # simultaneous SSH sessions
  max_threads: 10
  # connection timeout in seconds
  timeout: 30
  port: 22
  # username: deploy
  # where --copy-file uploads land
  remote_path: /tmp/
  # csv or json
  output_format: csv
"#;

pub fn run(path: Option<&Path>, init: bool) -> anyhow::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(Config::default_path);

    if init {
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(());
    }

    println!("Config path: {}", config_path.display());
    if config_path.exists() {
        let d = Config::load_from(&config_path)?.defaults;
        println!("Threads:     {}", d.max_threads);
        println!("Timeout:     {}s", d.timeout);
        println!("Port:        {}", d.port);
        println!("Username:    {}", d.username.as_deref().unwrap_or("-"));
        println!("Remote path: {}", d.remote_path);
        println!("Format:      {}", d.output_format);
    } else {
        println!("Status:      not found");
        println!("Run `sshpt --init-config` to create one.");
    }

    Ok(())
}
