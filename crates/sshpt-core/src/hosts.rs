use crate::error::RunnerError;
use crate::secret::Secret;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-host sudo override: `true` means root, `false` disables sudo for the
/// host, a string names the user to become.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SudoSetting {
    Enabled(bool),
    User(String),
}

impl SudoSetting {
    pub fn run_as(&self) -> Option<String> {
        match self {
            SudoSetting::Enabled(true) => Some("root".to_string()),
            SudoSetting::Enabled(false) => None,
            SudoSetting::User(user) => Some(user.clone()),
        }
    }
}

/// One target host plus any settings that override the run-wide ones.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostRecord {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Secret>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub keyfile: Option<PathBuf>,
    #[serde(default)]
    pub sudo: Option<SudoSetting>,
}

impl HostRecord {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            username: None,
            password: None,
            port: None,
            keyfile: None,
            sudo: None,
        }
    }

    /// Parse `host[:username[:password]]`.
    pub fn parse(entry: &str) -> Self {
        let mut parts = entry.trim().splitn(3, ':');
        let mut record = Self::new(parts.next().unwrap_or_default().trim());
        record.username = parts
            .next()
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        record.password = parts.next().filter(|p| !p.is_empty()).map(Secret::from);
        record
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum HostEntry {
    Name(String),
    Record(HostRecord),
}

impl HostEntry {
    fn into_record(self, name: Option<&str>) -> HostRecord {
        match self {
            HostEntry::Name(entry) => HostRecord::parse(&entry),
            HostEntry::Record(mut record) => {
                if record.host.trim().is_empty() {
                    if let Some(name) = name {
                        record.host = name.to_string();
                    }
                }
                record
            }
        }
    }
}

/// Structured inventory: a list of hosts, or a mapping of name to host.
#[derive(Deserialize)]
#[serde(untagged)]
enum Inventory {
    List(Vec<HostEntry>),
    Map(BTreeMap<String, HostEntry>),
}

impl Inventory {
    fn into_records(self) -> Vec<HostRecord> {
        match self {
            Inventory::List(entries) => entries.into_iter().map(|e| e.into_record(None)).collect(),
            Inventory::Map(entries) => entries
                .into_iter()
                .map(|(name, e)| e.into_record(Some(&name)))
                .collect(),
        }
    }
}

/// Plain host list: one entry per line, `#` comments and blank lines skipped.
pub fn parse_host_list(text: &str) -> Vec<HostRecord> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(HostRecord::parse)
        .collect()
}

/// Comma-separated host list as given on the command line.
pub fn parse_host_args(list: &str) -> Vec<HostRecord> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(HostRecord::parse)
        .collect()
}

/// Section of an INI inventory that maps command names to command lines.
pub const COMMANDS_SECTION: &str = "Commands";

/// Named commands from an INI inventory's `[Commands]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandAliases(Vec<(String, String)>);

impl CommandAliases {
    /// Names match case-insensitively.
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(alias, _)| alias.eq_ignore_ascii_case(name.trim()))
            .map(|(_, command)| command.as_str())
    }

    /// Replace every command that names an alias with the aliased command line.
    pub fn expand(&self, commands: Vec<String>) -> Vec<String> {
        commands
            .into_iter()
            .map(|command| match self.lookup(&command) {
                Some(expanded) => expanded.to_string(),
                None => command,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Hosts and named commands read from an INI file.
#[derive(Debug, Clone, Default)]
pub struct IniInventory {
    pub hosts: Vec<HostRecord>,
    pub aliases: CommandAliases,
}

/// Load an INI inventory. Each entry of `section` is `name = host[:user[:pass]]`;
/// an entry with an empty value uses its name as the host. Without a
/// section, every section except `[Commands]` contributes hosts.
pub fn load_ini(path: &Path, section: Option<&str>) -> Result<IniInventory, RunnerError> {
    let contents = read_inventory(path)?;
    parse_ini(&contents, section)
        .map_err(|e| RunnerError::HostFile(format!("{}: {}", path.display(), e)))
}

fn parse_ini(contents: &str, section: Option<&str>) -> Result<IniInventory, String> {
    let ini = ini::Ini::load_from_str(contents).map_err(|e| e.to_string())?;

    let sections: Vec<&ini::Properties> = match section {
        Some(name) => vec![ini
            .section(Some(name))
            .ok_or_else(|| format!("no [{}] section", name))?],
        None => ini
            .iter()
            .filter(|(name, _)| matches!(name, Some(n) if *n != COMMANDS_SECTION))
            .map(|(_, props)| props)
            .collect(),
    };

    let hosts = sections
        .into_iter()
        .flat_map(|props| props.iter())
        .map(|(name, value)| {
            let entry = if value.trim().is_empty() { name } else { value };
            HostRecord::parse(entry)
        })
        .filter(|record| !record.host.is_empty())
        .collect();

    let aliases = ini
        .section(Some(COMMANDS_SECTION))
        .map(|props| {
            props
                .iter()
                .map(|(name, command)| (name.to_string(), command.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Ok(IniInventory {
        hosts,
        aliases: CommandAliases(aliases),
    })
}

fn read_inventory(path: &Path) -> Result<String, RunnerError> {
    let contents = std::fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Err(RunnerError::HostFile(format!("{} is empty", path.display())));
    }
    Ok(contents)
}

/// Load a host inventory, picking the format from the file extension.
pub fn load_hosts(path: &Path) -> Result<Vec<HostRecord>, RunnerError> {
    let contents = read_inventory(path)?;

    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let records = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str::<Inventory>(&contents)?.into_records(),
        "json" => serde_json::from_str::<Inventory>(&contents)?.into_records(),
        "ini" => parse_ini(&contents, None)
            .map_err(|e| RunnerError::HostFile(format!("{}: {}", path.display(), e)))?
            .hosts,
        _ => parse_host_list(&contents),
    };
    Ok(records)
}
