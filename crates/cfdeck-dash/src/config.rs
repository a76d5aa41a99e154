use anyhow::{bail, Context};
use cfdeck_core::ServiceKind;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CACHE_TTL_SECS: u64 = cfdeck_cache::DEFAULT_CACHE_TTL_SECS;
const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_PANE_LINES: usize = 500;
const DEFAULT_IDLE_AFTER_SECS: u64 = 15;
const DEFAULT_PROGRAM: &str = "wrangler";

#[derive(Parser, Debug, Default)]
#[command(name = "cfdeck")]
#[command(about = "Terminal dashboard for Workers, their resources and live logs", long_about = None)]
pub struct Args {
    /// Account to open with.
    #[arg(long)]
    pub account: Option<String>,
    /// Path to config.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub cache_ttl_secs: Option<u64>,
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,
    /// Tail the given scripts and print lines to stdout instead of opening the TUI.
    #[arg(long)]
    pub headless: bool,
    pub scripts: Vec<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct AccountEntry {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `<sub>` in `<script>.<sub>.workers.dev`.
    #[serde(default)]
    pub subdomain: Option<String>,
}

impl AccountEntry {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Argument templates for the external CLI. `{account}` and `{script}` are
/// substituted before spawning.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandTemplates {
    pub program: String,
    /// Keyed by service name as shown in the UI (`"KV"`, `"D1"`, ...).
    pub list: BTreeMap<String, Vec<String>>,
    pub deployment: Vec<String>,
    pub tail: Vec<String>,
}

impl Default for CommandTemplates {
    fn default() -> Self {
        let mut list = BTreeMap::new();
        list.insert(
            ServiceKind::Kv.as_str().to_string(),
            args(&["kv", "namespace", "list"]),
        );
        list.insert(
            ServiceKind::D1.as_str().to_string(),
            args(&["d1", "list", "--json"]),
        );
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            list,
            deployment: args(&["deployments", "status", "--name", "{script}", "--json"]),
            tail: args(&["tail", "{script}", "--format", "json"]),
        }
    }
}

impl CommandTemplates {
    pub fn list_args(&self, service: ServiceKind) -> Option<&[String]> {
        self.list
            .iter()
            .find(|(name, _)| {
                name.parse::<ServiceKind>()
                    .map(|kind| kind == service)
                    .unwrap_or(false)
            })
            .map(|(_, args)| args.as_slice())
    }

    /// Status text for a service with no list template, naming the config
    /// key that would supply one.
    pub fn missing_list_hint(&self, service: ServiceKind) -> String {
        format!(
            "no list command for {service}; add `\"{service}\" = [\"<subcommand>\", \"--json\"]` \
             under [commands.list] in config.toml (runs `{}` with {{account}} substituted)",
            self.program
        )
    }
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

pub fn render_args(template: &[String], account_id: &str, script_name: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{account}", account_id)
                .replace("{script}", script_name)
        })
        .collect()
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FileConfig {
    pub account_id: Option<String>,
    pub accounts: Vec<AccountEntry>,
    pub cache_ttl_secs: Option<u64>,
    pub fetch_timeout_secs: Option<u64>,
    pub max_grid: Option<usize>,
    pub max_pane_lines: Option<usize>,
    pub idle_after_secs: Option<u64>,
    pub commands: CommandTemplates,
    /// Named script groups opened together in the tail grid.
    pub environments: BTreeMap<String, Vec<String>>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub account_id: String,
    pub accounts: Vec<AccountEntry>,
    pub cache_ttl_secs: u64,
    pub fetch_timeout: Duration,
    pub max_grid: usize,
    pub max_pane_lines: usize,
    pub idle_after: Duration,
    pub commands: CommandTemplates,
    pub environments: BTreeMap<String, Vec<String>>,
    pub config_path: PathBuf,
    pub headless: bool,
    pub headless_scripts: Vec<String>,
}

impl Config {
    pub fn account(&self, account_id: &str) -> Option<&AccountEntry> {
        self.accounts.iter().find(|entry| entry.id == account_id)
    }
}

pub fn load_config(args: Args) -> anyhow::Result<Config> {
    let config_path = args
        .config
        .clone()
        .or_else(|| env_value("CFDECK_CONFIG_PATH").map(PathBuf::from))
        .unwrap_or_else(default_config_path);
    let file = load_file_config(&config_path)
        .with_context(|| format!("reading {}", config_path.display()))?;
    resolve_config(args, file, config_path, env_value)
}

/// CLI flags win over environment, environment over the file, the file over
/// built-in defaults.
pub fn resolve_config(
    args: Args,
    file: FileConfig,
    config_path: PathBuf,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut accounts = file.accounts;
    if let Some(extra) = env("CFDECK_ACCOUNTS") {
        for id in extra.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            if !accounts.iter().any(|entry| entry.id == id) {
                accounts.push(AccountEntry {
                    id: id.to_string(),
                    ..AccountEntry::default()
                });
            }
        }
    }

    let account_id = args
        .account
        .or_else(|| env("CFDECK_ACCOUNT_ID"))
        .or(file.account_id)
        .or_else(|| accounts.first().map(|entry| entry.id.clone()));
    let Some(account_id) = account_id.filter(|id| !id.trim().is_empty()) else {
        bail!("no account configured; pass --account or set CFDECK_ACCOUNT_ID");
    };
    if !accounts.iter().any(|entry| entry.id == account_id) {
        accounts.insert(
            0,
            AccountEntry {
                id: account_id.clone(),
                ..AccountEntry::default()
            },
        );
    }

    let cache_ttl_secs = args
        .cache_ttl_secs
        .or_else(|| env_u64(&env, "CFDECK_CACHE_TTL_SECS"))
        .or(file.cache_ttl_secs)
        .unwrap_or(DEFAULT_CACHE_TTL_SECS);
    let fetch_timeout_secs = args
        .fetch_timeout_secs
        .or_else(|| env_u64(&env, "CFDECK_FETCH_TIMEOUT_SECS"))
        .or(file.fetch_timeout_secs)
        .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS);

    Ok(Config {
        account_id,
        accounts,
        cache_ttl_secs,
        fetch_timeout: Duration::from_secs(fetch_timeout_secs.max(1)),
        max_grid: file.max_grid.unwrap_or(cfdeck_tail::DEFAULT_MAX_GRID).max(1),
        max_pane_lines: file.max_pane_lines.unwrap_or(DEFAULT_MAX_PANE_LINES).max(1),
        idle_after: Duration::from_secs(file.idle_after_secs.unwrap_or(DEFAULT_IDLE_AFTER_SECS)),
        commands: file.commands,
        environments: file.environments,
        config_path,
        headless: args.headless,
        headless_scripts: args.scripts,
    })
}

pub fn load_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_u64(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    env(key).and_then(|value| value.trim().parse().ok())
}

fn default_config_path() -> PathBuf {
    if let Some(value) = env_value("XDG_CONFIG_HOME") {
        return PathBuf::from(value).join("cfdeck").join("config.toml");
    }
    if let Some(value) = env_value("HOME") {
        return PathBuf::from(value)
            .join(".config")
            .join("cfdeck")
            .join("config.toml");
    }
    PathBuf::from("cfdeck.toml")
}

pub fn resolve_state_dir() -> PathBuf {
    if let Some(value) = env_value("XDG_STATE_HOME") {
        return PathBuf::from(value).join("cfdeck");
    }
    if let Some(value) = env_value("HOME") {
        return PathBuf::from(value)
            .join(".local")
            .join("state")
            .join("cfdeck");
    }
    PathBuf::from(".cfdeck/state")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const FILE: &str = r#"
account_id = "acct-file"
cache_ttl_secs = 90
max_grid = 4

[[accounts]]
id = "acct-file"
name = "Personal"
subdomain = "me"

[[accounts]]
id = "acct-work"
name = "Work"

[commands]
program = "wrangler"
tail = ["tail", "{script}", "--format", "json"]

[commands.list]
"Durable Objects" = ["api", "do", "{account}"]

[environments]
production = ["api", "web"]
"#;

    #[test]
    fn cli_beats_env_beats_file() {
        let file: FileConfig = toml::from_str(FILE).expect("parse file");
        let args = Args {
            cache_ttl_secs: Some(5),
            ..Args::default()
        };
        let env = env_from(&[
            ("CFDECK_ACCOUNT_ID", "acct-work"),
            ("CFDECK_CACHE_TTL_SECS", "60"),
            ("CFDECK_FETCH_TIMEOUT_SECS", "12"),
        ]);
        let config = resolve_config(args, file, PathBuf::from("c.toml"), env).expect("resolve");
        assert_eq!(config.account_id, "acct-work");
        assert_eq!(config.cache_ttl_secs, 5);
        assert_eq!(config.fetch_timeout, Duration::from_secs(12));
        assert_eq!(config.max_grid, 4);
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.environments["production"], vec!["api", "web"]);
        assert_eq!(
            config.account("acct-file").and_then(|a| a.subdomain.as_deref()),
            Some("me")
        );
    }

    #[test]
    fn defaults_apply_and_missing_account_is_an_error() {
        let err = resolve_config(
            Args::default(),
            FileConfig::default(),
            PathBuf::from("c.toml"),
            env_from(&[]),
        )
        .expect_err("no account");
        assert!(err.to_string().contains("no account configured"));

        let config = resolve_config(
            Args::default(),
            FileConfig::default(),
            PathBuf::from("c.toml"),
            env_from(&[("CFDECK_ACCOUNTS", "a1, a2,,a1")]),
        )
        .expect("resolve");
        assert_eq!(config.account_id, "a1");
        assert_eq!(config.accounts.len(), 2);
        assert_eq!(config.cache_ttl_secs, DEFAULT_CACHE_TTL_SECS);
        assert_eq!(config.max_pane_lines, DEFAULT_MAX_PANE_LINES);
        assert_eq!(config.commands.program, "wrangler");
    }

    #[test]
    fn list_templates_match_service_aliases() {
        let file: FileConfig = toml::from_str(FILE).expect("parse file");
        let do_args = file
            .commands
            .list_args(ServiceKind::DurableObjects)
            .expect("durable objects template");
        assert_eq!(
            render_args(do_args, "acct-9", ""),
            vec!["api", "do", "acct-9"]
        );
        assert!(file.commands.list_args(ServiceKind::Kv).is_none());
        assert!(CommandTemplates::default()
            .list_args(ServiceKind::Kv)
            .is_some());
    }

    #[test]
    fn bool_flags() {
        assert_eq!(parse_bool_flag(" YES "), Some(true));
        assert_eq!(parse_bool_flag("off"), Some(false));
        assert_eq!(parse_bool_flag("maybe"), None);
    }

    #[test]
    fn file_config_missing_is_default_and_malformed_is_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = load_file_config(&dir.path().join("absent.toml")).expect("missing file");
        assert!(missing.accounts.is_empty());

        let good = dir.path().join("config.toml");
        fs::write(&good, FILE).expect("write config");
        let loaded = load_file_config(&good).expect("load config");
        assert_eq!(loaded.accounts.len(), 2);
        assert_eq!(loaded.environments["production"], vec!["api", "web"]);

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "max_grid = \"many\"").expect("write bad config");
        let err = load_file_config(&bad).expect_err("malformed config");
        assert!(err.to_string().contains("parsing config"));
    }
}
