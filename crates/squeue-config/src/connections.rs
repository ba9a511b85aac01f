//! Database nicknames, credentials and queue settings.
//!
//! ```kdl
//! credentials "postgres" username="svc" password="secret"
//! database "devpg" type="postgres" host="db" port=5432 name="queues"
//! database "local" type="sqlite" path="/var/lib/squeue/q.db"
//! queue "pricing" database="devpg" claimed-timeout="1h" in-progress-timeout="8h"
//! ```
//!
//! Several files may be layered. A nickname, queue or credential type
//! defined in an earlier file hides the same one in later files.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use squeue_core::TableName;
use tracing::debug;

use crate::duration::parse_duration;
use crate::{ConfigError, ConfigResult};

/// Environment variable naming a configuration file searched first.
pub const CONFIG_ENV: &str = "SQUEUE_CONFIG";

const SYSTEM_CONFIG: &str = "/etc/squeue/squeue.kdl";
const USER_CONFIG: &str = ".config/squeue/squeue.kdl";

const DEFAULT_POSTGRES_PORT: u16 = 5432;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Postgres,
    Sqlite,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Sqlite => "sqlite",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DatabaseKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DatabaseKind::Postgres),
            "sqlite" => Ok(DatabaseKind::Sqlite),
            other => Err(ConfigError::InvalidValue {
                field: "database type".to_string(),
                message: format!("unknown database type: {other}"),
            }),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// A `database` node as written, before credentials are resolved.
#[derive(Debug, Clone, PartialEq)]
struct DatabaseEntry {
    kind: DatabaseKind,
    host: Option<String>,
    port: Option<u16>,
    name: Option<String>,
    path: Option<String>,
    credentials: Option<Credentials>,
}

/// Everything needed to connect to one database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseProfile {
    pub nickname: String,
    pub kind: DatabaseKind,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub path: String,
    pub credentials: Option<Credentials>,
}

impl DatabaseProfile {
    /// Connection URL understood by `squeue_db::connect`.
    pub fn url(&self) -> String {
        match self.kind {
            DatabaseKind::Postgres => {
                let auth = match &self.credentials {
                    Some(Credentials {
                        username,
                        password: Some(password),
                    }) => format!(
                        "{}:{}@",
                        urlencoding::encode(username),
                        urlencoding::encode(password)
                    ),
                    Some(Credentials { username, .. }) => {
                        format!("{}@", urlencoding::encode(username))
                    }
                    None => String::new(),
                };
                format!("postgres://{auth}{}:{}/{}", self.host, self.port, self.name)
            }
            DatabaseKind::Sqlite => format!("sqlite://{}", self.path),
        }
    }
}

/// Per-queue runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    pub name: String,
    /// Nickname of the database holding the queue table.
    pub database: Option<String>,
    pub claimed_timeout: Duration,
    pub in_progress_timeout: Duration,
}

impl QueueSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            database: None,
            claimed_timeout: Duration::from_secs(60 * 60),
            in_progress_timeout: Duration::from_secs(8 * 60 * 60),
        }
    }
}

/// Merged configuration from one or more files.
#[derive(Debug, Clone, Default)]
pub struct Config {
    credentials: HashMap<DatabaseKind, Credentials>,
    databases: BTreeMap<String, DatabaseEntry>,
    queues: BTreeMap<String, QueueSettings>,
}

impl Config {
    /// Load every existing file from the standard search path.
    pub fn discover() -> ConfigResult<Self> {
        let paths = search_path(
            std::env::var_os(CONFIG_ENV).map(PathBuf::from),
            std::env::var_os("HOME").map(PathBuf::from),
        );
        Self::load_layered(&paths)
    }

    /// Load `paths` in precedence order, skipping files that do not exist.
    pub fn load_layered(paths: &[PathBuf]) -> ConfigResult<Self> {
        let mut config = Config::default();
        for path in paths {
            if !path.is_file() {
                continue;
            }
            debug!(path = %path.display(), "Loading configuration");
            config.merge_lower(Self::load(path)?);
        }
        Ok(config)
    }

    /// Load a single file, which must exist.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        parse_config(&text)
    }

    /// Fill in anything this configuration does not define from `lower`.
    pub fn merge_lower(&mut self, lower: Config) {
        for (kind, credentials) in lower.credentials {
            self.credentials.entry(kind).or_insert(credentials);
        }
        for (nickname, entry) in lower.databases {
            self.databases.entry(nickname).or_insert(entry);
        }
        for (name, settings) in lower.queues {
            self.queues.entry(name).or_insert(settings);
        }
    }

    pub fn nicknames(&self) -> impl Iterator<Item = &str> {
        self.databases.keys().map(String::as_str)
    }

    /// Resolve `nickname`, taking credentials from the database node or,
    /// failing that, from the `credentials` node for its type.
    pub fn database(&self, nickname: &str) -> ConfigResult<DatabaseProfile> {
        let entry = self
            .databases
            .get(nickname)
            .ok_or_else(|| ConfigError::UnknownDatabase(nickname.to_string()))?;

        let credentials = entry
            .credentials
            .clone()
            .or_else(|| self.credentials.get(&entry.kind).cloned());

        let missing = |field: &str| ConfigError::MissingField(format!("{field} for database {nickname}"));
        match entry.kind {
            DatabaseKind::Postgres => Ok(DatabaseProfile {
                nickname: nickname.to_string(),
                kind: entry.kind,
                host: entry.host.clone().ok_or_else(|| missing("host"))?,
                port: entry.port.unwrap_or(DEFAULT_POSTGRES_PORT),
                name: entry.name.clone().ok_or_else(|| missing("name"))?,
                path: String::new(),
                credentials: Some(credentials.ok_or_else(|| missing("credentials"))?),
            }),
            DatabaseKind::Sqlite => Ok(DatabaseProfile {
                nickname: nickname.to_string(),
                kind: entry.kind,
                host: String::new(),
                port: 0,
                name: String::new(),
                path: entry.path.clone().ok_or_else(|| missing("path"))?,
                credentials,
            }),
        }
    }

    /// Register a database at runtime. Fails if the nickname is taken.
    pub fn add_database(&mut self, profile: DatabaseProfile) -> ConfigResult<()> {
        if self.databases.contains_key(&profile.nickname) {
            return Err(ConfigError::Duplicate(format!(
                "database {}",
                profile.nickname
            )));
        }
        let (host, port, name, path) = match profile.kind {
            DatabaseKind::Postgres => (Some(profile.host), Some(profile.port), Some(profile.name), None),
            DatabaseKind::Sqlite => (None, None, None, Some(profile.path)),
        };
        self.databases.insert(
            profile.nickname,
            DatabaseEntry {
                kind: profile.kind,
                host,
                port,
                name,
                path,
                credentials: profile.credentials,
            },
        );
        Ok(())
    }

    /// Settings for queue `name`, defaults if it is not configured.
    pub fn queue(&self, name: &str) -> QueueSettings {
        self.queues
            .get(name)
            .cloned()
            .unwrap_or_else(|| QueueSettings::new(name))
    }

    pub fn queues(&self) -> impl Iterator<Item = &QueueSettings> {
        self.queues.values()
    }
}

/// Files searched by [`Config::discover`], highest precedence first.
fn search_path(explicit: Option<PathBuf>, home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    paths.extend(explicit);
    paths.push(PathBuf::from(SYSTEM_CONFIG));
    paths.extend(home.map(|home| home.join(USER_CONFIG)));
    paths
}

/// Parse one configuration file from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<Config> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = Config::default();

    for node in doc.nodes() {
        match node.name().value() {
            "credentials" => {
                let kind: DatabaseKind = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("credentials type".to_string()))?
                    .parse()?;
                let credentials = parse_credentials(node)?
                    .ok_or_else(|| ConfigError::MissingField(format!("{kind} username")))?;
                if config.credentials.insert(kind, credentials).is_some() {
                    return Err(ConfigError::Duplicate(format!("credentials {kind}")));
                }
            }
            "database" => {
                let nickname = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("database nickname".to_string()))?;
                let entry = parse_database(node)?;
                if config.databases.insert(nickname.clone(), entry).is_some() {
                    return Err(ConfigError::Duplicate(format!("database {nickname}")));
                }
            }
            "queue" => {
                let settings = parse_queue(node)?;
                let name = settings.name.clone();
                if config.queues.insert(name.clone(), settings).is_some() {
                    return Err(ConfigError::Duplicate(format!("queue {name}")));
                }
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_credentials(node: &KdlNode) -> ConfigResult<Option<Credentials>> {
    let username = get_string_prop(node, "username");
    let password = get_string_prop(node, "password");
    match (username, password) {
        (Some(username), password) => Ok(Some(Credentials { username, password })),
        (None, None) => Ok(None),
        (None, Some(_)) => Err(ConfigError::MissingField(
            "username alongside password".to_string(),
        )),
    }
}

fn parse_database(node: &KdlNode) -> ConfigResult<DatabaseEntry> {
    let kind: DatabaseKind = get_string_prop(node, "type")
        .ok_or_else(|| ConfigError::MissingField("database type".to_string()))?
        .parse()?;

    let port = match node.get("port").and_then(|v| v.as_integer()) {
        Some(port) => Some(u16::try_from(port).map_err(|_| ConfigError::InvalidValue {
            field: "port".to_string(),
            message: format!("{port} is not a valid port"),
        })?),
        None => None,
    };

    Ok(DatabaseEntry {
        kind,
        host: get_string_prop(node, "host"),
        port,
        name: get_string_prop(node, "name"),
        path: get_string_prop(node, "path"),
        credentials: parse_credentials(node)?,
    })
}

fn parse_queue(node: &KdlNode) -> ConfigResult<QueueSettings> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("queue name".to_string()))?;
    TableName::parse(&name).map_err(|e| ConfigError::InvalidValue {
        field: "queue name".to_string(),
        message: e.to_string(),
    })?;

    let mut settings = QueueSettings::new(name);
    settings.database = get_string_prop(node, "database");
    if let Some(timeout) = get_duration_prop(node, "claimed-timeout")? {
        settings.claimed_timeout = timeout;
    }
    if let Some(timeout) = get_duration_prop(node, "in-progress-timeout")? {
        settings.in_progress_timeout = timeout;
    }
    Ok(settings)
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_string_prop(node: &KdlNode, name: &str) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_duration_prop(node: &KdlNode, name: &str) -> ConfigResult<Option<Duration>> {
    get_string_prop(node, name)
        .map(|raw| {
            parse_duration(&raw).map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                message: format!("not a duration: {raw}"),
            })
        })
        .transpose()
}
