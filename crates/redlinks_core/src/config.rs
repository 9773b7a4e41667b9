use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const CONFIG_FILENAME: &str = "redlinks.toml";
pub const DEFAULT_API_URL: &str = "https://en.wikipedia.org/w/api.php";
pub const DEFAULT_USER_AGENT: &str = "redlinks/0.1";
pub const DEFAULT_DB_HOST: &str = "127.0.0.1";
pub const DEFAULT_DB_PORT: u16 = 4711;
pub const DEFAULT_DB_NAME: &str = "enwiki_p";
pub const DEFAULT_CREDENTIALS_FILE: &str = "replica.my.cnf";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RedlinksConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub dump: DumpSection,
    #[serde(default)]
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
    pub max_retries: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DumpSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct DatabaseSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub credentials: Option<PathBuf>,
}

/// Command-line values that take precedence over env and config.
#[derive(Debug, Clone, Default)]
pub struct DatabaseOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub credentials: Option<PathBuf>,
}

/// Fully resolved replica connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub credentials: PathBuf,
}

impl RedlinksConfig {
    /// Resolve the wiki API URL: env WIKI_API_URL > config > DEFAULT_API_URL.
    pub fn api_url(&self) -> String {
        self.api_url_with(env_lookup)
    }

    /// Resolve user agent: env WIKI_USER_AGENT > config > DEFAULT_USER_AGENT.
    pub fn user_agent(&self) -> String {
        self.user_agent_with(env_lookup)
    }

    pub fn dump_path(&self, flag: Option<&Path>) -> Option<PathBuf> {
        flag.map(Path::to_path_buf)
            .or_else(|| self.dump.path.clone())
    }

    /// Resolve replica settings: flag > env REDLINKS_DB* > config > defaults.
    pub fn database_settings(&self, overrides: &DatabaseOverrides) -> Result<DatabaseSettings> {
        self.database_settings_with(overrides, env_lookup)
    }

    fn api_url_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        lookup("WIKI_API_URL")
            .or_else(|| self.wiki.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    fn user_agent_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        lookup("WIKI_USER_AGENT")
            .or_else(|| self.wiki.user_agent.clone())
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    fn database_settings_with(
        &self,
        overrides: &DatabaseOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<DatabaseSettings> {
        let host = overrides
            .host
            .clone()
            .or_else(|| lookup("REDLINKS_DBHOST"))
            .or_else(|| self.database.host.clone())
            .unwrap_or_else(|| DEFAULT_DB_HOST.to_string());
        let port = match overrides.port {
            Some(port) => port,
            None => match lookup("REDLINKS_DBPORT") {
                Some(value) => value
                    .parse::<u16>()
                    .with_context(|| format!("invalid REDLINKS_DBPORT value: {value}"))?,
                None => self.database.port.unwrap_or(DEFAULT_DB_PORT),
            },
        };
        let name = overrides
            .name
            .clone()
            .or_else(|| lookup("REDLINKS_DBNAME"))
            .or_else(|| self.database.name.clone())
            .unwrap_or_else(|| DEFAULT_DB_NAME.to_string());
        if name.trim().is_empty() {
            bail!("database name cannot be empty");
        }

        let home = lookup("HOME").or_else(|| lookup("USERPROFILE"));
        let credentials = match overrides
            .credentials
            .clone()
            .or_else(|| lookup("REDLINKS_CREDENTIALS").map(PathBuf::from))
            .or_else(|| self.database.credentials.clone())
        {
            Some(path) => expand_home(&path, home.as_deref()),
            None => match home {
                Some(home) => PathBuf::from(home).join(DEFAULT_CREDENTIALS_FILE),
                None => bail!(
                    "cannot locate {DEFAULT_CREDENTIALS_FILE}: HOME is not set; pass --credentials"
                ),
            },
        };

        Ok(DatabaseSettings {
            host,
            port,
            name,
            credentials,
        })
    }
}

/// Config path: flag > env REDLINKS_CONFIG > ./redlinks.toml.
pub fn resolve_config_path(flag: Option<&Path>, cwd: &Path) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(path) = env_lookup("REDLINKS_CONFIG") {
        return PathBuf::from(path);
    }
    cwd.join(CONFIG_FILENAME)
}

/// Load and parse a RedlinksConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<RedlinksConfig> {
    if !config_path.exists() {
        return Ok(RedlinksConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: RedlinksConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn expand_home(path: &Path, home: Option<&str>) -> PathBuf {
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

fn env_lookup(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
