use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Login for the replica database, read from a MySQL option file.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub fn load_credentials(path: &Path) -> Result<Credentials> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read credentials file {}", path.display()))?;
    parse_credentials(&content)
        .with_context(|| format!("failed to parse credentials file {}", path.display()))
}

/// Reads `user` and `password` from the `[client]` group of a `my.cnf` style file.
pub fn parse_credentials(content: &str) -> Result<Credentials> {
    let mut in_client = false;
    let mut user = None;
    let mut password = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(group) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            in_client = group.trim().eq_ignore_ascii_case("client");
            continue;
        }
        if !in_client {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value.trim()).to_string();
        match key.trim() {
            "user" => user = Some(value),
            "password" => password = Some(value),
            _ => {}
        }
    }

    let Some(user) = user.filter(|user| !user.is_empty()) else {
        bail!("missing `user` in [client] section");
    };
    Ok(Credentials {
        user,
        password: password.unwrap_or_default(),
    })
}

fn unquote(value: &str) -> &str {
    for quote in ['\'', '"'] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
