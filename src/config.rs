use anyhow::{Context, Result};
use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Error;

pub(crate) const CREDENTIALS_FILENAME: &str = ".copernicusmarine-credentials";
const NETRC_MACHINES: &[&str] = &[
    "auth.marine.copernicus.eu",
    "my.cmems-du.eu",
    "nrt.cmems-du.eu",
];

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Default)]
struct FileCredentials {
    username: Option<String>,
    password: Option<String>,
}

/// Where [`resolve_credentials`] may look, besides the process environment.
#[derive(Debug, Clone, Default)]
pub struct CredentialsSource {
    pub username: Option<String>,
    pub password: Option<String>,
    pub credentials_file: Option<PathBuf>,
    /// Ask on the terminal when nothing else provides a value.
    pub prompt: bool,
}

pub(crate) fn configuration_directory() -> PathBuf {
    if let Ok(dir) = std::env::var("COPERNICUSMARINE_CREDENTIALS_DIRECTORY") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".copernicusmarine")
}

pub(crate) fn tls_verification_enabled() -> bool {
    !matches!(
        std::env::var("COPERNICUSMARINE_DISABLE_SSL_CONTEXT")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "true" | "1" | "yes"
    )
}

/// Resolves credentials, in order of precedence:
/// - explicit `username`/`password`
/// - `COPERNICUSMARINE_SERVICE_USERNAME` / `COPERNICUSMARINE_SERVICE_PASSWORD`
/// - the explicit credentials file, then the configuration directory file
/// - `~/.netrc` (or `~/_netrc`) and the legacy motuclient configuration
/// - an interactive prompt
pub fn resolve_credentials(source: &CredentialsSource) -> Result<Credentials> {
    resolve_credentials_with(source, non_empty_env)
}

/// [`resolve_credentials`] reading environment variables through `env`.
fn resolve_credentials_with<E>(source: &CredentialsSource, env: E) -> Result<Credentials>
where
    E: Fn(&str) -> Option<String>,
{
    let mut username = source
        .username
        .clone()
        .or_else(|| env("COPERNICUSMARINE_SERVICE_USERNAME"));
    let mut password = source
        .password
        .clone()
        .or_else(|| env("COPERNICUSMARINE_SERVICE_PASSWORD"));

    if username.is_none() || password.is_none() {
        for path in credential_file_candidates(source.credentials_file.as_deref()) {
            if !path.exists() {
                continue;
            }
            let cfg = read_credentials_file(&path).with_context(|| {
                format!("failed to read credentials file {}", path.display())
            })?;
            if cfg.username.is_none() && cfg.password.is_none() {
                continue;
            }
            debug!(path = %path.display(), "using credentials file");
            if username.is_none() {
                username = cfg.username;
            }
            if password.is_none() {
                password = cfg.password;
            }
            break;
        }
    }

    if source.prompt && (username.is_none() || password.is_none()) && std::io::stdin().is_terminal()
    {
        if username.is_none() {
            username = Some(prompt_line("username: ")?);
        }
        if password.is_none() {
            password = Some(prompt_line("password: ")?);
        }
    }

    match (username, password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            Ok(Credentials { username, password })
        }
        _ => Err(Error::CredentialsCannotBeNone(
            "no username/password found: pass --username/--password, set COPERNICUSMARINE_SERVICE_USERNAME and COPERNICUSMARINE_SERVICE_PASSWORD, or run `copernicusmarine login`".to_string(),
        )
        .into()),
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn prompt_line(label: &str) -> Result<String> {
    let mut stderr = std::io::stderr();
    write!(stderr, "{label}")?;
    stderr.flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read from the terminal")?;
    Ok(line.trim().to_string())
}

pub(crate) fn confirm(question: &str) -> Result<bool> {
    if !std::io::stdin().is_terminal() {
        return Ok(false);
    }
    let answer = prompt_line(&format!("{question} [y/N]: "))?;
    Ok(matches!(answer.to_lowercase().as_str(), "y" | "yes"))
}

fn credential_file_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut v = Vec::new();
    if let Some(p) = explicit {
        v.push(p.to_path_buf());
    }
    v.push(configuration_directory().join(CREDENTIALS_FILENAME));
    if let Some(home) = dirs::home_dir() {
        v.push(home.join(".netrc"));
        v.push(home.join("_netrc"));
        v.push(home.join("motuclient").join("motuclient-python.ini"));
    }
    v
}

fn read_credentials_file(path: &Path) -> Result<FileCredentials> {
    let text = std::fs::read_to_string(path)?;
    let is_netrc = path
        .file_name()
        .map(|n| n == ".netrc" || n == "_netrc")
        .unwrap_or(false);
    if is_netrc {
        Ok(parse_netrc(&text))
    } else {
        Ok(parse_ini_credentials(&text))
    }
}

/// Handles both `.copernicusmarine-credentials` (`username`/`password`) and
/// the motuclient file (`user`/`pwd`), with or without a section header.
fn parse_ini_credentials(text: &str) -> FileCredentials {
    let mut cfg = FileCredentials::default();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('[')
        {
            continue;
        }
        let Some((k, v)) = line.split_once('=').or_else(|| line.split_once(':')) else {
            continue;
        };
        let v = strip_quotes(v.trim());
        if v.is_empty() {
            continue;
        }
        match k.trim().to_lowercase().as_str() {
            "username" | "user" => cfg.username = Some(v.to_string()),
            "password" | "pwd" => cfg.password = Some(v.to_string()),
            _ => {}
        }
    }
    cfg
}

fn parse_netrc(text: &str) -> FileCredentials {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut cfg = FileCredentials::default();
    let mut i = 0;
    let mut in_machine = false;
    while i < tokens.len() {
        match tokens[i] {
            "machine" => {
                if in_machine && cfg.username.is_some() {
                    break;
                }
                in_machine = tokens
                    .get(i + 1)
                    .is_some_and(|m| NETRC_MACHINES.contains(m));
                i += 2;
            }
            "default" => {
                in_machine = false;
                i += 1;
            }
            "login" if in_machine => {
                cfg.username = tokens.get(i + 1).map(|s| s.to_string());
                i += 2;
            }
            "password" if in_machine => {
                cfg.password = tokens.get(i + 1).map(|s| s.to_string());
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

/// Values in credentials and motuclient files may be quoted either way.
fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if (s.starts_with('"') && s.ends_with('"') && s.len() >= 2)
        || (s.starts_with('\'') && s.ends_with('\'') && s.len() >= 2)
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

/// Credentials stored in `<dir>/.copernicusmarine-credentials`, if complete.
pub(crate) fn read_stored_credentials(dir: &Path) -> Result<Option<Credentials>> {
    let path = dir.join(CREDENTIALS_FILENAME);
    if !path.exists() {
        return Ok(None);
    }
    let cfg = read_credentials_file(&path)
        .with_context(|| format!("failed to read credentials file {}", path.display()))?;
    Ok(match (cfg.username, cfg.password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            Some(Credentials { username, password })
        }
        _ => None,
    })
}

/// Credentials for a new login: arguments, then environment, then the terminal.
///
/// Stored files are not consulted since they are what a login replaces.
pub(crate) fn login_credentials(
    username: Option<String>,
    password: Option<String>,
) -> Result<Credentials> {
    let username = username.or_else(|| non_empty_env("COPERNICUSMARINE_SERVICE_USERNAME"));
    let password = password.or_else(|| non_empty_env("COPERNICUSMARINE_SERVICE_PASSWORD"));
    let interactive = std::io::stdin().is_terminal();
    let username = match username {
        Some(u) => Some(u),
        None if interactive => Some(prompt_line("username: ")?),
        None => None,
    };
    let password = match password {
        Some(p) => Some(p),
        None if interactive => Some(prompt_line("password: ")?),
        None => None,
    };
    match (username, password) {
        (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
            Ok(Credentials { username, password })
        }
        _ => Err(Error::CredentialsCannotBeNone(
            "pass --username and --password or run the login in a terminal".to_string(),
        )
        .into()),
    }
}

pub(crate) fn write_credentials_file(dir: &Path, credentials: &Credentials) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    let path = dir.join(CREDENTIALS_FILENAME);
    let body = format!(
        "[credentials]\nusername={}\npassword={}\n",
        credentials.username, credentials.password
    );
    std::fs::write(&path, body)
        .with_context(|| format!("failed to write credentials file {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict permissions of {}", path.display()))?;
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_file_with_section() {
        let cfg = parse_ini_credentials(
            "[credentials]\n# comment\nusername = jdoe\npassword=\"s3cr=t\"\n",
        );
        assert_eq!(cfg.username.as_deref(), Some("jdoe"));
        assert_eq!(cfg.password.as_deref(), Some("s3cr=t"));
    }

    #[test]
    fn motuclient_keys() {
        let cfg = parse_ini_credentials("[Main]\nuser = jdoe\npwd = hunter2\nlog_level=0\n");
        assert_eq!(cfg.username.as_deref(), Some("jdoe"));
        assert_eq!(cfg.password.as_deref(), Some("hunter2"));
    }

    #[test]
    fn netrc_matches_known_machines_only() {
        let cfg = parse_netrc(
            "machine example.com login other password nope\nmachine auth.marine.copernicus.eu\n  login jdoe\n  password hunter2\n",
        );
        assert_eq!(cfg.username.as_deref(), Some("jdoe"));
        assert_eq!(cfg.password.as_deref(), Some("hunter2"));

        let cfg = parse_netrc("machine example.com login other password nope\n");
        assert!(cfg.username.is_none());
    }

    #[test]
    fn explicit_arguments_win() {
        let creds = resolve_credentials(&CredentialsSource {
            username: Some("jdoe".into()),
            password: Some("pw".into()),
            credentials_file: None,
            prompt: false,
        })
        .unwrap();
        assert_eq!(creds.username, "jdoe");
        assert_eq!(format!("{creds:?}"), "Credentials { username: \"jdoe\", password: \"***\" }");
    }

    #[test]
    fn explicit_file_fills_missing_password() {
        let dir = tempfile::tempdir().unwrap();
        let creds = Credentials {
            username: "from_file".into(),
            password: "file_pw".into(),
        };
        let path = write_credentials_file(dir.path(), &creds).unwrap();
        let source = CredentialsSource {
            username: Some("jdoe".into()),
            password: None,
            credentials_file: Some(path),
            prompt: false,
        };
        let resolved = resolve_credentials_with(&source, |_| None).unwrap();
        assert_eq!(resolved.username, "jdoe");
        assert_eq!(resolved.password, "file_pw");

        let from_env = resolve_credentials_with(&source, |name| {
            (name == "COPERNICUSMARINE_SERVICE_PASSWORD").then(|| "env_pw".to_string())
        })
        .unwrap();
        assert_eq!(from_env.password, "env_pw");
    }
}
