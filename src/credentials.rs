use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use base64::Engine;

use crate::error::Error;
use crate::process::ProcessEntry;

/// Username the client expects for Basic auth.
pub const DEFAULT_USERNAME: &str = "riot";

/// Per-launch credentials for the client's loopback API.
///
/// Immutable; a relaunched client gets a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
    pub port: u16,
    /// PID of the owning application, as reported on its command line.
    pub pid: Option<u32>,
    /// Executable that relaunches the client stack.
    pub respawn_path: Option<PathBuf>,
    pub region: Option<String>,
    pub app_name: Option<String>,
}

impl Credentials {
    /// Build credentials from parsed `--key=value` flags.
    pub fn from_flags(flags: &HashMap<String, String>) -> Result<Self, Error> {
        let secret = flags
            .get("remoting-auth-token")
            .filter(|s| !s.is_empty())
            .ok_or(Error::MissingFlag("remoting-auth-token"))?
            .clone();

        let port = flags.get("app-port").ok_or(Error::MissingFlag("app-port"))?;
        let port = port.parse::<u16>().map_err(|_| Error::InvalidFlag {
            flag: "app-port",
            value: port.clone(),
        })?;

        let pid = flags.get("app-pid").and_then(|pid| pid.parse().ok());

        let respawn_path = flags.get("respawn-command").map(|command| {
            match flags.get("install-directory") {
                Some(directory) => PathBuf::from(directory).join(command),
                None => PathBuf::from(command),
            }
        });

        Ok(Self {
            username: DEFAULT_USERNAME.to_string(),
            secret,
            port,
            pid,
            respawn_path,
            region: flags.get("region").cloned(),
            app_name: flags.get("ux-name").cloned(),
        })
    }

    /// Base64 `user:secret`, the value after `Basic ` in the auth header.
    pub fn basic_token(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", self.username, self.secret))
    }

    pub fn authorization_header(&self) -> String {
        format!("Basic {}", self.basic_token())
    }

    pub fn local_address(&self) -> String {
        format!("https://127.0.0.1:{}", self.port)
    }

    pub fn websocket_address(&self) -> String {
        format!("wss://127.0.0.1:{}", self.port)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("port", &self.port)
            .field("pid", &self.pid)
            .field("respawn_path", &self.respawn_path)
            .field("region", &self.region)
            .field("app_name", &self.app_name)
            .finish()
    }
}

/// Turns a discovered process into credentials.
pub trait CredentialSource: Send + Sync {
    fn credentials(&self, process: &ProcessEntry) -> Result<Credentials, Error>;
}

/// Reads credentials from the process's own command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLineCredentials;

impl CredentialSource for CommandLineCredentials {
    fn credentials(&self, process: &ProcessEntry) -> Result<Credentials, Error> {
        Credentials::from_flags(&parse_flags(&process.cmd))
    }
}

/// Collect `--key=value` arguments. Surrounding quotes are stripped; arguments
/// without `=` or without the `--` prefix are ignored.
pub fn parse_flags<S: AsRef<str>>(args: &[S]) -> HashMap<String, String> {
    let mut flags = HashMap::new();
    for arg in args {
        let arg = unquote(arg.as_ref().trim());
        let Some(flag) = arg.strip_prefix("--") else {
            continue;
        };
        if let Some((key, value)) = flag.split_once('=') {
            flags.insert(key.to_string(), unquote(value).to_string());
        }
    }
    flags
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s)
}
