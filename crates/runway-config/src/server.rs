//! Server configuration parsing.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

use crate::nodes::{required_string_arg, required_u64_arg, string_children};
use crate::{ConfigError, ConfigResult};

const DEFAULT_LISTEN: &str = "0.0.0.0:3000";
const DEFAULT_DATABASE: &str = "runway.redb";

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: ServerSection,
    /// Path of the embedded database file.
    pub database: PathBuf,
    /// Directory under which builds are cloned.
    pub workspace: PathBuf,
    pub scheduler: SchedulerSettings,
    /// Shell command run inside each checkout.
    pub script: String,
    /// Extra environment for the build script.
    pub env: HashMap<String, String>,
    pub github: GitHubConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    pub listen: SocketAddr,
    /// Externally reachable base URL, used for status target links.
    pub public_url: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            public_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Number of builds executed in parallel.
    pub concurrency: usize,
    /// Wall-clock limit for one build script.
    pub timeout: Option<Duration>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            concurrency: 1,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API token; status reporting is disabled without it.
    pub token: Option<String>,
    /// Shared secret for `X-Hub-Signature-256` verification.
    pub webhook_secret: Option<String>,
}

impl ServerConfig {
    /// Read and parse a configuration file.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        parse_server_config(&text)
    }

    /// Defaults for everything but the build script.
    pub fn with_script(script: impl Into<String>) -> Self {
        Self {
            server: ServerSection::default(),
            database: PathBuf::from(DEFAULT_DATABASE),
            workspace: default_workspace(),
            scheduler: SchedulerSettings::default(),
            script: script.into(),
            env: HashMap::new(),
            github: GitHubConfig::default(),
        }
    }

    /// Replace the worker count, rejecting zero.
    pub fn set_concurrency(&mut self, concurrency: usize) -> ConfigResult<()> {
        if concurrency == 0 {
            return Err(ConfigError::invalid(
                "scheduler.concurrency",
                "must be at least 1",
            ));
        }
        self.scheduler.concurrency = concurrency;
        Ok(())
    }
}

fn default_workspace() -> PathBuf {
    std::env::temp_dir().join("runway-workspaces")
}

/// Parse the server configuration from KDL text.
pub fn parse_server_config(kdl: &str) -> ConfigResult<ServerConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = ServerConfig::with_script(String::new());
    let mut seen = HashSet::new();
    let mut script = None;

    for node in doc.nodes() {
        let name = node.name().value();
        if !seen.insert(name.to_string()) {
            return Err(ConfigError::Duplicate(name.to_string()));
        }
        match name {
            "server" => config.server = parse_server_section(node)?,
            "database" => config.database = PathBuf::from(required_string_arg(node, "database")?),
            "workspace" => {
                config.workspace = PathBuf::from(required_string_arg(node, "workspace")?)
            }
            "scheduler" => config.scheduler = parse_scheduler(node)?,
            "script" => script = Some(required_string_arg(node, "script")?),
            "env" => config.env = string_children(node, "env")?,
            "github" => config.github = parse_github(node)?,
            _ => {} // Ignore unknown nodes
        }
    }

    config.script = script
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingField("script".to_string()))?;
    Ok(config)
}

fn parse_server_section(node: &KdlNode) -> ConfigResult<ServerSection> {
    let mut section = ServerSection::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "listen" => {
                    let raw = required_string_arg(child, "server.listen")?;
                    section.listen = raw.parse().map_err(|_| {
                        ConfigError::invalid(
                            "server.listen",
                            format!("'{}' is not a socket address like {}", raw, DEFAULT_LISTEN),
                        )
                    })?;
                }
                "public-url" => {
                    let url = required_string_arg(child, "server.public-url")?;
                    section.public_url = Some(url.trim_end_matches('/').to_string());
                }
                _ => {}
            }
        }
    }
    Ok(section)
}

fn parse_scheduler(node: &KdlNode) -> ConfigResult<SchedulerSettings> {
    let mut settings = SchedulerSettings::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "concurrency" => {
                    let value = required_u64_arg(child, "scheduler.concurrency")?;
                    if value == 0 {
                        return Err(ConfigError::invalid(
                            "scheduler.concurrency",
                            "must be at least 1",
                        ));
                    }
                    settings.concurrency = usize::try_from(value).map_err(|_| {
                        ConfigError::invalid("scheduler.concurrency", "too large")
                    })?;
                }
                "timeout-secs" => {
                    let secs = required_u64_arg(child, "scheduler.timeout-secs")?;
                    if secs == 0 {
                        return Err(ConfigError::invalid(
                            "scheduler.timeout-secs",
                            "must be at least 1",
                        ));
                    }
                    settings.timeout = Some(Duration::from_secs(secs));
                }
                _ => {}
            }
        }
    }
    Ok(settings)
}

fn parse_github(node: &KdlNode) -> ConfigResult<GitHubConfig> {
    let mut github = GitHubConfig::default();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "token" => github.token = Some(required_string_arg(child, "github.token")?),
                "webhook-secret" => {
                    github.webhook_secret =
                        Some(required_string_arg(child, "github.webhook-secret")?)
                }
                _ => {}
            }
        }
    }
    github.token = github.token.filter(|t| !t.is_empty());
    github.webhook_secret = github.webhook_secret.filter(|s| !s.is_empty());
    Ok(github)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            server {
                listen "127.0.0.1:8080"
                public-url "https://ci.example.com/"
            }
            database "/var/lib/runway/runway.redb"
            workspace "/var/lib/runway/workspaces"
            scheduler {
                concurrency 4
                timeout-secs 3600
            }
            script "./ci.sh"
            env {
                GOPATH "/tmp/go"
                RUST_LOG "debug"
            }
            github {
                token "ghp_secret"
                webhook-secret "hook"
            }
        "#;

        let config = parse_server_config(kdl).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(
            config.server.public_url.as_deref(),
            Some("https://ci.example.com")
        );
        assert_eq!(config.database, PathBuf::from("/var/lib/runway/runway.redb"));
        assert_eq!(config.workspace, PathBuf::from("/var/lib/runway/workspaces"));
        assert_eq!(config.scheduler.concurrency, 4);
        assert_eq!(config.scheduler.timeout, Some(Duration::from_secs(3600)));
        assert_eq!(config.script, "./ci.sh");
        assert_eq!(config.env.get("GOPATH").map(String::as_str), Some("/tmp/go"));
        assert_eq!(config.env.len(), 2);
        assert_eq!(config.github.token.as_deref(), Some("ghp_secret"));
        assert_eq!(config.github.webhook_secret.as_deref(), Some("hook"));
    }

    #[test]
    fn test_defaults() {
        let config = parse_server_config(r#"script "make test""#).unwrap();
        assert_eq!(config.server.listen, DEFAULT_LISTEN.parse().unwrap());
        assert_eq!(config.database, PathBuf::from(DEFAULT_DATABASE));
        assert_eq!(config.workspace, default_workspace());
        assert_eq!(config.scheduler, SchedulerSettings::default());
        assert!(config.env.is_empty());
        assert_eq!(config.github, GitHubConfig::default());
    }

    #[test]
    fn test_script_is_required() {
        let result = parse_server_config(r#"database "x.redb""#);
        assert!(matches!(result, Err(ConfigError::MissingField(f)) if f == "script"));

        let result = parse_server_config(r#"script "  ""#);
        assert!(matches!(result, Err(ConfigError::MissingField(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let kdl = r#"
            script "./ci.sh"
            scheduler {
                concurrency 0
            }
        "#;
        assert!(matches!(
            parse_server_config(kdl),
            Err(ConfigError::InvalidValue { .. })
        ));

        let mut config = ServerConfig::with_script("./ci.sh");
        assert!(config.set_concurrency(0).is_err());
        config.set_concurrency(3).unwrap();
        assert_eq!(config.scheduler.concurrency, 3);
    }

    #[test]
    fn test_invalid_values() {
        let bad_listen = r#"
            script "./ci.sh"
            server {
                listen "not an address"
            }
        "#;
        assert!(matches!(
            parse_server_config(bad_listen),
            Err(ConfigError::InvalidValue { .. })
        ));

        let bad_type = r#"
            script "./ci.sh"
            scheduler {
                concurrency "four"
            }
        "#;
        assert!(matches!(
            parse_server_config(bad_type),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_duplicate_nodes_rejected() {
        let kdl = r#"
            script "./a.sh"
            script "./b.sh"
        "#;
        assert!(matches!(
            parse_server_config(kdl),
            Err(ConfigError::Duplicate(name)) if name == "script"
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            parse_server_config("script {"),
            Err(ConfigError::Parse(_))
        ));
    }
}
