use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::parser::{ImageNameParser, ParserOptions, ResolutionContext};
use crate::repo_info::Credentials;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Cluster the client works against by default.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub name: String,
    #[serde(default)]
    pub org: Option<String>,
    pub project: String,
}

/// Registry credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub token: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub cluster: ClusterConfig,
    /// Cluster name to registry base URL.
    pub registries: BTreeMap<String, String>,
    #[serde(default)]
    pub parser: ParserOptions,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// `~/.apolo/config.toml`
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = home::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".apolo").join("config.toml"))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        content.parse()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cluster.name.is_empty() {
            return Err(ConfigError::Invalid("cluster name cannot be empty".to_string()));
        }
        if self.cluster.project.is_empty() {
            return Err(ConfigError::Invalid("project name cannot be empty".to_string()));
        }
        if self.cluster.org.as_deref() == Some("") {
            return Err(ConfigError::Invalid("org name cannot be empty".to_string()));
        }
        if !VALID_LEVELS.contains(&self.log.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "invalid log level '{}', must be one of: {:?}",
                self.log.level, VALID_LEVELS
            )));
        }
        if self.registry_url().is_none() {
            warn!(
                cluster = %self.cluster.name,
                "default cluster has no registry configured"
            );
        }
        Ok(())
    }

    pub fn resolution_context(&self) -> ResolutionContext {
        ResolutionContext {
            default_cluster: self.cluster.name.clone(),
            default_org: self.cluster.org.clone(),
            default_project: self.cluster.project.clone(),
            registry_urls: self.registries.clone(),
        }
    }

    /// Builds the image parser; hostless registry URLs are rejected here.
    pub fn parser(&self) -> Result<ImageNameParser, ConfigError> {
        Ok(ImageNameParser::new(self.resolution_context(), self.parser)?)
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.auth.as_ref().map(|auth| Credentials {
            username: auth.username.clone(),
            token: auth.token.clone(),
        })
    }

    /// Base URL of the default cluster's registry.
    pub fn registry_url(&self) -> Option<&str> {
        self.registries.get(&self.cluster.name).map(String::as_str)
    }

    pub fn log_level(&self) -> String {
        self.log.level.to_lowercase()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(content: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::error::ImageError;
    use crate::image::TagOption;
    use crate::parser::Hierarchy;

    const SAMPLE: &str = r#"
[cluster]
name = "default"
org = "acme"
project = "test-project"

[registries]
default = "https://reg.neu.ro"
other = "http://localhost:5000"

[parser]
hierarchy = "two-level"
decode_local_names = true

[auth]
username = "user"
token = "secret"

[log]
level = "DEBUG"
"#;

    #[test]
    fn test_parse_full_config() {
        let config: Config = SAMPLE.parse().unwrap();
        assert_eq!(config.cluster.name, "default");
        assert_eq!(config.cluster.org.as_deref(), Some("acme"));
        assert_eq!(config.parser.hierarchy, Hierarchy::ClusterProject);
        assert!(config.parser.decode_local_names);
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.registry_url(), Some("https://reg.neu.ro"));

        let credentials = config.credentials().unwrap();
        assert_eq!(credentials.username, "user");
        assert_eq!(credentials.token, "secret");

        let context = config.resolution_context();
        assert_eq!(context.default_cluster, "default");
        assert_eq!(context.default_org.as_deref(), Some("acme"));
        assert_eq!(context.registry_urls.len(), 2);
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config: Config = r#"
[cluster]
name = "default"
project = "test-project"

[registries]
default = "https://reg.neu.ro"
"#
        .parse()
        .unwrap();
        assert_eq!(config.parser, ParserOptions::default());
        assert!(config.auth.is_none());
        assert_eq!(config.log_level(), "info");

        let parser = config.parser().unwrap();
        let image = parser
            .parse_as_remote_image("image:ubuntu", TagOption::Allow)
            .unwrap();
        assert_eq!(image.to_string(), "image://default/test-project/ubuntu:latest");
    }

    #[test]
    fn test_invalid_config() {
        let err = r#"
[cluster]
name = ""
project = "p"

[registries]
"#
        .parse::<Config>()
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = r#"
[cluster]
name = "default"
project = "p"

[registries]

[log]
level = "loud"
"#
        .parse::<Config>()
        .unwrap_err();
        assert!(err.to_string().contains("invalid log level"));

        assert!(matches!(
            "not toml".parse::<Config>(),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_hostless_registry_fails_fast() {
        let config: Config = r#"
[cluster]
name = "default"
project = "p"

[registries]
default = "reg.neu.ro"
"#
        .parse()
        .unwrap();
        let err = config.parser().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Image(ImageError::EmptyRegistryHost(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.cluster.project, "test-project");

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::NotFound(_))
        ));
    }
}
