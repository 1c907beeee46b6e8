//! driftguard configuration file
//!
//! Loaded from `driftguard.toml` (or `driftguard.json`) in the config
//! directory, or from the path given with `--config`. A missing default file
//! yields an empty configuration; a missing explicit file is an error.

use crate::paths;
use anyhow::{Context, Result, bail};
use reconcile::{DEFAULT_CONCURRENCY, FieldSpec, HostRef, RecordSchema, SectionPath};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_TOML: &str = "driftguard.toml";
pub const CONFIG_JSON: &str = "driftguard.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

// ============================================================================
// Main Config Schema
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Managed record layout
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Desired set resolution
    #[serde(default)]
    pub desired: DesiredConfig,

    /// Fan-out and transport
    #[serde(default)]
    pub fleet: FleetConfig,

    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// File this config was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    /// Dotted path of the record list inside each store
    #[serde(default = "default_section")]
    pub section: String,

    #[serde(default = "default_fields")]
    pub fields: Vec<FieldSpec>,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            section: default_section(),
            fields: default_fields(),
        }
    }
}

fn default_section() -> String {
    "configuration.SafeControls".to_string()
}

fn default_fields() -> Vec<FieldSpec> {
    RecordSchema::safe_controls().fields().to_vec()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredConfig {
    /// Set used when `--set` is not given
    #[serde(default)]
    pub default_set: Option<String>,

    /// Base URL for remote sets
    #[serde(default)]
    pub remote_base: Option<String>,

    /// Cache for fetched sets (defaults to `<state dir>/sets`)
    #[serde(default)]
    pub cache_dir: Option<String>,

    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for DesiredConfig {
    fn default() -> Self {
        Self {
            default_set: None,
            remote_base: None,
            cache_dir: None,
            timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Local,
    Ssh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FleetConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Overall budget in seconds; unset means no limit
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub transport: TransportKind,

    /// Local transport: per-host mirror root (`<root>/<host>/<store>`)
    #[serde(default)]
    pub local_root: Option<String>,

    #[serde(default)]
    pub ssh: SshConfig,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            timeout_secs: None,
            transport: TransportKind::Local,
            local_root: None,
            ssh: SshConfig::default(),
        }
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default)]
    pub user: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub identity_file: Option<String>,

    /// Extra `-o` options passed to ssh
    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: None,
            port: None,
            identity_file: None,
            options: Vec::new(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub name: String,

    /// Store path on the host
    pub store: String,

    /// SSH address when it differs from the name
    #[serde(default)]
    pub address: Option<String>,
}

impl HostConfig {
    pub fn address(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }
}

// ============================================================================
// Loading and validation
// ============================================================================

impl AppConfig {
    /// Config file path: `explicit` if given, else the first existing of
    /// `driftguard.toml` / `driftguard.json` in the config directory
    pub fn path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let dir = paths::config_dir()?;
        let json = dir.join(CONFIG_JSON);
        let toml = dir.join(CONFIG_TOML);
        if !toml.exists() && json.exists() {
            return Ok(json);
        }
        Ok(toml)
    }

    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = Self::path(explicit)?;

        if !path.exists() {
            if explicit.is_some() {
                bail!("Config file not found: {}", path.display());
            }
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Could not read config file: {}", path.display()))?;
        let mut config = Self::parse(&content, ConfigFormat::from_path(&path))
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.source = Some(path);
        Ok(config)
    }

    /// Parse and validate config text
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content).context("Invalid TOML format")?,
            ConfigFormat::Json => serde_json::from_str(content).context("Invalid JSON format")?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.record_schema()?;
        self.section_path()?;

        if self.fleet.concurrency == 0 {
            bail!("fleet.concurrency must be at least 1");
        }

        if let Some(base) = &self.desired.remote_base
            && !(base.starts_with("http://") || base.starts_with("https://"))
        {
            bail!("desired.remote_base must be an http(s) URL: {base}");
        }

        let mut names = HashSet::new();
        for host in &self.hosts {
            if host.name.trim().is_empty() {
                bail!("Host name cannot be empty");
            }
            if host.store.trim().is_empty() {
                bail!("Host '{}' has an empty store path", host.name);
            }
            if !names.insert(host.name.to_lowercase()) {
                bail!("Host '{}' is declared twice", host.name);
            }
        }

        // Without a mirror root, local hosts naming one store share a file
        if self.fleet.transport == TransportKind::Local && self.fleet.local_root.is_none() {
            let mut stores: HashMap<PathBuf, &str> = HashMap::new();
            for host in &self.hosts {
                if let Some(other) = stores.insert(self.store_path(&host.store), &host.name) {
                    bail!(
                        "Hosts '{other}' and '{}' share the local store {}",
                        host.name,
                        host.store
                    );
                }
            }
        }

        Ok(())
    }

    pub fn record_schema(&self) -> Result<RecordSchema> {
        RecordSchema::new(self.schema.fields.clone()).context("Invalid [schema] fields")
    }

    pub fn section_path(&self) -> Result<SectionPath> {
        SectionPath::parse(&self.schema.section).context("Invalid schema.section")
    }

    /// Desired-set cache directory
    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.desired.cache_dir {
            Some(dir) => Ok(paths::expand(dir)),
            None => paths::cache_dir(),
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.desired.timeout_secs)
    }

    /// Hosts to operate on, optionally restricted to `only` (case-insensitive)
    pub fn host_refs(&self, only: &[String]) -> Result<Vec<HostRef>> {
        for wanted in only {
            if !self.hosts.iter().any(|h| h.name.eq_ignore_ascii_case(wanted)) {
                bail!("Unknown host '{wanted}'");
            }
        }

        Ok(self
            .hosts
            .iter()
            .filter(|h| only.is_empty() || only.iter().any(|w| h.name.eq_ignore_ascii_case(w)))
            .map(|h| HostRef::new(h.name.clone(), self.store_path(&h.store)))
            .collect())
    }

    /// Local stores get `~`/`$VAR` expansion; remote paths are used verbatim
    fn store_path(&self, store: &str) -> PathBuf {
        match self.fleet.transport {
            TransportKind::Local => paths::expand(store),
            TransportKind::Ssh => PathBuf::from(store),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::FieldRole;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[schema]
section = "system.machineKeys"
fields = [
    { name = "Scope", role = "identity", required = true },
    { name = "Key", role = "payload", secret = true },
]

[desired]
default_set = "keys"
remote_base = "https://config.example.com/sets"

[fleet]
concurrency = 4
transport = "ssh"

[fleet.ssh]
user = "deploy"

[[hosts]]
name = "web01"
store = "/etc/app/keys.toml"

[[hosts]]
name = "web02"
store = "/etc/app/keys.toml"
address = "10.0.0.12"
"#;

    #[test]
    fn test_parse_full_config() {
        let config = AppConfig::parse(SAMPLE, ConfigFormat::Toml).unwrap();
        assert_eq!(config.fleet.concurrency, 4);
        assert_eq!(config.fleet.transport, TransportKind::Ssh);
        assert_eq!(config.fleet.ssh.connect_timeout_secs, 10);
        assert_eq!(config.hosts[1].address(), "10.0.0.12");
        assert_eq!(config.hosts[0].address(), "web01");

        let schema = config.record_schema().unwrap();
        assert!(schema.is_secret("Key"));
        assert_eq!(schema.fields()[0].role, FieldRole::Identity);
        assert_eq!(config.section_path().unwrap().to_string(), "system.machineKeys");
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::parse("", ConfigFormat::Toml).unwrap();
        assert_eq!(config.fleet.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.schema.section, "configuration.SafeControls");
        assert_eq!(config.record_schema().unwrap(), RecordSchema::safe_controls());
        assert_eq!(config.fetch_timeout(), Duration::from_secs(15));
        assert!(config.hosts.is_empty());
    }

    #[test]
    fn test_json_config() {
        let json = r#"{"hosts": [{"name": "a", "store": "/srv/a.json"}]}"#;
        let config = AppConfig::parse(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.hosts.len(), 1);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(AppConfig::parse("[fleet]\nparallel = 3\n", ConfigFormat::Toml).is_err());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        assert!(AppConfig::parse("[fleet]\nconcurrency = 0\n", ConfigFormat::Toml).is_err());
    }

    #[test]
    fn test_rejects_duplicate_hosts() {
        let text = r#"
[[hosts]]
name = "web01"
store = "/a.json"
[[hosts]]
name = "WEB01"
store = "/b.json"
"#;
        assert!(AppConfig::parse(text, ConfigFormat::Toml).is_err());
    }

    #[test]
    fn test_rejects_shared_local_store() {
        let text = r#"
[[hosts]]
name = "web01"
store = "/srv/app/web.json"
[[hosts]]
name = "web02"
store = "/srv/app/web.json"
"#;
        let err = AppConfig::parse(text, ConfigFormat::Toml).unwrap_err();
        assert!(format!("{err:#}").contains("share the local store"));

        // Per-host mirrors and remote hosts keep their own copies
        let rooted = format!("[fleet]\nlocal_root = \"/srv/mirror\"\n{text}");
        assert!(AppConfig::parse(&rooted, ConfigFormat::Toml).is_ok());
        let remote = format!("[fleet]\ntransport = \"ssh\"\n{text}");
        assert!(AppConfig::parse(&remote, ConfigFormat::Toml).is_ok());
    }

    #[test]
    fn test_rejects_schema_without_identity() {
        let text = r#"
[schema]
fields = [{ name = "Key", role = "payload" }]
"#;
        assert!(AppConfig::parse(text, ConfigFormat::Toml).is_err());
    }

    #[test]
    fn test_rejects_non_http_remote() {
        let text = "[desired]\nremote_base = \"ftp://example.com\"\n";
        assert!(AppConfig::parse(text, ConfigFormat::Toml).is_err());
    }

    #[test]
    fn test_host_filter() {
        let config = AppConfig::parse(SAMPLE, ConfigFormat::Toml).unwrap();
        let hosts = config.host_refs(&["WEB02".to_string()]).unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, "web02");
        assert_eq!(hosts[0].store, PathBuf::from("/etc/app/keys.toml"));

        assert!(config.host_refs(&["db01".to_string()]).is_err());
        assert_eq!(config.host_refs(&[]).unwrap().len(), 2);
    }

    #[test]
    fn test_load_explicit_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fleet.toml");
        fs::write(&path, SAMPLE).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.source, Some(path));
        assert_eq!(config.desired.default_set.as_deref(), Some("keys"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let tmp = TempDir::new().unwrap();
        assert!(AppConfig::load(Some(&tmp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(ConfigFormat::from_path(Path::new("a.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("a.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("a")), ConfigFormat::Toml);
    }
}
