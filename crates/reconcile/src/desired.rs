//! Desired-state set resolution
//!
//! A desired set is resolved once per run, before any host is touched, from
//! the first source that yields content:
//!
//! 1. an explicit local file
//! 2. `{remote_base}/{name}.json` (a successful fetch refreshes the cache;
//!    an unreachable remote falls back to the cached copy)
//! 3. built-in definitions shipped with the crate
//!
//! A source that is unavailable is skipped with a warning. A source that
//! yields content which then fails to parse or validate is an error; later
//! sources are never consulted to paper over it.

use crate::error::{Error, Result};
use crate::record::{RecordSchema, RecordSet, Validation};
use crate::store::scalar_fields;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BUILTIN_SETS: &[(&str, &str)] = &[
    ("baseline", include_str!("../sets/baseline.json")),
    ("web-parts", include_str!("../sets/web-parts.json")),
];

/// Where a desired set was loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    LocalFile(PathBuf),
    Remote(String),
    Cache(PathBuf),
    Builtin,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provenance::LocalFile(path) => write!(f, "file {}", path.display()),
            Provenance::Remote(url) => write!(f, "remote {url}"),
            Provenance::Cache(path) => write!(f, "cache {}", path.display()),
            Provenance::Builtin => write!(f, "built-in"),
        }
    }
}

/// A named, described, immutable record set plus its provenance
#[derive(Debug, Clone)]
pub struct DesiredSet {
    pub name: String,
    pub description: String,
    pub provenance: Provenance,
    pub records: RecordSet,
}

/// On-disk shape of a desired-set file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DesiredSetFile {
    name: String,
    #[serde(default)]
    description: String,
    records: Vec<Map<String, Value>>,
}

/// Options for the provider
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Directory holding cached remote sets
    pub cache_dir: Option<PathBuf>,
    /// Timeout for remote fetches
    pub timeout: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            cache_dir: None,
            timeout: Duration::from_secs(15),
        }
    }
}

/// Resolves named desired sets from file, remote, cache or built-ins
pub struct DesiredSetProvider {
    schema: Arc<RecordSchema>,
    cache_dir: Option<PathBuf>,
    agent: ureq::Agent,
    builtins: BTreeMap<String, String>,
}

impl DesiredSetProvider {
    pub fn new(schema: Arc<RecordSchema>, options: ProviderOptions) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(options.timeout))
            .build();

        Self {
            schema,
            cache_dir: options.cache_dir,
            agent: ureq::Agent::new_with_config(config),
            builtins: BUILTIN_SETS
                .iter()
                .map(|(name, text)| ((*name).to_string(), (*text).to_string()))
                .collect(),
        }
    }

    /// Register or replace a built-in definition
    pub fn with_builtin(mut self, name: &str, definition: impl Into<String>) -> Self {
        self.builtins.insert(name.to_string(), definition.into());
        self
    }

    /// Names of the built-in definitions
    pub fn builtin_names(&self) -> Vec<&str> {
        self.builtins.keys().map(String::as_str).collect()
    }

    /// Resolve a set by name. Failure here is a pre-flight failure.
    pub fn resolve(
        &self,
        name: &str,
        explicit_path: Option<&Path>,
        remote_base: Option<&str>,
    ) -> Result<DesiredSet> {
        validate_set_name(name)?;

        if let Some(path) = explicit_path {
            match fs::read_to_string(path) {
                Ok(text) => {
                    return self.parse(name, &text, Provenance::LocalFile(path.to_path_buf()));
                }
                Err(e) => log::warn!("Desired set file {} unavailable: {e}", path.display()),
            }
        }

        if let Some(base) = remote_base {
            let url = format!("{}/{name}.json", base.trim_end_matches('/'));
            match self.fetch(&url) {
                Ok(text) => {
                    let set = self.parse(name, &text, Provenance::Remote(url))?;
                    self.store_cache(name, &text);
                    return Ok(set);
                }
                Err(e) => {
                    log::warn!("Remote desired set {url} unavailable: {e}");
                    if let Some(path) = self.cache_path(name).filter(|p| p.exists()) {
                        let text = fs::read_to_string(&path)?;
                        return self.parse(name, &text, Provenance::Cache(path));
                    }
                }
            }
        }

        if let Some(text) = self.builtins.get(name) {
            return self.parse(name, text, Provenance::Builtin);
        }

        Err(Error::not_found(format!(
            "desired set '{name}' (no local file, remote or built-in definition)"
        )))
    }

    /// Parse and validate a desired-set definition
    pub fn parse(&self, requested: &str, text: &str, provenance: Provenance) -> Result<DesiredSet> {
        let origin = provenance.to_string();
        let file: DesiredSetFile =
            serde_json::from_str(text).map_err(|e| Error::parse(&origin, e))?;

        if !file.name.eq_ignore_ascii_case(requested) {
            log::warn!(
                "Requested desired set '{requested}' but {origin} declares '{}'",
                file.name
            );
        }

        let mut records = RecordSet::new(file.name.clone());
        for (index, entry) in file.records.iter().enumerate() {
            let fields = scalar_fields(entry).map_err(|field| {
                Error::parse(
                    &origin,
                    format!("record {index}: field '{field}' is not a scalar value"),
                )
            })?;
            let record = self
                .schema
                .build_record(&file.name, fields, Validation::Strict)?;
            records.insert(record)?;
        }

        log::info!(
            "Resolved desired set '{}' ({} records) from {origin}",
            file.name,
            records.len()
        );

        Ok(DesiredSet {
            name: file.name,
            description: file.description,
            provenance,
            records,
        })
    }

    fn fetch(&self, url: &str) -> Result<String> {
        let mut response = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .call()?;
        Ok(response.body_mut().read_to_string()?)
    }

    fn cache_path(&self, name: &str) -> Option<PathBuf> {
        self.cache_dir.as_ref().map(|dir| dir.join(format!("{name}.json")))
    }

    fn store_cache(&self, name: &str, text: &str) {
        let Some(path) = self.cache_path(name) else {
            return;
        };
        let written = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::write(&path, text));
        if let Err(e) = written {
            log::warn!("Could not cache desired set at {}: {e}", path.display());
        }
    }
}

/// Set names become file and URL path segments
fn validate_set_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::not_found(format!("desired set '{name}' (invalid name)")))
    }
}
