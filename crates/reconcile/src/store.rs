//! Structured configuration store documents
//!
//! A host store is a JSON or TOML document with a nested section holding the
//! managed records, e.g. `configuration.SafeControls = [ {...}, ... ]`. The
//! document is kept as a whole so that appending records and writing it back
//! leaves every other part untouched. TOML stores additionally keep their
//! `toml_edit` tree, so comments, datetimes and layout survive a rewrite.

use crate::error::{Error, Result};
use crate::record::{Record, RecordSchema, RecordSet, Validation};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use toml_edit::{ArrayOfTables, DocumentMut, InlineTable, Item, Table};

/// Serialization format of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Json,
    Toml,
}

impl StoreFormat {
    /// Detect the format from a file extension. Anything but `.toml` is JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Dotted path to the record section, e.g. `configuration.SafeControls`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPath(Vec<String>);

impl SectionPath {
    pub fn parse(path: &str) -> Result<Self> {
        let segments: Vec<String> = path.split('.').map(|s| s.trim().to_string()).collect();
        if segments.iter().any(String::is_empty) {
            return Err(Error::parse("section path", format!("invalid path '{path}'")));
        }
        Ok(Self(segments))
    }

    fn parent(&self) -> &[String] {
        &self.0[..self.0.len() - 1]
    }

    fn leaf(&self) -> &str {
        &self.0[self.0.len() - 1]
    }
}

impl fmt::Display for SectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Key the `toml` crate uses when a datetime passes through serde
const TOML_DATETIME_KEY: &str = "$__toml_private_datetime";

/// A parsed store document
#[derive(Debug, Clone)]
pub struct StoreDocument {
    format: StoreFormat,
    origin: String,
    /// Read view used for extraction
    root: Value,
    /// Write view of a TOML store
    toml: Option<DocumentMut>,
}

impl StoreDocument {
    /// Parse raw store bytes. `origin` names the host/file in errors.
    pub fn parse(bytes: &[u8], format: StoreFormat, origin: &str) -> Result<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::parse(origin, e))?;

        let (root, toml): (Value, _) = match format {
            StoreFormat::Json => (
                serde_json::from_str(text).map_err(|e| Error::parse(origin, e))?,
                None,
            ),
            StoreFormat::Toml => (
                toml::from_str(text).map_err(|e| Error::parse(origin, e))?,
                Some(
                    text.parse::<DocumentMut>()
                        .map_err(|e| Error::parse(origin, e))?,
                ),
            ),
        };

        if !root.is_object() {
            return Err(Error::parse(origin, "store root must be an object/table"));
        }

        Ok(Self {
            format,
            origin: origin.to_string(),
            root,
            toml,
        })
    }

    pub fn format(&self) -> StoreFormat {
        self.format
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Serialize the whole document back to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match &self.toml {
            Some(document) => Ok(document.to_string().into_bytes()),
            None => {
                let mut bytes = serde_json::to_vec_pretty(&self.root)?;
                bytes.push(b'\n');
                Ok(bytes)
            }
        }
    }

    /// Entries of the record section.
    ///
    /// A missing parent is NotFound; a missing leaf means zero entries.
    pub fn section(&self, path: &SectionPath) -> Result<Option<&Vec<Value>>> {
        let mut node = &self.root;
        for segment in path.parent() {
            node = match node.get(segment) {
                Some(child) if child.is_object() => child,
                Some(_) => {
                    return Err(Error::parse(
                        &self.origin,
                        format!("'{segment}' in {path} is not a table"),
                    ));
                }
                None => {
                    return Err(Error::not_found(format!(
                        "section {path} in {} (missing '{segment}')",
                        self.origin
                    )));
                }
            };
        }

        match node.get(path.leaf()) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(entries)) => Ok(Some(entries)),
            Some(_) => Err(Error::parse(
                &self.origin,
                format!("section {path} is not a list"),
            )),
        }
    }

    /// Normalize the section entries into a record set
    pub fn extract(
        &self,
        schema: &RecordSchema,
        path: &SectionPath,
        validation: Validation,
    ) -> Result<RecordSet> {
        let mut set = RecordSet::new(self.origin.clone());
        let Some(entries) = self.section(path)? else {
            log::debug!("{}: section {path} absent, no records", self.origin);
            return Ok(set);
        };

        for (index, entry) in entries.iter().enumerate() {
            let fields = object_fields(entry, &self.origin, index)?;
            let record = schema.build_record(&self.origin, fields, validation)?;
            set.insert(record)?;
        }

        Ok(set)
    }

    /// Append records to the section, creating the leaf list if absent
    pub fn append(&mut self, path: &SectionPath, records: &[Record]) -> Result<()> {
        if let Some(document) = &mut self.toml {
            append_toml(document, path, records, &self.origin)?;
        }
        self.append_value(path, records)
    }

    fn append_value(&mut self, path: &SectionPath, records: &[Record]) -> Result<()> {
        let origin = self.origin.clone();
        let mut node = &mut self.root;
        for segment in path.parent() {
            node = match node.get_mut(segment) {
                Some(child) if child.is_object() => child,
                Some(_) => {
                    return Err(Error::parse(
                        &origin,
                        format!("'{segment}' in {path} is not a table"),
                    ));
                }
                None => {
                    return Err(Error::not_found(format!(
                        "section {path} in {origin} (missing '{segment}')"
                    )));
                }
            };
        }

        let Value::Object(table) = node else {
            return Err(Error::parse(&origin, format!("{path} parent is not a table")));
        };

        let leaf = table
            .entry(path.leaf().to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if leaf.is_null() {
            *leaf = Value::Array(Vec::new());
        }

        let Value::Array(entries) = leaf else {
            return Err(Error::parse(&origin, format!("section {path} is not a list")));
        };

        entries.extend(records.iter().map(|r| Value::Object(r.to_json_object())));
        Ok(())
    }
}

/// Append to the `toml_edit` tree. A new leaf becomes an array of tables;
/// an existing inline array gets inline tables.
fn append_toml(
    document: &mut DocumentMut,
    path: &SectionPath,
    records: &[Record],
    origin: &str,
) -> Result<()> {
    let mut table: &mut Table = document.as_table_mut();
    for segment in path.parent() {
        table = match table.get_mut(segment) {
            Some(Item::Table(child)) => child,
            Some(_) => {
                return Err(Error::parse(
                    origin,
                    format!("'{segment}' in {path} is not a table"),
                ));
            }
            None => {
                return Err(Error::not_found(format!(
                    "section {path} in {origin} (missing '{segment}')"
                )));
            }
        };
    }

    let leaf = table
        .entry(path.leaf())
        .or_insert(Item::ArrayOfTables(ArrayOfTables::new()));
    if leaf.is_none() {
        *leaf = Item::ArrayOfTables(ArrayOfTables::new());
    }

    match leaf {
        Item::ArrayOfTables(entries) => {
            for record in records {
                let mut entry = Table::new();
                for (name, value) in record_strings(record) {
                    entry.insert(name.as_str(), toml_edit::value(value));
                }
                entries.push(entry);
            }
            Ok(())
        }
        Item::Value(toml_edit::Value::Array(entries)) => {
            for record in records {
                let mut entry = InlineTable::new();
                for (name, value) in record_strings(record) {
                    entry.insert(name.as_str(), value.into());
                }
                entries.push(entry);
            }
            Ok(())
        }
        _ => Err(Error::parse(origin, format!("section {path} is not a list"))),
    }
}

/// Field name and value pairs as written into a store
fn record_strings(record: &Record) -> Vec<(String, String)> {
    record
        .to_json_object()
        .into_iter()
        .filter_map(|(name, value)| match value {
            Value::String(s) => Some((name, s)),
            _ => None,
        })
        .collect()
}

/// Flatten one entry into scalar field values
fn object_fields(
    entry: &Value,
    origin: &str,
    index: usize,
) -> Result<BTreeMap<String, Option<String>>> {
    let Value::Object(object) = entry else {
        return Err(Error::parse(origin, format!("entry {index} is not an object")));
    };

    scalar_fields(object).map_err(|field| {
        Error::parse(
            origin,
            format!("entry {index}: field '{field}' is not a scalar value"),
        )
    })
}

/// Scalar values become strings, null becomes absent. Returns the offending
/// field name for nested values.
pub(crate) fn scalar_fields(
    object: &Map<String, Value>,
) -> std::result::Result<BTreeMap<String, Option<String>>, String> {
    object
        .iter()
        .map(|(name, value)| {
            let scalar = match value {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                Value::Bool(b) => Some(b.to_string()),
                Value::Number(n) => Some(n.to_string()),
                Value::Object(inner) if inner.len() == 1 => match inner.get(TOML_DATETIME_KEY) {
                    Some(Value::String(datetime)) => Some(datetime.clone()),
                    _ => return Err(name.clone()),
                },
                Value::Array(_) | Value::Object(_) => return Err(name.clone()),
            };
            Ok((name.clone(), scalar))
        })
        .collect()
}
