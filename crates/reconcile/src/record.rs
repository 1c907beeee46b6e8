//! Record and RecordSet model
//!
//! A [`Record`] is an ordered tuple of identity fields plus payload fields.
//! Identity fields are compared case-insensitively and decide whether two
//! records denote the same entity; payload fields carry values that are not
//! part of identity (flags, key material) and compare exactly.
//!
//! Field names and roles come from a [`RecordSchema`] so both sides of a diff
//! are built against the same layout.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Marker value meaning "all" for a field. Kept verbatim.
pub const WILDCARD: &str = "*";

/// Role a field plays in a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldRole {
    /// Part of the identity key
    Identity,
    /// Carried value, not part of identity
    Payload,
}

/// Declaration of one record field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub role: FieldRole,
    /// Desired-state records must carry a non-empty value
    #[serde(default)]
    pub required: bool,
    /// Value is masked when displayed
    #[serde(default)]
    pub secret: bool,
}

impl FieldSpec {
    pub fn identity(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role: FieldRole::Identity,
            required: true,
            secret: false,
        }
    }

    pub fn payload(name: &str) -> Self {
        Self {
            name: name.to_string(),
            role: FieldRole::Payload,
            required: false,
            secret: false,
        }
    }

    /// Mark this field as secret
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    /// Mark this field as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// How strictly incoming fields are checked against the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    /// Reject unknown fields and missing required fields (desired state)
    Strict,
    /// Ignore unknown fields, accept absent identity values (actual state)
    Lenient,
}

/// Explicit field layout for the managed record type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
    fields: Vec<FieldSpec>,
}

impl RecordSchema {
    /// Create a schema, checking that it has at least one identity field and
    /// no duplicate names.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        let schema = Self { fields };
        schema.validate()?;
        Ok(schema)
    }

    /// Schema for web-part safe-control entries.
    pub fn safe_controls() -> Self {
        Self {
            fields: vec![
                FieldSpec::identity("Assembly"),
                FieldSpec::identity("Namespace"),
                FieldSpec::identity("TypeName"),
                FieldSpec::payload("Safe"),
                FieldSpec::payload("SafeAgainstScript"),
            ],
        }
    }

    /// Check the schema itself
    pub fn validate(&self) -> Result<()> {
        if !self.fields.iter().any(|f| f.role == FieldRole::Identity) {
            return Err(schema_error("schema", "at least one identity field is required"));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.trim().is_empty() {
                return Err(schema_error("schema", "field names cannot be empty"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(schema_error(
                    "schema",
                    format!("field '{}' declared twice", field.name),
                ));
            }
        }

        Ok(())
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Identity fields in declaration order
    pub fn identity_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.role == FieldRole::Identity)
    }

    /// Payload fields in declaration order
    pub fn payload_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.iter().filter(|f| f.role == FieldRole::Payload)
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn is_secret(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.secret)
    }

    /// Build a record from raw field values.
    ///
    /// `None` means the field was absent (or null). Empty payload values are
    /// dropped, so an empty payload and an absent one compare equal.
    pub fn build_record(
        &self,
        set: &str,
        mut fields: BTreeMap<String, Option<String>>,
        validation: Validation,
    ) -> Result<Record> {
        let unknown: Vec<String> = fields
            .keys()
            .filter(|name| self.field(name).is_none())
            .cloned()
            .collect();

        if !unknown.is_empty() {
            match validation {
                Validation::Strict => {
                    return Err(schema_error(
                        set,
                        format!("unknown field(s): {}", unknown.join(", ")),
                    ));
                }
                Validation::Lenient => {
                    log::debug!("{set}: ignoring unknown field(s) {}", unknown.join(", "));
                }
            }
        }

        let mut identity = Vec::new();
        let mut payload = BTreeMap::new();

        for spec in &self.fields {
            let value = fields.remove(&spec.name).flatten();

            if validation == Validation::Strict
                && spec.required
                && value.as_deref().is_none_or(str::is_empty)
            {
                return Err(schema_error(
                    set,
                    format!("missing required field '{}'", spec.name),
                ));
            }

            match spec.role {
                FieldRole::Identity => identity.push((spec.name.clone(), value)),
                FieldRole::Payload => {
                    if let Some(v) = value.filter(|v| !v.is_empty()) {
                        payload.insert(spec.name.clone(), v);
                    }
                }
            }
        }

        Ok(Record { identity, payload })
    }
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self::safe_controls()
    }
}

fn schema_error(set: &str, message: impl Into<String>) -> Error {
    Error::Schema {
        set: set.to_string(),
        message: message.into(),
    }
}

/// Case-folded identity used for matching and ordering
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct IdentityKey(Vec<Option<String>>);

impl IdentityKey {
    pub fn values(&self) -> &[Option<String>] {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(|v| v.as_deref().unwrap_or("<absent>"))
            .collect();
        write!(f, "{}", parts.join("|"))
    }
}

/// One normalized configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    identity: Vec<(String, Option<String>)>,
    payload: BTreeMap<String, String>,
}

impl Record {
    /// Build a record directly from field pairs.
    ///
    /// Identity fields keep the given order; empty payload values are dropped.
    pub fn new(identity: &[(&str, &str)], payload: &[(&str, &str)]) -> Self {
        Self {
            identity: identity
                .iter()
                .map(|(k, v)| ((*k).to_string(), Some((*v).to_string())))
                .collect(),
            payload: payload
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    /// Identity key with every field folded to lowercase
    pub fn key(&self) -> IdentityKey {
        IdentityKey(
            self.identity
                .iter()
                .map(|(_, v)| v.as_ref().map(|s| s.to_lowercase()))
                .collect(),
        )
    }

    /// Identity fields with their original spelling
    pub fn identity(&self) -> &[(String, Option<String>)] {
        &self.identity
    }

    pub fn payload(&self) -> &BTreeMap<String, String> {
        &self.payload
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.identity
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.as_deref())
            .or_else(|| self.payload.get(name).map(String::as_str))
    }

    /// Payload field names whose values differ from `other`
    pub fn changed_fields(&self, other: &Record) -> Vec<String> {
        let mut names: Vec<&String> = self.payload.keys().chain(other.payload.keys()).collect();
        names.sort();
        names.dedup();

        names
            .into_iter()
            .filter(|name| self.payload.get(*name) != other.payload.get(*name))
            .cloned()
            .collect()
    }

    /// `Field=value, ...` using the original spelling of identity values
    pub fn identity_display(&self) -> String {
        self.identity
            .iter()
            .map(|(k, v)| format!("{}={}", k, v.as_deref().unwrap_or("<absent>")))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Payload rendered for display, masking secret fields unless `reveal`
    pub fn payload_display(&self, schema: &RecordSchema, reveal: bool) -> String {
        self.payload
            .iter()
            .map(|(k, v)| {
                if !reveal && schema.is_secret(k) {
                    format!("{}={}", k, mask_secret(v))
                } else {
                    format!("{k}={v}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// JSON object for writing into a store. Absent identity fields and empty
    /// payload fields are omitted.
    pub fn to_json_object(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut object = serde_json::Map::new();
        for (name, value) in &self.identity {
            if let Some(v) = value {
                object.insert(name.clone(), serde_json::Value::String(v.clone()));
            }
        }
        for (name, value) in &self.payload {
            object.insert(name.clone(), serde_json::Value::String(value.clone()));
        }
        object
    }
}

/// Display-only obfuscation of a secret value
pub fn mask_secret(value: &str) -> String {
    let visible: String = value.chars().take(4).collect();
    if value.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}

/// Records keyed by identity. No two entries share an identity key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordSet {
    name: String,
    records: BTreeMap<IdentityKey, Record>,
}

impl RecordSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: BTreeMap::new(),
        }
    }

    /// Build a set, failing with a conflict on the first duplicated identity
    pub fn from_records(
        name: impl Into<String>,
        records: impl IntoIterator<Item = Record>,
    ) -> Result<Self> {
        let mut set = Self::new(name);
        for record in records {
            set.insert(record)?;
        }
        Ok(set)
    }

    /// Insert a record, rejecting duplicate identities
    pub fn insert(&mut self, record: Record) -> Result<()> {
        let key = record.key();
        if self.records.contains_key(&key) {
            return Err(Error::Conflict {
                set: self.name.clone(),
                identity: record.identity_display(),
            });
        }
        self.records.insert(key, record);
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, key: &IdentityKey) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.records.contains_key(key)
    }

    /// Identity keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.records.keys()
    }

    /// Records in identity order
    pub fn iter(&self) -> impl Iterator<Item = (&IdentityKey, &Record)> {
        self.records.iter()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, Option<&str>)]) -> BTreeMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_identity_is_case_insensitive() {
        let a = Record::new(&[("Namespace", "Foo.Bar"), ("TypeName", "*")], &[]);
        let b = Record::new(&[("Namespace", "foo.bar"), ("TypeName", "*")], &[]);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_payload_comparison_is_exact() {
        let a = Record::new(&[("Namespace", "Foo")], &[("Safe", "True")]);
        let b = Record::new(&[("Namespace", "Foo")], &[("Safe", "true")]);
        assert_eq!(a.changed_fields(&b), vec!["Safe".to_string()]);
    }

    #[test]
    fn test_changed_fields_includes_one_sided_payload() {
        let a = Record::new(&[("Namespace", "Foo")], &[("Safe", "True")]);
        let b = Record::new(&[("Namespace", "Foo")], &[("SafeAgainstScript", "False")]);
        assert_eq!(
            a.changed_fields(&b),
            vec!["Safe".to_string(), "SafeAgainstScript".to_string()]
        );
    }

    #[test]
    fn test_absent_identity_differs_from_empty() {
        let schema = RecordSchema::new(vec![
            FieldSpec::identity("Assembly").optional(),
            FieldSpec::identity("Namespace"),
        ])
        .unwrap();

        let absent = schema
            .build_record(
                "t",
                fields(&[("Namespace", Some("A"))]),
                Validation::Lenient,
            )
            .unwrap();
        let empty = schema
            .build_record(
                "t",
                fields(&[("Assembly", Some("")), ("Namespace", Some("A"))]),
                Validation::Lenient,
            )
            .unwrap();

        assert_ne!(absent.key(), empty.key());
    }

    #[test]
    fn test_strict_rejects_unknown_field() {
        let schema = RecordSchema::safe_controls();
        let err = schema
            .build_record(
                "baseline",
                fields(&[
                    ("Assembly", Some("A")),
                    ("Namespace", Some("N")),
                    ("TypeName", Some("*")),
                    ("Colour", Some("blue")),
                ]),
                Validation::Strict,
            )
            .unwrap_err();
        assert!(err.to_string().contains("Colour"));
    }

    #[test]
    fn test_strict_rejects_missing_required() {
        let schema = RecordSchema::safe_controls();
        let err = schema
            .build_record(
                "baseline",
                fields(&[("Assembly", Some("A")), ("Namespace", Some("N"))]),
                Validation::Strict,
            )
            .unwrap_err();
        assert!(err.to_string().contains("TypeName"));
    }

    #[test]
    fn test_lenient_ignores_unknown_and_missing() {
        let schema = RecordSchema::safe_controls();
        let record = schema
            .build_record(
                "web01",
                fields(&[("Namespace", Some("N")), ("Extra", Some("x"))]),
                Validation::Lenient,
            )
            .unwrap();
        assert_eq!(record.get("Namespace"), Some("N"));
        assert_eq!(record.get("Assembly"), None);
    }

    #[test]
    fn test_empty_payload_is_dropped() {
        let schema = RecordSchema::safe_controls();
        let record = schema
            .build_record(
                "t",
                fields(&[
                    ("Assembly", Some("A")),
                    ("Namespace", Some("N")),
                    ("TypeName", Some("*")),
                    ("Safe", Some("")),
                ]),
                Validation::Strict,
            )
            .unwrap();
        assert!(record.payload().is_empty());
    }

    #[test]
    fn test_wildcard_kept_verbatim() {
        let record = Record::new(&[("TypeName", WILDCARD)], &[]);
        assert_eq!(record.get("TypeName"), Some("*"));
        assert_eq!(
            record.to_json_object().get("TypeName"),
            Some(&serde_json::Value::String("*".into()))
        );
    }

    #[test]
    fn test_record_set_rejects_duplicates() {
        let err = RecordSet::from_records(
            "baseline",
            vec![
                Record::new(&[("Namespace", "Foo.Bar")], &[]),
                Record::new(&[("Namespace", "FOO.BAR")], &[]),
            ],
        )
        .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn test_schema_requires_identity() {
        let err = RecordSchema::new(vec![FieldSpec::payload("Key")]).unwrap_err();
        assert!(err.to_string().contains("identity"));
    }

    #[test]
    fn test_schema_rejects_duplicate_names() {
        let err = RecordSchema::new(vec![
            FieldSpec::identity("Name"),
            FieldSpec::payload("Name"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("twice"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abc"), "****");
        assert_eq!(mask_secret("AAAAB3NzaC1yc2E"), "AAAA****");
    }

    #[test]
    fn test_payload_display_masks_secrets() {
        let schema = RecordSchema::new(vec![
            FieldSpec::identity("User"),
            FieldSpec::payload("Key").secret(),
        ])
        .unwrap();
        let record = Record::new(&[("User", "deploy")], &[("Key", "ssh-ed25519 AAAA")]);
        assert_eq!(record.payload_display(&schema, false), "Key=ssh-****");
        assert_eq!(
            record.payload_display(&schema, true),
            "Key=ssh-ed25519 AAAA"
        );
    }
}
