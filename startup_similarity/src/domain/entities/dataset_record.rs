use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Namespace of the UUIDv5 keys derived from startup names
const STABLE_KEY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_9b7d_4c35_8e21_3f5a_0d9c_7b14);

pub const NAME_FIELD: &str = "name";
pub const DESCRIPTION_FIELD: &str = "description";
/// Reserved payload keys, written by the sync and never exposed in search results
pub const FINGERPRINT_FIELD: &str = "_fingerprint";
pub const EMBEDDING_PROVIDER_FIELD: &str = "_embedding_provider";

/// Loosely-typed dataset columns, ordered by field name
pub type Payload = BTreeMap<String, PayloadValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Number(f64),
    Text(String),
}

impl PayloadValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PayloadValue::Text(text) => Some(text),
            PayloadValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            PayloadValue::Number(number) => Some(*number),
            PayloadValue::Text(_) => None,
        }
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<String> for PayloadValue {
    fn from(value: String) -> Self {
        PayloadValue::Text(value)
    }
}

impl From<f64> for PayloadValue {
    fn from(value: f64) -> Self {
        PayloadValue::Number(value)
    }
}

/// Identifier of a dataset record in the vector index.
///
/// Derived from the normalized startup name only: a startup whose description changes
/// keeps its key, so the sync overwrites its entry instead of adding a second one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct StableKey(Uuid);

impl StableKey {
    /// `" Acme  Corp"` and `"acme corp"` give the same key
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(
            &STABLE_KEY_NAMESPACE,
            normalize_name(name).as_bytes(),
        ))
    }

    /// Reads back a key as returned by the vector index
    pub fn parse(raw: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(raw).map(Self)
    }
}

impl fmt::Display for StableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Trims, collapses inner whitespace and lowercases
fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One startup of the dataset. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRecord {
    key: StableKey,
    name: String,
    description: String,
    fields: Payload,
}

impl DatasetRecord {
    pub fn new(name: impl Into<String>, description: impl Into<String>, fields: Payload) -> Self {
        let name = name.into();
        Self {
            key: StableKey::from_name(&name),
            name,
            description: description.into(),
            fields,
        }
    }

    pub fn key(&self) -> StableKey {
        self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Text submitted to the embedding provider
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn fields(&self) -> &Payload {
        &self.fields
    }

    /// SHA-256 over the record content and the provider that embeds it.
    ///
    /// Each part is length-prefixed so that moving characters between fields
    /// changes the digest.
    pub fn fingerprint(&self, provider_identifier: &str) -> String {
        let mut hasher = Sha256::new();
        let mut write_part = |bytes: &[u8]| {
            hasher.update((bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        write_part(provider_identifier.as_bytes());
        write_part(self.name.as_bytes());
        write_part(self.description.as_bytes());
        for (field, value) in &self.fields {
            write_part(field.as_bytes());
            match value {
                PayloadValue::Number(number) => {
                    write_part(b"n");
                    write_part(&number.to_bits().to_le_bytes());
                }
                PayloadValue::Text(text) => {
                    write_part(b"t");
                    write_part(text.as_bytes());
                }
            }
        }

        format!("{:x}", hasher.finalize())
    }

    /// Payload stored next to the vector: every column plus the sync bookkeeping keys
    pub fn to_index_payload(&self, provider_identifier: &str) -> Payload {
        let mut payload = self.fields.clone();
        payload.insert(NAME_FIELD.into(), self.name.clone().into());
        payload.insert(DESCRIPTION_FIELD.into(), self.description.clone().into());
        payload.insert(
            FINGERPRINT_FIELD.into(),
            self.fingerprint(provider_identifier).into(),
        );
        payload.insert(
            EMBEDDING_PROVIDER_FIELD.into(),
            provider_identifier.to_string().into(),
        );
        payload
    }
}
