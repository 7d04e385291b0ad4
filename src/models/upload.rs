//! The record describing one resumable upload.

use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use std::{collections::BTreeMap, fmt, str::FromStr};
use uuid::Uuid;

/// Opaque, globally unique upload identifier (a random UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UploadId(Uuid);

impl UploadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Resolve an id from a bare id or any URL/path whose last segment is one.
    ///
    /// `Upload-Concat` lists may carry either form.
    pub fn from_reference(reference: &str) -> Option<Self> {
        let segment = reference
            .trim()
            .trim_end_matches('/')
            .rsplit('/')
            .next()?;
        segment.parse().ok()
    }
}

impl Default for UploadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UploadId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl FromStr for UploadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for UploadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The kind of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadType {
    /// A normal resumable upload.
    #[default]
    Regular,
    /// A fragment destined for concatenation.
    Partial,
    /// A virtual upload made of the ordered bytes of its parts. Never appended to.
    Concatenated,
}

impl UploadType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Regular => "REGULAR",
            Self::Partial => "PARTIAL",
            Self::Concatenated => "CONCATENATED",
        }
    }
}

impl FromStr for UploadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGULAR" => Ok(Self::Regular),
            "PARTIAL" => Ok(Self::Partial),
            "CONCATENATED" => Ok(Self::Concatenated),
            other => Err(format!("unknown upload type `{}`", other)),
        }
    }
}

/// Client supplied key/value pairs from `Upload-Metadata`.
///
/// Values are raw bytes; keys sent without a value map to an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadMetadata(BTreeMap<String, Vec<u8>>);

impl UploadMetadata {
    /// Parse the `key base64value,key2 base64value2` wire format.
    ///
    /// Pairs whose value is not valid base64 are skipped.
    pub fn parse(header: &str) -> Self {
        let mut entries = BTreeMap::new();
        for pair in header.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            match pair.split_once(' ') {
                Some((key, value)) => {
                    if let Ok(decoded) = general_purpose::STANDARD.decode(value.trim()) {
                        entries.insert(key.to_string(), decoded);
                    }
                }
                None => {
                    entries.insert(pair.to_string(), Vec::new());
                }
            }
        }
        Self(entries)
    }

    /// Render back to the wire format used by `Upload-Metadata`.
    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(key, value)| {
                if value.is_empty() {
                    key.clone()
                } else {
                    format!("{} {}", key, general_purpose::STANDARD.encode(value))
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Mutable state of one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadInfo {
    pub id: UploadId,
    /// Tenant scoping token supplied by the host; `None` means unscoped.
    pub owner_key: Option<String>,
    /// Total expected bytes. Absent for deferred-length uploads and for final
    /// uploads whose parts are still in progress.
    pub length: Option<u64>,
    /// Bytes durably stored so far.
    pub offset: u64,
    pub upload_type: UploadType,
    /// Byte order of a concatenated upload; empty otherwise.
    pub concatenation_parts: Vec<UploadId>,
    pub metadata: UploadMetadata,
    pub creation_timestamp: DateTime<Utc>,
}

impl UploadInfo {
    pub fn new(length: Option<u64>, metadata: UploadMetadata, owner_key: Option<String>) -> Self {
        Self {
            id: UploadId::new(),
            owner_key,
            length,
            offset: 0,
            upload_type: UploadType::Regular,
            concatenation_parts: Vec::new(),
            metadata,
            creation_timestamp: Utc::now(),
        }
    }

    /// True while bytes are still expected.
    pub fn is_upload_in_progress(&self) -> bool {
        match self.length {
            Some(length) => self.offset < length,
            None => true,
        }
    }

    /// Bytes that may still be appended, when the length is known.
    pub fn remaining(&self) -> Option<u64> {
        self.length.map(|length| length.saturating_sub(self.offset))
    }

    pub fn file_name(&self) -> Option<String> {
        self.metadata
            .get_str("filename")
            .or_else(|| self.metadata.get_str("name"))
    }

    pub fn file_mime_type(&self) -> Option<String> {
        self.metadata
            .get_str("filetype")
            .or_else(|| self.metadata.get_str("type"))
            .or_else(|| self.metadata.get_str("mimetype"))
    }
}

/// Parsed `Upload-Concat` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadConcat {
    Partial,
    /// The raw references (ids or URLs) in declared order.
    Final(Vec<String>),
}

impl UploadConcat {
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        let lowered = value.to_ascii_lowercase();
        if lowered.starts_with("partial") {
            return Some(Self::Partial);
        }
        if lowered.starts_with("final") {
            let references = value
                .split_once(';')
                .map(|(_, list)| {
                    list.split_whitespace()
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            return Some(Self::Final(references));
        }
        None
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Self::Final(_))
    }
}
