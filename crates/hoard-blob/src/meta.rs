//! Blob metadata as recorded by the index.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::BlobRef;

/// The structural type of a schema blob.
///
/// Blobs holding opaque bytes carry no kind; schema blobs are JSON documents
/// whose `camliType` field names one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CamliKind {
    /// A stable identity that accrues attribute claims over time.
    Permanode,
    /// A file whose contents are split into recoverable blobs.
    File,
    /// A directory holding a set of child blob references.
    Directory,
    /// A signed assertion mutating a permanode attribute.
    Claim,
}

impl CamliKind {
    /// The wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Permanode => "permanode",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Claim => "claim",
        }
    }
}

impl fmt::Display for CamliKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CamliKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "permanode" => Ok(Self::Permanode),
            "file" => Ok(Self::File),
            "directory" => Ok(Self::Directory),
            "claim" => Ok(Self::Claim),
            other => Err(format!("unknown camli type {other:?}")),
        }
    }
}

/// What the index knows about a blob without fetching its bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobMeta {
    /// The blob's content hash.
    pub blob_ref: BlobRef,
    /// Size of the blob in bytes.
    pub size: u32,
    /// Structural type tag; `None` for opaque byte blobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camli_type: Option<CamliKind>,
}

impl BlobMeta {
    /// Creates metadata for an opaque blob.
    pub fn new(blob_ref: BlobRef, size: u32) -> Self {
        Self {
            blob_ref,
            size,
            camli_type: None,
        }
    }

    /// Creates metadata for a schema blob of the given kind.
    pub fn schema(blob_ref: BlobRef, size: u32, kind: CamliKind) -> Self {
        Self {
            blob_ref,
            size,
            camli_type: Some(kind),
        }
    }

    /// Reports whether this blob is a permanode.
    pub fn is_permanode(&self) -> bool {
        self.camli_type == Some(CamliKind::Permanode)
    }
}
