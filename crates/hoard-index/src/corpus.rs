//! The index and corpus interfaces the query engine evaluates against,
//! plus the record types they serve.
//!
//! [`Index`] is the baseline: point lookups and one unordered enumeration,
//! implementable on disk. [`Corpus`] is the richer in-memory surface:
//! sorted permanode enumerations and attribute-at-a-time resolution.
//! Several constraint features (relations, `at`-based attribute lookup,
//! image dimensions, time sorts) are only defined against a corpus and
//! report [`SearchError::CorpusRequired`](crate::SearchError) otherwise.

use std::{collections::HashMap, ops::ControlFlow};

use chrono::{DateTime, Utc};
use hoard_blob::{BlobMeta, BlobRef, CamliKind};
use hoard_query::LatLong;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// What the index derives about a file (or directory) blob.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileInfo {
    /// Base name of the file; empty when unnamed.
    pub file_name: String,
    /// Size of the reassembled content in bytes.
    pub size: i64,
    /// Declared or sniffed MIME type.
    pub mime_type: String,
    /// Capture time from embedded metadata (EXIF and friends).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    /// Filesystem modification time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mod_time: Option<DateTime<Utc>>,
}

impl FileInfo {
    /// Reports whether the MIME type marks an image.
    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }
}

/// Pixel dimensions of an image file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// How a claim changes a permanode attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClaimKind {
    /// Replaces all values of the attribute with the claim's value.
    SetAttribute,
    /// Appends the claim's value to the attribute.
    AddAttribute,
    /// Removes the claim's value, or every value when the claim's value
    /// is empty.
    DelAttribute,
}

/// A signed assertion mutating one permanode attribute at a point in
/// time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claim {
    /// The permanode the claim applies to.
    pub permanode: BlobRef,
    /// Key id of the signer.
    pub signer: String,
    /// When the claim was made.
    pub date: DateTime<Utc>,
    /// The mutation kind.
    pub kind: ClaimKind,
    /// The attribute being mutated.
    pub attr: String,
    /// The attribute value.
    pub value: String,
}

/// Callback for blob-meta enumerations; return `Break` to stop early.
pub type MetaCallback<'a> = dyn FnMut(&BlobMeta) -> ControlFlow<()> + 'a;

/// Callback for claim enumerations; return `Break` to stop early.
pub type ClaimCallback<'a> = dyn FnMut(&Claim) -> ControlFlow<()> + 'a;

/// The baseline index surface: point lookups plus one unordered
/// enumeration.
pub trait Index {
    /// Streams every known blob's metadata, in no particular order.
    fn enumerate_blob_meta(&self, f: &mut MetaCallback<'_>) -> Result<(), SearchError>;

    /// Returns a blob's metadata, or `None` if unknown.
    fn get_blob_meta(&self, br: &BlobRef) -> Result<Option<BlobMeta>, SearchError>;

    /// Returns the derived record of a file or directory blob.
    fn get_file_info(&self, br: &BlobRef) -> Result<Option<FileInfo>, SearchError>;

    /// Returns the pixel dimensions of an image file.
    fn get_image_info(&self, br: &BlobRef) -> Result<Option<ImageInfo>, SearchError>;

    /// Returns the hash of the file's reassembled content.
    fn get_whole_ref(&self, br: &BlobRef) -> Result<Option<BlobRef>, SearchError>;

    /// Returns the file's embedded media tags (ID3 and friends) as a
    /// tag-name to value map.
    fn get_media_tags(&self, br: &BlobRef) -> Result<Option<HashMap<String, String>>, SearchError>;

    /// Returns the direct children of a directory blob.
    fn get_dir_children(&self, dir: &BlobRef) -> Result<Option<Vec<BlobRef>>, SearchError>;

    /// Streams up to `limit` direct members of a directory (`0` means no
    /// limit). Returns `false` when the directory is unknown.
    fn get_dir_members(
        &self,
        dir: &BlobRef,
        limit: usize,
        f: &mut dyn FnMut(&BlobRef) -> ControlFlow<()>,
    ) -> Result<bool, SearchError>;

    /// Returns every directory that directly contains the blob.
    fn get_parent_dirs(&self, br: &BlobRef) -> Result<Vec<BlobRef>, SearchError>;

    /// Returns the GPS position recorded for a file.
    fn file_lat_long(&self, br: &BlobRef) -> Result<Option<LatLong>, SearchError>;
}

/// The in-memory corpus surface: sorted enumerations and claim-level
/// permanode state.
///
/// Attribute methods take `at`, the point in time at which claims are
/// folded (`None` means no bound), and `owner`, the signer whose claims
/// count (`None` means the corpus's own owner key).
pub trait Corpus: Index {
    /// Streams permanodes ordered by last-modified time, newest first.
    fn enumerate_permanodes_last_modified(&self, f: &mut MetaCallback<'_>);

    /// Streams permanodes ordered by creation time.
    fn enumerate_permanodes_created(&self, f: &mut MetaCallback<'_>, descending: bool);

    /// Streams permanodes whose `camliNodeType` is one of `types`, in no
    /// particular order.
    fn enumerate_permanodes_by_node_types(&self, f: &mut MetaCallback<'_>, types: &[String]);

    /// Streams schema blobs of the given kind (`None` meaning any kind).
    fn enumerate_camli_blobs(&self, kind: Option<CamliKind>, f: &mut MetaCallback<'_>);

    /// Streams the single blob `br`, if known.
    fn enumerate_single_blob(&self, f: &mut MetaCallback<'_>, br: &BlobRef);

    /// Appends the values of `attr` on `pn`, as effective at `at`, to
    /// `out` in insertion order.
    fn append_permanode_attr_values(
        &self,
        out: &mut Vec<String>,
        pn: &BlobRef,
        attr: &str,
        at: Option<DateTime<Utc>>,
        owner: Option<&str>,
    );

    /// Returns the first value of `attr` on `pn` as effective at `at`.
    fn permanode_attr_value(
        &self,
        pn: &BlobRef,
        attr: &str,
        at: Option<DateTime<Utc>>,
        owner: Option<&str>,
    ) -> Option<String>;

    /// Reports whether `attr` on `pn` has the value `value` at `at`.
    fn permanode_has_attr_value(
        &self,
        pn: &BlobRef,
        at: Option<DateTime<Utc>>,
        attr: &str,
        value: &str,
    ) -> bool;

    /// Returns the time of the permanode's last claim.
    fn permanode_modtime(&self, pn: &BlobRef) -> Option<DateTime<Utc>>;

    /// Returns the permanode's best available time: its creation time
    /// (first claim), falling back to its modification time.
    fn permanode_any_time(&self, pn: &BlobRef) -> Option<DateTime<Utc>>;

    /// Streams `pn`'s own claims with `date <= at`, oldest first.
    fn for_each_claim(&self, pn: &BlobRef, at: Option<DateTime<Utc>>, f: &mut ClaimCallback<'_>);

    /// Streams claims on any permanode whose value is the blob `target`,
    /// with `date <= at`.
    fn for_each_claim_back(
        &self,
        target: &BlobRef,
        at: Option<DateTime<Utc>>,
        f: &mut ClaimCallback<'_>,
    );
}
