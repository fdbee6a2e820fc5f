//! Blob references and metadata for the hoard data store.
//!
//! Every piece of data in the store is an immutable blob addressed by the
//! hash of its content. This crate provides the two types everything else
//! builds on:
//!
//! - [`BlobRef`]: a parsed content hash (`sha224-<hex>`) with ordering and
//!   prefix testing
//! - [`BlobMeta`]: what the index knows about a blob without reading it —
//!   its ref, size, and structural [`CamliKind`] tag

#![warn(missing_docs)]

mod blobref;
mod meta;

pub use blobref::{BlobRef, ParseRefError};
pub use meta::{BlobMeta, CamliKind};
