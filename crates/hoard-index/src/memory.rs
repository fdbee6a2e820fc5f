//! An in-memory [`Corpus`] implementation.
//!
//! [`MemoryCorpus`] holds the whole index in maps: blob metadata, claims
//! per permanode (kept sorted by time so attribute-at-a-time resolution is
//! a bounded scan), derived file records, and directory structure. It is
//! the reference backend for the query engine and the fixture builder for
//! its tests.
//!
//! Mutation takes `&mut self` and queries take `&self`, so a running query
//! can never observe a mid-flight mutation.

use std::{
    collections::{BTreeMap, HashMap},
    ops::ControlFlow,
};

use chrono::{DateTime, Utc};
use hoard_blob::{BlobMeta, BlobRef, CamliKind};
use hoard_query::LatLong;

use crate::{
    corpus::{Claim, ClaimCallback, ClaimKind, Corpus, FileInfo, ImageInfo, Index, MetaCallback},
    error::SearchError,
};

/// Nominal stored size of a synthesized schema blob.
const SCHEMA_BLOB_SIZE: u32 = 100;

/// The whole index held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCorpus {
    /// Key id of the store owner; claims by other signers do not count
    /// toward attribute state.
    owner: String,
    /// Every known blob, keyed by ref (ordered for deterministic
    /// enumeration).
    blobs: BTreeMap<BlobRef, BlobMeta>,
    /// Claims per permanode, sorted by date.
    claims: HashMap<BlobRef, Vec<Claim>>,
    /// Claims whose value names a blob, keyed by that target, sorted by
    /// date.
    claim_back: HashMap<BlobRef, Vec<Claim>>,
    /// Derived file/directory records.
    files: HashMap<BlobRef, FileInfo>,
    /// Image dimensions.
    images: HashMap<BlobRef, ImageInfo>,
    /// Whole-content hashes.
    whole_refs: HashMap<BlobRef, BlobRef>,
    /// Embedded media tags.
    media_tags: HashMap<BlobRef, HashMap<String, String>>,
    /// GPS positions of files.
    file_locations: HashMap<BlobRef, LatLong>,
    /// Directory children.
    dirs: HashMap<BlobRef, Vec<BlobRef>>,
    /// Blob to containing directories.
    parents: HashMap<BlobRef, Vec<BlobRef>>,
}

impl MemoryCorpus {
    /// Creates an empty corpus owned by the given signer key id.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            ..Self::default()
        }
    }

    /// Registers a blob with explicit metadata.
    pub fn add_blob(&mut self, meta: BlobMeta) {
        self.blobs.insert(meta.blob_ref.clone(), meta);
    }

    /// Registers a permanode blob.
    pub fn add_permanode(&mut self, pn: &BlobRef) {
        self.add_blob(BlobMeta::schema(
            pn.clone(),
            SCHEMA_BLOB_SIZE,
            CamliKind::Permanode,
        ));
    }

    /// Records a claim. The claim's permanode must already be registered;
    /// claims arriving out of time order are kept sorted.
    pub fn add_claim(&mut self, claim: Claim) {
        if let Ok(target) = claim.value.parse::<BlobRef>() {
            let back = self.claim_back.entry(target).or_default();
            let pos = back.partition_point(|c| c.date <= claim.date);
            back.insert(pos, claim.clone());
        }
        let claims = self.claims.entry(claim.permanode.clone()).or_default();
        let pos = claims.partition_point(|c| c.date <= claim.date);
        claims.insert(pos, claim);
    }

    /// Records a set-attribute claim by the corpus owner.
    pub fn set_attr(&mut self, pn: &BlobRef, date: DateTime<Utc>, attr: &str, value: &str) {
        self.add_claim(self.owner_claim(pn, date, ClaimKind::SetAttribute, attr, value));
    }

    /// Records an add-attribute claim by the corpus owner.
    pub fn add_attr(&mut self, pn: &BlobRef, date: DateTime<Utc>, attr: &str, value: &str) {
        self.add_claim(self.owner_claim(pn, date, ClaimKind::AddAttribute, attr, value));
    }

    /// Records a del-attribute claim by the corpus owner; an empty value
    /// removes every value.
    pub fn del_attr(&mut self, pn: &BlobRef, date: DateTime<Utc>, attr: &str, value: &str) {
        self.add_claim(self.owner_claim(pn, date, ClaimKind::DelAttribute, attr, value));
    }

    /// Builds a claim signed by the corpus owner.
    fn owner_claim(
        &self,
        pn: &BlobRef,
        date: DateTime<Utc>,
        kind: ClaimKind,
        attr: &str,
        value: &str,
    ) -> Claim {
        Claim {
            permanode: pn.clone(),
            signer: self.owner.clone(),
            date,
            kind,
            attr: attr.to_string(),
            value: value.to_string(),
        }
    }

    /// Registers a file blob and its derived record.
    pub fn add_file(&mut self, br: &BlobRef, info: FileInfo) {
        self.add_blob(BlobMeta::schema(
            br.clone(),
            info.size.clamp(0, u32::MAX as i64) as u32,
            CamliKind::File,
        ));
        self.files.insert(br.clone(), info);
    }

    /// Records an image's pixel dimensions.
    pub fn set_image_info(&mut self, br: &BlobRef, width: u32, height: u32) {
        self.images.insert(br.clone(), ImageInfo { width, height });
    }

    /// Records a file's whole-content hash.
    pub fn set_whole_ref(&mut self, br: &BlobRef, whole: BlobRef) {
        self.whole_refs.insert(br.clone(), whole);
    }

    /// Records a file's media tags.
    pub fn set_media_tags(&mut self, br: &BlobRef, tags: HashMap<String, String>) {
        self.media_tags.insert(br.clone(), tags);
    }

    /// Records a file's GPS position.
    pub fn set_file_location(&mut self, br: &BlobRef, position: LatLong) {
        self.file_locations.insert(br.clone(), position);
    }

    /// Registers a directory blob with its name and children, updating
    /// the parent map.
    pub fn add_dir(&mut self, br: &BlobRef, name: &str, children: Vec<BlobRef>) {
        self.add_blob(BlobMeta::schema(
            br.clone(),
            SCHEMA_BLOB_SIZE,
            CamliKind::Directory,
        ));
        self.files.insert(
            br.clone(),
            FileInfo {
                file_name: name.to_string(),
                ..FileInfo::default()
            },
        );
        for child in &children {
            self.parents.entry(child.clone()).or_default().push(br.clone());
        }
        self.dirs.insert(br.clone(), children);
    }

    /// Folds `attr` claims on `pn` up to `at` into `out`, starting at the
    /// buffer's current length.
    fn fold_attr_values(
        &self,
        out: &mut Vec<String>,
        pn: &BlobRef,
        attr: &str,
        at: Option<DateTime<Utc>>,
        owner: Option<&str>,
    ) {
        let Some(claims) = self.claims.get(pn) else {
            return;
        };
        let owner = owner.unwrap_or(&self.owner);
        let start = out.len();
        for claim in claims {
            if let Some(at) = at
                && claim.date > at
            {
                break;
            }
            if claim.signer != owner || claim.attr != attr {
                continue;
            }
            match claim.kind {
                ClaimKind::SetAttribute => {
                    out.truncate(start);
                    out.push(claim.value.clone());
                }
                ClaimKind::AddAttribute => out.push(claim.value.clone()),
                ClaimKind::DelAttribute => {
                    if claim.value.is_empty() {
                        out.truncate(start);
                    } else {
                        let mut i = start;
                        while i < out.len() {
                            if out[i] == claim.value {
                                out.remove(i);
                            } else {
                                i += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Streams `metas` to `f`, honoring early exit.
    fn stream<'m>(f: &mut MetaCallback<'_>, metas: impl Iterator<Item = &'m BlobMeta>) {
        for meta in metas {
            if f(meta).is_break() {
                return;
            }
        }
    }

    /// Permanode refs paired with a time key, sorted ascending by
    /// `(time, ref)`; permanodes without claims are skipped.
    fn permanodes_by_time(
        &self,
        key: impl Fn(&BlobRef) -> Option<DateTime<Utc>>,
    ) -> Vec<(DateTime<Utc>, &BlobRef)> {
        let mut keyed: Vec<(DateTime<Utc>, &BlobRef)> = self
            .blobs
            .values()
            .filter(|m| m.is_permanode())
            .filter_map(|m| key(&m.blob_ref).map(|t| (t, &m.blob_ref)))
            .collect();
        keyed.sort();
        keyed
    }
}

impl Index for MemoryCorpus {
    fn enumerate_blob_meta(&self, f: &mut MetaCallback<'_>) -> Result<(), SearchError> {
        Self::stream(f, self.blobs.values());
        Ok(())
    }

    fn get_blob_meta(&self, br: &BlobRef) -> Result<Option<BlobMeta>, SearchError> {
        Ok(self.blobs.get(br).cloned())
    }

    fn get_file_info(&self, br: &BlobRef) -> Result<Option<FileInfo>, SearchError> {
        Ok(self.files.get(br).cloned())
    }

    fn get_image_info(&self, br: &BlobRef) -> Result<Option<ImageInfo>, SearchError> {
        Ok(self.images.get(br).copied())
    }

    fn get_whole_ref(&self, br: &BlobRef) -> Result<Option<BlobRef>, SearchError> {
        Ok(self.whole_refs.get(br).cloned())
    }

    fn get_media_tags(&self, br: &BlobRef) -> Result<Option<HashMap<String, String>>, SearchError> {
        Ok(self.media_tags.get(br).cloned())
    }

    fn get_dir_children(&self, dir: &BlobRef) -> Result<Option<Vec<BlobRef>>, SearchError> {
        Ok(self.dirs.get(dir).cloned())
    }

    fn get_dir_members(
        &self,
        dir: &BlobRef,
        limit: usize,
        f: &mut dyn FnMut(&BlobRef) -> ControlFlow<()>,
    ) -> Result<bool, SearchError> {
        let Some(children) = self.dirs.get(dir) else {
            return Ok(false);
        };
        for (i, child) in children.iter().enumerate() {
            if limit != 0 && i == limit {
                break;
            }
            if f(child).is_break() {
                break;
            }
        }
        Ok(true)
    }

    fn get_parent_dirs(&self, br: &BlobRef) -> Result<Vec<BlobRef>, SearchError> {
        Ok(self.parents.get(br).cloned().unwrap_or_default())
    }

    fn file_lat_long(&self, br: &BlobRef) -> Result<Option<LatLong>, SearchError> {
        Ok(self.file_locations.get(br).copied())
    }
}

impl Corpus for MemoryCorpus {
    fn enumerate_permanodes_last_modified(&self, f: &mut MetaCallback<'_>) {
        let keyed = self.permanodes_by_time(|pn| self.permanode_modtime(pn));
        Self::stream(f, keyed.iter().rev().filter_map(|(_, r)| self.blobs.get(r)));
    }

    fn enumerate_permanodes_created(&self, f: &mut MetaCallback<'_>, descending: bool) {
        let keyed = self.permanodes_by_time(|pn| self.permanode_any_time(pn));
        let lookup = |(_, r): &(DateTime<Utc>, &BlobRef)| self.blobs.get(*r);
        if descending {
            Self::stream(f, keyed.iter().rev().filter_map(lookup));
        } else {
            Self::stream(f, keyed.iter().filter_map(lookup));
        }
    }

    fn enumerate_permanodes_by_node_types(&self, f: &mut MetaCallback<'_>, types: &[String]) {
        let metas = self.blobs.values().filter(|m| {
            m.is_permanode()
                && self
                    .permanode_attr_value(&m.blob_ref, "camliNodeType", None, None)
                    .is_some_and(|t| types.contains(&t))
        });
        Self::stream(f, metas);
    }

    fn enumerate_camli_blobs(&self, kind: Option<CamliKind>, f: &mut MetaCallback<'_>) {
        let metas = self.blobs.values().filter(|m| match kind {
            Some(kind) => m.camli_type == Some(kind),
            None => m.camli_type.is_some(),
        });
        Self::stream(f, metas);
    }

    fn enumerate_single_blob(&self, f: &mut MetaCallback<'_>, br: &BlobRef) {
        if let Some(meta) = self.blobs.get(br) {
            let _ = f(meta);
        }
    }

    fn append_permanode_attr_values(
        &self,
        out: &mut Vec<String>,
        pn: &BlobRef,
        attr: &str,
        at: Option<DateTime<Utc>>,
        owner: Option<&str>,
    ) {
        self.fold_attr_values(out, pn, attr, at, owner);
    }

    fn permanode_attr_value(
        &self,
        pn: &BlobRef,
        attr: &str,
        at: Option<DateTime<Utc>>,
        owner: Option<&str>,
    ) -> Option<String> {
        let mut vals = Vec::new();
        self.fold_attr_values(&mut vals, pn, attr, at, owner);
        vals.into_iter().next()
    }

    fn permanode_has_attr_value(
        &self,
        pn: &BlobRef,
        at: Option<DateTime<Utc>>,
        attr: &str,
        value: &str,
    ) -> bool {
        let mut vals = Vec::new();
        self.fold_attr_values(&mut vals, pn, attr, at, None);
        vals.iter().any(|v| v == value)
    }

    fn permanode_modtime(&self, pn: &BlobRef) -> Option<DateTime<Utc>> {
        self.claims
            .get(pn)
            .and_then(|claims| claims.last())
            .map(|c| c.date)
    }

    fn permanode_any_time(&self, pn: &BlobRef) -> Option<DateTime<Utc>> {
        self.claims
            .get(pn)
            .and_then(|claims| claims.first())
            .map(|c| c.date)
    }

    fn for_each_claim(&self, pn: &BlobRef, at: Option<DateTime<Utc>>, f: &mut ClaimCallback<'_>) {
        let Some(claims) = self.claims.get(pn) else {
            return;
        };
        for claim in claims {
            if let Some(at) = at
                && claim.date > at
            {
                return;
            }
            if f(claim).is_break() {
                return;
            }
        }
    }

    fn for_each_claim_back(
        &self,
        target: &BlobRef,
        at: Option<DateTime<Utc>>,
        f: &mut ClaimCallback<'_>,
    ) {
        let Some(claims) = self.claim_back.get(target) else {
            return;
        };
        for claim in claims {
            if let Some(at) = at
                && claim.date > at
            {
                return;
            }
            if f(claim).is_break() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 3339 shorthand.
    fn t(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    /// Deterministic test refs.
    fn br(n: u8) -> BlobRef {
        format!("sha224-{:02x}{}", n, "00".repeat(27)).parse().unwrap()
    }

    /// Collects an enumeration into a vec of refs.
    fn collect(run: impl FnOnce(&mut MetaCallback<'_>)) -> Vec<BlobRef> {
        let mut out = Vec::new();
        run(&mut |m: &BlobMeta| {
            out.push(m.blob_ref.clone());
            ControlFlow::Continue(())
        });
        out
    }

    #[test]
    fn attr_fold_applies_set_add_del() {
        let mut corpus = MemoryCorpus::new("key1");
        let pn = br(1);
        corpus.add_permanode(&pn);
        corpus.set_attr(&pn, t("2011-01-01T00:00:00Z"), "tag", "a");
        corpus.add_attr(&pn, t("2011-01-02T00:00:00Z"), "tag", "b");
        corpus.add_attr(&pn, t("2011-01-03T00:00:00Z"), "tag", "c");
        corpus.del_attr(&pn, t("2011-01-04T00:00:00Z"), "tag", "b");

        let mut vals = Vec::new();
        corpus.append_permanode_attr_values(&mut vals, &pn, "tag", None, None);
        assert_eq!(vals, vec!["a", "c"]);
    }

    #[test]
    fn attr_fold_respects_at() {
        let mut corpus = MemoryCorpus::new("key1");
        let pn = br(1);
        corpus.add_permanode(&pn);
        corpus.set_attr(&pn, t("2011-01-01T00:00:00Z"), "title", "old");
        corpus.set_attr(&pn, t("2012-01-01T00:00:00Z"), "title", "new");

        assert_eq!(
            corpus.permanode_attr_value(&pn, "title", Some(t("2011-06-01T00:00:00Z")), None),
            Some("old".to_string())
        );
        assert_eq!(
            corpus.permanode_attr_value(&pn, "title", None, None),
            Some("new".to_string())
        );
        assert_eq!(
            corpus.permanode_attr_value(&pn, "title", Some(t("2010-01-01T00:00:00Z")), None),
            None
        );
    }

    #[test]
    fn del_with_empty_value_clears_all() {
        let mut corpus = MemoryCorpus::new("key1");
        let pn = br(1);
        corpus.add_permanode(&pn);
        corpus.add_attr(&pn, t("2011-01-01T00:00:00Z"), "tag", "a");
        corpus.add_attr(&pn, t("2011-01-02T00:00:00Z"), "tag", "b");
        corpus.del_attr(&pn, t("2011-01-03T00:00:00Z"), "tag", "");

        let mut vals = Vec::new();
        corpus.append_permanode_attr_values(&mut vals, &pn, "tag", None, None);
        assert!(vals.is_empty());
    }

    #[test]
    fn foreign_signer_claims_do_not_count() {
        let mut corpus = MemoryCorpus::new("key1");
        let pn = br(1);
        corpus.add_permanode(&pn);
        corpus.add_claim(Claim {
            permanode: pn.clone(),
            signer: "intruder".to_string(),
            date: t("2011-01-01T00:00:00Z"),
            kind: ClaimKind::SetAttribute,
            attr: "tag".to_string(),
            value: "spoofed".to_string(),
        });
        assert_eq!(corpus.permanode_attr_value(&pn, "tag", None, None), None);
    }

    #[test]
    fn modtime_and_anytime_derive_from_claims() {
        let mut corpus = MemoryCorpus::new("key1");
        let pn = br(1);
        corpus.add_permanode(&pn);
        assert_eq!(corpus.permanode_modtime(&pn), None);
        assert_eq!(corpus.permanode_any_time(&pn), None);

        corpus.set_attr(&pn, t("2011-01-01T00:00:00Z"), "title", "x");
        corpus.set_attr(&pn, t("2013-01-01T00:00:00Z"), "title", "y");
        assert_eq!(corpus.permanode_any_time(&pn), Some(t("2011-01-01T00:00:00Z")));
        assert_eq!(corpus.permanode_modtime(&pn), Some(t("2013-01-01T00:00:00Z")));
    }

    #[test]
    fn last_modified_enumeration_is_newest_first() {
        let mut corpus = MemoryCorpus::new("key1");
        for (n, date) in [(1, "2011"), (2, "2013"), (3, "2012")] {
            let pn = br(n);
            corpus.add_permanode(&pn);
            corpus.set_attr(&pn, t(&format!("{date}-01-01T00:00:00Z")), "title", "x");
        }
        let order = collect(|f| corpus.enumerate_permanodes_last_modified(f));
        assert_eq!(order, vec![br(2), br(3), br(1)]);
    }

    #[test]
    fn last_modified_ties_break_by_ref_descending() {
        let mut corpus = MemoryCorpus::new("key1");
        for n in [1, 2] {
            let pn = br(n);
            corpus.add_permanode(&pn);
            corpus.set_attr(&pn, t("2011-01-01T00:00:00Z"), "title", "x");
        }
        let order = collect(|f| corpus.enumerate_permanodes_last_modified(f));
        assert_eq!(order, vec![br(2), br(1)]);
    }

    #[test]
    fn created_enumeration_respects_direction() {
        let mut corpus = MemoryCorpus::new("key1");
        for (n, date) in [(1, "2012"), (2, "2011")] {
            let pn = br(n);
            corpus.add_permanode(&pn);
            corpus.set_attr(&pn, t(&format!("{date}-01-01T00:00:00Z")), "title", "x");
        }
        assert_eq!(
            collect(|f| corpus.enumerate_permanodes_created(f, true)),
            vec![br(1), br(2)]
        );
        assert_eq!(
            collect(|f| corpus.enumerate_permanodes_created(f, false)),
            vec![br(2), br(1)]
        );
    }

    #[test]
    fn node_type_enumeration_filters() {
        let mut corpus = MemoryCorpus::new("key1");
        let venue = br(1);
        let person = br(2);
        corpus.add_permanode(&venue);
        corpus.add_permanode(&person);
        corpus.set_attr(&venue, t("2011-01-01T00:00:00Z"), "camliNodeType", "venue");
        corpus.set_attr(&person, t("2011-01-01T00:00:00Z"), "camliNodeType", "person");

        let got = collect(|f| {
            corpus.enumerate_permanodes_by_node_types(f, &["person".to_string()])
        });
        assert_eq!(got, vec![person]);
    }

    #[test]
    fn claim_back_tracks_targets() {
        let mut corpus = MemoryCorpus::new("key1");
        let parent = br(1);
        let child = br(2);
        corpus.add_permanode(&parent);
        corpus.add_permanode(&child);
        corpus.add_attr(&parent, t("2011-01-01T00:00:00Z"), "camliMember", child.as_str());

        let mut seen = Vec::new();
        corpus.for_each_claim_back(&child, None, &mut |c: &Claim| {
            seen.push(c.permanode.clone());
            ControlFlow::Continue(())
        });
        assert_eq!(seen, vec![parent]);
    }

    #[test]
    fn dir_structure_round_trips() {
        let mut corpus = MemoryCorpus::new("key1");
        let dir = br(1);
        let file = br(2);
        corpus.add_file(
            &file,
            FileInfo {
                file_name: "cat.jpg".to_string(),
                size: 1234,
                mime_type: "image/jpeg".to_string(),
                ..FileInfo::default()
            },
        );
        corpus.add_dir(&dir, "photos", vec![file.clone()]);

        assert_eq!(
            corpus.get_dir_children(&dir).unwrap(),
            Some(vec![file.clone()])
        );
        assert_eq!(corpus.get_parent_dirs(&file).unwrap(), vec![dir.clone()]);
        assert!(!corpus.get_dir_members(&br(9), 0, &mut |_| ControlFlow::Continue(())).unwrap());

        let mut members = Vec::new();
        assert!(corpus
            .get_dir_members(&dir, 0, &mut |r| {
                members.push(r.clone());
                ControlFlow::Continue(())
            })
            .unwrap());
        assert_eq!(members, vec![file]);
    }
}
