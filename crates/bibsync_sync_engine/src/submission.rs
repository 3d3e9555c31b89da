//! Building submissions from local changes.
//!
//! Every `build_*` call runs inside one [`Store::perform`] transaction that
//!
//! 1. touches the "last used" timestamp of the first target collection,
//! 2. creates (or reads) the objects to submit, recording change markers,
//! 3. captures the marker identifiers produced, and
//! 4. invalidates the transaction's read cache before commit.
//!
//! Any failure inside the transaction rolls all of it back, including the
//! collection touch and every marker.

use crate::action::SyncAction;
use crate::error::{AttachmentError, SubmissionError};
use crate::keys::generate_key;
use bibsync_store::{
    ChangeKind, CreateEntity, Entity, EntityKind, LibraryId, ReadPendingChanges,
    ReadPendingDeletions, Store, Tag, Transaction, UpdateCollectionLastUsed,
};
use bibsync_sync_protocol::{ItemRecord, SyncObject};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// JSON parameters of one object in a write request.
pub type Parameters = Map<String, Value>;

/// Where and how new objects are filed.
///
/// Passed explicitly to every build call; the builder never consults any
/// other notion of "current" library or collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionContext {
    /// Target library.
    pub library_id: LibraryId,
    /// Target collections; the first one is recorded as last used.
    pub collection_keys: Vec<String>,
    /// Tags picked by the user.
    pub tags: Vec<Tag>,
    /// Whether tags carried by the source record are kept.
    pub include_record_tags: bool,
}

impl SubmissionContext {
    /// Creates a context filing into the library root.
    pub fn new(library_id: LibraryId) -> Self {
        Self {
            library_id,
            collection_keys: Vec::new(),
            tags: Vec::new(),
            include_record_tags: false,
        }
    }

    /// Adds a target collection.
    pub fn with_collection(mut self, key: impl Into<String>) -> Self {
        self.collection_keys.push(key.into());
        self
    }

    /// Sets the picked tags.
    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }

    /// Keeps the source record's own tags in addition to the picked ones.
    pub fn including_record_tags(mut self, include: bool) -> Self {
        self.include_record_tags = include;
        self
    }

    fn merged_tags(&self, record_tags: &[Tag]) -> Vec<Tag> {
        let mut tags = if self.include_record_tags {
            record_tags.to_vec()
        } else {
            Vec::new()
        };
        for tag in &self.tags {
            if !tags.iter().any(|t| t.name == tag.name) {
                tags.push(tag.clone());
            }
        }
        tags
    }
}

/// A new attachment item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    /// Key to use; generated when `None`.
    pub key: Option<String>,
    /// Attachment title.
    pub title: String,
    /// File name.
    pub filename: String,
    /// MIME type.
    pub content_type: String,
    /// Parent item, if any.
    pub parent_key: Option<String>,
    /// Source URL, if any.
    pub url: Option<String>,
    /// MD5 checksum of the file.
    pub md5: Option<String>,
    /// File modification time in milliseconds.
    pub mtime: Option<i64>,
    /// File size in bytes.
    pub filesize: u64,
}

impl NewAttachment {
    /// Creates an imported file attachment.
    pub fn file(title: impl Into<String>, filename: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            key: None,
            title: title.into(),
            filename: filename.into(),
            content_type: content_type.into(),
            parent_key: None,
            url: None,
            md5: None,
            mtime: None,
            filesize: 0,
        }
    }

    /// Sets the file metadata.
    pub fn with_file(mut self, md5: impl Into<String>, mtime: i64, filesize: u64) -> Self {
        self.md5 = Some(md5.into());
        self.mtime = Some(mtime);
        self.filesize = filesize;
        self
    }
}

/// Objects of one type ready to be written to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    /// Library of the objects.
    pub library_id: LibraryId,
    /// Object type.
    pub object: SyncObject,
    /// Write parameters, one entry per object.
    pub parameters: Vec<Parameters>,
    /// Marker identifiers carried by the submission, by object key.
    pub change_uuids: BTreeMap<String, Vec<Uuid>>,
}

impl Submission {
    /// Keys of the submitted objects.
    pub fn keys(&self) -> Vec<String> {
        self.parameters
            .iter()
            .filter_map(|p| p.get("key").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Returns true if there is nothing to submit.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Turns the submission into a write action.
    pub fn into_action(self, since_version: Option<u64>, update_library_version: bool) -> SyncAction {
        SyncAction::SubmitUpdate {
            library_id: self.library_id,
            object: self.object,
            parameters: self.parameters,
            change_uuids: self.change_uuids,
            since_version,
            update_library_version,
        }
    }
}

/// A submitted attachment together with the file metadata needed to upload it.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentSubmission {
    /// The attachment item write.
    pub submission: Submission,
    /// Attachment key.
    pub key: String,
    /// MD5 checksum of the file.
    pub md5: String,
    /// File modification time in milliseconds.
    pub mtime: i64,
}

/// Builds submissions against a store.
#[derive(Debug, Clone)]
pub struct SubmissionBuilder {
    store: Arc<Store>,
}

impl SubmissionBuilder {
    /// Creates a builder.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Stores an externally sourced item and builds its submission.
    pub fn build_item(
        &self,
        record: ItemRecord,
        context: &SubmissionContext,
    ) -> Result<Submission, SubmissionError> {
        record.validate().map_err(bibsync_sync_protocol::RecordError::from)?;
        let mut entity = Entity::new(context.library_id, record.key, EntityKind::Item);
        entity.item_type = Some(record.item_type);
        entity.fields = record.fields;
        entity.tags = context.merged_tags(&record.tags);
        entity.collection_keys = context.collection_keys.iter().cloned().collect();
        entity.parent_key = record.parent_key;
        if let Some(date_added) = record.date_added {
            entity.date_added = date_added;
        }
        self.create(entity, context)
    }

    /// Stores a web page item for `url` and builds its submission.
    pub fn build_webpage(
        &self,
        url: &str,
        title: Option<&str>,
        context: &SubmissionContext,
    ) -> Result<Submission, SubmissionError> {
        let now = Utc::now();
        let mut entity = Entity::new(context.library_id, generate_key(), EntityKind::Item);
        entity.item_type = Some("webpage".to_string());
        entity.set_field("url", url);
        entity.set_field("title", title.unwrap_or("Unknown"));
        entity.set_field("accessDate", now.to_rfc3339_opts(SecondsFormat::Secs, true));
        entity.tags = context.merged_tags(&[]);
        entity.collection_keys = context.collection_keys.iter().cloned().collect();
        self.create(entity, context)
    }

    /// Stores a new attachment and builds its submission.
    ///
    /// Fails with [`AttachmentError::MtimeMissing`] or
    /// [`AttachmentError::Md5Missing`] when the stored attachment lacks file
    /// metadata, in which case nothing is committed.
    pub fn build_attachment(
        &self,
        attachment: NewAttachment,
        context: &SubmissionContext,
    ) -> Result<AttachmentSubmission, SubmissionError> {
        let key = attachment.key.clone().unwrap_or_else(generate_key);
        let mut entity = Entity::new(context.library_id, key.clone(), EntityKind::Attachment);
        entity.item_type = Some("attachment".to_string());
        entity.set_field("title", attachment.title);
        entity.set_field("linkMode", "imported_file");
        entity.set_field("contentType", attachment.content_type);
        entity.set_field("filename", attachment.filename);
        if let Some(url) = attachment.url {
            entity.set_field("url", url);
            entity.set_field("accessDate", Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
        }
        if let Some(md5) = attachment.md5 {
            entity.set_field("md5", md5);
        }
        if let Some(mtime) = attachment.mtime {
            entity.set_field("mtime", mtime.to_string());
        }
        entity.parent_key = attachment.parent_key;
        entity.tags = context.merged_tags(&[]);
        if entity.parent_key.is_none() {
            entity.collection_keys = context.collection_keys.iter().cloned().collect();
        }

        let mut file = None;
        let submission = self.perform_submission(context, SyncObject::Item, |txn| {
            let created = txn.perform(CreateEntity { entity })?;
            let mtime = created
                .field("mtime")
                .and_then(|m| m.parse::<i64>().ok())
                .ok_or(AttachmentError::MtimeMissing)?;
            let md5 = created
                .field("md5")
                .map(str::to_string)
                .ok_or(AttachmentError::Md5Missing)?;
            file = Some((md5, mtime));
            Ok(vec![update_parameters(&created)])
        })?;

        let (md5, mtime) = file.ok_or(AttachmentError::Md5Missing)?;
        Ok(AttachmentSubmission {
            submission,
            key,
            md5,
            mtime,
        })
    }

    /// Builds a submission of every locally changed object of one type.
    ///
    /// Only the changed parts of each object are included.
    pub fn build_pending(
        &self,
        library_id: LibraryId,
        object: SyncObject,
    ) -> Result<Submission, SubmissionError> {
        let kinds = object.entity_kinds().to_vec();
        let (parameters, change_uuids) = self.store.perform(|txn| {
            let mut pending = txn.perform(ReadPendingChanges { library_id, kinds })?;
            if object == SyncObject::Collection {
                parents_first(&mut pending);
            } else {
                // Parent items before their attachments.
                pending.sort_by_key(|e| e.kind == EntityKind::Attachment);
            }
            let parameters: Vec<Parameters> = pending.iter().map(update_parameters).collect();
            let change_uuids = pending
                .iter()
                .map(|e| (e.key.clone(), e.changes.iter().map(|c| c.identifier).collect()))
                .collect::<BTreeMap<_, Vec<_>>>();
            txn.invalidate();
            Ok((parameters, change_uuids))
        })?;

        debug!(library = %library_id, %object, count = parameters.len(), "built pending submission");
        Ok(Submission {
            library_id,
            object,
            parameters,
            change_uuids,
        })
    }

    /// Returns keys of locally deleted objects of one type awaiting confirmation.
    pub fn pending_deletions(
        &self,
        library_id: LibraryId,
        object: SyncObject,
    ) -> Result<Vec<String>, SubmissionError> {
        let kinds = object.entity_kinds().to_vec();
        let deleted = self
            .store
            .perform(|txn| txn.perform(ReadPendingDeletions { library_id, kinds }))?;
        Ok(deleted.into_iter().map(|e| e.key).collect())
    }

    fn create(&self, entity: Entity, context: &SubmissionContext) -> Result<Submission, SubmissionError> {
        self.perform_submission(context, SyncObject::from_kind(entity.kind), |txn| {
            let created = txn.perform(CreateEntity { entity })?;
            Ok(vec![update_parameters(&created)])
        })
    }

    /// Runs `create` in one transaction framed by the collection touch and
    /// the read-cache invalidation.
    fn perform_submission<F>(
        &self,
        context: &SubmissionContext,
        object: SyncObject,
        create: F,
    ) -> Result<Submission, SubmissionError>
    where
        F: FnOnce(&mut Transaction) -> Result<Vec<Parameters>, SubmissionError>,
    {
        let mut outcome = None;
        let result = self.store.perform(|txn| {
            if let Some(collection) = context.collection_keys.first() {
                txn.perform(UpdateCollectionLastUsed {
                    library_id: context.library_id,
                    key: collection.clone(),
                    timestamp: Utc::now(),
                })?;
            }
            match create(txn) {
                Ok(parameters) => {
                    let change_uuids = txn.produced_changes(context.library_id);
                    txn.invalidate();
                    outcome = Some(Ok((parameters, change_uuids)));
                    Ok(())
                }
                Err(SubmissionError::Store(e)) => Err(e),
                Err(other) => {
                    outcome = Some(Err(other));
                    Err(bibsync_store::StoreError::aborted("submission rejected"))
                }
            }
        });

        match (result, outcome) {
            (Ok(()), Some(Ok((parameters, change_uuids)))) => {
                debug!(
                    library = %context.library_id,
                    %object,
                    keys = ?change_uuids.keys().collect::<Vec<_>>(),
                    "built submission"
                );
                Ok(Submission {
                    library_id: context.library_id,
                    object,
                    parameters,
                    change_uuids,
                })
            }
            (_, Some(Err(e))) => Err(e),
            (Err(e), _) => Err(e.into()),
            (Ok(()), None) => Err(bibsync_store::StoreError::aborted("submission produced nothing").into()),
        }
    }
}

/// Write parameters for an entity: the whole object when it was created
/// locally, otherwise only the parts its pending markers cover.
pub fn update_parameters(entity: &Entity) -> Parameters {
    let kinds = entity.change_kinds();
    let full = kinds.contains(&ChangeKind::Created);
    let mut params = Map::new();
    params.insert("key".into(), json!(entity.key));
    params.insert("version".into(), json!(entity.version));

    match entity.kind {
        EntityKind::Collection | EntityKind::Search => {
            if full || kinds.contains(&ChangeKind::Fields) {
                for field in &entity.fields {
                    params.insert(field.key.clone(), json!(field.value));
                }
            }
            if entity.kind == EntityKind::Collection
                && (full || kinds.contains(&ChangeKind::Parent) || kinds.contains(&ChangeKind::Collections))
            {
                params.insert(
                    "parentCollection".into(),
                    entity.parent_key.as_ref().map_or(json!(false), |p| json!(p)),
                );
            }
        }
        EntityKind::Item | EntityKind::Attachment => {
            if full {
                if let Some(item_type) = &entity.item_type {
                    params.insert("itemType".into(), json!(item_type));
                }
                params.insert(
                    "dateAdded".into(),
                    json!(entity.date_added.to_rfc3339_opts(SecondsFormat::Secs, true)),
                );
            }
            if full || kinds.contains(&ChangeKind::Fields) {
                for field in &entity.fields {
                    let value = match field.key.as_str() {
                        "mtime" => field
                            .value
                            .parse::<i64>()
                            .map_or_else(|_| json!(field.value), |v| json!(v)),
                        _ => json!(field.value),
                    };
                    params.insert(field.key.clone(), value);
                }
            }
            if full || kinds.contains(&ChangeKind::Tags) {
                let tags: Vec<Value> = entity
                    .tags
                    .iter()
                    .map(|t| {
                        if t.tag_type == 0 {
                            json!({ "tag": t.name })
                        } else {
                            json!({ "tag": t.name, "type": t.tag_type })
                        }
                    })
                    .collect();
                params.insert("tags".into(), Value::Array(tags));
            }
            if full || kinds.contains(&ChangeKind::Collections) {
                params.insert("collections".into(), json!(entity.collection_keys));
            }
            if full || kinds.contains(&ChangeKind::Parent) {
                match &entity.parent_key {
                    Some(parent) => params.insert("parentItem".into(), json!(parent)),
                    None if full => None,
                    None => params.insert("parentItem".into(), json!(false)),
                };
            }
            if full || kinds.contains(&ChangeKind::Trash) {
                params.insert("deleted".into(), json!(entity.trashed));
            }
        }
    }
    params
}

/// Orders collections so each one follows every pending ancestor.
fn parents_first(collections: &mut [Entity]) {
    let parents: BTreeMap<String, Option<String>> = collections
        .iter()
        .map(|c| (c.key.clone(), c.parent_key.clone()))
        .collect();
    let depth = |key: &str| {
        let mut depth = 0;
        let mut parent = parents.get(key).and_then(Option::as_deref);
        while let Some(key) = parent.filter(|k| parents.contains_key(*k)) {
            depth += 1;
            // A cycle cannot be ordered; stop once every collection was visited.
            if depth > parents.len() {
                break;
            }
            parent = parents.get(key).and_then(Option::as_deref);
        }
        depth
    };
    collections.sort_by_cached_key(|c| depth(&c.key));
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibsync_store::{Library, ModifyEntity};

    fn store() -> Arc<Store> {
        let store = Store::open_in_memory();
        store
            .put_library(Library::new(LibraryId::User, "My Library").with_version(5))
            .unwrap();
        store
            .perform(|txn| {
                let mut collection = Entity::new(LibraryId::User, "COLL2345", EntityKind::Collection);
                collection.set_field("name", "Reading");
                collection.version = 3;
                txn.put_entity(collection);
                Ok(())
            })
            .unwrap();
        Arc::new(store)
    }

    fn context() -> SubmissionContext {
        SubmissionContext::new(LibraryId::User)
            .with_collection("COLL2345")
            .with_tags(vec![Tag::new("picked")])
    }

    #[test]
    fn webpage_submission() {
        let store = store();
        let builder = SubmissionBuilder::new(Arc::clone(&store));

        let submission = builder
            .build_webpage("https://example.org", None, &context())
            .unwrap();

        assert_eq!(submission.object, SyncObject::Item);
        let params = &submission.parameters[0];
        assert_eq!(params["itemType"], json!("webpage"));
        assert_eq!(params["title"], json!("Unknown"));
        assert_eq!(params["collections"], json!(["COLL2345"]));
        assert!(params["accessDate"].as_str().unwrap().ends_with('Z'));

        let key = submission.keys().remove(0);
        let stored = store.entity(LibraryId::User, &key).unwrap();
        let ids: Vec<Uuid> = stored.changes.iter().map(|c| c.identifier).collect();
        assert_eq!(submission.change_uuids[&key], ids);

        let collection = store.entity(LibraryId::User, "COLL2345").unwrap();
        assert!(collection.last_used.is_some());
    }

    #[test]
    fn record_tags_merge_only_when_requested() {
        let store = store();
        let builder = SubmissionBuilder::new(store);
        let mut record = ItemRecord::new("ITEM2345", "book").with_field("title", "T");
        record.tags = vec![Tag::new("from-record")];

        let submission = builder.build_item(record.clone(), &context()).unwrap();
        assert_eq!(submission.parameters[0]["tags"], json!([{ "tag": "picked" }]));

        record.key = "ITEM3456".into();
        let submission = builder
            .build_item(record, &context().including_record_tags(true))
            .unwrap();
        assert_eq!(
            submission.parameters[0]["tags"],
            json!([{ "tag": "from-record" }, { "tag": "picked" }])
        );
    }

    #[test]
    fn attachment_without_md5_commits_nothing() {
        let store = store();
        let builder = SubmissionBuilder::new(Arc::clone(&store));
        let before = store.commit_count();

        let mut attachment = NewAttachment::file("Paper", "paper.pdf", "application/pdf");
        attachment.key = Some("ATTA2345".into());
        attachment.mtime = Some(1_700_000_000_000);

        let err = builder.build_attachment(attachment, &context()).unwrap_err();
        assert_eq!(err.attachment(), Some(&AttachmentError::Md5Missing));
        assert_eq!(store.commit_count(), before);
        assert!(store.entity(LibraryId::User, "ATTA2345").is_none());
        assert!(store.entity(LibraryId::User, "COLL2345").unwrap().last_used.is_none());
    }

    #[test]
    fn attachment_without_mtime_reports_mtime_first() {
        let builder = SubmissionBuilder::new(store());
        let attachment = NewAttachment::file("Paper", "paper.pdf", "application/pdf");
        let err = builder.build_attachment(attachment, &context()).unwrap_err();
        assert_eq!(err.attachment(), Some(&AttachmentError::MtimeMissing));
    }

    #[test]
    fn attachment_with_file_metadata() {
        let builder = SubmissionBuilder::new(store());
        let attachment = NewAttachment::file("Paper", "paper.pdf", "application/pdf")
            .with_file("9e107d9d372bb6826bd81d3542a419d6", 1_700_000_000_000, 1024);

        let built = builder.build_attachment(attachment, &context()).unwrap();
        assert_eq!(built.md5, "9e107d9d372bb6826bd81d3542a419d6");
        let params = &built.submission.parameters[0];
        assert_eq!(params["mtime"], json!(1_700_000_000_000_i64));
        assert_eq!(params["linkMode"], json!("imported_file"));
    }

    #[test]
    fn pending_collections_follow_their_ancestors() {
        let store = store();
        store
            .perform(|txn| {
                for (key, parent) in [
                    ("AAAA2345", Some("BBBB2345")),
                    ("BBBB2345", Some("CCCC2345")),
                    ("CCCC2345", None),
                    ("DDDD2345", Some("COLL2345")),
                ] {
                    let mut collection = Entity::new(LibraryId::User, key, EntityKind::Collection);
                    collection.parent_key = parent.map(String::from);
                    txn.perform(CreateEntity { entity: collection })?;
                }
                Ok(())
            })
            .unwrap();

        let builder = SubmissionBuilder::new(store);
        let submission = builder.build_pending(LibraryId::User, SyncObject::Collection).unwrap();
        let keys: Vec<&str> = submission
            .parameters
            .iter()
            .filter_map(|p| p["key"].as_str())
            .collect();
        let position = |key: &str| keys.iter().position(|k| *k == key).unwrap();
        assert_eq!(keys.len(), 4);
        assert!(position("CCCC2345") < position("BBBB2345"));
        assert!(position("BBBB2345") < position("AAAA2345"));
    }

    #[test]
    fn pending_submission_includes_only_changed_parts() {
        let store = store();
        store
            .perform(|txn| {
                let mut item = Entity::new(LibraryId::User, "ITEM2345", EntityKind::Item);
                item.item_type = Some("book".into());
                item.version = 4;
                item.set_field("title", "Old");
                txn.put_entity(item);
                Ok(())
            })
            .unwrap();
        store
            .perform(|txn| {
                txn.perform(ModifyEntity::new(LibraryId::User, "ITEM2345", |e: &mut Entity| {
                    e.tags.push(Tag::new("new"));
                }))
            })
            .unwrap();

        let builder = SubmissionBuilder::new(store);
        let submission = builder.build_pending(LibraryId::User, SyncObject::Item).unwrap();
        let params = &submission.parameters[0];
        assert_eq!(params["version"], json!(4));
        assert_eq!(params["tags"], json!([{ "tag": "new" }]));
        assert!(!params.contains_key("title"));
        assert_eq!(submission.change_uuids["ITEM2345"].len(), 1);
    }
}
