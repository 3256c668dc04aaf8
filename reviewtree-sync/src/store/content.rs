use reviewtree_core::Scope;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::Remote;
use super::decoder;
use super::error::StoreError;
use super::paths;
use super::record::RecordView;

/// One file's text plus the identifiers the backend knows it by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentRecord {
    pub key: Option<String>,
    pub file_id: Option<String>,
    pub path: String,
    pub name: String,
    pub content: String,
}

impl ContentRecord {
    pub fn new(path: &str, content: impl Into<String>) -> Self {
        let path = paths::normalize(path);
        Self {
            key: None,
            file_id: Some(path.clone()),
            name: paths::basename(&path),
            path,
            content: content.into(),
        }
    }

    /// Decodes a backend record. Returns `None` when the record carries no
    /// identifier at all.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        Self::from_raw_or(raw, None)
    }

    /// Like [`ContentRecord::from_raw`], using `fallback_id` when the record
    /// names no identifier itself.
    pub fn from_raw_or(raw: &Value, fallback_id: Option<&str>) -> Option<Self> {
        let view = RecordView::new(raw);
        let identifier = view
            .preferred_identifier()
            .or_else(|| fallback_id.map(str::to_string))?;
        let path = paths::normalize(&identifier);
        if path.is_empty() {
            return None;
        }
        let name = view
            .field("name")
            .unwrap_or_else(|| paths::basename(&path));
        let content = match decoder::extract_with_strategy(raw) {
            Some((strategy, text)) => {
                debug!(path = %path, ?strategy, "decoded file content");
                text
            }
            None => String::new(),
        };
        Some(Self {
            key: view.key(),
            file_id: view.field("fileId"),
            path,
            name,
            content,
        })
    }

    /// Points the record at `path`, carrying its backend identity along.
    pub fn rebind(&mut self, path: &str) {
        let path = paths::normalize(path);
        self.file_id = Some(path.clone());
        self.name = paths::basename(&path);
        self.path = path;
    }

    /// Request body for create/update calls on the files collection.
    pub fn to_body(&self, scope: &Scope) -> Value {
        json!({
            "projectId": scope.project_id,
            "versionId": scope.version_id,
            "fileId": self.file_id.as_deref().unwrap_or(&self.path),
            "path": self.path,
            "name": self.name,
            "content": self.content,
        })
    }
}

/// In-memory mirror of the files collection for one scope.
#[derive(Debug, Default)]
pub struct ContentStore {
    records: Vec<ContentRecord>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[ContentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replaces the cache with every record in scope. Returns how many
    /// records were kept.
    pub async fn load_all(&mut self, remote: Remote<'_>) -> Result<usize, StoreError> {
        let raw = remote
            .client
            .list_records(&remote.collections.files, remote.scope)
            .await?;
        let total = raw.len();
        let mut records = Vec::with_capacity(total);
        for item in &raw {
            match ContentRecord::from_raw(item) {
                Some(record) => records.push(record),
                None => warn!(key = ?RecordView::new(item).key(), "skipping file record without identifier"),
            }
        }
        self.replace_all(records);
        debug!(received = total, kept = self.records.len(), "loaded file records");
        Ok(self.records.len())
    }

    /// Loads a single file, first by a precise `fileId` query and then by
    /// scanning a full reload. The fresh record replaces any cached record
    /// strictly matching it.
    pub async fn load_one(
        &mut self,
        remote: Remote<'_>,
        file_id: &str,
    ) -> Result<Option<ContentRecord>, StoreError> {
        let target = paths::normalize(file_id);
        if target.is_empty() {
            return Err(StoreError::validation("file id is empty"));
        }

        let precise = remote
            .client
            .list_records_by_file_id(&remote.collections.files, remote.scope, file_id)
            .await?;
        let candidates: Vec<ContentRecord> = precise
            .iter()
            .filter_map(|raw| ContentRecord::from_raw_or(raw, Some(target.as_str())))
            .collect();

        // A single answer to a filtered query is trusted even when its
        // identifiers disagree with ours; it is cached under the requested id.
        let mut fresh = best_match(&candidates, &target).cloned();
        if fresh.is_none() && candidates.len() == 1 {
            fresh = candidates.into_iter().next().map(|mut record| {
                debug!(file_id = %target, cached_as = %record.path, "rebinding lone precise answer");
                record.rebind(&target);
                record
            });
        }

        if fresh.is_none() {
            debug!(file_id = %target, "precise lookup empty, scanning full collection");
            self.load_all(remote).await?;
            fresh = best_match(&self.records, &target).cloned();
        }

        let Some(fresh) = fresh else {
            debug!(file_id = %target, "file record not found");
            return Ok(None);
        };
        let fresh_path = fresh.path.clone();
        self.records
            .retain(|cached| !paths::matches_strictly(&cached.path, &fresh_path));
        self.records.push(fresh.clone());
        Ok(Some(fresh))
    }

    /// Best-ranked cached record for `id`.
    pub fn get(&self, id: &str) -> Option<&ContentRecord> {
        best_match(&self.records, id)
    }

    /// Inserts `record` under `path`, dropping whatever was cached there.
    pub fn upsert_for_path(&mut self, path: &str, mut record: ContentRecord) {
        let path = paths::normalize(path);
        self.records.retain(|cached| cached.path != path);
        if record.path != path {
            record.name = paths::basename(&path);
            record.path = path;
        }
        self.records.push(record);
    }

    pub fn remove(&mut self, path: &str) -> Option<ContentRecord> {
        let path = paths::normalize(path);
        let position = self.records.iter().position(|record| record.path == path)?;
        Some(self.records.remove(position))
    }

    /// Removes `prefix` itself and everything below it.
    pub fn remove_by_path_prefix(&mut self, prefix: &str) -> Vec<ContentRecord> {
        let prefix = paths::normalize(prefix);
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.records)
            .into_iter()
            .partition(|record| paths::is_under(&record.path, &prefix));
        self.records = kept;
        removed
    }

    /// Moves every record under `old_prefix` to `new_prefix` and returns the
    /// moved records in their new form.
    pub fn rebase_prefix(&mut self, old_prefix: &str, new_prefix: &str) -> Vec<ContentRecord> {
        let old_prefix = paths::normalize(old_prefix);
        let new_prefix = paths::normalize(new_prefix);
        let mut moved = Vec::new();
        for record in &mut self.records {
            let Some(new_path) = paths::rebase(&record.path, &old_prefix, &new_prefix) else {
                continue;
            };
            if record
                .file_id
                .as_deref()
                .is_some_and(|id| paths::normalize(id) == record.path)
            {
                record.file_id = Some(new_path.clone());
            }
            record.name = paths::basename(&new_path);
            record.path = new_path;
            moved.push(record.clone());
        }
        moved
    }

    /// Moves the record cached at `old_path` to `new_path`, replacing
    /// whatever was cached there.
    pub fn rebind(&mut self, old_path: &str, new_path: &str) -> Option<ContentRecord> {
        let mut record = self.remove(old_path)?;
        record.rebind(new_path);
        self.upsert_for_path(new_path, record.clone());
        Some(record)
    }

    pub fn set_key(&mut self, path: &str, key: String) -> bool {
        let path = paths::normalize(path);
        match self.records.iter_mut().find(|record| record.path == path) {
            Some(record) => {
                record.key = Some(key);
                true
            }
            None => false,
        }
    }

    fn replace_all(&mut self, records: Vec<ContentRecord>) {
        self.records.clear();
        for record in records {
            match self.records.iter_mut().find(|cached| cached.path == record.path) {
                // Keep one record per path; an empty placeholder never wins
                // over a record with text.
                Some(cached) => {
                    if !record.content.is_empty() || cached.content.is_empty() {
                        *cached = record;
                    }
                }
                None => self.records.push(record),
            }
        }
    }
}

fn best_match<'a>(records: &'a [ContentRecord], id: &str) -> Option<&'a ContentRecord> {
    records
        .iter()
        .enumerate()
        .filter_map(|(index, record)| {
            paths::match_tier(&record.path, id).map(|tier| (tier, index, record))
        })
        .min_by_key(|(tier, index, _)| (*tier, *index))
        .map(|(_, _, record)| record)
}
