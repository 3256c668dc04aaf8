use std::collections::{BTreeSet, HashMap, HashSet};

use reviewtree_core::{ApiError, CollectionsClient, Scope};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::content::{ContentRecord, ContentStore};
use super::error::StoreError;
use super::generation::{Generation, Generations};
use super::paths::{self, PathMatch};
use super::tree::{NodeKind, TreeNode, TreeStore};
use super::{Collections, Remote};

/// File selections share one target: only the latest one is applied.
const SELECTION_TARGET: &str = "selection";

/// Result of a call that may have been overtaken by a newer call on the
/// same target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Applied(T),
    Superseded,
}

impl<T> Outcome<T> {
    pub fn applied(self) -> Option<T> {
        match self {
            Outcome::Applied(value) => Some(value),
            Outcome::Superseded => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Outcome::Superseded)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCreated {
    pub path: String,
    /// Whether the content record reached the backend.
    pub content_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameOutcome {
    pub old_path: String,
    pub new_path: String,
    pub records_moved: usize,
    pub records_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub path: String,
    pub kind: NodeKind,
    pub records_removed: usize,
    pub records_failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: usize,
    /// Records known only by a bare name, moved onto their file's path.
    pub rebound: usize,
    pub removed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct Stores {
    tree: TreeStore,
    content: ContentStore,
    handoffs: HashMap<String, Handoff>,
}

/// Runs tree mutations against both backend collections for one scope.
///
/// Every mutation follows the same order: change the tree in memory, persist
/// the tree document, then bring the content records along. A failure in the
/// last step is logged and reported in the outcome but never undoes the tree
/// change; [`SyncCoordinator::reconcile`] repairs such drift.
pub struct SyncCoordinator {
    client: CollectionsClient,
    collections: Collections,
    scope: Scope,
    stores: Mutex<Stores>,
    generations: Generations,
    selections: Generations,
}

impl SyncCoordinator {
    pub fn new(client: CollectionsClient, scope: Scope) -> Self {
        Self {
            client,
            collections: Collections::default(),
            scope,
            stores: Mutex::new(Stores::default()),
            generations: Generations::new(),
            selections: Generations::new(),
        }
    }

    pub fn with_collections(mut self, collections: Collections) -> Self {
        self.collections = collections;
        self
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    fn remote(&self) -> Remote<'_> {
        Remote {
            client: &self.client,
            collections: &self.collections,
            scope: &self.scope,
        }
    }

    /// Replaces the tree with the backend document. Expanded folders that
    /// still exist stay expanded.
    pub async fn load_tree(&self) -> Result<usize, StoreError> {
        let mut stores = self.stores.lock().await;
        let mut tree = TreeStore::load(self.remote()).await?;
        tree.restore_expanded(stores.tree.expanded());
        stores.tree = tree;
        Ok(stores.tree.len())
    }

    pub async fn load_files(&self) -> Result<usize, StoreError> {
        let mut stores = self.stores.lock().await;
        stores.content.load_all(self.remote()).await
    }

    /// Lazily loads one file's content. A newer selection made while this one
    /// was in flight wins.
    pub async fn load_file_by_id(
        &self,
        file_id: &str,
    ) -> Result<Outcome<Option<ContentRecord>>, StoreError> {
        let generation = self.selections.issue(SELECTION_TARGET);
        let mut stores = self.stores.lock().await;
        if !self.selections.is_current(&generation) {
            debug!(file_id, "selection superseded before loading");
            return Ok(Outcome::Superseded);
        }
        let result = stores.content.load_one(self.remote(), file_id).await;
        if self.selections.is_current(&generation) {
            self.selections.release(&generation);
            result.map(Outcome::Applied)
        } else {
            debug!(file_id, "selection superseded while loading");
            result.map(|_| Outcome::Superseded)
        }
    }

    pub async fn create_folder(
        &self,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Outcome<String>, StoreError> {
        let mut call = match self
            .begin(child_target(parent_id, name), "folder".to_string())
            .await
        {
            Ok(call) => call,
            Err(outcome) => return Ok(outcome),
        };
        let result = self.apply_create_folder(&mut call.stores, parent_id, name).await;
        self.finish(call, result)
    }

    async fn apply_create_folder(
        &self,
        stores: &mut Stores,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<String, StoreError> {
        let path = stores.tree.create_folder(parent_id, name)?;
        stores.tree.persist(self.remote()).await?;
        info!(path = %path, "folder created");
        Ok(path)
    }

    pub async fn create_file(
        &self,
        parent_id: Option<&str>,
        name: &str,
        content: &str,
    ) -> Result<Outcome<FileCreated>, StoreError> {
        let mut call = match self
            .begin(child_target(parent_id, name), format!("file\n{content}"))
            .await
        {
            Ok(call) => call,
            Err(outcome) => return Ok(outcome),
        };
        let result = self
            .apply_create_file(&mut call.stores, parent_id, name, content)
            .await;
        self.finish(call, result)
    }

    async fn apply_create_file(
        &self,
        stores: &mut Stores,
        parent_id: Option<&str>,
        name: &str,
        content: &str,
    ) -> Result<FileCreated, StoreError> {
        let path = stores.tree.create_file(parent_id, name)?;
        stores.tree.persist(self.remote()).await?;

        let mut record = ContentRecord::new(&path, content);
        let content_synced = match self
            .client
            .create_record(&self.collections.files, &record.to_body(&self.scope))
            .await
        {
            Ok(created) => {
                record.key = Some(created.key);
                true
            }
            Err(err) => {
                warn!(path = %path, error = %err, "content record not created; tree change kept");
                false
            }
        };
        stores.content.upsert_for_path(&path, record);
        info!(path = %path, content_synced, "file created");
        Ok(FileCreated {
            path,
            content_synced,
        })
    }

    pub async fn rename_item(
        &self,
        item_id: &str,
        new_name: &str,
    ) -> Result<Outcome<RenameOutcome>, StoreError> {
        let mut call = match self
            .begin(paths::normalize(item_id), format!("rename\n{new_name}"))
            .await
        {
            Ok(call) => call,
            Err(outcome) => return Ok(outcome),
        };
        let result = self.apply_rename(&mut call.stores, item_id, new_name).await;
        self.finish(call, result)
    }

    async fn apply_rename(
        &self,
        stores: &mut Stores,
        item_id: &str,
        new_name: &str,
    ) -> Result<RenameOutcome, StoreError> {
        let renamed = stores.tree.rename_item(item_id, new_name)?;
        if renamed.old_path == renamed.new_path {
            return Ok(RenameOutcome {
                old_path: renamed.old_path,
                new_path: renamed.new_path,
                records_moved: 0,
                records_failed: 0,
            });
        }
        stores.tree.persist(self.remote()).await?;

        let moved = stores
            .content
            .rebase_prefix(&renamed.old_path, &renamed.new_path);
        let mut records_failed = 0;
        for record in &moved {
            match self.push_record(record).await {
                Ok(Some(key)) => {
                    stores.content.set_key(&record.path, key);
                }
                Ok(None) => {}
                Err(err) => {
                    records_failed += 1;
                    warn!(path = %record.path, error = %err, "content record not moved; tree change kept");
                }
            }
        }
        info!(
            old = %renamed.old_path,
            new = %renamed.new_path,
            records = moved.len(),
            failed = records_failed,
            "item renamed"
        );
        Ok(RenameOutcome {
            old_path: renamed.old_path,
            new_path: renamed.new_path,
            records_moved: moved.len() - records_failed,
            records_failed,
        })
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<Outcome<DeleteOutcome>, StoreError> {
        let mut call = match self
            .begin(paths::normalize(item_id), "delete".to_string())
            .await
        {
            Ok(call) => call,
            Err(outcome) => return Ok(outcome),
        };
        let result = self.apply_delete(&mut call.stores, item_id).await;
        self.finish(call, result)
    }

    async fn apply_delete(
        &self,
        stores: &mut Stores,
        item_id: &str,
    ) -> Result<DeleteOutcome, StoreError> {
        let removed = stores.tree.delete_item(item_id)?;
        stores.tree.persist(self.remote()).await?;

        let mut purged = stores.content.remove_by_path_prefix(&removed.path);
        if purged.is_empty() && removed.kind == NodeKind::File {
            // Never loaded into the cache; the backend may still hold it.
            purged.push(ContentRecord::new(&removed.path, ""));
        }
        let mut records_failed = 0;
        for record in &purged {
            if let Err(err) = self.drop_record(record).await {
                records_failed += 1;
                warn!(path = %record.path, error = %err, "content record not deleted; tree change kept");
            }
        }
        info!(path = %removed.path, records = purged.len(), failed = records_failed, "item deleted");
        Ok(DeleteOutcome {
            path: removed.path,
            kind: removed.kind,
            records_removed: purged.len() - records_failed,
            records_failed,
        })
    }

    /// Stores new content for an existing file. Unlike the content step of
    /// the tree mutations, failures here are the caller's to handle.
    pub async fn save_file(
        &self,
        file_id: &str,
        content: &str,
    ) -> Result<Outcome<ContentRecord>, StoreError> {
        let mut call = match self
            .begin(paths::normalize(file_id), format!("save\n{content}"))
            .await
        {
            Ok(call) => call,
            Err(outcome) => return Ok(outcome),
        };
        let result = self.apply_save(&mut call.stores, file_id, content).await;
        self.finish(call, result)
    }

    async fn apply_save(
        &self,
        stores: &mut Stores,
        file_id: &str,
        content: &str,
    ) -> Result<ContentRecord, StoreError> {
        let node = stores
            .tree
            .node(file_id)
            .ok_or_else(|| StoreError::NotFound(file_id.to_string()))?;
        if node.kind != NodeKind::File {
            return Err(StoreError::validation(format!("'{}' is not a file", node.path)));
        }

        // Records known by a bare name or a longer path are moved onto the
        // node's path instead of being duplicated.
        let mut record = stores
            .content
            .get(&node.path)
            .cloned()
            .unwrap_or_else(|| ContentRecord::new(&node.path, ""));
        let cached_path = record.path.clone();
        if cached_path != node.path {
            record.rebind(&node.path);
        }
        record.content = content.to_string();
        if let Some(key) = self.push_record(&record).await? {
            record.key = Some(key);
        }
        if cached_path != node.path {
            stores.content.remove(&cached_path);
        }
        stores.content.upsert_for_path(&node.path, record.clone());
        debug!(path = %node.path, bytes = content.len(), "file saved");
        Ok(record)
    }

    /// Rebuilds the content collection from the tree. Every file node gets a
    /// record; a record tied to exactly one file only by its bare name is
    /// moved onto that file's path; a record matching no file is deleted.
    pub async fn reconcile(&self) -> Result<ReconcileReport, StoreError> {
        let mut stores = self.stores.lock().await;
        let mut report = ReconcileReport::default();
        let file_paths = stores.tree.file_paths();
        let records = stores.content.records().to_vec();

        let mut covered: HashSet<String> = file_paths
            .iter()
            .filter(|path| {
                records
                    .iter()
                    .any(|record| paths::matches_strictly(&record.path, path))
            })
            .cloned()
            .collect();

        let mut orphans = Vec::new();
        for record in records {
            if file_paths
                .iter()
                .any(|path| paths::matches_strictly(&record.path, path))
            {
                continue;
            }
            let by_name: Vec<&String> = file_paths
                .iter()
                .filter(|path| paths::match_tier(&record.path, path) == Some(PathMatch::Basename))
                .collect();
            match by_name.as_slice() {
                [] => orphans.push(record),
                [path] if !covered.contains(*path) => {
                    covered.insert((*path).clone());
                    let mut moved = record.clone();
                    moved.rebind(path);
                    match self.push_record(&moved).await {
                        Ok(key) => {
                            stores.content.rebind(&record.path, path);
                            if let Some(key) = key {
                                stores.content.set_key(path, key);
                            }
                            report.rebound += 1;
                        }
                        Err(err) => {
                            report.failed += 1;
                            warn!(path = %record.path, file = %path, error = %err, "record not moved onto its file");
                        }
                    }
                }
                _ => {
                    debug!(path = %record.path, files = by_name.len(), "record matched by name only; left in place");
                }
            }
        }

        let missing: Vec<String> = file_paths
            .iter()
            .filter(|path| !covered.contains(*path))
            .cloned()
            .collect();
        for path in missing {
            let mut record = ContentRecord::new(&path, "");
            match self
                .client
                .create_record(&self.collections.files, &record.to_body(&self.scope))
                .await
            {
                Ok(created) => {
                    record.key = Some(created.key);
                    stores.content.upsert_for_path(&path, record);
                    report.created += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(path = %path, error = %err, "placeholder record not created");
                }
            }
        }

        for orphan in orphans {
            match self.drop_record(&orphan).await {
                Ok(()) => {
                    stores.content.remove(&orphan.path);
                    report.removed += 1;
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(path = %orphan.path, error = %err, "orphaned record not deleted");
                }
            }
        }

        info!(
            created = report.created,
            rebound = report.rebound,
            removed = report.removed,
            failed = report.failed,
            "reconciled content records"
        );
        Ok(report)
    }

    pub async fn expand_all_folders(&self) -> BTreeSet<String> {
        self.stores.lock().await.tree.expand_all().clone()
    }

    pub async fn collapse_all_folders(&self) {
        self.stores.lock().await.tree.collapse_all();
    }

    pub async fn set_expanded(&self, folder_id: &str, expanded: bool) -> Result<(), StoreError> {
        self.stores
            .lock()
            .await
            .tree
            .set_expanded(folder_id, expanded)
    }

    pub async fn tree_snapshot(&self) -> TreeNode {
        self.stores.lock().await.tree.to_document()
    }

    pub async fn file_paths(&self) -> Vec<String> {
        self.stores.lock().await.tree.file_paths()
    }

    /// Targets with a call still in flight or awaiting its result.
    pub fn pending_generations(&self) -> usize {
        self.generations.pending() + self.selections.pending()
    }

    pub async fn content_of(&self, file_id: &str) -> Option<ContentRecord> {
        self.stores.lock().await.content.get(file_id).cloned()
    }

    /// Writes a record to the files collection: update when it has a key,
    /// create otherwise. Returns the key assigned by a create.
    async fn push_record(&self, record: &ContentRecord) -> Result<Option<String>, ApiError> {
        let body = record.to_body(&self.scope);
        match &record.key {
            Some(key) => {
                self.client
                    .update_record(&self.collections.files, key, &body)
                    .await?;
                Ok(None)
            }
            None => {
                let created = self
                    .client
                    .create_record(&self.collections.files, &body)
                    .await?;
                Ok(Some(created.key))
            }
        }
    }

    /// Deletes by key when one is cached, by `fileId` query otherwise.
    async fn drop_record(&self, record: &ContentRecord) -> Result<(), ApiError> {
        match &record.key {
            Some(key) => {
                self.client
                    .delete_record(&self.collections.files, key)
                    .await
            }
            None => {
                let file_id = record.file_id.as_deref().unwrap_or(&record.path);
                self.client
                    .delete_records_by_file_id(&self.collections.files, &self.scope, file_id)
                    .await
            }
        }
    }

    /// Takes a generation for `target` and waits for the stores. `Err` carries
    /// the outcome when the call has nothing left to do: a newer call for the
    /// target was made meanwhile, or an identical call overtaken while running
    /// already did the work.
    async fn begin<T: Completion>(
        &self,
        target: String,
        request: String,
    ) -> Result<Call<'_>, Outcome<T>> {
        let generation = self.generations.issue(&target);
        let mut stores = self.stores.lock().await;
        if !self.generations.is_current(&generation) {
            debug!(generation = generation.target(), "call superseded before it started");
            return Err(Outcome::Superseded);
        }
        if let Some(handoff) = stores.handoffs.remove(generation.target()) {
            if handoff.request == request {
                if let Some(value) = T::from_completed(handoff.completed) {
                    debug!(generation = generation.target(), "taking over result of overtaken call");
                    self.generations.release(&generation);
                    return Err(Outcome::Applied(value));
                }
            }
        }
        Ok(Call {
            stores,
            generation,
            request,
        })
    }

    fn finish<T: Completion>(
        &self,
        call: Call<'_>,
        result: Result<T, StoreError>,
    ) -> Result<Outcome<T>, StoreError> {
        if self.generations.is_current(&call.generation) {
            self.generations.release(&call.generation);
            return result.map(Outcome::Applied);
        }
        let value = result?;
        let Call {
            mut stores,
            generation,
            request,
        } = call;
        debug!(generation = generation.target(), "result superseded by a newer call");
        stores.handoffs.insert(
            generation.target().to_string(),
            Handoff {
                request,
                completed: value.into_completed(),
            },
        );
        Ok(Outcome::Superseded)
    }
}

/// A mutation in progress: its generation and exclusive access to the stores.
struct Call<'a> {
    stores: MutexGuard<'a, Stores>,
    generation: Generation,
    request: String,
}

/// Result of a call that a newer, identical call overtook while it ran. The
/// newer call returns it instead of repeating the work.
#[derive(Debug)]
struct Handoff {
    request: String,
    completed: Completed,
}

#[derive(Debug)]
enum Completed {
    Folder(String),
    File(FileCreated),
    Renamed(RenameOutcome),
    Deleted(DeleteOutcome),
    Saved(ContentRecord),
}

trait Completion: Sized {
    fn into_completed(self) -> Completed;
    fn from_completed(completed: Completed) -> Option<Self>;
}

macro_rules! completion {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl Completion for $ty {
                fn into_completed(self) -> Completed {
                    Completed::$variant(self)
                }

                fn from_completed(completed: Completed) -> Option<Self> {
                    match completed {
                        Completed::$variant(value) => Some(value),
                        _ => None,
                    }
                }
            }
        )*
    };
}

completion! {
    String => Folder,
    FileCreated => File,
    RenameOutcome => Renamed,
    DeleteOutcome => Deleted,
    ContentRecord => Saved,
}

fn child_target(parent_id: Option<&str>, name: &str) -> String {
    paths::join(&paths::normalize(parent_id.unwrap_or_default()), name.trim())
}
