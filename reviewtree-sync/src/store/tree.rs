use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::Remote;
use super::error::StoreError;
use super::paths;

const ROOT_ID: &str = "root";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    #[serde(alias = "dir", alias = "directory")]
    Folder,
}

/// Wire shape of a tree node as stored in the tree document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeNode>>,
}

/// Lenient form of [`TreeNode`] accepted on load; missing fields are filled
/// in from the parent chain.
#[derive(Debug, Deserialize)]
struct RawNode {
    #[serde(default, deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<NodeKind>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    children: Option<Vec<RawNode>>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Debug, Clone)]
struct Slot {
    id: String,
    name: String,
    kind: NodeKind,
    path: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Detached copy of one node, handed out by lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub path: String,
    pub parent_id: Option<String>,
    pub child_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamedPath {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovedNode {
    pub path: String,
    pub kind: NodeKind,
    pub removed_nodes: usize,
}

/// The folder/file hierarchy of one scope.
///
/// Nodes live in an arena; `index` maps normalized node ids to slots so
/// lookups do not walk the tree. The root is synthetic, has an empty path and
/// is reachable as "no parent", by the empty id or by its own id.
#[derive(Debug, Clone)]
pub struct TreeStore {
    slots: Vec<Option<Slot>>,
    free: Vec<usize>,
    index: HashMap<String, NodeId>,
    root: NodeId,
    document_key: Option<String>,
    expanded: BTreeSet<String>,
}

impl Default for TreeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeStore {
    /// Empty tree with no backing document.
    pub fn new() -> Self {
        Self {
            slots: vec![Some(Slot {
                id: ROOT_ID.to_string(),
                name: ROOT_ID.to_string(),
                kind: NodeKind::Folder,
                path: String::new(),
                parent: None,
                children: Vec::new(),
            })],
            free: Vec::new(),
            index: HashMap::new(),
            root: NodeId(0),
            document_key: None,
            expanded: BTreeSet::new(),
        }
    }

    /// Fetches the scope's tree document.
    pub async fn load(remote: Remote<'_>) -> Result<Self, StoreError> {
        let records = remote
            .client
            .list_records(&remote.collections.trees, remote.scope)
            .await?;
        if records.len() > 1 {
            warn!(count = records.len(), "several tree documents in scope, using the first");
        }
        let record = records.into_iter().next().ok_or_else(|| {
            StoreError::TreeDocument(format!(
                "no tree document for project {} version {}",
                remote.scope.project_id, remote.scope.version_id
            ))
        })?;
        let key = reviewtree_core::record_key(&record);
        if key.is_none() {
            warn!("tree document has no key; it cannot be persisted");
        }
        let data = match record {
            Value::Object(mut map) => map.remove("data"),
            _ => None,
        }
        .ok_or_else(|| StoreError::TreeDocument("tree record has no data field".into()))?;
        let tree = Self::from_document(data, key)?;
        debug!(nodes = tree.len(), "loaded tree document");
        Ok(tree)
    }

    /// Builds a tree from a document payload: a root node object, or a bare
    /// array of top-level nodes.
    pub fn from_document(data: Value, document_key: Option<String>) -> Result<Self, StoreError> {
        let raw_root = match data {
            Value::Object(_) => serde_json::from_value::<RawNode>(data)
                .map_err(|err| StoreError::TreeDocument(err.to_string()))?,
            Value::Array(_) => RawNode {
                id: None,
                name: None,
                kind: Some(NodeKind::Folder),
                path: None,
                children: Some(
                    serde_json::from_value(data)
                        .map_err(|err| StoreError::TreeDocument(err.to_string()))?,
                ),
            },
            other => {
                return Err(StoreError::TreeDocument(format!(
                    "expected a node object, got {other}"
                )));
            }
        };

        let mut tree = Self::new();
        tree.document_key = document_key;
        if let Some(slot) = tree.slots[0].as_mut() {
            if let Some(id) = raw_root.id.filter(|id| !id.is_empty()) {
                slot.id = id;
            }
            if let Some(name) = raw_root.name.filter(|name| !name.is_empty()) {
                slot.name = name;
            }
        }
        if raw_root.kind == Some(NodeKind::File) {
            return Err(StoreError::TreeDocument("root node is a file".into()));
        }
        let root = tree.root;
        for child in raw_root.children.unwrap_or_default() {
            tree.attach_raw(child, root)?;
        }
        Ok(tree)
    }

    fn attach_raw(&mut self, raw: RawNode, parent: NodeId) -> Result<(), StoreError> {
        let parent_path = self.slot(parent).path.clone();
        let name = raw
            .name
            .filter(|name| !name.is_empty())
            .or_else(|| raw.path.as_deref().map(paths::basename))
            .or_else(|| raw.id.as_deref().map(paths::basename))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                StoreError::TreeDocument(format!("node under '{parent_path}' has no name"))
            })?;
        let kind = raw.kind.unwrap_or(if raw.children.is_some() {
            NodeKind::Folder
        } else {
            NodeKind::File
        });
        let path = raw
            .path
            .map(|path| paths::normalize(&path))
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| paths::join(&parent_path, &name));
        let id = raw
            .id
            .map(|id| paths::normalize(&id))
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| path.clone());

        let node = self.alloc(Slot {
            id: id.clone(),
            name,
            kind,
            path,
            parent: Some(parent),
            children: Vec::new(),
        });
        if self.index.contains_key(&id) {
            warn!(id = %id, "duplicate node id in tree document; later node is reachable by path only");
        } else {
            self.index.insert(id, node);
        }
        self.slot_mut(parent).children.push(node);

        let children = raw.children.unwrap_or_default();
        match kind {
            NodeKind::Folder => {
                for child in children {
                    self.attach_raw(child, node)?;
                }
            }
            NodeKind::File if !children.is_empty() => {
                warn!(path = %self.slot(node).path, "dropping children of a file node");
            }
            NodeKind::File => {}
        }
        Ok(())
    }

    pub fn document_key(&self) -> Option<&str> {
        self.document_key.as_deref()
    }

    /// Number of nodes, not counting the root.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn node(&self, id: &str) -> Option<NodeView> {
        self.resolve(id).map(|node| self.view(node))
    }

    pub fn children(&self, id: &str) -> Option<Vec<NodeView>> {
        let node = self.resolve(id)?;
        Some(
            self.slot(node)
                .children
                .iter()
                .map(|child| self.view(*child))
                .collect(),
        )
    }

    /// Node and its parent; the root has no parent.
    pub fn find_node_and_parent(&self, id: &str) -> Option<(NodeView, Option<NodeView>)> {
        let node = self.resolve(id)?;
        let parent = self.slot(node).parent.map(|parent| self.view(parent));
        Some((self.view(node), parent))
    }

    pub fn create_folder(&mut self, parent_id: Option<&str>, name: &str) -> Result<String, StoreError> {
        self.create(parent_id, name, NodeKind::Folder)
    }

    /// Adds a file node and returns its path; the caller owns creating the
    /// matching content record.
    pub fn create_file(&mut self, parent_id: Option<&str>, name: &str) -> Result<String, StoreError> {
        self.create(parent_id, name, NodeKind::File)
    }

    fn create(&mut self, parent_id: Option<&str>, name: &str, kind: NodeKind) -> Result<String, StoreError> {
        let name = validate_name(name)?;
        let parent = match parent_id {
            Some(id) => self
                .resolve(id)
                .ok_or_else(|| StoreError::validation(format!("parent '{id}' does not exist")))?,
            None => self.root,
        };
        let parent_slot = self.slot(parent);
        if parent_slot.kind != NodeKind::Folder {
            return Err(StoreError::validation(format!(
                "parent '{}' is not a folder",
                parent_slot.path
            )));
        }
        if self.sibling_named(parent, &name).is_some() {
            return Err(StoreError::validation(format!(
                "'{name}' already exists in '{}'",
                parent_slot.path
            )));
        }
        let path = paths::join(&parent_slot.path, &name);
        if self.index.contains_key(&path) {
            return Err(StoreError::validation(format!("node id '{path}' is already taken")));
        }

        let node = self.alloc(Slot {
            id: path.clone(),
            name,
            kind,
            path: path.clone(),
            parent: Some(parent),
            children: Vec::new(),
        });
        self.index.insert(path.clone(), node);
        self.slot_mut(parent).children.push(node);
        debug!(path = %path, ?kind, "created node");
        Ok(path)
    }

    /// Renames a node and rewrites the id and path of its whole subtree.
    pub fn rename_item(&mut self, item_id: &str, new_name: &str) -> Result<RenamedPath, StoreError> {
        let node = self
            .resolve(item_id)
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))?;
        if node == self.root {
            return Err(StoreError::validation("the root cannot be renamed"));
        }
        let new_name = validate_name(new_name)?;
        let slot = self.slot(node);
        let old_path = slot.path.clone();
        let parent = slot.parent.unwrap_or(self.root);
        if slot.name == new_name {
            return Ok(RenamedPath {
                new_path: old_path.clone(),
                old_path,
            });
        }
        if self.sibling_named(parent, &new_name).is_some() {
            return Err(StoreError::validation(format!(
                "'{new_name}' already exists in '{}'",
                self.slot(parent).path
            )));
        }
        let new_path = paths::join(&self.slot(parent).path, &new_name);
        if self
            .index
            .get(&new_path)
            .is_some_and(|taken| !self.is_within(*taken, node))
        {
            return Err(StoreError::validation(format!("node id '{new_path}' is already taken")));
        }

        self.slot_mut(node).name = new_name;
        let subtree = self.subtree(node);
        for &member in &subtree {
            let (old_id, member_path) = {
                let slot = self.slot(member);
                (slot.id.clone(), slot.path.clone())
            };
            let parent_path = self
                .slot(member)
                .parent
                .map(|parent| self.slot(parent).path.clone())
                .unwrap_or_default();
            let rewritten = paths::rebase(&member_path, &old_path, &new_path)
                .unwrap_or_else(|| paths::join(&parent_path, &self.slot(member).name));
            let new_id = paths::rebase(&old_id, &old_path, &new_path).unwrap_or_else(|| old_id.clone());

            if self.index.get(&old_id) == Some(&member) {
                self.index.remove(&old_id);
            }
            self.index.insert(new_id.clone(), member);
            if self.expanded.remove(&old_id) {
                self.expanded.insert(new_id.clone());
            }
            let slot = self.slot_mut(member);
            slot.id = new_id;
            slot.path = rewritten;
        }
        debug!(old = %old_path, new = %new_path, nodes = subtree.len(), "renamed node");
        Ok(RenamedPath { old_path, new_path })
    }

    /// Removes a node with its whole subtree.
    pub fn delete_item(&mut self, item_id: &str) -> Result<RemovedNode, StoreError> {
        let node = self
            .resolve(item_id)
            .ok_or_else(|| StoreError::NotFound(item_id.to_string()))?;
        if node == self.root {
            return Err(StoreError::validation("the root cannot be deleted"));
        }
        let (path, kind, parent) = {
            let slot = self.slot(node);
            (slot.path.clone(), slot.kind, slot.parent.unwrap_or(self.root))
        };
        self.slot_mut(parent).children.retain(|child| *child != node);

        let subtree = self.subtree(node);
        for &member in &subtree {
            if let Some(slot) = self.slots[member.0].take() {
                if self.index.get(&slot.id) == Some(&member) {
                    self.index.remove(&slot.id);
                }
                self.expanded.remove(&slot.id);
            }
            self.free.push(member.0);
        }
        debug!(path = %path, nodes = subtree.len(), "deleted node");
        Ok(RemovedNode {
            path,
            kind,
            removed_nodes: subtree.len(),
        })
    }

    /// Paths of every file node, depth-first.
    pub fn file_paths(&self) -> Vec<String> {
        self.subtree(self.root)
            .into_iter()
            .map(|node| self.slot(node))
            .filter(|slot| slot.kind == NodeKind::File)
            .map(|slot| slot.path.clone())
            .collect()
    }

    /// Ids of every folder except the root, depth-first.
    pub fn folder_ids(&self) -> Vec<String> {
        self.subtree(self.root)
            .into_iter()
            .filter(|node| *node != self.root)
            .map(|node| self.slot(node))
            .filter(|slot| slot.kind == NodeKind::Folder)
            .map(|slot| slot.id.clone())
            .collect()
    }

    pub fn expanded(&self) -> &BTreeSet<String> {
        &self.expanded
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(&paths::normalize(id))
    }

    pub fn expand_all(&mut self) -> &BTreeSet<String> {
        self.expanded.extend(self.folder_ids());
        &self.expanded
    }

    pub fn collapse_all(&mut self) {
        self.expanded.clear();
    }

    pub fn set_expanded(&mut self, id: &str, expanded: bool) -> Result<(), StoreError> {
        let node = self
            .resolve(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let slot = self.slot(node);
        if slot.kind != NodeKind::Folder {
            return Err(StoreError::validation(format!("'{}' is not a folder", slot.path)));
        }
        let id = slot.id.clone();
        if expanded {
            self.expanded.insert(id);
        } else {
            self.expanded.remove(&id);
        }
        Ok(())
    }

    /// Keeps the expanded folders of a previous tree that still exist here.
    pub fn restore_expanded(&mut self, previous: &BTreeSet<String>) {
        let folders: BTreeSet<String> = self.folder_ids().into_iter().collect();
        self.expanded = previous.intersection(&folders).cloned().collect();
    }

    /// Nested wire form of the whole tree.
    pub fn to_document(&self) -> TreeNode {
        self.to_node(self.root)
    }

    /// Writes the whole tree over the stored document key.
    pub async fn persist(&self, remote: Remote<'_>) -> Result<(), StoreError> {
        let key = self
            .document_key
            .as_deref()
            .ok_or(StoreError::MissingDocumentKey)?;
        let body = json!({
            "projectId": remote.scope.project_id,
            "versionId": remote.scope.version_id,
            "data": self.to_document(),
        });
        remote
            .client
            .update_record(&remote.collections.trees, key, &body)
            .await?;
        debug!(key, nodes = self.len(), "persisted tree document");
        Ok(())
    }

    fn to_node(&self, node: NodeId) -> TreeNode {
        let slot = self.slot(node);
        TreeNode {
            id: slot.id.clone(),
            name: slot.name.clone(),
            kind: slot.kind,
            path: slot.path.clone(),
            children: match slot.kind {
                NodeKind::Folder => Some(slot.children.iter().map(|c| self.to_node(*c)).collect()),
                NodeKind::File => None,
            },
        }
    }

    fn resolve(&self, id: &str) -> Option<NodeId> {
        let id = paths::normalize(id);
        if id.is_empty() {
            return Some(self.root);
        }
        if let Some(node) = self.index.get(&id) {
            return Some(*node);
        }
        // A real node indexed under the same id shadows the root.
        if id == paths::normalize(&self.slot(self.root).id) {
            return Some(self.root);
        }
        // Ids that differ from paths in hand-edited documents.
        self.slots.iter().enumerate().find_map(|(index, slot)| {
            slot.as_ref()
                .filter(|slot| slot.path == id && index != self.root.0)
                .map(|_| NodeId(index))
        })
    }

    fn sibling_named(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.slot(parent)
            .children
            .iter()
            .copied()
            .find(|child| self.slot(*child).name == name)
    }

    /// `node` and all its descendants, parents before children.
    fn subtree(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.slot(current).children.iter().rev().copied());
        }
        out
    }

    fn is_within(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.slot(id).parent;
        }
        false
    }

    fn view(&self, node: NodeId) -> NodeView {
        let slot = self.slot(node);
        NodeView {
            id: slot.id.clone(),
            name: slot.name.clone(),
            kind: slot.kind,
            path: slot.path.clone(),
            parent_id: slot.parent.map(|parent| self.slot(parent).id.clone()),
            child_count: slot.children.len(),
        }
    }

    fn alloc(&mut self, slot: Slot) -> NodeId {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(slot));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    // Slots reachable from the root or the index are always occupied.
    fn slot(&self, node: NodeId) -> &Slot {
        self.slots[node.0]
            .as_ref()
            .unwrap_or_else(|| panic!("tree slot {} is vacant", node.0))
    }

    fn slot_mut(&mut self, node: NodeId) -> &mut Slot {
        self.slots[node.0]
            .as_mut()
            .unwrap_or_else(|| panic!("tree slot {} is vacant", node.0))
    }
}

fn validate_name(name: &str) -> Result<String, StoreError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StoreError::validation("name is empty"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(StoreError::validation(format!("name '{name}' contains a path separator")));
    }
    if name == "." || name == ".." {
        return Err(StoreError::validation(format!("name '{name}' is reserved")));
    }
    Ok(name.to_string())
}
