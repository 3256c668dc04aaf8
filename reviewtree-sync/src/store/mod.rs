pub mod content;
pub mod coordinator;
pub mod decoder;
pub mod error;
pub mod generation;
pub mod paths;
pub mod record;
pub mod tree;

/// Collection names for one backend deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collections {
    pub trees: String,
    pub files: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            trees: "reviewTrees".to_string(),
            files: "reviewFiles".to_string(),
        }
    }
}

/// Everything a store needs to reach its backend collection.
#[derive(Clone, Copy)]
pub struct Remote<'a> {
    pub client: &'a reviewtree_core::CollectionsClient,
    pub collections: &'a Collections,
    pub scope: &'a reviewtree_core::Scope,
}
