use anyhow::Context;
use reviewtree_core::Scope;

use crate::store::Collections;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_url: String,
    pub api_token: Option<String>,
    pub scope: Scope,
    pub collections: Collections,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let api_url = read("REVIEWTREE_API_URL").context("REVIEWTREE_API_URL is not set")?;
        let project_id =
            read("REVIEWTREE_PROJECT_ID").context("REVIEWTREE_PROJECT_ID is not set")?;
        let version_id =
            read("REVIEWTREE_VERSION_ID").context("REVIEWTREE_VERSION_ID is not set")?;
        let defaults = Collections::default();
        let collections = Collections {
            trees: read("REVIEWTREE_TREE_COLLECTION").unwrap_or(defaults.trees),
            files: read("REVIEWTREE_FILES_COLLECTION").unwrap_or(defaults.files),
        };

        Ok(Self {
            api_url,
            api_token: read("REVIEWTREE_API_TOKEN"),
            scope: Scope::new(project_id, version_id),
            collections,
        })
    }
}
