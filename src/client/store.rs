// src/client/store.rs

use std::sync::{Arc, PoisonError, RwLock};

use url::Url;

use crate::client::cache::ResultCache;
use crate::client::provider::{Authentication, AuthenticationResult};

/// The registered client authentications and the results they produced.
#[derive(Default)]
pub struct AuthenticationStore {
    authentications: RwLock<Vec<Arc<dyn Authentication>>>,
    results: ResultCache,
}

impl AuthenticationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store backed by a custom result cache.
    pub fn with_cache(results: ResultCache) -> Self {
        AuthenticationStore {
            authentications: RwLock::default(),
            results,
        }
    }

    pub fn add_authentication(&self, authentication: Arc<dyn Authentication>) {
        self.authentications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(authentication);
    }

    pub fn remove_authentication(&self, authentication: &Arc<dyn Authentication>) {
        self.authentications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|a| !Arc::ptr_eq(a, authentication));
    }

    pub fn clear_authentications(&self) {
        self.authentications
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The first authentication that answers `scheme` challenges for `uri`.
    pub fn find_authentication(&self, scheme: &str, uri: &Url) -> Option<Arc<dyn Authentication>> {
        self.authentications
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|a| a.matches(scheme, uri))
            .cloned()
    }

    pub fn add_result(&self, result: AuthenticationResult) {
        self.results.store(result);
    }

    pub fn remove_result(&self, uri: &Url) -> bool {
        self.results.invalidate(uri)
    }

    pub fn clear_results(&self) {
        self.results.clear();
    }

    pub fn find_result(&self, uri: &Url) -> Option<AuthenticationResult> {
        self.results.lookup(uri)
    }

    pub fn results(&self) -> &ResultCache {
        &self.results
    }
}

impl std::fmt::Debug for AuthenticationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let authentications = self
            .authentications
            .read()
            .map_or(0, |authentications| authentications.len());
        f.debug_struct("AuthenticationStore")
            .field("authentications", &authentications)
            .field("results", &self.results)
            .finish()
    }
}
