//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::realtime::ConnectionHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub db: SqlitePool,
    pub hub: ConnectionHub,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    /// Create a new application state
    pub fn new(config: Config, db: SqlitePool, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                hub: ConnectionHub::new(),
                verifier,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the live connection hub
    pub fn hub(&self) -> &ConnectionHub {
        &self.inner.hub
    }

    /// Get the token verifier
    pub fn verifier(&self) -> &dyn TokenVerifier {
        self.inner.verifier.as_ref()
    }
}
