//! Shared state handed to every handler.

use std::sync::Arc;

use coordination::directory::StationDirectory;
use coordination::intake::Intake;
use coordination::response::StationResponseHandler;
use coordination::store::Store;

use crate::config::Environment;
use crate::rate_limit::RateLimiter;

/// Cheap to clone; everything lives behind one `Arc`.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Store,
    intake: Intake,
    directory: StationDirectory,
    responses: StationResponseHandler,
    limiter: Arc<dyn RateLimiter>,
    environment: Environment,
}

impl AppState {
    pub fn new(
        store: Store,
        intake: Intake,
        limiter: Arc<dyn RateLimiter>,
        environment: Environment,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                directory: StationDirectory::new(store.clone()),
                responses: StationResponseHandler::new(store.clone()),
                store,
                intake,
                limiter,
                environment,
            }),
        }
    }

    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn intake(&self) -> &Intake {
        &self.inner.intake
    }

    pub fn directory(&self) -> &StationDirectory {
        &self.inner.directory
    }

    pub fn responses(&self) -> &StationResponseHandler {
        &self.inner.responses
    }

    pub fn limiter(&self) -> &dyn RateLimiter {
        self.inner.limiter.as_ref()
    }

    pub fn is_production(&self) -> bool {
        self.inner.environment == Environment::Production
    }
}
