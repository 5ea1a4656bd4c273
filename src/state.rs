// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{config::Config, realtime::Notifier, store::Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub config: Config,
    pub notifier: Arc<Notifier>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Self {
        Self {
            store,
            config,
            notifier: Arc::new(Notifier::new()),
        }
    }
}

impl FromRef<AppState> for Arc<dyn Store> {
    fn from_ref(state: &AppState) -> Self {
        state.store.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

impl FromRef<AppState> for Arc<Notifier> {
    fn from_ref(state: &AppState) -> Self {
        state.notifier.clone()
    }
}
