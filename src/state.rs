use crate::config::Config;
use crate::service::UserService;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct AppState {
    pub cfg: Config,
    pub users: UserService,

    // Counters for /status
    pub total_calls: AtomicU64, // incoming user requests
    pub failed_calls: AtomicU64,
}

impl AppState {
    pub fn new(cfg: Config, users: UserService) -> Self {
        Self {
            cfg,
            users,
            total_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
        }
    }

    pub fn count_call(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);
    }
}
