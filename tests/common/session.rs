use async_trait::async_trait;
use s3swarm::session::CredentialSession;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Credential session with scripted answers.
pub struct ScriptedSession {
    /// Remaining successful `ensure_valid` answers, `None` for unlimited
    ensure_budget: Mutex<Option<usize>>,
    revalidate_ok: AtomicBool,
    ensure_calls: AtomicUsize,
    revalidate_calls: AtomicUsize,
}

impl ScriptedSession {
    pub fn valid() -> Self {
        Self {
            ensure_budget: Mutex::new(None),
            revalidate_ok: AtomicBool::new(true),
            ensure_calls: AtomicUsize::new(0),
            revalidate_calls: AtomicUsize::new(0),
        }
    }

    /// Session whose `ensure_valid` succeeds `count` more times, then fails.
    pub fn expire_after(&self, count: usize) {
        *self.ensure_budget.lock().unwrap() = Some(count);
    }

    pub fn fail_revalidation(&self) {
        self.revalidate_ok.store(false, Ordering::SeqCst);
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    pub fn revalidate_calls(&self) -> usize {
        self.revalidate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSession for ScriptedSession {
    async fn ensure_valid(&self) -> bool {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        let mut budget = self.ensure_budget.lock().unwrap();
        match budget.as_mut() {
            None => true,
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
        }
    }

    async fn revalidate(&self) -> bool {
        self.revalidate_calls.fetch_add(1, Ordering::SeqCst);
        self.revalidate_ok.load(Ordering::SeqCst)
    }
}
