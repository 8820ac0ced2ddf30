//! Credential sessions for the remote store.
//!
//! The session is constructed once by the orchestrator and injected into the
//! worker pool and the executor. [`SharedSession`] serializes validation and
//! refresh so at most one worker re-authenticates at a time.

use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// A credential session that can check and refresh itself.
#[async_trait]
pub trait CredentialSession: Send + Sync {
    /// Make sure the session is usable, refreshing it if needed. May block
    /// for a long time (interactive re-authentication).
    async fn ensure_valid(&self) -> bool;

    /// Like [`CredentialSession::ensure_valid`] but never trusts a cached
    /// result. Used before long transfers.
    async fn revalidate(&self) -> bool {
        self.ensure_valid().await
    }
}

/// Pool-wide handle serializing session checks behind one lock.
pub struct SharedSession {
    inner: Arc<dyn CredentialSession>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SharedSession {
    pub fn new(inner: Arc<dyn CredentialSession>) -> Self {
        Self {
            inner,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn ensure_valid(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        self.inner.ensure_valid().await
    }

    pub async fn revalidate(&self) -> bool {
        let _guard = self.refresh_lock.lock().await;
        self.inner.revalidate().await
    }
}

/// AWS SSO profile session.
///
/// Validity is probed with a cheap `ListBuckets` call. When the probe fails
/// the session runs `aws sso login --profile <profile>` and rebuilds the
/// client. A successful probe is trusted for `revalidate_after`.
pub struct AwsSsoSession {
    profile: String,
    client: RwLock<Client>,
    validated_at: Mutex<Option<Instant>>,
    revalidate_after: Duration,
}

impl AwsSsoSession {
    pub async fn connect(profile: impl Into<String>, revalidate_after: Duration) -> Self {
        let profile = profile.into();
        let client = build_client(&profile).await;
        info!("Initialized session with profile: {}", profile);
        Self {
            profile,
            client: RwLock::new(client),
            validated_at: Mutex::new(None),
            revalidate_after,
        }
    }

    /// Current client. Cheap, clients share their connection pool.
    pub async fn client(&self) -> Client {
        self.client.read().await.clone()
    }

    fn is_fresh(&self) -> bool {
        let validated_at = self.validated_at.lock().unwrap_or_else(PoisonError::into_inner);
        validated_at.is_some_and(|at| at.elapsed() < self.revalidate_after)
    }

    fn mark_validated(&self, valid: bool) {
        let mut validated_at = self.validated_at.lock().unwrap_or_else(PoisonError::into_inner);
        *validated_at = valid.then(Instant::now);
    }

    async fn probe(&self) -> bool {
        let client = self.client().await;
        match client.list_buckets().send().await {
            Ok(_) => true,
            // Valid credentials without ListBuckets permission.
            Err(err) if err.code() == Some("AccessDenied") => true,
            Err(err) => {
                debug!(
                    "Credential probe failed for profile {}: {}",
                    self.profile,
                    aws_sdk_s3::error::DisplayErrorContext(&err)
                );
                false
            }
        }
    }

    async fn refresh(&self) -> bool {
        info!("Attempting to refresh SSO token for profile {}", self.profile);
        let status = Command::new("aws")
            .args(["sso", "login", "--profile", &self.profile])
            .status()
            .await;

        match status {
            Ok(status) if status.success() => {
                info!("SSO token refreshed successfully");
                let client = build_client(&self.profile).await;
                *self.client.write().await = client;
                true
            }
            Ok(status) => {
                error!("Failed to refresh SSO token: aws sso login exited with {}", status);
                false
            }
            Err(e) => {
                error!("Could not run the AWS CLI for SSO login: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl CredentialSession for AwsSsoSession {
    async fn ensure_valid(&self) -> bool {
        if self.is_fresh() {
            return true;
        }

        let mut valid = self.probe().await;
        if !valid {
            warn!("Invalid credentials for profile {}, attempting refresh", self.profile);
            valid = self.refresh().await && self.probe().await;
        }
        self.mark_validated(valid);
        valid
    }

    async fn revalidate(&self) -> bool {
        self.mark_validated(false);
        self.ensure_valid().await
    }
}

async fn build_client(profile: &str) -> Client {
    let config = aws_config::defaults(BehaviorVersion::latest())
        .profile_name(profile)
        .retry_config(RetryConfig::adaptive().with_max_attempts(3))
        .timeout_config(
            TimeoutConfig::builder()
                .connect_timeout(Duration::from_secs(10))
                .read_timeout(Duration::from_secs(30))
                .build(),
        )
        .load()
        .await;
    Client::new(&config)
}
