//! S3 implementation of [`ObjectStore`].

use super::{ObjectStore, ProgressFn, RemoteEntry, RemoteObject};
use crate::session::AwsSsoSession;
use crate::transfer::{ErrorKind, TransferError};
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

/// S3 object store backed by an SSO profile session.
///
/// The client is fetched from the session on every call so a refresh
/// performed by any worker is picked up by all of them.
pub struct S3ObjectStore {
    session: Arc<AwsSsoSession>,
}

impl S3ObjectStore {
    pub fn new(session: Arc<AwsSsoSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn check_access(&self, bucket: &str) -> Result<(), TransferError> {
        let client = self.session.client().await;
        client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(map_sdk_error)?;
        Ok(())
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteEntry>, TransferError> {
        let client = self.session.client().await;
        let mut entries = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = client
                .list_objects_v2()
                .bucket(bucket)
                .delimiter("/")
                .max_keys(1000);
            if !prefix.is_empty() {
                request = request.prefix(prefix);
            }
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(map_sdk_error)?;

            entries.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix())
                    .map(|p| RemoteEntry {
                        name: p.trim_end_matches('/').to_string(),
                        is_folder: true,
                    }),
            );
            entries.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(|key| RemoteEntry {
                        name: key.to_string(),
                        is_folder: false,
                    }),
            );

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            continuation_token = response.next_continuation_token().map(|s| s.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(entries)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<RemoteObject>, TransferError> {
        let client = self.session.client().await;
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .max_keys(1000);
            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(map_sdk_error)?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                let key = obj.key()?;
                Some(RemoteObject {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                })
            }));

            if !response.is_truncated().unwrap_or(false) {
                break;
            }
            continuation_token = response.next_continuation_token().map(|s| s.to_string());
            if continuation_token.is_none() {
                break;
            }
        }

        Ok(objects)
    }

    async fn head_size(&self, bucket: &str, key: &str) -> Result<Option<u64>, TransferError> {
        let client = self.session.client().await;
        match client.head_object().bucket(bucket).key(key).send().await {
            Ok(head) => Ok(Some(head.content_length().unwrap_or(0).max(0) as u64)),
            Err(err) => {
                let err = map_sdk_error(err);
                if err.kind == ErrorKind::NotFound {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn download(
        &self,
        bucket: &str,
        key: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, TransferError> {
        let client = self.session.client().await;
        let output = client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_sdk_error)?;
        let expected = output.content_length().unwrap_or(0).max(0) as u64;

        let part_path = part_path(dest);
        let result = async {
            let file = fs::File::create(&part_path).await?;
            let mut writer = BufWriter::new(file);
            let mut body = output.body;
            let mut transferred: u64 = 0;

            while let Some(bytes) = body
                .try_next()
                .await
                .map_err(|e| TransferError::from_message(format!("Download stream failed: {}", e)))?
            {
                writer.write_all(&bytes).await?;
                transferred += bytes.len() as u64;
                on_progress(transferred);
            }

            writer.flush().await?;
            writer.get_ref().sync_all().await?;
            if expected > 0 && transferred < expected {
                return Err(TransferError::new(
                    ErrorKind::Network,
                    format!("Connection closed after {} of {} bytes", transferred, expected),
                ));
            }
            Ok::<_, TransferError>(transferred)
        }
        .await;

        match result {
            Ok(transferred) => {
                fs::rename(&part_path, dest).await?;
                debug!("Downloaded s3://{}/{} to {:?}", bucket, key, dest);
                Ok(transferred)
            }
            Err(err) => {
                let _ = fs::remove_file(&part_path).await;
                Err(err)
            }
        }
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Map an SDK failure into the transfer taxonomy.
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>) -> TransferError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let context = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => TransferError::new(ErrorKind::Timeout, context),
        SdkError::DispatchFailure(failure) => {
            let kind = if failure.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Network
            };
            TransferError::new(kind, context)
        }
        SdkError::ResponseError(_) => TransferError::new(ErrorKind::Network, context),
        SdkError::ServiceError(service) => match err.code() {
            Some(code) => TransferError::from_code(code, err.message().unwrap_or_default()),
            // HEAD responses carry no body, only the status is known.
            None => match service.raw().status().as_u16() {
                404 => TransferError::new(ErrorKind::NotFound, "NotFound"),
                401 | 403 => TransferError::new(ErrorKind::Auth, "AccessDenied"),
                429 => TransferError::new(ErrorKind::Throttled, "TooManyRequests"),
                500..=599 => TransferError::new(ErrorKind::Server, context),
                _ => TransferError::from_message(context),
            },
        },
        _ => TransferError::from_message(context),
    }
}
