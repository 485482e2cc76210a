//! S3 adapter for CUR transfer.
//!
//! A [`BucketSession`] owns a client pinned to the bucket's home region,
//! optionally under an assumed role. Keys are passed to the service
//! verbatim: CUR report keys embed repeated slashes that URL normalization
//! would destroy.

mod crypto;

pub use crypto::{EnvelopeCipher, SealedObject};

use std::path::Path;

use aws_config::SdkConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use bytes::Bytes;
use snafu::prelude::*;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::aws::{self, RoleSpec, DEFAULT_REGION};
use crate::error::{
    BucketLocationSnafu, DeleteRequestSnafu, DeleteSnafu, DownloadBodySnafu, DownloadSnafu,
    IoSnafu, ListSnafu, StorageError, UploadSnafu,
};

/// Page size for destination listings and delete batches.
const LIST_PAGE_SIZE: i32 = 500;
const DELETE_BATCH_SIZE: usize = 1000;

/// A region-pinned S3 session for one bucket.
#[derive(Debug, Clone)]
pub struct BucketSession {
    bucket: String,
    region: String,
    client: aws_sdk_s3::Client,
    config: SdkConfig,
}

impl BucketSession {
    /// Open a session for `bucket`: resolve its home region, then build a
    /// client targeting that region, assuming `role` when one is given.
    pub async fn open(bucket: &str, role: Option<&RoleSpec>) -> Result<Self, StorageError> {
        let bootstrap = aws::session_config(DEFAULT_REGION, role).await?;
        let region = locate(&bootstrap, bucket).await?;
        let config = if region == DEFAULT_REGION {
            bootstrap
        } else {
            aws::session_config(&region, role).await?
        };
        debug!(bucket, region = %region, "opened bucket session");
        Ok(Self {
            bucket: bucket.to_string(),
            region,
            client: aws_sdk_s3::Client::new(&config),
            config,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// The session's resolved SDK configuration, for sibling clients (KMS).
    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Download an object fully into memory.
    pub async fn download(&self, key: &str) -> Result<Bytes, StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context(DownloadSnafu {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })?;
        let data = object.body.collect().await.context(DownloadBodySnafu {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })?;
        Ok(data.into_bytes())
    }

    /// Stream an object to a local file.
    pub async fn download_to_file(&self, key: &str, path: &Path) -> Result<(), StorageError> {
        let mut object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .context(DownloadSnafu {
                bucket: self.bucket.clone(),
                key: key.to_string(),
            })?;

        let mut file = tokio::fs::File::create(path).await.context(IoSnafu {
            path: path.to_path_buf(),
        })?;
        while let Some(chunk) = object.body.try_next().await.context(DownloadBodySnafu {
            bucket: self.bucket.clone(),
            key: key.to_string(),
        })? {
            file.write_all(&chunk).await.context(IoSnafu {
                path: path.to_path_buf(),
            })?;
        }
        file.flush().await.context(IoSnafu {
            path: path.to_path_buf(),
        })?;
        Ok(())
    }

    /// Upload a local file, envelope-encrypting when a cipher is supplied.
    pub async fn upload_file(
        &self,
        key: &str,
        path: &Path,
        cipher: Option<&EnvelopeCipher>,
    ) -> Result<(), StorageError> {
        match cipher {
            Some(cipher) => {
                let plaintext = tokio::fs::read(path).await.context(IoSnafu {
                    path: path.to_path_buf(),
                })?;
                let sealed = cipher.seal(&plaintext).await?;
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .set_metadata(Some(sealed.metadata))
                    .body(ByteStream::from(sealed.body))
                    .send()
                    .await
                    .context(UploadSnafu {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                    })?;
            }
            None => {
                let body = ByteStream::from_path(path).await.map_err(|source| {
                    StorageError::Io {
                        path: path.to_path_buf(),
                        source: std::io::Error::other(source),
                    }
                })?;
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .body(body)
                    .send()
                    .await
                    .context(UploadSnafu {
                        bucket: self.bucket.clone(),
                        key: key.to_string(),
                    })?;
            }
        }
        Ok(())
    }

    /// List every key under `prefix`, following pagination to the end.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .max_keys(LIST_PAGE_SIZE)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.context(ListSnafu {
                bucket: self.bucket.clone(),
                prefix: prefix.to_string(),
            })?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    /// Batch-delete the given keys.
    pub async fn delete(&self, keys: &[String]) -> Result<(), StorageError> {
        for chunk in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = chunk
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<Result<Vec<_>, _>>()
                .context(DeleteRequestSnafu)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .context(DeleteRequestSnafu)?;
            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .context(DeleteSnafu {
                    bucket: self.bucket.clone(),
                    count: chunk.len(),
                })?;
        }
        Ok(())
    }
}

/// Resolve a bucket's home region via GetBucketLocation.
///
/// Buckets in the default region report an empty location constraint.
async fn locate(config: &SdkConfig, bucket: &str) -> Result<String, StorageError> {
    let client = aws_sdk_s3::Client::new(config);
    let output = client
        .get_bucket_location()
        .bucket(bucket)
        .send()
        .await
        .context(BucketLocationSnafu {
            bucket: bucket.to_string(),
        })?;
    Ok(match output.location_constraint() {
        Some(constraint) if !constraint.as_str().is_empty() => constraint.as_str().to_string(),
        _ => DEFAULT_REGION.to_string(),
    })
}
