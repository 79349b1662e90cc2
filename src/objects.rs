use bytes::Bytes;
use futures::Stream;
use scylla::frame::value::CqlTimestamp;
use tokio::io::AsyncWrite;
use uuid::Uuid;

use crate::cluster::ScyllaStore;
use crate::error::StoreError;
use crate::meta_store::{self, Bucket, ItemMetadata, ObjectHeader, S3Item, StoredHeaders, VersionHeader};

/// Next version for a key: one past the version row the header points at, or
/// 1 when no served version exists. Version numbers only ever grow; a number
/// is never reused for an earlier row.
fn next_version(current: Option<i32>) -> i32 {
    current.map_or(1, |version| version + 1)
}

impl ScyllaStore {
    pub(crate) async fn get_object_header(
        &self,
        bucket_id: Uuid,
        key: &str,
    ) -> Result<Option<ObjectHeader>, StoreError> {
        let row = self
            .session
            .execute_unpaged(&self.st.select_object, (bucket_id, key))
            .await?
            .into_rows_result()
            .map_err(StoreError::decode)?
            .maybe_first_row::<(Uuid, i32, Option<String>)>()
            .map_err(StoreError::decode)?;

        Ok(row.map(|(object_id, version, metadata)| ObjectHeader {
            bucket_id,
            key: key.to_owned(),
            object_id,
            version,
            metadata: metadata.unwrap_or_default(),
        }))
    }

    pub(crate) async fn get_version_header(
        &self,
        object_id: Uuid,
        version: i32,
    ) -> Result<Option<VersionHeader>, StoreError> {
        let row = self
            .session
            .execute_unpaged(&self.st.select_version, (object_id, version))
            .await?
            .into_rows_result()
            .map_err(StoreError::decode)?
            .maybe_first_row::<(
                Uuid,
                i32,
                i32,
                Option<String>,
                CqlTimestamp,
                Option<String>,
                i64,
                Option<bool>,
                Option<String>,
            )>()
            .map_err(StoreError::decode)?;

        Ok(row.map(
            |(bucket_id, chunk_size, chunks_per_partition, content_type, creation_date, digest, size, parts, metadata)| {
                VersionHeader {
                    object_id,
                    bucket_id,
                    version,
                    chunk_size,
                    chunks_per_partition,
                    content_type: content_type.unwrap_or_default(),
                    creation_date: meta_store::from_cql(creation_date),
                    digest: digest.unwrap_or_default(),
                    size,
                    parts: parts.unwrap_or(false),
                    metadata: metadata.unwrap_or_default(),
                }
            },
        ))
    }

    /// Inserts a fresh version row pinned to the engine's current geometry,
    /// with an empty digest until the bytes are in.
    pub(crate) async fn insert_version(
        &self,
        bucket_id: Uuid,
        object_id: Uuid,
        version: i32,
        headers: &StoredHeaders,
        size: i64,
    ) -> Result<VersionHeader, StoreError> {
        self.session
            .execute_unpaged(
                &self.st.insert_version,
                (
                    object_id,
                    bucket_id,
                    version,
                    self.cfg.chunk_size,
                    self.cfg.chunks_per_partition,
                    headers.content_type.as_str(),
                    meta_store::to_cql(meta_store::now()),
                    size,
                ),
            )
            .await?;

        self.get_version_header(object_id, version)
            .await?
            .ok_or_else(|| StoreError::decode("version row missing after insert"))
    }

    /// Writes the final digest and metadata on the version row and promotes
    /// the object header to point at it. The header upsert also (re)writes
    /// `object_id`, which creates the header when it does not exist yet.
    pub(crate) async fn finalize_version(
        &self,
        obj: &ObjectHeader,
        ver: &VersionHeader,
        headers: &StoredHeaders,
        size: i64,
        digest: &str,
        parts: bool,
    ) -> Result<ItemMetadata, StoreError> {
        let metadata = ItemMetadata::compose(headers, ver.creation_date, digest, size);
        let raw = serde_json::to_string(&metadata)?;

        self.session
            .execute_unpaged(
                &self.st.update_version,
                (digest, size, parts, raw.as_str(), ver.object_id, ver.version),
            )
            .await?;

        self.session
            .execute_unpaged(
                &self.st.update_object,
                (ver.object_id, ver.version, raw.as_str(), obj.bucket_id, obj.key.as_str()),
            )
            .await?;

        Ok(metadata)
    }

    /// Simple PUT: allocate the next version, stream the body through the
    /// chunk codec as part 1, then promote the object header.
    #[tracing::instrument(level = "debug", skip(self, bucket, headers, stream), fields(bucket = %bucket.name))]
    pub async fn store_item<S>(
        &self,
        bucket: &Bucket,
        key: &str,
        headers: &StoredHeaders,
        size: i64,
        stream: &mut S,
    ) -> Result<S3Item, StoreError>
    where
        S: Stream<Item = Result<Bytes, s3s::StdError>> + Send + Unpin,
    {
        tracing::info!("store_item {}/{}: {} bytes", bucket.name, key, size);

        let obj = match self.get_object_header(bucket.bucket_id, key).await? {
            Some(obj) => obj,
            None => {
                self.session
                    .execute_unpaged(&self.st.insert_object, (bucket.bucket_id, key, Uuid::new_v4(), 1_i32))
                    .await?;
                self.get_object_header(bucket.bucket_id, key)
                    .await?
                    .ok_or_else(|| StoreError::decode("object row missing after insert"))?
            }
        };

        // A version row at the current pointer means the key has served
        // bytes before; the new version goes one past it.
        let current = self.get_version_header(obj.object_id, obj.version).await?;
        let version = next_version(current.map(|ver| ver.version));

        let ver = self.insert_version(obj.bucket_id, obj.object_id, version, headers, size).await?;
        let digest = self.write_part(&ver, 1, stream, size).await?;
        let metadata = self.finalize_version(&obj, &ver, headers, size, &digest, false).await?;

        Ok(S3Item {
            bucket: bucket.clone(),
            key: key.to_owned(),
            object_id: ver.object_id,
            version: ver.version,
            chunk_size: ver.chunk_size,
            chunks_per_partition: ver.chunks_per_partition,
            size,
            content_type: metadata.content_type.clone(),
            digest,
            creation_date: ver.creation_date,
            metadata,
        })
    }

    /// Resolves bucket → object header → current version into a descriptor
    /// that can serve range reads without further lookups.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn get_item(&self, bucket_name: &str, key: &str) -> Result<S3Item, StoreError> {
        let Some(bucket) = self.get_bucket(bucket_name).await? else {
            return Err(StoreError::NoSuchBucket);
        };
        let Some(obj) = self.get_object_header(bucket.bucket_id, key).await? else {
            return Err(StoreError::NoSuchKey);
        };
        let Some(ver) = self.get_version_header(obj.object_id, obj.version).await? else {
            tracing::info!("missing version [object_id = {} version = {}]", obj.object_id, obj.version);
            return Err(StoreError::NoSuchKey);
        };
        tracing::debug!(
            "version header [object_id = {} version = {} size = {} parts = {}]",
            ver.object_id,
            ver.version,
            ver.size,
            ver.parts
        );

        let metadata = ItemMetadata::parse(&ver.metadata)
            .or_else(|| ItemMetadata::parse(&obj.metadata))
            .unwrap_or_else(|| ItemMetadata {
                content_type: ver.content_type.clone(),
                creation_date: meta_store::format_date(ver.creation_date),
                digest: ver.digest.clone(),
                size: ver.size,
                ..ItemMetadata::default()
            });

        Ok(S3Item {
            bucket,
            key: key.to_owned(),
            object_id: ver.object_id,
            version: ver.version,
            chunk_size: ver.chunk_size,
            chunks_per_partition: ver.chunks_per_partition,
            size: ver.size,
            content_type: ver.content_type.clone(),
            digest: ver.digest.clone(),
            creation_date: ver.creation_date,
            metadata,
        })
    }

    /// Streams `length` bytes of the item at offset `start` into `out`.
    pub async fn read_item<W>(&self, out: &mut W, item: &S3Item, start: u64, length: u64) -> Result<(), StoreError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        self.read_parts(out, item, start, length).await
    }

    /// Tombstones the object header. Version, part, and chunk rows are left
    /// behind for a future background sweep. Deleting an absent key succeeds.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn delete_item(&self, bucket_name: &str, key: &str) -> Result<(), StoreError> {
        let Some(bucket) = self.get_bucket(bucket_name).await? else {
            return Err(StoreError::NoSuchBucket);
        };
        self.session
            .execute_unpaged(&self.st.delete_object, (bucket.bucket_id, key))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_version_is_one() {
        assert_eq!(next_version(None), 1);
    }

    #[test]
    fn versions_step_past_the_current_row() {
        assert_eq!(next_version(Some(1)), 2);
        assert_eq!(next_version(Some(41)), 42);
    }

    #[test]
    fn repeated_stores_grow_strictly() {
        let mut version = next_version(None);
        for _ in 0..4 {
            let next = next_version(Some(version));
            assert!(next > version);
            version = next;
        }
        assert_eq!(version, 5);
    }
}
