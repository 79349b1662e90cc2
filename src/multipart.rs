use bytes::Bytes;
use futures::Stream;
use md5::{Digest, Md5};
use uuid::Uuid;

use crate::chunks::hex;
use crate::cluster::ScyllaStore;
use crate::error::StoreError;
use crate::meta_store::{MultipartUpload, ObjectHeader, PartHeader, S3Item, StoredHeaders};

/// Total size and composite digest of an upload: MD5 over the ASCII hex part
/// digests concatenated in part-number order, not over the raw bytes.
fn composite_digest(parts: &[PartHeader]) -> (i64, String) {
    let mut size = 0;
    let mut md5 = Md5::new();
    for part in parts {
        size += part.size;
        md5.update(part.digest.as_bytes());
    }
    (size, hex(md5.finalize()))
}

impl ScyllaStore {
    /// Opens an upload: records the coordinator row and stages a pending
    /// version one past the object's current one (or 1 for a new key).
    #[tracing::instrument(level = "debug", skip(self, headers))]
    pub async fn create_multipart_upload(
        &self,
        bucket_name: &str,
        key: &str,
        headers: &StoredHeaders,
    ) -> Result<Uuid, StoreError> {
        let Some(bucket) = self.get_bucket(bucket_name).await? else {
            return Err(StoreError::NoSuchBucket);
        };

        let (object_id, version) = match self.get_object_header(bucket.bucket_id, key).await? {
            Some(obj) => (obj.object_id, obj.version + 1),
            None => (Uuid::new_v4(), 1),
        };

        let upload_id = Uuid::new_v4();
        let raw = serde_json::to_string(headers)?;
        self.session
            .execute_unpaged(
                &self.st.insert_upload,
                (key, upload_id, object_id, version, bucket.bucket_id, raw.as_str()),
            )
            .await?;

        self.insert_version(bucket.bucket_id, object_id, version, headers, 0).await?;

        tracing::info!("multipart upload opened [key = {key} version = {version} upload_id = {upload_id}]");
        Ok(upload_id)
    }

    pub(crate) async fn get_multipart(&self, key: &str, upload_id: Uuid) -> Result<Option<MultipartUpload>, StoreError> {
        let row = self
            .session
            .execute_unpaged(&self.st.select_upload, (key, upload_id))
            .await?
            .into_rows_result()
            .map_err(StoreError::decode)?
            .maybe_first_row::<(Uuid, i32, Uuid, Option<String>)>()
            .map_err(StoreError::decode)?;

        Ok(row.map(|(object_id, version, bucket_id, metadata)| MultipartUpload {
            key: key.to_owned(),
            upload_id,
            object_id,
            version,
            bucket_id,
            headers: metadata
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default(),
        }))
    }

    /// Stages one part under the upload's pending version and returns its
    /// digest. Parts of the same upload may be written concurrently; their
    /// rows are independent.
    #[tracing::instrument(level = "debug", skip(self, stream))]
    pub async fn upload_part<S>(
        &self,
        key: &str,
        upload_id: Uuid,
        part_number: i32,
        stream: &mut S,
        size: i64,
    ) -> Result<String, StoreError>
    where
        S: Stream<Item = Result<Bytes, s3s::StdError>> + Send + Unpin,
    {
        let Some(upload) = self.get_multipart(key, upload_id).await? else {
            return Err(StoreError::NoSuchUpload);
        };
        let Some(ver) = self.get_version_header(upload.object_id, upload.version).await? else {
            return Err(StoreError::NoSuchUpload);
        };

        self.write_part(&ver, part_number, stream, size).await
    }

    /// Promotes the pending version: gathers the staged part rows, computes
    /// the composite digest and total size, finalises the version, repoints
    /// the object header, and drops the coordinator row.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn complete_multipart_upload(
        &self,
        bucket_name: &str,
        key: &str,
        upload_id: Uuid,
    ) -> Result<S3Item, StoreError> {
        let Some(bucket) = self.get_bucket(bucket_name).await? else {
            return Err(StoreError::NoSuchBucket);
        };
        let Some(upload) = self.get_multipart(key, upload_id).await? else {
            return Err(StoreError::NoSuchUpload);
        };
        if upload.bucket_id != bucket.bucket_id {
            return Err(StoreError::NoSuchUpload);
        }
        let Some(ver) = self.get_version_header(upload.object_id, upload.version).await? else {
            return Err(StoreError::NoSuchUpload);
        };
        tracing::debug!(
            "promoting version [object_id = {} version = {} bucket_id = {}]",
            ver.object_id,
            ver.version,
            ver.bucket_id
        );

        let parts = self.list_parts(upload.object_id, upload.version).await?;
        let (size, digest) = composite_digest(&parts);

        // The header may not exist yet, or may name an object created by a
        // concurrent simple PUT; the upsert repoints it to the upload's
        // object either way.
        let obj = ObjectHeader {
            bucket_id: bucket.bucket_id,
            key: key.to_owned(),
            object_id: upload.object_id,
            version: upload.version,
            metadata: String::new(),
        };
        let metadata = self.finalize_version(&obj, &ver, &upload.headers, size, &digest, true).await?;

        self.session
            .execute_unpaged(&self.st.delete_upload, (upload.key.as_str(), upload.upload_id))
            .await?;
        tracing::info!(
            "multipart upload completed [key = {} upload_id = {} size = {size}]",
            upload.key,
            upload.upload_id
        );

        Ok(S3Item {
            bucket,
            key: key.to_owned(),
            object_id: upload.object_id,
            version: upload.version,
            chunk_size: ver.chunk_size,
            chunks_per_partition: ver.chunks_per_partition,
            size,
            content_type: metadata.content_type.clone(),
            digest,
            creation_date: ver.creation_date,
            metadata,
        })
    }

    /// Drops the coordinator row. Staged version, part, and chunk rows are
    /// left behind for a future background sweep.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn abort_multipart_upload(&self, key: &str, upload_id: Uuid) -> Result<(), StoreError> {
        if self.get_multipart(key, upload_id).await?.is_none() {
            return Err(StoreError::NoSuchUpload);
        }
        self.session
            .execute_unpaged(&self.st.delete_upload, (key, upload_id))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(number: i32, digest: &str, size: i64) -> PartHeader {
        PartHeader {
            part: number,
            blob_id: Uuid::new_v4(),
            digest: digest.to_owned(),
            size,
        }
    }

    #[test]
    fn composite_digest_of_two_parts() {
        // MD5("AAAA") and MD5("BB"); the composite hashes the concatenated
        // hex strings, not the raw bytes.
        let parts = vec![
            part(1, "098890dde069e9abad63f19a0d9e1f32", 4),
            part(2, "9d3d9048db16a7eee539e93e3618cbe7", 2),
        ];
        let (size, digest) = composite_digest(&parts);
        assert_eq!(size, 6);
        assert_eq!(digest, "91cd56a7730dd46f7a7ebf4522a55ec9");
        assert_ne!(digest, "dc65136dc8f737dc8c43a57a60bda6dd"); // MD5("AAAABB")
    }

    #[test]
    fn composite_digest_depends_on_part_order() {
        let a = part(1, "098890dde069e9abad63f19a0d9e1f32", 4);
        let b = part(2, "9d3d9048db16a7eee539e93e3618cbe7", 2);
        let (_, forward) = composite_digest(&[a.clone(), b.clone()]);
        let (_, backward) = composite_digest(&[b, a]);
        assert_ne!(forward, backward);
    }

    #[test]
    fn composite_digest_of_no_parts_is_the_empty_digest() {
        let (size, digest) = composite_digest(&[]);
        assert_eq!(size, 0);
        assert_eq!(digest, "d41d8cd98f00b204e9800998ecf8427e");
    }
}
