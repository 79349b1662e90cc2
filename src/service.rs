use std::sync::Arc;

use s3s::dto::*;
use s3s::{s3_error, S3Request, S3Response, S3Result, S3};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use crate::cluster::ScyllaStore;
use crate::error::StoreError;
use crate::meta_store::{self, ByteRange, ItemMetadata, S3Item, StoredHeaders};

/// Buffer of the duplex pipe bridging the engine's sink-style reads into a
/// response body stream.
const STREAM_BUFFER: usize = 64 * 1024;

#[derive(Debug)]
pub struct ScyllaS3 {
    store: Arc<ScyllaStore>,
}

impl ScyllaS3 {
    pub fn new(store: ScyllaStore) -> Self {
        Self { store: Arc::new(store) }
    }

    /// Spawns the range read into a detached task; a client that goes away
    /// surfaces there as a broken pipe, which is logged and abandoned.
    fn spawn_reader(&self, item: &S3Item, start: u64, length: u64) -> StreamingBlob {
        let (reader, mut writer) = tokio::io::duplex(STREAM_BUFFER);
        let store = Arc::clone(&self.store);
        let item = item.clone();

        tokio::spawn(async move {
            if let Err(err) = store.read_item(&mut writer, &item, start, length).await {
                crate::error::log(&err);
            }
            let _ = writer.shutdown().await;
        });

        StreamingBlob::wrap(ReaderStream::with_capacity(reader, STREAM_BUFFER))
    }
}

fn quoted(digest: &str) -> String {
    format!("\"{digest}\"")
}

fn fmt_content_range(start: u64, length: u64, size: u64) -> String {
    if length == 0 {
        format!("bytes */{size}")
    } else {
        format!("bytes {}-{}/{}", start, start + length - 1, size)
    }
}

fn timestamp(ts: meta_store::Timestamp) -> Timestamp {
    Timestamp::from(ts)
}

fn content_type_of(raw: &str) -> ContentType {
    raw.parse::<mime::Mime>().unwrap_or(mime::APPLICATION_OCTET_STREAM)
}

fn empty_body() -> StreamingBlob {
    StreamingBlob::wrap(futures::stream::empty::<Result<bytes::Bytes, std::io::Error>>())
}

fn parse_upload_id(raw: &str) -> S3Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| s3_error!(NoSuchUpload, "Upload id is not known"))
}

fn replay_expires(meta: &ItemMetadata) -> Option<Timestamp> {
    meta.expires.as_deref().and_then(meta_store::parse_date).map(Timestamp::from)
}

fn stored_headers(
    content_type: &Option<ContentType>,
    cache_control: &Option<CacheControl>,
    content_disposition: &Option<ContentDisposition>,
    content_encoding: &Option<ContentEncoding>,
    content_language: &Option<ContentLanguage>,
    expires: Option<Expires>,
) -> StoredHeaders {
    StoredHeaders {
        content_type: content_type
            .as_ref()
            .map_or_else(|| "application/octet-stream".to_owned(), ToString::to_string),
        cache_control: cache_control.clone(),
        content_disposition: content_disposition.clone(),
        content_encoding: content_encoding.clone(),
        content_language: content_language.clone(),
        expires: expires.map(|ts| meta_store::format_date(time::OffsetDateTime::from(ts))),
    }
}

/// `x-amz-meta-*` values synthesised for directory placeholders on HEAD.
fn directory_metadata(item: &S3Item) -> Option<Metadata> {
    if item.content_type != "application/x-directory" {
        return None;
    }
    let epoch = item.creation_date.unix_timestamp().to_string();
    let mut meta = Metadata::default();
    meta.insert("ctime".to_owned(), epoch.clone());
    meta.insert("mtime".to_owned(), epoch);
    meta.insert("mode".to_owned(), format!("{}", 0o40755));
    meta.insert("uid".to_owned(), "0".to_owned());
    meta.insert("gid".to_owned(), "0".to_owned());
    Some(meta)
}

fn mock_owner() -> Owner {
    Owner {
        display_name: Some("MockS3".to_owned()),
        id: Some("123".to_owned()),
    }
}

fn mock_grants() -> Vec<Grant> {
    vec![Grant {
        grantee: Some(Grantee {
            display_name: Some("You".to_owned()),
            email_address: None,
            id: Some("abc".to_owned()),
            type_: Type::from_static(Type::CANONICAL_USER),
            uri: None,
        }),
        permission: Some(Permission::from_static(Permission::FULL_CONTROL)),
    }]
}

#[async_trait::async_trait]
impl S3 for ScyllaS3 {
    #[tracing::instrument(level = "info", skip(self))]
    async fn create_bucket(&self, req: S3Request<CreateBucketInput>) -> S3Result<S3Response<CreateBucketOutput>> {
        let bucket = self
            .store
            .create_bucket(&req.input.bucket)
            .await
            .map_err(StoreError::into_s3_error)?;

        let output = CreateBucketOutput {
            location: Some(format!("/{}", bucket.name)),
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "info", skip(self))]
    async fn list_buckets(&self, _req: S3Request<ListBucketsInput>) -> S3Result<S3Response<ListBucketsOutput>> {
        let buckets: Vec<s3s::dto::Bucket> = self
            .store
            .list_all_buckets()
            .await
            .map_err(StoreError::into_s3_error)?
            .into_iter()
            .map(|b| s3s::dto::Bucket {
                creation_date: Some(timestamp(b.creation_date)),
                name: Some(b.name),
            })
            .collect();

        let output = ListBucketsOutput {
            buckets: Some(buckets),
            owner: Some(mock_owner()),
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn head_bucket(&self, req: S3Request<HeadBucketInput>) -> S3Result<S3Response<HeadBucketOutput>> {
        let Some(_bucket) = self
            .store
            .get_bucket(&req.input.bucket)
            .await
            .map_err(StoreError::into_s3_error)?
        else {
            return Err(s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket));
        };
        Ok(S3Response::new(HeadBucketOutput {
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "debug")]
    async fn list_objects(&self, req: S3Request<ListObjectsInput>) -> S3Result<S3Response<ListObjectsOutput>> {
        let v2_resp = self.list_objects_v2(req.map_input(Into::into)).await?;

        Ok(v2_resp.map_output(|v2| ListObjectsOutput {
            contents: v2.contents,
            common_prefixes: v2.common_prefixes,
            delimiter: v2.delimiter,
            encoding_type: v2.encoding_type,
            name: v2.name,
            prefix: v2.prefix,
            max_keys: v2.max_keys,
            is_truncated: v2.is_truncated,
            next_marker: v2.next_continuation_token,
            ..Default::default()
        }))
    }

    #[tracing::instrument(level = "debug")]
    async fn list_objects_v2(&self, req: S3Request<ListObjectsV2Input>) -> S3Result<S3Response<ListObjectsV2Output>> {
        let input = req.input;
        let Some(bucket) = self
            .store
            .get_bucket(&input.bucket)
            .await
            .map_err(StoreError::into_s3_error)?
        else {
            return Err(s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket));
        };

        let prefix = input.prefix.clone().unwrap_or_default();
        let delimiter = input.delimiter.clone().unwrap_or_default();
        let marker = input
            .continuation_token
            .clone()
            .or_else(|| input.start_after.clone())
            .unwrap_or_default();
        let max_keys = input.max_keys.unwrap_or(1000);

        let query = self
            .store
            .get_all_keys(&bucket, &marker, &prefix, max_keys, &delimiter)
            .await
            .map_err(StoreError::into_s3_error)?;

        let contents: Vec<Object> = query
            .matches
            .iter()
            .map(|entry| Object {
                e_tag: Some(quoted(&entry.digest)),
                key: Some(entry.key.clone()),
                last_modified: Some(timestamp(entry.creation_date)),
                size: Some(entry.size),
                storage_class: Some(ObjectStorageClass::from_static(ObjectStorageClass::STANDARD)),
                ..Default::default()
            })
            .collect();
        let common_prefixes: Vec<CommonPrefix> = query
            .prefixes
            .iter()
            .map(|p| CommonPrefix {
                prefix: Some(p.clone()),
            })
            .collect();
        let key_count = (contents.len() + common_prefixes.len()) as i32;

        let output = ListObjectsV2Output {
            common_prefixes: Some(common_prefixes),
            contents: Some(contents),
            continuation_token: input.continuation_token,
            delimiter: input.delimiter,
            is_truncated: Some(query.is_truncated),
            key_count: Some(key_count),
            max_keys: Some(max_keys),
            name: Some(input.bucket),
            next_continuation_token: query.next_marker,
            prefix: input.prefix,
            start_after: input.start_after,
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn put_object(&self, req: S3Request<PutObjectInput>) -> S3Result<S3Response<PutObjectOutput>> {
        let input = req.input;
        if let Some(ref storage_class) = input.storage_class {
            let is_valid = ["STANDARD"].contains(&storage_class.as_str());
            if !is_valid {
                return Err(s3_error!(InvalidStorageClass));
            }
        }

        // A PUT into an unknown bucket creates the bucket.
        let bucket = match self
            .store
            .get_bucket(&input.bucket)
            .await
            .map_err(StoreError::into_s3_error)?
        {
            Some(bucket) => bucket,
            None => self
                .store
                .create_bucket(&input.bucket)
                .await
                .map_err(StoreError::into_s3_error)?,
        };

        let Some(size) = input.content_length else {
            return Err(s3_error!(MissingContentLength));
        };
        let headers = stored_headers(
            &input.content_type,
            &input.cache_control,
            &input.content_disposition,
            &input.content_encoding,
            &input.content_language,
            input.expires,
        );

        let mut body = input.body.unwrap_or_else(empty_body);
        let item = self
            .store
            .store_item(&bucket, &input.key, &headers, size, &mut body)
            .await
            .map_err(StoreError::into_s3_error)?;

        let output = PutObjectOutput {
            e_tag: Some(quoted(&item.digest)),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn get_object(&self, req: S3Request<GetObjectInput>) -> S3Result<S3Response<GetObjectOutput>> {
        let input = req.input;
        let item = self
            .store
            .get_item(&input.bucket, &input.key)
            .await
            .map_err(StoreError::into_s3_error)?;

        let size = item.size.max(0) as u64;
        let range = input.range.as_ref().map(|range| match *range {
            Range::Int { first, last } => ByteRange::FromTo(first, last),
            Range::Suffix { length } => ByteRange::Suffix(length),
        });
        let (start, length) = range.map_or((0, size), |range| range.resolve(size));
        let content_range = range.map(|_| fmt_content_range(start, length, size));

        let body = self.spawn_reader(&item, start, length);

        let output = GetObjectOutput {
            accept_ranges: Some("bytes".to_owned()),
            body: Some(body),
            cache_control: item.metadata.cache_control.clone(),
            content_disposition: item.metadata.content_disposition.clone(),
            content_encoding: item.metadata.content_encoding.clone(),
            content_language: item.metadata.content_language.clone(),
            content_length: Some(length as i64),
            content_range,
            content_type: Some(content_type_of(&item.content_type)),
            e_tag: Some(quoted(&item.digest)),
            expires: replay_expires(&item.metadata),
            last_modified: Some(timestamp(item.creation_date)),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn head_object(&self, req: S3Request<HeadObjectInput>) -> S3Result<S3Response<HeadObjectOutput>> {
        let input = req.input;
        let item = self
            .store
            .get_item(&input.bucket, &input.key)
            .await
            .map_err(StoreError::into_s3_error)?;

        let output = HeadObjectOutput {
            accept_ranges: Some("bytes".to_owned()),
            cache_control: item.metadata.cache_control.clone(),
            content_disposition: item.metadata.content_disposition.clone(),
            content_encoding: item.metadata.content_encoding.clone(),
            content_language: item.metadata.content_language.clone(),
            content_length: Some(item.size),
            content_type: Some(content_type_of(&item.content_type)),
            e_tag: Some(quoted(&item.digest)),
            expires: replay_expires(&item.metadata),
            last_modified: Some(timestamp(item.creation_date)),
            metadata: directory_metadata(&item),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn delete_object(&self, req: S3Request<DeleteObjectInput>) -> S3Result<S3Response<DeleteObjectOutput>> {
        self.store
            .delete_item(&req.input.bucket, &req.input.key)
            .await
            .map_err(StoreError::into_s3_error)?;

        Ok(S3Response::new(DeleteObjectOutput::default()))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn delete_objects(&self, req: S3Request<DeleteObjectsInput>) -> S3Result<S3Response<DeleteObjectsOutput>> {
        let input = req.input;
        let quiet = input.delete.quiet.unwrap_or(false);

        let mut deleted = Vec::with_capacity(input.delete.objects.len());
        for object in input.delete.objects {
            self.store
                .delete_item(&input.bucket, &object.key)
                .await
                .map_err(StoreError::into_s3_error)?;
            deleted.push(DeletedObject {
                key: Some(object.key),
                ..Default::default()
            });
        }

        let output = DeleteObjectsOutput {
            deleted: if quiet { None } else { Some(deleted) },
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_multipart_upload(
        &self,
        req: S3Request<CreateMultipartUploadInput>,
    ) -> S3Result<S3Response<CreateMultipartUploadOutput>> {
        let input = req.input;
        let headers = stored_headers(
            &input.content_type,
            &input.cache_control,
            &input.content_disposition,
            &input.content_encoding,
            &input.content_language,
            input.expires,
        );

        let upload_id = self
            .store
            .create_multipart_upload(&input.bucket, &input.key, &headers)
            .await
            .map_err(StoreError::into_s3_error)?;

        let output = CreateMultipartUploadOutput {
            bucket: Some(input.bucket),
            key: Some(input.key),
            upload_id: Some(upload_id.to_string()),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn upload_part(&self, req: S3Request<UploadPartInput>) -> S3Result<S3Response<UploadPartOutput>> {
        let input = req.input;
        if !(1..=10_000).contains(&input.part_number) {
            return Err(s3_error!(InvalidArgument, "part number must be an integer between 1 and 10000"));
        }
        let upload_id = parse_upload_id(&input.upload_id)?;
        let Some(size) = input.content_length else {
            return Err(s3_error!(MissingContentLength));
        };

        let mut body = input.body.unwrap_or_else(empty_body);
        let digest = self
            .store
            .upload_part(&input.key, upload_id, input.part_number, &mut body, size)
            .await
            .map_err(StoreError::into_s3_error)?;

        let output = UploadPartOutput {
            e_tag: Some(quoted(&digest)),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn complete_multipart_upload(
        &self,
        req: S3Request<CompleteMultipartUploadInput>,
    ) -> S3Result<S3Response<CompleteMultipartUploadOutput>> {
        let input = req.input;
        let upload_id = parse_upload_id(&input.upload_id)?;

        // The staged part rows are authoritative; the part manifest sent by
        // the client is not consulted.
        let item = self
            .store
            .complete_multipart_upload(&input.bucket, &input.key, upload_id)
            .await
            .map_err(StoreError::into_s3_error)?;

        let output = CompleteMultipartUploadOutput {
            bucket: Some(input.bucket),
            e_tag: Some(quoted(&item.digest)),
            key: Some(input.key),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn abort_multipart_upload(
        &self,
        req: S3Request<AbortMultipartUploadInput>,
    ) -> S3Result<S3Response<AbortMultipartUploadOutput>> {
        let upload_id = parse_upload_id(&req.input.upload_id)?;
        self.store
            .abort_multipart_upload(&req.input.key, upload_id)
            .await
            .map_err(StoreError::into_s3_error)?;

        Ok(S3Response::new(AbortMultipartUploadOutput::default()))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn get_bucket_acl(&self, req: S3Request<GetBucketAclInput>) -> S3Result<S3Response<GetBucketAclOutput>> {
        let Some(_bucket) = self
            .store
            .get_bucket(&req.input.bucket)
            .await
            .map_err(StoreError::into_s3_error)?
        else {
            return Err(s3s::S3Error::new(s3s::S3ErrorCode::NoSuchBucket));
        };

        let output = GetBucketAclOutput {
            grants: Some(mock_grants()),
            owner: Some(mock_owner()),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn get_object_acl(&self, req: S3Request<GetObjectAclInput>) -> S3Result<S3Response<GetObjectAclOutput>> {
        let _item = self
            .store
            .get_item(&req.input.bucket, &req.input.key)
            .await
            .map_err(StoreError::into_s3_error)?;

        let output = GetObjectAclOutput {
            grants: Some(mock_grants()),
            owner: Some(mock_owner()),
            ..Default::default()
        };
        Ok(S3Response::new(output))
    }

    async fn put_object_acl(&self, _req: S3Request<PutObjectAclInput>) -> S3Result<S3Response<PutObjectAclOutput>> {
        Err(s3_error!(NotImplemented, "PutObjectAcl is not implemented yet"))
    }

    async fn copy_object(&self, _req: S3Request<CopyObjectInput>) -> S3Result<S3Response<CopyObjectOutput>> {
        Err(s3_error!(NotImplemented, "CopyObject is not implemented yet"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etags_are_quoted() {
        assert_eq!(quoted("5d41402abc4b2a76b9719d911017c592"), "\"5d41402abc4b2a76b9719d911017c592\"");
    }

    #[test]
    fn content_range_shapes() {
        assert_eq!(fmt_content_range(1, 3, 5), "bytes 1-3/5");
        assert_eq!(fmt_content_range(0, 5, 5), "bytes 0-4/5");
        assert_eq!(fmt_content_range(5, 0, 5), "bytes */5");
    }

    #[test]
    fn unknown_content_types_fall_back_to_octet_stream() {
        assert_eq!(content_type_of("text/plain").to_string(), "text/plain");
        assert_eq!(content_type_of("").to_string(), "application/octet-stream");
    }
}
