use std::panic::Location;

use scylla::transport::errors::{NewSessionError, QueryError};
use tracing::error;
use uuid::Uuid;

#[inline]
#[track_caller]
pub(crate) fn log(source: &dyn std::error::Error) {
    let location = Location::caller();
    let span_trace = tracing_error::SpanTrace::capture();

    error!(
        target: "s3s_scylla",
        %location,
        error=%source,
        "span trace:\n{span_trace}"
    );
}

/// Errors produced by the storage engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such bucket")]
    NoSuchBucket,
    #[error("no such key")]
    NoSuchKey,
    #[error("no such upload")]
    NoSuchUpload,
    #[error("bucket already exists")]
    BucketAlreadyExists,
    #[error("missing chunk [blob_id = {blob_id} partition = {partition} ix = {ix}]")]
    ChunkMissing {
        blob_id: Uuid,
        partition: i32,
        ix: i32,
    },
    #[error("stream ended after {got} of {expected} bytes")]
    UnexpectedEof { expected: u64, got: u64 },
    #[error("cluster session failed: {0}")]
    Session(#[from] NewSessionError),
    #[error("cluster query failed: {0}")]
    Query(#[from] QueryError),
    #[error("row decode failed: {0}")]
    Decode(String),
    #[error("metadata encode failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("body stream failed: {0}")]
    Body(s3s::StdError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    /// Typed lookup failures keep their S3 error code; everything else is
    /// logged and surfaced as an internal error.
    #[track_caller]
    pub(crate) fn into_s3_error(self) -> s3s::S3Error {
        use s3s::S3ErrorCode;
        match self {
            Self::NoSuchBucket => s3s::S3Error::new(S3ErrorCode::NoSuchBucket),
            Self::NoSuchKey => s3s::S3Error::new(S3ErrorCode::NoSuchKey),
            Self::NoSuchUpload => s3s::S3Error::new(S3ErrorCode::NoSuchUpload),
            Self::BucketAlreadyExists => s3s::S3Error::new(S3ErrorCode::BucketAlreadyExists),
            err => {
                log(&err);
                s3s::S3Error::internal_error(err)
            }
        }
    }
}
