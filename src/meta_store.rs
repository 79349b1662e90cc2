use scylla::frame::value::CqlTimestamp;
use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};
use uuid::Uuid;

pub type Timestamp = OffsetDateTime;

/// Shape of the date strings carried in metadata JSON.
const DATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].000Z");

pub fn format_date(ts: Timestamp) -> String {
    ts.format(&DATE_FORMAT).unwrap_or_default()
}

pub fn parse_date(raw: &str) -> Option<Timestamp> {
    PrimitiveDateTime::parse(raw, &DATE_FORMAT)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

pub fn now() -> Timestamp {
    OffsetDateTime::now_utc()
}

pub fn to_cql(ts: Timestamp) -> CqlTimestamp {
    CqlTimestamp((ts.unix_timestamp_nanos() / 1_000_000) as i64)
}

pub fn from_cql(ts: CqlTimestamp) -> Timestamp {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ts.0) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Request headers persisted with a version and replayed on GET/HEAD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredHeaders {
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

impl Default for StoredHeaders {
    fn default() -> Self {
        Self {
            content_type: "application/octet-stream".to_owned(),
            cache_control: None,
            content_disposition: None,
            content_encoding: None,
            content_language: None,
            expires: None,
        }
    }
}

/// JSON written on the version row once a version is finalised, and cached on
/// the object row. The integer `version` pointer stays authoritative; this is
/// read back to serve listings and header replay without extra lookups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub content_type: String,
    pub creation_date: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

impl ItemMetadata {
    pub fn compose(headers: &StoredHeaders, creation_date: Timestamp, digest: &str, size: i64) -> Self {
        Self {
            content_type: headers.content_type.clone(),
            creation_date: format_date(creation_date),
            digest: digest.to_owned(),
            size,
            cache_control: headers.cache_control.clone(),
            content_disposition: headers.content_disposition.clone(),
            content_encoding: headers.content_encoding.clone(),
            content_language: headers.content_language.clone(),
            expires: headers.expires.clone(),
        }
    }

    /// Parses a cached copy; an empty or pre-finalisation value yields None.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(|meta| !meta.creation_date.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct Bucket {
    pub name: String,
    pub bucket_id: Uuid,
    pub creation_date: Timestamp,
}

#[derive(Debug, Clone)]
pub struct ObjectHeader {
    pub bucket_id: Uuid,
    pub key: String,
    pub object_id: Uuid,
    /// Current version pointer. The version row it names is authoritative
    /// for serving.
    pub version: i32,
    pub metadata: String,
}

#[derive(Debug, Clone)]
pub struct VersionHeader {
    pub object_id: Uuid,
    pub bucket_id: Uuid,
    pub version: i32,
    /// Geometry is pinned per version; readers must use these values rather
    /// than the engine defaults.
    pub chunk_size: i32,
    pub chunks_per_partition: i32,
    pub content_type: String,
    pub creation_date: Timestamp,
    pub digest: String,
    pub size: i64,
    pub parts: bool,
    pub metadata: String,
}

#[derive(Debug, Clone)]
pub struct PartHeader {
    pub part: i32,
    pub blob_id: Uuid,
    pub digest: String,
    pub size: i64,
}

/// Coordinator row of an open multipart upload. Exists only between initiate
/// and complete/abort.
#[derive(Debug, Clone)]
pub struct MultipartUpload {
    pub key: String,
    pub upload_id: Uuid,
    pub object_id: Uuid,
    pub version: i32,
    pub bucket_id: Uuid,
    pub headers: StoredHeaders,
}

/// Everything needed to serve range reads of one object version without
/// further metadata lookups. A reader holding this keeps reading the frozen
/// `(object_id, version)` even if a writer promotes a newer version.
#[derive(Debug, Clone)]
pub struct S3Item {
    pub bucket: Bucket,
    pub key: String,
    pub object_id: Uuid,
    pub version: i32,
    pub chunk_size: i32,
    pub chunks_per_partition: i32,
    pub size: i64,
    pub content_type: String,
    pub digest: String,
    pub creation_date: Timestamp,
    pub metadata: ItemMetadata,
}

#[derive(Debug, Clone)]
pub struct ListEntry {
    pub key: String,
    pub size: i64,
    pub digest: String,
    pub creation_date: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct BucketQuery {
    pub matches: Vec<ListEntry>,
    pub prefixes: Vec<String>,
    pub is_truncated: bool,
    pub next_marker: Option<String>,
}

/// A client byte range, already parsed by the HTTP layer.
#[derive(Debug, Clone, Copy)]
pub enum ByteRange {
    /// `bytes=first-last`. A `last` of None or 0 reads to end of object; the
    /// zero case is relied on by existing clients.
    FromTo(u64, Option<u64>),
    /// `bytes=-length`, the trailing `length` bytes.
    Suffix(u64),
}

impl ByteRange {
    /// Resolves to `(start, length)` against an object of `size` bytes.
    /// Bounds past the end truncate silently.
    pub fn resolve(self, size: u64) -> (u64, u64) {
        match self {
            ByteRange::FromTo(first, last) => {
                if size == 0 {
                    return (0, 0);
                }
                let start = first.min(size);
                let end = match last {
                    None | Some(0) => size - 1,
                    Some(last) => last.min(size - 1),
                };
                if start > end {
                    (start, 0)
                } else {
                    (start, end - start + 1)
                }
            }
            ByteRange::Suffix(length) => {
                let length = length.min(size);
                (size - length, length)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_round_trip() {
        let ts = OffsetDateTime::from_unix_timestamp(1_597_406_400).unwrap();
        let raw = format_date(ts);
        assert_eq!(raw, "2020-08-14T12:00:00.000Z");
        assert_eq!(parse_date(&raw), Some(ts));
    }

    #[test]
    fn cql_conversion_keeps_millis() {
        let ts = to_cql(OffsetDateTime::from_unix_timestamp(1_597_406_400).unwrap());
        assert_eq!(ts.0, 1_597_406_400_000);
        assert_eq!(from_cql(ts).unix_timestamp(), 1_597_406_400);
    }

    #[test]
    fn metadata_round_trip() {
        let headers = StoredHeaders {
            content_type: "text/plain".to_owned(),
            cache_control: Some("no-cache".to_owned()),
            ..StoredHeaders::default()
        };
        let meta = ItemMetadata::compose(&headers, now(), "5d41402abc4b2a76b9719d911017c592", 5);
        let raw = serde_json::to_string(&meta).unwrap();
        let parsed = ItemMetadata::parse(&raw).unwrap();
        assert_eq!(parsed.content_type, "text/plain");
        assert_eq!(parsed.digest, "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(parsed.size, 5);
        assert_eq!(parsed.cache_control.as_deref(), Some("no-cache"));
        assert_eq!(parsed.content_encoding, None);
    }

    #[test]
    fn metadata_rejects_unfinalised_values() {
        assert!(ItemMetadata::parse("").is_none());
        assert!(ItemMetadata::parse("not json").is_none());
        assert!(ItemMetadata::parse("{}").is_none());
    }

    #[test]
    fn range_full_and_partial() {
        assert_eq!(ByteRange::FromTo(0, None).resolve(5), (0, 5));
        assert_eq!(ByteRange::FromTo(1, Some(3)).resolve(5), (1, 3));
        assert_eq!(ByteRange::FromTo(4, Some(4)).resolve(5), (4, 1));
    }

    #[test]
    fn range_end_zero_reads_to_eof() {
        assert_eq!(ByteRange::FromTo(0, Some(0)).resolve(5), (0, 5));
        assert_eq!(ByteRange::FromTo(2, Some(0)).resolve(5), (2, 3));
    }

    #[test]
    fn range_truncates_past_eof() {
        assert_eq!(ByteRange::FromTo(1, Some(99)).resolve(5), (1, 4));
        assert_eq!(ByteRange::FromTo(9, Some(12)).resolve(5), (5, 0));
        assert_eq!(ByteRange::FromTo(0, None).resolve(0), (0, 0));
    }

    #[test]
    fn range_suffix() {
        assert_eq!(ByteRange::Suffix(2).resolve(5), (3, 2));
        assert_eq!(ByteRange::Suffix(9).resolve(5), (0, 5));
        assert_eq!(ByteRange::Suffix(0).resolve(5), (5, 0));
    }
}
