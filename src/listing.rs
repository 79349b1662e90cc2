use time::OffsetDateTime;
use uuid::Uuid;

use crate::cluster::ScyllaStore;
use crate::error::StoreError;
use crate::meta_store::{self, Bucket, BucketQuery, ItemMetadata, ListEntry};

/// Smallest string ordering after every key that starts with `prefix`, used
/// as the exclusive upper bound of a prefix scan. None when no such string
/// exists.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut upper = prefix.to_owned();
    while let Some(ch) = upper.pop() {
        if let Some(next) = char::from_u32(ch as u32 + 1) {
            upper.push(next);
            return Some(upper);
        }
    }
    None
}

/// Key bounds of a listing scan.
#[derive(Debug, PartialEq, Eq)]
enum KeyScan {
    /// `key > lower`, to end of partition.
    After(String),
    /// `key > lower AND key < upper`, resuming inside a prefix.
    AfterBounded(String, String),
    /// `key >= lower AND key < upper`, a prefix scanned from its start.
    RangeBounded(String, String),
}

/// Bounds for resuming a scan strictly after `marker` while staying inside
/// `prefix`. A prefix with no representable successor scans open-ended; the
/// caller filters the tail.
fn scan_bounds(marker: &str, prefix: &str) -> KeyScan {
    if prefix.is_empty() {
        return KeyScan::After(marker.to_owned());
    }
    match prefix_successor(prefix) {
        Some(upper) if marker >= prefix => KeyScan::AfterBounded(marker.to_owned(), upper),
        Some(upper) => KeyScan::RangeBounded(prefix.to_owned(), upper),
        None if marker >= prefix => KeyScan::After(marker.to_owned()),
        None => KeyScan::After(prefix.to_owned()),
    }
}

/// Applies the max-keys page cut to a window fetched one row long, the extra
/// row deciding truncation.
fn cut_to_page<T>(mut rows: Vec<T>, max_keys: usize) -> (Vec<T>, bool) {
    let is_truncated = rows.len() > max_keys;
    rows.truncate(max_keys);
    (rows, is_truncated)
}

/// The common prefix a key folds into under delimiter collapsing, if any.
/// Collapsing applies only when a delimiter is given and the prefix is empty
/// or itself ends with the delimiter.
fn common_prefix_of(key: &str, prefix: &str, delimiter: &str) -> Option<String> {
    if delimiter.is_empty() || !(prefix.is_empty() || prefix.ends_with(delimiter)) {
        return None;
    }
    let suffix = key.strip_prefix(prefix)?;
    let pos = suffix.find(delimiter)?;
    Some(format!("{prefix}{}{delimiter}", &suffix[..pos]))
}

impl ScyllaStore {
    /// S3 key listing with prefix, delimiter, marker, and max-keys semantics.
    /// The scan resumes strictly after `marker` and fetches one row past
    /// `max_keys` to decide truncation.
    #[tracing::instrument(level = "debug", skip(self, bucket), fields(bucket = %bucket.name))]
    pub async fn get_all_keys(
        &self,
        bucket: &Bucket,
        marker: &str,
        prefix: &str,
        max_keys: i32,
        delimiter: &str,
    ) -> Result<BucketQuery, StoreError> {
        let max_keys = max_keys.clamp(0, 1000);
        let fetch = max_keys + 1;

        let result = match scan_bounds(marker, prefix) {
            KeyScan::After(lower) => {
                self.session
                    .execute_unpaged(&self.st.list_keys, (bucket.bucket_id, lower.as_str(), fetch))
                    .await?
            }
            KeyScan::AfterBounded(lower, upper) => {
                self.session
                    .execute_unpaged(
                        &self.st.list_keys_resume,
                        (bucket.bucket_id, lower.as_str(), upper.as_str(), fetch),
                    )
                    .await?
            }
            KeyScan::RangeBounded(lower, upper) => {
                self.session
                    .execute_unpaged(
                        &self.st.list_keys_prefix,
                        (bucket.bucket_id, lower.as_str(), upper.as_str(), fetch),
                    )
                    .await?
            }
        };

        let rows_result = result.into_rows_result().map_err(StoreError::decode)?;
        let mut rows: Vec<(String, Uuid, i32, Option<String>)> = Vec::new();
        for row in rows_result
            .rows::<(String, Uuid, i32, Option<String>)>()
            .map_err(StoreError::decode)?
        {
            rows.push(row.map_err(StoreError::decode)?);
        }

        let (rows, is_truncated) = cut_to_page(rows, max_keys as usize);

        let mut matches = Vec::new();
        let mut prefixes: Vec<String> = Vec::new();
        let mut last_key = None;

        for (key, object_id, version, metadata) in rows {
            if !key.starts_with(prefix) {
                continue;
            }
            last_key = Some(key.clone());

            if let Some(common) = common_prefix_of(&key, prefix, delimiter) {
                if !prefixes.contains(&common) {
                    prefixes.push(common);
                }
                continue;
            }

            let meta = match metadata.as_deref().and_then(ItemMetadata::parse) {
                Some(meta) => meta,
                // Cached copy not written yet; fall back to the version row.
                None => match self.get_version_header(object_id, version).await? {
                    Some(ver) => ItemMetadata {
                        content_type: ver.content_type,
                        creation_date: meta_store::format_date(ver.creation_date),
                        digest: ver.digest,
                        size: ver.size,
                        ..ItemMetadata::default()
                    },
                    None => {
                        tracing::info!("missing version for listed key [{key}]");
                        continue;
                    }
                },
            };

            let creation_date = meta_store::parse_date(&meta.creation_date).unwrap_or(OffsetDateTime::UNIX_EPOCH);
            matches.push(ListEntry {
                key,
                size: meta.size,
                digest: meta.digest,
                creation_date,
            });
        }

        Ok(BucketQuery {
            matches,
            prefixes,
            is_truncated,
            next_marker: if is_truncated { last_key } else { None },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collapse(keys: &[&str], prefix: &str, delimiter: &str) -> (Vec<String>, Vec<String>) {
        let mut matches = Vec::new();
        let mut prefixes: Vec<String> = Vec::new();
        for key in keys {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(common) = common_prefix_of(key, prefix, delimiter) {
                if !prefixes.contains(&common) {
                    prefixes.push(common);
                }
                continue;
            }
            matches.push((*key).to_owned());
        }
        (matches, prefixes)
    }

    #[test]
    fn delimiter_collapses_nested_keys() {
        let (matches, prefixes) = collapse(&["p/a", "p/b/c", "p/b/d", "q"], "p/", "/");
        assert_eq!(matches, vec!["p/a"]);
        assert_eq!(prefixes, vec!["p/b/"]);
    }

    #[test]
    fn flat_keys_under_prefix_stay_matches() {
        let (matches, prefixes) = collapse(&["a/x", "a/y", "b"], "a/", "/");
        assert_eq!(matches, vec!["a/x", "a/y"]);
        assert!(prefixes.is_empty());
    }

    #[test]
    fn no_delimiter_disables_collapsing() {
        let (matches, prefixes) = collapse(&["p/a", "p/b/c"], "p/", "");
        assert_eq!(matches, vec!["p/a", "p/b/c"]);
        assert!(prefixes.is_empty());
    }

    #[test]
    fn prefix_not_ending_with_delimiter_disables_collapsing() {
        let (matches, prefixes) = collapse(&["pa/x", "pb/y"], "p", "/");
        assert_eq!(matches, vec!["pa/x", "pb/y"]);
        assert!(prefixes.is_empty());
    }

    #[test]
    fn empty_prefix_collapses_top_level() {
        let (matches, prefixes) = collapse(&["a/x", "a/y", "b"], "", "/");
        assert_eq!(matches, vec!["b"]);
        assert_eq!(prefixes, vec!["a/"]);
    }

    #[test]
    fn successor_increments_the_last_char() {
        assert_eq!(prefix_successor("abc").as_deref(), Some("abd"));
        assert_eq!(prefix_successor("a/").as_deref(), Some("a0"));
    }

    #[test]
    fn successor_skips_unincrementable_tails() {
        assert_eq!(prefix_successor("a\u{10FFFF}").as_deref(), Some("b"));
        assert_eq!(prefix_successor("\u{10FFFF}"), None);
    }

    #[test]
    fn scan_starts_at_the_prefix() {
        assert_eq!(scan_bounds("", "p/"), KeyScan::RangeBounded("p/".into(), "p0".into()));
    }

    #[test]
    fn scan_resumes_after_a_marker_inside_the_prefix() {
        assert_eq!(scan_bounds("p/m", "p/"), KeyScan::AfterBounded("p/m".into(), "p0".into()));
        // A marker equal to the prefix is excluded, not re-listed.
        assert_eq!(scan_bounds("p/", "p/"), KeyScan::AfterBounded("p/".into(), "p0".into()));
    }

    #[test]
    fn scan_without_a_prefix_is_open_ended() {
        assert_eq!(scan_bounds("", ""), KeyScan::After(String::new()));
        assert_eq!(scan_bounds("m", ""), KeyScan::After("m".into()));
    }

    #[test]
    fn scan_with_an_unboundable_prefix_stays_open_ended() {
        assert_eq!(scan_bounds("", "\u{10FFFF}"), KeyScan::After("\u{10FFFF}".into()));
        assert_eq!(scan_bounds("\u{10FFFF}z", "\u{10FFFF}"), KeyScan::After("\u{10FFFF}z".into()));
    }

    #[test]
    fn page_cut_flags_the_probe_row() {
        assert_eq!(cut_to_page(vec![1, 2, 3], 2), (vec![1, 2], true));
        assert_eq!(cut_to_page(vec![1, 2], 2), (vec![1, 2], false));
        assert_eq!(cut_to_page(Vec::<i32>::new(), 2), (vec![], false));
    }
}
