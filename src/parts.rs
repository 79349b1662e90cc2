use bytes::Bytes;
use futures::Stream;
use tokio::io::AsyncWrite;
use uuid::Uuid;

use crate::cluster::ScyllaStore;
use crate::error::StoreError;
use crate::meta_store::{PartHeader, S3Item, VersionHeader};

/// `(part index, offset within part, bytes to read)` windows covering a range
/// request over parts of the given sizes, in order.
fn part_windows(sizes: &[i64], start: u64, length: u64) -> Vec<(usize, u64, u64)> {
    let mut windows = Vec::new();
    let mut remaining = length;
    let mut current_start: u64 = 0;

    for (ix, size) in sizes.iter().enumerate() {
        if remaining == 0 {
            break;
        }
        let part_size = (*size).max(0) as u64;
        let part_start = start.saturating_sub(current_start);
        if part_start >= part_size {
            current_start += part_size;
            continue;
        }
        let take = remaining.min(part_size - part_start);
        windows.push((ix, part_start, take));
        current_start += part_size;
        remaining -= take;
    }

    windows
}

impl ScyllaStore {
    /// Stores one part under the version: a part row with a fresh blob id,
    /// the bytes chunked through the version's pinned geometry, then the
    /// digest written back. Re-uploading a part number replaces the row and
    /// orphans the previous blob.
    #[tracing::instrument(level = "debug", skip(self, ver, stream), fields(object_id = %ver.object_id, version = ver.version))]
    pub(crate) async fn write_part<S>(
        &self,
        ver: &VersionHeader,
        part: i32,
        stream: &mut S,
        size: i64,
    ) -> Result<String, StoreError>
    where
        S: Stream<Item = Result<Bytes, s3s::StdError>> + Send + Unpin,
    {
        let blob_id = Uuid::new_v4();
        self.session
            .execute_unpaged(&self.st.insert_part, (ver.object_id, ver.version, part, blob_id, size))
            .await?;

        let digest = self
            .write_chunks(blob_id, stream, size, ver.chunk_size, ver.chunks_per_partition)
            .await?;

        self.session
            .execute_unpaged(&self.st.update_part, (digest.as_str(), ver.object_id, ver.version, part))
            .await?;

        Ok(digest)
    }

    /// Part rows of one version, ordered by part number. The clustering order
    /// is not relied on.
    pub(crate) async fn list_parts(&self, object_id: Uuid, version: i32) -> Result<Vec<PartHeader>, StoreError> {
        let result = self
            .session
            .execute_unpaged(&self.st.select_parts, (object_id, version))
            .await?
            .into_rows_result()
            .map_err(StoreError::decode)?;

        let mut parts = Vec::new();
        for row in result
            .rows::<(i32, Uuid, Option<String>, i64)>()
            .map_err(StoreError::decode)?
        {
            let (part, blob_id, digest, size) = row.map_err(StoreError::decode)?;
            parts.push(PartHeader {
                part,
                blob_id,
                digest: digest.unwrap_or_default(),
                size,
            });
        }
        parts.sort_by_key(|p| p.part);

        Ok(parts)
    }

    /// Streams `length` bytes at absolute offset `start` of the item into
    /// `out`, walking parts in order and skipping those before the range.
    #[tracing::instrument(level = "debug", skip(self, out, item), fields(bucket = %item.bucket.name, key = %item.key, version = item.version))]
    pub(crate) async fn read_parts<W>(
        &self,
        out: &mut W,
        item: &S3Item,
        start: u64,
        length: u64,
    ) -> Result<(), StoreError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let parts = self.list_parts(item.object_id, item.version).await?;
        let sizes: Vec<i64> = parts.iter().map(|p| p.size).collect();

        for (ix, part_start, take) in part_windows(&sizes, start, length) {
            self.read_chunks(
                out,
                parts[ix].blob_id,
                part_start,
                take,
                item.chunk_size,
                item.chunks_per_partition,
            )
            .await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_cover_whole_object() {
        assert_eq!(part_windows(&[4, 2], 0, 6), vec![(0, 0, 4), (1, 0, 2)]);
    }

    #[test]
    fn windows_straddle_a_part_boundary() {
        assert_eq!(part_windows(&[4, 2], 3, 2), vec![(0, 3, 1), (1, 0, 1)]);
    }

    #[test]
    fn windows_skip_leading_parts() {
        assert_eq!(part_windows(&[4, 4, 4], 9, 2), vec![(2, 1, 2)]);
    }

    #[test]
    fn windows_truncate_at_the_last_part() {
        assert_eq!(part_windows(&[4, 2], 5, 10), vec![(1, 1, 1)]);
    }

    #[test]
    fn windows_skip_empty_parts() {
        assert_eq!(part_windows(&[0, 3], 0, 3), vec![(1, 0, 3)]);
    }

    #[test]
    fn zero_length_reads_nothing() {
        assert!(part_windows(&[4, 2], 0, 0).is_empty());
    }
}
