use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use md5::{Digest, Md5};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::cluster::ScyllaStore;
use crate::error::StoreError;

pub(crate) fn hex(input: impl AsRef<[u8]>) -> String {
    hex_simd::encode_to_string(input.as_ref(), hex_simd::AsciiCase::Lower)
}

/// Where the n-th chunk of a blob lives.
fn chunk_location(chunk_number: u64, chunks_per_partition: u64) -> (i32, i32) {
    (
        (chunk_number / chunks_per_partition) as i32,
        (chunk_number % chunks_per_partition) as i32,
    )
}

/// Chunk count and size of the final chunk for a blob of `size` bytes. Every
/// chunk except the last carries exactly `chunk_size` bytes; the last carries
/// the remainder, which equals `chunk_size` on an exact multiple.
fn chunk_layout(size: u64, chunk_size: u64) -> (u64, u64) {
    let count = size.div_ceil(chunk_size);
    let last = size - count.saturating_sub(1) * chunk_size;
    (count, last)
}

/// One cluster read of a range request: a chunk and the byte window of it to
/// keep. The window is in untrimmed chunk coordinates, so the head and tail
/// trims compose when the range lives inside a single chunk.
#[derive(Debug, PartialEq, Eq)]
struct ChunkSpan {
    chunk_number: u64,
    from: usize,
    to: usize,
}

fn chunk_spans(start: u64, length: u64, chunk_size: u64) -> Vec<ChunkSpan> {
    if length == 0 {
        return Vec::new();
    }
    let end = start + length - 1;
    let start_chunk = start / chunk_size;
    let end_chunk = end / chunk_size;

    (start_chunk..=end_chunk)
        .map(|chunk_number| ChunkSpan {
            chunk_number,
            from: if chunk_number == start_chunk {
                (start % chunk_size) as usize
            } else {
                0
            },
            to: if chunk_number == end_chunk {
                (end % chunk_size) as usize + 1
            } else {
                chunk_size as usize
            },
        })
        .collect()
}

/// Cuts a pulled byte stream into fixed-size chunk payloads, digesting the
/// bytes as they pass. Stream pieces need not align with chunk boundaries.
struct ChunkSlicer {
    buf: BytesMut,
    md5: Md5,
    received: u64,
    expected: u64,
}

impl ChunkSlicer {
    fn new(expected: u64) -> Self {
        Self {
            buf: BytesMut::new(),
            md5: Md5::new(),
            received: 0,
            expected,
        }
    }

    /// The next `want` bytes of the stream. Fails when the stream ends short.
    async fn next_chunk<S>(&mut self, stream: &mut S, want: usize) -> Result<BytesMut, StoreError>
    where
        S: Stream<Item = Result<Bytes, s3s::StdError>> + Send + Unpin,
    {
        while self.buf.len() < want {
            let Some(next) = stream.next().await else {
                return Err(StoreError::UnexpectedEof {
                    expected: self.expected,
                    got: self.received.min(self.expected),
                });
            };
            let bytes = next.map_err(StoreError::Body)?;
            self.received += bytes.len() as u64;
            self.buf.extend_from_slice(&bytes);
        }

        let data = self.buf.split_to(want);
        self.md5.update(&data);
        Ok(data)
    }

    fn digest(self) -> String {
        hex(self.md5.finalize())
    }
}

impl ScyllaStore {
    /// Streams exactly `size` bytes into chunk rows of `blob_id` and returns
    /// the lowercase hex MD5 of the bytes written. A failed insert propagates
    /// without rollback; the caller's version promotion is the commit
    /// boundary.
    pub(crate) async fn write_chunks<S>(
        &self,
        blob_id: Uuid,
        stream: &mut S,
        size: i64,
        chunk_size: i32,
        chunks_per_partition: i32,
    ) -> Result<String, StoreError>
    where
        S: Stream<Item = Result<Bytes, s3s::StdError>> + Send + Unpin,
    {
        let size = size.max(0) as u64;
        let chunk_size = chunk_size.max(1) as u64;
        let chunks_per_partition = chunks_per_partition.max(1) as u64;
        let (chunk_count, last_chunk_size) = chunk_layout(size, chunk_size);

        let mut slicer = ChunkSlicer::new(size);
        for chunk_number in 0..chunk_count {
            let bytes_to_read = if chunk_number == chunk_count - 1 {
                last_chunk_size
            } else {
                chunk_size
            };
            let data = slicer.next_chunk(stream, bytes_to_read as usize).await?;

            let (partition, ix) = chunk_location(chunk_number, chunks_per_partition);
            self.session
                .execute_unpaged(&self.st.insert_chunk, (blob_id, partition, ix, data.to_vec()))
                .await?;
        }

        Ok(slicer.digest())
    }

    /// Writes exactly `length` bytes of the blob, starting at absolute offset
    /// `start`, into `out`. A zero-length read writes nothing.
    pub(crate) async fn read_chunks<W>(
        &self,
        out: &mut W,
        blob_id: Uuid,
        start: u64,
        length: u64,
        chunk_size: i32,
        chunks_per_partition: i32,
    ) -> Result<(), StoreError>
    where
        W: AsyncWrite + Send + Unpin,
    {
        let chunks_per_partition = chunks_per_partition.max(1) as u64;

        for span in chunk_spans(start, length, chunk_size.max(1) as u64) {
            let (partition, ix) = chunk_location(span.chunk_number, chunks_per_partition);

            let row = self
                .session
                .execute_unpaged(&self.st.select_chunk, (blob_id, partition, ix))
                .await?
                .into_rows_result()
                .map_err(StoreError::decode)?
                .maybe_first_row::<(Vec<u8>,)>()
                .map_err(StoreError::decode)?;
            let Some((data,)) = row else {
                return Err(StoreError::ChunkMissing { blob_id, partition, ix });
            };

            let to = span.to.min(data.len());
            let from = span.from.min(to);
            out.write_all(&data[from..to]).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::executor::block_on;

    use super::*;

    fn pieces(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, s3s::StdError>> + Send + Unpin {
        futures::stream::iter(
            parts
                .iter()
                .map(|piece| Ok::<_, s3s::StdError>(Bytes::from_static(piece)))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn slicer_cuts_misaligned_pieces_into_chunks() {
        block_on(async {
            let mut stream = pieces(&[b"ab", b"cde", b"fghij"]);
            let mut slicer = ChunkSlicer::new(10);
            assert_eq!(slicer.next_chunk(&mut stream, 4).await.unwrap().to_vec(), b"abcd".to_vec());
            assert_eq!(slicer.next_chunk(&mut stream, 4).await.unwrap().to_vec(), b"efgh".to_vec());
            assert_eq!(slicer.next_chunk(&mut stream, 2).await.unwrap().to_vec(), b"ij".to_vec());
            assert_eq!(slicer.digest(), "a925576942e94b2ef57a066101b48876");
        });
    }

    #[test]
    fn slicer_reports_short_streams() {
        block_on(async {
            let mut stream = pieces(&[b"abc"]);
            let mut slicer = ChunkSlicer::new(10);
            let err = slicer.next_chunk(&mut stream, 4).await.unwrap_err();
            assert!(matches!(err, StoreError::UnexpectedEof { expected: 10, got: 3 }));
        });
    }

    #[test]
    fn slicer_ignores_bytes_past_the_declared_size() {
        block_on(async {
            let mut stream = pieces(&[b"helloXYZ"]);
            let mut slicer = ChunkSlicer::new(5);
            assert_eq!(slicer.next_chunk(&mut stream, 5).await.unwrap().to_vec(), b"hello".to_vec());
            assert_eq!(slicer.digest(), "5d41402abc4b2a76b9719d911017c592");
        });
    }

    #[test]
    fn layout_rounds_the_last_chunk_down() {
        assert_eq!(chunk_layout(10, 4), (3, 2));
        assert_eq!(chunk_layout(5, 128 * 1024), (1, 5));
        assert_eq!(chunk_layout(0, 4), (0, 0));
    }

    #[test]
    fn layout_on_exact_multiples() {
        // A single full chunk and a small multiple, both exercise the
        // last-chunk formula degenerating to chunk_size.
        assert_eq!(chunk_layout(4, 4), (1, 4));
        assert_eq!(chunk_layout(12, 4), (3, 4));
    }

    #[test]
    fn location_rolls_over_partitions() {
        // 10 bytes at chunk_size 4 with 2 chunks per partition: chunks land
        // at (0,0), (0,1), (1,0).
        assert_eq!(chunk_location(0, 2), (0, 0));
        assert_eq!(chunk_location(1, 2), (0, 1));
        assert_eq!(chunk_location(2, 2), (1, 0));
        assert_eq!(chunk_location(511, 512), (0, 511));
        assert_eq!(chunk_location(512, 512), (1, 0));
    }

    #[test]
    fn spans_of_a_full_single_chunk() {
        assert_eq!(
            chunk_spans(0, 4, 4),
            vec![ChunkSpan { chunk_number: 0, from: 0, to: 4 }]
        );
    }

    #[test]
    fn spans_trim_head_and_tail() {
        // bytes 1..=3 of "hello" at chunk_size 2: "e" + "ll".
        assert_eq!(
            chunk_spans(1, 3, 2),
            vec![
                ChunkSpan { chunk_number: 0, from: 1, to: 2 },
                ChunkSpan { chunk_number: 1, from: 0, to: 2 },
            ]
        );
    }

    #[test]
    fn spans_inside_one_chunk_compose_both_trims() {
        assert_eq!(
            chunk_spans(5, 2, 8),
            vec![ChunkSpan { chunk_number: 0, from: 5, to: 7 }]
        );
    }

    #[test]
    fn spans_cross_partition_sized_runs() {
        let spans = chunk_spans(6, 4, 4);
        assert_eq!(
            spans,
            vec![
                ChunkSpan { chunk_number: 1, from: 2, to: 4 },
                ChunkSpan { chunk_number: 2, from: 0, to: 2 },
            ]
        );
    }

    #[test]
    fn zero_length_spans_nothing() {
        assert!(chunk_spans(3, 0, 4).is_empty());
    }

    #[test]
    fn digest_matches_known_vectors() {
        assert_eq!(hex(Md5::digest(b"hello")), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(hex(Md5::digest(b"abcdefghij")), "a925576942e94b2ef57a066101b48876");
        assert_eq!(hex(Md5::digest(b"")), "d41d8cd98f00b204e9800998ecf8427e");
    }
}
