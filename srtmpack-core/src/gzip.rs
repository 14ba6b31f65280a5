//! Gzip inflate and SRTM payload sanity checks
//!
//! Tiles on the elevation bucket are gzip-compressed HGT files. Uncompressed
//! SRTM1 tiles are exactly 3601 × 3601 big-endian i16 samples.

use std::io::Read;

use bytes::Bytes;
use flate2::read::GzDecoder;
use futures::{Stream, StreamExt};

use crate::error::DownloadError;

/// Exact byte length of an uncompressed SRTM1 tile (3601 × 3601 × 2).
pub const SRTM1_TILE_BYTES: usize = 25_934_402;

/// Sample value marking a radar void.
pub const VOID_SAMPLE: i16 = -32768;

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

/// Plausible elevation band for the sanity check, metres.
const SAMPLE_MIN: i16 = -1000;
const SAMPLE_MAX: i16 = 10000;

/// Fraction of non-void samples allowed outside the plausible band.
const OUT_OF_RANGE_TOLERANCE: f64 = 0.01;

/// True when the buffer starts with the gzip magic number.
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0..2] == GZIP_MAGIC
}

/// Inflate a whole gzip payload held in memory.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, DownloadError> {
    if data.is_empty() {
        return Err(DownloadError::Decompress("empty input".to_string()));
    }

    // Pre-size from the ISIZE trailer, but never trust it past a tile's worth.
    let capacity = if is_gzip(data) {
        estimate_decompressed_size(data)
            .unwrap_or(0)
            .min(SRTM1_TILE_BYTES as u64) as usize
    } else {
        0
    };

    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(capacity);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| DownloadError::Decompress(e.to_string()))?;
    Ok(out)
}

/// Inflate a gzip payload arriving as a chunked byte stream.
///
/// Output is identical to [`decompress`] on the concatenated input,
/// regardless of how the compressed stream is fragmented.
pub async fn decompress_stream<S>(stream: S) -> Result<Vec<u8>, DownloadError>
where
    S: Stream<Item = Result<Bytes, DownloadError>>,
{
    use std::io::Write;

    let mut decoder = flate2::write::GzDecoder::new(Vec::new());
    let mut stream = std::pin::pin!(stream);
    let mut saw_data = false;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        saw_data = saw_data || !chunk.is_empty();
        decoder
            .write_all(&chunk)
            .map_err(|e| DownloadError::Decompress(e.to_string()))?;
    }

    if !saw_data {
        return Err(DownloadError::Decompress("empty input".to_string()));
    }

    decoder
        .finish()
        .map_err(|e| DownloadError::Decompress(e.to_string()))
}

/// Original size mod 2^32, read from the little-endian ISIZE trailer.
/// `None` when the buffer is too short to carry one.
pub fn estimate_decompressed_size(data: &[u8]) -> Option<u64> {
    if data.len() < 18 {
        return None;
    }
    let trailer: [u8; 4] = data[data.len() - 4..].try_into().ok()?;
    Some(u64::from(u32::from_le_bytes(trailer)))
}

/// Format sanity check for a decompressed SRTM1 tile: exact length, and at
/// most 1% of non-void samples outside the plausible elevation band.
pub fn validate_srtm(data: &[u8]) -> bool {
    if data.len() != SRTM1_TILE_BYTES {
        return false;
    }

    let sample_count = data.len() / 2;
    let mut out_of_range = 0usize;
    for pair in data.chunks_exact(2) {
        let sample = i16::from_be_bytes([pair[0], pair[1]]);
        if sample != VOID_SAMPLE && !(SAMPLE_MIN..=SAMPLE_MAX).contains(&sample) {
            out_of_range += 1;
        }
    }

    (out_of_range as f64) / (sample_count as f64) <= OUT_OF_RANGE_TOLERANCE
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn round_trips_arbitrary_bytes() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        for len in [0usize, 1, 2, 1000, 65537] {
            let data: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();
            assert_eq!(decompress(&gzip(&data)).unwrap(), data);
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            decompress(&[]),
            Err(DownloadError::Decompress(_))
        ));
    }

    #[test]
    fn rejects_non_gzip_input() {
        let err = decompress(b"definitely not gzip").unwrap_err();
        assert!(err.to_string().starts_with("Failed to decompress"));
    }

    #[test]
    fn detects_magic_number() {
        assert!(is_gzip(&gzip(b"x")));
        assert!(!is_gzip(b"\x1f"));
        assert!(!is_gzip(b"PK\x03\x04"));
        assert!(!is_gzip(&[]));
    }

    #[test]
    fn isize_trailer_reports_original_length() {
        let data = vec![7u8; 123_456];
        assert_eq!(estimate_decompressed_size(&gzip(&data)), Some(123_456));
        assert_eq!(estimate_decompressed_size(&[0; 4]), None);
    }

    #[tokio::test]
    async fn streaming_matches_in_memory_for_any_fragmentation() {
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let compressed = gzip(&data);

        for chunk_size in [1usize, 7, 1024, compressed.len()] {
            let chunks: Vec<Result<Bytes, DownloadError>> = compressed
                .chunks(chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            let out = decompress_stream(futures::stream::iter(chunks))
                .await
                .unwrap();
            assert_eq!(out, data, "chunk size {}", chunk_size);
        }
    }

    #[tokio::test]
    async fn streaming_rejects_empty_stream() {
        let empty = futures::stream::iter(Vec::<Result<Bytes, DownloadError>>::new());
        assert!(matches!(
            decompress_stream(empty).await,
            Err(DownloadError::Decompress(_))
        ));
    }

    fn srtm_tile_with(samples: &[(usize, i16)]) -> Vec<u8> {
        let mut data = vec![0u8; SRTM1_TILE_BYTES];
        for &(index, value) in samples {
            let bytes = value.to_be_bytes();
            data[index * 2] = bytes[0];
            data[index * 2 + 1] = bytes[1];
        }
        data
    }

    #[test]
    fn valid_tile_passes_sanity_check() {
        assert!(validate_srtm(&srtm_tile_with(&[(0, 1500), (1, VOID_SAMPLE)])));
    }

    #[test]
    fn wrong_length_fails_sanity_check() {
        assert!(!validate_srtm(&[0u8; 100]));
        assert!(!validate_srtm(&vec![0u8; SRTM1_TILE_BYTES - 2]));
    }

    #[test]
    fn tolerates_up_to_one_percent_outliers() {
        let sample_count = SRTM1_TILE_BYTES / 2;
        let budget = sample_count / 100;

        let within: Vec<(usize, i16)> = (0..budget).map(|i| (i, 20_000)).collect();
        assert!(validate_srtm(&srtm_tile_with(&within)));

        let over: Vec<(usize, i16)> = (0..budget + 1).map(|i| (i, 20_000)).collect();
        assert!(!validate_srtm(&srtm_tile_with(&over)));
    }

    #[test]
    fn voids_do_not_count_as_outliers() {
        let all_void: Vec<(usize, i16)> =
            (0..SRTM1_TILE_BYTES / 2).map(|i| (i, VOID_SAMPLE)).collect();
        assert!(validate_srtm(&srtm_tile_with(&all_void)));
    }
}
