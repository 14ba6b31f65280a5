//! Streaming ZIP assembly
//!
//! Completed tiles are written into a single in-memory archive as they come
//! out of the pipeline, in completion order. Entries are stored uncompressed;
//! SRTM payloads are high-entropy and deflate buys nothing.

use std::io::Write;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::error::DownloadError;
use crate::tile::TileId;

/// MIME type of the archive returned by the pipeline.
pub const ZIP_MIME: &str = "application/zip";

/// One decompressed tile ready for archiving.
#[derive(Debug, Clone)]
pub struct ZipEntry {
    pub id: TileId,
    pub data: Bytes,
}

/// Consume the entry stream to exhaustion and produce the archive bytes.
///
/// The source is pulled one entry at a time, so peak memory is the archive
/// built so far plus a single in-flight tile; nothing is demanded up front.
pub async fn build_zip<S>(entries: S) -> Result<Bytes, DownloadError>
where
    S: Stream<Item = ZipEntry>,
{
    let mut zip = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options: FileOptions<()> = FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(0o644);

    let mut entries = std::pin::pin!(entries);
    while let Some(entry) = entries.next().await {
        zip.start_file(format!("{}.hgt", entry.id), options)
            .map_err(|e| DownloadError::Internal(format!("zip entry failed: {}", e)))?;
        zip.write_all(&entry.data)
            .map_err(|e| DownloadError::Internal(format!("zip write failed: {}", e)))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| DownloadError::Internal(format!("zip finish failed: {}", e)))?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Turn a user-facing selection description into a safe archive file stem.
///
/// Lowercases, maps `(` `)` to `[` `]`, drops anything outside
/// `[A-Za-z0-9 _-\[\]]`, collapses whitespace runs to `_`, and trims
/// leading/trailing underscores. Falls back to `srtm_tiles` when nothing
/// survives, and prefixes `srtm_` when the description was just a count.
pub fn sanitize_archive_name(description: &str) -> String {
    let mut cleaned = String::with_capacity(description.len());
    for c in description.to_lowercase().chars() {
        match c {
            '(' => cleaned.push('['),
            ')' => cleaned.push(']'),
            c if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '[' | ']') => {
                cleaned.push(c)
            }
            c if c.is_whitespace() => cleaned.push(' '),
            _ => {}
        }
    }

    let mut name = String::with_capacity(cleaned.len());
    let mut pending_gap = false;
    for c in cleaned.chars() {
        if c == ' ' {
            pending_gap = !name.is_empty();
        } else {
            if pending_gap {
                name.push('_');
                pending_gap = false;
            }
            name.push(c);
        }
    }

    let name = name.trim_matches('_');
    if name.is_empty() {
        return "srtm_tiles".to_string();
    }
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return format!("srtm_{}", name);
    }
    name.to_string()
}
