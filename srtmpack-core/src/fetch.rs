//! Tile fetcher
//!
//! HTTPS GET of individual tiles from the elevation bucket, with retry,
//! per-request timeout, cancellation, and chunk-level progress events.
//! A 404 means an ocean/void tile and is reported as `None`, not an error.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::error::DownloadError;
use crate::tile::TileId;

/// Public S3 bucket holding gzip-compressed SRTM1 tiles.
pub const DEFAULT_BASE_URL: &str = "https://s3.amazonaws.com/elevation-tiles-prod/skadi";

#[derive(Debug, Clone)]
pub struct FetcherOptions {
    pub base_url: String,
    /// Total attempt budget per tile, including the first try.
    pub max_retries: u32,
    /// Backoff before the first retry; doubles on each subsequent one.
    pub retry_delay: Duration,
    /// Per-request timeout. Timeouts are retryable.
    pub timeout: Duration,
}

impl Default for FetcherOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Emitted once per received body chunk.
#[derive(Debug, Clone)]
pub struct FetchProgress {
    pub tile_id: TileId,
    pub loaded: u64,
    /// From `Content-Length` when the origin sends it.
    pub total: Option<u64>,
}

/// Outcome of one tile in a [`TileFetcher::fetch_many`] batch.
#[derive(Debug)]
pub struct TileFetchResult {
    pub tile_id: TileId,
    pub success: bool,
    pub data: Option<Bytes>,
    /// True for ocean tiles the origin answered 404 for.
    pub skipped: bool,
}

enum AttemptError {
    Retryable(DownloadError),
    Fatal(DownloadError),
}

#[derive(Clone)]
pub struct TileFetcher {
    client: reqwest::Client,
    options: FetcherOptions,
}

impl TileFetcher {
    pub fn new(options: FetcherOptions) -> Result<Self, DownloadError> {
        let client = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &FetcherOptions {
        &self.options
    }

    /// Fetch one tile's raw (still compressed) payload.
    ///
    /// Returns `Ok(None)` on 404. Network errors, 5xx responses and timeouts
    /// are retried with exponential backoff up to the attempt budget; other
    /// 4xx statuses fail immediately. Cancelling the token aborts the
    /// in-flight request and any pending backoff.
    pub async fn fetch<P>(
        &self,
        id: &TileId,
        cancel: &CancellationToken,
        mut on_progress: P,
    ) -> Result<Option<Bytes>, DownloadError>
    where
        P: FnMut(FetchProgress),
    {
        let url = id.url(&self.options.base_url);
        let attempts = self.options.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(DownloadError::Aborted);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(DownloadError::Aborted),
                outcome = self.attempt(id, &url, &mut on_progress) => outcome,
            };

            match outcome {
                Ok(payload) => return Ok(payload),
                Err(AttemptError::Fatal(e)) => return Err(e),
                Err(AttemptError::Retryable(e)) => {
                    if attempt < attempts {
                        let delay = self.options.retry_delay * 2u32.pow(attempt - 1);
                        log::warn!(
                            "Fetch attempt {} failed for tile {}: {}. Retrying in {:?}...",
                            attempt,
                            id,
                            e,
                            delay
                        );
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(DownloadError::Aborted),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| DownloadError::Network("retry budget exhausted".to_string())))
    }

    async fn attempt<P>(
        &self,
        id: &TileId,
        url: &str,
        on_progress: &mut P,
    ) -> Result<Option<Bytes>, AttemptError>
    where
        P: FnMut(FetchProgress),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AttemptError::Retryable(e.into()))?;

        let status = response.status();
        log::debug!("GET {} -> {}", url, status);

        if status.as_u16() == 404 {
            return Ok(None);
        }
        if status.is_server_error() {
            return Err(AttemptError::Retryable(DownloadError::Network(format!(
                "HTTP {} from origin",
                status.as_u16()
            ))));
        }
        if !status.is_success() {
            return Err(AttemptError::Fatal(DownloadError::Http {
                status: status.as_u16(),
                tile_id: id.to_string(),
            }));
        }

        let total = response.content_length();
        let mut body = BytesMut::with_capacity(total.unwrap_or(0) as usize);
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AttemptError::Retryable(e.into()))?;
            body.extend_from_slice(&chunk);
            on_progress(FetchProgress {
                tile_id: *id,
                loaded: body.len() as u64,
                total,
            });
        }

        Ok(Some(body.freeze()))
    }

    /// One-shot batch fetch with its own bounded pool.
    ///
    /// This is a standalone helper for callers outside the managed download
    /// pipeline; the manager schedules through its own pool and calls
    /// [`fetch`](Self::fetch) directly so its concurrency cap holds.
    pub async fn fetch_many(
        &self,
        ids: &[TileId],
        concurrent: usize,
    ) -> Vec<TileFetchResult> {
        let semaphore = Arc::new(Semaphore::new(concurrent.max(1)));

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let id = *id;
                let fetcher = self.clone();
                let semaphore = semaphore.clone();

                tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.unwrap();
                    let cancel = CancellationToken::new();
                    match fetcher.fetch(&id, &cancel, |_| {}).await {
                        Ok(Some(data)) => TileFetchResult {
                            tile_id: id,
                            success: true,
                            data: Some(data),
                            skipped: false,
                        },
                        Ok(None) => TileFetchResult {
                            tile_id: id,
                            success: true,
                            data: None,
                            skipped: true,
                        },
                        Err(e) => {
                            log::debug!("Batch fetch failed for tile {}: {}", id, e);
                            TileFetchResult {
                                tile_id: id,
                                success: false,
                                data: None,
                                skipped: false,
                            }
                        }
                    }
                })
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (task, id) in tasks.into_iter().zip(ids) {
            match task.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    log::error!("Batch fetch task for tile {} panicked: {}", id, e);
                    results.push(TileFetchResult {
                        tile_id: *id,
                        success: false,
                        data: None,
                        skipped: false,
                    });
                }
            }
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_point_at_the_public_bucket() {
        let options = FetcherOptions::default();
        assert_eq!(options.base_url, DEFAULT_BASE_URL);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.retry_delay, Duration::from_millis(100));
        assert_eq!(options.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_before_io() {
        let fetcher = TileFetcher::new(FetcherOptions {
            base_url: "http://127.0.0.1:9".to_string(),
            ..FetcherOptions::default()
        })
        .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let id = TileId::parse("N36W112").unwrap();
        assert!(matches!(
            fetcher.fetch(&id, &cancel, |_| {}).await,
            Err(DownloadError::Aborted)
        ));
    }
}
