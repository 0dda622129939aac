//! Concurrent segment fetching with ordered delivery.

mod engine;

pub use engine::DownloadEngine;

use std::{future::Future, num::NonZeroU32};

use bytes::Bytes;

use crate::{drm::ResolvedKey, HttpClient, SegmentRequest, TsuzuriResult};

/// Fetches the bytes of one segment.
pub trait SegmentFetcher: Send + Sync + 'static {
    fn fetch_segment(
        &self,
        request: &SegmentRequest,
    ) -> impl Future<Output = TsuzuriResult<Bytes>> + Send;
}

impl SegmentFetcher for HttpClient {
    async fn fetch_segment(&self, request: &SegmentRequest) -> TsuzuriResult<Bytes> {
        self.fetch(&request.url, request.byte_range).await
    }
}

/// Receives segments strictly in index order.
pub trait SegmentSink: Send {
    fn accept(
        &mut self,
        index: usize,
        data: Bytes,
        key: Option<&ResolvedKey>,
    ) -> impl Future<Output = TsuzuriResult<()>> + Send;

    /// Called once after the last segment has been accepted.
    fn finish(&mut self) -> impl Future<Output = TsuzuriResult<()>> + Send;

    /// Live bandwidth estimate in bits per second.
    fn bandwidth_estimate(&self) -> Option<u64> {
        None
    }
}

pub struct DownloadJob<S> {
    pub segments: Vec<SegmentRequest>,
    pub key: Option<ResolvedKey>,
    pub sink: S,
    pub concurrency: NonZeroU32,
}

impl<S> DownloadJob<S>
where
    S: SegmentSink,
{
    pub fn new(segments: Vec<SegmentRequest>, sink: S) -> Self {
        Self {
            segments,
            key: None,
            sink,
            concurrency: NonZeroU32::MIN,
        }
    }

    pub fn with_key(mut self, key: Option<ResolvedKey>) -> Self {
        self.key = key;
        self
    }

    pub fn with_concurrency(mut self, concurrency: NonZeroU32) -> Self {
        self.concurrency = concurrency;
        self
    }
}
