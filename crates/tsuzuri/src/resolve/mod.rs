//! Turns the addressing mode of a stream into concrete segment requests.

pub mod bitrate;
pub mod index;
pub mod template;

use bytes::Bytes;

use crate::{
    mp4::sidx::SegmentIndex, Addressing, HttpClient, SegmentRequest, TsuzuriResult,
};

#[derive(Debug, Clone)]
pub struct ResolvedSegments {
    pub init: Option<SegmentRequest>,
    pub segments: Vec<SegmentRequest>,
    /// The prefetched `sidx` bytes of index-box streams.
    pub index: Option<Bytes>,
}

pub struct SegmentResolver {
    client: HttpClient,
}

impl SegmentResolver {
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    pub async fn resolve(&self, addressing: &Addressing) -> TsuzuriResult<ResolvedSegments> {
        let init = addressing.init_segment()?;

        match addressing {
            Addressing::List { segments, .. } => Ok(ResolvedSegments {
                init,
                segments: segments.clone(),
                index: None,
            }),
            Addressing::Template(template) => Ok(ResolvedSegments {
                init,
                segments: template.expand()?,
                index: None,
            }),
            Addressing::IndexBox {
                url, index_range, ..
            } => {
                tracing::debug!("Fetching segment index {} of {url}", index_range.to_http_range());
                let bytes = self.client.fetch(url, Some(*index_range)).await?;

                let (index, end) = SegmentIndex::find(&bytes)?;
                let index_end = index_range.offset + end as u64 - 1;
                let segments = index::index_ranges(url, index_end, &index)?;

                Ok(ResolvedSegments {
                    init,
                    segments,
                    index: Some(bytes),
                })
            }
        }
    }

    /// Bitrate estimated from the middle segment, for streams that do not declare one.
    pub async fn probe_bandwidth(&self, addressing: &Addressing) -> TsuzuriResult<u64> {
        let resolved = self.resolve(addressing).await?;
        bitrate::probe(&self.client, &resolved.segments).await
    }
}
