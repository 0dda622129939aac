use std::{num::NonZeroU32, sync::Arc};

use bytes::Bytes;
use tsuzuri::{
    download::{DownloadEngine, DownloadJob, SegmentSink},
    drm::ResolvedKey,
    ByteRange, HttpClient, HttpConfig, SegmentRequest, TsuzuriError, TsuzuriResult,
};
use url::Url;
use wiremock::MockServer;

use crate::{common::MockExt, AssertWrapper};

#[derive(Default)]
struct CollectSink {
    data: Vec<u8>,
    order: Vec<usize>,
    finished: bool,
}

impl SegmentSink for CollectSink {
    async fn accept(&mut self, index: usize, data: Bytes, _key: Option<&ResolvedKey>) -> TsuzuriResult<()> {
        self.order.push(index);
        self.data.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(&mut self) -> TsuzuriResult<()> {
        self.finished = true;
        Ok(())
    }
}

fn client() -> Arc<HttpClient> {
    Arc::new(HttpClient::new(&HttpConfig::default()).unwrap())
}

fn segment(server: &MockServer, index: usize) -> SegmentRequest {
    SegmentRequest::new(Url::parse(&format!("{}/seg-{index}.m4s", server.uri())).unwrap())
}

#[tokio::test]
async fn test_single_worker_fetches_in_order() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    for index in 0..5 {
        server
            .mock_bytes(&format!("/seg-{index}.m4s"), format!("[{index}]").into_bytes())
            .await;
    }

    let segments = (0..5).map(|i| segment(&server, i)).collect();
    let job = DownloadJob::new(segments, CollectSink::default()).with_concurrency(NonZeroU32::MIN);
    let sink = DownloadEngine::new(client()).run(job, None).await.assert_success();

    assert_eq!(sink.order, vec![0, 1, 2, 3, 4]);
    assert_eq!(sink.data, b"[0][1][2][3][4]");
    assert!(sink.finished);

    let requested: Vec<_> = server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|r| r.url.path().to_string())
        .collect();
    assert_eq!(
        requested,
        (0..5).map(|i| format!("/seg-{i}.m4s")).collect::<Vec<_>>()
    );
    Ok(())
}

#[tokio::test]
async fn test_many_workers_keep_output_order() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let mut expected = Vec::new();
    for index in 0..20 {
        let body = vec![index as u8; 64 + index];
        expected.extend_from_slice(&body);
        server.mock_bytes(&format!("/seg-{index}.m4s"), body).await;
    }

    let segments = (0..20).map(|i| segment(&server, i)).collect();
    let job = DownloadJob::new(segments, CollectSink::default())
        .with_concurrency(NonZeroU32::new(8).unwrap());
    let sink = DownloadEngine::new(client()).run(job, None).await?;

    assert_eq!(sink.order, (0..20).collect::<Vec<_>>());
    assert_eq!(sink.data, expected);
    Ok(())
}

#[tokio::test]
async fn test_byte_range_requests() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server.mock_range("/media.mp4", "bytes=0-3", b"abcd".to_vec()).await;
    server.mock_range("/media.mp4", "bytes=4-9", b"efghij".to_vec()).await;

    let url = Url::parse(&format!("{}/media.mp4", server.uri()))?;
    let segments = vec![
        SegmentRequest::new(url.clone()).with_range(Some(ByteRange::new(0, Some(4)))),
        SegmentRequest::new(url).with_range(Some(ByteRange::new(4, Some(6)))),
    ];
    let job = DownloadJob::new(segments, CollectSink::default())
        .with_concurrency(NonZeroU32::new(2).unwrap());
    let sink = DownloadEngine::new(client()).run(job, None).await?;

    assert_eq!(sink.data, b"abcdefghij");
    Ok(())
}

#[tokio::test]
async fn test_one_failure_fails_the_job() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    for index in 0..10 {
        if index == 6 {
            server.mock_status("/seg-6.m4s", 403, "token expired").await;
        } else {
            server.mock_bytes(&format!("/seg-{index}.m4s"), vec![0; 16]).await;
        }
    }

    let segments = (0..10).map(|i| segment(&server, i)).collect();
    let job = DownloadJob::new(segments, CollectSink::default())
        .with_concurrency(NonZeroU32::new(4).unwrap());
    let result = DownloadEngine::new(client()).run(job, None).await;

    match result {
        Err(TsuzuriError::HttpError { status, body }) => {
            assert_eq!(status.as_u16(), 403);
            assert_eq!(body, "token expired");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("job must not succeed"),
    }
    Ok(())
}
