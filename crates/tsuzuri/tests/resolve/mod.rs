use tsuzuri::{
    resolve::SegmentResolver, Addressing, ByteRange, HttpClient, HttpConfig, SegmentRequest,
    TsuzuriError,
};
use url::Url;
use wiremock::MockServer;

use crate::common::{make_sidx, MockExt};

fn resolver() -> SegmentResolver {
    SegmentResolver::new(HttpClient::new(&HttpConfig::default()).unwrap())
}

#[tokio::test]
async fn test_index_box_ranges_follow_sidx() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let sidx = make_sidx(1000, 0, &[(100, 4000), (250, 4000), (40, 1500)]);
    let index_start = 1000 - sidx.len() as u64;
    let index_range = ByteRange::from_bounds(index_start, 999)?;
    server
        .mock_range("/video.mp4", &index_range.to_http_range(), sidx.clone())
        .await;

    let url = Url::parse(&format!("{}/video.mp4", server.uri()))?;
    let addressing = Addressing::IndexBox {
        url: url.clone(),
        index_range,
        init_range: None,
    };
    let resolved = resolver().resolve(&addressing).await?;

    let ranges: Vec<_> = resolved
        .segments
        .iter()
        .map(|s| s.byte_range.map(|r| r.to_http_range()))
        .collect();
    assert_eq!(
        ranges,
        vec![
            Some("bytes=1000-1099".to_string()),
            Some("bytes=1100-1349".to_string()),
            Some("bytes=1350-1389".to_string()),
        ]
    );
    assert!(resolved.segments.iter().all(|s| s.url == url));
    assert_eq!(resolved.index.as_deref(), Some(sidx.as_slice()));

    // Everything before the index is the initialization segment
    let init = resolved.init.expect("init segment");
    assert_eq!(init.byte_range, Some(ByteRange::new(0, Some(index_start))));
    Ok(())
}

#[tokio::test]
async fn test_index_fetch_error_keeps_body() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server.mock_status("/video.mp4", 403, "signature expired").await;

    let addressing = Addressing::IndexBox {
        url: Url::parse(&format!("{}/video.mp4", server.uri()))?,
        index_range: ByteRange::from_bounds(800, 999)?,
        init_range: None,
    };

    match resolver().resolve(&addressing).await {
        Err(TsuzuriError::HttpError { status, body }) => {
            assert_eq!(status.as_u16(), 403);
            assert_eq!(body, "signature expired");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn test_probe_bandwidth_of_middle_segment() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    // Only GET is mounted, so the HEAD probe falls back to GET
    server.mock_bytes("/seg-1.m4s", vec![0; 100_000]).await;

    let segments = (0..3)
        .map(|i| {
            Url::parse(&format!("{}/seg-{i}.m4s", server.uri()))
                .map(|url| SegmentRequest::new(url).with_duration(4.0))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let addressing = Addressing::List {
        init: None,
        segments,
    };

    assert_eq!(resolver().probe_bandwidth(&addressing).await?, 200_000);
    Ok(())
}

#[tokio::test]
async fn test_probe_without_duration() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let url = Url::parse(&format!("{}/seg-0.m4s", server.uri()))?;
    let addressing = Addressing::List {
        init: None,
        segments: vec![SegmentRequest::new(url)],
    };

    assert!(matches!(
        resolver().probe_bandwidth(&addressing).await,
        Err(TsuzuriError::UnknownBitrate(_))
    ));
    // Nothing is fetched when the bitrate can not be computed
    assert!(server.received_requests().await.unwrap_or_default().is_empty());

    let empty = Addressing::List {
        init: None,
        segments: vec![],
    };
    assert!(matches!(
        resolver().probe_bandwidth(&empty).await,
        Err(TsuzuriError::NoSegments)
    ));
    Ok(())
}
