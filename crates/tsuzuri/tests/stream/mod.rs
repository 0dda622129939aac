use std::num::NonZeroU32;

use tsuzuri::{
    drm::{DrmResolver, ResolvedKey},
    manifest::{self, Stream},
    DownloadConfig, HttpClient, HttpConfig, StreamDownload, StreamType, TsuzuriError,
};
use url::Url;
use wiremock::MockServer;

use crate::common::{init_test_tracing, make_fragment, make_init, MockExt};

const MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="static" mediaPresentationDuration="PT6S">
  <Period>
    <AdaptationSet mimeType="video/mp4" codecs="avc1.64001f">
      <SegmentTemplate timescale="1000" media="$RepresentationID$/$Number$.m4s"
                       initialization="$RepresentationID$/init.mp4" startNumber="1">
        <SegmentTimeline>
          <S t="0" d="2000" r="2"/>
        </SegmentTimeline>
      </SegmentTemplate>
      <Representation id="v1" bandwidth="800000" width="1280" height="720"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

const PROTECTED_MPD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" xmlns:cenc="urn:mpeg:cenc:2013"
     type="static" mediaPresentationDuration="PT2S">
  <Period>
    <AdaptationSet mimeType="audio/mp4">
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"
                         cenc:default_KID="11111111-1111-1111-1111-111111111111"/>
      <SegmentTemplate timescale="1000" media="$RepresentationID$/$Number$.m4s"
                       initialization="$RepresentationID$/init.mp4" duration="2000"/>
      <Representation id="a1" bandwidth="128000"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

fn client() -> HttpClient {
    HttpClient::new(&HttpConfig::default()).unwrap()
}

/// Serves `MPD` and its media, returning the bytes a full download must produce.
async fn serve_dash(server: &MockServer) -> Vec<u8> {
    let init = make_init(1000);
    server.mock_bytes("/dash/manifest.mpd", MPD.as_bytes().to_vec()).await;
    server.mock_bytes("/dash/v1/init.mp4", init.clone()).await;

    let mut expected = init;
    for number in 1..=3 {
        let fragment = make_fragment(&[(1000, 100), (1000, 100)]);
        expected.extend_from_slice(&fragment);
        server
            .mock_bytes(&format!("/dash/v1/{number}.m4s"), fragment)
            .await;
    }
    expected
}

#[tokio::test]
async fn test_dash_download() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let expected = serve_dash(&server).await;

    let client = client();
    let url = Url::parse(&format!("{}/dash/manifest.mpd", server.uri()))?;
    let streams = manifest::load(&client, &url).await?;
    assert_eq!(streams.len(), 1);
    let stream = streams[0].as_ref();
    assert_eq!(stream.id(), "v1");

    let config = DownloadConfig {
        concurrency: NonZeroU32::new(2).unwrap(),
        ..Default::default()
    };
    let download = StreamDownload::new(client, config);
    let dir = tempfile::tempdir()?;
    let output = download.output_path(dir.path(), stream);
    assert_eq!(output, dir.path().join("v1.mp4"));

    let state = download.run(stream, &output).await?;
    assert_eq!(std::fs::read(&output)?, expected);

    assert_eq!(state.timescale, Some(1000));
    assert_eq!(state.sample_bytes, 600);
    assert_eq!(state.sample_duration, 6000);
    assert_eq!(state.bandwidth(), Some(800));
    Ok(())
}

#[tokio::test]
async fn test_dash_download_removes_edit_lists() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    let expected = serve_dash(&server).await;

    let client = client();
    let url = Url::parse(&format!("{}/dash/manifest.mpd", server.uri()))?;
    let streams = manifest::load(&client, &url).await?;

    let mut config = DownloadConfig::default();
    config.container.fix_edit_lists = true;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("fixed.mp4");
    StreamDownload::new(client, config)
        .run(streams[0].as_ref(), &output)
        .await?;

    let written = std::fs::read(&output)?;
    assert!(!written.windows(4).any(|w| w == b"edts"));
    assert!(expected.windows(4).any(|w| w == b"edts"));
    // Only the initialization segment shrinks
    assert_eq!(expected.len() - written.len(), 8 + 8 + 4 + 16);
    Ok(())
}

#[tokio::test]
async fn test_failed_segment_leaves_no_output() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server.mock_bytes("/dash/manifest.mpd", MPD.as_bytes().to_vec()).await;
    server.mock_bytes("/dash/v1/init.mp4", make_init(1000)).await;
    server
        .mock_bytes("/dash/v1/1.m4s", make_fragment(&[(1000, 100)]))
        .await;
    server.mock_status("/dash/v1/2.m4s", 404, "gone").await;
    server
        .mock_bytes("/dash/v1/3.m4s", make_fragment(&[(1000, 100)]))
        .await;

    let client = client();
    let url = Url::parse(&format!("{}/dash/manifest.mpd", server.uri()))?;
    let streams = manifest::load(&client, &url).await?;

    let dir = tempfile::tempdir()?;
    let output = dir.path().join("v1.mp4");
    let result = StreamDownload::new(client, DownloadConfig::default())
        .run(streams[0].as_ref(), &output)
        .await;

    match result {
        Err(TsuzuriError::HttpError { status, body }) => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(body, "gone");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_manual_key_must_match_manifest() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    server
        .mock_bytes("/drm/manifest.mpd", PROTECTED_MPD.as_bytes().to_vec())
        .await;
    server.mock_bytes("/drm/a1/init.mp4", make_init(1000)).await;

    let client = client();
    let url = Url::parse(&format!("{}/drm/manifest.mpd", server.uri()))?;
    let streams = manifest::load(&client, &url).await?;
    let stream = streams[0].as_ref();
    assert!(stream.protection()?.is_some());

    let key: ResolvedKey = "22222222222222222222222222222222:00112233445566778899aabbccddeeff".parse()?;
    let dir = tempfile::tempdir()?;
    let output = dir.path().join("a1.m4a");
    let result = StreamDownload::new(client, DownloadConfig::default())
        .with_drm(DrmResolver::Manual(key))
        .run(stream, &output)
        .await;

    assert!(matches!(result, Err(TsuzuriError::KeyIdMismatch { .. })));
    // Nothing is written without a usable key
    assert!(!output.exists());
    Ok(())
}

#[tokio::test]
async fn test_hls_master_playlist() -> anyhow::Result<()> {
    init_test_tracing();
    let server = MockServer::start().await;
    let master = r#"#EXTM3U
#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID="aac",NAME="Japanese",LANGUAGE="ja",URI="audio/ja.m3u8"
#EXT-X-STREAM-INF:BANDWIDTH=1200000,CODECS="avc1.64001f,mp4a.40.2",RESOLUTION=1280x720,AUDIO="aac"
video/720.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=3000000,CODECS="avc1.640028,mp4a.40.2",RESOLUTION=1920x1080,AUDIO="aac"
video/1080.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=3000000,CODECS="avc1.640028,mp4a.40.2",RESOLUTION=1920x1080,AUDIO="aac"
video/1080.m3u8
"#;
    let media = |name: &str| {
        format!(
            "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-MAP:URI=\"{name}-init.mp4\"\n#EXTINF:4.0,\n{name}-1.m4s\n#EXTINF:4.0,\n{name}-2.m4s\n#EXT-X-ENDLIST\n"
        )
    };
    server.mock_bytes("/hls/master.m3u8", master.as_bytes().to_vec()).await;
    server
        .mock_bytes("/hls/video/720.m3u8", media("720").into_bytes())
        .await;
    server
        .mock_bytes("/hls/video/1080.m3u8", media("1080").into_bytes())
        .await;
    server
        .mock_bytes("/hls/audio/ja.m3u8", media("ja").into_bytes())
        .await;

    let url = Url::parse(&format!("{}/hls/master.m3u8", server.uri()))?;
    let streams = manifest::load(&client(), &url).await?;

    // The duplicated variant is listed once
    let ids: Vec<_> = streams.iter().map(|s| s.id()).collect();
    assert_eq!(ids, vec!["v0-1200000", "v1-3000000", "aac-Japanese"]);

    let video = manifest::best_of(&streams, StreamType::Video).expect("video stream");
    assert_eq!(video.id(), "v1-3000000");
    assert_eq!(video.descriptor().resolution, Some((1920, 1080)));
    let init = video.init_segment()?.expect("init segment");
    assert_eq!(init.url.path(), "/hls/video/1080-init.mp4");

    let audio = manifest::best_of(&streams, StreamType::Audio).expect("audio stream");
    assert_eq!(audio.descriptor().language.as_deref(), Some("ja"));
    assert_eq!(audio.mime_type(), Some("audio/mp4"));
    Ok(())
}
