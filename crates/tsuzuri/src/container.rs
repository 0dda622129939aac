//! Per-stream output: initialization rewrite, sample decryption and appending.

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{
    config::ContainerConfig,
    download::SegmentSink,
    drm::ResolvedKey,
    mp4::{
        decrypt::{Mp4Decrypt, SampleDecryptor},
        fragment,
        init::{self, RewriteOptions, TrackDefaults},
    },
    protection::KeyId,
    SegmentFormat, TsuzuriError, TsuzuriResult,
};

/// Samples are only accumulated for the first ten minutes of media.
const ACCUMULATION_WINDOW_SECS: u64 = 600;

/// Mutable state of one stream, owned by its orchestrator.
#[derive(Debug, Clone, Default)]
pub struct StreamState {
    pub key_id: Option<KeyId>,
    /// Raw `pssh` boxes found in the initialization segment.
    pub pssh: Vec<Vec<u8>>,
    pub timescale: Option<u32>,
    pub sample_bytes: u64,
    /// Accumulated sample duration in timescale ticks.
    pub sample_duration: u64,
    track_defaults: Vec<TrackDefaults>,
}

impl StreamState {
    fn accumulate(&mut self, sample_bytes: u64, duration: u64) {
        let Some(timescale) = self.timescale else {
            return;
        };
        if self.sample_duration >= ACCUMULATION_WINDOW_SECS * timescale as u64 {
            return;
        }
        self.sample_bytes += sample_bytes;
        self.sample_duration += duration;
    }

    /// Bits per second over the accumulated samples.
    pub fn bandwidth(&self) -> Option<u64> {
        let timescale = self.timescale? as u128;
        if self.sample_duration == 0 {
            return None;
        }
        let bits = self.sample_bytes as u128 * 8 * timescale;
        Some((bits / self.sample_duration as u128) as u64)
    }
}

pub struct ContainerOrchestrator<W, D = Mp4Decrypt> {
    writer: W,
    decryptor: D,
    format: SegmentFormat,
    config: ContainerConfig,
    state: StreamState,
    /// The initialization segment as received, which the decryptor needs.
    init: Option<Vec<u8>>,
    finished: bool,
}

impl<W> ContainerOrchestrator<W, Mp4Decrypt>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, format: SegmentFormat, config: ContainerConfig) -> Self {
        Self {
            writer,
            decryptor: Mp4Decrypt,
            format,
            config,
            state: StreamState::default(),
            init: None,
            finished: false,
        }
    }
}

impl<W, D> ContainerOrchestrator<W, D>
where
    W: AsyncWrite + Unpin + Send,
    D: SampleDecryptor,
{
    pub fn with_decryptor<E: SampleDecryptor>(self, decryptor: E) -> ContainerOrchestrator<W, E> {
        ContainerOrchestrator {
            writer: self.writer,
            decryptor,
            format: self.format,
            config: self.config,
            state: self.state,
            init: self.init,
            finished: self.finished,
        }
    }

    /// Key id already known from the manifest.
    pub fn with_key_id(mut self, key_id: Option<KeyId>) -> Self {
        self.state.key_id = key_id;
        self
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Writes the initialization segment.
    ///
    /// With a key, DRM signaling is stripped so the output plays as clear content.
    pub async fn initialize(&mut self, data: &[u8], key: Option<&ResolvedKey>) -> TsuzuriResult<()> {
        if self.finished {
            return Err(TsuzuriError::AlreadyFinished);
        }
        if !self.format.is_mp4() {
            self.writer.write_all(data).await?;
            return Ok(());
        }

        let info = init::inspect(data)?;
        self.state.timescale = info.timescale;
        self.state.track_defaults = info.track_defaults;
        self.state.pssh = info.pssh.into_iter().map(|p| p.raw).collect();
        if self.state.key_id.is_none() {
            self.state.key_id = info.default_kid;
        }

        if let (Some(key), Some(expected)) = (key, self.state.key_id) {
            if key.key_id != expected {
                return Err(TsuzuriError::KeyIdMismatch {
                    expected,
                    actual: key.key_id,
                });
            }
        }
        if info.encrypted && key.is_none() {
            tracing::warn!("Stream is encrypted but no key is available, writing it as is");
        }

        let options = RewriteOptions {
            strip_protection: key.is_some() && info.encrypted,
            remove_edit_lists: self.config.fix_edit_lists,
        };
        let output = if options.strip_protection || options.remove_edit_lists {
            init::rewrite(data, options)?
        } else {
            data.to_vec()
        };
        self.writer.write_all(&output).await?;
        self.init = Some(data.to_vec());

        tracing::debug!(
            "Initialized {:?} stream, timescale {:?}, key id {:?}",
            self.format,
            self.state.timescale,
            self.state.key_id
        );
        Ok(())
    }

    /// Returns the bytes to append for one media segment.
    pub fn process_segment(&mut self, data: Bytes, key: Option<&ResolvedKey>) -> TsuzuriResult<Bytes> {
        if self.finished {
            return Err(TsuzuriError::AlreadyFinished);
        }
        if !self.format.is_mp4() {
            return Ok(data);
        }

        let summary = fragment::summarize(&data, &self.state.track_defaults)?;
        self.state.accumulate(summary.sample_bytes, summary.duration);

        let Some(key) = key else {
            return Ok(data);
        };
        let decrypted = self
            .decryptor
            .decrypt(self.init.as_deref(), &data, key)?;
        Ok(Bytes::from(decrypted))
    }

    /// Flushes the output. Must be called exactly once.
    pub async fn finish(&mut self) -> TsuzuriResult<()> {
        if self.finished {
            return Err(TsuzuriError::AlreadyFinished);
        }
        self.finished = true;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl<W, D> SegmentSink for ContainerOrchestrator<W, D>
where
    W: AsyncWrite + Unpin + Send,
    D: SampleDecryptor,
{
    async fn accept(&mut self, _index: usize, data: Bytes, key: Option<&ResolvedKey>) -> TsuzuriResult<()> {
        let output = self.process_segment(data, key)?;
        self.writer.write_all(&output).await?;
        Ok(())
    }

    async fn finish(&mut self) -> TsuzuriResult<()> {
        ContainerOrchestrator::finish(self).await
    }

    fn bandwidth_estimate(&self) -> Option<u64> {
        self.state.bandwidth()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        mp4::{
            fragment::tests::make_fragment,
            init::tests::{make_encrypted_init, make_pssh, KID},
            Mp4Box,
        },
        protection::WIDEVINE_SYSTEM_ID,
    };

    /// Reverses the segment and remembers what it was given.
    #[derive(Default)]
    struct ReversingDecryptor {
        calls: Mutex<Vec<(bool, KeyId)>>,
    }

    impl SampleDecryptor for &ReversingDecryptor {
        fn decrypt(&self, init: Option<&[u8]>, segment: &[u8], key: &ResolvedKey) -> TsuzuriResult<Vec<u8>> {
            self.calls.lock().unwrap().push((init.is_some(), key.key_id));
            Ok(segment.iter().rev().copied().collect())
        }
    }

    fn key() -> ResolvedKey {
        format!("{}:0f0e0d0c0b0a09080706050403020100", hex::encode(KID))
            .parse()
            .unwrap()
    }

    fn encrypted_init() -> Vec<u8> {
        make_encrypted_init(1000, &make_pssh(WIDEVINE_SYSTEM_ID, &[1, 2, 3]))
    }

    fn kinds(data: &[u8]) -> Vec<[u8; 4]> {
        let boxes = Mp4Box::parse_all(data).unwrap();
        let mut kinds = Vec::new();
        for mut b in boxes {
            kinds.push(b.kind);
            b.visit_mut(&mut |b| kinds.push(b.kind));
        }
        kinds
    }

    #[tokio::test]
    async fn test_decrypting_stream() {
        let decryptor = ReversingDecryptor::default();
        let mut container =
            ContainerOrchestrator::new(Vec::new(), SegmentFormat::Mp4, ContainerConfig::default())
                .with_decryptor(&decryptor);

        let key = key();
        container.initialize(&encrypted_init(), Some(&key)).await.unwrap();
        assert_eq!(container.state().timescale, Some(1000));
        assert_eq!(container.state().key_id, Some(KeyId(KID)));
        assert_eq!(container.state().pssh.len(), 1);

        let fragment = make_fragment(1, &[(1000, 250), (1000, 250)]);
        container
            .accept(0, Bytes::from(fragment.clone()), Some(&key))
            .await
            .unwrap();
        assert_eq!(container.state().sample_bytes, 500);
        assert_eq!(container.state().sample_duration, 2000);
        assert_eq!(container.bandwidth_estimate(), Some(2000));

        SegmentSink::finish(&mut container).await.unwrap();
        let output = container.into_inner();
        let reversed: Vec<u8> = fragment.iter().rev().copied().collect();
        assert!(output.ends_with(&reversed));

        let kinds = kinds(&output[..output.len() - reversed.len()]);
        assert!(!kinds.contains(b"pssh"));
        assert!(!kinds.contains(b"sinf"));
        assert!(!kinds.contains(b"encv"));
        assert!(kinds.contains(b"avc1"));
        // Edit lists stay unless asked for
        assert!(kinds.contains(b"edts"));

        assert_eq!(*decryptor.calls.lock().unwrap(), vec![(true, KeyId(KID))]);
    }

    #[tokio::test]
    async fn test_clear_passthrough_and_edit_list_removal() {
        let config = ContainerConfig {
            fix_edit_lists: true,
            ..Default::default()
        };
        let mut container = ContainerOrchestrator::new(Vec::new(), SegmentFormat::Mp4, config);

        let init = encrypted_init();
        container.initialize(&init, None).await.unwrap();
        let fragment = make_fragment(1, &[(500, 10)]);
        container.accept(0, Bytes::from(fragment.clone()), None).await.unwrap();
        container.finish().await.unwrap();

        let output = container.into_inner();
        let kinds = kinds(&output);
        assert!(!kinds.contains(b"edts"));
        // Nothing to decrypt with, so the protection stays
        assert!(kinds.contains(b"encv"));
        assert!(output.ends_with(&fragment));
    }

    #[tokio::test]
    async fn test_key_id_mismatch() {
        let other = KeyId([0x22; 16]);
        let mut container =
            ContainerOrchestrator::new(Vec::new(), SegmentFormat::Mp4, ContainerConfig::default())
                .with_key_id(Some(other));

        let err = container
            .initialize(&encrypted_init(), Some(&key()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TsuzuriError::KeyIdMismatch { expected, actual } if expected == other && actual == KeyId(KID)
        ));
    }

    #[tokio::test]
    async fn test_accumulation_stops_after_window() {
        let mut container =
            ContainerOrchestrator::new(Vec::new(), SegmentFormat::Mp4, ContainerConfig::default());
        container.initialize(&encrypted_init(), None).await.unwrap();

        // 400 seconds per segment at timescale 1000
        let fragment = Bytes::from(make_fragment(1, &[(400_000, 100)]));
        for index in 0..3 {
            container.accept(index, fragment.clone(), None).await.unwrap();
        }
        assert_eq!(container.state().sample_duration, 800_000);
        assert_eq!(container.state().sample_bytes, 200);
    }

    #[tokio::test]
    async fn test_non_mp4_passthrough() {
        let mut container =
            ContainerOrchestrator::new(Vec::new(), SegmentFormat::Mpeg2TS, ContainerConfig::default());
        container.accept(0, Bytes::from_static(b"\x47abc"), None).await.unwrap();
        container.accept(1, Bytes::from_static(b"\x47def"), None).await.unwrap();
        container.finish().await.unwrap();

        assert_eq!(container.state().bandwidth(), None);
        assert_eq!(container.into_inner(), b"\x47abc\x47def");
    }

    #[tokio::test]
    async fn test_finish_twice() {
        let mut container =
            ContainerOrchestrator::new(Vec::new(), SegmentFormat::WebVtt, ContainerConfig::default());
        container.finish().await.unwrap();
        assert!(matches!(
            container.finish().await,
            Err(TsuzuriError::AlreadyFinished)
        ));
        assert!(matches!(
            container.process_segment(Bytes::new(), None),
            Err(TsuzuriError::AlreadyFinished)
        ));
    }
}
