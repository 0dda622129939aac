use std::sync::Arc;

use bytes::Bytes;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;

use super::{DownloadJob, SegmentFetcher, SegmentSink};
use crate::{
    progress::ProgressTracker, util::ordered::ReorderBuffer, SegmentRequest, TsuzuriError,
    TsuzuriResult,
};

struct Completed {
    index: usize,
    worker_id: usize,
    result: TsuzuriResult<Bytes>,
}

/// Fetches with a fixed pool of workers and feeds one ordered consumer.
///
/// ```text
///              ┌──────────┐
///   jobs ──┬──▶│ worker 0 │──┐
///  (closed)├──▶│ worker 1 │──┼──▶ results ──▶ ReorderBuffer ──▶ sink
///          └──▶│ worker n │──┘
///              └──────────┘
/// ```
///
/// The first fetch or sink error cancels every in-flight request and is returned as is.
pub struct DownloadEngine<F> {
    fetcher: Arc<F>,
    token: CancellationToken,
}

impl<F> DownloadEngine<F>
where
    F: SegmentFetcher,
{
    pub fn new(fetcher: Arc<F>) -> Self {
        Self {
            fetcher,
            token: CancellationToken::new(),
        }
    }

    /// Uses `token` to stop the download from the outside.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Runs `job` to completion and returns its finished sink.
    pub async fn run<S>(
        &self,
        job: DownloadJob<S>,
        mut progress: Option<&mut ProgressTracker>,
    ) -> TsuzuriResult<S>
    where
        S: SegmentSink,
    {
        let DownloadJob {
            segments,
            key,
            mut sink,
            concurrency,
        } = job;
        let total = segments.len();
        let workers = (concurrency.get() as usize).clamp(1, total.max(1));
        tracing::info!("Start downloading {total} segments with {workers} worker(s).");

        let (job_tx, job_rx) = mpsc::channel::<(usize, SegmentRequest)>(total.max(1));
        for job in segments.into_iter().enumerate() {
            job_tx.send(job).await.map_err(|_| TsuzuriError::Cancelled)?;
        }
        drop(job_tx);
        let job_rx = Arc::new(Mutex::new(job_rx));

        let token = self.token.child_token();
        let _guard = token.clone().drop_guard();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel();

        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            let jobs = job_rx.clone();
            let results = result_tx.clone();
            let fetcher = self.fetcher.clone();
            let token = token.clone();

            tasks.spawn(async move {
                loop {
                    let next = jobs.lock().await.recv().await;
                    let Some((index, request)) = next else {
                        break;
                    };

                    let result = tokio::select! {
                        _ = token.cancelled() => break,
                        result = fetcher.fetch_segment(&request) => result,
                    };
                    tracing::debug!("Worker #{worker_id} fetched segment {index}");
                    let completed = Completed {
                        index,
                        worker_id,
                        result,
                    };
                    if results.send(completed).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut buffer = ReorderBuffer::new();
        while buffer.next_index() < total {
            let completed = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    tracing::warn!("Download cancelled at segment {}", buffer.next_index());
                    return Err(TsuzuriError::Cancelled);
                }
                completed = result_rx.recv() => completed,
            };

            let Some(completed) = completed else {
                if self.token.is_cancelled() {
                    return Err(TsuzuriError::Cancelled);
                }
                // Every worker is gone while segments are still missing
                while let Some(joined) = tasks.join_next().await {
                    joined?;
                }
                return Err(TsuzuriError::MissingSegment(buffer.next_index()));
            };

            let data = match completed.result {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!("Segment {} failed: {e}", completed.index);
                    token.cancel();
                    return Err(e);
                }
            };
            buffer.insert(completed.index, (completed.worker_id, data));

            while let Some((index, (worker_id, data))) = buffer.pop_ready() {
                if let Err(e) = sink.accept(index, data, key.as_ref()).await {
                    tracing::error!("Failed to write segment {index}: {e}");
                    token.cancel();
                    return Err(e);
                }
                if let Some(progress) = progress.as_deref_mut() {
                    progress.update(worker_id, sink.bandwidth_estimate());
                }
            }
        }

        sink.finish().await?;
        tracing::info!("All {total} segments downloaded.");
        Ok(sink)
    }
}
