//! Upstream-to-OpenAI stream translation
//!
//! The upstream body is a byte stream of SSE `data:` lines carrying
//! `content`, `error`, and `cost` fields. The translator re-frames those
//! as `chat.completion.chunk` events: one opening role chunk, one content
//! chunk per upstream content event, and a closing stop chunk + `[DONE]`.
//! The `cost` event marks the generation complete; before closing the
//! stream the selected account's balance is re-probed and persisted so the
//! next selection sees fresh numbers. A dropped consumer cancels the
//! generator mid-drain, which is fine: the refresh only matters for
//! completed generations.

use std::sync::Arc;

use account_pool::AccountPool;
use async_stream::stream;
use freeplay_client::{EventStream, parse_data_line};
use futures_util::{Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::openai::{
    ChatCompletionChunk, ChatCompletionResponse, ErrorEnvelope, SSE_DONE, chat_id, sse_frame,
    unix_now,
};

/// Outcome of draining a whole upstream body for a blocking request.
pub enum DrainOutcome {
    Completed(ChatCompletionResponse),
    Errored(ErrorEnvelope),
}

/// Accumulates raw bytes and yields complete lines, carrying a partial
/// trailing line across chunk boundaries.
///
/// Decoding happens per complete line, never per chunk, so a multibyte
/// character split across two network chunks is reassembled before it
/// reaches UTF-8 decoding.
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let rest = self.pending.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.pending, rest);
            line.pop();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// Re-probe and persist the account that served a completed generation.
async fn settle_account(pool: &AccountPool, session: &str, email: &str, cost: f64) {
    info!(email, cost, "generation complete, refreshing balance");
    pool.refresh_balance(session).await;
    if let Err(e) = pool.persist().await {
        warn!(error = %e, "failed to persist after balance refresh");
    }
}

/// Translate an upstream event stream into OpenAI SSE frames.
///
/// The returned stream is lazy: nothing is read from the upstream until
/// the consumer polls.
pub fn translate_stream(
    upstream: EventStream,
    pool: Arc<AccountPool>,
    session: String,
    email: String,
    model: String,
) -> impl Stream<Item = String> {
    stream! {
        let id = chat_id();
        let created = unix_now();
        let mut upstream = upstream;
        let mut buffer = LineBuffer::new();

        yield sse_frame(&ChatCompletionChunk::role_start(&id, created, &model));

        while let Some(chunk) = upstream.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(error = %e, "upstream stream broke mid-generation");
                    yield sse_frame(&ErrorEnvelope::new(
                        format!("stream interrupted: {e}"),
                        "internal_error",
                    ));
                    return;
                }
            };

            for line in buffer.push(&bytes) {
                let Some(event) = parse_data_line(&line) else {
                    continue;
                };

                if let Some(error) = event.error {
                    warn!(%error, "upstream reported an in-stream error");
                    yield sse_frame(&ErrorEnvelope::new(error.to_string(), "api_error"));
                    return;
                }

                if let Some(content) = event.content {
                    debug!(chars = content.len(), "forwarding content delta");
                    yield sse_frame(&ChatCompletionChunk::content(&id, created, &model, content));
                }

                if let Some(cost) = event.cost {
                    settle_account(&pool, &session, &email, cost).await;
                    yield sse_frame(&ChatCompletionChunk::stop(&id, created, &model));
                    yield SSE_DONE.to_string();
                    return;
                }
            }
        }

        // Upstream ended without a cost event; close the client stream
        // cleanly anyway. The balance stays cached until the next probe.
        debug!("upstream ended without a cost event");
        yield sse_frame(&ChatCompletionChunk::stop(&id, created, &model));
        yield SSE_DONE.to_string();
    }
}

/// Drain the whole upstream body into one aggregate response.
pub async fn drain_completion(
    mut upstream: EventStream,
    pool: Arc<AccountPool>,
    session: String,
    email: String,
    model: String,
) -> DrainOutcome {
    let mut buffer = LineBuffer::new();
    let mut content = String::new();
    let mut cost: Option<f64> = None;

    while let Some(chunk) = upstream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "upstream stream broke mid-generation");
                return DrainOutcome::Errored(ErrorEnvelope::new(
                    format!("stream interrupted: {e}"),
                    "internal_error",
                ));
            }
        };

        for line in buffer.push(&bytes) {
            let Some(event) = parse_data_line(&line) else {
                continue;
            };
            if let Some(error) = event.error {
                warn!(%error, "upstream reported an in-stream error");
                return DrainOutcome::Errored(ErrorEnvelope::new(error.to_string(), "api_error"));
            }
            if let Some(delta) = event.content {
                content.push_str(&delta);
            }
            if event.cost.is_some() {
                cost = event.cost;
            }
        }
    }

    if let Some(cost) = cost {
        settle_account(&pool, &session, &email, cost).await;
    }

    DrainOutcome::Completed(ChatCompletionResponse::new(&model, content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use account_pool::Prober;
    use bytes::Bytes;
    use freeplay_client::{ProbeError, TransportError};
    use serde_json::Value;

    /// Prober returning a fixed balance, counting how often it is hit.
    struct CountingProber {
        balance: f64,
        hits: AtomicUsize,
        sessions: StdMutex<Vec<String>>,
    }

    impl CountingProber {
        fn new(balance: f64) -> Arc<Self> {
            Arc::new(Self {
                balance,
                hits: AtomicUsize::new(0),
                sessions: StdMutex::new(Vec::new()),
            })
        }
    }

    impl Prober for CountingProber {
        fn probe<'a>(
            &'a self,
            session: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<f64, ProbeError>> + Send + 'a>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            self.sessions.lock().unwrap().push(session.to_string());
            let balance = self.balance;
            Box::pin(async move { Ok(balance) })
        }
    }

    async fn pool_with_one(
        dir: &tempfile::TempDir,
        prober: Arc<CountingProber>,
    ) -> Arc<AccountPool> {
        let path = dir.path().join("accounts.txt");
        tokio::fs::write(&path, "a@x.com----pw----sess-a----proj-a----5.0000\n")
            .await
            .unwrap();
        let pool = Arc::new(AccountPool::new(path, 5.0, prober));
        pool.reload().await.unwrap();
        pool
    }

    fn upstream_of(chunks: Vec<&'static str>) -> EventStream {
        let items: Vec<Result<Bytes, TransportError>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        Box::pin(futures_util::stream::iter(items))
    }

    fn upstream_of_bytes(chunks: Vec<&'static [u8]>) -> EventStream {
        let items: Vec<Result<Bytes, TransportError>> =
            chunks.into_iter().map(|c| Ok(Bytes::from_static(c))).collect();
        Box::pin(futures_util::stream::iter(items))
    }

    fn broken_upstream(chunks: Vec<&'static str>) -> EventStream {
        let mut items: Vec<Result<Bytes, TransportError>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        items.push(Err(TransportError("connection reset".into())));
        Box::pin(futures_util::stream::iter(items))
    }

    fn frame_json(frame: &str) -> Value {
        let data = frame.trim().strip_prefix("data: ").unwrap();
        serde_json::from_str(data).unwrap()
    }

    async fn collect(
        stream: impl Stream<Item = String>,
    ) -> Vec<String> {
        futures_util::pin_mut!(stream);
        let mut frames = Vec::new();
        while let Some(frame) = stream.next().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn full_generation_translates_to_chunk_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(4.2);
        let pool = pool_with_one(&dir, prober.clone()).await;

        let upstream = upstream_of(vec![
            "data: {\"content\":\"Hel\"}\n",
            "data: {\"content\":\"lo\"}\ndata: {\"cost\":0.003}\n",
        ]);
        let frames = collect(translate_stream(
            upstream,
            pool.clone(),
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        ))
        .await;

        assert_eq!(frames.len(), 5);
        let start = frame_json(&frames[0]);
        assert_eq!(start["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(frame_json(&frames[1])["choices"][0]["delta"]["content"], "Hel");
        assert_eq!(frame_json(&frames[2])["choices"][0]["delta"]["content"], "lo");
        let stop = frame_json(&frames[3]);
        assert_eq!(stop["choices"][0]["finish_reason"], "stop");
        assert_eq!(frames[4], SSE_DONE);

        // All frames share one id.
        assert_eq!(frame_json(&frames[1])["id"], start["id"]);

        // The cost event triggered exactly one refresh, persisted to disk.
        assert_eq!(prober.hits.load(Ordering::SeqCst), 1);
        assert_eq!(prober.sessions.lock().unwrap()[0], "sess-a");
        let stored = tokio::fs::read_to_string(dir.path().join("accounts.txt"))
            .await
            .unwrap();
        assert!(stored.contains("4.2000"));
    }

    #[tokio::test]
    async fn data_line_split_across_chunks_is_reassembled() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober).await;

        let upstream = upstream_of(vec![
            "data: {\"cont",
            "ent\":\"joined\"}\n",
            "data: {\"cost\":0.001}\n",
        ]);
        let frames = collect(translate_stream(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        ))
        .await;

        assert_eq!(
            frame_json(&frames[1])["choices"][0]["delta"]["content"],
            "joined"
        );
    }

    #[tokio::test]
    async fn multibyte_delta_split_across_chunks_is_reassembled() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober).await;

        // "你" is three bytes; split the chunk boundary inside it.
        let line = "data: {\"content\":\"你\"}\n".as_bytes();
        let (head, tail) = line.split_at(20);
        let upstream = upstream_of_bytes(vec![head, tail, b"data: {\"cost\":0.001}\n"]);
        let frames = collect(translate_stream(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        ))
        .await;

        assert_eq!(
            frame_json(&frames[1])["choices"][0]["delta"]["content"],
            "你"
        );
    }

    #[tokio::test]
    async fn error_event_terminates_stream() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober.clone()).await;

        let upstream = upstream_of(vec![
            "data: {\"content\":\"partial\"}\n",
            "data: {\"error\":\"model overloaded\"}\n",
            "data: {\"content\":\"never seen\"}\n",
        ]);
        let frames = collect(translate_stream(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        ))
        .await;

        // role + content + error, then nothing — no stop chunk, no DONE.
        assert_eq!(frames.len(), 3);
        let error = frame_json(&frames[2]);
        assert_eq!(error["error"]["type"], "api_error");
        assert!(error["error"]["message"].as_str().unwrap().contains("model overloaded"));
        assert_eq!(prober.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn end_without_cost_still_closes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober.clone()).await;

        let upstream = upstream_of(vec!["data: {\"content\":\"hi\"}\n"]);
        let frames = collect(translate_stream(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        ))
        .await;

        assert_eq!(frames.len(), 4);
        assert_eq!(frame_json(&frames[2])["choices"][0]["finish_reason"], "stop");
        assert_eq!(frames[3], SSE_DONE);
        // No cost event, no refresh.
        assert_eq!(prober.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transport_break_yields_error_frame() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober).await;

        let upstream = broken_upstream(vec!["data: {\"content\":\"x\"}\n"]);
        let frames = collect(translate_stream(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        ))
        .await;

        let last = frame_json(frames.last().unwrap());
        assert_eq!(last["error"]["type"], "internal_error");
    }

    #[tokio::test]
    async fn malformed_and_done_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober).await;

        let upstream = upstream_of(vec![
            "event: ping\n",
            "data: not json at all\n",
            "data: [DONE]\n",
            "data: {\"content\":\"ok\"}\n",
            "data: {\"cost\":0.002}\n",
        ]);
        let frames = collect(translate_stream(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        ))
        .await;

        // role + one content + stop + DONE, nothing for the junk lines.
        assert_eq!(frames.len(), 4);
        assert_eq!(frame_json(&frames[1])["choices"][0]["delta"]["content"], "ok");
    }

    #[tokio::test]
    async fn drain_concatenates_content_and_settles() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(3.3);
        let pool = pool_with_one(&dir, prober.clone()).await;

        let upstream = upstream_of(vec![
            "data: {\"content\":\"one \"}\ndata: {\"content\":\"two\"}\n",
            "data: {\"cost\":0.004}\n",
        ]);
        let outcome = drain_completion(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        )
        .await;

        let DrainOutcome::Completed(response) = outcome else {
            panic!("expected a completed response");
        };
        assert_eq!(response.choices[0].message.content, "one two");
        assert_eq!(response.usage.total_tokens, 0);
        assert_eq!(prober.hits.load(Ordering::SeqCst), 1);

        let stored = tokio::fs::read_to_string(dir.path().join("accounts.txt"))
            .await
            .unwrap();
        assert!(stored.contains("3.3000"));
    }

    #[tokio::test]
    async fn drain_error_event_returns_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober.clone()).await;

        let upstream = upstream_of(vec!["data: {\"error\":\"quota exceeded\"}\n"]);
        let outcome = drain_completion(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        )
        .await;

        let DrainOutcome::Errored(envelope) = outcome else {
            panic!("expected an error envelope");
        };
        assert_eq!(envelope.error.kind, "api_error");
        assert_eq!(prober.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn drain_without_cost_skips_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let prober = CountingProber::new(1.0);
        let pool = pool_with_one(&dir, prober.clone()).await;

        let upstream = upstream_of(vec!["data: {\"content\":\"text\"}\n"]);
        let outcome = drain_completion(
            upstream,
            pool,
            "sess-a".into(),
            "a@x.com".into(),
            "claude-4-sonnet".into(),
        )
        .await;

        assert!(matches!(outcome, DrainOutcome::Completed(_)));
        assert_eq!(prober.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn line_buffer_carries_partial_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"abc").is_empty());
        assert_eq!(buffer.push(b"def\ngh"), vec!["abcdef"]);
        assert_eq!(buffer.push(b"i\njkl\n"), vec!["ghi", "jkl"]);
        assert!(buffer.push(b"").is_empty());
    }

    #[test]
    fn line_buffer_keeps_split_multibyte_chars_intact() {
        let mut buffer = LineBuffer::new();
        let line = "héllo wörld\n".as_bytes();
        // Split inside the two-byte 'é'.
        let (head, tail) = line.split_at(2);
        assert!(buffer.push(head).is_empty());
        assert_eq!(buffer.push(tail), vec!["héllo wörld"]);
    }
}
