use std::future::Future;
use std::pin::Pin;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};

use crate::config::BackendConfig;

/// Path of the push-channel subscription endpoint.
pub const SUBSCRIBE_PATH: &str = "/api/sse/subscribe";

/// Event name the server uses when a frame omits the `event:` field.
const DEFAULT_EVENT_NAME: &str = "message";

/// One raw server-sent frame: the event name plus its joined data payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Incremental parser for a `text/event-stream` byte sequence.
///
/// Frames can be split across network reads at any byte, so the parser
/// buffers the trailing partial line between `feed` calls and only emits a
/// frame once the terminating blank line arrives.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk of bytes and returns every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        while let Some(line_end) = self.buffer.find('\n') {
            let line = self.buffer[..line_end].trim_end_matches('\r').to_string();
            self.buffer.drain(..=line_end);

            if let Some(frame) = self.consume_line(&line) {
                frames.push(frame);
            }
        }

        frames
    }

    fn consume_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Lines starting with a colon are comments (used for keep-alives).
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            // `id` and `retry` are part of the protocol but unused here.
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let data_lines = std::mem::take(&mut self.data_lines);

        // A blank line with no accumulated fields is just stream padding.
        if event.is_none() && data_lines.is_empty() {
            return None;
        }

        Some(SseFrame {
            event: event.unwrap_or_else(|| DEFAULT_EVENT_NAME.to_string()),
            data: data_lines.join("\n"),
        })
    }
}

pub type ChannelWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Receiving half of one push-channel subscription.
///
/// `recv` returning `None` means the subscription ended (server close or
/// transport failure); there is no automatic reconnection, re-establishment
/// is the embedder's concern.
pub struct PushFrameStream {
    frames: mpsc::UnboundedReceiver<SseFrame>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl PushFrameStream {
    fn new(frames: mpsc::UnboundedReceiver<SseFrame>, cancel_tx: oneshot::Sender<()>) -> Self {
        Self {
            frames,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<SseFrame> {
        self.frames.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SseFrame> {
        self.frames.try_recv().ok()
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

impl Drop for PushFrameStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// Subscription handle pairing the frame stream with its transport worker.
///
/// The worker future owns the HTTP response body; spawn it on the runtime
/// and keep the stream wherever frames are consumed.
pub struct PushChannelHandle {
    pub stream: PushFrameStream,
    pub worker: ChannelWorker,
}

/// Creates a detached frame stream fed by the returned sender, for
/// embedders that drive their own transport (tests, captured replays).
pub fn channel() -> (mpsc::UnboundedSender<SseFrame>, PushFrameStream) {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (cancel_tx, _cancel_rx) = oneshot::channel();
    (frame_tx, PushFrameStream::new(frame_rx, cancel_tx))
}

/// Opens one push-channel subscription against the backend.
pub fn subscribe(client: &reqwest::Client, config: &BackendConfig) -> PushChannelHandle {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();

    let worker: ChannelWorker = Box::pin(run_channel_worker(
        client.clone(),
        config.endpoint(SUBSCRIBE_PATH),
        frame_tx,
        cancel_rx,
    ));

    PushChannelHandle {
        stream: PushFrameStream::new(frame_rx, cancel_tx),
        worker,
    }
}

async fn run_channel_worker(
    client: reqwest::Client,
    url: String,
    frame_tx: mpsc::UnboundedSender<SseFrame>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let response = match client
        .get(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
    {
        Ok(response) => response,
        Err(error) => {
            tracing::error!(url = %url, error = %error, "failed to open push channel");
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        tracing::error!(url = %url, status = %status, "push channel subscription rejected");
        return;
    }

    let mut body = response.bytes_stream();
    let mut parser = FrameParser::new();

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(url = %url, "push channel cancelled");
                return;
            }
            next_chunk = body.next() => {
                match next_chunk {
                    Some(Ok(bytes)) => {
                        for frame in parser.feed(&bytes) {
                            if frame_tx.send(frame).is_err() {
                                // Receiver dropped; nothing left to deliver to.
                                return;
                            }
                        }
                    }
                    Some(Err(error)) => {
                        tracing::warn!(url = %url, error = %error, "push channel transport failed");
                        return;
                    }
                    None => {
                        tracing::info!(url = %url, "push channel closed by server");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_named_event_with_single_data_line() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"event: ai-chunk\ndata: {\"content\":\"He\"}\n\n");

        assert_eq!(
            frames,
            vec![SseFrame {
                event: "ai-chunk".to_string(),
                data: "{\"content\":\"He\"}".to_string(),
            }]
        );
    }

    #[test]
    fn joins_multi_line_data_with_newlines() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"event: ai-final\ndata: line one\ndata: line two\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn buffers_frames_split_across_feeds() {
        let mut parser = FrameParser::new();

        assert!(parser.feed(b"event: ai-ch").is_empty());
        assert!(parser.feed(b"unk\ndata: {}").is_empty());
        let frames = parser.feed(b"\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "ai-chunk");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn comment_lines_and_padding_blank_lines_emit_nothing() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b": keep-alive\n\n\n: another\n\n");
        assert!(frames.is_empty());
    }

    #[test]
    fn data_without_event_name_uses_the_default_name() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"data: hello\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn crlf_line_endings_are_tolerated() {
        let mut parser = FrameParser::new();
        let frames = parser.feed(b"event: connect\r\ndata: 99\r\n\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "connect");
        assert_eq!(frames[0].data, "99");
    }

    #[test]
    fn consecutive_frames_in_one_chunk_all_emit() {
        let mut parser = FrameParser::new();
        let frames =
            parser.feed(b"event: ai-chunk\ndata: a\n\nevent: ai-chunk\ndata: b\n\n");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "a");
        assert_eq!(frames[1].data, "b");
    }
}
