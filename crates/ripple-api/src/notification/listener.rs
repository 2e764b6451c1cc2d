//! Streaming listener sessions
//!
//! A session owns the receiving end of a destination channel. Running it
//! writes one frame per delivered batch, and an empty frame whenever the
//! channel stays idle for the keep-alive interval. Each frame is a JSON
//! `{"Records": [...]}` object terminated by CRLF. The first failed write
//! ends the stream, after which the listener is unregistered everywhere.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use ripple_core::types::EventMessage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use super::NotificationService;
use crate::events::EventReceiver;

/// Frame terminator, lets clients split the chunked body into messages
pub const FRAME_DELIMITER: &[u8] = b"\r\n";

/// Errors raised by a response sink
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("client disconnected")]
    Closed,

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Where a session writes its frames. A successful write means the frame
/// was handed to the transport and flushed.
#[async_trait]
pub trait ResponseSink: Send {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), SinkError>;
}

/// Sink feeding a streaming HTTP body
pub struct ChannelSink {
    sender: mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl ChannelSink {
    /// A sink and the body stream it feeds. The stream ends once the sink is
    /// dropped; dropping the stream makes every later write fail.
    pub fn pair() -> (Self, BoxStream<'static, Result<Bytes, std::io::Error>>) {
        let (sender, receiver) = mpsc::channel(1);
        let body = stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|chunk| (chunk, receiver))
        })
        .boxed();
        (Self { sender }, body)
    }
}

#[async_trait]
impl ResponseSink for ChannelSink {
    async fn write_frame(&mut self, frame: Bytes) -> Result<(), SinkError> {
        self.sender
            .send(Ok(frame))
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Encode a message as one CRLF-terminated frame
pub fn encode_frame(message: &EventMessage) -> serde_json::Result<Bytes> {
    let mut frame = serde_json::to_vec(message)?;
    frame.extend_from_slice(FRAME_DELIMITER);
    Ok(Bytes::from(frame))
}

/// Why a stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A frame could not be written
    ClientGone,
    /// The destination channel was unregistered
    ChannelClosed,
    /// The streaming task panicked or was cancelled
    Aborted,
}

/// A registered listener, ready to stream
pub struct ListenerSession {
    service: Arc<NotificationService>,
    bucket: String,
    destination_id: String,
    receiver: Option<EventReceiver>,
    keep_alive: Duration,
    finished: bool,
}

impl std::fmt::Debug for ListenerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSession")
            .field("bucket", &self.bucket)
            .field("destination_id", &self.destination_id)
            .field("keep_alive", &self.keep_alive)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ListenerSession {
    pub(super) fn new(
        service: Arc<NotificationService>,
        bucket: String,
        destination_id: String,
        receiver: EventReceiver,
        keep_alive: Duration,
    ) -> Self {
        Self {
            service,
            bucket,
            destination_id,
            receiver: Some(receiver),
            keep_alive,
            finished: false,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }

    /// Stream events into `sink` until the client goes away, then tear the
    /// listener down. Teardown also runs if the streaming loop panics.
    pub async fn run<S>(mut self, sink: S) -> StreamEnd
    where
        S: ResponseSink + 'static,
    {
        let end = match self.receiver.take() {
            Some(receiver) => {
                let task = tokio::spawn(stream_events(receiver, sink, self.keep_alive));
                match task.await {
                    Ok(end) => end,
                    Err(e) => {
                        error!("Listener {} stream aborted: {}", self.destination_id, e);
                        StreamEnd::Aborted
                    }
                }
            }
            None => StreamEnd::ChannelClosed,
        };

        debug!(
            "Listener {} on {} ended: {:?}",
            self.destination_id, self.bucket, end
        );
        self.finished = true;
        self.service
            .teardown_listener(&self.bucket, &self.destination_id)
            .await;
        end
    }
}

impl Drop for ListenerSession {
    fn drop(&mut self) {
        if self.finished {
            return;
        }

        let service = self.service.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let destination_id = std::mem::take(&mut self.destination_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    service.teardown_listener(&bucket, &destination_id).await;
                });
            }
            Err(_) => {
                // No runtime left to persist with; at least stop delivery
                warn!("Listener {} dropped outside a runtime", destination_id);
                service.notifier().remove_listener(&destination_id);
            }
        }
    }
}

async fn stream_events<S: ResponseSink>(
    mut receiver: EventReceiver,
    mut sink: S,
    keep_alive: Duration,
) -> StreamEnd {
    loop {
        let message = match tokio::time::timeout(keep_alive, receiver.recv()).await {
            Ok(Some(records)) => EventMessage::new(records),
            Ok(None) => return StreamEnd::ChannelClosed,
            Err(_) => EventMessage::heartbeat(),
        };

        let frame = match encode_frame(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Failed to encode event frame: {}", e);
                continue;
            }
        };

        if let Err(e) = sink.write_frame(frame).await {
            debug!("Stopping event stream: {}", e);
            return StreamEnd::ClientGone;
        }
    }
}
