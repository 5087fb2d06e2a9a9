//! Server-to-client push channels.
//!
//! A channel is a single-producer/single-consumer FIFO of [`Frame`]s owned by
//! the [`ChannelManager`]. The running command holds a [`ChannelSender`]; the
//! transport drains a [`ChannelReceiver`]. At most one terminal frame
//! (`error` or `close`) is ever enqueued, and nothing is accepted after it.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{BridgeError, ErrorBody};
use crate::events;

// ── Frames ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data(Value),
    Error(ErrorBody),
    Close,
}

impl Frame {
    /// Event name on the wire.
    pub fn event(&self) -> &'static str {
        match self {
            Frame::Data(_) => events::MESSAGE,
            Frame::Error(_) => events::ERROR,
            Frame::Close => events::CLOSE,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Frame::Data(_))
    }

    /// JSON payload carried by the frame (`null` for `close`).
    pub fn data(&self) -> Value {
        match self {
            Frame::Data(v) => v.clone(),
            Frame::Error(body) => serde_json::to_value(body).unwrap_or(Value::Null),
            Frame::Close => Value::Null,
        }
    }

    pub fn to_wire(&self) -> WireFrame {
        WireFrame {
            event: self.event().to_string(),
            data: match self {
                Frame::Close => None,
                other => Some(other.data()),
            },
        }
    }
}

/// Serialized frame: `{event: "message"|"error"|"close", data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize, TS)]
#[ts(export)]
pub struct WireFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(type = "unknown")]
    pub data: Option<Value>,
}

// ── Producer side ───────────────────────────────────────────────

struct SenderInner {
    channel_id: String,
    /// `Some` while open; taken when the terminal frame is enqueued.
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
}

impl SenderInner {
    fn push(&self, frame: Frame) -> bool {
        let mut guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return false;
        };
        let terminal = frame.is_terminal();
        let delivered = tx.send(frame).is_ok();
        if terminal || !delivered {
            // Consumer gone or stream finished: later sends become no-ops.
            *guard = None;
        }
        delivered
    }
}

/// Send capability for one channel. Sends never fail into the caller: after
/// a terminal frame, or once the consumer has gone away, they are dropped.
pub struct ChannelSender<T = Value> {
    inner: Arc<SenderInner>,
    _payload: PhantomData<fn(T)>,
}

impl<T> Clone for ChannelSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _payload: PhantomData,
        }
    }
}

impl<T> fmt::Debug for ChannelSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSender")
            .field("channel_id", &self.inner.channel_id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> ChannelSender<T> {
    pub fn channel_id(&self) -> &str {
        &self.inner.channel_id
    }

    /// True once a terminal frame was sent or the consumer disconnected.
    pub fn is_closed(&self) -> bool {
        self.inner
            .tx
            .lock()
            .as_ref()
            .is_none_or(mpsc::UnboundedSender::is_closed)
    }

    /// View this sender with a different payload type.
    pub fn retype<U>(&self) -> ChannelSender<U> {
        ChannelSender {
            inner: Arc::clone(&self.inner),
            _payload: PhantomData,
        }
    }

    /// Terminate the stream with an error frame. Idempotent.
    pub fn send_error(&self, error: ErrorBody) {
        if self.inner.push(Frame::Error(error)) {
            debug!(channel = %self.inner.channel_id, "channel terminated with error");
        }
    }

    /// Terminate the stream with a `CHANNEL_ERROR` carrying `message`.
    pub fn fail(&self, message: impl Into<String>) {
        self.send_error(
            BridgeError::Channel {
                message: message.into(),
            }
            .to_body(true),
        );
    }

    /// Terminate the stream normally. Idempotent.
    pub fn close(&self) {
        if self.inner.push(Frame::Close) {
            debug!(channel = %self.inner.channel_id, "channel closed");
        }
    }
}

impl<T: Serialize> ChannelSender<T> {
    /// Push a data frame. Returns whether it was accepted.
    pub fn send(&self, item: T) -> bool {
        match serde_json::to_value(item) {
            Ok(value) => self.inner.push(Frame::Data(value)),
            Err(e) => {
                warn!(channel = %self.inner.channel_id, "dropping unserializable frame: {e}");
                false
            }
        }
    }
}

// ── Consumer side ───────────────────────────────────────────────

/// Receive capability for one channel. Dropping it removes the channel from
/// its manager, so a disconnected consumer never leaks bookkeeping.
pub struct ChannelReceiver {
    channel_id: String,
    rx: mpsc::UnboundedReceiver<Frame>,
    finished: bool,
    manager: ChannelManager,
}

impl ChannelReceiver {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Wait for the next frame. Yields data frames in send order, then the
    /// terminal frame, then `None`.
    pub async fn next(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        let frame = self.rx.recv().await;
        match &frame {
            Some(f) if !f.is_terminal() => {}
            _ => {
                self.finished = true;
                self.manager.remove(&self.channel_id);
            }
        }
        frame
    }

    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send {
        futures_util::stream::unfold(self, |mut rx| async move {
            let frame = rx.next().await?;
            Some((frame, rx))
        })
    }
}

impl Drop for ChannelReceiver {
    fn drop(&mut self) {
        if !self.finished {
            debug!(channel = %self.channel_id, "consumer dropped before terminal frame");
        }
        self.manager.remove(&self.channel_id);
    }
}

// ── Channel & manager ───────────────────────────────────────────

/// A channel as tracked by the manager: the producer capability plus the
/// receiver, parked until a consumer attaches.
pub struct Channel {
    id: String,
    sender: ChannelSender<Value>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Frame>>>,
}

impl Channel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> ChannelSender<Value> {
        self.sender.clone()
    }
}

/// Owner of every live channel. Cheap to clone.
#[derive(Clone, Default)]
pub struct ChannelManager {
    channels: Arc<Mutex<HashMap<String, Arc<Channel>>>>,
}

impl fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelManager")
            .field("open", &self.len())
            .finish()
    }
}

impl ChannelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an open, empty channel with a fresh id.
    pub fn create(&self) -> Arc<Channel> {
        let id = Uuid::new_v4().simple().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel {
            id: id.clone(),
            sender: ChannelSender {
                inner: Arc::new(SenderInner {
                    channel_id: id.clone(),
                    tx: Mutex::new(Some(tx)),
                }),
                _payload: PhantomData,
            },
            receiver: Mutex::new(Some(rx)),
        });
        self.channels.lock().insert(id.clone(), Arc::clone(&channel));
        debug!(channel = %id, "channel created");
        channel
    }

    pub fn get(&self, id: &str) -> Result<Arc<Channel>, BridgeError> {
        self.channels
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| BridgeError::ChannelNotFound { id: id.to_string() })
    }

    /// Take the receive capability. Only one consumer may ever attach.
    pub fn attach(&self, id: &str) -> Result<ChannelReceiver, BridgeError> {
        let channel = self.get(id)?;
        let rx = channel
            .receiver
            .lock()
            .take()
            .ok_or_else(|| BridgeError::Channel {
                message: format!("Channel '{id}' already has a consumer"),
            })?;
        Ok(ChannelReceiver {
            channel_id: id.to_string(),
            rx,
            finished: false,
            manager: self.clone(),
        })
    }

    /// Forget a channel. Safe to call repeatedly.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.channels.lock().remove(id).is_some();
        if removed {
            debug!(channel = %id, "channel removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn data_frames_then_exactly_one_terminal() {
        let manager = ChannelManager::new();
        let channel = manager.create();
        let tx = channel.sender();

        assert!(tx.send(json!(1)));
        assert!(tx.send(json!(2)));
        tx.close();
        // Everything after the terminal frame is ignored.
        assert!(!tx.send(json!(3)));
        tx.fail("too late");
        tx.close();
        assert!(tx.is_closed());

        let rx = manager.attach(channel.id()).unwrap();
        let frames: Vec<Frame> = rx.into_stream().collect().await;
        assert_eq!(
            frames,
            vec![Frame::Data(json!(1)), Frame::Data(json!(2)), Frame::Close]
        );
    }

    #[tokio::test]
    async fn late_consumer_sees_buffered_error() {
        let manager = ChannelManager::new();
        let channel = manager.create();
        let tx: ChannelSender<String> = channel.sender().retype();
        tx.send("a".to_string());
        tx.fail("boom");

        let mut rx = manager.attach(channel.id()).unwrap();
        assert_eq!(rx.next().await, Some(Frame::Data(json!("a"))));
        match rx.next().await {
            Some(Frame::Error(body)) => {
                assert_eq!(body.code, "CHANNEL_ERROR");
                assert_eq!(body.message, "boom");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
        assert_eq!(rx.next().await, None);
        // Draining the terminal frame released the bookkeeping.
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn consumer_waits_for_producer() {
        let manager = ChannelManager::new();
        let channel = manager.create();
        let tx: ChannelSender<u32> = channel.sender().retype();
        let mut rx = manager.attach(channel.id()).unwrap();

        let producer = tokio::spawn(async move {
            for i in 0..3 {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                tx.send(i);
            }
            tx.close();
        });

        let mut seen = Vec::new();
        while let Some(frame) = rx.next().await {
            seen.push(frame);
        }
        producer.await.unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(seen.last(), Some(&Frame::Close));
    }

    #[tokio::test]
    async fn second_consumer_is_rejected() {
        let manager = ChannelManager::new();
        let channel = manager.create();
        let _rx = manager.attach(channel.id()).unwrap();
        assert!(matches!(
            manager.attach(channel.id()),
            Err(BridgeError::Channel { .. })
        ));
    }

    #[tokio::test]
    async fn dropped_consumer_turns_sends_into_no_ops() {
        let manager = ChannelManager::new();
        let channel = manager.create();
        let tx = channel.sender();
        let rx = manager.attach(channel.id()).unwrap();
        drop(rx);

        assert!(manager.get(channel.id()).is_err());
        drop(channel);
        assert!(!tx.send(json!("nobody listening")));
        assert!(tx.is_closed());
    }

    #[test]
    fn remove_is_idempotent_and_unknown_ids_are_not_found() {
        let manager = ChannelManager::new();
        let channel = manager.create();
        assert!(manager.remove(channel.id()));
        assert!(!manager.remove(channel.id()));
        assert!(matches!(
            manager.get("nope"),
            Err(BridgeError::ChannelNotFound { id }) if id == "nope"
        ));
    }

    #[test]
    fn channel_ids_are_unique() {
        let manager = ChannelManager::new();
        let a = manager.create();
        let b = manager.create();
        assert_ne!(a.id(), b.id());
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn wire_frames() {
        assert_eq!(
            serde_json::to_value(Frame::Data(json!({"n": 1})).to_wire()).unwrap(),
            json!({"event": "message", "data": {"n": 1}})
        );
        assert_eq!(
            serde_json::to_value(Frame::Close.to_wire()).unwrap(),
            json!({"event": "close"})
        );
        let err = Frame::Error(BridgeError::validation("bad").to_body(false));
        assert_eq!(
            serde_json::to_value(err.to_wire()).unwrap(),
            json!({"event": "error", "data": {"code": "VALIDATION_ERROR", "message": "bad"}})
        );
    }
}
