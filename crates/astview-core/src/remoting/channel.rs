//! Bidirectional call channel over one byte stream.
//!
//! A channel owns exactly one stream and runs three background tasks:
//!
//! - **writer**: drains the outbound queue in order, so envelopes leave in the
//!   order they were sent (FIFO per direction).
//! - **reader**: decodes inbound envelopes. Replies complete the pending
//!   request with the same `call_id`; requests are dispatched on their own
//!   task so replies can come back out of order; notifications are queued.
//! - **notifier**: runs queued notification handlers one at a time, in
//!   arrival order, without holding up the reader.
//!
//! When the stream closes every pending request fails with `ChannelClosed`.
//! Handler and decoding failures stay local to the call that caused them.

use crate::remoting::contract::{MethodKind, ServiceContract};
use crate::remoting::dispatch::{DispatchTable, RoutedCall};
use crate::config::RemotingConfig;
use crate::remoting::protocol::{
    encode_envelope, read_frame, write_frame, CallEnvelope, Envelope, ReplyEnvelope,
};
use crate::{RemotingError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

type PendingReply = oneshot::Sender<Result<Value>>;

/// Handle to an open channel. Cloning shares the same stream.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    id: u64,
    /// Encoded frames, in send order.
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    max_message_size: usize,
    state: Mutex<ChannelState>,
    next_call_id: AtomicU64,
    table: Arc<DispatchTable>,
    closed_tx: watch::Sender<bool>,
}

#[derive(Default)]
struct ChannelState {
    closed: bool,
    pending: HashMap<u64, PendingReply>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Channel {
    /// Start a channel over `stream`, serving inbound calls from `table`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn open<S>(stream: S, table: Arc<DispatchTable>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::open_with_limit(stream, table, RemotingConfig::MAX_MESSAGE_SIZE)
    }

    /// Like [`Channel::open`], with a custom frame size limit for both
    /// directions.
    pub(crate) fn open_with_limit<S>(
        stream: S,
        table: Arc<DispatchTable>,
        max_message_size: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = watch::channel(false);

        let inner = Arc::new(ChannelInner {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            outbound: outbound_tx,
            max_message_size,
            state: Mutex::new(ChannelState::default()),
            next_call_id: AtomicU64::new(1),
            table,
            closed_tx,
        });

        debug!("Channel {} opened", inner.id);

        tokio::spawn(Self::write_loop(inner.clone(), writer, outbound_rx));
        tokio::spawn(Self::read_loop(inner.clone(), reader));

        Self { inner }
    }

    /// Process-unique channel id, for diagnostics.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed_tx.borrow()
    }

    /// Wait until the underlying stream is closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed_tx.subscribe();
        // Only fails if the sender is gone, which means the channel is gone.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Close the channel. Pending requests fail with `ChannelClosed` and the
    /// peer observes end-of-stream once queued envelopes are flushed.
    pub fn close(&self) {
        self.inner.mark_closed();
    }

    /// Send a request and wait for its reply.
    pub async fn request(
        &self,
        contract: &ServiceContract,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let descriptor = contract.resolve(method, MethodKind::Request)?;
        check_arity(descriptor.name, descriptor.arity, &args)?;

        let call_id = self.inner.next_call_id.fetch_add(1, Ordering::Relaxed);
        let frame = self.inner.encode(&Envelope::Call(CallEnvelope::request(
            call_id,
            contract.id,
            method,
            args,
        )))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.inner.lock_state()?;
            if state.closed {
                return Err(RemotingError::ChannelClosed);
            }
            state.pending.insert(call_id, tx);
        }

        if self.inner.outbound.send(frame).is_err() {
            if let Ok(mut state) = self.inner.lock_state() {
                state.pending.remove(&call_id);
            }
            return Err(RemotingError::ChannelClosed);
        }

        debug!(
            "Channel {}: request #{} {}.{}",
            self.inner.id, call_id, contract.id, method
        );

        rx.await.unwrap_or(Err(RemotingError::ChannelClosed))
    }

    /// Send a notification. Returns as soon as it is queued for writing.
    pub fn notify(&self, contract: &ServiceContract, method: &str, args: Vec<Value>) -> Result<()> {
        let descriptor = contract.resolve(method, MethodKind::Notification)?;
        check_arity(descriptor.name, descriptor.arity, &args)?;

        if self.is_closed() {
            return Err(RemotingError::ChannelClosed);
        }

        let frame = self.inner.encode(&Envelope::Call(CallEnvelope::notification(
            contract.id,
            method,
            args,
        )))?;
        self.inner
            .outbound
            .send(frame)
            .map_err(|_| RemotingError::ChannelClosed)
    }

    async fn write_loop<W>(
        inner: Arc<ChannelInner>,
        mut writer: W,
        mut outbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) where
        W: AsyncWrite + Unpin,
    {
        let mut closed_rx = inner.closed_tx.subscribe();

        loop {
            tokio::select! {
                biased;
                frame = outbound.recv() => {
                    let Some(frame) = frame else { break };
                    if let Err(e) = write_frame(&mut writer, &frame).await {
                        debug!("Channel {} write failed: {}", inner.id, e);
                        break;
                    }
                }
                _ = wait_closed(&mut closed_rx) => {
                    break;
                }
            }
        }

        let _ = writer.shutdown().await;
        inner.mark_closed();
    }

    async fn read_loop<R>(inner: Arc<ChannelInner>, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut closed_rx = inner.closed_tx.subscribe();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel::<RoutedCall>();
        tokio::spawn(Self::notification_loop(inner.id, notify_rx));

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader, inner.max_message_size) => result,
                _ = wait_closed(&mut closed_rx) => break,
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("Channel {}: peer closed the stream", inner.id);
                    break;
                }
                Err(e) => {
                    warn!("Channel {}: read failed: {}", inner.id, e);
                    break;
                }
            };

            match serde_json::from_slice::<Envelope>(&frame) {
                Ok(Envelope::Reply(reply)) => inner.complete(reply),
                Ok(Envelope::Call(call)) => inner.receive_call(call, &notify_tx),
                Err(e) => {
                    // Frame boundaries are intact, so the stream stays usable.
                    warn!("Channel {}: dropping undecodable envelope: {}", inner.id, e);
                }
            }
        }

        inner.mark_closed();
    }

    async fn notification_loop(channel_id: u64, mut queue: mpsc::UnboundedReceiver<RoutedCall>) {
        while let Some(call) = queue.recv().await {
            let contract = call.dispatcher.contract().id;
            let method = call.method.name;
            if let Err(e) = call.dispatcher.dispatch(method, call.args).await {
                warn!(
                    "Channel {}: notification {}.{} failed: {}",
                    channel_id, contract, method, e
                );
            }
        }
    }
}

impl ChannelInner {
    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ChannelState>> {
        self.state
            .lock()
            .map_err(|_| RemotingError::Other("channel state lock poisoned".to_string()))
    }

    fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        encode_envelope(envelope, self.max_message_size)
    }

    /// Queue a reply. A result too large for one frame is replaced by the
    /// encoding failure, so the caller still gets an answer.
    fn send_reply(&self, reply: ReplyEnvelope) {
        let call_id = reply.call_id;
        let frame = self.encode(&Envelope::Reply(reply)).or_else(|e| {
            warn!("Channel {}: reply #{} not sendable: {}", self.id, call_id, e);
            self.encode(&Envelope::Reply(ReplyEnvelope::failure(call_id, &e)))
        });
        match frame {
            Ok(frame) => {
                let _ = self.outbound.send(frame);
            }
            Err(e) => warn!("Channel {}: dropping reply #{}: {}", self.id, call_id, e),
        }
    }

    fn complete(&self, reply: ReplyEnvelope) {
        let waiter = self
            .lock_state()
            .ok()
            .and_then(|mut state| state.pending.remove(&reply.call_id));

        match waiter {
            Some(tx) => {
                let _ = tx.send(reply.into_result());
            }
            None => debug!(
                "Channel {}: reply for unknown call #{}",
                self.id, reply.call_id
            ),
        }
    }

    fn receive_call(
        self: &Arc<Self>,
        call: CallEnvelope,
        notifications: &mpsc::UnboundedSender<RoutedCall>,
    ) {
        let kind = call.kind;
        let call_id = call.call_id;
        let contract = call.contract.clone();
        let method = call.method.clone();

        match (kind, call_id) {
            (MethodKind::Notification, _) => match self.table.route(call) {
                Ok(routed) => {
                    let _ = notifications.send(routed);
                }
                Err(e) => {
                    // No reply channel for notifications; diagnose and drop.
                    warn!("Channel {}: dropping notification: {}", self.id, e);
                }
            },
            (MethodKind::Request, Some(call_id)) => {
                let inner = self.clone();
                match self.table.route(call) {
                    Ok(routed) => {
                        tokio::spawn(async move {
                            let reply = match routed.dispatcher.dispatch(routed.method.name, routed.args).await {
                                Ok(value) => ReplyEnvelope::success(call_id, value),
                                Err(e) => {
                                    debug!(
                                        "Channel {}: request {}.{} failed: {}",
                                        inner.id, contract, method, e
                                    );
                                    ReplyEnvelope::failure(call_id, &e)
                                }
                            };
                            inner.send_reply(reply);
                        });
                    }
                    Err(e) => {
                        warn!("Channel {}: rejecting request: {}", self.id, e);
                        self.send_reply(ReplyEnvelope::failure(call_id, &e));
                    }
                }
            }
            (MethodKind::Request, None) => {
                warn!(
                    "Channel {}: request {}.{} without call id dropped",
                    self.id, contract, method
                );
            }
        }
    }

    /// Idempotent. Fails pending requests and releases local implementations.
    fn mark_closed(&self) {
        let pending = match self.state.lock() {
            Ok(mut state) => {
                if state.closed {
                    return;
                }
                state.closed = true;
                std::mem::take(&mut state.pending)
            }
            Err(_) => return,
        };

        self.closed_tx.send_replace(true);
        for (_, tx) in pending {
            let _ = tx.send(Err(RemotingError::ChannelClosed));
        }
        self.table.clear();

        info!("Channel {} closed", self.id);
    }
}

/// Resolves once the channel is marked closed.
async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn check_arity(method: &str, arity: usize, args: &[Value]) -> Result<()> {
    if args.len() != arity {
        return Err(RemotingError::InvalidArguments {
            method: method.to_string(),
            message: format!("expected {} arguments, got {}", arity, args.len()),
        });
    }
    Ok(())
}
