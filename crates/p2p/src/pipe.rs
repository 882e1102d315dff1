//! Negotiated connections to a single peer.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout, timeout_at};
use tracing::{debug, warn};

use crate::catalogue::CatalogueSet;
use crate::codec::{read_frame, write_frame};
use crate::error::PipeError;
use crate::types::{NetworkPeer, PipeRole, RemotePeer};

/// Time a closed pipe keeps writing before the writer gives up. A peer
/// that stops reading cannot hold a close past this bound.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Invoked once when the peer goes away; the flag reports whether the
/// connection ended with an error.
pub type DisconnectCallback = Box<dyn FnOnce(bool) + Send>;

/// Open, bidirectional channel to one peer.
#[async_trait]
pub trait Pipe: Send + Sync {
    fn peer(&self) -> &dyn NetworkPeer;

    fn role(&self) -> PipeRole;

    /// Catalogue this side advertised when the pipe was negotiated.
    fn local_catalogue(&self) -> CatalogueSet;

    /// Catalogue the peer advertised, once negotiation has completed.
    fn other_catalogue(&self) -> Option<CatalogueSet>;

    /// Data the initiator attached to its negotiation frame.
    fn initiation_data(&self) -> Option<&[u8]>;

    fn is_closed(&self) -> bool;

    fn on_peer_disconnect(&self, callback: DisconnectCallback) -> DisconnectSubscription;

    /// Send a frame. With `await_response` this waits for the next frame
    /// from the peer and yields `None` if the pipe closes first.
    async fn send(&self, data: Vec<u8>, await_response: bool) -> Result<Option<Vec<u8>>, PipeError>;

    /// Wait for the next frame from the peer without sending.
    async fn receive(&self) -> Result<Option<Vec<u8>>, PipeError>;

    /// Close the pipe. Pending callbacks fire with `has_error = false` and
    /// waiting sends resolve to `None`. Calling it again does nothing.
    async fn close(&self);
}

#[derive(Default)]
struct DisconnectHandlers {
    next_id: u64,
    callbacks: BTreeMap<u64, DisconnectCallback>,
    fired: Option<bool>,
}

/// Registration returned by [`Pipe::on_peer_disconnect`]. Dropping it
/// removes the callback unless [`detach`](Self::detach) was called.
#[must_use = "dropping the subscription removes the callback"]
pub struct DisconnectSubscription {
    id: u64,
    handlers: Weak<Mutex<DisconnectHandlers>>,
    active: bool,
}

impl DisconnectSubscription {
    fn inert() -> Self {
        Self {
            id: 0,
            handlers: Weak::new(),
            active: false,
        }
    }

    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keep the callback registered for the lifetime of the pipe.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(handlers) = self.handlers.upgrade() {
            handlers.lock().callbacks.remove(&self.id);
        }
    }
}

impl Drop for DisconnectSubscription {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Identity and negotiation outcome a [`StreamPipe`] is created with.
#[derive(Clone, Debug)]
pub struct PipeInfo {
    pub peer: RemotePeer,
    pub role: PipeRole,
    pub local_catalogue: CatalogueSet,
    pub initiation_data: Option<Vec<u8>>,
}

struct Shared {
    info: PipeInfo,
    handlers: Arc<Mutex<DisconnectHandlers>>,
    closed: watch::Sender<bool>,
}

impl Shared {
    fn disconnect(&self, has_error: bool) {
        let callbacks = {
            let mut handlers = self.handlers.lock();
            if handlers.fired.is_some() {
                return;
            }
            handlers.fired = Some(has_error);
            std::mem::take(&mut handlers.callbacks)
        };
        self.closed.send_replace(true);
        debug!(peer = %self.info.peer, has_error, "pipe disconnected");
        for callback in callbacks.into_values() {
            callback(has_error);
        }
    }
}

/// [`Pipe`] over any byte stream, framed with a 4-byte length prefix.
///
/// A reader task feeds inbound frames into a queue and a writer task drains
/// outbound frames. Request/response pairs hold the inbound queue lock for
/// their whole duration, so concurrent callers never interleave.
pub struct StreamPipe {
    shared: Arc<Shared>,
    other_catalogue: OnceLock<CatalogueSet>,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
    closed: watch::Receiver<bool>,
    writer: Mutex<Option<JoinHandle<()>>>,
    max_message_size: usize,
}

impl StreamPipe {
    /// Split `stream` and start its reader and writer tasks. Must be called
    /// inside a tokio runtime.
    pub fn spawn<S>(stream: S, info: PipeInfo, max_message_size: usize, queue_depth: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (closed_tx, closed_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            info,
            handlers: Arc::new(Mutex::new(DisconnectHandlers::default())),
            closed: closed_tx,
        });
        let (reader, writer) = tokio::io::split(stream);
        let (outbound_tx, outbound_rx) = mpsc::channel(queue_depth.max(1));
        let (inbound_tx, inbound_rx) = mpsc::channel(queue_depth.max(1));

        tokio::spawn(read_loop(
            shared.clone(),
            reader,
            inbound_tx,
            closed_rx.clone(),
            max_message_size,
        ));
        let writer = tokio::spawn(write_loop(
            shared.clone(),
            writer,
            outbound_rx,
            closed_rx.clone(),
            max_message_size,
        ));

        Self {
            shared,
            other_catalogue: OnceLock::new(),
            outbound: outbound_tx,
            inbound: AsyncMutex::new(inbound_rx),
            closed: closed_rx,
            writer: Mutex::new(Some(writer)),
            max_message_size,
        }
    }

    /// Record the peer's catalogue. Only the first call has an effect.
    pub fn set_other_catalogue(&self, catalogue: CatalogueSet) -> bool {
        self.other_catalogue.set(catalogue).is_ok()
    }

    pub fn remote(&self) -> &RemotePeer {
        &self.shared.info.peer
    }

    async fn next_frame(&self, inbound: &mut mpsc::Receiver<Vec<u8>>) -> Option<Vec<u8>> {
        let mut closed = self.closed.clone();
        tokio::select! {
            biased;
            frame = inbound.recv() => frame,
            _ = wait_closed(&mut closed) => None,
        }
    }
}

#[async_trait]
impl Pipe for StreamPipe {
    fn peer(&self) -> &dyn NetworkPeer {
        &self.shared.info.peer
    }

    fn role(&self) -> PipeRole {
        self.shared.info.role
    }

    fn local_catalogue(&self) -> CatalogueSet {
        self.shared.info.local_catalogue
    }

    fn other_catalogue(&self) -> Option<CatalogueSet> {
        self.other_catalogue.get().copied()
    }

    fn initiation_data(&self) -> Option<&[u8]> {
        self.shared.info.initiation_data.as_deref()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn on_peer_disconnect(&self, callback: DisconnectCallback) -> DisconnectSubscription {
        let mut handlers = self.shared.handlers.lock();
        if let Some(has_error) = handlers.fired {
            drop(handlers);
            callback(has_error);
            return DisconnectSubscription::inert();
        }
        let id = handlers.next_id;
        handlers.next_id += 1;
        handlers.callbacks.insert(id, callback);
        DisconnectSubscription {
            id,
            handlers: Arc::downgrade(&self.shared.handlers),
            active: true,
        }
    }

    async fn send(&self, data: Vec<u8>, await_response: bool) -> Result<Option<Vec<u8>>, PipeError> {
        if data.len() > self.max_message_size {
            return Err(PipeError::FrameTooLarge {
                len: data.len(),
                max: self.max_message_size,
            });
        }
        let mut inbound = self.inbound.lock().await;
        if self.is_closed() {
            return Err(PipeError::Closed);
        }
        self.outbound.send(data).await.map_err(|_| PipeError::Closed)?;
        if !await_response {
            return Ok(None);
        }
        Ok(self.next_frame(&mut inbound).await)
    }

    async fn receive(&self) -> Result<Option<Vec<u8>>, PipeError> {
        let mut inbound = self.inbound.lock().await;
        Ok(self.next_frame(&mut inbound).await)
    }

    async fn close(&self) {
        self.shared.disconnect(false);
        let writer = self.writer.lock().take();
        if let Some(mut writer) = writer {
            if timeout(CLOSE_GRACE * 2, &mut writer).await.is_err() {
                debug!(peer = %self.shared.info.peer, "pipe writer aborted");
                writer.abort();
            }
        }
    }
}

impl Drop for StreamPipe {
    fn drop(&mut self) {
        self.shared.disconnect(false);
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

async fn read_loop<S>(
    shared: Arc<Shared>,
    mut reader: ReadHalf<S>,
    inbound: mpsc::Sender<Vec<u8>>,
    mut closed: watch::Receiver<bool>,
    max_size: usize,
) where
    S: AsyncRead + Send,
{
    let peer = shared.info.peer.clone();
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader, max_size) => frame,
            _ = wait_closed(&mut closed) => return,
        };
        match frame {
            Ok(Some(frame)) => {
                debug!(%peer, len = frame.len(), "frame received");
                if inbound.send(frame).await.is_err() {
                    return;
                }
            }
            Ok(None) => {
                debug!(%peer, "peer closed connection");
                shared.disconnect(false);
                return;
            }
            Err(err) => {
                warn!(%peer, error = ?err, "pipe read failed");
                shared.disconnect(true);
                return;
            }
        }
    }
}

async fn write_loop<S>(
    shared: Arc<Shared>,
    mut writer: WriteHalf<S>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    mut closed: watch::Receiver<bool>,
    max_size: usize,
) where
    S: AsyncWrite + Send,
{
    let peer = shared.info.peer.clone();
    loop {
        let frame = tokio::select! {
            biased;
            frame = outbound.recv() => frame,
            _ = wait_closed(&mut closed) => None,
        };
        let Some(frame) = frame else {
            break;
        };
        let written = tokio::select! {
            written = write_frame(&mut writer, &frame, max_size) => written,
            _ = grace_after_close(&mut closed) => {
                debug!(%peer, "pipe write abandoned after close");
                return;
            }
        };
        if let Err(err) = written {
            warn!(%peer, error = ?err, "pipe write failed");
            shared.disconnect(true);
            return;
        }
    }
    // Frames handed over before close still go out, within the grace period.
    let drain = async {
        while let Ok(frame) = outbound.try_recv() {
            if write_frame(&mut writer, &frame, max_size).await.is_err() {
                return;
            }
        }
        let _ = writer.shutdown().await;
    };
    if timeout_at(Instant::now() + CLOSE_GRACE, drain).await.is_err() {
        debug!(%peer, "pipe drain timed out");
    }
}

async fn grace_after_close(closed: &mut watch::Receiver<bool>) {
    wait_closed(closed).await;
    sleep(CLOSE_GRACE).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::io::duplex;

    use super::*;
    use crate::catalogue::CatalogueItem;

    fn info(role: PipeRole) -> PipeInfo {
        PipeInfo {
            peer: RemotePeer::new("127.0.0.1:9".parse().expect("addr")),
            role,
            local_catalogue: CatalogueSet::empty().with(CatalogueItem::BoundWitness),
            initiation_data: None,
        }
    }

    fn pair() -> (StreamPipe, StreamPipe) {
        let (a, b) = duplex(4096);
        (
            StreamPipe::spawn(a, info(PipeRole::Initiator), 1024, 8),
            StreamPipe::spawn(b, info(PipeRole::Responder), 1024, 8),
        )
    }

    fn counter() -> (Arc<AtomicUsize>, DisconnectCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let hits = count.clone();
        (
            count,
            Box::new(move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[tokio::test]
    async fn request_and_response() {
        let (client, server) = pair();
        let responder = tokio::spawn(async move {
            let request = server.receive().await.expect("receive").expect("frame");
            assert_eq!(request, b"ping".to_vec());
            server.send(b"pong".to_vec(), false).await.expect("reply");
            server
        });
        let reply = client.send(b"ping".to_vec(), true).await.expect("send");
        assert_eq!(reply, Some(b"pong".to_vec()));
        drop(responder.await.expect("join"));
    }

    #[tokio::test]
    async fn pending_send_resolves_on_close() {
        let (client, _server) = pair();
        let client = Arc::new(client);
        let waiting = {
            let client = client.clone();
            tokio::spawn(async move { client.send(b"hello".to_vec(), true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close().await;
        let outcome = timeout(Duration::from_secs(1), waiting)
            .await
            .expect("send unblocked")
            .expect("join");
        assert_eq!(outcome, Ok(None));
        assert!(client.is_closed());
        assert_eq!(client.send(Vec::new(), false).await, Err(PipeError::Closed));
    }

    #[tokio::test]
    async fn remote_close_fires_callback_once() {
        let (client, server) = pair();
        let (count, callback) = counter();
        client.on_peer_disconnect(callback).detach();

        server.close().await;
        timeout(Duration::from_secs(1), client.receive())
            .await
            .expect("receive unblocked")
            .expect("receive");
        client.close().await;
        client.close().await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn callback_does_not_fire_while_connected() {
        let (client, server) = pair();
        let (count, callback) = counter();
        let _subscription = client.on_peer_disconnect(callback);

        let echo = tokio::spawn(async move {
            let frame = server.receive().await.expect("receive").expect("frame");
            server.send(frame, false).await.expect("echo");
            server
        });
        client.send(vec![1, 2, 3], true).await.expect("round trip");
        assert_eq!(count.load(Ordering::SeqCst), 0);
        let _server = echo.await.expect("join");
    }

    #[tokio::test]
    async fn unsubscribed_callback_never_runs() {
        let (client, _server) = pair();
        let (count, callback) = counter();
        client.on_peer_disconnect(callback).unsubscribe();
        let (dropped, callback) = counter();
        drop(client.on_peer_disconnect(callback));

        client.close().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_reports_no_error_and_late_subscribers_are_told() {
        let (client, _server) = pair();
        let flag = Arc::new(Mutex::new(None));
        let seen = flag.clone();
        client
            .on_peer_disconnect(Box::new(move |has_error| *seen.lock() = Some(has_error)))
            .detach();
        client.close().await;
        assert_eq!(*flag.lock(), Some(false));

        let (late, callback) = counter();
        drop(client.on_peer_disconnect(callback));
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn frames_sent_before_close_are_delivered() {
        let (client, server) = pair();
        client.send(b"last words".to_vec(), false).await.expect("send");
        client.close().await;
        let frame = timeout(Duration::from_secs(1), server.receive())
            .await
            .expect("receive")
            .expect("receive");
        assert_eq!(frame, Some(b"last words".to_vec()));
    }

    #[tokio::test]
    async fn close_returns_when_peer_stops_reading() {
        let (a, _stalled) = duplex(16);
        let client = StreamPipe::spawn(a, info(PipeRole::Initiator), 1024, 8);
        client.send(vec![7u8; 200], false).await.expect("queued");
        client.send(vec![8u8; 200], false).await.expect("queued");
        timeout(Duration::from_secs(2), client.close())
            .await
            .expect("close is bounded");
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn dropped_pipe_releases_stalled_writer() {
        let (a, mut stalled) = duplex(16);
        let client = StreamPipe::spawn(a, info(PipeRole::Initiator), 1024, 8);
        client.send(vec![7u8; 200], false).await.expect("queued");
        drop(client);
        tokio::time::sleep(CLOSE_GRACE * 3).await;
        // Only what fit in the buffer before the writer gave up arrives.
        let mut received = Vec::new();
        timeout(
            Duration::from_secs(1),
            tokio::io::AsyncReadExt::read_to_end(&mut stalled, &mut received),
        )
        .await
        .expect("stream ends")
        .expect("read");
        assert!(received.len() < 204);
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let (client, _server) = pair();
        assert_eq!(
            client.send(vec![0u8; 2048], false).await,
            Err(PipeError::FrameTooLarge { len: 2048, max: 1024 })
        );
    }

    #[tokio::test]
    async fn other_catalogue_is_set_once() {
        let (client, _server) = pair();
        assert_eq!(client.other_catalogue(), None);
        assert!(client.set_other_catalogue(CatalogueSet::from_mask(3)));
        assert!(!client.set_other_catalogue(CatalogueSet::from_mask(1)));
        assert_eq!(client.other_catalogue(), Some(CatalogueSet::from_mask(3)));
        assert_eq!(client.role(), PipeRole::Initiator);
        assert_eq!(client.initiation_data(), None);
    }
}
