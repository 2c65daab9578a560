//! Connection Handler
//!
//! One handler runs per accepted socket. It owns two tasks:
//!
//! - the read loop (this task), which decodes requests and dispatches them to
//!   the registry and channel actors
//! - a writer task, which drains the connection's private listener queue to
//!   the socket
//!
//! A connection holds at most one Listen subscription. Every new request
//! first forgets the previous one, so a connection is either a sender or a
//! listener of a single channel at any moment.
//!
//! Teardown always runs in the same order, whatever ended the read loop
//! (including a registry shutdown): forget the subscription, stop the
//! writer, shut the socket down.
//!
//! Generic over the I/O type so tests can drive it with
//! `tokio::io::duplex()` instead of a TCP socket.

use std::sync::Arc;
use std::time::SystemTime;

use spectrum_protocol::{read_request_async, Request, RequestType};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::channel::{listener_sink, ListenerSink, ListenerStream, SubscriptionKey};
use crate::error::SimError;
use crate::events::ErrorSink;
use crate::registry::ChannelRegistry;

/// A client connection to the simulator
pub struct Connection<S> {
    id: u64,
    peer: String,
    stream: S,
    registry: Arc<ChannelRegistry>,
    errors: ErrorSink,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Create a handler for `stream`
    ///
    /// `id` must be unique for the process lifetime; it names the
    /// connection's subscription key.
    pub fn new(
        id: u64,
        peer: impl Into<String>,
        stream: S,
        registry: Arc<ChannelRegistry>,
        errors: ErrorSink,
    ) -> Self {
        Self {
            id,
            peer: peer.into(),
            stream,
            registry,
            errors,
        }
    }

    /// Serve the connection until the client leaves or misbehaves
    pub async fn run(self) {
        let source = format!("connection {} ({})", self.id, self.peer);
        info!(connection = self.id, peer = %self.peer, "Connection opened");

        let (mut reader, writer) = tokio::io::split(self.stream);
        let (sink, frames) = listener_sink();
        let (close_tx, close_rx) = oneshot::channel();
        let mut writer_task = tokio::spawn(run_writer(
            writer,
            frames,
            close_rx,
            self.errors.clone(),
            source.clone(),
        ));

        let mut shutdown = self.registry.shutdown_signal();
        let mut subscription = Subscription {
            registry: self.registry,
            key: SubscriptionKey::for_connection(self.id),
            sink,
            current: None,
        };

        let mut stopped_writer = None;
        loop {
            tokio::select! {
                result = read_request_async(&mut reader) => {
                    let request = match result {
                        Ok(request) => request,
                        Err(e) if e.is_disconnect() => {
                            debug!(connection = self.id, "Client closed connection");
                            break;
                        }
                        Err(e) => {
                            self.errors.report(source.as_str(), e);
                            break;
                        }
                    };
                    if let Err(e) = subscription.dispatch(request) {
                        self.errors.report(source.as_str(), e);
                        break;
                    }
                }
                joined = &mut writer_task => {
                    debug!(connection = self.id, "Writer stopped");
                    stopped_writer = Some(joined);
                    break;
                }
                _ = shutdown.wait_for(|stopped| *stopped) => {
                    debug!(connection = self.id, "Server shutting down");
                    break;
                }
            }
        }

        subscription.forget();

        let writer = match stopped_writer {
            Some(joined) => joined,
            None => {
                let _ = close_tx.send(());
                writer_task.await
            }
        };
        if let Ok(mut writer) = writer {
            let _ = writer.shutdown().await;
        }

        info!(connection = self.id, peer = %self.peer, "Connection closed");
    }
}

/// Per-connection subscription state
struct Subscription {
    registry: Arc<ChannelRegistry>,
    key: SubscriptionKey,
    sink: ListenerSink,
    current: Option<u32>,
}

impl Subscription {
    /// Apply one request; an error terminates the connection
    fn dispatch(&mut self, request: Request) -> Result<(), SimError> {
        match request.request_type {
            RequestType::Listen => self.listen(request.channel),
            RequestType::Send => {
                self.send(request.channel, request.data);
                Ok(())
            }
            RequestType::Unknown(tag) => Err(SimError::UnknownRequestType(tag)),
        }
    }

    fn listen(&mut self, channel: u32) -> Result<(), SimError> {
        self.forget();

        let Some(handle) = self.registry.acquire(channel, true) else {
            return Ok(());
        };
        self.current = Some(channel);
        handle.register(self.key.clone(), self.sink.clone())?;

        debug!(channel, key = %self.key, "Listening");
        Ok(())
    }

    fn send(&mut self, channel: u32, data: Vec<u8>) {
        self.forget();

        let Some(handle) = self.registry.acquire(channel, false) else {
            debug!(channel, len = data.len(), "No listeners, payload dropped");
            return;
        };
        match handle.broadcast(data, SystemTime::now()) {
            Ok(()) => {}
            Err(SimError::ChannelBusy(_)) => {
                debug!(channel, "Channel busy, payload dropped");
            }
            // The last listener may have left since the lookup
            Err(_) => debug!(channel, "Channel closed, payload dropped"),
        }
    }

    /// Release the current Listen subscription, if any
    fn forget(&mut self) {
        if let Some(channel) = self.current.take() {
            self.registry.release(channel, &self.key);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.forget();
    }
}

/// Drain `frames` to `writer` until told to close or a write fails
///
/// Hands the write half back so the caller can shut the socket down.
async fn run_writer<S>(
    mut writer: WriteHalf<S>,
    mut frames: ListenerStream,
    mut close: oneshot::Receiver<()>,
    errors: ErrorSink,
    source: String,
) -> WriteHalf<S>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                let result = async {
                    writer.write_all(&frame).await?;
                    writer.flush().await
                }
                .await;
                if let Err(e) = result {
                    errors.report(source.as_str(), e);
                    break;
                }
            }
            _ = &mut close => break,
        }
    }
    writer
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use spectrum_protocol::{read_response_async, Response};
    use tokio::io::{AsyncReadExt, DuplexStream};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::events::ErrorReceiver;

    struct Harness {
        registry: Arc<ChannelRegistry>,
        errors: ErrorSink,
        error_rx: ErrorReceiver,
        next_id: u64,
    }

    impl Harness {
        fn new() -> Self {
            let (errors, error_rx) = ErrorSink::channel();
            Self {
                registry: Arc::new(ChannelRegistry::new(errors.clone())),
                errors,
                error_rx,
                next_id: 1,
            }
        }

        fn connect(&mut self) -> (DuplexStream, JoinHandle<()>) {
            let (client, server) = tokio::io::duplex(1024);
            let conn = Connection::new(
                self.next_id,
                "test",
                server,
                Arc::clone(&self.registry),
                self.errors.clone(),
            );
            self.next_id += 1;
            (client, tokio::spawn(conn.run()))
        }
    }

    async fn write(client: &mut DuplexStream, request: Request) {
        client
            .write_all(&request.encode().unwrap())
            .await
            .unwrap();
    }

    /// Wait until the registry reports `refs` listeners on `channel`
    async fn wait_for_refs(registry: &ChannelRegistry, channel: u32, refs: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while registry.listener_refs(channel) != refs {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    /// Wait until the channel actor has processed the listener's Register
    async fn wait_for_listeners(registry: &ChannelRegistry, channel: u32, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(handle) = registry.acquire(channel, false) {
                    if handle.listener_count().await == Some(count) {
                        return;
                    }
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_listen_then_send_delivers() {
        let mut h = Harness::new();
        let (mut listener, _l) = h.connect();
        let (mut sender, _s) = h.connect();

        write(&mut listener, Request::listen(37)).await;
        wait_for_listeners(&h.registry, 37, 1).await;

        let before = SystemTime::now();
        write(&mut sender, Request::send(37, b"foo".to_vec())).await;

        let resp = read_response_async(&mut listener).await.unwrap();
        assert_eq!(resp.channel, 37);
        assert_eq!(resp.data, b"foo");
        assert!(resp.timestamp >= before);
        assert!(resp.timestamp <= SystemTime::now());
        assert!(h.error_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_without_listeners_is_dropped() {
        let mut h = Harness::new();
        let (mut sender, task) = h.connect();

        write(&mut sender, Request::send(38, b"void".to_vec())).await;
        drop(sender);
        task.await.unwrap();

        assert_eq!(h.registry.channel_count(), 0);
        assert!(h.error_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let mut h = Harness::new();
        let (mut a, task_a) = h.connect();
        let (mut b, task_b) = h.connect();

        write(&mut a, Request::listen(5)).await;
        write(&mut b, Request::listen(5)).await;
        wait_for_refs(&h.registry, 5, 2).await;

        drop(a);
        task_a.await.unwrap();
        assert_eq!(h.registry.listener_refs(5), 1);

        drop(b);
        task_b.await.unwrap();
        assert_eq!(h.registry.channel_count(), 0);
        assert!(h.registry.acquire(5, false).is_none());
    }

    #[tokio::test]
    async fn test_new_request_forgets_previous_channel() {
        let mut h = Harness::new();
        let (mut client, _task) = h.connect();

        write(&mut client, Request::listen(1)).await;
        wait_for_refs(&h.registry, 1, 1).await;

        write(&mut client, Request::listen(2)).await;
        wait_for_refs(&h.registry, 2, 1).await;
        assert_eq!(h.registry.listener_refs(1), 0);

        // A Send also ends the Listen role
        write(&mut client, Request::send(2, b"x".to_vec())).await;
        wait_for_refs(&h.registry, 2, 0).await;
        assert_eq!(h.registry.channel_count(), 0);
    }

    #[tokio::test]
    async fn test_sender_does_not_hear_itself_after_switching() {
        let mut h = Harness::new();
        let (mut listener, _l) = h.connect();
        let (mut switcher, _s) = h.connect();

        write(&mut listener, Request::listen(9)).await;
        write(&mut switcher, Request::listen(9)).await;
        wait_for_listeners(&h.registry, 9, 2).await;

        write(&mut switcher, Request::send(9, b"hi".to_vec())).await;
        let resp = read_response_async(&mut listener).await.unwrap();
        assert_eq!(resp.data, b"hi");

        // The switcher left channel 9 before broadcasting
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_millis(50), switcher.read(&mut buf)).await;
        assert!(read.is_err(), "switcher should not receive its own payload");
    }

    #[tokio::test]
    async fn test_framing_error_terminates_connection() {
        let mut h = Harness::new();
        let (mut client, task) = h.connect();

        write(&mut client, Request::listen(3)).await;
        wait_for_refs(&h.registry, 3, 1).await;

        // Size prefix of 200 is over the limit
        client.write_all(&[200, 0, 0, 0]).await.unwrap();
        task.await.unwrap();

        assert_eq!(h.registry.channel_count(), 0);
        let report = h.error_rx.recv().await.unwrap();
        assert!(report.source.starts_with("connection 1"));
        assert!(matches!(report.error, SimError::Framing(_)));

        // Socket was shut down
        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_request_type_terminates_connection() {
        let mut h = Harness::new();
        let (mut client, task) = h.connect();

        client
            .write_all(&[8, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0])
            .await
            .unwrap();
        task.await.unwrap();

        let report = h.error_rx.recv().await.unwrap();
        assert!(matches!(report.error, SimError::UnknownRequestType(2)));
    }

    #[tokio::test]
    async fn test_truncated_body_terminates_connection() {
        let mut h = Harness::new();
        let (mut client, task) = h.connect();

        client.write_all(&[20, 0, 0, 0, 0, 0]).await.unwrap();
        drop(client);
        task.await.unwrap();

        let report = h.error_rx.recv().await.unwrap();
        assert!(matches!(
            report.error,
            SimError::Framing(spectrum_protocol::FramingError::TruncatedBody { size: 20, .. })
        ));
    }

    #[tokio::test]
    async fn test_close_mid_prefix_is_reported() {
        let mut h = Harness::new();
        let (mut client, task) = h.connect();

        client.write_all(&[9, 0]).await.unwrap();
        drop(client);
        task.await.unwrap();

        let report = h.error_rx.recv().await.unwrap();
        assert!(matches!(
            report.error,
            SimError::Framing(spectrum_protocol::FramingError::TruncatedPrefix { read: 2 })
        ));
    }

    #[tokio::test]
    async fn test_clean_close_is_not_reported() {
        let mut h = Harness::new();
        let (mut client, task) = h.connect();

        write(&mut client, Request::listen(6)).await;
        drop(client);
        task.await.unwrap();

        assert_eq!(h.registry.channel_count(), 0);
        assert!(h.error_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registry_shutdown_closes_connection() {
        let mut h = Harness::new();
        let (mut client, task) = h.connect();

        write(&mut client, Request::listen(4)).await;
        wait_for_refs(&h.registry, 4, 1).await;

        h.registry.shutdown();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(h.registry.channel_count(), 0);
        let mut buf = Vec::new();
        assert_eq!(client.read_to_end(&mut buf).await.unwrap(), 0);

        // Connections opened afterwards close straight away
        let (mut late, late_task) = h.connect();
        late_task.await.unwrap();
        assert_eq!(late.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_responses_roundtrip_through_writer() {
        let mut h = Harness::new();
        let (mut listener, _l) = h.connect();
        let (mut sender, _s) = h.connect();

        write(&mut listener, Request::listen(100)).await;
        wait_for_listeners(&h.registry, 100, 1).await;

        for payload in [&b"one"[..], b"two", b""] {
            write(&mut sender, Request::send(100, payload.to_vec())).await;
            let resp: Response = read_response_async(&mut listener).await.unwrap();
            assert_eq!(resp.channel, 100);
            assert_eq!(resp.data, payload);
        }
    }
}
