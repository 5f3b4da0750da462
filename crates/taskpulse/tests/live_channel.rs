//! End-to-end channel tests against a loopback WebSocket server.
//!
//! Each test stands up a real listener on an ephemeral port and drives the
//! channel with shortened delays so reconnect and retention behavior can be
//! observed in real time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::error::UrlError;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::{accept_async, connect_async};

use taskpulse::channel::endpoint_url;
use taskpulse::{
    ChannelConfig, ConnectionState, Notice, Notifier, Severity, TaskChannel, TaskStatus,
};

#[derive(Clone, Default)]
struct RecordingNotifier {
    notices: Arc<Mutex<Vec<Notice>>>,
}

impl RecordingNotifier {
    fn snapshot(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }

    fn count(&self, severity: Severity) -> usize {
        self.snapshot()
            .iter()
            .filter(|n| n.severity == severity)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: Notice) {
        self.notices.lock().unwrap().push(notice);
    }
}

fn test_config(addr: SocketAddr) -> ChannelConfig {
    ChannelConfig {
        origin: format!("http://{addr}"),
        reconnect_delay: Duration::from_millis(100),
        completed_retention: Duration::from_millis(200),
        failed_retention: Duration::from_millis(400),
        ..ChannelConfig::default()
    }
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Poll `predicate` until it holds, failing the test after five seconds.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !predicate() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Test that connecting reports the connected state and notifies exactly once.
#[tokio::test]
async fn test_connect_notifies_and_reports_connected() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while ws.next().await.is_some() {}
    });

    let notifier = RecordingNotifier::default();
    let channel = TaskChannel::new(test_config(addr), Arc::new(notifier.clone())).unwrap();
    channel.connect();

    wait_until(|| channel.is_connected()).await;
    assert_eq!(channel.connection_state(), ConnectionState::Connected);
    assert_eq!(notifier.count(Severity::Info), 1);

    channel.shutdown().await;
    assert_eq!(channel.connection_state(), ConnectionState::Disconnected);
}

/// Test that calling connect twice does not open a second socket.
#[tokio::test]
async fn test_connect_is_idempotent_while_active() {
    let (listener, addr) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_srv = accepts.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepts_srv.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                while ws.next().await.is_some() {}
            });
        }
    });

    let channel =
        TaskChannel::new(test_config(addr), Arc::new(RecordingNotifier::default())).unwrap();
    channel.connect();
    wait_until(|| channel.is_connected()).await;
    channel.connect();
    channel.connect();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1);
    channel.shutdown().await;
}

/// Test that server frames build records and history, and that a
/// subscription command reaches the server verbatim.
#[tokio::test]
async fn test_round_trip_with_subscription() {
    let (listener, addr) = bind().await;
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(8);
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::text(
            r#"{"type":"task_started","task_id":"t1","message":"Crunching"}"#,
        ))
        .await
        .unwrap();
        ws.send(Message::text(
            r#"{"type":"task_progress","task_id":"t1","progress":60}"#,
        ))
        .await
        .unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let _ = frame_tx.send(text.to_string()).await;
            }
        }
    });

    let channel =
        TaskChannel::new(test_config(addr), Arc::new(RecordingNotifier::default())).unwrap();
    channel.connect();

    wait_until(|| channel.task("t1").is_some_and(|r| r.progress == 60)).await;
    let record = channel.task("t1").unwrap();
    assert_eq!(record.status, TaskStatus::Running);
    assert_eq!(record.message, "Crunching");
    assert_eq!(channel.running_count(), 1);
    assert!(channel.has_active_tasks());
    assert_eq!(channel.task_history().len(), 2);

    channel.subscribe_task("t1");
    let frame = tokio::time::timeout(Duration::from_secs(5), frame_rx.recv())
        .await
        .expect("no command within timeout")
        .expect("server hung up");
    assert_eq!(frame, r#"{"type":"subscribe_task","task_id":"t1"}"#);

    channel.unsubscribe_task("t1");
    let frame = tokio::time::timeout(Duration::from_secs(5), frame_rx.recv())
        .await
        .expect("no command within timeout")
        .expect("server hung up");
    assert_eq!(frame, r#"{"type":"unsubscribe_task","task_id":"t1"}"#);

    channel.shutdown().await;
}

/// Test that a completed record expires after its retention window.
#[tokio::test]
async fn test_completed_record_expires() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::text(
            r#"{"type":"task_started","task_id":"t1"}"#,
        ))
        .await
        .unwrap();
        ws.send(Message::text(
            r#"{"type":"task_completed","task_id":"t1","message":"Done"}"#,
        ))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let notifier = RecordingNotifier::default();
    let channel = TaskChannel::new(test_config(addr), Arc::new(notifier.clone())).unwrap();
    channel.connect();

    wait_until(|| {
        channel
            .task("t1")
            .is_some_and(|r| r.status == TaskStatus::Completed)
    })
    .await;
    assert_eq!(channel.task("t1").unwrap().progress, 100);
    assert_eq!(notifier.count(Severity::Success), 1);

    // Retention in this config is 200ms.
    wait_until(|| channel.task("t1").is_none()).await;
    assert_eq!(channel.task_history().len(), 2, "history must outlive the record");

    channel.shutdown().await;
}

/// Test that a frame that is not JSON neither breaks the stream nor leaves
/// any trace in history.
#[tokio::test]
async fn test_garbage_frame_does_not_break_the_stream() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        ws.send(Message::text("garbage{{not json")).await.unwrap();
        ws.send(Message::text(
            r#"{"type":"task_started","task_id":"t1"}"#,
        ))
        .await
        .unwrap();
        while ws.next().await.is_some() {}
    });

    let channel =
        TaskChannel::new(test_config(addr), Arc::new(RecordingNotifier::default())).unwrap();
    channel.connect();

    wait_until(|| channel.task("t1").is_some()).await;
    assert!(channel.is_connected());
    assert_eq!(channel.task_history().len(), 1);

    channel.shutdown().await;
}

/// Test that an unrequested close triggers exactly one reconnect after the
/// configured delay, with a fresh connected notice.
#[tokio::test]
async fn test_reconnects_once_after_server_close() {
    let (listener, addr) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_srv = accepts.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            let n = accepts_srv.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                if n == 1 {
                    // Server sheds the first connection with an explicit
                    // close frame, the shape a restarting backend sends.
                    let _ = ws
                        .close(Some(CloseFrame {
                            code: CloseCode::Restart,
                            reason: Utf8Bytes::from_static("shedding load"),
                        }))
                        .await;
                } else {
                    while ws.next().await.is_some() {}
                }
            });
        }
    });

    let notifier = RecordingNotifier::default();
    let channel = TaskChannel::new(test_config(addr), Arc::new(notifier.clone())).unwrap();
    channel.connect();

    wait_until(|| accepts.load(Ordering::SeqCst) >= 2).await;
    wait_until(|| channel.is_connected()).await;

    // Several delay periods with a healthy connection: no further dials.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 2);
    assert_eq!(notifier.count(Severity::Info), 2);

    channel.shutdown().await;
}

/// Test that disconnect before the retry timer fires suppresses the
/// reconnect entirely.
#[tokio::test]
async fn test_disconnect_suppresses_pending_reconnect() {
    let (listener, addr) = bind().await;
    let accepts = Arc::new(AtomicUsize::new(0));
    let accepts_srv = accepts.clone();
    tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.unwrap();
            accepts_srv.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut ws = accept_async(stream).await.unwrap();
                let _ = ws.close(None).await;
            });
        }
    });

    let config = ChannelConfig {
        reconnect_delay: Duration::from_millis(300),
        ..test_config(addr)
    };
    let notifier = RecordingNotifier::default();
    let channel = TaskChannel::new(config, Arc::new(notifier.clone())).unwrap();
    channel.connect();

    // One successful connect, then the server-side close has been processed
    // and the driver is waiting out the retry delay.
    wait_until(|| notifier.count(Severity::Info) >= 1 && !channel.is_connected()).await;
    channel.disconnect();
    assert_eq!(channel.connection_state(), ConnectionState::Disconnected);

    // The retry delay is 300ms; wait well past it.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(accepts.load(Ordering::SeqCst), 1);

    channel.shutdown().await;
}

/// Test that a connection failure surfaces an error notice and keeps the
/// channel retrying until disconnect.
#[tokio::test]
async fn test_connect_failure_surfaces_error() {
    let (listener, addr) = bind().await;
    drop(listener);

    let notifier = RecordingNotifier::default();
    let channel = TaskChannel::new(test_config(addr), Arc::new(notifier.clone())).unwrap();
    channel.connect();

    wait_until(|| notifier.count(Severity::Error) >= 1).await;
    assert!(!channel.is_connected());

    channel.shutdown().await;
    assert_eq!(channel.connection_state(), ConnectionState::Disconnected);
}

/// Test that the wss endpoint derived from an https origin makes it to the
/// wire. The peer here is plain TCP and hangs up at once, so the dial must
/// fail, but never because the build lacks secure transport.
#[tokio::test]
async fn test_secure_origin_dials_over_tls() {
    let (listener, addr) = bind().await;
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });

    let url = endpoint_url(&format!("https://{addr}"), "/ws/tasks/").unwrap();
    assert!(url.starts_with("wss://"));

    let err = tokio::time::timeout(Duration::from_secs(5), connect_async(url.as_str()))
        .await
        .expect("dial against a closed peer should resolve promptly")
        .expect_err("plain TCP peer cannot complete a TLS handshake");
    assert!(
        !matches!(err, WsError::Url(UrlError::TlsFeatureNotEnabled)),
        "secure dial was rejected before reaching the wire: {err}"
    );
}
