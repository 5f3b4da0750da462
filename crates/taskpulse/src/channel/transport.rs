//! WebSocket transport: endpoint derivation and the raw connection.

use futures::StreamExt;
use futures::stream::{SplitSink, SplitStream};
use log::debug;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::error::{ChannelError, ChannelResult};

/// Path suffix of the job-tracking channel on the server.
pub const CHANNEL_PATH: &str = "/ws/tasks/";

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub(crate) type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsReader = SplitStream<WsStream>;

/// Connection lifecycle state, set only by the connection driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Build the channel URL from the server's HTTP origin.
///
/// The socket scheme mirrors the origin scheme: `https` origins get `wss`,
/// `http` origins get `ws`.
pub fn endpoint_url(origin: &str, path: &str) -> ChannelResult<String> {
    let base = origin.trim_end_matches('/');
    let ws_base = if base.starts_with("https://") {
        base.replacen("https://", "wss://", 1)
    } else if base.starts_with("http://") {
        base.replacen("http://", "ws://", 1)
    } else {
        return Err(ChannelError::InvalidOrigin(origin.to_string()));
    };

    if path.starts_with('/') {
        Ok(format!("{ws_base}{path}"))
    } else {
        Ok(format!("{ws_base}/{path}"))
    }
}

/// Open one connection and split it into sink and reader halves.
pub(crate) async fn open(url: &str) -> ChannelResult<(WsSink, WsReader)> {
    debug!("opening task channel at {url}");
    let (stream, _) = connect_async(url).await?;
    Ok(stream.split())
}
