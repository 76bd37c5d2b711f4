use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, trace};

use super::{ConnectionError, RpcClient};
use crate::config::Config;

/// Open a WebSocket connection to `config.url` and run an [RpcClient] on it.
///
/// Fails with [ConnectionError::HandshakeTimeout] if the node does not
/// complete the handshake within `config.handshake_timeout`.
pub async fn connect(config: &Config) -> Result<RpcClient, ConnectionError> {
    debug!(url = %config.url, "connecting");
    let (ws, _) = tokio::time::timeout(config.handshake_timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout(config.handshake_timeout))?
        .map_err(|e| ConnectionError::Transport(e.to_string()))?;
    debug!(url = %config.url, "connected");

    let (sink, stream) = ws.split();
    let sink = sink.with(|text: String| future::ready(Ok::<_, WsError>(WsMessage::Text(text.into()))));
    // Control frames are handled by tungstenite, binary frames are not part
    // of the protocol.
    let stream = stream.filter_map(|frame| {
        future::ready(match frame {
            Ok(WsMessage::Text(text)) => Some(Ok(text.as_str().to_owned())),
            Ok(other) => {
                trace!(?other, "ignoring non-text frame");
                None
            }
            Err(e) => Some(Err(e)),
        })
    });

    Ok(RpcClient::from_parts(sink, stream, config))
}

impl RpcClient {
    /// See [connect].
    pub async fn connect(config: &Config) -> Result<RpcClient, ConnectionError> {
        connect(config).await
    }
}
