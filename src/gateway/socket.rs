//! WebSocket transport shared by the main and voice gateways: JSON
//! payloads, with per-connection zlib-stream inflation on the main one.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::trace;

use crate::codec::zlib::StreamInflator;
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// The reading half of a gateway connection.
pub struct JsonReader {
    stream: SplitStream<WsStream>,
    inflator: Option<StreamInflator>,
}

/// The writing half of a gateway connection.
pub struct JsonWriter {
    sink: SplitSink<WsStream, WsMessage>,
}

/// Open a websocket and split it. `compressed` enables the zlib-stream
/// inflator; the inflator context is fresh, as required on any non-resume
/// handshake.
pub async fn connect(url: &str, compressed: bool) -> Result<(JsonReader, JsonWriter)> {
    trace!(url, "opening websocket");
    let (stream, _response) = connect_async(url).await?;
    let (sink, stream) = stream.split();
    Ok((
        JsonReader {
            stream,
            inflator: compressed.then(StreamInflator::new),
        },
        JsonWriter { sink },
    ))
}

impl JsonReader {
    /// Receive the next JSON payload.
    ///
    /// Multi-chunk compressed frames are reassembled internally; close
    /// frames surface as [`Error::Closed`] with the close code.
    pub async fn recv(&mut self) -> Result<Value> {
        loop {
            let message = match self.stream.next().await {
                Some(message) => message?,
                None => return Err(Error::Closed(None, "stream ended".to_owned())),
            };
            match message {
                WsMessage::Text(text) => return Ok(serde_json::from_str(&text)?),
                WsMessage::Binary(binary) => match &mut self.inflator {
                    Some(inflator) => {
                        if let Some(frame) = inflator.push(&binary)? {
                            return Ok(serde_json::from_slice(&frame)?);
                        }
                        // partial frame, keep reading
                    }
                    None => return Ok(serde_json::from_slice(&binary)?),
                },
                WsMessage::Close(close) => {
                    let (code, reason) = close
                        .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                        .unzip();
                    return Err(Error::Closed(code, reason.unwrap_or_default()));
                }
                WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => {}
            }
        }
    }
}

impl JsonWriter {
    pub async fn send(&mut self, value: &Value) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.sink.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    pub async fn send_command(&mut self, command: &impl serde::Serialize) -> Result<()> {
        let value = serde_json::to_value(command)?;
        self.send(&value).await
    }

    pub async fn close(&mut self) {
        let _ = self.sink.send(WsMessage::Close(None)).await;
        let _ = self.sink.close().await;
    }
}
