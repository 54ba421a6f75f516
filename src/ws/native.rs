//! Native WebSocket connector: `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::ConnectionError;
use crate::ws::transport::{Connector, Frame, FrameSink, FrameStream};

/// Production connector over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ConnectionError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = ws_stream.split();

        let sink = sink
            .sink_map_err(|e| ConnectionError::SendFailed(e.to_string()))
            .with(|frame: Frame| future::ready(Ok::<_, ConnectionError>(to_message(frame))));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_string()))),
                Ok(Message::Close(frame)) => {
                    let (code, reason) = extract_close(frame.as_ref());
                    Some(Ok(Frame::Close { code, reason }))
                }
                // Ping is answered by tungstenite; binary is not part of the protocol.
                Ok(_) => None,
                Err(e) => Some(Err(ConnectionError::ConnectionFailed(e.to_string()))),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

fn to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Close { code, reason } => Message::Close(Some(CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        })),
    }
}

/// Extract close code and reason from an optional CloseFrame.
fn extract_close(frame: Option<&CloseFrame>) -> (u16, String) {
    match frame {
        Some(f) => (f.code.into(), f.reason.to_string()),
        None => (1006, "No close frame".into()),
    }
}
