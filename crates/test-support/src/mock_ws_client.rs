use futures_util::{SinkExt, StreamExt};
use ingest_protocol::{ClientFrame, CommandFrame, DashboardFrame};
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::tungstenite::protocol::Message;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// A bare WebSocket client used by integration tests to play the part of a
/// device or a dashboard against a running gateway.
pub struct MockWsClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl MockWsClient {
    pub async fn connect(url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(url).await?;
        let (write, read) = ws_stream.split();
        Ok(Self { write, read })
    }

    pub async fn send_client_frame(
        &mut self,
        frame: &ClientFrame,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.send_json(frame).await
    }

    pub async fn send_json<T: serde::Serialize>(
        &mut self,
        value: &T,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string(value)?;
        self.write.send(Message::Text(json.into())).await?;
        Ok(())
    }

    /// Receive the next text frame as a `DashboardFrame`, skipping pings/pongs.
    pub async fn recv_dashboard_frame(
        &mut self,
    ) -> Result<DashboardFrame, Box<dyn std::error::Error>> {
        let text = self.recv_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Receive the next text frame as a `CommandFrame` (`["/event", data]`).
    pub async fn recv_command_frame(
        &mut self,
    ) -> Result<CommandFrame, Box<dyn std::error::Error>> {
        let text = self.recv_text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    pub async fn recv_text(&mut self) -> Result<String, Box<dyn std::error::Error>> {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) => return Err("connection closed by server".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => return Err("connection stream ended".into()),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.write.send(Message::Close(None)).await?;
        Ok(())
    }
}
