//! WebSocket signaling client for E2E tests
//!
//! Wraps a `tokio-tungstenite` connection and speaks the JSON text-frame
//! event contract. Control frames (ping/pong) are skipped transparently.

use crate::server_harness::TestCcServer;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Default wait for an expected event.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected signaling client.
pub struct TestWsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestWsClient {
    /// Connect with `Authorization: Bearer <token>`.
    pub async fn connect(server: &TestCcServer, token: &str) -> Result<Self, anyhow::Error> {
        let mut request = server.ws_url().into_client_request()?;
        request
            .headers_mut()
            .insert("authorization", HeaderValue::from_str(&format!("Bearer {token}"))?);

        let (stream, _response) = connect_async(request).await?;
        Ok(Self { stream })
    }

    /// Connect with the token in the `?token=` query parameter.
    pub async fn connect_with_query_token(
        server: &TestCcServer,
        token: &str,
    ) -> Result<Self, anyhow::Error> {
        let url = format!("{}?token={token}", server.ws_url());
        let (stream, _response) = connect_async(url).await?;
        Ok(Self { stream })
    }

    /// Attempt a handshake with an optional bearer token and return the HTTP
    /// status the server rejected it with, or `None` if it was accepted.
    pub async fn rejected_status(
        server: &TestCcServer,
        token: Option<&str>,
    ) -> Result<Option<StatusCode>, anyhow::Error> {
        let mut request = server.ws_url().into_client_request()?;
        if let Some(token) = token {
            request
                .headers_mut()
                .insert("authorization", HeaderValue::from_str(&format!("Bearer {token}"))?);
        }

        match connect_async(request).await {
            Ok(_) => Ok(None),
            Err(WsError::Http(response)) => Ok(Some(response.status())),
            Err(e) => Err(e.into()),
        }
    }

    /// Send a JSON event.
    pub async fn send_json(&mut self, event: &Value) -> Result<(), anyhow::Error> {
        self.send_text(&event.to_string()).await
    }

    /// Send a raw text frame.
    pub async fn send_text(&mut self, text: &str) -> Result<(), anyhow::Error> {
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Convenience: send a `join` for `room_token`.
    pub async fn join(&mut self, room_token: &str) -> Result<(), anyhow::Error> {
        self.send_json(&serde_json::json!({"type": "join", "room_token": room_token}))
            .await
    }

    /// Wait for the next event, failing after [`DEFAULT_EVENT_TIMEOUT`].
    pub async fn next_event(&mut self) -> Result<Value, anyhow::Error> {
        self.next_event_within(DEFAULT_EVENT_TIMEOUT).await
    }

    /// Wait for the next event of a given `type`, skipping others.
    pub async fn next_event_of_type(&mut self, event_type: &str) -> Result<Value, anyhow::Error> {
        loop {
            let event = self.next_event().await?;
            if event["type"] == event_type {
                return Ok(event);
            }
        }
    }

    /// Wait up to `timeout` for the next event.
    pub async fn next_event_within(&mut self, timeout: Duration) -> Result<Value, anyhow::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for event"))?;

            match frame {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Binary(_))) => anyhow::bail!("Unexpected binary frame"),
                Some(Ok(Message::Close(_))) | None => anyhow::bail!("Connection closed"),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    /// Assert that no event arrives within `window`.
    pub async fn assert_no_event(&mut self, window: Duration) {
        if let Ok(event) = self.next_event_within(window).await {
            panic!("Expected no event, got {event}");
        }
    }

    /// Wait until the server closes the connection.
    pub async fn wait_closed(&mut self, timeout: Duration) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let frame = tokio::time::timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| anyhow::anyhow!("Timed out waiting for close"))?;
            match frame {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return Ok(()),
                Some(Ok(_)) => continue,
            }
        }
    }

    /// Close the connection from the client side.
    pub async fn close(mut self) -> Result<(), anyhow::Error> {
        self.stream.close(None).await?;
        Ok(())
    }
}
