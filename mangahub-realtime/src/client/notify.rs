//! UDP client for the notification server.

use std::time::Duration;

use mangahub_core::NotificationPayload;
use tokio::net::{ToSocketAddrs, UdpSocket};

use super::ClientError;
use crate::protocol::{REGISTER_TOKEN, UNREGISTER_TOKEN};

const RECV_BUFFER: usize = 4096;

/// A notification endpoint bound to an ephemeral local port and connected
/// to one server.
pub struct NotifyClient {
    socket: UdpSocket,
}

impl NotifyClient {
    pub async fn connect(server: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(server).await?;
        Ok(Self { socket })
    }

    /// Bind a specific local address before connecting.
    pub async fn connect_from(
        local: impl ToSocketAddrs,
        server: impl ToSocketAddrs,
    ) -> Result<Self, ClientError> {
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ClientError> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn register(&self) -> Result<(), ClientError> {
        self.socket.send(REGISTER_TOKEN.as_bytes()).await?;
        Ok(())
    }

    pub async fn unregister(&self) -> Result<(), ClientError> {
        self.socket.send(UNREGISTER_TOKEN.as_bytes()).await?;
        Ok(())
    }

    /// Publish a payload. The server registers this endpoint implicitly.
    pub async fn send_notification(
        &self,
        payload: &NotificationPayload,
    ) -> Result<(), ClientError> {
        let body = serde_json::to_vec(payload)?;
        self.socket.send(&body).await?;
        Ok(())
    }

    /// Receive one datagram: a broadcast payload or a confirmation.
    pub async fn recv(&self) -> Result<NotificationPayload, ClientError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        let len = self.socket.recv(&mut buf).await?;
        Ok(serde_json::from_slice(&buf[..len])?)
    }

    /// Like [`recv`](Self::recv), giving up with `Ok(None)` after `timeout`.
    pub async fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<Option<NotificationPayload>, ClientError> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(received) => received.map(Some),
            Err(_) => Ok(None),
        }
    }
}
