//! WebSocket accept loop. Every connection becomes a hub subscriber; inbound
//! client messages are read and discarded.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::hub::BroadcastHub;

pub async fn bind(listen_addr: &str) -> Result<TcpListener> {
    let bind_addr: SocketAddr = listen_addr.parse().context("invalid listen_addr")?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!("Listening on ws://{}", listener.local_addr()?);
    Ok(listener)
}

/// Accept until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, hub: BroadcastHub, shutdown: CancellationToken) -> Result<()> {
    loop {
        let (stream, addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("accept failed: {}", e);
                    continue;
                }
            },
        };

        let hub = hub.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, hub, shutdown).await {
                tracing::debug!(%addr, "connection ended: {:#}", e);
            }
        });
    }
    tracing::info!("server stopped accepting connections");
    Ok(())
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    hub: BroadcastHub,
    shutdown: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(%addr, "websocket handshake failed: {}", e);
            return Ok(());
        }
    };

    let (sink, mut reader) = ws.split();
    let id = hub.register(sink, Some(addr));

    let result = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            msg = reader.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e).context("websocket read failed"),
            },
        }
    };

    hub.unregister(id);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_bind_rejects_bad_addr() {
        assert!(bind("not-an-address").await.is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let token = CancellationToken::new();
        let hub = BroadcastHub::new(4, Duration::from_millis(100), token.clone());
        let task = tokio::spawn(serve(listener, hub, token.clone()));
        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("serve did not stop")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_client_registers_and_unregisters() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let hub = BroadcastHub::new(4, Duration::from_millis(100), token.clone());
        tokio::spawn(serve(listener, hub.clone(), token.clone()));

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}")).await.unwrap();
        for _ in 0..200 {
            if hub.client_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.client_count(), 1);

        drop(ws);
        for _ in 0..200 {
            if hub.client_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(hub.client_count(), 0);
        token.cancel();
    }
}
