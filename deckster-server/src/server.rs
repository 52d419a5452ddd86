use crate::router::{self, AppContext};
use bytes::Bytes;
use deckster_core::ipc::{DecksterRequest, DecksterResponse};
use futures::{SinkExt, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub async fn run_unix_server(
    socket_path: &str,
    ctx: Arc<AppContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC Server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    serve_connection(read, write, &ctx).await;
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

/// Frames are a 4-byte little-endian length prefix followed by MessagePack.
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder().little_endian().new_codec()
}

/// Answer framed requests on one connection until the peer hangs up.
pub async fn serve_connection<R, W>(read: R, write: W, ctx: &AppContext)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut framed_read = FramedRead::new(read, frame_codec());
    let mut framed_write = FramedWrite::new(write, frame_codec());

    while let Some(frame) = framed_read.next().await {
        let bytes_mut = match frame {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Frame error: {}", e);
                break;
            }
        };

        let response = match rmp_serde::from_slice::<DecksterRequest>(&bytes_mut) {
            Ok(request) => router::handle_request(request, ctx).await,
            Err(e) => DecksterResponse::err(format!("Deserialization error: {}", e)),
        };

        match rmp_serde::to_vec_named(&response) {
            Ok(resp_bytes) => {
                if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                    tracing::error!("Failed to send response: {}", e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Failed to serialize response: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::tests::memory_context;
    use crate::testing::MockProvider;

    async fn round_trip(
        client: &mut (FramedRead<tokio::io::ReadHalf<tokio::io::DuplexStream>, LengthDelimitedCodec>,
                      FramedWrite<tokio::io::WriteHalf<tokio::io::DuplexStream>, LengthDelimitedCodec>),
        payload: Vec<u8>,
    ) -> DecksterResponse {
        client.1.send(Bytes::from(payload)).await.unwrap();
        let frame = client.0.next().await.unwrap().unwrap();
        rmp_serde::from_slice(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_framed_requests_are_answered() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Arc::new(memory_context(Arc::new(MockProvider::default()), dir.path()));

        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = tokio::spawn({
            let ctx = ctx.clone();
            async move { serve_connection(server_read, server_write, &ctx).await }
        });

        let (client_read, client_write) = tokio::io::split(client_io);
        let mut client = (
            FramedRead::new(client_read, frame_codec()),
            FramedWrite::new(client_write, frame_codec()),
        );

        let pong = round_trip(&mut client, rmp_serde::to_vec_named(&DecksterRequest::Ping).unwrap()).await;
        assert!(pong.is_ok());

        let garbage = round_trip(&mut client, vec![0xc1, 0x00]).await;
        assert_eq!(garbage.status, "error");
        assert!(garbage.error.unwrap().contains("Deserialization"));

        let stats = round_trip(&mut client, rmp_serde::to_vec_named(&DecksterRequest::Stats).unwrap()).await;
        assert_eq!(stats.data.unwrap()["total"], 0);

        drop(client);
        server.await.unwrap();
    }
}
