//! Per-connection read loop.
//!
//! Each accepted client gets one task running [`handle_connection`]. The task
//! decodes one [`Frame`] per line, subscribes the sender to the addressed
//! channel and fans any payload out through the [`Registry`]. A broadcast
//! finishes before the next line is read, which keeps one sender's messages
//! in order for every subscriber.

use std::{io, net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufRead, BufReader},
    net::TcpStream,
    select,
    sync::watch,
};
use tracing::{debug, info, warn};

use crate::{
    config::RelayConfig,
    connection::{Connection, ConnectionId},
    frame::{Frame, read_line},
    registry::{BroadcastOutcome, Registry},
};

/// Serves one TCP client until it disconnects or the relay shuts down.
pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    registry: Arc<Registry>,
    config: RelayConfig,
    shutdown: watch::Receiver<bool>,
) {
    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let conn = Arc::new(Connection::new(id, peer, writer));

    info!(%peer, id, "client connected");
    if let Err(error) = run_session(&mut reader, &conn, &registry, &config, shutdown).await {
        warn!(%peer, ?error, "client connection closed with error");
    }

    if let Err(error) = conn.shutdown().await {
        debug!(%peer, ?error, "failed to shut down client writer");
    }
}

/// Registers `conn`, processes frames from `reader`, and always unregisters on exit.
pub async fn run_session<R>(
    reader: &mut R,
    conn: &Arc<Connection>,
    registry: &Registry,
    config: &RelayConfig,
    shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    registry.register(Arc::clone(conn)).await;
    let result = read_frames(reader, conn, registry, config.max_line_bytes, shutdown).await;
    cleanup_disconnect(registry, conn).await;
    result
}

async fn read_frames<R>(
    reader: &mut R,
    conn: &Arc<Connection>,
    registry: &Registry,
    max_line_bytes: usize,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        select! {
            line = read_line(reader, max_line_bytes) => {
                if !handle_line(line?, conn, registry).await {
                    break;
                }
            }
            _ = shutdown.changed() => {
                debug!(peer = %conn.peer(), "closing client for shutdown");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_line(line: Option<Vec<u8>>, conn: &Arc<Connection>, registry: &Registry) -> bool {
    let Some(line) = line else {
        return false;
    };

    match Frame::decode_bytes(&line) {
        Ok(frame) => {
            dispatch_frame(&frame, conn, registry).await;
        }
        Err(error) => {
            warn!(
                peer = %conn.peer(),
                %error,
                line = %String::from_utf8_lossy(&line),
                "discarding malformed frame"
            );
        }
    }
    true
}

/// Applies one decoded frame on behalf of `conn`.
///
/// Every frame subscribes its sender. Text and file frames are then relayed
/// to the channel's other subscribers; the returned outcome is `None` for a
/// pure subscription.
pub async fn dispatch_frame(
    frame: &Frame,
    conn: &Arc<Connection>,
    registry: &Registry,
) -> Option<BroadcastOutcome> {
    let channel = frame.channel();
    registry.subscribe(channel, conn).await;

    match frame {
        Frame::Subscribe { .. } => return None,
        Frame::Text { text, .. } => {
            info!(peer = %conn.peer(), %channel, %text, "received message");
        }
        Frame::File { name, content, .. } => {
            info!(
                peer = %conn.peer(),
                %channel,
                file = %name,
                encoded_bytes = content.len(),
                "received file"
            );
        }
    }

    let delivery = frame.delivery()?;
    Some(registry.broadcast(channel, &delivery.encode(), conn.id()).await)
}

async fn cleanup_disconnect(registry: &Registry, conn: &Connection) {
    registry.remove(conn.id()).await;
    info!(peer = %conn.peer(), id = conn.id(), "client disconnected");
}
