use std::{fmt, io, net::SocketAddr, time::Duration};

use tokio::{io::AsyncWrite, sync::Mutex};

use crate::frame::write_line;

pub type ConnectionId = u64;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Write side of an accepted client, shared between its own task and any
/// task broadcasting to it.
///
/// The writer sits behind an async mutex so that concurrent broadcasts to the
/// same client never interleave bytes within a line.
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: Mutex<BoxedWriter>,
}

impl Connection {
    pub fn new<W>(id: ConnectionId, peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer,
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Writes `line` plus a terminator, giving up after `deadline` if one is set.
    ///
    /// Waiting for the lock counts against the deadline.
    pub async fn send_line(&self, line: &str, deadline: Option<Duration>) -> io::Result<()> {
        let write = async {
            let mut writer = self.writer.lock().await;
            write_line(&mut *writer, line).await
        };

        match deadline {
            Some(deadline) => tokio::time::timeout(deadline, write)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "write deadline elapsed"))?,
            None => write.await,
        }
    }

    pub async fn shutdown(&self) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut writer = self.writer.lock().await;
        writer.shutdown().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
