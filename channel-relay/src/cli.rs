use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::{config::RelayConfig, frame::DEFAULT_MAX_LINE_BYTES};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay to send one message or file, or to receive.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// Longest accepted frame in bytes; longer lines drop the connection.
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_BYTES)]
    pub max_line_bytes: usize,

    /// Give up on a subscriber whose write stalls this long during a broadcast.
    #[arg(long)]
    pub write_timeout_ms: Option<u64>,
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        let config = RelayConfig::default().max_line_bytes(self.max_line_bytes);
        match self.write_timeout_ms {
            Some(ms) => config.write_timeout(Duration::from_millis(ms)),
            None => config,
        }
    }
}

#[derive(Args, Debug, Clone)]
#[command(group(ArgGroup::new("mode").required(true).args(["send", "receive"])))]
pub struct ClientArgs {
    /// Channel to publish on or listen to.
    #[arg(long)]
    pub channel: String,

    /// Text to send, or the path of a file to transfer.
    #[arg(long)]
    pub send: Option<String>,

    /// Subscribe and print messages, saving transferred files.
    #[arg(long)]
    pub receive: bool,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub server: SocketAddr,

    /// Directory received files are written to.
    #[arg(long, default_value = "downloads")]
    pub downloads: PathBuf,
}
