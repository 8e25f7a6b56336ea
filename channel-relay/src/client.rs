use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncWriteExt, BufReader},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    select,
};
use tracing::{info, warn};

use crate::{
    cli::ClientArgs,
    frame::{DEFAULT_MAX_LINE_BYTES, Delivery, Frame, read_line, write_line},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let (mut reader, mut writer) = establish_connection(&args).await?;

    match &args.send {
        Some(message) => send(&mut writer, &args.channel, message).await?,
        None => receive(&mut reader, &mut writer, &args.channel, &args.downloads).await?,
    }

    shutdown_connection(&mut writer).await;
    Ok(())
}

async fn establish_connection(
    args: &ClientArgs,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf)> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;

    info!("connected to {}", args.server);

    let (reader, writer) = stream.into_split();
    Ok((BufReader::new(reader), writer))
}

/// Sends `message` as a file frame if it names a regular file, as text otherwise.
async fn send(writer: &mut OwnedWriteHalf, channel: &str, message: &str) -> Result<()> {
    let frame = outgoing_frame(channel, message).await?;
    write_line(writer, &frame.encode())
        .await
        .context("failed to send frame")?;

    match &frame {
        Frame::File { name, .. } => info!(file = %name, %channel, "sent file"),
        _ => info!(%channel, "sent message"),
    }
    Ok(())
}

async fn outgoing_frame(channel: &str, message: &str) -> Result<Frame> {
    let path = Path::new(message);
    let is_file = tokio::fs::metadata(path)
        .await
        .map(|metadata| !metadata.is_dir())
        .unwrap_or(false);
    if !is_file {
        return Ok(Frame::Text {
            channel: channel.to_string(),
            text: message.to_string(),
        });
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read file {}", path.display()))?;
    let name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy();
    Ok(Frame::file(channel, name, &bytes))
}

async fn receive(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    channel: &str,
    downloads: &Path,
) -> Result<()> {
    tokio::fs::create_dir_all(downloads)
        .await
        .with_context(|| format!("failed to create {}", downloads.display()))?;

    let subscribe = Frame::Subscribe {
        channel: channel.to_string(),
    };
    write_line(writer, &subscribe.encode())
        .await
        .context("failed to subscribe")?;
    info!(%channel, "listening for messages");

    loop {
        select! {
            line = read_line(reader, DEFAULT_MAX_LINE_BYTES) => {
                let Some(line) = line? else {
                    write_stdout("*** relay closed the connection").await?;
                    break;
                };
                handle_delivery(&String::from_utf8_lossy(&line), downloads).await?;
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }
    Ok(())
}

async fn handle_delivery(line: &str, downloads: &Path) -> Result<()> {
    let delivery = Delivery::decode(line);
    match &delivery {
        Delivery::Text(text) => write_stdout(text).await?,
        Delivery::File { name, .. } => match save_file(&delivery, name, downloads).await {
            Ok(path) => info!(path = %path.display(), "received and saved file"),
            Err(error) => warn!(file = %name, error = ?error, "skipping received file"),
        },
    }
    Ok(())
}

async fn save_file(delivery: &Delivery, name: &str, downloads: &Path) -> Result<PathBuf> {
    let bytes = delivery
        .file_bytes()
        .context("not a file delivery")?
        .context("file content is not valid base64")?;
    let file_name = Path::new(name)
        .file_name()
        .with_context(|| format!("unusable file name {name:?}"))?;
    let path = downloads.join(file_name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

async fn shutdown_connection(writer: &mut OwnedWriteHalf) {
    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
