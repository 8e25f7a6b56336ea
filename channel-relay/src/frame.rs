use std::io;

use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CHANNEL_PREFIX: &str = "CHANNEL:";
const MESSAGE_PREFIX: &str = "MESSAGE:";
const FILE_PREFIX: &str = "FILE:";
const CONTENT_PREFIX: &str = "CONTENT:";
const SUBSCRIBE_SENTINEL: &str = "SUBSCRIBE";

/// Largest frame accepted on a connection, excluding the line terminator.
pub const DEFAULT_MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// A client-to-relay frame, decoded once per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Subscribe {
        channel: String,
    },
    Text {
        channel: String,
        text: String,
    },
    File {
        channel: String,
        name: String,
        content: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has no `|` separator")]
    TooFewParts,
    #[error("frame has {0} `|`-separated parts, expected 2 or 3")]
    TooManyParts(usize),
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

impl Frame {
    pub fn decode(line: &str) -> Result<Self, FrameError> {
        let parts: Vec<&str> = line.split('|').collect();
        match parts.as_slice() {
            [channel, message] => {
                let channel = strip(channel, CHANNEL_PREFIX);
                let message = strip(message, MESSAGE_PREFIX);
                if message == SUBSCRIBE_SENTINEL {
                    Ok(Frame::Subscribe { channel })
                } else {
                    Ok(Frame::Text {
                        channel,
                        text: message,
                    })
                }
            }
            [channel, name, content] => Ok(Frame::File {
                channel: strip(channel, CHANNEL_PREFIX),
                name: strip(name, FILE_PREFIX),
                content: strip(content, CONTENT_PREFIX),
            }),
            [_] | [] => Err(FrameError::TooFewParts),
            parts => Err(FrameError::TooManyParts(parts.len())),
        }
    }

    pub fn decode_bytes(line: &[u8]) -> Result<Self, FrameError> {
        let line = std::str::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
        Self::decode(line)
    }

    /// Builds a file frame, base64-encoding `bytes`.
    pub fn file(channel: impl Into<String>, name: impl Into<String>, bytes: &[u8]) -> Self {
        Frame::File {
            channel: channel.into(),
            name: name.into(),
            content: STANDARD.encode(bytes),
        }
    }

    pub fn channel(&self) -> &str {
        match self {
            Frame::Subscribe { channel }
            | Frame::Text { channel, .. }
            | Frame::File { channel, .. } => channel,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Frame::Subscribe { channel } => {
                format!("{CHANNEL_PREFIX}{channel}|{MESSAGE_PREFIX}{SUBSCRIBE_SENTINEL}")
            }
            Frame::Text { channel, text } => {
                format!("{CHANNEL_PREFIX}{channel}|{MESSAGE_PREFIX}{text}")
            }
            Frame::File {
                channel,
                name,
                content,
            } => format!("{CHANNEL_PREFIX}{channel}|{FILE_PREFIX}{name}|{CONTENT_PREFIX}{content}"),
        }
    }

    /// The line fanned out to the other subscribers, if this frame carries one.
    pub fn delivery(&self) -> Option<Delivery> {
        match self {
            Frame::Subscribe { .. } => None,
            Frame::Text { text, .. } => Some(Delivery::Text(text.clone())),
            Frame::File { name, content, .. } => Some(Delivery::File {
                name: name.clone(),
                content: content.clone(),
            }),
        }
    }
}

/// A relay-to-subscriber line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Text(String),
    File { name: String, content: String },
}

impl Delivery {
    pub fn decode(line: &str) -> Self {
        if let Some((name, content)) = line.split_once('|') {
            if let Some(name) = name.strip_prefix(FILE_PREFIX) {
                if !content.contains('|') {
                    return Delivery::File {
                        name: name.to_string(),
                        content: strip(content, CONTENT_PREFIX),
                    };
                }
            }
        }
        Delivery::Text(line.to_string())
    }

    pub fn encode(&self) -> String {
        match self {
            Delivery::Text(text) => text.clone(),
            Delivery::File { name, content } => {
                format!("{FILE_PREFIX}{name}|{CONTENT_PREFIX}{content}")
            }
        }
    }

    /// Decoded bytes of a file delivery; `None` for text.
    pub fn file_bytes(&self) -> Option<Result<Vec<u8>, base64::DecodeError>> {
        match self {
            Delivery::Text(_) => None,
            Delivery::File { content, .. } => Some(STANDARD.decode(content)),
        }
    }
}

fn strip(segment: &str, prefix: &str) -> String {
    segment.strip_prefix(prefix).unwrap_or(segment).to_string()
}

/// Reads one `\n`-terminated line, without its terminator or a trailing `\r`.
///
/// Returns `Ok(None)` at end of stream. A line longer than `max_len` bytes is
/// an `InvalidData` error; the rest of the stream should be abandoned.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let limit = max_len.saturating_add(1);
    let mut line = Vec::new();
    let bytes = (&mut *reader)
        .take(limit as u64)
        .read_until(b'\n', &mut line)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() >= limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {max_len} bytes"),
        ));
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(Some(line))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}
