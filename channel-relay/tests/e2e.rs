use std::{path::Path, process::Stdio, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStdout, Command},
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn cli_relays_text_and_files_end_to_end() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("channel-relay");
    let downloads = tempfile::tempdir()?;
    let outbox = tempfile::tempdir()?;

    let (mut server_child, mut server_stdout) = spawn_server(&binary).await?;
    let addr = read_server_addr(&mut server_stdout).await?;

    let mut receiver = spawn_receiver(&binary, "test", &addr, downloads.path())?;
    let mut receiver_stdout = BufReader::new(
        receiver
            .stdout
            .take()
            .context("receiver stdout missing after spawn")?,
    );

    // The relay logs each new subscription; wait for the receiver's before sending.
    wait_for_log(&mut server_stdout, "client subscribed").await?;
    let server_log_task = tokio::spawn(async move {
        drain_stdout(server_stdout).await;
    });

    run_sender(&binary, "test", &addr, "hello from the sender").await?;
    let message = read_line_expect(&mut receiver_stdout, "waiting for text delivery").await?;
    assert_eq!(message, "hello from the sender");

    let report = outbox.path().join("report.txt");
    tokio::fs::write(&report, b"hi").await?;
    let report_arg = report.to_str().context("temp path is not UTF-8")?;
    run_sender(&binary, "test", &addr, report_arg).await?;

    let saved = downloads.path().join("report.txt");
    timeout(READ_TIMEOUT, async {
        loop {
            if let Ok(bytes) = tokio::fs::read(&saved).await {
                if bytes == b"hi" {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .map_err(|_| anyhow!("receiver never saved report.txt"))?;

    // Messages on other channels never reach the receiver.
    run_sender(&binary, "other", &addr, "not for you").await?;
    run_sender(&binary, "test", &addr, "last one").await?;
    let next = read_line_expect(&mut receiver_stdout, "waiting for final delivery").await?;
    assert_eq!(next, "last one");

    let _ = receiver.kill().await;
    let _ = receiver.wait().await;
    let _ = server_child.kill().await;
    let _ = server_child.wait().await;
    let _ = server_log_task.await;

    Ok(())
}

#[tokio::test]
async fn server_exits_when_port_is_taken() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("channel-relay");
    let occupied = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = occupied.local_addr()?.to_string();

    let status = timeout(
        READ_TIMEOUT,
        Command::new(binary)
            .args(["server", "--listen", &addr])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await??;

    assert!(!status.success(), "bind failure must be fatal");
    Ok(())
}

#[tokio::test]
async fn client_exits_when_relay_is_unreachable() -> Result<()> {
    let binary = assert_cmd::cargo::cargo_bin!("channel-relay");
    let addr = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0")?;
        probe.local_addr()?.to_string()
    };

    let status = timeout(
        READ_TIMEOUT,
        Command::new(binary)
            .args(["client", "--channel", "x", "--send", "hi", "--server", &addr])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await??;

    assert!(!status.success(), "connection failure must be fatal");
    Ok(())
}

async fn spawn_server(binary: &Path) -> Result<(Child, BufReader<ChildStdout>)> {
    let mut cmd = Command::new(binary);
    cmd.arg("server")
        .arg("--listen")
        .arg("127.0.0.1:0")
        .env("RUST_LOG", "info")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("failed to spawn server")?;
    let stdout = child
        .stdout
        .take()
        .context("server stdout missing after spawn")?;

    Ok((child, BufReader::new(stdout)))
}

async fn read_server_addr(reader: &mut BufReader<ChildStdout>) -> Result<String> {
    let line = read_line(reader)
        .await?
        .context("server did not emit listening address")?;
    let trimmed = line.trim();
    let addr = trimmed
        .split_whitespace()
        .last()
        .context("unexpected server banner format")?;
    if !addr.contains(':') {
        return Err(anyhow!("server banner missing socket: {trimmed}"));
    }
    Ok(addr.to_string())
}

fn spawn_receiver(binary: &Path, channel: &str, addr: &str, downloads: &Path) -> Result<Child> {
    let mut cmd = Command::new(binary);
    cmd.arg("client")
        .arg("--channel")
        .arg(channel)
        .arg("--receive")
        .arg("--server")
        .arg(addr)
        .arg("--downloads")
        .arg(downloads)
        .env("RUST_LOG", "warn")
        .env("NO_COLOR", "1")
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    cmd.spawn()
        .with_context(|| format!("failed to spawn receiver on {channel}"))
}

async fn run_sender(binary: &Path, channel: &str, addr: &str, message: &str) -> Result<()> {
    let status = timeout(
        READ_TIMEOUT,
        Command::new(binary)
            .args(["client", "--channel", channel, "--server", addr, "--send", message])
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status(),
    )
    .await
    .map_err(|_| anyhow!("sender timed out"))?
    .context("failed to run sender")?;

    if !status.success() {
        return Err(anyhow!("sender exited with status {status}"));
    }
    Ok(())
}

async fn wait_for_log(reader: &mut BufReader<ChildStdout>, needle: &str) -> Result<()> {
    loop {
        let line = read_line_expect(reader, "waiting for server log").await?;
        if line.contains(needle) {
            return Ok(());
        }
    }
}

async fn read_line_expect(
    reader: &mut BufReader<ChildStdout>,
    description: &str,
) -> Result<String> {
    match read_line(reader).await {
        Ok(Some(line)) => Ok(line),
        Ok(None) => Err(anyhow!("{description}: stream closed")),
        Err(err) => Err(err.context(format!("{description}: failed to read line"))),
    }
}

async fn read_line(reader: &mut BufReader<ChildStdout>) -> Result<Option<String>> {
    let mut line = String::new();
    let read_future = reader.read_line(&mut line);
    let bytes_io = match timeout(READ_TIMEOUT, read_future).await {
        Ok(result) => result,
        Err(_) => return Err(anyhow!("timed out waiting for line")),
    };
    let byte_count = bytes_io?;
    if byte_count == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

async fn drain_stdout(mut reader: BufReader<ChildStdout>) {
    let mut buffer = String::new();
    while reader
        .read_line(&mut buffer)
        .await
        .map(|bytes| {
            let has_data = bytes > 0;
            if has_data {
                buffer.clear();
            }
            has_data
        })
        .unwrap_or(false)
    {}
}
