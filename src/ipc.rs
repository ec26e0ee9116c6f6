//! Unix-socket JSON-lines ingress for ticks and control commands.
//!
//! Every accepted connection is read line by line on its own task. A line that
//! does not decode is counted and skipped; it never closes the connection.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::UnixListener;

use crate::control::ControlCommand;
use crate::core::{RawTick, Result, TickFrame};

/// Decode failures across all connections of one listener.
#[derive(Debug, Default)]
pub struct IpcStats {
    pub lines: AtomicU64,
    pub rejected: AtomicU64,
}

impl IpcStats {
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

pub fn decode_tick(line: &str) -> Result<RawTick> {
    Ok(serde_json::from_str::<TickFrame>(line)?.into_tick())
}

pub fn decode_control(line: &str) -> Result<ControlCommand> {
    ControlCommand::parse(line)
}

/// Listen for tick feeders.
pub async fn listen_ticks(socket_path: String, tx: flume::Sender<RawTick>, stats: Arc<IpcStats>) -> Result<()> {
    serve(socket_path, tx, decode_tick, stats).await
}

/// Listen for operator commands.
pub async fn listen_control(
    socket_path: String,
    tx: flume::Sender<ControlCommand>,
    stats: Arc<IpcStats>,
) -> Result<()> {
    serve(socket_path, tx, decode_control, stats).await
}

async fn serve<T: Send + 'static>(
    socket_path: String,
    tx: flume::Sender<T>,
    decode: fn(&str) -> Result<T>,
    stats: Arc<IpcStats>,
) -> Result<()> {
    if Path::new(&socket_path).exists() {
        std::fs::remove_file(&socket_path)?;
    }
    let listener = UnixListener::bind(&socket_path)?;
    tracing::info!("🔌 IPC listener: {}", socket_path);

    loop {
        let (stream, _) = listener.accept().await?;
        let tx = tx.clone();
        let stats = stats.clone();
        let path = socket_path.clone();
        tokio::spawn(async move {
            tracing::debug!("connection on {}", path);
            match read_lines(BufReader::new(stream), &tx, decode, &stats).await {
                Ok(()) => tracing::debug!("connection on {} closed", path),
                Err(e) => tracing::warn!("connection on {} dropped: {}", path, e),
            }
        });
    }
}

/// Decode `reader` line by line into `tx` until EOF or until the receiver is gone.
pub async fn read_lines<R, T>(
    reader: R,
    tx: &flume::Sender<T>,
    decode: fn(&str) -> Result<T>,
    stats: &IpcStats,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        stats.lines.fetch_add(1, Ordering::Relaxed);
        match decode(line) {
            Ok(item) => {
                if tx.send_async(item).await.is_err() {
                    tracing::debug!("receiver gone, closing connection");
                    return Ok(());
                }
            }
            Err(e) => {
                stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("skipping undecodable line: {}", e);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MetricKind;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_bad_lines_skipped() {
        let input = concat!(
            "{\"m\":\"FUT\",\"s\":\"ABC-FUT\",\"v\":\"200000\",\"bp\":10.5,\"ap\":10.6}\n",
            "not json\n",
            "\n",
            "{\"data\":{\"class\":\"REG\",\"symbol\":\"ABC\",\"volume\":5000000,\"lastTrade\":{\"x\":10.4}}}\n",
        );
        let (tx, rx) = flume::unbounded();
        let stats = IpcStats::default();

        read_lines(BufReader::new(input.as_bytes()), &tx, decode_tick, &stats)
            .await
            .unwrap();

        let ticks: Vec<RawTick> = rx.drain().collect();
        assert_eq!(ticks.len(), 2);
        assert_eq!(ticks[0].symbol.as_deref(), Some("ABC-FUT"));
        assert_eq!(ticks[1].class.as_deref(), Some("REG"));
        assert_eq!(
            ticks[1].last_trade.as_ref().and_then(|lt| lt.price()).and_then(|p| p.as_f64()),
            Some(10.4)
        );
        assert_eq!(stats.lines(), 3);
        assert_eq!(stats.rejected(), 1);
    }

    #[tokio::test]
    async fn test_control_socket_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock").to_string_lossy().into_owned();
        let (tx, rx) = flume::unbounded();
        let stats = Arc::new(IpcStats::default());

        let server = tokio::spawn(listen_control(path.clone(), tx, stats.clone()));

        let mut stream = loop {
            match tokio::net::UnixStream::connect(&path).await {
                Ok(s) => break s,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        stream
            .write_all(b"{\"action\":\"release\",\"pairKey\":\"P\",\"metric\":\"major\"}\n{\"action\":\"nope\"}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();

        let cmd = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd,
            ControlCommand::Release {
                pair_key: "P".into(),
                metric: MetricKind::Major,
            }
        );

        server.abort();
    }
}
