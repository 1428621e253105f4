//! Newline-delimited JSON transport over TCP
//!
//! Each line written is one [`SubscribeRequest`], each line read is one
//! [`SubscribeUpdate`]. When a token is configured the first line sent on a
//! new connection is `{"x-token": "<token>"}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use geyser_core::{SubscribeRequest, SubscribeUpdate};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{OpenedStream, StreamHandle, StreamSignal, StreamTransport, TransportError};

/// TCP transport speaking newline-delimited JSON
#[derive(Debug, Clone)]
pub struct JsonLinesTransport {
    address: String,
    token: Option<String>,
}

impl JsonLinesTransport {
    /// `address` is a `host:port` pair
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            token: None,
        }
    }

    /// Authenticate every new stream with `token`
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl StreamTransport for JsonLinesTransport {
    async fn open(&self) -> Result<OpenedStream, TransportError> {
        info!(address = %self.address, "Opening stream");

        let socket = TcpStream::connect(&self.address)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", self.address, e)))?;
        socket.set_nodelay(true)?;

        let (read_half, write_half) = socket.into_split();
        let (signal_tx, signals) = mpsc::unbounded_channel();
        let stream = JsonLinesStream::start(read_half, write_half, signal_tx);

        if let Some(token) = &self.token {
            let preamble = serde_json::json!({ "x-token": token });
            stream.write_line(&preamble).await?;
        }

        Ok(OpenedStream {
            handle: Arc::new(stream),
            signals,
        })
    }
}

struct JsonLinesStream {
    writer: Arc<tokio::sync::Mutex<Option<OwnedWriteHalf>>>,
    signal_tx: mpsc::UnboundedSender<StreamSignal>,
    closed: Arc<AtomicBool>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl JsonLinesStream {
    fn start(
        read_half: OwnedReadHalf,
        write_half: OwnedWriteHalf,
        signal_tx: mpsc::UnboundedSender<StreamSignal>,
    ) -> Self {
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(read_lines(read_half, signal_tx.clone(), closed.clone()));

        Self {
            writer: Arc::new(tokio::sync::Mutex::new(Some(write_half))),
            signal_tx,
            closed,
            reader: parking_lot::Mutex::new(Some(reader)),
        }
    }

    async fn write_line<T: serde::Serialize>(&self, value: &T) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(value)
            .map_err(|e| TransportError::ProtocolError(e.to_string()))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(TransportError::ConnectionClosed);
        };
        writer
            .write_all(&line)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    /// Stop reading, shut the socket down and report the outcome
    fn teardown(&self, cancelled: bool) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }

        let writer = self.writer.clone();
        tokio::spawn(async move {
            if let Some(mut writer) = writer.lock().await.take() {
                let _ = writer.shutdown().await;
            }
        });

        if cancelled && !self.closed.load(Ordering::SeqCst) {
            let _ = self
                .signal_tx
                .send(StreamSignal::Error(TransportError::Cancelled));
        }
        emit_close(&self.closed, &self.signal_tx);
    }
}

#[async_trait]
impl StreamHandle for JsonLinesStream {
    async fn write(&self, request: &SubscribeRequest) -> Result<(), TransportError> {
        self.write_line(request).await
    }

    fn cancel(&self) {
        debug!("Cancelling stream");
        self.teardown(true);
    }

    fn destroy(&self) {
        debug!("Destroying stream");
        self.teardown(false);
    }
}

impl Drop for JsonLinesStream {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

async fn read_lines(
    read_half: OwnedReadHalf,
    signal_tx: mpsc::UnboundedSender<StreamSignal>,
    closed: Arc<AtomicBool>,
) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let signal = match serde_json::from_str::<SubscribeUpdate>(line) {
                    Ok(update) => StreamSignal::Data(update),
                    Err(e) => {
                        warn!(error = %e, "Discarding malformed message");
                        StreamSignal::Error(TransportError::ProtocolError(e.to_string()))
                    }
                };
                if signal_tx.send(signal).is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("Peer ended the stream");
                let _ = signal_tx.send(StreamSignal::End);
                break;
            }
            Err(e) => {
                let _ = signal_tx.send(StreamSignal::Error(TransportError::ReadFailed(
                    e.to_string(),
                )));
                break;
            }
        }
    }
    emit_close(&closed, &signal_tx);
}

fn emit_close(closed: &AtomicBool, signal_tx: &mpsc::UnboundedSender<StreamSignal>) {
    if !closed.swap(true, Ordering::SeqCst) {
        let _ = signal_tx.send(StreamSignal::Close);
    }
}
