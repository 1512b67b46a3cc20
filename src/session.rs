use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::codec::OpusCodec;
use crate::settings::SETTINGS;

/// A long-lived, line-oriented connection to the switch.
///
/// Inbound lines are delivered to the most recent [`SocketSession::listen`]
/// receiver. Registering a new listener or calling
/// [`SocketSession::clear_listeners`] closes the previous receiver, so an old
/// decoder can never see frames meant for a new connection.
#[async_trait]
pub trait SocketSession: Send + Sync {
    async fn connect(&self) -> io::Result<()>;

    async fn disconnect(&self) -> io::Result<()>;

    fn is_connected(&self) -> bool;

    fn clear_listeners(&self);

    fn listen(&self) -> mpsc::Receiver<String>;

    /// Writes one command. Writes are serialized.
    async fn send_command(&self, command: &str) -> io::Result<()>;
}

type Listener = Arc<Mutex<Option<mpsc::Sender<String>>>>;

struct ReaderTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// [`SocketSession`] over a plain TCP (telnet) socket.
pub struct TcpSocketSession {
    host: String,
    port: u16,
    connect_timeout: Duration,
    // The send lock: at most one command in flight.
    writer: tokio::sync::Mutex<Option<FramedWrite<OwnedWriteHalf, OpusCodec>>>,
    listener: Listener,
    connected: Arc<AtomicBool>,
    reader: Mutex<Option<ReaderTask>>,
}

impl TcpSocketSession {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            connect_timeout: SETTINGS.connect_timeout,
            writer: tokio::sync::Mutex::new(None),
            listener: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn stop_reader(&self) {
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reader) = reader {
            reader.cancel.cancel();
            reader.task.abort();
        }
    }

    fn spawn_reader(
        &self,
        mut frames: FramedRead<tokio::net::tcp::OwnedReadHalf, OpusCodec>,
    ) -> ReaderTask {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let listener = self.listener.clone();
        let connected = self.connected.clone();
        let address = self.address();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        trace!("Reader for {} cancelled", address);
                        break;
                    }
                    frame = frames.next() => match frame {
                        Some(Ok(line)) => {
                            let sender = listener
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .clone();
                            match sender {
                                Some(sender) => {
                                    if sender.send(line).await.is_err() {
                                        trace!("Listener went away, dropping frame");
                                    }
                                }
                                None => trace!("No listener registered, dropping frame: {}", line),
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Error reading from {}", address);
                            connected.store(false, Ordering::SeqCst);
                            break;
                        }
                        None => {
                            info!("Connection to {} closed by remote", address);
                            connected.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            }
        });

        ReaderTask { cancel, task }
    }
}

#[async_trait]
impl SocketSession for TcpSocketSession {
    async fn connect(&self) -> io::Result<()> {
        if self.is_connected() {
            let _ = self.disconnect().await;
        }

        let address = self.address();
        debug!("Connecting to {}", address);
        let stream = timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("Timed out connecting to {}", address),
                )
            })??;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(FramedWrite::new(write_half, OpusCodec::new()));
        self.connected.store(true, Ordering::SeqCst);

        let reader = self.spawn_reader(FramedRead::new(read_half, OpusCodec::new()));
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);

        info!("Connected to {}", address);
        Ok(())
    }

    async fn disconnect(&self) -> io::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        self.stop_reader();

        let writer = self.writer.lock().await.take();
        if let Some(writer) = writer {
            debug!("Disconnecting from {}", self.address());
            let mut write_half = writer.into_inner();
            write_half.shutdown().await?;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn clear_listeners(&self) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn listen(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SETTINGS.listener_capacity);
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    async fn send_command(&self, command: &str) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "Not connected"))?;

        trace!("Sending command: {}", command);
        if let Err(e) = writer.send(command.to_string()).await {
            warn!(error = %e, "Failed to send '{}' to {}", command, self.address());
            self.connected.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for TcpSocketSession {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
