#![allow(dead_code)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use atlona_opus_rs::{
    HandlerCallback, OpusCapabilities, OpusConfig, SocketSession, State, StatusInfo, ThingStatus,
    ThingStatusDetail,
};

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

/// Answers like an OPUS switch that needs no login.
pub fn opus_device(command: &str) -> Vec<String> {
    match command {
        "" => vec!["Command FAILED: ()".to_string()],
        "Version" => vec!["V1.6.3".to_string()],
        "Type" => vec!["AT-OPUS-810M".to_string()],
        "PWSTA" => vec!["PWON".to_string()],
        "Lstatus" => vec!["Unlock".to_string()],
        "IRSTA" => vec!["IRON".to_string()],
        other if other.ends_with(" sta") || other.starts_with("Statusx") => vec![],
        other => vec![other.to_string()],
    }
}

/// Answers like an OPUS switch that asks for `admin`/`secret`.
pub fn secured_device(command: &str) -> Vec<String> {
    match command {
        "" => vec!["Login:".to_string()],
        "admin" => vec!["Password:".to_string()],
        "secret" => vec!["Welcome to TELNET.".to_string()],
        "Version" | "Type" => opus_device(command),
        _ => vec!["Login:".to_string()],
    }
}

/// An in-memory [`SocketSession`] driven by a responder closure.
pub struct MockSession {
    connected: AtomicBool,
    fail_connect: AtomicBool,
    fail_writes: AtomicBool,
    fail_command: Mutex<Option<String>>,
    connect_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    sent: Mutex<Vec<String>>,
    listener: Mutex<Option<mpsc::Sender<String>>>,
    responder: Mutex<Responder>,
}

impl MockSession {
    pub fn new() -> Arc<Self> {
        Self::with_responder(opus_device)
    }

    pub fn with_responder<F>(responder: F) -> Arc<Self>
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        Arc::new(Self {
            connected: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_command: Mutex::new(None),
            connect_delay: Mutex::new(None),
            connects: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            responder: Mutex::new(Box::new(responder)),
        })
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every write of exactly `command` fail.
    pub fn set_fail_command(&self, command: &str) {
        *self.fail_command.lock().unwrap() = Some(command.to_string());
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = Some(delay);
    }

    /// Simulates the switch hanging up.
    pub fn drop_connection(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    /// Pushes an unsolicited frame to the current listener.
    pub fn push(&self, line: &str) {
        if let Some(listener) = self.listener.lock().unwrap().as_ref() {
            let _ = listener.try_send(line.to_string());
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }
}

#[async_trait]
impl SocketSession for MockSession {
    async fn connect(&self) -> io::Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.connect_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> io::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn clear_listeners(&self) {
        *self.listener.lock().unwrap() = None;
    }

    fn listen(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(256);
        *self.listener.lock().unwrap() = Some(tx);
        rx
    }

    async fn send_command(&self, command: &str) -> io::Result<()> {
        self.sent.lock().unwrap().push(command.to_string());
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "Not connected"));
        }
        let fail_command = self.fail_command.lock().unwrap().as_deref() == Some(command);
        if fail_command || self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "broken pipe"));
        }
        let responses = {
            let mut responder = self.responder.lock().unwrap();
            (*responder)(command)
        };
        for response in responses {
            self.push(&response);
        }
        Ok(())
    }
}

/// A [`HandlerCallback`] that records everything it is given.
#[derive(Default)]
pub struct RecordingCallback {
    pub states: Mutex<Vec<(String, State)>>,
    pub statuses: Mutex<Vec<StatusInfo>>,
    pub properties: Mutex<Vec<(String, String)>>,
}

impl RecordingCallback {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn states_for(&self, channel_id: &str) -> Vec<State> {
        self.states
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == channel_id)
            .map(|(_, state)| state.clone())
            .collect()
    }

    pub fn last_status(&self) -> Option<StatusInfo> {
        self.statuses.lock().unwrap().last().cloned()
    }

    pub fn property(&self, name: &str) -> Option<String> {
        self.properties
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }
}

impl HandlerCallback for RecordingCallback {
    fn state_changed(&self, channel_id: &str, state: State) {
        self.states
            .lock()
            .unwrap()
            .push((channel_id.to_string(), state));
    }

    fn status_changed(&self, status: ThingStatus, detail: ThingStatusDetail, message: Option<&str>) {
        self.statuses.lock().unwrap().push(StatusInfo {
            status,
            detail,
            message: message.map(str::to_string),
        });
    }

    fn set_property(&self, name: &str, value: &str) {
        self.properties
            .lock()
            .unwrap()
            .push((name.to_string(), value.to_string()));
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// An OPUS with 8 outputs, 2 audio outputs and HDMI outputs 5 to 8.
pub fn capabilities() -> OpusCapabilities {
    OpusCapabilities::new(8, 2, [5, 6, 7, 8]).unwrap()
}

pub fn config() -> OpusConfig {
    OpusConfig::new("10.0.0.5").with_intervals(600, 30, 10)
}

/// Lets spawned tasks (decode loop, scheduled teardown) catch up.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
