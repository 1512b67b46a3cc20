use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use lazy_static::lazy_static;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::callback::{HandlerCallback, StatefulHandlerCallback};
use crate::capabilities::OpusCapabilities;
use crate::commands::{get_operation_name, MatrixCommand, Operation, PresetCommand};
use crate::config::OpusConfig;
use crate::models::{State, ThingStatus, ThingStatusDetail};
use crate::router::{ChannelAddress, MirrorVerb, PortVerb, PrimaryVerb, VolumeVerb};
use crate::session::SocketSession;
use crate::settings::SETTINGS;
use crate::OpusError;

pub const PROPERTY_VERSION: &str = "version";
pub const PROPERTY_TYPE: &str = "type";

pub const MAX_INPUT_PORT: i64 = 99;
pub const MAX_PRESET: i64 = 5;
pub const MIN_VOLUME_DB: i64 = -79;
pub const MAX_VOLUME_DB: i64 = 15;

const CMD_POWER_ON: &str = "PWON";
const CMD_POWER_OFF: &str = "PWOFF";
const CMD_POWER_STATUS: &str = "PWSTA";
const CMD_PANEL_LOCK: &str = "Lock";
const CMD_PANEL_UNLOCK: &str = "Unlock";
const CMD_PANEL_STATUS: &str = "Lstatus";
const CMD_IR_ON: &str = "IRON";
const CMD_IR_OFF: &str = "IROFF";
const CMD_IR_STATUS: &str = "IRSTA";
const CMD_MATRIX_RESET: &str = "Mreset";
const CMD_MATRIX_RESET_PORTS: &str = "All#";
const CMD_VERSION: &str = "Version";
const CMD_TYPE: &str = "Type";

lazy_static! {
    static ref POWER_RE: Regex = Regex::new(r"^PW(ON|OFF)$").unwrap();
    static ref PANEL_LOCK_RE: Regex = Regex::new(r"^(Lock|Unlock)$").unwrap();
    static ref IR_RE: Regex = Regex::new(r"^IR(ON|OFF)$").unwrap();
    static ref PORT_SWITCH_RE: Regex = Regex::new(r"^x(\d{1,2})AVx(\d{1,2})$").unwrap();
    static ref PORT_POWER_RE: Regex = Regex::new(r"^x(\d{1,2})\$ (on|off)$").unwrap();
    static ref MIRROR_RE: Regex = Regex::new(r"^MirrorHdmi(\d{1,2}) Out(\d{1,2})$").unwrap();
    static ref MIRROR_OFF_RE: Regex =
        Regex::new(r"^(?:MirrorHdmi(\d{1,2}) off|UnMirror(\d{1,2}))$").unwrap();
    static ref VOLUME_RE: Regex = Regex::new(r"^VOUT(\d{1,2}) (-?\d{1,2})$").unwrap();
    static ref VOLUME_MUTE_RE: Regex = Regex::new(r"^VOUTMute(\d{1,2}) (on|off)$").unwrap();
    static ref PRESET_RE: Regex = Regex::new(r"^(Save|Recall|Clear)(\d{1,2})$").unwrap();
    static ref MATRIX_RE: Regex = Regex::new(r"^(?:Mreset|All#|x\d{1,2}All)$").unwrap();
    static ref VERSION_RE: Regex = Regex::new(r"^V\d+(?:\.\d+)*$").unwrap();
    static ref TYPE_RE: Regex = Regex::new(r"^AT-[A-Za-z0-9-]+$").unwrap();
    static ref FAILED_RE: Regex = Regex::new(r"^Command FAILED: \((.*)\)$").unwrap();
    static ref LOGIN_PROMPT_RE: Regex = Regex::new(r"(?i)login|username").unwrap();
    static ref PASSWORD_PROMPT_RE: Regex = Regex::new(r"(?i)password").unwrap();
    static ref WELCOME_RE: Regex = Regex::new(r"(?i)welcome").unwrap();
}

fn check_range(what: &'static str, value: i64, min: i64, max: i64) -> Result<(), OpusError> {
    if value < min || value > max {
        return Err(OpusError::OutOfRange {
            what,
            value,
            min,
            max,
        });
    }
    Ok(())
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

/// Turns inbound frames into channel state and properties.
#[derive(Clone)]
pub struct ResponseDecoder {
    callback: Arc<StatefulHandlerCallback>,
}

impl ResponseDecoder {
    pub fn new(callback: Arc<StatefulHandlerCallback>) -> Self {
        Self { callback }
    }

    fn publish(&self, address: ChannelAddress, state: State) {
        self.callback.state_changed(&address.channel_id(), state);
    }

    /// Decodes one frame. Unrecognized or malformed frames are logged and
    /// dropped.
    pub fn handle_response(&self, response: &str) {
        let response = response.trim();
        if response.is_empty() {
            return;
        }
        trace!("Handling response: {}", response);

        let port = |text: &str| text.parse::<u8>().ok();

        if let Some(caps) = POWER_RE.captures(response) {
            self.publish(
                ChannelAddress::Primary(PrimaryVerb::Power),
                State::OnOff(&caps[1] == "ON"),
            );
        } else if let Some(caps) = PANEL_LOCK_RE.captures(response) {
            self.publish(
                ChannelAddress::Primary(PrimaryVerb::PanelLock),
                State::OnOff(&caps[1] == "Lock"),
            );
        } else if let Some(caps) = IR_RE.captures(response) {
            self.publish(
                ChannelAddress::Primary(PrimaryVerb::IrEnable),
                State::OnOff(&caps[1] == "ON"),
            );
        } else if let Some(caps) = PORT_SWITCH_RE.captures(response) {
            if let (Some(input), Some(output)) = (port(&caps[1]), port(&caps[2])) {
                self.publish(
                    ChannelAddress::Port {
                        port: output,
                        verb: PortVerb::PortOutput,
                    },
                    State::Decimal(f64::from(input)),
                );
            }
        } else if let Some(caps) = PORT_POWER_RE.captures(response) {
            if let Some(output) = port(&caps[1]) {
                self.publish(
                    ChannelAddress::Port {
                        port: output,
                        verb: PortVerb::PortPower,
                    },
                    State::OnOff(&caps[2] == "on"),
                );
            }
        } else if let Some(caps) = MIRROR_RE.captures(response) {
            if let (Some(hdmi_port), Some(output)) = (port(&caps[1]), port(&caps[2])) {
                self.publish_mirror(hdmi_port, output);
            }
        } else if let Some(caps) = MIRROR_OFF_RE.captures(response) {
            let hdmi_port = caps.get(1).or_else(|| caps.get(2)).and_then(|m| port(m.as_str()));
            if let Some(hdmi_port) = hdmi_port {
                self.publish_mirror(hdmi_port, 0);
            }
        } else if let Some(caps) = VOLUME_RE.captures(response) {
            if let (Some(audio_port), Ok(level)) = (port(&caps[1]), caps[2].parse::<i32>()) {
                self.publish(
                    ChannelAddress::Volume {
                        port: audio_port,
                        verb: VolumeVerb::Volume,
                    },
                    State::Decimal(f64::from(level)),
                );
            }
        } else if let Some(caps) = VOLUME_MUTE_RE.captures(response) {
            if let Some(audio_port) = port(&caps[1]) {
                self.publish(
                    ChannelAddress::Volume {
                        port: audio_port,
                        verb: VolumeVerb::VolumeMute,
                    },
                    State::OnOff(&caps[2] == "on"),
                );
            }
        } else if PRESET_RE.is_match(response) || MATRIX_RE.is_match(response) {
            debug!("Switch acknowledged: {}", response);
        } else if VERSION_RE.is_match(response) {
            self.callback.set_property(PROPERTY_VERSION, response);
        } else if TYPE_RE.is_match(response) {
            self.callback.set_property(PROPERTY_TYPE, response);
        } else if let Some(caps) = FAILED_RE.captures(response) {
            warn!("Switch rejected a command: {}", &caps[1]);
        } else {
            debug!("Unhandled response: {}", response);
        }
    }

    fn publish_mirror(&self, hdmi_port: u8, output: u8) {
        self.publish(
            ChannelAddress::Mirror {
                hdmi_port,
                verb: MirrorVerb::PortMirror,
            },
            State::Decimal(f64::from(output)),
        );
        self.publish(
            ChannelAddress::Mirror {
                hdmi_port,
                verb: MirrorVerb::PortMirrorEnabled,
            },
            State::OnOff(output > 0),
        );
    }
}

/// Encodes operations into OPUS telnet commands, performs the login
/// handshake and runs the inbound decode loop.
pub struct OpusProtocolHandler {
    session: Arc<dyn SocketSession>,
    config: Arc<OpusConfig>,
    capabilities: Arc<OpusCapabilities>,
    callback: Arc<StatefulHandlerCallback>,
    decoder: ResponseDecoder,
    decode_task: Mutex<Option<JoinHandle<()>>>,
    // Set once a write failure has been reported for the current connection.
    reported_offline: AtomicBool,
}

impl OpusProtocolHandler {
    pub fn new(
        session: Arc<dyn SocketSession>,
        config: Arc<OpusConfig>,
        capabilities: Arc<OpusCapabilities>,
        callback: Arc<StatefulHandlerCallback>,
    ) -> Self {
        Self {
            session,
            config,
            capabilities,
            decoder: ResponseDecoder::new(callback.clone()),
            callback,
            decode_task: Mutex::new(None),
            reported_offline: AtomicBool::new(false),
        }
    }

    pub fn callback(&self) -> &Arc<StatefulHandlerCallback> {
        &self.callback
    }

    pub fn decoder(&self) -> &ResponseDecoder {
        &self.decoder
    }

    async fn read_response(&self, rx: &mut mpsc::Receiver<String>) -> Result<String, OpusError> {
        match timeout(SETTINGS.response_timeout, rx.recv()).await {
            Ok(Some(line)) => Ok(line),
            Ok(None) => Err(OpusError::NotConnected),
            Err(_) => Err(OpusError::Timeout),
        }
    }

    /// Logs into the switch if it asks for it, then starts decoding inbound
    /// frames and queries the version and model. Returns `None` on success
    /// or the reason the login failed.
    pub async fn login(&self) -> Result<Option<String>, OpusError> {
        self.reported_offline.store(false, Ordering::SeqCst);
        let mut rx = self.session.listen();

        // An empty line either draws a login prompt or a command error
        self.session.send_command("").await?;
        let response = match self.read_response(&mut rx).await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "No answer to the initial command");
                return Ok(Some(
                    "Atlona protocol violation - didn't respond to initial command".to_string(),
                ));
            }
        };

        if LOGIN_PROMPT_RE.is_match(&response) {
            if let Some(reason) = self.authenticate(&mut rx).await? {
                return Ok(Some(reason));
            }
        } else if FAILED_RE.is_match(&response) {
            debug!("Switch does not require a login");
        } else {
            debug!("Unexpected response to initial command: {}", response);
            self.decoder.handle_response(&response);
        }

        // From here on every frame goes through the decoder
        self.start_decoding(rx);
        if let Err(e) = self.post_login().await {
            self.stop_decoding();
            return Ok(Some(format!("Exception occurred sending to Atlona: {}", e)));
        }
        Ok(None)
    }

    async fn authenticate(
        &self,
        rx: &mut mpsc::Receiver<String>,
    ) -> Result<Option<String>, OpusError> {
        if !self.config.has_credentials() {
            return Ok(Some(
                "Atlona Opus requires a user name and password but none were configured"
                    .to_string(),
            ));
        }
        let user_name = self.config.user_name.as_deref().unwrap_or_default();
        let password = self.config.password.as_deref().unwrap_or_default();

        // User name, then expect the password prompt
        self.session.send_command(user_name).await?;
        match self.read_response(rx).await {
            Ok(response) if PASSWORD_PROMPT_RE.is_match(&response) => {}
            Ok(response) => {
                return Ok(Some(format!(
                    "Atlona protocol violation - unexpected response to user name: {}",
                    response
                )))
            }
            Err(_) => {
                return Ok(Some(
                    "Atlona protocol violation - no response to user name".to_string(),
                ))
            }
        }

        // Password, then expect the welcome banner
        self.session.send_command(password).await?;
        match self.read_response(rx).await {
            Ok(response) if WELCOME_RE.is_match(&response) => {
                info!("Logged into the switch");
                Ok(None)
            }
            Ok(_) => Ok(Some("Invalid user name/password".to_string())),
            Err(_) => Ok(Some(
                "Atlona protocol violation - no response to password".to_string(),
            )),
        }
    }

    fn start_decoding(&self, mut rx: mpsc::Receiver<String>) {
        let decoder = self.decoder.clone();
        let task = tokio::spawn(async move {
            // Runs until the session drops the listener
            while let Some(line) = rx.recv().await {
                decoder.handle_response(&line);
            }
            trace!("Decode loop finished");
        });
        let previous = self
            .decode_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        // Only one decode loop per connection
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops the decode loop of the current connection, if any.
    pub fn stop_decoding(&self) {
        let task = self
            .decode_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }

    // A transport failure here means the session is already unusable.
    async fn post_login(&self) -> Result<(), OpusError> {
        self.refresh_version().await?;
        self.refresh_type().await
    }

    async fn send(&self, command: &str) -> Result<(), OpusError> {
        match self.session.send_command(command).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Report once per connection, the teardown follows on its own
                if !self.reported_offline.swap(true, Ordering::SeqCst) {
                    self.callback.status_changed(
                        ThingStatus::Offline,
                        ThingStatusDetail::CommunicationError,
                        Some(&format!("Exception occurred sending to Atlona: {}", e)),
                    );
                }
                if e.kind() == io::ErrorKind::NotConnected {
                    Err(OpusError::NotConnected)
                } else {
                    Err(OpusError::Io(e))
                }
            }
        }
    }

    fn reject(&self, operation: &'static str, error: OpusError) -> Result<(), OpusError> {
        debug!(error = %error, "Rejected {}", operation);
        Err(error)
    }

    fn check_output_port(&self, port: i64) -> Result<(), OpusError> {
        if self.capabilities.is_output_port(port) {
            Ok(())
        } else {
            Err(OpusError::UnsupportedPort {
                what: "output port",
                port,
            })
        }
    }

    fn check_audio_port(&self, port: i64) -> Result<(), OpusError> {
        if self.capabilities.is_audio_port(port) {
            Ok(())
        } else {
            Err(OpusError::UnsupportedPort {
                what: "audio port",
                port,
            })
        }
    }

    fn check_hdmi_port(&self, port: i64) -> Result<(), OpusError> {
        if self.capabilities.is_hdmi_port(port) {
            Ok(())
        } else {
            Err(OpusError::UnsupportedPort {
                what: "hdmi port",
                port,
            })
        }
    }

    /// Issues every state query. Each query stands alone; a failed one does
    /// not stop the rest.
    pub async fn refresh_all(&self) {
        debug!("Refreshing all state");
        let mut failures = 0usize;
        let mut note = |result: Result<(), OpusError>| {
            if result.is_err() {
                failures += 1;
            }
        };

        note(self.refresh_power().await);
        note(self.refresh_panel_lock().await);
        note(self.refresh_ir().await);
        for port in 1..=i64::from(self.capabilities.power_port_count()) {
            note(self.refresh_port_status(port).await);
            note(self.refresh_port_power(port).await);
        }
        for hdmi_port in self.capabilities.hdmi_ports().iter().copied() {
            note(self.refresh_port_mirror(i64::from(hdmi_port)).await);
        }
        for port in 1..=i64::from(self.capabilities.audio_port_count()) {
            note(self.refresh_volume_status(port).await);
            note(self.refresh_volume_mute(port).await);
        }

        if failures > 0 {
            debug!("{} refresh queries failed", failures);
        }
    }

    /// Keepalive ping; the answer only refreshes the version property.
    pub async fn ping(&self) {
        trace!("Pinging switch");
        let _ = self.send(CMD_VERSION).await;
    }

    pub async fn execute(&self, operation: &Operation) -> Result<(), OpusError> {
        trace!("Executing {}", get_operation_name(operation));
        match *operation {
            Operation::SetPower(on) => self.set_power(on).await,
            Operation::SetPanelLock(lock) => self.set_panel_lock(lock).await,
            Operation::SetIrOn(on) => self.set_ir_on(on).await,
            Operation::Matrix(MatrixCommand::ResetMatrix) => self.reset_matrix().await,
            Operation::Matrix(MatrixCommand::ResetPorts) => self.reset_all_ports().await,
            Operation::Matrix(MatrixCommand::AllPorts(port)) => {
                self.set_port_all(i64::from(port)).await
            }
            Operation::Preset(PresetCommand::Save(preset)) => {
                self.save_io_settings(i64::from(preset)).await
            }
            Operation::Preset(PresetCommand::Recall(preset)) => {
                self.recall_io_settings(i64::from(preset)).await
            }
            Operation::Preset(PresetCommand::Clear(preset)) => {
                self.clear_io_settings(i64::from(preset)).await
            }
            Operation::SetPortSwitch { input, output } => {
                self.set_port_switch(input, i64::from(output)).await
            }
            Operation::SetPortPower { port, on } => self.set_port_power(i64::from(port), on).await,
            Operation::SetPortMirror {
                hdmi_port,
                output_port,
            } => self.set_port_mirror(i64::from(hdmi_port), output_port).await,
            Operation::RemovePortMirror { hdmi_port } => {
                self.remove_port_mirror(i64::from(hdmi_port)).await
            }
            Operation::SetVolume { port, level } => self.set_volume(i64::from(port), level).await,
            Operation::SetVolumeMute { port, mute } => {
                self.set_volume_mute(i64::from(port), mute).await
            }
        }
    }

    pub async fn set_power(&self, on: bool) -> Result<(), OpusError> {
        self.send(if on { CMD_POWER_ON } else { CMD_POWER_OFF }).await
    }

    pub async fn set_panel_lock(&self, lock: bool) -> Result<(), OpusError> {
        self.send(if lock { CMD_PANEL_LOCK } else { CMD_PANEL_UNLOCK })
            .await
    }

    pub async fn set_ir_on(&self, on: bool) -> Result<(), OpusError> {
        self.send(if on { CMD_IR_ON } else { CMD_IR_OFF }).await
    }

    /// Routes input `input` to output `output`.
    pub async fn set_port_switch(&self, input: i64, output: i64) -> Result<(), OpusError> {
        if let Err(e) = check_range("input port", input, 1, MAX_INPUT_PORT)
            .and_then(|_| self.check_output_port(output))
        {
            return self.reject("setPortSwitch", e);
        }
        self.send(&format!("x{}AVx{}", input, output)).await
    }

    pub async fn set_port_power(&self, port: i64, on: bool) -> Result<(), OpusError> {
        if let Err(e) = self.check_output_port(port) {
            return self.reject("setPortPower", e);
        }
        self.send(&format!("x{}$ {}", port, on_off(on))).await
    }

    /// Routes input `input` to every output.
    pub async fn set_port_all(&self, input: i64) -> Result<(), OpusError> {
        if let Err(e) = check_range("input port", input, 1, MAX_INPUT_PORT) {
            return self.reject("setPortAll", e);
        }
        self.send(&format!("x{}All", input)).await
    }

    pub async fn set_port_mirror(&self, hdmi_port: i64, output_port: i64) -> Result<(), OpusError> {
        if let Err(e) = self
            .check_hdmi_port(hdmi_port)
            .and_then(|_| self.check_output_port(output_port))
        {
            return self.reject("setPortMirror", e);
        }
        self.send(&format!("MirrorHdmi{} Out{}", hdmi_port, output_port))
            .await
    }

    pub async fn remove_port_mirror(&self, hdmi_port: i64) -> Result<(), OpusError> {
        if let Err(e) = self.check_hdmi_port(hdmi_port) {
            return self.reject("removePortMirror", e);
        }
        self.send(&format!("UnMirror{}", hdmi_port)).await
    }

    /// Sets the level (dB) of an audio output.
    pub async fn set_volume(&self, port: i64, level: f64) -> Result<(), OpusError> {
        let db = if level.is_finite() {
            level.round() as i64
        } else {
            i64::MIN
        };
        if let Err(e) = self
            .check_audio_port(port)
            .and_then(|_| check_range("volume", db, MIN_VOLUME_DB, MAX_VOLUME_DB))
        {
            return self.reject("setVolume", e);
        }
        self.send(&format!("VOUT{} {}", port, db)).await
    }

    pub async fn set_volume_mute(&self, port: i64, mute: bool) -> Result<(), OpusError> {
        if let Err(e) = self.check_audio_port(port) {
            return self.reject("setVolumeMute", e);
        }
        self.send(&format!("VOUTMute{} {}", port, on_off(mute))).await
    }

    pub async fn save_io_settings(&self, preset: i64) -> Result<(), OpusError> {
        if let Err(e) = check_range("preset", preset, 1, MAX_PRESET) {
            return self.reject("saveIoSettings", e);
        }
        self.send(&format!("Save{}", preset)).await
    }

    pub async fn recall_io_settings(&self, preset: i64) -> Result<(), OpusError> {
        if let Err(e) = check_range("preset", preset, 1, MAX_PRESET) {
            return self.reject("recallIoSettings", e);
        }
        self.send(&format!("Recall{}", preset)).await
    }

    pub async fn clear_io_settings(&self, preset: i64) -> Result<(), OpusError> {
        if let Err(e) = check_range("preset", preset, 1, MAX_PRESET) {
            return self.reject("clearIoSettings", e);
        }
        self.send(&format!("Clear{}", preset)).await
    }

    pub async fn reset_matrix(&self) -> Result<(), OpusError> {
        self.send(CMD_MATRIX_RESET).await
    }

    pub async fn reset_all_ports(&self) -> Result<(), OpusError> {
        self.send(CMD_MATRIX_RESET_PORTS).await
    }

    pub async fn refresh_power(&self) -> Result<(), OpusError> {
        self.send(CMD_POWER_STATUS).await
    }

    pub async fn refresh_panel_lock(&self) -> Result<(), OpusError> {
        self.send(CMD_PANEL_STATUS).await
    }

    pub async fn refresh_ir(&self) -> Result<(), OpusError> {
        self.send(CMD_IR_STATUS).await
    }

    pub async fn refresh_port_status(&self, output: i64) -> Result<(), OpusError> {
        if let Err(e) = self.check_output_port(output) {
            return self.reject("refreshPortStatus", e);
        }
        self.send(&format!("Statusx{}", output)).await
    }

    pub async fn refresh_port_power(&self, output: i64) -> Result<(), OpusError> {
        if let Err(e) = self.check_output_port(output) {
            return self.reject("refreshPortPower", e);
        }
        self.send(&format!("x{}$ sta", output)).await
    }

    pub async fn refresh_port_mirror(&self, hdmi_port: i64) -> Result<(), OpusError> {
        if let Err(e) = self.check_hdmi_port(hdmi_port) {
            return self.reject("refreshPortMirror", e);
        }
        self.send(&format!("MirrorHdmi{} sta", hdmi_port)).await
    }

    pub async fn refresh_volume_status(&self, port: i64) -> Result<(), OpusError> {
        if let Err(e) = self.check_audio_port(port) {
            return self.reject("refreshVolumeStatus", e);
        }
        self.send(&format!("VOUT{} sta", port)).await
    }

    pub async fn refresh_volume_mute(&self, port: i64) -> Result<(), OpusError> {
        if let Err(e) = self.check_audio_port(port) {
            return self.reject("refreshVolumeMute", e);
        }
        self.send(&format!("VOUTMute{} sta", port)).await
    }

    pub async fn refresh_version(&self) -> Result<(), OpusError> {
        self.send(CMD_VERSION).await
    }

    pub async fn refresh_type(&self) -> Result<(), OpusError> {
        self.send(CMD_TYPE).await
    }

    /// Issues the state query behind a single channel.
    pub async fn refresh_channel(&self, address: &ChannelAddress) -> Result<(), OpusError> {
        match *address {
            ChannelAddress::Primary(PrimaryVerb::Power) => self.refresh_power().await,
            ChannelAddress::Primary(PrimaryVerb::PanelLock) => self.refresh_panel_lock().await,
            ChannelAddress::Primary(PrimaryVerb::IrEnable) => self.refresh_ir().await,
            ChannelAddress::Primary(PrimaryVerb::MatrixCmd | PrimaryVerb::PresetCmd) => Ok(()),
            ChannelAddress::Port {
                port,
                verb: PortVerb::PortOutput,
            } => self.refresh_port_status(i64::from(port)).await,
            ChannelAddress::Port {
                port,
                verb: PortVerb::PortPower,
            } => self.refresh_port_power(i64::from(port)).await,
            ChannelAddress::Mirror { hdmi_port, .. } => {
                self.refresh_port_mirror(i64::from(hdmi_port)).await
            }
            ChannelAddress::Volume {
                port,
                verb: VolumeVerb::Volume,
            } => self.refresh_volume_status(i64::from(port)).await,
            ChannelAddress::Volume {
                port,
                verb: VolumeVerb::VolumeMute,
            } => self.refresh_volume_mute(i64::from(port)).await,
        }
    }
}

impl Drop for OpusProtocolHandler {
    fn drop(&mut self) {
        self.stop_decoding();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::StateLookup;
    use crate::events::{EventCallback, OpusEvent};

    fn decoder() -> (ResponseDecoder, Arc<StatefulHandlerCallback>, EventCallback) {
        let events = EventCallback::with_capacity(64);
        let callback = Arc::new(StatefulHandlerCallback::new(Arc::new(events.clone())));
        (ResponseDecoder::new(callback.clone()), callback, events)
    }

    #[test]
    fn test_decodes_primary_state() {
        let (decoder, states, _) = decoder();
        decoder.handle_response("PWON");
        decoder.handle_response("Lock");
        decoder.handle_response("IROFF");
        assert_eq!(states.get_state("primary::power"), Some(State::OnOff(true)));
        assert_eq!(states.get_state("primary::panellock"), Some(State::OnOff(true)));
        assert_eq!(states.get_state("primary::irenable"), Some(State::OnOff(false)));
    }

    #[test]
    fn test_decodes_port_mirror_and_volume() {
        let (decoder, states, _) = decoder();
        decoder.handle_response("x3AVx2");
        decoder.handle_response("x2$ on");
        decoder.handle_response("MirrorHdmi5 Out2");
        decoder.handle_response("VOUT1 -20");
        decoder.handle_response("VOUTMute1 on");

        assert_eq!(states.get_state("port2::portoutput"), Some(State::Decimal(3.0)));
        assert_eq!(states.get_state("port2::portpower"), Some(State::OnOff(true)));
        assert_eq!(states.get_state("mirror5::portmirror"), Some(State::Decimal(2.0)));
        assert_eq!(states.get_state("mirror5::portmirrorenabled"), Some(State::OnOff(true)));
        assert_eq!(states.get_state("volume1::volume"), Some(State::Decimal(-20.0)));
        assert_eq!(states.get_state("volume1::volumemute"), Some(State::OnOff(true)));

        decoder.handle_response("UnMirror5");
        assert_eq!(states.get_state("mirror5::portmirror"), Some(State::Decimal(0.0)));
        assert_eq!(states.get_state("mirror5::portmirrorenabled"), Some(State::OnOff(false)));
    }

    #[test]
    fn test_properties_and_garbage() {
        let (decoder, states, events) = decoder();
        let mut rx = events.subscribe();
        decoder.handle_response("V1.6.3");
        decoder.handle_response("AT-OPUS-810M");
        decoder.handle_response("Command FAILED: (x99AVx1)");
        decoder.handle_response("\u{fffd}\u{fffd}PW");
        decoder.handle_response("x1AVx");

        assert_eq!(
            rx.try_recv().unwrap(),
            OpusEvent::PropertyChanged {
                name: PROPERTY_VERSION.to_string(),
                value: "V1.6.3".to_string()
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            OpusEvent::PropertyChanged {
                name: PROPERTY_TYPE.to_string(),
                value: "AT-OPUS-810M".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(states.get_state("port1::portoutput"), None);
    }
}
