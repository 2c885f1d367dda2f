use crate::link::{
    AckResult, CMD_ACCELCAL_VEHICLE_POS, CMD_PREFLIGHT_CALIBRATION, CMD_PREFLIGHT_REBOOT, CalibrationFlags, CommandAck, FlightLink, InboundMessage,
    LinkError, Severity,
};
use crate::{event, info};
use async_trait::async_trait;
use std::{
    collections::HashSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::{Mutex, mpsc::UnboundedSender},
    task::JoinHandle,
    time::{interval, sleep},
};

/// A command the simulated vehicle received.
#[derive(Debug, Clone, PartialEq)]
pub enum SentCommand {
    RequestAll,
    RequestIndex(u16),
    Set(String, f32),
    CalibrationStart(CalibrationFlags),
    CalibrationCancel,
    PositionConfirm(u8),
    Reboot,
}

/// Behaviour knobs of a [`SimVehicle`].
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// The parameter table served by the vehicle, in index order.
    pub params: Vec<(String, f32)>,
    /// Indices that are never delivered.
    pub withheld: HashSet<u16>,
    /// Indices dropped when streaming all parameters but delivered on individual request.
    pub lossy_broadcast: HashSet<u16>,
    /// Gap between two streamed parameter values.
    pub stream_interval: Duration,
    /// Delay before answering a single request or a write.
    pub reply_delay: Duration,
    pub echo_writes: bool,
    pub answer_reads: bool,
    /// Whether "request all" is answered at all.
    pub answer_request_all: bool,
    /// Answer calibration start with a rejecting acknowledgement.
    pub reject_calibration: bool,
    /// Emit heartbeats at 1 Hz from [`SimVehicle::start_heartbeat`].
    pub heartbeat: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            params: SimVehicle::default_params(),
            withheld: HashSet::new(),
            lossy_broadcast: HashSet::new(),
            stream_interval: Duration::from_millis(20),
            reply_delay: Duration::from_millis(50),
            echo_writes: true,
            answer_reads: true,
            answer_request_all: true,
            reject_calibration: false,
            heartbeat: true,
        }
    }
}

/// In-process stand-in for a flight controller behind a lossy telemetry link.
///
/// Every reply is pushed into the same inbound channel a real transport would feed.
pub struct SimVehicle {
    config: SimConfig,
    params: Mutex<Vec<(String, f32)>>,
    inbound: UnboundedSender<InboundMessage>,
    connected: AtomicBool,
    heartbeat: AtomicBool,
    echo_writes: AtomicBool,
    answer_reads: AtomicBool,
    /// 1-based accelerometer position the vehicle currently expects, 0 if idle.
    accel_position: AtomicU8,
    sent: Mutex<Vec<SentCommand>>,
}

impl SimVehicle {
    const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
    const POSITION_PROMPTS: [&'static str; 6] = [
        "Place vehicle level and press any key.",
        "Place vehicle on its LEFT side and press any key.",
        "Place vehicle on its RIGHT side and press any key.",
        "Place vehicle nose DOWN and press any key.",
        "Place vehicle nose UP and press any key.",
        "Place vehicle on its BACK and press any key.",
    ];

    pub fn new(config: SimConfig, inbound: UnboundedSender<InboundMessage>) -> Arc<Self> {
        Arc::new(Self {
            params: Mutex::new(config.params.clone()),
            inbound,
            connected: AtomicBool::new(true),
            heartbeat: AtomicBool::new(config.heartbeat),
            echo_writes: AtomicBool::new(config.echo_writes),
            answer_reads: AtomicBool::new(config.answer_reads),
            accel_position: AtomicU8::new(0),
            sent: Mutex::new(Vec::new()),
            config,
        })
    }

    /// A small ArduPilot-like parameter table.
    pub fn default_params() -> Vec<(String, f32)> {
        [
            ("SYSID_THISMAV", 1.0),
            ("SYSID_MYGCS", 255.0),
            ("SR0_EXTRA1", 4.0),
            ("SR0_POSITION", 2.0),
            ("SR0_RAW_SENS", 2.0),
            ("ARMING_CHECK", 1.0),
            ("BATT_CAPACITY", 3300.0),
            ("BATT_MONITOR", 4.0),
            ("INS_ACCOFFS_X", 0.0),
            ("INS_ACCOFFS_Y", 0.0),
            ("INS_ACCOFFS_Z", 0.0),
            ("INS_ACCSCAL_X", 1.0),
            ("INS_ACCSCAL_Y", 1.0),
            ("INS_ACCSCAL_Z", 1.0),
            ("INS_GYROFFS_X", 0.0),
            ("INS_GYROFFS_Y", 0.0),
            ("INS_GYROFFS_Z", 0.0),
            ("COMPASS_OFS_X", 0.0),
            ("COMPASS_OFS_Y", 0.0),
            ("COMPASS_OFS_Z", 0.0),
            ("AHRS_TRIM_X", 0.0),
            ("AHRS_TRIM_Y", 0.0),
            ("AHRS_ORIENTATION", 0.0),
            ("FRAME_CLASS", 1.0),
        ]
        .into_iter()
        .map(|(n, v)| (n.to_string(), v))
        .collect()
    }

    /// Spawns the 1 Hz heartbeat generator. Beats are skipped while heartbeats are disabled
    /// or the link is down.
    pub fn start_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let sim = Arc::clone(self);
        tokio::spawn(async move {
            let mut beat = interval(Self::HEARTBEAT_INTERVAL);
            loop {
                beat.tick().await;
                let alive =
                    sim.heartbeat.load(Ordering::Relaxed) && sim.connected.load(Ordering::Relaxed);
                if alive && sim.inbound.send(InboundMessage::Heartbeat).is_err() {
                    break;
                }
            }
        })
    }

    pub fn set_heartbeat(&self, enabled: bool) { self.heartbeat.store(enabled, Ordering::Relaxed); }

    pub fn set_echo_writes(&self, enabled: bool) {
        self.echo_writes.store(enabled, Ordering::Relaxed);
    }

    pub fn set_answer_reads(&self, enabled: bool) {
        self.answer_reads.store(enabled, Ordering::Relaxed);
    }

    /// Simulates losing or regaining the radio link.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
        info!("Simulated link {}.", if connected { "restored" } else { "dropped" });
        let _ = self.inbound.send(InboundMessage::ConnectionState(connected));
    }

    /// Injects a status text as if the firmware had sent it.
    pub fn emit_status(&self, severity: Severity, text: &str) {
        let _ = self.inbound.send(InboundMessage::StatusText { severity, text: text.to_string() });
    }

    /// Every command received so far, in order.
    pub async fn sent(&self) -> Vec<SentCommand> { self.sent.lock().await.clone() }

    pub async fn param(&self, name: &str) -> Option<f32> {
        self.params.lock().await.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|p| p.1)
    }

    async fn record(&self, cmd: SentCommand) -> Result<(), LinkError> {
        if !self.connected.load(Ordering::Relaxed) {
            return Err(LinkError::Disconnected);
        }
        event!("SIM <- {cmd:?}");
        self.sent.lock().await.push(cmd);
        Ok(())
    }

    fn push_value(&self, name: &str, value: f32, index: usize, total: usize) {
        let _ = self.inbound.send(InboundMessage::ParamValue {
            name: name.to_string(),
            value,
            index: u16::try_from(index).unwrap_or(u16::MAX),
            total: u16::try_from(total).unwrap_or(u16::MAX),
        });
    }

    /// Delivers `msg` after `delay` unless the link went down meanwhile.
    fn reply_later(self: &Arc<Self>, delay: Duration, msg: InboundMessage) {
        let sim = Arc::clone(self);
        tokio::spawn(async move {
            sleep(delay).await;
            if sim.connected.load(Ordering::Relaxed) {
                let _ = sim.inbound.send(msg);
            }
        });
    }

    fn status(text: &str) -> InboundMessage {
        InboundMessage::StatusText { severity: Severity::Info, text: text.to_string() }
    }
}

/// Thin handle so the vehicle can be shared as an `Arc<dyn FlightLink>` while the
/// simulation keeps its own `Arc<SimVehicle>`.
pub struct SimLink(pub Arc<SimVehicle>);

#[async_trait]
impl FlightLink for SimLink {
    async fn send_request_all_parameters(&self) -> Result<(), LinkError> {
        let sim = &self.0;
        sim.record(SentCommand::RequestAll).await?;
        if !sim.config.answer_request_all {
            return Ok(());
        }
        let table = sim.params.lock().await.clone();
        let sim = Arc::clone(sim);
        tokio::spawn(async move {
            let total = table.len();
            for (index, (name, value)) in table.iter().enumerate() {
                sleep(sim.config.stream_interval).await;
                if !sim.connected.load(Ordering::Relaxed) {
                    return;
                }
                let idx = u16::try_from(index).unwrap_or(u16::MAX);
                if sim.config.withheld.contains(&idx) || sim.config.lossy_broadcast.contains(&idx) {
                    continue;
                }
                sim.push_value(name, *value, index, total);
            }
        });
        Ok(())
    }

    async fn send_request_parameter_by_index(&self, index: u16) -> Result<(), LinkError> {
        let sim = &self.0;
        sim.record(SentCommand::RequestIndex(index)).await?;
        if !sim.answer_reads.load(Ordering::Relaxed) || sim.config.withheld.contains(&index) {
            return Ok(());
        }
        let table = sim.params.lock().await;
        if let Some((name, value)) = table.get(usize::from(index)) {
            let msg = InboundMessage::ParamValue {
                name: name.clone(),
                value: *value,
                index,
                total: u16::try_from(table.len()).unwrap_or(u16::MAX),
            };
            sim.reply_later(sim.config.reply_delay, msg);
        }
        Ok(())
    }

    async fn send_set_parameter(&self, name: &str, value: f32) -> Result<(), LinkError> {
        let sim = &self.0;
        sim.record(SentCommand::Set(name.to_string(), value)).await?;
        let mut table = sim.params.lock().await;
        let index = match table.iter().position(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(i) => {
                table[i].1 = value;
                i
            }
            None => {
                table.push((name.to_ascii_uppercase(), value));
                table.len() - 1
            }
        };
        if sim.echo_writes.load(Ordering::Relaxed) {
            let msg = InboundMessage::ParamValue {
                name: table[index].0.clone(),
                value,
                index: u16::try_from(index).unwrap_or(u16::MAX),
                total: u16::try_from(table.len()).unwrap_or(u16::MAX),
            };
            sim.reply_later(sim.config.reply_delay, msg);
        }
        Ok(())
    }

    async fn send_calibration_start(&self, flags: CalibrationFlags) -> Result<(), LinkError> {
        let sim = &self.0;
        sim.record(SentCommand::CalibrationStart(flags)).await?;
        let result =
            if sim.config.reject_calibration { AckResult::Denied } else { AckResult::Accepted };
        let ack = CommandAck { command: CMD_PREFLIGHT_CALIBRATION, result };
        sim.reply_later(sim.config.reply_delay, InboundMessage::CommandAck(ack));
        if result.is_rejection() {
            return Ok(());
        }
        if flags.accelerometer == 1 {
            sim.accel_position.store(1, Ordering::Relaxed);
            sim.reply_later(sim.config.reply_delay, SimVehicle::status(SimVehicle::POSITION_PROMPTS[0]));
        } else {
            sim.reply_later(sim.config.reply_delay, SimVehicle::status("Calibration started"));
        }
        Ok(())
    }

    async fn send_calibration_cancel(&self) -> Result<(), LinkError> {
        let sim = &self.0;
        sim.record(SentCommand::CalibrationCancel).await?;
        sim.accel_position.store(0, Ordering::Relaxed);
        sim.reply_later(sim.config.reply_delay, SimVehicle::status("Calibration cancelled by GCS"));
        Ok(())
    }

    async fn send_position_confirm(&self, position: u8) -> Result<(), LinkError> {
        let sim = &self.0;
        sim.record(SentCommand::PositionConfirm(position)).await?;
        let expected = sim.accel_position.load(Ordering::Relaxed) == position;
        let result = if expected { AckResult::Accepted } else { AckResult::TemporarilyRejected };
        let ack = CommandAck { command: CMD_ACCELCAL_VEHICLE_POS, result };
        sim.reply_later(sim.config.reply_delay, InboundMessage::CommandAck(ack));
        if !expected {
            return Ok(());
        }
        if usize::from(position) < SimVehicle::POSITION_PROMPTS.len() {
            sim.accel_position.store(position + 1, Ordering::Relaxed);
            let prompt = SimVehicle::POSITION_PROMPTS[usize::from(position)];
            sim.reply_later(sim.config.reply_delay, SimVehicle::status(prompt));
        } else {
            sim.accel_position.store(0, Ordering::Relaxed);
            let mut table = sim.params.lock().await;
            for (name, value) in table.iter_mut() {
                match name.as_str() {
                    "INS_ACCOFFS_X" => *value = 0.12,
                    "INS_ACCOFFS_Y" => *value = -0.08,
                    "INS_ACCOFFS_Z" => *value = 0.31,
                    "INS_ACCSCAL_X" => *value = 1.002,
                    "INS_ACCSCAL_Y" => *value = 0.997,
                    "INS_ACCSCAL_Z" => *value = 1.011,
                    _ => {}
                }
            }
            sim.reply_later(sim.config.reply_delay, SimVehicle::status("Calibration successful"));
        }
        Ok(())
    }

    async fn send_reboot_command(&self) -> Result<(), LinkError> {
        let sim = &self.0;
        sim.record(SentCommand::Reboot).await?;
        let ack = CommandAck { command: CMD_PREFLIGHT_REBOOT, result: AckResult::Accepted };
        sim.reply_later(sim.config.reply_delay, InboundMessage::CommandAck(ack));
        Ok(())
    }

    fn is_connected(&self) -> bool { self.0.connected.load(Ordering::Relaxed) }
}
