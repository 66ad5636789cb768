//! # Command Scheduler
//!
//! Drives one ESC session: owns the arm state, the live throttle, the rolling
//! counter and the transport, and retransmits the full command at a fixed
//! cadence (80 ms by default). The ESC drops out of the armed state when
//! commands stop, so every operation keeps frames flowing for its whole
//! duration.
//!
//! Between transmissions the scheduler listens for inbound bytes and feeds
//! them through the stream framer and the telemetry decoder.
//!
//! ## Cancellation
//!
//! Operation futures may be dropped at any await point (e.g. from a
//! `tokio::select!` on Ctrl+C). The scheduler stays consistent, and
//! [`CommandScheduler::shutdown`] then sends the disarm burst before
//! releasing the transport.
//!
//! ```no_run
//! use esc_bridge::config::Config;
//! use esc_bridge::scheduler::CommandScheduler;
//! use esc_bridge::serial::Rs485Bridge;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let bridge = Rs485Bridge::open(&config.serial).await?;
//!     let mut scheduler = CommandScheduler::new(bridge, &config);
//!
//!     scheduler.arm().await?;
//!     tokio::select! {
//!         result = scheduler.set_throttle([7, 0, 1000, 0], Duration::from_secs(5)) => result?,
//!         _ = tokio::signal::ctrl_c() => {}
//!     }
//!     scheduler.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod ramp;
pub mod state;

pub use ramp::RampPlan;
pub use state::{ArmState, LinkStats};

use state::TrackedState;

use std::collections::VecDeque;
use tokio::time::{sleep_until, timeout_at, Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{Config, SchedulerConfig};
use crate::error::{EscBridgeError, Result};
use crate::esc::decoder::decode_a021_feedback;
use crate::esc::encoder::encode_command;
use crate::esc::framer::{FramerEvent, FramerStats, StreamFramer};
use crate::esc::protocol::{
    Command, Frame, TelemetryReading, Throttle, CMD_ID_ESC_COMMAND, NUM_MOTORS,
};
use crate::serial::FrameTransport;
use crate::telemetry::{SequenceTracker, TelemetryRecord};

/// Readings kept for [`CommandScheduler::take_telemetry`]; oldest dropped first
const TELEMETRY_QUEUE_LIMIT: usize = 1024;

/// Cadence-driven command sender for one ESC session
pub struct CommandScheduler<T: FrameTransport> {
    transport: T,
    config: SchedulerConfig,
    reserved: u16,
    warn_on_drops: bool,

    state: TrackedState,
    throttle: Throttle,
    counter: u16,
    sequence: u8,
    /// Earliest time the next frame may go out
    next_slot: Instant,

    framer: StreamFramer,
    tracker: SequenceTracker,
    last_telemetry: Option<TelemetryReading>,
    pending: VecDeque<TelemetryRecord>,
    stats: LinkStats,
}

impl<T: FrameTransport> std::fmt::Debug for CommandScheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandScheduler")
            .field("state", &self.state.get())
            .field("throttle", &self.throttle)
            .field("counter", &self.counter)
            .field("sequence", &self.sequence)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl<T: FrameTransport> CommandScheduler<T> {
    /// Take ownership of `transport` for a new, disarmed session
    pub fn new(transport: T, config: &Config) -> Self {
        Self {
            transport,
            config: config.scheduler.clone(),
            reserved: config.protocol.reserved,
            warn_on_drops: config.telemetry.warn_on_drops,
            state: TrackedState::new(),
            throttle: [0; NUM_MOTORS],
            counter: 0,
            sequence: 0,
            next_slot: Instant::now(),
            framer: StreamFramer::new(),
            tracker: SequenceTracker::new(),
            last_telemetry: None,
            pending: VecDeque::new(),
            stats: LinkStats::default(),
        }
    }

    /// Start the rolling counter at `counter` instead of 0
    pub fn with_initial_counter(mut self, counter: u16) -> Self {
        self.counter = counter;
        self
    }

    pub fn state(&self) -> ArmState {
        self.state.get()
    }

    /// Counter value the next frame will carry
    pub fn counter(&self) -> u16 {
        self.counter
    }

    /// Sequence byte the next frame will carry
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    /// Live throttle (zero unless armed)
    pub fn throttle(&self) -> Throttle {
        self.throttle
    }

    /// Most recent ESC telemetry
    pub fn last_telemetry(&self) -> Option<TelemetryReading> {
        self.last_telemetry
    }

    /// Readings received since the last call, oldest first, stamped with
    /// their receive time
    pub fn take_telemetry(&mut self) -> Vec<TelemetryRecord> {
        self.pending.drain(..).collect()
    }

    /// Interval between command frames
    pub fn cadence(&self) -> Duration {
        self.config.cadence()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn framer_stats(&self) -> FramerStats {
        self.framer.stats()
    }

    /// Arm the ESC
    ///
    /// Sends the arm burst (armed flag, idle throttle) at cadence, then
    /// enters [`ArmState::Armed`]. Arming while armed is a no-op.
    ///
    /// # Errors
    ///
    /// * `InvalidState` if a previous burst was interrupted; call
    ///   [`shutdown`](Self::shutdown)
    /// * Transport errors, after the disarm burst has been attempted
    pub async fn arm(&mut self) -> Result<()> {
        match self.state.get() {
            ArmState::Armed => {
                info!("Already armed");
                return Ok(());
            }
            ArmState::Arming | ArmState::Disarming => {
                return Err(EscBridgeError::InvalidState {
                    state: self.state.get(),
                    operation: "arm",
                });
            }
            ArmState::Disarmed => {}
        }

        info!("Arming ({} frames)", self.config.arm_burst_frames);
        self.state.set(ArmState::Arming);
        self.throttle = self.config.idle_throttle;

        if let Err(e) = self.send_frames(self.config.arm_burst_frames).await {
            return Err(self.fail_safe(e).await);
        }

        self.state.set(ArmState::Armed);
        info!("Armed");
        Ok(())
    }

    /// Disarm the ESC
    ///
    /// Sends the disarm burst (flag clear, zero throttle) from any state
    /// except [`ArmState::Disarmed`], where it is a no-op.
    pub async fn disarm(&mut self) -> Result<()> {
        if self.state.get() == ArmState::Disarmed {
            info!("Already disarmed");
            return Ok(());
        }

        info!("Disarming ({} frames)", self.config.disarm_burst_frames);
        self.begin_disarm();

        if let Err(e) = self.send_frames(self.config.disarm_burst_frames).await {
            return Err(self.fail_safe(e).await);
        }

        self.state.set(ArmState::Disarmed);
        info!("Disarmed");
        Ok(())
    }

    /// Command `throttle` for `duration`
    ///
    /// The new throttle stays live after the call returns. At least one
    /// frame is sent; longer durations send one frame per started cadence
    /// interval. Values are not clamped.
    ///
    /// # Errors
    ///
    /// * `InvalidState` unless armed
    /// * Transport errors, after the disarm burst has been attempted
    pub async fn set_throttle(&mut self, throttle: Throttle, duration: Duration) -> Result<()> {
        self.require_armed("set throttle")?;

        debug!("Throttle {:?} for {:?}", throttle, duration);
        self.throttle = throttle;
        self.repeat_for(duration).await
    }

    /// Keep retransmitting the current command for `duration`
    pub async fn hold(&mut self, duration: Duration) -> Result<()> {
        self.require_armed("hold")?;
        self.repeat_for(duration).await
    }

    /// Ramp one motor up and back down, then return it to idle
    ///
    /// The other slots hold the configured idle throttle throughout.
    pub async fn ramp(&mut self, plan: &RampPlan) -> Result<()> {
        self.require_armed("ramp")?;

        let schedule = plan.schedule(self.config.idle_throttle);
        info!("Ramping motor {} over {} steps", plan.motor(), schedule.len() - 1);

        for (throttle, duration) in schedule {
            self.set_throttle(throttle, duration).await?;
        }

        info!("Motor {} back at idle", plan.motor());
        Ok(())
    }

    /// Receive and decode bus traffic for `duration` without transmitting
    ///
    /// Only allowed while disarmed; an armed ESC needs the command stream.
    pub async fn listen(&mut self, duration: Duration) -> Result<()> {
        if self.state.get() != ArmState::Disarmed {
            return Err(EscBridgeError::InvalidState {
                state: self.state.get(),
                operation: "listen",
            });
        }

        self.listen_until(Instant::now() + duration).await
    }

    /// End the session and release the transport
    ///
    /// Sends the disarm burst unless already disarmed, including after an
    /// interrupted operation. Disarm frames are best effort: every frame is
    /// attempted even if some fail.
    ///
    /// # Errors
    ///
    /// Returns the first send error of the disarm burst; the transport is
    /// dropped in that case.
    pub async fn shutdown(mut self) -> Result<T> {
        if self.state.get() != ArmState::Disarmed {
            warn!("Shutting down while {}, sending disarm burst", self.state.get());
            self.begin_disarm();
            let failure = self.best_effort_disarm().await;
            self.state.set(ArmState::Disarmed);

            if let Some(e) = failure {
                error!("Disarm burst incomplete: {}", e);
                return Err(e);
            }
            info!("Disarmed");
        }

        info!(
            "Session closed: {} frames sent, {} telemetry frames ({} dropped)",
            self.stats.frames_sent, self.stats.telemetry_frames, self.stats.telemetry_dropped
        );
        Ok(self.transport)
    }

    fn require_armed(&self, operation: &'static str) -> Result<()> {
        if self.state.get() == ArmState::Armed {
            Ok(())
        } else {
            Err(EscBridgeError::InvalidState {
                state: self.state.get(),
                operation,
            })
        }
    }

    fn begin_disarm(&mut self) {
        self.state.set(ArmState::Disarming);
        self.throttle = [0; NUM_MOTORS];
    }

    /// Frames needed to cover `duration` at the configured cadence
    ///
    /// Durations round up to whole frames, and never below one.
    pub fn frames_for(&self, duration: Duration) -> u32 {
        let cadence = self.config.cadence().as_nanos().max(1);
        let frames = (duration.as_nanos() + cadence - 1) / cadence;
        frames.clamp(1, u32::MAX as u128) as u32
    }

    async fn repeat_for(&mut self, duration: Duration) -> Result<()> {
        if let Err(e) = self.send_frames(self.frames_for(duration)).await {
            return Err(self.fail_safe(e).await);
        }
        Ok(())
    }

    async fn send_frames(&mut self, count: u32) -> Result<()> {
        for _ in 0..count {
            self.wait_for_slot().await?;
            self.transmit().await?;
        }
        Ok(())
    }

    /// Fatal error path: disarm as well as possible, then hand back `err`
    async fn fail_safe(&mut self, err: EscBridgeError) -> EscBridgeError {
        error!("Transport failure while {}: {}", self.state.get(), err);

        self.begin_disarm();
        if let Some(e) = self.best_effort_disarm().await {
            warn!("Disarm burst incomplete: {}", e);
        }
        self.state.set(ArmState::Disarmed);

        err
    }

    /// Send every disarm frame, returning the first failure
    async fn best_effort_disarm(&mut self) -> Option<EscBridgeError> {
        let mut first_error = None;

        for _ in 0..self.config.disarm_burst_frames {
            sleep_until(self.next_slot).await;
            if let Err(e) = self.transmit().await {
                warn!("Disarm frame failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        first_error
    }

    async fn wait_for_slot(&mut self) -> Result<()> {
        let slot = self.next_slot;
        if self.config.listen {
            self.listen_until(slot).await
        } else {
            sleep_until(slot).await;
            Ok(())
        }
    }

    fn current_command(&self) -> Command {
        let armed = self.state.get().sends_armed();
        Command {
            armed,
            throttle: if armed { self.throttle } else { [0; NUM_MOTORS] },
            counter: self.counter,
            state_byte: self.config.state_byte,
        }
    }

    /// Encode and send the current command in the current slot
    async fn transmit(&mut self) -> Result<()> {
        let command = self.current_command();
        let frame = encode_command(&command, self.reserved, self.sequence)?;

        let result = self.transport.send_frame(&frame).await;
        self.advance_slot();

        if let Err(e) = result {
            self.stats.send_errors += 1;
            return Err(e);
        }

        debug!(
            "Sent command counter={} seq={} armed={} throttle={:?}",
            command.counter, self.sequence, command.armed, command.throttle
        );
        self.counter = self.counter.wrapping_add(1);
        self.sequence = self.sequence.wrapping_add(1);
        self.stats.frames_sent += 1;
        Ok(())
    }

    fn advance_slot(&mut self) {
        let now = Instant::now();
        let next = self.next_slot + self.config.cadence();
        // Fell behind: restart the cadence from now instead of bursting
        self.next_slot = if next < now { now + self.config.cadence() } else { next };
    }

    async fn listen_until(&mut self, deadline: Instant) -> Result<()> {
        while Instant::now() < deadline {
            match timeout_at(deadline, self.transport.receive()).await {
                Ok(Ok(bytes)) => self.ingest(&bytes),
                Ok(Err(e)) => return Err(e),
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn ingest(&mut self, bytes: &[u8]) {
        self.framer.push(bytes);
        while let Some(event) = self.framer.next_event() {
            if let FramerEvent::Frame(frame) = event {
                self.handle_frame(&frame);
            }
        }
    }

    fn handle_frame(&mut self, frame: &Frame) {
        if let Some(result) = TelemetryReading::from_frame(frame) {
            match result {
                Ok(reading) => self.record_telemetry(reading),
                Err(e) => {
                    self.stats.payload_errors += 1;
                    debug!("Telemetry seq={} rejected: {}", frame.sequence, e);
                }
            }
            return;
        }

        if frame.cmd_id == CMD_ID_ESC_COMMAND {
            self.stats.command_frames_seen += 1;
            match decode_a021_feedback(&frame.payload) {
                Ok(feedback) => debug!(
                    "Bus command counter={} armed={} voltage={:.2}V",
                    feedback.counter, feedback.armed, feedback.voltage
                ),
                Err(e) => {
                    self.stats.payload_errors += 1;
                    debug!("Bus command rejected: {}", e);
                }
            }
            return;
        }

        self.stats.unknown_frames += 1;
        debug!("Ignoring frame cmd=0x{:04X}", frame.cmd_id);
    }

    fn record_telemetry(&mut self, reading: TelemetryReading) {
        let missed = self.tracker.observe(reading.sequence);
        if missed > 0 {
            self.stats.telemetry_dropped += u64::from(missed);
            if self.warn_on_drops {
                warn!("Missed {} telemetry frames before seq={}", missed, reading.sequence);
            }
        }

        self.stats.telemetry_frames += 1;
        debug!(
            "Telemetry seq={} {:.2}V {:.2}A {}rpm {:.1}C",
            reading.sequence, reading.voltage, reading.current, reading.rpm, reading.temperature
        );

        self.last_telemetry = Some(reading);
        if self.pending.len() == TELEMETRY_QUEUE_LIMIT {
            self.pending.pop_front();
        }
        self.pending.push_back(TelemetryRecord::now(reading));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::esc::encoder::encode_frame;
    use crate::esc::protocol::{
        A021_ARM_FLAG_OFFSET, A021_COUNTER_OFFSET, ARM_FLAG_ARMED, ARM_FLAG_DISARMED,
        CMD_ID_ESC_TELEMETRY, DEFAULT_RESERVED,
    };
    use crate::serial::line::parse_hex_bytes;
    use crate::serial::port_trait::mocks::MockSerialPort;
    use crate::serial::{MockFrameTransport, Rs485Bridge};
    use std::sync::{Arc, Mutex};

    type BridgeScheduler = CommandScheduler<Rs485Bridge<MockSerialPort>>;

    fn bridge_scheduler(config: &Config) -> (BridgeScheduler, MockSerialPort) {
        let port = MockSerialPort::new();
        let bridge = Rs485Bridge::new(port.clone(), "/dev/mock0");
        (CommandScheduler::new(bridge, config), port)
    }

    /// Decode every `TX:` line written to the port
    fn sent_frames(port: &MockSerialPort) -> Vec<Frame> {
        let mut framer = StreamFramer::new();
        for line in port.get_written_lines() {
            let hex = line.trim_end().strip_prefix("TX:").unwrap();
            framer.push(&parse_hex_bytes(hex).unwrap());
        }
        framer.finish();

        framer
            .drain()
            .map(|event| match event {
                FramerEvent::Frame(frame) => frame,
                other => panic!("unexpected event: {:?}", other),
            })
            .collect()
    }

    fn arm_flag(frame: &[u8]) -> u8 {
        frame[A021_ARM_FLAG_OFFSET]
    }

    fn counter(payload: &[u8]) -> u16 {
        u16::from_le_bytes([payload[A021_COUNTER_OFFSET], payload[A021_COUNTER_OFFSET + 1]])
    }

    fn slot(payload: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([payload[offset], payload[offset + 1]])
    }

    fn rx_line(frame: &[u8]) -> String {
        format!("[RX<-485] {}\n", hex::encode_upper(frame))
    }

    fn telemetry_frame(sequence: u8, voltage_raw: u16) -> Vec<u8> {
        let mut payload = [0u8; 16];
        payload[0..2].copy_from_slice(&voltage_raw.to_le_bytes());
        encode_frame(CMD_ID_ESC_TELEMETRY, DEFAULT_RESERVED, sequence, &payload).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_burst_end_to_end() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        let start = Instant::now();

        scheduler.arm().await.unwrap();

        assert_eq!(scheduler.state(), ArmState::Armed);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(320), "burst too fast: {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(330), "burst too slow: {:?}", elapsed);

        let frames = sent_frames(&port);
        assert_eq!(frames.len(), 5);
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.cmd_id, CMD_ID_ESC_COMMAND);
            assert_eq!(frame.reserved, DEFAULT_RESERVED);
            assert_eq!(frame.sequence, i as u8);
            assert_eq!(arm_flag(&frame.payload), ARM_FLAG_ARMED);
            assert_eq!(counter(&frame.payload), i as u16);
            assert_eq!(slot(&frame.payload, 2), 7);
            assert_eq!(slot(&frame.payload, 8), 944);
        }
        assert_eq!(scheduler.counter(), 5);
        assert_eq!(scheduler.stats().frames_sent, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_burst() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());

        scheduler.arm().await.unwrap();
        scheduler.disarm().await.unwrap();

        assert_eq!(scheduler.state(), ArmState::Disarmed);
        assert_eq!(scheduler.throttle(), [0; NUM_MOTORS]);

        let frames = sent_frames(&port);
        assert_eq!(frames.len(), 10);
        for (i, frame) in frames[5..].iter().enumerate() {
            assert_eq!(arm_flag(&frame.payload), ARM_FLAG_DISARMED);
            assert_eq!(counter(&frame.payload), 5 + i as u16);
            for offset in [2, 6, 8, 10] {
                assert_eq!(slot(&frame.payload, offset), 0);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_arm_and_disarm_are_noops() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());

        scheduler.disarm().await.unwrap();
        assert!(port.get_written_data().is_empty());

        scheduler.arm().await.unwrap();
        scheduler.arm().await.unwrap();
        assert_eq!(port.get_written_data().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_requires_armed() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());

        let err = scheduler
            .set_throttle([100, 0, 1000, 0], Duration::from_millis(80))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(!err.is_recoverable());

        let err = scheduler.hold(Duration::from_millis(80)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        assert!(port.get_written_data().is_empty());
        assert_eq!(scheduler.state(), ArmState::Disarmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_throttle_frame_count() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        scheduler.arm().await.unwrap();

        scheduler.set_throttle([100, 0, 1000, 0], Duration::from_millis(400)).await.unwrap();
        assert_eq!(port.get_written_data().len(), 10);

        scheduler.set_throttle([120, 0, 1100, 0], Duration::ZERO).await.unwrap();
        assert_eq!(port.get_written_data().len(), 11);

        scheduler.hold(Duration::from_millis(100)).await.unwrap();
        assert_eq!(port.get_written_data().len(), 13);

        let frames = sent_frames(&port);
        for frame in &frames[5..10] {
            assert_eq!(arm_flag(&frame.payload), ARM_FLAG_ARMED);
            assert_eq!(slot(&frame.payload, 2), 100);
            assert_eq!(slot(&frame.payload, 8), 1000);
        }
        for frame in &frames[10..] {
            assert_eq!(slot(&frame.payload, 2), 120);
            assert_eq!(slot(&frame.payload, 8), 1100);
        }
        assert_eq!(scheduler.throttle(), [120, 0, 1100, 0]);
    }

    #[test]
    fn test_frames_for_duration() {
        let (scheduler, _port) = bridge_scheduler(&Config::default());

        assert_eq!(scheduler.frames_for(Duration::ZERO), 1);
        assert_eq!(scheduler.frames_for(Duration::from_millis(80)), 1);
        assert_eq!(scheduler.frames_for(Duration::from_millis(81)), 2);
        assert_eq!(scheduler.frames_for(Duration::from_millis(400)), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counter_wraps() {
        let (scheduler, port) = bridge_scheduler(&Config::default());
        let mut scheduler = scheduler.with_initial_counter(0xFFFE);

        scheduler.arm().await.unwrap();

        let counters: Vec<u16> = sent_frames(&port).iter().map(|f| counter(&f.payload)).collect();
        assert_eq!(counters, vec![0xFFFE, 0xFFFF, 0x0000, 0x0001, 0x0002]);
        assert_eq!(scheduler.counter(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_while_armed_disarms_on_shutdown() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        scheduler.arm().await.unwrap();

        tokio::select! {
            result = scheduler.set_throttle([100, 0, 1000, 0], Duration::from_secs(10)) => {
                panic!("set_throttle finished early: {:?}", result);
            }
            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
        }

        assert_eq!(scheduler.state(), ArmState::Armed);
        let interrupted_at = port.get_written_data().len();
        assert!(interrupted_at > 5);

        let bridge = scheduler.shutdown().await.unwrap();
        assert_eq!(bridge.device_path(), "/dev/mock0");

        let frames = sent_frames(&port);
        assert_eq!(frames.len(), interrupted_at + 5);
        for frame in &frames[5..interrupted_at] {
            assert_eq!(arm_flag(&frame.payload), ARM_FLAG_ARMED);
            assert_eq!(slot(&frame.payload, 2), 100);
        }
        for frame in &frames[interrupted_at..] {
            assert_eq!(arm_flag(&frame.payload), ARM_FLAG_DISARMED);
            assert_eq!(slot(&frame.payload, 8), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_arm_disarms_on_shutdown() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());

        tokio::select! {
            _ = scheduler.arm() => panic!("arm finished early"),
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }

        assert_eq!(scheduler.state(), ArmState::Arming);
        let err = scheduler.arm().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let sent_before = port.get_written_data().len();
        scheduler.shutdown().await.unwrap();

        let frames = sent_frames(&port);
        assert_eq!(frames.len(), sent_before + 5);
        assert!(frames[sent_before..]
            .iter()
            .all(|f| arm_flag(&f.payload) == ARM_FLAG_DISARMED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_while_disarmed_sends_nothing() {
        let (scheduler, port) = bridge_scheduler(&Config::default());

        let bridge = scheduler.shutdown().await.unwrap();

        assert_eq!(bridge.device_path(), "/dev/mock0");
        assert!(port.get_written_data().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_sends_disarm_burst() {
        let mut config = Config::default();
        config.scheduler.listen = false;

        let sent = Arc::new(Mutex::new(Vec::new()));
        let recorder = sent.clone();
        let mut calls = 0;

        let mut transport = MockFrameTransport::new();
        transport
            .expect_send_frame()
            .times(8)
            .returning(move |frame: &[u8]| {
                calls += 1;
                recorder.lock().unwrap().push(frame.to_vec());
                if calls == 3 {
                    Err(EscBridgeError::Serial("bridge unplugged".to_string()))
                } else {
                    Ok(())
                }
            });

        let mut scheduler = CommandScheduler::new(transport, &config);
        let err = scheduler.arm().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportIo);
        assert!(err.to_string().contains("bridge unplugged"));
        assert_eq!(scheduler.state(), ArmState::Disarmed);

        let stats = scheduler.stats();
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.frames_sent, 7);

        let frames = sent.lock().unwrap().clone();
        assert_eq!(frames.len(), 8);
        for frame in &frames[..3] {
            assert_eq!(arm_flag(&frame[8..]), ARM_FLAG_ARMED);
        }
        for frame in &frames[3..] {
            assert_eq!(arm_flag(&frame[8..]), ARM_FLAG_DISARMED);
        }
        // The failed frame does not consume a counter value
        assert_eq!(counter(&frames[3][8..]), 2);

        // Already disarmed: nothing more to send
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarm_attempted_even_if_every_send_fails() {
        let mut config = Config::default();
        config.scheduler.listen = false;

        let mut transport = MockFrameTransport::new();
        transport
            .expect_send_frame()
            .times(6)
            .returning(|_: &[u8]| Err(EscBridgeError::Serial("bridge unplugged".to_string())));

        let mut scheduler = CommandScheduler::new(transport, &config);
        let err = scheduler.arm().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportIo);
        assert_eq!(scheduler.state(), ArmState::Disarmed);
        assert_eq!(scheduler.stats().send_errors, 6);
        assert_eq!(scheduler.counter(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_failure_is_fatal() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        port.set_read_error(std::io::ErrorKind::BrokenPipe);

        let err = scheduler.arm().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportIo);
        assert_eq!(scheduler.state(), ArmState::Disarmed);

        let frames = sent_frames(&port);
        assert_eq!(frames.len(), 6);
        assert_eq!(arm_flag(&frames[0].payload), ARM_FLAG_ARMED);
        assert!(frames[1..]
            .iter()
            .all(|f| arm_flag(&f.payload) == ARM_FLAG_DISARMED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_telemetry_received_between_frames() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());

        let mut lines = String::from("[RX<-485] 00 13 37\n");
        lines.push_str(&rx_line(&telemetry_frame(1, 944)));
        lines.push_str(&rx_line(&telemetry_frame(4, 950)));
        port.push_read_data(lines.as_bytes());

        scheduler.arm().await.unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.telemetry_frames, 2);
        assert_eq!(stats.telemetry_dropped, 2);
        assert_eq!(scheduler.framer_stats().skipped_bytes, 3);

        let last = scheduler.last_telemetry().unwrap();
        assert_eq!(last.sequence, 4);
        assert_eq!(last.raw[0], 950);

        let readings = scheduler.take_telemetry();
        assert_eq!(readings.len(), 2);
        assert!((readings[0].reading.voltage - 48.144).abs() < 1e-3);
        assert!(readings[0].timestamp <= readings[1].timestamp);
        assert!(scheduler.take_telemetry().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_bus_command_frames_counted() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        let echo = encode_command(&Command::armed_idle(0x02AE, 0x40), DEFAULT_RESERVED, 0).unwrap();
        let other = encode_frame(0x1234, DEFAULT_RESERVED, 0, &[1, 2, 3]).unwrap();
        let short = encode_frame(CMD_ID_ESC_TELEMETRY, DEFAULT_RESERVED, 0, &[0u8; 4]).unwrap();
        let lines = format!("{}{}{}", rx_line(&echo), rx_line(&other), rx_line(&short));
        port.push_read_data(lines.as_bytes());

        scheduler.listen(Duration::from_millis(200)).await.unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.command_frames_seen, 1);
        assert_eq!(stats.unknown_frames, 1);
        assert_eq!(stats.payload_errors, 1);
        assert_eq!(stats.telemetry_frames, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_while_disarmed() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        port.push_read_data(rx_line(&telemetry_frame(0, 1000)).as_bytes());

        let start = Instant::now();
        scheduler.listen(Duration::from_millis(200)).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(port.get_written_data().is_empty());
        assert_eq!(scheduler.take_telemetry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_requires_disarmed() {
        let (mut scheduler, _port) = bridge_scheduler(&Config::default());
        scheduler.arm().await.unwrap();

        let err = scheduler.listen(Duration::from_millis(80)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_while_armed() {
        let mut config = Config::default();
        config.scheduler.listen = false;

        let sent = Arc::new(Mutex::new(Vec::new()));
        let recorder = sent.clone();
        let mut calls = 0;

        let mut transport = MockFrameTransport::new();
        transport
            .expect_send_frame()
            .times(12)
            .returning(move |frame: &[u8]| {
                calls += 1;
                recorder.lock().unwrap().push(frame.to_vec());
                if calls == 7 {
                    Err(EscBridgeError::Serial("bridge unplugged".to_string()))
                } else {
                    Ok(())
                }
            });

        let mut scheduler = CommandScheduler::new(transport, &config);
        scheduler.arm().await.unwrap();
        assert_eq!(scheduler.state(), ArmState::Armed);

        let err = scheduler
            .set_throttle([100, 0, 1000, 0], Duration::from_millis(400))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportIo);
        assert_eq!(scheduler.state(), ArmState::Disarmed);
        assert_eq!(scheduler.throttle(), [0; NUM_MOTORS]);

        let frames = sent.lock().unwrap().clone();
        assert_eq!(frames.len(), 12);
        for frame in &frames[5..7] {
            assert_eq!(arm_flag(&frame[8..]), ARM_FLAG_ARMED);
            assert_eq!(slot(&frame[8..], 2), 100);
            assert_eq!(slot(&frame[8..], 8), 1000);
        }
        for frame in &frames[7..] {
            assert_eq!(arm_flag(&frame[8..]), ARM_FLAG_DISARMED);
            for offset in [2, 6, 8, 10] {
                assert_eq!(slot(&frame[8..], offset), 0);
            }
        }
        assert_eq!(counter(&frames[7][8..]), 6);

        // Already disarmed: holding is refused and shutdown sends nothing
        let err = scheduler.hold(Duration::from_millis(80)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_slot_values_and_frame_count() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        scheduler.arm().await.unwrap();

        // Two frames per step, 13 frames to settle
        let plan = RampPlan::new(2, 1000, 1200, 100, Duration::from_millis(160)).unwrap();
        let start = Instant::now();
        scheduler.ramp(&plan).await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(24 * 80));
        assert_eq!(scheduler.state(), ArmState::Armed);
        assert_eq!(scheduler.throttle(), [7, 0, 944, 0]);

        let frames = sent_frames(&port);
        assert_eq!(frames.len(), 5 + 12 + 13);

        let ramped: Vec<u16> = frames[5..].iter().map(|f| slot(&f.payload, 6)).collect();
        let mut expected = vec![1000, 1000, 1100, 1100, 1200, 1200, 1200, 1200, 1100, 1100, 1000, 1000];
        expected.extend([0; 13]);
        assert_eq!(ramped, expected);

        for frame in &frames[5..] {
            assert_eq!(arm_flag(&frame.payload), ARM_FLAG_ARMED);
            assert_eq!(slot(&frame.payload, 2), 7);
            assert_eq!(slot(&frame.payload, 8), 944);
            assert_eq!(slot(&frame.payload, 10), 0);
        }

        scheduler.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_requires_armed() {
        let (mut scheduler, port) = bridge_scheduler(&Config::default());
        let plan = RampPlan::new(1, 1000, 1200, 100, Duration::from_millis(80)).unwrap();

        let err = scheduler.ramp(&plan).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(port.get_written_data().is_empty());
    }
}
