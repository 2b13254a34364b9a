//! Simulated middleware.
//!
//! Provides in-process devices so the panel can run without the facility's
//! control system. All timing uses `tokio::time`, so tests can pause the clock.
//!
//! # Available Devices
//!
//! - `SimulatedMotor` - physical jaw motor moving at a fixed speed
//! - `SimulatedSlitAxis` - gap or offset pseudo-motor derived from two jaws
//! - `SimulatedReadout` - read-only scalar signal (PLC temperatures, interlocks)
//!
//! # Motion Model
//!
//! A `Position` write starts a motion and returns immediately. Reads report the
//! position interpolated at the configured speed; `abort` freezes the motor
//! where it currently is.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{BackendConfig, InstallationConfig, PanelConfig};
use crate::device::{DeviceFactory, DeviceHandle, DeviceName, DeviceProxy, POSITION_ATTR};
use crate::error::{AppResult, PanelError};

fn is_position(attribute: &str) -> bool {
    attribute.eq_ignore_ascii_case(POSITION_ATTR)
}

fn check_fault(name: &DeviceName, fault: &Option<String>) -> Result<()> {
    match fault {
        Some(reason) => bail!("{name}: {reason}"),
        None => Ok(()),
    }
}

// =============================================================================
// SimulatedMotor - Physical Jaw Motor
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Motion {
    origin: f64,
    target: f64,
    started: Instant,
}

#[derive(Debug, Clone, Copy)]
enum MotorState {
    Idle(f64),
    Moving(Motion),
}

/// Simulated physical motor.
pub struct SimulatedMotor {
    name: DeviceName,
    state: RwLock<MotorState>,
    speed_mm_per_sec: f64,
    fault: Option<String>,
}

impl SimulatedMotor {
    /// Create a motor resting at `position`.
    pub fn new(name: DeviceName, position: f64, speed_mm_per_sec: f64) -> Self {
        Self {
            name,
            state: RwLock::new(MotorState::Idle(position)),
            speed_mm_per_sec,
            fault: None,
        }
    }

    /// Make every call on this motor fail with `reason`.
    pub fn with_fault(mut self, reason: impl Into<String>) -> Self {
        self.fault = Some(reason.into());
        self
    }

    /// Current position, interpolated along any motion in progress.
    pub async fn position(&self) -> f64 {
        let state = *self.state.read().await;
        self.position_at(state, Instant::now())
    }

    /// True while a commanded motion has not reached its target.
    pub async fn is_moving(&self) -> bool {
        match *self.state.read().await {
            MotorState::Idle(_) => false,
            MotorState::Moving(motion) => self.remaining(motion, Instant::now()) > 0.0,
        }
    }

    fn remaining(&self, motion: Motion, now: Instant) -> f64 {
        let travelled = now.duration_since(motion.started).as_secs_f64() * self.speed_mm_per_sec;
        ((motion.target - motion.origin).abs() - travelled).max(0.0)
    }

    fn position_at(&self, state: MotorState, now: Instant) -> f64 {
        match state {
            MotorState::Idle(position) => position,
            MotorState::Moving(motion) => {
                let remaining = self.remaining(motion, now);
                if remaining == 0.0 {
                    motion.target
                } else if motion.target > motion.origin {
                    motion.target - remaining
                } else {
                    motion.target + remaining
                }
            }
        }
    }

    async fn start_move(&self, target: f64) {
        let mut state = self.state.write().await;
        let now = Instant::now();
        let origin = self.position_at(*state, now);
        info!(
            "{}: moving from {:.3} to {:.3}",
            self.name, origin, target
        );
        *state = MotorState::Moving(Motion {
            origin,
            target,
            started: now,
        });
    }

    async fn stop(&self) {
        let mut state = self.state.write().await;
        let position = self.position_at(*state, Instant::now());
        *state = MotorState::Idle(position);
        info!("{}: stopped at {:.3}", self.name, position);
    }
}

#[async_trait]
impl DeviceProxy for SimulatedMotor {
    fn name(&self) -> &DeviceName {
        &self.name
    }

    async fn read_attribute(&self, attribute: &str) -> Result<f64> {
        check_fault(&self.name, &self.fault)?;
        if !is_position(attribute) {
            bail!("{}: no attribute '{attribute}'", self.name);
        }
        Ok(self.position().await)
    }

    async fn write_attribute(&self, attribute: &str, value: f64) -> Result<()> {
        check_fault(&self.name, &self.fault)?;
        if !is_position(attribute) {
            bail!("{}: attribute '{attribute}' is not writable", self.name);
        }
        self.start_move(value).await;
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        check_fault(&self.name, &self.fault)?;
        self.stop().await;
        Ok(())
    }
}

// =============================================================================
// SimulatedSlitAxis - Gap / Offset Pseudo-Motor
// =============================================================================

/// Which combination of the two jaws a pseudo-motor exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlitRole {
    /// `first + second`
    Gap,
    /// `(first - second) / 2`
    Offset,
}

/// Pseudo-motor computed from two jaw motors.
pub struct SimulatedSlitAxis {
    name: DeviceName,
    role: SlitRole,
    first: Arc<SimulatedMotor>,
    second: Arc<SimulatedMotor>,
    fault: Option<String>,
}

impl SimulatedSlitAxis {
    /// Bind a pseudo-motor to its two jaws.
    pub fn new(
        name: DeviceName,
        role: SlitRole,
        first: Arc<SimulatedMotor>,
        second: Arc<SimulatedMotor>,
    ) -> Self {
        Self {
            name,
            role,
            first,
            second,
            fault: None,
        }
    }

    /// Make every call on this pseudo-motor fail with `reason`.
    pub fn with_fault(mut self, reason: impl Into<String>) -> Self {
        self.fault = Some(reason.into());
        self
    }

    async fn gap_and_offset(&self) -> (f64, f64) {
        let first = self.first.position().await;
        let second = self.second.position().await;
        (first + second, (first - second) / 2.0)
    }
}

#[async_trait]
impl DeviceProxy for SimulatedSlitAxis {
    fn name(&self) -> &DeviceName {
        &self.name
    }

    async fn read_attribute(&self, attribute: &str) -> Result<f64> {
        check_fault(&self.name, &self.fault)?;
        if !is_position(attribute) {
            bail!("{}: no attribute '{attribute}'", self.name);
        }
        let (gap, offset) = self.gap_and_offset().await;
        Ok(match self.role {
            SlitRole::Gap => gap,
            SlitRole::Offset => offset,
        })
    }

    async fn write_attribute(&self, attribute: &str, value: f64) -> Result<()> {
        check_fault(&self.name, &self.fault)?;
        if !is_position(attribute) {
            bail!("{}: attribute '{attribute}' is not writable", self.name);
        }
        let (gap, offset) = match (self.role, self.gap_and_offset().await) {
            (SlitRole::Gap, (_, offset)) => (value, offset),
            (SlitRole::Offset, (gap, _)) => (gap, value),
        };
        debug!("{}: gap {:.3} offset {:.3}", self.name, gap, offset);
        self.first.start_move(gap / 2.0 + offset).await;
        self.second.start_move(gap / 2.0 - offset).await;
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        check_fault(&self.name, &self.fault)?;
        self.first.stop().await;
        self.second.stop().await;
        Ok(())
    }
}

// =============================================================================
// SimulatedReadout - Read-Only Signal
// =============================================================================

/// Read-only device serving one value for every attribute.
pub struct SimulatedReadout {
    name: DeviceName,
    value: f64,
    fault: Option<String>,
}

impl SimulatedReadout {
    /// Create a readout serving `value`.
    pub fn new(name: DeviceName, value: f64) -> Self {
        Self {
            name,
            value,
            fault: None,
        }
    }
}

#[async_trait]
impl DeviceProxy for SimulatedReadout {
    fn name(&self) -> &DeviceName {
        &self.name
    }

    async fn read_attribute(&self, _attribute: &str) -> Result<f64> {
        check_fault(&self.name, &self.fault)?;
        Ok(self.value)
    }

    async fn write_attribute(&self, attribute: &str, _value: f64) -> Result<()> {
        Err(anyhow!("{}: attribute '{attribute}' is read-only", self.name))
    }

    async fn abort(&self) -> Result<()> {
        check_fault(&self.name, &self.fault)
    }
}

// =============================================================================
// SimulatedFactory
// =============================================================================

/// Device factory backed by simulated devices.
#[derive(Default)]
pub struct SimulatedFactory {
    devices: HashMap<DeviceName, DeviceHandle>,
}

impl SimulatedFactory {
    /// Empty factory; every resolution fails until devices are registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the devices of every configured installation.
    pub fn from_config(config: &PanelConfig) -> Self {
        let mut factory = Self::new();
        for installation in &config.installations {
            factory.add_installation(installation, &config.backend);
        }
        factory
    }

    /// Register the two jaws, the slit pseudo-motors and the extra readouts
    /// of one installation.
    pub fn add_installation(&mut self, installation: &InstallationConfig, backend: &BackendConfig) {
        let fault_for = |name: &DeviceName| {
            backend
                .faulty_devices
                .contains(name)
                .then(|| "device is in FAULT state".to_string())
        };

        let motor = |name: &DeviceName| {
            let mut motor =
                SimulatedMotor::new(name.clone(), backend.initial_position, backend.speed_mm_per_sec);
            motor.fault = fault_for(name);
            Arc::new(motor)
        };
        let first = motor(&installation.first_motor);
        let second = motor(&installation.second_motor);

        for (name, role) in [
            (&installation.gap, SlitRole::Gap),
            (&installation.offset, SlitRole::Offset),
        ] {
            let mut axis =
                SimulatedSlitAxis::new(name.clone(), role, Arc::clone(&first), Arc::clone(&second));
            axis.fault = fault_for(name);
            self.register(Arc::new(axis));
        }
        self.register(first);
        self.register(second);

        for reference in &installation.extra_models {
            let name = reference.device();
            if self.devices.contains_key(name) {
                continue;
            }
            let mut readout = SimulatedReadout::new(name.clone(), backend.extra_value);
            readout.fault = fault_for(name);
            self.register(Arc::new(readout));
        }
    }

    /// Register a device under its own name, replacing any previous one.
    pub fn register(&mut self, device: DeviceHandle) {
        self.devices.insert(device.name().clone(), device);
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[async_trait]
impl DeviceFactory for SimulatedFactory {
    async fn resolve(&self, name: &DeviceName) -> AppResult<DeviceHandle> {
        self.devices
            .get(name)
            .cloned()
            .ok_or_else(|| PanelError::UnknownDevice {
                name: name.to_string(),
            })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, Duration};

    fn name(raw: &str) -> DeviceName {
        DeviceName::parse(raw).unwrap()
    }

    fn jaws() -> (Arc<SimulatedMotor>, Arc<SimulatedMotor>) {
        (
            Arc::new(SimulatedMotor::new(name("motor/sim/1"), 0.0, 1.0)),
            Arc::new(SimulatedMotor::new(name("motor/sim/2"), 0.0, 1.0)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_motor_moves_at_configured_speed() {
        let motor = SimulatedMotor::new(name("motor/sim/1"), 10.0, 2.0);

        motor.write_attribute("Position", 16.0).await.unwrap();
        assert!(motor.is_moving().await);

        advance(Duration::from_secs(1)).await;
        assert!((motor.read_attribute("Position").await.unwrap() - 12.0).abs() < 1e-9);

        advance(Duration::from_secs(5)).await;
        assert_eq!(motor.read_attribute("position").await.unwrap(), 16.0);
        assert!(!motor.is_moving().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_freezes_motion() {
        let motor = SimulatedMotor::new(name("motor/sim/1"), 0.0, 1.0);

        motor.write_attribute("Position", -10.0).await.unwrap();
        advance(Duration::from_millis(2500)).await;
        motor.abort().await.unwrap();
        advance(Duration::from_secs(10)).await;

        assert!((motor.position().await + 2.5).abs() < 1e-9);
        assert!(!motor.is_moving().await);
    }

    #[tokio::test]
    async fn test_unknown_attribute_fails() {
        let motor = SimulatedMotor::new(name("motor/sim/1"), 0.0, 1.0);
        assert!(motor.read_attribute("Velocity").await.is_err());
        assert!(motor.write_attribute("State", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn test_faulty_motor_rejects_every_call() {
        let motor = SimulatedMotor::new(name("motor/sim/1"), 0.0, 1.0).with_fault("FAULT");
        assert!(motor.read_attribute("Position").await.is_err());
        assert!(motor.write_attribute("Position", 1.0).await.is_err());
        assert!(motor.abort().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gap_and_offset_drive_both_jaws() {
        let (first, second) = jaws();
        let gap = SimulatedSlitAxis::new(
            name("pm/sim_slit/1"),
            SlitRole::Gap,
            Arc::clone(&first),
            Arc::clone(&second),
        );
        let offset = SimulatedSlitAxis::new(
            name("pm/sim_slit/2"),
            SlitRole::Offset,
            Arc::clone(&first),
            Arc::clone(&second),
        );

        gap.write_attribute("Position", 4.0).await.unwrap();
        advance(Duration::from_secs(10)).await;
        assert_eq!(first.position().await, 2.0);
        assert_eq!(second.position().await, 2.0);
        assert_eq!(gap.read_attribute("Position").await.unwrap(), 4.0);
        assert_eq!(offset.read_attribute("Position").await.unwrap(), 0.0);

        offset.write_attribute("Position", 1.0).await.unwrap();
        advance(Duration::from_secs(10)).await;
        assert_eq!(first.position().await, 3.0);
        assert_eq!(second.position().await, 1.0);
        assert_eq!(gap.read_attribute("Position").await.unwrap(), 4.0);
    }

    #[tokio::test]
    async fn test_readout_is_read_only() {
        let readout = SimulatedReadout::new(name("BUILDING/EPS/PLC-02"), 21.5);
        assert_eq!(readout.read_attribute("di_scrco_s16_01_tin").await.unwrap(), 21.5);
        assert!(readout.write_attribute("di_scrco_s16_01_tin", 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_factory_resolves_registered_devices_only() {
        let mut factory = SimulatedFactory::new();
        factory.register(Arc::new(SimulatedMotor::new(name("motor/sim/1"), 0.0, 1.0)));

        let handle = factory.resolve(&name("MOTOR/SIM/1")).await.unwrap();
        assert_eq!(handle.name().as_str(), "motor/sim/1");

        let err = factory.resolve(&name("motor/sim/9")).await.err().unwrap();
        assert!(matches!(err, PanelError::UnknownDevice { name } if name == "motor/sim/9"));
    }
}
