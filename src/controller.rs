//! Motor move controller.
//!
//! Translates operator commands into remote device calls:
//!
//! - **Relative move**: read `Position`, add the signed increment, write it back.
//! - **Absolute move**: write the target straight to `Position`.
//! - **Abort**: stop every listed device in order, collecting failures so one
//!   unreachable motor never prevents the others from being stopped.
//!
//! The controller keeps no motion state; the devices own it. Calls run one at a
//! time and each completes before the caller moves on. Sign conventions ("in"
//! negates the step) belong to the caller, see [`crate::scraper`].
//!
//! Every remote call can be bounded by an optional timeout. Without one a hung
//! device blocks the call indefinitely.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::device::{DeviceHandle, DeviceName, DeviceProxy, POSITION_ATTR};
use crate::error::{AppResult, DeviceOperation, PanelError};

/// One operator request aimed at a single device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveCommand {
    /// Move by a signed increment.
    RelativeIncrement(f64),
    /// Move to an absolute position.
    AbsoluteTarget(f64),
    /// Stop motion.
    Abort,
}

impl fmt::Display for MoveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveCommand::RelativeIncrement(delta) => write!(f, "move by {delta:+}"),
            MoveCommand::AbsoluteTarget(target) => write!(f, "move to {target}"),
            MoveCommand::Abort => f.write_str("abort"),
        }
    }
}

/// Outcome of an abort over several devices.
#[derive(Debug, Default)]
pub struct AbortReport {
    /// Devices an abort was attempted on.
    pub attempted: usize,
    /// Failures, in device order.
    pub failures: Vec<PanelError>,
}

impl AbortReport {
    /// True when every device accepted the abort.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Ok` when clean, otherwise `AbortFailed` carrying every failure.
    pub fn into_result(self) -> AppResult<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(PanelError::AbortFailed(self.failures))
        }
    }
}

/// Stateless dispatcher of move and abort commands.
#[derive(Debug, Clone, Default)]
pub struct MotorMoveController {
    timeout: Option<Duration>,
}

impl MotorMoveController {
    /// Controller whose calls wait as long as the device takes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Controller failing any remote call that outlasts `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }

    /// Controller built from configuration.
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self {
            timeout: config.timeout(),
        }
    }

    /// Per-call timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Read the current position, add `delta` and write the result back.
    ///
    /// A failed read, or a position or sum that is not finite, means no write
    /// is issued.
    pub async fn move_relative(&self, device: &dyn DeviceProxy, delta: f64) -> AppResult<()> {
        ensure_finite(device.name(), "increment", delta)?;

        let current = self
            .call(
                device.name(),
                DeviceOperation::Read,
                device.read_attribute(POSITION_ATTR),
            )
            .await?;
        ensure_finite(device.name(), "position", current)?;
        let target = current + delta;
        ensure_finite(device.name(), "target", target)?;
        debug!(
            "{}: position {} {:+} -> {}",
            device.name(),
            current,
            delta,
            target
        );

        self.call(
            device.name(),
            DeviceOperation::Write,
            device.write_attribute(POSITION_ATTR, target),
        )
        .await?;
        info!("{}: commanded to {} ({:+})", device.name(), target, delta);
        Ok(())
    }

    /// Write `target` to the position attribute without reading it first.
    pub async fn move_absolute(&self, device: &dyn DeviceProxy, target: f64) -> AppResult<()> {
        ensure_finite(device.name(), "target", target)?;

        self.call(
            device.name(),
            DeviceOperation::Write,
            device.write_attribute(POSITION_ATTR, target),
        )
        .await?;
        info!("{}: commanded to {}", device.name(), target);
        Ok(())
    }

    /// Read one attribute under the same timeout as moves.
    pub async fn read(&self, device: &dyn DeviceProxy, attribute: &str) -> AppResult<f64> {
        self.call(
            device.name(),
            DeviceOperation::Read,
            device.read_attribute(attribute),
        )
        .await
    }

    /// Abort every device in order, attempting all of them regardless of
    /// earlier failures.
    pub async fn abort(&self, devices: &[DeviceHandle]) -> AbortReport {
        let mut report = AbortReport::default();
        for device in devices {
            report.attempted += 1;
            match self
                .call(device.name(), DeviceOperation::Abort, device.abort())
                .await
            {
                Ok(()) => info!("{}: aborted", device.name()),
                Err(err) => report.failures.push(err),
            }
        }
        report
    }

    /// Execute one command against one device.
    pub async fn dispatch(&self, device: &DeviceHandle, command: MoveCommand) -> AppResult<()> {
        match command {
            MoveCommand::RelativeIncrement(delta) => {
                self.move_relative(device.as_ref(), delta).await
            }
            MoveCommand::AbsoluteTarget(target) => {
                self.move_absolute(device.as_ref(), target).await
            }
            MoveCommand::Abort => {
                let mut report = self.abort(std::slice::from_ref(device)).await;
                match report.failures.pop() {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        }
    }

    async fn call<T, F>(&self, device: &DeviceName, operation: DeviceOperation, fut: F) -> AppResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "no answer within {} ms",
                    limit.as_millis()
                )),
            },
            None => fut.await,
        };

        result.map_err(|source| {
            warn!("{device}: {operation} failed: {source:#}");
            PanelError::communication(device.as_str(), operation, source)
        })
    }
}

fn ensure_finite(device: &DeviceName, what: &str, value: f64) -> AppResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PanelError::InvalidCommand(format!(
            "{device}: {what} must be a finite number, got {value}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::{DeviceCall, MockDevice};
    use std::sync::Arc;

    fn write(device: &str, value: f64) -> DeviceCall {
        DeviceCall::Write {
            device: device.into(),
            attribute: POSITION_ATTR.into(),
            value,
        }
    }

    #[tokio::test]
    async fn test_relative_move_reads_then_writes() {
        let device = MockDevice::new("motor/lt_ipapscrapers_ctrl/1", 10.0).unwrap();
        MotorMoveController::new()
            .move_relative(&device, -2.5)
            .await
            .unwrap();

        assert_eq!(
            device.journal().calls(),
            vec![
                DeviceCall::Read {
                    device: "motor/lt_ipapscrapers_ctrl/1".into(),
                    attribute: POSITION_ATTR.into(),
                },
                write("motor/lt_ipapscrapers_ctrl/1", 7.5),
            ]
        );
    }

    #[tokio::test]
    async fn test_absolute_move_writes_without_reading() {
        let device = MockDevice::new("pm/lt02_hslit_ctrl/1", -3.0).unwrap();
        MotorMoveController::new()
            .move_absolute(&device, 42.0)
            .await
            .unwrap();

        assert_eq!(
            device.journal().calls(),
            vec![write("pm/lt02_hslit_ctrl/1", 42.0)]
        );
    }

    #[tokio::test]
    async fn test_non_finite_values_never_reach_the_device() {
        let device = MockDevice::new("a/b/1", 0.0).unwrap();
        let controller = MotorMoveController::new();

        assert!(matches!(
            controller.move_relative(&device, f64::NAN).await,
            Err(PanelError::InvalidCommand(_))
        ));
        assert!(matches!(
            controller.move_absolute(&device, f64::INFINITY).await,
            Err(PanelError::InvalidCommand(_))
        ));
        assert!(device.journal().calls().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_routes_each_command() {
        let device = Arc::new(MockDevice::new("a/b/1", 1.0).unwrap());
        let handle: DeviceHandle = device.clone();
        let controller = MotorMoveController::new();

        controller
            .dispatch(&handle, MoveCommand::RelativeIncrement(0.5))
            .await
            .unwrap();
        controller
            .dispatch(&handle, MoveCommand::AbsoluteTarget(4.0))
            .await
            .unwrap();
        controller.dispatch(&handle, MoveCommand::Abort).await.unwrap();

        let calls = device.journal().calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[1], write("a/b/1", 1.5));
        assert_eq!(calls[2], write("a/b/1", 4.0));
        assert_eq!(calls[3], DeviceCall::Abort { device: "a/b/1".into() });
    }

    #[tokio::test]
    async fn test_dispatch_abort_surfaces_the_failure() {
        let handle: DeviceHandle =
            Arc::new(MockDevice::new("a/b/1", 0.0).unwrap().failing_abort("FAULT"));
        let err = MotorMoveController::new()
            .dispatch(&handle, MoveCommand::Abort)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PanelError::DeviceCommunication {
                operation: DeviceOperation::Abort,
                ..
            }
        ));
    }

    #[test]
    fn test_move_command_display() {
        assert_eq!(MoveCommand::RelativeIncrement(-0.5).to_string(), "move by -0.5");
        assert_eq!(MoveCommand::AbsoluteTarget(3.0).to_string(), "move to 3");
        assert_eq!(MoveCommand::Abort.to_string(), "abort");
    }

    #[test]
    fn test_abort_report_into_result() {
        assert!(AbortReport::default().into_result().is_ok());

        let report = AbortReport {
            attempted: 2,
            failures: vec![PanelError::communication(
                "a/b/1",
                DeviceOperation::Abort,
                anyhow::anyhow!("timeout"),
            )],
        };
        assert!(!report.is_clean());
        assert!(matches!(report.into_result(), Err(PanelError::AbortFailed(v)) if v.len() == 1));
    }
}
