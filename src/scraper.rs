//! One scraper installation bound to its live devices.
//!
//! A `Scraper` resolves the four axes of an installation (two jaw motors and the
//! gap/offset pseudo-motors) once, at construction, and keeps the handles for
//! the rest of the process. Any axis that fails to resolve makes construction
//! fail: the panel cannot run without it. Extra readouts are best-effort.
//!
//! "In" steps are sent as negated increments and "out" steps as given; nothing
//! else about direction is inferred here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::InstallationConfig;
use crate::controller::{AbortReport, MotorMoveController, MoveCommand};
use crate::device::{AttributeRef, DeviceFactory, DeviceHandle, POSITION_ATTR};
use crate::error::{AppResult, PanelError};

/// Axis of a scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    /// First jaw motor.
    First,
    /// Second jaw motor.
    Second,
    /// Gap pseudo-motor.
    Gap,
    /// Offset pseudo-motor.
    Offset,
}

impl Axis {
    /// All axes in panel order.
    pub const ALL: [Axis; 4] = [Axis::First, Axis::Second, Axis::Gap, Axis::Offset];

    /// Lower-case keyword used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::First => "first",
            Axis::Second => "second",
            Axis::Gap => "gap",
            Axis::Offset => "offset",
        }
    }

    /// Position of the axis in [`Axis::ALL`].
    pub fn index(self) -> usize {
        match self {
            Axis::First => 0,
            Axis::Second => 1,
            Axis::Gap => 2,
            Axis::Offset => 3,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognised axis keyword.
#[derive(Debug, Error)]
#[error("unknown axis '{0}', expected first, second, gap or offset")]
pub struct ParseAxisError(String);

impl FromStr for Axis {
    type Err = ParseAxisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "1" => Ok(Axis::First),
            "second" | "2" => Ok(Axis::Second),
            "gap" => Ok(Axis::Gap),
            "offset" => Ok(Axis::Offset),
            _ => Err(ParseAxisError(s.to_string())),
        }
    }
}

struct AxisBinding {
    label: String,
    handle: DeviceHandle,
}

struct Readout {
    reference: AttributeRef,
    handle: DeviceHandle,
}

/// Position of one axis at snapshot time.
#[derive(Debug, Clone)]
pub struct AxisStatus {
    /// Axis.
    pub axis: Axis,
    /// Display label.
    pub label: String,
    /// Device name.
    pub device: String,
    /// Position, or the reason it could not be read.
    pub position: Result<f64, String>,
}

/// Value of one extra readout at snapshot time.
#[derive(Debug, Clone)]
pub struct ReadoutStatus {
    /// `device/attribute` reference.
    pub reference: String,
    /// Value, or the reason it could not be read.
    pub value: Result<f64, String>,
}

/// Everything the panel displays, read in one pass.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    /// When the reads were issued.
    pub taken_at: DateTime<Local>,
    /// The four axes in panel order.
    pub axes: Vec<AxisStatus>,
    /// Extra readouts in configuration order.
    pub readouts: Vec<ReadoutStatus>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "status at {}", self.taken_at.format("%Y-%m-%d %H:%M:%S"))?;
        for axis in &self.axes {
            match &axis.position {
                Ok(position) => writeln!(
                    f,
                    "  {:<10} {:>10.3}  ({})",
                    axis.label, position, axis.device
                )?,
                Err(reason) => writeln!(
                    f,
                    "  {:<10} {:>10}  ({}) {}",
                    axis.label, "ERROR", axis.device, reason
                )?,
            }
        }
        for readout in &self.readouts {
            match &readout.value {
                Ok(value) => writeln!(f, "  {:<10.3} {}", value, readout.reference)?,
                Err(reason) => writeln!(f, "  {:<10} {} {}", "ERROR", readout.reference, reason)?,
            }
        }
        Ok(())
    }
}

/// A scraper installation with resolved devices.
pub struct Scraper {
    id: String,
    title: String,
    tooltip: String,
    axes: Vec<AxisBinding>,
    readouts: Vec<Readout>,
    controller: MotorMoveController,
}

impl Scraper {
    /// Resolve every device of `installation`.
    ///
    /// Fails with [`PanelError::UnknownDevice`](crate::error::PanelError::UnknownDevice) when an axis does not resolve.
    /// Extra readouts that fail to resolve are logged and left out.
    pub async fn connect(
        installation: &InstallationConfig,
        factory: &dyn DeviceFactory,
        controller: MotorMoveController,
    ) -> AppResult<Self> {
        let labels = &installation.labels;
        let wanted = [
            (&installation.first_motor, &labels.first),
            (&installation.second_motor, &labels.second),
            (&installation.gap, &labels.gap),
            (&installation.offset, &labels.offset),
        ];

        let mut axes = Vec::with_capacity(wanted.len());
        for (name, label) in wanted {
            let handle = factory.resolve(name).await?;
            axes.push(AxisBinding {
                label: label.clone(),
                handle,
            });
        }

        let mut readouts = Vec::with_capacity(installation.extra_models.len());
        for reference in &installation.extra_models {
            match factory.resolve(reference.device()).await {
                Ok(handle) => readouts.push(Readout {
                    reference: reference.clone(),
                    handle,
                }),
                Err(err) => warn!("skipping readout {reference}: {err}"),
            }
        }

        info!(
            "connected scraper {} ({} axes, {} readouts)",
            installation.id,
            axes.len(),
            readouts.len()
        );
        Ok(Self {
            id: installation.id.clone(),
            title: installation.title.clone(),
            tooltip: installation.tooltip.clone(),
            axes,
            readouts,
            controller,
        })
    }

    /// Installation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display title, possibly on two lines.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Title flattened to one line.
    pub fn window_title(&self) -> String {
        self.title.replace('\n', " ")
    }

    /// Facility tag.
    pub fn tooltip(&self) -> &str {
        &self.tooltip
    }

    /// Display label of `axis`.
    pub fn label(&self, axis: Axis) -> &str {
        &self.axes[axis.index()].label
    }

    /// Device handle of `axis`.
    pub fn handle(&self, axis: Axis) -> &DeviceHandle {
        &self.axes[axis.index()].handle
    }

    /// The controller issuing this scraper's calls.
    pub fn controller(&self) -> &MotorMoveController {
        &self.controller
    }

    /// Close the jaw by `step` (sent as a negative increment).
    pub async fn jaw_in(&self, axis: Axis, step: f64) -> AppResult<()> {
        ensure_step(step)?;
        self.execute(axis, MoveCommand::RelativeIncrement(-step)).await
    }

    /// Open the jaw by `step` (sent as given).
    pub async fn jaw_out(&self, axis: Axis, step: f64) -> AppResult<()> {
        ensure_step(step)?;
        self.execute(axis, MoveCommand::RelativeIncrement(step)).await
    }

    /// Move `axis` to an absolute position.
    pub async fn move_to(&self, axis: Axis, target: f64) -> AppResult<()> {
        self.execute(axis, MoveCommand::AbsoluteTarget(target)).await
    }

    /// Run one command on one axis.
    pub async fn execute(&self, axis: Axis, command: MoveCommand) -> AppResult<()> {
        info!("{} {}: {}", self.id, self.label(axis), command);
        self.controller.dispatch(self.handle(axis), command).await
    }

    /// Abort all four axes in panel order.
    pub async fn abort(&self) -> AbortReport {
        let handles: Vec<DeviceHandle> = self.axes.iter().map(|a| a.handle.clone()).collect();
        let report = self.controller.abort(&handles).await;
        if report.is_clean() {
            info!("{}: abort sent to {} axes", self.id, report.attempted);
        } else {
            warn!(
                "{}: abort failed on {} of {} axes",
                self.id,
                report.failures.len(),
                report.attempted
            );
        }
        report
    }

    /// Read every axis position and extra readout.
    pub async fn status(&self) -> StatusSnapshot {
        let taken_at = Local::now();

        let mut axes = Vec::with_capacity(self.axes.len());
        for (axis, binding) in Axis::ALL.iter().zip(&self.axes) {
            let position = self
                .controller
                .read(binding.handle.as_ref(), POSITION_ATTR)
                .await
                .map_err(|e| e.to_string());
            axes.push(AxisStatus {
                axis: *axis,
                label: binding.label.clone(),
                device: binding.handle.name().to_string(),
                position,
            });
        }

        let mut readouts = Vec::with_capacity(self.readouts.len());
        for readout in &self.readouts {
            let value = self
                .controller
                .read(readout.handle.as_ref(), readout.reference.attribute())
                .await
                .map_err(|e| e.to_string());
            readouts.push(ReadoutStatus {
                reference: readout.reference.to_string(),
                value,
            });
        }

        StatusSnapshot {
            taken_at,
            axes,
            readouts,
        }
    }
}

// Steps are magnitudes; a negative one would reverse in/out.
fn ensure_step(step: f64) -> AppResult<()> {
    if step < 0.0 {
        return Err(PanelError::InvalidCommand(format!(
            "step {step} must not be negative"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_keywords() {
        assert_eq!("first".parse::<Axis>().unwrap(), Axis::First);
        assert_eq!("2".parse::<Axis>().unwrap(), Axis::Second);
        assert_eq!(" GAP ".parse::<Axis>().unwrap(), Axis::Gap);
        assert_eq!("Offset".parse::<Axis>().unwrap(), Axis::Offset);
        assert!("third".parse::<Axis>().is_err());
    }

    #[test]
    fn test_axis_order_matches_index() {
        for (i, axis) in Axis::ALL.iter().enumerate() {
            assert_eq!(axis.index(), i);
        }
    }
}
