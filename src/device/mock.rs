//! Call-recording devices for tests.
//!
//! `MockDevice` answers attribute reads from a stored value and records every
//! call into a [`CallJournal`]. Several devices can share one journal, so a test
//! can check the order of calls across devices. Each kind of call can be made
//! to fail or to stall, which is how the controller's error paths and timeout
//! are exercised.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use crate::device::{DeviceFactory, DeviceHandle, DeviceName, DeviceProxy};
use crate::error::{AppResult, PanelError};

/// One remote call seen by a mock device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    /// Attribute read.
    Read {
        /// Device name.
        device: String,
        /// Attribute name.
        attribute: String,
    },
    /// Attribute write.
    Write {
        /// Device name.
        device: String,
        /// Attribute name.
        attribute: String,
        /// Written value.
        value: f64,
    },
    /// Abort command.
    Abort {
        /// Device name.
        device: String,
    },
}

/// Ordered record of calls, shareable between devices.
#[derive(Debug, Clone, Default)]
pub struct CallJournal(Arc<Mutex<Vec<DeviceCall>>>);

impl CallJournal {
    /// Empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceCall>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, call: DeviceCall) {
        self.lock().push(call);
    }

    /// Snapshot of every call so far.
    pub fn calls(&self) -> Vec<DeviceCall> {
        self.lock().clone()
    }

    /// Calls made on `device`.
    pub fn calls_for(&self, device: &str) -> Vec<DeviceCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                DeviceCall::Read { device: d, .. }
                | DeviceCall::Write { device: d, .. }
                | DeviceCall::Abort { device: d } => d == device,
            })
            .collect()
    }

    /// Forget recorded calls.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[derive(Debug, Default, Clone)]
struct Faults {
    read: Option<String>,
    write: Option<String>,
    abort: Option<String>,
    stall: Option<Duration>,
}

/// Mock device recording its calls.
pub struct MockDevice {
    name: DeviceName,
    value: Mutex<f64>,
    journal: CallJournal,
    faults: Faults,
}

impl MockDevice {
    /// Device reporting `value` on every read, with its own journal.
    pub fn new(name: &str, value: f64) -> AppResult<Self> {
        Self::with_journal(name, value, CallJournal::new())
    }

    /// Device recording into a shared journal.
    pub fn with_journal(name: &str, value: f64, journal: CallJournal) -> AppResult<Self> {
        Ok(Self {
            name: DeviceName::parse(name)?,
            value: Mutex::new(value),
            journal,
            faults: Faults::default(),
        })
    }

    /// Fail every read with `reason`.
    pub fn failing_read(mut self, reason: &str) -> Self {
        self.faults.read = Some(reason.to_string());
        self
    }

    /// Fail every write with `reason`.
    pub fn failing_write(mut self, reason: &str) -> Self {
        self.faults.write = Some(reason.to_string());
        self
    }

    /// Fail every abort with `reason`.
    pub fn failing_abort(mut self, reason: &str) -> Self {
        self.faults.abort = Some(reason.to_string());
        self
    }

    /// Delay every call by `delay` before answering.
    pub fn stalling(mut self, delay: Duration) -> Self {
        self.faults.stall = Some(delay);
        self
    }

    /// The journal this device records into.
    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }

    /// Last written (or initial) value.
    pub fn value(&self) -> f64 {
        *self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn stall(&self) {
        if let Some(delay) = self.faults.stall {
            sleep(delay).await;
        }
    }

    fn fail(&self, reason: &Option<String>) -> Result<()> {
        match reason {
            Some(reason) => Err(anyhow!("{reason}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DeviceProxy for MockDevice {
    fn name(&self) -> &DeviceName {
        &self.name
    }

    async fn read_attribute(&self, attribute: &str) -> Result<f64> {
        self.journal.push(DeviceCall::Read {
            device: self.name.to_string(),
            attribute: attribute.to_string(),
        });
        self.stall().await;
        self.fail(&self.faults.read)?;
        Ok(self.value())
    }

    async fn write_attribute(&self, attribute: &str, value: f64) -> Result<()> {
        self.journal.push(DeviceCall::Write {
            device: self.name.to_string(),
            attribute: attribute.to_string(),
            value,
        });
        self.stall().await;
        self.fail(&self.faults.write)?;
        *self.value.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
        Ok(())
    }

    async fn abort(&self) -> Result<()> {
        self.journal.push(DeviceCall::Abort {
            device: self.name.to_string(),
        });
        self.stall().await;
        self.fail(&self.faults.abort)
    }
}

/// Factory over a fixed set of mock devices.
#[derive(Default)]
pub struct MockFactory {
    devices: HashMap<DeviceName, Arc<MockDevice>>,
}

impl MockFactory {
    /// Empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device and hand back a typed handle for assertions.
    pub fn insert(&mut self, device: MockDevice) -> Arc<MockDevice> {
        let device = Arc::new(device);
        self.devices.insert(device.name().clone(), Arc::clone(&device));
        device
    }
}

#[async_trait]
impl DeviceFactory for MockFactory {
    async fn resolve(&self, name: &DeviceName) -> AppResult<DeviceHandle> {
        match self.devices.get(name) {
            Some(device) => Ok(Arc::clone(device) as DeviceHandle),
            None => Err(PanelError::UnknownDevice {
                name: name.to_string(),
            }),
        }
    }
}
