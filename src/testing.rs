//! In-memory display and bus shared by the unit tests.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;

use crate::display::DisplayPort;
use crate::messages::{DisplayPower, Occupancy};
use crate::mqtt::PresenceBus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayCall {
    Query,
    On,
    Off,
}

/// Behaves like a real monitor: power commands change what the next query reports.
#[derive(Clone)]
pub struct FakeDisplay {
    power: Arc<StdMutex<Option<DisplayPower>>>,
    calls: Arc<StdMutex<Vec<DisplayCall>>>,
    commands_fail: bool,
}

impl FakeDisplay {
    pub fn new(power: DisplayPower) -> Self {
        FakeDisplay {
            power: Arc::new(StdMutex::new(Some(power))),
            calls: Arc::default(),
            commands_fail: false,
        }
    }

    /// Every query and command fails.
    pub fn unreachable() -> Self {
        FakeDisplay {
            power: Arc::new(StdMutex::new(None)),
            calls: Arc::default(),
            commands_fail: true,
        }
    }

    pub fn power(&self) -> Option<DisplayPower> {
        *self.power.lock().unwrap()
    }

    pub fn set_power(&self, power: DisplayPower) {
        *self.power.lock().unwrap() = Some(power);
    }

    /// Power commands issued so far, queries left out.
    pub fn commands(&self) -> Vec<DisplayCall> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .copied()
            .filter(|c| *c != DisplayCall::Query)
            .collect()
    }

    pub fn queries(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == DisplayCall::Query)
            .count()
    }

    fn record(&self, call: DisplayCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl DisplayPort for FakeDisplay {
    async fn power_state(&self) -> anyhow::Result<DisplayPower> {
        self.record(DisplayCall::Query);
        self.power()
            .ok_or_else(|| anyhow::anyhow!("xset: unable to open display"))
    }

    async fn ensure_on(&self) -> anyhow::Result<()> {
        self.record(DisplayCall::On);
        if self.commands_fail {
            anyhow::bail!("xset: unable to open display");
        }
        self.set_power(DisplayPower::On);
        Ok(())
    }

    async fn ensure_off(&self) -> anyhow::Result<()> {
        self.record(DisplayCall::Off);
        if self.commands_fail {
            anyhow::bail!("xset: unable to open display");
        }
        self.set_power(DisplayPower::Off);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeBus {
    published: Arc<StdMutex<Vec<Occupancy>>>,
    fail: bool,
}

impl FakeBus {
    /// Records every publish but reports each one as failed.
    pub fn failing() -> Self {
        FakeBus {
            fail: true,
            ..FakeBus::default()
        }
    }

    pub fn published(&self) -> Vec<Occupancy> {
        self.published.lock().unwrap().clone()
    }
}

impl PresenceBus for FakeBus {
    fn publish(&self, occupancy: Occupancy) -> anyhow::Result<()> {
        self.published.lock().unwrap().push(occupancy);
        if self.fail {
            anyhow::bail!("request queue full");
        }
        Ok(())
    }
}
