use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::display::DisplayPort;
use crate::messages::{DisplayPower, Occupancy};
use crate::mqtt::PresenceBus;

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Idle time after which occupancy is published OFF.
    pub reset: Duration,
    /// Idle time after which the display is powered off. Expected to be >= `reset`.
    pub screen_off: Duration,
}

#[derive(Debug)]
struct State {
    last_motion: Instant,
    published: Occupancy,
}

/// Reconciles motion events and the periodic tick into one occupancy state.
///
/// Both entry points hold the state lock for their whole duration, display query and
/// command included, so a tick can never act on a display state that a concurrent
/// motion event is in the middle of changing.
pub struct OccupancyController<D, B> {
    display: D,
    bus: B,
    timeouts: Timeouts,
    state: Mutex<State>,
}

impl<D: DisplayPort, B: PresenceBus> OccupancyController<D, B> {
    pub fn new(display: D, bus: B, timeouts: Timeouts, started: Instant) -> Self {
        OccupancyController {
            display,
            bus,
            timeouts,
            state: Mutex::new(State {
                last_motion: started,
                published: Occupancy::Idle,
            }),
        }
    }

    pub async fn on_motion(&self, now: Instant) {
        let mut state = self.state.lock().await;
        state.last_motion = now;
        info!("Motion detected");

        match self.display.query().await {
            DisplayPower::Off => {
                if let Err(err) = self.display.ensure_on().await {
                    error!("Failed to turn display on: {err:#}");
                }
            }
            DisplayPower::On => debug!("Display already on, skipping power command"),
        }

        if state.published != Occupancy::Occupied {
            self.publish(Occupancy::Occupied);
            state.published = Occupancy::Occupied;
        } else {
            debug!("Occupancy already published ON, skipping publish");
        }
    }

    pub async fn on_tick(&self, now: Instant) {
        let mut state = self.state.lock().await;
        let idle = now.saturating_duration_since(state.last_motion);

        if state.published == Occupancy::Occupied && idle > self.timeouts.reset {
            info!("No motion for {:?}, resetting occupancy", self.timeouts.reset);
            self.publish(Occupancy::Idle);
            state.published = Occupancy::Idle;
        }

        if idle > self.timeouts.screen_off {
            match self.display.query().await {
                DisplayPower::On => {
                    info!("No motion for {:?}, turning display off", self.timeouts.screen_off);
                    if let Err(err) = self.display.ensure_off().await {
                        error!("Failed to turn display off: {err:#}");
                    }
                }
                DisplayPower::Off => debug!("Display already off"),
            }
        }
    }

    /// `published` tracks intent, so a failed publish still counts as sent.
    fn publish(&self, occupancy: Occupancy) {
        if let Err(err) = self.bus.publish(occupancy) {
            error!("Failed to publish occupancy {}: {err:#}", occupancy.payload());
        }
    }
}
