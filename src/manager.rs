use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::AppConfig;
use crate::controller::{OccupancyController, Timeouts};
use crate::display::{DisplayPort, XsetDisplay};
use crate::motion::{self, GpioMotionSource, MotionSource as _};
use crate::mqtt::{MqttClient, PresenceBus};

/// How long shutdown waits for the offline message to go out.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Owns the process lifetime: starts every task, then waits for a shutdown signal.
pub struct Manager {
    config: AppConfig,
}

impl Manager {
    pub fn new(config: AppConfig) -> Self {
        Manager { config }
    }

    pub async fn run_loop(self) -> anyhow::Result<()> {
        let timeouts = Timeouts {
            reset: self.config.timeouts.reset(),
            screen_off: self.config.timeouts.screen_off(),
        };
        if timeouts.screen_off < timeouts.reset {
            warn!(
                "Screen-off timeout {:?} is shorter than occupancy reset {:?}",
                timeouts.screen_off, timeouts.reset
            );
        }

        let (mqtt_client, mut eventloop) =
            MqttClient::new(&self.config.mqtt, self.config.discovery.as_ref());
        let mqtt_task = {
            let client = mqtt_client.clone();
            tokio::task::spawn(async move {
                client.event_loop(&mut eventloop).await;
            })
        };

        let controller = Arc::new(OccupancyController::new(
            XsetDisplay::new(&self.config.display),
            mqtt_client.clone(),
            timeouts,
            Instant::now(),
        ));

        // Dropping the source would release the pin and stop interrupts
        let (tx, rx) = mpsc::unbounded_channel();
        let _motion_source = match GpioMotionSource::open(&self.config.motion) {
            Ok(mut source) => match source.on_motion(motion::channel_handler(tx)) {
                Ok(()) => Some(source),
                Err(err) => {
                    error!("Failed to register motion callback, no motion will be sensed: {err:#}");
                    None
                }
            },
            Err(err) => {
                error!("Failed to initialize PIR sensor, no motion will be sensed: {err}");
                None
            }
        };
        tokio::task::spawn(motion::run(Arc::clone(&controller), rx));

        tokio::task::spawn(tick_loop(
            Arc::clone(&controller),
            self.config.timeouts.tick(),
        ));

        info!("Presence controller running");
        shutdown_signal().await?;
        info!("Shutting down");

        match tokio::time::timeout(SHUTDOWN_GRACE, mqtt_client.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!("Error disconnecting from MQTT: {:?}", err),
            Err(_) => warn!("Timed out publishing offline availability"),
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, mqtt_task).await.is_err() {
            warn!("MQTT event loop did not finish, relying on last will");
        }

        Ok(())
    }
}

async fn tick_loop<D, B>(controller: Arc<OccupancyController<D, B>>, period: Duration)
where
    D: DisplayPort,
    B: PresenceBus,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        let now = ticker.tick().await;
        controller.on_tick(now).await;
    }
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res,
        _ = terminate.recv() => Ok(()),
    }
}
