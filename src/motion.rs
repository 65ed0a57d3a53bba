use std::sync::Arc;

use log::{debug, info, warn};
use rppal::gpio::{Event, Gpio, InputPin, Trigger};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::MotionConfig;
use crate::controller::OccupancyController;
use crate::display::DisplayPort;
use crate::mqtt::PresenceBus;

/// Called once per sensed motion edge, from the interrupt thread.
///
/// Must not block and must not panic.
pub type MotionHandler = Box<dyn FnMut() + Send + 'static>;

pub trait MotionSource {
    fn on_motion(&mut self, handler: MotionHandler) -> anyhow::Result<()>;
}

/// PIR sensor wired to a GPIO input; its output goes high on motion.
pub struct GpioMotionSource {
    pin: InputPin,
    config: MotionConfig,
}

impl GpioMotionSource {
    pub fn open(config: &MotionConfig) -> Result<Self, rppal::gpio::Error> {
        let pin = Gpio::new()?.get(config.gpio_pin())?;
        let pin = if config.pull_down() {
            pin.into_input_pulldown()
        } else {
            pin.into_input()
        };
        Ok(GpioMotionSource {
            pin,
            config: config.clone(),
        })
    }
}

impl MotionSource for GpioMotionSource {
    fn on_motion(&mut self, mut handler: MotionHandler) -> anyhow::Result<()> {
        self.pin.set_async_interrupt(
            Trigger::RisingEdge,
            self.config.debounce(),
            move |_event: Event| handler(),
        )?;
        info!("Watching GPIO {} for motion", self.config.gpio_pin());
        Ok(())
    }
}

/// Handler that only enqueues the event for [`run`].
pub fn channel_handler(tx: mpsc::UnboundedSender<()>) -> MotionHandler {
    Box::new(move || {
        if tx.send(()).is_err() {
            warn!("Motion event dropped, controller task has stopped");
        }
    })
}

/// Feeds queued motion events to the controller until every sender is gone.
pub async fn run<D, B>(
    controller: Arc<OccupancyController<D, B>>,
    mut rx: mpsc::UnboundedReceiver<()>,
) where
    D: DisplayPort,
    B: PresenceBus,
{
    while rx.recv().await.is_some() {
        let coalesced = drain_pending(&mut rx);
        if coalesced > 0 {
            debug!("Coalesced {} queued motion events", coalesced);
        }
        controller.on_motion(Instant::now()).await;
    }
    debug!("Motion source closed");
}

/// Events that piled up while the previous one was handled carry no extra information.
fn drain_pending(rx: &mut mpsc::UnboundedReceiver<()>) -> usize {
    let mut drained = 0;
    while rx.try_recv().is_ok() {
        drained += 1;
    }
    drained
}
