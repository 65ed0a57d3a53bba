use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde_derive::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    pub discovery: Option<DiscoveryConfig>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub state_topic: Option<String>,
    pub availability_topic: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

impl MqttConfig {
    pub fn client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| "rpi5-motion-sensor".to_string())
    }

    pub fn state_topic(&self) -> String {
        self.state_topic
            .clone()
            .unwrap_or_else(|| "rpi5/motion".to_string())
    }

    /// Falls back to `<state_topic>/availability`.
    pub fn availability_topic(&self) -> String {
        self.availability_topic
            .clone()
            .unwrap_or_else(|| format!("{}/availability", self.state_topic()))
    }
}

/// X11 session the display commands are run against.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct DisplayConfig {
    pub command: Option<String>,
    pub display: Option<String>,
    pub xauthority: Option<String>,
    pub command_timeout_seconds: Option<u64>,
}

impl DisplayConfig {
    pub fn command(&self) -> String {
        self.command.clone().unwrap_or_else(|| "xset".to_string())
    }

    pub fn display(&self) -> String {
        self.display.clone().unwrap_or_else(|| ":0".to_string())
    }

    pub fn xauthority(&self) -> String {
        self.xauthority
            .clone()
            .unwrap_or_else(|| "/home/pi/.Xauthority".to_string())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds.unwrap_or(5))
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct MotionConfig {
    /// BCM pin number of the PIR output.
    pub gpio_pin: Option<u8>,
    pub pull_down: Option<bool>,
    pub debounce_ms: Option<u64>,
}

impl MotionConfig {
    pub fn gpio_pin(&self) -> u8 {
        self.gpio_pin.unwrap_or(17)
    }

    pub fn pull_down(&self) -> bool {
        self.pull_down.unwrap_or(true)
    }

    pub fn debounce(&self) -> Option<Duration> {
        self.debounce_ms.map(Duration::from_millis)
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TimeoutConfig {
    pub reset_seconds: Option<u64>,
    pub screen_off_seconds: Option<u64>,
    pub tick_seconds: Option<u64>,
}

impl TimeoutConfig {
    pub fn reset(&self) -> Duration {
        Duration::from_secs(self.reset_seconds.unwrap_or(30))
    }

    pub fn screen_off(&self) -> Duration {
        Duration::from_secs(self.screen_off_seconds.unwrap_or(300))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds.unwrap_or(2).max(1))
    }
}

/// Home Assistant MQTT discovery.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct DiscoveryConfig {
    pub enabled: Option<bool>,
    pub prefix: Option<String>,
    pub name: Option<String>,
}

impl DiscoveryConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn prefix(&self) -> String {
        self.prefix
            .clone()
            .unwrap_or_else(|| "homeassistant".to_string())
    }

    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| "Motion".to_string())
    }
}
