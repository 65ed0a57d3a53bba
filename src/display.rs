use std::process::{Output, Stdio};
use std::time::Duration;

use anyhow::{Context as _, anyhow, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::process::Command;

use crate::{config::DisplayConfig, messages::DisplayPower};

/// Text `xset q` prints in its DPMS section while the monitor is powered.
const MONITOR_ON_MARKER: &str = "Monitor is On";

#[async_trait]
pub trait DisplayPort: Send + Sync {
    async fn power_state(&self) -> anyhow::Result<DisplayPower>;

    /// Issues the power-on command unconditionally.
    async fn ensure_on(&self) -> anyhow::Result<()>;

    /// Issues the power-off command unconditionally.
    async fn ensure_off(&self) -> anyhow::Result<()>;

    /// Reports `On` whenever the real state cannot be determined.
    async fn query(&self) -> DisplayPower {
        match self.power_state().await {
            Ok(power) => power,
            Err(err) => {
                warn!("Could not determine display power state, assuming on: {err:#}");
                DisplayPower::On
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct XsetDisplay {
    command: String,
    display: String,
    xauthority: String,
    timeout: Duration,
}

impl XsetDisplay {
    pub fn new(config: &DisplayConfig) -> Self {
        XsetDisplay {
            command: config.command(),
            display: config.display(),
            xauthority: config.xauthority(),
            timeout: config.command_timeout(),
        }
    }

    async fn run(&self, args: &[&str]) -> anyhow::Result<Output> {
        let invocation = format!("{} {}", self.command, args.join(" "));
        debug!(
            "Running `{}` with DISPLAY={} XAUTHORITY={}",
            invocation, self.display, self.xauthority
        );

        let mut command = Command::new(&self.command);
        command
            .args(args)
            .env("DISPLAY", &self.display)
            .env("XAUTHORITY", &self.xauthority)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| anyhow!("`{}` timed out after {:?}", invocation, self.timeout))?
            .with_context(|| format!("failed to run `{}`", invocation))?;

        debug!(
            "`{}` exited with {}; stdout: {:?}; stderr: {:?}",
            invocation,
            output.status,
            String::from_utf8_lossy(&output.stdout).trim(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
        Ok(output)
    }

    async fn force(&self, mode: &str) -> anyhow::Result<()> {
        let output = self.run(&["dpms", "force", mode]).await?;
        if !output.status.success() {
            bail!(
                "`{} dpms force {}` failed with {}: {}",
                self.command,
                mode,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl DisplayPort for XsetDisplay {
    async fn power_state(&self) -> anyhow::Result<DisplayPower> {
        let output = self.run(&["q"]).await?;
        if !output.status.success() {
            bail!("`{} q` failed with {}", self.command, output.status);
        }
        Ok(parse_report(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn ensure_on(&self) -> anyhow::Result<()> {
        info!("Turning display on");
        self.force("on").await
    }

    async fn ensure_off(&self) -> anyhow::Result<()> {
        info!("Turning display off");
        self.force("off").await
    }
}

fn parse_report(report: &str) -> DisplayPower {
    if report.contains(MONITOR_ON_MARKER) {
        DisplayPower::On
    } else {
        DisplayPower::Off
    }
}
