//! Wi-Fi provisioning through NetworkManager's `nmcli`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::process;

/// Which screen the viewer should put up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Screen {
    Feed,
    NetworkSetup,
}

impl Screen {
    pub fn for_connectivity(connected: bool) -> Self {
        if connected {
            Screen::Feed
        } else {
            Screen::NetworkSetup
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkManager {
    program: PathBuf,
}

impl Default for NetworkManager {
    fn default() -> Self {
        Self::with_program("nmcli")
    }
}

impl NetworkManager {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub async fn ensure_available(&self) -> Result<()> {
        process::ensure_available(&self.program, "--version").await
    }

    /// Visible SSIDs, deduplicated and sorted. Hidden networks are skipped.
    pub async fn scan(&self) -> Result<Vec<String>> {
        let output = process::run(&self.program, ["-t", "-f", "SSID", "dev", "wifi"]).await?;
        let ssids = parse_ssids(&String::from_utf8_lossy(&output.stdout));
        debug!(count = ssids.len(), "wifi scan finished");
        Ok(ssids)
    }

    pub async fn connect(&self, ssid: &str, password: &str) -> Result<()> {
        process::run(
            &self.program,
            ["dev", "wifi", "connect", ssid, "password", password],
        )
        .await?;
        info!(%ssid, "joined wifi network");
        Ok(())
    }

    /// `true` only when NetworkManager reports full connectivity; any failure
    /// to ask counts as disconnected.
    pub async fn is_connected(&self) -> bool {
        match process::run(&self.program, ["-t", "-f", "STATE", "g"]).await {
            Ok(output) => is_connected_state(&String::from_utf8_lossy(&output.stdout)),
            Err(err) => {
                debug!(error = %err, "connectivity check failed");
                false
            }
        }
    }
}

fn parse_ssids(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.trim().replace("\\:", ":"))
        .filter(|ssid| !ssid.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn is_connected_state(stdout: &str) -> bool {
    stdout.trim() == "connected"
}
