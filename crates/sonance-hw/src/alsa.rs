//! ALSA mixer gateway.
//!
//! Each sound card listed in `/proc/asound/cards` is a sink, identified by
//! its card id (the name in brackets). Volume and mute go through the
//! `amixer` tool on a single simple control per card.

use std::path::{Path, PathBuf};

use sonance_core::{AudioSinkGateway, AudioState, GatewayError, SinkChange, SinkId};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{HwError, HwResult};

/// Default location of the card list.
pub const CARDS_PATH: &str = "/proc/asound/cards";

/// Mixer access through `amixer`.
#[derive(Debug, Clone)]
pub struct AlsaMixer {
    control: String,
    cards_path: PathBuf,
    allowed: Vec<String>,
    default_sink: Option<SinkId>,
    program: String,
}

impl AlsaMixer {
    /// Create a mixer driving the named simple control (e.g. `Master`).
    #[must_use]
    pub fn new(control: impl Into<String>) -> Self {
        Self {
            control: control.into(),
            cards_path: PathBuf::from(CARDS_PATH),
            allowed: Vec::new(),
            default_sink: None,
            program: "amixer".to_string(),
        }
    }

    /// Only treat these card ids as sinks. Empty means every card.
    #[must_use]
    pub fn with_allowed_cards(mut self, cards: Vec<String>) -> Self {
        self.allowed = cards;
        self
    }

    /// Sink to activate at startup when present.
    #[must_use]
    pub fn with_default_sink(mut self, sink: Option<SinkId>) -> Self {
        self.default_sink = sink;
        self
    }

    /// Read the card list from another file.
    #[must_use]
    pub fn with_cards_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cards_path = path.into();
        self
    }

    /// Run a different mixer binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    async fn amixer(&self, card: &SinkId, args: &[&str]) -> HwResult<String> {
        // A caller that gives up (gateway timeout) must not leave the write running
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(card.as_str())
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| HwError::AlsaError(format!("failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HwError::AlsaError(format!("amixer failed on {card}: {}", stderr.trim())));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn set(&self, card: &SinkId, values: &[&str]) -> HwResult<()> {
        let mut args = vec!["-q", "sset", self.control.as_str()];
        args.extend_from_slice(values);
        self.amixer(card, &args).await?;
        debug!(%card, control = %self.control, ?values, "Mixer control set");
        Ok(())
    }

    /// Read volume and mute of a card.
    async fn read(&self, card: &SinkId) -> HwResult<(u8, bool)> {
        let stdout = self.amixer(card, &["sget", self.control.as_str()]).await?;
        let volume = parse_volume(&stdout)
            .ok_or_else(|| HwError::ProtocolError(format!("no volume for {} on {card}", self.control)))?;
        let muted = parse_muted(&stdout).unwrap_or_else(|| {
            warn!(%card, "Control has no mute switch, assuming unmuted");
            false
        });
        Ok((volume, muted))
    }

    async fn cards(&self) -> HwResult<Vec<SinkId>> {
        read_cards(&self.cards_path, &self.allowed).await
    }
}

impl AudioSinkGateway for AlsaMixer {
    async fn current_state(&self) -> Result<AudioState, GatewayError> {
        let sinks = self.cards().await?;
        let active = self
            .default_sink
            .clone()
            .filter(|sink| sinks.contains(sink))
            .or_else(|| sinks.first().cloned());

        let (volume, muted) = match &active {
            Some(card) => self.read(card).await?,
            None => (0, false),
        };
        Ok(AudioState::new(volume, muted, active, sinks))
    }

    async fn apply(&self, change: &SinkChange) -> Result<(), GatewayError> {
        match change {
            SinkChange::Volume { sink, level } => self.set(sink, &[format!("{level}%").as_str()]).await?,
            SinkChange::Mute { sink, muted } => self.set(sink, &[switch(*muted)]).await?,
            SinkChange::Activate { sink, volume, muted } => {
                self.set(sink, &[format!("{volume}%").as_str(), switch(*muted)]).await?;
                // Silence the rest so only the active card plays
                for other in self.cards().await?.iter().filter(|other| *other != sink) {
                    if let Err(e) = self.set(other, &["mute"]).await {
                        warn!(card = %other, error = %e, "Failed to mute inactive card");
                    }
                }
            }
        }
        Ok(())
    }

    async fn enumerate_sinks(&self) -> Result<Vec<SinkId>, GatewayError> {
        Ok(self.cards().await?)
    }
}

fn switch(muted: bool) -> &'static str {
    if muted { "mute" } else { "unmute" }
}

/// Read and parse a card list file.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub async fn read_cards(path: &Path, allowed: &[String]) -> HwResult<Vec<SinkId>> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(parse_cards(&content, allowed))
}

/// Extract card ids from `/proc/asound/cards` content.
///
/// Lines look like ` 0 [PCH            ]: HDA-Intel - HDA Intel PCH`,
/// each followed by an indented description line.
#[must_use]
pub fn parse_cards(content: &str, allowed: &[String]) -> Vec<SinkId> {
    content
        .lines()
        .filter_map(|line| {
            let (index, rest) = line.trim_start().split_once(' ')?;
            index.parse::<u32>().ok()?;
            let id = rest.trim_start().strip_prefix('[')?.split_once(']')?.0.trim();
            (!id.is_empty()).then(|| id.to_string())
        })
        .filter(|id| allowed.is_empty() || allowed.contains(id))
        .map(SinkId::new)
        .collect()
}

/// First `[NN%]` field of `amixer sget` output.
#[must_use]
pub fn parse_volume(stdout: &str) -> Option<u8> {
    stdout.split_whitespace().find_map(|part| {
        let percent = part.strip_prefix('[')?.strip_suffix("%]")?;
        percent.parse::<u8>().ok().map(|p| p.min(100))
    })
}

/// Mute state from the `[on]` / `[off]` switch field.
#[must_use]
pub fn parse_muted(stdout: &str) -> Option<bool> {
    if stdout.contains("[off]") {
        Some(true)
    } else if stdout.contains("[on]") {
        Some(false)
    } else {
        None
    }
}
