//! Playback and filter commands.
//!
//! Commands are fire-and-forget: local state changes once the command is
//! queued on the node transport, not when the node acknowledges it.

use std::sync::Arc;

use shoal_common::{Result, ShoalError};
use tracing::{debug, info};

use super::{Player, PlayerEvent};
use crate::filters::{
    clamp_volume, Distortion, EqualizerBand, FilterSettings, Karaoke, Rotation, Timescale,
    Tremolo, Vibrato,
};
use crate::node::NodeConnection;
use crate::protocol::Command;

/// Options for `Player::play_track`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayOptions {
    /// Ignore the request if a track is already playing.
    pub no_replace: bool,
    pub pause: bool,
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            no_replace: true,
            pause: false,
            start_time: None,
            end_time: None,
        }
    }
}

impl Player {
    async fn send(&self, command: Command) -> Result<()> {
        self.link.node().await.send(&command).await
    }

    pub async fn play_track(&self, track: &str, options: PlayOptions) -> Result<()> {
        if track.is_empty() {
            return Err(ShoalError::Configuration("no track given to play".into()));
        }
        self.send(Command::Play {
            guild_id: self.guild_id.clone(),
            track: track.to_string(),
            no_replace: options.no_replace,
            pause: options.pause,
            start_time: options.start_time.filter(|ms| *ms > 0),
            end_time: options.end_time.filter(|ms| *ms > 0),
        })
        .await?;

        let mut state = self.state.write().await;
        state.track = Some(track.to_string());
        state.paused = options.pause;
        state.position = 0;
        Ok(())
    }

    pub async fn stop_track(&self) -> Result<()> {
        self.send(Command::Stop {
            guild_id: self.guild_id.clone(),
        })
        .await?;

        let mut state = self.state.write().await;
        state.track = None;
        state.position = 0;
        Ok(())
    }

    pub async fn set_paused(&self, pause: bool) -> Result<()> {
        self.send(Command::Pause {
            guild_id: self.guild_id.clone(),
            pause,
        })
        .await?;
        self.state.write().await.paused = pause;
        Ok(())
    }

    /// Seek to `position` millis.
    pub async fn seek_to(&self, position: u64) -> Result<()> {
        self.send(Command::Seek {
            guild_id: self.guild_id.clone(),
            position,
        })
        .await
    }

    // -- filters ------------------------------------------------------------

    /// Resend the complete filter set.
    async fn update_filters(&self) -> Result<()> {
        let filters = self.state.read().await.filters.clone();
        self.send(Command::Filters {
            guild_id: self.guild_id.clone(),
            filters: Some(filters),
        })
        .await
    }

    /// Set the volume multiplier, clamped to `0.0..=5.0`.
    pub async fn set_volume(&self, volume: f64) -> Result<()> {
        let Some(volume) = clamp_volume(volume) else {
            return Err(ShoalError::Configuration(
                "please input a valid number for volume".into(),
            ));
        };
        self.state.write().await.filters.volume = volume;
        self.update_filters().await
    }

    pub async fn set_equalizer(&self, bands: Vec<EqualizerBand>) -> Result<()> {
        self.state.write().await.filters.equalizer = bands;
        self.update_filters().await
    }

    pub async fn set_karaoke(&self, karaoke: Option<Karaoke>) -> Result<()> {
        self.state.write().await.filters.karaoke = karaoke;
        self.update_filters().await
    }

    pub async fn set_timescale(&self, timescale: Option<Timescale>) -> Result<()> {
        self.state.write().await.filters.timescale = timescale;
        self.update_filters().await
    }

    pub async fn set_tremolo(&self, tremolo: Option<Tremolo>) -> Result<()> {
        self.state.write().await.filters.tremolo = tremolo;
        self.update_filters().await
    }

    pub async fn set_vibrato(&self, vibrato: Option<Vibrato>) -> Result<()> {
        self.state.write().await.filters.vibrato = vibrato;
        self.update_filters().await
    }

    pub async fn set_rotation(&self, rotation: Option<Rotation>) -> Result<()> {
        self.state.write().await.filters.rotation = rotation;
        self.update_filters().await
    }

    pub async fn set_distortion(&self, distortion: Option<Distortion>) -> Result<()> {
        self.state.write().await.filters.distortion = distortion;
        self.update_filters().await
    }

    /// Replace every filter at once.
    pub async fn set_filters(&self, mut settings: FilterSettings) -> Result<()> {
        let Some(volume) = clamp_volume(settings.volume) else {
            return Err(ShoalError::Configuration(
                "please input a valid number for volume".into(),
            ));
        };
        settings.volume = volume;
        self.state.write().await.filters = settings;
        self.update_filters().await
    }

    /// Reset to default filters; the node receives an empty snapshot.
    pub async fn clear_filters(&self) -> Result<()> {
        self.state.write().await.filters = FilterSettings::default();
        self.send(Command::Filters {
            guild_id: self.guild_id.clone(),
            filters: None,
        })
        .await
    }

    // -- recovery -----------------------------------------------------------

    /// Replay filters and the current track at its last position.
    ///
    /// Failures are published as `PlayerEvent::Error`.
    pub async fn resume(&self) {
        match self.replay().await {
            Ok(()) => {
                debug!(guild = %self.guild_id, "Player resumed");
                self.emit(PlayerEvent::Resumed);
            }
            Err(e) => self.emit(PlayerEvent::Error(e)),
        }
    }

    async fn replay(&self) -> Result<()> {
        self.update_filters().await?;
        let (track, position, paused) = {
            let state = self.state.read().await;
            (state.track.clone(), state.position, state.paused)
        };
        if let Some(track) = track {
            let options = PlayOptions {
                start_time: Some(position),
                pause: paused,
                ..PlayOptions::default()
            };
            self.play_track(&track, options).await?;
        }
        Ok(())
    }

    /// Move this player to another node and resume playback there.
    ///
    /// Moving to the node that already hosts the player does nothing.
    pub async fn move_to_node(self: &Arc<Self>, target: Arc<NodeConnection>) -> Result<()> {
        if Arc::ptr_eq(&self.node().await, &target) {
            return Ok(());
        }
        self.migrate(target).await
    }

    /// Replay the voice session on `target`, which may be the current node,
    /// then resume.
    pub(crate) async fn migrate(self: &Arc<Self>, target: Arc<NodeConnection>) -> Result<()> {
        info!(guild = %self.guild_id, node = %target.name(), "Moving player");
        self.link.move_to_node(self, target).await?;
        self.resume().await;
        Ok(())
    }
}
