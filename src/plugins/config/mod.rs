//! Game configuration, read once at startup from a JSON file.

use std::{fmt, fs, io, path::Path};

use bevy::prelude::*;
use serde::Deserialize;

use crate::{
    plugins::{
        beam::BeamSettings,
        fader::FadeSettings,
        first_person_controller::MovementSettings,
        portal::{PlacementSettings, PortalSettings},
    },
    util::scenes::ArenaSettings,
};

pub const DEFAULT_CONFIG_PATH: &str = "assets/config/portal_hop.json";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub portal: PortalSettings,
    pub beam: BeamSettings,
    pub placement: PlacementSettings,
    pub movement: MovementSettings,
    pub fade: FadeSettings,
    pub arena: ArenaSettings,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Parse(serde_json::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read configuration: {e}"),
            ConfigError::Parse(e) => write!(f, "invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl GameConfig {
    pub fn from_json(json: &str) -> Result<GameConfig, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<GameConfig, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Loads the configuration and publishes every section as a resource.
#[derive(Debug)]
pub struct ConfigPlugin {
    pub path: String,
}

impl Default for ConfigPlugin {
    fn default() -> Self {
        ConfigPlugin {
            path: DEFAULT_CONFIG_PATH.to_owned(),
        }
    }
}

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        let config = match GameConfig::load(&self.path) {
            Ok(config) => {
                info!("Loaded configuration from {}", self.path);
                config
            }
            Err(e) => {
                warn!("{} ({}), using defaults", e, self.path);
                GameConfig::default()
            }
        };
        app.insert_resource(config.portal)
            .insert_resource(config.beam)
            .insert_resource(config.placement)
            .insert_resource(config.movement)
            .insert_resource(config.fade)
            .insert_resource(config.arena);
    }
}
