use crate::types::Layer;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// One geometry file per layer (.shp, .json or .geojson), already in lon/lat.
#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub phc: PathBuf,
    pub rbsk: PathBuf,
}

impl InputConfig {
    pub fn path_for(&self, layer: Layer) -> &Path {
        match layer {
            Layer::Phc => &self.phc,
            Layer::Rbsk => &self.rbsk,
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MapConfig {
    #[serde(default = "default_zoom")]
    pub zoom_start: u8,
    #[serde(default = "default_tiles")]
    pub tiles: String,
}

fn default_zoom() -> u8 {
    10
}

fn default_tiles() -> String {
    "OpenStreetMap".to_string()
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            zoom_start: default_zoom(),
            tiles: default_tiles(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    /// Sessions with no request for this long are dropped.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_session_idle_secs() -> u64 {
    1800
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            static_dir: default_static_dir(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse TOML configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_sections_fall_back_to_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [input]
            phc = "data/phc_shapefile_js/phc_shapefile_js.shp"
            rbsk = "data/rbsk.geojson"
            "#,
        )
        .unwrap();
        assert_eq!(config.map, MapConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.session_idle_secs, 1800);
        assert_eq!(
            config.input.path_for(Layer::Rbsk),
            Path::new("data/rbsk.geojson")
        );
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [input]
            phc = "phc.shp"
            rbsk = "rbsk.shp"

            [map]
            zoom_start = 9

            [server]
            port = 3000
            static_dir = "web"
            session_idle_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.map.zoom_start, 9);
        assert_eq!(config.map.tiles, "OpenStreetMap");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.static_dir, PathBuf::from("web"));
        assert_eq!(config.server.session_idle_secs, 60);
    }

    #[test]
    fn missing_input_section_is_an_error() {
        assert!(AppConfig::from_toml("[map]\nzoom_start = 4\n").is_err());
    }
}
