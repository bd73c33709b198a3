use crate::error::ConfigError;
use geo::{BoundingRect, Coord, Geometry, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// The two facility-type datasets the dashboard can show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Layer {
    #[default]
    #[serde(rename = "PHC")]
    Phc,
    #[serde(rename = "RBSK")]
    Rbsk,
}

impl Layer {
    pub const ALL: [Layer; 2] = [Layer::Phc, Layer::Rbsk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Phc => "PHC",
            Layer::Rbsk => "RBSK",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PHC" => Ok(Layer::Phc),
            "RBSK" => Ok(Layer::Rbsk),
            _ => Err(ConfigError::UnknownLayer(s.to_string())),
        }
    }
}

/// One region or facility: its shape (lon/lat) and raw attribute values.
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Feature {
    pub fn attribute(&self, column: &str) -> Option<&serde_json::Value> {
        self.attributes.get(column)
    }

    /// Human-readable text for an attribute, empty when null or absent.
    pub fn text(&self, column: &str) -> String {
        match self.attributes.get(column) {
            Some(serde_json::Value::String(s)) => s.trim().to_string(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// All features of one layer, in source order. Read-only after load.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub layer: Layer,
    pub features: Vec<Feature>,
}

impl Dataset {
    pub fn new(layer: Layer, features: Vec<Feature>) -> Self {
        Self { layer, features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Bounding box over every non-null geometry.
    pub fn total_bounds(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref())
            .filter_map(|g| g.bounding_rect())
            .reduce(|acc, r| {
                Rect::new(
                    Coord {
                        x: acc.min().x.min(r.min().x),
                        y: acc.min().y.min(r.min().y),
                    },
                    Coord {
                        x: acc.max().x.max(r.max().x),
                        y: acc.max().y.max(r.max().y),
                    },
                )
            })
    }
}
