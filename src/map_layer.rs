use crate::classify::{Classification, ScaleKind};
use crate::config::MapConfig;
use crate::palette::Color;
use crate::types::{Feature, Layer};
use crate::view::RenderInput;
use geo::Centroid;
use serde::Serialize;

pub const STROKE_COLOR: Color = Color::rgb(0, 0, 0);
pub const STROKE_WEIGHT: f64 = 1.5;
pub const FILL_OPACITY: f64 = 0.7;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStyle {
    pub fill_color: Color,
    pub color: Color,
    pub weight: f64,
    pub fill_opacity: f64,
}

/// Hover text for one feature. Carries display names only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tooltip {
    pub layer: Layer,
    pub label: String,
    pub indicator: String,
    pub value: u64,
}

impl Tooltip {
    pub fn lines(&self) -> [String; 2] {
        [
            format!("{}: {}", self.layer, self.label),
            format!("{}: {}", self.indicator, self.value),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StyledFeature {
    pub feature_index: usize,
    pub geometry: Option<geojson::Geometry>,
    pub style: FeatureStyle,
    pub tooltip: Tooltip,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelMarker {
    pub lon: f64,
    pub lat: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Legend {
    pub caption: String,
    pub kind: ScaleKind,
    pub breakpoints: Vec<f64>,
    pub colors: Vec<Color>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Viewport {
    pub center_lat: f64,
    pub center_lon: f64,
    pub zoom: u8,
    pub tiles: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MapLayer {
    pub name: String,
    pub features: Vec<StyledFeature>,
    pub labels: Vec<LabelMarker>,
    pub legend: Option<Legend>,
    pub viewport: Viewport,
}

/// Label anchor: area-weighted centroid for (multi)polygons, the point itself for points.
pub fn label_anchor(feature: &Feature) -> Option<geo::Point<f64>> {
    feature.geometry.as_ref().and_then(|g| g.centroid())
}

pub fn build(
    input: &RenderInput<'_>,
    classification: &Classification,
    map: &MapConfig,
    show_labels: bool,
    show_legend: bool,
) -> MapLayer {
    let layer = input.dataset.layer;
    let display_name = input.display_name();
    let label_field = input.definition.label_field;

    let features = input
        .dataset
        .features
        .iter()
        .enumerate()
        .map(|(i, feature)| {
            let value = input.frame.value(input.indicator, i);
            StyledFeature {
                feature_index: i,
                geometry: feature
                    .geometry
                    .as_ref()
                    .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
                style: FeatureStyle {
                    fill_color: classification.color_for(Some(value as f64)),
                    color: STROKE_COLOR,
                    weight: STROKE_WEIGHT,
                    fill_opacity: FILL_OPACITY,
                },
                tooltip: Tooltip {
                    layer,
                    label: feature.text(label_field),
                    indicator: display_name.to_string(),
                    value,
                },
            }
        })
        .collect();

    let labels = if show_labels {
        input
            .dataset
            .features
            .iter()
            .filter_map(|feature| {
                let text = feature.text(label_field);
                if text.is_empty() {
                    return None;
                }
                label_anchor(feature).map(|p| LabelMarker {
                    lon: p.x(),
                    lat: p.y(),
                    text,
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let legend = show_legend.then(|| Legend {
        caption: format!("{display_name} Count"),
        kind: classification.kind,
        breakpoints: classification.breakpoints.clone(),
        colors: classification.colors.clone(),
    });

    let (center_lat, center_lon) = match input.dataset.total_bounds() {
        Some(b) => ((b.min().y + b.max().y) / 2.0, (b.min().x + b.max().x) / 2.0),
        None => (0.0, 0.0),
    };

    MapLayer {
        name: format!("{layer} Layer"),
        features,
        labels,
        legend,
        viewport: Viewport {
            center_lat,
            center_lon,
            zoom: map.zoom_start,
            tiles: map.tiles.clone(),
        },
    }
}

impl MapLayer {
    /// GeoJSON hand-off for map renderers that style from feature properties.
    pub fn to_feature_collection(&self) -> geojson::FeatureCollection {
        let features = self
            .features
            .iter()
            .map(|f| {
                let mut properties = geojson::JsonObject::new();
                properties.insert("label".into(), f.tooltip.label.clone().into());
                properties.insert("indicator".into(), f.tooltip.indicator.clone().into());
                properties.insert("value".into(), f.tooltip.value.into());
                properties.insert("fillColor".into(), f.style.fill_color.to_hex().into());
                properties.insert("color".into(), f.style.color.to_hex().into());
                properties.insert("weight".into(), f.style.weight.into());
                properties.insert("fillOpacity".into(), f.style.fill_opacity.into());
                properties.insert("tooltip".into(), f.tooltip.lines().to_vec().into());
                geojson::Feature {
                    bbox: None,
                    geometry: f.geometry.clone(),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}
