use crate::error::ConfigError;
use crate::types::{Dataset, Layer};
use serde::Serialize;

/// Indicator set and label column for one layer. `indicators` pairs a display
/// name with its attribute column, in presentation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDefinition {
    pub layer: Layer,
    pub indicators: &'static [(&'static str, &'static str)],
    pub label_field: &'static str,
}

const PHC: LayerDefinition = LayerDefinition {
    layer: Layer::Phc,
    indicators: &[
        ("Severely Stunted", "Severely S"),
        ("Moderately Stunted", "Moderate_2"),
        ("SAM", "SAM"),
        ("MAM", "MAM"),
        ("Obese", "Obese"),
        ("Severely Underweight", "Severely U"),
        ("Moderately Underweight", "Moderately"),
        ("Overweight", "Overweight"),
    ],
    label_field: "PHC_Name",
};

const RBSK: LayerDefinition = LayerDefinition {
    layer: Layer::Rbsk,
    indicators: &[
        ("SAM", "SAM"),
        ("MAM", "MAM"),
        ("Moderately UW", "Moderately"),
        ("Severely UW", "Severely U"),
    ],
    label_field: "RBSK Team",
};

pub fn resolve(layer: Layer) -> &'static LayerDefinition {
    match layer {
        Layer::Phc => &PHC,
        Layer::Rbsk => &RBSK,
    }
}

/// String-keyed lookup used by the user-facing edges.
pub fn resolve_named(layer: &str) -> Result<&'static LayerDefinition, ConfigError> {
    Ok(resolve(layer.parse()?))
}

impl LayerDefinition {
    pub fn display_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.indicators.iter().map(|(display, _)| *display)
    }

    pub fn first_indicator(&self) -> &'static str {
        self.indicators[0].0
    }

    pub fn has_indicator(&self, display_name: &str) -> bool {
        self.indicators.iter().any(|(d, _)| *d == display_name)
    }

    /// Position of a display name in presentation order.
    pub fn index_of(&self, display_name: &str) -> Result<usize, ConfigError> {
        self.indicators
            .iter()
            .position(|(d, _)| *d == display_name)
            .ok_or_else(|| ConfigError::UnknownIndicator {
                layer: self.layer,
                indicator: display_name.to_string(),
                available: self.display_names().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn column_for(&self, display_name: &str) -> Result<&'static str, ConfigError> {
        self.index_of(display_name).map(|i| self.indicators[i].1)
    }

    /// Every feature must carry the label field and all indicator columns.
    /// A present-but-null value is fine; coercion handles it.
    pub fn validate(&self, dataset: &Dataset) -> Result<(), ConfigError> {
        let required = std::iter::once(self.label_field)
            .chain(self.indicators.iter().map(|(_, column)| *column));
        for column in required {
            if let Some(feature_index) = dataset
                .features
                .iter()
                .position(|f| !f.attributes.contains_key(column))
            {
                return Err(ConfigError::MissingColumn {
                    layer: self.layer,
                    feature_index,
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LayerOptions {
    pub layer: Layer,
    pub label_field: &'static str,
    pub indicators: Vec<&'static str>,
    pub default_indicator: &'static str,
}

pub fn layer_options() -> Vec<LayerOptions> {
    Layer::ALL
        .iter()
        .map(|&layer| {
            let def = resolve(layer);
            LayerOptions {
                layer,
                label_field: def.label_field,
                indicators: def.display_names().collect(),
                default_indicator: def.first_indicator(),
            }
        })
        .collect()
}
