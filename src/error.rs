use crate::types::Layer;
use thiserror::Error;

/// A control or state bug: something asked for a layer, indicator, or scheme
/// that does not exist, or a dataset does not carry the columns its layer
/// definition promises.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown layer '{0}' (expected one of: PHC, RBSK)")]
    UnknownLayer(String),
    #[error("unknown indicator '{indicator}' for layer {layer} (available: {available})")]
    UnknownIndicator {
        layer: Layer,
        indicator: String,
        available: String,
    },
    #[error("unknown color scheme '{scheme}' (available: {available})")]
    UnknownScheme { scheme: String, available: String },
    #[error("layer {layer}: feature #{feature_index} has no '{column}' column")]
    MissingColumn {
        layer: Layer,
        feature_index: usize,
        column: String,
    },
}

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("data for layer {layer} is unavailable: {reason}")]
    DataUnavailable { layer: Layer, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to export table: {0}")]
    Export(String),
}

impl DashboardError {
    pub fn data_unavailable(layer: Layer, err: impl std::fmt::Display) -> Self {
        DashboardError::DataUnavailable {
            layer,
            reason: err.to_string(),
        }
    }

    /// Short, user-facing summary. The `Display` form carries the diagnostic detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            DashboardError::DataUnavailable { .. } => {
                "Shapefile not found. Please ensure the layer's data file is available."
            }
            DashboardError::Config(_) => "The requested selection is not valid.",
            DashboardError::Export(_) => "The table could not be exported.",
        }
    }
}

pub type Result<T, E = DashboardError> = std::result::Result<T, E>;
