use crate::classify::{classify, Classification};
use crate::coerce::{CoercionWarning, ValueFrame};
use crate::config::MapConfig;
use crate::error::{ConfigError, DashboardError, Result};
use crate::map_layer::{self, MapLayer};
use crate::palette::ColorScheme;
use crate::registry::{self, LayerDefinition};
use crate::source::DatasetSource;
use crate::table::{self, DataTable, Stats};
use crate::types::{Dataset, Layer};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Everything the map and table builders read for one render.
pub struct RenderInput<'a> {
    pub dataset: &'a Dataset,
    pub definition: &'a LayerDefinition,
    pub frame: &'a ValueFrame,
    /// Position of the selected indicator in `definition.indicators`.
    pub indicator: usize,
}

impl RenderInput<'_> {
    pub fn display_name(&self) -> &'static str {
        self.definition.indicators[self.indicator].0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionState {
    pub layer: Layer,
    pub indicator: String,
    pub scheme: ColorScheme,
    pub show_labels: bool,
    pub show_legend: bool,
}

impl Default for SelectionState {
    fn default() -> Self {
        let layer = Layer::default();
        Self {
            layer,
            indicator: registry::resolve(layer).first_indicator().to_string(),
            scheme: ColorScheme::default(),
            show_labels: false,
            show_legend: true,
        }
    }
}

/// A user interaction: any subset of the selection fields. Names arrive as
/// plain strings so unknown values surface as [`ConfigError`]s.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SelectionChange {
    pub layer: Option<String>,
    pub indicator: Option<String>,
    pub scheme: Option<String>,
    pub show_labels: Option<bool>,
    pub show_legend: Option<bool>,
}

impl SelectionState {
    /// Returns the state after `change`. Switching layer resets the indicator
    /// to the new layer's first one unless the change names a valid one.
    pub fn apply(&self, change: &SelectionChange) -> Result<SelectionState, ConfigError> {
        let layer = match &change.layer {
            Some(name) => name.parse()?,
            None => self.layer,
        };
        let definition = registry::resolve(layer);

        let indicator = match &change.indicator {
            Some(name) => {
                definition.index_of(name)?;
                name.clone()
            }
            None if layer != self.layer => definition.first_indicator().to_string(),
            None => self.indicator.clone(),
        };

        let scheme = match &change.scheme {
            Some(name) => name.parse()?,
            None => self.scheme,
        };

        Ok(SelectionState {
            layer,
            indicator,
            scheme,
            show_labels: change.show_labels.unwrap_or(self.show_labels),
            show_legend: change.show_legend.unwrap_or(self.show_legend),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct View {
    pub selection: SelectionState,
    pub title: String,
    pub map: MapLayer,
    pub classification: Classification,
    pub table: DataTable,
    pub stats: Stats,
    pub csv_file_name: String,
    pub coercion_warnings: Vec<CoercionWarning>,
}

/// One full render pass: classification, map layer, table and totals.
pub fn render(dataset: &Dataset, state: &SelectionState, map: &MapConfig) -> Result<View> {
    let definition = registry::resolve(state.layer);
    let indicator = definition.index_of(&state.indicator)?;
    let frame = ValueFrame::build(dataset, definition);
    let input = RenderInput {
        dataset,
        definition,
        frame: &frame,
        indicator,
    };

    let classification = classify(&frame.numeric(indicator), state.scheme);
    if classification.is_degenerate() {
        debug!(
            layer = %state.layer,
            indicator = %state.indicator,
            "flat indicator column, single-color fallback"
        );
    }

    let map_layer = map_layer::build(
        &input,
        &classification,
        map,
        state.show_labels,
        state.show_legend,
    );
    let table = table::build_table(&input);
    let stats = table::build_stats(&input);

    Ok(View {
        title: format!("{} - {}", state.layer, state.indicator),
        csv_file_name: table::csv_file_name(state.layer, &state.indicator),
        selection: state.clone(),
        map: map_layer,
        classification,
        table,
        stats,
        coercion_warnings: frame.warnings,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Config,
    DataUnavailable,
    Internal,
}

/// What the user sees when a render does not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderFailure {
    pub kind: FailureKind,
    pub message: String,
    pub detail: String,
}

impl From<DashboardError> for RenderFailure {
    fn from(err: DashboardError) -> Self {
        let kind = match &err {
            DashboardError::DataUnavailable { .. } => FailureKind::DataUnavailable,
            DashboardError::Config(_) => FailureKind::Config,
            DashboardError::Export(_) => FailureKind::Internal,
        };
        Self {
            kind,
            message: err.user_message().to_string(),
            detail: err.to_string(),
        }
    }
}

impl From<ConfigError> for RenderFailure {
    fn from(err: ConfigError) -> Self {
        DashboardError::from(err).into()
    }
}

/// One session's selection and the view last rendered from it.
pub struct ViewController {
    source: Arc<dyn DatasetSource>,
    map: MapConfig,
    state: SelectionState,
    view: Option<Arc<View>>,
}

impl ViewController {
    pub fn new(source: Arc<dyn DatasetSource>, map: MapConfig) -> Self {
        Self {
            source,
            map,
            state: SelectionState::default(),
            view: None,
        }
    }

    pub fn state(&self) -> &SelectionState {
        &self.state
    }

    pub fn view(&self) -> Option<&Arc<View>> {
        self.view.as_ref()
    }

    /// The last committed view, rendering one first if nothing has been committed yet.
    pub fn current(&mut self) -> Result<Arc<View>, RenderFailure> {
        match self.view.clone() {
            Some(view) => Ok(view),
            None => self.refresh(),
        }
    }

    /// Renders the current state again, e.g. for the first page load.
    pub fn refresh(&mut self) -> Result<Arc<View>, RenderFailure> {
        let state = self.state.clone();
        self.commit(state)
    }

    pub fn apply(&mut self, change: &SelectionChange) -> Result<Arc<View>, RenderFailure> {
        let candidate = self.state.apply(change).map_err(|e| {
            warn!(error = %e, "rejected selection change");
            RenderFailure::from(e)
        })?;
        self.commit(candidate)
    }

    pub fn set_layer(&mut self, layer: &str) -> Result<Arc<View>, RenderFailure> {
        self.apply(&SelectionChange {
            layer: Some(layer.to_string()),
            ..Default::default()
        })
    }

    pub fn set_indicator(&mut self, indicator: &str) -> Result<Arc<View>, RenderFailure> {
        self.apply(&SelectionChange {
            indicator: Some(indicator.to_string()),
            ..Default::default()
        })
    }

    pub fn set_scheme(&mut self, scheme: &str) -> Result<Arc<View>, RenderFailure> {
        self.apply(&SelectionChange {
            scheme: Some(scheme.to_string()),
            ..Default::default()
        })
    }

    pub fn set_show_labels(&mut self, show: bool) -> Result<Arc<View>, RenderFailure> {
        self.apply(&SelectionChange {
            show_labels: Some(show),
            ..Default::default()
        })
    }

    pub fn set_show_legend(&mut self, show: bool) -> Result<Arc<View>, RenderFailure> {
        self.apply(&SelectionChange {
            show_legend: Some(show),
            ..Default::default()
        })
    }

    /// Renders `candidate` and keeps it only if the whole pass succeeds.
    fn commit(&mut self, candidate: SelectionState) -> Result<Arc<View>, RenderFailure> {
        let source = Arc::clone(&self.source);
        let map = &self.map;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<View> {
            let dataset = source.load(candidate.layer)?;
            render(&dataset, &candidate, map)
        }));

        let view = match outcome {
            Ok(Ok(view)) => Arc::new(view),
            Ok(Err(err)) => {
                error!(error = %err, "render failed");
                return Err(err.into());
            }
            Err(payload) => {
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(%detail, "render panicked");
                return Err(RenderFailure {
                    kind: FailureKind::Internal,
                    message: "An error occurred while rendering the dashboard.".to_string(),
                    detail,
                });
            }
        };

        self.state = candidate;
        self.view = Some(Arc::clone(&view));
        Ok(view)
    }
}
