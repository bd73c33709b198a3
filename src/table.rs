use crate::error::{DashboardError, Result};
use crate::types::Layer;
use crate::view::RenderInput;
use csv::WriterBuilder;
use serde::Serialize;
use std::cmp::Reverse;

pub const RANK_HEADER: &str = "Rank";
const SHORT_LABEL_MAX: usize = 15;
const SHORT_LABEL_KEEP: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableRow {
    pub rank: usize,
    pub feature_index: usize,
    pub label: String,
    /// One count per indicator, registry order.
    pub values: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataTable {
    /// `Rank`, the label field, then every indicator display name.
    pub headers: Vec<String>,
    pub sorted_by: String,
    pub rows: Vec<TableRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndicatorTotal {
    pub display_name: String,
    pub short_label: String,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub totals: Vec<IndicatorTotal>,
}

impl Stats {
    pub fn total_for(&self, display_name: &str) -> Option<u64> {
        self.totals
            .iter()
            .find(|t| t.display_name == display_name)
            .map(|t| t.total)
    }
}

/// Rows sorted descending on the selected indicator; equal counts keep dataset order.
pub fn build_table(input: &RenderInput<'_>) -> DataTable {
    let definition = input.definition;
    let mut order: Vec<usize> = (0..input.dataset.len()).collect();
    order.sort_by_key(|&i| Reverse(input.frame.value(input.indicator, i)));

    let rows = order
        .into_iter()
        .enumerate()
        .map(|(position, feature_index)| TableRow {
            rank: position + 1,
            feature_index,
            label: input.dataset.features[feature_index].text(definition.label_field),
            values: (0..definition.indicators.len())
                .map(|ind| input.frame.value(ind, feature_index))
                .collect(),
        })
        .collect();

    let headers = [RANK_HEADER, definition.label_field]
        .into_iter()
        .chain(definition.display_names())
        .map(str::to_string)
        .collect();

    DataTable {
        headers,
        sorted_by: input.display_name().to_string(),
        rows,
    }
}

pub fn short_label(display_name: &str) -> String {
    if display_name.chars().count() <= SHORT_LABEL_MAX {
        display_name.to_string()
    } else {
        let head: String = display_name.chars().take(SHORT_LABEL_KEEP).collect();
        format!("{head}...")
    }
}

pub fn build_stats(input: &RenderInput<'_>) -> Stats {
    let totals = input
        .definition
        .display_names()
        .enumerate()
        .map(|(ind, display_name)| IndicatorTotal {
            display_name: display_name.to_string(),
            short_label: short_label(display_name),
            total: input.frame.total(ind),
        })
        .collect();
    Stats { totals }
}

impl DataTable {
    pub fn to_csv(&self) -> Result<String> {
        let mut wtr = WriterBuilder::new().from_writer(Vec::new());
        wtr.write_record(&self.headers)
            .map_err(|e| DashboardError::Export(e.to_string()))?;
        for row in &self.rows {
            let record = [row.rank.to_string(), row.label.clone()]
                .into_iter()
                .chain(row.values.iter().map(u64::to_string));
            wtr.write_record(record)
                .map_err(|e| DashboardError::Export(e.to_string()))?;
        }
        let bytes = wtr
            .into_inner()
            .map_err(|e| DashboardError::Export(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| DashboardError::Export(e.to_string()))
    }
}

/// e.g. `phc_data_severely_stunted.csv`
pub fn csv_file_name(layer: Layer, display_name: &str) -> String {
    format!(
        "{}_data_{}.csv",
        layer.as_str().to_lowercase(),
        display_name.to_lowercase().replace(' ', "_")
    )
}
