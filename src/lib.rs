//! Indicator-driven choropleth pipeline for health-facility polygons.
//!
//! A [`source::DatasetSource`] supplies one layer's features, the
//! [`registry`] names its indicators, and [`view::ViewController`] turns a
//! selection into a classified map layer, a ranked table and per-indicator
//! totals that all read the same coerced values.

pub mod classify;
pub mod coerce;
pub mod config;
pub mod error;
pub mod map_layer;
pub mod palette;
pub mod registry;
pub mod server;
pub mod source;
pub mod table;
pub mod types;
pub mod view;
