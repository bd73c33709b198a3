use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use facility_choropleth::source::{CachedSource, DatasetSource, FileSource};
use facility_choropleth::view::{SelectionChange, ViewController};
use facility_choropleth::{config, registry, server, types};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render one selection to view.json, layer.geojson and the table CSV
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, default_value = "PHC")]
        layer: String,
        /// Indicator display name; defaults to the layer's first indicator
        #[arg(long)]
        indicator: Option<String>,
        #[arg(long, default_value = "YlOrRd")]
        scheme: String,
        /// Place a text marker at each feature's centroid
        #[arg(long)]
        labels: bool,
        #[arg(long)]
        no_legend: bool,
        #[arg(short, long, value_name = "DIR", default_value = "output")]
        out: PathBuf,
    },
    /// Serve the interactive dashboard API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// List the indicators available for each layer
    Indicators {
        #[arg(long)]
        layer: Option<String>,
    },
}

fn file_source(config: &config::AppConfig) -> Arc<dyn DatasetSource> {
    Arc::new(CachedSource::new(FileSource::new(config.input.clone())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render {
            config,
            layer,
            indicator,
            scheme,
            labels,
            no_legend,
            out,
        } => {
            info!(config = ?config, "rendering");
            let app_config = config::AppConfig::load_from_file(&config)?;
            let mut controller =
                ViewController::new(file_source(&app_config), app_config.map.clone());

            let view = controller
                .apply(&SelectionChange {
                    layer: Some(layer),
                    indicator,
                    scheme: Some(scheme),
                    show_labels: Some(labels),
                    show_legend: Some(!no_legend),
                })
                .map_err(|f| anyhow!("{} ({})", f.message, f.detail))?;

            fs::create_dir_all(&out)
                .with_context(|| format!("Failed to create output directory: {:?}", out))?;

            let view_path = out.join("view.json");
            fs::write(&view_path, serde_json::to_vec_pretty(&*view)?)
                .with_context(|| format!("Failed to write {:?}", view_path))?;

            let geojson_path = out.join("layer.geojson");
            fs::write(&geojson_path, view.map.to_feature_collection().to_string())
                .with_context(|| format!("Failed to write {:?}", geojson_path))?;

            let csv_path = out.join(&view.csv_file_name);
            fs::write(&csv_path, view.table.to_csv()?)
                .with_context(|| format!("Failed to write {:?}", csv_path))?;

            info!(
                title = %view.title,
                features = view.map.features.len(),
                coerced = view.coercion_warnings.len(),
                "render complete"
            );
        }
        Commands::Serve { config } => {
            info!(config = ?config, "serving");
            let app_config = config::AppConfig::load_from_file(&config)?;
            let source = file_source(&app_config);
            server::start_server(app_config, source).await?;
        }
        Commands::Indicators { layer } => {
            let layers = match layer {
                Some(name) => vec![registry::resolve_named(&name)?],
                None => types::Layer::ALL.iter().map(|&l| registry::resolve(l)).collect(),
            };
            for def in layers {
                println!("{} (label: {})", def.layer, def.label_field);
                for (display, column) in def.indicators {
                    println!("  {display:<24} {column}");
                }
            }
        }
    }

    Ok(())
}
