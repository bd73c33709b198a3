use crate::config::InputConfig;
use crate::error::{DashboardError, Result};
use crate::registry;
use crate::types::{Dataset, Feature, Layer};
use geo::{Geometry, MultiPolygon, Point};
use geojson::GeoJson;
use serde_json::Value;
use shapefile::dbase::FieldValue;
use shapefile::{Reader, Shape};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Supplies the features of a layer, in lon/lat.
pub trait DatasetSource: Send + Sync {
    fn load(&self, layer: Layer) -> Result<Arc<Dataset>>;
}

/// Reads each layer from the file named in `[input]`.
#[derive(Debug, Clone)]
pub struct FileSource {
    input: InputConfig,
}

impl FileSource {
    pub fn new(input: InputConfig) -> Self {
        Self { input }
    }
}

impl DatasetSource for FileSource {
    fn load(&self, layer: Layer) -> Result<Arc<Dataset>> {
        let path = self.input.path_for(layer);
        info!(%layer, path = ?path, "loading layer");

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|s| s.to_lowercase())
            .ok_or_else(|| {
                DashboardError::data_unavailable(layer, format!("{:?} has no extension", path))
            })?;

        let features = match extension.as_str() {
            "shp" => load_shapefile(layer, path)?,
            "json" | "geojson" => load_geojson(layer, path)?,
            other => {
                return Err(DashboardError::data_unavailable(
                    layer,
                    format!("unsupported geometry format: {other}"),
                ))
            }
        };

        if features.is_empty() {
            return Err(DashboardError::data_unavailable(
                layer,
                format!("{:?} contains no features", path),
            ));
        }

        let dataset = Dataset::new(layer, features);
        registry::resolve(layer).validate(&dataset)?;
        info!(%layer, features = dataset.len(), "layer loaded");
        Ok(Arc::new(dataset))
    }
}

fn field_to_json(value: FieldValue) -> Value {
    let number = |v: f64| {
        serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    };
    match value {
        FieldValue::Character(Some(s)) => Value::String(s),
        FieldValue::Numeric(Some(n)) => number(n),
        FieldValue::Float(Some(f)) => number(f as f64),
        FieldValue::Integer(i) => Value::from(i),
        FieldValue::Double(d) => number(d),
        FieldValue::Logical(Some(b)) => Value::Bool(b),
        FieldValue::Character(None)
        | FieldValue::Numeric(None)
        | FieldValue::Float(None)
        | FieldValue::Logical(None) => Value::Null,
        other => Value::String(format!("{:?}", other)),
    }
}

fn shape_to_geometry(layer: Layer, shape: Shape) -> Result<Option<Geometry<f64>>> {
    let polygon_err = |e: &dyn std::fmt::Debug| {
        DashboardError::data_unavailable(layer, format!("bad polygon: {:?}", e))
    };
    let geometry = match shape {
        Shape::NullShape => None,
        Shape::Point(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointM(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::PointZ(p) => Some(Geometry::Point(Point::new(p.x, p.y))),
        Shape::Polygon(polygon) => {
            let mp: MultiPolygon<f64> = polygon.try_into().map_err(|e| polygon_err(&e))?;
            Some(Geometry::MultiPolygon(mp))
        }
        Shape::PolygonM(polygon) => {
            let mp: MultiPolygon<f64> = polygon.try_into().map_err(|e| polygon_err(&e))?;
            Some(Geometry::MultiPolygon(mp))
        }
        Shape::PolygonZ(polygon) => {
            let mp: MultiPolygon<f64> = polygon.try_into().map_err(|e| polygon_err(&e))?;
            Some(Geometry::MultiPolygon(mp))
        }
        other => {
            debug!(%layer, shape = ?other.shapetype(), "ignoring non-polygon shape");
            None
        }
    };
    Ok(geometry)
}

fn load_shapefile(layer: Layer, path: &Path) -> Result<Vec<Feature>> {
    let mut reader =
        Reader::from_path(path).map_err(|e| DashboardError::data_unavailable(layer, e))?;

    let mut features = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.map_err(|e| DashboardError::data_unavailable(layer, e))?;
        let attributes = record
            .into_iter()
            .map(|(name, value)| (name, field_to_json(value)))
            .collect();
        features.push(Feature {
            geometry: shape_to_geometry(layer, shape)?,
            attributes,
        });
    }
    Ok(features)
}

fn load_geojson(layer: Layer, path: &Path) -> Result<Vec<Feature>> {
    let file = File::open(path).map_err(|e| {
        DashboardError::data_unavailable(layer, format!("failed to open {:?}: {}", path, e))
    })?;
    let geojson = GeoJson::from_reader(BufReader::new(file))
        .map_err(|e| DashboardError::data_unavailable(layer, e))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(DashboardError::data_unavailable(
                layer,
                "GeoJSON must be a FeatureCollection",
            ))
        }
    };

    collection
        .features
        .into_iter()
        .map(|feature| -> Result<Feature> {
            let geometry = feature
                .geometry
                .map(|g| Geometry::<f64>::try_from(g.value))
                .transpose()
                .map_err(|e| DashboardError::data_unavailable(layer, e))?;
            let attributes: HashMap<String, Value> =
                feature.properties.unwrap_or_default().into_iter().collect();
            Ok(Feature {
                geometry,
                attributes,
            })
        })
        .collect()
}

/// Memoizes each layer for the process lifetime. Failures are not cached.
pub struct CachedSource<S> {
    inner: S,
    cache: Mutex<HashMap<Layer, Arc<Dataset>>>,
}

impl<S: DatasetSource> CachedSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Layer, Arc<Dataset>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drops a cached layer so the next `load` reads the source again.
    pub fn invalidate(&self, layer: Layer) {
        if self.lock().remove(&layer).is_some() {
            debug!(%layer, "dataset cache invalidated");
        }
    }
}

impl<S: DatasetSource> DatasetSource for CachedSource<S> {
    /// The lock is not held across the inner load; if two callers race on a
    /// cold layer the first insert wins and both get that dataset.
    fn load(&self, layer: Layer) -> Result<Arc<Dataset>> {
        if let Some(dataset) = self.lock().get(&layer) {
            return Ok(Arc::clone(dataset));
        }
        let loaded = self.inner.load(layer)?;
        Ok(Arc::clone(self.lock().entry(layer).or_insert(loaded)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// In-memory source for tests that counts how often each load happens.
    pub(crate) struct StaticSource {
        pub datasets: HashMap<Layer, Dataset>,
        pub loads: AtomicUsize,
    }

    impl StaticSource {
        pub fn new(datasets: impl IntoIterator<Item = Dataset>) -> Self {
            Self {
                datasets: datasets.into_iter().map(|d| (d.layer, d)).collect(),
                loads: AtomicUsize::new(0),
            }
        }
    }

    impl DatasetSource for StaticSource {
        fn load(&self, layer: Layer) -> Result<Arc<Dataset>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.datasets
                .get(&layer)
                .cloned()
                .map(Arc::new)
                .ok_or_else(|| DashboardError::data_unavailable(layer, "no such file"))
        }
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("facility-choropleth-{}-{}", std::process::id(), name))
    }

    const RBSK_GEOJSON: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[74.0, 21.0], [74.2, 21.0], [74.2, 21.2], [74.0, 21.2], [74.0, 21.0]]]
                },
                "properties": {"RBSK Team": "Navapur A", "SAM": 4, "MAM": "7", "Moderately": null, "Severely U": "N/A"}
            },
            {
                "type": "Feature",
                "geometry": null,
                "properties": {"RBSK Team": "Navapur B", "SAM": 1, "MAM": 0, "Moderately": 2, "Severely U": 3}
            }
        ]
    }"#;

    fn rbsk_input(rbsk: PathBuf) -> InputConfig {
        InputConfig {
            phc: temp_path("phc-missing.shp"),
            rbsk,
        }
    }

    #[test]
    fn geojson_layer_loads_features_in_order() {
        let path = temp_path("rbsk.geojson");
        std::fs::write(&path, RBSK_GEOJSON).unwrap();

        let dataset = FileSource::new(rbsk_input(path.clone()))
            .load(Layer::Rbsk)
            .unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.features[0].text("RBSK Team"), "Navapur A");
        assert!(matches!(
            dataset.features[0].geometry,
            Some(Geometry::Polygon(_))
        ));
        assert!(dataset.features[1].geometry.is_none());
        assert_eq!(dataset.features[0].attribute("MAM"), Some(&Value::from("7")));
    }

    #[test]
    fn missing_file_is_data_unavailable() {
        let err = FileSource::new(rbsk_input(temp_path("nope.shp")))
            .load(Layer::Phc)
            .unwrap_err();
        assert!(matches!(
            err,
            DashboardError::DataUnavailable {
                layer: Layer::Phc,
                ..
            }
        ));
    }

    #[test]
    fn unsupported_extension_is_data_unavailable() {
        let err = FileSource::new(rbsk_input(temp_path("rbsk.kml")))
            .load(Layer::Rbsk)
            .unwrap_err();
        assert!(err.to_string().contains("unsupported geometry format: kml"));
    }

    #[test]
    fn layer_without_its_indicator_columns_is_rejected() {
        let path = temp_path("rbsk-columns.geojson");
        std::fs::write(&path, RBSK_GEOJSON.replace("\"MAM\"", "\"MAM_Count\"")).unwrap();
        let err = FileSource::new(rbsk_input(path.clone()))
            .load(Layer::Rbsk)
            .unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(matches!(err, DashboardError::Config(_)), "{err}");
    }

    #[test]
    fn dbf_fields_reach_coercion_as_json() {
        use crate::coerce::coerce_count;

        let four = field_to_json(FieldValue::Numeric(Some(4.0)));
        assert_eq!(coerce_count(Some(&four)).value, 4);
        assert!(!coerce_count(Some(&four)).lossy);

        let blank = field_to_json(FieldValue::Numeric(None));
        assert_eq!(blank, Value::Null);
        let blank = coerce_count(Some(&blank));
        assert_eq!((blank.value, blank.lossy), (0, true));

        assert_eq!(
            field_to_json(FieldValue::Character(Some("Navapur PHC".to_string()))),
            Value::from("Navapur PHC")
        );
        assert_eq!(field_to_json(FieldValue::Character(None)), Value::Null);
        assert_eq!(field_to_json(FieldValue::Integer(7)), Value::from(7));
        assert_eq!(field_to_json(FieldValue::Double(2.5)), Value::from(2.5));
        assert_eq!(field_to_json(FieldValue::Logical(Some(true))), Value::Bool(true));
        assert_eq!(field_to_json(FieldValue::Numeric(Some(f64::NAN))), Value::Null);
    }

    #[test]
    fn null_and_line_shapes_have_no_geometry() {
        assert!(shape_to_geometry(Layer::Phc, Shape::NullShape)
            .unwrap()
            .is_none());

        let line = shapefile::Polyline::new(vec![
            shapefile::Point::new(0.0, 0.0),
            shapefile::Point::new(1.0, 1.0),
        ]);
        assert!(shape_to_geometry(Layer::Phc, Shape::Polyline(line))
            .unwrap()
            .is_none());
    }

    #[test]
    fn point_and_polygon_shapes_convert() {
        let point = shape_to_geometry(Layer::Rbsk, Shape::Point(shapefile::Point::new(74.1, 21.1)))
            .unwrap();
        assert_eq!(point, Some(Geometry::Point(Point::new(74.1, 21.1))));

        let ring = shapefile::PolygonRing::Outer(vec![
            shapefile::Point::new(0.0, 0.0),
            shapefile::Point::new(0.0, 2.0),
            shapefile::Point::new(2.0, 2.0),
            shapefile::Point::new(2.0, 0.0),
            shapefile::Point::new(0.0, 0.0),
        ]);
        let polygon = shape_to_geometry(Layer::Phc, Shape::Polygon(shapefile::Polygon::new(ring)))
            .unwrap();
        match polygon {
            Some(Geometry::MultiPolygon(mp)) => {
                assert_eq!(mp.0.len(), 1);
                assert_eq!(mp.0[0].exterior().0.len(), 5);
            }
            other => panic!("expected a multipolygon, got {other:?}"),
        }
    }

    #[test]
    fn cache_loads_each_layer_once_until_invalidated() {
        let cached = CachedSource::new(StaticSource::new([Dataset::new(Layer::Rbsk, vec![])]));

        let a = cached.load(Layer::Rbsk).unwrap();
        let b = cached.load(Layer::Rbsk).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cached.inner.loads.load(Ordering::SeqCst), 1);

        cached.invalidate(Layer::Rbsk);
        cached.load(Layer::Rbsk).unwrap();
        assert_eq!(cached.inner.loads.load(Ordering::SeqCst), 2);
    }

    /// Blocks PHC loads until released; RBSK loads return at once.
    struct GatedSource {
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl DatasetSource for GatedSource {
        fn load(&self, layer: Layer) -> Result<Arc<Dataset>> {
            if layer == Layer::Phc {
                self.entered.lock().unwrap().send(()).ok();
                self.release.lock().unwrap().recv().ok();
            }
            Ok(Arc::new(Dataset::new(layer, vec![])))
        }
    }

    #[test]
    fn slow_cold_load_does_not_block_cached_layers() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let cached = Arc::new(CachedSource::new(GatedSource {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }));
        cached.load(Layer::Rbsk).unwrap();

        let slow = {
            let cached = Arc::clone(&cached);
            thread::spawn(move || cached.load(Layer::Phc).map(|d| d.layer))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let fast = {
            let cached = Arc::clone(&cached);
            thread::spawn(move || {
                done_tx.send(cached.load(Layer::Rbsk).is_ok()).ok();
            })
        };
        let hit = done_rx.recv_timeout(Duration::from_secs(5));
        release_tx.send(()).unwrap();

        assert_eq!(hit, Ok(true));
        assert_eq!(slow.join().unwrap().unwrap(), Layer::Phc);
        fast.join().unwrap();
    }

    #[test]
    fn cache_does_not_remember_failures() {
        let cached = CachedSource::new(StaticSource::new([]));
        assert!(cached.load(Layer::Phc).is_err());
        assert!(cached.load(Layer::Phc).is_err());
        assert_eq!(cached.inner.loads.load(Ordering::SeqCst), 2);
    }
}
