use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::{ffi::OsStr, fs::File, io::BufReader, path::Path};

/// A labelled point the live position is compared against.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct GeofenceTarget {
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    /// Free text label (crop, condition) attached to the point.
    pub label: String,
}

impl GeofenceTarget {
    pub fn new(name: impl Into<String>, longitude: f64, latitude: f64, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            longitude,
            latitude,
            label: label.into(),
        }
    }
}

/// Subset of a GeoJSON feature collection. Only point features are read,
/// coordinates are `[longitude, latitude]`.
#[derive(Deserialize, Debug)]
struct FeatureCollection {
    features: Vec<Feature>,
}

#[derive(Deserialize, Debug)]
struct Feature {
    geometry: Geometry,
    #[serde(default)]
    properties: Properties,
}

#[derive(Deserialize, Debug)]
struct Geometry {
    coordinates: Vec<f64>,
}

#[derive(Deserialize, Debug, Default)]
struct Properties {
    #[serde(default, alias = "Name")]
    name: String,
    #[serde(default, alias = "condition", alias = "Condition")]
    label: String,
}

/// The static set of geofence targets loaded once at startup. The order of
/// the targets is the order of the features in the file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeofenceCatalog {
    targets: Vec<GeofenceTarget>,
}

impl GeofenceCatalog {
    pub fn new(targets: Vec<GeofenceTarget>) -> Self {
        Self { targets }
    }

    /// Parse a catalog from GeoJSON text. Features without at least a
    /// longitude and latitude are skipped.
    ///
    /// * `raw`: GeoJSON feature collection.
    pub fn from_geojson_str(raw: &str) -> Result<Self> {
        let collection: FeatureCollection = serde_json::from_str(raw)?;
        Ok(Self::from_collection(collection))
    }

    /// Read a catalog from a GeoJSON file.
    ///
    /// * `filepath`: path to the feature collection.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Result<Self> {
        let file = File::open(Path::new(&filepath))?;
        let collection: FeatureCollection = serde_json::from_reader(BufReader::new(file))?;
        Ok(Self::from_collection(collection))
    }

    fn from_collection(collection: FeatureCollection) -> Self {
        let targets = collection
            .features
            .into_iter()
            .enumerate()
            .filter_map(|(idx, feature)| match feature.geometry.coordinates[..] {
                [longitude, latitude, ..] => {
                    let name = if feature.properties.name.is_empty() {
                        format!("feature_{idx}")
                    } else {
                        feature.properties.name
                    };
                    Some(GeofenceTarget::new(name, longitude, latitude, feature.properties.label))
                }
                _ => {
                    tracing::warn!("Skipping feature {idx}, it has no point coordinates");
                    None
                }
            })
            .collect();
        Self { targets }
    }

    pub fn targets(&self) -> &[GeofenceTarget] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets in label order, the replay order of the simulated receiver.
    /// The sort is stable so equal labels keep file order.
    pub fn sorted_by_label(&self) -> Vec<GeofenceTarget> {
        let mut targets = self.targets.clone();
        targets.sort_by(|a, b| a.label.cmp(&b.label));
        targets
    }
}
