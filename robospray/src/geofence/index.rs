use super::catalog::{GeofenceCatalog, GeofenceTarget};
use crate::{
    devices::hardware::gps::PositionSample,
    error::{Result, RoboSprayError},
    utils::geodesy::haversine_distance,
};
use kiddo::{ImmutableKdTree, SquaredEuclidean};

/// Number of planar neighbours pulled per query so that exact ties can be
/// resolved by catalog order instead of tree layout.
const TIE_CANDIDATES: usize = 4;

/// Result of a nearest target query.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestTarget<'a> {
    pub target: &'a GeofenceTarget,
    /// Position of the target in the catalog.
    pub catalog_index: usize,
    /// Squared planar distance in degrees, the index metric.
    pub planar_distance_sq: f64,
    /// Great circle distance in meters to the matched target.
    pub distance_m: f64,
}

/// Nearest neighbour index over the catalog `(longitude, latitude)` pairs.
///
/// Candidate selection runs in the planar degree space of the k-d tree,
/// then the geodesic distance is computed for the winning target only.
/// Near two targets with similar planar but different geodesic distance
/// the planar search can pick the farther one.
///
/// The catalog never changes after startup, so the tree is the immutable
/// kind: built balanced in one pass, and it copes with any number of
/// targets sharing a longitude or latitude (a row surveyed due north).
pub struct GeofenceIndex {
    /// `None` when there are no targets.
    tree: Option<ImmutableKdTree<f64, 2>>,
    targets: Vec<GeofenceTarget>,
}

impl GeofenceIndex {
    /// Build the index once over every target of the catalog. Building is
    /// deterministic, the same catalog always gives the same answers.
    ///
    /// * `catalog`: targets to index.
    pub fn build(catalog: &GeofenceCatalog) -> Self {
        Self::from_targets(catalog.targets().to_vec())
    }

    /// Build the index from a list of targets.
    ///
    /// * `targets`: targets in catalog order.
    pub fn from_targets(targets: Vec<GeofenceTarget>) -> Self {
        // Items are positions in this slice, i.e. catalog indices.
        let points: Vec<[f64; 2]> = targets
            .iter()
            .map(|target| [target.longitude, target.latitude])
            .collect();
        let tree = (!points.is_empty()).then(|| ImmutableKdTree::new_from_slice(&points));
        Self { tree, targets }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn targets(&self) -> &[GeofenceTarget] {
        &self.targets
    }

    /// Nearest target to a coordinate.
    ///
    /// * `longitude`, `latitude`: query point in degrees.
    pub fn nearest_to(&self, longitude: f64, latitude: f64) -> Result<NearestTarget<'_>> {
        let Some(tree) = &self.tree else {
            return Err(RoboSprayError::EmptyIndex);
        };

        let qty = TIE_CANDIDATES.min(self.targets.len());
        let best = tree
            .nearest_n::<SquaredEuclidean>(&[longitude, latitude], qty)
            .into_iter()
            .min_by(|a, b| {
                a.distance
                    .total_cmp(&b.distance)
                    .then_with(|| a.item.cmp(&b.item))
            })
            .ok_or(RoboSprayError::EmptyIndex)?;

        #[allow(clippy::cast_possible_truncation)]
        let catalog_index = best.item as usize;
        let target = &self.targets[catalog_index];
        Ok(NearestTarget {
            target,
            catalog_index,
            planar_distance_sq: best.distance,
            distance_m: haversine_distance(latitude, longitude, target.latitude, target.longitude),
        })
    }

    /// Nearest target to a position sample.
    ///
    /// * `sample`: latest position fix.
    pub fn nearest(&self, sample: &PositionSample) -> Result<NearestTarget<'_>> {
        self.nearest_to(sample.longitude(), sample.latitude())
    }
}

impl std::fmt::Debug for GeofenceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceIndex")
            .field("targets", &self.targets.len())
            .finish()
    }
}
