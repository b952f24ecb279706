use geo_types::{Coord, Point, Rect};

use crate::api::DynDirectionsApi;
use crate::entities::Coordinates;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates.
pub fn haversine_meters(a: Coordinates, b: Coordinates) -> f64 {
    let from: Point<f64> = a.into();
    let to: Point<f64> = b.into();

    let lat_a = from.y().to_radians();
    let lat_b = to.y().to_radians();
    let d_lat = (to.y() - from.y()).to_radians();
    let d_lon = (to.x() - from.x()).to_radians();

    let h = (d_lat / 2.0).sin().powi(2) + lat_a.cos() * lat_b.cos() * (d_lon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

/// Fractional padding applied around a fitted region, per side. Asymmetric:
/// the side occluded by the bottom sheet gets the largest share.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPadding {
    pub top: f64,
    pub bottom: f64,
    pub left: f64,
    pub right: f64,
}

impl Default for CameraPadding {
    fn default() -> Self {
        // bottom-heavy: the sheet covers the lower part of the map
        Self {
            top: 0.10,
            bottom: 0.35,
            left: 0.10,
            right: 0.10,
        }
    }
}

/// The bounding region the camera should frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraRegion {
    rect: Rect<f64>,
}

impl CameraRegion {
    /// Fit a region around `points`, expanded by `padding` on each side.
    /// Degenerate inputs (single point, identical points) still produce a
    /// non-empty region.
    pub fn fit(points: &[Coordinates], padding: &CameraPadding) -> Self {
        let mut west = f64::INFINITY;
        let mut east = f64::NEG_INFINITY;
        let mut south = f64::INFINITY;
        let mut north = f64::NEG_INFINITY;

        for point in points {
            west = west.min(point.longitude);
            east = east.max(point.longitude);
            south = south.min(point.latitude);
            north = north.max(point.latitude);
        }

        if !west.is_finite() {
            west = 0.0;
            east = 0.0;
            south = 0.0;
            north = 0.0;
        }

        // minimum span so a single point still frames something
        let width = (east - west).max(0.001);
        let height = (north - south).max(0.001);

        let rect = Rect::new(
            Coord {
                x: west - width * padding.left,
                y: south - height * padding.bottom,
            },
            Coord {
                x: east + width * padding.right,
                y: north + height * padding.top,
            },
        );

        Self { rect }
    }

    pub fn west(&self) -> f64 {
        self.rect.min().x
    }

    pub fn east(&self) -> f64 {
        self.rect.max().x
    }

    pub fn south(&self) -> f64 {
        self.rect.min().y
    }

    pub fn north(&self) -> f64 {
        self.rect.max().y
    }

    pub fn center(&self) -> Coordinates {
        let center = self.rect.center();
        Coordinates::new(center.y, center.x)
    }
}

/// A path to draw plus the region to frame it with.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutePlan {
    pub polyline: Vec<Coordinates>,
    pub region: CameraRegion,
}

/// Recomputes the drawable route on every driver location tick. Holds no
/// state across calls other than the last computed plan, which is replaced
/// wholesale on each invocation so stale paths are retired before new ones
/// are drawn.
pub struct RoutePlanner {
    directions: DynDirectionsApi,
    padding: CameraPadding,
    last_plan: Option<RoutePlan>,
}

impl RoutePlanner {
    pub fn new(directions: DynDirectionsApi, padding: CameraPadding) -> Self {
        Self {
            directions,
            padding,
            last_plan: None,
        }
    }

    /// Plan a route from `origin` to `destination`. A directions failure
    /// falls back to a straight two-point path; it is logged and never
    /// surfaces to the caller.
    #[tracing::instrument(skip(self))]
    pub async fn plan(&mut self, origin: Coordinates, destination: Coordinates) -> RoutePlan {
        let polyline = match self.directions.find_path(origin, destination).await {
            Ok(path) if path.len() >= 2 => path,
            Ok(_) => {
                tracing::warn!("directions returned a degenerate path, using straight line");
                vec![origin, destination]
            }
            Err(err) => {
                tracing::warn!(%err, "route computation failed, using straight line");
                vec![origin, destination]
            }
        };

        let region = CameraRegion::fit(&polyline, &self.padding);
        let plan = RoutePlan { polyline, region };

        self.last_plan = Some(plan.clone());

        plan
    }

    pub fn last_plan(&self) -> Option<&RoutePlan> {
        self.last_plan.as_ref()
    }

    pub fn clear(&mut self) {
        self.last_plan = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DirectionsApi;
    use crate::error::{upstream_error, Error};
    use async_trait::async_trait;
    use std::sync::Arc;

    struct FixedDirections(Vec<Coordinates>);

    #[async_trait]
    impl DirectionsApi for FixedDirections {
        async fn find_path(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
        ) -> Result<Vec<Coordinates>, Error> {
            Ok(self.0.clone())
        }
    }

    struct FailingDirections;

    #[async_trait]
    impl DirectionsApi for FailingDirections {
        async fn find_path(
            &self,
            _origin: Coordinates,
            _destination: Coordinates,
        ) -> Result<Vec<Coordinates>, Error> {
            Err(upstream_error())
        }
    }

    fn coord(latitude: f64, longitude: f64) -> Coordinates {
        Coordinates::new(latitude, longitude)
    }

    #[test]
    fn haversine_is_zero_for_identical_points() {
        let a = coord(33.57, -7.58);
        assert!(haversine_meters(a, a) < f64::EPSILON);
    }

    #[test]
    fn haversine_matches_known_distance() {
        // Casablanca city centre to Ain Diab, roughly 2.9 km
        let a = coord(33.5731, -7.5898);
        let b = coord(33.5950, -7.6080);
        let d = haversine_meters(a, b);
        assert!(d > 2_500.0 && d < 3_500.0, "got {}", d);
    }

    #[test]
    fn region_padding_is_asymmetric() {
        let points = [coord(33.57, -7.58), coord(33.59, -7.60)];
        let padding = CameraPadding::default();
        let region = CameraRegion::fit(&points, &padding);

        let below = 33.57 - region.south();
        let above = region.north() - 33.59;
        assert!(below > above, "bottom padding should exceed top");
    }

    #[test]
    fn region_fits_a_single_point() {
        let region = CameraRegion::fit(&[coord(33.57, -7.58)], &CameraPadding::default());
        assert!(region.north() > region.south());
        assert!(region.east() > region.west());
    }

    #[tokio::test]
    async fn failed_directions_fall_back_to_straight_line() {
        let mut planner = RoutePlanner::new(Arc::new(FailingDirections), CameraPadding::default());
        let origin = coord(33.57, -7.58);
        let destination = coord(33.59, -7.60);

        let plan = planner.plan(origin, destination).await;

        assert_eq!(plan.polyline, vec![origin, destination]);
    }

    #[tokio::test]
    async fn plan_replaces_previous_polyline() {
        let path = vec![coord(33.57, -7.58), coord(33.58, -7.59), coord(33.59, -7.60)];
        let mut planner =
            RoutePlanner::new(Arc::new(FixedDirections(path.clone())), CameraPadding::default());

        planner.plan(coord(33.0, -7.0), coord(34.0, -8.0)).await;
        let second = planner.plan(coord(33.57, -7.58), coord(33.59, -7.60)).await;

        assert_eq!(planner.last_plan(), Some(&second));
        assert_eq!(second.polyline.len(), path.len());
    }
}
