use crate::entities::{Coordinates, DriverLocationUpdate};
use crate::routing::haversine_meters;

use super::phase::RidePhase;

/// The geographic target the route currently leads to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Anchor {
    Pickup,
    Destination,
}

/// Resolve the route anchor for the current ride phase. The switch from
/// pickup to destination happens atomically with the trip-started
/// transition, never lazily on a later tick.
pub fn anchor_for(phase: &RidePhase) -> Option<Anchor> {
    match phase {
        RidePhase::Matched { .. } | RidePhase::Arrived { .. } => Some(Anchor::Pickup),
        RidePhase::TripStarted { .. } => Some(Anchor::Destination),
        _ => None,
    }
}

pub fn anchor_coordinates(phase: &RidePhase) -> Option<(Anchor, Coordinates)> {
    let anchor = anchor_for(phase)?;
    let request = phase.request()?;

    let coordinates = match anchor {
        Anchor::Pickup => request.pickup.coordinates,
        Anchor::Destination => request.destination.coordinates,
    };

    Some((anchor, coordinates))
}

/// Latest-value slot for the assigned driver's position. No buffering: each
/// update replaces the previous one wholesale.
#[derive(Default)]
pub struct LocationSlot {
    latest: Option<DriverLocationUpdate>,
}

impl LocationSlot {
    pub fn record(&mut self, update: DriverLocationUpdate) {
        self.latest = Some(update);
    }

    pub fn latest(&self) -> Option<&DriverLocationUpdate> {
        self.latest.as_ref()
    }

    pub fn clear(&mut self) {
        self.latest = None;
    }

    /// Whether the stored position is within `radius_meters` of `target`.
    pub fn within(&self, target: Coordinates, radius_meters: f64) -> bool {
        match &self.latest {
            Some(update) => {
                let position = Coordinates::new(update.latitude, update.longitude);
                haversine_meters(position, target) <= radius_meters
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Place, RideRequest};
    use chrono::Utc;

    fn phase_with_driver(started: bool) -> RidePhase {
        let request = RideRequest::new(
            Place::new("A".into(), Coordinates::new(33.57, -7.58)),
            Place::new("B".into(), Coordinates::new(33.59, -7.60)),
            "standard".into(),
            "option-1".into(),
            45.0,
            None,
        );

        let driver = crate::entities::DriverMatch {
            driver: crate::entities::DriverIdentity {
                id: "d-1".into(),
                name: "Hassan".into(),
                phone: "+212600000000".into(),
            },
            vehicle: crate::entities::Vehicle {
                make: "Dacia".into(),
                model: "Logan".into(),
                color: "white".into(),
                year: 2019,
                plate: "12345-A-6".into(),
            },
            pickup_address: "A".into(),
            dropoff_address: "B".into(),
            eta_minutes: 4,
        };

        if started {
            RidePhase::TripStarted { request, driver }
        } else {
            RidePhase::Matched { request, driver }
        }
    }

    #[test]
    fn matched_rides_anchor_on_pickup() {
        let (anchor, coordinates) = anchor_coordinates(&phase_with_driver(false)).unwrap();
        assert_eq!(anchor, Anchor::Pickup);
        assert_eq!(coordinates, Coordinates::new(33.57, -7.58));
    }

    #[test]
    fn started_trips_anchor_on_destination() {
        let (anchor, coordinates) = anchor_coordinates(&phase_with_driver(true)).unwrap();
        assert_eq!(anchor, Anchor::Destination);
        assert_eq!(coordinates, Coordinates::new(33.59, -7.60));
    }

    #[test]
    fn idle_has_no_anchor() {
        assert!(anchor_coordinates(&RidePhase::Idle).is_none());
    }

    #[test]
    fn slot_keeps_only_the_latest_update() {
        let mut slot = LocationSlot::default();

        slot.record(DriverLocationUpdate {
            latitude: 33.50,
            longitude: -7.50,
            timestamp: Utc::now(),
        });
        slot.record(DriverLocationUpdate {
            latitude: 33.58,
            longitude: -7.59,
            timestamp: Utc::now(),
        });

        assert_eq!(slot.latest().unwrap().latitude, 33.58);
    }

    #[test]
    fn proximity_check_uses_the_radius() {
        let mut slot = LocationSlot::default();
        let pickup = Coordinates::new(33.5731, -7.5898);

        slot.record(DriverLocationUpdate {
            latitude: 33.5731,
            longitude: -7.5899,
            timestamp: Utc::now(),
        });

        assert!(slot.within(pickup, 50.0));
        assert!(!slot.within(Coordinates::new(33.60, -7.62), 50.0));
    }
}
