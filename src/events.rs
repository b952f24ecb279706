use uuid::Uuid;

use crate::entities::{DriverLocationUpdate, DriverMatch};
use crate::routing::RoutePlan;

/// Discrete notifications emitted by the coordinator. Any number of
/// listeners may subscribe; the screen-flow controller is driven by the same
/// stream internally.
#[derive(Clone, Debug)]
pub enum RideEvent {
    SearchStarted { request_id: Uuid },
    DriverMatched { driver: DriverMatch },
    NoDriverFound,
    DriverArrived,
    TripStarted,
    TripCompleted { request_id: Uuid },
    Cancelled { reason: String },
    Failed { message: String },
    SubmitRejected { message: String },
    DriverLocation { update: DriverLocationUpdate },
    RouteUpdated { plan: RoutePlan },
    ConnectionLost,
    ConnectionRestored,
}
