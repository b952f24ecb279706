use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::entities::{DriverMatch, RideRequest};
use crate::error::{invalid_state_error, Error};

/// The authoritative ride lifecycle state.
///
/// `Idle` is initial; `TripCompleted`, `Cancelled` and `Failed` are terminal
/// and require an explicit reset to return to `Idle`. `NoDriverFound` is a
/// resting state: the user may keep searching or reset.
#[derive(Clone, Debug, PartialEq)]
pub enum RidePhase {
    Idle,
    Searching {
        request: RideRequest,
        deadline: DateTime<Utc>,
    },
    Matched {
        request: RideRequest,
        driver: DriverMatch,
    },
    Arrived {
        request: RideRequest,
        driver: DriverMatch,
    },
    TripStarted {
        request: RideRequest,
        driver: DriverMatch,
    },
    TripCompleted {
        request_id: Uuid,
    },
    NoDriverFound {
        request: RideRequest,
    },
    Cancelled {
        reason: String,
    },
    Failed {
        message: String,
    },
}

impl RidePhase {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Searching { .. } => "searching",
            Self::Matched { .. } => "matched",
            Self::Arrived { .. } => "arrived",
            Self::TripStarted { .. } => "trip_started",
            Self::TripCompleted { .. } => "trip_completed",
            Self::NoDriverFound { .. } => "no_driver_found",
            Self::Cancelled { .. } => "cancelled",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_searching(&self) -> bool {
        matches!(self, Self::Searching { .. })
    }

    /// A ride is in flight: searching, matched, arrived or started.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Searching { .. } | Self::Matched { .. } | Self::Arrived { .. } | Self::TripStarted { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::TripCompleted { .. } | Self::Cancelled { .. } | Self::Failed { .. }
        )
    }

    /// The ride has an assigned driver whose location stream is live.
    pub fn has_driver(&self) -> bool {
        matches!(
            self,
            Self::Matched { .. } | Self::Arrived { .. } | Self::TripStarted { .. }
        )
    }

    pub fn request(&self) -> Option<&RideRequest> {
        match self {
            Self::Searching { request, .. }
            | Self::Matched { request, .. }
            | Self::Arrived { request, .. }
            | Self::TripStarted { request, .. }
            | Self::NoDriverFound { request } => Some(request),
            _ => None,
        }
    }

    pub fn driver(&self) -> Option<&DriverMatch> {
        match self {
            Self::Matched { driver, .. }
            | Self::Arrived { driver, .. }
            | Self::TripStarted { driver, .. } => Some(driver),
            _ => None,
        }
    }

    #[tracing::instrument(skip(self, request), fields(state = self.name()))]
    pub fn submit(&mut self, request: RideRequest, deadline: DateTime<Utc>) -> Result<(), Error> {
        match self {
            Self::Idle => {
                *self = Self::Searching { request, deadline };
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument(skip(self, driver), fields(state = self.name()))]
    pub fn driver_matched(&mut self, driver: DriverMatch) -> Result<(), Error> {
        match self {
            Self::Searching { request, .. } => {
                *self = Self::Matched {
                    request: request.clone(),
                    driver,
                };
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    /// Terminal outcome of a search window, from the timeout supervisor or
    /// an explicit server signal. A no-op error once the state has left
    /// `searching`: the first writer wins the race.
    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn no_driver_found(&mut self) -> Result<(), Error> {
        match self {
            Self::Searching { request, .. } => {
                *self = Self::NoDriverFound {
                    request: request.clone(),
                };
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    /// Restart the search with the original request unchanged.
    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn keep_searching(&mut self, deadline: DateTime<Utc>) -> Result<RideRequest, Error> {
        match self {
            Self::NoDriverFound { request } => {
                let request = request.clone();
                *self = Self::Searching {
                    request: request.clone(),
                    deadline,
                };
                Ok(request)
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn driver_arrived(&mut self) -> Result<(), Error> {
        match self {
            Self::Matched { request, driver } => {
                *self = Self::Arrived {
                    request: request.clone(),
                    driver: driver.clone(),
                };
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    /// The trip begins. Legal from `matched` as well as `arrived`, since the
    /// server may skip the arrival signal.
    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn trip_started(&mut self) -> Result<(), Error> {
        match self {
            Self::Matched { request, driver } | Self::Arrived { request, driver } => {
                *self = Self::TripStarted {
                    request: request.clone(),
                    driver: driver.clone(),
                };
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn trip_completed(&mut self) -> Result<(), Error> {
        match self {
            Self::TripStarted { request, .. } => {
                *self = Self::TripCompleted {
                    request_id: request.id,
                };
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }

    /// Cancel is always legal from any non-terminal state and wins over any
    /// pending transition. Returns `Ok(false)` when already cancelled, so a
    /// repeated cancel is a no-op rather than an error.
    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn cancel(&mut self, reason: String) -> Result<bool, Error> {
        match self {
            Self::Cancelled { .. } => Ok(false),
            Self::TripCompleted { .. } | Self::Failed { .. } => Err(invalid_state_error()),
            _ => {
                *self = Self::Cancelled { reason };
                Ok(true)
            }
        }
    }

    /// Escalate to the terminal failure state.
    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn fail(&mut self, message: String) -> Result<(), Error> {
        match self {
            Self::TripCompleted { .. } | Self::Cancelled { .. } | Self::Failed { .. } => {
                Err(invalid_state_error())
            }
            _ => {
                *self = Self::Failed { message };
                Ok(())
            }
        }
    }

    /// Explicit return to `idle` from a resting or terminal state.
    #[tracing::instrument(skip(self), fields(state = self.name()))]
    pub fn reset(&mut self) -> Result<(), Error> {
        match self {
            Self::TripCompleted { .. }
            | Self::Cancelled { .. }
            | Self::Failed { .. }
            | Self::NoDriverFound { .. } => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(invalid_state_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Coordinates, DriverIdentity, Place, Vehicle};

    fn request() -> RideRequest {
        RideRequest::new(
            Place::new("A".into(), Coordinates::new(33.57, -7.58)),
            Place::new("B".into(), Coordinates::new(33.59, -7.60)),
            "standard".into(),
            "option-1".into(),
            45.0,
            None,
        )
    }

    fn driver() -> DriverMatch {
        DriverMatch {
            driver: DriverIdentity {
                id: "d-1".into(),
                name: "Hassan".into(),
                phone: "+212600000000".into(),
            },
            vehicle: Vehicle {
                make: "Dacia".into(),
                model: "Logan".into(),
                color: "white".into(),
                year: 2019,
                plate: "12345-A-6".into(),
            },
            pickup_address: "A".into(),
            dropoff_address: "B".into(),
            eta_minutes: 4,
        }
    }

    fn searching() -> RidePhase {
        let mut phase = RidePhase::Idle;
        phase.submit(request(), Utc::now()).unwrap();
        phase
    }

    #[test]
    fn submit_requires_idle() {
        let mut phase = searching();
        assert!(phase.submit(request(), Utc::now()).is_err());
        assert!(phase.is_searching());
    }

    #[test]
    fn match_then_timeout_is_a_no_op() {
        let mut phase = searching();
        phase.driver_matched(driver()).unwrap();

        assert!(phase.no_driver_found().is_err());
        assert_eq!(phase.name(), "matched");
    }

    #[test]
    fn timeout_then_match_is_a_no_op() {
        let mut phase = searching();
        phase.no_driver_found().unwrap();

        assert!(phase.driver_matched(driver()).is_err());
        assert_eq!(phase.name(), "no_driver_found");
    }

    #[test]
    fn keep_searching_preserves_the_original_request() {
        let mut phase = searching();
        let original = phase.request().unwrap().clone();

        phase.no_driver_found().unwrap();
        let resubmitted = phase.keep_searching(Utc::now()).unwrap();

        assert_eq!(resubmitted, original);
        assert!(phase.is_searching());
    }

    #[test]
    fn trip_can_start_without_arrival() {
        let mut phase = searching();
        phase.driver_matched(driver()).unwrap();

        assert!(phase.trip_started().is_ok());
        assert_eq!(phase.name(), "trip_started");
    }

    #[test]
    fn full_happy_path() {
        let mut phase = searching();
        phase.driver_matched(driver()).unwrap();
        phase.driver_arrived().unwrap();
        phase.trip_started().unwrap();
        phase.trip_completed().unwrap();

        assert!(phase.is_terminal());
        assert!(phase.reset().is_ok());
        assert_eq!(phase, RidePhase::Idle);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut phase = searching();

        assert_eq!(phase.cancel("changed my mind".into()).unwrap(), true);
        assert_eq!(phase.cancel("changed my mind".into()).unwrap(), false);
        assert_eq!(phase.name(), "cancelled");
    }

    #[test]
    fn cancel_after_completion_is_rejected() {
        let mut phase = searching();
        phase.driver_matched(driver()).unwrap();
        phase.trip_started().unwrap();
        phase.trip_completed().unwrap();

        assert!(phase.cancel("too late".into()).is_err());
        assert_eq!(phase.name(), "trip_completed");
    }

    #[test]
    fn terminal_states_require_reset() {
        let mut phase = searching();
        phase.cancel("user".into()).unwrap();

        assert!(phase.submit(request(), Utc::now()).is_err());
        phase.reset().unwrap();
        assert!(phase.submit(request(), Utc::now()).is_ok());
    }
}
