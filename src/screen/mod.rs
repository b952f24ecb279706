//! The bottom-sheet screen-flow controller.
//!
//! A second state machine layered over the ride lifecycle: exactly one
//! screen is current at any instant, every transition is enumerated in one
//! table, and entering a screen fully replaces the previous one. Lifecycle
//! transitions drive the default screen; user navigation commands are only
//! legal from specific source states.

use crate::entities::{AppliedCoupon, Place, RideOption};
use crate::error::{invalid_invocation_error, Error};
use crate::events::RideEvent;

use crate::coordinator::phase::RidePhase;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SheetScreen {
    Initial,
    JourneyEntry,
    ChooseOnMap,
    RideSummary,
    RideOptions,
    Payment,
    OrderSummary,
    FindingRide,
    DriverEnRoute,
    RideInProgress,
    ReservationConfirmation,
    Reservation,
    NowRide,
    DeliveryService,
}

/// How the journey is scheduled; decides the branch taken after the price
/// is calculated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceKind {
    #[default]
    Now,
    Scheduled,
    Delivery,
}

/// User navigation commands accepted by the sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavEvent {
    StartSearch,
    StartDelivery,
    ChooseOnMap,
    ConfirmMapPick,
    BothLocationsResolved,
    PriceCalculated,
    ConfirmTrip,
    MethodChosen,
    Continue,
    RetrySearch,
    Dismiss,
}

/// Presentation geometry for one screen, as fractions of the container
/// height. Non-draggable screens snap to their default height.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SheetLayout {
    pub default_height: f64,
    pub min_height: f64,
    pub max_height: f64,
    pub draggable: bool,
}

impl SheetLayout {
    fn fixed(height: f64) -> Self {
        Self {
            default_height: height,
            min_height: height,
            max_height: height,
            draggable: false,
        }
    }

    fn draggable(default_height: f64, min_height: f64, max_height: f64) -> Self {
        Self {
            default_height,
            min_height,
            max_height,
            draggable: true,
        }
    }
}

impl SheetScreen {
    pub fn layout(self) -> SheetLayout {
        match self {
            Self::Initial => SheetLayout::draggable(0.25, 0.12, 0.55),
            Self::JourneyEntry => SheetLayout::draggable(0.45, 0.30, 0.90),
            Self::ChooseOnMap => SheetLayout::fixed(0.18),
            Self::RideSummary => SheetLayout::fixed(0.40),
            Self::RideOptions => SheetLayout::draggable(0.45, 0.35, 0.80),
            Self::Payment => SheetLayout::draggable(0.50, 0.35, 0.85),
            Self::OrderSummary => SheetLayout::draggable(0.45, 0.30, 0.80),
            Self::FindingRide => SheetLayout::fixed(0.35),
            Self::DriverEnRoute => SheetLayout::fixed(0.30),
            Self::RideInProgress => SheetLayout::draggable(0.30, 0.20, 0.60),
            Self::ReservationConfirmation => SheetLayout::draggable(0.40, 0.30, 0.60),
            Self::Reservation => SheetLayout::draggable(0.55, 0.40, 0.90),
            Self::NowRide => SheetLayout::draggable(0.45, 0.35, 0.80),
            Self::DeliveryService => SheetLayout::draggable(0.50, 0.35, 0.85),
        }
    }
}

/// The sheet state machine plus the ride-scoped fields it carries between
/// screens. All of those fields are cleared on reset.
pub struct ScreenFlow {
    current: SheetScreen,
    service_kind: ServiceKind,
    pickup: Option<Place>,
    destination: Option<Place>,
    selected_option: Option<RideOption>,
    coupon: Option<AppliedCoupon>,
    retry_prompt: bool,
    completion_overlay: bool,
    error_message: Option<String>,
    drag_height: Option<f64>,
}

impl Default for ScreenFlow {
    fn default() -> Self {
        Self {
            current: SheetScreen::Initial,
            service_kind: ServiceKind::Now,
            pickup: None,
            destination: None,
            selected_option: None,
            coupon: None,
            retry_prompt: false,
            completion_overlay: false,
            error_message: None,
            drag_height: None,
        }
    }
}

impl ScreenFlow {
    pub fn current(&self) -> SheetScreen {
        self.current
    }

    pub fn service_kind(&self) -> ServiceKind {
        self.service_kind
    }

    pub fn set_service_kind(&mut self, kind: ServiceKind) {
        self.service_kind = kind;
    }

    pub fn pickup(&self) -> Option<&Place> {
        self.pickup.as_ref()
    }

    pub fn destination(&self) -> Option<&Place> {
        self.destination.as_ref()
    }

    pub fn set_places(&mut self, pickup: Place, destination: Place) {
        self.pickup = Some(pickup);
        self.destination = Some(destination);
    }

    /// Store the chosen option by value. A later refetch of the quote list
    /// neither re-resolves nor invalidates this selection.
    pub fn select_option(&mut self, option: RideOption) {
        self.selected_option = Some(option);
    }

    pub fn selected_option(&self) -> Option<&RideOption> {
        self.selected_option.as_ref()
    }

    pub fn apply_coupon(&mut self, coupon: AppliedCoupon) {
        self.coupon = Some(coupon);
    }

    pub fn coupon(&self) -> Option<&AppliedCoupon> {
        self.coupon.as_ref()
    }

    pub fn retry_prompt(&self) -> bool {
        self.retry_prompt
    }

    pub fn completion_overlay(&self) -> bool {
        self.completion_overlay
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// The central transition table. Illegal (state, event) pairs are
    /// rejected; the current screen is left untouched.
    #[tracing::instrument(skip(self, ride), fields(screen = ?self.current))]
    pub fn navigate(&mut self, event: NavEvent, ride: &RidePhase) -> Result<SheetScreen, Error> {
        use NavEvent as E;
        use SheetScreen as S;

        let next = match (self.current, event) {
            (S::Initial, E::StartSearch) if matches!(ride, RidePhase::Idle) => S::JourneyEntry,
            (S::Initial, E::StartDelivery) if matches!(ride, RidePhase::Idle) => {
                self.service_kind = ServiceKind::Delivery;
                S::DeliveryService
            }

            (S::JourneyEntry, E::ChooseOnMap) => S::ChooseOnMap,
            (S::ChooseOnMap, E::ConfirmMapPick) => S::JourneyEntry,

            (S::JourneyEntry, E::BothLocationsResolved)
            | (S::DeliveryService, E::BothLocationsResolved)
                if self.pickup.is_some() && self.destination.is_some() =>
            {
                S::RideSummary
            }

            (S::RideSummary, E::PriceCalculated) => match self.service_kind {
                ServiceKind::Now => S::NowRide,
                ServiceKind::Scheduled => S::Reservation,
                ServiceKind::Delivery => S::RideOptions,
            },

            (S::RideOptions, E::ConfirmTrip)
            | (S::NowRide, E::ConfirmTrip)
            | (S::Reservation, E::ConfirmTrip)
                if self.selected_option.is_some() =>
            {
                S::Payment
            }

            (S::Payment, E::MethodChosen) => S::OrderSummary,

            (S::OrderSummary, E::Continue) if matches!(ride, RidePhase::Idle) => {
                match self.service_kind {
                    ServiceKind::Scheduled => S::ReservationConfirmation,
                    _ => S::FindingRide,
                }
            }

            (S::FindingRide, E::RetrySearch) if self.retry_prompt => {
                self.retry_prompt = false;
                S::FindingRide
            }

            (S::ReservationConfirmation, E::Dismiss) => {
                self.reset();
                return Ok(self.current);
            }
            (_, E::Dismiss)
                if self.completion_overlay
                    || self.retry_prompt
                    || self.error_message.is_some() =>
            {
                self.reset();
                return Ok(self.current);
            }

            _ => return Err(invalid_invocation_error()),
        };

        self.enter(next);
        Ok(next)
    }

    /// Map a ride lifecycle notification onto the sheet.
    pub fn apply_ride_event(&mut self, event: &RideEvent) {
        match event {
            RideEvent::SearchStarted { .. } => {
                self.retry_prompt = false;
                self.enter(SheetScreen::FindingRide);
            }
            RideEvent::DriverMatched { .. } => self.enter(SheetScreen::DriverEnRoute),
            RideEvent::NoDriverFound => {
                // stay on the search screen; the overlay offers retry
                self.retry_prompt = true;
            }
            RideEvent::TripStarted => self.enter(SheetScreen::RideInProgress),
            RideEvent::TripCompleted { .. } => {
                self.completion_overlay = true;
            }
            RideEvent::Cancelled { .. } => self.reset(),
            RideEvent::Failed { message } => {
                self.error_message = Some(message.clone());
            }
            _ => {}
        }
    }

    /// Continuous drag gesture, layered over the discrete state. Clamped to
    /// the current screen's bounds; snapping screens ignore it entirely.
    pub fn set_drag_height(&mut self, height: f64) -> f64 {
        let layout = self.current.layout();

        if !layout.draggable {
            self.drag_height = None;
            return layout.default_height;
        }

        let clamped = height.clamp(layout.min_height, layout.max_height);
        self.drag_height = Some(clamped);
        clamped
    }

    pub fn height(&self) -> f64 {
        self.drag_height
            .unwrap_or_else(|| self.current.layout().default_height)
    }

    fn enter(&mut self, next: SheetScreen) {
        if self.current != next {
            tracing::debug!(from = ?self.current, to = ?next, "screen transition");
        }
        self.current = next;
        self.drag_height = None;
    }

    /// Full reset: back to the initial screen with every ride-scoped
    /// transient field cleared.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
