//! The ride lifecycle coordinator.
//!
//! One owner task holds every piece of mutable ride state: the lifecycle
//! phase, the screen flow, the latest driver position and the route plan.
//! Network callbacks, timer expiries and user commands are all marshalled
//! onto this task and applied in arrival order, so no locking is needed and
//! races (a match against a timeout, a cancel against anything) resolve by
//! "first writer wins, second is a no-op".

pub mod location;
pub mod phase;
pub mod timeout;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::api::DynDirectionsApi;
use crate::config::Config;
use crate::entities::{
    AppliedCoupon, Coordinates, DriverLocationUpdate, Place, RideOption, RideRequest,
};
use crate::error::{channel_closed_error, Error};
use crate::events::RideEvent;
use crate::routing::RoutePlanner;
use crate::screen::{NavEvent, ScreenFlow, ServiceKind, SheetScreen};
use crate::session::protocol::{ClientMessage, ServerMessage};
use crate::session::transport::Transport;
use crate::session::{Session, SessionEvent, SessionId};

use location::{anchor_coordinates, LocationSlot};
use phase::RidePhase;
use timeout::Countdown;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Search,
    ConnectionGrace,
}

/// User-facing commands accepted by the coordinator.
#[derive(Clone, Debug)]
pub enum Command {
    Submit { request: RideRequest },
    Cancel { reason: String },
    KeepSearching,
    Reset,
    Navigate { event: NavEvent },
    SetPlaces { pickup: Place, destination: Place },
    SelectOption { option: RideOption },
    SetServiceKind { kind: ServiceKind },
    ApplyCoupon { coupon: AppliedCoupon },
    DragSheet { height: f64 },
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum Inbound {
    Command(Command),
    TimerFired { kind: TimerKind, generation: u64 },
}

/// Cheap, clonable front door to a running [`Coordinator`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    inbox: async_channel::Sender<Inbound>,
    events: broadcast::Sender<RideEvent>,
    phase: watch::Receiver<RidePhase>,
    screen: watch::Receiver<SheetScreen>,
}

impl CoordinatorHandle {
    pub async fn command(&self, command: Command) -> Result<(), Error> {
        self.inbox
            .send(Inbound::Command(command))
            .await
            .map_err(|_| channel_closed_error())
    }

    pub async fn submit(&self, request: RideRequest) -> Result<(), Error> {
        self.command(Command::Submit { request }).await
    }

    pub async fn cancel(&self, reason: impl Into<String>) -> Result<(), Error> {
        self.command(Command::Cancel {
            reason: reason.into(),
        })
        .await
    }

    pub async fn keep_searching(&self) -> Result<(), Error> {
        self.command(Command::KeepSearching).await
    }

    pub async fn navigate(&self, event: NavEvent) -> Result<(), Error> {
        self.command(Command::Navigate { event }).await
    }

    pub async fn shutdown(&self) -> Result<(), Error> {
        self.command(Command::Shutdown).await
    }

    /// Subscribe to the discrete ride-event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RideEvent> {
        self.events.subscribe()
    }

    /// Observable lifecycle state.
    pub fn phase(&self) -> watch::Receiver<RidePhase> {
        self.phase.clone()
    }

    /// Observable current screen.
    pub fn screen(&self) -> watch::Receiver<SheetScreen> {
        self.screen.clone()
    }
}

pub struct Coordinator {
    config: Config,
    session: Session,
    planner: RoutePlanner,

    phase: RidePhase,
    screen: ScreenFlow,
    location: LocationSlot,

    search_timeout: Countdown,
    connection_grace: Countdown,

    inbox: async_channel::Receiver<Inbound>,
    session_events: async_channel::Receiver<SessionEvent>,

    events: broadcast::Sender<RideEvent>,
    phase_tx: watch::Sender<RidePhase>,
    screen_tx: watch::Sender<SheetScreen>,

    /// The session id ride-scoped events must carry to be accepted.
    expected_session: Option<SessionId>,
    disconnected: bool,
    stale_events: u64,
}

impl Coordinator {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        directions: DynDirectionsApi,
    ) -> (Self, CoordinatorHandle) {
        let (inbox_tx, inbox_rx) = async_channel::unbounded();
        let (session_tx, session_rx) = async_channel::unbounded();

        let session = Session::new(transport, config.reconnect.clone(), session_tx);
        let planner = RoutePlanner::new(directions, config.camera_padding);

        let (events, _) = broadcast::channel(64);
        let (phase_tx, phase_rx) = watch::channel(RidePhase::Idle);
        let (screen_tx, screen_rx) = watch::channel(SheetScreen::Initial);

        let handle = CoordinatorHandle {
            inbox: inbox_tx.clone(),
            events: events.clone(),
            phase: phase_rx,
            screen: screen_rx,
        };

        let coordinator = Self {
            search_timeout: Countdown::new(TimerKind::Search, inbox_tx.clone()),
            connection_grace: Countdown::new(TimerKind::ConnectionGrace, inbox_tx),
            config,
            session,
            planner,
            phase: RidePhase::Idle,
            screen: ScreenFlow::default(),
            location: LocationSlot::default(),
            inbox: inbox_rx,
            session_events: session_rx,
            events,
            phase_tx,
            screen_tx,
            expected_session: None,
            disconnected: false,
            stale_events: 0,
        };

        (coordinator, handle)
    }

    /// Run the owner loop until shutdown.
    pub async fn run(mut self) {
        let inbox = self.inbox.clone();
        let session_events = self.session_events.clone();

        loop {
            tokio::select! {
                inbound = inbox.recv() => match inbound {
                    Ok(Inbound::Command(Command::Shutdown)) | Err(_) => {
                        self.session.disconnect().await;
                        return;
                    }
                    Ok(Inbound::Command(command)) => self.handle_command(command).await,
                    Ok(Inbound::TimerFired { kind, generation }) => {
                        self.handle_timer(kind, generation).await
                    }
                },
                event = session_events.recv() => match event {
                    Ok(event) => self.handle_session_event(event).await,
                    Err(_) => return,
                },
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { request } => self.handle_submit(request).await,
            Command::Cancel { reason } => self.handle_cancel(reason, true).await,
            Command::KeepSearching => self.handle_keep_searching().await,
            Command::Reset => self.handle_reset(),
            Command::Navigate { event } => self.handle_navigate(event).await,
            Command::SetPlaces {
                pickup,
                destination,
            } => {
                self.screen.set_places(pickup, destination);
            }
            Command::SelectOption { option } => self.screen.select_option(option),
            Command::SetServiceKind { kind } => self.screen.set_service_kind(kind),
            Command::ApplyCoupon { coupon } => self.screen.apply_coupon(coupon),
            Command::DragSheet { height } => {
                self.screen.set_drag_height(height);
            }
            Command::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    #[tracing::instrument(skip_all, fields(request_id = %request.id))]
    async fn handle_submit(&mut self, request: RideRequest) {
        if self.phase.is_active() {
            tracing::warn!("rejecting submit: a ride is already in flight");
            self.emit(RideEvent::SubmitRejected {
                message: "a ride is already in flight".into(),
            });
            return;
        }

        if !matches!(self.phase, RidePhase::Idle) {
            tracing::warn!(state = self.phase.name(), "rejecting submit: reset required");
            self.emit(RideEvent::SubmitRejected {
                message: "previous ride outcome must be dismissed first".into(),
            });
            return;
        }

        if let Err(err) = request.validate() {
            tracing::warn!(%err, "rejecting submit: invalid request payload");
            self.emit(RideEvent::SubmitRejected {
                message: err.message,
            });
            return;
        }

        // lazy connect: submitting while disconnected brings the session up
        let session_id = match self.session.connect().await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(%err, "could not establish the ride session");
                let _ = self.phase.fail("could not reach the ride service".into());
                self.emit(RideEvent::Failed {
                    message: "could not reach the ride service".into(),
                });
                return;
            }
        };

        if let Err(err) = self.session.send(ClientMessage::from(&request)).await {
            tracing::error!(%err, "could not emit the ride request");
            let _ = self.phase.fail("could not reach the ride service".into());
            self.emit(RideEvent::Failed {
                message: "could not reach the ride service".into(),
            });
            return;
        }

        self.expected_session = Some(session_id);

        let deadline = Utc::now()
            + chrono::Duration::from_std(self.config.search_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let request_id = request.id;

        if let Err(err) = self.phase.submit(request, deadline) {
            tracing::error!(%err, "submit transition rejected");
            return;
        }

        self.search_timeout.arm(self.config.search_timeout);
        self.emit(RideEvent::SearchStarted { request_id });
    }

    #[tracing::instrument(skip(self))]
    async fn handle_cancel(&mut self, reason: String, user_initiated: bool) {
        let was_searching = self.phase.is_searching();

        match self.phase.cancel(reason.clone()) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("cancel repeated, already cancelled");
                return;
            }
            Err(_) => {
                tracing::debug!(state = self.phase.name(), "cancel ignored in terminal state");
                return;
            }
        }

        self.search_timeout.disarm();
        self.connection_grace.disarm();
        self.location.clear();
        self.planner.clear();

        // invalidate the session id first: anything already in flight for
        // this attempt is dropped by the stale-event guard on arrival
        self.session.rotate().await;
        self.expected_session = None;

        if user_initiated {
            let outbound = if was_searching {
                ClientMessage::CancelSearch {}
            } else {
                ClientMessage::Cancel {
                    reason: reason.clone(),
                }
            };

            if let Err(err) = self.session.send(outbound).await {
                tracing::warn!(%err, "could not notify the backend of the cancellation");
            }
        }

        self.emit(RideEvent::Cancelled { reason });
    }

    #[tracing::instrument(skip(self))]
    async fn handle_keep_searching(&mut self) {
        let deadline = Utc::now()
            + chrono::Duration::from_std(self.config.search_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let request = match self.phase.keep_searching(deadline) {
            Ok(request) => request,
            Err(_) => {
                tracing::debug!(state = self.phase.name(), "keep searching ignored");
                return;
            }
        };

        let session_id = match self.session.connect().await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(%err, "could not re-establish the ride session");
                let _ = self.phase.fail("could not reach the ride service".into());
                self.emit(RideEvent::Failed {
                    message: "could not reach the ride service".into(),
                });
                return;
            }
        };

        // the original request is re-emitted unchanged
        if let Err(err) = self.session.send(ClientMessage::from(&request)).await {
            tracing::error!(%err, "could not re-emit the ride request");
            let _ = self.phase.fail("could not reach the ride service".into());
            self.emit(RideEvent::Failed {
                message: "could not reach the ride service".into(),
            });
            return;
        }

        self.expected_session = Some(session_id);
        self.search_timeout.arm(self.config.search_timeout);
        self.emit(RideEvent::SearchStarted {
            request_id: request.id,
        });
    }

    fn handle_reset(&mut self) {
        match self.phase.reset() {
            Ok(()) => {
                self.screen.reset();
                self.location.clear();
                self.planner.clear();
                self.publish();
            }
            Err(_) => {
                tracing::debug!(state = self.phase.name(), "reset ignored");
            }
        }
    }

    async fn handle_navigate(&mut self, event: NavEvent) {
        match self.screen.navigate(event, &self.phase) {
            Ok(screen) => {
                self.publish();

                // screen actions drive lifecycle commands
                match event {
                    NavEvent::Continue if screen == SheetScreen::FindingRide => {
                        match self.build_request() {
                            Some(request) => self.handle_submit(request).await,
                            None => self.emit(RideEvent::SubmitRejected {
                                message: "journey details are incomplete".into(),
                            }),
                        }
                    }
                    NavEvent::RetrySearch => self.handle_keep_searching().await,
                    NavEvent::Dismiss => {
                        // dismissing a terminal overlay also resets the ride
                        if self.phase.reset().is_ok() {
                            self.location.clear();
                            self.planner.clear();
                        }
                        self.publish();
                    }
                    _ => {}
                }
            }
            Err(_) => {
                tracing::debug!(?event, screen = ?self.screen.current(), "illegal navigation ignored");
            }
        }
    }

    /// Assemble an immutable request from the fields gathered on the sheet.
    fn build_request(&self) -> Option<RideRequest> {
        let pickup = self.screen.pickup()?.clone();
        let destination = self.screen.destination()?.clone();
        let option = self.screen.selected_option()?;

        let service_type_id = match self.screen.service_kind() {
            ServiceKind::Now => "now",
            ServiceKind::Scheduled => "scheduled",
            ServiceKind::Delivery => "delivery",
        };

        let (estimated_price, coupon_id) = match self.screen.coupon() {
            Some(coupon) => (coupon.new_price, Some(coupon.coupon_id.clone())),
            None => (option.price, None),
        };

        Some(RideRequest::new(
            pickup,
            destination,
            service_type_id.into(),
            option.id.clone(),
            estimated_price,
            coupon_id,
        ))
    }

    async fn handle_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Message {
                session_id,
                message,
            } => {
                if self.expected_session != Some(session_id) {
                    self.stale_events += 1;
                    tracing::debug!(
                        session_id,
                        discarded = self.stale_events,
                        "discarding stale session event"
                    );
                    return;
                }

                self.handle_server_message(message).await;
            }
            SessionEvent::Disconnected { session_id } => {
                if self.expected_session != Some(session_id) {
                    return;
                }

                self.disconnected = true;

                if self.phase.is_active() {
                    // hold state unchanged, bounded by the grace window
                    self.connection_grace.arm(self.config.connection_grace);
                }

                self.emit(RideEvent::ConnectionLost);
            }
            SessionEvent::Reconnected { session_id } => {
                if self.expected_session != Some(session_id) {
                    return;
                }

                self.disconnected = false;
                self.connection_grace.disarm();
                self.emit(RideEvent::ConnectionRestored);
            }
            SessionEvent::ConnectionFailed {
                session_id,
                message,
            } => {
                if self.expected_session != Some(session_id) {
                    return;
                }

                if self.phase.is_active() && self.phase.fail(message.clone()).is_ok() {
                    self.search_timeout.disarm();
                    self.connection_grace.disarm();
                    self.emit(RideEvent::Failed { message });
                }
            }
        }
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::DriverFound(payload) => {
                let driver: crate::entities::DriverMatch = payload.into();
                match self.phase.driver_matched(driver.clone()) {
                    Ok(()) => {
                        self.search_timeout.disarm();
                        self.emit(RideEvent::DriverMatched { driver });
                    }
                    Err(_) => self.drop_late_event("driverFound"),
                }
            }
            ServerMessage::NoDriverFound {} => match self.phase.no_driver_found() {
                Ok(()) => {
                    self.search_timeout.disarm();
                    self.emit(RideEvent::NoDriverFound);
                }
                Err(_) => self.drop_late_event("noDriverFound"),
            },
            ServerMessage::DriverLocation(update) => self.handle_location(update).await,
            ServerMessage::DriverArrived {} => match self.phase.driver_arrived() {
                Ok(()) => self.emit(RideEvent::DriverArrived),
                Err(_) => self.drop_late_event("driverArrived"),
            },
            ServerMessage::Started {} => match self.phase.trip_started() {
                Ok(()) => {
                    self.emit(RideEvent::TripStarted);
                    // the anchor switched with the transition; re-route to
                    // the destination right away when a position is known
                    self.replan_route().await;
                }
                Err(_) => self.drop_late_event("started"),
            },
            ServerMessage::Completed {} => match self.phase.trip_completed() {
                Ok(()) => {
                    let request_id = match &self.phase {
                        RidePhase::TripCompleted { request_id } => *request_id,
                        _ => Uuid::nil(),
                    };
                    self.location.clear();
                    self.planner.clear();
                    self.emit(RideEvent::TripCompleted { request_id });
                }
                Err(_) => self.drop_late_event("completed"),
            },
            ServerMessage::Cancelled { reason } => self.handle_cancel(reason, false).await,
            ServerMessage::Error { message } => {
                if self.phase.fail(message.clone()).is_ok() {
                    self.search_timeout.disarm();
                    self.connection_grace.disarm();
                    self.emit(RideEvent::Failed { message });
                } else {
                    self.drop_late_event("error");
                }
            }
        }
    }

    async fn handle_location(&mut self, update: DriverLocationUpdate) {
        if !self.phase.has_driver() {
            tracing::debug!(state = self.phase.name(), "dropping driver location update");
            return;
        }

        self.location.record(update);
        self.emit(RideEvent::DriverLocation { update });

        // proximity arrival: an explicit server signal may have landed
        // first, in which case this is a no-op
        if matches!(self.phase, RidePhase::Matched { .. }) {
            let pickup = self
                .phase
                .request()
                .map(|request| request.pickup.coordinates);

            if let Some(pickup) = pickup {
                if self.location.within(pickup, self.config.arrival_radius_meters)
                    && self.phase.driver_arrived().is_ok()
                {
                    self.emit(RideEvent::DriverArrived);
                }
            }
        }

        self.replan_route().await;
    }

    async fn replan_route(&mut self) {
        let anchor = match anchor_coordinates(&self.phase) {
            Some((_, coordinates)) => coordinates,
            None => return,
        };

        let position = match self.location.latest() {
            Some(update) => Coordinates::new(update.latitude, update.longitude),
            None => return,
        };

        let plan = self.planner.plan(position, anchor).await;
        self.emit(RideEvent::RouteUpdated { plan });
    }

    async fn handle_timer(&mut self, kind: TimerKind, generation: u64) {
        match kind {
            TimerKind::Search => {
                if !self.search_timeout.is_current(generation) {
                    tracing::debug!(generation, "ignoring superseded search timeout");
                    return;
                }

                match self.phase.no_driver_found() {
                    Ok(()) => {
                        tracing::info!("search window expired with no driver");
                        let _ = self
                            .session
                            .send(ClientMessage::CancelSearch {})
                            .await
                            .map_err(|err| {
                                tracing::warn!(%err, "could not notify the backend of the expiry");
                            });
                        self.emit(RideEvent::NoDriverFound);
                    }
                    Err(_) => {
                        // a match or cancel won the race
                        tracing::debug!(state = self.phase.name(), "search timeout lost the race");
                    }
                }
            }
            TimerKind::ConnectionGrace => {
                if !self.connection_grace.is_current(generation) {
                    return;
                }

                if self.disconnected && self.phase.is_active() {
                    tracing::error!("connection grace period expired");
                    self.search_timeout.disarm();
                    if self.phase.fail("connection lost".into()).is_ok() {
                        self.emit(RideEvent::Failed {
                            message: "connection lost".into(),
                        });
                    }
                }
            }
        }
    }

    fn drop_late_event(&mut self, kind: &str) {
        tracing::debug!(kind, state = self.phase.name(), "dropping late session event");
    }

    fn emit(&mut self, event: RideEvent) {
        self.screen.apply_ride_event(&event);
        self.publish();
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.phase_tx.send_replace(self.phase.clone());
        self.screen_tx.send_replace(self.screen.current());
    }
}
