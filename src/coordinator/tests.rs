//! Scenario tests for the coordinator, driven through a channel-backed
//! transport standing in for the dispatch backend.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use super::{Coordinator, CoordinatorHandle};
use crate::api::DirectionsApi;
use crate::config::{Config, ReconnectPolicy};
use crate::entities::{
    Coordinates, DriverIdentity, DriverLocationUpdate, Place, RideRequest, Vehicle,
};
use crate::error::{connection_error, upstream_error, Error};
use crate::events::RideEvent;
use crate::routing::CameraPadding;
use crate::screen::SheetScreen;
use crate::session::protocol::{ClientMessage, DriverFoundPayload, ServerMessage};
use crate::session::transport::{MessageSink, MessageStream, Transport};

const PICKUP: Coordinates = Coordinates {
    latitude: 33.57,
    longitude: -7.58,
};
const DESTINATION: Coordinates = Coordinates {
    latitude: 33.59,
    longitude: -7.60,
};

// ---------------------------------------------------------------------------
// test doubles
// ---------------------------------------------------------------------------

struct ChannelTransport {
    inbound: async_channel::Receiver<ServerMessage>,
    outbound: async_channel::Sender<ClientMessage>,
    connect_once: bool,
    connected: AtomicBool,
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<(Box<dyn MessageSink>, Box<dyn MessageStream>), Error> {
        if self.connect_once && self.connected.swap(true, Ordering::SeqCst) {
            return Err(connection_error("transport gone"));
        }

        Ok((
            Box::new(ChannelSink {
                tx: self.outbound.clone(),
            }),
            Box::new(ChannelStream {
                rx: self.inbound.clone(),
            }),
        ))
    }
}

struct ChannelSink {
    tx: async_channel::Sender<ClientMessage>,
}

#[async_trait]
impl MessageSink for ChannelSink {
    async fn send(&mut self, message: ClientMessage) -> Result<(), Error> {
        self.tx.send(message).await.map_err(connection_error)
    }

    async fn close(&mut self) {}
}

struct ChannelStream {
    rx: async_channel::Receiver<ServerMessage>,
}

#[async_trait]
impl MessageStream for ChannelStream {
    async fn next_message(&mut self) -> Result<Option<ServerMessage>, Error> {
        match self.rx.recv().await {
            Ok(message) => Ok(Some(message)),
            Err(_) => Ok(None),
        }
    }
}

/// Echoes the requested pair back, so a plan's polyline always ends on the
/// current anchor.
struct EchoDirections;

#[async_trait]
impl DirectionsApi for EchoDirections {
    async fn find_path(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<Vec<Coordinates>, Error> {
        Ok(vec![origin, destination])
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

// ---------------------------------------------------------------------------
// harness
// ---------------------------------------------------------------------------

struct Harness {
    handle: CoordinatorHandle,
    server: async_channel::Sender<ServerMessage>,
    sent: async_channel::Receiver<ClientMessage>,
    events: broadcast::Receiver<RideEvent>,
}

fn test_config(search_timeout: Duration) -> Config {
    Config {
        session_url: "ws://localhost:0/session".into(),
        auth_token: "test-token".into(),
        search_timeout,
        connection_grace: Duration::from_millis(100),
        reconnect: ReconnectPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        arrival_radius_meters: 50.0,
        camera_padding: CameraPadding::default(),
    }
}

fn start_with(search_timeout: Duration, connect_once: bool, failing_directions: bool) -> Harness {
    let (server_tx, server_rx) = async_channel::unbounded();
    let (sent_tx, sent_rx) = async_channel::unbounded();

    let transport = Arc::new(ChannelTransport {
        inbound: server_rx,
        outbound: sent_tx,
        connect_once,
        connected: AtomicBool::new(false),
    });

    let directions: crate::api::DynDirectionsApi = if failing_directions {
        Arc::new(FailingDirections)
    } else {
        Arc::new(EchoDirections)
    };

    let (coordinator, handle) = Coordinator::new(test_config(search_timeout), transport, directions);

    tokio::spawn(coordinator.run());

    let events = handle.subscribe();

    Harness {
        handle,
        server: server_tx,
        sent: sent_rx,
        events,
    }
}

fn start(search_timeout: Duration) -> Harness {
    start_with(search_timeout, false, false)
}

fn request() -> RideRequest {
    RideRequest::new(
        Place::new("12 Boulevard d'Anfa".into(), PICKUP),
        Place::new("Ain Diab".into(), DESTINATION),
        "now".into(),
        "option-1".into(),
        45.0,
        None,
    )
}

fn driver_found() -> ServerMessage {
    ServerMessage::DriverFound(DriverFoundPayload {
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
        pickup_addr: "12 Boulevard d'Anfa".into(),
        dropoff_addr: "Ain Diab".into(),
        eta_minutes: 4,
    })
}

fn location(latitude: f64, longitude: f64) -> ServerMessage {
    ServerMessage::DriverLocation(DriverLocationUpdate {
        latitude,
        longitude,
        timestamp: Utc::now(),
    })
}

async fn expect_phase(handle: &CoordinatorHandle, name: &str) {
    let mut rx = handle.phase();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if rx.borrow().name() == name {
                return;
            }
            rx.changed().await.expect("phase channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for phase {:?}, current is {:?}",
            name,
            rx.borrow().name()
        )
    });
}

async fn expect_screen(handle: &CoordinatorHandle, screen: SheetScreen) {
    let mut rx = handle.screen();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow() == screen {
                return;
            }
            rx.changed().await.expect("screen channel closed");
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for screen {:?}, current is {:?}",
            screen,
            *rx.borrow()
        )
    });
}

async fn next_matching<F>(events: &mut broadcast::Receiver<RideEvent>, mut predicate: F) -> RideEvent
where
    F: FnMut(&RideEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn driver_found_disarms_the_timeout_and_shows_driver_en_route() {
    let harness = start(Duration::from_millis(300));

    harness.handle.submit(request()).await.unwrap();
    expect_phase(&harness.handle, "searching").await;

    // the request went over the wire
    let sent = harness.sent.recv().await.unwrap();
    assert!(matches!(sent, ClientMessage::RideRequest { .. }));

    harness.server.send(driver_found()).await.unwrap();
    expect_phase(&harness.handle, "matched").await;
    expect_screen(&harness.handle, SheetScreen::DriverEnRoute).await;

    // well past the search window: the supervisor was disarmed by the match
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(harness.handle.phase().borrow().name(), "matched");
}

#[tokio::test]
async fn expiry_yields_no_driver_found_and_keep_searching_rearms() {
    let mut harness = start(Duration::from_millis(100));

    harness.handle.submit(request()).await.unwrap();
    expect_phase(&harness.handle, "searching").await;

    let first = harness.sent.recv().await.unwrap();

    expect_phase(&harness.handle, "no_driver_found").await;
    next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::NoDriverFound)
    })
    .await;

    harness.handle.keep_searching().await.unwrap();
    expect_phase(&harness.handle, "searching").await;

    // the original request is re-emitted unchanged
    let mut second = None;
    while let Ok(message) = harness.sent.try_recv() {
        if matches!(message, ClientMessage::RideRequest { .. }) {
            second = Some(message);
        }
    }
    assert_eq!(second.expect("request was not re-emitted"), first);

    // and the fresh window expires on its own again
    expect_phase(&harness.handle, "no_driver_found").await;
}

#[tokio::test]
async fn cancel_discards_late_location_updates() {
    let harness = start(Duration::from_secs(5));

    harness.handle.submit(request()).await.unwrap();
    expect_phase(&harness.handle, "searching").await;

    harness.server.send(driver_found()).await.unwrap();
    expect_phase(&harness.handle, "matched").await;

    harness.handle.cancel("changed my mind").await.unwrap();
    expect_phase(&harness.handle, "cancelled").await;
    expect_screen(&harness.handle, SheetScreen::Initial).await;

    // a location update delayed by the network arrives after termination
    let mut late_events = harness.handle.subscribe();
    harness.server.send(location(33.58, -7.59)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.handle.phase().borrow().name(), "cancelled");
    assert!(late_events.try_recv().is_err(), "late update leaked an event");
}

#[tokio::test]
async fn cancel_twice_is_idempotent() {
    let mut harness = start(Duration::from_secs(5));

    harness.handle.submit(request()).await.unwrap();
    expect_phase(&harness.handle, "searching").await;

    harness.handle.cancel("first").await.unwrap();
    harness.handle.cancel("second").await.unwrap();
    expect_phase(&harness.handle, "cancelled").await;

    let cancelled = next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::Cancelled { .. })
    })
    .await;
    match cancelled {
        RideEvent::Cancelled { reason } => assert_eq!(reason, "first"),
        _ => unreachable!(),
    }

    // only one cancellation event was produced
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness
        .events
        .try_recv()
        .is_err());
}

#[tokio::test]
async fn a_second_submit_is_rejected_while_one_is_in_flight() {
    let mut harness = start(Duration::from_secs(5));

    let first = request();
    let first_id = first.id;
    harness.handle.submit(first).await.unwrap();
    expect_phase(&harness.handle, "searching").await;

    harness.handle.submit(request()).await.unwrap();

    next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::SubmitRejected { .. })
    })
    .await;

    let phase = harness.handle.phase().borrow().clone();
    assert_eq!(phase.request().unwrap().id, first_id);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_wire() {
    let mut harness = start(Duration::from_secs(5));

    let mut invalid = request();
    invalid.pickup.address.clear();

    harness.handle.submit(invalid).await.unwrap();

    next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::SubmitRejected { .. })
    })
    .await;

    assert_eq!(harness.handle.phase().borrow().name(), "idle");
    assert!(harness.sent.try_recv().is_err(), "request leaked to the wire");
}

#[tokio::test]
async fn anchor_switches_to_destination_with_trip_start() {
    let mut harness = start(Duration::from_secs(5));

    harness.handle.submit(request()).await.unwrap();
    harness.server.send(driver_found()).await.unwrap();
    expect_phase(&harness.handle, "matched").await;

    // en route to pickup: the route ends on the pickup anchor
    harness.server.send(location(33.55, -7.55)).await.unwrap();
    let plan = next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::RouteUpdated { .. })
    })
    .await;
    match plan {
        RideEvent::RouteUpdated { plan } => assert_eq!(*plan.polyline.last().unwrap(), PICKUP),
        _ => unreachable!(),
    }

    harness.server.send(ServerMessage::Started {}).await.unwrap();
    expect_phase(&harness.handle, "trip_started").await;
    expect_screen(&harness.handle, SheetScreen::RideInProgress).await;

    // the very next tick routes to the destination, never to pickup
    harness.server.send(location(33.58, -7.59)).await.unwrap();
    let plan = next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::RouteUpdated { .. })
    })
    .await;
    match plan {
        RideEvent::RouteUpdated { plan } => {
            assert_eq!(*plan.polyline.last().unwrap(), DESTINATION)
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn proximity_to_pickup_marks_the_driver_arrived() {
    let mut harness = start(Duration::from_secs(5));

    harness.handle.submit(request()).await.unwrap();
    harness.server.send(driver_found()).await.unwrap();
    expect_phase(&harness.handle, "matched").await;

    // a tick right on the pickup point
    harness
        .server
        .send(location(PICKUP.latitude, PICKUP.longitude))
        .await
        .unwrap();

    expect_phase(&harness.handle, "arrived").await;
    next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::DriverArrived)
    })
    .await;
}

#[tokio::test]
async fn explicit_arrival_signal_beats_proximity() {
    let harness = start(Duration::from_secs(5));

    harness.handle.submit(request()).await.unwrap();
    harness.server.send(driver_found()).await.unwrap();
    expect_phase(&harness.handle, "matched").await;

    harness
        .server
        .send(ServerMessage::DriverArrived {})
        .await
        .unwrap();
    expect_phase(&harness.handle, "arrived").await;

    // the proximity tick that follows is a no-op
    harness
        .server
        .send(location(PICKUP.latitude, PICKUP.longitude))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.handle.phase().borrow().name(), "arrived");
}

#[tokio::test]
async fn completed_trips_reset_through_dismiss() {
    let harness = start(Duration::from_secs(5));

    harness.handle.submit(request()).await.unwrap();
    harness.server.send(driver_found()).await.unwrap();
    harness.server.send(ServerMessage::Started {}).await.unwrap();
    harness
        .server
        .send(ServerMessage::Completed {})
        .await
        .unwrap();
    expect_phase(&harness.handle, "trip_completed").await;

    harness
        .handle
        .navigate(crate::screen::NavEvent::Dismiss)
        .await
        .unwrap();

    expect_phase(&harness.handle, "idle").await;
    expect_screen(&harness.handle, SheetScreen::Initial).await;
}

#[tokio::test]
async fn route_failures_fall_back_to_a_straight_line() {
    let mut harness = start_with(Duration::from_secs(5), false, true);

    harness.handle.submit(request()).await.unwrap();
    harness.server.send(driver_found()).await.unwrap();
    expect_phase(&harness.handle, "matched").await;

    harness.server.send(location(33.55, -7.55)).await.unwrap();

    let plan = next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::RouteUpdated { .. })
    })
    .await;
    match plan {
        RideEvent::RouteUpdated { plan } => {
            assert_eq!(plan.polyline.len(), 2);
            assert_eq!(*plan.polyline.last().unwrap(), PICKUP);
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn losing_the_connection_mid_search_escalates_to_failed() {
    let mut harness = start_with(Duration::from_secs(5), true, false);

    harness.handle.submit(request()).await.unwrap();
    expect_phase(&harness.handle, "searching").await;

    // server goes away; the single reconnect attempt is refused
    drop(harness.server);

    next_matching(&mut harness.events, |event| {
        matches!(event, RideEvent::ConnectionLost)
    })
    .await;

    expect_phase(&harness.handle, "failed").await;
}

#[tokio::test]
async fn server_cancellation_resets_the_sheet() {
    let harness = start(Duration::from_secs(5));

    harness.handle.submit(request()).await.unwrap();
    harness.server.send(driver_found()).await.unwrap();
    expect_phase(&harness.handle, "matched").await;

    harness
        .server
        .send(ServerMessage::Cancelled {
            reason: "driver unavailable".into(),
        })
        .await
        .unwrap();

    expect_phase(&harness.handle, "cancelled").await;
    expect_screen(&harness.handle, SheetScreen::Initial).await;
}
