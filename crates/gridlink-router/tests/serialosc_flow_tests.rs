//! End-to-end tests against a fake serialosc daemon
//!
//! Covers the full path:
//! - Discovery at init, device configuration and autorouting
//! - Inbound key presses reaching client callbacks
//! - LED output reaching the device with its prefix
//! - Hotplug via attach/detach notifications

use gridlink_core::{DeviceKind, ObserverRef, OutputsLeds, OutputsRings};
use gridlink_router::{
    ClientBuilder, Context, DeviceConstraint, GridKeyFilter, Notification, RouterConfig,
    RouterError, Subject,
};
use gridlink_test_utils::{eventually, init_tracing, int_args, Collector, FakeSerialosc};
use std::sync::Arc;
use std::time::Duration;

fn config(fake: &FakeSerialosc, autodiscover: bool) -> RouterConfig {
    let mut config = RouterConfig::local(fake.port());
    config.autodiscover = autodiscover;
    config.serialosc.timeout_ms = 100;
    config
}

/// With the default autodiscover setting, init subscribes on its first send
#[tokio::test]
async fn test_init_with_autodiscover() {
    init_tracing();
    let fake = FakeSerialosc::start().unwrap();
    let device = fake.plug("m1000", "monome 128").unwrap();

    let context = Context::new(config(&fake, true));
    context.init().await.unwrap();

    assert!(context.serialosc().is_tracking());
    assert!(eventually(|| fake.pending_subscribers() == 1).await);
    assert_eq!(fake.notify_requests(), 1);
    assert_eq!(context.grids().len(), 1);
    assert!(eventually(|| device.prefix() == "/m1000").await);
}

/// A plugged grid is configured, routed and answers key presses
#[tokio::test]
async fn test_grid_round_trip() {
    init_tracing();
    let fake = FakeSerialosc::start().unwrap();
    let device = fake.plug("m1000", "monome 128").unwrap();

    let context = Context::new(config(&fake, false));
    context.init().await.unwrap();
    let local_port = context.local_port().unwrap();

    assert_eq!(context.grids().len(), 1);
    assert_eq!(context.default_grid_dimensions(), Some((16, 8)));
    assert!(
        eventually(|| device.prefix() == "/m1000" && device.destination_port() == Some(local_port))
            .await,
        "device was not configured"
    );

    let keys: Collector<(i32, i32, i32)> = Collector::new();
    let k = keys.clone();
    let client = context
        .add_client(ClientBuilder::grid("echo").on_key(move |client, key| {
            k.push((key.x, key.y, key.state));
            let _ = client.led_set(key.x, key.y, key.state);
        }))
        .unwrap();
    assert_eq!(client.grid().unwrap().id(), "m1000");
    assert!(
        eventually(|| device.received_addresses().iter().any(|a| a == "/m1000/grid/led/all")).await,
        "routing did not clear the grid"
    );

    device.press(3, 4, 1).unwrap();
    assert!(eventually(|| keys.count() >= 1).await, "key press not delivered");
    assert_eq!(keys.values(), vec![(3, 4, 1)]);

    assert!(
        eventually(|| device
            .received()
            .iter()
            .any(|m| m.addr == "/m1000/grid/led/set" && int_args(m) == vec![3, 4, 1]))
        .await,
        "led set not received"
    );
}

/// Events from an unrouted grid reach no client
#[tokio::test]
async fn test_unrouted_grid_is_silent() {
    init_tracing();
    let fake = FakeSerialosc::start().unwrap();
    let device = fake.plug("m1", "monome 64").unwrap();

    let context = Context::new(config(&fake, false));
    context.init().await.unwrap();
    let local_port = context.local_port().unwrap();
    assert!(eventually(|| device.destination_port() == Some(local_port)).await);

    let keys: Collector<i32> = Collector::new();
    let k = keys.clone();
    let client = context
        .add_client(ClientBuilder::grid("c").autoroute(false).on_key(move |_, key| k.push(key.x)))
        .unwrap();

    let seen: Collector<i32> = Collector::new();
    let s = seen.clone();
    let _any = context.on_grid_key(GridKeyFilter::any(), DeviceConstraint::Any, move |key, _| s.push(key.x));

    device.press(0, 0, 1).unwrap();
    device.press(1, 0, 1).unwrap();
    assert!(eventually(|| seen.count() >= 2).await);
    assert_eq!(keys.count(), 0);

    client.route(&context.lookup_by_id("m1").unwrap()).unwrap();
    device.press(2, 0, 1).unwrap();

    assert!(eventually(|| keys.count() >= 1).await);
    assert_eq!(keys.values(), vec![2]);
}

/// Ring output and encoder deltas go through the routed client
#[tokio::test]
async fn test_encoder_round_trip() {
    init_tracing();
    let fake = FakeSerialosc::start().unwrap();
    let device = fake.plug("m0000045", "monome arc 4").unwrap();

    let context = Context::new(config(&fake, false));
    context.init().await.unwrap();
    let local_port = context.local_port().unwrap();
    assert!(eventually(|| device.destination_port() == Some(local_port)).await);

    let deltas: Collector<(i32, i32)> = Collector::new();
    let d = deltas.clone();
    let client = context
        .add_client(ClientBuilder::enc("rings").on_delta(move |_, delta| d.push((delta.ring, delta.delta))))
        .unwrap();
    assert_eq!(context.default_num_rings(), Some(4));

    device.turn(2, -3).unwrap();
    assert!(eventually(|| deltas.count() >= 1).await);
    assert_eq!(deltas.values(), vec![(2, -3)]);

    client.ring_set(1, 10, 15).unwrap();
    assert!(
        eventually(|| device
            .received()
            .iter()
            .any(|m| m.addr == "/m0000045/ring/set" && int_args(m) == vec![1, 10, 15]))
        .await
    );
}

/// The LED test sweeps the default grid and needs a default to run
#[tokio::test]
async fn test_default_grid_led_test() {
    init_tracing();
    let fake = FakeSerialosc::start().unwrap();
    let device = fake.plug("m1", "monome 64").unwrap();

    let context = Context::new(config(&fake, false));
    context.init().await.unwrap();
    context.test_default_grid(Duration::from_micros(200)).await.unwrap();

    let led_sets = || {
        device
            .received()
            .iter()
            .filter(|m| m.addr == "/m1/grid/led/set")
            .count()
    };
    assert!(eventually(|| led_sets() == 128).await, "sweep incomplete");
    assert!(matches!(
        context.test_default_encoder(Duration::ZERO).await,
        Err(RouterError::NoDefault(DeviceKind::Encoder))
    ));
}

/// Attach and detach notifications keep the registry current
#[tokio::test]
async fn test_hotplug() {
    init_tracing();
    let fake = FakeSerialosc::start().unwrap();

    let context = Context::new(config(&fake, true));
    context.init().await.unwrap();
    assert!(context.encoders().is_empty());
    assert!(eventually(|| fake.pending_subscribers() == 1).await);

    let routed: Collector<String> = Collector::new();
    let r = routed.clone();
    let client = context
        .add_client(ClientBuilder::enc("late").on_enc_routed(move |_, enc| r.push(enc.id().to_string())))
        .unwrap();

    fake.attach("m0000045", "monome arc 4").unwrap();
    assert!(eventually(|| context.encoders().len() == 1).await, "attach not seen");
    assert!(eventually(|| routed.count() == 1).await);
    assert_eq!(client.enc().unwrap().id(), "m0000045");

    // Each notification re-arms the subscription
    assert!(eventually(|| fake.pending_subscribers() == 1).await);
    fake.detach("m0000045").unwrap();
    assert!(eventually(|| context.encoders().is_empty()).await, "detach not seen");
    assert!(client.enc().is_none());
    assert!(context.devices(DeviceKind::Encoder).is_empty());
    assert!(context.default_encoder().is_none());

    context.shutdown();
}

/// A detach arriving while the attach re-list is open is applied after it
#[tokio::test]
async fn test_detach_during_attach_relist() {
    init_tracing();
    let fake = FakeSerialosc::start().unwrap();
    let context = Context::new(config(&fake, true));
    context.init().await.unwrap();
    assert!(eventually(|| fake.pending_subscribers() == 1).await);
    let lists_at_init = fake.list_requests();

    let log: Collector<String> = Collector::new();
    let l = log.clone();
    let observer: ObserverRef<Subject, Notification> =
        Arc::new(move |_: &Subject, n: &Notification| match n {
            Notification::Attached(d) => l.push(format!("attached {}", d.id())),
            Notification::Detached(d) => l.push(format!("detached {}", d.id())),
            _ => {}
        });
    context.watch(Subject::System, observer);

    fake.attach("m0000045", "monome arc 4").unwrap();
    // The re-list has been answered and the subscription re-armed
    assert!(eventually(|| fake.list_requests() > lists_at_init).await);
    assert!(eventually(|| fake.pending_subscribers() == 1).await);
    fake.detach("m0000045").unwrap();

    // Removal waits for the re-list that saw the device, then drops it
    assert!(eventually(|| log.count() >= 2).await, "attach and detach not both applied");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        log.values(),
        vec!["attached m0000045".to_string(), "detached m0000045".to_string()]
    );
    assert!(context.encoders().is_empty());
    assert!(context.default_encoder().is_none());
}
