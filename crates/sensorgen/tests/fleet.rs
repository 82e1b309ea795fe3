use sensorgen::{
    DeliveryStats, Dispatcher, Error, Event, FleetConfig, MemoryBroker, MemoryConnection,
    ProducerSettings, completion_channel, run_fleet,
};
use std::{collections::HashSet, time::Duration};
use tokio_util::sync::CancellationToken;

const TOPIC: &str = "sensor_metrics";

fn dispatcher(broker: &MemoryBroker) -> Dispatcher<MemoryConnection> {
    let (sink, streams) = completion_channel();
    let connection = broker
        .connect(&ProducerSettings::default(), sink)
        .unwrap();
    Dispatcher::new(connection, streams, TOPIC)
}

fn all_events(broker: &MemoryBroker) -> Vec<Event> {
    (0..broker.partitions())
        .flat_map(|partition| broker.records(TOPIC, partition))
        .map(|record| Event::decode(&record.payload).unwrap())
        .collect()
}

fn small_fleet(run_for: Option<Duration>) -> FleetConfig {
    FleetConfig {
        sensor_count: 3,
        events_per_sec: 30.0,
        run_for,
        stats_interval: Duration::from_millis(200),
        close_timeout: Duration::from_secs(2),
        seed: None,
    }
}

#[tokio::test(start_paused = true)]
async fn three_sensors_for_one_second() {
    let broker = MemoryBroker::new(8).unwrap();
    let config = small_fleet(Some(Duration::from_secs(1)));

    let stats = run_fleet(&config, dispatcher(&broker), CancellationToken::new(), |_| {})
        .await
        .unwrap();

    let events = all_events(&broker);
    assert!((27..=30).contains(&events.len()), "{}", events.len());
    assert_eq!(stats.accepted, events.len() as u64);
    assert_eq!(stats.succeeded, stats.accepted);
    assert_eq!(stats.failed + stats.dropped, 0);

    let sensors: HashSet<&str> = events.iter().map(Event::sensor_id).collect();
    assert_eq!(sensors, HashSet::from(["sensor_1", "sensor_2", "sensor_3"]));

    let ids: HashSet<&str> = events.iter().map(Event::event_id).collect();
    assert_eq!(ids.len(), events.len());
}

#[tokio::test(start_paused = true)]
async fn external_cancel_stops_the_fleet() {
    let broker = MemoryBroker::new(8).unwrap();
    let shutdown = CancellationToken::new();

    let canceller = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(550)).await;
            shutdown.cancel();
        })
    };

    let stats = run_fleet(&small_fleet(None), dispatcher(&broker), shutdown, |_| {})
        .await
        .unwrap();
    canceller.await.unwrap();

    // Five ticks per sensor fit in 550ms at 10 events/sec.
    assert_eq!(stats.accepted, 15);
    assert_eq!(stats.succeeded, 15);
    assert_eq!(broker.len(TOPIC), 15);
}

#[tokio::test(start_paused = true)]
async fn stats_are_reported_periodically_and_at_close() {
    let broker = MemoryBroker::new(8).unwrap();
    let mut reports: Vec<DeliveryStats> = Vec::new();

    let stats = run_fleet(
        &small_fleet(Some(Duration::from_secs(1))),
        dispatcher(&broker),
        CancellationToken::new(),
        |stats| reports.push(*stats),
    )
    .await
    .unwrap();

    // Ticks at 200, 400, 600 and 800ms (1000ms races the run timer), then
    // the final snapshot.
    assert!((5..=6).contains(&reports.len()), "{reports:?}");
    assert_eq!(reports.last(), Some(&stats));
    for pair in reports.windows(2) {
        assert!(pair[1].submitted >= pair[0].submitted);
        assert!(pair[1].accepted >= pair[0].accepted);
        assert!(pair[1].succeeded >= pair[0].succeeded);
    }
    for report in &reports {
        assert!(report.succeeded + report.failed <= report.accepted);
    }
}

#[tokio::test(start_paused = true)]
async fn seeded_fleets_replay_the_same_readings() {
    async fn readings(seed: u64) -> Vec<f64> {
        let broker = MemoryBroker::new(1).unwrap();
        let config = FleetConfig {
            sensor_count: 1,
            events_per_sec: 10.0,
            run_for: Some(Duration::from_millis(950)),
            seed: Some(seed),
            ..small_fleet(None)
        };
        run_fleet(&config, dispatcher(&broker), CancellationToken::new(), |_| {})
            .await
            .unwrap();
        all_events(&broker).iter().map(Event::value).collect()
    }

    let first = readings(7).await;
    let second = readings(7).await;
    let other = readings(8).await;

    assert_eq!(first.len(), 9);
    assert_eq!(first, second);
    assert_ne!(first, other);
}

#[tokio::test]
async fn invalid_config_starts_nothing() {
    let broker = MemoryBroker::new(8).unwrap();
    let config = FleetConfig {
        sensor_count: 0,
        ..Default::default()
    };

    let result = run_fleet(&config, dispatcher(&broker), CancellationToken::new(), |_| {}).await;
    assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    assert!(broker.is_empty(TOPIC));
}

#[tokio::test(start_paused = true)]
async fn full_queue_drops_are_counted_not_fatal() {
    let broker = MemoryBroker::new(8).unwrap();
    broker.set_online(false);
    let (sink, streams) = completion_channel();
    let connection = broker
        .connect(
            &ProducerSettings {
                queue_capacity: 5,
                ..Default::default()
            },
            sink,
        )
        .unwrap();
    let config = FleetConfig {
        close_timeout: Duration::from_millis(100),
        ..small_fleet(Some(Duration::from_millis(550)))
    };

    let stats = run_fleet(
        &config,
        Dispatcher::new(connection, streams, TOPIC),
        CancellationToken::new(),
        |_| {},
    )
    .await
    .unwrap();

    assert_eq!(stats.accepted, 5);
    assert_eq!(stats.dropped, 10);
    assert_eq!(stats.succeeded + stats.failed, 0);
}
