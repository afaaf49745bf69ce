//! End-to-end behaviour of whole systems built from the standard units.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use robokit_core::{
    Builder, Context, LifecycleState, Managed, Repeat, Unit, UnitContext, async_trait,
};
use robokit_types::{BuildError, Configuration, UnitError};

use crate::{
    ProducerMessage, STRING_CONSUMER, STRING_PRODUCER, SimBench, StringConsumer, StringProducer,
    standard_registry,
};

fn producer_config() -> Configuration {
    Configuration::builder().with_string("target", "consumer").build()
}

/// Records `(sender, sequence)` pairs.
struct Recorder {
    id: String,
    seen: Arc<Mutex<Vec<(usize, u32)>>>,
}

#[async_trait]
impl Unit for Recorder {
    type Message = (usize, u32);

    fn id(&self) -> &str {
        &self.id
    }

    async fn on_message(&mut self, _cx: &UnitContext, message: (usize, u32)) -> Result<(), UnitError> {
        self.seen.lock().unwrap().push(message);
        Ok(())
    }
}

/// Fails its start hook and counts releases.
struct Faulty {
    id: String,
    shut_down: Arc<AtomicUsize>,
}

#[async_trait]
impl Unit for Faulty {
    type Message = ();

    fn id(&self) -> &str {
        &self.id
    }

    async fn start(&mut self, _cx: &UnitContext) -> Result<(), UnitError> {
        Err(UnitError::Hardware {
            component: self.id.clone(),
            details: "servo controller missing".to_string(),
        })
    }

    async fn on_message(&mut self, _cx: &UnitContext, _message: ()) -> Result<(), UnitError> {
        Ok(())
    }

    async fn shutdown(&mut self, _cx: &UnitContext) -> Result<(), UnitError> {
        self.shut_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn producer_forwards_ten_messages_to_consumer() {
    let bench = SimBench::new();
    let context = Builder::with_registry(standard_registry(&bench))
        .add_configured(STRING_PRODUCER, &producer_config(), "producer")
        .unwrap()
        .add_type(STRING_CONSUMER, "consumer")
        .unwrap()
        .build();
    context.start().await;
    assert_eq!(context.state(), LifecycleState::Started);

    let producer = context.reference::<ProducerMessage>("producer").unwrap();
    for _ in 0..10 {
        producer.send(ProducerMessage::Tick);
    }
    context.shutdown().await;

    assert_eq!(bench.received.count(), 10);
    assert_eq!(context.unit_state("consumer"), Ok(LifecycleState::ShutDown));
}

#[tokio::test]
async fn direct_and_resolved_references_both_deliver() {
    let consumer = Managed::new(StringConsumer::new("consumer"));
    let received = consumer.unit().received();
    // Handle taken from the unit object itself, before the context exists.
    let direct = consumer.reference();
    let context = Builder::new().add_managed(consumer).unwrap().build();
    context.start().await;

    let resolved = context.reference::<String>("consumer").unwrap();
    assert_eq!(resolved, direct);
    direct.send("direct".to_string());
    resolved.send("resolved".to_string());
    context.shutdown().await;

    assert_eq!(received.count(), 2);
}

#[tokio::test]
async fn per_sender_order_holds_under_concurrency() {
    const SENDERS: usize = 4;
    const PER_SENDER: u32 = 200;

    let seen = Arc::new(Mutex::new(Vec::new()));
    let context = Builder::new()
        .add(Recorder {
            id: "recorder".to_string(),
            seen: seen.clone(),
        })
        .unwrap()
        .build();
    context.start().await;

    let tasks: Vec<_> = (0..SENDERS)
        .map(|sender| {
            let reference = context.reference::<(usize, u32)>("recorder").unwrap();
            tokio::spawn(async move {
                for n in 0..PER_SENDER {
                    reference.send((sender, n));
                    if n % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    context.shutdown().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), SENDERS * PER_SENDER as usize);
    for sender in 0..SENDERS {
        let sequence: Vec<u32> = seen
            .iter()
            .filter(|(s, _)| *s == sender)
            .map(|(_, n)| *n)
            .collect();
        assert_eq!(sequence, (0..PER_SENDER).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn scheduled_series_drives_producer() {
    let bench = SimBench::new();
    let context = Builder::with_registry(standard_registry(&bench))
        .add_configured(STRING_PRODUCER, &producer_config(), "producer")
        .unwrap()
        .add_type(STRING_CONSUMER, "consumer")
        .unwrap()
        .build();
    context.start().await;

    let done = Arc::new(AtomicUsize::new(0));
    let notified = done.clone();
    let producer = context.reference::<ProducerMessage>("producer").unwrap();
    let series = context.scheduler().schedule_with_listener(
        &producer,
        ProducerMessage::Tick,
        Duration::from_millis(10),
        Repeat::Times {
            count: 3,
            interval: Duration::from_millis(10),
        },
        move |cx: &Context| {
            // The listener can reach other units through the context.
            if let Ok(consumer) = cx.reference::<String>("consumer") {
                consumer.send("batch done".to_string());
            }
            notified.fetch_add(1, Ordering::SeqCst);
        },
    );
    tokio::time::sleep(Duration::from_millis(300)).await;
    context.shutdown().await;

    assert_eq!(series.invocations(), 3);
    assert_eq!(done.load(Ordering::SeqCst), 1);
    let received = bench.received.snapshot();
    assert_eq!(received.len(), 4);
    assert!(received.iter().any(|m| m == "batch done"));
}

#[tokio::test]
async fn cancelled_series_stops_early() {
    let bench = SimBench::new();
    let context = Builder::with_registry(standard_registry(&bench))
        .add_configured(STRING_PRODUCER, &producer_config(), "producer")
        .unwrap()
        .add_type(STRING_CONSUMER, "consumer")
        .unwrap()
        .build();
    context.start().await;

    let fired = Arc::new(AtomicUsize::new(0));
    let listener_fired = fired.clone();
    let producer = context.reference::<ProducerMessage>("producer").unwrap();
    let series = context.scheduler().schedule_with_listener(
        &producer,
        ProducerMessage::Tick,
        Duration::ZERO,
        Repeat::Times {
            count: 3,
            interval: Duration::from_millis(150),
        },
        move |_: &Context| {
            listener_fired.fetch_add(1, Ordering::SeqCst);
        },
    );
    while series.invocations() < 1 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    series.cancel();
    tokio::time::sleep(Duration::from_millis(400)).await;
    context.shutdown().await;

    assert_eq!(series.invocations(), 1);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(bench.received.count(), 1);
}

#[test]
fn definition_with_missing_id_keeps_only_the_valid_unit() {
    let doc = r#"
        <units>
          <unit>
            <type>string-consumer</type>
          </unit>
          <unit id="consumer">
            <type>string-consumer</type>
          </unit>
        </units>"#;
    let context = Builder::with_registry(standard_registry(&SimBench::new()))
        .add_definitions_str(doc)
        .unwrap()
        .build();
    assert_eq!(context.ids(), vec!["consumer".to_string()]);
}

#[tokio::test]
async fn definition_document_builds_a_running_system() {
    let doc = r#"
        <units>
          <unit id="producer">
            <type>string-producer</type>
            <config name="default">
              <value name="target" type="String">consumer</value>
              <value name="prefix" type="String">hello</value>
            </config>
          </unit>
          <unit id="consumer">
            <type>string-consumer</type>
          </unit>
        </units>"#;
    let bench = SimBench::new();
    let context = Builder::with_registry(standard_registry(&bench))
        .add_definitions(doc.as_bytes())
        .unwrap()
        .build();
    assert_eq!(context.unit_state("producer"), Ok(LifecycleState::Initialized));
    assert_eq!(context.unit_state("consumer"), Ok(LifecycleState::Uninitialized));

    context.start().await;
    context
        .reference::<ProducerMessage>("producer")
        .unwrap()
        .send(ProducerMessage::Tick);
    context.shutdown().await;

    let received = bench.received.snapshot();
    assert_eq!(received.len(), 1);
    assert!(received[0].starts_with("hello-"));
}

#[test]
fn unknown_type_in_definition_aborts_the_build() {
    let doc = r#"
        <units>
          <unit id="arm"><type>robot-arm</type></unit>
          <unit id="consumer"><type>string-consumer</type></unit>
        </units>"#;
    let err = Builder::with_registry(standard_registry(&SimBench::new()))
        .add_definitions_str(doc)
        .err()
        .unwrap();
    assert!(matches!(err, BuildError::UnknownType(name) if name == "robot-arm"));
}

#[tokio::test]
async fn one_failed_unit_does_not_block_shutdown() {
    let shut_down = Arc::new(AtomicUsize::new(0));
    let context = Builder::new()
        .add(Faulty {
            id: "arm".to_string(),
            shut_down: shut_down.clone(),
        })
        .unwrap()
        .add(StringConsumer::new("consumer"))
        .unwrap()
        .add_managed({
            let mut producer = Managed::new(StringProducer::new("producer"));
            producer.initialize(&producer_config()).unwrap();
            producer
        })
        .unwrap()
        .build();
    context.start().await;
    assert_eq!(context.unit_state("arm"), Ok(LifecycleState::Failed));
    assert_eq!(context.state(), LifecycleState::Started);

    context.shutdown().await;
    assert_eq!(context.state(), LifecycleState::ShutDown);
    assert_eq!(context.unit_state("arm"), Ok(LifecycleState::Failed));
    assert_eq!(context.unit_state("consumer"), Ok(LifecycleState::ShutDown));
    assert_eq!(context.unit_state("producer"), Ok(LifecycleState::ShutDown));
    assert_eq!(shut_down.load(Ordering::SeqCst), 1);
}

#[test]
fn fresh_context_is_uninitialized() {
    let context = Builder::with_registry(standard_registry(&SimBench::new()))
        .add_type(STRING_CONSUMER, "consumer")
        .unwrap()
        .build();
    assert_eq!(context.state(), LifecycleState::Uninitialized);
}
