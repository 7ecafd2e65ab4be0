use common::amqp::{
    AmqpClient, AmqpResult, BrokerMessage, MockAmqpChannel, QueueInfo, RawConsumer,
};
use common::domain::{
    DomainError, Lecture, LectureFetchOptions, LecturePhoto, LectureStore, PeopleCountingItem,
};
use futures::channel::mpsc as stream_channel;
use futures::StreamExt;
use people_counting::{InMemoryLectureStore, PeopleCounting, PeopleCountingConfig};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type DeliverySender = stream_channel::UnboundedSender<AmqpResult<BrokerMessage>>;

/// Broker stand-in: deliveries are pushed by the test, publishes and acks are recorded
struct FakeBroker {
    deliveries: Arc<Mutex<Option<DeliverySender>>>,
    acks: mpsc::UnboundedReceiver<u64>,
    published: mpsc::UnboundedReceiver<(String, String, serde_json::Value)>,
}

impl FakeBroker {
    fn deliver(&self, delivery_tag: u64, payload: serde_json::Value) {
        let message = BrokerMessage::new(
            serde_json::to_vec(&payload).unwrap(),
            "pcount-replay-queue",
            delivery_tag,
        );
        self.deliveries
            .lock()
            .unwrap()
            .as_ref()
            .expect("consumer already cancelled")
            .unbounded_send(Ok(message))
            .unwrap();
    }

    async fn next_ack(&mut self) -> u64 {
        timeout(Duration::from_secs(5), self.acks.recv())
            .await
            .expect("timed out waiting for ack")
            .expect("ack channel closed")
    }
}

fn fake_broker() -> (MockAmqpChannel, FakeBroker) {
    let (delivery_tx, delivery_rx) = stream_channel::unbounded();
    let (ack_tx, ack_rx) = mpsc::unbounded_channel();
    let (published_tx, published_rx) = mpsc::unbounded_channel();
    let deliveries = Arc::new(Mutex::new(Some(delivery_tx)));

    let mut mock_channel = MockAmqpChannel::new();
    mock_channel
        .expect_assert_exchange()
        .returning(|_, _| Ok(()));
    mock_channel.expect_assert_queue().returning(|name, _| {
        Ok(QueueInfo {
            name: name.to_string(),
            message_count: 0,
            consumer_count: 0,
        })
    });
    mock_channel.expect_bind_queue().returning(|_, _, _| Ok(()));
    mock_channel
        .expect_consume()
        .times(1)
        .return_once(move |queue, _| {
            Ok(RawConsumer {
                consumer_tag: format!("{}.consumer-0", queue),
                deliveries: delivery_rx.boxed(),
            })
        });
    mock_channel
        .expect_publish()
        .returning(move |exchange, routing_key, payload, _| {
            let body = serde_json::from_slice(&payload).unwrap();
            let _ = published_tx.send((exchange.to_string(), routing_key.to_string(), body));
            Ok(())
        });
    mock_channel.expect_ack().returning(move |delivery_tag, _| {
        let _ = ack_tx.send(delivery_tag);
        Ok(())
    });
    let cancelled = Arc::clone(&deliveries);
    mock_channel.expect_cancel().returning(move |_| {
        // the broker ends the delivery stream once the cancel is confirmed
        cancelled.lock().unwrap().take();
        Ok(())
    });

    (
        mock_channel,
        FakeBroker {
            deliveries,
            acks: ack_rx,
            published: published_rx,
        },
    )
}

async fn seeded_store() -> Arc<InMemoryLectureStore> {
    let store = Arc::new(InMemoryLectureStore::new());
    store
        .upsert(Lecture {
            id: "L".to_string(),
            title: "Distributed systems".to_string(),
            description: "queues".to_string(),
            photos: Some(vec![
                LecturePhoto {
                    id: "p1".to_string(),
                    url: "https://images.local/p1".to_string(),
                },
                LecturePhoto {
                    id: "p2".to_string(),
                    url: "https://images.local/p2".to_string(),
                },
            ]),
            people_counting_items: None,
        })
        .await;
    store
}

async fn counting_state(store: &InMemoryLectureStore) -> Vec<PeopleCountingItem> {
    let mut items = store
        .get_one_by("L", LectureFetchOptions::with_photos_and_counting())
        .await
        .unwrap()
        .unwrap()
        .people_counting_items
        .unwrap();
    items.sort_by(|a, b| a.image_id.cmp(&b.image_id));
    items
}

async fn start() -> (PeopleCounting, FakeBroker, Arc<InMemoryLectureStore>) {
    let (mock_channel, broker) = fake_broker();
    let store = seeded_store().await;
    let client = Arc::new(AmqpClient::new(Arc::new(mock_channel)));
    let module = PeopleCounting::new(store.clone(), client, PeopleCountingConfig::default())
        .await
        .unwrap();
    (module, broker, store)
}

fn result(items: serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "lectureId": "L", "peopleCountingItems": items })
}

#[tokio::test]
async fn test_request_is_published_with_resolved_photos() {
    let (module, mut broker, _store) = start().await;

    module
        .service()
        .send_photos_to_be_processed("L", &["p1".to_string()])
        .await
        .unwrap();

    let (exchange, routing_key, body) = broker.published.recv().await.unwrap();
    assert_eq!(exchange, "pcount-exchange");
    assert_eq!(routing_key, "pcount-request");
    assert_eq!(
        body,
        serde_json::json!({
            "lectureId": "L",
            "photos": [{ "id": "p1", "url": "https://images.local/p1" }]
        })
    );
}

#[tokio::test]
async fn test_request_for_unknown_photo_publishes_nothing() {
    let (module, mut broker, _store) = start().await;

    let err = module
        .service()
        .send_photos_to_be_processed("L", &["p1".to_string(), "p9".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, DomainError::LecturePhotoNotFound(_)));
    assert!(broker.published.try_recv().is_err());
}

#[tokio::test]
async fn test_valid_result_is_applied_and_acked() {
    let (_module, mut broker, store) = start().await;

    broker.deliver(1, result(serde_json::json!([{ "imageId": "p1", "numberOfPeople": 10 }])));

    assert_eq!(broker.next_ack().await, 1);
    assert_eq!(
        counting_state(&store).await,
        vec![PeopleCountingItem::new("p1", 10)]
    );
}

#[tokio::test]
async fn test_later_result_overwrites_counts() {
    let (_module, mut broker, store) = start().await;

    broker.deliver(1, result(serde_json::json!([{ "imageId": "p1", "numberOfPeople": 10 }])));
    broker.deliver(
        2,
        result(serde_json::json!([
            { "imageId": "p1", "numberOfPeople": 1000 },
            { "imageId": "p2", "numberOfPeople": 20 }
        ])),
    );

    assert_eq!(broker.next_ack().await, 1);
    assert_eq!(broker.next_ack().await, 2);
    assert_eq!(
        counting_state(&store).await,
        vec![
            PeopleCountingItem::new("p1", 1000),
            PeopleCountingItem::new("p2", 20)
        ]
    );
}

#[tokio::test]
async fn test_redelivered_result_is_idempotent() {
    let (_module, mut broker, store) = start().await;
    let batch = result(serde_json::json!([
        { "imageId": "p1", "numberOfPeople": 7 },
        { "imageId": "p2", "numberOfPeople": 3 }
    ]));

    broker.deliver(1, batch.clone());
    assert_eq!(broker.next_ack().await, 1);
    let first = counting_state(&store).await;

    broker.deliver(2, batch);
    assert_eq!(broker.next_ack().await, 2);

    assert_eq!(counting_state(&store).await, first);
}

#[tokio::test]
async fn test_result_with_foreign_image_is_not_applied_or_acked() {
    let (_module, mut broker, store) = start().await;

    broker.deliver(
        1,
        result(serde_json::json!([
            { "imageId": "p1", "numberOfPeople": 4 },
            { "imageId": "p9", "numberOfPeople": 2 }
        ])),
    );
    broker.deliver(2, serde_json::json!({ "unexpected": true }));
    broker.deliver(3, result(serde_json::json!([{ "imageId": "p2", "numberOfPeople": 6 }])));

    // deliveries 1 and 2 stay unacked; the first ack seen is for 3
    assert_eq!(broker.next_ack().await, 3);
    assert_eq!(
        counting_state(&store).await,
        vec![PeopleCountingItem::new("p2", 6)]
    );
}

#[tokio::test]
async fn test_runner_process_cancels_consumer_on_shutdown() {
    let (module, broker, _store) = start().await;
    let process = module.into_runner_process();
    let token = CancellationToken::new();

    let handle = tokio::spawn(process(token.clone()));
    token.cancel();

    let outcome = timeout(Duration::from_secs(5), handle)
        .await
        .expect("process did not stop")
        .unwrap();
    assert!(outcome.is_ok());
    assert!(broker.deliveries.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_runner_process_fails_when_consumer_stops() {
    let (module, broker, _store) = start().await;
    let process = module.into_runner_process();

    broker.deliveries.lock().unwrap().take();
    let outcome = timeout(Duration::from_secs(5), process(CancellationToken::new()))
        .await
        .expect("process did not stop");

    assert!(outcome.is_err());
}
