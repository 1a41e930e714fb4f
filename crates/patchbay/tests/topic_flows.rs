//! Publish/subscribe flows against a live broker: fan-out, topic lifecycle,
//! cancellation, and subscriber disconnect.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use patchbay::{ClientConfig, EndpointConfig, ResponseCode, TopicClient, TopicServer};

type Log = Arc<Mutex<Vec<(String, String)>>>;

async fn start_broker() -> String {
    let broker = TopicServer::bind("127.0.0.1:0", EndpointConfig::default())
        .await
        .unwrap();
    let addr = broker.local_addr().to_string();
    tokio::spawn(broker.serve());
    addr
}

async fn subscriber(addr: &str, key: &str) -> (TopicClient, Log) {
    let client = TopicClient::connect(addr, ClientConfig::default())
        .await
        .unwrap();
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    client
        .subscribe(key, move |topic, payload| {
            sink.lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
        })
        .await
        .unwrap();
    (client, log)
}

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..250 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn publish_fans_out_to_every_subscriber_in_order() {
    let addr = start_broker().await;

    let publisher = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();
    publisher.create("hello").await.unwrap();

    let (_x, x_log) = subscriber(&addr, "hello").await;
    let (_y, y_log) = subscriber(&addr, "hello").await;

    for i in 0..5 {
        publisher
            .publish("hello", &format!("world{i}"))
            .await
            .unwrap();
    }

    wait_for("both subscribers to receive five messages", || {
        x_log.lock().unwrap().len() == 5 && y_log.lock().unwrap().len() == 5
    })
    .await;

    let expected: Vec<(String, String)> = (0..5)
        .map(|i| ("hello".to_string(), format!("world{i}")))
        .collect();
    assert_eq!(*x_log.lock().unwrap(), expected);
    assert_eq!(*y_log.lock().unwrap(), expected);
}

#[tokio::test]
async fn subscribing_to_a_missing_topic_fails_and_rolls_back() {
    let addr = start_broker().await;
    let client = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let err = client
        .subscribe("ghost", move |topic, payload| {
            sink.lock()
                .unwrap()
                .push((topic.to_string(), payload.to_string()));
        })
        .await
        .unwrap_err();
    assert_eq!(err.response_code(), Some(ResponseCode::NotFoundTopic));

    // The callback was rolled back: even after the topic exists and traffic
    // flows, this client must stay silent.
    let publisher = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();
    publisher.create("ghost").await.unwrap();
    publisher.publish("ghost", "boo").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn publishing_to_a_missing_topic_fails() {
    let addr = start_broker().await;
    let client = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();

    let err = client.publish("nowhere", "msg").await.unwrap_err();
    assert_eq!(err.response_code(), Some(ResponseCode::NotFoundTopic));
}

#[tokio::test]
async fn create_and_remove_are_idempotent() {
    let addr = start_broker().await;
    let client = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();

    client.create("t").await.unwrap();
    client.create("t").await.unwrap();
    client.remove("t").await.unwrap();
    // Removing an absent topic still answers OK.
    client.remove("t").await.unwrap();

    let err = client.publish("t", "late").await.unwrap_err();
    assert_eq!(err.response_code(), Some(ResponseCode::NotFoundTopic));
}

#[tokio::test]
async fn cancel_stops_delivery_for_that_subscriber_only() {
    let addr = start_broker().await;
    let publisher = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();
    publisher.create("news").await.unwrap();

    let (x, x_log) = subscriber(&addr, "news").await;
    let (_y, y_log) = subscriber(&addr, "news").await;

    publisher.publish("news", "first").await.unwrap();
    wait_for("first delivery", || {
        x_log.lock().unwrap().len() == 1 && y_log.lock().unwrap().len() == 1
    })
    .await;

    x.cancel("news").await.unwrap();
    publisher.publish("news", "second").await.unwrap();
    wait_for("second delivery to y", || y_log.lock().unwrap().len() == 2).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(x_log.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn removing_a_topic_detaches_its_subscribers() {
    let addr = start_broker().await;
    let publisher = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();
    publisher.create("ephemeral").await.unwrap();

    let (_x, x_log) = subscriber(&addr, "ephemeral").await;
    publisher.remove("ephemeral").await.unwrap();

    let err = publisher.publish("ephemeral", "gone").await.unwrap_err();
    assert_eq!(err.response_code(), Some(ResponseCode::NotFoundTopic));

    // Re-creating the topic does not resurrect the old subscription.
    publisher.create("ephemeral").await.unwrap();
    publisher.publish("ephemeral", "again").await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(x_log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn subscriber_disconnect_leaves_the_rest_of_the_fanout_intact() {
    let addr = start_broker().await;
    let publisher = TopicClient::connect(&addr, ClientConfig::default())
        .await
        .unwrap();
    publisher.create("mixed").await.unwrap();

    let (x, x_log) = subscriber(&addr, "mixed").await;
    let (_y, y_log) = subscriber(&addr, "mixed").await;

    publisher.publish("mixed", "one").await.unwrap();
    wait_for("initial delivery", || {
        x_log.lock().unwrap().len() == 1 && y_log.lock().unwrap().len() == 1
    })
    .await;

    x.shutdown();
    // Give the broker time to observe the close.
    tokio::time::sleep(Duration::from_millis(200)).await;

    publisher.publish("mixed", "two").await.unwrap();
    wait_for("post-disconnect delivery to y", || {
        y_log.lock().unwrap().len() == 2
    })
    .await;
    assert_eq!(x_log.lock().unwrap().len(), 1);
}
