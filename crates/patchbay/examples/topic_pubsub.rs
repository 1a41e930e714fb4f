//! Publishes a handful of messages through an in-process broker to two
//! subscribers.
//!
//! Usage:
//! ```sh
//! cargo run -p patchbay --example topic_pubsub
//! ```

use std::{error::Error, time::Duration};

use patchbay::{ClientConfig, EndpointConfig, TopicClient, TopicServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let broker = TopicServer::bind("127.0.0.1:0", EndpointConfig::default()).await?;
    let broker_addr = broker.local_addr().to_string();
    tokio::spawn(broker.serve());
    println!("broker on {broker_addr}");

    let publisher = TopicClient::connect(&broker_addr, ClientConfig::default()).await?;
    publisher.create("hello").await?;

    let mut subscribers = Vec::new();
    for name in ["x", "y"] {
        let subscriber = TopicClient::connect(&broker_addr, ClientConfig::default()).await?;
        subscriber
            .subscribe("hello", move |topic, payload| {
                println!("[{name}] {topic}: {payload}");
            })
            .await?;
        subscribers.push(subscriber);
    }

    for i in 0..5 {
        publisher.publish("hello", &format!("world{i}")).await?;
    }

    // Let the pushes drain before the process exits.
    tokio::time::sleep(Duration::from_millis(500)).await;
    Ok(())
}
