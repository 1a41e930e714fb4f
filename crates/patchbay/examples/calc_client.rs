//! Calls the calculator served by the `calc_server` example, exercising all
//! three call styles.
//!
//! Usage:
//! ```sh
//! cargo run -p patchbay --example calc_client -- 127.0.0.1:9090
//! ```

use std::{env, error::Error};

use patchbay::{ClientConfig, RpcClient};
use serde_json::json;
use tokio::sync::oneshot;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9090".to_string());

    let client = RpcClient::direct(&addr, ClientConfig::default()).await?;

    // Blocking style.
    let sum = client.call("Add", json!({ "num1": 90, "num2": 10 })).await?;
    println!("Add(90, 10) = {sum}");

    // Future style: fire both, then collect.
    let first = client
        .call_future("Add", json!({ "num1": 1, "num2": 2 }))
        .await?;
    let second = client
        .call_future("Div", json!({ "num1": 1.0, "num2": 4.0 }))
        .await?;
    println!("Add(1, 2) = {}", first.result().await?);
    println!("Div(1, 4) = {}", second.result().await?);

    // Callback style.
    let (tx, rx) = oneshot::channel();
    client
        .call_with("Add", json!({ "num1": 20, "num2": 22 }), move |result| {
            let _ = tx.send(result);
        })
        .await?;
    println!("Add(20, 22) = {}", rx.await??);

    // A division by zero is answered, not dropped.
    match client.call("Div", json!({ "num1": 1.0, "num2": 0.0 })).await {
        Ok(result) => println!("Div(1, 0) = {result}"),
        Err(err) => println!("Div(1, 0) failed: {err}"),
    }

    Ok(())
}
