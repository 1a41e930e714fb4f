//! Serves a small calculator over RPC.
//!
//! Usage:
//! ```sh
//! cargo run -p patchbay --example calc_server -- 127.0.0.1:9090
//! ```

use std::{env, error::Error};

use patchbay::{EndpointConfig, ParamKind, RpcServer, ServiceDescriptor};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:9090".to_string());

    let server = RpcServer::bind(&addr, EndpointConfig::default()).await?;
    server
        .register(
            ServiceDescriptor::builder("Add")
                .param("num1", ParamKind::Integral)
                .param("num2", ParamKind::Integral)
                .returns(ParamKind::Integral)
                .build(|params| {
                    let a = params.get("num1")?.as_i64()?;
                    let b = params.get("num2")?.as_i64()?;
                    Some(json!(a + b))
                }),
        )
        .await?;
    server
        .register(
            ServiceDescriptor::builder("Div")
                .param("num1", ParamKind::Numeric)
                .param("num2", ParamKind::Numeric)
                .returns(ParamKind::Numeric)
                .build(|params| {
                    let a = params.get("num1")?.as_f64()?;
                    let b = params.get("num2")?.as_f64()?;
                    // Division by zero has no representable result; the
                    // caller sees INTERNAL_ERROR.
                    if b == 0.0 {
                        return None;
                    }
                    Some(json!(a / b))
                }),
        )
        .await?;

    println!("calculator listening on {}", server.local_addr());
    server.serve().await?;
    Ok(())
}
