//! Server-Sent Events example
//!
//! Subscribes to an SSE endpoint twice: once consuming the session as a
//! `Stream`, once through the callback-style listener.
//!
//! To run this example:
//! ```bash
//! export ABEYE_API_BASE="http://localhost:8080"
//! export EVENTS_PATH="/v1/events"  # Optional
//! cargo run --example streaming_sse
//! ```

use std::time::Duration;

use abeye_runtime::{ApiContext, ApiOptions, HttpMethod, StreamEvent};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("abeye_runtime=debug")),
        )
        .init();

    let ctx = ApiContext::from_env()?;
    let path = std::env::var("EVENTS_PATH").unwrap_or_else(|_| "/v1/events".to_owned());
    let options = ApiOptions::new().header("X-Request-ID", "streaming-example")?;

    println!("=== Example 1: Session as a stream ===\n");

    let mut session = ctx.open_stream::<serde_json::Value>(HttpMethod::Get, &path, Some(&options));
    let mut received = 0;
    while let Some(event) = session.next().await {
        match event {
            StreamEvent::Message(message) => {
                received += 1;
                println!("Event #{received}:");
                if let Some(id) = &message.id {
                    println!("  ID: {id}");
                }
                if let Some(name) = &message.event {
                    println!("  Type: {name}");
                }
                match message.json() {
                    Ok(value) => println!("  Data: {value}"),
                    Err(_) => println!("  Data (raw): {}", message.data),
                }
            }
            StreamEvent::Error(err) => println!("Stream error: {err}"),
        }
        if received >= 5 {
            session.cancel();
        }
    }
    println!("\nStream ended after {received} events\n");

    println!("=== Example 2: Callback listener ===\n");

    let listener = ctx
        .open_stream::<serde_json::Value>(HttpMethod::Get, &path, Some(&options))
        .into_listener();
    listener.listen(|event| match event {
        StreamEvent::Message(message) => println!("listener got: {}", message.data),
        StreamEvent::Error(err) => println!("listener error: {err}"),
    });

    tokio::time::sleep(Duration::from_secs(10)).await;
    listener.cancel();
    listener.closed().await;
    println!("\nListener closed");

    Ok(())
}
