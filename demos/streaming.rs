//! Streaming text completion.
//!
//! Run with:
//! ```bash
//! export CALLAI_API_KEY="your-api-key"
//! RUST_LOG=callai=debug cargo run --example streaming
//! ```

use callai::{CallAi, CallOptions, Config, StreamChunk};
use futures::StreamExt;
use std::io::Write;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let client = CallAi::new(Config::load())?;
    let options = CallOptions::new()
        .with_model("openai/gpt-4o-mini")
        .with_temperature(0.9)
        .with_stream(true);

    println!("Streaming response...\n");

    let mut chunks = client
        .call_stream("Write a haiku about Rust programming.", &options)
        .await?;

    // partials are cumulative, print only what is new
    let mut printed = 0;
    while let Some(chunk) = chunks.next().await {
        match chunk? {
            StreamChunk::Partial(text) => {
                if let Some(new) = text.get(printed..) {
                    print!("{new}");
                    std::io::stdout().flush()?;
                }
                printed = text.len();
            }
            StreamChunk::Final(text) => {
                println!("\n\n---");
                if let Some(meta) = client.response_meta(&text) {
                    println!("model: {}", meta.model);
                    println!("took: {:?}", meta.timing.duration);
                }
            }
        }
    }

    Ok(())
}
