//! Schema-shaped output from several model families.
//!
//! Run with:
//! ```bash
//! export CALLAI_API_KEY="your-api-key"
//! cargo run --example structured
//! ```

use callai::{CallAi, CallOptions, Config, Schema};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let client = CallAi::new(Config::load())?;

    let schema: Schema = serde_json::from_value(json!({
        "name": "book_recommendation",
        "properties": {
            "title": {"type": "string", "description": "Book title"},
            "author": {"type": "string"},
            "year": {"type": "number", "description": "Year of publication"},
            "genres": {"type": "array", "items": {"type": "string"}}
        }
    }))?;

    let models = [
        "openai/gpt-4o",
        "anthropic/claude-3.5-sonnet",
        "google/gemini-2.0-flash-001",
        "meta-llama/llama-3.3-70b-instruct",
    ];

    for model in models {
        let options = CallOptions::new()
            .with_model(model)
            .with_schema(schema.clone());

        match client.call("Recommend one science fiction novel.", &options).await {
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(book) => println!("{model}: {book:#}"),
                Err(_) => println!("{model} (unparsed): {text}"),
            },
            Err(e) => eprintln!("{model} failed: {e}"),
        }
    }

    Ok(())
}
