// This file is an example of how to use the `point_stacker` library.
// It reads a JSON stack request (source CRS, output window, configuration and
// the features themselves), stacks it and prints the records as JSON.

use futures::stream;
use point_stacker::pipeline::{Crs, Feature, OutputWindow, PointStacker, StackerConfig};
use point_stacker::{StackError, StackResult};
use serde::Deserialize;
use std::env;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StackRequest {
    source_crs: Crs,
    window: OutputWindow,
    #[serde(default)]
    config: StackerConfig,
    features: Vec<Feature>,
}

#[tokio::main]
async fn main() -> StackResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: point_stacker <stack_request.json>");
        return Ok(());
    }

    let raw = tokio::fs::read_to_string(&args[1]).await?;
    let request: StackRequest = serde_json::from_str(&raw)?;
    let stacker = PointStacker::new(request.config)?;

    let features = stream::iter(request.features.into_iter().map(Ok::<_, StackError>));
    let collection = stacker
        .execute_stream(features, &request.source_crs, &request.window)
        .await?;

    println!("{}", serde_json::to_string_pretty(collection.records())?);
    Ok(())
}
