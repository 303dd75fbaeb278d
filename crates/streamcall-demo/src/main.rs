//! Issues one single-mode call and one incremental call against the same
//! server and reports when each produced its first output.
//!
//! Without `--url` an embedded server backed by the scripted producer is
//! started on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt as _;
use streamcall_client::{ClientConfig, ClientError, StreamCallClient};
use streamcall_core::{Dispatcher, ScriptedProducer};

#[derive(Parser, Debug)]
#[command(name = "streamcall-demo", about = "Compare single and incremental delivery")]
struct Args {
    /// Base URL of a running server. Starts an embedded one when omitted.
    #[arg(long, env = "STREAMCALL_URL")]
    url: Option<String>,

    /// Text to send to the producer.
    #[arg(long, default_value = "The server is down.")]
    prompt: String,

    /// Delay between scripted fragments of the embedded server.
    #[arg(long, default_value_t = 400)]
    fragment_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    streamcall_core::observability::init_observability_with_default("warn");
    let args = Args::parse();

    let base_url = match &args.url {
        Some(url) => url.clone(),
        None => {
            let producer = ScriptedProducer::default()
                .fragment_delay(Duration::from_millis(args.fragment_delay_ms));
            let (addr, _server) =
                streamcall_server::spawn_local(Dispatcher::new(Arc::new(producer))).await?;
            format!("http://{addr}")
        }
    };
    println!("=== streamcall demo against {base_url} ===\n");

    let client = StreamCallClient::new(ClientConfig::new(base_url))?;
    tracing::debug!(prompt = %args.prompt, "issuing single and incremental calls");
    let (single, incremental) = tokio::join!(
        run_single(&client, &args.prompt),
        run_incremental(&client, &args.prompt)
    );

    println!();
    report("single", single);
    report("incremental", incremental);
    Ok(())
}

struct Outcome {
    completion: Result<String, ClientError>,
    first_output: Option<Duration>,
    elapsed: Duration,
}

async fn run_single(client: &StreamCallClient, prompt: &str) -> Result<Outcome, ClientError> {
    let pending = client.invoke(prompt)?;
    tracing::debug!(call_id = %pending.call_id(), mode = pending.mode().as_str(), "call issued");
    let timer = pending.timer();
    let completion = pending.await;
    if let Ok(text) = &completion {
        println!("[single      +{:>5}ms] {text}", timer.elapsed().as_millis());
    }
    Ok(Outcome {
        completion,
        first_output: timer.first_output(),
        elapsed: timer.elapsed(),
    })
}

async fn run_incremental(client: &StreamCallClient, prompt: &str) -> Result<Outcome, ClientError> {
    let call = client.invoke_streaming(prompt)?;
    tracing::debug!(
        call_id = %call.completion.call_id(),
        mode = call.completion.mode().as_str(),
        "call issued"
    );
    let timer = call.completion.timer();
    let (mut fragments, completion) = call.into_parts();
    while let Some(fragment) = fragments.next().await {
        println!(
            "[incremental +{:>5}ms] {}",
            timer.elapsed().as_millis(),
            fragment.partial
        );
    }
    let completion = completion.await;
    if let Ok(text) = &completion {
        println!("[incremental +{:>5}ms] {text}", timer.elapsed().as_millis());
    }
    Ok(Outcome {
        completion,
        first_output: timer.first_output(),
        elapsed: timer.elapsed(),
    })
}

fn report(label: &str, outcome: Result<Outcome, ClientError>) {
    match outcome {
        Ok(Outcome {
            completion,
            first_output,
            elapsed,
        }) => {
            let first = first_output
                .map(|d| format!("{}ms", d.as_millis()))
                .unwrap_or_else(|| "-".into());
            let status = match completion {
                Ok(_) => "ok".to_string(),
                Err(e) => format!("failed: {e}"),
            };
            println!(
                "{label:<12} first output {first:>7}, total {:>5}ms, {status}",
                elapsed.as_millis()
            );
        }
        Err(e) => println!("{label:<12} not issued: {e}"),
    }
}
