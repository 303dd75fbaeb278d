use clap::Parser;
use streamcall_server::config::{ServerConfig, load_dotenv};
use streamcall_server::{ServerError, serve};

#[tokio::main]
async fn main() {
    let env_files = load_dotenv();
    streamcall_core::observability::init_observability();
    for path in &env_files {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    if let Err(e) = run(ServerConfig::parse()).await {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let dispatcher = config.build_dispatcher()?;
    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    tracing::info!(
        %addr,
        producer = dispatcher.producer_id(),
        event_buffer = config.event_buffer,
        "streamcall server listening"
    );
    serve(listener, dispatcher).await
}
