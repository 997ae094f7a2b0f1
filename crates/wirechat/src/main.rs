use tracing_subscriber::EnvFilter;
use wirechat::{ChatError, ChatServerBuilder, ServerConfig};
use wirechat_session::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), ChatError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env()?;
    let server = ChatServerBuilder::new()
        .config(config)
        .build(MemoryStore::new())
        .await?;
    server.run().await
}
