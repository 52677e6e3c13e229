mod api;
mod gateway;
mod host;
mod hvac;
mod mqtt;
mod orchestrator;
mod scheduler;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
