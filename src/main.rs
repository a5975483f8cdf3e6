//! Receipt gateway server binary

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    receipt_gateway::server::run().await
}
