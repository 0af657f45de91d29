#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sandbox_cli::run().await
}
