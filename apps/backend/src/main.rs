#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kobo_highlights_backend::run().await
}
