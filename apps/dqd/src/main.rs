//! dqd - Entry Point
//!
//! Queue-to-handler dispatcher.

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dqd::run().await
}
