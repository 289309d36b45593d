#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = coursework_conversions::run().await {
        eprintln!("coursework-conversions fatal: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}
