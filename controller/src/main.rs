mod datalog;
mod host;
mod relay;
mod sensor;
mod weather;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
