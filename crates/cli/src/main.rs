use anyhow::Result;
use kope_ops::OperatorRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    let mut registry = OperatorRegistry::new();
    kopectl::demo::register(&mut registry);
    kopectl::run(registry).await
}
