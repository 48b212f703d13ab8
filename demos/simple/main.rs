use std::time::Duration;

use autotune::{ClientConfig, DefaultEnvironment};

#[tokio::main]
pub async fn main() -> autotune::Result<()> {
    env_logger::init();

    let app_key = std::env::var("AUTOTUNE_APP_KEY").unwrap_or_else(|_| "demo-app".to_owned());
    let client = ClientConfig::from_app_key(app_key)
        .environment(DefaultEnvironment::new().with_storage_dir(".autotune"))
        .on_ready(|client| println!("Ready with context {:?}", client.context()))
        .to_client()?;

    // Block waiting for outcomes. Experiments started before this returns explore at random.
    client.wait_for_ready().await;

    let headline = client.experiment("headline", &["Save time", "Save money"]);
    println!(
        "Headline: {:?} (picked best: {})",
        headline.pick(),
        headline.picked_best()
    );

    headline.complete(1.0, Some(Box::new(|| println!("Completion reported"))));

    // Give the batched reports time to go out.
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}
