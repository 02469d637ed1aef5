//! Discover receivers on the local network and report their power state.
//!
//! ```text
//! cargo run --example discover
//! ```

use eiscp::{discover, AsyncReceiver, Translator};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let translator = Translator::builtin()?;
    let receivers = discover(Duration::from_secs(1)).await;

    if receivers.is_empty() {
        println!("No receivers found.");
        return Ok(());
    }

    for mut receiver in receivers {
        println!("{}", receiver);

        match receiver.command(&translator, "main.power=query").await {
            Ok(reply) => println!("  {}", reply),
            Err(e) => println!("  power query failed: {}", e),
        }
        receiver.disconnect().await;

        // Watch status messages for a few seconds while asking for the volume
        let mut watcher = AsyncReceiver::new(receiver, |message| {
            println!("  <- {}", message);
        });
        watcher.connect().await?;

        let volume = translator.command_to_wire("volume query")?;
        match watcher.request_async(volume)?.await {
            Ok(reply) => println!("  {:?}", translator.wire_to_command(&reply)?),
            Err(e) => println!("  volume query failed: {}", e),
        }

        tokio::time::sleep(Duration::from_secs(3)).await;
        watcher.disconnect().await;
    }

    Ok(())
}
