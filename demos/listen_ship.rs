use std::error::Error;

use xrvoyage_sdk::client::XrClient;
use xrvoyage_sdk::config::Settings;
use xrvoyage_sdk::logging::init_tracing;
use xrvoyage_sdk::stream::registry::Handler;

fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::global()?.clone();
    init_tracing(&settings.log_level);
    println!("xrvoyage-sdk {}", xrvoyage_sdk::VERSION);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = XrClient::builder()
            .settings(settings)
            .on_ingress(
                ["xr.data.wh1", "xr.data.ps001", "xr.rt.status.ship.crew"],
                Handler::sync(|event| {
                    println!("event type={}", event.event_type);
                    println!("{}", serde_json::to_string_pretty(&event)?);
                    Ok(())
                }),
            )
            .build()?;

        // Runs until Ctrl-C / SIGTERM.
        client.run_until_shutdown().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
