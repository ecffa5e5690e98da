use std::error::Error;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde_json::{json, Map, Value};
use xrvoyage_sdk::client::XrClient;
use xrvoyage_sdk::egress::Emitter;
use xrvoyage_sdk::logging::init_tracing;
use xrvoyage_sdk::stream::registry::{Handler, HandlerError};

const QUIZ_THEME: &str = "xr.data.vr-quiz-theme";
const QUIZ_DATA: &str = "xr.data.vr-quiz-data";

static EMITTER: OnceCell<Emitter> = OnceCell::new();

fn theme_args(input: Value) -> Result<Map<String, Value>, HandlerError> {
    let theme = input.as_str().ok_or("theme must be a string")?;
    let mut args = Map::new();
    args.insert("theme".to_string(), Value::String(theme.to_string()));
    Ok(args)
}

fn main() -> Result<(), Box<dyn Error>> {
    init_tracing("info");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = XrClient::builder()
            .on_egress(QUIZ_THEME, theme_args)
            // Reply to every quiz answer with a new theme.
            .on_ingress(
                QUIZ_DATA,
                Handler::asynchronous(|event| async move {
                    println!("quiz data: {}", Value::Object(event.args));
                    if let Some(emitter) = EMITTER.get() {
                        let response = emitter.emit(QUIZ_THEME, json!("pirates")).await?;
                        println!("theme published: {response}");
                    }
                    Ok::<(), HandlerError>(())
                }),
            )
            .build()?;
        let _ = EMITTER.set(client.emitter());

        client.connect().await?;
        let response = client.emit(QUIZ_THEME, json!("mickey mouse")).await?;
        println!("theme published: {response}");

        tokio::time::sleep(Duration::from_secs(60)).await;
        client.destroy();
        client.wait().await?;
        Ok::<(), Box<dyn Error>>(())
    })
}
