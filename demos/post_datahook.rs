use std::env;
use std::error::Error;

use serde_json::{json, Map, Value};
use xrvoyage_sdk::client::XrClient;
use xrvoyage_sdk::entities::{DataWebhookEvent, Resource};

fn main() -> Result<(), Box<dyn Error>> {
    let webhook_id =
        env::var("WEBHOOK_ID").unwrap_or_else(|_| "REPLACE_WITH_WEBHOOK_ID".to_string());
    let data_guid = env::args().nth(1);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = XrClient::builder().build()?;

        let mut data = Map::new();
        for index in 1..=4 {
            data.insert(format!("key{index}"), Value::String(format!("value{index}")));
        }
        let event = DataWebhookEvent {
            event_type: Some("xr.data.some-data-id2".to_string()),
            data: Some(data),
            ..DataWebhookEvent::default()
        };
        let response = client.data_webhooks().post(&webhook_id, &event).await?;
        println!("webhook response: {response}");

        if let Some(guid) = data_guid {
            let record = client.entities(Resource::Data).get(&guid).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            let updated = client
                .entities(Resource::Data)
                .post(&guid, &json!({ "name": "updated from demo" }))
                .await?;
            println!("updated: {updated}");
        }
        Ok::<(), Box<dyn Error>>(())
    })
}
