//! CRUD wrappers for the REST entity resources.
//!
//! Every resource shares the same routes:
//! `PUT /{resource}`, `GET|POST|DELETE /{resource}/{guid}`.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::{ApiClient, ApiError};

/// REST entity collections.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Resource {
    Data,
    Panel,
    Plugin,
    Ship,
    Planet,
}

impl Resource {
    pub const ALL: [Resource; 5] = [
        Resource::Data,
        Resource::Panel,
        Resource::Plugin,
        Resource::Ship,
        Resource::Planet,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Panel => "panel",
            Self::Plugin => "plugin",
            Self::Ship => "ship",
            Self::Planet => "planet",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle on one entity collection.
#[derive(Clone, Debug)]
pub struct Entities {
    api: ApiClient,
    resource: Resource,
}

impl Entities {
    pub fn new(api: ApiClient, resource: Resource) -> Self {
        Self { api, resource }
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    /// `PUT /{resource}`
    pub async fn put<T>(&self, body: &T) -> Result<Value, ApiError>
    where
        T: Serialize + ?Sized,
    {
        self.api.put(self.resource.as_str(), body).await
    }

    /// `GET /{resource}/{guid}`
    pub async fn get(&self, guid: &str) -> Result<Value, ApiError> {
        self.api.get(&self.item_path(guid)).await
    }

    /// `POST /{resource}/{guid}`
    pub async fn post<T>(&self, guid: &str, body: &T) -> Result<Value, ApiError>
    where
        T: Serialize + ?Sized,
    {
        self.api.post(&self.item_path(guid), body).await
    }

    /// `DELETE /{resource}/{guid}`
    pub async fn delete(&self, guid: &str) -> Result<Value, ApiError> {
        self.api.delete(&self.item_path(guid)).await
    }

    fn item_path(&self, guid: &str) -> String {
        format!("{}/{}", self.resource.as_str(), guid)
    }
}

/// Data webhook delivery, `POST /data/webhook/{webhook_id}`.
#[derive(Clone, Debug)]
pub struct DataWebhooks {
    api: ApiClient,
}

impl DataWebhooks {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub async fn post(
        &self,
        webhook_id: &str,
        event: &DataWebhookEvent,
    ) -> Result<Value, ApiError> {
        self.api
            .post(&format!("data/webhook/{webhook_id}"), event)
            .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataMetadata {
    pub solarsystem_guid: String,
    pub solarsystem_name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataObject {
    pub metadata: DataMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataModel {
    pub object: DataObject,
    pub response: Map<String, Value>,
}

/// Body of a data `PUT` / `POST`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PutDataRequest {
    pub name: String,
    pub data: DataModel,
}

/// Payload delivered to a data webhook.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataWebhookEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    /// ISO-8601 timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Plugin source file, stored base64-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl PluginObject {
    /// Decodes `file` as UTF-8 text. `Ok(None)` when no file is set.
    pub fn file_content(&self) -> Result<Option<String>, PluginFileError> {
        let Some(file) = self.file.as_deref() else {
            return Ok(None);
        };
        let bytes = STANDARD.decode(file)?;
        Ok(Some(String::from_utf8(bytes)?))
    }

    pub fn set_file_content(&mut self, content: &str) {
        self.file = Some(STANDARD.encode(content.as_bytes()));
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PluginFileError {
    #[error("plugin file is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("plugin file is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PluginData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<PluginObject>,
}

/// Plugin entity as returned by `GET /plugin/{guid}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginEvent {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<PluginData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_utc: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{DataWebhookEvent, PluginEvent, PluginObject, PutDataRequest, Resource};

    #[test]
    fn resource_names_match_routes() {
        let names: Vec<&str> = Resource::ALL.iter().map(|r| r.as_str()).collect();
        assert_eq!(names, vec!["data", "panel", "plugin", "ship", "planet"]);
    }

    #[test]
    fn plugin_file_content_is_base64_text() {
        let mut object = PluginObject::default();
        assert_eq!(object.file_content().expect("empty"), None);

        object.set_file_content("print('hello')");
        assert_eq!(object.file.as_deref(), Some("cHJpbnQoJ2hlbGxvJyk="));
        assert_eq!(
            object.file_content().expect("decode").as_deref(),
            Some("print('hello')")
        );

        object.file = Some("%%%".to_string());
        assert!(object.file_content().is_err());
    }

    #[test]
    fn plugin_event_decodes_camel_case_data() {
        let plugin: PluginEvent = serde_json::from_value(json!({
            "_id": "65f0",
            "name": "graph",
            "data": {"apiVersion": "v1", "fileLanguage": "python", "object": {"file": "eA=="}}
        }))
        .expect("decode");

        assert_eq!(plugin.id.as_deref(), Some("65f0"));
        let data = plugin.data.expect("data");
        assert_eq!(data.api_version.as_deref(), Some("v1"));
        assert_eq!(
            data.object.expect("object").file_content().expect("decode").as_deref(),
            Some("x")
        );
    }

    #[test]
    fn webhook_event_encoding_is_sparse() {
        let event = DataWebhookEvent {
            event_type: Some("xr.data.wh1".to_string()),
            ..DataWebhookEvent::default()
        };
        assert_eq!(
            serde_json::to_value(&event).expect("encode"),
            json!({"event_type": "xr.data.wh1"})
        );
    }

    #[test]
    fn put_data_request_uses_type_key_for_metadata() {
        let request: PutDataRequest = serde_json::from_value(json!({
            "name": "quiz",
            "data": {
                "object": {"metadata": {
                    "solarsystem_guid": "S1",
                    "solarsystem_name": "sol",
                    "type": "quiz"
                }},
                "response": {"score": 3}
            }
        }))
        .expect("decode");
        assert_eq!(request.data.object.metadata.data_type, "quiz");
        assert_eq!(request.data.response["score"], 3);
    }
}
