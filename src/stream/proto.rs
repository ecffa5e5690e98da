use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Client session info attached to events emitted from a browser/headset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientInfo {
    pub session: String,
    pub timestamp_utc: String,
}

/// A single platform event.
///
/// Only `type` is required on the wire. Unset optional fields are omitted
/// when encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Event {
    #[serde(rename = "type", deserialize_with = "non_empty_event_type")]
    pub event_type: String,
    #[serde(default, deserialize_with = "null_as_empty_map")]
    pub args: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_guid: Option<String>,
    /// Ship the event is routed to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ship_guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    /// Absent for events that are not persisted server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_utc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            event_type: event_type.into(),
            args,
            ..Self::default()
        }
    }

    pub fn with_project_guid(mut self, project_guid: impl Into<String>) -> Self {
        self.project_guid = Some(project_guid.into());
        self
    }

    pub fn with_ship_guid(mut self, ship_guid: impl Into<String>) -> Self {
        self.ship_guid = Some(ship_guid.into());
        self
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Channel keys of an [`EventBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// `xr.rt`
    RealTime,
    /// `xr.data`
    Data,
    /// `xr.nrt`
    NearRealTime,
}

impl Channel {
    /// Dispatch order used for events within one frame.
    pub const ALL: [Channel; 3] = [Channel::RealTime, Channel::Data, Channel::NearRealTime];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RealTime => "xr.rt",
            Self::Data => "xr.data",
            Self::NearRealTime => "xr.nrt",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "xr.rt" => Some(Self::RealTime),
            "xr.data" => Some(Self::Data),
            "xr.nrt" => Some(Self::NearRealTime),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire envelope grouping events by channel.
///
/// Each channel value may be a list of events or a single event object on the
/// wire; both decode to a list. Absent or `null` channels decode to an empty
/// list and empty channels are omitted when encoding. Unknown top-level keys
/// are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventBatch {
    #[serde(
        rename = "xr.rt",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub xr_rt: Vec<Event>,
    #[serde(
        rename = "xr.data",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub xr_data: Vec<Event>,
    #[serde(
        rename = "xr.nrt",
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub xr_nrt: Vec<Event>,
}

impl EventBatch {
    /// Builds a batch holding one event on one channel.
    pub fn single(channel: Channel, event: Event) -> Self {
        let mut batch = Self::default();
        batch.push(channel, event);
        batch
    }

    pub fn push(&mut self, channel: Channel, event: Event) {
        self.channel_mut(channel).push(event);
    }

    pub fn channel(&self, channel: Channel) -> &[Event] {
        match channel {
            Channel::RealTime => &self.xr_rt,
            Channel::Data => &self.xr_data,
            Channel::NearRealTime => &self.xr_nrt,
        }
    }

    fn channel_mut(&mut self, channel: Channel) -> &mut Vec<Event> {
        match channel {
            Channel::RealTime => &mut self.xr_rt,
            Channel::Data => &mut self.xr_data,
            Channel::NearRealTime => &mut self.xr_nrt,
        }
    }

    pub fn len(&self) -> usize {
        self.xr_rt.len() + self.xr_data.len() + self.xr_nrt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consumes the batch, yielding events in dispatch order.
    pub fn into_events(self) -> impl Iterator<Item = (Channel, Event)> {
        let Self {
            xr_rt,
            xr_data,
            xr_nrt,
        } = self;
        xr_rt
            .into_iter()
            .map(|event| (Channel::RealTime, event))
            .chain(xr_data.into_iter().map(|event| (Channel::Data, event)))
            .chain(xr_nrt.into_iter().map(|event| (Channel::NearRealTime, event)))
    }

    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Event>),
    One(Box<Event>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<Event>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        Some(OneOrMany::Many(events)) => events,
        Some(OneOrMany::One(event)) => vec![*event],
        None => Vec::new(),
    })
}

fn non_empty_event_type<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let event_type = String::deserialize(deserializer)?;
    if event_type.trim().is_empty() {
        return Err(serde::de::Error::custom("event type must not be empty"));
    }
    Ok(event_type)
}

fn null_as_empty_map<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn list_channel_decodes_in_order() {
        let batch = EventBatch::from_text(
            r#"{"xr.data":[{"type":"xr.data.wh1","args":{"key1":"value1"}},{"type":"xr.data.ps001","args":{}}]}"#,
        )
        .expect("decode");

        assert_eq!(batch.xr_data.len(), 2);
        assert_eq!(batch.xr_data[0].event_type, "xr.data.wh1");
        assert_eq!(batch.xr_data[0].args, args(json!({"key1": "value1"})));
        assert_eq!(batch.xr_data[1].event_type, "xr.data.ps001");
        assert!(batch.xr_rt.is_empty());
        assert!(batch.xr_nrt.is_empty());
    }

    #[test]
    fn single_object_channel_decodes_to_one_event() {
        let batch =
            EventBatch::from_text(r#"{"xr.rt":{"type":"xr.rt.status.ship.crew","args":{}}}"#)
                .expect("decode");
        assert_eq!(batch.xr_rt.len(), 1);
        assert_eq!(batch.xr_rt[0].event_type, "xr.rt.status.ship.crew");
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn unknown_keys_and_null_channels_are_tolerated() {
        let batch = EventBatch::from_text(
            r#"{"xr.nrt":null,"xr.future":[{"type":"x"}],"xr.data":[{"type":"xr.data.a"}]}"#,
        )
        .expect("decode");
        assert!(batch.xr_nrt.is_empty());
        assert_eq!(batch.xr_data.len(), 1);
        assert!(batch.xr_data[0].args.is_empty());
    }

    #[test]
    fn event_without_type_is_rejected() {
        assert!(EventBatch::from_text(r#"{"xr.data":[{"args":{}}]}"#).is_err());
    }

    #[test]
    fn event_with_empty_type_is_rejected() {
        assert!(Event::from_text(r#"{"type":"","args":{}}"#).is_err());
        assert!(EventBatch::from_text(r#"{"xr.rt":{"type":"  "}}"#).is_err());
    }

    #[test]
    fn encoding_is_sparse_and_uses_dotted_channel_names() {
        let event = Event::new("xr.data.vr-quiz-theme", args(json!({"theme": "mickey mouse"})))
            .with_project_guid("A895570833F0429A98940C079555AE51");
        let batch = EventBatch::single(Channel::Data, event);

        let value = serde_json::to_value(&batch).expect("encode");
        assert_eq!(
            value,
            json!({
                "xr.data": [{
                    "project_guid": "A895570833F0429A98940C079555AE51",
                    "type": "xr.data.vr-quiz-theme",
                    "args": {"theme": "mickey mouse"}
                }]
            })
        );
    }

    #[test]
    fn empty_channels_decode_back_to_empty_lists() {
        let batch = EventBatch::single(Channel::Data, Event::new("xr.data.wh1", Map::new()));
        let decoded = EventBatch::from_text(&batch.to_text().expect("encode")).expect("decode");
        assert_eq!(decoded.xr_data.len(), 1);
        assert_eq!(decoded.xr_data[0].event_type, "xr.data.wh1");
        assert!(decoded.xr_rt.is_empty());
        assert!(decoded.xr_nrt.is_empty());
    }

    #[test]
    fn full_event_fields_decode() {
        let event = Event::from_text(
            r#"{
                "source": "690D3FAD36C34FD3BB4A9AFC0F6EB659",
                "type": "xr.data.llm-choice-destination",
                "args": {"choice": "choiceValue"},
                "client": {"session": "j2nmiYcYeD65", "timestamp_utc": "1716644903763"},
                "sender_username": "peter"
            }"#,
        )
        .expect("decode");
        assert_eq!(event.source.as_deref(), Some("690D3FAD36C34FD3BB4A9AFC0F6EB659"));
        assert_eq!(
            event.client,
            Some(ClientInfo {
                session: "j2nmiYcYeD65".to_string(),
                timestamp_utc: "1716644903763".to_string(),
            })
        );
        assert_eq!(event.sender_username.as_deref(), Some("peter"));
        assert!(event.guid.is_none());
    }

    #[test]
    fn into_events_yields_channels_in_dispatch_order() {
        let mut batch = EventBatch::default();
        batch.push(Channel::NearRealTime, Event::new("c", Map::new()));
        batch.push(Channel::Data, Event::new("b", Map::new()));
        batch.push(Channel::RealTime, Event::new("a", Map::new()));

        let order: Vec<(Channel, String)> = batch
            .into_events()
            .map(|(channel, event)| (channel, event.event_type))
            .collect();
        assert_eq!(
            order,
            vec![
                (Channel::RealTime, "a".to_string()),
                (Channel::Data, "b".to_string()),
                (Channel::NearRealTime, "c".to_string()),
            ]
        );
    }

    #[test]
    fn channel_keys_round_trip_through_names() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_key(channel.as_str()), Some(channel));
        }
        assert_eq!(Channel::from_key("xr.other"), None);
    }
}
