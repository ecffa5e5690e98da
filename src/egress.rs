//! Outbound events published over REST.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiClient, ApiError};
use crate::stream::proto::{Channel, Event, EventBatch};
use crate::stream::registry::HandlerError;

/// Event ingestion endpoint.
pub const EGRESS_PATH: &str = "/webhooks/xrweb";

type ProducerFn = dyn Fn(Value) -> Result<Map<String, Value>, HandlerError> + Send + Sync;

/// Errors returned by [`EgressBindings::emit`].
#[derive(Debug, Error)]
pub enum EgressError {
    #[error("egress event type must not be empty")]
    EmptyEventType,

    #[error("no egress producer registered for event type {0}")]
    UnknownEventType(String),

    #[error("egress producer for {event_type} failed: {source}")]
    Producer {
        event_type: String,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Posts event batches to the ingestion endpoint.
///
/// A fresh bearer token is requested for every call.
#[derive(Clone, Debug)]
pub struct EgressPublisher {
    api: ApiClient,
}

impl EgressPublisher {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Publishes a batch and returns the parsed server response.
    pub async fn publish(&self, batch: &EventBatch) -> Result<Value, ApiError> {
        info!(event = "egress_publish", events = batch.len());
        self.api.post(EGRESS_PATH, batch).await
    }

    /// Publishes one bare event without the channel envelope.
    pub async fn publish_event(&self, event: &Event) -> Result<Value, ApiError> {
        info!(event = "egress_publish_event", event_type = %event.event_type);
        self.api.post(EGRESS_PATH, event).await
    }
}

/// Producer functions keyed by the event type they publish.
///
/// A producer turns caller input into the `args` of the outgoing event.
#[derive(Clone, Default)]
pub struct EgressBindings {
    producers: HashMap<String, Arc<ProducerFn>>,
    project_guid: Option<String>,
}

impl EgressBindings {
    pub fn new(project_guid: Option<String>) -> Self {
        Self {
            producers: HashMap::new(),
            project_guid,
        }
    }

    /// Binds `producer` to `event_type`; the last binding wins.
    pub fn bind<F>(&mut self, event_type: impl Into<String>, producer: F)
    where
        F: Fn(Value) -> Result<Map<String, Value>, HandlerError> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        debug!(event = "register_egress", %event_type);
        self.producers.insert(event_type, Arc::new(producer));
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.producers.contains_key(event_type)
    }

    pub fn project_guid(&self) -> Option<&str> {
        self.project_guid.as_deref()
    }

    /// Sets the project guid stamped on every event built from now on.
    pub fn set_project_guid(&mut self, project_guid: Option<String>) {
        self.project_guid = project_guid;
    }

    /// Runs the producer for `event_type` and wraps its output in a
    /// single-event `xr.data` batch.
    pub fn build_batch(&self, event_type: &str, input: Value) -> Result<EventBatch, EgressError> {
        if event_type.trim().is_empty() {
            return Err(EgressError::EmptyEventType);
        }
        let producer = self
            .producers
            .get(event_type)
            .ok_or_else(|| EgressError::UnknownEventType(event_type.to_string()))?;
        let args = producer(input).map_err(|source| EgressError::Producer {
            event_type: event_type.to_string(),
            source,
        })?;

        let mut event = Event::new(event_type, args);
        event.project_guid = self.project_guid.clone();
        Ok(EventBatch::single(Channel::Data, event))
    }

    /// Builds the batch for `event_type` and publishes it.
    pub async fn emit(
        &self,
        publisher: &EgressPublisher,
        event_type: &str,
        input: Value,
    ) -> Result<Value, EgressError> {
        let batch = self.build_batch(event_type, input)?;
        Ok(publisher.publish(&batch).await?)
    }
}

/// Cloneable handle that runs egress producers and publishes their events.
///
/// Handlers registered on the client builder can hold one of these to emit
/// in response to ingress events.
#[derive(Clone, Debug)]
pub struct Emitter {
    bindings: Arc<EgressBindings>,
    publisher: EgressPublisher,
}

impl Emitter {
    pub fn new(bindings: EgressBindings, publisher: EgressPublisher) -> Self {
        Self {
            bindings: Arc::new(bindings),
            publisher,
        }
    }

    pub fn bindings(&self) -> &EgressBindings {
        &self.bindings
    }

    pub fn publisher(&self) -> &EgressPublisher {
        &self.publisher
    }

    /// Runs the producer bound to `event_type` with `input` and publishes the
    /// resulting event. Returns the parsed server response.
    pub async fn emit(&self, event_type: &str, input: Value) -> Result<Value, EgressError> {
        self.bindings.emit(&self.publisher, event_type, input).await
    }
}

impl fmt::Debug for EgressBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut event_types: Vec<&str> = self.producers.keys().map(String::as_str).collect();
        event_types.sort_unstable();
        f.debug_struct("EgressBindings")
            .field("event_types", &event_types)
            .field("project_guid", &self.project_guid)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{EgressBindings, EgressError};

    fn quiz_bindings() -> EgressBindings {
        let project_guid = "A895570833F0429A98940C079555AE51".to_string();
        let mut bindings = EgressBindings::new(Some(project_guid));
        bindings.bind("xr.data.vr-quiz-theme", |input: Value| {
            let theme = input
                .get("theme")
                .and_then(Value::as_str)
                .ok_or("theme is required")?;
            let mut args = Map::new();
            args.insert("theme".to_string(), Value::String(theme.to_string()));
            Ok(args)
        });
        bindings
    }

    #[test]
    fn producer_output_becomes_args_of_a_data_event() {
        let batch = quiz_bindings()
            .build_batch("xr.data.vr-quiz-theme", json!({"theme": "mickey mouse"}))
            .expect("batch");

        assert_eq!(
            serde_json::to_value(&batch).expect("encode"),
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
    fn project_guid_is_omitted_when_unset() {
        let mut bindings = EgressBindings::new(None);
        bindings.bind("xr.data.ping", |_| Ok(Map::new()));
        let batch = bindings.build_batch("xr.data.ping", Value::Null).expect("batch");

        assert_eq!(
            serde_json::to_value(&batch).expect("encode"),
            json!({"xr.data": [{"type": "xr.data.ping", "args": {}}]})
        );
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = quiz_bindings()
            .build_batch("xr.data.other", Value::Null)
            .expect_err("unbound");
        assert!(matches!(err, EgressError::UnknownEventType(ref t) if t == "xr.data.other"));
    }

    #[test]
    fn producer_errors_name_the_event_type() {
        let err = quiz_bindings()
            .build_batch("xr.data.vr-quiz-theme", json!({}))
            .expect_err("missing theme");
        assert!(matches!(
            err,
            EgressError::Producer { ref event_type, .. } if event_type == "xr.data.vr-quiz-theme"
        ));
        assert!(err.to_string().contains("theme is required"));
    }

    #[test]
    fn empty_event_type_is_rejected_even_when_bound() {
        let mut bindings = EgressBindings::new(None);
        bindings.bind("", |_| Ok(Map::new()));
        let err = bindings.build_batch("", Value::Null).expect_err("empty type");
        assert!(matches!(err, EgressError::EmptyEventType));
    }
}
