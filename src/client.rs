//! Application-facing client.
//!
//! Ingress handlers and egress producers are declared on [`XrClientBuilder`]
//! before the client exists; the built client's registry is immutable.
//!
//! ```no_run
//! use serde_json::Map;
//! use xrvoyage_sdk::client::XrClient;
//! use xrvoyage_sdk::stream::registry::Handler;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let client = XrClient::builder()
//!     .on_ingress(
//!         "xr.data.wh1",
//!         Handler::sync(|event| {
//!             println!("{:?}", event.args);
//!             Ok(())
//!         }),
//!     )
//!     .on_egress("xr.data.vr-quiz-theme", |input| {
//!         let mut args = Map::new();
//!         args.insert("theme".to_string(), input);
//!         Ok(args)
//!     })
//!     .build()?;
//!
//! client.run_until_shutdown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{build_http_client, ApiClient, ApiClientOptions, ApiError};
use crate::auth::{InvalidCredentialsError, TokenStrategy};
use crate::config::{ConfigError, Settings};
use crate::egress::{EgressBindings, EgressError, EgressPublisher, Emitter};
use crate::entities::{DataWebhooks, Entities, Resource};
use crate::stream::client::WssConnectionError;
use crate::stream::proto::EventBatch;
use crate::stream::registry::{EventRegistry, Handler, HandlerError, IntoEventTypes};
use crate::stream::session::{SessionState, WssSession};

/// How often [`XrClient::run_until_shutdown`] checks the shutdown flag.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum XrClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Credentials(#[from] InvalidCredentialsError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Connection(#[from] WssConnectionError),
}

/// Cooperative shutdown flag shared with signal handlers and user code.
#[derive(Clone, Debug, Default)]
pub struct ShutdownHandle(Arc<AtomicBool>);

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Collects registrations and settings for an [`XrClient`].
#[derive(Debug, Default)]
pub struct XrClientBuilder {
    settings: Option<Settings>,
    tokens: Option<TokenStrategy>,
    ship_guid: Option<String>,
    project_guid: Option<String>,
    api_options: ApiClientOptions,
    registry: EventRegistry,
    egress: EgressBindings,
}

impl XrClientBuilder {
    /// Uses explicit settings instead of [`Settings::global`].
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Uses an explicit token strategy instead of selecting one from settings.
    pub fn token_strategy(mut self, tokens: TokenStrategy) -> Self {
        self.tokens = Some(tokens);
        self
    }

    /// Ship used by [`XrClient::connect`]; overrides `XRVOYAGE_CURRENT_SHIP`.
    pub fn ship_guid(mut self, ship_guid: impl Into<String>) -> Self {
        self.ship_guid = Some(ship_guid.into());
        self
    }

    /// Project stamped on egress events; overrides `XRVOYAGE_PROJECT_GUID`.
    pub fn project_guid(mut self, project_guid: impl Into<String>) -> Self {
        self.project_guid = Some(project_guid.into());
        self
    }

    pub fn api_options(mut self, options: ApiClientOptions) -> Self {
        self.api_options = options;
        self
    }

    /// Registers `handler` for one or many event types.
    pub fn on_ingress<T>(mut self, event_types: T, handler: Handler) -> Self
    where
        T: IntoEventTypes,
    {
        self.registry.register(event_types, handler);
        self
    }

    /// Binds a producer whose output becomes the `args` of `event_type`.
    pub fn on_egress<F>(mut self, event_type: impl Into<String>, producer: F) -> Self
    where
        F: Fn(Value) -> Result<Map<String, Value>, HandlerError> + Send + Sync + 'static,
    {
        self.egress.bind(event_type, producer);
        self
    }

    pub fn build(self) -> Result<XrClient, XrClientError> {
        let Self {
            settings,
            tokens,
            ship_guid,
            project_guid,
            api_options,
            registry,
            mut egress,
        } = self;

        let settings = match settings {
            Some(settings) => settings,
            None => Settings::global()?.clone(),
        };
        let http = build_http_client(&api_options).map_err(ApiError::Transport)?;
        let tokens = Arc::new(match tokens {
            Some(tokens) => tokens,
            None => TokenStrategy::from_settings(&settings, http.clone())?
                .with_request_timeout(api_options.request_timeout),
        });
        let api = ApiClient::from_http(
            http,
            &settings.api_base_url,
            Arc::clone(&tokens),
            api_options.request_timeout,
        );

        egress.set_project_guid(project_guid.or_else(|| settings.project_guid.clone()));
        let emitter = Emitter::new(egress, EgressPublisher::new(api.clone()));
        let session = WssSession::new(&settings.websockets_base_url, tokens, Arc::new(registry));
        let ship_guid = ship_guid.or_else(|| settings.current_ship.clone());

        Ok(XrClient {
            settings,
            api,
            emitter,
            session,
            ship_guid,
            shutdown: ShutdownHandle::default(),
        })
    }
}

/// Event bus client: one websocket session plus the REST surfaces.
#[derive(Debug)]
pub struct XrClient {
    settings: Settings,
    api: ApiClient,
    emitter: Emitter,
    session: WssSession,
    ship_guid: Option<String>,
    shutdown: ShutdownHandle,
}

impl XrClient {
    pub fn builder() -> XrClientBuilder {
        XrClientBuilder::default()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn publisher(&self) -> &EgressPublisher {
        self.emitter.publisher()
    }

    /// Cloneable egress handle for use inside handlers.
    pub fn emitter(&self) -> Emitter {
        self.emitter.clone()
    }

    pub fn registry(&self) -> &EventRegistry {
        self.session.registry()
    }

    pub fn session(&self) -> &WssSession {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn ship_guid(&self) -> Option<&str> {
        self.ship_guid.as_deref()
    }

    pub fn entities(&self, resource: Resource) -> Entities {
        Entities::new(self.api.clone(), resource)
    }

    pub fn data_webhooks(&self) -> DataWebhooks {
        DataWebhooks::new(self.api.clone())
    }

    /// Connects to the configured ship.
    pub async fn connect(&self) -> Result<(), WssConnectionError> {
        let ship_guid = self.ship_guid.as_deref().ok_or(WssConnectionError::NoShip)?;
        self.session.connect(ship_guid).await
    }

    pub async fn connect_ship(&self, ship_guid: &str) -> Result<(), WssConnectionError> {
        self.session.connect(ship_guid).await
    }

    /// Requests a clean close of the websocket; see [`WssSession::destroy`].
    pub fn destroy(&self) {
        self.session.destroy();
    }

    pub async fn wait(&self) -> Result<(), WssConnectionError> {
        self.session.wait().await
    }

    /// Runs the egress producer for `event_type` and publishes its event.
    pub async fn emit(&self, event_type: &str, input: Value) -> Result<Value, EgressError> {
        self.emitter.emit(event_type, input).await
    }

    pub async fn publish(&self, batch: &EventBatch) -> Result<Value, ApiError> {
        self.emitter.publisher().publish(batch).await
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Asks a running [`XrClient::run_until_shutdown`] to stop.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Connects, then idles until SIGINT/SIGTERM or [`XrClient::shutdown`].
    ///
    /// The shutdown flag is polled once per [`SHUTDOWN_POLL_INTERVAL`]; once
    /// set, the session is destroyed and its receive loop joined. If the loop
    /// ends by itself first, its result is returned.
    pub async fn run_until_shutdown(&self) -> Result<(), XrClientError> {
        self.connect().await?;

        let shutdown = self.shutdown_handle();
        let signals = tokio::spawn(async move {
            match wait_for_signal().await {
                Ok(()) => {
                    info!(event = "shutdown_signal_received");
                    shutdown.trigger();
                }
                Err(err) => warn!(event = "signal_handler_failed", error = %err),
            }
        });

        let mut ticker = tokio::time::interval(SHUTDOWN_POLL_INTERVAL);
        let requested = loop {
            ticker.tick().await;
            if self.shutdown.is_triggered() {
                break true;
            }
            if !self.session.is_running() {
                break false;
            }
        };
        signals.abort();

        if requested {
            info!(event = "shutdown_requested");
            self.destroy();
        }
        self.wait().await?;
        Ok(())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::SecretString;
    use serde_json::Map;

    use super::{ShutdownHandle, XrClient, XrClientError};
    use crate::auth::{InvalidCredentialsError, TokenStrategy};
    use crate::config::Settings;
    use crate::stream::client::WssConnectionError;
    use crate::stream::registry::Handler;
    use crate::stream::session::SessionState;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Settings::from_source(vars).expect("settings")
    }

    #[test]
    fn build_fails_without_credentials() {
        let err = XrClient::builder()
            .settings(settings(&[]))
            .build()
            .expect_err("no credentials");
        assert!(matches!(
            err,
            XrClientError::Credentials(InvalidCredentialsError::Misconfigured(_))
        ));
    }

    #[test]
    fn builder_overrides_settings_defaults() {
        let client = XrClient::builder()
            .settings(settings(&[
                ("XRVOYAGE_SESSION_TOKEN", "token"),
                ("XRVOYAGE_CURRENT_SHIP", "SHIP-FROM-ENV"),
                ("XRVOYAGE_PROJECT_GUID", "PROJECT-FROM-ENV"),
            ]))
            .ship_guid("SHIP-OVERRIDE")
            .on_ingress(["xr.data.wh1", "xr.data.ps001"], Handler::sync(|_| Ok(())))
            .on_egress("xr.data.vr-quiz-theme", |_| Ok(Map::new()))
            .build()
            .expect("client");

        assert_eq!(client.ship_guid(), Some("SHIP-OVERRIDE"));
        assert_eq!(client.emitter().bindings().project_guid(), Some("PROJECT-FROM-ENV"));
        assert!(client.emitter().bindings().contains("xr.data.vr-quiz-theme"));
        assert_eq!(client.registry().len(), 2);
        assert_eq!(client.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn connect_without_a_ship_is_an_error() {
        let client = XrClient::builder()
            .settings(settings(&[]))
            .token_strategy(TokenStrategy::session_token(SecretString::new(
                "token".to_string(),
            )))
            .build()
            .expect("client");
        assert!(matches!(
            client.connect().await,
            Err(WssConnectionError::NoShip)
        ));
    }

    #[test]
    fn shutdown_handle_is_shared() {
        let handle = ShutdownHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_triggered());
        clone.trigger();
        assert!(handle.is_triggered());
    }
}
