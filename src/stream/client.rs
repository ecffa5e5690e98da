//! Websocket transport for the ship event stream.
//!
//! The transport opens one socket per ship, authenticated with a bearer token
//! in the query string, and runs the receive loop that decodes event batches
//! and hands each event to the [`EventRegistry`]. Reconnection is left to the
//! caller.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};

use crate::auth::InvalidCredentialsError;
use crate::config::trim_base_url;
use crate::stream::proto::EventBatch;
use crate::stream::registry::EventRegistry;

/// Path prefix of the ship stream endpoint.
pub const SHIP_STREAM_PATH: &str = "/v2/ship";

pub(crate) type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors produced by the websocket session.
#[derive(Debug, Error)]
pub enum WssConnectionError {
    /// No bearer token could be obtained for the handshake.
    #[error(transparent)]
    Credentials(#[from] InvalidCredentialsError),

    /// Websocket transport error, including a rejected handshake.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Inbound frame was not a valid event batch.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no ship guid given and XRVOYAGE_CURRENT_SHIP is not set")]
    NoShip,

    /// The receive loop task ended abnormally.
    #[error("receive loop stopped: {0}")]
    WorkerStopped(String),
}

/// Builds `{base}/v2/ship/{ship_guid}/?token={token}`.
pub fn ship_stream_url(base_url: &str, ship_guid: &str, token: &str) -> String {
    format!(
        "{}{}/{}/?token={}",
        trim_base_url(base_url),
        SHIP_STREAM_PATH,
        ship_guid,
        token
    )
}

pub(crate) async fn open_socket(url: &str) -> Result<Socket, WssConnectionError> {
    let (socket, _response) = connect_async(url).await?;
    Ok(socket)
}

/// Reads frames until the socket closes.
///
/// A close request on `close_rx` (or its sender being dropped) sends a close
/// frame and keeps reading until the peer acknowledges; `on_draining` is
/// called once at that point. Clean closure returns `Ok`; transport and decode
/// errors end the loop with an error. Handler failures never reach this level.
pub(crate) async fn run_receive_loop<S, F>(
    socket: &mut WebSocketStream<S>,
    registry: &EventRegistry,
    mut close_rx: oneshot::Receiver<()>,
    mut on_draining: F,
) -> Result<(), WssConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    F: FnMut(),
{
    let mut closing = false;

    loop {
        tokio::select! {
            _ = &mut close_rx, if !closing => {
                closing = true;
                on_draining();
                debug!(event = "wss_close_requested");
                if let Err(err) = socket.close(None).await {
                    return closed_or_error(err);
                }
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_frame(text.as_bytes(), registry)?;
                    }
                    Some(Ok(Message::Binary(payload))) => {
                        dispatch_frame(&payload, registry)?;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            return closed_or_error(err);
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!(event = "wss_closed", ?frame);
                        return Ok(());
                    }
                    Some(Err(err)) => return closed_or_error(err),
                    None => return Ok(()),
                }
            }
        }
    }
}

/// Decodes one frame and dispatches its events in order.
///
/// Returns the number of events in the frame.
pub(crate) fn dispatch_frame(
    payload: &[u8],
    registry: &EventRegistry,
) -> Result<usize, WssConnectionError> {
    debug!(
        event = "wss_frame_received",
        frame = %String::from_utf8_lossy(payload)
    );
    let batch = EventBatch::from_slice(payload)?;
    let count = batch.len();
    for (channel, event) in batch.into_events() {
        debug!(event = "ingress_event", %channel, event_type = %event.event_type);
        registry.dispatch(event);
    }
    Ok(count)
}

fn closed_or_error(err: WsError) -> Result<(), WssConnectionError> {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => Ok(()),
        other => Err(WssConnectionError::WebSocket(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio_tungstenite::tungstenite::Error as WsError;

    use super::{closed_or_error, dispatch_frame, ship_stream_url, WssConnectionError};
    use crate::stream::registry::{EventRegistry, Handler};

    fn recording_registry(event_types: &[&str]) -> (EventRegistry, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut registry = EventRegistry::new();
        registry.register(
            event_types,
            Handler::sync(move |event| {
                sink.lock().expect("lock").push(event.event_type);
                Ok(())
            }),
        );
        (registry, seen)
    }

    #[test]
    fn ship_url_embeds_ship_and_token() {
        assert_eq!(
            ship_stream_url("wss://ws.xr.voyage/", "C9EECCC7", "a.b.c"),
            "wss://ws.xr.voyage/v2/ship/C9EECCC7/?token=a.b.c"
        );
    }

    #[test]
    fn frame_list_dispatches_each_event_in_order() {
        let (registry, seen) = recording_registry(&["xr.data.wh1", "xr.data.ps001"]);
        let count = dispatch_frame(
            br#"{"xr.data":[{"type":"xr.data.wh1","args":{"key1":"value1"}},{"type":"xr.data.ps001","args":{}}]}"#,
            &registry,
        )
        .expect("dispatch");

        assert_eq!(count, 2);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["xr.data.wh1".to_string(), "xr.data.ps001".to_string()]
        );
    }

    #[test]
    fn single_object_frame_dispatches_exactly_once() {
        let (registry, seen) = recording_registry(&["xr.rt.status.ship.crew"]);
        let count = dispatch_frame(
            br#"{"xr.rt":{"type":"xr.rt.status.ship.crew","args":{}}}"#,
            &registry,
        )
        .expect("dispatch");

        assert_eq!(count, 1);
        assert_eq!(
            *seen.lock().expect("lock"),
            vec!["xr.rt.status.ship.crew".to_string()]
        );
    }

    #[test]
    fn unparsable_frame_is_an_error() {
        let registry = EventRegistry::new();
        assert!(matches!(
            dispatch_frame(b"not json", &registry),
            Err(WssConnectionError::Json(_))
        ));
    }

    #[test]
    fn clean_closure_errors_are_not_failures() {
        assert!(closed_or_error(WsError::ConnectionClosed).is_ok());
        assert!(closed_or_error(WsError::AlreadyClosed).is_ok());
        assert!(closed_or_error(WsError::Utf8).is_err());
    }
}
