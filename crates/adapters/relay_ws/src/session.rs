//! Transport task — keeps one WebSocket to the relay open.
//!
//! Every attempt outcome is reported on the inbound channel. While the
//! socket is down, outbound frames are dropped. The task ends when the
//! outbound sender is dropped or nobody reads the inbound channel anymore.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use hubrelay_app::ports::{ConnectRequest, InboundFrame, OutboundFrame};

use crate::error::RelayWsError;
use crate::frame::{self, WireFrame};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Ended {
    /// The session owner went away; stop for good.
    Released,
    /// The socket dropped; reconnect.
    Dropped(String),
}

/// Build the WebSocket handshake with the session headers.
///
/// # Errors
///
/// Returns [`RelayWsError::Handshake`] for an unusable URL or header.
pub fn handshake_request(request: &ConnectRequest) -> Result<Request, RelayWsError> {
    let mut handshake = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|err| RelayWsError::Handshake(err.to_string()))?;
    for (name, value) in &request.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| RelayWsError::Handshake(err.to_string()))?;
        let value =
            HeaderValue::from_str(value).map_err(|err| RelayWsError::Handshake(err.to_string()))?;
        handshake.headers_mut().insert(name, value);
    }
    Ok(handshake)
}

/// Select the `ring` provider for `wss://` relays. A provider installed
/// earlier by the host process wins.
fn install_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

async fn open(request: &ConnectRequest) -> Result<Socket, RelayWsError> {
    let handshake = handshake_request(request)?;
    install_crypto_provider();
    let connect = connect_async(handshake);
    let (socket, _response) = tokio::time::timeout(request.connect_timeout, connect)
        .await
        .map_err(|_| RelayWsError::ConnectTimeout(request.connect_timeout))??;
    Ok(socket)
}

pub(crate) async fn run(
    request: ConnectRequest,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: mpsc::UnboundedSender<InboundFrame>,
) {
    let mut attempt: u32 = 0;
    loop {
        let report = match open(&request).await {
            Ok(socket) => {
                tracing::info!(url = %request.url, "relay socket connected");
                attempt = 0;
                if inbound.send(InboundFrame::Connected).is_err() {
                    return;
                }
                match pump(socket, &mut outbound, &inbound).await {
                    Ended::Released => return,
                    Ended::Dropped(reason) => {
                        tracing::warn!(%reason, "relay socket dropped");
                        InboundFrame::Disconnected { reason }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(
                    url = %request.url,
                    error = %err,
                    attempt,
                    "relay connection attempt failed"
                );
                InboundFrame::ConnectError {
                    message: err.to_string(),
                }
            }
        };
        if inbound.send(report).is_err() {
            return;
        }

        let delay = request.reconnect.delay_for(attempt, rand::random::<f64>());
        attempt = attempt.saturating_add(1);
        tracing::debug!(?delay, attempt, "waiting before reconnecting");
        if !idle(delay, &mut outbound).await {
            return;
        }
    }
}

/// Wait out the reconnection delay. Returns `false` once the owner is gone.
async fn idle(delay: Duration, outbound: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    tracing::debug!(event = %frame.event, "relay disconnected; frame dropped");
                }
                None => return false,
            },
        }
    }
}

async fn pump(
    socket: Socket,
    outbound: &mut mpsc::UnboundedReceiver<OutboundFrame>,
    inbound: &mpsc::UnboundedSender<InboundFrame>,
) -> Ended {
    let (mut sink, mut stream) = socket.split();
    let mut pending: HashMap<u64, oneshot::Sender<Value>> = HashMap::new();
    let mut next_ack: u64 = 0;

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.close().await;
                    return Ended::Released;
                };
                let ack = frame.ack.map(|reply| {
                    pending.retain(|_, waiting| !waiting.is_closed());
                    next_ack += 1;
                    pending.insert(next_ack, reply);
                    next_ack
                });
                let text = match frame::encode(&frame.event, &frame.payload, ack) {
                    Ok(text) => text,
                    Err(err) => {
                        tracing::warn!(
                            event = %frame.event,
                            error = %err,
                            "outbound frame skipped"
                        );
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    return Ended::Dropped(err.to_string());
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if !deliver(text.as_str(), &mut pending, inbound) {
                        let _ = sink.close().await;
                        return Ended::Released;
                    }
                }
                Some(Ok(Message::Close(close))) => {
                    let reason = close
                        .map(|close| close.reason.as_str().to_string())
                        .filter(|reason| !reason.is_empty())
                        .unwrap_or_else(|| "closed by relay".to_string());
                    return Ended::Dropped(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return Ended::Dropped(err.to_string()),
                None => return Ended::Dropped("connection closed".to_string()),
            },
        }
    }
}

/// Route one text frame. Returns `false` once the inbound reader is gone.
fn deliver(
    text: &str,
    pending: &mut HashMap<u64, oneshot::Sender<Value>>,
    inbound: &mpsc::UnboundedSender<InboundFrame>,
) -> bool {
    match frame::decode(text) {
        Ok(WireFrame::Event { event, data }) => inbound
            .send(InboundFrame::Event {
                name: event,
                payload: data,
            })
            .is_ok(),
        Ok(WireFrame::Ack { ack, data }) => {
            match pending.remove(&ack) {
                Some(reply) => {
                    let _ = reply.send(data);
                }
                None => tracing::debug!(ack, "acknowledgement without pending request"),
            }
            true
        }
        Err(err) => {
            tracing::warn!(error = %err, "unreadable relay frame skipped");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hubrelay_app::ports::ReconnectPolicy;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::{self, error::UrlError};

    fn request(url: &str) -> ConnectRequest {
        ConnectRequest {
            url: url.to_string(),
            headers: vec![("authorization".to_string(), "apikey secret".to_string())],
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn should_put_session_headers_on_handshake() {
        let handshake = handshake_request(&request("ws://127.0.0.1:9/socket")).unwrap();
        assert_eq!(handshake.headers()["authorization"], "apikey secret");
        assert_eq!(handshake.uri().path(), "/socket");
    }

    #[test]
    fn should_reject_unusable_url() {
        assert!(matches!(
            handshake_request(&request("not a url")),
            Err(RelayWsError::Handshake(_))
        ));
    }

    #[test]
    fn should_reject_invalid_header() {
        let mut request = request("ws://127.0.0.1:9/socket");
        request.headers.push(("bad header".to_string(), "x".to_string()));
        assert!(handshake_request(&request).is_err());
    }

    #[test]
    fn should_resolve_pending_ack_and_forward_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (reply, mut answer) = oneshot::channel();
        let mut pending = HashMap::from([(1, reply)]);

        assert!(deliver(r#"{"ack":1,"data":"done"}"#, &mut pending, &tx));
        assert!(deliver(r#"{"event":"command","data":{}}"#, &mut pending, &tx));
        assert!(deliver("garbage", &mut pending, &tx));

        assert_eq!(answer.try_recv().unwrap(), Value::from("done"));
        assert!(pending.is_empty());
        assert!(matches!(
            rx.try_recv().unwrap(),
            InboundFrame::Event { name, .. } if name == "command"
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn should_report_released_when_inbound_reader_is_gone() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        assert!(!deliver(r#"{"event":"command"}"#, &mut HashMap::new(), &tx));
    }

    #[tokio::test(start_paused = true)]
    async fn should_drop_frames_while_waiting_to_reconnect() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(OutboundFrame::new("state_changed", Value::Null)).unwrap();

        assert!(idle(Duration::from_millis(100), &mut rx).await);
        assert!(rx.try_recv().is_err());

        drop(tx);
        assert!(!idle(Duration::from_secs(60), &mut rx).await);
    }

    #[tokio::test]
    async fn should_attempt_tls_handshake_for_secure_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("wss://{}/socket", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let err = open(&request(&url)).await.unwrap_err();

        assert!(
            !matches!(
                &err,
                RelayWsError::WebSocket(inner)
                    if matches!(**inner, tungstenite::Error::Url(UrlError::TlsFeatureNotEnabled))
            ),
            "secure relay refused before the TLS handshake: {err:?}"
        );
    }
}
