//! One local client relayed to the station.
//!
//! A session is created per accepted request and runs in its own task. It
//! installs itself in the [`ActiveSlot`](crate::active::ActiveSlot), which
//! cancels whichever session was relaying before. Whatever ends it
//! (station end-of-stream, client disconnect, displacement, error or panic),
//! [`SessionGuard`] runs the cleanup exactly once.

use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{ACCEPT, CONNECTION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING, USER_AGENT},
    },
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use pmoicy::{DemuxStats, ICY_METADATA_HEADER, ICY_METAINT_HEADER, IcyDemuxer, parse_metaint};
use tokio::sync::oneshot;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info, warn};

use crate::active::SessionHandle;
use crate::error::{Error, Result};
use crate::server::RelayState;

/// Capacity of the pipe between the demultiplexer and the local body.
const BODY_PIPE_SIZE: usize = 64 * 1024;

const AUDIO_ACCEPT: &str = "audio/*";

/// Finalization of a session, run on drop.
struct SessionGuard {
    state: Arc<RelayState>,
    handle: Arc<SessionHandle>,
    peer: SocketAddr,
    user_agent: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.state.active.release(&self.handle);
        self.handle.cancel();
        self.state.publisher.clear();
        info!(
            session = self.handle.id(),
            "Terminated connection from {} {}", self.peer, self.user_agent
        );
    }
}

pub(crate) struct RelaySession {
    guard: SessionGuard,
}

impl RelaySession {
    /// Registers a new session as the active one.
    pub(crate) fn open(state: Arc<RelayState>, peer: SocketAddr, headers: &HeaderMap) -> Self {
        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let handle = SessionHandle::new(state.next_session_id());
        info!(session = handle.id(), "Got connection from {} {}", peer, user_agent);

        if let Some(previous) = state.active.install(handle.clone()) {
            debug!(session = handle.id(), "Displacing session {}", previous.id());
        }

        Self {
            guard: SessionGuard {
                state,
                handle,
                peer,
                user_agent,
            },
        }
    }

    /// Relays the station until the stream ends or the session is cancelled.
    ///
    /// The local response is sent through `respond` as soon as the station
    /// answered. If the session ends before that, `respond` receives
    /// `503` (displaced) or `502` (station unreachable).
    pub(crate) async fn run(self, headers: HeaderMap, respond: oneshot::Sender<Response>) {
        let token = self.guard.handle.token().clone();
        let id = self.guard.handle.id();
        let mut respond = Some(respond);

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.relay(headers, &mut respond) => Some(result),
        };

        match &outcome {
            None => info!(session = id, "Connection is cancelled by the server"),
            Some(Ok(stats)) => {
                info!(session = id, "End of radio stream.");
                debug!(
                    session = id,
                    payload_bytes = stats.payload_bytes,
                    metadata_frames = stats.metadata_frames,
                    titles_published = stats.titles_published,
                    "Relay statistics"
                );
            }
            Some(Err(e)) if e.is_client_gone() => {
                info!(session = id, "Connection is cancelled by the user")
            }
            Some(Err(e)) => warn!(session = id, "Relay failed: {}", e),
        }

        if let Some(respond) = respond.take() {
            let status = match outcome {
                None => StatusCode::SERVICE_UNAVAILABLE,
                Some(_) => StatusCode::BAD_GATEWAY,
            };
            let _ = respond.send(status.into_response());
        }
        // self dropped here: SessionGuard cleans up
    }

    async fn relay(
        &self,
        headers: HeaderMap,
        respond: &mut Option<oneshot::Sender<Response>>,
    ) -> Result<DemuxStats> {
        let state = &self.guard.state;
        let keep_metadata = headers.contains_key(ICY_METADATA_HEADER);

        let response = state
            .client
            .get(state.config.station_url().clone())
            .headers(upstream_headers(&headers))
            .send()
            .await?;

        let metaint = response
            .headers()
            .get(ICY_METAINT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_metaint)
            .unwrap_or(0);
        debug!(
            session = self.guard.handle.id(),
            status = %response.status(),
            metaint,
            keep_metadata,
            "Station answered"
        );

        let (mut client, body) = tokio::io::duplex(BODY_PIPE_SIZE);
        let mut local = Response::new(Body::from_stream(ReaderStream::new(body)));
        *local.status_mut() = response.status();
        copy_response_headers(response.headers(), local.headers_mut());

        let Some(tx) = respond.take() else {
            return Err(Error::ClientGone);
        };
        if tx.send(local).is_err() {
            return Err(Error::ClientGone);
        }

        let stream = response.bytes_stream().map(|r| r.map_err(io::Error::other));
        let mut upstream = StreamReader::new(Box::pin(stream));

        let mut demuxer = IcyDemuxer::new(metaint, keep_metadata);
        let stats = demuxer
            .run(&mut upstream, &mut client, state.publisher.as_ref())
            .await?;
        Ok(stats)
    }
}

/// Headers sent to the station: the client's, minus `Host`, plus a
/// metadata request and an audio `Accept` when missing.
pub(crate) fn upstream_headers(client: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(client.len() + 2);
    for (name, value) in client {
        if name != HOST {
            headers.append(name.clone(), value.clone());
        }
    }

    if !headers.contains_key(ICY_METADATA_HEADER) {
        headers.insert(
            HeaderName::from_static(ICY_METADATA_HEADER),
            HeaderValue::from_static("1"),
        );
    }
    if !headers.contains_key(ACCEPT) {
        headers.insert(ACCEPT, HeaderValue::from_static(AUDIO_ACCEPT));
    }
    headers
}

/// Copies every station header, value by value, except framing ones.
pub(crate) fn copy_response_headers(upstream: &HeaderMap, local: &mut HeaderMap) {
    for (name, value) in upstream {
        if !is_framing_header(name) {
            local.append(name.clone(), value.clone());
        }
    }
}

/// Headers owned by the local HTTP stack: the local body length differs
/// from the station's once metadata is stripped.
fn is_framing_header(name: &HeaderName) -> bool {
    name == CONNECTION
        || name == TRANSFER_ENCODING
        || name == CONTENT_LENGTH
        || name.as_str() == "keep-alive"
}
