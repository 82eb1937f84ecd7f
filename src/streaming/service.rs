use crate::auth::{CredentialValidator, Principal};
use crate::authz::{self, Capability};
use crate::error::GatewayError;
use crate::streaming::frames::{
    client_frame, ClientFrame, ControlSignal, ServerFrame, SessionConfig, SynthesizeChunk,
    SynthesizeRequest,
};
use crate::streaming::registry::StreamRegistry;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};
use tracing::{debug, error, warn};

const RESPONSE_QUEUE_CAPACITY: usize = 32;
const CHUNK_QUEUE_CAPACITY: usize = 4;

/// Media backend the streaming service drives. The gateway owns session
/// lifecycle and auth; what the frames mean is this collaborator's concern.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    async fn on_audio(
        &self,
        audio: &[u8],
        config: Option<&SessionConfig>,
    ) -> anyhow::Result<Vec<ServerFrame>>;

    async fn on_text(
        &self,
        text: &str,
        config: Option<&SessionConfig>,
    ) -> anyhow::Result<Vec<ServerFrame>>;

    /// Produces the chunk sequence for a one-shot synthesis request. The
    /// sequence is pulled one chunk at a time; dropping it stops production.
    fn synthesize(&self, request: SynthesizeRequest) -> BoxStream<'_, anyhow::Result<Vec<u8>>>;
}

/// Pulls the bearer credential out of call metadata. Accepts either the
/// `authorization` or `token` key, with or without a `Bearer ` prefix.
pub fn bearer_from_metadata(metadata: &MetadataMap) -> Result<String, Status> {
    for key in ["authorization", "token"] {
        if let Some(value) = metadata.get(key) {
            let raw = value
                .to_str()
                .map_err(|_| Status::unauthenticated("invalid credential encoding"))?;
            let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();
            if !token.is_empty() {
                return Ok(token.to_string());
            }
        }
    }
    Err(Status::unauthenticated("missing credentials"))
}

/// Streaming session service: bidirectional conversation streams and
/// server-streaming one-shot synthesis.
///
/// Authentication happens once at stream open, never per frame. Each call
/// registers a stream context whose removal converges from every exit path,
/// and a fault inside one stream is caught at that stream's boundary so it
/// cannot take down its neighbours.
pub struct StreamingSessionService<E> {
    validator: Arc<CredentialValidator>,
    registry: Arc<StreamRegistry>,
    engine: Arc<E>,
    required_capability: Option<Capability>,
}

impl<E: MediaEngine> StreamingSessionService<E> {
    pub fn new(
        validator: Arc<CredentialValidator>,
        registry: Arc<StreamRegistry>,
        engine: Arc<E>,
    ) -> Self {
        StreamingSessionService {
            validator,
            registry,
            engine,
            required_capability: None,
        }
    }

    /// Requires every caller to hold the given capability in addition to a
    /// valid credential.
    pub fn require_capability(mut self, capability: Capability) -> Self {
        self.required_capability = Some(capability);
        self
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    fn authenticate(&self, metadata: &MetadataMap) -> Result<Principal, Status> {
        let token = bearer_from_metadata(metadata)?;
        let principal = self
            .validator
            .validate(&token)
            .map_err(|err| err.to_status())?;
        if let Some(capability) = &self.required_capability {
            authz::require(&principal, capability).map_err(|err| err.to_status())?;
        }
        Ok(principal)
    }

    /// Bidirectional conversation stream.
    ///
    /// Inbound frames carry a discriminated payload: configuration, audio
    /// data, text data, or a control signal. A `Stop` signal deactivates
    /// media processing; a duplicate `Stop` is a no-op. The response stream
    /// ends when the client closes its side or an error terminates the call.
    pub async fn converse<S>(
        &self,
        request: Request<S>,
    ) -> Result<Response<ReceiverStream<Result<ServerFrame, Status>>>, Status>
    where
        S: Stream<Item = Result<ClientFrame, Status>> + Send + Unpin + 'static,
    {
        let principal = self.authenticate(request.metadata())?;
        let guard = self.registry.register(&principal.user_id);
        let stream_id = guard.stream_id;
        debug!(stream_id = %stream_id, user_id = %principal.user_id, "conversation stream opened");

        let engine = self.engine.clone();
        let mut inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(RESPONSE_QUEUE_CAPACITY);

        tokio::spawn(async move {
            let mut config: Option<SessionConfig> = None;
            let mut active = true;

            while let Some(item) = inbound.next().await {
                let frame = match item {
                    Ok(frame) => frame,
                    Err(status) => {
                        // Peer cancellation or transport error; the guard's
                        // default outcome already records the cancellation.
                        debug!(stream_id = %stream_id, code = ?status.code(), "inbound stream ended");
                        return;
                    }
                };

                let handled = AssertUnwindSafe(handle_frame(
                    engine.as_ref(),
                    frame,
                    &mut config,
                    &mut active,
                ))
                .catch_unwind()
                .await;

                let replies = match handled {
                    Ok(Ok(replies)) => replies,
                    Ok(Err(err)) => {
                        warn!(stream_id = %stream_id, error = %err, "frame processing failed");
                        let _ = tx
                            .send(Err(GatewayError::Internal(err).to_status()))
                            .await;
                        guard.fail();
                        return;
                    }
                    Err(_) => {
                        error!(stream_id = %stream_id, "panic while processing frame");
                        let _ = tx.send(Err(Status::internal("Internal error"))).await;
                        guard.fail();
                        return;
                    }
                };

                for reply in replies {
                    if tx.send(Ok(reply)).await.is_err() {
                        debug!(stream_id = %stream_id, "peer stopped reading, ending stream");
                        return;
                    }
                }
            }
            guard.complete();
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }

    /// Server-streaming one-shot synthesis.
    ///
    /// Chunks are pulled from the engine one at a time and handed to the
    /// peer through a small bounded queue; if the peer cancels mid-sequence
    /// the pull stops and no further chunks are produced. Cancellation is
    /// not an application error.
    pub async fn synthesize(
        &self,
        request: Request<SynthesizeRequest>,
    ) -> Result<Response<ReceiverStream<Result<SynthesizeChunk, Status>>>, Status> {
        let principal = self.authenticate(request.metadata())?;
        let guard = self.registry.register(&principal.user_id);
        let stream_id = guard.stream_id;
        let req = request.into_inner();
        debug!(stream_id = %stream_id, user_id = %principal.user_id, "synthesis stream opened");

        let engine = self.engine.clone();
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);

        tokio::spawn(async move {
            let mut chunks = engine.synthesize(req);
            // One chunk of lookahead so the final chunk can carry the
            // terminal flag without knowing the total up front.
            let mut pending: Option<Vec<u8>> = None;
            let mut sequence: u32 = 0;
            loop {
                let audio = match AssertUnwindSafe(chunks.next()).catch_unwind().await {
                    Ok(Some(Ok(audio))) => audio,
                    Ok(Some(Err(err))) => {
                        warn!(stream_id = %stream_id, error = %err, "synthesis failed");
                        let _ = tx.send(Err(GatewayError::Internal(err).to_status())).await;
                        guard.fail();
                        return;
                    }
                    Ok(None) => {
                        if let Some(audio) = pending.take() {
                            let chunk = SynthesizeChunk {
                                audio,
                                sequence,
                                last: true,
                            };
                            let _ = tx.send(Ok(chunk)).await;
                        }
                        guard.complete();
                        return;
                    }
                    Err(_) => {
                        error!(stream_id = %stream_id, "panic during synthesis");
                        let _ = tx.send(Err(Status::internal("Internal error"))).await;
                        guard.fail();
                        return;
                    }
                };
                if let Some(previous) = pending.replace(audio) {
                    let chunk = SynthesizeChunk {
                        audio: previous,
                        sequence,
                        last: false,
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!(stream_id = %stream_id, sent = sequence, "peer cancelled mid-sequence");
                        return;
                    }
                    sequence += 1;
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

async fn handle_frame<E: MediaEngine>(
    engine: &E,
    frame: ClientFrame,
    config: &mut Option<SessionConfig>,
    active: &mut bool,
) -> anyhow::Result<Vec<ServerFrame>> {
    match frame.payload {
        Some(client_frame::Payload::Config(new_config)) => {
            *config = Some(new_config);
            Ok(Vec::new())
        }
        Some(client_frame::Payload::Audio(audio)) => {
            if !*active {
                debug!("dropping audio frame on stopped stream");
                return Ok(Vec::new());
            }
            engine.on_audio(&audio, config.as_ref()).await
        }
        Some(client_frame::Payload::Text(text)) => {
            if !*active {
                debug!("dropping text frame on stopped stream");
                return Ok(Vec::new());
            }
            engine.on_text(&text, config.as_ref()).await
        }
        Some(client_frame::Payload::Control(signal)) => {
            match ControlSignal::try_from(signal) {
                Ok(ControlSignal::Start) => *active = true,
                Ok(ControlSignal::Stop) => {
                    if *active {
                        *active = false;
                    } else {
                        debug!("duplicate stop signal ignored");
                    }
                }
                Ok(ControlSignal::Unspecified) | Err(_) => {
                    debug!(signal, "ignoring unknown control signal");
                }
            }
            Ok(Vec::new())
        }
        None => {
            debug!("ignoring empty client frame");
            Ok(Vec::new())
        }
    }
}
