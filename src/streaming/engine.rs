use crate::streaming::frames::{ServerFrame, SessionConfig, SynthesizeRequest};
use crate::streaming::service::MediaEngine;
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

const SYNTH_CHUNK_BYTES: usize = 4096;

/// Loopback engine used until a real media backend is wired in. Audio is
/// acknowledged, text is echoed, synthesis emits silence sized to the
/// request text.
#[derive(Debug, Default)]
pub struct EchoEngine;

#[async_trait]
impl MediaEngine for EchoEngine {
    async fn on_audio(
        &self,
        audio: &[u8],
        _config: Option<&SessionConfig>,
    ) -> anyhow::Result<Vec<ServerFrame>> {
        Ok(vec![ServerFrame::text(format!(
            "received {} bytes of audio",
            audio.len()
        ))])
    }

    async fn on_text(
        &self,
        text: &str,
        _config: Option<&SessionConfig>,
    ) -> anyhow::Result<Vec<ServerFrame>> {
        Ok(vec![ServerFrame::text(text.to_string())])
    }

    fn synthesize(&self, request: SynthesizeRequest) -> BoxStream<'_, anyhow::Result<Vec<u8>>> {
        // ~1KiB of audio per character of input, chunked lazily.
        let total = request.text.len().max(1) * 1024;
        stream::iter((0..total).step_by(SYNTH_CHUNK_BYTES))
            .map(move |offset| Ok(vec![0u8; (total - offset).min(SYNTH_CHUNK_BYTES)]))
            .boxed()
    }
}
