// src/sink.rs
// Response sink abstraction (§4.I, added) — the only seam the core needs
// into the enclosing HTTP framework, deliberately framework-agnostic.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::CoreResult;

#[async_trait]
pub trait ResponseSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> CoreResult<()>;
    async fn finish(&mut self);
}

/// In-memory sink for adapter/assembler tests.
#[derive(Default)]
pub struct VecSink {
    pub chunks: Vec<Bytes>,
    pub finished: bool,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_string(&self) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            out.push_str(&String::from_utf8_lossy(chunk));
        }
        out
    }
}

#[async_trait]
impl ResponseSink for VecSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> CoreResult<()> {
        self.chunks.push(chunk);
        Ok(())
    }

    async fn finish(&mut self) {
        self.finished = true;
    }
}
