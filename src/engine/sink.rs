//! Message sinks

use super::types::Message;
use crate::error::{Error, Result};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Receives the messages of a sync in order
#[async_trait]
pub trait MessageSink: Send {
    /// Accept one message
    async fn emit(&mut self, message: Message) -> Result<()>;

    /// Flush buffered output
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MessageSink for Vec<Message> {
    async fn emit(&mut self, message: Message) -> Result<()> {
        self.push(message);
        Ok(())
    }
}

/// Writes one JSON document per line
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    /// Wrap a writer
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: Vec::with_capacity(4096),
        }
    }

    /// Unwrap the writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> MessageSink for JsonLinesSink<W> {
    async fn emit(&mut self, message: Message) -> Result<()> {
        self.buffer.clear();
        serde_json::to_writer(&mut self.buffer, &message)
            .map_err(|e| Error::output(format!("Failed to serialize message: {e}")))?;
        self.buffer.push(b'\n');
        self.writer.write_all(&self.buffer).await?;

        // States must reach the platform before anything that follows them
        if message.is_state() {
            self.writer.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}
