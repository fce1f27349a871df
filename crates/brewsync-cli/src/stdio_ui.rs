//! JSON-lines UI host.
//!
//! Writes `{"port":"init","payload":<flags>}` followed by one line per
//! inbound message, and reads one outbound message per input line. The bridge
//! stops once the input ends.

use std::sync::Arc;

use brewsync_core::bridge::{InboundMessage, OutboundMessage};
use brewsync_core::{InitFlags, UiChannels, UiRuntime};
use tokio::io::{
    self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines,
};
use tokio::sync::{mpsc, Mutex};

/// Input lines shared between the host and anything reading before it
/// starts, such as the sign-in code prompt. Each line goes to exactly one
/// reader.
pub type SharedLines<R> = Arc<Mutex<Lines<R>>>;

pub struct StdioUi<R, W> {
    input: SharedLines<R>,
    writer: Option<W>,
}

impl StdioUi<BufReader<io::Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> StdioUi<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            input: Arc::new(Mutex::new(reader.lines())),
            writer: Some(writer),
        }
    }

    pub fn input(&self) -> SharedLines<R> {
        Arc::clone(&self.input)
    }
}

impl<R, W> UiRuntime for StdioUi<R, W>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn start(&mut self, flags: InitFlags, channels: UiChannels) -> brewsync_core::Result<()> {
        let Some(writer) = self.writer.take() else {
            return Err(brewsync_core::Error::InvalidInput(
                "UI host was already started".to_string(),
            ));
        };
        let init_line = serde_json::to_string(&serde_json::json!({
            "port": "init",
            "payload": flags,
        }))?;

        tokio::spawn(write_lines(writer, init_line, channels.inbound));
        tokio::spawn(read_lines(self.input(), channels.outbound));
        Ok(())
    }
}

async fn write_lines<W>(
    mut writer: W,
    init_line: String,
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
) where
    W: AsyncWrite + Unpin,
{
    if let Err(error) = write_line(&mut writer, &init_line).await {
        tracing::warn!("Failed to write init message: {}", error);
        return;
    }
    while let Some(message) = inbound.recv().await {
        let line = match message.to_json_line() {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!("Failed to encode {}: {}", message.port(), error);
                continue;
            }
        };
        if let Err(error) = write_line(&mut writer, &line).await {
            tracing::warn!("UI output closed: {}", error);
            return;
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await
}

async fn read_lines<R>(input: SharedLines<R>, outbound: mpsc::UnboundedSender<OutboundMessage>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lock().await;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => {}
            Ok(Some(line)) => match OutboundMessage::from_json_line(&line) {
                Ok(message) => {
                    if outbound.send(message).is_err() {
                        return;
                    }
                }
                Err(error) => tracing::warn!("Ignoring malformed UI message: {}", error),
            },
            Ok(None) => {
                tracing::debug!("UI input closed");
                return;
            }
            Err(error) => {
                tracing::warn!("Failed to read UI input: {}", error);
                return;
            }
        }
    }
}
