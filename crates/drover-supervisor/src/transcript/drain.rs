//! The drain task: persists a run's chunk stream and applies its events.

use drover_core::events::Event;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::decoder::{DecodedLine, LineDecoder};
use super::feed::{FeedItem, FeedSender, FeedSource, publish};
use crate::storage::{AgentId, AgentStatus, AgentStore, DatabaseError, NewLogEntry};
use crate::subprocess::{StreamKind, TranscriptChunk};

/// What a completed drain observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Raw chunks persisted.
    pub chunks: usize,
    /// Decoded protocol events persisted.
    pub events: usize,
    /// Real session token from `thread.started`, if one arrived.
    pub session_token: Option<String>,
    pub turn_failed: bool,
    pub failure_message: Option<String>,
    /// Whether the drain itself committed the `failed` status.
    pub finalized: bool,
}

/// Persists every chunk of one run, decodes stdout for protocol agents and
/// applies the decoded events to the agent.
pub struct TranscriptDrain<'a, S> {
    store: &'a S,
    agent: &'a AgentId,
    /// `run_seq` of the run being drained.
    run: i64,
    decoder: Option<LineDecoder>,
    feed: &'a FeedSender,
    summary: DrainSummary,
}

impl<'a, S: AgentStore> TranscriptDrain<'a, S> {
    pub fn new(
        store: &'a S,
        agent: &'a AgentId,
        run: i64,
        decode_events: bool,
        feed: &'a FeedSender,
    ) -> Self {
        Self {
            store,
            agent,
            run,
            decoder: decode_events.then(LineDecoder::new),
            feed,
            summary: DrainSummary::default(),
        }
    }

    /// Drain `output` until the multiplexer closes it.
    ///
    /// A persistence error stops persisting but not reading: the channel is
    /// still emptied so the child never stalls on a full pipe, and the error
    /// is returned once the channel closes.
    pub async fn run(
        mut self,
        mut output: mpsc::Receiver<TranscriptChunk>,
    ) -> Result<DrainSummary, DatabaseError> {
        let mut failure = None;

        while let Some(chunk) = output.recv().await {
            if failure.is_some() {
                continue;
            }
            if let Err(e) = self.handle_chunk(chunk).await {
                error!(agent = %self.agent, error = %e, "Transcript persistence failed");
                failure = Some(e);
            }
        }

        if failure.is_none() {
            if let Some(line) = self.decoder.as_mut().and_then(LineDecoder::finish) {
                if let Err(e) = self.handle_line(line).await {
                    error!(agent = %self.agent, error = %e, "Transcript persistence failed");
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => {
                debug!(
                    agent = %self.agent,
                    chunks = self.summary.chunks,
                    events = self.summary.events,
                    "Transcript drained"
                );
                Ok(self.summary)
            }
        }
    }

    async fn handle_chunk(&mut self, chunk: TranscriptChunk) -> Result<(), DatabaseError> {
        let entry = NewLogEntry::new(self.agent, chunk.stream.as_str()).with_content(chunk.text());
        self.persist(&entry).await?;
        self.summary.chunks += 1;

        if chunk.stream != StreamKind::Stdout {
            return Ok(());
        }
        let lines = match self.decoder.as_mut() {
            Some(decoder) => decoder.push(&chunk.bytes),
            None => return Ok(()),
        };
        for line in lines {
            self.handle_line(line).await?;
        }
        Ok(())
    }

    async fn handle_line(&mut self, line: DecodedLine) -> Result<(), DatabaseError> {
        let Some(entry) = event_entry(self.agent, &line) else {
            return Ok(());
        };
        self.persist(&entry).await?;
        self.summary.events += 1;

        match line.event {
            Event::ThreadStarted { thread_id } => {
                self.store.set_session_token(self.agent, &thread_id).await?;
                info!(agent = %self.agent, session_token = %thread_id, "Session token observed");
                self.summary.session_token = Some(thread_id);
            }
            Event::TurnFailed { message } => {
                self.summary.turn_failed = true;
                self.summary.failure_message = message;
                if self
                    .store
                    .finalize_if_busy(self.agent, self.run, AgentStatus::Failed)
                    .await?
                {
                    info!(agent = %self.agent, "Agent failed (turn.failed)");
                    self.summary.finalized = true;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn persist(&self, entry: &NewLogEntry) -> Result<(), DatabaseError> {
        let id = self.store.append_log_entry(entry).await?;
        publish(
            self.feed,
            FeedItem {
                agent: self.agent.clone(),
                source: FeedSource::LogEntry,
                id,
                event_type: entry.event_type.clone(),
            },
        );
        Ok(())
    }
}

/// Transcript entry for a decoded line, `None` for non-protocol lines.
fn event_entry(agent: &AgentId, line: &DecodedLine) -> Option<NewLogEntry> {
    let label = line.event.log_label()?;
    let entry = NewLogEntry::new(agent, label).with_raw(line.raw.clone());

    let entry = match &line.event {
        Event::ThreadStarted { thread_id } => entry.with_content(thread_id.clone()),
        Event::TurnCompleted { usage } => entry.with_content(format!(
            "input_tokens={} cached_input_tokens={} output_tokens={}",
            usage.input_tokens, usage.cached_input_tokens, usage.output_tokens
        )),
        Event::TurnFailed {
            message: Some(message),
        }
        | Event::Error { message } => entry.with_content(message.clone()),
        Event::ItemStarted(item) | Event::ItemUpdated(item) | Event::ItemCompleted(item) => {
            let content = item
                .aggregated_output
                .clone()
                .or_else(|| item.text.clone())
                .or_else(|| item.status.clone());
            let entry = entry
                .with_command(item.command.clone())
                .with_exit_code(item.exit_code);
            match content {
                Some(content) => entry.with_content(content),
                None => entry,
            }
        }
        _ => entry,
    };
    Some(entry)
}
