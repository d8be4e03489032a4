use super::policy::MessagePolicy;
use super::types::ProgressSink;
use crate::files::BatchWriter;
use crate::gateway::Disposition;
use crate::model::Message;
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct PendingBatch {
    lines: Vec<String>,
    next_index: usize,
}

impl PendingBatch {
    fn take(&mut self) -> (usize, Vec<String>) {
        self.next_index += 1;
        (self.next_index, std::mem::take(&mut self.lines))
    }
}

/// Collects peeked payloads into batches of `max_write` lines.
///
/// Full batches go to the writer as they fill up; the remainder is written
/// by [`MessagePolicy::finish`]. Peeked messages carry no lock, so the queue
/// is left untouched.
pub struct PullPolicy {
    writer: Arc<dyn BatchWriter>,
    max_write: usize,
    pending: Mutex<PendingBatch>,
}

impl PullPolicy {
    pub fn new(writer: Arc<dyn BatchWriter>, max_write: usize) -> ServiceBusResult<Self> {
        if max_write == 0 {
            return Err(ServiceBusError::invalid_configuration(
                "lines per file must be at least 1",
            ));
        }
        Ok(Self {
            writer,
            max_write,
            pending: Mutex::new(PendingBatch::default()),
        })
    }

    /// Batches handed to the writer so far.
    pub async fn batches_written(&self) -> usize {
        self.pending.lock().await.next_index
    }
}

#[async_trait]
impl MessagePolicy for PullPolicy {
    fn name(&self) -> &'static str {
        "pull"
    }

    async fn apply(
        &self,
        message: &Message,
        _events: &ProgressSink,
    ) -> ServiceBusResult<Disposition> {
        let mut pending = self.pending.lock().await;
        pending.lines.push(message.body_text().into_owned());

        if pending.lines.len() >= self.max_write {
            let (index, lines) = pending.take();
            // Writing under the lock keeps file indices in message order.
            self.writer.write_batch(index, lines).await?;
        }
        Ok(Disposition::Abandon)
    }

    async fn finish(&self, _events: &ProgressSink) -> ServiceBusResult<()> {
        let mut pending = self.pending.lock().await;
        if pending.lines.is_empty() {
            return Ok(());
        }
        let (index, lines) = pending.take();
        log::debug!("Flushing final batch {index} with {} lines", lines.len());
        self.writer.write_batch(index, lines).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingWriter {
        batches: Mutex<Vec<(usize, Vec<String>)>>,
    }

    #[async_trait]
    impl BatchWriter for RecordingWriter {
        async fn prepare(&self) -> ServiceBusResult<()> {
            Ok(())
        }

        async fn write_batch(&self, index: usize, lines: Vec<String>) -> ServiceBusResult<()> {
            self.batches.lock().await.push((index, lines));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_full_batches_then_remainder() {
        let writer = Arc::new(RecordingWriter::default());
        let policy = PullPolicy::new(writer.clone(), 2).unwrap();
        let sink = ProgressSink::disabled();

        for body in ["a", "b", "c"] {
            policy.apply(&Message::from_text(body), &sink).await.unwrap();
        }
        assert_eq!(writer.batches.lock().await.len(), 1);

        policy.finish(&sink).await.unwrap();
        let batches = writer.batches.lock().await;
        assert_eq!(
            *batches,
            vec![
                (1, vec!["a".to_string(), "b".to_string()]),
                (2, vec!["c".to_string()]),
            ]
        );
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let writer = Arc::new(RecordingWriter::default());
        assert!(PullPolicy::new(writer, 0).is_err());
    }
}
