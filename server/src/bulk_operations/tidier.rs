use super::policy::MessagePolicy;
use super::types::ProgressSink;
use crate::gateway::Disposition;
use crate::model::Message;
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use async_trait::async_trait;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Removes messages whose payload matches a pattern.
///
/// Without `execute` nothing is completed: matches are only reported and
/// every message is abandoned. Each abandon raises the message's delivery
/// count, so repeated dry runs can push messages into the dead-letter queue.
#[derive(Debug)]
pub struct TidyPolicy {
    pattern: Regex,
    execute: bool,
    matched: AtomicUsize,
}

impl TidyPolicy {
    pub fn new(pattern: &str, execute: bool) -> ServiceBusResult<Self> {
        if pattern.trim().is_empty() {
            return Err(ServiceBusError::invalid_configuration(
                "pattern must be specified, else all messages risk being deleted",
            ));
        }
        let pattern = Regex::new(pattern).map_err(|e| {
            ServiceBusError::invalid_configuration(format!("invalid pattern '{pattern}': {e}"))
        })?;
        if !execute {
            log::warn!(
                "Tidy dry run: every received message is abandoned and its delivery count increases"
            );
        }
        Ok(Self {
            pattern,
            execute,
            matched: AtomicUsize::new(0),
        })
    }

    /// Messages that matched the pattern so far.
    pub fn matched(&self) -> usize {
        self.matched.load(Ordering::SeqCst)
    }

    pub fn is_dry_run(&self) -> bool {
        !self.execute
    }
}

#[async_trait]
impl MessagePolicy for TidyPolicy {
    fn name(&self) -> &'static str {
        "tidy"
    }

    async fn apply(
        &self,
        message: &Message,
        events: &ProgressSink,
    ) -> ServiceBusResult<Disposition> {
        let body = message.body_text();
        let Some(found) = self.pattern.find(&body) else {
            return Ok(Disposition::Abandon);
        };

        self.matched.fetch_add(1, Ordering::SeqCst);
        events.found(found.as_str()).await;
        if self.execute {
            log::debug!(
                "Removing message {} matching '{}'",
                message.display_id(),
                found.as_str()
            );
            Ok(Disposition::Complete)
        } else {
            Ok(Disposition::Abandon)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk_operations::ProgressReport;

    #[test]
    fn test_empty_and_invalid_patterns_are_rejected() {
        assert!(matches!(
            TidyPolicy::new("  ", true),
            Err(ServiceBusError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            TidyPolicy::new("ab(", true),
            Err(ServiceBusError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_match_reports_and_respects_execute_flag() {
        let (sink, receiver) = ProgressSink::channel(4);
        let message = Message::from_text("xx abbbc yy");

        let dry = TidyPolicy::new("ab+c", false).unwrap();
        assert_eq!(dry.apply(&message, &sink).await.unwrap(), Disposition::Abandon);

        let live = TidyPolicy::new("ab+c", true).unwrap();
        assert_eq!(live.apply(&message, &sink).await.unwrap(), Disposition::Complete);

        let miss = Message::from_text("ac");
        assert_eq!(live.apply(&miss, &sink).await.unwrap(), Disposition::Abandon);

        drop(sink);
        let found: Vec<_> = receiver.drain().collect();
        assert_eq!(
            found,
            vec![
                ProgressReport::Found("abbbc".to_string()),
                ProgressReport::Found("abbbc".to_string()),
            ]
        );
    }
}
