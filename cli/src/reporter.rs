//! Terminal rendering of progress events and command results.

use server::bulk_operations::ProgressReport;
use server::service_bus_manager::{ServiceBusCommand, ServiceBusResponse};
use std::io::{self, Write};

/// Start line printed once the expected total is known.
pub fn start_line(command: &ServiceBusCommand, total: usize) -> String {
    match command {
        ServiceBusCommand::PullMessages { queue_name, .. } => {
            format!("{total} messages to process on {queue_name} queue...")
        }
        ServiceBusCommand::DeleteMessages { .. } => format!("{total} messages to delete"),
        ServiceBusCommand::RequeueMessages { .. } => format!("{total} messages to requeue"),
        ServiceBusCommand::SendMessages { .. } => format!("Sending {total} messages"),
        ServiceBusCommand::TidyMessages { .. } => format!("{total} messages to process"),
        ServiceBusCommand::GetQueueCount { .. } => format!("{total} messages"),
    }
}

/// Message printed when a command had nothing to work on.
pub fn nothing_to_do(command: &ServiceBusCommand) -> &'static str {
    match command {
        ServiceBusCommand::PullMessages { .. } => "no messages on queue",
        ServiceBusCommand::DeleteMessages { .. } => "no messages to delete",
        ServiceBusCommand::RequeueMessages { .. } => "no messages to requeue",
        ServiceBusCommand::SendMessages { .. } => "no messages to send",
        ServiceBusCommand::TidyMessages { .. } | ServiceBusCommand::GetQueueCount { .. } => {
            "no messages to process"
        }
    }
}

/// Human readable outcome of a successful command.
pub fn summary(response: &ServiceBusResponse) -> Option<String> {
    let text = match response {
        ServiceBusResponse::QueueCount { queue, count } => format!("{count} messages on {queue}"),
        ServiceBusResponse::Pulled {
            result,
            batches,
            directory,
            elapsed,
        } => format!(
            "Wrote {} messages to {batches} file(s) in {}\nFinished in {}ms",
            result.processed,
            directory.display(),
            elapsed.as_millis()
        ),
        ServiceBusResponse::Deleted { result } => match result.processed {
            0 => "no messages to delete".to_string(),
            1 => "1 message deleted".to_string(),
            n => format!("{n} message(s) deleted"),
        },
        ServiceBusResponse::Requeued { result } => match result.processed {
            0 => "no messages to requeue".to_string(),
            1 => "one message requeued".to_string(),
            n => format!("{n} message(s) requeued"),
        },
        ServiceBusResponse::Sent { count } => format!("Sent {count} messages"),
        ServiceBusResponse::Tidied {
            result,
            matched,
            executed: true,
        } => format!(
            "{matched} matching message(s) deleted, {} checked",
            result.processed
        ),
        ServiceBusResponse::Tidied {
            result, matched, ..
        } => format!(
            "{matched} of {} messages matched, nothing deleted",
            result.processed
        ),
        ServiceBusResponse::Error { .. } => return None,
    };
    Some(with_shortfall(text, response))
}

/// Notes a run whose source ran dry before the count observed at start.
fn with_shortfall(text: String, response: &ServiceBusResponse) -> String {
    match response {
        ServiceBusResponse::Pulled { result, .. }
        | ServiceBusResponse::Deleted { result }
        | ServiceBusResponse::Requeued { result }
        | ServiceBusResponse::Tidied { result, .. }
            if result.processed > 0 && result.ended_early() =>
        {
            format!(
                "{text}\nqueue ran dry after {} of {} expected messages",
                result.processed, result.total_requested
            )
        }
        _ => text,
    }
}

/// Renders progress events until a terminal event arrives or the sending
/// side goes away.
///
/// Status lines overwrite each other with `\r`; a newline is emitted before
/// anything else is printed after them.
pub async fn print_progress<W, F>(
    receiver: flume::Receiver<ProgressReport>,
    mut out: W,
    start_line: F,
) -> io::Result<W>
where
    W: Write,
    F: Fn(usize) -> String,
{
    let mut status_pending = false;

    while let Ok(report) = receiver.recv_async().await {
        if status_pending && !matches!(report, ProgressReport::Status { .. }) {
            writeln!(out)?;
            status_pending = false;
        }

        match report {
            ProgressReport::Started { total } => writeln!(out, "{}", start_line(total))?,
            ProgressReport::Status { processed, total } => {
                write!(out, "\r[status] completed {processed} of {total} messages")?;
                out.flush()?;
                status_pending = true;
            }
            ProgressReport::Found(matched) => {
                writeln!(out, "[status] identified {matched} in message")?;
            }
            ProgressReport::Success { .. } | ProgressReport::Fatal(_) => break,
        }
    }

    if status_pending {
        writeln!(out)?;
    }
    out.flush()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use server::bulk_operations::{BulkOperationResult, ProgressSink};
    use server::service_bus_manager::ServiceBusError;
    use std::path::PathBuf;
    use std::time::Duration;

    #[tokio::test]
    async fn test_status_lines_overwrite_then_break() {
        let (sink, receiver) = ProgressSink::channel(8);
        sink.send(ProgressReport::Started { total: 120 }).await;
        sink.status(50, 120).await;
        sink.status(100, 120).await;
        sink.send(ProgressReport::Success { processed: 120 }).await;

        let out = print_progress(receiver, Vec::new(), |total| format!("{total} messages to delete"))
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "120 messages to delete\n\
             \r[status] completed 50 of 120 messages\
             \r[status] completed 100 of 120 messages\n"
        );
    }

    #[tokio::test]
    async fn test_found_lines_follow_status_on_new_line() {
        let (sink, receiver) = ProgressSink::channel(8);
        sink.status(1, 3).await;
        sink.found("timeout").await;
        sink.send(ProgressReport::Fatal(ServiceBusError::QueueEmpty)).await;

        let out = print_progress(receiver, Vec::new(), |total| total.to_string())
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "\r[status] completed 1 of 3 messages\n[status] identified timeout in message\n"
        );
    }

    #[tokio::test]
    async fn test_dropped_sender_ends_printing() {
        let (sink, receiver) = ProgressSink::channel(2);
        drop(sink);

        let out = print_progress(receiver, Vec::new(), |total| total.to_string())
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_single_delete_summaries() {
        let deleted = ServiceBusResponse::Deleted {
            result: BulkOperationResult::new(1, 1),
        };
        assert_eq!(summary(&deleted).as_deref(), Some("1 message deleted"));

        let empty = ServiceBusResponse::Deleted {
            result: BulkOperationResult::new(1, 0),
        };
        assert_eq!(summary(&empty).as_deref(), Some("no messages to delete"));
    }

    #[test]
    fn test_short_run_is_noted() {
        let deleted = ServiceBusResponse::Deleted {
            result: BulkOperationResult::new(120, 90),
        };
        assert_eq!(
            summary(&deleted).unwrap(),
            "90 message(s) deleted\nqueue ran dry after 90 of 120 expected messages"
        );

        let complete = ServiceBusResponse::Requeued {
            result: BulkOperationResult::new(7, 7),
        };
        assert_eq!(summary(&complete).unwrap(), "7 message(s) requeued");
    }

    #[test]
    fn test_pull_summary_reports_elapsed_millis() {
        let pulled = ServiceBusResponse::Pulled {
            result: BulkOperationResult::new(250, 250),
            batches: 3,
            directory: PathBuf::from("out"),
            elapsed: Duration::from_millis(1234),
        };
        assert_eq!(
            summary(&pulled).unwrap(),
            "Wrote 250 messages to 3 file(s) in out\nFinished in 1234ms"
        );
    }
}
