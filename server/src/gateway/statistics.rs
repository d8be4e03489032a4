use crate::auth::ConnectionString;
use crate::model::QueueType;
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use quick_xml::Reader;
use quick_xml::events::Event;

const API_VERSION: &str = "2017-04";
const TOKEN_VALIDITY_HOURS: i64 = 1;

/// Active and dead-letter counts of one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueCounts {
    pub active: u64,
    pub dead_letter: u64,
}

impl QueueCounts {
    pub fn for_queue_type(&self, queue_type: QueueType) -> u64 {
        match queue_type {
            QueueType::Main => self.active,
            QueueType::DeadLetter => self.dead_letter,
        }
    }
}

/// Reads message counts from the namespace's entity endpoint.
///
/// The AMQP transport has no count primitive, so counts come from the
/// Atom document served at `https://<host>/<queue>`.
#[derive(Clone)]
pub struct QueueStatisticsClient {
    http_client: reqwest::Client,
    connection: ConnectionString,
}

impl QueueStatisticsClient {
    pub fn new(http_client: reqwest::Client, connection: ConnectionString) -> Self {
        Self {
            http_client,
            connection,
        }
    }

    pub async fn get_queue_counts(&self, queue_name: &str) -> ServiceBusResult<QueueCounts> {
        let operation = format!("count {queue_name}");
        let token = self.connection.sas_generator().generate_sas_token(
            &self.connection.key_name,
            &self.connection.key,
            TOKEN_VALIDITY_HOURS,
        )?;

        let url = format!(
            "https://{}/{}?api-version={API_VERSION}",
            self.connection.host,
            urlencoding::encode(queue_name)
        );
        log::debug!("Requesting queue description from {url}");

        let response = self
            .http_client
            .get(&url)
            .header("Authorization", token)
            .send()
            .await
            .map_err(|e| ServiceBusError::from_transport(operation.clone(), e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceBusError::from_transport(operation.clone(), e))?;

        if !status.is_success() {
            return Err(ServiceBusError::from_status(
                operation,
                status.as_u16(),
                &body,
            ));
        }

        parse_queue_counts(queue_name, &body)
    }
}

#[derive(Clone, Copy)]
enum CountField {
    Active,
    DeadLetter,
}

/// Extracts the counts from a queue description document.
///
/// The endpoint answers an unknown entity with an empty feed and status 200,
/// so a document without a `QueueDescription` element means `NotFound`. A
/// description that lacks either count element is malformed.
pub fn parse_queue_counts(queue_name: &str, body: &str) -> ServiceBusResult<QueueCounts> {
    let malformed = |message: String| ServiceBusError::Transport {
        operation: format!("parse description of {queue_name}"),
        message,
    };

    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut has_description = false;
    let mut field: Option<CountField> = None;
    let mut active = None;
    let mut dead_letter = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            // Count elements are namespace-prefixed, e.g. <d2p1:ActiveMessageCount>.
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"QueueDescription" => has_description = true,
                b"ActiveMessageCount" => field = Some(CountField::Active),
                b"DeadLetterMessageCount" => field = Some(CountField::DeadLetter),
                _ => field = None,
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"QueueDescription" => {
                has_description = true;
            }
            Ok(Event::Text(e)) => {
                if let Some(current) = field {
                    let text = e
                        .unescape()
                        .map_err(|e| malformed(format!("unreadable count: {e}")))?;
                    let count = text
                        .trim()
                        .parse::<u64>()
                        .map_err(|e| malformed(format!("invalid count {text:?}: {e}")))?;
                    match current {
                        CountField::Active => active = Some(count),
                        CountField::DeadLetter => dead_letter = Some(count),
                    }
                }
            }
            Ok(Event::End(_)) => field = None,
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(format!("XML parsing error: {e}"))),
            _ => {}
        }
        buf.clear();
    }

    if !has_description {
        return Err(ServiceBusError::NotFound {
            entity: queue_name.to_string(),
        });
    }

    Ok(QueueCounts {
        active: active.ok_or_else(|| malformed("ActiveMessageCount not found".to_string()))?,
        dead_letter: dead_letter
            .ok_or_else(|| malformed("DeadLetterMessageCount not found".to_string()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<entry xmlns="http://www.w3.org/2005/Atom">
  <title type="text">orders</title>
  <content type="application/xml">
    <QueueDescription xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect">
      <MessageCount>12</MessageCount>
      <CountDetails xmlns:d2p1="http://schemas.microsoft.com/netservices/2011/06/servicebus">
        <d2p1:ActiveMessageCount>7</d2p1:ActiveMessageCount>
        <d2p1:DeadLetterMessageCount>5</d2p1:DeadLetterMessageCount>
        <d2p1:ScheduledMessageCount>0</d2p1:ScheduledMessageCount>
      </CountDetails>
    </QueueDescription>
  </content>
</entry>"#;

    #[test]
    fn test_counts_are_parsed_from_description() {
        let counts = parse_queue_counts("orders", DESCRIPTION).unwrap();
        assert_eq!(counts.active, 7);
        assert_eq!(counts.dead_letter, 5);
        assert_eq!(counts.for_queue_type(QueueType::DeadLetter), 5);
    }

    #[test]
    fn test_empty_feed_is_not_found() {
        let body = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title type="text">Publicly Listed Services</title></feed>"#;
        assert_eq!(
            parse_queue_counts("missing", body),
            Err(ServiceBusError::NotFound {
                entity: "missing".to_string()
            })
        );
    }

    #[test]
    fn test_missing_count_element_is_an_error() {
        let body = "<QueueDescription><CountDetails></CountDetails></QueueDescription>";
        let err = parse_queue_counts("orders", body).unwrap_err();
        assert!(matches!(err, ServiceBusError::Transport { .. }));
        assert!(err.to_string().contains("ActiveMessageCount not found"));
    }

    #[test]
    fn test_count_elements_with_attributes_and_whitespace() {
        let body = r#"<QueueDescription>
  <CountDetails xmlns:d3p1="urn:counts">
    <d3p1:ActiveMessageCount xmlns:i="urn:i" >
      42
    </d3p1:ActiveMessageCount>
    <DeadLetterMessageCount kind="dlq">3</DeadLetterMessageCount>
  </CountDetails>
</QueueDescription>"#;
        assert_eq!(
            parse_queue_counts("orders", body).unwrap(),
            QueueCounts {
                active: 42,
                dead_letter: 3
            }
        );
    }

    #[test]
    fn test_non_numeric_count_is_an_error() {
        let body = "<QueueDescription><ActiveMessageCount>many</ActiveMessageCount>\
                    <DeadLetterMessageCount>0</DeadLetterMessageCount></QueueDescription>";
        assert!(matches!(
            parse_queue_counts("orders", body),
            Err(ServiceBusError::Transport { .. })
        ));
    }

    #[test]
    fn test_title_mentioning_description_is_still_not_found() {
        let body = r#"<feed><title>QueueDescription</title></feed>"#;
        assert!(matches!(
            parse_queue_counts("orders", body),
            Err(ServiceBusError::NotFound { .. })
        ));
    }
}
