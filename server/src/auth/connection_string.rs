use super::SasTokenGenerator;
use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use std::fmt;

/// The parts of a Service Bus connection string the tool needs.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    raw: String,
    /// Fully qualified namespace host, e.g. `ns.servicebus.windows.net`
    pub host: String,
    pub key_name: String,
    pub key: String,
}

impl ConnectionString {
    /// Parses `Endpoint=sb://host/;SharedAccessKeyName=..;SharedAccessKey=..`.
    ///
    /// Keys are matched case-sensitively and may appear in any order. Values
    /// may themselves contain `=` (base64 keys usually end with one).
    pub fn parse(value: &str) -> ServiceBusResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ServiceBusError::invalid_configuration(
                "connection string cannot be empty",
            ));
        }

        let mut host = None;
        let mut key_name = None;
        let mut key = None;

        for part in value.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            if let Some(endpoint) = part.strip_prefix("Endpoint=") {
                let without_scheme = endpoint
                    .find("://")
                    .map(|pos| &endpoint[pos + 3..])
                    .unwrap_or(endpoint);
                let trimmed = without_scheme.trim_end_matches('/');
                if !trimmed.is_empty() {
                    host = Some(trimmed.to_string());
                }
            } else if let Some(kn) = part.strip_prefix("SharedAccessKeyName=") {
                key_name = Some(kn.to_string());
            } else if let Some(k) = part.strip_prefix("SharedAccessKey=") {
                key = Some(k.to_string());
            }
        }

        let host = host.ok_or_else(|| {
            ServiceBusError::invalid_configuration("missing Endpoint in connection string")
        })?;
        let key_name = key_name.ok_or_else(|| {
            ServiceBusError::invalid_configuration(
                "missing SharedAccessKeyName in connection string",
            )
        })?;
        let key = key.ok_or_else(|| {
            ServiceBusError::invalid_configuration("missing SharedAccessKey in connection string")
        })?;

        Ok(Self {
            raw: value.to_string(),
            host,
            key_name,
            key,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Namespace name, the first label of the host.
    pub fn namespace(&self) -> &str {
        self.host.split('.').next().unwrap_or(&self.host)
    }

    pub fn sas_generator(&self) -> SasTokenGenerator {
        SasTokenGenerator::new(self.host.clone())
    }
}

// Keeps the shared access key out of log lines.
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host", &self.host)
            .field("key_name", &self.key_name)
            .field("key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = "Endpoint=sb://contoso.servicebus.windows.net/;SharedAccessKeyName=RootManageSharedAccessKey;SharedAccessKey=c2VjcmV0a2V5PQ==";

    #[test]
    fn test_parse_valid_connection_string() {
        let parsed = ConnectionString::parse(VALID).unwrap();
        assert_eq!(parsed.host, "contoso.servicebus.windows.net");
        assert_eq!(parsed.namespace(), "contoso");
        assert_eq!(parsed.key_name, "RootManageSharedAccessKey");
        assert_eq!(parsed.key, "c2VjcmV0a2V5PQ==");
        assert_eq!(parsed.as_str(), VALID);
    }

    #[test]
    fn test_missing_parts_are_invalid_configuration() {
        for value in [
            "",
            "SharedAccessKeyName=a;SharedAccessKey=b",
            "Endpoint=sb://x.servicebus.windows.net/;SharedAccessKey=b",
            "Endpoint=sb://x.servicebus.windows.net/;SharedAccessKeyName=a",
        ] {
            assert!(matches!(
                ConnectionString::parse(value),
                Err(ServiceBusError::InvalidConfiguration(_))
            ));
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let parsed = ConnectionString::parse(VALID).unwrap();
        let rendered = format!("{parsed:?}");
        assert!(!rendered.contains("c2VjcmV0a2V5PQ=="));
    }
}
