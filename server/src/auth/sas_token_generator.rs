use crate::service_bus_manager::errors::{ServiceBusError, ServiceBusResult};
use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generator for Service Bus Shared Access Signature (SAS) tokens.
///
/// Tokens are scoped to the whole namespace and signed with HMAC-SHA256
/// over the URL-encoded resource URI and the expiry timestamp.
///
/// # Examples
///
/// ```no_run
/// use server::auth::SasTokenGenerator;
///
/// let generator = SasTokenGenerator::new("contoso.servicebus.windows.net".to_string());
/// let token = generator
///     .generate_sas_token("RootManageSharedAccessKey", "c2VjcmV0", 1)
///     .unwrap();
/// assert!(token.starts_with("SharedAccessSignature sr="));
/// ```
#[derive(Clone, Debug)]
pub struct SasTokenGenerator {
    host: String,
}

impl SasTokenGenerator {
    /// `host` is the fully qualified namespace host.
    pub fn new(host: String) -> Self {
        Self { host }
    }

    pub fn resource_uri(&self) -> String {
        format!("https://{}/", self.host)
    }

    /// Generates a token valid for `duration_hours`.
    ///
    /// The shared access key is used as-is for signing, not base64 decoded.
    pub fn generate_sas_token(
        &self,
        key_name: &str,
        key: &str,
        duration_hours: i64,
    ) -> ServiceBusResult<String> {
        let expiry = Utc::now() + Duration::hours(duration_hours);
        self.sign(key_name, key, expiry.timestamp())
    }

    fn sign(&self, key_name: &str, key: &str, expiry_timestamp: i64) -> ServiceBusResult<String> {
        let resource_uri = self.resource_uri();
        let encoded_uri = urlencoding::encode(&resource_uri);
        let string_to_sign = format!("{encoded_uri}\n{expiry_timestamp}");

        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| {
            ServiceBusError::Unauthorized {
                operation: format!("sign SAS token: {e}"),
            }
        })?;
        mac.update(string_to_sign.as_bytes());
        let signature = general_purpose::STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
            encoded_uri,
            urlencoding::encode(&signature),
            expiry_timestamp,
            key_name
        ))
    }
}
