//! Connection string parsing and SAS token generation.
//!
//! The message transport authenticates with the raw connection string; the
//! entity management endpoint used for count queries needs an explicit
//! Shared Access Signature built from the same credentials.

pub mod connection_string;
pub mod sas_token_generator;

pub use connection_string::ConnectionString;
pub use sas_token_generator::SasTokenGenerator;
