//! Outbound mail: message construction and the provider transport.

pub mod envelope;
pub mod transport;

pub use envelope::build_raw_message;
pub use transport::{GmailTransport, MailTransport};
