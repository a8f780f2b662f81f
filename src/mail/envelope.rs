//! RFC 5322 message construction for the provider's raw send API.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use lettre::Message;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;

use crate::dispatch::OwnerProfile;
use crate::error::DispatchError;

/// Build the message and return it base64url-encoded without padding.
pub fn build_raw_message(
    owner: &OwnerProfile,
    recipient: &str,
    subject: &str,
    body: &str,
) -> Result<String, DispatchError> {
    let from_address = owner
        .email
        .trim()
        .parse()
        .map_err(|e| DispatchError::Envelope(format!("Invalid sender address: {e}")))?;
    let display_name = Some(owner.display_name.trim())
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let from = Mailbox::new(display_name, from_address);

    let to: Mailbox = recipient
        .trim()
        .parse()
        .map_err(|e| DispatchError::Envelope(format!("Invalid recipient address: {e}")))?;

    let message = Message::builder()
        .from(from)
        .to(to)
        .subject(subject)
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_string())
        .map_err(|e| DispatchError::Envelope(format!("Failed to build email: {e}")))?;

    Ok(URL_SAFE_NO_PAD.encode(message.formatted()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerProfile {
        OwnerProfile {
            owner_id: "u1".into(),
            display_name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
        }
    }

    fn decode(raw: &str) -> String {
        String::from_utf8(URL_SAFE_NO_PAD.decode(raw).unwrap()).unwrap()
    }

    #[test]
    fn message_has_headers_and_body() {
        let raw = build_raw_message(&owner(), "jobs@acme.com", "Hello Acme", "Hi there").unwrap();
        assert!(!raw.contains('='));
        assert!(!raw.contains('+'));
        assert!(!raw.contains('/'));

        let text = decode(&raw);
        assert!(text.contains("Subject: Hello Acme"));
        assert!(text.contains("To: jobs@acme.com"));
        assert!(text.contains("Ada Lovelace"));
        assert!(text.contains("<ada@example.com>"));
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.contains("Hi there"));
    }

    #[test]
    fn blank_display_name_uses_bare_address() {
        let mut owner = owner();
        owner.display_name = "  ".into();
        let text = decode(&build_raw_message(&owner, "jobs@acme.com", "s", "b").unwrap());
        assert!(text.contains("From: ada@example.com"));
    }

    #[test]
    fn invalid_addresses_are_envelope_errors() {
        let err = build_raw_message(&owner(), "not an address", "s", "b").unwrap_err();
        assert!(matches!(err, DispatchError::Envelope(msg) if msg.contains("recipient")));

        let mut owner = owner();
        owner.email = "nope".into();
        let err = build_raw_message(&owner, "jobs@acme.com", "s", "b").unwrap_err();
        assert!(matches!(err, DispatchError::Envelope(msg) if msg.contains("sender")));
    }
}
