//! Credential-submit command grammar
//!
//! The write-only channel accepts the literals `SCAN` and `PAIR`, or a
//! credential pair `<ssid>/<password>` split on the first `/`. Anything
//! else is rejected and surfaces as a `WIFI_FAIL` status with no join
//! attempt.

use thiserror::Error;

use crate::wifi::{MAX_PASSWORD_LEN, MAX_SSID_LEN};

// ----------------------------------------------------------------------------
// Command Types
// ----------------------------------------------------------------------------

/// Parsed command from the credential-submit channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialCommand {
    /// Trigger a network scan
    Scan,
    /// Open the pairing window
    Pair,
    /// Join the named network. Empty password means an open network.
    Join { ssid: String, password: String },
}

/// Why a credential-submit write failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Empty write")]
    Empty,

    #[error("Payload is not valid UTF-8")]
    NotUtf8,

    #[error("No credential separator present")]
    MissingSeparator,

    #[error("Network name is empty")]
    EmptySsid,

    #[error("Network name exceeds {MAX_SSID_LEN} bytes")]
    SsidTooLong,

    #[error("Password exceeds {MAX_PASSWORD_LEN} bytes")]
    PasswordTooLong,
}

// ----------------------------------------------------------------------------
// Parser
// ----------------------------------------------------------------------------

impl CredentialCommand {
    /// Parse a raw credential-submit payload
    pub fn parse(raw: &[u8]) -> Result<Self, CommandError> {
        if raw.is_empty() {
            return Err(CommandError::Empty);
        }
        let text = core::str::from_utf8(raw).map_err(|_| CommandError::NotUtf8)?;

        match text {
            "SCAN" => return Ok(CredentialCommand::Scan),
            "PAIR" => return Ok(CredentialCommand::Pair),
            _ => {}
        }

        let (ssid, password) = text
            .split_once('/')
            .ok_or(CommandError::MissingSeparator)?;
        if ssid.is_empty() {
            return Err(CommandError::EmptySsid);
        }
        if ssid.len() > MAX_SSID_LEN {
            return Err(CommandError::SsidTooLong);
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(CommandError::PasswordTooLong);
        }

        Ok(CredentialCommand::Join {
            ssid: ssid.to_string(),
            password: password.to_string(),
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_commands() {
        assert_eq!(CredentialCommand::parse(b"SCAN"), Ok(CredentialCommand::Scan));
        assert_eq!(CredentialCommand::parse(b"PAIR"), Ok(CredentialCommand::Pair));
        // Literals are exact, not prefixes
        assert!(CredentialCommand::parse(b"SCANNER").is_err());
    }

    #[test]
    fn test_join_splits_on_first_separator() {
        assert_eq!(
            CredentialCommand::parse(b"myssid/mypassword"),
            Ok(CredentialCommand::Join {
                ssid: "myssid".to_string(),
                password: "mypassword".to_string(),
            })
        );
        // Password may itself contain the separator
        assert_eq!(
            CredentialCommand::parse(b"net/p/a/ss"),
            Ok(CredentialCommand::Join {
                ssid: "net".to_string(),
                password: "p/a/ss".to_string(),
            })
        );
    }

    #[test]
    fn test_open_network_has_empty_password() {
        assert_eq!(
            CredentialCommand::parse(b"cafe/"),
            Ok(CredentialCommand::Join {
                ssid: "cafe".to_string(),
                password: String::new(),
            })
        );
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(
            CredentialCommand::parse(b"garbage"),
            Err(CommandError::MissingSeparator)
        );
        assert_eq!(CredentialCommand::parse(b""), Err(CommandError::Empty));
        assert_eq!(
            CredentialCommand::parse(b"/password"),
            Err(CommandError::EmptySsid)
        );
        assert_eq!(
            CredentialCommand::parse(&[0xFF, 0xFE, b'/']),
            Err(CommandError::NotUtf8)
        );
    }

    #[test]
    fn test_field_length_caps() {
        let long_ssid = format!("{}/pw", "s".repeat(MAX_SSID_LEN + 1));
        assert_eq!(
            CredentialCommand::parse(long_ssid.as_bytes()),
            Err(CommandError::SsidTooLong)
        );
        let long_password = format!("net/{}", "p".repeat(MAX_PASSWORD_LEN + 1));
        assert_eq!(
            CredentialCommand::parse(long_password.as_bytes()),
            Err(CommandError::PasswordTooLong)
        );
        let max_ok = format!(
            "{}/{}",
            "s".repeat(MAX_SSID_LEN),
            "p".repeat(MAX_PASSWORD_LEN)
        );
        assert!(CredentialCommand::parse(max_ok.as_bytes()).is_ok());
    }
}
