//! Wire protocol: one message per line, `|`-separated fields, field 0 is the tag.
//!
//! There is no escaping. A field that itself contains the delimiter splits
//! at that point; chat text is truncated at the first `|`. This is a known
//! protocol limitation and is kept as-is.

use std::fmt;

/// Field separator for every wire message.
pub const DELIMITER: char = '|';

/// Whole-line sentinel a client sends to join without credentials.
pub const GUEST_SENTINEL: &str = "GUEST";

/// Sender name used for server-originated broadcasts.
pub const SERVER_NAME: &str = "Server";

const AUTH_TAG: &str = "AUTH";
const BCAST_TAG: &str = "BCAST";
const USERLIST_TAG: &str = "USERLIST";
const AUTH_OK_TAG: &str = "AUTH_OK";
const AUTH_FAIL_TAG: &str = "AUTH_FAIL";
const FMT_ERR_TAG: &str = "FMT_ERR";

/// Field count of a well-formed auth request, tag included.
const AUTH_REQUEST_LEN: usize = 3;

/// One parsed client→server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// `AUTH|login|password` — exactly three fields.
    Auth { login: String, password: String },
    /// The guest sentinel, matched against the whole line.
    GuestConnect,
    /// `BCAST|text`. Only field 1 is relayed; extra delimiters truncate.
    Broadcast { text: String },
    /// Any other shape, kept whole so it can be echoed in `FMT_ERR`.
    Unknown { tag: String, raw: String },
}

impl ClientMessage {
    /// Parse one received line (newline already stripped). Total: every
    /// input maps to a variant, `Unknown` being the catch-all.
    pub fn parse(line: &str) -> Self {
        if line == GUEST_SENTINEL {
            return Self::GuestConnect;
        }
        let fields: Vec<&str> = line.split(DELIMITER).collect();
        match fields[0] {
            AUTH_TAG if fields.len() == AUTH_REQUEST_LEN => Self::Auth {
                login: fields[1].to_string(),
                password: fields[2].to_string(),
            },
            BCAST_TAG if fields.len() >= 2 => Self::Broadcast {
                text: fields[1].to_string(),
            },
            tag => Self::Unknown {
                tag: tag.to_string(),
                raw: line.to_string(),
            },
        }
    }
}

/// One server→client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `BCAST|from|text` — a relayed chat line or a server notice.
    Broadcast { from: String, text: String },
    /// `USERLIST|name|name|…|` — authorized nicknames in registry order,
    /// each followed by the delimiter (so the list ends with one).
    UserList { names: Vec<String> },
    /// `AUTH_OK|nickname`
    AuthAccepted { nickname: String },
    /// `AUTH_FAIL`
    AuthRejected,
    /// `FMT_ERR|originalText` — echo of the offending line.
    FormatError { original: String },
}

impl ServerMessage {
    /// Server notice relayed as a broadcast from [`SERVER_NAME`].
    pub fn server_notice(text: impl Into<String>) -> Self {
        Self::Broadcast {
            from: SERVER_NAME.to_string(),
            text: text.into(),
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast { from, text } => {
                write!(f, "{BCAST_TAG}{DELIMITER}{from}{DELIMITER}{text}")
            }
            Self::UserList { names } => {
                write!(f, "{USERLIST_TAG}{DELIMITER}")?;
                for name in names {
                    write!(f, "{name}{DELIMITER}")?;
                }
                Ok(())
            }
            Self::AuthAccepted { nickname } => {
                write!(f, "{AUTH_OK_TAG}{DELIMITER}{nickname}")
            }
            Self::AuthRejected => f.write_str(AUTH_FAIL_TAG),
            Self::FormatError { original } => {
                write!(f, "{FMT_ERR_TAG}{DELIMITER}{original}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_auth_request() {
        assert_eq!(
            ClientMessage::parse("AUTH|alice|pw1"),
            ClientMessage::Auth {
                login: "alice".into(),
                password: "pw1".into()
            }
        );
    }

    #[test]
    fn parse_guest_sentinel_whole_line_only() {
        assert_eq!(ClientMessage::parse("GUEST"), ClientMessage::GuestConnect);
        // A prefixed or suffixed sentinel is not a guest connect.
        assert!(matches!(
            ClientMessage::parse("GUEST|x"),
            ClientMessage::Unknown { .. }
        ));
    }

    #[test]
    fn parse_broadcast_truncates_at_delimiter() {
        // No escaping: everything after the second `|` is dropped.
        assert_eq!(
            ClientMessage::parse("BCAST|hello|world"),
            ClientMessage::Broadcast {
                text: "hello".into()
            }
        );
    }

    #[test]
    fn parse_auth_with_wrong_arity_is_unknown() {
        assert!(matches!(
            ClientMessage::parse("AUTH|alice"),
            ClientMessage::Unknown { tag, .. } if tag == "AUTH"
        ));
        assert!(matches!(
            ClientMessage::parse("AUTH|alice|pw1|extra"),
            ClientMessage::Unknown { tag, .. } if tag == "AUTH"
        ));
    }

    #[test]
    fn parse_bare_broadcast_is_unknown() {
        assert!(matches!(
            ClientMessage::parse("BCAST"),
            ClientMessage::Unknown { tag, .. } if tag == "BCAST"
        ));
    }

    #[test]
    fn encode_broadcast() {
        let msg = ServerMessage::Broadcast {
            from: "Alice".into(),
            text: "hello".into(),
        };
        assert_eq!(msg.to_string(), "BCAST|Alice|hello");
    }

    #[test]
    fn encode_user_list_with_trailing_delimiter() {
        let msg = ServerMessage::UserList {
            names: vec!["Alice".into(), "Bob".into()],
        };
        assert_eq!(msg.to_string(), "USERLIST|Alice|Bob|");
    }

    #[test]
    fn encode_empty_user_list() {
        let msg = ServerMessage::UserList { names: vec![] };
        assert_eq!(msg.to_string(), "USERLIST|");
    }

    #[test]
    fn encode_auth_replies() {
        assert_eq!(
            ServerMessage::AuthAccepted {
                nickname: "Alice".into()
            }
            .to_string(),
            "AUTH_OK|Alice"
        );
        assert_eq!(ServerMessage::AuthRejected.to_string(), "AUTH_FAIL");
    }

    #[test]
    fn encode_format_error_echoes_raw_line() {
        let msg = ServerMessage::FormatError {
            original: "FOO|x|y".into(),
        };
        assert_eq!(msg.to_string(), "FMT_ERR|FOO|x|y");
    }
}
