use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Account id. Allocated by the database and never reused.
pub type UserId = i64;
pub type MatchId = i64;
pub type ConversationId = i64;
pub type MessageId = i64;

/// Error returned when a stored or submitted enum value is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a string-backed enum with `as_str`, `Display` and `FromStr`, so the same
/// spelling is used on the wire (serde) and in SQLite TEXT columns.
macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

text_enum!(Gender, "gender" {
    Male => "male",
    Female => "female",
    Other => "other",
});

text_enum!(
    /// Content type of a chat message.
    MessageKind, "message type" {
        Text => "text",
        Image => "image",
        Emoji => "emoji",
    }
);

impl Default for MessageKind {
    fn default() -> Self {
        Self::Text
    }
}

text_enum!(ReportStatus, "report status" {
    Pending => "pending",
    Reviewed => "reviewed",
    Resolved => "resolved",
    Dismissed => "dismissed",
});

text_enum!(
    /// Status an admin can put an account into. `Suspended` deactivates the account
    /// the same way `Inactive` does.
    UserStatus, "user status" {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
    }
);

text_enum!(NotificationKind, "notification kind" {
    Match => "match",
    Message => "message",
});

text_enum!(AdminRole, "admin role" {
    SuperAdmin => "super_admin",
    Moderator => "moderator",
    Support => "support",
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_enums_parse_their_own_spelling() {
        assert_eq!("emoji".parse::<MessageKind>().unwrap(), MessageKind::Emoji);
        assert_eq!(ReportStatus::Dismissed.as_str(), "dismissed");
        assert_eq!("super_admin".parse::<AdminRole>().unwrap(), AdminRole::SuperAdmin);
    }

    #[test]
    fn unknown_value_is_reported() {
        let err = "sticker".parse::<MessageKind>().unwrap_err();
        assert_eq!(err.to_string(), "unknown message type: 'sticker'");
    }

    #[test]
    fn serde_matches_column_spelling() {
        let json = serde_json::to_string(&UserStatus::Suspended).unwrap();
        assert_eq!(json, "\"suspended\"");
        let kind: MessageKind = serde_json::from_str("\"image\"").unwrap();
        assert_eq!(kind, MessageKind::Image);
    }
}
