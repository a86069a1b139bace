use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr + Display pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }
    };
}

str_enum!(MessageType {
    User => "user",
    Ai => "ai",
});

str_enum!(PlanTier {
    Free => "free",
    Pro => "pro",
    ProMax => "pro_max",
});

str_enum!(LimitCategory {
    Conversations => "conversations",
    Messages => "messages",
    Specialist => "specialist",
});

impl PlanTier {
    /// Tier order used by monotonicity checks: free < pro < pro_max.
    pub const ALL: [PlanTier; 3] = [PlanTier::Free, PlanTier::Pro, PlanTier::ProMax];
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn message_type_round_trip() {
        for (variant, s) in [(MessageType::User, "user"), (MessageType::Ai, "ai")] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(MessageType::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn plan_tier_round_trip() {
        for (variant, s) in [
            (PlanTier::Free, "free"),
            (PlanTier::Pro, "pro"),
            (PlanTier::ProMax, "pro_max"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(PlanTier::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn message_type_serializes_to_wire_form() {
        assert_eq!(serde_json::to_string(&MessageType::Ai).unwrap(), "\"ai\"");
        assert_eq!(
            serde_json::to_string(&PlanTier::ProMax).unwrap(),
            "\"pro_max\""
        );
    }

    #[test]
    fn invalid_enum_returns_error() {
        assert!(MessageType::from_str("system").is_err());
        assert!(PlanTier::from_str("enterprise").is_err());
        assert!(LimitCategory::from_str("").is_err());
    }
}
