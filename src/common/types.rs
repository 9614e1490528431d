/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Defines a Discord snowflake newtype.
///
/// The platform ships snowflakes as JSON strings (they overflow a JS number),
/// so these accept both strings and numbers and always serialize as strings.
macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl From<u64> for $name {
            fn from(v: u64) -> Self {
                Self(v)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(serde::Deserialize)]
                #[serde(untagged)]
                enum Raw {
                    Str(String),
                    Num(u64),
                }

                match Raw::deserialize(deserializer)? {
                    Raw::Str(s) => s.parse().map(Self).map_err(serde::de::Error::custom),
                    Raw::Num(n) => Ok(Self(n)),
                }
            }
        }
    };
}

snowflake_id!(
    /// A guild (tenant) on the voice platform.
    GuildId
);
snowflake_id!(ChannelId);
snowflake_id!(UserId);

/// Identifier of a station record in the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct StationId(pub i64);

impl From<i64> for StationId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl std::fmt::Display for StationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_accept_strings_and_numbers() {
        let from_str: GuildId = serde_json::from_str("\"81384788765712384\"").unwrap();
        let from_num: GuildId = serde_json::from_str("81384788765712384").unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(
            serde_json::to_string(&from_str).unwrap(),
            "\"81384788765712384\""
        );
    }

    #[test]
    fn snowflake_rejects_garbage() {
        assert!(serde_json::from_str::<ChannelId>("\"general\"").is_err());
    }

    #[test]
    fn station_id_parses_select_menu_values() {
        assert_eq!(" 42".parse::<StationId>().unwrap(), StationId(42));
    }
}
