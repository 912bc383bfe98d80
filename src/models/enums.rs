use serde::{Deserialize, Serialize};

use super::ParseEnumError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
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

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ParseEnumError {
                        field: stringify!($name),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(DocumentType {
    Passport => "passport",
    License => "license",
    NationalId => "national_id",
});

str_enum!(Outcome {
    Accept => "accept",
    Review => "review",
    Reject => "reject",
});

impl DocumentType {
    /// Parse a caller-declared type hint. Accepts the canonical names plus
    /// the spellings upload forms tend to send.
    pub fn from_hint(hint: &str) -> Result<Self, ParseEnumError> {
        let normalized = hint.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "passport" => Ok(Self::Passport),
            "license" | "licence" | "driver_license" | "drivers_license"
            | "driving_licence" | "driving_license" => Ok(Self::License),
            "national_id" | "id" | "id_card" | "identity_card" | "national_id_card" => {
                Ok(Self::NationalId)
            }
            _ => Err(ParseEnumError {
                field: "DocumentType",
                value: hint.into(),
            }),
        }
    }

    /// Human label used in prompts.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Passport => "passport",
            Self::License => "driver's license",
            Self::NationalId => "national identity card",
        }
    }
}
