//! Status and classification enums shared by the database, the pipeline
//! and the service layer.
//!
//! Each enum is stored as an upper-case TEXT column.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "SCREAMING_SNAKE_CASE")]
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
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(
                        "unknown {} value '{}'",
                        stringify!($name),
                        other
                    )),
                }
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                text.parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_enum!(
    /// Job lifecycle: `PENDING -> RUNNING -> {DONE, FAILED}`.
    JobStatus {
        Pending => "PENDING",
        Running => "RUNNING",
        Done => "DONE",
        Failed => "FAILED",
    }
);

text_enum!(
    /// Per-item processing state: `PENDING -> PROCESSING -> {SUCCESS, FAILED, SKIPPED}`.
    ItemState {
        Pending => "PENDING",
        Processing => "PROCESSING",
        Success => "SUCCESS",
        Failed => "FAILED",
        Skipped => "SKIPPED",
    }
);

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }
}

text_enum!(
    Classification {
        Pass => "PASS",
        Fail => "FAIL",
        Review => "REVIEW",
    }
);

text_enum!(
    /// How the buy-side listings for an item were found. `Unknown` means
    /// matching never completed for the item.
    MatchType {
        ExactCode => "EXACT_CODE",
        TextMatch => "TEXT_MATCH",
        None => "NONE",
        Unknown => "UNKNOWN",
    }
);

text_enum!(
    ShippingStatus {
        Free => "FREE",
        Unknown => "UNKNOWN",
    }
);

text_enum!(
    /// Who set the listing-restriction flag.
    RestrictionStatus {
        Auto => "AUTO",
        Manual => "MANUAL",
        Unknown => "UNKNOWN",
    }
);

text_enum!(
    /// Time-series metric archived from the demand provider.
    Metric {
        Price => "PRICE",
        Rank => "RANK",
    }
);
