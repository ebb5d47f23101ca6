//! String enums shared by every table. Stored as `text` columns in Postgres,
//! never as native `enum` types, so new variants don't require a migration.

use serde::{Deserialize, Serialize};
use std::fmt;

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

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    other => Err(InvalidEnumValue { value: other.to_string(), enum_name: stringify!($name) }),
                }
            }
        }
    };
}

/// Returned when a string read back from the database doesn't match any
/// known variant (a sign the binary is older than the data it's reading).
#[derive(Debug, thiserror::Error)]
#[error("invalid {enum_name} value: {value:?}")]
pub struct InvalidEnumValue {
    pub value: String,
    pub enum_name: &'static str,
}

str_enum!(ScanStatus {
    Idle => "idle",
    FullScanRequested => "full_scan_requested",
    FastScanRequested => "fast_scan_requested",
    Scanning => "scanning",
});

str_enum!(AssetType {
    Image => "image",
    Video => "video",
});

str_enum!(AssetStatus {
    Pending => "pending",
    Processing => "processing",
    Proxied => "proxied",
    Analyzing => "analyzing",
    AnalyzedLight => "analyzed_light",
    Completed => "completed",
    Failed => "failed",
    Poisoned => "poisoned",
});

impl AssetStatus {
    /// Off-ramp statuses that no worker will ever pick back up automatically.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Poisoned)
    }
}

str_enum!(WorkerState {
    Idle => "idle",
    Processing => "processing",
    Paused => "paused",
    Offline => "offline",
});

str_enum!(WorkerCommand {
    None => "none",
    Pause => "pause",
    Resume => "resume",
    Shutdown => "shutdown",
    ForensicDump => "forensic_dump",
});

str_enum!(SceneKeepReason {
    Phash => "phash",
    Temporal => "temporal",
    Forced => "forced",
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn round_trips_through_str() {
        assert_eq!(AssetStatus::from_str("processing").unwrap(), AssetStatus::Processing);
        assert_eq!(AssetStatus::Processing.as_str(), "processing");
    }

    #[test]
    fn rejects_unknown_variant() {
        assert!(AssetStatus::from_str("extracting").is_err());
    }

    #[test]
    fn terminal_failure_classification() {
        assert!(AssetStatus::Failed.is_terminal_failure());
        assert!(AssetStatus::Poisoned.is_terminal_failure());
        assert!(!AssetStatus::Completed.is_terminal_failure());
    }
}
