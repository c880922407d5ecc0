//! Kubernetes-style duration strings (`"1h0m0s"`, `"10m"`, `"90s"`).

use schemars::JsonSchema;
use schemars::r#gen::SchemaGenerator;
use schemars::schema::Schema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A duration that serializes the way the Kubernetes API does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(std::time::Duration);

impl Duration {
    pub const fn from_secs(secs: u64) -> Self {
        Self(std::time::Duration::from_secs(secs))
    }

    pub const fn from_std(d: std::time::Duration) -> Self {
        Self(d)
    }

    pub fn as_std(&self) -> std::time::Duration {
        self.0
    }

    /// The duration as a chrono delta, saturating on overflow.
    pub fn to_chrono(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::from_std(self.0).unwrap_or(chrono::TimeDelta::MAX)
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Self(d)
    }
}

impl FromStr for Duration {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        humantime::parse_duration(s.trim()).map(Self)
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.as_secs();
        let nanos = self.0.subsec_nanos();

        if secs == 0 {
            return match nanos {
                0 => write!(f, "0s"),
                n if n < 1_000 => write!(f, "{}ns", n),
                n if n < 1_000_000 => write_fraction(f, n as u64, 1_000, "µs"),
                n => write_fraction(f, n as u64, 1_000_000, "ms"),
            };
        }

        let hours = secs / 3600;
        let minutes = (secs % 3600) / 60;
        let seconds = secs % 60;

        if hours > 0 {
            write!(f, "{}h{}m", hours, minutes)?;
        } else if minutes > 0 {
            write!(f, "{}m", minutes)?;
        }
        write_fraction(f, seconds * 1_000_000_000 + nanos as u64, 1_000_000_000, "s")
    }
}

/// Write `value / unit` with the fractional part trimmed of trailing zeros.
fn write_fraction(f: &mut fmt::Formatter<'_>, value: u64, unit: u64, suffix: &str) -> fmt::Result {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return write!(f, "{}{}", whole, suffix);
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{:0width$}", frac, width = width);
    write!(f, "{}.{}{}", whole, digits.trim_end_matches('0'), suffix)
}

impl Serialize for Duration {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|e| serde::de::Error::custom(format!("invalid duration {:?}: {}", raw, e)))
    }
}

impl JsonSchema for Duration {
    fn schema_name() -> String {
        "Duration".to_string()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(generator: &mut SchemaGenerator) -> Schema {
        String::json_schema(generator)
    }
}
