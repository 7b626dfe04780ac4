//! Shared domain types: beacon identity, observations, and semantic events.
//!
//! A beacon is identified by the triple of region UUID + major + minor.
//! Identity equality is structural, so two observations of the same physical
//! beacon always key to the same presence state and history entries.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::BeckonError;

/// The identity of a physical beacon: region UUID + major + minor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct BeaconId {
    /// Region UUID shared by a fleet of beacons.
    pub uuid: Uuid,

    /// Major value (subdivides a region, e.g. one building).
    #[schema(example = 1001)]
    pub major: u16,

    /// Minor value (a single beacon within a major group).
    #[schema(example = 7)]
    pub minor: u16,
}

impl BeaconId {
    /// Create a beacon identity from its three parts.
    #[must_use]
    pub const fn new(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self { uuid, major, minor }
    }
}

impl fmt::Display for BeaconId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.uuid, self.major, self.minor)
    }
}

impl FromStr for BeaconId {
    type Err = BeckonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let pattern: BeaconPattern = s.parse()?;
        match (pattern.major, pattern.minor) {
            (Some(major), Some(minor)) => Ok(Self::new(pattern.uuid, major, minor)),
            _ => Err(BeckonError::Parse(format!(
                "beacon identity '{s}' must specify uuid, major and minor"
            ))),
        }
    }
}

/// A single sighting of a beacon advertisement.
///
/// Observations are ephemeral: they are produced per scan tick, classified
/// into [`BeaconEvent`]s, and never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BeaconObservation {
    /// Identity of the sighted beacon.
    pub beacon: BeaconId,

    /// Received signal strength in dBm (negative; closer to zero is nearer).
    #[schema(example = -67)]
    pub rssi_dbm: i16,

    /// Calibrated transmit power at 1 m, if the advertisement carried one.
    #[schema(example = -59)]
    pub measured_power: Option<i16>,

    /// Estimated distance in meters, if the observation source computed one.
    pub distance_m: Option<f64>,

    /// When the advertisement was received (UTC).
    pub observed_at: DateTime<Utc>,
}

/// The semantic meaning of an observation for a tracked beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The beacon came into range.
    Enter,
    /// The beacon went out of range.
    Exit,
    /// Routine re-sighting of an already-present beacon; no state change.
    None,
}

impl EventKind {
    /// Returns `true` for the kinds that change presence state.
    #[inline]
    #[must_use]
    pub const fn is_transition(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enter => write!(f, "enter"),
            Self::Exit => write!(f, "exit"),
            Self::None => write!(f, "none"),
        }
    }
}

/// A classified enter/exit event for a beacon. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BeaconEvent {
    /// Identity of the beacon the event refers to.
    pub beacon: BeaconId,

    /// Whether the beacon entered, exited, or nothing changed.
    pub kind: EventKind,

    /// Timestamp of the observation that produced this event.
    pub occurred_at: DateTime<Utc>,
}

/// Matches `uuid`, `uuid:major`, `uuid:major:minor`, with `*` wildcards for
/// the numeric parts.
static PATTERN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})(?::(\*|\d{1,5}))?(?::(\*|\d{1,5}))?$")
        .expect("beacon pattern regex is valid")
});

/// A rule trigger pattern over beacon identities.
///
/// `major`/`minor` of `None` are wildcards: the pattern
/// `f7826da6-4fa2-4e98-8024-bc5b71e0893e:1001` matches every minor under
/// major 1001 in that region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconPattern {
    /// Region UUID; always required.
    pub uuid: Uuid,
    /// Major value to match, or `None` for any.
    pub major: Option<u16>,
    /// Minor value to match, or `None` for any.
    pub minor: Option<u16>,
}

impl BeaconPattern {
    /// Returns `true` if the given identity falls under this pattern.
    #[must_use]
    pub fn matches(&self, id: &BeaconId) -> bool {
        self.uuid == id.uuid
            && self.major.map_or(true, |major| major == id.major)
            && self.minor.map_or(true, |minor| minor == id.minor)
    }
}

impl fmt::Display for BeaconPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid)?;
        match (self.major, self.minor) {
            (Some(major), Some(minor)) => write!(f, ":{major}:{minor}"),
            (Some(major), None) => write!(f, ":{major}:*"),
            (None, Some(minor)) => write!(f, ":*:{minor}"),
            (None, None) => Ok(()),
        }
    }
}

impl FromStr for BeaconPattern {
    type Err = BeckonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = PATTERN_RE
            .captures(s.trim())
            .ok_or_else(|| BeckonError::Parse(format!("invalid beacon pattern: '{s}'")))?;

        let uuid = Uuid::parse_str(&caps[1])
            .map_err(|e| BeckonError::Parse(format!("invalid beacon UUID in '{s}': {e}")))?;

        let part = |idx: usize| -> Result<Option<u16>, BeckonError> {
            match caps.get(idx).map(|m| m.as_str()) {
                None | Some("*") => Ok(None),
                Some(num) => num.parse::<u16>().map(Some).map_err(|_| {
                    BeckonError::Parse(format!("beacon pattern value out of range in '{s}'"))
                }),
            }
        };

        Ok(Self {
            uuid,
            major: part(2)?,
            minor: part(3)?,
        })
    }
}

impl Serialize for BeaconPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BeaconPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region() -> Uuid {
        Uuid::parse_str("f7826da6-4fa2-4e98-8024-bc5b71e0893e").unwrap()
    }

    #[test]
    fn test_beacon_id_display_round_trip() {
        let id = BeaconId::new(region(), 1001, 7);
        let parsed: BeaconId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_beacon_id_requires_all_parts() {
        let err = format!("{}", region()).parse::<BeaconId>().unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_beacon_id_structural_equality() {
        let a = BeaconId::new(region(), 1, 2);
        let b = BeaconId::new(region(), 1, 2);
        assert_eq!(a, b);
        assert_ne!(a, BeaconId::new(region(), 1, 3));
    }

    #[test]
    fn test_pattern_exact_match() {
        let pattern: BeaconPattern = format!("{}:1001:7", region()).parse().unwrap();
        assert!(pattern.matches(&BeaconId::new(region(), 1001, 7)));
        assert!(!pattern.matches(&BeaconId::new(region(), 1001, 8)));
    }

    #[test]
    fn test_pattern_wildcard_minor() {
        let pattern: BeaconPattern = format!("{}:1001:*", region()).parse().unwrap();
        assert!(pattern.matches(&BeaconId::new(region(), 1001, 1)));
        assert!(pattern.matches(&BeaconId::new(region(), 1001, 9999)));
        assert!(!pattern.matches(&BeaconId::new(region(), 1002, 1)));
    }

    #[test]
    fn test_pattern_region_only() {
        let pattern: BeaconPattern = format!("{}", region()).parse().unwrap();
        assert!(pattern.matches(&BeaconId::new(region(), 42, 42)));

        let other = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert!(!pattern.matches(&BeaconId::new(other, 42, 42)));
    }

    #[test]
    fn test_pattern_rejects_garbage() {
        assert!("not-a-uuid".parse::<BeaconPattern>().is_err());
        assert!(format!("{}:99999", region()).parse::<BeaconPattern>().is_err());
        assert!(format!("{}:1:2:3", region()).parse::<BeaconPattern>().is_err());
    }

    #[test]
    fn test_pattern_serde_as_string() {
        let pattern: BeaconPattern = format!("{}:1001:*", region()).parse().unwrap();
        let json = serde_json::to_string(&pattern).unwrap();
        assert_eq!(json, format!("\"{}:1001:*\"", region()));

        let back: BeaconPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(pattern, back);
    }

    #[test]
    fn test_event_kind_transition() {
        assert!(EventKind::Enter.is_transition());
        assert!(EventKind::Exit.is_transition());
        assert!(!EventKind::None.is_transition());
    }
}
