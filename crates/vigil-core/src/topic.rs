// ── Topic naming and feature values ──
//
// A camera feature maps to exactly two bus topics:
//   `{camera}/{feature}/state`  (inbound authoritative values)
//   `{camera}/{feature}/set`    (outbound commands)
// Names are derived deterministically so independent bindings for the
// same pair collapse onto one registry entry and one wire subscription.

use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const STATE_SUFFIX: &str = "state";
const COMMAND_SUFFIX: &str = "set";

// ── Feature ─────────────────────────────────────────────────────────

/// A per-camera feature exposed on the bus.
///
/// The first four are the dashboard toggles. `Other` keeps the mechanism
/// open to features this crate has no name for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Feature {
    Detect,
    Recordings,
    Snapshots,
    Audio,
    Motion,
    ImproveContrast,
    PtzAutotracker,
    MotionThreshold,
    MotionContourArea,
    Other(String),
}

impl Feature {
    /// The toggles shown per camera on the dashboard, in display order.
    pub const DASHBOARD: [Feature; 4] = [
        Feature::Detect,
        Feature::Recordings,
        Feature::Snapshots,
        Feature::Audio,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Detect => "detect",
            Self::Recordings => "recordings",
            Self::Snapshots => "snapshots",
            Self::Audio => "audio",
            Self::Motion => "motion",
            Self::ImproveContrast => "improve_contrast",
            Self::PtzAutotracker => "ptz_autotracker",
            Self::MotionThreshold => "motion_threshold",
            Self::MotionContourArea => "motion_contour_area",
            Self::Other(name) => name,
        }
    }

    /// Whether the feature carries an `ON`/`OFF` payload.
    pub fn is_toggle(&self) -> bool {
        !matches!(
            self,
            Self::MotionThreshold | Self::MotionContourArea | Self::Other(_)
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Feature {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let feature = match s {
            "detect" => Self::Detect,
            "recordings" => Self::Recordings,
            "snapshots" => Self::Snapshots,
            "audio" => Self::Audio,
            "motion" => Self::Motion,
            "improve_contrast" => Self::ImproveContrast,
            "ptz_autotracker" => Self::PtzAutotracker,
            "motion_threshold" => Self::MotionThreshold,
            "motion_contour_area" => Self::MotionContourArea,
            other => {
                validate_component(other)?;
                Self::Other(other.to_owned())
            }
        };
        Ok(feature)
    }
}

impl TryFrom<String> for Feature {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Feature> for String {
    fn from(feature: Feature) -> Self {
        feature.as_str().to_owned()
    }
}

/// Reject path separators, wildcards, and empty names in a topic component.
fn validate_component(value: &str) -> Result<(), CoreError> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value.contains('/') {
        "must not contain '/'"
    } else if value.contains(['#', '+']) {
        "must not contain wildcard characters"
    } else if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        "must not contain whitespace or control characters"
    } else {
        return Ok(());
    };

    Err(CoreError::InvalidTopic {
        value: value.to_owned(),
        reason: reason.into(),
    })
}

// ── Topic ───────────────────────────────────────────────────────────

/// A full bus topic string, e.g. `front_door/detect/state`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    pub fn new(topic: impl Into<String>) -> Self {
        Self(topic.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Topic {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ── TopicKey ────────────────────────────────────────────────────────

/// A validated (camera, feature) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    camera: String,
    feature: Feature,
}

impl TopicKey {
    pub fn new(camera: impl Into<String>, feature: Feature) -> Result<Self, CoreError> {
        let camera = camera.into();
        validate_component(&camera)?;
        Ok(Self { camera, feature })
    }

    pub fn camera(&self) -> &str {
        &self.camera
    }

    pub fn feature(&self) -> &Feature {
        &self.feature
    }

    /// Topic the backend publishes authoritative values on.
    pub fn state_topic(&self) -> Topic {
        Topic(format!("{}/{}/{STATE_SUFFIX}", self.camera, self.feature))
    }

    /// Topic commands are published to.
    pub fn command_topic(&self) -> Topic {
        Topic(format!("{}/{}/{COMMAND_SUFFIX}", self.camera, self.feature))
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.camera, self.feature)
    }
}

/// Parses `camera/feature`.
impl FromStr for TopicKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((camera, feature)) = s.split_once('/') else {
            return Err(CoreError::InvalidTopic {
                value: s.to_owned(),
                reason: "expected <camera>/<feature>".into(),
            });
        };
        Self::new(camera, feature.parse()?)
    }
}

// ── Toggle ──────────────────────────────────────────────────────────

/// Two-valued payload used by the dashboard features.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn is_on(self) -> bool {
        self == Self::On
    }

    /// The opposite value.
    pub fn toggled(self) -> Self {
        match self {
            Self::On => Self::Off,
            Self::Off => Self::On,
        }
    }
}

impl From<bool> for Toggle {
    fn from(on: bool) -> Self {
        if on { Self::On } else { Self::Off }
    }
}

// ── StateValue ──────────────────────────────────────────────────────

/// A value type a state channel can carry.
pub trait StateValue: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static {}

impl<T> StateValue for T where T: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static
{}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn topics_follow_naming_convention() {
        let key = TopicKey::new("front_door", Feature::Detect).unwrap();
        assert_eq!(key.state_topic().as_str(), "front_door/detect/state");
        assert_eq!(key.command_topic().as_str(), "front_door/detect/set");
        assert_eq!(key.to_string(), "front_door/detect");
    }

    #[test]
    fn identical_pairs_produce_identical_topics() {
        let a = TopicKey::new("garage", Feature::Recordings).unwrap();
        let b = TopicKey::new(String::from("garage"), "recordings".parse().unwrap()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.state_topic(), b.state_topic());
    }

    #[test]
    fn feature_round_trips_through_string() {
        for feature in [
            Feature::Detect,
            Feature::ImproveContrast,
            Feature::PtzAutotracker,
            Feature::MotionContourArea,
        ] {
            assert_eq!(feature.to_string().parse::<Feature>().unwrap(), feature);
        }
    }

    #[test]
    fn unknown_feature_is_kept_verbatim() {
        let feature: Feature = "birdseye".parse().unwrap();
        assert_eq!(feature, Feature::Other("birdseye".into()));
        assert!(!feature.is_toggle());
    }

    #[test]
    fn camera_with_separator_is_rejected() {
        let err = TopicKey::new("front/door", Feature::Audio).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTopic { .. }));
        assert!(TopicKey::new("", Feature::Audio).is_err());
        assert!(TopicKey::new("yard+", Feature::Audio).is_err());
        assert!("front door".parse::<Feature>().is_err());
    }

    #[test]
    fn topic_key_parses_camera_and_feature() {
        let key: TopicKey = "yard/snapshots".parse().unwrap();
        assert_eq!(key.camera(), "yard");
        assert_eq!(key.feature(), &Feature::Snapshots);
        assert!("yard".parse::<TopicKey>().is_err());
        assert!("yard/snapshots/state".parse::<TopicKey>().is_err());
    }

    #[test]
    fn toggle_wire_format() {
        assert_eq!(serde_json::to_value(Toggle::On).unwrap(), serde_json::json!("ON"));
        let off: Toggle = serde_json::from_value(serde_json::json!("OFF")).unwrap();
        assert_eq!(off, Toggle::Off);
        assert_eq!("on".parse::<Toggle>().unwrap(), Toggle::On);
        assert_eq!(Toggle::Off.to_string(), "OFF");
        assert_eq!(Toggle::On.toggled(), Toggle::Off);
    }

    #[test]
    fn feature_serializes_as_plain_string() {
        let json = serde_json::to_string(&Feature::MotionThreshold).unwrap();
        assert_eq!(json, r#""motion_threshold""#);
        let back: Feature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Feature::MotionThreshold);
    }
}
