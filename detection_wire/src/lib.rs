//! Messages exchanged between the browser client and the detection server.
//!
//! The live channel carries exactly one message type in each direction:
//! [`ClientFrame`] upstream and [`FrameResult`] downstream. The remaining
//! records back the request/response endpoints.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Bumped whenever a field is added, removed or changes meaning.
pub const SCHEMA_VERSION: u32 = 1;

/// Upstream frame message: `{"image": "data:image/jpeg;base64,..."}`.
///
/// Unknown fields are ignored. A message without `image` is valid JSON
/// but carries no frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientFrame {
    #[serde(default)]
    pub image: Option<String>,
}

impl ClientFrame {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// One recognized object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[left, top, right, bottom]` in source-image pixels.
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub label: String,
    pub conf: f32,
}

/// Detections for one frame plus how many times each label occurs.
///
/// Labels that were not detected are absent from `all_counts`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub detections: Vec<Detection>,
    pub all_counts: BTreeMap<String, u32>,
}

impl FrameResult {
    /// Builds a result whose counts are tallied from `detections`.
    pub fn from_detections(detections: Vec<Detection>) -> Self {
        let mut all_counts = BTreeMap::new();
        for detection in &detections {
            *all_counts.entry(detection.label.clone()).or_insert(0) += 1;
        }
        Self {
            detections,
            all_counts,
        }
    }

    /// True when every count matches the detections carrying that label
    /// and no label is present with a zero count.
    pub fn counts_consistent(&self) -> bool {
        let total: u32 = self.all_counts.values().sum();
        total as usize == self.detections.len()
            && self.all_counts.iter().all(|(label, count)| {
                *count > 0
                    && self
                        .detections
                        .iter()
                        .filter(|d| &d.label == label)
                        .count()
                        == *count as usize
            })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelList {
    pub labels: Vec<String>,
}

/// An uploaded or discovered media file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: u64,
    pub name: String,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryList {
    pub history: Vec<HistoryRecord>,
}

/// Public part of a user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub email: String,
}

/// Body of `POST /register/`. Missing fields are reported by the server
/// rather than rejected by the parser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Body of `PUT /profile/`. Absent or empty fields are left unchanged,
/// except `email` which may be set to an empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Generic status envelope used by the history and account endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<HistoryRecord>,
    /// Bearer token handed out on login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Profile>,
}

impl StatusReply {
    pub fn success() -> Self {
        Self {
            status: "success".into(),
            ..Self::default()
        }
    }

    pub fn success_with(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success()
        }
    }

    pub fn with_record(record: HistoryRecord) -> Self {
        Self {
            record: Some(record),
            ..Self::success()
        }
    }

    pub fn with_profile(profile: Profile) -> Self {
        Self {
            data: Some(profile),
            ..Self::success()
        }
    }

    pub fn with_token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            status: "fail".into(),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}
