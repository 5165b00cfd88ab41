use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::rule::Target;

/// A Segment is a reusable audience, referenced by key from SEGMENT conditions.
#[derive(Clone, Debug, PartialEq)]
pub struct Segment {
    pub id: i64,
    pub key: String,
    pub segment_type: SegmentType,
    pub targets: Vec<Target>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SegmentType {
    UserId,
    UserProperty,
}

impl Segment {
    // a segment contains the user if _any_ of its targets match
    pub fn matches_with<F>(&self, mut target_matches: F) -> Result<bool>
    where
        F: FnMut(&Target) -> Result<bool>,
    {
        for target in &self.targets {
            if target_matches(target)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
