//! Observation replay: JSON lines in, tick outputs out.

mod pipeline;
mod watch;

pub use pipeline::{FeedOptions, run_feed};
pub use watch::ProfileWatcher;

use serde::Deserialize;

use crate::pose::Frame;

/// One observation line: `{"t": seconds, "landmarks": [...] | null}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedLine {
    pub t: f64,
    #[serde(default)]
    pub landmarks: Option<Frame>,
}

impl FeedLine {
    pub fn parse(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pose_and_lost_lines() {
        let line = FeedLine::parse(
            r#"{"t": 0.5, "landmarks": [{"x": 0.1, "y": 0.2, "z": 0.0, "visibility": 0.9}, {"x": 0.3, "y": 0.4, "z": 0.1}]}"#,
        )
        .unwrap();
        assert_eq!(line.t, 0.5);
        let frame = line.landmarks.unwrap();
        assert_eq!(frame.len(), 2);
        assert_eq!(frame.points[1].visibility, None);

        assert!(FeedLine::parse(r#"{"t": 1.0, "landmarks": null}"#).unwrap().landmarks.is_none());
        assert!(FeedLine::parse(r#"{"t": 1.0}"#).unwrap().landmarks.is_none());
        assert!(FeedLine::parse(r#"{"landmarks": null}"#).is_err());
    }
}
