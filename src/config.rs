// src/config.rs

use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::Path;
use tracing::info;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path))?;
        Ok(config)
    }

    /// Missing file means defaults; a present but broken file is an error.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::load(path)
        } else {
            info!("No config at {}, using defaults", path);
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        let conf = self.detection.confidence_threshold;
        if !(0.0..=1.0).contains(&conf) {
            bail!("confidence_threshold must be in [0, 1], got {}", conf);
        }
        if self.detection.min_box_height < 0.0 {
            bail!("min_box_height must be non-negative");
        }
        if self.violation.frame_threshold == 0 {
            bail!("frame_threshold must be at least 1");
        }
        if self.violation.road_tolerance < 0.0 {
            bail!("road_tolerance must be non-negative");
        }
        if self.video.frame_width == 0 || self.video.frame_height == 0 {
            bail!("frame size must be non-zero");
        }
        if self.model.input_size == 0 {
            bail!("model input_size must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::SemanticRole;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
violation:
  frame_threshold: 30
detection:
  class_roles:
    - id: 4
      role: road
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.violation.frame_threshold, 30);
        assert_eq!(config.violation.road_tolerance, 5.0);
        assert_eq!(config.detection.confidence_threshold, 0.25);
        assert_eq!(config.detection.class_roles[0].role, SemanticRole::Road);
        assert_eq!(config.video.frame_width, 1280);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_confidence() {
        let mut config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = Config::default();
        config.violation.frame_threshold = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let config = Config::load_or_default(path.to_str().unwrap()).unwrap();
        assert_eq!(config.output.report_path, "Parking_Violation_Report.xlsx");
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "violation: [not, a, map").unwrap();
        assert!(Config::load_or_default(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let config: Config = serde_yaml::from_str(include_str!("../config.yaml")).unwrap();
        let defaults = Config::default();
        assert_eq!(
            config.violation.frame_threshold,
            defaults.violation.frame_threshold
        );
        assert_eq!(config.model.path, defaults.model.path);
        assert_eq!(config.output.evidence_dir, defaults.output.evidence_dir);
        assert!(config.validate().is_ok());
    }
}
