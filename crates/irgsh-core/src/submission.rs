//! Package submissions and the typed build payload derived from them.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::{Error, Result, TaskUuid};

/// Debian source package names: lowercase alphanumerics plus `+`, `-` and `.`.
static PACKAGE_NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9+.-]+$").expect("package name pattern is valid")
});

/// A package submission as posted by the maintainer tool.
///
/// `tarball` names the uploaded bundle (without extension) in the
/// submissions directory; its signature sits next to it as `<tarball>.token`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Submission {
    pub package_name: String,
    pub package_version: String,
    pub package_extended_version: String,
    pub package_url: String,
    pub source_url: String,
    pub maintainer: String,
    pub maintainer_fingerprint: String,
    pub component: String,
    pub is_experimental: bool,
    pub force_version: bool,
    pub tarball: String,
    pub package_branch: String,
    pub source_branch: String,
}

impl Submission {
    /// Reject submissions that cannot be turned into a pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.package_name.trim().is_empty() {
            return Err(Error::Validation("packageName is required".to_string()));
        }
        if self.maintainer_fingerprint.trim().is_empty() {
            return Err(Error::Validation(
                "maintainerFingerprint is required".to_string(),
            ));
        }
        if self.tarball.trim().is_empty() {
            return Err(Error::Validation("tarball is required".to_string()));
        }
        if self.package_url.trim().is_empty() {
            return Err(Error::Validation("packageUrl is required".to_string()));
        }
        if !PACKAGE_NAME_PATTERN.is_match(&self.package_name) || self.package_name.contains("..") {
            return Err(Error::Validation(format!(
                "packageName is not a valid package name: {}",
                self.package_name
            )));
        }
        if !self.maintainer_fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::Validation(
                "maintainerFingerprint must be hexadecimal".to_string(),
            ));
        }
        if self.tarball.contains('/') || self.tarball.contains("..") {
            return Err(Error::Validation(
                "tarball contains illegal characters".to_string(),
            ));
        }
        Ok(())
    }
}

/// Argument of the "build" signature.
///
/// Carries everything a builder needs to fetch and build the package
/// without reading any chief-side state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildPayload {
    #[serde(rename = "taskUUID")]
    pub task_uuid: TaskUuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub submission: Submission,
}

impl BuildPayload {
    pub fn new(task_uuid: TaskUuid, timestamp: DateTime<Utc>, submission: Submission) -> Self {
        Self {
            task_uuid,
            timestamp,
            submission,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Submission {
        Submission {
            package_name: "foo".to_string(),
            maintainer_fingerprint: "DEADBEEF".to_string(),
            package_url: "https://git.example.org/foo-pkg".to_string(),
            tarball: "a1b2c3".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_submission() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_fields_rejected() {
        let mut s = valid();
        s.package_name.clear();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));

        let mut s = valid();
        s.tarball = "  ".to_string();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));

        let mut s = valid();
        s.maintainer_fingerprint.clear();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_path_segments_rejected() {
        let mut s = valid();
        s.tarball = "../../etc/shadow".to_string();
        assert!(s.validate().is_err());

        let mut s = valid();
        s.maintainer_fingerprint = "DEAD_BEEF".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_names_outside_id_alphabet_rejected() {
        for name in ["foo bar", "Foo", "foo_bar", "f", "-foo", "foo..bar", "föo"] {
            let mut s = valid();
            s.package_name = name.to_string();
            assert!(
                matches!(s.validate(), Err(Error::Validation(_))),
                "{name} should be rejected"
            );
        }

        let mut s = valid();
        s.maintainer_fingerprint = "DEAD BEEF".to_string();
        assert!(matches!(s.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_accepted_names_mint_parseable_ids() {
        for name in ["foo", "libfoo2.0+dfsg", "g++-12", "0ad"] {
            let mut s = valid();
            s.package_name = name.to_string();
            s.validate().unwrap();

            let id = TaskUuid::mint(&s.maintainer_fingerprint, &s.package_name);
            let parsed = TaskUuid::parse(id.as_str()).unwrap();
            assert_eq!(parsed.package_name(), Some(name));
        }
    }

    #[test]
    fn test_decodes_camel_case_body() {
        let body = r#"{
            "packageName": "foo",
            "packageVersion": "1.0",
            "maintainerFingerprint": "DEADBEEF",
            "packageUrl": "https://git.example.org/foo-pkg",
            "isExperimental": true,
            "tarball": "a1b2c3"
        }"#;
        let s: Submission = serde_json::from_str(body).unwrap();
        assert_eq!(s.package_name, "foo");
        assert!(s.is_experimental);
        assert_eq!(s.component, "");
    }

    #[test]
    fn test_build_payload_flattens_submission() {
        let id = TaskUuid::mint("DEADBEEF", "foo");
        let payload = BuildPayload::new(id.clone(), Utc::now(), valid());
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["taskUUID"], id.as_str());
        assert_eq!(json["packageName"], "foo");

        let back: BuildPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back.submission, payload.submission);
    }
}
