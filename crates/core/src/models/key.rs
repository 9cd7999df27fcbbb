//! Model identity: name plus version.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which revision of a model to use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ModelVersion {
    /// Whatever the hub currently publishes as newest.
    Latest,
    /// A fixed version, e.g. "1.2".
    Pinned(String),
}

impl ModelVersion {
    /// Directory name used by hubs: `latest` or `v{version}`.
    pub fn dir_name(&self) -> String {
        match self {
            Self::Latest => "latest".to_string(),
            Self::Pinned(v) => format!("v{}", v),
        }
    }
}

impl From<String> for ModelVersion {
    fn from(value: String) -> Self {
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("latest") {
            Self::Latest
        } else {
            Self::Pinned(value.trim_start_matches('v').to_string())
        }
    }
}

impl From<ModelVersion> for String {
    fn from(value: ModelVersion) -> Self {
        match value {
            ModelVersion::Latest => "latest".to_string(),
            ModelVersion::Pinned(v) => v,
        }
    }
}

impl fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Pinned(v) => write!(f, "{}", v),
        }
    }
}

/// Identifies a model as `name@version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelKey {
    pub name: String,
    pub version: ModelVersion,
}

impl ModelKey {
    pub fn new(name: impl Into<String>, version: ModelVersion) -> Self {
        Self {
            name: name.into().to_lowercase(),
            version,
        }
    }

    pub fn latest(name: impl Into<String>) -> Self {
        Self::new(name, ModelVersion::Latest)
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::new(name, ModelVersion::from(version.into()))
    }
}

/// Error parsing a model key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid model key '{0}': expected name[@version] with name in [a-z0-9._-]")]
pub struct InvalidModelKey(pub String);

impl FromStr for ModelKey {
    type Err = InvalidModelKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, version) = match s.trim().split_once('@') {
            Some((name, version)) => (name, version.to_string()),
            None => (s.trim(), String::new()),
        };

        let valid_name = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if !valid_name || version.contains('/') {
            return Err(InvalidModelKey(s.to_string()));
        }

        Ok(Self::new(name, ModelVersion::from(version)))
    }
}

impl TryFrom<String> for ModelKey {
    type Error = InvalidModelKey;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ModelKey> for String {
    fn from(key: ModelKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_version() {
        let key: ModelKey = "Face-Detector@1.2".parse().unwrap();
        assert_eq!(key.name, "face-detector");
        assert_eq!(key.version, ModelVersion::Pinned("1.2".to_string()));
        assert_eq!(key.to_string(), "face-detector@1.2");
        assert_eq!(key.version.dir_name(), "v1.2");
    }

    #[test]
    fn test_parse_defaults_to_latest() {
        let key: ModelKey = "vae".parse().unwrap();
        assert_eq!(key.version, ModelVersion::Latest);
        assert_eq!(key.to_string(), "vae@latest");

        let key: ModelKey = "vae@LATEST".parse().unwrap();
        assert_eq!(key.version.dir_name(), "latest");
    }

    #[test]
    fn test_leading_v_is_normalized() {
        let a: ModelKey = "vae@v2".parse().unwrap();
        let b: ModelKey = "vae@2".parse().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_names() {
        assert!("".parse::<ModelKey>().is_err());
        assert!("@1".parse::<ModelKey>().is_err());
        assert!("../etc@1".parse::<ModelKey>().is_err());
        assert!("vae@1/2".parse::<ModelKey>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        #[derive(Deserialize, Serialize)]
        struct Wrapper {
            model: ModelKey,
        }

        let w: Wrapper = toml::from_str(r#"model = "landmarker@0.9""#).unwrap();
        assert_eq!(w.model, ModelKey::pinned("landmarker", "0.9"));
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"model":"landmarker@0.9"}"#);
    }
}
