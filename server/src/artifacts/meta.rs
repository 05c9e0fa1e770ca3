//! Upload-completion metadata

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Build flavor of an uploaded package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
    Debug,
    Release,
}

impl BuildType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildType::Debug => "debug",
            BuildType::Release => "release",
        }
    }
}

impl std::str::FromStr for BuildType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(BuildType::Debug),
            "release" => Ok(BuildType::Release),
            _ => Err(format!("unknown build type: {}", s)),
        }
    }
}

/// Validated metadata declared by the uploader.
///
/// Declared metadata is trusted input, but malformed shapes are rejected
/// here at the boundary instead of propagating into the store.
#[derive(Debug, Clone)]
pub struct ArtifactMetadata {
    pub package_name: String,
    pub version_name: String,

    /// Advisory monotonic version code; recorded, never enforced globally
    pub version_code: i64,

    pub build_type: BuildType,
}

impl ArtifactMetadata {
    pub fn parse(
        package_name: &str,
        version_name: &str,
        version_code: i64,
        build_type: &str,
    ) -> Result<Self, CoreError> {
        if package_name.trim().is_empty() {
            return Err(CoreError::Validation("package name must not be empty".to_string()));
        }
        if version_code < 0 {
            return Err(CoreError::Validation(format!(
                "version code must be non-negative, got {}",
                version_code
            )));
        }

        let build_type = build_type
            .parse::<BuildType>()
            .map_err(CoreError::Validation)?;

        Ok(Self {
            package_name: package_name.trim().to_string(),
            version_name: version_name.trim().to_string(),
            version_code,
            build_type,
        })
    }
}
