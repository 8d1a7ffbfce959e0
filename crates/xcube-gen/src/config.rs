//! Generation request configuration.
//!
//! A request names where to read the input data, how the output cube should
//! look, where to write it and, optionally, where to report progress:
//!
//! ```yaml
//! input_config:
//!   store_id: s3
//!   data_id: input.zarr
//!   store_params:
//!     bucket_name: ${XCUBE_BUCKET:-xcube-inputs}
//! cube_config:
//!   variable_names: [chl, tsm]
//!   bbox: [-15.0, 35.0, 45.0, 72.0]
//! output_config:
//!   store_id: file
//!   data_id: cube.zarr
//!   store_params:
//!     root: /data/cubes
//! callback_config:
//!   api_uri: https://api.example.com/jobs/42/progress
//!   access_token: ${XCUBE_API_TOKEN}
//! ```
//!
//! Files are YAML or JSON and support `${VAR}` and `${VAR:-default}`
//! environment variable substitution.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use xcube_core::store::DataParams;
use xcube_core::{XcubeError, XcubeResult};

// ============================================================================
// Request Configuration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenConfig {
    pub input_config: InputConfig,
    #[serde(default)]
    pub cube_config: CubeConfig,
    pub output_config: OutputConfig,
    #[serde(default)]
    pub callback_config: Option<CallbackConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub store_id: Option<String>,
    pub opener_id: Option<String>,
    pub data_id: String,
    #[serde(default)]
    pub store_params: DataParams,
    #[serde(default)]
    pub open_params: DataParams,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CubeConfig {
    pub variable_names: Option<Vec<String>>,
    pub crs: Option<String>,
    /// `[min_lon, min_lat, max_lon, max_lat]`
    pub bbox: Option<[f64; 4]>,
    pub spatial_res: Option<f64>,
    /// Start and end date, either may be `null`.
    pub time_range: Option<[Option<String>; 2]>,
    pub time_period: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    pub store_id: Option<String>,
    pub writer_id: Option<String>,
    pub data_id: Option<String>,
    #[serde(default)]
    pub store_params: DataParams,
    #[serde(default)]
    pub write_params: DataParams,
    #[serde(default)]
    pub replace: bool,
}

/// Where progress callbacks are sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallbackConfig {
    pub api_uri: Option<String>,
    pub access_token: Option<String>,
}

impl GenConfig {
    /// Load a request from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> XcubeResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            XcubeError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> XcubeResult<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| XcubeError::ConfigError(format!("Invalid request YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> XcubeResult<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Self = serde_json::from_str(&expanded)
            .map_err(|e| XcubeError::ConfigError(format!("Invalid request JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> XcubeResult<()> {
        self.input_config.validate()?;
        self.cube_config.validate()?;
        self.output_config.validate()
    }
}

// ============================================================================
// Validation
// ============================================================================

impl InputConfig {
    fn validate(&self) -> XcubeResult<()> {
        ensure(!self.data_id.is_empty(), "input_config: data_id cannot be empty")?;
        ensure(
            self.store_id.is_some() || self.opener_id.is_some(),
            "input_config: one of store_id or opener_id must be given",
        )
    }
}

impl CubeConfig {
    fn validate(&self) -> XcubeResult<()> {
        if let Some(names) = &self.variable_names {
            ensure(
                names.iter().all(|name| !name.is_empty()),
                "cube_config: variable names cannot be empty",
            )?;
        }
        if let Some([x1, y1, x2, y2]) = self.bbox {
            ensure(
                x1 < x2 && y1 < y2,
                format!("cube_config: invalid bbox [{}, {}, {}, {}]", x1, y1, x2, y2),
            )?;
        }
        if let Some(res) = self.spatial_res {
            ensure(
                res > 0.0 && res.is_finite(),
                "cube_config: spatial_res must be positive",
            )?;
        }
        if let Some([start, end]) = &self.time_range {
            let start = start.as_deref().map(parse_time).transpose()?;
            let end = end.as_deref().map(parse_time).transpose()?;
            if let (Some(start), Some(end)) = (start, end) {
                ensure(
                    start <= end,
                    "cube_config: time_range start must not be after its end",
                )?;
            }
        }
        Ok(())
    }
}

impl OutputConfig {
    fn validate(&self) -> XcubeResult<()> {
        ensure(
            self.store_id.is_some() || self.writer_id.is_some(),
            "output_config: one of store_id or writer_id must be given",
        )
    }
}

fn ensure(condition: bool, message: impl Into<String>) -> XcubeResult<()> {
    if condition {
        Ok(())
    } else {
        Err(XcubeError::ConfigError(message.into()))
    }
}

/// Parse a `YYYY-MM-DD` date or an RFC 3339 timestamp into seconds since epoch.
fn parse_time(value: &str) -> XcubeResult<i64> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(datetime) = date.and_hms_opt(0, 0, 0) {
            return Ok(datetime.and_utc().timestamp());
        }
    }
    DateTime::parse_from_rfc3339(value)
        .map(|datetime| datetime.timestamp())
        .map_err(|_| XcubeError::ConfigError(format!("cube_config: invalid time \"{}\"", value)))
}

// ============================================================================
// Environment Variable Substitution
// ============================================================================

/// Substitute `${VAR}` and `${VAR:-default}` references in `content`.
///
/// Defaults may contain references themselves. `$${` yields a literal `${`.
pub fn expand_env_vars(content: &str) -> XcubeResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find("${") {
        if rest[..start].ends_with('$') {
            result.push_str(&rest[..start - 1]);
            result.push_str("${");
            rest = &rest[start + 2..];
            continue;
        }
        result.push_str(&rest[..start]);

        let body = &rest[start + 2..];
        let end = closing_brace(body).ok_or_else(|| {
            XcubeError::ConfigError(format!(
                "Unclosed variable substitution: ${{{}",
                body.lines().next().unwrap_or_default()
            ))
        })?;
        result.push_str(&resolve_reference(&body[..end])?);
        rest = &body[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Index of the `}` closing a reference body, skipping nested `{...}` pairs.
fn closing_brace(body: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, ch) in body.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' if depth == 0 => return Some(i),
            '}' => depth -= 1,
            _ => {}
        }
    }
    None
}

fn resolve_reference(reference: &str) -> XcubeResult<String> {
    let (name, default) = match reference.split_once(":-") {
        Some((name, default)) => (name.trim(), Some(default)),
        None => (reference.trim(), None),
    };
    let valid_name = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return Err(XcubeError::ConfigError(format!(
            "Invalid environment variable name \"{}\"",
            name
        )));
    }

    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        unset_or_empty => match default {
            Some(default) => expand_env_vars(default),
            None => unset_or_empty.map_err(|_| {
                XcubeError::ConfigError(format!("Environment variable {} not set", name))
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("XCUBE_GEN_TEST_BUCKET", "cubes");
        let expanded = expand_env_vars(
            "bucket: ${XCUBE_GEN_TEST_BUCKET}\nregion: ${XCUBE_GEN_TEST_UNSET:-eu-central-1}",
        )
        .unwrap();
        assert_eq!(expanded, "bucket: cubes\nregion: eu-central-1");
    }

    #[test]
    fn test_expand_env_vars_errors() {
        assert!(expand_env_vars("token: ${XCUBE_GEN_TEST_SURELY_UNSET}").is_err());
        assert!(expand_env_vars("token: ${UNCLOSED").is_err());
        assert_eq!(expand_env_vars("cost: $5").unwrap(), "cost: $5");
        assert!(expand_env_vars("token: ${1TOKEN}").is_err());
    }

    #[test]
    fn test_expand_env_vars_escape_and_nested_default() {
        std::env::set_var("XCUBE_GEN_TEST_REGION", "eu-west-1");
        assert_eq!(
            expand_env_vars("template: $${XCUBE_GEN_TEST_REGION}").unwrap(),
            "template: ${XCUBE_GEN_TEST_REGION}"
        );
        assert_eq!(
            expand_env_vars("region: ${XCUBE_GEN_TEST_NO_REGION:-${XCUBE_GEN_TEST_REGION}}")
                .unwrap(),
            "region: eu-west-1"
        );
        assert_eq!(
            expand_env_vars("uri: ${XCUBE_GEN_TEST_NO_URI:-http://host/{job}}/x").unwrap(),
            "uri: http://host/{job}/x"
        );
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1970-01-02").unwrap(), 86400);
        assert_eq!(parse_time("1970-01-01T00:01:00Z").unwrap(), 60);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_cube_config_validation() {
        let mut cube = CubeConfig {
            bbox: Some([10.0, 10.0, 5.0, 5.0]),
            ..Default::default()
        };
        assert!(cube.validate().is_err());

        cube.bbox = Some([0.0, 50.0, 5.0, 52.5]);
        cube.time_range = Some([Some("2020-01-05".into()), Some("2020-01-01".into())]);
        assert!(cube.validate().is_err());

        cube.time_range = Some([Some("2020-01-01".into()), None]);
        cube.spatial_res = Some(0.0);
        assert!(cube.validate().is_err());

        cube.spatial_res = Some(0.25);
        assert!(cube.validate().is_ok());
    }

    #[test]
    fn test_output_requires_store_or_writer() {
        let yaml = "input_config:\n  store_id: memory\n  data_id: in.zarr\noutput_config:\n  data_id: out.zarr\n";
        let err = GenConfig::from_yaml_str(yaml).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration error: output_config: one of store_id or writer_id must be given"
        );
    }
}
