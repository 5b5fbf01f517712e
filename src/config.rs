use crate::error::{PipelineError, Result};
use crate::stage::StageSettings;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Pipeline-wide settings.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Retries a message may use on one stage before it is failed
    pub max_retries: u32,
    /// Whether the first stage accepts messages from outside the pipeline
    pub external_input: bool,
    /// Capacity of the external input path
    pub input_capacity: usize,
    /// How often shutdown re-checks a draining stage, in milliseconds
    pub drain_poll_ms: u64,
    /// How long a draining stage's components may keep producing, in milliseconds
    pub produce_grace_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            external_input: true,
            input_capacity: 100,
            drain_poll_ms: 1,
            produce_grace_ms: 1000,
        }
    }
}

impl PipelineConfig {
    /// Check values that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.drain_poll_ms == 0 {
            return Err(PipelineError::Config(
                "drain_poll_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn stage_settings(&self) -> StageSettings {
        StageSettings {
            max_retries: self.max_retries,
            drain_poll: Duration::from_millis(self.drain_poll_ms),
            produce_grace: Duration::from_millis(self.produce_grace_ms),
        }
    }
}

/// One stage of a declarative topology
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    /// Registry name of the component
    pub component: String,
    /// Attributes passed to the factory; non-string values are stringified
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl StageConfig {
    /// Attributes as the strings factories receive
    pub fn string_attributes(&self) -> impl Iterator<Item = (&str, String)> + '_ {
        self.attributes.iter().map(|(name, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (name.as_str(), value)
        })
    }
}

/// Ordered stage list plus pipeline settings, typically loaded from JSON.
///
/// ```json
/// {
///   "pipeline": { "max_retries": 5 },
///   "stages": [
///     { "component": "tag", "attributes": { "key": "origin", "value": "edge", "pool_size": 4 } },
///     { "component": "passthrough" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub stages: Vec<StageConfig>,
}

impl TopologyConfig {
    /// Parse a topology from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let topology: Self = serde_json::from_str(json)?;
        topology.pipeline.validate()?;
        Ok(topology)
    }

    /// Read and parse a topology file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.input_capacity, 100);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<PipelineConfig, _> =
            serde_json::from_str(r#"{"max_retry": 2}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_poll_rejected() {
        let err = TopologyConfig::from_json(r#"{"pipeline": {"drain_poll_ms": 0}, "stages": []}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_topology_attributes_stringified() {
        let topology = TopologyConfig::from_json(
            r#"{
                "pipeline": {"max_retries": 5, "external_input": false},
                "stages": [
                    {"component": "tag", "attributes": {"key": "origin", "pool_size": 4, "strict": true}},
                    {"component": "passthrough"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(topology.pipeline.max_retries, 5);
        assert!(!topology.pipeline.external_input);
        assert_eq!(topology.stages.len(), 2);

        let attrs: Vec<(&str, String)> = topology.stages[0].string_attributes().collect();
        assert_eq!(
            attrs,
            vec![
                ("key", "origin".to_string()),
                ("pool_size", "4".to_string()),
                ("strict", "true".to_string()),
            ]
        );
        assert!(topology.stages[1].attributes.is_empty());
    }

    #[test]
    fn test_malformed_json() {
        let err = TopologyConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, PipelineError::Json(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = TopologyConfig::from_file("/nonexistent/topology.json").unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
