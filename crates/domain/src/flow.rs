//! Flows — hub automations the relay may list and trigger.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Flow trigger commands accepted from the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowCommand {
    TriggerFlow,
    TriggerAdvancedFlow,
}

impl FlowCommand {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TriggerFlow => "triggerFlow",
            Self::TriggerAdvancedFlow => "triggerAdvancedFlow",
        }
    }
}

impl fmt::Display for FlowCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowCommand {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "triggerFlow" => Ok(Self::TriggerFlow),
            "triggerAdvancedFlow" => Ok(Self::TriggerAdvancedFlow),
            other => Err(ValidationError::Unsupported {
                kind: "flow command",
                value: other.to_string(),
            }),
        }
    }
}

/// Merge basic and advanced flows into one map, tagging each with its `type`.
///
/// Flows that are not JSON objects are kept as-is.
#[must_use]
pub fn merge_flows(basic: Map<String, Value>, advanced: Map<String, Value>) -> Map<String, Value> {
    let tagged = |kind: &'static str| {
        move |(id, mut flow): (String, Value)| {
            if let Value::Object(fields) = &mut flow {
                fields.insert("type".to_string(), Value::String(kind.to_string()));
            }
            (id, flow)
        }
    };
    basic
        .into_iter()
        .map(tagged("flow"))
        .chain(advanced.into_iter().map(tagged("advancedFlow")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn should_parse_allowed_flow_commands() {
        assert_eq!("triggerFlow".parse::<FlowCommand>().unwrap(), FlowCommand::TriggerFlow);
        assert_eq!(
            "triggerAdvancedFlow".parse::<FlowCommand>().unwrap(),
            FlowCommand::TriggerAdvancedFlow
        );
        assert!("deleteFlow".parse::<FlowCommand>().is_err());
    }

    #[test]
    fn should_tag_flows_by_kind_when_merging() {
        let basic = json!({"f1": {"name": "Morning"}}).as_object().unwrap().clone();
        let advanced = json!({"a1": {"name": "Night"}}).as_object().unwrap().clone();

        let merged = merge_flows(basic, advanced);

        assert_eq!(merged["f1"], json!({"name": "Morning", "type": "flow"}));
        assert_eq!(merged["a1"], json!({"name": "Night", "type": "advancedFlow"}));
    }
}
