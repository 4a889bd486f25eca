//! Static space configuration loaded once at startup: participant
//! identities, their tokens, and their initial capability sets.

use std::collections::HashMap;
use std::path::Path;

use common::CapabilityPattern;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceConfig {
    pub space: SpaceMeta,
    pub participants: HashMap<String, ParticipantConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpaceMeta {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    Human,
    Agent,
    Bridge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPreference {
    #[default]
    All,
    Directed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ParticipantConfig {
    pub tokens: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityPattern>,
    /// Retained for a process-supervision collaborator to read; the core
    /// does not act on it.
    #[serde(rename = "type", default)]
    pub participant_type: Option<ParticipantType>,
    /// Same as above.
    #[serde(default)]
    pub auto_start: Option<bool>,
    #[serde(default)]
    pub routing: RoutingPreference,
}

impl SpaceConfig {
    pub fn load(path: &Path) -> Result<SpaceConfig, common::MewError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| common::MewError::Internal(format!("reading space config {path:?}: {e}")))?;
        let config: SpaceConfig = serde_yaml::from_str(&raw)
            .map_err(|e| common::MewError::Internal(format!("parsing space config {path:?}: {e}")))?;

        for (id, participant) in &config.participants {
            for cap in &participant.capabilities {
                if common::is_system_namespace(cap.kind.trim_start_matches('!')) {
                    return Err(common::MewError::InvalidCapability(format!(
                        "participant {id} cannot be granted system/* capability {:?} in static config",
                        cap.kind
                    )));
                }
            }
        }

        Ok(config)
    }

    /// Find the participant whose token list contains `token`, if any.
    pub fn authenticate(&self, token: &str) -> Option<(&str, &ParticipantConfig)> {
        self.participants
            .iter()
            .find(|(_, p)| p.tokens.iter().any(|t| t == token))
            .map(|(id, p)| (id.as_str(), p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> &'static str {
        r#"
space:
  id: demo
  name: Demo Space
participants:
  admin:
    tokens: ["admin-token"]
    capabilities:
      - kind: "*"
  worker:
    tokens: ["worker-token"]
    capabilities:
      - kind: chat
    routing: directed
"#
    }

    #[test]
    fn parses_participants_and_routing_preference() {
        let config: SpaceConfig = serde_yaml::from_str(sample()).unwrap();
        assert_eq!(config.space.id, "demo");
        assert_eq!(config.participants["worker"].routing, RoutingPreference::Directed);
        assert_eq!(config.participants["admin"].routing, RoutingPreference::All);
    }

    #[test]
    fn authenticate_finds_participant_by_token() {
        let config: SpaceConfig = serde_yaml::from_str(sample()).unwrap();
        let (id, _) = config.authenticate("worker-token").unwrap();
        assert_eq!(id, "worker");
        assert!(config.authenticate("unknown-token").is_none());
    }

    #[test]
    fn rejects_system_namespace_capability_in_static_config() {
        let bad = r#"
space:
  id: demo
participants:
  admin:
    tokens: ["t"]
    capabilities:
      - kind: "system/*"
"#;
        let config: SpaceConfig = serde_yaml::from_str(bad).unwrap();
        let tmp = std::env::temp_dir().join("mew-space-config-test-reject.yaml");
        std::fs::write(&tmp, bad).unwrap();
        let result = SpaceConfig::load(&tmp);
        std::fs::remove_file(&tmp).ok();
        assert!(result.is_err());
        let _ = config;
    }
}
