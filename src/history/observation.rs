use crate::space::Configuration;
use crate::Objective;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "FAILED")]
    Failed,
}

/// open record carried alongside every observation. the known keys cover
/// provenance, per-subtask timings and plan echoes; anything else flattens
/// into the catch-all store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub qt_time: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub et_time: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low_dim_config: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_sqls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_timeout: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
    #[serde(default, flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// a single evaluated configuration. timed-out and failed trials stay in
/// history with infinite objectives so the surrogate learns to avoid them.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub config: Configuration,
    pub objectives: Vec<Objective>,
    pub trial_state: TrialState,
    pub elapsed_time: f64,
    pub extra_info: ExtraInfo,
}

impl Observation {
    pub fn objective(&self) -> Objective {
        self.objectives.first().copied().unwrap_or(f64::INFINITY)
    }

    pub fn is_finite(&self) -> bool {
        self.objective().is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extra_info_roundtrips_with_catchall() {
        let mut info = ExtraInfo::default();
        info.origin = Some("BO Acquisition".to_string());
        info.qt_time.insert("q01".to_string(), 1.5);
        info.other
            .insert("session".to_string(), serde_json::json!("abc"));
        let text = serde_json::to_string(&info).unwrap();
        let back: ExtraInfo = serde_json::from_str(&text).unwrap();
        assert!(back == info);
    }

    #[test]
    fn trial_state_uses_uppercase_tags() {
        assert!(serde_json::to_string(&TrialState::Timeout).unwrap() == "\"TIMEOUT\"");
    }
}
