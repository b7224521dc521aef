use super::observation::ExtraInfo;
use super::observation::Observation;
use super::observation::TrialState;
use crate::space::ConfigSpace;
use crate::space::Configuration;
use crate::Objective;
use crate::Result;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// objective transform applied when reading a history back out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    None,
    /// replace non-finite objectives by a large penalty so surrogates can
    /// train on the full record
    Infeasible,
}

/// ordered, append-only record of one task's observations, bound to a
/// config space and tagged by task id. meta_info carries the meta feature,
/// warm-start provenance and the ensemble weight trajectory.
#[derive(Debug, Clone)]
pub struct History {
    pub task_id: String,
    space: Arc<ConfigSpace>,
    pub observations: Vec<Observation>,
    pub meta_info: BTreeMap<String, serde_json::Value>,
}

impl History {
    pub fn new(task_id: impl Into<String>, space: Arc<ConfigSpace>) -> Self {
        Self {
            task_id: task_id.into(),
            space,
            observations: Vec::new(),
            meta_info: BTreeMap::new(),
        }
    }

    pub fn space(&self) -> &Arc<ConfigSpace> {
        &self.space
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn update_observation(&mut self, obs: Observation) {
        self.observations.push(obs);
    }

    pub fn configurations(&self) -> Vec<&Configuration> {
        self.observations.iter().map(|o| &o.config).collect()
    }

    pub fn contains(&self, config: &Configuration) -> bool {
        self.observations.iter().any(|o| o.config == *config)
    }

    /// dense unit-representation matrix over all observations
    pub fn get_config_array(&self) -> Vec<Vec<f64>> {
        self.observations
            .iter()
            .map(|o| o.config.to_vector())
            .collect()
    }

    /// first objective per observation, optionally with the infeasible
    /// penalty substituted for non-finite entries
    pub fn get_objectives(&self, transform: Transform) -> Vec<Objective> {
        self.observations
            .iter()
            .map(|o| o.objective())
            .map(|y| match transform {
                Transform::None => y,
                Transform::Infeasible => {
                    if y.is_finite() {
                        y
                    } else {
                        crate::INFEASIBLE_PENALTY
                    }
                }
            })
            .collect()
    }

    /// minimum finite objective, None until one exists
    pub fn get_incumbent_value(&self) -> Option<Objective> {
        self.observations
            .iter()
            .map(|o| o.objective())
            .filter(|y| y.is_finite())
            .min_by(|a, b| a.partial_cmp(b).expect("finite objectives"))
    }

    pub fn meta_info_push(&mut self, key: &str, value: serde_json::Value) {
        match self.meta_info.get_mut(key) {
            Some(serde_json::Value::Array(items)) => items.push(value),
            _ => {
                self.meta_info
                    .insert(key.to_string(), serde_json::Value::Array(vec![value]));
            }
        }
    }

    /// atomic save: write to a sibling tmp file, then rename into place.
    /// load-then-save is byte identical.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let record = HistoryRecord::from(self);
        let text = serde_json::to_string_pretty(&record)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// the persisted representation as a JSON value, used by the run backup
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(HistoryRecord::from(self))?)
    }

    pub fn load_json(path: &Path, space: Arc<ConfigSpace>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let record: HistoryRecord = serde_json::from_str(&text)?;
        record.into_history(space)
    }
}

/// persisted form. objectives encode non-finite values as null.
#[derive(Serialize, Deserialize)]
struct HistoryRecord {
    task_id: String,
    meta_info: BTreeMap<String, serde_json::Value>,
    observations: Vec<ObservationRecord>,
}

#[derive(Serialize, Deserialize)]
struct ObservationRecord {
    config: BTreeMap<String, serde_json::Value>,
    origin: String,
    objectives: Vec<Option<f64>>,
    trial_state: TrialState,
    elapsed_time: f64,
    extra_info: ExtraInfo,
}

impl From<&History> for HistoryRecord {
    fn from(history: &History) -> Self {
        Self {
            task_id: history.task_id.clone(),
            meta_info: history.meta_info.clone(),
            observations: history
                .observations
                .iter()
                .map(|o| ObservationRecord {
                    config: o.config.to_map(),
                    origin: o.config.origin.clone(),
                    objectives: o
                        .objectives
                        .iter()
                        .map(|y| y.is_finite().then_some(*y))
                        .collect(),
                    trial_state: o.trial_state,
                    elapsed_time: o.elapsed_time,
                    extra_info: o.extra_info.clone(),
                })
                .collect(),
        }
    }
}

impl HistoryRecord {
    fn into_history(self, space: Arc<ConfigSpace>) -> Result<History> {
        let mut history = History::new(self.task_id, space.clone());
        history.meta_info = self.meta_info;
        for record in self.observations {
            let config = space.configuration_from_map(&record.config, &record.origin)?;
            history.update_observation(Observation {
                config,
                objectives: record
                    .objectives
                    .into_iter()
                    .map(|y| y.unwrap_or(f64::INFINITY))
                    .collect(),
                trial_state: record.trial_state,
                elapsed_time: record.elapsed_time,
                extra_info: record.extra_info,
            });
        }
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::Hyperparameter;
    use crate::space::Value;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::new(vec![
            Hyperparameter::Integer {
                name: "cores".to_string(),
                lower: 1,
                upper: 8,
                default: 2,
            },
            Hyperparameter::Real {
                name: "fraction".to_string(),
                lower: 0.0,
                upper: 1.0,
                default: 0.5,
                q: None,
            },
        ])
        .unwrap()
    }

    fn observation(space: &Arc<ConfigSpace>, cores: i64, y: f64, state: TrialState) -> Observation {
        let mut config = space.default_configuration();
        config.set("cores", Value::Int(cores));
        Observation {
            config,
            objectives: vec![y],
            trial_state: state,
            elapsed_time: y.min(1e6),
            extra_info: ExtraInfo::default(),
        }
    }

    #[test]
    fn incumbent_ignores_infeasible_observations() {
        let space = space();
        let mut history = History::new("t", space.clone());
        history.update_observation(observation(&space, 1, f64::INFINITY, TrialState::Timeout));
        history.update_observation(observation(&space, 2, 42.0, TrialState::Success));
        history.update_observation(observation(&space, 3, 17.0, TrialState::Success));
        assert!(history.get_incumbent_value() == Some(17.0));
    }

    #[test]
    fn infeasible_transform_substitutes_penalty() {
        let space = space();
        let mut history = History::new("t", space.clone());
        history.update_observation(observation(&space, 1, f64::INFINITY, TrialState::Failed));
        let raw = history.get_objectives(Transform::None);
        let safe = history.get_objectives(Transform::Infeasible);
        assert!(raw[0].is_infinite());
        assert!(safe[0] == crate::INFEASIBLE_PENALTY);
    }

    #[test]
    fn save_load_save_is_byte_identical() {
        let space = space();
        let mut history = History::new("roundtrip", space.clone());
        history
            .meta_info
            .insert("meta_feature".to_string(), serde_json::json!([0.1, 0.2]));
        history.update_observation(observation(&space, 4, 3.5, TrialState::Success));
        history.update_observation(observation(&space, 5, f64::INFINITY, TrialState::Timeout));

        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.json");
        let second = dir.path().join("second.json");
        history.save_json(&first).unwrap();
        let reloaded = History::load_json(&first, space.clone()).unwrap();
        reloaded.save_json(&second).unwrap();
        let a = std::fs::read(&first).unwrap();
        let b = std::fs::read(&second).unwrap();
        assert!(a == b);
        assert!(reloaded.get_config_array() == history.get_config_array());
        assert!(
            reloaded.get_objectives(Transform::Infeasible)
                == history.get_objectives(Transform::Infeasible)
        );
    }
}
