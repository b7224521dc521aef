pub mod manager;

pub use manager::EvaluatorManager;

use crate::history::ExtraInfo;
use crate::history::Observation;
use crate::history::TrialState;
use crate::partition::EvalPlan;
use crate::space::Configuration;
use crate::Objective;
use crate::Ratio;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalResult {
    pub objective: Objective,
}

/// the uniform record every evaluator produces and the advisor consumes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub result: EvalResult,
    pub timeout: bool,
    pub traceback: Option<String>,
    pub elapsed_time: f64,
    pub extra_info: ExtraInfo,
}

impl ResultRecord {
    /// the substitute record for a failed or crashed evaluation
    pub fn infeasible(elapsed_time: f64) -> Self {
        Self {
            result: EvalResult {
                objective: f64::INFINITY,
            },
            timeout: true,
            traceback: None,
            elapsed_time,
            extra_info: ExtraInfo::default(),
        }
    }
}

/// turn a result record into an observation: timeout wins over failure,
/// failure is flagged by a present traceback, anything else succeeded
pub fn build_observation(config: &Configuration, result: &ResultRecord) -> Observation {
    let trial_state = if result.timeout {
        TrialState::Timeout
    } else if result.traceback.is_some() {
        log::error!(
            "exception in objective function:\n{}\nconfig: {}",
            result.traceback.as_deref().unwrap_or(""),
            config
        );
        TrialState::Failed
    } else {
        TrialState::Success
    };
    let objective = match trial_state {
        TrialState::Success => result.result.objective,
        _ => f64::INFINITY,
    };
    let mut extra_info = result.extra_info.clone();
    extra_info.origin = Some(config.origin.clone());
    Observation {
        config: config.clone(),
        objectives: vec![objective],
        trial_state,
        elapsed_time: result.elapsed_time,
        extra_info,
    }
}

/// the call contract with the concrete executor that runs a configuration
/// on the target system. the plan may be absent; the evaluator must accept
/// that.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        config: &Configuration,
        resource_ratio: Ratio,
        plan: Option<&EvalPlan>,
    ) -> anyhow::Result<ResultRecord>;
}

/// synthetic cost surface for tests and --test-mode runs: a deterministic
/// quadratic bowl over the normalized configuration, scaled by the resource
/// ratio, with per-subtask times echoed from the plan
pub struct MockEvaluator {
    seed: u64,
}

impl MockEvaluator {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Evaluator for MockEvaluator {
    fn evaluate(
        &self,
        config: &Configuration,
        resource_ratio: Ratio,
        plan: Option<&EvalPlan>,
    ) -> anyhow::Result<ResultRecord> {
        use std::hash::Hash;
        use std::hash::Hasher;
        let vector = config.to_vector();
        let bowl = vector
            .iter()
            .map(|v| (v - 0.37).powi(2))
            .sum::<f64>()
            .max(1e-6);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        config.hash(&mut hasher);
        self.seed.hash(&mut hasher);
        let noise = (hasher.finish() % 1000) as f64 / 1000.0 * 0.05;
        let objective = (bowl + noise) * resource_ratio * 100.0;

        let mut extra_info = ExtraInfo::default();
        if let Some(plan) = plan {
            let share = objective / plan.sqls.len().max(1) as f64;
            for name in plan.sqls.iter() {
                extra_info.qt_time.insert(name.clone(), share);
                extra_info.et_time.insert(name.clone(), share * 1.1);
            }
            extra_info.plan_sqls = Some(plan.sqls.clone());
        }
        Ok(ResultRecord {
            result: EvalResult { objective },
            timeout: false,
            traceback: None,
            elapsed_time: objective,
            extra_info,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ConfigSpace;
    use crate::space::Hyperparameter;
    use std::sync::Arc;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::new(vec![Hyperparameter::Real {
            name: "x".to_string(),
            lower: 0.0,
            upper: 1.0,
            default: 0.5,
            q: None,
        }])
        .unwrap()
    }

    #[test]
    fn timeout_becomes_a_timeout_observation_with_infinite_objective() {
        let config = space().default_configuration();
        let mut record = ResultRecord::infeasible(3.0);
        record.result.objective = 12.0;
        let obs = build_observation(&config, &record);
        assert!(obs.trial_state == TrialState::Timeout);
        assert!(obs.objectives[0].is_infinite());
    }

    #[test]
    fn traceback_becomes_a_failed_observation() {
        let config = space().default_configuration();
        let record = ResultRecord {
            result: EvalResult { objective: 5.0 },
            timeout: false,
            traceback: Some("boom".to_string()),
            elapsed_time: 1.0,
            extra_info: ExtraInfo::default(),
        };
        let obs = build_observation(&config, &record);
        assert!(obs.trial_state == TrialState::Failed);
        assert!(obs.objectives[0].is_infinite());
    }

    #[test]
    fn success_keeps_the_objective_and_origin() {
        let config = space().default_configuration();
        let record = ResultRecord {
            result: EvalResult { objective: 5.0 },
            timeout: false,
            traceback: None,
            elapsed_time: 1.0,
            extra_info: ExtraInfo::default(),
        };
        let obs = build_observation(&config, &record);
        assert!(obs.trial_state == TrialState::Success);
        assert!(obs.objectives[0] == 5.0);
        assert!(obs.extra_info.origin.as_deref() == Some("Default Configuration"));
    }

    #[test]
    fn mock_evaluator_is_deterministic() {
        let config = space().default_configuration();
        let evaluator = MockEvaluator::new(7);
        let a = evaluator.evaluate(&config, 1.0, None).unwrap();
        let b = evaluator.evaluate(&config, 1.0, None).unwrap();
        assert!(a.result.objective == b.result.objective);
    }
}
