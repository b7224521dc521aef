use super::partitioner::Partitioner;
use crate::history::History;
use crate::ratio_key;
use crate::round5;
use crate::Ratio;
use crate::Similarity;
use std::collections::BTreeMap;

/// what an evaluator receives for one call: the subtask subset for the
/// selected fidelity, per-subtask timeouts, and where the plan came from
#[derive(Debug, Clone, PartialEq)]
pub struct EvalPlan {
    pub sqls: Vec<String>,
    pub timeout: BTreeMap<String, f64>,
    pub selected_fidelity: Ratio,
    pub plan_source: String,
}

/// resolves a resource ratio to an evaluation plan from the partitioner's
/// cached plan, falling back to a configured subset map when allowed
#[derive(Debug, Default)]
pub struct Planner {
    timeout: BTreeMap<String, f64>,
    fallback: BTreeMap<i64, Vec<String>>,
}

impl Planner {
    pub fn new(timeout: BTreeMap<String, f64>, fallback: BTreeMap<i64, Vec<String>>) -> Self {
        Self { timeout, fallback }
    }

    pub fn with_fallback(mut self, ratio: Ratio, subtasks: Vec<String>) -> Self {
        self.fallback.insert(ratio_key(ratio), subtasks);
        self
    }

    /// rebuilds the partition plan if missing or dirty, then looks up the
    /// exact rounded ratio; None when nothing matches and fallback is off
    pub fn plan(
        &self,
        partitioner: &mut Partitioner,
        histories: &[(History, Similarity)],
        fidelity_levels: &[Ratio],
        resource_ratio: Ratio,
        force_refresh: bool,
        allow_fallback: bool,
    ) -> Option<EvalPlan> {
        let resource_ratio = round5(resource_ratio);
        let plan = partitioner.ensure_plan(histories, fidelity_levels, force_refresh);

        if let Some(subset) = plan.subset(resource_ratio) {
            return Some(self.finish(subset.clone(), resource_ratio, "partition"));
        }
        if allow_fallback {
            if let Some(subset) = self.fallback.get(&ratio_key(resource_ratio)) {
                log::warn!("fallback subtasks used for resource ratio {}", resource_ratio);
                return Some(self.finish(subset.clone(), resource_ratio, "fallback"));
            }
        }
        log::warn!("no plan found for resource ratio {}", resource_ratio);
        None
    }

    fn finish(&self, sqls: Vec<String>, fidelity: Ratio, source: &str) -> EvalPlan {
        let timeout = sqls
            .iter()
            .filter_map(|s| self.timeout.get(s).map(|t| (s.clone(), *t)))
            .collect();
        EvalPlan {
            sqls,
            timeout,
            selected_fidelity: fidelity,
            plan_source: source.to_string(),
        }
    }
}
