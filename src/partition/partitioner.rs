use super::stats::aggregate_history;
use super::stats::calibration_factor;
use super::stats::safe_weighted_corr;
use super::stats::AggregatedRecord;
use super::stats::CorrelationMethod;
use super::stats::TimeKind;
use crate::history::History;
use crate::ratio_key;
use crate::round5;
use crate::Ratio;
use crate::Similarity;
use std::collections::BTreeMap;

/// per-subtask weighted statistics backing the greedy selection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtaskStats {
    pub estimated_time: f64,
    pub correlation: f64,
    pub avg_time: f64,
    pub total_time: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PlanMetadata {
    pub histories: Vec<String>,
    pub weights: Vec<f64>,
    pub subset_correlation: BTreeMap<i64, f64>,
    pub reason: Option<String>,
}

/// mapping from fidelity level to the subtask subset evaluated at that
/// level. level 1.0 always maps to the full sorted subtask list.
#[derive(Debug, Clone, Default)]
pub struct PartitionPlan {
    pub fidelity_subsets: BTreeMap<i64, Vec<String>>,
    pub sql_stats: BTreeMap<String, SubtaskStats>,
    pub metadata: PlanMetadata,
}

impl PartitionPlan {
    pub fn subset(&self, ratio: Ratio) -> Option<&Vec<String>> {
        self.fidelity_subsets.get(&ratio_key(ratio))
    }
}

/// chooses which subtasks to run at each fidelity so that the subset's
/// aggregate cost correlates strongly with the full workload. the plan is
/// cached and marked dirty when upstream state (scheduler, similarities)
/// changes; rebuilds are serialized by the caller.
#[derive(Debug)]
pub struct Partitioner {
    correlation_method: CorrelationMethod,
    time_kind: TimeKind,
    tolerance: f64,
    lambda_penalty: f64,
    current_task_weight: f64,
    top_ratio: f64,
    all_subtasks: Vec<String>,
    latest_plan: Option<PartitionPlan>,
    plan_dirty: bool,
}

impl Partitioner {
    pub fn new(all_subtasks: Vec<String>) -> Self {
        let mut all_subtasks = all_subtasks;
        all_subtasks.sort();
        Self {
            correlation_method: CorrelationMethod::Spearman,
            time_kind: TimeKind::Query,
            tolerance: 0.1,
            lambda_penalty: 0.1,
            current_task_weight: 1.0,
            top_ratio: 1.0,
            all_subtasks,
            latest_plan: None,
            plan_dirty: true,
        }
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_lambda_penalty(mut self, lambda_penalty: f64) -> Self {
        self.lambda_penalty = lambda_penalty;
        self
    }

    pub fn with_top_ratio(mut self, top_ratio: f64) -> Self {
        self.top_ratio = top_ratio;
        self
    }

    pub fn all_subtasks(&self) -> &[String] {
        &self.all_subtasks
    }

    /// pair the current task (when requested) with its fixed weight and the
    /// similar source histories with their normalized similarities
    pub fn assemble_histories(
        &self,
        current: Option<&History>,
        sources: &[(History, Similarity)],
    ) -> Vec<(History, Similarity)> {
        let mut out = Vec::with_capacity(sources.len() + 1);
        if let Some(current) = current {
            if !current.is_empty() {
                out.push((current.clone(), self.current_task_weight));
            }
        }
        out.extend(sources.iter().cloned());
        out
    }

    pub fn mark_dirty(&mut self) {
        self.plan_dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.plan_dirty
    }

    pub fn latest_plan(&self) -> Option<&PartitionPlan> {
        self.latest_plan.as_ref()
    }

    /// rebuild when dirty or absent, otherwise return the cached plan
    pub fn ensure_plan(
        &mut self,
        histories: &[(History, Similarity)],
        fidelity_levels: &[Ratio],
        force: bool,
    ) -> PartitionPlan {
        if force || self.plan_dirty || self.latest_plan.is_none() {
            log::warn!("partition plan is stale, rebuilding");
            self.build_plan(histories, fidelity_levels)
        } else {
            self.latest_plan.clone().expect("cached plan")
        }
    }

    pub fn build_plan(
        &mut self,
        histories: &[(History, Similarity)],
        fidelity_levels: &[Ratio],
    ) -> PartitionPlan {
        let records = self.collect_records(histories);
        if records.is_empty() {
            return self.fallback_plan("no_histories");
        }
        let weights = records.iter().map(|r| r.sample_weight).collect::<Vec<f64>>();
        if !weights.iter().any(|w| *w > 0.0) {
            return self.fallback_plan("invalid_weights");
        }

        let columns = self.subtask_columns(&records);
        if columns.is_empty() {
            return self.fallback_plan("no_subtasks");
        }
        let stats = self.compute_stats(&records, &columns, &weights);

        let mut levels = fidelity_levels.iter().map(|l| round5(*l)).collect::<Vec<f64>>();
        levels.sort_by(|a, b| a.partial_cmp(b).expect("finite levels"));

        let mut fidelity_subsets: BTreeMap<i64, Vec<String>> = BTreeMap::new();
        let mut used: Vec<String> = Vec::new();
        for level in levels.iter() {
            if (level - 1.0).abs() < 1e-12 {
                fidelity_subsets.insert(ratio_key(1.0), columns.clone());
                continue;
            }
            let selected = select_subset_for_fidelity(
                &records,
                &stats,
                *level,
                &used,
                &weights,
                self.lambda_penalty,
                self.correlation_method,
                self.time_kind,
                self.tolerance,
            );
            used.extend(selected.iter().cloned());
            let mut selected = selected;
            selected.sort();
            fidelity_subsets.insert(ratio_key(*level), selected);
        }
        fidelity_subsets
            .entry(ratio_key(1.0))
            .or_insert_with(|| columns.clone());

        let mut subset_correlation = BTreeMap::new();
        for (key, subset) in fidelity_subsets.iter() {
            let correlation = if subset.is_empty() {
                0.0
            } else {
                self.subset_correlation(&records, subset, &weights)
            };
            subset_correlation.insert(*key, correlation);
        }

        let plan = PartitionPlan {
            fidelity_subsets,
            sql_stats: stats,
            metadata: PlanMetadata {
                histories: histories.iter().map(|(h, _)| h.task_id.clone()).collect(),
                weights: histories.iter().map(|(_, w)| *w).collect(),
                subset_correlation,
                reason: None,
            },
        };
        let summary = plan
            .fidelity_subsets
            .iter()
            .map(|(k, v)| format!("{:.3} -> {} subtasks", *k as f64 / 1e5, v.len()))
            .collect::<Vec<String>>()
            .join(", ");
        log::info!("partition plan built with fidelities: {}", summary);
        self.latest_plan = Some(plan.clone());
        self.plan_dirty = false;
        plan
    }

    fn collect_records(&self, histories: &[(History, Similarity)]) -> Vec<AggregatedRecord> {
        let valid = histories
            .iter()
            .filter(|(h, w)| *w > 0.0 && !h.is_empty())
            .collect::<Vec<&(History, Similarity)>>();
        if valid.is_empty() {
            return Vec::new();
        }
        let total = valid.iter().map(|(_, w)| *w).sum::<f64>();
        let reference = &valid[0].0;
        let mut records = Vec::new();
        for (i, (history, weight)) in valid.iter().enumerate() {
            let calibration = if i == 0 {
                1.0
            } else {
                calibration_factor(history, reference)
            };
            if let Some(mut record) =
                aggregate_history(history, self.time_kind, self.top_ratio, calibration)
            {
                record.sample_weight = if total > 0.0 { weight / total } else { 0.0 };
                records.push(record);
            }
        }
        records
    }

    fn subtask_columns(&self, records: &[AggregatedRecord]) -> Vec<String> {
        let mut columns = records
            .iter()
            .flat_map(|r| r.times.keys().cloned())
            .collect::<Vec<String>>();
        columns.sort();
        columns.dedup();
        columns
    }

    fn compute_stats(
        &self,
        records: &[AggregatedRecord],
        columns: &[String],
        weights: &[f64],
    ) -> BTreeMap<String, SubtaskStats> {
        // non-finite aggregate objectives are zeroed before the weighted
        // total, so an all-failed history contributes no time mass
        let total_times = records
            .iter()
            .map(|r| if r.objective.is_finite() { r.objective } else { 0.0 })
            .collect::<Vec<f64>>();
        let total_weighted_time = weights
            .iter()
            .zip(total_times.iter())
            .map(|(w, t)| w * t)
            .sum::<f64>();

        let mut stats = BTreeMap::new();
        for column in columns {
            let times = records
                .iter()
                .map(|r| r.times.get(column).copied().unwrap_or(f64::INFINITY))
                .collect::<Vec<f64>>();
            let mask = times
                .iter()
                .zip(weights.iter())
                .map(|(t, w)| t.is_finite() && *w > 0.0)
                .collect::<Vec<bool>>();
            if !mask.iter().any(|m| *m) {
                stats.insert(
                    column.clone(),
                    SubtaskStats {
                        tolerance: self.tolerance,
                        ..SubtaskStats::default()
                    },
                );
                continue;
            }
            let weighted_time = times
                .iter()
                .zip(weights.iter())
                .zip(mask.iter())
                .filter(|(_, m)| **m)
                .map(|((t, w), _)| t * w)
                .sum::<f64>();
            let avg_weight = weights
                .iter()
                .zip(mask.iter())
                .filter(|(_, m)| **m)
                .map(|(w, _)| *w)
                .sum::<f64>();
            stats.insert(
                column.clone(),
                SubtaskStats {
                    estimated_time: if total_weighted_time > 0.0 {
                        weighted_time / total_weighted_time
                    } else {
                        0.0
                    },
                    correlation: safe_weighted_corr(
                        &times,
                        &total_times,
                        weights,
                        self.correlation_method,
                    ),
                    avg_time: if avg_weight > 0.0 {
                        weighted_time / avg_weight
                    } else {
                        0.0
                    },
                    total_time: weighted_time,
                    tolerance: self.tolerance,
                },
            );
        }
        stats
    }

    fn subset_correlation(
        &self,
        records: &[AggregatedRecord],
        subset: &[String],
        weights: &[f64],
    ) -> f64 {
        let mut subset_times = Vec::new();
        let mut total_times = Vec::new();
        let mut subset_weights = Vec::new();
        for (record, weight) in records.iter().zip(weights.iter()) {
            if *weight <= 0.0 {
                continue;
            }
            let mut time = 0.0;
            let mut any = false;
            for name in subset {
                if let Some(t) = record.times.get(name) {
                    if t.is_finite() {
                        time += t;
                        any = true;
                    }
                }
            }
            if !any || !record.objective.is_finite() || record.objective <= 0.0 {
                continue;
            }
            subset_times.push(time);
            total_times.push(record.objective);
            subset_weights.push(*weight);
        }
        if subset_times.len() < 3 {
            return 0.0;
        }
        safe_weighted_corr(
            &subset_times,
            &total_times,
            &subset_weights,
            self.correlation_method,
        )
    }

    fn fallback_plan(&mut self, reason: &str) -> PartitionPlan {
        let mut fidelity_subsets = BTreeMap::new();
        fidelity_subsets.insert(ratio_key(1.0), self.all_subtasks.clone());
        let plan = PartitionPlan {
            fidelity_subsets,
            sql_stats: BTreeMap::new(),
            metadata: PlanMetadata {
                reason: Some(reason.to_string()),
                ..PlanMetadata::default()
            },
        };
        log::warn!(
            "partition plan fallback ({}) with {} subtasks",
            reason,
            self.all_subtasks.len()
        );
        self.latest_plan = Some(plan.clone());
        self.plan_dirty = false;
        plan
    }
}

/// greedy weighted selection for one fidelity level: grow the subset by the
/// best correlation-minus-redundancy score that still fits the budget
#[allow(clippy::too_many_arguments)]
pub fn select_subset_for_fidelity(
    records: &[AggregatedRecord],
    stats: &BTreeMap<String, SubtaskStats>,
    fidelity: f64,
    used: &[String],
    weights: &[f64],
    lambda_penalty: f64,
    correlation_method: CorrelationMethod,
    _time_kind: TimeKind,
    tolerance: f64,
) -> Vec<String> {
    let total_estimated_time = stats.values().map(|s| s.estimated_time).sum::<f64>();
    let budget = fidelity * total_estimated_time;
    let max_budget = budget * (1.0 + tolerance);
    log::debug!(
        "subset selection: total {:.4}, budget {:.4}, max {:.4}",
        total_estimated_time,
        budget,
        max_budget
    );

    let mut candidates = stats
        .keys()
        .filter(|name| !used.contains(name))
        .cloned()
        .collect::<Vec<String>>();
    let mut selected: Vec<String> = Vec::new();
    let mut current_time = 0.0;

    while current_time < max_budget && !candidates.is_empty() {
        let mut best: Option<(String, f64)> = None;
        for name in candidates.iter() {
            let stat = &stats[name];
            let redundancy = max_similarity_to_selected(
                records,
                name,
                &selected,
                weights,
                correlation_method,
            );
            let score = stat.correlation - lambda_penalty * redundancy;
            let fits = current_time + stat.estimated_time <= budget;
            if fits && best.as_ref().map(|(_, b)| score > *b).unwrap_or(true) {
                best = Some((name.clone(), score));
            }
        }
        let Some((name, _)) = best else {
            break;
        };
        current_time += stats[&name].estimated_time;
        candidates.retain(|c| *c != name);
        selected.push(name);
    }
    selected
}

/// redundancy of a candidate against the already-selected subtasks: the
/// largest absolute weighted correlation between their time columns
fn max_similarity_to_selected(
    records: &[AggregatedRecord],
    candidate: &str,
    selected: &[String],
    weights: &[f64],
    correlation_method: CorrelationMethod,
) -> f64 {
    if selected.is_empty() {
        return 0.0;
    }
    let candidate_times = records
        .iter()
        .map(|r| r.times.get(candidate).copied().unwrap_or(f64::INFINITY))
        .collect::<Vec<f64>>();
    selected
        .iter()
        .map(|name| {
            let other = records
                .iter()
                .map(|r| r.times.get(name).copied().unwrap_or(f64::INFINITY))
                .collect::<Vec<f64>>();
            safe_weighted_corr(&candidate_times, &other, weights, correlation_method).abs()
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ExtraInfo;
    use crate::history::Observation;
    use crate::history::TrialState;
    use crate::space::ConfigSpace;
    use crate::space::Hyperparameter;
    use std::sync::Arc;

    fn stats_of(entries: &[(&str, f64, f64)]) -> BTreeMap<String, SubtaskStats> {
        entries
            .iter()
            .map(|(name, estimated, correlation)| {
                (
                    name.to_string(),
                    SubtaskStats {
                        estimated_time: *estimated,
                        correlation: *correlation,
                        avg_time: *estimated,
                        total_time: *estimated,
                        tolerance: 0.1,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn greedy_selection_respects_budget_and_scores() {
        // estimated/correlation: a(0.4, 0.9) b(0.4, 0.8) c(0.2, 0.6)
        // d(0.2, 0.2); total 1.2
        let stats = stats_of(&[
            ("a", 0.4, 0.9),
            ("b", 0.4, 0.8),
            ("c", 0.2, 0.6),
            ("d", 0.2, 0.2),
        ]);
        // fidelity 0.3 -> budget 0.36: a and b do not fit, c wins, d no
        // longer fits after c
        let picked = select_subset_for_fidelity(
            &[],
            &stats,
            0.3,
            &[],
            &[],
            0.1,
            CorrelationMethod::Spearman,
            TimeKind::Query,
            0.1,
        );
        assert!(picked == vec!["c".to_string()]);
        // fidelity 0.5 -> budget 0.6: a first (best score), then c
        let picked = select_subset_for_fidelity(
            &[],
            &stats,
            0.5,
            &[],
            &[],
            0.1,
            CorrelationMethod::Spearman,
            TimeKind::Query,
            0.1,
        );
        assert!(picked == vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn used_subtasks_are_excluded() {
        let stats = stats_of(&[("a", 0.2, 0.9), ("b", 0.2, 0.8)]);
        let picked = select_subset_for_fidelity(
            &[],
            &stats,
            0.5,
            &["a".to_string()],
            &[],
            0.1,
            CorrelationMethod::Spearman,
            TimeKind::Query,
            0.1,
        );
        assert!(picked == vec!["b".to_string()]);
    }

    fn history_with_times(space: &Arc<ConfigSpace>, rows: &[(f64, &[(&str, f64)])]) -> History {
        let mut history = History::new("h", space.clone());
        for (objective, times) in rows {
            let mut extra = ExtraInfo::default();
            for (name, time) in times.iter() {
                extra.qt_time.insert(name.to_string(), *time);
            }
            history.update_observation(Observation {
                config: space.default_configuration(),
                objectives: vec![*objective],
                trial_state: TrialState::Success,
                elapsed_time: *objective,
                extra_info: extra,
            });
        }
        history
    }

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::new(vec![Hyperparameter::Integer {
            name: "a".to_string(),
            lower: 0,
            upper: 1,
            default: 0,
        }])
        .unwrap()
    }

    #[test]
    fn full_fidelity_always_maps_to_the_sorted_full_list() {
        let space = space();
        let histories = (0..4)
            .map(|i| {
                (
                    history_with_times(
                        &space,
                        &[(10.0 + i as f64, &[("q2", 4.0), ("q1", 6.0 + i as f64)][..])],
                    ),
                    1.0,
                )
            })
            .collect::<Vec<(History, f64)>>();
        let mut partitioner = Partitioner::new(vec!["q1".to_string(), "q2".to_string()]);
        let plan = partitioner.build_plan(&histories, &[0.5, 1.0]);
        let full = plan.subset(1.0).unwrap();
        assert!(*full == vec!["q1".to_string(), "q2".to_string()]);
        assert!(plan.subset(0.5).is_some());
        assert!(!partitioner.is_dirty());
    }

    #[test]
    fn empty_inputs_produce_a_fallback_plan() {
        let mut partitioner = Partitioner::new(vec!["q1".to_string()]);
        let plan = partitioner.build_plan(&[], &[1.0]);
        assert!(plan.subset(1.0).unwrap() == &vec!["q1".to_string()]);
        assert!(plan.metadata.reason.as_deref() == Some("no_histories"));
    }

    #[test]
    fn assemble_includes_current_task_at_its_fixed_weight() {
        let space = space();
        let partitioner = Partitioner::new(vec![]);
        let current = history_with_times(&space, &[(10.0, &[("q1", 5.0)][..])]);
        let source = history_with_times(&space, &[(20.0, &[("q1", 9.0)][..])]);
        let weighted = partitioner.assemble_histories(Some(&current), &[(source, 0.7)]);
        assert!(weighted.len() == 2);
        assert!(weighted[0].1 == 1.0);
        assert!(weighted[1].1 == 0.7);
        // an empty current history is skipped entirely
        let empty = History::new("empty", space.clone());
        let weighted = partitioner.assemble_histories(Some(&empty), &[]);
        assert!(weighted.is_empty());
    }

    #[test]
    fn mark_dirty_is_idempotent() {
        let mut partitioner = Partitioner::new(vec![]);
        partitioner.mark_dirty();
        partitioner.mark_dirty();
        assert!(partitioner.is_dirty());
    }
}
