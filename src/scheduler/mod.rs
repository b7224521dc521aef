use crate::round5;
use crate::Error;
use crate::Objective;
use crate::Ratio;
use crate::Result;
use crate::space::Configuration;

/// per-iteration successive-halving structure: how many configurations run
/// at how much resource, per bracket and stage, and whether an observation
/// at a given fidelity belongs in the main history.
#[derive(Debug, Clone)]
pub enum Scheduler {
    /// single fidelity level 1.0, one stage per iteration
    Full { num_nodes: usize },
    /// explicit stage table of (n_configs, resource ratio) pairs
    Fixed {
        num_nodes: usize,
        n_resources: Vec<usize>,
        r_resources: Vec<f64>,
        fidelity_levels: Vec<Ratio>,
    },
    /// geometric successive halving over brackets, BOHB or MFES flavored
    Halving(HalvingScheduler),
}

#[derive(Debug, Clone)]
pub struct HalvingScheduler {
    r: usize,
    eta: usize,
    num_nodes: usize,
    s_max: usize,
    b: usize,
    mfes: bool,
    fidelity_levels: Vec<Ratio>,
}

impl Scheduler {
    pub fn full(num_nodes: usize) -> Self {
        Scheduler::Full { num_nodes }
    }

    pub fn fixed(
        num_nodes: usize,
        n_resources: Vec<usize>,
        r_resources: Vec<f64>,
        fidelity_levels: Vec<Ratio>,
    ) -> Result<Self> {
        let fidelity_levels = {
            let mut levels = fidelity_levels.iter().map(|l| round5(*l)).collect::<Vec<_>>();
            if !levels.contains(&1.0) {
                levels.push(1.0);
            }
            levels.sort_by(|a, b| a.partial_cmp(b).expect("finite levels"));
            levels
        };
        for r in r_resources.iter() {
            if !fidelity_levels.contains(&round5(*r)) {
                return Err(Error::configuration(format!(
                    "resource {} not in fidelity levels {:?}",
                    r, fidelity_levels
                )));
            }
        }
        if n_resources.len() != r_resources.len() || n_resources.is_empty() {
            return Err(Error::configuration("empty or mismatched stage tables"));
        }
        Ok(Scheduler::Fixed {
            num_nodes,
            n_resources,
            r_resources,
            fidelity_levels,
        })
    }

    pub fn bohb(num_nodes: usize, r: usize, eta: usize) -> Result<Self> {
        Ok(Scheduler::Halving(HalvingScheduler::new(
            num_nodes, r, eta, false,
        )?))
    }

    pub fn mfes(num_nodes: usize, r: usize, eta: usize) -> Result<Self> {
        Ok(Scheduler::Halving(HalvingScheduler::new(
            num_nodes, r, eta, true,
        )?))
    }

    pub fn num_nodes(&self) -> usize {
        match self {
            Scheduler::Full { num_nodes } => *num_nodes,
            Scheduler::Fixed { num_nodes, .. } => *num_nodes,
            Scheduler::Halving(h) => h.num_nodes,
        }
    }

    /// bracket index for an iteration counter; halving schedulers cycle
    /// through brackets from s_max down to 0
    pub fn get_bracket_index(&self, iter_id: i64) -> usize {
        match self {
            Scheduler::Full { .. } => 0,
            Scheduler::Fixed { n_resources, .. } => n_resources.len() - 1,
            Scheduler::Halving(h) => {
                let cycle = (h.s_max + 1) as i64;
                (h.s_max as i64 - iter_id.rem_euclid(cycle)) as usize
            }
        }
    }

    /// (n_configs, n_resource) for a stage within a bracket
    pub fn get_stage_params(&self, s: usize, stage: usize) -> Result<(usize, f64)> {
        match self {
            Scheduler::Full { num_nodes } => Ok((*num_nodes, 1.0)),
            Scheduler::Fixed {
                num_nodes,
                n_resources,
                r_resources,
                ..
            } => {
                if stage >= n_resources.len() {
                    return Err(Error::out_of_range(format!("stage {}", stage)));
                }
                Ok((n_resources[stage] * num_nodes, r_resources[stage]))
            }
            Scheduler::Halving(h) => h.stage_params(s, stage),
        }
    }

    pub fn calculate_resource_ratio(&self, n_resource: f64) -> Ratio {
        match self {
            Scheduler::Full { .. } => 1.0,
            Scheduler::Fixed { .. } => round5(n_resource),
            Scheduler::Halving(h) => round5(n_resource / h.r as f64),
        }
    }

    pub fn get_elimination_count(&self, s: usize, stage: usize) -> Result<usize> {
        match self {
            Scheduler::Full { num_nodes } => Ok(*num_nodes),
            Scheduler::Fixed {
                num_nodes,
                n_resources,
                ..
            } => {
                let next = n_resources
                    .get(stage + 1)
                    .or_else(|| n_resources.last())
                    .expect("non-empty stage table");
                Ok(next * num_nodes)
            }
            Scheduler::Halving(h) => {
                let (n_configs, n_resource) = h.stage_params(s, stage)?;
                if n_resource as usize == h.r {
                    Ok(n_configs)
                } else {
                    Ok(n_configs / h.eta)
                }
            }
        }
    }

    /// stable ascending sort by objective, keeping the stage's survivors
    pub fn eliminate_candidates(
        &self,
        candidates: Vec<Configuration>,
        perfs: Vec<Objective>,
        s: usize,
        stage: usize,
    ) -> Result<(Vec<Configuration>, Vec<Objective>)> {
        let keep = self.get_elimination_count(s, stage)?;
        let mut order = (0..candidates.len()).collect::<Vec<usize>>();
        order.sort_by(|&a, &b| {
            perfs[a]
                .partial_cmp(&perfs[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.truncate(keep);
        let survivors = order
            .iter()
            .map(|&i| candidates[i].clone())
            .collect::<Vec<Configuration>>();
        let survivor_perfs = order.iter().map(|&i| perfs[i]).collect::<Vec<Objective>>();
        Ok((survivors, survivor_perfs))
    }

    /// ascending fidelity ratios, always containing 1.0
    pub fn get_fidelity_levels(&self) -> Vec<Ratio> {
        match self {
            Scheduler::Full { .. } => vec![1.0],
            Scheduler::Fixed {
                fidelity_levels, ..
            } => fidelity_levels.clone(),
            Scheduler::Halving(h) => h.fidelity_levels.clone(),
        }
    }

    /// whether an observation at this fidelity belongs in the main history.
    /// BOHB discards sub-fidelity observations; MFES keeps everything and
    /// lets the advisor partition into per-resource histories.
    pub fn should_update_history(&self, resource_ratio: Ratio) -> bool {
        match self {
            Scheduler::Full { .. } => true,
            Scheduler::Fixed { .. } => true,
            Scheduler::Halving(h) => h.mfes || round5(resource_ratio) == 1.0,
        }
    }
}

impl HalvingScheduler {
    fn new(num_nodes: usize, r: usize, eta: usize, mfes: bool) -> Result<Self> {
        if r < 1 || eta < 2 {
            return Err(Error::configuration(format!(
                "invalid halving parameters r={} eta={}",
                r, eta
            )));
        }
        // largest s with eta^s <= r, computed in integers so exact powers
        // never round down
        let mut s_max = 0usize;
        while eta.pow(s_max as u32 + 1) <= r {
            s_max += 1;
        }
        let b = (s_max + 1) * r;
        let fidelity_levels = (0..=s_max)
            .map(|i| round5(eta.pow(i as u32) as f64 / r as f64))
            .collect::<Vec<Ratio>>();
        log::info!(
            "halving scheduler: {} brackets, fidelity levels {:?}, s_max = [{}], r = [{}], eta = [{}]",
            s_max + 1,
            fidelity_levels,
            s_max,
            r,
            eta
        );
        Ok(Self {
            r,
            eta,
            num_nodes,
            s_max,
            b,
            mfes,
            fidelity_levels,
        })
    }

    fn bracket_params(&self, s: usize) -> (usize, usize) {
        let eta_pow_s = self.eta.pow(s as u32);
        let n_configs = (self.b as f64 / self.r as f64 / (s + 1) as f64 * eta_pow_s as f64).ceil()
            as usize
            * self.num_nodes;
        let n_resource = self.r / eta_pow_s;
        (n_configs, n_resource)
    }

    fn stage_params(&self, s: usize, stage: usize) -> Result<(usize, f64)> {
        if s > self.s_max {
            return Err(Error::out_of_range(format!("bracket {}", s)));
        }
        if stage > s {
            return Err(Error::out_of_range(format!("stage {} in bracket {}", stage, s)));
        }
        let (n_configs, n_resource) = self.bracket_params(s);
        let n_configs_stage = n_configs / self.eta.pow(stage as u32);
        let n_resource_stage = n_resource * self.eta.pow(stage as u32);
        Ok((n_configs_stage, n_resource_stage as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ConfigSpace;
    use crate::space::Hyperparameter;
    use crate::space::Value;
    use std::sync::Arc;

    fn bohb() -> Scheduler {
        Scheduler::bohb(1, 9, 3).unwrap()
    }

    #[test]
    fn bohb_r9_eta3_bracket_trace() {
        let scheduler = bohb();
        // iteration 0 -> s = 2 -> stages (9, 1), (3, 3), (1, 9)
        assert!(scheduler.get_bracket_index(0) == 2);
        assert!(scheduler.get_stage_params(2, 0).unwrap() == (9, 1.0));
        assert!(scheduler.get_stage_params(2, 1).unwrap() == (3, 3.0));
        assert!(scheduler.get_stage_params(2, 2).unwrap() == (1, 9.0));
        // iteration 1 -> s = 1 -> stages (5, 3), (1, 9)
        assert!(scheduler.get_bracket_index(1) == 1);
        assert!(scheduler.get_stage_params(1, 0).unwrap() == (5, 3.0));
        assert!(scheduler.get_stage_params(1, 1).unwrap() == (1, 9.0));
        // iteration 2 -> s = 0 -> stages (3, 9)
        assert!(scheduler.get_bracket_index(2) == 0);
        assert!(scheduler.get_stage_params(0, 0).unwrap() == (3, 9.0));
        // cycle repeats
        assert!(scheduler.get_bracket_index(3) == 2);
    }

    #[test]
    fn bohb_elimination_counts() {
        let scheduler = bohb();
        assert!(scheduler.get_elimination_count(2, 0).unwrap() == 3);
        assert!(scheduler.get_elimination_count(2, 1).unwrap() == 1);
        // full-fidelity stage keeps everything
        assert!(scheduler.get_elimination_count(2, 2).unwrap() == 1);
        assert!(scheduler.get_elimination_count(0, 0).unwrap() == 3);
    }

    #[test]
    fn bohb_resource_ratios() {
        let scheduler = bohb();
        assert!(scheduler.calculate_resource_ratio(1.0) == 0.11111);
        assert!(scheduler.calculate_resource_ratio(3.0) == 0.33333);
        assert!(scheduler.calculate_resource_ratio(9.0) == 1.0);
        assert!(scheduler.get_fidelity_levels() == vec![0.11111, 0.33333, 1.0]);
    }

    #[test]
    fn eta_power_boundary_yields_k_plus_one_brackets() {
        // r = eta^k with k = 3: brackets s_max..0, bracket 0 runs one stage
        // at full fidelity
        let scheduler = Scheduler::bohb(1, 27, 3).unwrap();
        assert!(scheduler.get_bracket_index(0) == 3);
        let (_, resource) = scheduler.get_stage_params(0, 0).unwrap();
        assert!(scheduler.calculate_resource_ratio(resource) == 1.0);
    }

    #[test]
    fn history_update_policy_differs_between_flavors() {
        let bohb = bohb();
        let mfes = Scheduler::mfes(1, 9, 3).unwrap();
        assert!(!bohb.should_update_history(0.33333));
        assert!(bohb.should_update_history(1.0));
        assert!(mfes.should_update_history(0.33333));
        assert!(mfes.should_update_history(1.0));
    }

    #[test]
    fn invalid_fixed_levels_fail_construction() {
        let err = Scheduler::fixed(1, vec![4, 2], vec![0.5, 0.25], vec![0.5, 1.0]);
        assert!(matches!(err, Err(Error::Configuration(_))));
    }

    #[test]
    fn out_of_range_stage_is_typed() {
        let scheduler = bohb();
        assert!(matches!(
            scheduler.get_stage_params(2, 3),
            Err(Error::OutOfRange(_))
        ));
        assert!(matches!(
            scheduler.get_stage_params(5, 0),
            Err(Error::OutOfRange(_))
        ));
    }

    #[test]
    fn elimination_keeps_best_in_sorted_order() {
        let space = ConfigSpace::new(vec![Hyperparameter::Integer {
            name: "a".to_string(),
            lower: 0,
            upper: 100,
            default: 0,
        }])
        .unwrap();
        let perfs = vec![5.0, 3.0, 8.0, 1.0, 9.0, 2.0, 4.0, 6.0, 7.0];
        let candidates = perfs
            .iter()
            .map(|p| {
                let mut c = Arc::clone(&space).default_configuration();
                c.set("a", Value::Int(*p as i64));
                c
            })
            .collect::<Vec<_>>();
        let scheduler = bohb();
        let (survivors, kept) = scheduler
            .eliminate_candidates(candidates, perfs, 2, 0)
            .unwrap();
        assert!(kept == vec![1.0, 2.0, 3.0]);
        assert!(survivors[0].get("a") == Some(&Value::Int(1)));
        assert!(survivors[1].get("a") == Some(&Value::Int(2)));
        assert!(survivors[2].get("a") == Some(&Value::Int(3)));
    }

    #[test]
    fn bracket_budget_is_conserved_within_rounding() {
        // sum over stages of n_configs is within one elimination factor of
        // the bracket's opening population
        let scheduler = bohb();
        for s in 0..=2usize {
            let opening = scheduler.get_stage_params(s, 0).unwrap().0;
            let mut total = 0;
            for stage in 0..=s {
                total += scheduler.get_stage_params(s, stage).unwrap().0;
            }
            assert!(total >= opening);
            assert!(total <= opening * 2);
        }
    }
}
