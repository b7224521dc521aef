use super::Evaluator;
use super::ResultRecord;
use crate::partition::EvalPlan;
use crate::space::Configuration;
use crate::task::TaskManager;
use crate::Ratio;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::time::Instant;

type FallbackPlan = Box<dyn Fn(Ratio) -> Option<EvalPlan> + Send + Sync>;

/// bounded pool of concurrent evaluator slots. callers block until a slot
/// frees up; the slot is returned on every exit path, and any evaluator
/// failure is converted into the infinite-objective default record.
pub struct EvaluatorManager {
    evaluators: Vec<Box<dyn Evaluator>>,
    slots: Mutex<VecDeque<usize>>,
    available: Condvar,
    task: Arc<TaskManager>,
    fallback_plan: Option<FallbackPlan>,
}

/// slot token returned to the queue when dropped
struct SlotGuard<'a> {
    manager: &'a EvaluatorManager,
    index: usize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.manager.slots.lock().expect("slot queue");
        slots.push_back(self.index);
        self.manager.available.notify_one();
        log::debug!("evaluator {} marked as free again", self.index);
    }
}

impl EvaluatorManager {
    pub fn new(evaluators: Vec<Box<dyn Evaluator>>, task: Arc<TaskManager>) -> Self {
        assert!(!evaluators.is_empty(), "at least one evaluator slot");
        let slots = (0..evaluators.len()).collect::<VecDeque<usize>>();
        Self {
            evaluators,
            slots: Mutex::new(slots),
            available: Condvar::new(),
            task,
            fallback_plan: None,
        }
    }

    pub fn with_fallback_plan(mut self, fallback: FallbackPlan) -> Self {
        self.fallback_plan = Some(fallback);
        self
    }

    pub fn num_evaluators(&self) -> usize {
        self.evaluators.len()
    }

    fn acquire(&self) -> SlotGuard<'_> {
        let mut slots = self.slots.lock().expect("slot queue");
        loop {
            if let Some(index) = slots.pop_front() {
                log::debug!("got free evaluator: {}", index);
                return SlotGuard {
                    manager: self,
                    index,
                };
            }
            slots = self.available.wait(slots).expect("slot queue");
        }
    }

    /// dispatch one evaluation: block for a slot, resolve the plan (errors
    /// swallowed, fallback hook consulted), run the evaluator, substitute
    /// the default record on failure
    pub fn call(&self, config: &Configuration, resource_ratio: Ratio) -> ResultRecord {
        let guard = self.acquire();
        let start = Instant::now();

        let mut plan = self.task.plan_for(resource_ratio, false);
        if plan.is_none() {
            if let Some(fallback) = self.fallback_plan.as_ref() {
                plan = fallback(resource_ratio);
            }
        }

        let result = self.evaluators[guard.index]
            .evaluate(config, resource_ratio, plan.as_ref())
            .unwrap_or_else(|error| {
                log::error!(
                    "evaluator {} raised, continuing with infinite objective: {}",
                    guard.index,
                    error
                );
                ResultRecord::infeasible(start.elapsed().as_secs_f64())
            });
        drop(guard);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::EvalResult;
    use crate::evaluator::MockEvaluator;
    use crate::history::ExtraInfo;
    use crate::space::ConfigSpace;
    use crate::space::Hyperparameter;
    use crate::task::SimilarityMeasure;
    use crate::task::TlArgs;
    use crate::task::WsArgs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn task() -> Arc<TaskManager> {
        let space = ConfigSpace::new(vec![Hyperparameter::Real {
            name: "x".to_string(),
            lower: 0.0,
            upper: 1.0,
            default: 0.5,
            q: None,
        }])
        .unwrap();
        TaskManager::new(
            space,
            WsArgs::default(),
            TlArgs::default(),
            0.0,
            SimilarityMeasure::Cosine,
        )
    }

    struct FailingEvaluator;

    impl Evaluator for FailingEvaluator {
        fn evaluate(
            &self,
            _config: &Configuration,
            _resource_ratio: Ratio,
            _plan: Option<&EvalPlan>,
        ) -> anyhow::Result<ResultRecord> {
            anyhow::bail!("cluster unreachable")
        }
    }

    struct CountingEvaluator {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Evaluator for CountingEvaluator {
        fn evaluate(
            &self,
            _config: &Configuration,
            _resource_ratio: Ratio,
            _plan: Option<&EvalPlan>,
        ) -> anyhow::Result<ResultRecord> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(10));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ResultRecord {
                result: EvalResult { objective: 1.0 },
                timeout: false,
                traceback: None,
                elapsed_time: 0.01,
                extra_info: ExtraInfo::default(),
            })
        }
    }

    #[test]
    fn failures_become_the_default_infinite_record() {
        let task = task();
        let manager = EvaluatorManager::new(vec![Box::new(FailingEvaluator)], task.clone());
        let config = task.config_space().default_configuration();
        let record = manager.call(&config, 1.0);
        assert!(record.timeout);
        assert!(record.result.objective.is_infinite());
        // the slot came back: a second call must not deadlock
        let record = manager.call(&config, 1.0);
        assert!(record.timeout);
    }

    #[test]
    fn concurrency_is_bounded_by_the_slot_count() {
        let task = task();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let evaluators: Vec<Box<dyn Evaluator>> = (0..2)
            .map(|_| {
                Box::new(CountingEvaluator {
                    active: active.clone(),
                    peak: peak.clone(),
                }) as Box<dyn Evaluator>
            })
            .collect();
        let manager = Arc::new(EvaluatorManager::new(evaluators, task.clone()));
        let config = task.config_space().default_configuration();
        std::thread::scope(|scope| {
            for _ in 0..8 {
                let manager = manager.clone();
                let config = config.clone();
                scope.spawn(move || {
                    manager.call(&config, 1.0);
                });
            }
        });
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn fallback_plan_hook_is_consulted_when_no_planner_exists() {
        let task = task();
        let manager = EvaluatorManager::new(vec![Box::new(MockEvaluator::new(1))], task.clone())
            .with_fallback_plan(Box::new(|ratio| {
                Some(EvalPlan {
                    sqls: vec!["q1".to_string()],
                    timeout: Default::default(),
                    selected_fidelity: ratio,
                    plan_source: "fallback".to_string(),
                })
            }));
        let config = task.config_space().default_configuration();
        let record = manager.call(&config, 0.5);
        assert!(record.extra_info.plan_sqls == Some(vec!["q1".to_string()]));
    }
}
