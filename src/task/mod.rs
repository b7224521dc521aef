pub mod meta;
pub mod registry;

pub use meta::SimilarityMeasure;
pub use registry::Component;
pub use registry::ComponentRegistry;

use crate::compress::Compressor;
use crate::evaluator::build_observation;
use crate::evaluator::ResultRecord;
use crate::history::History;
use crate::partition::EvalPlan;
use crate::partition::Partitioner;
use crate::partition::Planner;
use crate::scheduler::Scheduler;
use crate::space::ConfigSpace;
use crate::space::Configuration;
use crate::Ratio;
use crate::Result;
use crate::Similarity;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;

/// warm-start arguments shared through the task manager
#[derive(Debug, Clone)]
pub struct WsArgs {
    pub init_num: usize,
    pub topk: usize,
}

impl Default for WsArgs {
    fn default() -> Self {
        Self {
            init_num: 4,
            topk: 4,
        }
    }
}

/// transfer-learning arguments shared through the task manager
#[derive(Debug, Clone)]
pub struct TlArgs {
    pub topk: usize,
}

impl Default for TlArgs {
    fn default() -> Self {
        Self { topk: 3 }
    }
}

#[derive(Default)]
struct TaskState {
    source_histories: Vec<History>,
    source_meta_features: Vec<Option<Vec<f64>>>,
    current: Option<Arc<RwLock<History>>>,
    current_meta: Option<Vec<f64>>,
    similarity_cache: Vec<(usize, Similarity)>,
}

/// process-wide task state, passed around as an explicit Arc handle: the
/// current task history, source-task histories with their meta features,
/// the similarity cache, and the component registry.
pub struct TaskManager {
    config_space: Arc<ConfigSpace>,
    ws_args: WsArgs,
    tl_args: TlArgs,
    similarity_threshold: f64,
    measure: SimilarityMeasure,
    state: RwLock<TaskState>,
    registry: ComponentRegistry,
}

impl TaskManager {
    pub fn new(
        config_space: Arc<ConfigSpace>,
        ws_args: WsArgs,
        tl_args: TlArgs,
        similarity_threshold: f64,
        measure: SimilarityMeasure,
    ) -> Arc<Self> {
        Arc::new(Self {
            config_space,
            ws_args,
            tl_args,
            similarity_threshold,
            measure,
            state: RwLock::new(TaskState::default()),
            registry: ComponentRegistry::new(),
        })
    }

    pub fn config_space(&self) -> &Arc<ConfigSpace> {
        &self.config_space
    }

    pub fn ws_args(&self) -> &WsArgs {
        &self.ws_args
    }

    pub fn tl_args(&self) -> &TlArgs {
        &self.tl_args
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    /// load every history JSON in the directory as a source task
    pub fn load_source_histories(&self, dir: &Path) -> Result<usize> {
        if !dir.exists() {
            log::warn!("history directory {} does not exist", dir.display());
            return Ok(0);
        }
        let mut entries = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|x| x == "json").unwrap_or(false))
            .collect::<Vec<_>>();
        entries.sort();
        let mut state = self.state.write().expect("task state");
        for path in entries {
            let history = History::load_json(&path, self.config_space.clone())?;
            let meta = history
                .meta_info
                .get("meta_feature")
                .and_then(|v| v.as_array())
                .map(|a| a.iter().filter_map(|x| x.as_f64()).collect::<Vec<f64>>());
            if meta.is_none() {
                log::warn!("no meta_feature in {}", path.display());
            }
            state.source_meta_features.push(meta);
            state.source_histories.push(history);
        }
        let loaded = state.source_histories.len();
        log::info!("loaded {} source task histories", loaded);
        Ok(loaded)
    }

    pub fn num_source_tasks(&self) -> usize {
        self.state.read().expect("task state").source_histories.len()
    }

    pub fn source_histories(&self) -> Vec<History> {
        self.state
            .read()
            .expect("task state")
            .source_histories
            .clone()
    }

    pub fn initialize_current_task(&self, task_id: &str, meta_feature: Option<Vec<f64>>) {
        let mut history = History::new(task_id, self.config_space.clone());
        if let Some(meta) = meta_feature.as_ref() {
            history
                .meta_info
                .insert("meta_feature".to_string(), serde_json::json!(meta));
        }
        let mut state = self.state.write().expect("task state");
        state.current_meta = meta_feature;
        state.current = Some(Arc::new(RwLock::new(history)));
        log::info!("initialized current task history: {}", task_id);
    }

    /// load the current task from a prior run's JSON, skipping the default
    /// configuration evaluation
    pub fn resume_current_task(&self, path: &Path) -> Result<()> {
        let history = History::load_json(path, self.config_space.clone())?;
        let meta = history
            .meta_info
            .get("meta_feature")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|x| x.as_f64()).collect::<Vec<f64>>());
        let mut state = self.state.write().expect("task state");
        state.current_meta = meta;
        state.current = Some(Arc::new(RwLock::new(history)));
        log::info!("resumed current task from {}", path.display());
        Ok(())
    }

    pub fn current_history(&self) -> Option<Arc<RwLock<History>>> {
        self.state.read().expect("task state").current.clone()
    }

    pub fn update_history_meta_info(&self, key: &str, value: serde_json::Value) {
        if let Some(current) = self.current_history() {
            current
                .write()
                .expect("history lock")
                .meta_info
                .insert(key.to_string(), value);
        } else {
            log::warn!("current task not initialized, cannot update meta info");
        }
    }

    /// bootstrap the current task: evaluate the default configuration at
    /// full fidelity (or resume), then refresh the similarity cache
    pub fn calculate_meta_feature<F>(
        &self,
        eval_fn: F,
        task_id: &str,
        meta_feature: Option<Vec<f64>>,
        resume: Option<&Path>,
    ) -> Result<()>
    where
        F: Fn(&Configuration, Ratio) -> ResultRecord,
    {
        if let Some(path) = resume {
            self.resume_current_task(path)?;
            self.compute_similarity();
            return Ok(());
        }
        let default = self.config_space.default_configuration();
        let result = eval_fn(&default, 1.0);
        self.initialize_current_task(task_id, meta_feature);
        let observation = build_observation(&default, &result);
        if let Some(current) = self.current_history() {
            current
                .write()
                .expect("history lock")
                .update_observation(observation);
        }
        self.compute_similarity();
        Ok(())
    }

    /// refresh the similarity cache from meta features, sorted descending
    /// and truncated by the threshold; the partition plan goes stale
    pub fn compute_similarity(&self) {
        let mut state = self.state.write().expect("task state");
        let Some(current_meta) = state.current_meta.clone() else {
            log::warn!("current task not initialized, cannot compute similarity");
            return;
        };
        let mut sims = state
            .source_meta_features
            .iter()
            .enumerate()
            .filter_map(|(i, meta)| {
                meta.as_ref()
                    .map(|m| (i, self.measure.similarity(&current_meta, m)))
            })
            .filter(|(_, sim)| *sim >= self.similarity_threshold)
            .collect::<Vec<(usize, Similarity)>>();
        sims.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("finite similarity"));
        log::info!(
            "similarity cache: {} tasks above threshold {}",
            sims.len(),
            self.similarity_threshold
        );
        state.similarity_cache = sims;
        drop(state);
        self.mark_plan_dirty();
    }

    /// top-k similar source histories with their similarities renormalized
    /// to sum to one; indices are re-based onto the returned list
    pub fn get_similar_tasks(
        &self,
        topk: Option<usize>,
    ) -> (Vec<History>, Vec<(usize, Similarity)>) {
        let state = self.state.read().expect("task state");
        if state.similarity_cache.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let topk = topk
            .unwrap_or(state.similarity_cache.len())
            .min(state.similarity_cache.len());
        let mut histories = Vec::with_capacity(topk);
        let mut sims = Vec::with_capacity(topk);
        for (rank, (index, sim)) in state.similarity_cache.iter().take(topk).enumerate() {
            histories.push(state.source_histories[*index].clone());
            sims.push((rank, *sim));
        }
        let total = sims.iter().map(|(_, s)| *s).sum::<f64>();
        if total > 0.0 {
            for (_, sim) in sims.iter_mut() {
                *sim /= total;
            }
        }
        (histories, sims)
    }

    pub fn register_scheduler(&self, scheduler: Arc<Scheduler>) {
        self.registry
            .register("scheduler", Component::Scheduler(scheduler), false);
        self.mark_plan_dirty();
    }

    pub fn get_scheduler(&self) -> Option<Arc<Scheduler>> {
        match self.registry.get("scheduler") {
            Some(Component::Scheduler(s)) => Some(s),
            _ => None,
        }
    }

    pub fn register_partitioner(&self, partitioner: Arc<Mutex<Partitioner>>) {
        self.registry
            .register("partitioner", Component::Partitioner(partitioner), true);
    }

    pub fn get_partitioner(&self) -> Option<Arc<Mutex<Partitioner>>> {
        match self.registry.get("partitioner") {
            Some(Component::Partitioner(p)) => Some(p),
            _ => None,
        }
    }

    pub fn register_planner(&self, planner: Arc<Planner>) {
        self.registry
            .register("planner", Component::Planner(planner), true);
    }

    pub fn get_planner(&self) -> Option<Arc<Planner>> {
        match self.registry.get("planner") {
            Some(Component::Planner(p)) => Some(p),
            _ => None,
        }
    }

    pub fn register_compressor(&self, compressor: Arc<dyn Compressor>) {
        self.registry
            .register("compressor", Component::Compressor(compressor), true);
    }

    pub fn get_compressor(&self) -> Option<Arc<dyn Compressor>> {
        match self.registry.get("compressor") {
            Some(Component::Compressor(c)) => Some(c),
            _ => None,
        }
    }

    fn mark_plan_dirty(&self) {
        if let Some(partitioner) = self.get_partitioner() {
            partitioner.lock().expect("partitioner lock").mark_dirty();
        }
    }

    /// resolve the evaluation plan for a resource ratio through the
    /// registered planner, partitioner and scheduler
    pub fn plan_for(&self, resource_ratio: Ratio, force_refresh: bool) -> Option<EvalPlan> {
        let planner = self.get_planner()?;
        let partitioner = self.get_partitioner()?;
        let levels = self
            .get_scheduler()
            .map(|s| s.get_fidelity_levels())
            .unwrap_or_else(|| vec![1.0]);
        let (histories, sims) = self.get_similar_tasks(None);
        let sources = histories
            .into_iter()
            .zip(sims.into_iter().map(|(_, s)| s))
            .collect::<Vec<(History, Similarity)>>();
        let mut partitioner = partitioner.lock().expect("partitioner lock");
        let weighted = partitioner.assemble_histories(None, &sources);
        planner.plan(
            &mut partitioner,
            &weighted,
            &levels,
            resource_ratio,
            force_refresh,
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ExtraInfo;
    use crate::history::Observation;
    use crate::history::TrialState;
    use crate::space::Hyperparameter;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::new(vec![Hyperparameter::Integer {
            name: "a".to_string(),
            lower: 0,
            upper: 4,
            default: 2,
        }])
        .unwrap()
    }

    fn manager() -> Arc<TaskManager> {
        TaskManager::new(
            space(),
            WsArgs::default(),
            TlArgs::default(),
            0.0,
            SimilarityMeasure::Cosine,
        )
    }

    fn seeded_source(manager: &Arc<TaskManager>, task_id: &str, meta: Vec<f64>) {
        let mut history = History::new(task_id, manager.config_space().clone());
        history
            .meta_info
            .insert("meta_feature".to_string(), serde_json::json!(meta));
        history.update_observation(Observation {
            config: manager.config_space().default_configuration(),
            objectives: vec![1.0],
            trial_state: TrialState::Success,
            elapsed_time: 1.0,
            extra_info: ExtraInfo::default(),
        });
        let mut state = manager.state.write().unwrap();
        state.source_meta_features.push(Some(meta));
        state.source_histories.push(history);
    }

    #[test]
    fn similarity_cache_is_sorted_descending() {
        let manager = manager();
        seeded_source(&manager, "far", vec![0.0, 1.0]);
        seeded_source(&manager, "near", vec![1.0, 0.1]);
        manager.initialize_current_task("current", Some(vec![1.0, 0.0]));
        manager.compute_similarity();
        let (histories, sims) = manager.get_similar_tasks(None);
        assert!(histories[0].task_id == "near");
        for pair in sims.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
        let total = sims.iter().map(|(_, s)| *s).sum::<f64>();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn topk_truncates_the_cache() {
        let manager = manager();
        for i in 0..5 {
            seeded_source(&manager, &format!("s{}", i), vec![1.0, i as f64 * 0.1]);
        }
        manager.initialize_current_task("current", Some(vec![1.0, 0.0]));
        manager.compute_similarity();
        let (histories, sims) = manager.get_similar_tasks(Some(2));
        assert!(histories.len() == 2);
        assert!(sims.len() == 2);
    }

    #[test]
    fn scheduler_registration_is_one_time() {
        let manager = manager();
        manager.register_scheduler(Arc::new(Scheduler::full(1)));
        let first = manager.get_scheduler().unwrap();
        manager.register_scheduler(Arc::new(Scheduler::full(9)));
        assert!(manager.get_scheduler().unwrap().num_nodes() == first.num_nodes());
    }

    #[test]
    fn scheduler_registration_marks_plan_dirty() {
        let manager = manager();
        let partitioner = Arc::new(Mutex::new(Partitioner::new(vec!["q1".to_string()])));
        partitioner.lock().unwrap().build_plan(&[], &[1.0]);
        assert!(!partitioner.lock().unwrap().is_dirty());
        manager.register_partitioner(partitioner.clone());
        manager.register_scheduler(Arc::new(Scheduler::full(1)));
        assert!(partitioner.lock().unwrap().is_dirty());
    }
}
