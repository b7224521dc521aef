use crate::advisor::Advisor;
use crate::evaluator::EvaluatorManager;
use crate::evaluator::ResultRecord;
use crate::scheduler::Scheduler;
use crate::space::Configuration;
use crate::task::TaskManager;
use crate::Objective;
use crate::Ratio;
use crate::Result;
use rayon::iter::IntoParallelRefIterator;
use rayon::iter::ParallelIterator;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

/// run options carried by the top-level loop
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub iter_num: usize,
    pub method_id: String,
    pub task_id: String,
    pub target: String,
    pub save_dir: PathBuf,
    pub backup: bool,
    pub resume: bool,
}

/// the top-level decision loop: each iteration asks the scheduler for its
/// bracket structure, the advisor for candidates, the evaluator pool for
/// costs, and feeds results back before persisting the history.
pub struct Optimizer {
    scheduler: Arc<Scheduler>,
    advisor: Advisor,
    evaluator: Arc<EvaluatorManager>,
    iter_num: usize,
    iter_id: usize,
    result_path: PathBuf,
    backup_path: PathBuf,
    backup: bool,
    recorder: Vec<serde_json::Value>,
}

impl Optimizer {
    pub fn new(
        task: &Arc<TaskManager>,
        scheduler: Arc<Scheduler>,
        advisor: Advisor,
        evaluator: Arc<EvaluatorManager>,
        options: RunOptions,
    ) -> Result<Self> {
        task.register_scheduler(scheduler.clone());

        let res_dir = options
            .save_dir
            .join(&options.target)
            .join(&options.method_id);
        std::fs::create_dir_all(&res_dir)?;
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time moves slow");
        let result_path = res_dir.join(format!(
            "{}_{}-{:09}.json",
            options.task_id,
            now.as_secs(),
            now.subsec_nanos()
        ));

        let backup_path = PathBuf::from(format!("./backup/ts_backup_{}.json", options.target));
        let recorder = match std::fs::read_to_string(&backup_path) {
            Ok(text) => {
                let records: Vec<serde_json::Value> = serde_json::from_str(&text)?;
                log::warn!("initialized backup recorder from {}", backup_path.display());
                records
            }
            Err(_) => {
                log::warn!(
                    "backup file {} not found, starting empty",
                    backup_path.display()
                );
                Vec::new()
            }
        };

        let iter_id = if options.resume {
            let len = advisor.history().read().expect("history lock").len();
            len.saturating_sub(1)
        } else {
            0
        };

        Ok(Self {
            scheduler,
            advisor,
            evaluator,
            iter_num: options.iter_num,
            iter_id,
            result_path,
            backup_path,
            backup: options.backup,
            recorder,
        })
    }

    pub fn advisor(&self) -> &Advisor {
        &self.advisor
    }

    pub fn iter_id(&self) -> usize {
        self.iter_id
    }

    pub fn result_path(&self) -> &Path {
        &self.result_path
    }

    pub fn run(&mut self) -> Result<()> {
        while self.iter_id < self.iter_num {
            self.run_one_iter()?;
        }
        Ok(())
    }

    pub fn run_one_iter(&mut self) -> Result<()> {
        self.iter_id += 1;
        log::info!(
            "iter =========================================================== {:3}",
            self.iter_id
        );
        let num_evaluated = self.advisor.num_evaluated_excluding_default();
        let (candidates, perfs) = if num_evaluated < self.advisor.init_num() {
            // initialization phase: full fidelity, one batch per node slot
            let batch = self.scheduler.num_nodes();
            let candidates = self.advisor.sample(batch);
            log::info!("initialization batch of {} candidates", candidates.len());
            let perfs = self.evaluate_in_parallel(&candidates, 1.0);
            (candidates, perfs)
        } else {
            self.iterate()?
        };
        self.advisor.update_compression();
        self.log_iteration_results(&candidates, &perfs);
        self.save_info()?;
        Ok(())
    }

    /// one successive-halving bracket: sample at stage zero, evaluate at the
    /// stage's fidelity, eliminate, carry the survivors forward
    fn iterate(&mut self) -> Result<(Vec<Configuration>, Vec<Objective>)> {
        let offset = self.iter_id as i64
            - self.advisor.init_num() as i64
            - i64::from(self.advisor.has_default_config());
        let s = self.scheduler.get_bracket_index(offset);

        let mut survivors = Vec::new();
        let mut survivor_perfs = Vec::new();
        let mut candidates = Vec::new();
        for stage in 0..=s {
            let (n_configs, n_resource) = self.scheduler.get_stage_params(s, stage)?;
            log::info!(
                "stage {}: n_configs = {}, n_resource = {}",
                stage,
                n_configs,
                n_resource
            );
            if stage == 0 {
                candidates = self.advisor.sample(n_configs);
                log::info!("generated {} stage-zero candidates", candidates.len());
            }
            let ratio = self.scheduler.calculate_resource_ratio(n_resource);
            let perfs = self.evaluate_in_parallel(&candidates, ratio);
            let (kept, kept_perfs) =
                self.scheduler
                    .eliminate_candidates(candidates, perfs, s, stage)?;
            candidates = kept;
            if stage == s {
                survivors.extend(candidates.iter().cloned());
                survivor_perfs.extend(kept_perfs.iter().copied());
            }
        }
        Ok((survivors, survivor_perfs))
    }

    /// dispatch one batch through the bounded evaluator pool. results pair
    /// with their configuration by position, and every result flows into
    /// the advisor under the scheduler's history-update policy.
    fn evaluate_in_parallel(
        &mut self,
        candidates: &[Configuration],
        ratio: Ratio,
    ) -> Vec<Objective> {
        let evaluator = self.evaluator.clone();
        let results: Vec<ResultRecord> = candidates
            .par_iter()
            .map(|config| evaluator.call(config, ratio))
            .collect();
        let update = self.scheduler.should_update_history(ratio);
        let mut perfs = Vec::with_capacity(results.len());
        for (config, result) in candidates.iter().zip(results.iter()) {
            self.advisor.update(config, result, ratio, update);
            perfs.push(result.result.objective);
        }
        perfs
    }

    fn log_iteration_results(&self, candidates: &[Configuration], perfs: &[Objective]) {
        log::info!("------------------------------------------------------------------");
        for (config, perf) in candidates.iter().zip(perfs.iter()) {
            if !config.origin.is_empty() {
                log::warn!("!!!!!!!!!! {} !!!!!!!!!!", config.origin);
            }
            log::info!("config: {}", config);
            log::info!("obj: {}", perf);
        }
        let incumbent = self
            .advisor
            .history()
            .read()
            .expect("history lock")
            .get_incumbent_value();
        log::info!("best obj: {:?}", incumbent);
        log::info!("==================================================================");
    }

    /// persist the weight trajectory and the history JSON (atomically)
    /// every iteration; the run backup is appended once at completion
    fn save_info(&mut self) -> Result<()> {
        if let Some(hist_ws) = self.advisor.surrogate().hist_ws() {
            self.advisor
                .history()
                .write()
                .expect("history lock")
                .meta_info
                .insert("tl_ws".to_string(), serde_json::json!(hist_ws));
        }
        let history = self.advisor.history();
        history
            .read()
            .expect("history lock")
            .save_json(&self.result_path)?;

        if self.iter_id == self.iter_num && self.backup {
            self.record_task()?;
            self.save_backup()?;
        }
        Ok(())
    }

    /// short runs are not worth keeping as transfer sources
    fn record_task(&mut self) -> Result<()> {
        if self.iter_id >= crate::BACKUP_MIN_ITERS {
            let value = self
                .advisor
                .history()
                .read()
                .expect("history lock")
                .to_json_value()?;
            self.recorder.push(value);
            log::warn!("recorded task into backup");
        } else {
            log::warn!(
                "not recording task: fewer than {} iterations",
                crate::BACKUP_MIN_ITERS
            );
        }
        Ok(())
    }

    fn save_backup(&self) -> Result<()> {
        if let Some(dir) = self.backup_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let text = serde_json::to_string_pretty(&self.recorder)?;
        let tmp = self.backup_path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.backup_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::Method;
    use crate::advisor::RandMode;
    use crate::advisor::TlStrategy;
    use crate::advisor::Validation;
    use crate::advisor::WsStrategy;
    use crate::compress::IdentityCompressor;
    use crate::evaluator::Evaluator;
    use crate::evaluator::MockEvaluator;
    use crate::history::History;
    use crate::history::Transform;
    use crate::space::ConfigSpace;
    use crate::task::SimilarityMeasure;
    use crate::task::TlArgs;
    use crate::task::TaskManager;
    use crate::task::WsArgs;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::from_schema_str(
            r#"{
                "cores":    { "type": "integer", "min": 1, "max": 32, "default": 4 },
                "fraction": { "type": "float", "min": 0.0, "max": 1.0, "q": 0.01, "default": 0.5 },
                "codec":    { "type": "categorical", "choice_values": ["lz4", "zstd"], "default": "lz4" }
            }"#,
        )
        .unwrap()
    }

    fn task_manager() -> Arc<TaskManager> {
        let task = TaskManager::new(
            space(),
            WsArgs {
                init_num: 2,
                topk: 2,
            },
            TlArgs { topk: 2 },
            0.0,
            SimilarityMeasure::Cosine,
        );
        task.register_compressor(Arc::new(IdentityCompressor::new(
            task.config_space().clone(),
        )));
        task
    }

    fn bootstrap(task: &Arc<TaskManager>, evaluator: &Arc<EvaluatorManager>) {
        let pool = evaluator.clone();
        task.calculate_meta_feature(
            move |config, ratio| pool.call(config, ratio),
            "target",
            Some(vec![0.5, 0.5]),
            None,
        )
        .unwrap();
    }

    fn evaluator_pool(task: &Arc<TaskManager>, slots: usize) -> Arc<EvaluatorManager> {
        let evaluators: Vec<Box<dyn Evaluator>> = (0..slots)
            .map(|i| Box::new(MockEvaluator::new(i as u64)) as Box<dyn Evaluator>)
            .collect();
        Arc::new(EvaluatorManager::new(evaluators, task.clone()))
    }

    fn options(dir: &Path, method_id: &str, iter_num: usize) -> RunOptions {
        RunOptions {
            iter_num,
            method_id: method_id.to_string(),
            task_id: "target".to_string(),
            target: "mock".to_string(),
            save_dir: dir.to_path_buf(),
            backup: false,
            resume: false,
        }
    }

    fn advisor(task: &Arc<TaskManager>, method: &str) -> Advisor {
        Advisor::new(
            task.clone(),
            Method::parse(method).unwrap(),
            WsStrategy::None,
            TlStrategy::None,
            42,
            crate::DEFAULT_RAND_PROB,
            RandMode::Ran,
            Validation::NoOp,
        )
        .unwrap()
    }

    #[test]
    fn full_fidelity_run_accumulates_history_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_manager();
        let evaluator = evaluator_pool(&task, 2);
        bootstrap(&task, &evaluator);
        let advisor = advisor(&task, "SMAC");
        let scheduler = Arc::new(Scheduler::full(1));
        let mut optimizer = Optimizer::new(
            &task,
            scheduler,
            advisor,
            evaluator,
            options(dir.path(), "SMAC", 5),
        )
        .unwrap();
        optimizer.run().unwrap();

        let history = optimizer.advisor().history();
        let history = history.read().unwrap();
        // default config + one evaluation per iteration
        assert!(history.len() == 6);
        assert!(history.get_incumbent_value().unwrap().is_finite());
        assert!(optimizer.result_path().exists());

        let reloaded = History::load_json(optimizer.result_path(), space()).unwrap();
        assert!(reloaded.get_objectives(Transform::None) == history.get_objectives(Transform::None));
    }

    #[test]
    fn bohb_keeps_subfidelity_observations_out_of_the_main_history() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_manager();
        let evaluator = evaluator_pool(&task, 3);
        bootstrap(&task, &evaluator);
        let advisor = advisor(&task, "BOHB_SMAC");
        let scheduler = Arc::new(Scheduler::bohb(1, 9, 3).unwrap());
        let mut optimizer = Optimizer::new(
            &task,
            scheduler,
            advisor,
            evaluator,
            options(dir.path(), "BOHB_SMAC", 4),
        )
        .unwrap();
        optimizer.run().unwrap();

        let history = optimizer.advisor().history();
        let history = history.read().unwrap();
        // every recorded observation was evaluated at full fidelity, so
        // every objective is finite under the mock evaluator
        assert!(history.len() >= 3);
        assert!(history
            .observations
            .iter()
            .all(|o| o.objectives[0].is_finite()));
    }

    #[test]
    fn mfes_accumulates_per_resource_histories() {
        let dir = tempfile::tempdir().unwrap();
        let task = task_manager();
        let evaluator = evaluator_pool(&task, 3);
        bootstrap(&task, &evaluator);
        let advisor = advisor(&task, "MFES_SMAC");
        let scheduler = Arc::new(Scheduler::mfes(1, 9, 3).unwrap());
        let mut optimizer = Optimizer::new(
            &task,
            scheduler,
            advisor,
            evaluator,
            options(dir.path(), "MFES_SMAC", 4),
        )
        .unwrap();
        optimizer.run().unwrap();
        // brackets with sub-fidelity stages ran, so per-resource histories
        // exist alongside the main one
        assert!(optimizer.advisor().mf_history_count() >= 1);
    }

    #[test]
    fn transfer_run_records_warm_start_and_weight_trajectory() {
        let dir = tempfile::tempdir().unwrap();
        let source_dir = dir.path().join("sources");
        std::fs::create_dir_all(&source_dir).unwrap();

        // fabricate two source tasks with meta features and save them the
        // way a prior run would have
        for (name, meta) in [("alpha", vec![0.5, 0.5]), ("beta", vec![0.4, 0.6])] {
            let task = task_manager();
            let evaluator = evaluator_pool(&task, 1);
            bootstrap(&task, &evaluator);
            let mut advisor = advisor(&task, "SMAC");
            for _ in 0..6 {
                let batch = advisor.sample(1);
                let result = evaluator.call(&batch[0], 1.0);
                advisor.update(&batch[0], &result, 1.0, true);
            }
            let history = advisor.history();
            let mut history = history.read().unwrap().clone();
            history.task_id = name.to_string();
            history
                .meta_info
                .insert("meta_feature".to_string(), serde_json::json!(meta));
            history
                .save_json(&source_dir.join(format!("{}.json", name)))
                .unwrap();
        }

        let task = task_manager();
        task.load_source_histories(&source_dir).unwrap();
        let evaluator = evaluator_pool(&task, 2);
        bootstrap(&task, &evaluator);
        let advisor = Advisor::new(
            task.clone(),
            Method::parse("SMAC").unwrap(),
            WsStrategy::BestAll,
            TlStrategy::Mce,
            42,
            crate::DEFAULT_RAND_PROB,
            RandMode::Ran,
            Validation::NoOp,
        )
        .unwrap();
        let scheduler = Arc::new(Scheduler::full(1));
        let mut optimizer = Optimizer::new(
            &task,
            scheduler,
            advisor,
            evaluator,
            options(dir.path(), "SMAC", 8),
        )
        .unwrap();
        optimizer.run().unwrap();

        let history = optimizer.advisor().history();
        let history = history.read().unwrap();
        assert!(history.meta_info.contains_key("warm_start"));
        assert!(history.meta_info.contains_key("tl_ws"));
        // warm-start origins made it into the evaluated configurations
        assert!(history
            .observations
            .iter()
            .any(|o| o.config.origin.contains("Warm Start")));
    }
}
