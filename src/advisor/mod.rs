pub mod method;
pub mod validation;
pub mod warm_start;

pub use method::Method;
pub use method::RandMode;
pub use method::TlStrategy;
pub use method::WsStrategy;
pub use validation::Validation;
pub use warm_start::WarmStarter;

use crate::acquisition::optimizer::CompositeOptimizer;
use crate::compress::Compressor;
use crate::compress::SamplingStrategy;
use crate::evaluator::build_observation;
use crate::evaluator::ResultRecord;
use crate::history::History;
use crate::history::Observation;
use crate::history::Transform;
use crate::ratio_key;
use crate::round5;
use crate::space::ConfigSpace;
use crate::space::Configuration;
use crate::surrogate::SourceTask;
use crate::surrogate::Surrogate;
use crate::surrogate::TransferEnsemble;
use crate::surrogate::WeightCalculator;
use crate::task::TaskManager;
use crate::Error;
use crate::Ratio;
use crate::Result;
use crate::Similarity;
use rand::rngs::SmallRng;
use rand::Rng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

/// proposes candidate configurations from the surrogate-modeled posterior
/// and routes observations back into the right history. one advisor covers
/// plain BO and the multi-fidelity variants; MFES additionally maintains
/// per-resource histories that feed the ensemble as extra source tasks.
pub struct Advisor {
    method: Method,
    ws_strategy: WsStrategy,
    tl_strategy: TlStrategy,
    rand_prob: f64,
    rand_mode: RandMode,
    validation: Validation,
    task: Arc<TaskManager>,
    compressor: Arc<dyn Compressor>,
    surrogate_space: Arc<ConfigSpace>,
    sample_space: Arc<ConfigSpace>,
    sampling: SamplingStrategy,
    source_histories: Vec<History>,
    source_sims: Vec<(usize, Similarity)>,
    history: Arc<RwLock<History>>,
    ini_configs: Vec<Configuration>,
    warm_starter: WarmStarter,
    surrogate: Surrogate,
    acq_optimizer: CompositeOptimizer,
    init_num: usize,
    norm_y: bool,
    rng: SmallRng,
    mf_histories: Vec<History>,
    resource_identifiers: Vec<i64>,
}

impl Advisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task: Arc<TaskManager>,
        method: Method,
        ws_strategy: WsStrategy,
        tl_strategy: TlStrategy,
        seed: u64,
        rand_prob: f64,
        rand_mode: RandMode,
        validation: Validation,
    ) -> Result<Self> {
        let compressor = task.get_compressor().ok_or_else(|| {
            Error::configuration("compressor must be registered before creating the advisor")
        })?;
        let history = task
            .current_history()
            .ok_or_else(|| Error::configuration("current task history not initialized"))?;

        let (source_histories, source_sims) = if tl_strategy.is_none() {
            (Vec::new(), Vec::new())
        } else {
            task.get_similar_tasks(Some(task.tl_args().topk))
        };
        let sims_map = source_sims
            .iter()
            .map(|(i, s)| (*i, *s))
            .collect::<BTreeMap<usize, f64>>();
        let (surrogate_space, sample_space) =
            compressor.compress_space(&source_histories, &sims_map);

        let mut rng = SmallRng::seed_from_u64(seed);
        let sampling = compressor.get_sampling_strategy(seed);
        let warm_starter = WarmStarter::create(&ws_strategy, &tl_strategy, &method, task.ws_args());
        log::info!("using warm starter: {:?}", warm_starter);

        task.update_history_meta_info(
            "random",
            serde_json::json!({
                "seed": seed,
                "rand_prob": rand_prob,
                "rand_mode": rand_mode.label(),
            }),
        );
        task.update_history_meta_info(
            "space",
            serde_json::json!({
                "original": task.config_space().len(),
                "dimension": surrogate_space.len(),
                "range": sample_space.len(),
            }),
        );
        task.update_history_meta_info("compressor", compressor.get_compression_summary());

        // with transfer learning the initialization budget equals the number
        // of similar tasks, otherwise it comes from the warm-start arguments
        let init_num = if tl_strategy.is_none() {
            task.ws_args().init_num
        } else {
            task.tl_args().topk
        };
        let norm_y = !tl_strategy.uses_rank_acquisition();

        let transformed_sources = compressor.transform_source_data(&source_histories);
        let surrogate = Self::build_surrogate(
            &method,
            &tl_strategy,
            rng.random::<u64>(),
            &transformed_sources,
            norm_y,
        );
        let acq_optimizer = CompositeOptimizer::local_random(
            tl_strategy.acquisition(),
            rand_prob,
            rng.random::<u64>(),
        );

        // MFES with transfer seeds its per-resource history list with the
        // source histories; -1 marks those placeholder slots
        let (mf_histories, resource_identifiers) = if method.is_mfes() && !tl_strategy.is_none() {
            let ids = vec![-1i64; transformed_sources.len()];
            (transformed_sources, ids)
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(Self {
            method,
            ws_strategy,
            tl_strategy,
            rand_prob,
            rand_mode,
            validation,
            task,
            compressor,
            surrogate_space,
            sample_space,
            sampling,
            source_histories,
            source_sims,
            history,
            ini_configs: Vec::new(),
            warm_starter,
            surrogate,
            acq_optimizer,
            init_num,
            norm_y,
            rng,
            mf_histories,
            resource_identifiers,
        })
    }

    fn build_surrogate(
        method: &Method,
        tl_strategy: &TlStrategy,
        seed: u64,
        sources: &[History],
        norm_y: bool,
    ) -> Surrogate {
        if let Some(calculator) = tl_strategy.calculator() {
            let tasks = sources
                .iter()
                .filter(|h| !h.is_empty())
                .map(|h| SourceTask::from_history(h, crate::NUM_SRC_TRIALS))
                .collect();
            Surrogate::Ensemble(TransferEnsemble::new(
                method.base_kind(),
                seed,
                calculator,
                tasks,
                false,
                norm_y,
            ))
        } else if method.is_mfes() {
            // multi-fidelity ensembling without transfer: sources arrive
            // later as per-resource histories
            Surrogate::Ensemble(TransferEnsemble::new(
                method.base_kind(),
                seed,
                WeightCalculator::mfgpe(),
                Vec::new(),
                false,
                norm_y,
            ))
        } else {
            Surrogate::Base(method.base_kind().build(seed))
        }
    }

    pub fn history(&self) -> Arc<RwLock<History>> {
        self.history.clone()
    }

    pub fn surrogate(&self) -> &Surrogate {
        &self.surrogate
    }

    pub fn init_num(&self) -> usize {
        self.init_num
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn task(&self) -> &Arc<TaskManager> {
        &self.task
    }

    pub fn rand_mode(&self) -> RandMode {
        self.rand_mode
    }

    pub fn surrogate_space(&self) -> &Arc<ConfigSpace> {
        &self.surrogate_space
    }

    pub fn sample_space(&self) -> &Arc<ConfigSpace> {
        &self.sample_space
    }

    pub fn has_default_config(&self) -> bool {
        self.history
            .read()
            .expect("history lock")
            .observations
            .iter()
            .any(|o| o.config.origin == "Default Configuration")
    }

    /// the default configuration is evaluated during meta-feature
    /// bootstrapping and does not count against the initialization budget
    pub fn num_evaluated_excluding_default(&self) -> usize {
        let len = self.history.read().expect("history lock").len();
        if len == 0 {
            return 0;
        }
        if self.has_default_config() {
            len - 1
        } else {
            len
        }
    }

    /// populate the initial-configuration queue from similar source tasks,
    /// padding any shortfall with random samples at the front
    pub fn warm_start(&mut self) {
        if self.ws_strategy == WsStrategy::None || self.tl_strategy.is_none() {
            return;
        }
        self.update_ws_info();
        let num_evaluated = self.num_evaluated_excluding_default();
        log::info!("begin warm start: {:?}", self.warm_starter);
        let mut queue = self.warm_starter.initial_configs(
            &self.source_histories,
            &self.source_sims,
            self.init_num,
            num_evaluated,
            self.compressor.as_ref(),
        );
        let target = self.warm_starter.target_length(self.init_num);
        while queue.len() + num_evaluated < target {
            let excluded = self.existing_configs();
            let Some(mut config) = self.sample_random_configs(1, &excluded).pop() else {
                break;
            };
            config.origin = format!("{} Warm Start Random Sample", self.ws_strategy.label());
            queue.insert(0, config);
        }
        queue.extend(self.ini_configs.drain(..));
        self.ini_configs = queue;
        log::info!(
            "warm start queued {} configurations",
            self.ini_configs.len()
        );
    }

    fn update_ws_info(&mut self) {
        let provenance = self
            .source_sims
            .iter()
            .map(|(idx, sim)| format!("{}: sim{:.4}", self.source_histories[*idx].task_id, sim))
            .collect::<Vec<String>>();
        self.history
            .write()
            .expect("history lock")
            .meta_info_push("warm_start", serde_json::json!(provenance));
    }

    pub fn sample(&mut self, batch_size: usize) -> Vec<Configuration> {
        if self.method.is_mfes() {
            self.sample_multi_fidelity(batch_size)
        } else {
            self.sample_with_prefix(batch_size, "")
        }
    }

    /// MFES initialization runs at full fidelity, one warm-start config per
    /// batch; afterwards the per-resource histories refresh the ensemble
    /// sources and sampling continues through the shared policy
    fn sample_multi_fidelity(&mut self, batch_size: usize) -> Vec<Configuration> {
        let num_evaluated = self.num_evaluated_excluding_default();
        if self.ini_configs.is_empty() && num_evaluated < self.init_num {
            self.warm_start();
        }
        if num_evaluated < self.init_num {
            let mut batch = Vec::new();
            if let Some(mut config) = self.ini_configs.pop() {
                config.origin = format!("MF Warm Start {}", config.origin);
                batch.push(config);
            }
            let mut excluded = self.existing_configs();
            excluded.extend(batch.iter().cloned());
            let fill = batch_size.saturating_sub(batch.len());
            for mut config in self.sample_random_configs(fill, &excluded) {
                config.origin = "MF Warm Start Random Sample".to_string();
                batch.push(config);
            }
            log::info!(
                "multi-fidelity initialization batch of {} ({} warm-start left)",
                batch.len(),
                self.ini_configs.len()
            );
            return batch;
        }
        self.refresh_mf_sources();
        self.sample_with_prefix(batch_size, "MF ")
    }

    fn sample_with_prefix(&mut self, batch_size: usize, prefix: &str) -> Vec<Configuration> {
        let num_evaluated = self.num_evaluated_excluding_default();
        if self.ini_configs.is_empty() && num_evaluated < self.init_num {
            self.warm_start();
        }
        log::info!(
            "evaluated: [{}], init_num: [{}], queued warm starts: [{}]",
            num_evaluated,
            self.init_num,
            self.ini_configs.len()
        );
        let from_mf = prefix == "MF ";
        let is_bohb = self.method.is_bohb();

        if num_evaluated < self.init_num && !from_mf {
            let mut batch = Vec::new();
            if is_bohb {
                // full-fidelity warm start: one queued config per batch
                if let Some(mut config) = self.ini_configs.pop() {
                    config.origin = format!("{}BO Warm Start {}", prefix, config.origin);
                    batch.push(config);
                }
                let mut excluded = self.existing_configs();
                excluded.extend(batch.iter().cloned());
                let fill = batch_size.saturating_sub(batch.len());
                for mut config in self.sample_random_configs(fill, &excluded) {
                    config.origin = format!("{}BO Warm Start Random Sample", prefix);
                    batch.push(config);
                }
            } else {
                for _ in 0..batch_size {
                    match self.ini_configs.pop() {
                        Some(mut config) => {
                            config.origin = format!("{}BO Warm Start {}", prefix, config.origin);
                            batch.push(config);
                        }
                        None => {
                            let mut excluded = self.existing_configs();
                            excluded.extend(batch.iter().cloned());
                            if let Some(mut config) =
                                self.sample_random_configs(1, &excluded).pop()
                            {
                                config.origin =
                                    format!("{}BO Warm Start Random Sample", prefix);
                                batch.push(config);
                            }
                        }
                    }
                }
            }
            let mut batch = batch;
            self.compressor.unproject_points(&mut batch);
            return batch;
        }

        let (x, y, observations) = self.training_data();
        if x.is_empty() {
            let mut batch = self.sample_random_configs(batch_size, &[]);
            self.compressor.unproject_points(&mut batch);
            return batch;
        }
        self.surrogate.train(&x, &y);
        let context = {
            let history = self.history.read().expect("history lock");
            self.surrogate.get_acquisition_context(&history)
        };
        self.acq_optimizer.update_acquisition(&context);
        let challengers =
            self.acq_optimizer
                .maximize(&observations, crate::ACQ_MAXIMIZE_POINTS, &mut self.sampling);

        let mut batch: Vec<Configuration> = Vec::new();
        // low-fidelity phases still drain a couple of warm starts first
        if (is_bohb || from_mf) && !self.ini_configs.is_empty() {
            let take = 2.min(batch_size).min(self.ini_configs.len());
            for _ in 0..take {
                let mut config = self.ini_configs.pop().expect("non-empty queue");
                config.origin = format!("{}BO Warm Start {}", prefix, config.origin);
                batch.push(config);
            }
            log::info!(
                "took {} warm-start configurations, {} remaining",
                take,
                self.ini_configs.len()
            );
        }

        let existing = self.existing_configs();
        for (_, config) in challengers {
            if batch.len() >= batch_size {
                break;
            }
            let mut config = config;
            if existing.contains(&config) {
                continue;
            }
            if !self.validation.is_valid(&config) {
                self.validation.sanitize(&mut config);
            }
            if self.validation.is_valid(&config) && !batch.contains(&config) {
                config.origin = format!("{}BO Acquisition {}", prefix, config.origin);
                batch.push(config);
            }
        }
        if batch.len() < batch_size {
            let mut excluded = existing;
            excluded.extend(batch.iter().cloned());
            let fill = batch_size - batch.len();
            for mut config in self.sample_random_configs(fill, &excluded) {
                config.origin = format!("{}BO Acquisition Random Sample", prefix);
                batch.push(config);
            }
        }
        self.compressor.unproject_points(&mut batch);
        batch
    }

    /// rejection sampling through the sampling strategy, sanitizing invalid
    /// draws and skipping duplicates; bounded so a tiny space cannot hang
    pub fn sample_random_configs(
        &mut self,
        num: usize,
        excluded: &[Configuration],
    ) -> Vec<Configuration> {
        let mut configs: Vec<Configuration> = Vec::new();
        let mut trials = 0;
        let max_trials = 100.max(num * 20);
        while configs.len() < num && trials < max_trials {
            trials += 1;
            let Some(mut sampled) = self.sampling.sample(1).pop() else {
                break;
            };
            if !self.validation.is_valid(&sampled) {
                self.validation.sanitize(&mut sampled);
                if !self.validation.is_valid(&sampled) {
                    continue;
                }
            }
            if configs.contains(&sampled) || excluded.contains(&sampled) {
                continue;
            }
            sampled.origin = "Random Sample!".to_string();
            configs.push(sampled);
        }
        configs
    }

    fn existing_configs(&self) -> Vec<Configuration> {
        self.history
            .read()
            .expect("history lock")
            .observations
            .iter()
            .map(|o| o.config.clone())
            .collect()
    }

    /// surrogate-space training matrix, objectives with the infeasible
    /// penalty, and surrogate-space observations for local search
    fn training_data(&self) -> (Vec<Vec<f64>>, Vec<f64>, Vec<Observation>) {
        let history = self.history.read().expect("history lock");
        let observations = history
            .observations
            .iter()
            .map(|o| {
                let mut converted = o.clone();
                converted.config = self.compressor.convert_config_to_surrogate_space(&o.config);
                converted
            })
            .collect::<Vec<Observation>>();
        let x = observations
            .iter()
            .map(|o| o.config.to_vector())
            .collect::<Vec<Vec<f64>>>();
        let y = history.get_objectives(Transform::Infeasible);
        (x, y, observations)
    }

    fn refresh_mf_sources(&mut self) {
        let sources = self
            .mf_histories
            .iter()
            .filter(|h| !h.is_empty())
            .map(|h| SourceTask::from_history(h, crate::NUM_SRC_TRIALS))
            .collect::<Vec<SourceTask>>();
        if let Some(ensemble) = self.surrogate.as_ensemble_mut() {
            ensemble.update_mf_trials(sources);
        }
    }

    /// route one evaluation result into history. MFES sends sub-fidelity
    /// observations into a per-resource history created on first use;
    /// everything else appends to the main history. update = false is a
    /// strict no-op, at any fidelity.
    pub fn update(
        &mut self,
        config: &Configuration,
        result: &ResultRecord,
        resource_ratio: Ratio,
        update: bool,
    ) {
        if !update {
            return;
        }
        let mut observation = build_observation(config, result);
        self.cache_low_dim(config, &mut observation);
        let key = ratio_key(resource_ratio);
        if self.method.is_mfes() && key != ratio_key(1.0) {
            if !self.resource_identifiers.contains(&key) {
                let (task_id, space) = {
                    let history = self.history.read().expect("history lock");
                    (history.task_id.clone(), history.space().clone())
                };
                self.resource_identifiers.push(key);
                self.mf_histories.push(History::new(
                    format!("res{:.5}_{}", round5(resource_ratio), task_id),
                    space,
                ));
            }
            let index = self
                .resource_identifiers
                .iter()
                .position(|k| *k == key)
                .expect("identifier just ensured");
            self.mf_histories[index].update_observation(observation);
        } else {
            self.history
                .write()
                .expect("history lock")
                .update_observation(observation);
        }
    }

    fn cache_low_dim(&self, config: &Configuration, observation: &mut Observation) {
        if !self.compressor.needs_unproject() {
            return;
        }
        if let Some(low) = config.low_dim.clone() {
            observation.extra_info.low_dim_config = Some(low);
        } else if let Some(low) = self.compressor.project_point(config) {
            observation.extra_info.low_dim_config = Some(low);
        }
    }

    /// ask the compressor to refresh its projection; when the spaces change
    /// shape the surrogate, sampler and acquisition optimizer are rebuilt
    /// and retrained on everything accumulated so far. idempotent when
    /// nothing changed.
    pub fn update_compression(&mut self) -> bool {
        let snapshot = self.history.read().expect("history lock").clone();
        if !self.compressor.update_compression(&snapshot) {
            return false;
        }
        log::info!("compression updated, rebuilding surrogate and sampler");
        self.surrogate_space = self.compressor.surrogate_space();
        self.sample_space = self.compressor.sample_space();
        let transformed = self.compressor.transform_source_data(&self.source_histories);
        self.surrogate = Self::build_surrogate(
            &self.method,
            &self.tl_strategy,
            self.rng.random::<u64>(),
            &transformed,
            self.norm_y,
        );
        self.sampling = self
            .compressor
            .get_sampling_strategy(self.rng.random::<u64>());
        self.acq_optimizer = CompositeOptimizer::local_random(
            self.tl_strategy.acquisition(),
            self.rand_prob,
            self.rng.random::<u64>(),
        );
        let (x, y, _) = self.training_data();
        if !x.is_empty() {
            self.surrogate.train(&x, &y);
            let context = {
                let history = self.history.read().expect("history lock");
                self.surrogate.get_acquisition_context(&history)
            };
            self.acq_optimizer.update_acquisition(&context);
        }
        log::info!(
            "surrogate rebuilt over {} dimensions",
            self.surrogate_space.len()
        );
        true
    }

    pub fn mf_history_count(&self) -> usize {
        self.mf_histories.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::IdentityCompressor;
    use crate::evaluator::EvalResult;
    use crate::history::ExtraInfo;
    use crate::history::TrialState;
    use crate::space::Value;
    use crate::task::SimilarityMeasure;
    use crate::task::TlArgs;
    use crate::task::WsArgs;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::from_schema_str(
            r#"{
                "cores":    { "type": "integer", "min": 1, "max": 64, "default": 4 },
                "fraction": { "type": "float", "min": 0.0, "max": 1.0, "q": 0.01, "default": 0.5 }
            }"#,
        )
        .unwrap()
    }

    fn task_with_history() -> Arc<TaskManager> {
        let task = TaskManager::new(
            space(),
            WsArgs {
                init_num: 3,
                topk: 2,
            },
            TlArgs { topk: 2 },
            0.0,
            SimilarityMeasure::Cosine,
        );
        task.register_compressor(Arc::new(IdentityCompressor::new(task.config_space().clone())));
        task.initialize_current_task("target", Some(vec![1.0, 0.0]));
        task
    }

    fn result(objective: f64) -> ResultRecord {
        ResultRecord {
            result: EvalResult { objective },
            timeout: false,
            traceback: None,
            elapsed_time: objective,
            extra_info: ExtraInfo::default(),
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
    fn initialization_batches_are_random_and_distinct() {
        let task = task_with_history();
        let mut advisor = advisor(&task, "SMAC");
        let batch = advisor.sample(3);
        assert!(batch.len() == 3);
        for i in 0..batch.len() {
            for j in (i + 1)..batch.len() {
                assert!(batch[i] != batch[j]);
            }
        }
    }

    #[test]
    fn surrogate_phase_rejects_duplicates_of_history() {
        let task = task_with_history();
        let mut advisor = advisor(&task, "SMAC");
        for i in 0..6 {
            let mut config = task.config_space().default_configuration();
            config.set("cores", Value::Int(4 + i));
            advisor.update(&config, &result(10.0 + i as f64), 1.0, true);
        }
        let existing = advisor.existing_configs();
        let batch = advisor.sample(4);
        assert!(batch.len() == 4);
        for config in batch.iter() {
            assert!(!existing.contains(config));
        }
        for i in 0..batch.len() {
            for j in (i + 1)..batch.len() {
                assert!(batch[i] != batch[j]);
            }
        }
    }

    #[test]
    fn update_false_is_a_strict_noop() {
        let task = task_with_history();
        let mut advisor = advisor(&task, "MFES_SMAC");
        let before = advisor.history().read().unwrap().len();
        let config = task.config_space().default_configuration();
        advisor.update(&config, &result(5.0), 0.33333, false);
        advisor.update(&config, &result(5.0), 1.0, false);
        assert!(advisor.history().read().unwrap().len() == before);
        assert!(advisor.mf_history_count() == 0);
    }

    #[test]
    fn mfes_routes_subfidelity_observations_to_resource_histories() {
        let task = task_with_history();
        let mut advisor = advisor(&task, "MFES_SMAC");
        let config = task.config_space().default_configuration();
        let before = advisor.history().read().unwrap().len();
        advisor.update(&config, &result(7.0), 0.33333, true);
        advisor.update(&config, &result(6.0), 0.33333, true);
        advisor.update(&config, &result(5.0), 1.0, true);
        assert!(advisor.mf_history_count() == 1);
        assert!(advisor.history().read().unwrap().len() == before + 1);
    }

    #[test]
    fn failed_results_are_retained_as_infeasible() {
        let task = task_with_history();
        let mut advisor = advisor(&task, "SMAC");
        let config = task.config_space().default_configuration();
        let mut failed = result(5.0);
        failed.traceback = Some("boom".to_string());
        advisor.update(&config, &failed, 1.0, true);
        let history = advisor.history();
        let history = history.read().unwrap();
        let last = history.observations.last().unwrap();
        assert!(last.trial_state == TrialState::Failed);
        assert!(!last.is_finite());
        assert!(history.get_objectives(Transform::Infeasible)[history.len() - 1]
            == crate::INFEASIBLE_PENALTY);
    }

    #[test]
    fn update_compression_is_idempotent_with_identity() {
        let task = task_with_history();
        let mut advisor = advisor(&task, "SMAC");
        assert!(!advisor.update_compression());
        assert!(!advisor.update_compression());
    }
}
