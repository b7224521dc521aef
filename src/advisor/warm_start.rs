use super::Method;
use super::TlStrategy;
use super::WsStrategy;
use crate::compress::Compressor;
use crate::history::History;
use crate::space::Configuration;
use crate::task::WsArgs;
use crate::Similarity;

/// seeds the advisor's initial-configuration queue from similar source
/// tasks. the queue is drained LIFO, so the returned list is reversed with
/// the best candidates at the back.
#[derive(Debug, Clone)]
pub enum WarmStarter {
    None,
    /// best ws_topk observations per source, interleaved rank-major:
    /// task1 rank0, task2 rank0, ..., task1 rank1, ...
    BestConfigs { label: String, ws_topk: usize },
}

impl WarmStarter {
    pub fn create(
        ws_strategy: &WsStrategy,
        tl_strategy: &TlStrategy,
        method: &Method,
        ws_args: &WsArgs,
    ) -> Self {
        if *ws_strategy == WsStrategy::None || *tl_strategy == TlStrategy::None {
            return WarmStarter::None;
        }
        let ws_topk = if method.is_multi_fidelity() {
            ws_args.topk.max(1)
        } else {
            1
        };
        WarmStarter::BestConfigs {
            label: ws_strategy.label().to_string(),
            ws_topk,
        }
    }

    /// target queue length; the advisor pads any shortfall with random
    /// samples at the front
    pub fn target_length(&self, init_num: usize) -> usize {
        match self {
            WarmStarter::None => 0,
            WarmStarter::BestConfigs { ws_topk, .. } => init_num * ws_topk,
        }
    }

    pub fn initial_configs(
        &self,
        sources: &[History],
        sims: &[(usize, Similarity)],
        init_num: usize,
        num_evaluated: usize,
        compressor: &dyn Compressor,
    ) -> Vec<Configuration> {
        let WarmStarter::BestConfigs { label, ws_topk } = self else {
            return Vec::new();
        };
        if sources.is_empty() || sims.is_empty() {
            log::info!("no source data for warm start");
            return Vec::new();
        }

        let mut per_source = Vec::new();
        for (idx, sim) in sims.iter() {
            let source = &sources[*idx];
            let mut observations = source.observations.iter().collect::<Vec<_>>();
            observations.sort_by(|a, b| {
                a.objective()
                    .partial_cmp(&b.objective())
                    .expect("comparable objectives")
            });
            observations.truncate(*ws_topk);
            log::info!(
                "source task {}: selected top {} configurations",
                source.task_id,
                observations.len()
            );
            per_source.push((*idx, *sim, observations));
        }

        let target_length = init_num * ws_topk;
        let mut queue = Vec::new();
        'outer: for rank in 0..*ws_topk {
            for (idx, sim, observations) in per_source.iter() {
                if queue.len() + num_evaluated >= target_length {
                    break 'outer;
                }
                let Some(observation) = observations.get(rank) else {
                    continue;
                };
                let mut config = compressor.convert_config_to_sample_space(&observation.config);
                config.origin = format!(
                    "{}_{}_{:.4}_rank{}",
                    label, sources[*idx].task_id, sim, rank
                );
                log::info!(
                    "warm start from task {}, rank {}, objective {}",
                    sources[*idx].task_id,
                    rank,
                    observation.objective()
                );
                queue.push(config);
            }
        }
        queue.reverse();
        queue
    }
}
