use anyhow::Context;
use clap::Parser;
use mftune::advisor::Advisor;
use mftune::advisor::Method;
use mftune::advisor::RandMode;
use mftune::advisor::TlStrategy;
use mftune::advisor::Validation;
use mftune::advisor::WsStrategy;
use mftune::compress::IdentityCompressor;
use mftune::evaluator::Evaluator;
use mftune::evaluator::EvaluatorManager;
use mftune::evaluator::MockEvaluator;
use mftune::optimizer::Optimizer;
use mftune::optimizer::RunOptions;
use mftune::partition::Partitioner;
use mftune::partition::Planner;
use mftune::scheduler::Scheduler;
use mftune::space::ConfigSpace;
use mftune::task::SimilarityMeasure;
use mftune::task::TaskManager;
use mftune::task::TlArgs;
use mftune::task::WsArgs;
use rand::Rng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

/// multi-fidelity bayesian optimization with transfer learning for
/// configuration tuning
#[derive(Parser, Debug)]
#[command(name = "tune", version, about)]
struct Args {
    /// method id: selects advisor, scheduler and surrogate kinds
    #[arg(long, default_value = "MFES_SMAC")]
    opt: String,

    /// total iterations
    #[arg(long, default_value_t = 40)]
    iter_num: usize,

    /// maximum resource units per configuration (multi-fidelity methods)
    #[arg(long, default_value_t = 27)]
    r: usize,

    /// elimination factor between stages
    #[arg(long, default_value_t = 3)]
    eta: usize,

    /// warm-start strategy: none | best_all | best_cos | best_euc
    #[arg(long, default_value = "none")]
    warm_start: String,

    /// transfer-learning strategy: none | mce | re | mceacq | reacq
    #[arg(long, default_value = "none")]
    transfer: String,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    #[arg(long, default_value_t = mftune::DEFAULT_RAND_PROB)]
    rand_prob: f64,

    /// random sampling mode: ran | rs
    #[arg(long, default_value = "ran")]
    rand_mode: String,

    /// resume the current task from a history JSON, skipping the default
    /// configuration evaluation
    #[arg(long)]
    resume: Option<PathBuf>,

    /// configuration-space schema JSON
    #[arg(long)]
    space: PathBuf,

    #[arg(long, default_value = "test")]
    task: String,

    /// target system label, used in result and backup paths
    #[arg(long, default_value = "mock")]
    target: String,

    #[arg(long, default_value = "./results")]
    save_dir: PathBuf,

    /// directory of source-task history JSONs for transfer learning
    #[arg(long)]
    history_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1)]
    num_nodes: usize,

    #[arg(long, default_value_t = 4)]
    ws_init_num: usize,

    #[arg(long, default_value_t = 4)]
    ws_topk: usize,

    #[arg(long, default_value_t = 3)]
    tl_topk: usize,

    #[arg(long, default_value_t = 0.0)]
    similarity_threshold: f64,

    /// run against the synthetic mock evaluator instead of a live target
    #[arg(long, default_value_t = false)]
    test_mode: bool,

    /// number of concurrent evaluator slots
    #[arg(long, default_value_t = 1)]
    num_evaluator: usize,

    /// append this run to the per-target backup at completion
    #[arg(long, default_value_t = false)]
    backup: bool,

    /// parameter pair enforcing cores >= threads during sanitization
    #[arg(long, num_args = 2, value_names = ["CORES", "THREADS"])]
    min_cores: Option<Vec<String>>,
}

fn main() -> anyhow::Result<()> {
    mftune::init();
    let args = Args::parse();

    let method = Method::parse(&args.opt)?;
    let ws_strategy = WsStrategy::parse(&args.warm_start)?;
    let tl_strategy = TlStrategy::parse(&args.transfer)?;
    let rand_mode = RandMode::parse(&args.rand_mode)?;

    let space = ConfigSpace::from_schema_file(&args.space)
        .with_context(|| format!("loading space schema {}", args.space.display()))?;
    log::info!("loaded configuration space with {} parameters", space.len());

    let measure = match ws_strategy {
        WsStrategy::BestEuc => SimilarityMeasure::Euclidean,
        _ => SimilarityMeasure::Cosine,
    };
    let task = TaskManager::new(
        space.clone(),
        WsArgs {
            init_num: args.ws_init_num,
            topk: args.ws_topk,
        },
        TlArgs { topk: args.tl_topk },
        args.similarity_threshold,
        measure,
    );
    if let Some(dir) = args.history_dir.as_ref() {
        task.load_source_histories(dir)?;
    }
    task.register_compressor(Arc::new(IdentityCompressor::new(space.clone())));

    let subtasks = (1..=10).map(|i| format!("q{:02}", i)).collect::<Vec<_>>();
    task.register_partitioner(Arc::new(Mutex::new(Partitioner::new(subtasks))));
    task.register_planner(Arc::new(Planner::default()));

    if !args.test_mode {
        anyhow::bail!(
            "no live evaluator is wired in this build; run with --test-mode or \
             integrate an Evaluator implementation for target '{}'",
            args.target
        );
    }
    let evaluators: Vec<Box<dyn Evaluator>> = (0..args.num_evaluator.max(1))
        .map(|i| Box::new(MockEvaluator::new(args.seed.wrapping_add(i as u64))) as Box<dyn Evaluator>)
        .collect();
    let evaluator = Arc::new(EvaluatorManager::new(evaluators, task.clone()));

    let mut meta_rng = rand::rngs::SmallRng::seed_from_u64(args.seed);
    let meta_feature = (0..34).map(|_| meta_rng.random::<f64>()).collect::<Vec<f64>>();
    let pool = evaluator.clone();
    task.calculate_meta_feature(
        move |config, ratio| pool.call(config, ratio),
        &args.task,
        Some(meta_feature),
        args.resume.as_deref(),
    )?;

    let scheduler = if method.is_mfes() {
        Scheduler::mfes(args.num_nodes, args.r, args.eta)?
    } else if method.is_bohb() {
        Scheduler::bohb(args.num_nodes, args.r, args.eta)?
    } else {
        Scheduler::full(args.num_nodes)
    };

    let validation = match args.min_cores.as_deref() {
        Some([cores, threads]) => Validation::min_cores(cores.clone(), threads.clone()),
        _ => Validation::NoOp,
    };

    let advisor = Advisor::new(
        task.clone(),
        method.clone(),
        ws_strategy,
        tl_strategy,
        args.seed,
        args.rand_prob,
        rand_mode,
        validation,
    )?;

    let mut optimizer = Optimizer::new(
        &task,
        Arc::new(scheduler),
        advisor,
        evaluator,
        RunOptions {
            iter_num: args.iter_num,
            method_id: method.id().to_string(),
            task_id: args.task.clone(),
            target: args.target.clone(),
            save_dir: args.save_dir.clone(),
            backup: args.backup,
            resume: args.resume.is_some(),
        },
    )?;
    optimizer.run()?;
    log::info!("finished {} iterations", optimizer.iter_id());
    Ok(())
}
