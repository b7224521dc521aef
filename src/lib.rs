pub mod acquisition;
pub mod advisor;
pub mod compress;
pub mod error;
pub mod evaluator;
pub mod history;
pub mod optimizer;
pub mod partition;
pub mod scheduler;
pub mod space;
pub mod surrogate;
pub mod task;

pub use error::Error;
pub use error::Result;

/// dimensional analysis types
pub type Objective = f64;
pub type Weight = f64;
pub type Similarity = f64;
pub type Ratio = f64;

// objective bookkeeping parameters
pub const INFEASIBLE_PENALTY: Objective = 1e10;
pub const VAR_FLOOR: f64 = 1e-10;
pub const EI_SIGMA_FLOOR: f64 = 1e-9;

// ensemble weighting parameters
pub const K_FOLD_NUM: usize = 5;
pub const MFGPE_POWER: i32 = 3;
pub const RGPE_SAMPLES: usize = 50;
pub const NUM_SRC_TRIALS: usize = 50;

// acquisition optimization parameters
pub const CANDIDATE_MULTIPLIER: f64 = 3.0;
pub const LOCAL_MAX_NEIGHBORS: usize = 50;
pub const LOCAL_START_POINTS: usize = 10;
pub const ACQ_MAXIMIZE_POINTS: usize = 2000;
pub const DEFAULT_RAND_PROB: f64 = 0.15;

// run persistence parameters
pub const BACKUP_MIN_ITERS: usize = 25;

/// resource ratios are compared and keyed after rounding to 5 decimals
pub fn round5(x: f64) -> f64 {
    (x * 1e5).round() / 1e5
}

/// integer map key for a rounded resource ratio
pub fn ratio_key(x: f64) -> i64 {
    (x * 1e5).round() as i64
}

/// trait for random generation, mainly (strictly?) for testing
pub trait Arbitrary {
    fn random() -> Self;
}

/// progress bar
pub fn progress(n: usize) -> indicatif::ProgressBar {
    let tick = std::time::Duration::from_secs(60);
    let style = "{spinner:.cyan} {elapsed} ~ {percent:>3}% {wide_bar:.cyan}";
    let style = indicatif::ProgressStyle::with_template(style).unwrap();
    let progress = indicatif::ProgressBar::new(n as u64);
    progress.set_style(style);
    progress.enable_steady_tick(tick);
    progress
}

/// initialize logging
pub fn init() {
    std::fs::create_dir_all("logs").expect("create logs directory");
    let config = simplelog::ConfigBuilder::new()
        .set_location_level(log::LevelFilter::Off)
        .set_target_level(log::LevelFilter::Off)
        .set_thread_level(log::LevelFilter::Off)
        .build();
    let time = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time moves slow")
        .as_secs();
    let file = simplelog::WriteLogger::new(
        log::LevelFilter::Debug,
        config.clone(),
        std::fs::File::create(format!("logs/{}.log", time)).expect("create log file"),
    );
    let term = simplelog::TermLogger::new(
        log::LevelFilter::Info,
        config.clone(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );
    simplelog::CombinedLogger::init(vec![term, file]).expect("initialize logger");
}
