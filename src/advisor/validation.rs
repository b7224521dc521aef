use crate::space::Configuration;
use crate::space::Value;

/// rejection-sanitization of candidate configurations. the advisor tries
/// sanitize once and drops candidates that still fail.
#[derive(Debug, Clone)]
pub enum Validation {
    NoOp,
    /// a worker must have at least as many cores as threads per task, and
    /// both must be positive. unknown parameter names validate as true.
    MinCores {
        cores_param: String,
        threads_param: String,
    },
    /// valid only if every member validates; sanitizers apply in order
    Composite(Vec<Validation>),
}

impl Validation {
    pub fn min_cores(cores_param: impl Into<String>, threads_param: impl Into<String>) -> Self {
        Validation::MinCores {
            cores_param: cores_param.into(),
            threads_param: threads_param.into(),
        }
    }

    pub fn is_valid(&self, config: &Configuration) -> bool {
        match self {
            Validation::NoOp => true,
            Validation::MinCores {
                cores_param,
                threads_param,
            } => {
                let (Some(Value::Int(cores)), Some(Value::Int(threads))) =
                    (config.get(cores_param), config.get(threads_param))
                else {
                    return true;
                };
                *cores >= *threads && *cores >= 1 && *threads >= 1
            }
            Validation::Composite(members) => members.iter().all(|m| m.is_valid(config)),
        }
    }

    pub fn sanitize(&self, config: &mut Configuration) {
        match self {
            Validation::NoOp => {}
            Validation::MinCores {
                cores_param,
                threads_param,
            } => {
                let (Some(Value::Int(cores)), Some(Value::Int(threads))) =
                    (config.get(cores_param), config.get(threads_param))
                else {
                    return;
                };
                let (cores, threads) = ((*cores).max(1), (*threads).max(1));
                if cores < threads {
                    config.set(threads_param, Value::Int(cores));
                }
            }
            Validation::Composite(members) => {
                for member in members {
                    member.sanitize(config);
                }
            }
        }
    }
}
