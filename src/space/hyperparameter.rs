use rand::Rng;

/// a typed cell of a configuration. reals hash and compare through their
/// bit pattern so that configurations can live in sets and maps.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Cat(usize),
}

impl Eq for Value {}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        match self {
            Value::Int(v) => {
                0u8.hash(state);
                v.hash(state);
            }
            Value::Real(v) => {
                1u8.hash(state);
                v.to_bits().hash(state);
            }
            Value::Cat(v) => {
                2u8.hash(state);
                v.hash(state);
            }
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Real(v) => write!(f, "{}", v),
            Value::Cat(v) => write!(f, "#{}", v),
        }
    }
}

/// a typed tunable declared by the configuration space. integers and reals
/// carry inclusive bounds; reals optionally quantize to a step; categoricals
/// index into their choice list.
#[derive(Debug, Clone, PartialEq)]
pub enum Hyperparameter {
    Integer {
        name: String,
        lower: i64,
        upper: i64,
        default: i64,
    },
    Real {
        name: String,
        lower: f64,
        upper: f64,
        default: f64,
        q: Option<f64>,
    },
    Categorical {
        name: String,
        choices: Vec<String>,
        default: usize,
    },
}

impl Hyperparameter {
    pub fn name(&self) -> &str {
        match self {
            Hyperparameter::Integer { name, .. } => name,
            Hyperparameter::Real { name, .. } => name,
            Hyperparameter::Categorical { name, .. } => name,
        }
    }

    pub fn default_value(&self) -> Value {
        match self {
            Hyperparameter::Integer { default, .. } => Value::Int(*default),
            Hyperparameter::Real { default, .. } => Value::Real(*default),
            Hyperparameter::Categorical { default, .. } => Value::Cat(*default),
        }
    }

    /// default in the unit representation, used to impute missing cells
    /// before batch acquisition evaluation.
    pub fn normalized_default(&self) -> f64 {
        self.normalize(&self.default_value())
    }

    /// map a typed value into [0, 1]
    pub fn normalize(&self, value: &Value) -> f64 {
        match (self, value) {
            (Hyperparameter::Integer { lower, upper, .. }, Value::Int(v)) => {
                if upper == lower {
                    0.0
                } else {
                    (*v - *lower) as f64 / (*upper - *lower) as f64
                }
            }
            (Hyperparameter::Real { lower, upper, .. }, Value::Real(v)) => {
                if upper == lower {
                    0.0
                } else {
                    (v - lower) / (upper - lower)
                }
            }
            (Hyperparameter::Categorical { choices, .. }, Value::Cat(i)) => {
                if choices.len() <= 1 {
                    0.0
                } else {
                    *i as f64 / (choices.len() - 1) as f64
                }
            }
            _ => f64::NAN,
        }
    }

    /// map a unit-representation cell back to a typed value, clamping into
    /// bounds and quantizing reals when a step is declared.
    pub fn denormalize(&self, unit: f64) -> Value {
        let unit = unit.clamp(0.0, 1.0);
        match self {
            Hyperparameter::Integer { lower, upper, .. } => {
                let span = (*upper - *lower) as f64;
                Value::Int(*lower + (unit * span).round() as i64)
            }
            Hyperparameter::Real { lower, upper, q, .. } => {
                let mut v = lower + unit * (upper - lower);
                if let Some(step) = q {
                    if *step > 0.0 {
                        v = lower + ((v - lower) / step).round() * step;
                    }
                }
                Value::Real(v.clamp(*lower, *upper))
            }
            Hyperparameter::Categorical { choices, .. } => {
                if choices.len() <= 1 {
                    Value::Cat(0)
                } else {
                    let i = (unit * (choices.len() - 1) as f64).round() as usize;
                    Value::Cat(i.min(choices.len() - 1))
                }
            }
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Value {
        match self {
            Hyperparameter::Integer { lower, upper, .. } => {
                Value::Int(rng.random_range(*lower..=*upper))
            }
            Hyperparameter::Real { .. } => self.denormalize(rng.random::<f64>()),
            Hyperparameter::Categorical { choices, .. } => {
                Value::Cat(rng.random_range(0..choices.len()))
            }
        }
    }

    /// one-exchange neighbor values for local search. integers step by one,
    /// reals take four gaussian perturbations of the unit value, categoricals
    /// enumerate every other choice.
    pub fn neighbors<R: Rng>(&self, value: &Value, rng: &mut R) -> Vec<Value> {
        match (self, value) {
            (Hyperparameter::Integer { lower, upper, .. }, Value::Int(v)) => {
                let mut out = Vec::new();
                if *v > *lower {
                    out.push(Value::Int(v - 1));
                }
                if *v < *upper {
                    out.push(Value::Int(v + 1));
                }
                out
            }
            (Hyperparameter::Real { .. }, Value::Real(_)) => {
                let unit = self.normalize(value);
                let mut out = Vec::new();
                for _ in 0..4 {
                    let step = 0.2 * (rng.random::<f64>() * 2.0 - 1.0);
                    let candidate = self.denormalize((unit + step).clamp(0.0, 1.0));
                    if candidate != *value && !out.contains(&candidate) {
                        out.push(candidate);
                    }
                }
                out
            }
            (Hyperparameter::Categorical { choices, .. }, Value::Cat(i)) => (0..choices.len())
                .filter(|j| j != i)
                .map(Value::Cat)
                .collect(),
            _ => Vec::new(),
        }
    }
}
