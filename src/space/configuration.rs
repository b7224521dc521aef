use super::hyperparameter::Value;
use super::space::ConfigSpace;
use std::collections::BTreeMap;
use std::sync::Arc;

/// an ordered tuple of typed values aligned to its space, plus a provenance
/// tag and (when a compressor is active) the low-dimensional projection it
/// was sampled from. equality and hashing cover the values only.
#[derive(Debug, Clone)]
pub struct Configuration {
    space: Arc<ConfigSpace>,
    values: Vec<Value>,
    pub origin: String,
    pub low_dim: Option<BTreeMap<String, f64>>,
}

impl PartialEq for Configuration {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl Eq for Configuration {}

impl std::hash::Hash for Configuration {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.values.hash(state);
    }
}

impl Configuration {
    pub fn new(space: Arc<ConfigSpace>, values: Vec<Value>, origin: impl Into<String>) -> Self {
        assert!(values.len() == space.len());
        Self {
            space,
            values,
            origin: origin.into(),
            low_dim: None,
        }
    }

    pub fn space(&self) -> &Arc<ConfigSpace> {
        &self.space
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.space.position(name).map(|i| &self.values[i])
    }

    pub fn set(&mut self, name: &str, value: Value) -> bool {
        match self.space.position(name) {
            Some(i) => {
                self.values[i] = value;
                true
            }
            None => false,
        }
    }

    /// dense unit-representation row used as surrogate input
    pub fn to_vector(&self) -> Vec<f64> {
        self.space
            .params()
            .iter()
            .zip(self.values.iter())
            .map(|(hp, v)| hp.normalize(v))
            .collect()
    }

    /// typed values keyed by name, the canonical persisted form
    pub fn to_map(&self) -> BTreeMap<String, serde_json::Value> {
        self.space
            .params()
            .iter()
            .zip(self.values.iter())
            .map(|(hp, v)| {
                let json = match (hp, v) {
                    (_, Value::Int(i)) => serde_json::json!(i),
                    (_, Value::Real(r)) => serde_json::json!(r),
                    (super::Hyperparameter::Categorical { choices, .. }, Value::Cat(i)) => {
                        serde_json::json!(choices[*i])
                    }
                    (_, Value::Cat(i)) => serde_json::json!(i),
                };
                (hp.name().to_string(), json)
            })
            .collect()
    }

    /// stable string key used to deduplicate candidates
    pub fn canonical(&self) -> String {
        self.to_map()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// one-exchange neighborhood: every single-dimension mutation, shuffled
    pub fn neighbors<R: rand::Rng>(&self, rng: &mut R) -> Vec<Configuration> {
        use rand::seq::SliceRandom;
        let mut out = Vec::new();
        for (i, hp) in self.space.params().iter().enumerate() {
            for value in hp.neighbors(&self.values[i], rng) {
                let mut neighbor = self.clone();
                neighbor.values[i] = value;
                neighbor.low_dim = None;
                out.push(neighbor);
            }
        }
        out.shuffle(rng);
        out
    }
}

impl std::fmt::Display for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::hyperparameter::Hyperparameter;

    fn space() -> Arc<ConfigSpace> {
        ConfigSpace::new(vec![
            Hyperparameter::Integer {
                name: "a".to_string(),
                lower: 0,
                upper: 10,
                default: 5,
            },
            Hyperparameter::Categorical {
                name: "b".to_string(),
                choices: vec!["x".to_string(), "y".to_string()],
                default: 0,
            },
        ])
        .unwrap()
    }

    #[test]
    fn equality_ignores_origin() {
        let space = space();
        let mut left = space.default_configuration();
        let right = space.default_configuration();
        left.origin = "Warm Start".to_string();
        assert!(left == right);
    }

    #[test]
    fn vector_is_normalized() {
        let space = space();
        let v = space.default_configuration().to_vector();
        assert!(v.len() == 2);
        assert!(v.iter().all(|x| (0.0..=1.0).contains(x)));
    }

    #[test]
    fn neighbors_differ_in_exactly_one_dimension() {
        let space = space();
        let base = space.default_configuration();
        for n in base.neighbors(&mut rand::rng()) {
            let diffs = base
                .values()
                .iter()
                .zip(n.values().iter())
                .filter(|(a, b)| a != b)
                .count();
            assert!(diffs == 1);
        }
    }

    #[test]
    fn map_roundtrip_restores_values() {
        let space = space();
        let original = space.default_configuration();
        let map = original.to_map();
        let restored = space.configuration_from_map(&map, "restored").unwrap();
        assert!(restored == original);
    }
}
