use super::configuration::Configuration;
use super::hyperparameter::Hyperparameter;
use super::hyperparameter::Value;
use crate::Error;
use crate::Result;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;

/// the declared search space: an ordered list of typed hyperparameters with
/// a name index. created once from the declarative schema, immutable after.
#[derive(Debug)]
pub struct ConfigSpace {
    params: Vec<Hyperparameter>,
    index: BTreeMap<String, usize>,
}

impl ConfigSpace {
    pub fn new(params: Vec<Hyperparameter>) -> Result<Arc<Self>> {
        let mut index = BTreeMap::new();
        for (i, hp) in params.iter().enumerate() {
            if index.insert(hp.name().to_string(), i).is_some() {
                return Err(Error::configuration(format!(
                    "duplicate hyperparameter name: {}",
                    hp.name()
                )));
            }
        }
        Ok(Arc::new(Self { params, index }))
    }

    /// parse the declarative JSON schema:
    /// { "<name>": { "type", "min"?, "max"?, "q"?, "choice_values"?, "default" } }
    pub fn from_schema_str(schema: &str) -> Result<Arc<Self>> {
        let root: serde_json::Map<String, serde_json::Value> = serde_json::from_str(schema)?;
        let mut params = Vec::with_capacity(root.len());
        for (name, decl) in root.iter() {
            params.push(Self::parse_param(name, decl)?);
        }
        Self::new(params)
    }

    pub fn from_schema_file(path: &std::path::Path) -> Result<Arc<Self>> {
        let text = std::fs::read_to_string(path)?;
        Self::from_schema_str(&text)
    }

    fn parse_param(name: &str, decl: &serde_json::Value) -> Result<Hyperparameter> {
        let kind = decl
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::configuration(format!("{}: missing type", name)))?;
        match kind {
            "integer" => {
                let lower = Self::number(name, decl, "min")? as i64;
                let upper = Self::number(name, decl, "max")? as i64;
                let default = Self::number(name, decl, "default")? as i64;
                if lower > upper || default < lower || default > upper {
                    return Err(Error::configuration(format!("{}: invalid bounds", name)));
                }
                Ok(Hyperparameter::Integer {
                    name: name.to_string(),
                    lower,
                    upper,
                    default,
                })
            }
            "float" => {
                let lower = Self::number(name, decl, "min")?;
                let upper = Self::number(name, decl, "max")?;
                let default = Self::number(name, decl, "default")?;
                if lower > upper || default < lower || default > upper {
                    return Err(Error::configuration(format!("{}: invalid bounds", name)));
                }
                let q = decl.get("q").and_then(|v| v.as_f64()).or(Some(0.05));
                Ok(Hyperparameter::Real {
                    name: name.to_string(),
                    lower,
                    upper,
                    default,
                    q,
                })
            }
            "categorical" => {
                let choices = decl
                    .get("choice_values")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| {
                        Error::configuration(format!("{}: missing choice_values", name))
                    })?
                    .iter()
                    .map(Self::scalar_string)
                    .collect::<Vec<String>>();
                if choices.is_empty() {
                    return Err(Error::configuration(format!("{}: empty choices", name)));
                }
                let default = decl
                    .get("default")
                    .map(Self::scalar_string)
                    .ok_or_else(|| Error::configuration(format!("{}: missing default", name)))?;
                let default = choices.iter().position(|c| *c == default).ok_or_else(|| {
                    Error::configuration(format!("{}: default not in choices", name))
                })?;
                Ok(Hyperparameter::Categorical {
                    name: name.to_string(),
                    choices,
                    default,
                })
            }
            other => Err(Error::configuration(format!(
                "{}: unknown type {}",
                name, other
            ))),
        }
    }

    fn number(name: &str, decl: &serde_json::Value, key: &str) -> Result<f64> {
        decl.get(key)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::configuration(format!("{}: missing {}", name, key)))
    }

    fn scalar_string(v: &serde_json::Value) -> String {
        match v {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> &[Hyperparameter] {
        &self.params
    }

    pub fn param(&self, i: usize) -> &Hyperparameter {
        &self.params[i]
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn default_configuration(self: &Arc<Self>) -> Configuration {
        let values = self.params.iter().map(|p| p.default_value()).collect();
        Configuration::new(self.clone(), values, "Default Configuration")
    }

    pub fn sample<R: Rng>(self: &Arc<Self>, rng: &mut R) -> Configuration {
        let values = self.params.iter().map(|p| p.sample(rng)).collect();
        Configuration::new(self.clone(), values, "Random Sample")
    }

    /// reconstruct a configuration from typed values keyed by name
    pub fn configuration_from_map(
        self: &Arc<Self>,
        map: &BTreeMap<String, serde_json::Value>,
        origin: &str,
    ) -> Result<Configuration> {
        let mut values = Vec::with_capacity(self.params.len());
        for hp in self.params.iter() {
            let raw = map
                .get(hp.name())
                .ok_or_else(|| Error::configuration(format!("missing value: {}", hp.name())))?;
            let value = match hp {
                Hyperparameter::Integer { .. } => raw
                    .as_i64()
                    .map(Value::Int)
                    .ok_or_else(|| Error::configuration(format!("bad integer: {}", hp.name()))),
                Hyperparameter::Real { .. } => raw
                    .as_f64()
                    .map(Value::Real)
                    .ok_or_else(|| Error::configuration(format!("bad float: {}", hp.name()))),
                Hyperparameter::Categorical { choices, .. } => raw
                    .as_str()
                    .and_then(|s| choices.iter().position(|c| c == s))
                    .map(Value::Cat)
                    .ok_or_else(|| Error::configuration(format!("bad choice: {}", hp.name()))),
            }?;
            values.push(value);
        }
        Ok(Configuration::new(self.clone(), values, origin))
    }
}
