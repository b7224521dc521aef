use crate::acquisition::Acquisition;
use crate::acquisition::SingleKind;
use crate::surrogate::BaseKind;
use crate::surrogate::Kernel;
use crate::surrogate::WeightCalculator;
use crate::Error;
use crate::Result;

/// optimization method id: selects advisor flavor, scheduler kind and base
/// surrogate in one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    id: String,
}

impl Method {
    pub const KNOWN: [&'static str; 8] = [
        "RS",
        "SMAC",
        "GP",
        "GPF",
        "BOHB_SMAC",
        "BOHB_GP",
        "MFES_SMAC",
        "MFES_GP",
    ];

    pub fn parse(id: &str) -> Result<Self> {
        if !Self::KNOWN.contains(&id) {
            return Err(Error::configuration(format!(
                "unknown method id {}, expected one of {:?}",
                id,
                Self::KNOWN
            )));
        }
        Ok(Self { id: id.to_string() })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_bohb(&self) -> bool {
        self.id.contains("BOHB")
    }

    pub fn is_mfes(&self) -> bool {
        self.id.contains("MFES")
    }

    pub fn is_multi_fidelity(&self) -> bool {
        self.is_bohb() || self.is_mfes()
    }

    pub fn is_random_search(&self) -> bool {
        self.id == "RS"
    }

    pub fn base_kind(&self) -> BaseKind {
        if self.id.ends_with("GP") {
            BaseKind::Gp(Kernel::Matern25)
        } else if self.id == "GPF" {
            BaseKind::Gp(Kernel::Rbf)
        } else {
            BaseKind::Prf
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// transfer-learning strategy: which ensemble weighting rule, and whether
/// the acquisition combines per-task functions by rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlStrategy {
    None,
    Mce,
    Re,
    MceAcq,
    ReAcq,
}

impl TlStrategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(TlStrategy::None),
            "mce" => Ok(TlStrategy::Mce),
            "re" => Ok(TlStrategy::Re),
            "mceacq" => Ok(TlStrategy::MceAcq),
            "reacq" => Ok(TlStrategy::ReAcq),
            other => Err(Error::configuration(format!(
                "unknown transfer strategy {}",
                other
            ))),
        }
    }

    pub fn is_none(&self) -> bool {
        *self == TlStrategy::None
    }

    pub fn uses_rank_acquisition(&self) -> bool {
        matches!(self, TlStrategy::MceAcq | TlStrategy::ReAcq)
    }

    /// the weight rule backing the ensemble; None strategies carry one only
    /// for MFES methods (multi-fidelity ensembling without transfer)
    pub fn calculator(&self) -> Option<WeightCalculator> {
        match self {
            TlStrategy::None => None,
            TlStrategy::Mce | TlStrategy::MceAcq => Some(WeightCalculator::mfgpe()),
            TlStrategy::Re | TlStrategy::ReAcq => Some(WeightCalculator::rgpe()),
        }
    }

    pub fn acquisition(&self) -> Acquisition {
        if self.uses_rank_acquisition() {
            Acquisition::weighted_rank(SingleKind::Ei)
        } else {
            Acquisition::ei()
        }
    }
}

/// warm-start strategy id; the suffix selects the meta-feature similarity
/// measure used by the task manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsStrategy {
    None,
    BestAll,
    BestCos,
    BestEuc,
}

impl WsStrategy {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(WsStrategy::None),
            "best_all" => Ok(WsStrategy::BestAll),
            "best_cos" => Ok(WsStrategy::BestCos),
            "best_euc" => Ok(WsStrategy::BestEuc),
            other => Err(Error::configuration(format!(
                "unknown warm-start strategy {}",
                other
            ))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WsStrategy::None => "none",
            WsStrategy::BestAll => "best_all",
            WsStrategy::BestCos => "best_cos",
            WsStrategy::BestEuc => "best_euc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RandMode {
    Ran,
    Rs,
}

impl RandMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "ran" => Ok(RandMode::Ran),
            "rs" => Ok(RandMode::Rs),
            other => Err(Error::configuration(format!("unknown rand mode {}", other))),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RandMode::Ran => "ran",
            RandMode::Rs => "rs",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_flags_follow_the_id() {
        let mfes = Method::parse("MFES_SMAC").unwrap();
        assert!(mfes.is_mfes() && !mfes.is_bohb() && mfes.is_multi_fidelity());
        assert!(mfes.base_kind() == BaseKind::Prf);
        let bohb = Method::parse("BOHB_GP").unwrap();
        assert!(bohb.is_bohb() && bohb.base_kind() == BaseKind::Gp(Kernel::Matern25));
    }

    #[test]
    fn unknown_method_is_a_configuration_error() {
        assert!(matches!(
            Method::parse("LLAMA"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn rank_acquisition_only_for_acq_strategies() {
        assert!(TlStrategy::parse("mceacq").unwrap().uses_rank_acquisition());
        assert!(!TlStrategy::parse("mce").unwrap().uses_rank_acquisition());
    }
}
