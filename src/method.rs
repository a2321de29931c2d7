//! Method M: the learner strategy attached to a barrel.
//!
//! The source represents this as a table of function pointers
//! (`rainbow_method`) filled in by whichever learner is selected. Rust has
//! no need for that indirection: `Method` is a closed enum carrying each
//! learner's parameter blob, and `score`/`vpc_with_weights` become ordinary
//! functions in each learner's module dispatched by `match` here.

use serde::{Deserialize, Serialize};

use crate::config::{ActiveConfig, EmConfig, MaxEntConfig, Smoothing, SvmConfig, TreeConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Method {
    NaiveBayes(Smoothing),
    Em(EmConfig),
    HierarchicalEm(TreeConfig),
    MaxEnt(MaxEntConfig),
    Svm(SvmConfig),
    Active(ActiveConfig),
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::NaiveBayes(_) => "naivebayes",
            Method::Em(_) => "em",
            Method::HierarchicalEm(_) => "hem",
            Method::MaxEnt(_) => "maxent",
            Method::Svm(_) => "svm",
            Method::Active(_) => "active",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_matches_variant() {
        assert_eq!(Method::NaiveBayes(Smoothing::Laplace).name(), "naivebayes");
        assert_eq!(Method::Svm(SvmConfig::default()).name(), "svm");
    }
}
