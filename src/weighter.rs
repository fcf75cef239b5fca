use serde::{Deserialize, Serialize};

/// Scalar weighting applied to a raw co-occurrence count in the loss.
///
/// This is a closed set of strategies. The variant is stored along with its
/// parameters when a trainer is saved, so loading rebuilds the same strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Weighter {
    Standard(StandardWeighter),
}

impl Weighter {
    pub fn weight(&self, x: f64) -> f64 {
        match self {
            Weighter::Standard(w) => w.weight(x),
        }
    }
}

impl Default for Weighter {
    fn default() -> Self {
        Weighter::Standard(StandardWeighter::default())
    }
}

impl From<StandardWeighter> for Weighter {
    fn from(w: StandardWeighter) -> Self {
        Weighter::Standard(w)
    }
}

/// The piecewise weighting function from equation 9 of the GloVe paper,
/// <https://nlp.stanford.edu/pubs/glove.pdf>.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StandardWeighter {
    /// The exponent, called `α` in the paper.
    pub power: f64,

    /// Counts above this get weight 1. Called `x_max` in the paper.
    pub max: f64,
}

impl Default for StandardWeighter {
    fn default() -> Self {
        StandardWeighter {
            power: 0.75,
            max: 100.0,
        }
    }
}

impl StandardWeighter {
    pub fn weight(&self, x: f64) -> f64 {
        if x > self.max {
            1.0
        } else {
            (x / self.max).powf(self.power)
        }
    }
}
