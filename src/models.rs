//! Wire models: outcome descriptors served by the backend and the report payloads sent back.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ClientContext;
use crate::ContextValue;

/// Outcome descriptors keyed by experiment name, as served at `<appKey>.tree.json`.
pub type Outcomes = HashMap<String, Outcome>;

/// Server-side outcome descriptor for one experiment: the options the model was trained on and a
/// decision tree selecting the best of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    /// Option names, in the order the trainer indexes them.
    pub options: Vec<String>,
    /// Root of the decision tree.
    pub tree: Tree,
}

/// A node of a decision tree.
///
/// A node carrying `best` is a leaf. Everything else must be a complete branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tree {
    /// Terminal node naming the best option.
    Leaf {
        /// Index into [`Outcome::options`].
        best: usize,
        /// Exploration rate in `[0, 1]`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eps: Option<f64>,
    },
    /// Inner node comparing a context value against `v`. Evaluation continues with `l` if the
    /// comparison holds, and with `r` otherwise.
    Branch {
        /// Context key to compare.
        at: String,
        #[allow(missing_docs)]
        op: TryParse<Operator>,
        /// Value to compare the context value against.
        v: ContextValue,
        #[allow(missing_docs)]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        l: Option<Box<Tree>>,
        #[allow(missing_docs)]
        #[serde(default, skip_serializing_if = "Option::is_none")]
        r: Option<Box<Tree>>,
    },
}

impl Tree {
    /// Create a leaf node.
    pub fn leaf(best: usize, eps: f64) -> Tree {
        Tree::Leaf {
            best,
            eps: Some(eps),
        }
    }

    /// Create a branch node with both children present.
    pub fn branch(
        at: impl Into<String>,
        op: Operator,
        v: impl Into<ContextValue>,
        l: Tree,
        r: Tree,
    ) -> Tree {
        Tree::Branch {
            at: at.into(),
            op: TryParse::Parsed(op),
            v: v.into(),
            l: Some(Box::new(l)),
            r: Some(Box::new(r)),
        }
    }
}

/// Comparison applied by a [`Tree::Branch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    /// Strict less-than.
    Lt,
    /// Strict equality.
    Eq,
}

/// `TryParse` allows the subfield to fail parsing without failing the parsing of the whole
/// structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TryParse<T> {
    /// Successfully parsed.
    Parsed(T),
    /// Parsing failed; the raw value is kept.
    ParseFailed(serde_json::Value),
}
impl<T> From<TryParse<T>> for Option<T> {
    fn from(value: TryParse<T>) -> Self {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}
impl<'a, T> From<&'a TryParse<T>> for Option<&'a T> {
    fn from(value: &TryParse<T>) -> Option<&T> {
        match value {
            TryParse::Parsed(v) => Some(v),
            TryParse::ParseFailed(_) => None,
        }
    }
}

/// Outcomes as fetched from the server. Each experiment parses independently so that a single
/// malformed descriptor does not discard the rest.
pub(crate) type FetchedOutcomes = HashMap<String, TryParse<Outcome>>;

/// `POST startExperiments`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartExperimentsRequest<'a> {
    pub version: u32,
    pub app_key: &'a str,
    pub experiments: HashMap<String, StartedExperiment>,
    pub ctx: &'a ClientContext,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StartedExperiment {
    pub instance_key: String,
    pub options: Vec<String>,
    pub pick: String,
    pub picked_best: bool,
}

/// `POST completeExperiments`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompleteExperimentsRequest<'a> {
    pub version: u32,
    pub app_key: &'a str,
    /// Keyed by experiment instance key.
    pub experiments: HashMap<String, CompletedExperiment>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompletedExperiment {
    pub pick: String,
    pub payoff: f64,
}
