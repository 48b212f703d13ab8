//! Decision tree evaluation.
//!
//! Trees are produced by the server-side trainer, which assumes exactly the comparison and
//! coercion rules implemented here. Evaluation is pure and total: missing context never fails,
//! and malformed nodes evaluate to an empty [`BestOption`].
use std::cmp::Ordering;

use crate::{
    models::{Operator, Outcome, Tree},
    ClientContext, ContextValue,
};

/// Result of evaluating an outcome's decision tree.
///
/// An empty result (both fields `None`) means there is no preferred option and the experiment
/// should explore with epsilon 1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestOption {
    /// The preferred option, if any.
    pub option: Option<String>,
    /// Exploration rate to use with `option`.
    pub epsilon: Option<f64>,
}

/// Find the best option for `outcome` under `context`.
pub fn lookup_best_option(context: &ClientContext, outcome: Option<&Outcome>) -> BestOption {
    let Some(outcome) = outcome else {
        return BestOption::default();
    };

    let mut node = &outcome.tree;
    loop {
        match node {
            Tree::Leaf { best, eps } => {
                return BestOption {
                    option: outcome.options.get(*best).cloned(),
                    epsilon: *eps,
                };
            }
            Tree::Branch { at, op, v, l, r } => {
                let Some(op) = Option::<&Operator>::from(op) else {
                    log::debug!(target: "autotune", at:display = at; "unknown operator in decision tree");
                    return BestOption::default();
                };

                let child = if compare(*op, context.get(at), v) { l } else { r };
                match child {
                    Some(child) => node = child,
                    None => return BestOption::default(),
                }
            }
        }
    }
}

/// Apply `op` to the context value (left-hand side) and the branch value (right-hand side).
///
/// The context value is coerced to the branch value's type: a missing or non-string value becomes
/// `"null"` when comparing against a string, and a missing or non-numeric value becomes `0` when
/// comparing against a number.
fn compare(op: Operator, context_value: Option<&ContextValue>, value: &ContextValue) -> bool {
    match value {
        ContextValue::String(value) => {
            let lhs = context_value.and_then(ContextValue::as_str).unwrap_or("null");
            match op {
                Operator::Lt => utf16_cmp(lhs, value) == Ordering::Less,
                Operator::Eq => lhs == value,
            }
        }
        ContextValue::Number(value) => {
            let lhs = context_value.and_then(ContextValue::as_number).unwrap_or(0.0);
            match op {
                Operator::Lt => lhs < *value,
                Operator::Eq => lhs == *value,
            }
        }
    }
}

/// Order strings by UTF-16 code units, which is how the trainer orders them.
fn utf16_cmp(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use serde_json::json;

    use super::{lookup_best_option, BestOption};
    use crate::{
        models::{FetchedOutcomes, Operator, Outcome, Tree, TryParse},
        ClientContext, ContextValue,
    };

    fn outcome(options: &[&str], tree: Tree) -> Outcome {
        Outcome {
            options: options.iter().map(|&s| s.to_owned()).collect(),
            tree,
        }
    }

    fn context(entries: &[(&str, ContextValue)]) -> ClientContext {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn num(n: f64) -> ContextValue {
        ContextValue::Number(n)
    }

    fn best(option: &str, epsilon: f64) -> BestOption {
        BestOption {
            option: Some(option.to_owned()),
            epsilon: Some(epsilon),
        }
    }

    #[test]
    fn no_outcome_is_empty() {
        assert_eq!(
            lookup_best_option(&ClientContext::new(), None),
            BestOption::default()
        );
    }

    #[test]
    fn leaf_returns_option_and_epsilon() {
        let outcome = outcome(&["o0", "o1"], Tree::leaf(1, 0.0));

        assert_eq!(
            lookup_best_option(&ClientContext::new(), Some(&outcome)),
            best("o1", 0.0)
        );
        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(60.0))]), Some(&outcome)),
            best("o1", 0.0)
        );
    }

    #[test]
    fn leaf_out_of_range_has_no_option() {
        let outcome = outcome(&["o0"], Tree::leaf(5, 0.3));

        assert_eq!(
            lookup_best_option(&ClientContext::new(), Some(&outcome)),
            BestOption {
                option: None,
                epsilon: Some(0.3)
            }
        );
    }

    #[test]
    fn numeric_less_than_branch() {
        let outcome = outcome(
            &["o0", "o1", "o2"],
            Tree::branch(
                "tzo",
                Operator::Lt,
                -420.0,
                Tree::leaf(1, 0.1),
                Tree::leaf(2, 0.2),
            ),
        );

        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(-430.0))]), Some(&outcome)),
            best("o1", 0.1)
        );
        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(-410.0))]), Some(&outcome)),
            best("o2", 0.2)
        );
        // Strict comparison.
        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(-420.0))]), Some(&outcome)),
            best("o2", 0.2)
        );
    }

    #[test]
    fn missing_numeric_context_is_zero() {
        let outcome = outcome(
            &["o0", "o1"],
            Tree::branch(
                "tzo",
                Operator::Eq,
                0.0,
                Tree::leaf(0, 0.0),
                Tree::leaf(1, 0.0),
            ),
        );

        assert_eq!(
            lookup_best_option(&ClientContext::new(), Some(&outcome)),
            best("o0", 0.0)
        );
        // A string where a number is expected is coerced too.
        assert_eq!(
            lookup_best_option(&context(&[("tzo", "60".into())]), Some(&outcome)),
            best("o0", 0.0)
        );
    }

    #[test]
    fn missing_string_context_is_null() {
        let outcome = outcome(
            &["o0", "o1"],
            Tree::branch(
                "lang",
                Operator::Eq,
                "null",
                Tree::leaf(0, 0.0),
                Tree::leaf(1, 0.0),
            ),
        );

        assert_eq!(
            lookup_best_option(&ClientContext::new(), Some(&outcome)),
            best("o0", 0.0)
        );
        assert_eq!(
            lookup_best_option(&context(&[("lang", num(7.0))]), Some(&outcome)),
            best("o0", 0.0)
        );
        assert_eq!(
            lookup_best_option(&context(&[("lang", "en".into())]), Some(&outcome)),
            best("o1", 0.0)
        );
    }

    #[test]
    fn string_less_than_uses_utf16_order() {
        let outcome = outcome(
            &["o0", "o1"],
            Tree::branch(
                "lang",
                Operator::Lt,
                "\u{ff5e}",
                Tree::leaf(0, 0.0),
                Tree::leaf(1, 0.0),
            ),
        );

        assert_eq!(
            lookup_best_option(&context(&[("lang", "en".into())]), Some(&outcome)),
            best("o0", 0.0)
        );
        // U+1F600 is a surrogate pair (0xD83D ...) and sorts before U+FF5E in UTF-16, although
        // its UTF-8 encoding sorts after.
        assert_eq!(
            lookup_best_option(&context(&[("lang", "\u{1f600}".into())]), Some(&outcome)),
            best("o0", 0.0)
        );
    }

    #[test]
    fn unknown_operator_is_empty() {
        let outcome = outcome(
            &["o0", "o1"],
            Tree::Branch {
                at: "tzo".to_owned(),
                op: TryParse::ParseFailed(json!("gte")),
                v: num(0.0),
                l: Some(Box::new(Tree::leaf(0, 0.0))),
                r: Some(Box::new(Tree::leaf(1, 0.0))),
            },
        );

        assert_eq!(
            lookup_best_option(&ClientContext::new(), Some(&outcome)),
            BestOption::default()
        );
    }

    #[test]
    fn missing_child_is_empty() {
        let outcome = outcome(
            &["o0", "o1"],
            Tree::Branch {
                at: "tzo".to_owned(),
                op: TryParse::Parsed(Operator::Lt),
                v: num(0.0),
                l: None,
                r: Some(Box::new(Tree::leaf(1, 0.0))),
            },
        );

        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(-60.0))]), Some(&outcome)),
            BestOption::default()
        );
        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(60.0))]), Some(&outcome)),
            best("o1", 0.0)
        );
    }

    #[test]
    fn evaluation_is_deterministic() {
        let outcomes: FetchedOutcomes =
            serde_json::from_reader(File::open("tests/data/outcomes.tree.json").unwrap()).unwrap();
        let contexts = [
            context(&[("tzo", num(-480.0))]),
            context(&[("tzo", num(60.0)), ("lang", "de-DE".into())]),
            context(&[("tzo", num(0.0)), ("lang", "en-US".into())]),
            ClientContext::new(),
        ];

        for (name, outcome) in &outcomes {
            let outcome = Option::<&Outcome>::from(outcome).unwrap();
            for context in &contexts {
                let first = lookup_best_option(context, Some(outcome));
                let second = lookup_best_option(context, Some(outcome));
                assert_eq!(first, second, "{name}: {context:?}");
            }
        }
    }

    #[test]
    fn evaluates_fixture_tree() {
        let outcomes: FetchedOutcomes =
            serde_json::from_reader(File::open("tests/data/outcomes.tree.json").unwrap()).unwrap();
        let button = Option::<&Outcome>::from(outcomes.get("button-color").unwrap()).unwrap();

        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(-480.0))]), Some(button)),
            best("green", 0.1)
        );
        assert_eq!(
            lookup_best_option(
                &context(&[("tzo", num(60.0)), ("lang", "de-DE".into())]),
                Some(button)
            ),
            best("blue", 0.2)
        );
        assert_eq!(
            lookup_best_option(&context(&[("tzo", num(60.0))]), Some(button)),
            best("red", 0.3)
        );
    }
}
