use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize, Serializer};

use crate::Environment;

/// Context key holding the client's timezone offset in minutes.
pub const TIME_ZONE_OFFSET: &str = "tzo";
/// Context key holding the client's language tag, when known.
pub const LANGUAGE: &str = "lang";

/// Ambient client context that decision trees branch on.
///
/// Keys are context names such as [`TIME_ZONE_OFFSET`] and [`LANGUAGE`].
///
/// # Examples
/// ```
/// # use autotune::{ClientContext, ContextValue};
/// let context = [
///     ("tzo".to_owned(), ContextValue::Number(-120.0)),
///     ("lang".to_owned(), "de-DE".into()),
/// ].into_iter().collect::<ClientContext>();
/// ```
pub type ClientContext = HashMap<String, ContextValue>;

/// A single context value: either a number or a string.
#[derive(Debug, Deserialize, PartialEq, From, Clone)]
#[serde(untagged)]
pub enum ContextValue {
    /// A numerical value.
    Number(f64),
    /// A string value.
    String(String),
}

impl ContextValue {
    /// Return the number, if this is a numerical value.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            ContextValue::Number(n) => Some(*n),
            ContextValue::String(_) => None,
        }
    }

    /// Return the string, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ContextValue::String(s) => Some(s),
            ContextValue::Number(_) => None,
        }
    }
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i32> for ContextValue {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

// Timezone offsets are whole minutes and the backend expects JSON integers for them, so integral
// values are written without a fractional part.
impl Serialize for ContextValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ContextValue::Number(n) if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 => {
                serializer.serialize_i64(*n as i64)
            }
            ContextValue::Number(n) => serializer.serialize_f64(*n),
            ContextValue::String(s) => serializer.serialize_str(s),
        }
    }
}

/// Collect client context from the environment.
pub(crate) fn collect(environment: &dyn Environment) -> ClientContext {
    let mut context = ClientContext::new();
    context.insert(
        TIME_ZONE_OFFSET.to_owned(),
        environment.time_zone_offset().into(),
    );
    if let Some(language) = environment.local_language() {
        context.insert(LANGUAGE.to_owned(), language.into());
    }
    context
}
