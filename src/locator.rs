use serde::{Deserialize, Serialize};
use std::fmt;

/// Query language a locator expression is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    /// CSS selector
    Css,
    /// XPath expression
    XPath,
}

/// An immutable element query: a kind plus its expression string.
///
/// Locators are resolved by the driver against whatever context is currently
/// selected. The same locator is used for the initial search and for every
/// later recovery of a handle, so it is never mutated. Two locators are equal
/// iff both kind and expression are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    kind: LocatorKind,
    expression: String,
}

impl Locator {
    /// Locator from a CSS selector
    pub fn css(expression: impl Into<String>) -> Self {
        Locator {
            kind: LocatorKind::Css,
            expression: expression.into(),
        }
    }

    /// Locator from an XPath expression
    pub fn xpath(expression: impl Into<String>) -> Self {
        Locator {
            kind: LocatorKind::XPath,
            expression: expression.into(),
        }
    }

    pub fn kind(&self) -> LocatorKind {
        self.kind
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LocatorKind::Css => write!(f, "css:{}", self.expression),
            LocatorKind::XPath => write!(f, "xpath:{}", self.expression),
        }
    }
}

#[cfg(test)]
#[path = "locator_test.rs"]
mod locator_test;
