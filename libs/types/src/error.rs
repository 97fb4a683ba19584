//! Standardized `component:subject:reason` error tagging.
//!
//! Every error that can become visible on the bus (execution failures,
//! initialization failures, gas spikes) is rendered through this type so
//! monitoring can pattern-match on the tag rather than free-form strings.

use std::fmt;

/// A structured error tag of the form `component:subject:reason`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorTag {
    pub component: String,
    pub subject: String,
    pub reason: String,
}

impl ErrorTag {
    pub fn new(component: impl Into<String>, subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            subject: subject.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.component, self.subject, self.reason)
    }
}

/// The gas-spike rejection tag used by the gas-price optimizer.
pub const ERR_GAS_SPIKE: &str = "ERR_GAS_SPIKE";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_component_subject_reason() {
        let tag = ErrorTag::new("mev", "ethereum", "provider_not_cached");
        assert_eq!(tag.to_string(), "mev:ethereum:provider_not_cached");
    }
}
