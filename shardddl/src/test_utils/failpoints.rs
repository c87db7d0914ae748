use std::collections::BTreeSet;

use fail::FailScenario;

/// How a coordination failpoint fails once triggered.
///
/// The error kinds are the ones produced by [`crate::failpoints::coord_fail_point`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAction {
    /// Fails every evaluation with a retryable error.
    Retry,
    /// Fails every evaluation with a non-retryable error.
    NoRetry,
    /// Fails the next `n` evaluations with a retryable error, then passes.
    RetryTimes(usize),
    /// Fails the next `n` evaluations with a non-retryable error, then passes.
    NoRetryTimes(usize),
    /// Passes.
    Off,
}

impl FailAction {
    fn to_fail_cfg(self) -> String {
        match self {
            FailAction::Retry => "return(retry)".to_string(),
            FailAction::NoRetry => "return(no_retry)".to_string(),
            FailAction::RetryTimes(n) => format!("{n}*return(retry)"),
            FailAction::NoRetryTimes(n) => format!("{n}*return(no_retry)"),
            FailAction::Off => "off".to_string(),
        }
    }
}

/// Owns the process-wide failpoint registry for the duration of a test.
///
/// Holding the scenario serializes tests using failpoints. Failpoints can be reconfigured
/// while it is held and are all turned off when it is dropped.
pub struct FailpointScenario<'a> {
    _scenario: FailScenario<'a>,
    configured: BTreeSet<&'static str>,
}

impl<'a> FailpointScenario<'a> {
    /// Takes the registry with every failpoint off.
    pub fn setup() -> FailpointScenario<'a> {
        Self {
            _scenario: FailScenario::setup(),
            configured: BTreeSet::new(),
        }
    }

    /// Takes the registry and configures `failpoint` right away.
    pub fn with(failpoint: &'static str, action: FailAction) -> FailpointScenario<'a> {
        let mut scenario = Self::setup();
        scenario.set(failpoint, action);
        scenario
    }

    pub fn set(&mut self, failpoint: &'static str, action: FailAction) {
        fail::cfg(failpoint, &action.to_fail_cfg()).unwrap();
        self.configured.insert(failpoint);
    }
}

impl Drop for FailpointScenario<'_> {
    fn drop(&mut self) {
        for failpoint in &self.configured {
            fail::remove(failpoint);
        }
    }
}
