use thiserror::Error;

/// Failures the risk engine discloses to its callers.
#[derive(Debug, Error)]
pub enum RiskError {
    #[error("risk inputs could not be obtained: {0}")]
    InputUnavailable(#[source] anyhow::Error),

    #[error("a school or student identifier is required")]
    InvalidIdentifier,
}
