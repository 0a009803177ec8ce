//! Configuration module

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// URL of the scheduler status API
    pub scheduler_url: String,
}
