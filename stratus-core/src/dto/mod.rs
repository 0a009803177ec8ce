//! Data transfer objects
//!
//! Request/response shapes of the scheduler status API.

pub mod run;
