//! Stratus Core
//!
//! Core types shared by the Stratus weather ingestion services.
//!
//! This crate contains:
//! - Domain types: locations, observations, step identities and run reports
//! - DTOs: Data transfer objects exchanged with the scheduler status API

pub mod domain;
pub mod dto;
