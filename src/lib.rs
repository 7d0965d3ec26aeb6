// src/lib.rs

//! Campaign rule matching and CRM pipeline synchronization.

pub mod campaigns;
pub mod config;
pub mod crm;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod matching;
pub mod models;
pub mod pipeline;
pub mod storage;
pub mod utils;
