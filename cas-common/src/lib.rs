//! # CAS Common Library
//!
//! Shared code for the striking analysis workspace, including:
//! - Strike data model (Bong, Stroke, Row)
//! - Bell character conventions
//! - Odd-struck offset tables
//! - Configuration loading
//! - Event types (CasEvent enum) and the EventBus
//! - Common error type

pub mod bells;
pub mod bong;
pub mod config;
pub mod error;
pub mod events;
pub mod odd_struck;
pub mod row;

pub use bong::{Bong, Stroke};
pub use error::{Error, Result};
pub use odd_struck::OddStruck;
pub use row::Row;
