//! Ratekeeper Common Types
//!
//! Shared types for the rate resolution and correction engine: currencies
//! and pairs, rate observations, correction rules, the rate-type registry,
//! the precision utility and the error type.

pub mod currency;
pub mod correction;
pub mod error;
pub mod identifiers;
pub mod precision;
pub mod rate;
pub mod registry;
pub mod time;
pub mod trigger;
pub mod validator;

pub use currency::*;
pub use correction::*;
pub use error::*;
pub use identifiers::*;
pub use precision::*;
pub use rate::*;
pub use registry::*;
pub use time::*;
pub use trigger::*;
pub use validator::*;
