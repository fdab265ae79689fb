pub mod address_validator;
pub mod chain_normalizer;
pub mod time_utils;

pub use chain_normalizer::normalize_chain_identifier;
pub use time_utils::*;
