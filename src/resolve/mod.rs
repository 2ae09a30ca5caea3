//! Variable and preset resolution
//!
//! - `preset.rs`: named argument lists from configuration
//! - `chain.rs`: variables derived from a previous phase's output

pub mod chain;
pub mod preset;

pub use chain::{
    extract_discovered_domains, generate_chain_variables, resolve_target_ip, resolve_variables,
    ChainValue, ChainVariables, DiscoveredDomain,
};
pub use preset::{PresetConfig, PresetError, PresetResolver};
