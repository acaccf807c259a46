// =============================================================================
// Signals Module
// =============================================================================
//
// Signal processing pipeline for the trading engine:
// - VPIN (Volume-Synchronized Probability of Informed Trading)

pub mod vpin;

pub use vpin::{VPINCalculator, VPINState};
