//! Technical-analysis layer: pure indicator kernels and the computer that
//! materializes the derived-key table into the atomic store on every tick.

pub mod computer;
pub mod indicators;
