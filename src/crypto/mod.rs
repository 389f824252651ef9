pub mod bls;
pub mod hash;
pub mod merkle;

pub use bls::*;
pub use hash::*;
pub use merkle::*;
