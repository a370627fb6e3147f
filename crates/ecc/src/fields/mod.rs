pub mod conversions;
pub mod endomorphism;
pub mod random;
