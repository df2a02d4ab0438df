//! The three independent surface/cloud pressure estimators.
//!
//! They share no trait on purpose: each is a pure function of one pixel's
//! inputs, and the classifier composes their outputs.

pub mod baro;
pub mod fub;
pub mod lise;

pub use baro::{BarometricInputs, BarometricParams, BarometricPressure, BarometricProcessor};
pub use fub::{NetPressureEstimator, NetPressureInputs, NetPressureProcessor};
pub use lise::{LiseInputs, LiseProcessor, O2PressureEstimator, PressureProduct};
