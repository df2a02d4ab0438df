//! Core processing algorithms: Rayleigh correction, pressure estimation,
//! pixel classification, cloud shadow and cloud buffer.

pub mod buffer;
pub mod classify;
pub mod pipeline;
pub mod pressure;
pub mod rayleigh;
pub mod shadow;

pub use buffer::{BufferInputs, BufferParams, CloudBufferDilator};
pub use classify::{
    ClassificationInputs, ClassificationOutputs, ClassificationParams, PixelClassifier,
};
pub use pipeline::{SceneInputs, ScreeningConfig, ScreeningOutputs, ScreeningPipeline};
pub use pressure::{
    BarometricPressure, BarometricProcessor, NetPressureEstimator, O2PressureEstimator,
    PressureProduct,
};
pub use rayleigh::{BrrInputs, BrrOutputs, BrrParams, BrrProcessor, RayleighCorrection};
pub use shadow::{CloudShadowCaster, ShadowInputs, ShadowParams};
