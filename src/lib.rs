//! Nimbus: A Fast, Modular Cloud Screening Processor for Satellite Imagery
//!
//! This library classifies satellite-imagery pixels as cloud, cloud shadow,
//! snow/ice or clear and derives the supporting atmospheric-pressure
//! estimates that keep the classification physically grounded. It is the
//! per-pixel core of a larger tiled-raster processing toolbox: the host
//! framework reads products, supplies rectangular pixel tiles and persists
//! the output channels; this crate does the atmosphere.
//!
//! The chain: Rayleigh scattering correction, three independent pressure
//! estimators (barometric, O2 absorption-band inversion, pretrained
//! regression model), a threshold classifier fusing them into per-pixel
//! bit flags, an iterative geometric cloud-shadow solver, and a cloud
//! buffer dilation pass.

pub mod auxdata;
pub mod core;
pub mod geo;
pub mod types;

// Re-export main types for easier access
pub use types::{
    CancelToken, Channel, ChannelView, ClassFlags, PixelGeometry, ScreenError, ScreenResult,
    Window, BAD_VALUE, NUM_BANDS,
};

pub use auxdata::{AuxResourceProvider, AuxdataStore, RegressionNet};
pub use crate::core::{
    PixelClassifier, PressureProduct, RayleighCorrection, SceneInputs, ScreeningConfig,
    ScreeningOutputs, ScreeningPipeline,
};
pub use geo::{AffineGeoCoding, GeoCoding};
