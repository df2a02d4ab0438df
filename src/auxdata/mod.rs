//! Auxiliary data: lookup tables, interpolation, and the pretrained
//! surface-pressure regression model.

pub mod lut;
pub mod net;
pub mod tables;

pub use lut::{interp_coord, linear_interp, FractIndex, LookupTable};
pub use net::{NetScratch, RegressionNet};
pub use tables::{
    AuxResourceProvider, AuxdataStore, ClassifAux, LiseAux, RayleighAux, StraylightTables,
    WaterVapourTable,
};
