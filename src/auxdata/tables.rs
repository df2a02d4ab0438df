//! Static auxiliary tables, loaded once per run and shared read-only.
//!
//! The host supplies every table as a plain whitespace-separated text
//! resource through [`AuxResourceProvider`]; lines starting with `#` are
//! comments. A missing or malformed resource is fatal before any tile is
//! processed.

use crate::auxdata::lut::LookupTable;
use crate::auxdata::net::RegressionNet;
use crate::types::{ScreenError, ScreenResult, NUM_BANDS};

/// Number of precomputed O2 absorption filters
pub const NUM_FILTERS: usize = 21;
/// Number of standard pressure layers in the O2 transmittance tables
pub const NUM_LAYERS: usize = 21;
/// Number of Gaussian angle grid points
pub const NUM_GAUSS: usize = 24;

/// Multiple-scattering polynomial order of the Rayleigh coefficient table
pub const RAYSCATT_NUM_ORD: usize = 4;
/// Fourier series count of the Rayleigh coefficient table
pub const RAYSCATT_NUM_SER: usize = 3;

/// Center wavelength (nm) of each O2 absorption filter
pub const FILTER_WAVELENGTHS: [f64; NUM_FILTERS] = [
    760.7, 760.8, 760.9, 761.0, 761.1, 761.2, 761.3, 761.4, 761.5, 761.6, 761.7, 761.8, 761.9,
    762.0, 762.1, 762.2, 762.3, 762.4, 762.5, 762.6, 762.7,
];

/// Gaussian angle grid (degrees) of the O2 transmittance tables
pub const GAUSSIAN_ANGLES: [f64; NUM_GAUSS] = [
    2.84, 6.52, 10.22, 13.93, 17.64, 21.35, 25.06, 28.77, 32.48, 36.19, 39.90, 43.61, 47.32,
    51.03, 54.74, 58.46, 62.17, 65.88, 69.59, 73.30, 77.01, 80.72, 84.43, 88.14,
];

/// Resource names the auxiliary data provider must serve
pub mod resources {
    pub const RAYLEIGH_COEFFICIENTS: &str = "rayleigh_coefficients.d";
    pub const RAYLEIGH_SPHERICAL_ALBEDO: &str = "rayleigh_spherical_albedo.d";
    pub const RAYLEIGH_SCATTER_COEFFICIENTS: &str = "rayleigh_scatter_coefficients.d";
    pub const BRIGHT_THRESHOLD_LAND: &str = "bright_threshold_land.d";
    pub const BRIGHT_THRESHOLD_WATER: &str = "bright_threshold_water.d";
    pub const CLASSIFICATION_BANDS: &str = "classification_bands.d";
    pub const WATER_VAPOUR_PRESSURE: &str = "water_vapour_pressure.d";
    pub const O2_RAYLEIGH_TRANSMITTANCES: &str = "transmittances_o2_rayleigh.d";
    pub const O2_ATM_TRANSMITTANCES: &str = "transmittances_o2_atm.d";
    pub const O2_FRESNEL_TRANSMITTANCES: &str = "transmittances_o2_fresnel.d";
    pub const O2_AEROSOL_TRANSMITTANCES: &str = "transmittances_o2_aerosol.d";
    pub const FRESNEL_COEFFICIENTS: &str = "fresnel_coefficients.d";
    pub const AEROSOL_PHASE_FUNCTION: &str = "aerosol_phase_function.d";
    pub const C_COEFFICIENTS: &str = "c_coefficients.d";
    pub const DETECTOR_WAVELENGTHS: &str = "detector_wavelengths.d";
    pub const STRAYLIGHT_COEFFICIENTS: &str = "straylight_coefficients.d";
    pub const STRAYLIGHT_WAVELENGTHS: &str = "straylight_wavelengths.d";
    pub const PRESSURE_NET_USS: &str = "surface_pressure_net_uss.d";
    pub const PRESSURE_NET_TRP: &str = "surface_pressure_net_trp.d";
}

/// Source of auxiliary text resources, implemented by the host framework
pub trait AuxResourceProvider {
    fn read(&self, name: &str) -> ScreenResult<String>;
}

/// Rayleigh scattering coefficients and lookup tables
#[derive(Debug, Clone)]
pub struct RayleighAux {
    /// Standard sea-level pressure (hPa)
    pub p_std: f64,
    /// Atmospheric pressure scale height (m)
    pub press_scale_height: f64,
    /// Rayleigh optical thickness per spectral channel at standard pressure
    pub tau_r: [f64; NUM_BANDS],
    /// Phase function coefficients
    pub ab: [f64; 2],
    /// Transmittance correction polynomial coefficients
    pub ray_trans: [f64; 3],
    /// Spherical albedo vs. optical thickness (1-D, axis on dim 0)
    pub spherical_albedo: LookupTable,
    /// Multiple-scattering coefficients, order x series x sun-angle x
    /// view-angle (axes on the two angle dims, degrees)
    pub scatter_coeff: LookupTable,
}

/// Band selections and thresholds for the brightness/slope tests
#[derive(Debug, Clone)]
pub struct ClassifAux {
    pub band_bright_n: usize,
    pub band_slope_n_1: usize,
    pub band_slope_d_1: usize,
    pub band_slope_n_2: usize,
    pub band_slope_d_2: usize,
    pub slope_1_low_thr: f64,
    pub slope_1_high_thr: f64,
    pub slope_2_low_thr: f64,
    pub slope_2_high_thr: f64,
    /// Saturation radiance per spectral channel
    pub saturation: [f64; NUM_BANDS],
    /// Bright threshold over land, sun-angle x view-angle x azimuth-difference
    pub bright_thr_land: LookupTable,
    /// Bright threshold over water, same axes
    pub bright_thr_water: LookupTable,
}

/// Water-vapour partial pressure vs. surface temperature
#[derive(Debug, Clone)]
pub struct WaterVapourTable {
    temperature: Vec<f64>,
    pressure: Vec<f64>,
}

impl WaterVapourTable {
    pub fn new(temperature: Vec<f64>, pressure: Vec<f64>) -> ScreenResult<Self> {
        if temperature.len() != pressure.len() || temperature.len() < 2 {
            return Err(ScreenError::AuxData(
                "water vapour table needs at least two temperature/pressure rows".to_string(),
            ));
        }
        Ok(Self { temperature, pressure })
    }

    /// Partial pressure (hPa) at a surface temperature in degrees Celsius,
    /// linearly interpolated and edge-clamped.
    pub fn partial_pressure(&self, temp_c: f64) -> f64 {
        let c = crate::auxdata::lut::interp_coord(temp_c, &self.temperature);
        let (i, f) = (c.index, c.fraction);
        self.pressure[i] + f * (self.pressure[i + 1] - self.pressure[i])
    }
}

/// O2 absorption-band transmittance tables and coupling coefficients
#[derive(Debug, Clone)]
pub struct LiseAux {
    /// Standard pressure levels (hPa), lowest pressure first
    pub pressure_levels: Vec<f64>,
    /// Rayleigh O2 transmittance, filter x sun-angle x view-angle
    pub to2_ray: LookupTable,
    /// Atmospheric O2 transmittance, layer x filter x sun-angle x view-angle
    pub to2_atm: LookupTable,
    /// Fresnel O2 transmittance, filter x sun-angle x view-angle
    pub to2_fresnel: LookupTable,
    /// Aerosol atmospheric O2 transmittance, filter x sun-angle x view-angle
    pub to2_aerosol: LookupTable,
    /// Fresnel coefficient per degree of zenith angle (0..=90)
    pub fresnel_coefficients: Vec<f64>,
    /// Aerosol phase function per degree of scattering angle (0..=180)
    pub aerosol_phase: Vec<f64>,
    /// Surface-correction coefficients, filter x air-mass x reflectance
    /// (axes on the two trailing dims)
    pub c_coefficients: LookupTable,
    /// O2-channel center wavelength per detector (nm)
    pub detector_wavelengths: Vec<f64>,
}

/// Per-detector straylight calibration arrays
#[derive(Debug, Clone)]
pub struct StraylightTables {
    pub coefficients: Vec<f64>,
    pub wavelengths: Vec<f64>,
}

/// All static auxiliary data for one processing run.
///
/// Loaded once before any tile is processed; immutable and shared across
/// worker threads afterwards.
#[derive(Debug, Clone)]
pub struct AuxdataStore {
    pub rayleigh: RayleighAux,
    pub classif: ClassifAux,
    pub water_vapour: WaterVapourTable,
    pub lise: LiseAux,
    pub net: RegressionNet,
    pub straylight: Option<StraylightTables>,
}

impl AuxdataStore {
    /// Load every table from the provider.
    ///
    /// `tropical_atmosphere` selects the tropical regression model instead
    /// of the US-standard one; `straylight` additionally loads the
    /// per-detector straylight calibration.
    pub fn load(
        provider: &dyn AuxResourceProvider,
        tropical_atmosphere: bool,
        straylight: bool,
    ) -> ScreenResult<Self> {
        log::info!("Loading auxiliary data tables");

        let rayleigh = load_rayleigh(provider)?;
        let classif = load_classif(provider)?;
        let water_vapour = load_water_vapour(provider)?;
        let lise = load_lise(provider)?;

        let net_resource = if tropical_atmosphere {
            resources::PRESSURE_NET_TRP
        } else {
            resources::PRESSURE_NET_USS
        };
        let net = RegressionNet::parse(&provider.read(net_resource)?)
            .map_err(|e| ScreenError::AuxData(format!("{}: {}", net_resource, e)))?;

        let straylight = if straylight {
            Some(load_straylight(provider, lise.detector_wavelengths.len())?)
        } else {
            None
        };

        log::info!("Auxiliary data loaded successfully");
        Ok(Self { rayleigh, classif, water_vapour, lise, net, straylight })
    }
}

fn load_rayleigh(provider: &dyn AuxResourceProvider) -> ScreenResult<RayleighAux> {
    let name = resources::RAYLEIGH_COEFFICIENTS;
    let values = parse_floats(&provider.read(name)?);
    let expected = 2 + NUM_BANDS + 2 + 3;
    if values.len() != expected {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            values.len()
        )));
    }
    let p_std = values[0];
    let press_scale_height = values[1];
    let mut tau_r = [0.0; NUM_BANDS];
    tau_r.copy_from_slice(&values[2..2 + NUM_BANDS]);
    let ab = [values[2 + NUM_BANDS], values[3 + NUM_BANDS]];
    let mut ray_trans = [0.0; 3];
    ray_trans.copy_from_slice(&values[4 + NUM_BANDS..7 + NUM_BANDS]);

    let spherical_albedo = load_curve(provider, resources::RAYLEIGH_SPHERICAL_ALBEDO)?;
    let scatter_coeff = load_scatter_coeff(provider)?;

    Ok(RayleighAux {
        p_std,
        press_scale_height,
        tau_r,
        ab,
        ray_trans,
        spherical_albedo,
        scatter_coeff,
    })
}

/// 1-D curve: count, axis values, then curve values
fn load_curve(provider: &dyn AuxResourceProvider, name: &str) -> ScreenResult<LookupTable> {
    let values = parse_floats(&provider.read(name)?);
    if values.is_empty() {
        return Err(ScreenError::AuxData(format!("{}: empty resource", name)));
    }
    let n = values[0] as usize;
    if values.len() != 1 + 2 * n {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values for {} grid points, got {}",
            name,
            1 + 2 * n,
            n,
            values.len()
        )));
    }
    let axis = values[1..1 + n].to_vec();
    let data = values[1 + n..].to_vec();
    LookupTable::new(vec![n], data)
        .and_then(|t| t.with_axis(0, axis))
        .map_err(|e| ScreenError::AuxData(format!("{}: {}", name, e)))
}

/// order x series x sun-angle x view-angle grid with both angle axes
fn load_scatter_coeff(provider: &dyn AuxResourceProvider) -> ScreenResult<LookupTable> {
    let name = resources::RAYLEIGH_SCATTER_COEFFICIENTS;
    let values = parse_floats(&provider.read(name)?);
    if values.len() < 2 {
        return Err(ScreenError::AuxData(format!("{}: truncated resource", name)));
    }
    let nsza = values[0] as usize;
    let nvza = values[1] as usize;
    let expected = 2 + nsza + nvza + RAYSCATT_NUM_ORD * RAYSCATT_NUM_SER * nsza * nvza;
    if values.len() != expected {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            values.len()
        )));
    }
    let sza_axis = values[2..2 + nsza].to_vec();
    let vza_axis = values[2 + nsza..2 + nsza + nvza].to_vec();
    let data = values[2 + nsza + nvza..].to_vec();
    LookupTable::new(vec![RAYSCATT_NUM_ORD, RAYSCATT_NUM_SER, nsza, nvza], data)
        .and_then(|t| t.with_axis(2, sza_axis))
        .and_then(|t| t.with_axis(3, vza_axis))
        .map_err(|e| ScreenError::AuxData(format!("{}: {}", name, e)))
}

/// sun-angle x view-angle x azimuth-difference grid with all three axes
fn load_threshold_table(
    provider: &dyn AuxResourceProvider,
    name: &str,
) -> ScreenResult<LookupTable> {
    let values = parse_floats(&provider.read(name)?);
    if values.len() < 3 {
        return Err(ScreenError::AuxData(format!("{}: truncated resource", name)));
    }
    let (n0, n1, n2) = (values[0] as usize, values[1] as usize, values[2] as usize);
    let expected = 3 + n0 + n1 + n2 + n0 * n1 * n2;
    if values.len() != expected {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            values.len()
        )));
    }
    let mut offset = 3;
    let a0 = values[offset..offset + n0].to_vec();
    offset += n0;
    let a1 = values[offset..offset + n1].to_vec();
    offset += n1;
    let a2 = values[offset..offset + n2].to_vec();
    offset += n2;
    LookupTable::new(vec![n0, n1, n2], values[offset..].to_vec())
        .and_then(|t| t.with_axis(0, a0))
        .and_then(|t| t.with_axis(1, a1))
        .and_then(|t| t.with_axis(2, a2))
        .map_err(|e| ScreenError::AuxData(format!("{}: {}", name, e)))
}

fn load_classif(provider: &dyn AuxResourceProvider) -> ScreenResult<ClassifAux> {
    let name = resources::CLASSIFICATION_BANDS;
    let values = parse_floats(&provider.read(name)?);
    let expected = 5 + 4 + NUM_BANDS;
    if values.len() != expected {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            values.len()
        )));
    }
    let band = |v: f64, what: &str| -> ScreenResult<usize> {
        let idx = v as usize;
        if idx >= NUM_BANDS {
            return Err(ScreenError::AuxData(format!(
                "{}: {} index {} out of range",
                name, what, idx
            )));
        }
        Ok(idx)
    };
    let mut saturation = [0.0; NUM_BANDS];
    saturation.copy_from_slice(&values[9..9 + NUM_BANDS]);

    Ok(ClassifAux {
        band_bright_n: band(values[0], "bright band")?,
        band_slope_n_1: band(values[1], "slope-1 numerator band")?,
        band_slope_d_1: band(values[2], "slope-1 denominator band")?,
        band_slope_n_2: band(values[3], "slope-2 numerator band")?,
        band_slope_d_2: band(values[4], "slope-2 denominator band")?,
        slope_1_low_thr: values[5],
        slope_1_high_thr: values[6],
        slope_2_low_thr: values[7],
        slope_2_high_thr: values[8],
        saturation,
        bright_thr_land: load_threshold_table(provider, resources::BRIGHT_THRESHOLD_LAND)?,
        bright_thr_water: load_threshold_table(provider, resources::BRIGHT_THRESHOLD_WATER)?,
    })
}

fn load_water_vapour(provider: &dyn AuxResourceProvider) -> ScreenResult<WaterVapourTable> {
    let name = resources::WATER_VAPOUR_PRESSURE;
    let values = parse_floats(&provider.read(name)?);
    if values.len() % 2 != 0 || values.len() < 4 {
        return Err(ScreenError::AuxData(format!(
            "{}: expected temperature/pressure pairs, got {} values",
            name,
            values.len()
        )));
    }
    let mut temperature = Vec::with_capacity(values.len() / 2);
    let mut pressure = Vec::with_capacity(values.len() / 2);
    for pair in values.chunks_exact(2) {
        temperature.push(pair[0]);
        pressure.push(pair[1]);
    }
    if temperature.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ScreenError::AuxData(format!(
            "{}: temperature column must be ascending",
            name
        )));
    }
    WaterVapourTable::new(temperature, pressure)
}

/// filter x sun-angle x view-angle transmittance grid
fn load_transmittance_grid(
    provider: &dyn AuxResourceProvider,
    name: &str,
) -> ScreenResult<LookupTable> {
    let values = parse_floats(&provider.read(name)?);
    let expected = NUM_FILTERS * NUM_GAUSS * NUM_GAUSS;
    if values.len() != expected {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            values.len()
        )));
    }
    LookupTable::new(vec![NUM_FILTERS, NUM_GAUSS, NUM_GAUSS], values)
        .map_err(|e| ScreenError::AuxData(format!("{}: {}", name, e)))
}

fn load_lise(provider: &dyn AuxResourceProvider) -> ScreenResult<LiseAux> {
    let name = resources::O2_ATM_TRANSMITTANCES;
    let values = parse_floats(&provider.read(name)?);
    let expected = NUM_LAYERS + NUM_LAYERS * NUM_FILTERS * NUM_GAUSS * NUM_GAUSS;
    if values.len() != expected {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            values.len()
        )));
    }
    let pressure_levels = values[..NUM_LAYERS].to_vec();
    if pressure_levels.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ScreenError::AuxData(format!(
            "{}: pressure levels must be ascending",
            name
        )));
    }
    let to2_atm = LookupTable::new(
        vec![NUM_LAYERS, NUM_FILTERS, NUM_GAUSS, NUM_GAUSS],
        values[NUM_LAYERS..].to_vec(),
    )
    .map_err(|e| ScreenError::AuxData(format!("{}: {}", name, e)))?;

    let to2_ray = load_transmittance_grid(provider, resources::O2_RAYLEIGH_TRANSMITTANCES)?;
    let to2_fresnel = load_transmittance_grid(provider, resources::O2_FRESNEL_TRANSMITTANCES)?;
    let to2_aerosol = load_transmittance_grid(provider, resources::O2_AEROSOL_TRANSMITTANCES)?;

    let fresnel_coefficients =
        load_fixed_array(provider, resources::FRESNEL_COEFFICIENTS, 91)?;
    let aerosol_phase = load_fixed_array(provider, resources::AEROSOL_PHASE_FUNCTION, 181)?;
    let c_coefficients = load_c_coefficients(provider)?;

    let detector_wavelengths = parse_floats(&provider.read(resources::DETECTOR_WAVELENGTHS)?);
    if detector_wavelengths.is_empty() {
        return Err(ScreenError::AuxData(format!(
            "{}: empty resource",
            resources::DETECTOR_WAVELENGTHS
        )));
    }

    Ok(LiseAux {
        pressure_levels,
        to2_ray,
        to2_atm,
        to2_fresnel,
        to2_aerosol,
        fresnel_coefficients,
        aerosol_phase,
        c_coefficients,
        detector_wavelengths,
    })
}

/// filter x air-mass x reflectance coefficients: the two trailing axes
/// (6 air masses, 6 reflectances) precede the 21x6x6 coefficient block
fn load_c_coefficients(provider: &dyn AuxResourceProvider) -> ScreenResult<LookupTable> {
    let name = resources::C_COEFFICIENTS;
    let values = parse_floats(&provider.read(name)?);
    let expected = 6 + 6 + NUM_FILTERS * 6 * 6;
    if values.len() != expected {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            expected,
            values.len()
        )));
    }
    let air_masses = values[..6].to_vec();
    let rho_toa = values[6..12].to_vec();
    LookupTable::new(vec![NUM_FILTERS, 6, 6], values[12..].to_vec())
        .and_then(|t| t.with_axis(1, air_masses))
        .and_then(|t| t.with_axis(2, rho_toa))
        .map_err(|e| ScreenError::AuxData(format!("{}: {}", name, e)))
}

fn load_straylight(
    provider: &dyn AuxResourceProvider,
    detector_count: usize,
) -> ScreenResult<StraylightTables> {
    let coefficients =
        load_fixed_array(provider, resources::STRAYLIGHT_COEFFICIENTS, detector_count)?;
    let wavelengths =
        load_fixed_array(provider, resources::STRAYLIGHT_WAVELENGTHS, detector_count)?;
    Ok(StraylightTables { coefficients, wavelengths })
}

fn load_fixed_array(
    provider: &dyn AuxResourceProvider,
    name: &str,
    count: usize,
) -> ScreenResult<Vec<f64>> {
    let values = parse_floats(&provider.read(name)?);
    if values.len() != count {
        return Err(ScreenError::AuxData(format!(
            "{}: expected {} values, got {}",
            name,
            count,
            values.len()
        )));
    }
    Ok(values)
}

/// All whitespace-separated numeric tokens, skipping `#` comment lines.
/// Non-numeric tokens are dropped so simple column headers stay harmless.
fn parse_floats(text: &str) -> Vec<f64> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with('#'))
        .flat_map(|l| l.split_whitespace())
        .filter_map(|tok| tok.parse::<f64>().ok())
        .collect()
}
