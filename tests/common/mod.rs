//! Shared synthetic auxiliary data and scene builders for the
//! integration tests.

use ndarray::Array2;
use nimbus::auxdata::tables::{
    ClassifAux, LiseAux, RayleighAux, NUM_FILTERS, NUM_GAUSS, NUM_LAYERS,
};
use nimbus::auxdata::{
    AuxResourceProvider, AuxdataStore, LookupTable, RegressionNet, WaterVapourTable,
};
use nimbus::geo::AffineGeoCoding;
use nimbus::types::{B412, B442, B490, B775, B865};
use nimbus::{ScreenError, ScreenResult, SceneInputs, Window, NUM_BANDS};
use std::collections::HashMap;

pub fn rayleigh_aux() -> RayleighAux {
    let albedo_axis: Vec<f64> = (0..11).map(|i| i as f64 * 0.1).collect();
    let albedo_values: Vec<f64> = albedo_axis.iter().map(|t| 0.2 * t).collect();
    let spherical_albedo = LookupTable::new(vec![11], albedo_values)
        .unwrap()
        .with_axis(0, albedo_axis)
        .unwrap();

    // constant polynomial a0 = 1: the multiple-scattering factor is 1
    let (nsza, nvza) = (3, 3);
    let mut data = vec![0.0; 4 * 3 * nsza * nvza];
    for is in 0..3 {
        for g in 0..nsza * nvza {
            data[is * nsza * nvza + g] = 1.0;
        }
    }
    let scatter_coeff = LookupTable::new(vec![4, 3, nsza, nvza], data)
        .unwrap()
        .with_axis(2, vec![0.0, 45.0, 90.0])
        .unwrap()
        .with_axis(3, vec![0.0, 45.0, 90.0])
        .unwrap();

    RayleighAux {
        p_std: 1013.25,
        press_scale_height: 8000.0,
        tau_r: [
            0.3132, 0.2336, 0.1547, 0.1330, 0.0947, 0.0679, 0.0513, 0.0452, 0.0386, 0.0331,
            0.0317, 0.0289, 0.0206, 0.0189, 0.0181,
        ],
        ab: [0.9587256, 1.0 - 0.9587256],
        ray_trans: [0.0, 1.0, 0.0],
        spherical_albedo,
        scatter_coeff,
    }
}

pub fn classif_aux() -> ClassifAux {
    let constant_table = |value: f64| {
        LookupTable::new(vec![2, 2, 2], vec![value; 8])
            .unwrap()
            .with_axis(0, vec![0.0, 90.0])
            .unwrap()
            .with_axis(1, vec![0.0, 90.0])
            .unwrap()
            .with_axis(2, vec![0.0, 180.0])
            .unwrap()
    };
    ClassifAux {
        band_bright_n: B442,
        band_slope_n_1: B490,
        band_slope_d_1: B412,
        band_slope_n_2: B775,
        band_slope_d_2: B865,
        slope_1_low_thr: 0.0,
        slope_1_high_thr: 10.0,
        slope_2_low_thr: 0.0,
        slope_2_high_thr: 10.0,
        saturation: [1000.0; NUM_BANDS],
        bright_thr_land: constant_table(0.3),
        bright_thr_water: constant_table(0.2),
    }
}

pub fn water_vapour_table() -> WaterVapourTable {
    WaterVapourTable::new(
        vec![-40.0, -30.0, -20.0, -10.0, 0.0, 10.0, 20.0, 30.0, 40.0],
        vec![0.2, 0.5, 1.3, 2.9, 6.1, 12.3, 23.4, 42.4, 73.8],
    )
    .unwrap()
}

/// 21 pressure levels from 100 to 1100 hPa
pub fn pressure_levels() -> Vec<f64> {
    (0..NUM_LAYERS).map(|i| 100.0 + i as f64 * 50.0).collect()
}

/// Layer transmittance used by the synthetic O2 tables
pub fn layer_transmittance(pressure: f64) -> f64 {
    (-pressure / 1300.0).exp()
}

pub fn lise_aux() -> LiseAux {
    let levels = pressure_levels();
    let mut atm = Vec::with_capacity(NUM_LAYERS * NUM_FILTERS * NUM_GAUSS * NUM_GAUSS);
    for level in &levels {
        let t = layer_transmittance(*level);
        for _ in 0..NUM_FILTERS * NUM_GAUSS * NUM_GAUSS {
            atm.push(t);
        }
    }
    let to2_atm =
        LookupTable::new(vec![NUM_LAYERS, NUM_FILTERS, NUM_GAUSS, NUM_GAUSS], atm).unwrap();

    let flat = |value: f64| {
        LookupTable::new(
            vec![NUM_FILTERS, NUM_GAUSS, NUM_GAUSS],
            vec![value; NUM_FILTERS * NUM_GAUSS * NUM_GAUSS],
        )
        .unwrap()
    };
    let c_coefficients = LookupTable::new(vec![NUM_FILTERS, 6, 6], vec![1.0; NUM_FILTERS * 36])
        .unwrap()
        .with_axis(1, vec![2.0, 2.5, 3.0, 3.5, 4.0, 4.5])
        .unwrap()
        .with_axis(2, vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5])
        .unwrap();

    LiseAux {
        pressure_levels: levels,
        to2_ray: flat(0.9),
        to2_atm,
        to2_fresnel: flat(0.85),
        to2_aerosol: flat(0.88),
        fresnel_coefficients: vec![0.02; 91],
        aerosol_phase: vec![1.0; 181],
        c_coefficients,
        detector_wavelengths: vec![761.5; 16],
    }
}

/// Constant-output regression model: always 1000 hPa
pub fn regression_net() -> RegressionNet {
    RegressionNet::from_parts(
        vec![7, 1],
        vec![(0.0, 1.0); 7],
        vec![(0.0, 2000.0)],
        vec![vec![0.0; 7]],
        vec![vec![0.5]],
    )
    .unwrap()
}

pub fn aux_store() -> AuxdataStore {
    AuxdataStore {
        rayleigh: rayleigh_aux(),
        classif: classif_aux(),
        water_vapour: water_vapour_table(),
        lise: lise_aux(),
        net: regression_net(),
        straylight: None,
    }
}

/// In-memory auxiliary resource provider
pub struct MapProvider {
    resources: HashMap<String, String>,
}

impl MapProvider {
    pub fn new(resources: HashMap<String, String>) -> Self {
        Self { resources }
    }

    pub fn empty() -> Self {
        Self { resources: HashMap::new() }
    }
}

impl AuxResourceProvider for MapProvider {
    fn read(&self, name: &str) -> ScreenResult<String> {
        self.resources
            .get(name)
            .cloned()
            .ok_or_else(|| ScreenError::AuxData(format!("missing resource '{}'", name)))
    }
}

fn join(values: impl IntoIterator<Item = f64>) -> String {
    values
        .into_iter()
        .map(|v| format!("{:.10}", v))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text renditions of the synthetic tables, for exercising the loaders
pub fn text_resources() -> MapProvider {
    use nimbus::auxdata::tables::resources as r;
    let mut map = HashMap::new();

    let aux = rayleigh_aux();
    let mut coeffs = vec![aux.p_std, aux.press_scale_height];
    coeffs.extend_from_slice(&aux.tau_r);
    coeffs.extend_from_slice(&aux.ab);
    coeffs.extend_from_slice(&aux.ray_trans);
    map.insert(r::RAYLEIGH_COEFFICIENTS.to_string(), join(coeffs));

    let albedo_axis: Vec<f64> = (0..11).map(|i| i as f64 * 0.1).collect();
    let mut albedo = vec![11.0];
    albedo.extend(albedo_axis.iter().copied());
    albedo.extend(albedo_axis.iter().map(|t| 0.2 * t));
    map.insert(r::RAYLEIGH_SPHERICAL_ALBEDO.to_string(), join(albedo));

    let mut scatter = vec![3.0, 3.0, 0.0, 45.0, 90.0, 0.0, 45.0, 90.0];
    for ik in 0..4 {
        for _is in 0..3 {
            for _g in 0..9 {
                scatter.push(if ik == 0 { 1.0 } else { 0.0 });
            }
        }
    }
    map.insert(r::RAYLEIGH_SCATTER_COEFFICIENTS.to_string(), join(scatter));

    let threshold_table = |value: f64| {
        let mut t = vec![2.0, 2.0, 2.0, 0.0, 90.0, 0.0, 90.0, 0.0, 180.0];
        t.extend(std::iter::repeat(value).take(8));
        join(t)
    };
    map.insert(r::BRIGHT_THRESHOLD_LAND.to_string(), threshold_table(0.3));
    map.insert(r::BRIGHT_THRESHOLD_WATER.to_string(), threshold_table(0.2));

    let caux = classif_aux();
    let mut bands = vec![
        caux.band_bright_n as f64,
        caux.band_slope_n_1 as f64,
        caux.band_slope_d_1 as f64,
        caux.band_slope_n_2 as f64,
        caux.band_slope_d_2 as f64,
        caux.slope_1_low_thr,
        caux.slope_1_high_thr,
        caux.slope_2_low_thr,
        caux.slope_2_high_thr,
    ];
    bands.extend_from_slice(&caux.saturation);
    map.insert(r::CLASSIFICATION_BANDS.to_string(), join(bands));

    let wv = vec![
        -40.0, 0.2, -30.0, 0.5, -20.0, 1.3, -10.0, 2.9, 0.0, 6.1, 10.0, 12.3, 20.0, 23.4, 30.0,
        42.4, 40.0, 73.8,
    ];
    map.insert(r::WATER_VAPOUR_PRESSURE.to_string(), join(wv));

    let grid = |value: f64| join(vec![value; NUM_FILTERS * NUM_GAUSS * NUM_GAUSS]);
    map.insert(r::O2_RAYLEIGH_TRANSMITTANCES.to_string(), grid(0.9));
    map.insert(r::O2_FRESNEL_TRANSMITTANCES.to_string(), grid(0.85));
    map.insert(r::O2_AEROSOL_TRANSMITTANCES.to_string(), grid(0.88));

    let levels = pressure_levels();
    let mut atm: Vec<f64> = levels.clone();
    for level in &levels {
        let t = layer_transmittance(*level);
        atm.extend(std::iter::repeat(t).take(NUM_FILTERS * NUM_GAUSS * NUM_GAUSS));
    }
    map.insert(r::O2_ATM_TRANSMITTANCES.to_string(), join(atm));

    map.insert(r::FRESNEL_COEFFICIENTS.to_string(), join(vec![0.02; 91]));
    map.insert(r::AEROSOL_PHASE_FUNCTION.to_string(), join(vec![1.0; 181]));

    let mut c = vec![2.0, 2.5, 3.0, 3.5, 4.0, 4.5, 0.0, 0.1, 0.2, 0.3, 0.4, 0.5];
    c.extend(std::iter::repeat(1.0).take(NUM_FILTERS * 36));
    map.insert(r::C_COEFFICIENTS.to_string(), join(c));

    map.insert(r::DETECTOR_WAVELENGTHS.to_string(), join(vec![761.5; 16]));

    // constant-output model in the parse format
    map.insert(
        r::PRESSURE_NET_USS.to_string(),
        "7 1\n0 1\n0 1\n0 1\n0 1\n0 1\n0 1\n0 1\n0 2000\n0.5\n0 0 0 0 0 0 0\n".to_string(),
    );

    MapProvider::new(map)
}

/// Scene-wide input arrays with uniform defaults
pub struct SceneFixture {
    pub bounds: Window,
    pub rho: Vec<Array2<f32>>,
    pub radiance: Array2<f32>,
    pub detector: Array2<i16>,
    pub sza: Array2<f32>,
    pub vza: Array2<f32>,
    pub saa: Array2<f32>,
    pub vaa: Array2<f32>,
    pub altitude: Array2<f32>,
    pub slp: Array2<f32>,
    pub land: Array2<bool>,
    pub invalid: Array2<bool>,
}

impl SceneFixture {
    pub fn new(width: usize, height: usize, reflectance: f32) -> Self {
        Self {
            bounds: Window::new(0, 0, width, height),
            rho: vec![Array2::from_elem((height, width), reflectance); NUM_BANDS],
            radiance: Array2::zeros((height, width)),
            detector: Array2::zeros((height, width)),
            sza: Array2::from_elem((height, width), 30.0),
            vza: Array2::zeros((height, width)),
            saa: Array2::zeros((height, width)),
            vaa: Array2::zeros((height, width)),
            altitude: Array2::zeros((height, width)),
            slp: Array2::from_elem((height, width), 1013.25),
            land: Array2::from_elem((height, width), true),
            invalid: Array2::from_elem((height, width), false),
        }
    }

    pub fn inputs<'a>(&'a self, geocoding: &'a AffineGeoCoding) -> SceneInputs<'a> {
        SceneInputs {
            bounds: self.bounds,
            rho_toa: self.rho.iter().map(|a| a.view()).collect(),
            radiance_bright: self.radiance.view(),
            radiance_slope_1: self.radiance.view(),
            radiance_slope_2: self.radiance.view(),
            detector: self.detector.view(),
            sza: self.sza.view(),
            vza: self.vza.view(),
            saa: self.saa.view(),
            vaa: self.vaa.view(),
            altitude: self.altitude.view(),
            advanced_altitude: None,
            sea_level_pressure: self.slp.view(),
            ctp: None,
            is_land: self.land.view(),
            is_invalid: self.invalid.view(),
            geocoding,
        }
    }
}

pub fn geocoding(width: usize, height: usize) -> AffineGeoCoding {
    AffineGeoCoding {
        origin_lat: 45.0,
        origin_lon: 8.0,
        lat_step: -1e-3,
        lon_step: 1e-3,
        scene_width: width,
        scene_height: height,
    }
}
