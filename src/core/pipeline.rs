//! Scene-level orchestration of the screening chain.
//!
//! One tile runs through: pressure estimators -> pixel classifier ->
//! cloud-buffer dilation -> cloud-shadow casting. The buffer runs before
//! the shadow pass so shadows can optionally be cast from buffer pixels;
//! the shadow pass finishes with the cloud/shadow mutual exclusion, the
//! buffer pass with the cloud/buffer precedence rule.
//!
//! Tiles are independent: [`ScreeningPipeline::process_scene`] fans them
//! out across rayon workers, each worker owning its own clone of the
//! regression model's scratch buffers.

use crate::auxdata::net::NetScratch;
use crate::auxdata::AuxdataStore;
use crate::core::buffer::{BufferInputs, BufferParams, CloudBufferDilator};
use crate::core::classify::{ClassificationInputs, ClassificationParams, PixelClassifier};
use crate::core::pressure::{
    BarometricInputs, BarometricParams, BarometricProcessor, LiseInputs, LiseProcessor,
    NetPressureEstimator, NetPressureInputs, NetPressureProcessor, O2PressureEstimator,
    PressureProduct,
};
use crate::core::rayleigh::RayleighCorrection;
use crate::core::shadow::{CloudShadowCaster, ShadowInputs, ShadowParams};
use crate::geo::GeoCoding;
use crate::types::{
    CancelToken, Channel, ChannelView, DetectorView, MaskView, ScreenError, ScreenResult,
    Window, B760, NUM_BANDS,
};
use ndarray::{s, Array2, ArrayView2};
use rayon::prelude::*;

/// Complete configuration of one screening run
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ScreeningConfig {
    pub classification: ClassificationParams,
    pub barometric: BarometricParams,
    pub shadow: ShadowParams,
    pub buffer: BufferParams,
    /// Apply the per-detector straylight correction in both O2-band
    /// estimators
    pub straylight_correction: bool,
    /// Use the tropical-atmosphere regression model; consumed by
    /// [`crate::auxdata::AuxdataStore::load`] when the tables are read
    pub tropical_atmosphere: bool,
}

/// Scene-wide input channels. All views cover the scene bounds window.
pub struct SceneInputs<'a> {
    pub bounds: Window,
    /// Top-of-atmosphere reflectance per spectral channel
    pub rho_toa: Vec<ChannelView<'a>>,
    pub radiance_bright: ChannelView<'a>,
    pub radiance_slope_1: ChannelView<'a>,
    pub radiance_slope_2: ChannelView<'a>,
    pub detector: DetectorView<'a>,
    pub sza: ChannelView<'a>,
    pub vza: ChannelView<'a>,
    pub saa: ChannelView<'a>,
    pub vaa: ChannelView<'a>,
    pub altitude: ChannelView<'a>,
    /// Precise elevation channel, required by the advanced-DEM option
    pub advanced_altitude: Option<ChannelView<'a>>,
    pub sea_level_pressure: ChannelView<'a>,
    /// External cloud-top pressure; the configured constant applies when
    /// absent
    pub ctp: Option<ChannelView<'a>>,
    pub is_land: MaskView<'a>,
    pub is_invalid: MaskView<'a>,
    pub geocoding: &'a dyn GeoCoding,
}

/// Output channels of one screening run, scene-sized
pub struct ScreeningOutputs {
    pub flags: Array2<u16>,
    pub pressure_baro: Channel,
    /// Apparent pressure from the O2 band ratio
    pub pressure_p1: Channel,
    /// Fully corrected scattering pressure from the O2 band ratio
    pub pressure_pscatt: Channel,
    /// Regression-net surface pressure
    pub pressure_fub: Channel,
    pub surface_pressure: Channel,
    pub cloud_top_pressure: Channel,
    pub scattering_angle: Channel,
    pub rho442_threshold_term: Channel,
    pub mdsi: Channel,
}

struct TileOutputs {
    window: Window,
    flags: Array2<u16>,
    pressure_baro: Channel,
    pressure_p1: Channel,
    pressure_pscatt: Channel,
    pressure_fub: Channel,
    surface_pressure: Channel,
    cloud_top_pressure: Channel,
    scattering_angle: Channel,
    rho442_threshold_term: Channel,
    mdsi: Channel,
}

/// The full screening chain over the shared auxiliary data
pub struct ScreeningPipeline {
    aux: AuxdataStore,
    config: ScreeningConfig,
}

impl ScreeningPipeline {
    pub fn new(aux: AuxdataStore, config: ScreeningConfig) -> Self {
        Self { aux, config }
    }

    pub fn aux(&self) -> &AuxdataStore {
        &self.aux
    }

    /// Process a whole scene, splitting it into `tile_size` square tiles
    /// processed on rayon workers.
    pub fn process_scene(
        &self,
        inputs: &SceneInputs<'_>,
        tile_size: usize,
        cancel: &CancelToken,
    ) -> ScreenResult<ScreeningOutputs> {
        let bounds = inputs.bounds;
        if inputs.rho_toa.len() != NUM_BANDS {
            return Err(ScreenError::Config(format!(
                "expected {} reflectance channels, got {}",
                NUM_BANDS,
                inputs.rho_toa.len()
            )));
        }
        log::info!(
            "Screening scene {} with {}x{} tiles",
            bounds,
            tile_size,
            tile_size
        );

        let mut tiles = Vec::new();
        let mut y = bounds.y;
        while y < bounds.y + bounds.height as i32 {
            let h = tile_size.min((bounds.y + bounds.height as i32 - y) as usize);
            let mut x = bounds.x;
            while x < bounds.x + bounds.width as i32 {
                let w = tile_size.min((bounds.x + bounds.width as i32 - x) as usize);
                tiles.push(Window::new(x, y, w, h));
                x += tile_size as i32;
            }
            y += tile_size as i32;
        }

        let results: ScreenResult<Vec<TileOutputs>> = tiles
            .par_iter()
            .map_init(
                || self.aux.net.scratch(),
                |scratch, tile| self.process_tile(inputs, *tile, scratch, cancel),
            )
            .collect();
        let results = results?;

        let mut out = ScreeningOutputs {
            flags: Array2::zeros((bounds.height, bounds.width)),
            pressure_baro: Array2::zeros((bounds.height, bounds.width)),
            pressure_p1: Array2::zeros((bounds.height, bounds.width)),
            pressure_pscatt: Array2::zeros((bounds.height, bounds.width)),
            pressure_fub: Array2::zeros((bounds.height, bounds.width)),
            surface_pressure: Array2::zeros((bounds.height, bounds.width)),
            cloud_top_pressure: Array2::zeros((bounds.height, bounds.width)),
            scattering_angle: Array2::zeros((bounds.height, bounds.width)),
            rho442_threshold_term: Array2::zeros((bounds.height, bounds.width)),
            mdsi: Array2::zeros((bounds.height, bounds.width)),
        };
        for tile in results {
            let r0 = (tile.window.y - bounds.y) as usize;
            let c0 = (tile.window.x - bounds.x) as usize;
            let (h, w) = (tile.window.height, tile.window.width);
            out.flags.slice_mut(s![r0..r0 + h, c0..c0 + w]).assign(&tile.flags);
            out.pressure_baro
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.pressure_baro);
            out.pressure_p1
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.pressure_p1);
            out.pressure_pscatt
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.pressure_pscatt);
            out.pressure_fub
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.pressure_fub);
            out.surface_pressure
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.surface_pressure);
            out.cloud_top_pressure
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.cloud_top_pressure);
            out.scattering_angle
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.scattering_angle);
            out.rho442_threshold_term
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.rho442_threshold_term);
            out.mdsi
                .slice_mut(s![r0..r0 + h, c0..c0 + w])
                .assign(&tile.mdsi);
        }
        log::info!("Scene screening completed ({} tiles)", tiles.len());
        Ok(out)
    }

    /// Run the whole chain for one target tile.
    fn process_tile(
        &self,
        inputs: &SceneInputs<'_>,
        tile: Window,
        scratch: &mut NetScratch,
        cancel: &CancelToken,
    ) -> ScreenResult<TileOutputs> {
        let bounds = inputs.bounds;
        let buffer_margin = self.config.buffer.cloud_buffer_width
            + usize::from(self.config.buffer.use_land_cover_buffer);
        let shadow_window = tile.extend(self.config.shadow.shadow_width, &bounds);
        // the classifier must cover the buffer sources of the shadow window
        let classif_window = shadow_window.extend(buffer_margin, &bounds);

        // pressure estimates over the classification window
        let pressure_baro = self.barometric(inputs, &classif_window, cancel)?;
        let lise = O2PressureEstimator::new(&self.aux.lise).with_rayleigh(
            RayleighCorrection::new(&self.aux.rayleigh),
            self.aux.rayleigh.tau_r[B760],
        );
        let lise_processor = LiseProcessor::new(
            lise,
            &self.aux.lise,
            self.config
                .straylight_correction
                .then_some(self.aux.straylight.as_ref())
                .flatten(),
        );
        let lise_inputs = self.lise_inputs(inputs, &classif_window);
        let pressure_p1 =
            lise_processor.process(PressureProduct::Apparent, &lise_inputs, cancel)?;
        let pressure_pscatt =
            lise_processor.process(PressureProduct::FullyCorrected, &lise_inputs, cancel)?;

        // classification over the extended window
        let ctp_constant;
        let ctp_view = match &inputs.ctp {
            Some(view) => slice_window(view, &bounds, &classif_window),
            None => {
                ctp_constant = Array2::from_elem(
                    (classif_window.height, classif_window.width),
                    self.config.shadow.ctp_constant_value,
                );
                ctp_constant.view()
            }
        };
        let classifier = PixelClassifier::new(
            &self.aux.rayleigh,
            &self.aux.classif,
            self.config.classification.clone(),
        );
        let classification_inputs = ClassificationInputs {
            window: classif_window,
            rho_toa: inputs
                .rho_toa
                .iter()
                .map(|v| slice_window(v, &bounds, &classif_window))
                .collect(),
            radiance_bright: slice_window(&inputs.radiance_bright, &bounds, &classif_window),
            radiance_slope_1: slice_window(&inputs.radiance_slope_1, &bounds, &classif_window),
            radiance_slope_2: slice_window(&inputs.radiance_slope_2, &bounds, &classif_window),
            sza: slice_window(&inputs.sza, &bounds, &classif_window),
            vza: slice_window(&inputs.vza, &bounds, &classif_window),
            saa: slice_window(&inputs.saa, &bounds, &classif_window),
            vaa: slice_window(&inputs.vaa, &bounds, &classif_window),
            altitude: slice_window(&inputs.altitude, &bounds, &classif_window),
            sea_level_pressure: slice_window(&inputs.sea_level_pressure, &bounds, &classif_window),
            ctp: ctp_view,
            pressure_baro: pressure_baro.view(),
            pressure_p1: pressure_p1.view(),
            pressure_pscatt: pressure_pscatt.view(),
            is_land: slice_window(&inputs.is_land, &bounds, &classif_window),
            is_invalid: slice_window(&inputs.is_invalid, &bounds, &classif_window),
        };
        let classification = classifier.process(&classification_inputs, cancel)?;

        // cloud buffer over the shadow source window
        let dilator = CloudBufferDilator::new(self.config.buffer.clone());
        let buffer_inputs = BufferInputs {
            source_window: classif_window,
            target_window: shadow_window,
            flags: classification.flags.view(),
            is_land: Some(slice_window(&inputs.is_land, &bounds, &classif_window)),
        };
        let buffered_flags = dilator.process(&buffer_inputs, cancel)?;

        // cloud shadow onto the target tile
        let caster = CloudShadowCaster::new(inputs.geocoding, self.config.shadow.clone());
        let shadow_ctp_view = match &inputs.ctp {
            Some(view) => Some(slice_window(view, &bounds, &shadow_window)),
            None => None,
        };
        let shadow_inputs = ShadowInputs {
            source_window: shadow_window,
            target_window: tile,
            flags: buffered_flags.view(),
            sza: slice_window(&inputs.sza, &bounds, &shadow_window),
            saa: slice_window(&inputs.saa, &bounds, &shadow_window),
            vza: slice_window(&inputs.vza, &bounds, &shadow_window),
            vaa: slice_window(&inputs.vaa, &bounds, &shadow_window),
            altitude: slice_window(&inputs.altitude, &bounds, &shadow_window),
            ctp: shadow_ctp_view,
        };
        let flags = caster.process(&shadow_inputs, cancel)?;

        // regression-net surface pressure over the bare tile
        let fub_processor = NetPressureProcessor::new(NetPressureEstimator::new(
            &self.aux.net,
            &self.aux.lise,
            self.config
                .straylight_correction
                .then_some(self.aux.straylight.as_ref())
                .flatten(),
        ));
        let fub_inputs = NetPressureInputs {
            window: tile,
            detector: slice_window(&inputs.detector, &bounds, &tile),
            sza: slice_window(&inputs.sza, &bounds, &tile),
            vza: slice_window(&inputs.vza, &bounds, &tile),
            saa: slice_window(&inputs.saa, &bounds, &tile),
            vaa: slice_window(&inputs.vaa, &bounds, &tile),
            rho753: slice_window(&inputs.rho_toa[crate::types::B753], &bounds, &tile),
            rho761: slice_window(&inputs.rho_toa[crate::types::B760], &bounds, &tile),
            rho778: slice_window(&inputs.rho_toa[crate::types::B775], &bounds, &tile),
            is_invalid: slice_window(&inputs.is_invalid, &bounds, &tile),
        };
        let pressure_fub = fub_processor
            .process(&fub_inputs, scratch, cancel)
            .map_err(|e| tile_error("surface_press_fub", &tile, e))?;

        // crop the window-sized channels down to the bare tile
        Ok(TileOutputs {
            window: tile,
            flags,
            pressure_baro: crop(&pressure_baro, &classif_window, &tile),
            pressure_p1: crop(&pressure_p1, &classif_window, &tile),
            pressure_pscatt: crop(&pressure_pscatt, &classif_window, &tile),
            pressure_fub,
            surface_pressure: crop(&classification.surface_pressure, &classif_window, &tile),
            cloud_top_pressure: crop(&classification.cloud_top_pressure, &classif_window, &tile),
            scattering_angle: crop(&classification.scattering_angle, &classif_window, &tile),
            rho442_threshold_term: crop(
                &classification.rho442_threshold_term,
                &classif_window,
                &tile,
            ),
            mdsi: crop(&classification.mdsi, &classif_window, &tile),
        })
    }

    fn barometric(
        &self,
        inputs: &SceneInputs<'_>,
        window: &Window,
        cancel: &CancelToken,
    ) -> ScreenResult<Channel> {
        let bounds = inputs.bounds;
        let processor = BarometricProcessor::new(
            &self.aux.water_vapour,
            self.config.barometric.clone(),
        );
        let baro_inputs = BarometricInputs {
            window: *window,
            sea_level_pressure: slice_window(&inputs.sea_level_pressure, &bounds, window),
            altitude: slice_window(&inputs.altitude, &bounds, window),
            advanced_altitude: inputs
                .advanced_altitude
                .as_ref()
                .map(|v| slice_window(v, &bounds, window)),
            is_invalid: slice_window(&inputs.is_invalid, &bounds, window),
        };
        processor.process(&baro_inputs, cancel)
    }

    fn lise_inputs<'a>(
        &self,
        inputs: &'a SceneInputs<'_>,
        window: &Window,
    ) -> LiseInputs<'a> {
        let bounds = inputs.bounds;
        LiseInputs {
            window: *window,
            detector: slice_window(&inputs.detector, &bounds, window),
            sza: slice_window(&inputs.sza, &bounds, window),
            vza: slice_window(&inputs.vza, &bounds, window),
            saa: slice_window(&inputs.saa, &bounds, window),
            vaa: slice_window(&inputs.vaa, &bounds, window),
            rho753: slice_window(&inputs.rho_toa[crate::types::B753], &bounds, window),
            rho761: slice_window(&inputs.rho_toa[crate::types::B760], &bounds, window),
            rho778: slice_window(&inputs.rho_toa[crate::types::B775], &bounds, window),
            is_invalid: slice_window(&inputs.is_invalid, &bounds, window),
        }
    }
}

/// Slice a scene-wide view down to a sub-window
fn slice_window<'b, T>(
    view: &'b ArrayView2<'_, T>,
    scene: &Window,
    window: &Window,
) -> ArrayView2<'b, T> {
    let r0 = (window.y - scene.y) as usize;
    let c0 = (window.x - scene.x) as usize;
    view.slice(s![r0..r0 + window.height, c0..c0 + window.width])
}

/// Copy the sub-window of a window-sized array into an owned tile array
fn crop(channel: &Channel, from: &Window, to: &Window) -> Channel {
    let r0 = (to.y - from.y) as usize;
    let c0 = (to.x - from.x) as usize;
    channel.slice(s![r0..r0 + to.height, c0..c0 + to.width]).to_owned()
}

fn tile_error(channel: &str, window: &Window, error: ScreenError) -> ScreenError {
    match error {
        ScreenError::Cancelled => ScreenError::Cancelled,
        other => ScreenError::Tile {
            channel: channel.to_string(),
            window: *window,
            message: other.to_string(),
        },
    }
}
