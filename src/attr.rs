//! Quantization settings and the knobs derived from them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::color::{quality_to_mse, MAX_DIFF};
use crate::error::Error;

/// Cooperative cancellation handle.
///
/// Clones share one flag. Raise it from any thread with [`abort`](Self::abort)
/// and in-flight quantization or remapping checks it between work units and
/// bails out with [`Error::Aborted`].
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag::default()
    }

    /// Requests cancellation. Irreversible for this flag.
    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Settings for a quantization run.
///
/// Every setter validates its range up front and rejects bad values with
/// [`Error::ValueOutOfRange`], leaving the previous value in place; nothing
/// is deferred to [`quantize`](crate::quantize) time. An `Attributes` can be
/// reused across many images, and cloning produces an independent copy.
#[derive(Debug, Clone)]
pub struct Attributes {
    max_colors: u32,
    speed: u32,
    quality_min: u8,
    quality_max: u8,
    target_mse: f64,
    max_mse: f64,
    min_opacity: u8,
    min_posterization: u32,
    last_index_transparent: bool,
    abort: Option<AbortFlag>,
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes {
            max_colors: 256,
            speed: 3,
            quality_min: 0,
            quality_max: 100,
            target_mse: 0.0,
            max_mse: MAX_DIFF,
            min_opacity: 255,
            min_posterization: 0,
            last_index_transparent: false,
            abort: None,
        }
    }
}

impl Attributes {
    pub fn new() -> Self {
        Attributes::default()
    }

    /// Caps the palette size, including fixed colors. Accepts 2..=256.
    pub fn set_max_colors(&mut self, max_colors: u32) -> Result<(), Error> {
        if !(2..=256).contains(&max_colors) {
            return Err(Error::ValueOutOfRange);
        }
        self.max_colors = max_colors;
        Ok(())
    }

    pub fn max_colors(&self) -> u32 {
        self.max_colors
    }

    /// Trades quality for time. Accepts 1 (best) ..= 10 (fastest); 3 is the
    /// default. Higher speeds run fewer refinement passes, subsample large
    /// images harder, and at 8+ posterize the histogram by one extra bit.
    pub fn set_speed(&mut self, speed: u32) -> Result<(), Error> {
        if !(1..=10).contains(&speed) {
            return Err(Error::ValueOutOfRange);
        }
        self.speed = speed;
        Ok(())
    }

    pub fn speed(&self) -> u32 {
        self.speed
    }

    /// Sets the acceptable quality window, both ends 0..=100 with
    /// `minimum <= maximum`. The maximum becomes the error the engine aims
    /// for (it may stop early and even drop palette entries once reached);
    /// the minimum is a hard floor below which [`quantize`](crate::quantize)
    /// fails with [`Error::QualityTooLow`].
    pub fn set_quality(&mut self, minimum: u8, maximum: u8) -> Result<(), Error> {
        if minimum > maximum || maximum > 100 {
            return Err(Error::ValueOutOfRange);
        }
        self.quality_min = minimum;
        self.quality_max = maximum;
        self.target_mse = if maximum < 100 {
            quality_to_mse(maximum)
        } else {
            0.0
        };
        self.max_mse = if minimum > 0 {
            quality_to_mse(minimum)
        } else {
            MAX_DIFF
        };
        Ok(())
    }

    /// `(minimum, maximum)` as last set.
    pub fn quality(&self) -> (u8, u8) {
        (self.quality_min, self.quality_max)
    }

    /// Alpha level (0..=255) that must survive remapping at full opacity.
    ///
    /// Values below 255 enable a workaround for renderers that draw almost
    /// opaque pixels as fully opaque: alpha at or above the given level is
    /// snapped up to 255, and nearly-opaque pixels avoid mapping to palette
    /// entries with any transparency.
    pub fn set_min_opacity(&mut self, min_opacity: u8) {
        self.min_opacity = min_opacity;
    }

    pub fn min_opacity(&self) -> u8 {
        self.min_opacity
    }

    /// Number of low bits (0..=4) to ignore in every channel, for output
    /// formats with less than 8 bits per channel.
    pub fn set_min_posterization(&mut self, bits: u32) -> Result<(), Error> {
        if bits > 4 {
            return Err(Error::ValueOutOfRange);
        }
        self.min_posterization = bits;
        Ok(())
    }

    pub fn min_posterization(&self) -> u32 {
        self.min_posterization
    }

    /// Moves the fully transparent entry to the last palette slot instead of
    /// the first. Some GIF encoders want it there.
    pub fn set_last_index_transparent(&mut self, enabled: bool) {
        self.last_index_transparent = enabled;
    }

    pub fn last_index_transparent(&self) -> bool {
        self.last_index_transparent
    }

    /// Installs a cancellation flag checked during long phases.
    pub fn set_abort_flag(&mut self, flag: AbortFlag) {
        self.abort = Some(flag);
    }

    pub(crate) fn abort_flag(&self) -> Option<&AbortFlag> {
        self.abort.as_ref()
    }

    pub(crate) fn check_abort(&self) -> Result<(), Error> {
        match &self.abort {
            Some(flag) if flag.is_aborted() => Err(Error::Aborted),
            _ => Ok(()),
        }
    }

    pub(crate) fn target_mse(&self) -> f64 {
        self.target_mse
    }

    pub(crate) fn max_mse(&self) -> f64 {
        self.max_mse
    }

    pub(crate) fn min_opaque_val(&self) -> f32 {
        f32::from(self.min_opacity) / 255.0
    }

    /// K-means passes over the histogram after median cut; 0 at top speeds.
    pub(crate) fn kmeans_iterations(&self) -> u32 {
        let it = 8u32.saturating_sub(self.speed);
        it + it * it / 2
    }

    /// K-means stops once the error improves by less than this per pass.
    pub(crate) fn kmeans_iteration_limit(&self) -> f64 {
        1.0 / f64::from(1u32 << (23 - self.speed))
    }

    /// Median-cut retries in the palette feedback loop.
    pub(crate) fn feedback_loop_trials(&self) -> u32 {
        (56i32 - 9 * self.speed as i32).max(0) as u32
    }

    /// Histogram size above which posterization kicks in.
    pub(crate) fn max_histogram_entries(&self) -> usize {
        (1usize << 17) + (1usize << 18) * (10 - self.speed as usize)
    }

    pub(crate) fn effective_posterization(&self) -> u32 {
        if self.speed >= 8 {
            self.min_posterization.max(1)
        } else {
            self.min_posterization
        }
    }

    /// Contrast-based importance maps are skipped at the top speeds.
    pub(crate) fn use_contrast_maps(&self) -> bool {
        self.speed <= 7
    }

    /// Row subsampling step when feeding the histogram.
    pub(crate) fn histogram_row_stride(&self) -> usize {
        match self.speed {
            0..=6 => 1,
            7 | 8 => 2,
            _ => 3,
        }
    }
}
