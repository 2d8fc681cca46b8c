//! Face color services: HSV ramp palettes and noise-selected patch levels.
#![forbid(unsafe_code)]

use fastnoise_lite::{FastNoiseLite, NoiseType};
use lithos_geom::Vec3;
use serde::Deserialize;

/// An RGB color plus opacity, in linear 0..1 components.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaletteColor {
    pub rgb: [f32; 3],
    pub opacity: f32,
}

impl PaletteColor {
    #[inline]
    pub const fn opaque(r: f32, g: f32, b: f32) -> Self {
        Self {
            rgb: [r, g, b],
            opacity: 1.0,
        }
    }

    /// Quantized 8-bit key for per-container color dedup tables.
    #[inline]
    pub fn quantize(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [
            q(self.rgb[0]),
            q(self.rgb[1]),
            q(self.rgb[2]),
            q(self.opacity),
        ]
    }
}

/// Ramp and patch-noise parameters for procedural face coloring.
///
/// Hue is in degrees; saturation/value in 0..1. `levels` colors are
/// interpolated across the ranges and the patch field picks one per face.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaletteConfig {
    pub levels: u32,
    pub hue: [f32; 2],
    pub saturation: [f32; 2],
    pub value: [f32; 2],
    pub opacity: f32,
    pub patch_frequency: f32,
    pub patch_seed: i32,
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            levels: 4,
            hue: [90.0, 140.0],
            saturation: [0.35, 0.55],
            value: [0.45, 0.75],
            opacity: 1.0,
            patch_frequency: 0.05,
            patch_seed: 1337,
        }
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Standard HSV to RGB conversion; hue in degrees, s/v in 0..1.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [f32; 3] {
    let h = h.rem_euclid(360.0);
    let c = v * s;
    let hp = h / 60.0;
    let x = c * (1.0 - (hp % 2.0 - 1.0).abs());
    let (r1, g1, b1) = match hp as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = v - c;
    [r1 + m, g1 + m, b1 + m]
}

/// Builds the discrete color ramp for a palette configuration.
pub fn build_ramp(cfg: &PaletteConfig) -> Vec<PaletteColor> {
    let levels = cfg.levels.max(1) as usize;
    let mut ramp = Vec::with_capacity(levels);
    for i in 0..levels {
        let t = if levels > 1 {
            i as f32 / (levels - 1) as f32
        } else {
            0.0
        };
        let h = lerp(cfg.hue[0], cfg.hue[1], t);
        let s = lerp(cfg.saturation[0], cfg.saturation[1], t);
        let v = lerp(cfg.value[0], cfg.value[1], t);
        ramp.push(PaletteColor {
            rgb: hsv_to_rgb(h, s, v),
            opacity: cfg.opacity.clamp(0.0, 1.0),
        });
    }
    ramp
}

/// Per-face color source for a chunk install: a solid override or a
/// noise-patched ramp.
pub enum Colorer {
    Solid(PaletteColor),
    Patch { ramp: Vec<PaletteColor>, field: FastNoiseLite },
}

impl Colorer {
    pub fn solid(color: PaletteColor) -> Self {
        Colorer::Solid(color)
    }

    pub fn patch(cfg: &PaletteConfig) -> Self {
        let mut field = FastNoiseLite::with_seed(cfg.patch_seed);
        field.set_noise_type(Some(NoiseType::OpenSimplex2));
        field.set_frequency(Some(cfg.patch_frequency.max(1e-6)));
        Colorer::Patch {
            ramp: build_ramp(cfg),
            field,
        }
    }

    /// Color for a face whose centroid sits at `p`.
    pub fn sample(&self, p: Vec3) -> PaletteColor {
        match self {
            Colorer::Solid(c) => *c,
            Colorer::Patch { ramp, field } => {
                let n = field.get_noise_3d(p.x, p.y, p.z);
                let t = ((n + 1.0) * 0.5).clamp(0.0, 1.0);
                // t == 1.0 maps onto the last level, not one past it.
                let idx = ((t * ramp.len() as f32) as usize).min(ramp.len() - 1);
                ramp[idx]
            }
        }
    }
}
