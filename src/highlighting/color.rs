//! Color math: RGBA/HLSA conversions, gradient interpolation and the mapping
//! down to the 256-color terminal palette.

const ONE_THIRD: f64 = 1.0 / 3.0;
const ONE_SIXTH: f64 = 1.0 / 6.0;
const TWO_THIRD: f64 = 2.0 / 3.0;

/// RGBA color with components in `0.0..=1.0`, as produced by color-scheme
/// expression evaluation
///
/// The scheme pipeline blends and interpolates in float space; quantization
/// only happens at the very end, in [`Color::to_ansi256`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

/// The same color in hue/lightness/saturation space, used for gradient
/// sampling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hlsa {
    pub h: f64,
    pub l: f64,
    pub s: f64,
    pub a: f64,
}

impl Color {
    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Color {
        Color { r, g, b, a }
    }

    pub fn to_hlsa(self) -> Hlsa {
        let (h, l, s) = rgb_to_hls(self.r, self.g, self.b);
        Hlsa { h, l, s, a: self.a }
    }

    pub fn from_hlsa(hlsa: Hlsa) -> Color {
        let (r, g, b) = hls_to_rgb(hlsa.h, hlsa.l, hlsa.s);
        Color { r, g, b, a: hlsa.a }
    }

    /// Nearest entry of the xterm 256-color palette: the 24-step gray ramp for
    /// achromatic colors, the 6x6x6 cube otherwise. Alpha is ignored.
    pub fn to_ansi256(self) -> u8 {
        rgb255_to_ansi256(
            (self.r * 255.0).round() as u8,
            (self.g * 255.0).round() as u8,
            (self.b * 255.0).round() as u8,
        )
    }
}

pub fn rgb255_to_ansi256(r: u8, g: u8, b: u8) -> u8 {
    if r == g && g == b {
        if r < 8 {
            return 16;
        }
        if r > 248 {
            return 231;
        }
        return ((f64::from(r) - 8.0) / 247.0 * 24.0).round() as u8 + 232;
    }
    16 + 36 * cube_step(r) + 6 * cube_step(g) + cube_step(b)
}

fn cube_step(c: u8) -> u8 {
    (f64::from(c) / 255.0 * 5.0).round() as u8
}

/// RGB (all `0..=1`) to hue/lightness/saturation
pub fn rgb_to_hls(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let maxc = r.max(g).max(b);
    let minc = r.min(g).min(b);
    let sumc = maxc + minc;
    let rangec = maxc - minc;
    let l = sumc / 2.0;
    if minc == maxc {
        return (0.0, l, 0.0);
    }
    let s = if l <= 0.5 {
        rangec / sumc
    } else {
        rangec / (2.0 - sumc)
    };
    let rc = (maxc - r) / rangec;
    let gc = (maxc - g) / rangec;
    let bc = (maxc - b) / rangec;
    let h = if r == maxc {
        bc - gc
    } else if g == maxc {
        2.0 + rc - bc
    } else {
        4.0 + gc - rc
    };
    ((h / 6.0).rem_euclid(1.0), l, s)
}

/// Hue/lightness/saturation back to RGB
pub fn hls_to_rgb(h: f64, l: f64, s: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        return (l, l, l);
    }
    let m2 = if l <= 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let m1 = 2.0 * l - m2;
    (
        hls_component(m1, m2, h + ONE_THIRD),
        hls_component(m1, m2, h),
        hls_component(m1, m2, h - ONE_THIRD),
    )
}

fn hls_component(m1: f64, m2: f64, hue: f64) -> f64 {
    let hue = hue.rem_euclid(1.0);
    if hue < ONE_SIXTH {
        m1 + (m2 - m1) * hue * 6.0
    } else if hue < 0.5 {
        m2
    } else if hue < TWO_THIRD {
        m1 + (m2 - m1) * (TWO_THIRD - hue) * 6.0
    } else {
        m1
    }
}

/// Linear interpolation in HLSA space. The hue leg always travels "upward"
/// around the circle, wrapping at 1.0, which keeps gradients from washing
/// through gray on the long way around.
pub fn hlsa_lerp(c0: Hlsa, c1: Hlsa, t: f64) -> Hlsa {
    let invt = 1.0 - t;
    let h1 = if c1.h > c0.h { c1.h } else { 1.0 + c1.h };
    Hlsa {
        h: (c0.h * invt + h1 * t).rem_euclid(1.0),
        l: c0.l * invt + c1.l * t,
        s: c0.s * invt + c1.s * t,
        a: c0.a * invt + c1.a * t,
    }
}

/// The SGR sequence selecting a foreground and background from the 256-color
/// palette
pub fn sgr_pair(fg: u8, bg: u8) -> String {
    format!("\x1b[38;5;{}m\x1b[48;5;{}m", fg, bg)
}

/// Resets all SGR attributes
pub const SGR_RESET: &str = "\x1b[0m";
