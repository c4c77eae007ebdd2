//! Resolving a scope stack (plus the token under it) to terminal colors.

use std::hash::Hasher;

use fnv::{FnvHashMap, FnvHasher};
use log::trace;

use super::color::{hlsa_lerp, Color};
use super::scheme::{ColorScheme, Foreground, StyleRule};
use crate::parsing::Scope;

/// A wrapper around a [`ColorScheme`] that resolves scope stacks to
/// `(foreground, background)` ANSI-256 pairs and caches the results.
///
/// The cache is keyed by a hash of the flattened stack atoms plus the token
/// text; the engine asks for the same stacks over and over, so this is the
/// hottest lookup in the whole pipeline. Like the reference palette math, a
/// gradient foreground samples by a stable hash of the token, which keeps the
/// resolution deterministic (and the cache correct).
///
/// [`ColorScheme`]: struct.ColorScheme.html
#[derive(Debug)]
pub struct Highlighter {
    scheme: ColorScheme,
    cache: FnvHashMap<u64, (u8, u8)>,
}

impl Highlighter {
    pub fn new(scheme: ColorScheme) -> Highlighter {
        Highlighter {
            scheme,
            cache: FnvHashMap::default(),
        }
    }

    pub fn scheme(&self) -> &ColorScheme {
        &self.scheme
    }

    /// The colors for `token` under the scope stack, falling back to the
    /// scheme globals when no rule matches.
    ///
    /// `token` is `None` when the caller is styling a scope boundary rather
    /// than a piece of text; only gradient sampling can tell the difference.
    pub fn token_color(&mut self, stack: &[Scope], token: Option<&str>) -> (u8, u8) {
        let key = cache_key(stack, token);
        if let Some(&cached) = self.cache.get(&key) {
            trace!("token_color: token: {:?} cached: {:?}", token, cached);
            return cached;
        }

        let mut best: Option<&StyleRule> = None;
        let mut best_score = 0;
        for rule in &self.scheme.rules {
            let score = rule.selector.score(stack);
            // strictly greater keeps the first of equally-scored rules
            if score > 0 && score > best_score {
                best = Some(rule);
                best_score = score;
            }
        }

        let entry = match best {
            Some(rule) => {
                trace!(
                    "token_color: token: {:?} best score: {} gradient: {}",
                    token,
                    best_score,
                    matches!(rule.foreground, Some(Foreground::Gradient(_)))
                );
                let foreground = match &rule.foreground {
                    None => self.scheme.globals.foreground,
                    Some(Foreground::Solid(color)) => *color,
                    Some(Foreground::Gradient(stops)) => sample_gradient(stops, token),
                };
                let background = rule.background.unwrap_or(self.scheme.globals.background);
                (foreground.to_ansi256(), background.to_ansi256())
            }
            None => {
                trace!("token_color: no matching rule for token: {:?}", token);
                (
                    self.scheme.globals.foreground.to_ansi256(),
                    self.scheme.globals.background.to_ansi256(),
                )
            }
        };
        self.cache.insert(key, entry);
        entry
    }
}

/// Pick a gradient stop pair by hashing the token, and lerp between the two
/// in HLSA space.
fn sample_gradient(stops: &[Color], token: Option<&str>) -> Color {
    let color_t = match token {
        Some(token) if !token.is_empty() => (str_hash(token) % 255) as f64 / 255.0,
        _ => 0.0,
    };
    let samp_t = color_t * (stops.len() - 1) as f64;
    let c0 = stops[samp_t.floor() as usize].to_hlsa();
    let c1 = stops[samp_t.ceil() as usize].to_hlsa();
    Color::from_hlsa(hlsa_lerp(c0, c1, color_t))
}

fn str_hash(s: &str) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(s.as_bytes());
    hasher.finish()
}

fn cache_key(stack: &[Scope], token: Option<&str>) -> u64 {
    let mut hasher = FnvHasher::default();
    for scope in stack {
        for &atom in scope.atoms() {
            hasher.write_u16(atom);
        }
    }
    match token {
        Some(token) => {
            hasher.write_u8(1);
            hasher.write(token.as_bytes());
        }
        None => hasher.write_u8(0),
    }
    hasher.finish()
}
