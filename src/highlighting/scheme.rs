//! The in-memory form of a `.sublime-color-scheme` file, after variable and
//! color-expression evaluation.

use super::color::Color;
use super::selector::Selector;

/// A color scheme: global defaults plus an ordered list of scoped rules.
///
/// Rule order matters: when two rules score the same against a scope stack,
/// the one listed first wins.
#[derive(Debug, Clone)]
pub struct ColorScheme {
    pub name: String,
    pub globals: SchemeGlobals,
    pub rules: Vec<StyleRule>,
}

/// The globals every scheme must provide. Editors use many more keys
/// (`caret`, `selection`, ...); a terminal stream only ever needs these two.
#[derive(Debug, Clone, Copy)]
pub struct SchemeGlobals {
    pub foreground: Color,
    pub background: Color,
}

/// One styling rule
#[derive(Debug, Clone)]
pub struct StyleRule {
    pub selector: Selector,
    pub foreground: Option<Foreground>,
    pub background: Option<Color>,
}

/// A rule foreground is either one color or a gradient to sample per token
#[derive(Debug, Clone)]
pub enum Foreground {
    Solid(Color),
    Gradient(Vec<Color>),
}
