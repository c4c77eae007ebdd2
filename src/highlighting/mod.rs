//! Everything having to do with turning scope stacks into terminal colors.
//!
//! You might want to check out [`ColorScheme`] for the style rules loaded from
//! a `.sublime-color-scheme` file, [`Selector`] for how rules address scope
//! stacks, and [`Highlighter`] for resolving a stack to a pair of ANSI-256
//! color indices.
//!
//! [`ColorScheme`]: struct.ColorScheme.html
//! [`Selector`]: enum.Selector.html
//! [`Highlighter`]: struct.Highlighter.html
mod color;
mod highlighter;
mod scheme;
mod scheme_load;
mod selector;

pub use self::color::*;
pub use self::highlighter::*;
pub use self::scheme::*;
pub use self::scheme_load::*;
pub use self::selector::*;
