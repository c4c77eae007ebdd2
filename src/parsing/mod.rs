//! Everything about loading syntax definitions and representing scopes.
//!
//! The most important structs here are [`SyntaxSet`] and [`Scope`], check out
//! the docs for those.
//!
//! [`SyntaxSet`]: struct.SyntaxSet.html
//! [`Scope`]: struct.Scope.html

mod regex;
mod scope;
pub mod syntax_definition;
mod syntax_set;
mod yaml_load;

pub use self::regex::*;
pub use self::scope::*;
pub use self::syntax_definition::{Action, Context, ContextTarget, MatchAction, Syntax};
pub use self::syntax_set::*;
pub use self::yaml_load::*;
