//! Welcome to the synterm docs.
//!
//! synterm colors text on a terminal by interpreting Sublime Text
//! `.sublime-syntax` definitions and `.sublime-color-scheme` themes. Text goes
//! in line by line, and the same text comes out interleaved with ANSI SGR
//! escape sequences.
//!
//! Everything is divided up into the [`parsing`] module for loading syntax
//! definitions and representing scopes, the [`highlighting`] module for color
//! schemes and turning scope stacks into terminal colors, and the
//! [`interpreter`] module which runs the actual context-stack machine over the
//! input and writes the colored stream.
//!
//! A good place to start is [`interpreter::SyntaxHighlighter`] and the source
//! of the `synterm` binary in `main.rs`, which shows how the parts plug
//! together.

#[macro_use]
extern crate lazy_static;

pub mod highlighting;
pub mod interpreter;
pub mod parsing;

use std::error::Error;
use std::fmt;
use std::io::Error as IoError;

use crate::highlighting::ParseSchemeError;
use crate::parsing::ParseSyntaxError;

/// Common error type used by syntax and color-scheme loading
#[derive(Debug)]
pub enum LoadingError {
    /// error finding all the files in a directory
    WalkDir(walkdir::Error),
    /// error reading a file
    Io(IoError),
    /// a syntax file was invalid in some way
    ParseSyntax(ParseSyntaxError, Option<String>),
    /// a color scheme file was invalid in some way
    ParseScheme(ParseSchemeError, Option<String>),
    /// a syntax was not found under the syntax directory
    SyntaxNotFound(String),
    /// no syntax file in the directory declares the given top-level scope
    ScopeNotFound(String),
    /// a chain of `extends` parents loops back on itself
    ExtendsCycle(String),
    /// A path given to a method was invalid.
    /// Possibly because it didn't reference a file or wasn't UTF-8.
    BadPath,
}

impl From<IoError> for LoadingError {
    fn from(error: IoError) -> LoadingError {
        LoadingError::Io(error)
    }
}

impl From<walkdir::Error> for LoadingError {
    fn from(error: walkdir::Error) -> LoadingError {
        LoadingError::WalkDir(error)
    }
}

impl From<ParseSyntaxError> for LoadingError {
    fn from(error: ParseSyntaxError) -> LoadingError {
        LoadingError::ParseSyntax(error, None)
    }
}

impl From<ParseSchemeError> for LoadingError {
    fn from(error: ParseSchemeError) -> LoadingError {
        LoadingError::ParseScheme(error, None)
    }
}

impl fmt::Display for LoadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use crate::LoadingError::*;

        match *self {
            WalkDir(ref error) => error.fmt(f),
            Io(ref error) => error.fmt(f),
            ParseSyntax(ref error, ref filename) => {
                if let Some(ref file) = filename {
                    write!(f, "{}: {}", file, error)
                } else {
                    error.fmt(f)
                }
            }
            ParseScheme(ref error, ref filename) => {
                if let Some(ref file) = filename {
                    write!(f, "{}: {}", file, error)
                } else {
                    error.fmt(f)
                }
            }
            SyntaxNotFound(ref name) => {
                write!(f, "No syntax file found for '{}', are you missing a syntax file?", name)
            }
            ScopeNotFound(ref scope) => {
                write!(f, "No syntax file declares the scope '{}'", scope)
            }
            ExtendsCycle(ref name) => {
                write!(f, "Cycle in 'extends' chain involving '{}'", name)
            }
            BadPath => write!(f, "Invalid path"),
        }
    }
}

impl Error for LoadingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        use crate::LoadingError::*;

        match *self {
            WalkDir(ref error) => Some(error),
            Io(ref error) => Some(error),
            ParseSyntax(ref error, _) => Some(error),
            ParseScheme(ref error, _) => Some(error),
            _ => None,
        }
    }
}
