use std::{
    error::Error,
    fmt::Display,
    io::{Error as IoError, ErrorKind},
};

use synterm::{
    highlighting::ParseSchemeError,
    parsing::{ParseSyntaxError, PatternError},
    LoadingError,
};

#[test]
fn loading_error_bad_path_display() {
    assert_display(LoadingError::BadPath, "Invalid path");
}

#[test]
fn loading_error_parse_syntax_display() {
    assert_display(
        LoadingError::ParseSyntax(
            ParseSyntaxError::MissingMandatoryKey("scope"),
            Some(String::from("file.sublime-syntax")),
        ),
        "file.sublime-syntax: Missing mandatory key in YAML file: scope",
    );
}

#[test]
fn loading_error_syntax_not_found_display() {
    assert_display(
        LoadingError::SyntaxNotFound(String::from("Rusty")),
        "No syntax file found for 'Rusty', are you missing a syntax file?",
    );
}

#[test]
fn loading_error_io_source() {
    let io_error_source = IoError::new(ErrorKind::Other, "this is an error string");
    assert_display(
        LoadingError::Io(io_error_source).source().unwrap(),
        "this is an error string",
    );
}

#[test]
fn parse_syntax_error_embed_without_escape_display() {
    assert_display(
        ParseSyntaxError::EmbedWithoutEscape,
        "'embed' requires an 'escape' pattern",
    );
}

#[test]
fn pattern_error_reports_pattern_and_reason() {
    let error = PatternError {
        pattern: String::from("{{ident}}+"),
        message: String::from("variable 'ident' not found"),
    };
    assert_display(
        &error,
        "error compiling pattern '{{ident}}+': variable 'ident' not found",
    );
}

#[test]
fn parse_scheme_error_missing_global_display() {
    assert_display(
        ParseSchemeError::MissingGlobal("foreground"),
        "'globals' must define 'foreground'",
    );
}

#[test]
fn parse_scheme_error_unknown_variable_display() {
    assert_display(
        ParseSchemeError::UnknownVariable(String::from("bluish")),
        "unknown variable 'bluish' in color expression",
    );
}

/// Helper to assert that a given implementation of [Display] generates the
/// expected string.
fn assert_display(display: impl Display, expected_display: &str) {
    assert_eq!(format!("{}", display), String::from(expected_display));
}
