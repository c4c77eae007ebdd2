//! Loading `.sublime-color-scheme` files.
//!
//! Schemes come in two shapes: real YAML, and JSON with `//` line comments
//! (which YAML can parse once the comments are rewritten). Color values are
//! CSS-ish expressions: literals like `#ff8800` or `hsl(210, 50%, 40%)`, and
//! the function forms `var(name)` and `color(base modifier...)`.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use walkdir::WalkDir;
use yaml_rust::yaml::Hash;
use yaml_rust::{ScanError, Yaml, YamlLoader};

use super::color::{hls_to_rgb, rgb_to_hls, Color};
use super::scheme::*;
use super::selector::{Selector, SelectorError};
use crate::LoadingError;

pub const SCHEME_FILE_EXT: &str = "sublime-color-scheme";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ParseSchemeError {
    /// Invalid YAML file syntax, even after the `//` comment rewrite
    #[error("Invalid YAML file syntax: {0}")]
    InvalidYaml(#[from] ScanError),
    /// The file must contain at least one YAML document
    #[error("The file must contain at least one YAML document")]
    EmptyFile,
    /// Some part of the file is the wrong type (e.g a string but should be a list)
    #[error("Type mismatch")]
    TypeMismatch,
    #[error("Missing mandatory key: {0}")]
    MissingMandatoryKey(&'static str),
    /// A terminal stream always needs a default foreground and background
    #[error("'globals' must define '{0}'")]
    MissingGlobal(&'static str),
    #[error("invalid color expression '{0}'")]
    InvalidColor(String),
    #[error("unknown function '{0}' in color expression")]
    UnknownFunction(String),
    #[error("expecting arguments in function '{0}'")]
    ExpectedArgs(String),
    #[error("unknown variable '{0}' in color expression")]
    UnknownVariable(String),
    #[error("a gradient needs at least one color stop")]
    EmptyGradient,
    #[error("invalid rule selector: {0}")]
    Selector(#[from] SelectorError),
}

fn get_key<'a, R, F: FnOnce(&'a Yaml) -> Option<R>>(
    map: &'a Hash,
    key: &'static str,
    f: F,
) -> Result<R, ParseSchemeError> {
    map.get(&Yaml::String(key.to_owned()))
        .ok_or(ParseSchemeError::MissingMandatoryKey(key))
        .and_then(|x| f(x).ok_or(ParseSchemeError::TypeMismatch))
}

impl ColorScheme {
    /// Parse a color scheme from the text of a `.sublime-color-scheme` file.
    pub fn load_from_str(s: &str) -> Result<ColorScheme, ParseSchemeError> {
        let docs = match YamlLoader::load_from_str(s) {
            Ok(docs) => docs,
            // probably JSON with // comments; those become YAML comments
            Err(_) => YamlLoader::load_from_str(&strip_line_comments(s))?,
        };
        if docs.is_empty() {
            return Err(ParseSchemeError::EmptyFile);
        }
        ColorScheme::parse_top_level(&docs[0])
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<ColorScheme, LoadingError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        ColorScheme::load_from_str(&text)
            .map_err(|e| LoadingError::ParseScheme(e, Some(path.display().to_string())))
    }

    fn parse_top_level(doc: &Yaml) -> Result<ColorScheme, ParseSchemeError> {
        let h = doc.as_hash().ok_or(ParseSchemeError::TypeMismatch)?;

        // variables are evaluated in file order and may reference the ones
        // defined above them through var()
        let mut variables: HashMap<String, Color> = HashMap::new();
        if let Ok(map) = get_key(h, "variables", |x| x.as_hash()) {
            for (key, value) in map.iter() {
                if let (Some(key_str), Some(val_str)) = (key.as_str(), value.as_str()) {
                    let color = eval_color_expr(&variables, val_str)?;
                    variables.insert(key_str.to_owned(), color);
                }
            }
        }

        let globals_hash = get_key(h, "globals", |x| x.as_hash())?;
        let globals = SchemeGlobals {
            foreground: eval_global(&variables, globals_hash, "foreground")?,
            background: eval_global(&variables, globals_hash, "background")?,
        };

        let mut rules = Vec::new();
        for rule in get_key(h, "rules", |x| x.as_vec())?.iter() {
            let rule = rule.as_hash().ok_or(ParseSchemeError::TypeMismatch)?;
            let selector = Selector::from_str(get_key(rule, "scope", |x| x.as_str())?)?;

            let foreground = match rule.get(&Yaml::String("foreground".to_owned())) {
                None => None,
                Some(Yaml::Array(stops)) => {
                    if stops.is_empty() {
                        return Err(ParseSchemeError::EmptyGradient);
                    }
                    let colors = stops
                        .iter()
                        .map(|y| {
                            y.as_str()
                                .ok_or(ParseSchemeError::TypeMismatch)
                                .and_then(|s| eval_color_expr(&variables, s))
                        })
                        .collect::<Result<Vec<Color>, ParseSchemeError>>()?;
                    Some(Foreground::Gradient(colors))
                }
                Some(y) => {
                    let s = y.as_str().ok_or(ParseSchemeError::TypeMismatch)?;
                    Some(Foreground::Solid(eval_color_expr(&variables, s)?))
                }
            };

            let background = get_key(rule, "background", |x| x.as_str())
                .ok()
                .map(|s| eval_color_expr(&variables, s))
                .transpose()?;

            rules.push(StyleRule {
                selector,
                foreground,
                background,
            });
        }

        Ok(ColorScheme {
            name: get_key(h, "name", |x| x.as_str()).unwrap_or("Unnamed").to_owned(),
            globals,
            rules,
        })
    }
}

fn eval_global(
    variables: &HashMap<String, Color>,
    globals: &Hash,
    key: &'static str,
) -> Result<Color, ParseSchemeError> {
    let expr = get_key(globals, key, |x| x.as_str()).map_err(|_| ParseSchemeError::MissingGlobal(key))?;
    eval_color_expr(variables, expr)
}

/// The stems of all color schemes available in a directory.
pub fn scheme_names<P: AsRef<Path>>(dir: P) -> Result<Vec<String>, LoadingError> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir.as_ref()).max_depth(1).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(SCHEME_FILE_EXT) {
            if let Some(stem) = path.file_stem().and_then(|x| x.to_str()) {
                if !stem.starts_with('.') {
                    names.push(stem.to_owned());
                }
            }
        }
    }
    Ok(names)
}

/// Rewrite `//` line comments to `#` so YAML accepts JSON-ish scheme files.
/// Double-quoted strings are left alone; quote tracking is deliberately as
/// naive as the format (no escape handling).
fn strip_line_comments(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_string = false;
    let mut chars = content.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_string = !in_string;
                out.push(c);
            }
            '/' if !in_string && chars.peek() == Some(&'/') => {
                chars.next();
                out.push('#');
            }
            _ => out.push(c),
        }
    }
    out
}

/// A parsed piece of a color expression: a bare value, or `name(args...)`.
#[derive(Debug, Clone, PartialEq)]
enum Component {
    Value(String),
    Function(String, Vec<Component>),
}

/// Evaluate one color expression: a CSS literal, or a component list whose
/// first function form (`var`, `color`) produces the color.
pub(crate) fn eval_color_expr(
    variables: &HashMap<String, Color>,
    expr: &str,
) -> Result<Color, ParseSchemeError> {
    if let Some(color) = parse_css_color(expr.trim()) {
        return Ok(color);
    }
    let mut pos = 0;
    let components = parse_component_list(expr, &mut pos, false)?;
    for component in &components {
        if let Component::Function(name, args) = component {
            return eval_func(variables, name, args);
        }
    }
    Err(ParseSchemeError::InvalidColor(expr.to_owned()))
}

fn eval_func(
    variables: &HashMap<String, Color>,
    name: &str,
    args: &[Component],
) -> Result<Color, ParseSchemeError> {
    if args.is_empty() {
        return Err(ParseSchemeError::ExpectedArgs(name.to_owned()));
    }
    match name {
        "var" => match &args[0] {
            Component::Value(var_name) => variables
                .get(var_name)
                .copied()
                .ok_or_else(|| ParseSchemeError::UnknownVariable(var_name.clone())),
            Component::Function(..) => Err(ParseSchemeError::TypeMismatch),
        },
        "color" => {
            let mut color = eval_component(variables, &args[0])?;
            for modifier in &args[1..] {
                let (mod_name, mod_args) = match modifier {
                    Component::Function(n, a) => (n.as_str(), a),
                    // bare values between modifiers are ignored
                    Component::Value(_) => continue,
                };
                if mod_args.is_empty() {
                    return Err(ParseSchemeError::ExpectedArgs(mod_name.to_owned()));
                }
                match mod_name {
                    "alpha" | "a" => {
                        color.a = number_arg(&mod_args[0])?;
                    }
                    "saturation" | "s" => {
                        let (h, l, _) = rgb_to_hls(color.r, color.g, color.b);
                        let (r, g, b) = hls_to_rgb(h, l, number_arg(&mod_args[0])?);
                        color = Color { r, g, b, a: color.a };
                    }
                    "lightness" | "l" => {
                        let (h, _, s) = rgb_to_hls(color.r, color.g, color.b);
                        let (r, g, b) = hls_to_rgb(h, number_arg(&mod_args[0])?, s);
                        color = Color { r, g, b, a: color.a };
                    }
                    "blend" | "blenda" => {
                        if mod_args.len() < 2 {
                            return Err(ParseSchemeError::ExpectedArgs(mod_name.to_owned()));
                        }
                        let other = eval_component(variables, &mod_args[0])?;
                        let t = number_arg(&mod_args[1])? / 100.0;
                        let invt = 1.0 - t;
                        color = Color {
                            r: color.r * invt + other.r * t,
                            g: color.g * invt + other.g * t,
                            b: color.b * invt + other.b * t,
                            a: if mod_name == "blenda" {
                                color.a * invt + other.a * t
                            } else {
                                color.a
                            },
                        };
                    }
                    // accepted and ignored, terminals have no contrast pass
                    "min-contrast" => {}
                    _ => return Err(ParseSchemeError::UnknownFunction(mod_name.to_owned())),
                }
            }
            Ok(color)
        }
        _ => Err(ParseSchemeError::UnknownFunction(name.to_owned())),
    }
}

fn eval_component(
    variables: &HashMap<String, Color>,
    component: &Component,
) -> Result<Color, ParseSchemeError> {
    match component {
        Component::Function(name, args) => eval_func(variables, name, args),
        Component::Value(v) => {
            parse_css_color(v).ok_or_else(|| ParseSchemeError::InvalidColor(v.clone()))
        }
    }
}

fn number_arg(component: &Component) -> Result<f64, ParseSchemeError> {
    match component {
        Component::Value(v) => v
            .trim_end_matches('%')
            .parse::<f64>()
            .map_err(|_| ParseSchemeError::InvalidColor(v.clone())),
        Component::Function(..) => Err(ParseSchemeError::TypeMismatch),
    }
}

fn parse_component_list(
    s: &str,
    pos: &mut usize,
    nested: bool,
) -> Result<Vec<Component>, ParseSchemeError> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut token_start: Option<usize> = None;

    macro_rules! flush {
        () => {
            if let Some(start) = token_start.take() {
                out.push(Component::Value(s[start..*pos].to_owned()));
            }
        };
    }

    while *pos < s.len() {
        match bytes[*pos] {
            b'(' => {
                let name = match token_start.take() {
                    Some(start) => s[start..*pos].to_owned(),
                    None => String::new(),
                };
                *pos += 1;
                let args = parse_component_list(s, pos, true)?;
                out.push(Component::Function(name, args));
            }
            b')' => {
                flush!();
                if nested {
                    *pos += 1;
                    return Ok(out);
                }
                return Err(ParseSchemeError::InvalidColor(s.to_owned()));
            }
            b' ' | b'\t' | b',' => {
                flush!();
                *pos += 1;
            }
            _ => {
                if token_start.is_none() {
                    token_start = Some(*pos);
                }
                *pos += 1;
            }
        }
    }
    flush!();
    if nested {
        return Err(ParseSchemeError::InvalidColor(s.to_owned()));
    }
    Ok(out)
}

/// Parse a CSS color literal: hex in all four lengths, `rgb()`/`rgba()`,
/// `hsl()`/`hsla()`, and the common named colors. Returns `None` when the
/// string is not a color literal.
pub(crate) fn parse_css_color(s: &str) -> Option<Color> {
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex_color(hex);
    }

    let lower = s.to_ascii_lowercase();
    for (prefix, has_alpha) in [("rgba(", true), ("rgb(", false)] {
        if let Some(inner) = lower.strip_prefix(prefix).and_then(|r| r.strip_suffix(')')) {
            return parse_rgb_args(inner, has_alpha);
        }
    }
    for (prefix, has_alpha) in [("hsla(", true), ("hsl(", false)] {
        if let Some(inner) = lower.strip_prefix(prefix).and_then(|r| r.strip_suffix(')')) {
            return parse_hsl_args(inner, has_alpha);
        }
    }

    named_color(&lower)
}

fn parse_hex_color(hex: &str) -> Option<Color> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok();
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let (r, g, b, a) = match hex.len() {
        3 => (nibble(0)? * 17, nibble(1)? * 17, nibble(2)? * 17, 255),
        4 => (nibble(0)? * 17, nibble(1)? * 17, nibble(2)? * 17, nibble(3)? * 17),
        6 => (byte(0)?, byte(2)?, byte(4)?, 255),
        8 => (byte(0)?, byte(2)?, byte(4)?, byte(6)?),
        _ => return None,
    };
    Some(Color {
        r: f64::from(r) / 255.0,
        g: f64::from(g) / 255.0,
        b: f64::from(b) / 255.0,
        a: f64::from(a) / 255.0,
    })
}

fn split_args(inner: &str) -> Vec<&str> {
    inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_rgb_args(inner: &str, has_alpha: bool) -> Option<Color> {
    let parts = split_args(inner);
    if parts.len() != if has_alpha { 4 } else { 3 } {
        return None;
    }
    let channel = |p: &str| -> Option<f64> {
        if let Some(pct) = p.strip_suffix('%') {
            Some(pct.parse::<f64>().ok()? / 100.0)
        } else {
            Some(p.parse::<f64>().ok()? / 255.0)
        }
    };
    Some(Color {
        r: channel(parts[0])?,
        g: channel(parts[1])?,
        b: channel(parts[2])?,
        a: if has_alpha { parse_alpha(parts[3])? } else { 1.0 },
    })
}

fn parse_hsl_args(inner: &str, has_alpha: bool) -> Option<Color> {
    let parts = split_args(inner);
    if parts.len() != if has_alpha { 4 } else { 3 } {
        return None;
    }
    let h = (parts[0].parse::<f64>().ok()? / 360.0).rem_euclid(1.0);
    let s = parts[1].strip_suffix('%')?.parse::<f64>().ok()? / 100.0;
    let l = parts[2].strip_suffix('%')?.parse::<f64>().ok()? / 100.0;
    let (r, g, b) = hls_to_rgb(h, l, s);
    Some(Color {
        r,
        g,
        b,
        a: if has_alpha { parse_alpha(parts[3])? } else { 1.0 },
    })
}

fn parse_alpha(p: &str) -> Option<f64> {
    if let Some(pct) = p.strip_suffix('%') {
        Some(pct.parse::<f64>().ok()? / 100.0)
    } else {
        p.parse::<f64>().ok()
    }
}

fn named_color(name: &str) -> Option<Color> {
    let (r, g, b, a): (u8, u8, u8, u8) = match name {
        "transparent" => (0, 0, 0, 0),
        "black" => (0, 0, 0, 255),
        "silver" => (192, 192, 192, 255),
        "gray" | "grey" => (128, 128, 128, 255),
        "white" => (255, 255, 255, 255),
        "maroon" => (128, 0, 0, 255),
        "red" => (255, 0, 0, 255),
        "purple" => (128, 0, 128, 255),
        "fuchsia" | "magenta" => (255, 0, 255, 255),
        "green" => (0, 128, 0, 255),
        "lime" => (0, 255, 0, 255),
        "olive" => (128, 128, 0, 255),
        "yellow" => (255, 255, 0, 255),
        "navy" => (0, 0, 128, 255),
        "blue" => (0, 0, 255, 255),
        "teal" => (0, 128, 128, 255),
        "aqua" | "cyan" => (0, 255, 255, 255),
        "orange" => (255, 165, 0, 255),
        "brown" => (165, 42, 42, 255),
        "coral" => (255, 127, 80, 255),
        "crimson" => (220, 20, 60, 255),
        "gold" => (255, 215, 0, 255),
        "goldenrod" => (218, 165, 32, 255),
        "hotpink" => (255, 105, 180, 255),
        "indigo" => (75, 0, 130, 255),
        "ivory" => (255, 255, 240, 255),
        "khaki" => (240, 230, 140, 255),
        "lavender" => (230, 230, 250, 255),
        "orchid" => (218, 112, 214, 255),
        "pink" => (255, 192, 203, 255),
        "plum" => (221, 160, 221, 255),
        "salmon" => (250, 128, 114, 255),
        "sienna" => (160, 82, 45, 255),
        "skyblue" => (135, 206, 235, 255),
        "slategray" | "slategrey" => (112, 128, 144, 255),
        "tan" => (210, 180, 140, 255),
        "tomato" => (255, 99, 71, 255),
        "turquoise" => (64, 224, 208, 255),
        "violet" => (238, 130, 238, 255),
        "wheat" => (245, 222, 179, 255),
        "beige" => (245, 245, 220, 255),
        "azure" => (240, 255, 255, 255),
        "chocolate" => (210, 105, 30, 255),
        "dimgray" | "dimgrey" => (105, 105, 105, 255),
        "lightgray" | "lightgrey" => (211, 211, 211, 255),
        "darkgray" | "darkgrey" => (169, 169, 169, 255),
        _ => return None,
    };
    Some(Color {
        r: f64::from(r) / 255.0,
        g: f64::from(g) / 255.0,
        b: f64::from(b) / 255.0,
        a: f64::from(a) / 255.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_eq(a: Color, b: Color) -> bool {
        (a.r - b.r).abs() < 1e-9
            && (a.g - b.g).abs() < 1e-9
            && (a.b - b.b).abs() < 1e-9
            && (a.a - b.a).abs() < 1e-9
    }

    #[test]
    fn parses_css_literals() {
        assert!(color_eq(
            parse_css_color("#f00").unwrap(),
            Color::new(1.0, 0.0, 0.0, 1.0)
        ));
        assert!(color_eq(
            parse_css_color("#ff000080").unwrap(),
            Color::new(1.0, 0.0, 0.0, 128.0 / 255.0)
        ));
        assert!(color_eq(
            parse_css_color("rgb(255, 0, 0)").unwrap(),
            Color::new(1.0, 0.0, 0.0, 1.0)
        ));
        assert!(color_eq(
            parse_css_color("rgba(0, 255, 0, 0.5)").unwrap(),
            Color::new(0.0, 1.0, 0.0, 0.5)
        ));
        assert!(color_eq(
            parse_css_color("hsl(0, 100%, 50%)").unwrap(),
            Color::new(1.0, 0.0, 0.0, 1.0)
        ));
        assert!(color_eq(
            parse_css_color("white").unwrap(),
            Color::new(1.0, 1.0, 1.0, 1.0)
        ));
        assert!(parse_css_color("var(x)").is_none());
        assert!(parse_css_color("#xyz").is_none());
    }

    #[test]
    fn evaluates_var_and_color_functions() {
        let mut vars = HashMap::new();
        vars.insert("accent".to_owned(), Color::new(1.0, 0.0, 0.0, 1.0));

        let v = eval_color_expr(&vars, "var(accent)").unwrap();
        assert!(color_eq(v, Color::new(1.0, 0.0, 0.0, 1.0)));

        let faded = eval_color_expr(&vars, "color(var(accent) alpha(0.25))").unwrap();
        assert!(color_eq(faded, Color::new(1.0, 0.0, 0.0, 0.25)));

        let blended = eval_color_expr(&vars, "color(#000000 blend(white 50%))").unwrap();
        assert!(color_eq(blended, Color::new(0.5, 0.5, 0.5, 1.0)));

        let desaturated = eval_color_expr(&vars, "color(var(accent) s(0.0))").unwrap();
        assert!(color_eq(desaturated, Color::new(0.5, 0.5, 0.5, 1.0)));

        let contrast = eval_color_expr(&vars, "color(var(accent) min-contrast(#fff 3))").unwrap();
        assert!(color_eq(contrast, Color::new(1.0, 0.0, 0.0, 1.0)));
    }

    #[test]
    fn unknown_names_are_reported() {
        let vars = HashMap::new();
        assert!(matches!(
            eval_color_expr(&vars, "var(missing)"),
            Err(ParseSchemeError::UnknownVariable(v)) if v == "missing"
        ));
        assert!(matches!(
            eval_color_expr(&vars, "gradient(#fff)"),
            Err(ParseSchemeError::UnknownFunction(n)) if n == "gradient"
        ));
        assert!(matches!(
            eval_color_expr(&vars, "not-a-color"),
            Err(ParseSchemeError::InvalidColor(_))
        ));
    }

    #[test]
    fn loads_yaml_scheme() {
        let scheme = ColorScheme::load_from_str(
            "
name: Test
variables:
  red: '#ff0000'
globals:
  foreground: '#c0c0c0'
  background: '#101010'
rules:
  - scope: keyword
    foreground: var(red)
  - scope: string
    foreground: ['#ff0000', '#0000ff']
    background: black
",
        )
        .unwrap();
        assert_eq!(scheme.name, "Test");
        assert_eq!(scheme.rules.len(), 2);
        assert!(matches!(scheme.rules[0].foreground, Some(Foreground::Solid(_))));
        match &scheme.rules[1].foreground {
            Some(Foreground::Gradient(stops)) => assert_eq!(stops.len(), 2),
            other => panic!("expected gradient, got {:?}", other),
        }
        assert!(scheme.rules[1].background.is_some());
    }

    #[test]
    fn loads_json_scheme_with_comments() {
        let scheme = ColorScheme::load_from_str(
            r##"
{
    // the name, with a misleading "//" inside a string below
    "name": "Jsonish",
    "variables": { "u": "https://example.com" // trailing note
    },
    "globals": { "foreground": "#fff", "background": "#000" },
    "rules": [
        { "scope": "comment", "foreground": "#777777" }
    ]
}
"##,
        );
        // the url variable is not a color, so evaluation fails loudly
        assert!(scheme.is_err());

        let scheme = ColorScheme::load_from_str(
            r##"
{
    // a json color scheme
    "name": "Jsonish",
    "globals": { "foreground": "#fff", "background": "#000" },
    "rules": [
        { "scope": "comment", "foreground": "#777777" }
    ]
}
"##,
        )
        .unwrap();
        assert_eq!(scheme.name, "Jsonish");
        assert_eq!(scheme.rules.len(), 1);
    }

    #[test]
    fn missing_globals_are_rejected() {
        let result = ColorScheme::load_from_str(
            "
globals:
  foreground: '#fff'
rules: []
",
        );
        assert!(matches!(result, Err(ParseSchemeError::MissingGlobal("background"))));
    }

    #[test]
    fn empty_gradient_is_rejected() {
        let result = ColorScheme::load_from_str(
            "
globals: {foreground: '#fff', background: '#000'}
rules:
  - scope: keyword
    foreground: []
",
        );
        assert!(matches!(result, Err(ParseSchemeError::EmptyGradient)));
    }
}
