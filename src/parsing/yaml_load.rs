use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;

use yaml_rust::yaml::Hash;
use yaml_rust::{ScanError, Yaml, YamlLoader};

use super::regex::Regex;
use super::syntax_definition::*;

lazy_static! {
    static ref BACKREF_REGEX: onig::Regex = onig::Regex::new(r"\\\d").unwrap();
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ParseSyntaxError {
    /// Invalid YAML file syntax, or at least something yaml-rust can't handle
    #[error("Invalid YAML file syntax: {0}")]
    InvalidYaml(#[from] ScanError),
    /// The file must contain at least one YAML document
    #[error("The file must contain at least one YAML document")]
    EmptyFile,
    /// Some keys are required for something to be a valid `.sublime-syntax`
    #[error("Missing mandatory key in YAML file: {0}")]
    MissingMandatoryKey(&'static str),
    /// An `embed` action must come with an `escape` pattern, otherwise there
    /// is no way out of the embedded syntax
    #[error("'embed' requires an 'escape' pattern")]
    EmbedWithoutEscape,
    /// A reference to another file that is invalid
    #[error("Invalid file reference")]
    BadFileRef,
    /// Syntaxes must have a context named "main"
    #[error("Context 'main' is missing")]
    MainMissing,
    /// Some part of the YAML file is the wrong type (e.g a string but should be a list)
    /// Sorry this doesn't give you any way to narrow down where this is.
    /// Maybe use Sublime Text to figure it out.
    #[error("Type mismatch")]
    TypeMismatch,
}

fn get_key<'a, R, F: FnOnce(&'a Yaml) -> Option<R>>(
    map: &'a Hash,
    key: &'static str,
    f: F,
) -> Result<R, ParseSyntaxError> {
    map.get(&Yaml::String(key.to_owned()))
        .ok_or(ParseSyntaxError::MissingMandatoryKey(key))
        .and_then(|x| f(x).ok_or(ParseSyntaxError::TypeMismatch))
}

impl Syntax {
    /// Parse a syntax definition from the YAML text of a `.sublime-syntax`
    /// file. `fallback_name` is used when the file has no `name` key,
    /// usually the file stem.
    ///
    /// `extends` chains are not resolved here, see
    /// [`SyntaxSet`](super::SyntaxSet) for that.
    pub fn load_from_str(s: &str, fallback_name: Option<&str>) -> Result<Syntax, ParseSyntaxError> {
        let docs = YamlLoader::load_from_str(s)?;
        if docs.is_empty() {
            return Err(ParseSyntaxError::EmptyFile);
        }
        Syntax::parse_top_level(&docs[0], fallback_name)
    }

    fn parse_top_level(doc: &Yaml, fallback_name: Option<&str>) -> Result<Syntax, ParseSyntaxError> {
        let h = doc.as_hash().ok_or(ParseSyntaxError::TypeMismatch)?;

        let mut variables = HashMap::new();
        if let Ok(map) = get_key(h, "variables", |x| x.as_hash()) {
            for (key, value) in map.iter() {
                if let (Some(key_str), Some(val_str)) = (key.as_str(), value.as_str()) {
                    variables.insert(key_str.to_owned(), val_str.to_owned());
                }
            }
        }

        let contexts_hash = get_key(h, "contexts", |x| x.as_hash())?;
        let contexts = Syntax::parse_contexts(contexts_hash)?;
        if !contexts.contains_key("main") {
            return Err(ParseSyntaxError::MainMissing);
        }

        let extends = match h.get(&Yaml::String("extends".to_owned())) {
            None => Vec::new(),
            Some(Yaml::String(single)) => vec![file_stem(single)?],
            Some(Yaml::Array(multiple)) => multiple
                .iter()
                .map(|y| {
                    y.as_str()
                        .ok_or(ParseSyntaxError::TypeMismatch)
                        .and_then(file_stem)
                })
                .collect::<Result<Vec<String>, ParseSyntaxError>>()?,
            Some(_) => return Err(ParseSyntaxError::TypeMismatch),
        };

        Ok(Syntax {
            name: get_key(h, "name", |x| x.as_str())
                .unwrap_or_else(|_| fallback_name.unwrap_or("Unnamed"))
                .to_owned(),
            scope: get_key(h, "scope", |x| x.as_str())?.to_owned(),
            file_extensions: get_key(h, "file_extensions", |x| x.as_vec())
                .map(|v| v.iter().filter_map(|y| y.as_str()).map(|x| x.to_owned()).collect())
                .unwrap_or_else(|_| Vec::new()),
            extends,
            variables,
            contexts,
        })
    }

    fn parse_contexts(map: &Hash) -> Result<HashMap<String, Rc<Context>>, ParseSyntaxError> {
        let mut contexts = HashMap::new();
        for (key, value) in map.iter() {
            if let (Some(name), Some(val_vec)) = (key.as_str(), value.as_vec()) {
                let context = Syntax::parse_context(val_vec)?;
                contexts.insert(name.to_owned(), Rc::new(context));
            }
        }
        Ok(contexts)
    }

    fn parse_context(vec: &[Yaml]) -> Result<Context, ParseSyntaxError> {
        let mut context = Context::new();
        for y in vec.iter() {
            let map = y.as_hash().ok_or(ParseSyntaxError::TypeMismatch)?;

            let mut is_special = false;
            if let Ok(x) = get_key(map, "meta_scope", |x| x.as_str()) {
                // first occurrence wins, like the rest of the meta directives
                context.meta_scope.get_or_insert_with(|| x.to_owned());
                is_special = true;
            }
            if let Ok(x) = get_key(map, "meta_content_scope", |x| x.as_str()) {
                context.meta_content_scope.get_or_insert_with(|| x.to_owned());
                is_special = true;
            }
            if let Ok(x) = get_key(map, "meta_include_prototype", |x| x.as_bool()) {
                // any `false` in the body disables prototype splicing
                context.meta_include_prototype &= x;
                is_special = true;
            }
            if let Ok(true) = get_key(map, "clear_scopes", |x| x.as_bool()) {
                context.clear_scopes.get_or_insert(ClearAmount::All);
                is_special = true;
            }
            if let Ok(x) = get_key(map, "clear_scopes", |x| x.as_i64()) {
                context.clear_scopes.get_or_insert(ClearAmount::TopN(x as usize));
                is_special = true;
            }
            if let Ok(x) = get_key(map, "meta_prepend", |x| x.as_bool()) {
                context.meta_prepend |= x;
                is_special = true;
            }
            if let Ok(x) = get_key(map, "meta_append", |x| x.as_bool()) {
                context.meta_append |= x;
                is_special = true;
            }
            if !is_special {
                if let Ok(x) = get_key(map, "include", Some) {
                    let target = Syntax::parse_reference(x)?;
                    context.actions.push(Action::Include(target));
                } else {
                    let action = Syntax::parse_match_action(map)?;
                    context.actions.push(Action::Match(action));
                }
            }
        }
        Ok(context)
    }

    fn parse_reference(y: &Yaml) -> Result<ContextTarget, ParseSyntaxError> {
        if let Some(s) = y.as_str() {
            if let Some(rest) = s.strip_prefix("scope:") {
                let mut parts = rest.splitn(2, '#');
                let scope = parts.next().unwrap_or("").to_owned();
                let sub_context = parts.next().map(|x| x.to_owned());
                Ok(ContextTarget::ByScope { scope, sub_context })
            } else if s.ends_with(".sublime-syntax") {
                Ok(ContextTarget::File { name: file_stem(s)? })
            } else {
                Ok(ContextTarget::Named(s.to_owned()))
            }
        } else if let Some(v) = y.as_vec() {
            let context = Syntax::parse_context(v)?;
            Ok(ContextTarget::Inline(Rc::new(context)))
        } else {
            Err(ParseSyntaxError::TypeMismatch)
        }
    }

    fn parse_match_action(map: &Hash) -> Result<MatchAction, ParseSyntaxError> {
        let raw_regex = get_key(map, "match", |x| x.as_str())?;

        let scope = get_key(map, "scope", |x| x.as_str()).ok().map(|s| s.to_owned());
        let captures = Syntax::parse_captures(map, "captures")?;

        let mut pop = match map.get(&Yaml::String("pop".to_owned())) {
            Some(Yaml::Boolean(b)) => b.then_some(1),
            Some(Yaml::Integer(n)) => Some(*n as usize),
            Some(_) => return Err(ParseSyntaxError::TypeMismatch),
            None => None,
        };

        let mut push = if let Ok(y) = get_key(map, "push", Some) {
            Some(Syntax::parse_pushargs(y)?)
        } else {
            None
        };
        // `set: X` is `pop: 1` followed by `push: X`
        if let Ok(y) = get_key(map, "set", Some) {
            pop = Some(1);
            push = Some(Syntax::parse_pushargs(y)?);
        }

        let branch_point = get_key(map, "branch_point", |x| x.as_str()).ok().map(|s| s.to_owned());
        let branch = get_key(map, "branch", |x| x.as_vec()).ok().map(|v| {
            v.iter()
                .filter_map(|y| y.as_str())
                .map(|s| s.to_owned())
                .collect::<Vec<String>>()
        });
        let fail = get_key(map, "fail", |x| x.as_str()).ok().map(|s| s.to_owned());

        // an embed is a push with an escape hatch
        let embed = if let Ok(y) = get_key(map, "embed", Some) {
            push = Some(Syntax::parse_pushargs(y)?);
            let escape_str = get_key(map, "escape", |x| x.as_str())
                .map_err(|_| ParseSyntaxError::EmbedWithoutEscape)?;
            Some(EmbedDef {
                escape: Rc::new(Regex::new(escape_str.to_owned())),
                escape_has_backrefs: BACKREF_REGEX.find(escape_str).is_some(),
                embed_scope: get_key(map, "embed_scope", |x| x.as_str()).ok().map(|s| s.to_owned()),
                escape_captures: Syntax::parse_captures(map, "escape_captures")?,
            })
        } else {
            None
        };

        let with_prototype = if let Ok(v) = get_key(map, "with_prototype", |x| x.as_vec()) {
            Some(Rc::new(Syntax::parse_context(v)?))
        } else {
            None
        };

        Ok(MatchAction {
            pattern: Regex::new(raw_regex.to_owned()),
            scope,
            captures,
            pop,
            push,
            branch_point,
            branch,
            fail,
            embed,
            with_prototype,
        })
    }

    fn parse_captures(map: &Hash, key: &'static str) -> Result<Option<CaptureMapping>, ParseSyntaxError> {
        if let Ok(map) = get_key(map, key, |x| x.as_hash()) {
            let mut res_map = Vec::new();
            for (key, value) in map.iter() {
                if let (Some(key_int), Some(val_str)) = (key.as_i64(), value.as_str()) {
                    res_map.push((key_int as usize, val_str.to_owned()));
                }
            }
            Ok(Some(res_map))
        } else {
            Ok(None)
        }
    }

    fn parse_pushargs(y: &Yaml) -> Result<Vec<ContextTarget>, ParseSyntaxError> {
        match y {
            // a list with any hash in it is one anonymous context, otherwise
            // it is a multi-push of references (which may themselves be
            // anonymous contexts written as nested lists)
            Yaml::Array(v) if v.iter().any(|x| x.as_hash().is_some()) => {
                Ok(vec![ContextTarget::Inline(Rc::new(Syntax::parse_context(v)?))])
            }
            Yaml::Array(v) => v.iter().map(Syntax::parse_reference).collect(),
            _ => Ok(vec![Syntax::parse_reference(y)?]),
        }
    }
}

fn file_stem(reference: &str) -> Result<String, ParseSyntaxError> {
    Path::new(reference)
        .file_stem()
        .and_then(|x| x.to_str())
        .map(|x| x.to_owned())
        .ok_or(ParseSyntaxError::BadFileRef)
}
