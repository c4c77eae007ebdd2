//! Data structures for representing syntax definitions
//!
//! Everything here is public because this library wants to be useful in
//! integrated cases like editors or test harnesses, and there is no telling
//! what kind of monkeying you might want to do with the data. Perhaps parsing
//! your own syntax format into this data structure?

use std::collections::HashMap;
use std::rc::Rc;

use regex_syntax::escape;

use super::regex::{Regex, Region};

/// Capture group index to the scope string assigned to that group.
/// Kept in the order the syntax file lists them.
pub type CaptureMapping = Vec<(usize, String)>;

/// The main data structure representing a syntax definition loaded from a
/// `.sublime-syntax` file
///
/// The `name` field is a human readable name to display in syntax lists; the
/// contexts are shared behind `Rc` because runtime stack frames and
/// `with_prototype` splices alias them while the engine runs.
#[derive(Clone, Debug)]
pub struct Syntax {
    pub name: String,
    /// Default scope of the whole file, e.g. `source.python`
    pub scope: String,
    pub file_extensions: Vec<String>,
    /// File stems of parent syntaxes this one extends, in order
    pub extends: Vec<String>,
    pub variables: HashMap<String, String>,
    pub contexts: HashMap<String, Rc<Context>>,
}

impl Syntax {
    /// Look up a named context in this syntax.
    pub fn context(&self, name: &str) -> Option<Rc<Context>> {
        self.contexts.get(name).cloned()
    }
}

/// A named (or anonymous) list of actions plus the meta directives that were
/// written inside its body.
#[derive(Clone, Debug)]
pub struct Context {
    pub meta_scope: Option<String>,
    pub meta_content_scope: Option<String>,
    /// False when any action in the body carries `meta_include_prototype:
    /// false`; such contexts don't get the prototype spliced in.
    pub meta_include_prototype: bool,
    pub clear_scopes: Option<ClearAmount>,
    /// Merge placement markers for `extends`, see [`SyntaxSet`]
    ///
    /// [`SyntaxSet`]: ../struct.SyntaxSet.html
    pub meta_prepend: bool,
    pub meta_append: bool,

    pub actions: Vec<Action>,
}

impl Context {
    pub fn new() -> Context {
        Context {
            meta_scope: None,
            meta_content_scope: None,
            meta_include_prototype: true,
            clear_scopes: None,
            meta_prepend: false,
            meta_append: false,
            actions: Vec::new(),
        }
    }

    /// Clones this context so that nothing is shared with the original:
    /// inline contexts and `with_prototype` bodies get fresh `Rc`s and every
    /// pattern gets a fresh compilation cell.
    ///
    /// Used when `extends` merging copies contexts between syntaxes, so each
    /// syntax compiles patterns against its own variables.
    pub fn deep_clone(&self) -> Context {
        Context {
            meta_scope: self.meta_scope.clone(),
            meta_content_scope: self.meta_content_scope.clone(),
            meta_include_prototype: self.meta_include_prototype,
            clear_scopes: self.clear_scopes.clone(),
            meta_prepend: self.meta_prepend,
            meta_append: self.meta_append,
            actions: self.actions.iter().map(Action::deep_clone).collect(),
        }
    }
}

impl Default for Context {
    fn default() -> Context {
        Context::new()
    }
}

/// How many enclosing frames a `clear_scopes` directive resets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearAmount {
    All,
    TopN(usize),
}

/// One entry of a context body. Meta directives never show up here, they are
/// hoisted onto the [`Context`] at parse time.
#[derive(Clone, Debug)]
pub enum Action {
    Match(MatchAction),
    Include(ContextTarget),
}

impl Action {
    fn deep_clone(&self) -> Action {
        match self {
            Action::Match(m) => Action::Match(m.deep_clone()),
            Action::Include(t) => Action::Include(t.deep_clone()),
        }
    }
}

/// A regex-triggered action: emit the match under some scopes, then mutate
/// the context stack.
///
/// `set` is already desugared to `pop: 1` plus `push`, and an `embed` is a
/// `push` with the extra [`EmbedDef`] data attached.
#[derive(Clone, Debug)]
pub struct MatchAction {
    pub pattern: Regex,
    pub scope: Option<String>,
    pub captures: Option<CaptureMapping>,
    pub pop: Option<usize>,
    pub push: Option<Vec<ContextTarget>>,
    pub branch_point: Option<String>,
    pub branch: Option<Vec<String>>,
    pub fail: Option<String>,
    pub embed: Option<EmbedDef>,
    pub with_prototype: Option<Rc<Context>>,
}

impl MatchAction {
    fn deep_clone(&self) -> MatchAction {
        MatchAction {
            pattern: self.pattern.clone(),
            scope: self.scope.clone(),
            captures: self.captures.clone(),
            pop: self.pop,
            push: self
                .push
                .as_ref()
                .map(|ts| ts.iter().map(ContextTarget::deep_clone).collect()),
            branch_point: self.branch_point.clone(),
            branch: self.branch.clone(),
            fail: self.fail.clone(),
            embed: self.embed.as_ref().map(EmbedDef::deep_clone),
            with_prototype: self
                .with_prototype
                .as_ref()
                .map(|c| Rc::new(c.deep_clone())),
        }
    }
}

/// The static part of an `embed` action: the way out and how to scope it.
#[derive(Clone, Debug)]
pub struct EmbedDef {
    pub escape: Rc<Regex>,
    /// True when the escape pattern references capture groups of the
    /// triggering match (`\1` etc.) and has to be rebuilt per match.
    pub escape_has_backrefs: bool,
    pub embed_scope: Option<String>,
    pub escape_captures: Option<CaptureMapping>,
}

impl EmbedDef {
    fn deep_clone(&self) -> EmbedDef {
        EmbedDef {
            escape: Rc::new((*self.escape).clone()),
            escape_has_backrefs: self.escape_has_backrefs,
            embed_scope: self.embed_scope.clone(),
            escape_captures: self.escape_captures.clone(),
        }
    }

    /// The escape pattern to use for an embed triggered by the match in
    /// `region`: either the shared pattern, or a fresh one with `\N`
    /// references replaced by the captured text (escaped to match literally).
    pub fn escape_for_match(&self, region: &Region, text: &str) -> Rc<Regex> {
        if !self.escape_has_backrefs {
            return self.escape.clone();
        }
        let substituted = substitute_backrefs_in_regex(self.escape.regex_str(), |i| {
            region.pos(i).map(|(start, end)| escape(&text[start..end]))
        });
        Rc::new(Regex::new(substituted))
    }
}

/// Where a push/include/embed leads. Classified at parse time from the string
/// forms a syntax file can use.
#[derive(Clone, Debug)]
pub enum ContextTarget {
    /// A context of the current frame's syntax
    Named(String),
    /// `scope:SCOPE[#CTX]`: a context of whichever syntax declares SCOPE as
    /// its top-level scope, lazily loaded
    ByScope {
        scope: String,
        sub_context: Option<String>,
    },
    /// `Packages/Name.sublime-syntax`: the main context of the syntax with
    /// that file stem, lazily loaded
    File { name: String },
    /// An anonymous context written inline
    Inline(Rc<Context>),
}

impl ContextTarget {
    fn deep_clone(&self) -> ContextTarget {
        match self {
            ContextTarget::Inline(c) => ContextTarget::Inline(Rc::new(c.deep_clone())),
            other => other.clone(),
        }
    }
}

/// Rewrites `\N` references in `regex_str` using `substituter`, leaving the
/// rest of the pattern untouched. References whose group did not participate
/// in the match are dropped.
pub(crate) fn substitute_backrefs_in_regex<F>(regex_str: &str, substituter: F) -> String
where
    F: Fn(usize) -> Option<String>,
{
    let mut reg_str = String::with_capacity(regex_str.len());

    let mut last_was_escape = false;
    for c in regex_str.chars() {
        if last_was_escape && c.is_ascii_digit() {
            let val = c.to_digit(10).unwrap() as usize;
            if let Some(sub) = substituter(val) {
                reg_str.push_str(&sub);
            }
        } else if last_was_escape {
            reg_str.push('\\');
            reg_str.push(c);
        } else if c != '\\' {
            reg_str.push(c);
        }

        last_was_escape = c == '\\' && !last_was_escape;
    }
    reg_str
}
