use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;
use onig::{RegexOptions, SearchOptions, Syntax as OnigSyntax};
use walkdir::WalkDir;

use super::syntax_definition::*;
use crate::LoadingError;

pub const SYNTAX_FILE_EXT: &str = "sublime-syntax";

/// The set of syntaxes known to one engine, grown lazily.
///
/// Syntaxes are looked up by file stem (for `Packages/...` references and the
/// CLI `--syntax` flag) and by their top-level scope (for `scope:` references).
/// A lookup miss falls back to the syntax directory: by stem it loads
/// `<dir>/<stem>.sublime-syntax`, by scope it scans the directory for a file
/// whose `scope:` header declares the wanted scope. Everything loaded stays
/// cached for the lifetime of the set.
///
/// This is also where `extends` chains are resolved: parents load recursively
/// before the child is registered, then variables and contexts merge.
#[derive(Debug)]
pub struct SyntaxSet {
    dir: PathBuf,
    by_name: HashMap<String, Rc<Syntax>>,
    by_scope: HashMap<String, Rc<Syntax>>,
}

impl SyntaxSet {
    pub fn new<P: AsRef<Path>>(dir: P) -> SyntaxSet {
        SyntaxSet {
            dir: dir.as_ref().to_path_buf(),
            by_name: HashMap::new(),
            by_scope: HashMap::new(),
        }
    }

    pub fn syntax_dir(&self) -> &Path {
        &self.dir
    }

    /// Register an in-memory syntax definition, resolving its `extends`
    /// parents from the syntax directory if it has any. Keyed by its name.
    pub fn add(&mut self, syntax: Syntax) -> Result<Rc<Syntax>, LoadingError> {
        let mut in_progress = HashSet::new();
        in_progress.insert(syntax.name.clone());
        let syntax = self.resolve_extends(syntax, &mut in_progress)?;
        let rc = Rc::new(syntax);
        self.by_name.insert(rc.name.clone(), rc.clone());
        self.by_scope.insert(rc.scope.clone(), rc.clone());
        Ok(rc)
    }

    /// Find or load the syntax with the given file stem.
    pub fn load(&mut self, name: &str) -> Result<Rc<Syntax>, LoadingError> {
        let mut in_progress = HashSet::new();
        self.load_guarded(name, &mut in_progress)
    }

    /// Find or load the syntax whose top-level `scope` is `scope`.
    ///
    /// On a cache miss every `.sublime-syntax` file in the syntax directory is
    /// scanned for a `scope: <scope>` header line, case-insensitively.
    pub fn load_by_scope(&mut self, scope: &str) -> Result<Rc<Syntax>, LoadingError> {
        if let Some(syntax) = self.by_scope.get(scope) {
            return Ok(syntax.clone());
        }

        let header = onig::Regex::with_options(
            &format!(r"^scope:[ ]*{}\s*$", regex_syntax::escape(scope)),
            RegexOptions::REGEX_OPTION_IGNORECASE | RegexOptions::REGEX_OPTION_CAPTURE_GROUP,
            OnigSyntax::default(),
        )
        .map_err(|_| LoadingError::ScopeNotFound(scope.to_owned()))?;

        for entry in WalkDir::new(&self.dir).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SYNTAX_FILE_EXT) {
                continue;
            }
            let file = File::open(path)?;
            for line in BufReader::new(file).lines() {
                let line = match line {
                    Ok(line) => line,
                    // a syntax file may not be valid UTF-8 all the way through
                    Err(_) => continue,
                };
                let found = header
                    .match_with_options(&line, 0, SearchOptions::SEARCH_OPTION_NONE, None)
                    .is_some();
                if found {
                    let stem = path
                        .file_stem()
                        .and_then(|x| x.to_str())
                        .ok_or(LoadingError::BadPath)?
                        .to_owned();
                    debug!("lazy-loading syntax '{}' for scope '{}'", stem, scope);
                    return self.load(&stem);
                }
            }
        }
        Err(LoadingError::ScopeNotFound(scope.to_owned()))
    }

    /// The file stems of all syntaxes available in the syntax directory.
    pub fn syntax_names(&self) -> Result<Vec<String>, LoadingError> {
        let mut names = Vec::new();
        for entry in WalkDir::new(&self.dir).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(SYNTAX_FILE_EXT) {
                if let Some(stem) = path.file_stem().and_then(|x| x.to_str()) {
                    names.push(stem.to_owned());
                }
            }
        }
        Ok(names)
    }

    fn load_guarded(
        &mut self,
        name: &str,
        in_progress: &mut HashSet<String>,
    ) -> Result<Rc<Syntax>, LoadingError> {
        if let Some(syntax) = self.by_name.get(name) {
            return Ok(syntax.clone());
        }
        if !in_progress.insert(name.to_owned()) {
            return Err(LoadingError::ExtendsCycle(name.to_owned()));
        }

        let path = self.dir.join(format!("{}.{}", name, SYNTAX_FILE_EXT));
        debug!("loading syntax file {}", path.display());
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoadingError::SyntaxNotFound(name.to_owned()));
            }
            Err(e) => return Err(LoadingError::Io(e)),
        };
        let syntax = Syntax::load_from_str(&text, Some(name))
            .map_err(|e| LoadingError::ParseSyntax(e, Some(path.display().to_string())))?;
        let syntax = self.resolve_extends(syntax, in_progress)?;

        let rc = Rc::new(syntax);
        self.by_name.insert(name.to_owned(), rc.clone());
        self.by_scope.insert(rc.scope.clone(), rc.clone());
        in_progress.remove(name);
        Ok(rc)
    }

    /// Merge the parents named by `extends` into `syntax`.
    ///
    /// Variables merge left-to-right with later definitions winning, so the
    /// child overrides its parents. Contexts merge per name with the child's
    /// `meta_prepend`/`meta_append` markers deciding placement; without a
    /// marker the child's actions run first. Parent contexts are deep-copied
    /// so compiled-pattern caches never cross syntax boundaries.
    fn resolve_extends(
        &mut self,
        mut syntax: Syntax,
        in_progress: &mut HashSet<String>,
    ) -> Result<Syntax, LoadingError> {
        if syntax.extends.is_empty() {
            return Ok(syntax);
        }

        let mut parents = Vec::new();
        for parent_name in syntax.extends.clone() {
            parents.push(self.load_guarded(&parent_name, in_progress)?);
        }

        let mut variables = HashMap::new();
        for parent in &parents {
            variables.extend(parent.variables.clone());
        }
        variables.extend(std::mem::take(&mut syntax.variables));
        syntax.variables = variables;

        let mut contexts: HashMap<String, Rc<Context>> = HashMap::new();
        let own_contexts = std::mem::take(&mut syntax.contexts);
        let sources = parents
            .iter()
            .map(|p| &p.contexts)
            .chain(std::iter::once(&own_contexts));
        for source in sources {
            for (name, ctx) in source {
                match contexts.remove(name) {
                    None => {
                        contexts.insert(name.clone(), Rc::new(ctx.deep_clone()));
                    }
                    Some(inherited) => {
                        contexts.insert(name.clone(), Rc::new(merge_contexts(&inherited, ctx)));
                    }
                }
            }
        }
        syntax.contexts = contexts;

        Ok(syntax)
    }
}

/// Combine an inherited context body with an incoming one of the same name.
/// The incoming context's placement markers decide where its actions land;
/// meta directives are taken from whichever side comes first in the combined
/// body, matching a first-occurrence scan of the concatenated action list.
pub(crate) fn merge_contexts(inherited: &Context, incoming: &Context) -> Context {
    let incoming = incoming.deep_clone();
    let incoming_first = !incoming.meta_append;

    let (first, second) = if incoming_first {
        (&incoming, inherited)
    } else {
        (inherited, &incoming)
    };

    let mut merged = Context {
        meta_scope: first.meta_scope.clone().or_else(|| second.meta_scope.clone()),
        meta_content_scope: first
            .meta_content_scope
            .clone()
            .or_else(|| second.meta_content_scope.clone()),
        meta_include_prototype: inherited.meta_include_prototype && incoming.meta_include_prototype,
        clear_scopes: first.clear_scopes.or(second.clear_scopes),
        meta_prepend: first.meta_prepend || second.meta_prepend,
        meta_append: first.meta_append || second.meta_append,
        actions: Vec::with_capacity(first.actions.len() + second.actions.len()),
    };
    merged.actions.extend(first.actions.iter().cloned());
    merged.actions.extend(second.actions.iter().cloned());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing::Action;

    fn context_matching(patterns: &[&str]) -> Context {
        let mut ctx = Context::new();
        for p in patterns {
            ctx.actions.push(Action::Match(MatchAction {
                pattern: crate::parsing::Regex::new((*p).to_owned()),
                scope: None,
                captures: None,
                pop: None,
                push: None,
                branch_point: None,
                branch: None,
                fail: None,
                embed: None,
                with_prototype: None,
            }));
        }
        ctx
    }

    fn patterns_of(ctx: &Context) -> Vec<String> {
        ctx.actions
            .iter()
            .map(|a| match a {
                Action::Match(m) => m.pattern.regex_str().to_owned(),
                Action::Include(_) => "<include>".to_owned(),
            })
            .collect()
    }

    #[test]
    fn child_overrides_run_first() {
        let parent = context_matching(&["p1", "p2"]);
        let child = context_matching(&["c1"]);
        let merged = merge_contexts(&parent, &child);
        assert_eq!(patterns_of(&merged), vec!["c1", "p1", "p2"]);
    }

    #[test]
    fn prepend_and_append_place_actions() {
        let parent = context_matching(&["p"]);

        let mut prepending = context_matching(&["c"]);
        prepending.meta_prepend = true;
        assert_eq!(patterns_of(&merge_contexts(&parent, &prepending)), vec!["c", "p"]);

        let mut appending = context_matching(&["c"]);
        appending.meta_append = true;
        assert_eq!(patterns_of(&merge_contexts(&parent, &appending)), vec!["p", "c"]);
    }

    #[test]
    fn meta_directives_follow_concatenation_order() {
        let mut parent = context_matching(&["p"]);
        parent.meta_scope = Some("parent.scope".to_owned());

        let mut child = context_matching(&["c"]);
        child.meta_scope = Some("child.scope".to_owned());

        // child first: child's directive is found first
        let merged = merge_contexts(&parent, &child);
        assert_eq!(merged.meta_scope.as_deref(), Some("child.scope"));

        // appended child: parent's directive is found first
        child.meta_append = true;
        let merged = merge_contexts(&parent, &child);
        assert_eq!(merged.meta_scope.as_deref(), Some("parent.scope"));
    }

    #[test]
    fn prototype_opt_out_survives_merging() {
        let parent = context_matching(&["p"]);
        let mut child = context_matching(&["c"]);
        child.meta_include_prototype = false;
        assert!(!merge_contexts(&parent, &child).meta_include_prototype);
        assert!(!merge_contexts(&child, &parent).meta_include_prototype);
    }

    #[test]
    fn missing_syntax_reports_name() {
        let mut set = SyntaxSet::new("does/not/exist");
        match set.load("Nope") {
            Err(LoadingError::SyntaxNotFound(name)) => assert_eq!(name, "Nope"),
            other => panic!("unexpected result: {:?}", other.map(|s| s.name.clone())),
        }
    }
}
