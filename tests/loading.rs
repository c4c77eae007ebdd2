//! Loading syntaxes and color schemes from the file system: directory
//! listings, `extends` resolution, lazy lookup by scope, and the
//! JSON-with-comments color scheme flavor.

use pretty_assertions::assert_eq;

use synterm::highlighting::{scheme_names, ColorScheme};
use synterm::interpreter::SyntaxHighlighter;
use synterm::parsing::{SyntaxSet, Action, ContextTarget};
use synterm::LoadingError;

const SYNTAX_DIR: &str = "testdata/syntax";
const SCHEME_DIR: &str = "testdata/color-scheme";

#[test]
fn lists_syntaxes_in_the_directory() {
    let names = SyntaxSet::new(SYNTAX_DIR).syntax_names().unwrap();
    assert_eq!(names, vec!["Base", "Derived", "Jsish", "Plain"]);
}

#[test]
fn lists_color_schemes_in_the_directory() {
    let names = scheme_names(SCHEME_DIR).unwrap();
    assert_eq!(names, vec!["Default"]);
}

#[test]
fn loads_by_file_stem_and_memoizes() {
    let mut set = SyntaxSet::new(SYNTAX_DIR);
    let first = set.load("Plain").unwrap();
    assert_eq!(first.name, "Plain");
    assert_eq!(first.scope, "text.plain");
    let second = set.load("Plain").unwrap();
    assert!(std::rc::Rc::ptr_eq(&first, &second));
}

#[test]
fn loads_lazily_by_scope_header() {
    let mut set = SyntaxSet::new(SYNTAX_DIR);
    let syntax = set.load_by_scope("source.jstest").unwrap();
    assert_eq!(syntax.name, "Jsish");

    match SyntaxSet::new(SYNTAX_DIR).load_by_scope("source.nope") {
        Err(LoadingError::ScopeNotFound(scope)) => assert_eq!(scope, "source.nope"),
        other => panic!("unexpected result: {:?}", other.map(|s| s.name.clone())),
    }
}

#[test]
fn extends_merges_variables_and_contexts() {
    let mut set = SyntaxSet::new(SYNTAX_DIR);
    let derived = set.load("Derived").unwrap();

    // child variable definitions win
    assert_eq!(derived.variables["number"], r"\d+(\.\d+)?");
    // inherited ones survive
    assert_eq!(derived.variables["ident"], r"[A-Za-z_]\w*");

    // main: child actions run before the inherited ones
    let main = &derived.contexts["main"];
    let patterns: Vec<&str> = main
        .actions
        .iter()
        .map(|a| match a {
            Action::Match(m) => m.pattern.regex_str(),
            Action::Include(_) => "<include>",
        })
        .collect();
    assert_eq!(patterns, vec![r"\b(if|else)\b", "{{number}}"]);

    // symbols: the child appended its action
    let symbols = &derived.contexts["symbols"];
    let patterns: Vec<&str> = symbols
        .actions
        .iter()
        .map(|a| match a {
            Action::Match(m) => m.pattern.regex_str(),
            Action::Include(_) => "<include>",
        })
        .collect();
    assert_eq!(patterns, vec!["{{ident}}", "@{{ident}}"]);
}

#[test]
fn extended_syntax_highlights_with_merged_variables() {
    let mut set = SyntaxSet::new(SYNTAX_DIR);
    let derived = set.load("Derived").unwrap();
    let scheme = ColorScheme::load_from_file(format!("{}/Default.sublime-color-scheme", SCHEME_DIR)).unwrap();

    let mut hl = SyntaxHighlighter::new(set, derived, scheme, Vec::new(), true);
    hl.begin().unwrap();
    // the inherited number rule compiles against the child's number variable,
    // so the fractional part is part of the token
    hl.process("if 3.14\n").unwrap();
    hl.end().unwrap();
    let out = String::from_utf8(hl.finish()).unwrap();
    let stripped = regex::Regex::new("\x1b\\[[0-9;]*m").unwrap().replace_all(&out, "");
    assert_eq!(
        stripped,
        "<source.derived><keyword.control>if</keyword.control> \
         <constant.numeric>3.14</constant.numeric>\n</source.derived>"
    );
}

#[test]
fn packages_references_resolve_by_file_stem() {
    let source = r#"
name: Host
scope: source.host
contexts:
  main:
    - match: '>'
      push: Packages/Jsish.sublime-syntax
"#;
    let syntax = synterm::parsing::Syntax::load_from_str(source, None).unwrap();
    match &syntax.contexts["main"].actions[0] {
        Action::Match(m) => {
            assert!(matches!(
                &m.push.as_ref().unwrap()[0],
                ContextTarget::File { name } if name == "Jsish"
            ));
        }
        _ => panic!("expected a match action"),
    }

    let mut set = SyntaxSet::new(SYNTAX_DIR);
    let host = set.add(syntax).unwrap();
    let scheme = ColorScheme::load_from_file(format!("{}/Default.sublime-color-scheme", SCHEME_DIR)).unwrap();
    let mut hl = SyntaxHighlighter::new(set, host, scheme, Vec::new(), true);
    hl.begin().unwrap();
    hl.process(">var\n").unwrap();
    hl.end().unwrap();
    let out = String::from_utf8(hl.finish()).unwrap();
    let stripped = regex::Regex::new("\x1b\\[[0-9;]*m").unwrap().replace_all(&out, "");
    // Jsish was loaded from disk on demand and its rule applied
    assert_eq!(
        stripped,
        "<source.host>><storage.type>var</storage.type>\n</source.host>"
    );
}

#[test]
fn loads_json_scheme_with_comments_from_disk() {
    let scheme = ColorScheme::load_from_file(format!("{}/Default.sublime-color-scheme", SCHEME_DIR)).unwrap();
    assert_eq!(scheme.name, "Testing Default");
    assert_eq!(scheme.rules.len(), 3);
}
