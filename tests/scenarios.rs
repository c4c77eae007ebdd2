//! End-to-end runs of the interpreter over small in-memory syntaxes,
//! checking both the visible output and the stream invariants: stripping the
//! coloring gives back the input byte-for-byte, scope tags balance, rolled
//! back speculation leaves no trace.

use pretty_assertions::assert_eq;

use synterm::highlighting::ColorScheme;
use synterm::interpreter::SyntaxHighlighter;
use synterm::parsing::{Syntax, SyntaxSet};

const SCHEME: &str = "
name: Scenario Scheme
globals:
  foreground: '#ffffff'
  background: '#000000'
rules:
  - scope: keyword
    foreground: '#ff0000'
  - scope: string
    foreground: '#00ff00'
  - scope: comment
    foreground: '#808080'
  - scope: punctuation
    foreground: '#0000ff'
  - scope: constant.numeric
    foreground: '#ffff00'
";

fn scheme() -> ColorScheme {
    ColorScheme::load_from_str(SCHEME).unwrap()
}

fn engine(sources: &[&str], show_scopes: bool) -> SyntaxHighlighter<Vec<u8>> {
    let mut set = SyntaxSet::new("testdata/syntax");
    let mut syntaxes = Vec::new();
    for source in sources {
        let syntax = Syntax::load_from_str(source, None).unwrap();
        syntaxes.push(set.add(syntax).unwrap());
    }
    SyntaxHighlighter::new(set, syntaxes[0].clone(), scheme(), Vec::new(), show_scopes)
}

fn run(sources: &[&str], lines: &[&str], show_scopes: bool) -> String {
    let mut hl = engine(sources, show_scopes);
    hl.begin().unwrap();
    for line in lines {
        hl.process(line).unwrap();
    }
    hl.end().unwrap();
    String::from_utf8(hl.finish()).unwrap()
}

fn strip_ansi(s: &str) -> String {
    let re = regex::Regex::new("\x1b\\[[0-9;]*m").unwrap();
    re.replace_all(s, "").into_owned()
}

/// Every `<scope>` tag in a show-scopes stream must close, in order. Only
/// usable on inputs that contain no angle brackets of their own.
fn assert_balanced_tags(stream: &str) {
    let re = regex::Regex::new(r"<(/?)([a-zA-Z0-9_.\-]+)>").unwrap();
    let mut open: Vec<String> = Vec::new();
    for cap in re.captures_iter(stream) {
        if &cap[1] == "/" {
            assert_eq!(open.pop(), Some(cap[2].to_owned()), "unbalanced close in {stream:?}");
        } else {
            open.push(cap[2].to_owned());
        }
    }
    assert!(open.is_empty(), "unclosed scopes {open:?} in {stream:?}");
}

const S1: &str = "
name: S1
scope: source.test
contexts:
  main:
    - match: '\\w+'
      scope: keyword
";

#[test]
fn s1_plain_literal() {
    let out = run(&[S1], &["foo bar\n"], true);
    assert_eq!(
        strip_ansi(&out),
        "<source.test><keyword>foo</keyword> <keyword>bar</keyword>\n</source.test>"
    );
    assert_balanced_tags(&strip_ansi(&out));

    let colored = run(&[S1], &["foo bar\n"], false);
    assert_eq!(strip_ansi(&colored), "foo bar\n");
    // keyword maps to pure red in the 256-color cube
    assert!(colored.contains("\x1b[38;5;196m\x1b[48;5;16mfoo"));
}

const S2: &str = r#"
name: S2
scope: source.test
contexts:
  main:
    - match: '"'
      push: string
  string:
    - meta_scope: string.quoted
    - match: '"'
      pop: true
"#;

#[test]
fn s2_push_pop() {
    let out = run(&[S2], &["a\"b\"c\n"], true);
    assert_eq!(
        strip_ansi(&out),
        "<source.test>a<string.quoted>\"b\"</string.quoted>c\n</source.test>"
    );
    assert_balanced_tags(&strip_ansi(&out));

    let colored = run(&[S2], &["a\"b\"c\n"], false);
    assert_eq!(strip_ansi(&colored), "a\"b\"c\n");
    // the quoted region is green, the surroundings are the globals
    assert!(colored.contains("\x1b[38;5;46m\x1b[48;5;16m\""));
}

const S3: &str = r#"
name: S3
scope: source.test
contexts:
  main:
    - match: '"'
      set: string
  string:
    - meta_scope: string.quoted
    - match: '"'
      pop: true
"#;

#[test]
fn s3_set_replaces_the_pushing_frame() {
    // visible output matches the push version
    let out = run(&[S3], &["\"b\"\n"], true);
    assert_eq!(
        strip_ansi(&out),
        "<source.test><string.quoted>\"b\"</string.quoted>\n</source.test>"
    );

    // but the stack never holds both frames: inside the string the depth is
    // 1, and the closing quote lands back on main rather than an
    // intermediate frame
    let mut hl = engine(&[S3], false);
    hl.begin().unwrap();
    hl.process("\"b").unwrap();
    assert_eq!(hl.context_depth(), 1);
    hl.process("\"").unwrap();
    assert_eq!(hl.context_depth(), 1);
    hl.end().unwrap();

    let mut hl = engine(&[S2], false);
    hl.begin().unwrap();
    hl.process("\"b").unwrap();
    assert_eq!(hl.context_depth(), 2); // push keeps main underneath
    hl.end().unwrap();
}

const S4: &str = r#"
name: S4
scope: source.test
contexts:
  prototype:
    - match: '/\*.*?\*/'
      scope: comment.block
  main:
    - match: '\w+'
      scope: keyword
"#;

const S4_OPTED_OUT: &str = r#"
name: S4b
scope: source.test
contexts:
  prototype:
    - match: '/\*.*?\*/'
      scope: comment.block
  main:
    - meta_include_prototype: false
    - match: '\w+'
      scope: keyword
"#;

#[test]
fn s4_prototype_is_spliced_into_every_context() {
    let out = strip_ansi(&run(&[S4], &["code /*c*/ code\n"], true));
    assert_eq!(
        out,
        "<source.test><keyword>code</keyword> <comment.block>/*c*/</comment.block> \
         <keyword>code</keyword>\n</source.test>"
    );
    assert_balanced_tags(&out);
}

#[test]
fn s4_prototype_opt_out() {
    let out = strip_ansi(&run(&[S4_OPTED_OUT], &["code /*c*/ code\n"], true));
    assert!(!out.contains("<comment.block>"));
    // the comment body decays into plain characters and a stray keyword
    assert_eq!(
        out,
        "<source.test><keyword>code</keyword> /*<keyword>c</keyword>*/ \
         <keyword>code</keyword>\n</source.test>"
    );
}

const S5: &str = "
name: S5
scope: source.test
contexts:
  main:
    - match: ''
      branch_point: bp
      branch: [a, b]
  a:
    - match: 'x'
      scope: string
      push: a2
  a2:
    - match: '(?=y)'
      fail: bp
  b:
    - match: 'xy'
      scope: keyword
      pop: true
";

#[test]
fn s5_branch_commit_discards_failed_candidates() {
    let out = run(&[S5], &["xy\n"], false);
    assert_eq!(strip_ansi(&out), "xy\n");
    // candidate a wrote 'x' under string (green) before failing; none of
    // that may survive the rollback
    assert!(!out.contains("\x1b[38;5;46m"));
    // candidate b's keyword emission appears exactly once
    assert!(out.contains("\x1b[38;5;196m\x1b[48;5;16mxy"));
    assert_eq!(out.matches("xy").count(), 1);

    let tagged = strip_ansi(&run(&[S5], &["xy\n"], true));
    assert_eq!(tagged, "<source.test><keyword>xy</keyword>\n</source.test>");
}

const BRANCH_LINES: &str = r#"
name: BranchLines
scope: source.test
contexts:
  main:
    - match: 'q'
      scope: keyword
      branch_point: bp
      branch: [a, b]
  a:
    - match: '\n'
    - match: '(?=z)'
      fail: bp
  b:
    - match: '(?s).+'
      scope: string
      pop: true
"#;

#[test]
fn branch_rollback_can_rewind_across_lines() {
    let out = run(&[BRANCH_LINES], &["q\n", "z\n"], false);
    // the speculative candidate consumed the first newline and saw 'z' on
    // the next line before failing; the fallback re-emits everything from
    // the snapshot on
    assert_eq!(strip_ansi(&out), "q\nz\n");
    assert_eq!(out.matches('z').count(), 1);
    // fallback styles the whole rewound region as a string
    assert!(out.contains("\x1b[38;5;46m\x1b[48;5;16m\nz\n"));
}

const S6_HTML: &str = r#"
name: S6
scope: text.html
contexts:
  main:
    - match: '<script>'
      scope: punctuation
      embed: 'scope:source.js'
      escape: '</script>'
      escape_captures:
        0: punctuation
"#;

const S6_JS: &str = r#"
name: JsEmbedded
scope: source.js
contexts:
  main:
    - match: '\bvar\b'
      scope: keyword
    - match: '</script>'
      scope: string
"#;

#[test]
fn s6_embed_runs_the_other_syntax_until_escape() {
    let out = strip_ansi(&run(&[S6_HTML, S6_JS], &["<script>var x=1;</script>tail\n"], true));
    assert_eq!(
        out,
        "<text.html><punctuation><script></punctuation><keyword>var</keyword> x=1;\
         <punctuation></script></punctuation>tail\n</text.html>"
    );
    // the escape pattern won over the embedded syntax's own '</script>' rule
    assert!(!out.contains("<string>"));

    let colored = run(&[S6_HTML, S6_JS], &["<script>var x=1;</script>tail\n"], false);
    assert_eq!(strip_ansi(&colored), "<script>var x=1;</script>tail\n");
}

const EMBED_BACKREF: &str = r#"
name: Fences
scope: text.fenced
contexts:
  main:
    - match: '(~+)'
      scope: punctuation
      embed: inner
      escape: '\1'
      escape_captures:
        0: punctuation
  inner:
    - match: '\w+'
      scope: keyword
"#;

#[test]
fn embed_escape_substitutes_backrefs_per_match() {
    // the first fence is two tildes; a single tilde inside must not escape
    let out = strip_ansi(&run(&[EMBED_BACKREF], &["~~ab~cd~~tail\n"], true));
    assert_eq!(
        out,
        "<text.fenced><punctuation>~~</punctuation><keyword>ab</keyword>~\
         <keyword>cd</keyword><punctuation>~~</punctuation>tail\n</text.fenced>"
    );
}

#[test]
fn text_fidelity_over_adversarial_input() {
    let inputs: &[&str] = &[
        "plain text\n",
        "\"unterminated\n",
        "\"\"\"\n",
        "xyxyxy\n",
        "/*c*/ /*c*/\n",
        "  \t mixed \u{e9}\u{4e16}\u{754c} unicode \n",
        "\n",
    ];
    for source in [S1, S2, S3, S4, S4_OPTED_OUT, S5] {
        for input in inputs {
            let out = run(&[source], &[input], false);
            assert_eq!(&strip_ansi(&out), input, "fidelity broken for input {input:?}");
        }
    }
}

#[test]
fn stack_depth_stays_bounded() {
    let mut hl = engine(&[S2], false);
    hl.begin().unwrap();
    for _ in 0..50 {
        hl.process("a\"b\"c\n").unwrap();
        assert!(hl.context_depth() <= 2);
        assert!(hl.scope_stack().len() <= 2);
    }
    hl.end().unwrap();
    assert_eq!(hl.scope_stack().len(), 0);
}

#[test]
fn fail_without_matching_branch_point_is_a_noop() {
    let source = "
name: LoneFail
scope: source.test
contexts:
  main:
    - match: 'x'
      scope: keyword
      fail: nowhere
    - match: 'y'
      scope: string
";
    let out = strip_ansi(&run(&[source], &["xy\n"], true));
    assert_eq!(
        out,
        "<source.test><keyword>x</keyword><string>y</string>\n</source.test>"
    );
}

#[test]
fn clear_scopes_suspends_inherited_coloring() {
    let source = r#"
name: Clearing
scope: source.test
contexts:
  main:
    - match: '"'
      scope: punctuation
      push: string
  string:
    - meta_scope: string.quoted
    - match: '\{'
      scope: punctuation
      push: interpolation
    - match: '"'
      scope: punctuation
      pop: true
  interpolation:
    - clear_scopes: 1
    - match: '\}'
      scope: punctuation
      pop: true
    - match: '\w+'
      scope: keyword
"#;
    let out = strip_ansi(&run(&[source], &["\"a{b}c\"\n"], true));
    // entering the interpolation closes the string scope, so 'b' (and the
    // rest of the literal, the reference clears the frame's record of it)
    // is not string-colored
    assert_eq!(
        out,
        "<source.test><string.quoted><punctuation>\"</punctuation>a\
         <punctuation>{</punctuation></string.quoted><keyword>b</keyword>\
         <punctuation>}</punctuation>c<punctuation>\"</punctuation>\n</source.test>"
    );
}

#[test]
fn include_splices_without_scope_side_effects() {
    let source = "
name: Including
scope: source.test
contexts:
  main:
    - include: numbers
    - match: '\\w+'
      scope: keyword
  numbers:
    - match: '\\d+'
      scope: constant.numeric
";
    let out = strip_ansi(&run(&[source], &["a 12 b\n"], true));
    assert_eq!(
        out,
        "<source.test><keyword>a</keyword> <constant.numeric>12</constant.numeric> \
         <keyword>b</keyword>\n</source.test>"
    );
}

#[test]
fn with_prototype_overrides_follow_the_pushed_context() {
    let source = r#"
name: WithProto
scope: source.test
contexts:
  main:
    - match: '<'
      scope: punctuation
      push: inner
      with_prototype:
        - match: '!'
          scope: comment
  inner:
    - match: '>'
      scope: punctuation
      pop: true
    - match: '\w+'
      scope: keyword
"#;
    let out = strip_ansi(&run(&[source], &["!<a!b>!\n"], true));
    // the '!' rule only exists while `inner` is on the stack
    assert_eq!(
        out,
        "<source.test>!<punctuation><</punctuation><keyword>a</keyword>\
         <comment>!</comment><keyword>b</keyword><punctuation>></punctuation>!\n</source.test>"
    );
}
