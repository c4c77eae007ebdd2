//! Scope selector expressions as written in color-scheme rules, and the
//! scoring that picks the winning rule for a scope stack.

use std::str::FromStr;

use crate::parsing::{ParseScopeError, Scope};

lazy_static! {
    static ref SELECTOR_TOKENS: onig::Regex =
        onig::Regex::new(r"([a-zA-Z0-9_\-.]+|\,|\|| - |\(|\))").unwrap();
}

/// A selector expression tree. Leaves are sequences of dotted-tag scopes;
/// interior nodes come from the three operators, loosest first: `|`, ` - `
/// (spaces required), `,`.
#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// `a.b c.d`: a window of scopes to find in the stack
    Path(Vec<Scope>),
    /// `A | B`: either alternative
    Or(Vec<Selector>),
    /// `A - B`: A, unless any of the excluded operands match at all
    Minus(Vec<Selector>),
    /// `A, B`: scored exactly like [`Selector::Or`]. Sublime Text specifies
    /// "all operands must match" for `,`, which this intentionally does not
    /// implement; see DESIGN.md.
    Includes(Vec<Selector>),
}

#[derive(Debug, thiserror::Error)]
pub enum SelectorError {
    #[error("stray ')' in selector '{0}'")]
    StrayParens(String),
    #[error("unbalanced parentheses in selector '{0}'")]
    UnbalancedParens(String),
    #[error("cannot mix atoms and parenthesized groups in one operand: '{0}'")]
    MixedOperand(String),
    #[error(transparent)]
    Scope(#[from] ParseScopeError),
}

/// Lexed selector content: atoms and operators, with parenthesized runs
/// already nested.
#[derive(Debug, Clone, PartialEq)]
enum Item {
    Atom(String),
    Op(Op),
    Group(Vec<Item>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Or,
    Minus,
    Includes,
}

impl Selector {
    /// Score this selector against a scope stack. Zero means no match; the
    /// highest-scoring rule wins.
    ///
    /// A leaf path of M scopes slides an M-wide window over the stack. Each
    /// window position sums, pairwise, the number of leading tags the stack
    /// scope and the selector scope agree on; any disagreeing pair voids the
    /// whole position. The best position wins.
    pub fn score(&self, stack: &[Scope]) -> u32 {
        match self {
            Selector::Path(path) => score_path(path, stack),
            Selector::Or(subs) | Selector::Includes(subs) => {
                subs.iter().map(|s| s.score(stack)).max().unwrap_or(0)
            }
            Selector::Minus(subs) => {
                let mut iter = subs.iter();
                let main = match iter.next() {
                    Some(main) => main.score(stack),
                    None => return 0,
                };
                for excluded in iter {
                    if excluded.score(stack) > 0 {
                        return 0;
                    }
                }
                main
            }
        }
    }
}

fn score_path(path: &[Scope], stack: &[Scope]) -> u32 {
    if path.is_empty() || path.len() > stack.len() {
        return 0;
    }
    let mut best = 0;
    for offset in 0..=(stack.len() - path.len()) {
        let mut score: u32 = 0;
        for (j, sel_scope) in path.iter().enumerate() {
            let stack_scope = &stack[offset + j];
            for (a, b) in stack_scope.atoms().iter().zip(sel_scope.atoms()) {
                if a != b {
                    score = 0;
                    break;
                }
                score += 1;
            }
            if score == 0 {
                break;
            }
        }
        best = best.max(score);
    }
    best
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Selector, SelectorError> {
        let items = nest(s)?;
        parse_items(&items, s)
    }
}

/// Lex and fold parenthesized runs into groups.
fn nest(s: &str) -> Result<Vec<Item>, SelectorError> {
    let mut stack: Vec<Vec<Item>> = vec![Vec::new()];
    for (start, end) in SELECTOR_TOKENS.find_iter(s) {
        let tok = &s[start..end];
        match tok {
            "(" => stack.push(Vec::new()),
            ")" => {
                let group = stack.pop().unwrap();
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| SelectorError::StrayParens(s.to_owned()))?;
                parent.push(Item::Group(group));
            }
            "|" => stack.last_mut().unwrap().push(Item::Op(Op::Or)),
            " - " => stack.last_mut().unwrap().push(Item::Op(Op::Minus)),
            "," => stack.last_mut().unwrap().push(Item::Op(Op::Includes)),
            atom => stack.last_mut().unwrap().push(Item::Atom(atom.to_owned())),
        }
    }
    if stack.len() != 1 {
        return Err(SelectorError::UnbalancedParens(s.to_owned()));
    }
    Ok(stack.pop().unwrap())
}

/// Fold operators in precedence order over one operand list.
fn parse_items(items: &[Item], source: &str) -> Result<Selector, SelectorError> {
    parse_op_level(items, 0, source)
}

fn parse_op_level(items: &[Item], level: usize, source: &str) -> Result<Selector, SelectorError> {
    const LEVELS: [Op; 3] = [Op::Or, Op::Minus, Op::Includes];
    let op = match LEVELS.get(level) {
        Some(&op) => op,
        None => return parse_operand(items, source),
    };

    if !items.contains(&Item::Op(op)) {
        return parse_op_level(items, level + 1, source);
    }

    let mut operands: Vec<&[Item]> = items.split(|i| *i == Item::Op(op)).collect();
    // a trailing operator contributes no operand; other empty operands stay
    // and score zero
    if operands.last().map_or(false, |o| o.is_empty()) {
        operands.pop();
    }

    let parsed = operands
        .iter()
        .map(|chunk| parse_op_level(chunk, level + 1, source))
        .collect::<Result<Vec<Selector>, SelectorError>>()?;

    Ok(match op {
        Op::Or => Selector::Or(parsed),
        Op::Minus => Selector::Minus(parsed),
        Op::Includes => Selector::Includes(parsed),
    })
}

fn parse_operand(items: &[Item], source: &str) -> Result<Selector, SelectorError> {
    if items.len() == 1 {
        if let Item::Group(inner) = &items[0] {
            return parse_items(inner, source);
        }
    }
    let mut path = Vec::new();
    for item in items {
        match item {
            Item::Atom(atom) => path.push(Scope::new(atom)?),
            _ => return Err(SelectorError::MixedOperand(source.to_owned())),
        }
    }
    Ok(Selector::Path(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack(s: &str) -> Vec<Scope> {
        s.split_whitespace().map(|x| Scope::new(x).unwrap()).collect()
    }

    fn sel(s: &str) -> Selector {
        Selector::from_str(s).unwrap()
    }

    #[test]
    fn parses_operator_precedence() {
        // `|` binds loosest, then ` - `, then `,`
        match sel("a | b - c, d") {
            Selector::Or(ops) => {
                assert_eq!(ops.len(), 2);
                match &ops[1] {
                    Selector::Minus(minus_ops) => {
                        assert_eq!(minus_ops.len(), 2);
                        assert!(matches!(&minus_ops[1], Selector::Includes(_)));
                    }
                    other => panic!("expected minus node, got {:?}", other),
                }
            }
            other => panic!("expected or node, got {:?}", other),
        }
    }

    #[test]
    fn parses_groups() {
        let grouped = sel("(a | b) - c");
        match grouped {
            Selector::Minus(ops) => {
                assert!(matches!(&ops[0], Selector::Or(_)));
                assert_eq!(ops[1], Selector::Path(stack("c")));
            }
            other => panic!("expected minus node, got {:?}", other),
        }
    }

    #[test]
    fn rejects_malformed_selectors() {
        assert!(matches!(Selector::from_str("a)"), Err(SelectorError::StrayParens(_))));
        assert!(matches!(Selector::from_str("(a"), Err(SelectorError::UnbalancedParens(_))));
        assert!(matches!(Selector::from_str("a (b)"), Err(SelectorError::MixedOperand(_))));
    }

    #[test]
    fn leaf_scoring_counts_matching_tags() {
        let ss = stack("source.python keyword.control.import.python");
        assert_eq!(sel("keyword").score(&ss), 1);
        assert_eq!(sel("keyword.control").score(&ss), 2);
        assert_eq!(sel("keyword.control.import").score(&ss), 3);
        assert_eq!(sel("source keyword.control").score(&ss), 3);
        assert_eq!(sel("string").score(&ss), 0);
        // a selector scope may be more specific than the stack scope
        assert_eq!(sel("source.python.3").score(&ss), 2);
    }

    #[test]
    fn window_picks_best_offset() {
        let ss = stack("text.html source.js string.quoted");
        assert_eq!(sel("source.js string").score(&ss), 3);
        assert_eq!(sel("text.html source").score(&ss), 3);
        // mismatching window positions score zero, not partially
        assert_eq!(sel("text.html string").score(&ss), 0);
    }

    #[test]
    fn or_is_max_of_children() {
        let ss = stack("source.python keyword.control");
        let a = sel("keyword.control");
        let b = sel("source");
        let or = sel("keyword.control | source");
        assert_eq!(or.score(&ss), a.score(&ss).max(b.score(&ss)));
    }

    #[test]
    fn includes_scores_like_or() {
        let ss = stack("source.python keyword.control");
        assert_eq!(
            sel("keyword.control, source").score(&ss),
            sel("keyword.control | source").score(&ss)
        );
        // even when one operand doesn't match at all
        assert_eq!(sel("keyword.control, string").score(&ss), 2);
    }

    #[test]
    fn minus_excludes() {
        let ss = stack("source.python comment.line");
        assert_eq!(sel("source - comment").score(&ss), 0);
        assert_eq!(sel("source - string").score(&ss), 1);
        assert_eq!(sel("source - string - comment").score(&ss), 0);
    }

    #[test]
    fn empty_operands_score_zero() {
        let ss = stack("source.python");
        // leading empty operand makes the main operand empty
        assert_eq!(sel(" - source").score(&ss), 0);
        // trailing operator leaves just the main operand
        assert_eq!(sel("source - ").score(&ss), 1);
        assert_eq!(Selector::Path(vec![]).score(&ss), 0);
    }
}
