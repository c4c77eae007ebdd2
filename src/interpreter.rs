//! The context-stack interpreter: feeds input through a syntax definition and
//! writes the same text back out, colored.
//!
//! To understand the implementation, here's an introduction to how
//! sublime-syntax execution works in this engine.
//!
//! The engine keeps a stack of runtime frames, each pointing at a context (a
//! list of actions). At every byte position it walks the top frame's actions
//! in order and tries each `match` regex anchored at the cursor. The first
//! action whose regex matches wins: its text is written under the appropriate
//! scopes, and then its stack instructions run (`pop` so many frames, `push` /
//! `set` new contexts, launch a speculative `branch`, `fail` back to a branch
//! point, or arm an `embed`). If no action matches, one character is written
//! verbatim and the frame starts its scan over.
//!
//! `include` actions splice another context's actions into the scan by
//! pushing it as an *included* frame: included frames pop themselves silently
//! when exhausted, never own meta scopes, and are transparent to `pop`
//! counting. The `prototype` context (and any `with_prototype` attached to
//! the push that created a frame) is spliced the same way every time a frame
//! starts a fresh scan.
//!
//! Speculation: a `branch` action pushes its first candidate context and
//! snapshots the unconsumed text, the position, and the output sink. All
//! output is redirected to an in-memory buffer until the branch resolves. A
//! candidate that pops cleanly back to the launching frame commits the
//! buffer; a `fail` action rolls everything back and tries the next
//! candidate. Rolled-back output is never seen downstream.
//!
//! Embedding: an `embed` action pushes a context (usually another syntax's
//! `main`) and arms an escape pattern. At every position inside the embedded
//! region the escape is tried *before* the embedded syntax's own actions, and
//! when it matches the stack unwinds back to where the embed started.

use std::io::Write;
use std::rc::Rc;

use log::debug;

use crate::highlighting::{sgr_pair, ColorScheme, Highlighter};
use crate::parsing::syntax_definition::{
    Action, CaptureMapping, ClearAmount, Context, ContextTarget, MatchAction, Syntax,
};
use crate::parsing::{ParseScopeError, PatternError, Region, Scope, ScopeStack, SyntaxSet};
use crate::LoadingError;

/// Errors that can occur while highlighting.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HighlightError {
    /// A pattern failed to expand or compile; named after the syntax and
    /// context so the offending rule can be found
    #[error("in syntax '{syntax}', context '{context}': {source}")]
    Pattern {
        syntax: String,
        context: String,
        #[source]
        source: PatternError,
    },
    /// A push or include named a context the syntax doesn't have
    #[error("context '{context}' not found in syntax '{syntax}'")]
    MissingContext { syntax: String, context: String },
    /// Lazy loading of an external syntax failed
    #[error(transparent)]
    Loading(#[from] LoadingError),
    #[error(transparent)]
    Scope(#[from] ParseScopeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Somehow the context stack emptied mid-line; a malformed syntax popped
    /// past `main`
    #[error("the context stack was popped past the main context")]
    PoppedMainContext,
}

/// One level of the runtime context stack.
struct Frame {
    syntax: Rc<Syntax>,
    /// Context name, for traces and error messages
    name: String,
    context: Rc<Context>,
    action_index: usize,
    /// Spliced by an include: pops silently when exhausted, owns no meta
    /// scopes, transparent to pop counting
    included: bool,
    /// The scope groups this frame pushed, popped exactly when it pops
    meta_scope: Option<String>,
    meta_content_scope: Option<String>,
    /// Set on the frame that launched a branch currently being speculated
    branch: Option<BranchState>,
    with_prototype: Option<Rc<WithPrototype>>,
    embed: Option<Rc<EmbedState>>,
}

/// A `with_prototype` splice remembers the syntax its body came from, so its
/// patterns expand with the right variables.
struct WithPrototype {
    context: Rc<Context>,
    syntax: Rc<Syntax>,
}

/// The armed escape of an `embed`, shared by every frame pushed above it.
struct EmbedState {
    escape: Rc<crate::parsing::Regex>,
    /// Stack height to unwind to when the escape matches
    rollback_id: usize,
    content_scope: Option<String>,
    captures: Option<CaptureMapping>,
    /// Syntax whose variables the escape pattern expands with
    origin: Rc<Syntax>,
}

/// Everything needed to roll a speculative branch back: the candidates still
/// untried, the unconsumed input and position at launch time, and which
/// redirect buffer this branch writes into.
struct BranchState {
    /// Stack height of the speculatively-pushed candidate, one above the
    /// launching frame
    ctx_id: usize,
    branch_point: Option<String>,
    candidates: Vec<String>,
    next_candidate: usize,
    prev_text: String,
    prev_pos: usize,
    redirect_index: usize,
}

/// The engine. Owns the syntax set (lazy loads go through it), the color
/// scheme resolver, the context and scope stacks, and the output sink.
///
/// Drive it with [`begin`], then [`process`] once per input line (with its
/// trailing newline), then [`end`]:
///
/// ```no_run
/// use synterm::highlighting::ColorScheme;
/// use synterm::interpreter::SyntaxHighlighter;
/// use synterm::parsing::SyntaxSet;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut syntaxes = SyntaxSet::new("syntax");
/// let main = syntaxes.load("Default")?;
/// let scheme = ColorScheme::load_from_file("color-scheme/Default.sublime-color-scheme")?;
/// let mut hl = SyntaxHighlighter::new(syntaxes, main, scheme, std::io::stdout(), false);
/// hl.begin()?;
/// hl.process("fn main() {}\n")?;
/// hl.end()?;
/// # Ok(())
/// # }
/// ```
///
/// [`begin`]: #method.begin
/// [`process`]: #method.process
/// [`end`]: #method.end
pub struct SyntaxHighlighter<W: Write> {
    syntaxes: SyntaxSet,
    main_syntax: Rc<Syntax>,
    styles: Highlighter,
    out: W,
    /// Speculation buffers, innermost last; writes land in the top one
    redirects: Vec<String>,
    stack: Vec<Frame>,
    scopes: ScopeStack,
    show_scopes: bool,
    /// Whether begin() pushed the syntax's default scope group
    base_scope_pushed: bool,
    region: Region,
}

impl<W: Write> SyntaxHighlighter<W> {
    pub fn new(
        syntaxes: SyntaxSet,
        main_syntax: Rc<Syntax>,
        scheme: ColorScheme,
        out: W,
        show_scopes: bool,
    ) -> SyntaxHighlighter<W> {
        SyntaxHighlighter {
            syntaxes,
            main_syntax,
            styles: Highlighter::new(scheme),
            out,
            redirects: Vec::new(),
            stack: Vec::new(),
            scopes: ScopeStack::new(),
            show_scopes,
            base_scope_pushed: false,
            region: Region::new(),
        }
    }

    /// Consume the engine and hand back the output sink.
    pub fn finish(self) -> W {
        self.out
    }

    /// Flush the underlying sink. Speculation buffers are not affected.
    pub fn flush(&mut self) -> Result<(), HighlightError> {
        self.out.flush().map_err(HighlightError::Io)
    }

    /// Current height of the context stack, `main` included.
    pub fn context_depth(&self) -> usize {
        self.stack.len()
    }

    /// The scopes currently active at the cursor.
    pub fn scope_stack(&self) -> &ScopeStack {
        &self.scopes
    }

    /// Push `main` and the syntax's default scope. Must be called exactly
    /// once, before the first [`process`](#method.process).
    pub fn begin(&mut self) -> Result<(), HighlightError> {
        assert!(self.stack.is_empty(), "begin() called on a running engine");
        let main = self.main_syntax.clone();
        let main_ctx = main.context("main").ok_or_else(|| HighlightError::MissingContext {
            syntax: main.name.clone(),
            context: "main".to_owned(),
        })?;
        self.push_resolved(main.clone(), main_ctx, "main".to_owned(), false, true, None, None)?;

        // the file-level scope stays active for the whole run and pops last
        let scope = main.scope.clone();
        self.push_scope(&scope)?;
        self.base_scope_pushed = true;
        Ok(())
    }

    /// Consume one line of input, writing it back out colored. Rolling back a
    /// branch can rewind into text fed by earlier calls; feeding whole lines
    /// (with their newline) keeps the regexes behaving like the originals.
    pub fn process(&mut self, line: &str) -> Result<(), HighlightError> {
        if self.stack.is_empty() && !self.base_scope_pushed {
            // begin() was never called
            return Err(HighlightError::PoppedMainContext);
        }
        // active speculations must be able to restore text they haven't
        // consumed yet, including anything we are about to feed
        for frame in &mut self.stack {
            if let Some(branch) = &mut frame.branch {
                branch.prev_text.push_str(line);
            }
        }

        let mut text = line.to_owned();
        let mut pos = 0;
        while pos < text.len() {
            // popping the last frame (a `set` out of main, an embed escape
            // unwinding everything) implicitly restarts main
            if self.stack.is_empty() {
                self.restore_main()?;
            }
            let top = self.stack.len() - 1;
            let action_index = self.stack[top].action_index;

            // the way out of an embedded region is checked before the
            // region's own rules, once per scan round
            if action_index == 0 && self.stack[top].embed.is_some() {
                if self.try_embed_escape(&mut text, &mut pos)? {
                    continue;
                }
            }

            let context = self.stack[top].context.clone();
            if action_index >= context.actions.len() {
                if self.stack[top].included {
                    self.pop_context(true)?;
                    continue;
                }
                // nothing matched here: one character passes through
                // verbatim and the frame starts over
                let ch_len = text[pos..].chars().next().map_or(1, char::len_utf8);
                let ch = text[pos..pos + ch_len].to_owned();
                self.write_str(&ch)?;
                pos += ch_len;
                self.reset_context(top)?;
                continue;
            }

            self.stack[top].action_index = action_index + 1;
            match &context.actions[action_index] {
                Action::Match(action) => {
                    self.dispatch_match(action, &mut text, &mut pos)?;
                }
                Action::Include(target) => {
                    let syntax = self.stack[top].syntax.clone();
                    self.push_context(
                        std::slice::from_ref(target),
                        true,
                        Some(syntax),
                        true,
                        None,
                        None,
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Unwind the whole stack, closing every scope that is still open.
    pub fn end(&mut self) -> Result<(), HighlightError> {
        while !self.stack.is_empty() {
            self.pop_context(true)?;
        }
        if self.base_scope_pushed {
            self.pop_scope()?;
            self.base_scope_pushed = false;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // output writer

    fn write_str(&mut self, s: &str) -> Result<(), HighlightError> {
        if let Some(buffer) = self.redirects.last_mut() {
            buffer.push_str(s);
            Ok(())
        } else {
            self.out.write_all(s.as_bytes()).map_err(HighlightError::Io)
        }
    }

    /// Push one scope group (the string may hold several space-separated
    /// scopes) and emit the style that now applies.
    fn push_scope(&mut self, scopes: &str) -> Result<(), HighlightError> {
        let parts: Vec<&str> = scopes.split_whitespace().collect();
        self.scopes.open_group(parts.len());
        for part in parts {
            let scope = Scope::new(part)?;
            self.scopes.push(scope);
            let (fg, bg) = self.styles.token_color(self.scopes.as_slice(), None);
            let sgr = sgr_pair(fg, bg);
            self.write_str(&sgr)?;
            if self.show_scopes {
                let tag = format!("<{}>", part);
                self.write_str(&tag)?;
            }
        }
        Ok(())
    }

    /// Pop the most recent scope group, emitting the style that applies
    /// after each scope closes.
    fn pop_scope(&mut self) -> Result<(), HighlightError> {
        let npops = self.scopes.close_group();
        for _ in 0..npops {
            let popped = self.scopes.pop();
            debug_assert!(popped.is_some(), "scope stack underflow");
            if self.show_scopes {
                if let Some(scope) = &popped {
                    let tag = format!("</{}>", scope.build_string());
                    self.write_str(&tag)?;
                }
            }
            let (fg, bg) = self.styles.token_color(self.scopes.as_slice(), None);
            let sgr = sgr_pair(fg, bg);
            self.write_str(&sgr)?;
        }
        Ok(())
    }

    fn write_token(&mut self, token: &str) -> Result<(), HighlightError> {
        let (fg, bg) = self.styles.token_color(self.scopes.as_slice(), Some(token));
        let sgr = sgr_pair(fg, bg);
        self.write_str(&sgr)?;
        self.write_str(token)
    }

    // ------------------------------------------------------------------
    // context stack

    fn top_syntax(&self) -> Rc<Syntax> {
        self.stack
            .last()
            .map_or_else(|| self.main_syntax.clone(), |f| f.syntax.clone())
    }

    /// Push every target in order; the rightmost ends up on top of the stack
    /// and is scanned first.
    fn push_context(
        &mut self,
        targets: &[ContextTarget],
        included: bool,
        syntax: Option<Rc<Syntax>>,
        do_meta_scope: bool,
        with_prototype: Option<Rc<WithPrototype>>,
        embed: Option<Rc<EmbedState>>,
    ) -> Result<(), HighlightError> {
        // resolve the owning syntax once; mixing in the prototype splices of
        // a grown stack must not change where names resolve
        let base_syntax = syntax.unwrap_or_else(|| self.top_syntax());
        for target in targets {
            self.push_one(
                target,
                base_syntax.clone(),
                included,
                do_meta_scope,
                with_prototype.clone(),
                embed.clone(),
            )?;
        }
        Ok(())
    }

    fn push_one(
        &mut self,
        target: &ContextTarget,
        syntax: Rc<Syntax>,
        included: bool,
        do_meta_scope: bool,
        with_prototype: Option<Rc<WithPrototype>>,
        embed: Option<Rc<EmbedState>>,
    ) -> Result<(), HighlightError> {
        let resolved = match target {
            ContextTarget::Named(name) => match syntax.context(name) {
                Some(context) => Some((syntax, context, name.clone())),
                // a syntax without a prototype is fine, anything else
                // missing is a configuration error
                None if name == "prototype" => None,
                None => {
                    return Err(HighlightError::MissingContext {
                        syntax: syntax.name.clone(),
                        context: name.clone(),
                    })
                }
            },
            ContextTarget::ByScope { scope, sub_context } => {
                let ext = self.syntaxes.load_by_scope(scope)?;
                let name = sub_context.clone().unwrap_or_else(|| "main".to_owned());
                match ext.context(&name) {
                    Some(context) => Some((ext, context, name)),
                    None => {
                        return Err(HighlightError::MissingContext {
                            syntax: ext.name.clone(),
                            context: name,
                        })
                    }
                }
            }
            ContextTarget::File { name } => {
                let ext = self.syntaxes.load(name)?;
                match ext.context("main") {
                    Some(context) => Some((ext, context, "main".to_owned())),
                    None => {
                        return Err(HighlightError::MissingContext {
                            syntax: ext.name.clone(),
                            context: "main".to_owned(),
                        })
                    }
                }
            }
            ContextTarget::Inline(context) => {
                Some((syntax, context.clone(), "<anonymous>".to_owned()))
            }
        };
        let Some((syntax, context, name)) = resolved else {
            return Ok(());
        };
        self.push_resolved(syntax, context, name, included, do_meta_scope, with_prototype, embed)
    }

    fn push_resolved(
        &mut self,
        syntax: Rc<Syntax>,
        context: Rc<Context>,
        name: String,
        included: bool,
        do_meta_scope: bool,
        with_prototype: Option<Rc<WithPrototype>>,
        embed: Option<Rc<EmbedState>>,
    ) -> Result<(), HighlightError> {
        // frames inherit the speculation prototype and the embed escape of
        // the frame they sit on, unless the push supplies its own
        let with_prototype =
            with_prototype.or_else(|| self.stack.last().and_then(|f| f.with_prototype.clone()));
        let embed = embed.or_else(|| self.stack.last().and_then(|f| f.embed.clone()));

        let mut frame = Frame {
            syntax,
            name: name.clone(),
            context: context.clone(),
            action_index: 0,
            included,
            meta_scope: None,
            meta_content_scope: None,
            branch: None,
            with_prototype,
            embed,
        };

        if !included {
            if let Some(amount) = context.clear_scopes {
                self.clear_scopes(amount)?;
            }
            if let Some(meta_scope) = &context.meta_scope {
                frame.meta_scope = Some(meta_scope.clone());
                if do_meta_scope {
                    self.push_scope(meta_scope)?;
                }
            }
            if let Some(meta_content_scope) = &context.meta_content_scope {
                frame.meta_content_scope = Some(meta_content_scope.clone());
                self.push_scope(meta_content_scope)?;
            }
        }

        self.stack.push(frame);
        debug!("push: {}", self.stack_trace());
        if !included && name != "prototype" {
            self.reset_context(self.stack.len() - 1)?;
        }
        Ok(())
    }

    /// `clear_scopes`: close the meta scopes of the nearest N real frames, so
    /// the new context colors as if those frames weren't there.
    fn clear_scopes(&mut self, amount: ClearAmount) -> Result<(), HighlightError> {
        let mut remaining = match amount {
            ClearAmount::All => self.stack.len(),
            ClearAmount::TopN(n) => n,
        };
        debug!("clear_scopes: n: {}", remaining);
        let mut i = self.stack.len();
        while i > 0 && remaining > 0 {
            i -= 1;
            if self.stack[i].included {
                continue;
            }
            if self.stack[i].meta_content_scope.take().is_some() {
                self.pop_scope()?;
            }
            if self.stack[i].meta_scope.take().is_some() {
                self.pop_scope()?;
            }
            remaining -= 1;
        }
        Ok(())
    }

    fn pop_context(&mut self, handle_branching: bool) -> Result<Frame, HighlightError> {
        debug!("pop: {}", self.stack_trace());
        let mut frame = self.stack.pop().ok_or(HighlightError::PoppedMainContext)?;
        if !frame.included {
            if frame.meta_content_scope.take().is_some() {
                self.pop_scope()?;
            }
            if frame.meta_scope.take().is_some() {
                self.pop_scope()?;
            }
        }
        if handle_branching {
            if let Some(meta) = self.stack.last_mut().and_then(|f| f.branch.take()) {
                // the candidate popped cleanly back to the launching frame:
                // the speculation succeeded, its output becomes real
                debug!("branch success: {} of {:?}", frame.name, meta.branch_point);
                debug_assert_eq!(self.redirects.len(), meta.redirect_index + 1);
                let buffer = self.redirects.pop().unwrap_or_default();
                self.write_str(&buffer)?;
            }
        }
        debug_assert!(frame.branch.is_none(), "popped a frame with live speculation");
        Ok(frame)
    }

    /// Sublime treats the top level specially: when main is popped off (by a
    /// `set` out of it, or an embed escape unwinding the whole stack) it is
    /// immediately re-added, meta scopes and all.
    fn restore_main(&mut self) -> Result<(), HighlightError> {
        debug!("main was popped, restoring it");
        let main = self.main_syntax.clone();
        let main_ctx = main.context("main").ok_or_else(|| HighlightError::MissingContext {
            syntax: main.name.clone(),
            context: "main".to_owned(),
        })?;
        self.push_resolved(main, main_ctx, "main".to_owned(), false, true, None, None)
    }

    /// Start a frame's scan over: action index to 0, prototype and
    /// `with_prototype` spliced back on top.
    fn reset_context(&mut self, index: usize) -> Result<(), HighlightError> {
        debug_assert_eq!(index, self.stack.len() - 1);
        debug_assert!(!self.stack[index].included, "cannot reset an included frame");
        self.stack[index].action_index = 0;
        if self.stack[index].name == "prototype" {
            return Ok(());
        }

        if let Some(wp) = self.stack[index].with_prototype.clone() {
            self.push_resolved(
                wp.syntax.clone(),
                wp.context.clone(),
                "<with_prototype>".to_owned(),
                true,
                true,
                None,
                None,
            )?;
        }
        if self.stack[index].context.meta_include_prototype {
            let syntax = self.stack[index].syntax.clone();
            if let Some(prototype) = syntax.context("prototype") {
                self.push_resolved(syntax, prototype, "prototype".to_owned(), true, true, None, None)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // match dispatch

    fn dispatch_match(
        &mut self,
        action: &MatchAction,
        text: &mut String,
        pos: &mut usize,
    ) -> Result<(), HighlightError> {
        let top = self.stack.len() - 1;
        let frame_syntax = self.stack[top].syntax.clone();
        let frame_name = self.stack[top].name.clone();

        let span = action
            .pattern
            .match_at(text, *pos, &frame_syntax.variables, &mut self.region)
            .map_err(|e| HighlightError::Pattern {
                syntax: frame_syntax.name.clone(),
                context: frame_name.clone(),
                source: e,
            })?;
        let Some((mbegin, mend)) = span else {
            return Ok(());
        };
        debug!(
            "match: ctx: {} pattern: {:?} span: {}..{}",
            frame_name,
            action.pattern.regex_str(),
            mbegin,
            mend
        );
        *pos = mend;

        let with_prototype = action.with_prototype.as_ref().map(|context| {
            Rc::new(WithPrototype {
                context: context.clone(),
                syntax: frame_syntax.clone(),
            })
        });

        // arm the escape before anything moves the capture region
        let embed_state = action.embed.as_ref().map(|def| {
            Rc::new(EmbedState {
                escape: def.escape_for_match(&self.region, text),
                rollback_id: self.stack.iter().rposition(|f| !f.included).unwrap_or(top),
                content_scope: def.embed_scope.clone(),
                captures: def.escape_captures.clone(),
                origin: frame_syntax.clone(),
            })
        });

        // a pushed context's meta_scope covers the text that pushed it
        let mut early_meta = false;
        if let Some(targets) = &action.push {
            if let [target] = targets.as_slice() {
                let peeked = match target {
                    ContextTarget::Named(name) => frame_syntax.context(name),
                    ContextTarget::Inline(context) => Some(context.clone()),
                    _ => None,
                };
                if let Some(meta_scope) = peeked.as_ref().and_then(|c| c.meta_scope.clone()) {
                    self.push_scope(&meta_scope)?;
                    early_meta = true;
                }
            }
        }

        if mbegin < mend {
            if let Some(scope) = &action.scope {
                self.push_scope(scope)?;
            }
            self.emit_region(text, mbegin, mend, action.captures.as_ref())?;
            if action.scope.is_some() {
                self.pop_scope()?;
            }
        }

        let has_push = action.push.is_some();
        let has_branch = action.branch.is_some();
        let has_fail = action.fail.is_some();

        if let Some(pop_count) = action.pop {
            // included splices go along with their owning frame; a frame
            // holding branch metadata counts even when included
            let handle_branching = !has_push;
            let mut popped = 0;
            while popped < pop_count {
                let counts = {
                    let frame = self.stack.last().ok_or(HighlightError::PoppedMainContext)?;
                    !frame.included || frame.branch.is_some()
                };
                if counts {
                    popped += 1;
                }
                self.pop_context(handle_branching)?;
            }
            if !has_push && !has_branch && !has_fail {
                if self.stack.is_empty() {
                    self.restore_main()?;
                }
                loop {
                    let frame = self.stack.last().ok_or(HighlightError::PoppedMainContext)?;
                    if frame.included && frame.branch.is_none() {
                        self.pop_context(handle_branching)?;
                    } else {
                        break;
                    }
                }
                let frame = self.stack.last().ok_or(HighlightError::PoppedMainContext)?;
                if !frame.included && frame.branch.is_none() {
                    self.reset_context(self.stack.len() - 1)?;
                }
            }
        }

        if has_push {
            if let Some(embed) = &embed_state {
                if let Some(content_scope) = embed.content_scope.clone() {
                    self.push_scope(&content_scope)?;
                }
            }
            self.push_context(
                action.push.as_ref().unwrap(),
                false,
                None,
                !early_meta,
                with_prototype,
                embed_state,
            )?;
        } else if let Some(candidates) = &action.branch {
            if let Some(first) = candidates.first().cloned() {
                if self.stack.is_empty() {
                    self.restore_main()?;
                }
                let launch = self.stack.len() - 1;
                debug!(
                    "branch init: {:?} @ {} (pos: {}) to: {}",
                    action.branch_point, self.stack[launch].name, pos, first
                );
                self.stack[launch].branch = Some(BranchState {
                    ctx_id: self.stack.len(),
                    branch_point: action.branch_point.clone(),
                    candidates: candidates.clone(),
                    next_candidate: 1,
                    prev_text: text.clone(),
                    prev_pos: *pos,
                    redirect_index: self.redirects.len(),
                });
                self.redirects.push(String::new());
                self.push_context(&[ContextTarget::Named(first)], false, None, true, with_prototype, None)?;
            }
        } else if let Some(label) = &action.fail {
            self.fail_branch(label, with_prototype, text, pos)?;
        } else if action.pop.is_none() {
            // a plain match: unless it consumed nothing (in which case
            // rescanning from the top would loop forever), unwind include
            // splices and rescan the owning context
            if mbegin < mend {
                loop {
                    let frame = self.stack.last().ok_or(HighlightError::PoppedMainContext)?;
                    if frame.included && frame.branch.is_none() {
                        self.pop_context(true)?;
                    } else {
                        break;
                    }
                }
                let frame = self.stack.last().ok_or(HighlightError::PoppedMainContext)?;
                if !frame.included && frame.branch.is_none() {
                    self.reset_context(self.stack.len() - 1)?;
                }
            }
        }
        Ok(())
    }

    /// Write `[mbegin, mend)` of the current match, either as one token or
    /// split along capture group spans.
    fn emit_region(
        &mut self,
        text: &str,
        mbegin: usize,
        mend: usize,
        captures: Option<&CaptureMapping>,
    ) -> Result<(), HighlightError> {
        let Some(captures) = captures else {
            return self.write_token(&text[mbegin..mend]);
        };
        let mut cursor = mbegin;
        for (cap_index, cap_scope) in captures {
            let Some((gmbegin, gmend)) = self.region.pos(*cap_index) else {
                continue;
            };
            // a span behind the cursor would re-emit text already written
            if gmbegin < cursor || gmbegin >= gmend {
                continue;
            }
            if cursor < gmbegin {
                let plain = text[cursor..gmbegin].to_owned();
                self.write_token(&plain)?;
            }
            let scoped = text[gmbegin..gmend].to_owned();
            self.push_scope(cap_scope)?;
            self.write_token(&scoped)?;
            self.pop_scope()?;
            cursor = gmend;
        }
        if cursor < mend {
            let tail = text[cursor..mend].to_owned();
            self.write_token(&tail)?;
        }
        Ok(())
    }

    /// `fail: label`: roll the nearest matching speculation back and try its
    /// next candidate. With no candidate left the branch is abandoned: the
    /// original sink is restored and scanning resumes from the rollback
    /// position as if nothing was consumed.
    fn fail_branch(
        &mut self,
        label: &str,
        with_prototype: Option<Rc<WithPrototype>>,
        text: &mut String,
        pos: &mut usize,
    ) -> Result<(), HighlightError> {
        let rollback_index = self.stack.iter().rposition(|f| {
            f.branch
                .as_ref()
                .map_or(false, |b| b.branch_point.as_deref() == Some(label))
        });
        let Some(rollback_index) = rollback_index else {
            // no such branch point on the stack: a documented no-op
            debug!("fail: branch point {:?} not found", label);
            return Ok(());
        };

        let pops = self.stack.len() - self.stack[rollback_index].branch.as_ref().unwrap().ctx_id;
        debug!("branch failed: revert point {:?} ({} pops)", label, pops);
        for _ in 0..pops {
            self.pop_context(false)?;
        }

        let (prev_pos, prev_text, redirect_index, next) = {
            let meta = self.stack[rollback_index].branch.as_mut().unwrap();
            let next = meta.candidates.get(meta.next_candidate).cloned();
            meta.next_candidate += 1;
            (meta.prev_pos, meta.prev_text.clone(), meta.redirect_index, next)
        };
        *pos = prev_pos;
        *text = prev_text;
        // everything speculated since the snapshot is discarded
        self.redirects.truncate(redirect_index);

        match next {
            Some(name) => {
                debug!("branch next: {:?} to: {}", label, name);
                self.redirects.push(String::new());
                self.push_context(&[ContextTarget::Named(name)], false, None, true, with_prototype, None)?;
            }
            None => {
                debug!("branch exhausted: {:?}", label);
                self.stack[rollback_index].branch = None;
            }
        }
        Ok(())
    }

    /// Escape check for an embedded region; returns true when the escape
    /// matched and the stack was unwound.
    fn try_embed_escape(
        &mut self,
        text: &mut String,
        pos: &mut usize,
    ) -> Result<bool, HighlightError> {
        let top = self.stack.len() - 1;
        let embed = match &self.stack[top].embed {
            Some(embed) => embed.clone(),
            None => return Ok(false),
        };
        let span = embed
            .escape
            .match_at(text, *pos, &embed.origin.variables, &mut self.region)
            .map_err(|e| HighlightError::Pattern {
                syntax: embed.origin.name.clone(),
                context: "<embed escape>".to_owned(),
                source: e,
            })?;
        let Some((mbegin, mend)) = span else {
            return Ok(false);
        };

        let pops = self.stack.len() - embed.rollback_id;
        debug!("embed escape: span: {}..{} rollback pops: {}", mbegin, mend, pops);
        if embed.content_scope.is_some() {
            self.pop_scope()?;
        }
        self.emit_region(text, mbegin, mend, embed.captures.as_ref())?;
        for _ in 0..pops {
            self.pop_context(false)?;
        }
        *pos = mend;
        Ok(true)
    }

    fn stack_trace(&self) -> String {
        self.stack
            .iter()
            .rev()
            .map(|f| {
                format!(
                    "{}{}{}{}({})",
                    f.name,
                    if f.included { "(inc)" } else { "" },
                    if f.branch.is_some() { "(branch)" } else { "" },
                    if f.embed.is_some() { "(embed)" } else { "" },
                    f.syntax.name
                )
            })
            .collect::<Vec<String>>()
            .join(" <- ")
    }
}
