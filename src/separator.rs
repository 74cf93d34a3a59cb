//! Incremental statement boundary detection.
//!
//! Raw input is appended as it arrives; [`StatementSeparator::move_next`]
//! feeds it character by character through a pluggable [`StatementRules`]
//! transition function until a statement may be complete. The caller then
//! either accepts it ([`consumed`](StatementSeparator::consumed)) or asks for
//! more input on the same statement ([`cont`](StatementSeparator::cont)).

use crate::error::StatementError;
use tracing::trace;

/// Scanner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParseState {
    /// Before the first character of a statement; leading whitespace is skipped.
    NewStatement,
    /// Inside a statement.
    Start,
    /// A statement ends here; nothing more is read until the caller decides.
    PotentialEndFound,
    /// Rule-specific states, e.g. inside a quoted string.
    Custom(u16),
}

/// One character presented to the rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseToken {
    /// State the character is read in.
    pub state: ParseState,
    /// The character, with `\r` already turned into `\n`.
    pub current: char,
    /// Whether only whitespace was read since the last newline.
    pub newline_seen: bool,
}

/// What the rules decided for one [`ParseToken`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ParseState,
    /// Character to add to the statement text.
    pub append: Option<char>,
    /// New value of the newline flag, if it changes.
    pub newline_seen: Option<bool>,
    /// Present the same character again in the `next` state.
    pub reprocess: bool,
}

impl Transition {
    pub fn to(next: ParseState) -> Self {
        Self {
            next,
            append: None,
            newline_seen: None,
            reprocess: false,
        }
    }

    pub fn append(mut self, c: char) -> Self {
        self.append = Some(c);
        self
    }

    pub fn newline_seen(mut self, seen: bool) -> Self {
        self.newline_seen = Some(seen);
        self
    }

    pub fn reprocess(mut self) -> Self {
        self.reprocess = true;
        self
    }
}

/// Transition function deciding where statements end.
pub trait StatementRules {
    fn parse(&mut self, token: &ParseToken) -> Transition;

    /// Called once per character after its transitions are done, with the
    /// state the character was read in. May add a character to the statement.
    fn post_parse(&mut self, _token: &ParseToken) -> Option<char> {
        None
    }
}

impl<R: StatementRules + ?Sized> StatementRules for Box<R> {
    fn parse(&mut self, token: &ParseToken) -> Transition {
        (**self).parse(token)
    }

    fn post_parse(&mut self, token: &ParseToken) -> Option<char> {
        (**self).post_parse(token)
    }
}

#[derive(Debug, Clone)]
struct Buffers {
    state: ParseState,
    input: String,
    output: String,
    newline_seen: bool,
}

impl Default for Buffers {
    fn default() -> Self {
        Self {
            state: ParseState::NewStatement,
            input: String::new(),
            output: String::new(),
            // input starts on a fresh line
            newline_seen: true,
        }
    }
}

/// Resumable statement scanner driven by a set of [`StatementRules`].
pub struct StatementSeparator<R> {
    rules: R,
    current: Buffers,
    saved: Vec<Buffers>,
}

impl<R: StatementRules> StatementSeparator<R> {
    pub fn new(rules: R) -> Self {
        Self {
            rules,
            current: Buffers::default(),
            saved: Vec::new(),
        }
    }

    pub fn rules(&self) -> &R {
        &self.rules
    }

    pub fn rules_mut(&mut self) -> &mut R {
        &mut self.rules
    }

    pub fn state(&self) -> ParseState {
        self.current.state
    }

    /// Queues more raw input.
    pub fn append(&mut self, text: &str) {
        self.current.input.push_str(text);
    }

    /// Scans queued input until a statement may be complete.
    ///
    /// Returns `Ok(false)` when the input ran out first. Calling this again
    /// before [`cont`](Self::cont) or [`consumed`](Self::consumed) is an error.
    pub fn move_next(&mut self) -> Result<bool, StatementError> {
        if self.current.state == ParseState::PotentialEndFound {
            return Err(StatementError::PendingStatement);
        }
        if self.current.input.is_empty() {
            return Ok(false);
        }
        self.parse_partial_input();
        Ok(self.current.state == ParseState::PotentialEndFound)
    }

    /// Text of the recognized statement, once `move_next` returned true.
    pub fn current(&self) -> Option<&str> {
        (self.current.state == ParseState::PotentialEndFound)
            .then_some(self.current.output.as_str())
    }

    /// Input queued but not scanned yet.
    pub fn pending_input(&self) -> &str {
        &self.current.input
    }

    /// Whether part of a statement has been read and not consumed.
    pub fn in_statement(&self) -> bool {
        self.current.state != ParseState::NewStatement && !self.current.output.trim().is_empty()
    }

    /// The statement is not finished: keep its text and resume scanning.
    pub fn cont(&mut self) {
        self.current.state = ParseState::Start;
    }

    /// The statement was used; the next scan starts a new one.
    pub fn consumed(&mut self) {
        self.current.state = ParseState::NewStatement;
    }

    /// Drops all queued input and the partial statement.
    pub fn discard(&mut self) {
        self.current.input.clear();
        self.current.output.clear();
        self.current.state = ParseState::NewStatement;
    }

    /// Saves the whole scanner state and starts from scratch.
    pub fn push(&mut self) {
        let saved = std::mem::take(&mut self.current);
        self.saved.push(saved);
    }

    /// Restores the state saved by the matching [`push`](Self::push).
    pub fn pop(&mut self) -> Result<(), StatementError> {
        self.current = self.saved.pop().ok_or(StatementError::EmptyStack)?;
        Ok(())
    }

    fn parse_partial_input(&mut self) {
        let buffers = &mut self.current;
        let mut state = buffers.state;
        let mut last_eoline = buffers.newline_seen;

        if state == ParseState::NewStatement {
            buffers.output.clear();
            let mut skipped = 0;
            for c in buffers.input.chars() {
                if !c.is_whitespace() {
                    break;
                }
                buffers.newline_seen = c == '\n';
                skipped += c.len_utf8();
            }
            buffers.input.drain(..skipped);
        }

        if buffers.input.is_empty() {
            state = ParseState::PotentialEndFound;
        }

        let mut pos = 0;
        let mut read_in = state;
        while state != ParseState::PotentialEndFound {
            let Some(raw) = buffers.input[pos..].chars().next() else {
                break;
            };
            let current = if raw == '\r' { '\n' } else { raw };
            if current == '\n' {
                buffers.newline_seen = true;
            }

            loop {
                let token = ParseToken {
                    state,
                    current,
                    newline_seen: last_eoline,
                };
                let transition = self.rules.parse(&token);
                state = transition.next;
                if let Some(seen) = transition.newline_seen {
                    last_eoline = seen;
                }
                if let Some(c) = transition.append {
                    buffers.output.push(c);
                }
                if !transition.reprocess {
                    break;
                }
            }

            let post = ParseToken {
                state: read_in,
                current,
                newline_seen: last_eoline,
            };
            if let Some(c) = self.rules.post_parse(&post) {
                buffers.output.push(c);
            }

            read_in = state;
            pos += raw.len_utf8();
            // the newline flag survives only across whitespace
            last_eoline &= current.is_whitespace();
        }

        buffers.input.drain(..pos);
        buffers.state = state;
        if state == ParseState::PotentialEndFound {
            trace!(statement = %buffers.output, "statement boundary");
        }
    }
}

const IN_SINGLE_QUOTE: ParseState = ParseState::Custom(1);
const IN_DOUBLE_QUOTE: ParseState = ParseState::Custom(2);
const CLOSING_SINGLE_QUOTE: ParseState = ParseState::Custom(3);
const CLOSING_DOUBLE_QUOTE: ParseState = ParseState::Custom(4);

/// Statements end at a newline or at the configured separator character.
///
/// Both delimiters are kept at the end of the statement text. Single and
/// double quoted strings may span separators and lines; inside them a doubled
/// quote character stands for the quote itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimiterRules {
    separator: Option<char>,
}

impl DelimiterRules {
    pub fn new(separator: Option<char>) -> Self {
        Self { separator }
    }

    pub fn separator(&self) -> Option<char> {
        self.separator
    }
}

impl Default for DelimiterRules {
    fn default() -> Self {
        Self::new(Some(';'))
    }
}

impl StatementRules for DelimiterRules {
    fn parse(&mut self, token: &ParseToken) -> Transition {
        let c = token.current;
        match token.state {
            IN_SINGLE_QUOTE => match c {
                '\'' => Transition::to(CLOSING_SINGLE_QUOTE).append(c),
                _ => Transition::to(IN_SINGLE_QUOTE).append(c),
            },
            IN_DOUBLE_QUOTE => match c {
                '"' => Transition::to(CLOSING_DOUBLE_QUOTE).append(c),
                _ => Transition::to(IN_DOUBLE_QUOTE).append(c),
            },
            // a quote right after a closing one is an escaped quote
            CLOSING_SINGLE_QUOTE if c == '\'' => Transition::to(IN_SINGLE_QUOTE).append(c),
            CLOSING_DOUBLE_QUOTE if c == '"' => Transition::to(IN_DOUBLE_QUOTE).append(c),
            CLOSING_SINGLE_QUOTE | CLOSING_DOUBLE_QUOTE => {
                Transition::to(ParseState::Start).reprocess()
            }
            _ if Some(c) == self.separator => {
                Transition::to(ParseState::PotentialEndFound).append(c)
            }
            _ => match c {
                '\n' => Transition::to(ParseState::PotentialEndFound)
                    .append(c)
                    .newline_seen(true),
                '\'' => Transition::to(IN_SINGLE_QUOTE).append(c),
                '"' => Transition::to(IN_DOUBLE_QUOTE).append(c),
                _ => Transition::to(ParseState::Start).append(c),
            },
        }
    }
}
