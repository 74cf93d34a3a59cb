//! Line editor integration: tab completion backed by the dispatcher.

use crate::command::ExecutionContext;
use crate::dispatcher::Dispatcher;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper};
use std::any::Any;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use tracing::warn;

/// `rustyline` helper completing the statement under the cursor.
pub struct ShellHelper {
    dispatcher: Rc<RefCell<Dispatcher>>,
    context: Option<Rc<dyn ExecutionContext>>,
}

impl ShellHelper {
    pub fn new(
        dispatcher: Rc<RefCell<Dispatcher>>,
        context: Option<Rc<dyn ExecutionContext>>,
    ) -> Self {
        Self {
            dispatcher,
            context,
        }
    }

    /// Candidates for the word ending at `pos`, and where that word starts.
    pub fn candidates(&self, line: &str, pos: usize) -> (usize, Vec<String>) {
        let partial = line.get(..pos).unwrap_or(line);
        let start = word_start(partial);
        let Ok(dispatcher) = self.dispatcher.try_borrow() else {
            return (start, Vec::new());
        };
        let statement = match dispatcher.separator() {
            Some(sep) => partial
                .rfind(sep)
                .map_or(partial, |at| &partial[at + sep.len_utf8()..]),
            None => partial,
        };
        let word = &partial[start..];
        let context = self.context.as_deref();
        let found = catch_unwind(AssertUnwindSafe(|| {
            dispatcher.complete_line(context, statement, word)
        }));
        drop(dispatcher);
        match found {
            Ok(found) => (start, found),
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                warn!(line = partial, cause, "completion panicked");
                if let Ok(mut dispatcher) = self.dispatcher.try_borrow_mut() {
                    dispatcher.report(format_args!(
                        "An error occurred while TAB-completing: {cause}"
                    ));
                }
                (start, Vec::new())
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown cause")
}

fn word_start(partial: &str) -> usize {
    partial
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(at, c)| at + c.len_utf8())
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let (start, found) = self.candidates(line, pos);
        let pairs = found
            .into_iter()
            .map(|candidate| Pair {
                display: candidate.clone(),
                replacement: candidate,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Hinter for ShellHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<Self::Hint> {
        None
    }
}

impl Highlighter for ShellHelper {}

impl Validator for ShellHelper {}

impl Helper for ShellHelper {}
