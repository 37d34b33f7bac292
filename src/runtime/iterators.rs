//! Iteration.
//!
//! [`ValueIter`] walks a runtime value. [`LazyIter`] is the iterator object
//! returned by generator expressions, `enumerate`, `map`, `filter`,
//! `reversed` and `zip`: it computes one item per request and is used up
//! once it has produced them all, so `any(...)` and `break` stop the work
//! early.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use crate::compiler::ast::{BinOp, FunctionDecl, GeneratorExp};

use super::fault::{raise, ExcType, RuntimeResult};
use super::interpreter::Interpreter;
use super::ops;
use super::value::{drop_values, Args, List, Range, Scope, Tuple, Value};

/// Walk over a runtime value. Lists are walked live, so appending to a list
/// while looping over it is observed; dicts and sets are snapshotted.
pub enum ValueIter {
    Range { range: Range, index: usize },
    /// `remaining` items are still ahead, counted from the end.
    RangeReversed { range: Range, remaining: usize },
    List { list: Rc<List>, index: usize },
    /// Live walk from the end. A list that shrinks below the position ends it.
    ListReversed { list: Rc<List>, remaining: usize },
    Tuple { tuple: Rc<Tuple>, index: usize },
    Chars { text: Rc<str>, offset: usize },
    Items(std::vec::IntoIter<Value>),
    Lazy(Rc<LazyIter>),
}

impl ValueIter {
    /// The next item, or `None` once the walk is over.
    pub fn next_item(&mut self, interp: &mut Interpreter) -> RuntimeResult<Option<Value>> {
        Ok(match self {
            ValueIter::Range { range, index } => {
                if *index >= range.len() {
                    return Ok(None);
                }
                let value = range.get(*index);
                *index += 1;
                Some(Value::Int(value))
            }
            ValueIter::RangeReversed { range, remaining } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                *remaining -= 1;
                Some(Value::Int(range.get(*remaining)))
            }
            ValueIter::List { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            ValueIter::ListReversed { list, remaining } => {
                let position = remaining.checked_sub(1);
                let item = position.and_then(|p| list.borrow().get(p).cloned());
                *remaining = if item.is_some() { *remaining - 1 } else { 0 };
                item
            }
            ValueIter::Tuple { tuple, index } => {
                let item = tuple.get(*index).cloned();
                *index += 1;
                item
            }
            ValueIter::Chars { text, offset } => {
                let Some(ch) = text.get(*offset..).and_then(|rest| rest.chars().next()) else {
                    return Ok(None);
                };
                *offset += ch.len_utf8();
                Some(Value::from(ch.to_string()))
            }
            ValueIter::Items(items) => items.next(),
            ValueIter::Lazy(iter) => return iter.next_item(interp),
        })
    }

    fn into_values(self, out: &mut Vec<Value>) {
        match self {
            ValueIter::List { list, .. } | ValueIter::ListReversed { list, .. } => {
                out.push(Value::List(list))
            }
            ValueIter::Tuple { tuple, .. } => out.push(Value::Tuple(tuple)),
            ValueIter::Items(items) => out.extend(items),
            ValueIter::Lazy(iter) => out.push(Value::Iterator(iter)),
            ValueIter::Range { .. } | ValueIter::RangeReversed { .. } | ValueIter::Chars { .. } => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IterKind {
    Generator,
    Enumerate,
    Map,
    Filter,
    Reversed,
    Zip,
}

impl IterKind {
    pub fn name(self) -> &'static str {
        match self {
            IterKind::Generator => "generator",
            IterKind::Enumerate => "enumerate",
            IterKind::Map => "map",
            IterKind::Filter => "filter",
            IterKind::Reversed => "reversed",
            IterKind::Zip => "zip",
        }
    }
}

/// Where an iterator object is in its work.
pub enum IterState {
    Generator(GeneratorState),
    Enumerate { inner: ValueIter, counter: Value },
    Map { function: Value, inners: Vec<ValueIter> },
    /// A `None` predicate keeps the truthy items.
    Filter { predicate: Value, inner: ValueIter },
    Walk(ValueIter),
    Zip { inners: Vec<ValueIter> },
    Exhausted,
}

/// A suspended generator expression.
pub struct GeneratorState {
    pub body: Arc<GeneratorExp>,
    /// Name resolution of the frame that created it.
    pub decl: Option<Arc<FunctionDecl>>,
    pub scope: Option<Rc<Scope>>,
    /// Bindings of the enclosing comprehensions, then the generator's own.
    pub overlays: Vec<HashMap<String, Value>>,
    /// One walk per `for` clause entered, outermost first.
    pub levels: Vec<ValueIter>,
}

pub struct LazyIter {
    kind: IterKind,
    /// Empty while the iterator is computing an item.
    state: RefCell<Option<IterState>>,
}

impl LazyIter {
    pub fn new(kind: IterKind, state: IterState) -> Self {
        Self {
            kind,
            state: RefCell::new(Some(state)),
        }
    }

    pub fn kind(&self) -> IterKind {
        self.kind
    }

    /// Computes the next item. A generator that raised is finished; the
    /// builtin iterators stay usable after an error.
    pub fn next_item(&self, interp: &mut Interpreter) -> RuntimeResult<Option<Value>> {
        let Some(mut state) = self.state.borrow_mut().take() else {
            return raise(
                ExcType::ValueError,
                format!("{} already executing", self.kind.name()),
            );
        };
        let result = interp.nested(|interp| advance(&mut state, interp));
        let keep = match &result {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(_) => self.kind != IterKind::Generator,
        };
        if keep {
            *self.state.borrow_mut() = Some(state);
        } else {
            *self.state.borrow_mut() = Some(IterState::Exhausted);
            let mut held = Vec::new();
            release_state(state, &mut held);
            drop_values(held);
        }
        result
    }

    /// Empties the iterator and hands back everything it held, for cycle
    /// breaking at teardown.
    pub fn release(&self) -> Vec<Value> {
        let mut out = Vec::new();
        if let Ok(mut state) = self.state.try_borrow_mut() {
            if let Some(state) = state.replace(IterState::Exhausted) {
                release_state(state, &mut out);
            }
        }
        out
    }

    pub(crate) fn take_values(&mut self) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(state) = self.state.get_mut().take() {
            release_state(state, &mut out);
        }
        out
    }
}

impl Drop for LazyIter {
    fn drop(&mut self) {
        drop_values(self.take_values());
    }
}

fn release_state(state: IterState, out: &mut Vec<Value>) {
    match state {
        IterState::Generator(generator) => {
            for overlay in generator.overlays {
                out.extend(overlay.into_values());
            }
            for level in generator.levels {
                level.into_values(out);
            }
        }
        IterState::Enumerate { inner, counter } => {
            out.push(counter);
            inner.into_values(out);
        }
        IterState::Map { function, inners } => {
            out.push(function);
            for inner in inners {
                inner.into_values(out);
            }
        }
        IterState::Filter { predicate, inner } => {
            out.push(predicate);
            inner.into_values(out);
        }
        IterState::Walk(inner) => inner.into_values(out),
        IterState::Zip { inners } => {
            for inner in inners {
                inner.into_values(out);
            }
        }
        IterState::Exhausted => {}
    }
}

fn advance(state: &mut IterState, interp: &mut Interpreter) -> RuntimeResult<Option<Value>> {
    interp.tick()?;
    match state {
        IterState::Generator(generator) => interp.resume_generator(generator),
        IterState::Enumerate { inner, counter } => {
            let Some(item) = inner.next_item(interp)? else {
                return Ok(None);
            };
            let next = ops::binary_op(BinOp::Add, counter, &Value::Int(1), usize::MAX)?;
            let index = std::mem::replace(counter, next);
            Ok(Some(Value::tuple(vec![index, item])))
        }
        IterState::Map { function, inners } => {
            let Some(args) = next_row(inners, interp)? else {
                return Ok(None);
            };
            interp.call_value(function, Args::new(args)).map(Some)
        }
        IterState::Filter { predicate, inner } => {
            while let Some(item) = inner.next_item(interp)? {
                interp.tick()?;
                let keep = match &*predicate {
                    Value::None => item.is_truthy(),
                    function => interp
                        .call_value(function, Args::new(vec![item.clone()]))?
                        .is_truthy(),
                };
                if keep {
                    return Ok(Some(item));
                }
            }
            Ok(None)
        }
        IterState::Walk(inner) => inner.next_item(interp),
        IterState::Zip { inners } => Ok(next_row(inners, interp)?.map(Value::tuple)),
        IterState::Exhausted => Ok(None),
    }
}

/// One item from every walk, or `None` as soon as one of them is over.
fn next_row(inners: &mut [ValueIter], interp: &mut Interpreter) -> RuntimeResult<Option<Vec<Value>>> {
    if inners.is_empty() {
        return Ok(None);
    }
    let mut row = Vec::with_capacity(inners.len());
    for inner in inners.iter_mut() {
        match inner.next_item(interp)? {
            Some(item) => row.push(item),
            None => return Ok(None),
        }
    }
    Ok(Some(row))
}

/// Wraps a state in a fresh iterator value.
pub fn lazy(kind: IterKind, state: IterState) -> Value {
    Value::Iterator(Rc::new(LazyIter::new(kind, state)))
}
