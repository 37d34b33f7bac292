//! Tree-walking evaluator for compiled units.
//!
//! One `Interpreter` serves exactly one execution on the worker thread. It
//! owns the module scope, the capture sinks and the limiter, and polls the
//! limiter at every statement, loop iteration and call so a runaway program
//! stops at the deadline instead of occupying the worker forever.

use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::builtins;
use super::environment::CapabilitySet;
use super::fault::{raise, ExcType, Exception, RuntimeResult, Unwind};
use super::format::format_field;
use super::iterators::{self, GeneratorState, IterKind, IterState, ValueIter};
use super::methods;
use super::ops::{self, check_len};
use super::value::{
    Args, BoundMethod, DictEntries, Function, List, Range, Scope, SetEntries, StreamKind, Tuple,
    TypeKind, Value,
};
use crate::compiler::ast::*;
use crate::compiler::CompiledUnit;
use crate::sandbox::io::SandboxIo;
use crate::sandbox::limits::{ExecutionLimiter, ResourceLimits};

/// Ticks between two reads of the wall clock. The cancellation flag is
/// read on every tick.
const CLOCK_CHECK_INTERVAL: u64 = 1024;

/// Captured scopes are first pruned of dead entries once this many
/// accumulate. After each prune the next threshold is twice the survivors.
const CAPTURE_PRUNE_THRESHOLD: usize = 4096;

/// How a statement finished.
#[derive(Debug)]
enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// One activation: the module body or a function call.
struct Frame {
    decl: Option<Arc<FunctionDecl>>,
    scope: Option<Rc<Scope>>,
    /// Bindings of the comprehensions currently running in this frame,
    /// innermost last.
    overlays: Vec<HashMap<String, Value>>,
}

impl Frame {
    fn module() -> Self {
        Self {
            decl: None,
            scope: None,
            overlays: Vec::new(),
        }
    }
}

/// A resolved subscript.
enum Index {
    Item(Value),
    Slice {
        lower: Option<i64>,
        upper: Option<i64>,
        step: i64,
    },
}

enum Accumulator {
    List(Vec<Value>),
    Set(SetEntries),
    Dict(DictEntries),
}

pub struct Interpreter {
    capabilities: Arc<CapabilitySet>,
    io: SandboxIo,
    limiter: ExecutionLimiter,
    limits: ResourceLimits,
    globals: HashMap<String, Value>,
    frames: Vec<Frame>,
    call_depth: usize,
    peak_depth: usize,
    eval_depth: usize,
    ticks: u64,
    rng: StdRng,
    /// Exceptions whose `except` block is running, for bare `raise`.
    handling: Vec<Rc<Exception>>,
    /// Scopes that closures hold on to; swept at teardown to break cycles.
    captured: Vec<Weak<Scope>>,
    next_prune: usize,
    line: u32,
    truncation_reported: bool,
}

impl Interpreter {
    pub fn new(
        capabilities: Arc<CapabilitySet>,
        io: SandboxIo,
        limiter: ExecutionLimiter,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            capabilities,
            io,
            limiter,
            limits,
            globals: HashMap::new(),
            frames: Vec::new(),
            call_depth: 0,
            peak_depth: 0,
            eval_depth: 0,
            ticks: 0,
            rng: StdRng::from_entropy(),
            handling: Vec::new(),
            captured: Vec::new(),
            next_prune: CAPTURE_PRUNE_THRESHOLD,
            line: 0,
            truncation_reported: false,
        }
    }

    /// Runs the unit's body in a fresh module scope.
    pub fn run(&mut self, unit: &CompiledUnit) -> RuntimeResult<()> {
        self.frames.clear();
        self.frames.push(Frame::module());
        let result = self.exec_block(unit.body());
        self.frames.clear();
        result.map(|_| ())
    }

    /// Deepest user function nesting reached so far.
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    /// Line of the statement being executed (or that failed).
    pub fn current_line(&self) -> u32 {
        self.line
    }

    pub fn max_sequence_len(&self) -> usize {
        self.limits.max_sequence_len
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// `random.seed`: a fixed seed, or fresh entropy for `None`.
    pub fn reseed(&mut self, seed: Option<u64>) {
        self.rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
    }

    /// Cooperative deadline check. Returns [`Unwind::Interrupted`] once the
    /// limiter is cancelled or the deadline has passed.
    pub fn tick(&mut self) -> RuntimeResult<()> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.limiter.is_cancelled()
            || (self.ticks % CLOCK_CHECK_INTERVAL == 0 && self.limiter.deadline_passed())
        {
            return Err(Unwind::Interrupted);
        }
        Ok(())
    }

    /// Appends to one of the capture sinks.
    pub fn write(&mut self, stream: StreamKind, text: &str) {
        if !self.io.stream(stream).write_str(text) && !self.truncation_reported {
            self.truncation_reported = true;
            tracing::warn!(?stream, line = self.line, "captured output truncated");
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn descend(&mut self) -> RuntimeResult<()> {
        if self.eval_depth >= self.limits.max_eval_depth {
            return raise(ExcType::RecursionError, "maximum recursion depth exceeded");
        }
        self.eval_depth += 1;
        Ok(())
    }

    /// Runs `f` one evaluation level deeper.
    pub(crate) fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> RuntimeResult<T>) -> RuntimeResult<T> {
        self.descend()?;
        let result = f(self);
        self.eval_depth -= 1;
        result
    }

    fn exec_block(&mut self, body: &[Stmt]) -> RuntimeResult<Flow> {
        for stmt in body {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> RuntimeResult<Flow> {
        self.line = stmt.line;
        self.tick()?;
        self.descend()?;
        let result = self.exec_kind(stmt);
        self.eval_depth -= 1;
        result
    }

    fn exec_kind(&mut self, stmt: &Stmt) -> RuntimeResult<Flow> {
        match &stmt.kind {
            StmtKind::Expr(e) => {
                self.eval(e)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.exec_aug_assign(target, *op, value)?,
            StmtKind::AnnotationOnly | StmtKind::Pass | StmtKind::Global(_) => {}
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Return(value) => {
                let value = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::If { test, body, orelse } => {
                return if self.eval(test)?.is_truthy() {
                    self.exec_block(body)
                } else {
                    self.exec_block(orelse)
                };
            }
            StmtKind::While { test, body, orelse } => {
                loop {
                    self.tick()?;
                    if !self.eval(test)?.is_truthy() {
                        break;
                    }
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let source = self.eval(iter)?;
                let mut items = self.iterate(&source)?;
                while let Some(item) = items.next_item(self)? {
                    self.tick()?;
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => return Ok(Flow::Normal),
                        Flow::Return(v) => return Ok(Flow::Return(v)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::FunctionDef(decl) => {
                let function = self.make_function(decl)?;
                self.store(&decl.name, function);
            }
            StmtKind::Try {
                body,
                handlers,
                orelse,
                finalbody,
            } => return self.exec_try(body, handlers, orelse, finalbody),
            StmtKind::Raise { exc, cause } => return Err(self.exec_raise(exc.as_ref(), cause.as_ref())),
            StmtKind::Assert { test, msg } => {
                if !self.eval(test)?.is_truthy() {
                    let args = match msg {
                        Some(msg) => vec![self.eval(msg)?],
                        None => Vec::new(),
                    };
                    return Err(Unwind::Raise(Rc::new(Exception::with_args(
                        ExcType::AssertionError,
                        args,
                    ))));
                }
            }
            StmtKind::Delete(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
            }
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    let Some(module) = self.capabilities.module(&alias.name) else {
                        return raise(
                            ExcType::NameError,
                            format!("name '{}' is not defined", alias.name),
                        );
                    };
                    self.store(alias.binding(), Value::Module(module));
                }
            }
            StmtKind::ImportFrom { module, names } => {
                let Some(def) = self.capabilities.module(module) else {
                    return raise(ExcType::NameError, format!("name '{}' is not defined", module));
                };
                for alias in names {
                    let Some(member) = def.member(&alias.name) else {
                        return raise(
                            ExcType::ImportError,
                            format!("cannot import name '{}' from '{}'", alias.name, module),
                        );
                    };
                    self.store(alias.binding(), member);
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_aug_assign(&mut self, target: &Expr, op: BinOp, value: &Expr) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let current = self.load(name)?;
                let operand = self.eval(value)?;
                let updated = self.augmented(op, current, &operand)?;
                self.store(name, updated);
                Ok(())
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                let current = self.get_index(&object, &index)?;
                let operand = self.eval(value)?;
                let updated = self.augmented(op, current, &operand)?;
                self.set_index(&object, index, updated)
            }
            _ => raise(
                ExcType::TypeError,
                "illegal expression for augmented assignment",
            ),
        }
    }

    /// `current op= operand`. Lists, sets and dicts are updated in place.
    fn augmented(&mut self, op: BinOp, current: Value, operand: &Value) -> RuntimeResult<Value> {
        let max = self.limits.max_sequence_len;
        match (&current, op) {
            (Value::List(list), BinOp::Add) => {
                let extra = self.collect(operand)?;
                check_len(list.borrow().len() + extra.len(), max)?;
                list.borrow_mut().extend(extra);
            }
            (Value::List(list), BinOp::Mul) => {
                let Some(times) = ops::saturating_int(operand) else {
                    return ops::binary_op(op, &current, operand, max);
                };
                let items = list.borrow().clone();
                let count = if times > 0 && !items.is_empty() { times as usize } else { 0 };
                check_len(items.len().saturating_mul(count), max)?;
                let mut repeated = Vec::with_capacity(items.len() * count);
                for _ in 0..count {
                    repeated.extend(items.iter().cloned());
                }
                *list.borrow_mut() = repeated;
            }
            (Value::Set(set), BinOp::BitOr | BinOp::BitAnd | BinOp::Sub | BinOp::BitXor)
                if matches!(operand, Value::Set(_)) =>
            {
                let Value::Set(combined) = ops::binary_op(op, &current, operand, max)? else {
                    return raise(ExcType::TypeError, "set operation did not produce a set");
                };
                let entries = std::mem::take(&mut *combined.borrow_mut());
                *set.borrow_mut() = entries;
            }
            (Value::Dict(dict), BinOp::BitOr) => {
                let pairs = builtins::collect_pairs(self, operand)?;
                let mut entries = dict.borrow_mut();
                for (key, value) in pairs {
                    let hash = key.hash_key()?;
                    match entries.get_mut(&hash) {
                        Some(slot) => slot.1 = value,
                        None => {
                            entries.insert(hash, (key, value));
                        }
                    }
                }
            }
            _ => return ops::binary_op(op, &current, operand, max),
        }
        Ok(current)
    }

    fn exec_try(
        &mut self,
        body: &[Stmt],
        handlers: &[Handler],
        orelse: &[Stmt],
        finalbody: &[Stmt],
    ) -> RuntimeResult<Flow> {
        let outcome = match self.exec_block(body) {
            Ok(Flow::Normal) => self.exec_block(orelse),
            Ok(flow) => Ok(flow),
            Err(Unwind::Raise(exc)) => self.handle(exc, handlers),
            Err(Unwind::Interrupted) => return Err(Unwind::Interrupted),
        };
        if finalbody.is_empty() || matches!(outcome, Err(Unwind::Interrupted)) {
            return outcome;
        }
        match self.exec_block(finalbody)? {
            Flow::Normal => outcome,
            flow => Ok(flow),
        }
    }

    fn handle(&mut self, exc: Rc<Exception>, handlers: &[Handler]) -> RuntimeResult<Flow> {
        for handler in handlers {
            let matched = match &handler.kind {
                None => true,
                Some(kind) => {
                    self.line = handler.line;
                    let class = self.eval(kind)?;
                    exception_matches(&exc, &class)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.store(name, Value::Exception(exc.clone()));
            }
            self.handling.push(exc);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                self.unbind(name);
            }
            return result;
        }
        Err(Unwind::Raise(exc))
    }

    fn exec_raise(&mut self, exc: Option<&Expr>, cause: Option<&Expr>) -> Unwind {
        let Some(exc) = exc else {
            return match self.handling.last() {
                Some(active) => Unwind::Raise(active.clone()),
                None => Unwind::new(ExcType::RuntimeError, "No active exception to reraise"),
            };
        };
        let value = match self.eval(exc) {
            Ok(value) => value,
            Err(unwind) => return unwind,
        };
        if let Some(cause) = cause {
            if let Err(unwind) = self.eval(cause) {
                return unwind;
            }
        }
        match value {
            Value::Exception(e) => Unwind::Raise(e),
            Value::Type(TypeKind::Exception(kind)) => {
                Unwind::Raise(Rc::new(Exception::with_args(kind, Vec::new())))
            }
            _ => Unwind::new(ExcType::TypeError, "exceptions must derive from BaseException"),
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn load(&self, name: &str) -> RuntimeResult<Value> {
        if let Some(frame) = self.frames.last() {
            for overlay in frame.overlays.iter().rev() {
                if let Some(value) = overlay.get(name) {
                    return Ok(value.clone());
                }
            }
            if let (Some(decl), Some(scope)) = (&frame.decl, &frame.scope) {
                if decl.locals.contains(name) {
                    return scope.vars.borrow().get(name).cloned().ok_or_else(|| {
                        Unwind::new(
                            ExcType::UnboundLocalError,
                            format!(
                                "cannot access local variable '{}' where it is not associated with a value",
                                name
                            ),
                        )
                    });
                }
                if !decl.globals.contains(name) {
                    let mut enclosing = scope.parent.clone();
                    while let Some(scope) = enclosing {
                        if let Some(value) = scope.vars.borrow().get(name) {
                            return Ok(value.clone());
                        }
                        enclosing = scope.parent.clone();
                    }
                }
            }
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(capability) = self.capabilities.get(name) {
            return Ok(capability.to_value());
        }
        raise(ExcType::NameError, format!("name '{}' is not defined", name))
    }

    fn store(&mut self, name: &str, value: Value) {
        if let Some(frame) = self.frames.last_mut() {
            if let Some(overlay) = frame.overlays.last_mut() {
                overlay.insert(name.to_string(), value);
                return;
            }
            if let (Some(decl), Some(scope)) = (&frame.decl, &frame.scope) {
                if decl.locals.contains(name) {
                    scope.vars.borrow_mut().insert(name.to_string(), value);
                    return;
                }
            }
        }
        self.globals.insert(name.to_string(), value);
    }

    /// Removes a binding; `false` if the name was not bound where a store
    /// would have put it.
    fn unbind(&mut self, name: &str) -> bool {
        if let Some(frame) = self.frames.last_mut() {
            if let Some(overlay) = frame.overlays.last_mut() {
                return overlay.remove(name).is_some();
            }
            if let (Some(decl), Some(scope)) = (&frame.decl, &frame.scope) {
                if decl.locals.contains(name) {
                    return scope.vars.borrow_mut().remove(name).is_some();
                }
            }
        }
        self.globals.remove(name).is_some()
    }

    fn assign(&mut self, target: &Expr, value: Value) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.store(name, value);
                Ok(())
            }
            ExprKind::Subscript { value: object, index } => {
                let object = self.eval(object)?;
                let index = self.eval_index(index)?;
                self.set_index(&object, index, value)
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => self.unpack(targets, value),
            ExprKind::Attribute { attr, .. } => raise(
                ExcType::AttributeError,
                format!("cannot assign to attribute '{}'", attr),
            ),
            _ => raise(ExcType::TypeError, "cannot assign to expression"),
        }
    }

    fn unpack(&mut self, targets: &[Expr], value: Value) -> RuntimeResult<()> {
        let mut items = self.collect(&value)?;
        let star = targets
            .iter()
            .position(|t| matches!(t.kind, ExprKind::Starred(_)));
        match star {
            None => {
                if items.len() < targets.len() {
                    return raise(
                        ExcType::ValueError,
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        ),
                    );
                }
                if items.len() > targets.len() {
                    return raise(
                        ExcType::ValueError,
                        format!("too many values to unpack (expected {})", targets.len()),
                    );
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
            Some(position) => {
                let after = targets.len() - position - 1;
                if items.len() < targets.len() - 1 {
                    return raise(
                        ExcType::ValueError,
                        format!(
                            "not enough values to unpack (expected at least {}, got {})",
                            targets.len() - 1,
                            items.len()
                        ),
                    );
                }
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(position);
                for (target, item) in targets[..position].iter().zip(items) {
                    self.assign(target, item)?;
                }
                if let ExprKind::Starred(inner) = &targets[position].kind {
                    self.assign(inner, Value::list(middle))?;
                }
                for (target, item) in targets[position + 1..].iter().zip(tail) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn delete(&mut self, target: &Expr) -> RuntimeResult<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if !self.unbind(name) {
                    return raise(ExcType::NameError, format!("name '{}' is not defined", name));
                }
                Ok(())
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value)?;
                let index = self.eval_index(index)?;
                self.del_index(&object, index)
            }
            ExprKind::Tuple(targets) | ExprKind::List(targets) => {
                for target in targets {
                    self.delete(target)?;
                }
                Ok(())
            }
            _ => raise(ExcType::TypeError, "cannot delete expression"),
        }
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn make_function(&mut self, decl: &Arc<FunctionDecl>) -> RuntimeResult<Value> {
        let mut defaults = Vec::new();
        for param in &decl.params.positional {
            if let Some(default) = &param.default {
                defaults.push(self.eval(default)?);
            }
        }
        let mut kw_defaults = Vec::with_capacity(decl.params.kwonly.len());
        for param in &decl.params.kwonly {
            kw_defaults.push(match &param.default {
                Some(default) => Some(self.eval(default)?),
                None => None,
            });
        }
        Ok(Value::Function(Rc::new(Function {
            decl: decl.clone(),
            defaults,
            kw_defaults,
            closure: self.capture(),
        })))
    }

    /// The scope a function defined right now closes over. Inside a
    /// comprehension the running bindings are snapshotted into a new scope.
    fn capture(&mut self) -> Option<Rc<Scope>> {
        let frame = self.frames.last()?;
        let scope = if frame.overlays.is_empty() {
            frame.scope.clone()?
        } else {
            let snapshot = Scope::new(frame.scope.clone());
            {
                let mut vars = snapshot.vars.borrow_mut();
                for overlay in &frame.overlays {
                    vars.extend(overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
            }
            Rc::new(snapshot)
        };
        self.track_capture(&scope);
        Some(scope)
    }

    /// Registers a scope that outlives its frame for the teardown sweep.
    fn track_capture(&mut self, scope: &Rc<Scope>) {
        if !scope.captured.replace(true) {
            if self.captured.len() >= self.next_prune {
                self.captured.retain(|weak| weak.strong_count() > 0);
                self.next_prune = CAPTURE_PRUNE_THRESHOLD.max(2 * self.captured.len());
            }
            self.captured.push(Rc::downgrade(scope));
        }
    }

    /// Calls any callable value.
    pub fn call_value(&mut self, callee: &Value, args: Args) -> RuntimeResult<Value> {
        self.tick()?;
        match callee {
            Value::Function(function) => self.call_function(function, args),
            Value::Builtin(builtin) => (builtin.call)(self, args),
            Value::Method(method) => {
                let receiver = method.receiver.clone();
                methods::call_method(self, &receiver, method.name, args)
            }
            Value::Type(kind) => builtins::construct(self, *kind, args),
            other => raise(
                ExcType::TypeError,
                format!("'{}' object is not callable", other.type_name()),
            ),
        }
    }

    fn call_function(&mut self, function: &Rc<Function>, args: Args) -> RuntimeResult<Value> {
        if self.call_depth >= self.limits.max_recursion_depth {
            return raise(ExcType::RecursionError, "maximum recursion depth exceeded");
        }
        let scope = Rc::new(Scope::new(function.closure.clone()));
        bind_arguments(function, args, &mut scope.vars.borrow_mut())?;

        self.call_depth += 1;
        self.peak_depth = self.peak_depth.max(self.call_depth);
        self.frames.push(Frame {
            decl: Some(function.decl.clone()),
            scope: Some(scope),
            overlays: Vec::new(),
        });
        let result = self.exec_block(&function.decl.body);
        self.frames.pop();
        self.call_depth -= 1;

        match result? {
            Flow::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn eval_args(&mut self, arguments: &[Argument]) -> RuntimeResult<Args> {
        let mut args = Args::default();
        for argument in arguments {
            match argument {
                Argument::Positional(e) => {
                    let value = self.eval(e)?;
                    args.positional.push(value);
                }
                Argument::Keyword(name, e) => {
                    let value = self.eval(e)?;
                    args.keywords.push((name.clone(), value));
                }
                Argument::Star(e) => {
                    let value = self.eval(e)?;
                    let items = self.collect(&value)?;
                    args.positional.extend(items);
                }
                Argument::DoubleStar(e) => {
                    let value = self.eval(e)?;
                    let Value::Dict(dict) = &value else {
                        return raise(
                            ExcType::TypeError,
                            format!(
                                "argument after ** must be a mapping, not {}",
                                value.type_name()
                            ),
                        );
                    };
                    for (key, item) in dict.borrow().values() {
                        let Value::Str(key) = key else {
                            return raise(ExcType::TypeError, "keywords must be strings");
                        };
                        if args.keywords.iter().any(|(k, _)| **k == **key) {
                            return raise(
                                ExcType::TypeError,
                                format!("got multiple values for keyword argument '{}'", key),
                            );
                        }
                        args.keywords.push((key.to_string(), item.clone()));
                    }
                }
            }
        }
        Ok(args)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn eval(&mut self, expr: &Expr) -> RuntimeResult<Value> {
        self.descend()?;
        let result = self.eval_kind(expr);
        self.eval_depth -= 1;
        result
    }

    fn eval_kind(&mut self, expr: &Expr) -> RuntimeResult<Value> {
        let max = self.limits.max_sequence_len;
        Ok(match &expr.kind {
            ExprKind::None => Value::None,
            ExprKind::Bool(b) => Value::Bool(*b),
            ExprKind::Int(i) => Value::Int(*i),
            ExprKind::BigInt(big) => Value::BigInt(Rc::new(big.clone())),
            ExprKind::Float(f) => Value::Float(*f),
            ExprKind::Str(s) => Value::from(s.as_str()),
            ExprKind::FString(parts) => Value::from(self.render_fstring(parts)?),
            ExprKind::Name(name) => self.load(name)?,
            ExprKind::Attribute { value, attr } => {
                let receiver = self.eval(value)?;
                get_attribute(&receiver, attr)?
            }
            ExprKind::Subscript { value, index } => {
                let object = self.eval(value)?;
                let index = self.eval_index(index)?;
                self.get_index(&object, &index)?
            }
            ExprKind::Slice { .. } => {
                return raise(ExcType::TypeError, "slice is only valid inside a subscript")
            }
            ExprKind::Call { func, args } => {
                if let ExprKind::Attribute { value, attr } = &func.kind {
                    let receiver = self.eval(value)?;
                    if let Some(name) = methods::lookup(&receiver, attr) {
                        let args = self.eval_args(args)?;
                        return methods::call_method(self, &receiver, name, args);
                    }
                    let callee = get_attribute(&receiver, attr)?;
                    let args = self.eval_args(args)?;
                    return self.call_value(&callee, args);
                }
                let callee = self.eval(func)?;
                let args = self.eval_args(args)?;
                self.call_value(&callee, args)?
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                ops::unary_op(*op, &operand)?
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary_op(*op, &left, &right, max)?
            }
            ExprKind::And(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    self.eval(right)?
                } else {
                    left
                }
            }
            ExprKind::Or(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    left
                } else {
                    self.eval(right)?
                }
            }
            ExprKind::Compare { left, ops: comparisons } => {
                let mut current = self.eval(left)?;
                for (op, operand) in comparisons {
                    let right = self.eval(operand)?;
                    let holds = match (op, &right) {
                        (CmpOp::In, Value::Iterator(_)) => self.search(&right, &current)?,
                        (CmpOp::NotIn, Value::Iterator(_)) => !self.search(&right, &current)?,
                        _ => ops::compare(*op, &current, &right)?,
                    };
                    if !holds {
                        return Ok(Value::Bool(false));
                    }
                    current = right;
                }
                Value::Bool(true)
            }
            ExprKind::IfExp { test, body, orelse } => {
                if self.eval(test)?.is_truthy() {
                    self.eval(body)?
                } else {
                    self.eval(orelse)?
                }
            }
            ExprKind::Lambda(decl) => self.make_function(decl)?,
            ExprKind::Tuple(items) => Value::tuple(self.eval_items(items)?),
            ExprKind::List(items) => Value::list(self.eval_items(items)?),
            ExprKind::Set(items) => {
                let mut entries = SetEntries::new();
                for item in self.eval_items(items)? {
                    entries.insert(item.hash_key()?, item);
                }
                Value::set(entries)
            }
            ExprKind::Dict(items) => {
                let mut entries = DictEntries::new();
                for item in items {
                    match item {
                        DictItem::Pair(key, value) => {
                            let key = self.eval(key)?;
                            let value = self.eval(value)?;
                            insert_entry(&mut entries, key, value)?;
                        }
                        DictItem::Unpack(e) => {
                            let source = self.eval(e)?;
                            let Value::Dict(dict) = &source else {
                                return raise(
                                    ExcType::TypeError,
                                    format!("'{}' object is not a mapping", source.type_name()),
                                );
                            };
                            let pairs: Vec<(Value, Value)> = dict.borrow().values().cloned().collect();
                            for (key, value) in pairs {
                                insert_entry(&mut entries, key, value)?;
                            }
                        }
                    }
                    check_len(entries.len(), max)?;
                }
                Value::dict(entries)
            }
            ExprKind::Starred(_) => {
                return raise(ExcType::TypeError, "can't use starred expression here")
            }
            ExprKind::Comprehension {
                kind,
                element,
                value,
                generators,
            } => self.eval_comprehension(*kind, element, value.as_deref(), generators)?,
            ExprKind::GeneratorExp(body) => self.make_generator(body)?,
        })
    }

    /// Items of a tuple, list or set display, expanding `*iterable`.
    fn eval_items(&mut self, items: &[Expr]) -> RuntimeResult<Vec<Value>> {
        let max = self.limits.max_sequence_len;
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if let ExprKind::Starred(inner) = &item.kind {
                let source = self.eval(inner)?;
                let expanded = self.collect(&source)?;
                check_len(out.len() + expanded.len(), max)?;
                out.extend(expanded);
            } else {
                out.push(self.eval(item)?);
            }
        }
        Ok(out)
    }

    fn render_fstring(&mut self, parts: &[FStringPart]) -> RuntimeResult<String> {
        let mut out = String::new();
        for part in parts {
            match part {
                FStringPart::Literal(text) => out.push_str(text),
                FStringPart::Field {
                    expr,
                    conversion,
                    spec,
                } => {
                    let value = self.eval(expr)?;
                    let spec = self.render_fstring(spec)?;
                    out.push_str(&format_field(&value, *conversion, &spec)?);
                }
            }
            check_len(out.len(), self.limits.max_sequence_len)?;
        }
        Ok(out)
    }

    fn eval_comprehension(
        &mut self,
        kind: ComprehensionKind,
        element: &Expr,
        value: Option<&Expr>,
        generators: &[Generator],
    ) -> RuntimeResult<Value> {
        let Some(first) = generators.first() else {
            return raise(ExcType::TypeError, "comprehension without a for clause");
        };
        // The outermost iterable is evaluated in the enclosing scope.
        let source = self.eval(&first.iter)?;
        let mut acc = match kind {
            ComprehensionKind::List => Accumulator::List(Vec::new()),
            ComprehensionKind::Set => Accumulator::Set(SetEntries::new()),
            ComprehensionKind::Dict => Accumulator::Dict(DictEntries::new()),
        };
        if let Some(frame) = self.frames.last_mut() {
            frame.overlays.push(HashMap::new());
        }
        let result = self.comprehension_level(generators, source, element, value, &mut acc);
        if let Some(frame) = self.frames.last_mut() {
            frame.overlays.pop();
        }
        result?;
        Ok(match acc {
            Accumulator::List(items) => Value::list(items),
            Accumulator::Set(entries) => Value::set(entries),
            Accumulator::Dict(entries) => Value::dict(entries),
        })
    }

    /// A generator expression. Only the outermost iterable is evaluated
    /// now; the rest runs each time an item is requested.
    fn make_generator(&mut self, body: &Arc<GeneratorExp>) -> RuntimeResult<Value> {
        let Some(first) = body.generators.first() else {
            return raise(ExcType::TypeError, "comprehension without a for clause");
        };
        let source = self.eval(&first.iter)?;
        let outer = self.iterate(&source)?;
        let (decl, scope, mut overlays) = match self.frames.last() {
            Some(frame) => (frame.decl.clone(), frame.scope.clone(), frame.overlays.clone()),
            None => (None, None, Vec::new()),
        };
        if let Some(scope) = &scope {
            self.track_capture(scope);
        }
        overlays.push(HashMap::new());
        Ok(iterators::lazy(
            IterKind::Generator,
            IterState::Generator(GeneratorState {
                body: body.clone(),
                decl,
                scope,
                overlays,
                levels: vec![outer],
            }),
        ))
    }

    /// Runs a suspended generator until it yields its next item.
    pub(crate) fn resume_generator(&mut self, state: &mut GeneratorState) -> RuntimeResult<Option<Value>> {
        self.frames.push(Frame {
            decl: state.decl.clone(),
            scope: state.scope.clone(),
            overlays: std::mem::take(&mut state.overlays),
        });
        let result = self.generator_step(&state.body, &mut state.levels);
        if let Some(frame) = self.frames.pop() {
            state.overlays = frame.overlays;
        }
        result
    }

    fn generator_step(&mut self, body: &GeneratorExp, levels: &mut Vec<ValueIter>) -> RuntimeResult<Option<Value>> {
        'advance: while let Some(depth) = levels.len().checked_sub(1) {
            self.tick()?;
            let Some(item) = levels[depth].next_item(self)? else {
                levels.pop();
                continue;
            };
            let generator = &body.generators[depth];
            self.assign(&generator.target, item)?;
            for condition in &generator.conditions {
                if !self.eval(condition)?.is_truthy() {
                    continue 'advance;
                }
            }
            match body.generators.get(depth + 1) {
                Some(next) => {
                    let source = self.eval(&next.iter)?;
                    let walk = self.iterate(&source)?;
                    levels.push(walk);
                }
                None => return self.eval(&body.element).map(Some),
            }
        }
        Ok(None)
    }

    /// `item in iterator`: consumes items up to the first match.
    fn search(&mut self, iterator: &Value, item: &Value) -> RuntimeResult<bool> {
        let mut items = self.iterate(iterator)?;
        while let Some(candidate) = items.next_item(self)? {
            self.tick()?;
            if candidate.is(item) || candidate.py_eq(item) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn comprehension_level(
        &mut self,
        generators: &[Generator],
        source: Value,
        element: &Expr,
        value: Option<&Expr>,
        acc: &mut Accumulator,
    ) -> RuntimeResult<()> {
        let Some((generator, rest)) = generators.split_first() else {
            return Ok(());
        };
        let max = self.limits.max_sequence_len;
        let mut items = self.iterate(&source)?;
        'items: while let Some(item) = items.next_item(self)? {
            self.tick()?;
            self.assign(&generator.target, item)?;
            for condition in &generator.conditions {
                if !self.eval(condition)?.is_truthy() {
                    continue 'items;
                }
            }
            if let Some(next) = rest.first() {
                let inner = self.eval(&next.iter)?;
                self.comprehension_level(rest, inner, element, value, acc)?;
                continue;
            }
            match acc {
                Accumulator::List(out) => {
                    let item = self.eval(element)?;
                    check_len(out.len() + 1, max)?;
                    out.push(item);
                }
                Accumulator::Set(out) => {
                    let item = self.eval(element)?;
                    out.insert(item.hash_key()?, item);
                    check_len(out.len(), max)?;
                }
                Accumulator::Dict(out) => {
                    let key = self.eval(element)?;
                    let item = match value {
                        Some(value) => self.eval(value)?,
                        None => Value::None,
                    };
                    insert_entry(out, key, item)?;
                    check_len(out.len(), max)?;
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Subscripts
    // ------------------------------------------------------------------

    fn eval_index(&mut self, index: &Expr) -> RuntimeResult<Index> {
        let ExprKind::Slice { lower, upper, step } = &index.kind else {
            return Ok(Index::Item(self.eval(index)?));
        };
        let mut bound = |part: &Option<Box<Expr>>| -> RuntimeResult<Option<i64>> {
            let Some(part) = part else {
                return Ok(None);
            };
            match self.eval(part)? {
                Value::None => Ok(None),
                v => ops::saturating_int(&v).map(Some).ok_or_else(|| {
                    Unwind::new(
                        ExcType::TypeError,
                        "slice indices must be integers or None or have an __index__ method",
                    )
                }),
            }
        };
        let lower = bound(lower)?;
        let upper = bound(upper)?;
        let step = bound(step)?.unwrap_or(1);
        if step == 0 {
            return raise(ExcType::ValueError, "slice step cannot be zero");
        }
        Ok(Index::Slice { lower, upper, step })
    }

    fn get_index(&mut self, object: &Value, index: &Index) -> RuntimeResult<Value> {
        match index {
            Index::Item(key) => get_item(object, key),
            Index::Slice { lower, upper, step } => {
                let (lower, upper, step) = (*lower, *upper, *step);
                match object {
                    Value::List(list) => {
                        let items = list.borrow();
                        Ok(Value::list(slice_of(&items, lower, upper, step)))
                    }
                    Value::Tuple(items) => Ok(Value::tuple(slice_of(items, lower, upper, step))),
                    Value::Str(text) => {
                        let chars: Vec<char> = text.chars().collect();
                        let (start, _, step, count) = slice_indices(chars.len(), lower, upper, step);
                        let out: String = (0..count)
                            .map(|k| chars[(start + k as i64 * step) as usize])
                            .collect();
                        Ok(Value::from(out))
                    }
                    Value::Range(range) => {
                        let (start, stop, step, _) = slice_indices(range.len(), lower, upper, step);
                        slice_range(range, start, stop, step)
                    }
                    other => raise(
                        ExcType::TypeError,
                        format!("'{}' object is not subscriptable", other.type_name()),
                    ),
                }
            }
        }
    }

    fn set_index(&mut self, object: &Value, index: Index, value: Value) -> RuntimeResult<()> {
        match (object, index) {
            (Value::List(list), Index::Item(key)) => {
                let position = {
                    let items = list.borrow();
                    sequence_position(&key, items.len(), "list assignment")?
                };
                list.borrow_mut()[position] = value;
                Ok(())
            }
            (Value::List(list), Index::Slice { lower, upper, step }) => {
                let replacement = self.collect(&value)?;
                let len = list.borrow().len();
                let (start, stop, step, count) = slice_indices(len, lower, upper, step);
                if step == 1 {
                    let start = start as usize;
                    let stop = (stop.max(start as i64)) as usize;
                    check_len(len - (stop - start) + replacement.len(), self.limits.max_sequence_len)?;
                    list.borrow_mut().splice(start..stop, replacement);
                    return Ok(());
                }
                if replacement.len() != count {
                    return raise(
                        ExcType::ValueError,
                        format!(
                            "attempt to assign sequence of size {} to extended slice of size {}",
                            replacement.len(),
                            count
                        ),
                    );
                }
                let mut items = list.borrow_mut();
                for (k, item) in replacement.into_iter().enumerate() {
                    items[(start + k as i64 * step) as usize] = item;
                }
                Ok(())
            }
            (Value::Dict(dict), Index::Item(key)) => {
                let hash = key.hash_key()?;
                let mut entries = dict.borrow_mut();
                match entries.get_mut(&hash) {
                    Some(slot) => slot.1 = value,
                    None => {
                        check_len(entries.len() + 1, self.limits.max_sequence_len)?;
                        entries.insert(hash, (key, value));
                    }
                }
                Ok(())
            }
            (other, _) => raise(
                ExcType::TypeError,
                format!("'{}' object does not support item assignment", other.type_name()),
            ),
        }
    }

    fn del_index(&mut self, object: &Value, index: Index) -> RuntimeResult<()> {
        match (object, index) {
            (Value::List(list), Index::Item(key)) => {
                let position = {
                    let items = list.borrow();
                    sequence_position(&key, items.len(), "list assignment")?
                };
                list.borrow_mut().remove(position);
                Ok(())
            }
            (Value::List(list), Index::Slice { lower, upper, step }) => {
                let mut items = list.borrow_mut();
                let (start, _, step, count) = slice_indices(items.len(), lower, upper, step);
                let mut doomed: Vec<usize> = (0..count)
                    .map(|k| (start + k as i64 * step) as usize)
                    .collect();
                doomed.sort_unstable();
                let mut next = doomed.iter().peekable();
                let mut position = 0;
                items.retain(|_| {
                    let remove = next.peek().is_some_and(|&&d| d == position);
                    if remove {
                        next.next();
                    }
                    position += 1;
                    !remove
                });
                Ok(())
            }
            (Value::Dict(dict), Index::Item(key)) => {
                let removed = dict.borrow_mut().shift_remove(&key.hash_key()?);
                match removed {
                    Some(_) => Ok(()),
                    None => Err(Unwind::Raise(Rc::new(Exception::with_args(
                        ExcType::KeyError,
                        vec![key],
                    )))),
                }
            }
            (other, _) => raise(
                ExcType::TypeError,
                format!("'{}' object doesn't support item deletion", other.type_name()),
            ),
        }
    }

    // ------------------------------------------------------------------
    // Iteration and sorting
    // ------------------------------------------------------------------

    /// Starts iterating over `value`.
    pub fn iterate(&mut self, value: &Value) -> RuntimeResult<ValueIter> {
        Ok(match value {
            Value::Range(range) => ValueIter::Range {
                range: *range,
                index: 0,
            },
            Value::List(list) => ValueIter::List {
                list: list.clone(),
                index: 0,
            },
            Value::Tuple(tuple) => ValueIter::Tuple {
                tuple: tuple.clone(),
                index: 0,
            },
            Value::Str(text) => ValueIter::Chars {
                text: text.clone(),
                offset: 0,
            },
            Value::Dict(dict) => {
                let keys: Vec<Value> = dict.borrow().values().map(|(k, _)| k.clone()).collect();
                ValueIter::Items(keys.into_iter())
            }
            Value::Set(set) => {
                let items: Vec<Value> = set.borrow().values().cloned().collect();
                ValueIter::Items(items.into_iter())
            }
            Value::Iterator(iter) => ValueIter::Lazy(iter.clone()),
            other => {
                return raise(
                    ExcType::TypeError,
                    format!("'{}' object is not iterable", other.type_name()),
                )
            }
        })
    }

    /// Materializes an iterable into a vector, within the sequence limit.
    pub fn collect(&mut self, value: &Value) -> RuntimeResult<Vec<Value>> {
        let max = self.limits.max_sequence_len;
        match value {
            Value::Range(range) => {
                check_len(range.len(), max)?;
                Ok((0..range.len()).map(|i| Value::Int(range.get(i))).collect())
            }
            Value::List(list) => Ok(list.borrow().clone()),
            Value::Tuple(tuple) => Ok(tuple.to_vec()),
            other => {
                let mut out = Vec::new();
                let mut items = self.iterate(other)?;
                while let Some(item) = items.next_item(self)? {
                    if out.len() % 4096 == 0 {
                        self.tick()?;
                    }
                    check_len(out.len() + 1, max)?;
                    out.push(item);
                }
                Ok(out)
            }
        }
    }

    /// Stable sort by an optional key function. Unordered pairs (NaN) keep
    /// their relative order instead of failing.
    pub fn sort(&mut self, items: &mut Vec<Value>, key: Option<&Value>, reverse: bool) -> RuntimeResult<()> {
        let keys = match key {
            Some(key) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in items.iter() {
                    keys.push(self.call_value(key, Args::new(vec![item.clone()]))?);
                }
                keys
            }
            None => items.clone(),
        };

        let n = items.len();
        let mut order: Vec<usize> = (0..n).collect();
        let mut merged = vec![0; n];
        let mut width = 1;
        while width < n {
            let mut start = 0;
            while start < n {
                let mid = (start + width).min(n);
                let end = (start + 2 * width).min(n);
                let (mut i, mut j, mut k) = (start, mid, start);
                while i < mid && j < end {
                    self.tick()?;
                    let (left, right) = (&keys[order[i]], &keys[order[j]]);
                    let right_first = if reverse {
                        precedes(left, right)?
                    } else {
                        precedes(right, left)?
                    };
                    if right_first {
                        merged[k] = order[j];
                        j += 1;
                    } else {
                        merged[k] = order[i];
                        i += 1;
                    }
                    k += 1;
                }
                merged[k..k + (mid - i)].copy_from_slice(&order[i..mid]);
                k += mid - i;
                merged[k..k + (end - j)].copy_from_slice(&order[j..end]);
                start = end;
            }
            std::mem::swap(&mut order, &mut merged);
            width *= 2;
        }

        let mut taken = std::mem::take(items);
        items.extend(
            order
                .into_iter()
                .map(|i| std::mem::replace(&mut taken[i], Value::None)),
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Breaks reference cycles reachable from the module scope and from
    /// captured closure scopes so everything the run allocated is freed.
    fn teardown(&mut self) {
        let mut pending: Vec<Value> = self.globals.drain().map(|(_, v)| v).collect();
        for weak in self.captured.drain(..) {
            if let Some(scope) = weak.upgrade() {
                if let Ok(mut vars) = scope.vars.try_borrow_mut() {
                    pending.extend(vars.drain().map(|(_, v)| v));
                }
            }
        }
        self.handling.clear();

        let mut visited: HashSet<usize> = HashSet::new();
        while let Some(value) = pending.pop() {
            match value {
                Value::List(list) => {
                    if let Ok(mut items) = list.try_borrow_mut() {
                        pending.append(&mut items);
                    }
                }
                Value::Dict(dict) => {
                    if let Ok(mut entries) = dict.try_borrow_mut() {
                        let entries = std::mem::take(&mut *entries);
                        pending.extend(entries.into_values().flat_map(|(k, v)| [k, v]));
                    }
                }
                Value::Set(set) => {
                    if let Ok(mut entries) = set.try_borrow_mut() {
                        let entries = std::mem::take(&mut *entries);
                        pending.extend(entries.into_values());
                    }
                }
                Value::Tuple(tuple) => {
                    if visited.insert(Rc::as_ptr(&tuple) as *const () as usize) {
                        pending.extend(tuple.iter().cloned());
                    }
                }
                Value::Function(function) => {
                    if visited.insert(Rc::as_ptr(&function) as *const () as usize) {
                        pending.extend(function.defaults.iter().cloned());
                        pending.extend(function.kw_defaults.iter().flatten().cloned());
                        let mut scope = function.closure.clone();
                        while let Some(current) = scope {
                            if let Ok(mut vars) = current.vars.try_borrow_mut() {
                                pending.extend(vars.drain().map(|(_, v)| v));
                            }
                            scope = current.parent.clone();
                        }
                    }
                }
                Value::Method(method) => pending.push(method.receiver.clone()),
                Value::Iterator(iter) => {
                    if visited.insert(Rc::as_ptr(&iter) as *const () as usize) {
                        pending.extend(iter.release());
                    }
                }
                Value::Exception(exc) => {
                    if visited.insert(Rc::as_ptr(&exc) as *const () as usize) {
                        pending.extend(exc.args.iter().cloned());
                    }
                }
                _ => {}
            }
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.teardown();
    }
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}

/// `'a'`, `'a' and 'b'`, `'a', 'b', and 'c'`.
fn quoted_list(names: &[&str]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    match quoted.as_slice() {
        [] => String::new(),
        [one] => one.clone(),
        [a, b] => format!("{} and {}", a, b),
        [init @ .., last] => format!("{}, and {}", init.join(", "), last),
    }
}

fn bind_arguments(
    function: &Function,
    args: Args,
    vars: &mut HashMap<String, Value>,
) -> RuntimeResult<()> {
    let decl = &function.decl;
    let params = &decl.params;
    let Args {
        positional,
        keywords,
    } = args;
    let count = params.positional.len();

    if positional.len() > count && params.vararg.is_none() {
        let verb = if positional.len() == 1 { "was" } else { "were" };
        return raise(
            ExcType::TypeError,
            format!(
                "{}() takes {} but {} {} given",
                decl.name,
                plural(count, "positional argument"),
                positional.len(),
                verb
            ),
        );
    }

    let mut slots: Vec<Option<Value>> = vec![None; count];
    let mut extra = Vec::new();
    for (i, value) in positional.into_iter().enumerate() {
        if i < count {
            slots[i] = Some(value);
        } else {
            extra.push(value);
        }
    }

    let mut kwonly: Vec<Option<Value>> = vec![None; params.kwonly.len()];
    let mut kwargs = DictEntries::new();
    for (name, value) in keywords {
        let slot = if let Some(i) = params.positional.iter().position(|p| p.name == name) {
            &mut slots[i]
        } else if let Some(i) = params.kwonly.iter().position(|p| p.name == name) {
            &mut kwonly[i]
        } else if params.kwarg.is_some() {
            let key = Value::from(name);
            kwargs.insert(key.hash_key()?, (key, value));
            continue;
        } else {
            return raise(
                ExcType::TypeError,
                format!("{}() got an unexpected keyword argument '{}'", decl.name, name),
            );
        };
        if slot.is_some() {
            return raise(
                ExcType::TypeError,
                format!("{}() got multiple values for argument '{}'", decl.name, name),
            );
        }
        *slot = Some(value);
    }

    let first_default = count.saturating_sub(function.defaults.len());
    let mut missing = Vec::new();
    for (i, slot) in slots.iter_mut().enumerate() {
        if slot.is_none() {
            match function.defaults.get(i.wrapping_sub(first_default)) {
                Some(default) if i >= first_default => *slot = Some(default.clone()),
                _ => missing.push(params.positional[i].name.as_str()),
            }
        }
    }
    if !missing.is_empty() {
        return raise(
            ExcType::TypeError,
            format!(
                "{}() missing {}: {}",
                decl.name,
                plural(missing.len(), "required positional argument"),
                quoted_list(&missing)
            ),
        );
    }

    for (i, slot) in kwonly.iter_mut().enumerate() {
        if slot.is_none() {
            if let Some(Some(default)) = function.kw_defaults.get(i) {
                *slot = Some(default.clone());
            } else {
                missing.push(params.kwonly[i].name.as_str());
            }
        }
    }
    if !missing.is_empty() {
        return raise(
            ExcType::TypeError,
            format!(
                "{}() missing {}: {}",
                decl.name,
                plural(missing.len(), "required keyword-only argument"),
                quoted_list(&missing)
            ),
        );
    }

    for (param, value) in params.positional.iter().zip(slots).chain(params.kwonly.iter().zip(kwonly)) {
        if let Some(value) = value {
            vars.insert(param.name.clone(), value);
        }
    }
    if let Some(name) = &params.vararg {
        vars.insert(name.clone(), Value::tuple(extra));
    }
    if let Some(name) = &params.kwarg {
        vars.insert(name.clone(), Value::dict(kwargs));
    }
    Ok(())
}

/// Inserts into a dict, keeping the first key object on collision.
fn insert_entry(entries: &mut DictEntries, key: Value, value: Value) -> RuntimeResult<()> {
    let hash = key.hash_key()?;
    match entries.get_mut(&hash) {
        Some(slot) => slot.1 = value,
        None => {
            entries.insert(hash, (key, value));
        }
    }
    Ok(())
}

fn exception_matches(exc: &Exception, class: &Value) -> RuntimeResult<bool> {
    match class {
        Value::Type(TypeKind::Exception(kind)) => Ok(exc.kind.is_subclass_of(*kind)),
        Value::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exc, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => raise(
            ExcType::TypeError,
            "catching classes that do not inherit from BaseException is not allowed",
        ),
    }
}

fn get_attribute(receiver: &Value, attr: &str) -> RuntimeResult<Value> {
    match receiver {
        Value::Module(module) => module.member(attr).ok_or_else(|| {
            Unwind::new(
                ExcType::AttributeError,
                format!("module '{}' has no attribute '{}'", module.name, attr),
            )
        }),
        Value::Exception(exc) if attr == "args" => Ok(Value::tuple(exc.args.clone())),
        Value::Type(kind) => raise(
            ExcType::AttributeError,
            format!("type object '{}' has no attribute '{}'", kind.name(), attr),
        ),
        other => match methods::lookup(other, attr) {
            Some(name) => Ok(Value::Method(Rc::new(BoundMethod {
                receiver: other.clone(),
                name,
            }))),
            None => raise(
                ExcType::AttributeError,
                format!("'{}' object has no attribute '{}'", other.type_name(), attr),
            ),
        },
    }
}

/// Resolves a possibly negative sequence index.
fn sequence_position(index: &Value, len: usize, what: &str) -> RuntimeResult<usize> {
    if let Value::BigInt(_) = index {
        return raise(
            ExcType::IndexError,
            "cannot fit 'int' into an index-sized integer",
        );
    }
    let Some(i) = index.as_int() else {
        return raise(
            ExcType::TypeError,
            format!(
                "{} indices must be integers or slices, not {}",
                what.split(' ').next().unwrap_or(what),
                index.type_name()
            ),
        );
    };
    let resolved = if i < 0 { i.checked_add(len as i64) } else { Some(i) };
    match resolved {
        Some(r) if r >= 0 && (r as usize) < len => Ok(r as usize),
        _ => raise(ExcType::IndexError, format!("{} index out of range", what)),
    }
}

/// `object[key]` for a single key.
pub(crate) fn get_item(object: &Value, key: &Value) -> RuntimeResult<Value> {
    match object {
        Value::List(list) => {
            let items = list.borrow();
            let position = sequence_position(key, items.len(), "list")?;
            Ok(items[position].clone())
        }
        Value::Tuple(items) => {
            let position = sequence_position(key, items.len(), "tuple")?;
            Ok(items[position].clone())
        }
        Value::Str(text) => {
            let count = text.chars().count();
            let position = sequence_position(key, count, "string")?;
            Ok(text
                .chars()
                .nth(position)
                .map(|c| Value::from(c.to_string()))
                .unwrap_or(Value::None))
        }
        Value::Range(range) => {
            let position = sequence_position(key, range.len(), "range object")?;
            Ok(Value::Int(range.get(position)))
        }
        Value::Dict(dict) => {
            let entries = dict.borrow();
            match entries.get(&key.hash_key()?) {
                Some((_, value)) => Ok(value.clone()),
                None => Err(Unwind::Raise(Rc::new(Exception::with_args(
                    ExcType::KeyError,
                    vec![key.clone()],
                )))),
            }
        }
        other => raise(
            ExcType::TypeError,
            format!("'{}' object is not subscriptable", other.type_name()),
        ),
    }
}

/// Clamps slice bounds the way Python does. Returns the first index, the
/// stop index, the step and the number of selected items.
fn slice_indices(len: usize, lower: Option<i64>, upper: Option<i64>, step: i64) -> (i64, i64, i64, usize) {
    let len = len as i64;
    let adjust = |bound: Option<i64>, default: i64| -> i64 {
        match bound {
            None => default,
            Some(b) if b < 0 => {
                let b = b.saturating_add(len);
                if b < 0 {
                    if step < 0 {
                        -1
                    } else {
                        0
                    }
                } else {
                    b
                }
            }
            Some(b) if b >= len => {
                if step < 0 {
                    len - 1
                } else {
                    len
                }
            }
            Some(b) => b,
        }
    };
    let (start, stop) = if step > 0 {
        (adjust(lower, 0), adjust(upper, len))
    } else {
        (adjust(lower, len - 1), adjust(upper, -1))
    };
    let count = if step > 0 {
        if stop > start {
            (stop - start + step - 1) / step
        } else {
            0
        }
    } else if start > stop {
        (start - stop - step - 1) / -step
    } else {
        0
    };
    (start, stop, step, count as usize)
}

fn slice_of(items: &[Value], lower: Option<i64>, upper: Option<i64>, step: i64) -> Vec<Value> {
    let (start, _, step, count) = slice_indices(items.len(), lower, upper, step);
    (0..count)
        .map(|k| items[(start + k as i64 * step) as usize].clone())
        .collect()
}

fn slice_range(range: &Range, start: i64, stop: i64, step: i64) -> RuntimeResult<Value> {
    let new_start = range.start as i128 + start as i128 * range.step as i128;
    let new_stop = range.start as i128 + stop as i128 * range.step as i128;
    let new_step = range.step as i128 * step as i128;
    let (Ok(start), Ok(step), Ok(stop)) = (
        i64::try_from(new_start),
        i64::try_from(new_step),
        i64::try_from(new_stop),
    ) else {
        return raise(ExcType::OverflowError, "range slice out of bounds");
    };
    Ok(Value::Range(Range { start, stop, step }))
}

/// Whether `a` sorts strictly before `b`.
fn precedes(a: &Value, b: &Value) -> RuntimeResult<bool> {
    Ok(ops::order(a, b, "<")? == Some(std::cmp::Ordering::Less))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::runtime::environment::CapabilitySet;
    use std::time::Duration;

    /// Runs `source` on a large stack and returns stdout or the error text.
    fn run(source: &str) -> Result<String, String> {
        run_with(source, ResourceLimits::default(), Duration::from_secs(10))
    }

    fn run_with(source: &str, limits: ResourceLimits, timeout: Duration) -> Result<String, String> {
        let source = source.to_string();
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(move || {
                let modules = ["math", "random", "string", "json", "sys"];
                let unit = Compiler::new(modules, 100)
                    .compile(&source)
                    .map_err(|v| v.to_string())?;
                let io = SandboxIo::new(1 << 20);
                let mut interp = Interpreter::new(
                    Arc::new(CapabilitySet::build(modules)),
                    io.clone(),
                    ExecutionLimiter::new(timeout),
                    limits,
                );
                match interp.run(&unit) {
                    Ok(()) => Ok(io.stdout_str()),
                    Err(Unwind::Raise(exc)) => Err(exc.to_string()),
                    Err(Unwind::Interrupted) => Err("interrupted".to_string()),
                }
            })
            .unwrap()
            .join()
            .unwrap()
    }

    #[test]
    fn test_print_and_arithmetic() {
        assert_eq!(run("print('Hello, World!')").unwrap(), "Hello, World!\n");
        assert_eq!(run("2 + 2").unwrap(), "");
        assert_eq!(run("print(7 // 2, 7 % 3, 2 ** 10, 1 / 4)").unwrap(), "3 1 1024 0.25\n");
        assert_eq!(run("1/0").unwrap_err(), "ZeroDivisionError: division by zero");
    }

    #[test]
    fn test_functions_and_closures() {
        let source = "\
def make_counter(start=0):
    count = [start]
    def bump(step=1):
        count[0] += step
        return count[0]
    return bump

c = make_counter(10)
c()
print(c(5))

def fib(n):
    return n if n < 2 else fib(n - 1) + fib(n - 2)
print(fib(15))
";
        assert_eq!(run(source).unwrap(), "16\n610\n");
    }

    #[test]
    fn test_argument_binding() {
        let source = "\
def f(a, b=2, *rest, c, d=4, **extra):
    return (a, b, rest, c, d, sorted(extra))
print(f(1, c=3))
print(f(1, 5, 6, 7, c=3, z=9, y=8))
";
        assert_eq!(
            run(source).unwrap(),
            "(1, 2, (), 3, 4, [])\n(1, 5, (6, 7), 3, 4, ['y', 'z'])\n"
        );
        assert_eq!(
            run("def f(x, y):\n    pass\nf(1)").unwrap_err(),
            "TypeError: f() missing 1 required positional argument: 'y'"
        );
        assert_eq!(
            run("def f(x):\n    pass\nf(1, 2)").unwrap_err(),
            "TypeError: f() takes 1 positional argument but 2 were given"
        );
        assert_eq!(
            run("def f(x):\n    pass\nf(1, x=2)").unwrap_err(),
            "TypeError: f() got multiple values for argument 'x'"
        );
    }

    #[test]
    fn test_scoping_rules() {
        let source = "\
total = 0
def add(n):
    global total
    total += n
add(3)
add(4)
print(total)
";
        assert_eq!(run(source).unwrap(), "7\n");
        let err = run("x = 1\ndef f():\n    print(x)\n    x = 2\nf()").unwrap_err();
        assert!(err.starts_with("UnboundLocalError: cannot access local variable 'x'"));
        assert_eq!(run("print(y)").unwrap_err(), "NameError: name 'y' is not defined");
    }

    #[test]
    fn test_exceptions() {
        let source = "\
try:
    {}['k']
except KeyError as e:
    print('key', e)
try:
    int('x')
except (TypeError, ValueError):
    print('bad int')
finally:
    print('done')
def g():
    try:
        return 1
    finally:
        print('cleanup')
print(g())
try:
    raise ValueError('boom')
except Exception as err:
    print(type(err) is ValueError, err.args)
";
        assert_eq!(
            run(source).unwrap(),
            "key 'k'\nbad int\ndone\ncleanup\n1\nTrue ('boom',)\n"
        );
        assert_eq!(run("raise ValueError").unwrap_err(), "ValueError");
        assert_eq!(
            run("try:\n    1/0\nexcept ZeroDivisionError:\n    raise").unwrap_err(),
            "ZeroDivisionError: division by zero"
        );
        assert_eq!(run("assert 1 == 2, 'nope'").unwrap_err(), "AssertionError: nope");
    }

    #[test]
    fn test_comprehensions_and_unpacking() {
        let source = "\
squares = [x * x for x in range(5) if x % 2 == 0]
pairs = {k: v for k, v in zip('abc', range(3))}
flat = [y for row in [[1, 2], [3]] for y in row]
first, *middle, last = range(5)
adders = [lambda n: n + i for i in range(3)]
print(squares, pairs, flat, first, middle, last)
print([f(10) for f in adders])
";
        assert_eq!(
            run(source).unwrap(),
            "[0, 4, 16] {'a': 0, 'b': 1, 'c': 2} [1, 2, 3] 0 [1, 2, 3] 4\n[10, 11, 12]\n"
        );
        assert_eq!(
            run("a, b = [1, 2, 3]").unwrap_err(),
            "ValueError: too many values to unpack (expected 2)"
        );
    }

    #[test]
    fn test_generators_are_lazy() {
        let source = "\
print(any(print(x) or x >= 1 for x in range(5)))
for i, x in enumerate(range(10**8)):
    if i > 3:
        break
print(i)
def late():
    base = 10
    g = (base + k for k in range(3))
    base = 20
    return g
print(list(late()))
print(list((a, b) for a in range(2) for b in 'xy' if b != 'x' or a))
print(3 in (y * 3 for y in range(5)), sum(x for x in range(101)))
";
        assert_eq!(
            run(source).unwrap(),
            "0\n1\nTrue\n4\n[20, 21, 22]\n[(0, 'y'), (1, 'x'), (1, 'y')]\nTrue 5050\n"
        );
        assert_eq!(
            run("g = (list(g) for _ in range(1))\nlist(g)").unwrap_err(),
            "ValueError: generator already executing"
        );
        let chain = "g = range(3)\nfor _ in range(100000):\n    g = (x for x in g)\nprint(list(g))";
        assert_eq!(run(chain).unwrap_err(), "RecursionError: maximum recursion depth exceeded");
    }

    #[test]
    fn test_builtin_iterators_are_single_use() {
        let source = "\
m = map(lambda v: v * 2, [1, 2, 3])
print(list(m), list(m))
xs = [1, 2, 3]
r = reversed(xs)
xs.append(4)
print(list(r), list(reversed(range(3))), list(reversed('ab')))
print(list(filter(None, [0, 1, '', 'a'])), list(enumerate('ab', start=1)))
print(dict(zip('ab', range(5))), list(zip()), zip([1]))
seen = []
pairs = zip(range(3), map(seen.append, 'xyz'))
print(seen)
print(len(list(pairs)), seen)
";
        assert_eq!(
            run(source).unwrap(),
            "[2, 4, 6] []\n[3, 2, 1] [2, 1, 0] ['b', 'a']\n[1, 'a'] [(1, 'a'), (2, 'b')]\n\
{'a': 0, 'b': 1} [] <zip object>\n[]\n3 ['x', 'y', 'z']\n"
        );
        assert_eq!(
            run("len(map(str, [1]))").unwrap_err(),
            "TypeError: object of type 'map' has no len()"
        );
        assert_eq!(
            run("reversed({1, 2})").unwrap_err(),
            "TypeError: 'set' object is not reversible"
        );
    }

    #[test]
    fn test_slicing() {
        let source = "\
xs = list(range(10))
print(xs[2:5], xs[::-3], xs[-2:], 'hello'[1:4], range(10)[1::2])
xs[1:9] = ['a']
del xs[0]
print(xs)
";
        assert_eq!(
            run(source).unwrap(),
            "[2, 3, 4] [9, 6, 3, 0] [8, 9] ell range(1, 10, 2)\n['a', 9]\n"
        );
        assert_eq!(run("[1][3]").unwrap_err(), "IndexError: list index out of range");
    }

    #[test]
    fn test_fstrings_and_loops() {
        let source = "\
for i in range(3):
    if i == 1:
        continue
    print(f'{i:>3}|{i * 1.5:.2f}|{str(i)!r}')
else:
    print('no break')
n = 0
while True:
    n += 1
    if n > 4:
        break
print(n)
";
        assert_eq!(
            run(source).unwrap(),
            "  0|0.00|'0'\n  2|3.00|'2'\nno break\n5\n"
        );
    }

    #[test]
    fn test_recursion_limit() {
        let err = run("def f(n):\n    return f(n + 1)\nf(0)").unwrap_err();
        assert_eq!(err, "RecursionError: maximum recursion depth exceeded");
    }

    #[test]
    fn test_deadline_interrupts_loop() {
        let err = run_with(
            "try:\n    while True:\n        pass\nexcept Exception:\n    print('caught')",
            ResourceLimits::default(),
            Duration::from_millis(50),
        )
        .unwrap_err();
        assert_eq!(err, "interrupted");
    }

    #[test]
    fn test_sequence_limit() {
        let limits = ResourceLimits {
            max_sequence_len: 1000,
            ..ResourceLimits::default()
        };
        let err = run_with("x = [0] * 5000", limits, Duration::from_secs(5)).unwrap_err();
        assert!(err.starts_with("MemoryError"));
        let err = run_with("x = list(range(5000))", limits, Duration::from_secs(5)).unwrap_err();
        assert!(err.starts_with("MemoryError"));
    }

    #[test]
    fn test_modules_and_imports() {
        let source = "\
import math
from json import dumps
print(math.floor(math.pi), dumps({'a': [1, 2]}))
print(string.digits)
";
        assert_eq!(run(source).unwrap(), "3 {\"a\": [1, 2]}\n0123456789\n");
        assert_eq!(
            run("from math import nope").unwrap_err(),
            "ImportError: cannot import name 'nope' from 'math'"
        );
    }

    #[test]
    fn test_sort_is_stable() {
        let source = "\
words = ['bb', 'a', 'cc', 'd', 'eee']
print(sorted(words, key=len))
print(sorted(words, key=len, reverse=True))
xs = [3, 1, 2]
xs.sort()
print(xs)
";
        assert_eq!(
            run(source).unwrap(),
            "['a', 'd', 'bb', 'cc', 'eee']\n['eee', 'bb', 'cc', 'a', 'd']\n[1, 2, 3]\n"
        );
    }

    #[test]
    fn test_live_closure_scopes_raise_the_prune_threshold() {
        std::thread::Builder::new()
            .stack_size(64 * 1024 * 1024)
            .spawn(|| {
                let source = "f = None\nfor i in range(20000):\n    f = (lambda g: lambda: g)(f)\nprint(f() is not None)";
                let modules = ["math"];
                let unit = Compiler::new(modules, 100).compile(source).unwrap();
                let io = SandboxIo::new(1 << 20);
                let mut interp = Interpreter::new(
                    Arc::new(CapabilitySet::build(modules)),
                    io.clone(),
                    ExecutionLimiter::new(Duration::from_secs(60)),
                    ResourceLimits::default(),
                );
                assert!(interp.run(&unit).is_ok());
                assert_eq!(io.stdout_str(), "True\n");
                // Every scope is still reachable through `f`, so pruning
                // frees nothing and the threshold has to keep doubling.
                assert!(interp.captured.len() >= 20_000);
                assert!(interp.next_prune > interp.captured.len());
                assert!(interp.next_prune >= 2 * CAPTURE_PRUNE_THRESHOLD);
            })
            .unwrap()
            .join()
            .unwrap();
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(slice_indices(10, None, None, 1), (0, 10, 1, 10));
        assert_eq!(slice_indices(10, Some(-3), None, 1), (7, 10, 1, 3));
        assert_eq!(slice_indices(10, None, None, -1), (9, -1, -1, 10));
        assert_eq!(slice_indices(3, Some(5), Some(10), 1).3, 0);
        assert_eq!(slice_indices(5, Some(i64::MIN), None, 2), (0, 5, 2, 3));
    }
}
