use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    ast::{BinaryOp, Chunk, Expr, ExprKind, Literal, Stmt, StmtKind, TableItem, UnaryOp},
    diagnostics::{Diagnostic, LunariaError, Result, SourceSpan},
    environment::{Environment, EnvironmentRef},
    parser,
    value::{format_number, LuaFunction, LuaKey, LuaTable, LuaValue},
};

/// Result of executing a statement list.
pub enum Flow {
    Normal,
    Break,
    Return(Vec<LuaValue>),
}

/// Tree-walking evaluator for the Lua subset.
pub struct Interpreter {
    root: EnvironmentRef,
    globals: Rc<RefCell<LuaTable>>,
    /// Modules already handed out by `require`, keyed by module name.
    pub loaded: IndexMap<String, LuaValue>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let globals = Rc::new(RefCell::new(LuaTable::new()));
        // `_G` refers back to the globals table itself.
        globals.borrow_mut().set(
            LuaKey::Str(Rc::new("_G".into())),
            LuaValue::Table(Rc::clone(&globals)),
        );
        Self {
            root: Environment::new(),
            globals,
            loaded: IndexMap::new(),
        }
    }

    pub fn globals(&self) -> Rc<RefCell<LuaTable>> {
        Rc::clone(&self.globals)
    }

    pub fn root_env(&self) -> EnvironmentRef {
        Rc::clone(&self.root)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        self.globals
            .borrow_mut()
            .set(LuaKey::Str(Rc::new(name.into())), value);
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        self.globals.borrow().get(&LuaKey::Str(Rc::new(name.into())))
    }

    /// Parses and runs a source chunk, returning whatever the chunk's
    /// top-level `return` produced.
    pub fn run_source(&mut self, source: &str) -> Result<Vec<LuaValue>> {
        let chunk = parser::parse_chunk(source)?;
        self.run_chunk(&chunk)
    }

    pub fn run_chunk(&mut self, chunk: &Chunk) -> Result<Vec<LuaValue>> {
        let env = Environment::with_parent(Rc::clone(&self.root));
        match self.execute_block(&chunk.body, env)? {
            Flow::Return(values) => Ok(values),
            Flow::Break => Err(Diagnostic::runtime("break outside a loop").into()),
            Flow::Normal => Ok(Vec::new()),
        }
    }

    fn execute_block(&mut self, body: &[Stmt], env: EnvironmentRef) -> Result<Flow> {
        for stmt in body {
            match self.execute(stmt, &env)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn execute(&mut self, stmt: &Stmt, env: &EnvironmentRef) -> Result<Flow> {
        match &stmt.kind {
            StmtKind::Local { names, values } => {
                let values = self.evaluate_list(values, names.len(), env)?;
                for (name, value) in names.iter().zip(values) {
                    env.borrow_mut().define(name.clone(), value);
                }
                Ok(Flow::Normal)
            }
            StmtKind::Assign { targets, values } => {
                let values = self.evaluate_list(values, targets.len(), env)?;
                for (target, value) in targets.iter().zip(values) {
                    self.assign_target(target, value, env)?;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Function {
                target,
                params,
                body,
            } => {
                let name = match &target.kind {
                    ExprKind::Name(name) => Some(name.clone()),
                    _ => None,
                };
                let function = LuaValue::Function(Rc::new(LuaFunction {
                    name,
                    params: params.clone(),
                    body: body.clone(),
                    env: Rc::clone(env),
                }));
                self.assign_target(target, function, env)?;
                Ok(Flow::Normal)
            }
            StmtKind::LocalFunction { name, params, body } => {
                // Declare first so the body can refer to itself.
                env.borrow_mut().define(name.clone(), LuaValue::Nil);
                let function = LuaValue::Function(Rc::new(LuaFunction {
                    name: Some(name.clone()),
                    params: params.clone(),
                    body: body.clone(),
                    env: Rc::clone(env),
                }));
                env.borrow_mut().assign(name, function);
                Ok(Flow::Normal)
            }
            StmtKind::Call(expr) => {
                self.evaluate_multi(expr, env)?;
                Ok(Flow::Normal)
            }
            StmtKind::Do(body) => {
                let child = Environment::with_parent(Rc::clone(env));
                self.execute_block(body, child)
            }
            StmtKind::If { arms, else_body } => {
                for (condition, body) in arms {
                    if self.evaluate(condition, env)?.is_truthy() {
                        let child = Environment::with_parent(Rc::clone(env));
                        return self.execute_block(body, child);
                    }
                }
                if let Some(body) = else_body {
                    let child = Environment::with_parent(Rc::clone(env));
                    return self.execute_block(body, child);
                }
                Ok(Flow::Normal)
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition, env)?.is_truthy() {
                    let child = Environment::with_parent(Rc::clone(env));
                    match self.execute_block(body, child)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            StmtKind::Repeat { body, until } => loop {
                let child = Environment::with_parent(Rc::clone(env));
                match self.execute_block(body, Rc::clone(&child))? {
                    Flow::Normal => {}
                    Flow::Break => return Ok(Flow::Normal),
                    flow @ Flow::Return(_) => return Ok(flow),
                }
                // The until condition sees the body's locals.
                if self.evaluate(until, &child)?.is_truthy() {
                    return Ok(Flow::Normal);
                }
            },
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => {
                let start = self.number_operand(start, env, "'for' initial value")?;
                let limit = self.number_operand(limit, env, "'for' limit")?;
                let step = match step {
                    Some(expr) => self.number_operand(expr, env, "'for' step")?,
                    None => 1.0,
                };
                if step == 0.0 {
                    return Err(Diagnostic::runtime("'for' step is zero")
                        .with_span(stmt.span)
                        .into());
                }
                let mut current = start;
                while (step > 0.0 && current <= limit) || (step < 0.0 && current >= limit) {
                    let child = Environment::with_parent(Rc::clone(env));
                    child
                        .borrow_mut()
                        .define(var.clone(), LuaValue::Number(current));
                    match self.execute_block(body, child)? {
                        Flow::Normal => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                    current += step;
                }
                Ok(Flow::Normal)
            }
            StmtKind::Return(exprs) => {
                let values = self.evaluate_all(exprs, env)?;
                Ok(Flow::Return(values))
            }
            StmtKind::Break => Ok(Flow::Break),
        }
    }

    fn assign_target(
        &mut self,
        target: &Expr,
        value: LuaValue,
        env: &EnvironmentRef,
    ) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                if !env.borrow_mut().assign(name, value.clone()) {
                    self.set_global(name, value);
                }
                Ok(())
            }
            ExprKind::Index {
                target: object,
                key,
            } => {
                let object = self.evaluate(object, env)?;
                let key = self.evaluate(key, env)?;
                self.setindex_value(&object, &key, value, target.span)
            }
            _ => Err(Diagnostic::runtime("cannot assign to this expression")
                .with_span(target.span)
                .into()),
        }
    }

    /// Evaluates an expression to exactly one value; multi-valued calls
    /// are truncated to their first result.
    pub fn evaluate(&mut self, expr: &Expr, env: &EnvironmentRef) -> Result<LuaValue> {
        let mut values = self.evaluate_multi(expr, env)?;
        Ok(if values.is_empty() {
            LuaValue::Nil
        } else {
            values.swap_remove(0)
        })
    }

    /// Evaluates an expression keeping every result it produces.
    fn evaluate_multi(&mut self, expr: &Expr, env: &EnvironmentRef) -> Result<Vec<LuaValue>> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(vec![match lit {
                Literal::Nil => LuaValue::Nil,
                Literal::Bool(b) => LuaValue::Boolean(*b),
                Literal::Number(n) => LuaValue::Number(*n),
                Literal::Str(bytes) => LuaValue::bytes(bytes.clone()),
            }]),
            ExprKind::Name(name) => {
                let value = env
                    .borrow()
                    .get(name)
                    .unwrap_or_else(|| self.get_global(name));
                Ok(vec![value])
            }
            ExprKind::Binary { op, left, right } => {
                Ok(vec![self.binary(*op, left, right, env, expr.span)?])
            }
            ExprKind::Unary { op, expr: operand } => {
                Ok(vec![self.unary(*op, operand, env, expr.span)?])
            }
            ExprKind::Index { target, key } => {
                let object = self.evaluate(target, env)?;
                let key = self.evaluate(key, env)?;
                Ok(vec![self.index_value(&object, &key, expr.span)?])
            }
            ExprKind::Call { callee, args } => {
                let callee = self.evaluate(callee, env)?;
                let args = self.evaluate_all(args, env)?;
                self.call_value(&callee, &args, expr.span)
            }
            ExprKind::Function { params, body } => {
                Ok(vec![LuaValue::Function(Rc::new(LuaFunction {
                    name: None,
                    params: params.clone(),
                    body: body.clone(),
                    env: Rc::clone(env),
                }))])
            }
            ExprKind::Table(items) => {
                let table = Rc::new(RefCell::new(LuaTable::new()));
                let mut next_index = 1i64;
                for (position, item) in items.iter().enumerate() {
                    match item {
                        TableItem::Positional(value_expr) => {
                            // The final positional item expands all its results.
                            let last = position + 1 == items.len();
                            if last {
                                for value in self.evaluate_multi(value_expr, env)? {
                                    table.borrow_mut().set(LuaKey::Int(next_index), value);
                                    next_index += 1;
                                }
                            } else {
                                let value = self.evaluate(value_expr, env)?;
                                table.borrow_mut().set(LuaKey::Int(next_index), value);
                                next_index += 1;
                            }
                        }
                        TableItem::Named(name, value_expr) => {
                            let value = self.evaluate(value_expr, env)?;
                            table
                                .borrow_mut()
                                .set(LuaKey::Str(Rc::new(name.as_str().into())), value);
                        }
                        TableItem::Keyed(key_expr, value_expr) => {
                            let key = self.evaluate(key_expr, env)?;
                            let value = self.evaluate(value_expr, env)?;
                            let key = LuaKey::from_value(&key)
                                .map_err(|d| d.with_span(key_expr.span))?;
                            table.borrow_mut().set(key, value);
                        }
                    }
                }
                Ok(vec![LuaValue::Table(table)])
            }
        }
    }

    /// Evaluates an expression list for a multi-assignment, padding with
    /// nils or truncating to `wanted` values. The last expression expands
    /// all of its results.
    fn evaluate_list(
        &mut self,
        exprs: &[Expr],
        wanted: usize,
        env: &EnvironmentRef,
    ) -> Result<Vec<LuaValue>> {
        let mut values = self.evaluate_all(exprs, env)?;
        values.resize(wanted, LuaValue::Nil);
        Ok(values)
    }

    /// Flattens an expression list, expanding the final expression's
    /// multiple results.
    fn evaluate_all(&mut self, exprs: &[Expr], env: &EnvironmentRef) -> Result<Vec<LuaValue>> {
        let mut values = Vec::with_capacity(exprs.len());
        for (position, expr) in exprs.iter().enumerate() {
            if position + 1 == exprs.len() {
                values.extend(self.evaluate_multi(expr, env)?);
            } else {
                values.push(self.evaluate(expr, env)?);
            }
        }
        Ok(values)
    }

    /// Invokes a callable with already-evaluated arguments.
    pub fn call_value(
        &mut self,
        callee: &LuaValue,
        args: &[LuaValue],
        span: SourceSpan,
    ) -> Result<Vec<LuaValue>> {
        match callee {
            LuaValue::Function(function) => {
                let env = Environment::with_parent(Rc::clone(&function.env));
                for (position, param) in function.params.iter().enumerate() {
                    let value = args.get(position).cloned().unwrap_or(LuaValue::Nil);
                    env.borrow_mut().define(param.clone(), value);
                }
                match self.execute_block(&function.body, env)? {
                    Flow::Return(values) => Ok(values),
                    Flow::Break => {
                        Err(Diagnostic::runtime("break outside a loop").with_span(span).into())
                    }
                    Flow::Normal => Ok(Vec::new()),
                }
            }
            LuaValue::Native(native) => (native.callback)(self, args),
            other => Err(Diagnostic::runtime(format!(
                "attempt to call a {} value",
                other.type_name()
            ))
            .with_span(span)
            .into()),
        }
    }

    pub fn index_value(
        &mut self,
        object: &LuaValue,
        key: &LuaValue,
        span: SourceSpan,
    ) -> Result<LuaValue> {
        match object {
            LuaValue::Table(table) => {
                let key = LuaKey::from_value(key).map_err(|d| d.with_span(span))?;
                Ok(table.borrow().get(&key))
            }
            LuaValue::Str(s) => {
                // One-based byte access; anything else is nil.
                if let LuaValue::Number(n) = key {
                    if n.fract() == 0.0 {
                        let index = *n as i64;
                        if index >= 1 && (index as usize) <= s.len() {
                            let byte = s.as_bytes()[index as usize - 1];
                            return Ok(LuaValue::bytes(vec![byte]));
                        }
                    }
                }
                Ok(LuaValue::Nil)
            }
            other => Err(Diagnostic::runtime(format!(
                "attempt to index a {} value",
                other.type_name()
            ))
            .with_span(span)
            .into()),
        }
    }

    pub fn setindex_value(
        &mut self,
        object: &LuaValue,
        key: &LuaValue,
        value: LuaValue,
        span: SourceSpan,
    ) -> Result<()> {
        match object {
            LuaValue::Table(table) => {
                let key = LuaKey::from_value(key).map_err(|d| d.with_span(span))?;
                table.borrow_mut().set(key, value);
                Ok(())
            }
            other => Err(Diagnostic::runtime(format!(
                "attempt to index a {} value",
                other.type_name()
            ))
            .with_span(span)
            .into()),
        }
    }

    pub fn length_of(&self, value: &LuaValue, span: SourceSpan) -> Result<i64> {
        match value {
            LuaValue::Str(s) => Ok(s.len() as i64),
            LuaValue::Table(table) => Ok(table.borrow().length()),
            other => Err(Diagnostic::runtime(format!(
                "attempt to get length of a {} value",
                other.type_name()
            ))
            .with_span(span)
            .into()),
        }
    }

    /// Renders a value the way `tostring` does, honoring a `__tostring`
    /// metamethod on tables.
    pub fn tostring_value(&mut self, value: &LuaValue) -> Result<String> {
        if let LuaValue::Table(table) = value {
            let handler = {
                let table = table.borrow();
                table.metatable.as_ref().map(|mt| {
                    mt.borrow()
                        .get(&LuaKey::Str(Rc::new("__tostring".into())))
                })
            };
            if let Some(handler) = handler {
                if !matches!(handler, LuaValue::Nil) {
                    let results =
                        self.call_value(&handler, &[value.clone()], SourceSpan::new(0, 0))?;
                    let first = results.into_iter().next().unwrap_or(LuaValue::Nil);
                    return Ok(first.to_string());
                }
            }
        }
        Ok(value.to_string())
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Result<LuaValue> {
        // `and`/`or` short-circuit and yield an operand, not a boolean.
        match op {
            BinaryOp::And => {
                let left = self.evaluate(left, env)?;
                if !left.is_truthy() {
                    return Ok(left);
                }
                return self.evaluate(right, env);
            }
            BinaryOp::Or => {
                let left = self.evaluate(left, env)?;
                if left.is_truthy() {
                    return Ok(left);
                }
                return self.evaluate(right, env);
            }
            _ => {}
        }

        let lhs = self.evaluate(left, env)?;
        let rhs = self.evaluate(right, env)?;
        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod
            | BinaryOp::Pow => {
                let a = coerce_number(&lhs).ok_or_else(|| {
                    arith_error(&lhs).with_span(left.span)
                })?;
                let b = coerce_number(&rhs).ok_or_else(|| {
                    arith_error(&rhs).with_span(right.span)
                })?;
                let result = match op {
                    BinaryOp::Add => a + b,
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    BinaryOp::Mod => a - (a / b).floor() * b,
                    BinaryOp::Pow => a.powf(b),
                    _ => unreachable!(),
                };
                Ok(LuaValue::Number(result))
            }
            BinaryOp::Concat => {
                let a = concat_operand(&lhs).ok_or_else(|| {
                    Diagnostic::runtime(format!(
                        "attempt to concatenate a {} value",
                        lhs.type_name()
                    ))
                    .with_span(left.span)
                })?;
                let b = concat_operand(&rhs).ok_or_else(|| {
                    Diagnostic::runtime(format!(
                        "attempt to concatenate a {} value",
                        rhs.type_name()
                    ))
                    .with_span(right.span)
                })?;
                let mut bytes = a;
                bytes.extend_from_slice(&b);
                Ok(LuaValue::bytes(bytes))
            }
            BinaryOp::Equal => Ok(LuaValue::Boolean(lhs.raw_equals(&rhs))),
            BinaryOp::NotEqual => Ok(LuaValue::Boolean(!lhs.raw_equals(&rhs))),
            BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
                self.order(op, &lhs, &rhs, span)
            }
            BinaryOp::And | BinaryOp::Or => unreachable!(),
        }
    }

    /// Ordering is defined for number pairs and string pairs only.
    pub fn order(
        &self,
        op: BinaryOp,
        lhs: &LuaValue,
        rhs: &LuaValue,
        span: SourceSpan,
    ) -> Result<LuaValue> {
        let outcome = match (lhs, rhs) {
            (LuaValue::Number(a), LuaValue::Number(b)) => match op {
                BinaryOp::Less => a < b,
                BinaryOp::LessEqual => a <= b,
                BinaryOp::Greater => a > b,
                BinaryOp::GreaterEqual => a >= b,
                _ => unreachable!(),
            },
            (LuaValue::Str(a), LuaValue::Str(b)) => match op {
                BinaryOp::Less => a.as_bytes() < b.as_bytes(),
                BinaryOp::LessEqual => a.as_bytes() <= b.as_bytes(),
                BinaryOp::Greater => a.as_bytes() > b.as_bytes(),
                BinaryOp::GreaterEqual => a.as_bytes() >= b.as_bytes(),
                _ => unreachable!(),
            },
            _ => {
                return Err(Diagnostic::runtime(format!(
                    "attempt to compare {} with {}",
                    lhs.type_name(),
                    rhs.type_name()
                ))
                .with_span(span)
                .into())
            }
        };
        Ok(LuaValue::Boolean(outcome))
    }

    fn unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Result<LuaValue> {
        let value = self.evaluate(operand, env)?;
        match op {
            UnaryOp::Negate => {
                let n = coerce_number(&value)
                    .ok_or_else(|| arith_error(&value).with_span(span))?;
                Ok(LuaValue::Number(-n))
            }
            UnaryOp::Not => Ok(LuaValue::Boolean(!value.is_truthy())),
            UnaryOp::Length => Ok(LuaValue::Number(self.length_of(&value, span)? as f64)),
        }
    }

    fn number_operand(
        &mut self,
        expr: &Expr,
        env: &EnvironmentRef,
        what: &str,
    ) -> Result<f64> {
        let value = self.evaluate(expr, env)?;
        coerce_number(&value).ok_or_else(|| {
            LunariaError::from(
                Diagnostic::runtime(format!("{what} must be a number")).with_span(expr.span),
            )
        })
    }
}

fn arith_error(value: &LuaValue) -> Diagnostic {
    Diagnostic::runtime(format!(
        "attempt to perform arithmetic on a {} value",
        value.type_name()
    ))
}

/// Numbers pass through; strings that parse as numbers coerce.
pub fn coerce_number(value: &LuaValue) -> Option<f64> {
    match value {
        LuaValue::Number(n) => Some(*n),
        LuaValue::Str(s) => std::str::from_utf8(s.as_bytes())
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok()),
        _ => None,
    }
}

fn concat_operand(value: &LuaValue) -> Option<Vec<u8>> {
    match value {
        LuaValue::Str(s) => Some(s.as_bytes().to_vec()),
        LuaValue::Number(n) => Some(format_number(*n).into_bytes()),
        _ => None,
    }
}
