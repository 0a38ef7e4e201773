//! Recursive AST walk over Python source.
//!
//! Nodes are inspected before their children, and children are visited in
//! source field order, so findings come out in depth-first order of first
//! appearance.

use rustpython_parser::ast::{self, Constant, Expr, Operator, Pattern, Stmt};
use rustpython_parser::text_size::TextRange;

use super::policy::SecurityPolicy;
use super::SecurityFinding;

/// Maps byte offsets to 1-based line numbers
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { line_starts }
    }

    pub(crate) fn line_of(&self, offset: usize) -> i64 {
        self.line_starts.partition_point(|start| *start <= offset) as i64
    }
}

pub(crate) struct PythonAnalyzer<'a> {
    policy: &'a SecurityPolicy,
    lines: LineIndex,
    findings: Vec<SecurityFinding>,
}

impl<'a> PythonAnalyzer<'a> {
    pub(crate) fn new(policy: &'a SecurityPolicy, source: &str) -> Self {
        Self {
            policy,
            lines: LineIndex::new(source),
            findings: Vec::new(),
        }
    }

    pub(crate) fn analyze(mut self, suite: &[Stmt]) -> Vec<SecurityFinding> {
        self.visit_body(suite);
        self.findings
    }

    fn report(&mut self, description: String, range: TextRange) {
        let offset = u32::from(range.start()) as usize;
        self.findings.push(SecurityFinding {
            description,
            line: self.lines.line_of(offset),
        });
    }

    fn visit_body(&mut self, body: &[Stmt]) {
        for stmt in body {
            self.visit_stmt(stmt);
        }
    }

    fn visit_opt(&mut self, expr: &Option<Box<Expr>>) {
        if let Some(expr) = expr {
            self.visit_expr(expr);
        }
    }

    fn visit_exprs(&mut self, exprs: &[Expr]) {
        for expr in exprs {
            self.visit_expr(expr);
        }
    }

    fn visit_arguments(&mut self, args: &ast::Arguments) {
        for arg in args
            .posonlyargs
            .iter()
            .chain(args.args.iter())
            .chain(args.kwonlyargs.iter())
        {
            self.visit_opt(&arg.def.annotation);
            self.visit_opt(&arg.default);
        }
        if let Some(vararg) = &args.vararg {
            self.visit_opt(&vararg.annotation);
        }
        if let Some(kwarg) = &args.kwarg {
            self.visit_opt(&kwarg.annotation);
        }
    }

    fn visit_comprehensions(&mut self, generators: &[ast::Comprehension]) {
        for generator in generators {
            self.visit_expr(&generator.target);
            self.visit_expr(&generator.iter);
            self.visit_exprs(&generator.ifs);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Import(import) => {
                for alias in &import.names {
                    if self.policy.is_dangerous_module(alias.name.as_str()) {
                        self.report(format!("Import: {}", alias.name.as_str()), import.range);
                    }
                }
            }
            Stmt::ImportFrom(import) => {
                if let Some(module) = &import.module {
                    if self.policy.is_dangerous_module(module.as_str()) {
                        self.report(format!("From Import: {}", module.as_str()), import.range);
                    }
                }
            }
            Stmt::FunctionDef(def) => {
                if self.policy.is_dangerous_call(def.name.as_str()) {
                    self.report(format!("Function Definition: {}", def.name.as_str()), def.range);
                }
                self.visit_arguments(&def.args);
                self.visit_body(&def.body);
                self.visit_exprs(&def.decorator_list);
                self.visit_opt(&def.returns);
            }
            Stmt::AsyncFunctionDef(def) => {
                if self.policy.is_dangerous_call(def.name.as_str()) {
                    self.report(format!("Function Definition: {}", def.name.as_str()), def.range);
                }
                self.visit_arguments(&def.args);
                self.visit_body(&def.body);
                self.visit_exprs(&def.decorator_list);
                self.visit_opt(&def.returns);
            }
            Stmt::ClassDef(class) => {
                self.visit_exprs(&class.bases);
                for keyword in &class.keywords {
                    self.visit_expr(&keyword.value);
                }
                self.visit_body(&class.body);
                self.visit_exprs(&class.decorator_list);
            }
            Stmt::Return(ret) => self.visit_opt(&ret.value),
            Stmt::Delete(delete) => self.visit_exprs(&delete.targets),
            Stmt::Assign(assign) => {
                for target in &assign.targets {
                    if let Expr::Name(name) = target {
                        if self.policy.is_dangerous_call(name.id.as_str()) {
                            self.report(format!("Assignment: {}", name.id.as_str()), assign.range);
                        }
                    }
                }
                self.visit_exprs(&assign.targets);
                self.visit_expr(&assign.value);
            }
            Stmt::AugAssign(assign) => {
                self.visit_expr(&assign.target);
                self.visit_expr(&assign.value);
            }
            Stmt::AnnAssign(assign) => {
                self.visit_expr(&assign.target);
                self.visit_expr(&assign.annotation);
                self.visit_opt(&assign.value);
            }
            Stmt::For(for_stmt) => {
                self.visit_expr(&for_stmt.target);
                self.visit_expr(&for_stmt.iter);
                self.visit_body(&for_stmt.body);
                self.visit_body(&for_stmt.orelse);
            }
            Stmt::AsyncFor(for_stmt) => {
                self.visit_expr(&for_stmt.target);
                self.visit_expr(&for_stmt.iter);
                self.visit_body(&for_stmt.body);
                self.visit_body(&for_stmt.orelse);
            }
            Stmt::While(while_stmt) => {
                self.visit_expr(&while_stmt.test);
                self.visit_body(&while_stmt.body);
                self.visit_body(&while_stmt.orelse);
            }
            Stmt::If(if_stmt) => {
                self.visit_expr(&if_stmt.test);
                self.visit_body(&if_stmt.body);
                self.visit_body(&if_stmt.orelse);
            }
            Stmt::With(with) => {
                for item in &with.items {
                    self.visit_expr(&item.context_expr);
                    self.visit_opt(&item.optional_vars);
                }
                self.visit_body(&with.body);
            }
            Stmt::AsyncWith(with) => {
                for item in &with.items {
                    self.visit_expr(&item.context_expr);
                    self.visit_opt(&item.optional_vars);
                }
                self.visit_body(&with.body);
            }
            Stmt::Match(match_stmt) => {
                self.visit_expr(&match_stmt.subject);
                for case in &match_stmt.cases {
                    self.visit_pattern(&case.pattern);
                    self.visit_opt(&case.guard);
                    self.visit_body(&case.body);
                }
            }
            Stmt::Raise(raise) => {
                self.visit_opt(&raise.exc);
                self.visit_opt(&raise.cause);
            }
            Stmt::Try(try_stmt) => {
                self.visit_body(&try_stmt.body);
                for handler in &try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    self.visit_opt(&handler.type_);
                    self.visit_body(&handler.body);
                }
                self.visit_body(&try_stmt.orelse);
                self.visit_body(&try_stmt.finalbody);
            }
            Stmt::TryStar(try_stmt) => {
                self.visit_body(&try_stmt.body);
                for handler in &try_stmt.handlers {
                    let ast::ExceptHandler::ExceptHandler(handler) = handler;
                    self.visit_opt(&handler.type_);
                    self.visit_body(&handler.body);
                }
                self.visit_body(&try_stmt.orelse);
                self.visit_body(&try_stmt.finalbody);
            }
            Stmt::Assert(assert) => {
                self.visit_expr(&assert.test);
                self.visit_opt(&assert.msg);
            }
            Stmt::Expr(expr) => self.visit_expr(&expr.value),
            // pass, break, continue, global, nonlocal, type aliases
            _ => {}
        }
    }

    fn visit_patterns(&mut self, patterns: &[Pattern]) {
        for pattern in patterns {
            self.visit_pattern(pattern);
        }
    }

    /// Value and class patterns hold ordinary expressions such as `os.system`
    fn visit_pattern(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::MatchValue(value) => self.visit_expr(&value.value),
            Pattern::MatchSequence(sequence) => self.visit_patterns(&sequence.patterns),
            Pattern::MatchMapping(mapping) => {
                self.visit_exprs(&mapping.keys);
                self.visit_patterns(&mapping.patterns);
            }
            Pattern::MatchClass(class) => {
                self.visit_expr(&class.cls);
                self.visit_patterns(&class.patterns);
                self.visit_patterns(&class.kwd_patterns);
            }
            Pattern::MatchAs(as_pattern) => {
                if let Some(inner) = &as_pattern.pattern {
                    self.visit_pattern(inner);
                }
            }
            Pattern::MatchOr(or_pattern) => self.visit_patterns(&or_pattern.patterns),
            // singletons and star captures carry no expressions
            _ => {}
        }
    }

    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call(call) => {
                if let Some(callee) = self.dangerous_callee(&call.func) {
                    self.report(format!("Call: {}", callee), call.range);
                }
                self.visit_expr(&call.func);
                self.visit_exprs(&call.args);
                for keyword in &call.keywords {
                    self.visit_expr(&keyword.value);
                }
            }
            Expr::Attribute(attribute) => {
                if let Expr::Name(base) = attribute.value.as_ref() {
                    if self.policy.is_dangerous_module(base.id.as_str()) {
                        self.report(
                            format!(
                                "Attribute Access: {}.{}",
                                base.id.as_str(),
                                attribute.attr.as_str()
                            ),
                            attribute.range,
                        );
                    }
                }
                self.visit_expr(&attribute.value);
            }
            Expr::BinOp(binop) => {
                if self.policy.flag_constant_binops {
                    if let (Expr::Constant(left), Expr::Constant(right)) =
                        (binop.left.as_ref(), binop.right.as_ref())
                    {
                        self.report(
                            format!(
                                "String Concatenation: {} {} {}",
                                describe_constant(&left.value),
                                operator_symbol(&binop.op),
                                describe_constant(&right.value)
                            ),
                            binop.range,
                        );
                    }
                }
                self.visit_expr(&binop.left);
                self.visit_expr(&binop.right);
            }
            Expr::Lambda(lambda) => {
                self.check_wrapped_call("Lambda", &lambda.body, lambda.range);
                self.visit_arguments(&lambda.args);
                self.visit_expr(&lambda.body);
            }
            Expr::ListComp(comp) => {
                self.check_wrapped_call("List Comprehension", &comp.elt, comp.range);
                self.visit_expr(&comp.elt);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::SetComp(comp) => {
                self.check_wrapped_call("Set Comprehension", &comp.elt, comp.range);
                self.visit_expr(&comp.elt);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::DictComp(comp) => {
                if !self.check_wrapped_call("Dict Comprehension", &comp.value, comp.range) {
                    self.check_wrapped_call("Dict Comprehension", &comp.key, comp.range);
                }
                self.visit_expr(&comp.key);
                self.visit_expr(&comp.value);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::GeneratorExp(comp) => {
                self.check_wrapped_call("Generator Expression", &comp.elt, comp.range);
                self.visit_expr(&comp.elt);
                self.visit_comprehensions(&comp.generators);
            }
            Expr::Yield(yield_expr) => {
                if let Some(value) = &yield_expr.value {
                    self.check_wrapped_call("Yield", value, yield_expr.range);
                }
                self.visit_opt(&yield_expr.value);
            }
            Expr::YieldFrom(yield_from) => self.visit_expr(&yield_from.value),
            Expr::Await(await_expr) => self.visit_expr(&await_expr.value),
            Expr::BoolOp(boolop) => self.visit_exprs(&boolop.values),
            Expr::NamedExpr(named) => {
                self.visit_expr(&named.target);
                self.visit_expr(&named.value);
            }
            Expr::UnaryOp(unary) => self.visit_expr(&unary.operand),
            Expr::IfExp(if_exp) => {
                self.visit_expr(&if_exp.test);
                self.visit_expr(&if_exp.body);
                self.visit_expr(&if_exp.orelse);
            }
            Expr::Dict(dict) => {
                for key in dict.keys.iter().flatten() {
                    self.visit_expr(key);
                }
                self.visit_exprs(&dict.values);
            }
            Expr::Set(set) => self.visit_exprs(&set.elts),
            Expr::Compare(compare) => {
                self.visit_expr(&compare.left);
                self.visit_exprs(&compare.comparators);
            }
            Expr::FormattedValue(formatted) => {
                self.visit_expr(&formatted.value);
                self.visit_opt(&formatted.format_spec);
            }
            Expr::JoinedStr(joined) => self.visit_exprs(&joined.values),
            Expr::Subscript(subscript) => {
                self.visit_expr(&subscript.value);
                self.visit_expr(&subscript.slice);
            }
            Expr::Starred(starred) => self.visit_expr(&starred.value),
            Expr::List(list) => self.visit_exprs(&list.elts),
            Expr::Tuple(tuple) => self.visit_exprs(&tuple.elts),
            Expr::Slice(slice) => {
                self.visit_opt(&slice.lower);
                self.visit_opt(&slice.upper);
                self.visit_opt(&slice.step);
            }
            // constants and bare names
            _ => {}
        }
    }

    /// Report `<form> with dangerous function` when `inner` calls a
    /// deny-listed callee. Returns whether a finding was added.
    fn check_wrapped_call(&mut self, form: &str, inner: &Expr, range: TextRange) -> bool {
        if let Expr::Call(call) = inner {
            if let Some(callee) = self.dangerous_callee(&call.func) {
                self.report(format!("{} with dangerous function: {}", form, callee), range);
                return true;
            }
        }
        false
    }

    fn dangerous_callee(&self, func: &Expr) -> Option<String> {
        match func {
            Expr::Name(name) if self.policy.is_dangerous_call(name.id.as_str()) => {
                Some(name.id.as_str().to_string())
            }
            Expr::Attribute(attribute) => {
                let dotted = dotted_name(func)?;
                if self.policy.is_dangerous_call(&dotted) {
                    return Some(dotted);
                }
                // `os.system` style: a deny-listed module with a deny-listed member
                match attribute.value.as_ref() {
                    Expr::Name(base)
                        if self.policy.is_dangerous_module(base.id.as_str())
                            && self.policy.is_dangerous_call(attribute.attr.as_str()) =>
                    {
                        Some(dotted)
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// `a.b.c` for chains of names and attributes
fn dotted_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Name(name) => Some(name.id.as_str().to_string()),
        Expr::Attribute(attribute) => {
            dotted_name(&attribute.value).map(|base| format!("{}.{}", base, attribute.attr.as_str()))
        }
        _ => None,
    }
}

fn describe_constant(constant: &Constant) -> String {
    match constant {
        Constant::Str(s) => format!("'{}'", s),
        Constant::Bytes(b) => format!("b'{}'", String::from_utf8_lossy(b)),
        Constant::Int(i) => i.to_string(),
        Constant::Float(f) => f.to_string(),
        Constant::Bool(true) => "True".to_string(),
        Constant::Bool(false) => "False".to_string(),
        Constant::None => "None".to_string(),
        Constant::Ellipsis => "...".to_string(),
        _ => "<constant>".to_string(),
    }
}

fn operator_symbol(op: &Operator) -> &'static str {
    match op {
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mult => "*",
        Operator::MatMult => "@",
        Operator::Div => "/",
        Operator::Mod => "%",
        Operator::Pow => "**",
        Operator::LShift => "<<",
        Operator::RShift => ">>",
        Operator::BitOr => "|",
        Operator::BitXor => "^",
        Operator::BitAnd => "&",
        Operator::FloorDiv => "//",
    }
}
