//! CHC parser for SMT-LIB CHC format
//!
//! This module parses the CHC-COMP and SMT-LIB CHC format, which extends SMT-LIB 2.6
//! with commands for defining Horn clauses:
//!
//! ```text
//! (declare-rel Inv (Int))           ; Declare relation Inv : Int -> Bool
//! (declare-var x Int)               ; Declare variable x
//! (rule (=> (= x 0) (Inv x)))       ; x = 0 => Inv(x)
//! (rule (=> (and (Inv x) (< x 10)) (Inv (+ x 1))))  ; Inv(x) /\ x < 10 => Inv(x+1)
//! (query Inv)                       ; Inv(x) => false
//! ```
//!
//! ## Supported Commands
//!
//! - `(set-logic HORN)` - Set logic (checked, not enforced)
//! - `(declare-rel <name> (<sorts>))` - Declare a relation
//! - `(declare-fun <name> (<sorts>) Bool)` - Declare a relation
//! - `(declare-var <name> <sort>)` / `(declare-const <name> <sort>)` - Declare a variable
//! - `(rule <expr>)` - Add a Horn clause
//! - `(query <rel>)` or `(query <expr>)` - Add a query
//! - `(assert <expr>)` - Add a (possibly `forall`-quantified) Horn clause
//! - `(check-sat)`, `(exit)`, `(set-info ...)`, `(set-option ...)` - Skipped
//!
//! Only `Int` and `Bool` sorts are accepted.

use crate::{
    ChcExpr, ChcOp, ChcProblem, ChcSort, ChcVar, ClauseBody, ClauseHead, HornClause, HyresError,
    HyresResult, RelationId,
};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// CHC parser state
pub struct ChcParser {
    /// The CHC problem being built
    problem: ChcProblem,
    /// Declared variables (name -> sort)
    variables: FxHashMap<String, ChcSort>,
    /// Declared relations (name -> (id, sorts))
    relations: FxHashMap<String, (RelationId, Vec<ChcSort>)>,
    /// Current position in input
    pos: usize,
    /// Input string
    input: String,
}

impl ChcParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self {
            problem: ChcProblem::new(),
            variables: FxHashMap::default(),
            relations: FxHashMap::default(),
            pos: 0,
            input: String::new(),
        }
    }

    /// Parse a CHC file and return the problem
    pub fn parse(input: &str) -> HyresResult<ChcProblem> {
        let mut parser = Self::new();
        parser.input = input.to_string();
        parser.pos = 0;

        while parser.pos < parser.input.len() {
            parser.skip_whitespace_and_comments();
            if parser.pos >= parser.input.len() {
                break;
            }
            parser.parse_command()?;
        }

        Ok(parser.problem)
    }

    /// Parse a single command
    fn parse_command(&mut self) -> HyresResult<()> {
        self.skip_whitespace_and_comments();
        if self.pos >= self.input.len() {
            return Ok(());
        }

        self.expect_char('(')?;
        self.skip_whitespace_and_comments();

        let cmd = self.parse_symbol()?;
        self.skip_whitespace_and_comments();

        match cmd.as_str() {
            "set-logic" => {
                let logic = self.parse_symbol()?;
                if !["HORN", "LIA", "QF_LIA"].contains(&logic.as_str()) {
                    warn!(logic = %logic, "unexpected logic, expecting HORN or LIA");
                }
            }
            "declare-rel" | "declare-fun" => {
                self.parse_declare_relation(&cmd)?;
            }
            "declare-var" | "declare-const" => {
                self.parse_declare_var()?;
            }
            "rule" | "assert" => {
                let expr = self.parse_expr()?;
                self.add_expr_as_clause(expr)?;
            }
            "query" => {
                self.parse_query()?;
            }
            "check-sat" | "exit" | "set-info" | "set-option" => {
                self.skip_to_close();
                return Ok(());
            }
            _ => {
                warn!(command = %cmd, "skipping unknown command");
                self.skip_to_close();
                return Ok(());
            }
        }

        self.skip_whitespace_and_comments();
        self.expect_char(')')
    }

    /// Skip the rest of the current command, including its closing paren
    fn skip_to_close(&mut self) {
        let mut depth = 1;
        while depth > 0 && self.pos < self.input.len() {
            match self.current_char() {
                Some('(') => depth += 1,
                Some(')') => depth -= 1,
                _ => {}
            }
            self.pos += self.current_char().map(char::len_utf8).unwrap_or(1);
        }
    }

    /// Parse a declare-rel or declare-fun command
    fn parse_declare_relation(&mut self, cmd: &str) -> HyresResult<()> {
        let name = self.parse_symbol()?;
        self.skip_whitespace_and_comments();

        self.expect_char('(')?;
        let mut sorts = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.peek_char() == Some(')') {
                break;
            }
            sorts.push(self.parse_sort()?);
        }
        self.expect_char(')')?;

        if cmd == "declare-fun" {
            let ret_sort = self.parse_sort()?;
            if ret_sort != ChcSort::Bool {
                return Err(HyresError::Parse(format!(
                    "uninterpreted function {name} is not supported (only Bool-valued relations)"
                )));
            }
        }

        let id = self.problem.declare_relation(&name, sorts.clone());
        self.relations.insert(name, (id, sorts));
        Ok(())
    }

    /// Parse a declare-var command
    fn parse_declare_var(&mut self) -> HyresResult<()> {
        let name = self.parse_symbol()?;
        let sort = self.parse_sort()?;
        self.variables.insert(name, sort);
        Ok(())
    }

    /// Parse a query command
    fn parse_query(&mut self) -> HyresResult<()> {
        if self.peek_char() == Some('(') {
            let expr = self.parse_expr()?;
            let (rels, constraint) = self.extract_body_parts(&expr);
            self.problem
                .add_clause(HornClause::new(ClauseBody::new(rels, constraint), ClauseHead::False));
            return Ok(());
        }

        let name = self.parse_symbol()?;
        let (id, sorts) = self
            .relations
            .get(&name)
            .cloned()
            .ok_or_else(|| HyresError::Parse(format!("unknown relation in query: {name}")))?;
        // Rel(q0, ..., qn) => false
        let args: Vec<ChcExpr> = sorts
            .iter()
            .enumerate()
            .map(|(i, sort)| ChcExpr::var(ChcVar::new(format!("_qv{i}"), sort.clone())))
            .collect();
        self.problem.add_clause(HornClause::new(
            ClauseBody::new(vec![(id, args)], None),
            ClauseHead::False,
        ));
        Ok(())
    }

    /// Convert an expression to a Horn clause and add it
    fn add_expr_as_clause(&mut self, expr: ChcExpr) -> HyresResult<()> {
        match &expr {
            ChcExpr::Op(ChcOp::Implies, args) if args.len() == 2 => {
                self.add_implication(&args[0], &args[1])
            }
            ChcExpr::Op(ChcOp::Not, args) if args.len() == 1 => {
                // (not body) is body => false
                let (rels, constraint) = self.extract_body_parts(&args[0]);
                self.problem
                    .add_clause(HornClause::new(ClauseBody::new(rels, constraint), ClauseHead::False));
                Ok(())
            }
            _ => self.add_implication(&ChcExpr::Bool(true), &expr),
        }
    }

    /// Add an implication body => head as a Horn clause
    fn add_implication(&mut self, body: &ChcExpr, head: &ChcExpr) -> HyresResult<()> {
        let (rels, mut constraint) = self.extract_body_parts(body);

        let clause_head = match head {
            ChcExpr::Bool(true) => {
                debug!("skipping trivially satisfied clause: body => true");
                return Ok(());
            }
            ChcExpr::Bool(false) => ClauseHead::False,
            ChcExpr::RelationApp(_, id, args) => {
                ClauseHead::Predicate(*id, args.iter().map(|a| (**a).clone()).collect())
            }
            other => {
                // body => c  becomes  body /\ not c => false
                debug!(head = %other, "moving non-relation head into the body");
                let negated = ChcExpr::not(other.clone());
                constraint = Some(match constraint {
                    Some(c) => ChcExpr::and(c, negated),
                    None => negated,
                });
                ClauseHead::False
            }
        };

        self.problem
            .add_clause(HornClause::new(ClauseBody::new(rels, constraint), clause_head));
        Ok(())
    }

    /// Extract relation applications and constraints from a body
    fn extract_body_parts(
        &self,
        body: &ChcExpr,
    ) -> (Vec<(RelationId, Vec<ChcExpr>)>, Option<ChcExpr>) {
        let mut rels = Vec::new();
        let mut constraints = Vec::new();
        Self::collect_body_parts(body, &mut rels, &mut constraints);
        let constraint = if constraints.is_empty() {
            None
        } else {
            Some(ChcExpr::and_all(constraints))
        };
        (rels, constraint)
    }

    fn collect_body_parts(
        expr: &ChcExpr,
        rels: &mut Vec<(RelationId, Vec<ChcExpr>)>,
        constraints: &mut Vec<ChcExpr>,
    ) {
        match expr {
            ChcExpr::Op(ChcOp::And, args) => {
                for arg in args {
                    Self::collect_body_parts(arg, rels, constraints);
                }
            }
            ChcExpr::RelationApp(_, id, args) => {
                rels.push((*id, args.iter().map(|a| (**a).clone()).collect()));
            }
            ChcExpr::Bool(true) => {}
            other => constraints.push(other.clone()),
        }
    }

    /// Parse a sort
    fn parse_sort(&mut self) -> HyresResult<ChcSort> {
        self.skip_whitespace_and_comments();
        let name = self.parse_symbol()?;
        match name.as_str() {
            "Bool" => Ok(ChcSort::Bool),
            "Int" => Ok(ChcSort::Int),
            _ => Err(HyresError::Parse(format!("unsupported sort: {name}"))),
        }
    }

    /// Parse an expression
    fn parse_expr(&mut self) -> HyresResult<ChcExpr> {
        self.skip_whitespace_and_comments();

        match self.peek_char() {
            Some('(') => self.parse_compound_expr(),
            Some(c) if c.is_ascii_digit() => self.parse_numeral_expr(),
            Some(_) => self.parse_symbol_expr(),
            None => Err(HyresError::Parse("unexpected end of input".into())),
        }
    }

    /// Parse a compound expression (function application or binder)
    fn parse_compound_expr(&mut self) -> HyresResult<ChcExpr> {
        self.expect_char('(')?;
        let first = self.parse_symbol()?;
        self.skip_whitespace_and_comments();

        match first.as_str() {
            "let" => self.parse_let_expr(),
            "forall" | "exists" => self.parse_quantifier_expr(),
            _ => self.parse_application(&first),
        }
    }

    /// Parse let expression; bindings are substituted into the body
    fn parse_let_expr(&mut self) -> HyresResult<ChcExpr> {
        self.expect_char('(')?;

        let mut bindings = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.peek_char() == Some(')') {
                break;
            }
            self.expect_char('(')?;
            let var_name = self.parse_symbol()?;
            let value = self.parse_expr()?;
            self.expect_char(')')?;
            bindings.push((var_name, value));
        }
        self.expect_char(')')?;

        // Let-bound names shadow declared variables while parsing the body
        let mut old_values = Vec::new();
        for (name, value) in &bindings {
            let old = self.variables.insert(name.clone(), value.sort());
            old_values.push((name.clone(), old));
        }

        let body = self.parse_expr()?;
        self.expect_char(')')?;

        for (name, old) in old_values {
            match old {
                Some(sort) => {
                    self.variables.insert(name, sort);
                }
                None => {
                    self.variables.remove(&name);
                }
            }
        }

        let substitutions: Vec<(ChcVar, ChcExpr)> = bindings
            .into_iter()
            .map(|(name, value)| (ChcVar::new(name, value.sort()), value))
            .collect();
        Ok(body.substitute(&substitutions))
    }

    /// Parse quantifier expression (forall/exists)
    ///
    /// Horn clause variables are implicitly universally quantified, and an
    /// `exists` in a body is equivalent to a `forall` around the clause, so
    /// the binder is dropped after registering the bound variables.
    fn parse_quantifier_expr(&mut self) -> HyresResult<ChcExpr> {
        self.expect_char('(')?;
        loop {
            self.skip_whitespace_and_comments();
            if self.peek_char() == Some(')') {
                break;
            }
            self.expect_char('(')?;
            let var_name = self.parse_symbol()?;
            let sort = self.parse_sort()?;
            self.expect_char(')')?;
            self.variables.insert(var_name, sort);
        }
        self.expect_char(')')?;

        let body = self.parse_expr()?;
        self.expect_char(')')?;
        Ok(body)
    }

    /// Parse function application
    fn parse_application(&mut self, func: &str) -> HyresResult<ChcExpr> {
        let mut args = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            if self.peek_char() == Some(')') {
                break;
            }
            args.push(self.parse_expr()?);
        }
        self.expect_char(')')?;

        let op = match func {
            "not" => ChcOp::Not,
            "and" => return Ok(ChcExpr::and_all(args)),
            "or" => return Ok(ChcExpr::or_all(args)),
            "=>" => ChcOp::Implies,
            "=" => ChcOp::Eq,
            "distinct" => ChcOp::Ne,
            "<" => ChcOp::Lt,
            "<=" => ChcOp::Le,
            ">" => ChcOp::Gt,
            ">=" => ChcOp::Ge,
            "+" => ChcOp::Add,
            "-" if args.len() == 1 => ChcOp::Neg,
            "-" => ChcOp::Sub,
            "*" => ChcOp::Mul,
            "div" => ChcOp::Div,
            "mod" => ChcOp::Mod,
            "ite" => ChcOp::Ite,
            _ => {
                let (id, sorts) = self
                    .relations
                    .get(func)
                    .cloned()
                    .ok_or_else(|| HyresError::Parse(format!("unknown function: {func}")))?;
                if sorts.len() != args.len() {
                    return Err(HyresError::ArityMismatch {
                        name: func.to_string(),
                        expected: sorts.len(),
                        actual: args.len(),
                    });
                }
                return Ok(ChcExpr::relation_app(func, id, args));
            }
        };

        let expected = match op {
            ChcOp::Not | ChcOp::Neg => Some(1),
            ChcOp::Ite => Some(3),
            ChcOp::Add | ChcOp::Sub | ChcOp::Mul => None,
            _ => Some(2),
        };
        match expected {
            Some(n) if args.len() != n => Err(HyresError::Parse(format!(
                "'{func}' requires exactly {n} argument(s), got {}",
                args.len()
            ))),
            None if args.is_empty() => Err(HyresError::Parse(format!(
                "'{func}' requires at least 1 argument"
            ))),
            _ if op == ChcOp::Implies => {
                let mut it = args.into_iter();
                match (it.next(), it.next()) {
                    (Some(a), Some(b)) => Ok(ChcExpr::implies(a, b)),
                    _ => Err(HyresError::Parse("'=>' requires 2 arguments".into())),
                }
            }
            _ => Ok(ChcExpr::Op(op, args.into_iter().map(Arc::new).collect())),
        }
    }

    /// Parse a numeral expression
    fn parse_numeral_expr(&mut self) -> HyresResult<ChcExpr> {
        let num_str = self.parse_numeral()?;
        let n: i64 = num_str
            .parse()
            .map_err(|_| HyresError::Parse(format!("invalid numeral: {num_str}")))?;
        Ok(ChcExpr::int(n))
    }

    /// Parse a symbol expression (variable, constant or nullary relation)
    fn parse_symbol_expr(&mut self) -> HyresResult<ChcExpr> {
        let name = self.parse_symbol()?;

        match name.as_str() {
            "true" => Ok(ChcExpr::Bool(true)),
            "false" => Ok(ChcExpr::Bool(false)),
            _ => {
                if let Some((id, sorts)) = self.relations.get(&name).cloned() {
                    if sorts.is_empty() {
                        return Ok(ChcExpr::relation_app(&name, id, Vec::new()));
                    }
                }
                let sort = self.variables.get(&name).cloned().unwrap_or(ChcSort::Int);
                Ok(ChcExpr::var(ChcVar::new(name, sort)))
            }
        }
    }

    /// Parse a symbol
    fn parse_symbol(&mut self) -> HyresResult<String> {
        self.skip_whitespace_and_comments();

        // Quoted symbol
        if self.peek_char() == Some('|') {
            self.pos += 1;
            let content_start = self.pos;
            while self.pos < self.input.len() && self.current_char() != Some('|') {
                self.pos += self.current_char().map(char::len_utf8).unwrap_or(1);
            }
            let symbol = self.input[content_start..self.pos].to_string();
            if self.current_char() == Some('|') {
                self.pos += 1;
            }
            return Ok(symbol);
        }

        let start = self.pos;
        while let Some(c) = self.current_char() {
            if !is_symbol_char(c) {
                break;
            }
            self.pos += c.len_utf8();
        }

        if start == self.pos {
            return Err(HyresError::Parse(format!("expected symbol at offset {start}")));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    /// Parse a numeral
    fn parse_numeral(&mut self) -> HyresResult<String> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while let Some(c) = self.current_char() {
            if !c.is_ascii_digit() {
                break;
            }
            self.pos += 1;
        }
        if start == self.pos {
            return Err(HyresError::Parse("expected numeral".into()));
        }
        Ok(self.input[start..self.pos].to_string())
    }

    /// Skip whitespace and comments
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.current_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == ';' {
                while let Some(c) = self.current_char() {
                    if c == '\n' {
                        break;
                    }
                    self.pos += c.len_utf8();
                }
            } else {
                break;
            }
        }
    }

    /// Expect and consume a specific character
    fn expect_char(&mut self, expected: char) -> HyresResult<()> {
        self.skip_whitespace_and_comments();
        match self.current_char() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(HyresError::Parse(format!(
                "expected '{expected}', found '{c}' at offset {}",
                self.pos
            ))),
            None => Err(HyresError::Parse(format!(
                "expected '{expected}', found end of input"
            ))),
        }
    }

    /// Get current character
    fn current_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    /// Peek at current character without consuming
    fn peek_char(&self) -> Option<char> {
        self.current_char()
    }
}

impl Default for ChcParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if a character is valid in a symbol
fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric()
        || matches!(
            c,
            '_' | '-'
                | '+'
                | '*'
                | '/'
                | '.'
                | '!'
                | '@'
                | '#'
                | '$'
                | '%'
                | '^'
                | '&'
                | '<'
                | '>'
                | '='
                | '?'
                | '~'
                | '\''
        )
}
