//! Built-in deterministic script interpreter.
//!
//! A small expression language in the Lua idiom, sufficient for risk and
//! fraud rules: `local` bindings, arithmetic, string concatenation with
//! `..`, comparisons, `KEYS`/`ARGV` indexing (1-based) and a fixed builtin
//! table covering the store callbacks plus math/time/json/finance helpers.
//! Statements are separated by newlines or semicolons; `--` starts a
//! comment; `return` ends execution.
//!
//! Every statement, operator and call costs one operation against the
//! budget, and the wall clock is checked periodically, so execution always
//! terminates in bounded time.

use std::collections::HashMap;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::script::{ScriptBudget, ScriptEngine, ScriptValue, StoreApi};

/// The built-in evaluator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreter;

impl Interpreter {
    /// Create an interpreter. Stateless; one instance serves all scripts.
    pub fn new() -> Self {
        Self
    }
}

impl ScriptEngine for Interpreter {
    fn eval(
        &self,
        source: &str,
        keys: &[String],
        argv: &[String],
        store: &dyn StoreApi,
        budget: &ScriptBudget,
    ) -> Result<ScriptValue> {
        let tokens = lex(source)?;
        let program = Parser::new(tokens).parse_program()?;
        let mut executor = Executor {
            store,
            budget: *budget,
            ops: 0,
            started: Instant::now(),
            locals: HashMap::new(),
            keys: keys.to_vec(),
            argv: argv.to_vec(),
        };
        executor.run(&program)
    }
}

// ---- lexer ----

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    Nil,
    Local,
    Return,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Concat,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Separator,
}

fn lex(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' => {
                chars.next();
            },
            '\n' | ';' => {
                chars.next();
                tokens.push(Token::Separator);
            },
            '-' => {
                chars.next();
                if chars.peek() == Some(&'-') {
                    // Comment to end of line.
                    for comment_char in chars.by_ref() {
                        if comment_char == '\n' {
                            tokens.push(Token::Separator);
                            break;
                        }
                    }
                } else {
                    tokens.push(Token::Minus);
                }
            },
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            },
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            },
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            },
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            },
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            },
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            },
            '[' => {
                chars.next();
                tokens.push(Token::LBracket);
            },
            ']' => {
                chars.next();
                tokens.push(Token::RBracket);
            },
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            },
            '.' => {
                chars.next();
                if chars.peek() == Some(&'.') {
                    chars.next();
                    tokens.push(Token::Concat);
                } else {
                    return Err(Error::Script("unexpected '.'".to_string()));
                }
            },
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::EqEq);
                } else {
                    tokens.push(Token::Assign);
                }
            },
            '~' | '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    return Err(Error::Script(format!("unexpected '{c}'")));
                }
            },
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            },
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            },
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some('\\') => match chars.next() {
                            Some('n') => text.push('\n'),
                            Some('t') => text.push('\t'),
                            Some(other) => text.push(other),
                            None => return Err(Error::Script("unterminated string".to_string())),
                        },
                        Some(ch) => text.push(ch),
                        None => return Err(Error::Script("unterminated string".to_string())),
                    }
                }
                tokens.push(Token::Str(text));
            },
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        // A '..' after a number is concatenation.
                        if d == '.' && digits.contains('.') {
                            break;
                        }
                        if d == '.' {
                            let mut lookahead = chars.clone();
                            lookahead.next();
                            if lookahead.peek() == Some(&'.') {
                                break;
                            }
                        }
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = digits
                    .parse()
                    .map_err(|_| Error::Script(format!("bad number '{digits}'")))?;
                tokens.push(Token::Number(value));
            },
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&w) = chars.peek() {
                    if w.is_ascii_alphanumeric() || w == '_' {
                        word.push(w);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "nil" => Token::Nil,
                    "local" => Token::Local,
                    "return" => Token::Return,
                    _ => Token::Ident(word),
                });
            },
            other => return Err(Error::Script(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

// ---- parser ----

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Nil,
    Var(String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
enum Stmt {
    Local(String, Expr),
    Assign(String, Expr),
    Return(Expr),
    Expr(Expr),
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(Error::Script(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn skip_separators(&mut self) {
        while self.peek() == Some(&Token::Separator) {
            self.pos += 1;
        }
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut statements = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                break;
            }
            statements.push(self.parse_statement()?);
            match self.peek() {
                None => break,
                Some(Token::Separator) => continue,
                other => {
                    return Err(Error::Script(format!(
                        "expected end of statement, found {other:?}"
                    )))
                },
            }
        }
        Ok(statements)
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        match self.peek() {
            Some(Token::Local) => {
                self.next();
                let name = self.parse_ident()?;
                self.expect(&Token::Assign)?;
                Ok(Stmt::Local(name, self.parse_expr()?))
            },
            Some(Token::Return) => {
                self.next();
                // Bare `return` yields nil.
                match self.peek() {
                    None | Some(Token::Separator) => Ok(Stmt::Return(Expr::Nil)),
                    _ => Ok(Stmt::Return(self.parse_expr()?)),
                }
            },
            Some(Token::Ident(_)) if self.tokens.get(self.pos + 1) == Some(&Token::Assign) => {
                let name = self.parse_ident()?;
                self.expect(&Token::Assign)?;
                Ok(Stmt::Assign(name, self.parse_expr()?))
            },
            _ => Ok(Stmt::Expr(self.parse_expr()?)),
        }
    }

    fn parse_ident(&mut self) -> Result<String> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(Error::Script(format!("expected identifier, found {other:?}"))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_concat()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinOp::Eq,
            Some(Token::NotEq) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.next();
        let right = self.parse_concat()?;
        Ok(Expr::Binary(op, Box::new(left), Box::new(right)))
    }

    fn parse_concat(&mut self) -> Result<Expr> {
        let mut expr = self.parse_additive()?;
        while self.peek() == Some(&Token::Concat) {
            self.next();
            let right = self.parse_additive()?;
            expr = Expr::Binary(BinOp::Concat, Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let right = self.parse_multiplicative()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.next();
            let right = self.parse_unary()?;
            expr = Expr::Binary(op, Box::new(expr), Box::new(right));
        }
        Ok(expr)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        while self.peek() == Some(&Token::LBracket) {
            self.next();
            let index = self.parse_expr()?;
            self.expect(&Token::RBracket)?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::True) => Ok(Expr::Bool(true)),
            Some(Token::False) => Ok(Expr::Bool(false)),
            Some(Token::Nil) => Ok(Expr::Nil),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            },
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.next();
                    let mut args = Vec::new();
                    if self.peek() != Some(&Token::RParen) {
                        loop {
                            args.push(self.parse_expr()?);
                            match self.peek() {
                                Some(Token::Comma) => {
                                    self.next();
                                },
                                _ => break,
                            }
                        }
                    }
                    self.expect(&Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            },
            other => Err(Error::Script(format!("unexpected token {other:?}"))),
        }
    }
}

// ---- executor ----

struct Executor<'a> {
    store: &'a dyn StoreApi,
    budget: ScriptBudget,
    ops: u64,
    started: Instant,
    locals: HashMap<String, ScriptValue>,
    keys: Vec<String>,
    argv: Vec<String>,
}

impl Executor<'_> {
    fn run(&mut self, program: &[Stmt]) -> Result<ScriptValue> {
        for statement in program {
            self.charge()?;
            match statement {
                Stmt::Local(name, expr) | Stmt::Assign(name, expr) => {
                    let value = self.eval(expr)?;
                    self.locals.insert(name.clone(), value);
                },
                Stmt::Return(expr) => return self.eval(expr),
                Stmt::Expr(expr) => {
                    self.eval(expr)?;
                },
            }
        }
        Ok(ScriptValue::Nil)
    }

    fn charge(&mut self) -> Result<()> {
        self.ops += 1;
        if self.ops > self.budget.max_ops {
            return Err(Error::ScriptBudget("operation"));
        }
        if self.ops % 64 == 0
            && self.started.elapsed().as_millis() as u64 > self.budget.max_millis
        {
            return Err(Error::ScriptBudget("wall-clock"));
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr) -> Result<ScriptValue> {
        self.charge()?;
        match expr {
            Expr::Number(n) => Ok(ScriptValue::Number(*n)),
            Expr::Str(s) => Ok(ScriptValue::Str(s.clone())),
            Expr::Bool(b) => Ok(ScriptValue::Bool(*b)),
            Expr::Nil => Ok(ScriptValue::Nil),
            Expr::Var(name) => match name.as_str() {
                "KEYS" => Ok(ScriptValue::Array(
                    self.keys.iter().cloned().map(ScriptValue::Str).collect(),
                )),
                "ARGV" => Ok(ScriptValue::Array(
                    self.argv.iter().cloned().map(ScriptValue::Str).collect(),
                )),
                _ => self
                    .locals
                    .get(name)
                    .cloned()
                    .ok_or_else(|| Error::Script(format!("unknown variable '{name}'"))),
            },
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                let items = match &target {
                    ScriptValue::Array(items) => items,
                    other => {
                        return Err(Error::Script(format!(
                            "cannot index a {}",
                            other.type_name()
                        )))
                    },
                };
                let ScriptValue::Number(i) = index else {
                    return Err(Error::Script("index must be a number".to_string()));
                };
                // 1-based, nil out of range.
                let i = i as i64;
                if i < 1 || i as usize > items.len() {
                    return Ok(ScriptValue::Nil);
                }
                Ok(items[(i - 1) as usize].clone())
            },
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                self.call(name, values)
            },
            Expr::Neg(inner) => match self.eval(inner)? {
                ScriptValue::Number(n) => Ok(ScriptValue::Number(-n)),
                other => Err(Error::Script(format!(
                    "cannot negate a {}",
                    other.type_name()
                ))),
            },
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            },
        }
    }

    fn binary(&self, op: BinOp, left: ScriptValue, right: ScriptValue) -> Result<ScriptValue> {
        use ScriptValue as V;
        match op {
            BinOp::Concat => {
                let l = coerce_text(&left)?;
                let r = coerce_text(&right)?;
                Ok(V::Str(format!("{l}{r}")))
            },
            BinOp::Eq => Ok(V::Bool(left == right)),
            BinOp::Ne => Ok(V::Bool(left != right)),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let ordering = match (&left, &right) {
                    (V::Number(a), V::Number(b)) => a.total_cmp(b),
                    (V::Str(a), V::Str(b)) => a.cmp(b),
                    _ => {
                        return Err(Error::Script(format!(
                            "cannot compare {} with {}",
                            left.type_name(),
                            right.type_name()
                        )))
                    },
                };
                Ok(V::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                }))
            },
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
                let (V::Number(a), V::Number(b)) = (&left, &right) else {
                    return Err(Error::Script(format!(
                        "arithmetic on {} and {}",
                        left.type_name(),
                        right.type_name()
                    )));
                };
                let result = match op {
                    BinOp::Add => a + b,
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Rem => a % b,
                    _ => unreachable!(),
                };
                Ok(V::Number(result))
            },
        }
    }

    fn call(&mut self, name: &str, args: Vec<ScriptValue>) -> Result<ScriptValue> {
        use ScriptValue as V;
        match name {
            // Store callbacks.
            "get" => {
                let key = text_arg(&args, 0, name)?;
                Ok(self.store.get(&key).map_or(V::Nil, V::Str))
            },
            "set" => {
                let key = text_arg(&args, 0, name)?;
                let value = text_arg(&args, 1, name)?;
                self.store.set(&key, &value)?;
                Ok(V::Bool(true))
            },
            "zadd" => {
                let key = text_arg(&args, 0, name)?;
                let score = num_arg(&args, 1, name)?;
                let member = text_arg(&args, 2, name)?;
                let added = self.store.zadd(&key, score, &member)?;
                Ok(V::Number(if added { 1.0 } else { 0.0 }))
            },
            "zscore" => {
                let key = text_arg(&args, 0, name)?;
                let member = text_arg(&args, 1, name)?;
                Ok(self
                    .store
                    .zscore(&key, &member)?
                    .map_or(V::Nil, V::Number))
            },
            "zrange" | "zrevrange" => {
                let key = text_arg(&args, 0, name)?;
                let start = num_arg(&args, 1, name)? as i64;
                let stop = num_arg(&args, 2, name)? as i64;
                let members = if name == "zrange" {
                    self.store.zrange(&key, start, stop)?
                } else {
                    self.store.zrevrange(&key, start, stop)?
                };
                Ok(V::Array(members.into_iter().map(V::Str).collect()))
            },
            "publish" => {
                let channel = text_arg(&args, 0, name)?;
                let payload = text_arg(&args, 1, name)?;
                Ok(V::Number(self.store.publish(&channel, &payload) as f64))
            },

            // Math helpers.
            "abs" => Ok(V::Number(num_arg(&args, 0, name)?.abs())),
            "floor" => Ok(V::Number(num_arg(&args, 0, name)?.floor())),
            "ceil" => Ok(V::Number(num_arg(&args, 0, name)?.ceil())),
            "round" => Ok(V::Number(num_arg(&args, 0, name)?.round())),
            "min" => Ok(V::Number(
                num_arg(&args, 0, name)?.min(num_arg(&args, 1, name)?),
            )),
            "max" => Ok(V::Number(
                num_arg(&args, 0, name)?.max(num_arg(&args, 1, name)?),
            )),
            "tonumber" => {
                let text = text_arg(&args, 0, name)?;
                Ok(text.parse::<f64>().map_or(V::Nil, V::Number))
            },

            // Time.
            "now" => Ok(V::Number(chrono::Utc::now().timestamp() as f64)),

            // JSON.
            "json_encode" => Ok(V::Str(encode_json(&args.first().cloned().unwrap_or(V::Nil)))),
            "json_decode" => {
                let text = text_arg(&args, 0, name)?;
                let parsed: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| Error::Script(format!("json_decode: {e}")))?;
                Ok(decode_json(parsed))
            },

            // Finance helpers over the order-book convention: bids carry
            // positive scores, asks negative.
            "spread" => {
                let bid = num_arg(&args, 0, name)?;
                let ask = num_arg(&args, 1, name)?;
                Ok(V::Number(-ask - bid))
            },
            "mid" => {
                let bid = num_arg(&args, 0, name)?;
                let ask = num_arg(&args, 1, name)?;
                Ok(V::Number((bid + -ask) / 2.0))
            },
            "pct_change" => {
                let old = num_arg(&args, 0, name)?;
                let new = num_arg(&args, 1, name)?;
                if old == 0.0 {
                    return Err(Error::Script("pct_change from zero".to_string()));
                }
                Ok(V::Number((new - old) / old * 100.0))
            },

            other => Err(Error::Script(format!("unknown function '{other}'"))),
        }
    }
}

fn coerce_text(value: &ScriptValue) -> Result<String> {
    match value {
        ScriptValue::Str(s) => Ok(s.clone()),
        ScriptValue::Number(n) => Ok(crate::types::format_f64(*n)),
        ScriptValue::Bool(b) => Ok(b.to_string()),
        other => Err(Error::Script(format!(
            "cannot render a {} as text",
            other.type_name()
        ))),
    }
}

fn text_arg(args: &[ScriptValue], index: usize, fn_name: &str) -> Result<String> {
    args.get(index)
        .ok_or_else(|| Error::Script(format!("{fn_name}: missing argument {}", index + 1)))
        .and_then(coerce_text)
}

fn num_arg(args: &[ScriptValue], index: usize, fn_name: &str) -> Result<f64> {
    match args.get(index) {
        Some(ScriptValue::Number(n)) => Ok(*n),
        Some(other) => Err(Error::Script(format!(
            "{fn_name}: argument {} must be a number, got {}",
            index + 1,
            other.type_name()
        ))),
        None => Err(Error::Script(format!(
            "{fn_name}: missing argument {}",
            index + 1
        ))),
    }
}

fn encode_json(value: &ScriptValue) -> String {
    to_json(value).to_string()
}

fn to_json(value: &ScriptValue) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        ScriptValue::Nil => Json::Null,
        ScriptValue::Bool(b) => Json::Bool(*b),
        ScriptValue::Number(n) => serde_json::Number::from_f64(*n)
            .map_or(Json::Null, Json::Number),
        ScriptValue::Str(s) => Json::String(s.clone()),
        ScriptValue::Array(items) => Json::Array(items.iter().map(to_json).collect()),
        ScriptValue::Map(pairs) => Json::Object(
            pairs
                .iter()
                .map(|(k, v)| (k.clone(), to_json(v)))
                .collect(),
        ),
    }
}

fn decode_json(value: serde_json::Value) -> ScriptValue {
    use serde_json::Value as Json;
    match value {
        Json::Null => ScriptValue::Nil,
        Json::Bool(b) => ScriptValue::Bool(b),
        Json::Number(n) => ScriptValue::Number(n.as_f64().unwrap_or(0.0)),
        Json::String(s) => ScriptValue::Str(s),
        Json::Array(items) => ScriptValue::Array(items.into_iter().map(decode_json).collect()),
        Json::Object(map) => ScriptValue::Map(
            map.into_iter()
                .map(|(k, v)| (k, decode_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::callbacks::mock::MockStore;

    fn eval(source: &str, keys: &[&str], argv: &[&str]) -> Result<ScriptValue> {
        let store = MockStore::default();
        eval_with(&store, source, keys, argv)
    }

    fn eval_with(
        store: &MockStore,
        source: &str,
        keys: &[&str],
        argv: &[&str],
    ) -> Result<ScriptValue> {
        let keys: Vec<String> = keys.iter().map(|s| s.to_string()).collect();
        let argv: Vec<String> = argv.iter().map(|s| s.to_string()).collect();
        Interpreter::new().eval(source, &keys, &argv, store, &ScriptBudget::default())
    }

    #[test]
    fn returns_literals() {
        assert_eq!(eval("return 42", &[], &[]).unwrap(), ScriptValue::Number(42.0));
        assert_eq!(
            eval("return 'risk'", &[], &[]).unwrap(),
            ScriptValue::Str("risk".into())
        );
        assert_eq!(eval("return true", &[], &[]).unwrap(), ScriptValue::Bool(true));
        assert_eq!(eval("return nil", &[], &[]).unwrap(), ScriptValue::Nil);
        assert_eq!(eval("return", &[], &[]).unwrap(), ScriptValue::Nil);
    }

    #[test]
    fn keys_and_argv_are_one_based() {
        assert_eq!(
            eval("return KEYS[1]", &["limit:user:1"], &[]).unwrap(),
            ScriptValue::Str("limit:user:1".into())
        );
        assert_eq!(
            eval("return ARGV[2]", &[], &["a", "b"]).unwrap(),
            ScriptValue::Str("b".into())
        );
        assert_eq!(eval("return ARGV[3]", &[], &["a", "b"]).unwrap(), ScriptValue::Nil);
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(
            eval("return 2 + 3 * 4", &[], &[]).unwrap(),
            ScriptValue::Number(14.0)
        );
        assert_eq!(
            eval("return (2 + 3) * 4", &[], &[]).unwrap(),
            ScriptValue::Number(20.0)
        );
        assert_eq!(
            eval("return -5 + 10 % 3", &[], &[]).unwrap(),
            ScriptValue::Number(-4.0)
        );
    }

    #[test]
    fn locals_and_reassignment() {
        let source = "local x = 10\nlocal y = x * 2\nx = y + 1\nreturn x";
        assert_eq!(eval(source, &[], &[]).unwrap(), ScriptValue::Number(21.0));
    }

    #[test]
    fn concat_coerces_numbers() {
        assert_eq!(
            eval("return 'score:' .. 42", &[], &[]).unwrap(),
            ScriptValue::Str("score:42".into())
        );
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("return 1 < 2", &[], &[]).unwrap(), ScriptValue::Bool(true));
        assert_eq!(
            eval("return 'a' == 'b'", &[], &[]).unwrap(),
            ScriptValue::Bool(false)
        );
        assert_eq!(eval("return 2 ~= 3", &[], &[]).unwrap(), ScriptValue::Bool(true));
    }

    #[test]
    fn comments_are_ignored() {
        let source = "-- risk rule v2\nlocal x = 1 -- inline note\nreturn x";
        assert_eq!(eval(source, &[], &[]).unwrap(), ScriptValue::Number(1.0));
    }

    #[test]
    fn store_callbacks_flow_through() {
        let store = MockStore::default();
        store.set("velocity:user:1", "7").unwrap();
        let source = "local v = tonumber(get(KEYS[1]))\n\
                      set(KEYS[1], v + 1 .. '')\n\
                      return v + 1";
        let result = eval_with(&store, source, &["velocity:user:1"], &[]).unwrap();
        assert_eq!(result, ScriptValue::Number(8.0));
        assert_eq!(store.strings.lock().get("velocity:user:1").unwrap(), "8");
    }

    #[test]
    fn sorted_callbacks_and_ranges() {
        let store = MockStore::default();
        let source = "zadd(KEYS[1], 150.20, 'bid:1')\n\
                      zadd(KEYS[1], 150.15, 'bid:2')\n\
                      return zrevrange(KEYS[1], 0, 1)";
        let result = eval_with(&store, source, &["ob"], &[]).unwrap();
        assert_eq!(
            result,
            ScriptValue::Array(vec![
                ScriptValue::Str("bid:1".into()),
                ScriptValue::Str("bid:2".into())
            ])
        );
    }

    #[test]
    fn publish_returns_delivery_count() {
        let store = MockStore::default();
        let result = eval_with(&store, "return publish('alerts', 'breach')", &[], &[]).unwrap();
        assert_eq!(result, ScriptValue::Number(1.0));
        assert_eq!(store.published.lock().len(), 1);
    }

    #[test]
    fn finance_helpers_follow_book_convention() {
        // Stored ask is a negation; spread recovers the true difference.
        assert_eq!(
            eval("return spread(150.20, -150.25)", &[], &[]).unwrap(),
            ScriptValue::Number(150.25 - 150.20)
        );
        assert_eq!(
            eval("return pct_change(100, 110)", &[], &[]).unwrap(),
            ScriptValue::Number(10.0)
        );
    }

    #[test]
    fn json_round_trip() {
        let source = "local doc = json_decode('{\"score\": 3}')\nreturn doc";
        match eval(source, &[], &[]).unwrap() {
            ScriptValue::Map(pairs) => {
                assert_eq!(pairs[0].0, "score");
                assert_eq!(pairs[0].1, ScriptValue::Number(3.0));
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            eval("return json_encode(ARGV)", &[], &["a"]).unwrap(),
            ScriptValue::Str("[\"a\"]".into())
        );
    }

    #[test]
    fn op_budget_halts_runaway_scripts() {
        let store = MockStore::default();
        let keys: Vec<String> = vec![];
        // A long straight-line script exceeding a tiny op budget.
        let source = "local x = 0\n".to_string() + &"x = x + 1\n".repeat(100) + "return x";
        let tight = ScriptBudget {
            max_ops: 50,
            max_millis: 1000,
        };
        let err = Interpreter::new()
            .eval(&source, &keys, &keys, &store, &tight)
            .unwrap_err();
        assert!(matches!(err, Error::ScriptBudget(_)));
    }

    #[test]
    fn type_errors_are_script_errors() {
        assert!(matches!(
            eval("return 1 + 'x'", &[], &[]).unwrap_err(),
            Error::Script(_)
        ));
        assert!(matches!(
            eval("return frobnicate()", &[], &[]).unwrap_err(),
            Error::Script(_)
        ));
        assert!(matches!(
            eval("return KEYS[1][2]", &["k"], &[]).unwrap_err(),
            Error::Script(_)
        ));
    }

    #[test]
    fn execution_is_deterministic() {
        let source = "local total = 0\nlocal i = 1\ntotal = total + i\nreturn total * 7";
        let a = eval(source, &[], &[]).unwrap();
        let b = eval(source, &[], &[]).unwrap();
        assert_eq!(a, b);
    }
}
