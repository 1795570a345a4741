//! XPath subset understood by the sniffing engine.
//!
//! Expressions are parsed into a small AST that the streaming engine can
//! evaluate while it walks a document once. The supported grammar covers what
//! detection catalogs actually use:
//!
//! ```text
//! expr      := and_expr ('or' and_expr)*
//! and_expr  := unary ('and' unary)*
//! unary     := '(' expr ')' | path | fn '(' expr? ')'      fn = boolean | string | not | true | false
//! path      := ('/' | '//') step (('/' | '//') step)*
//! step      := (axis '::')? ('*' | qname) ('[' pred ']')* | '@' name | 'attribute::' name
//! pred      := pred_and ('or' pred_and)*
//! pred_atom := operand (('=' | '!=') literal)? | literal ('=' | '!=') operand
//!            | ('starts-with' | 'contains') '(' operand ',' literal ')' | 'not' '(' pred ')'
//! operand   := 'local-name()' | 'namespace-uri()' | '@' name
//! ```
//!
//! Prefixed names (`wfs:WFS_Capabilities`) are matched by local name only;
//! use a `namespace-uri()` predicate when the namespace matters.

use crate::error::CompileError;

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Boolean(Box<Expr>),
    String(Box<Expr>),
    Literal(bool),
    Path(LocationPath),
}

/// Result type an expression produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Boolean,
    String,
    NodeSet,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Boolean => "boolean",
            ValueKind::String => "string",
            ValueKind::NodeSet => "node-set",
        }
    }
}

impl Expr {
    /// Parse `source` into an expression tree.
    pub fn parse(source: &str) -> Result<Self, CompileError> {
        let tokens = lex(source)?;
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
        };
        let expr = parser.parse_or()?;
        if parser.peek().is_some() {
            return Err(parser.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Expr::Or(..) | Expr::And(..) | Expr::Not(_) | Expr::Boolean(_) | Expr::Literal(_) => {
                ValueKind::Boolean
            }
            Expr::String(_) => ValueKind::String,
            Expr::Path(_) => ValueKind::NodeSet,
        }
    }
}

/// An absolute location path, optionally ending in an attribute step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationPath {
    pub steps: Vec<Step>,
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    Any,
    /// Local name; prefixes are stripped at parse time.
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Or(Box<Predicate>, Box<Predicate>),
    And(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Exists(Operand),
    Compare(Operand, Comparison, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    LocalName,
    NamespaceUri,
    Attribute(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    NotEquals,
    StartsWith,
    Contains,
}

/// The parts of an open element that predicates can look at.
#[derive(Debug, Clone, Default)]
pub(crate) struct Element {
    pub local_name: String,
    pub namespace: String,
    pub attributes: Vec<(String, String)>,
}

impl Element {
    pub(crate) fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

impl LocationPath {
    /// True if the innermost element of `stack` is selected by the element
    /// steps of this path. `stack[0]` is the document element.
    pub(crate) fn selects(&self, stack: &[Element]) -> bool {
        match_steps(&self.steps, stack)
    }

    /// Largest stack depth this path can ever select, if bounded.
    pub(crate) fn max_depth(&self) -> Option<usize> {
        if self.steps.iter().any(|s| s.axis == Axis::Descendant) {
            None
        } else {
            Some(self.steps.len())
        }
    }
}

fn match_steps(steps: &[Step], frames: &[Element]) -> bool {
    let Some((step, rest)) = steps.split_first() else {
        return frames.is_empty();
    };
    match step.axis {
        Axis::Child => frames
            .split_first()
            .is_some_and(|(frame, below)| step.accepts(frame) && match_steps(rest, below)),
        Axis::Descendant => (0..frames.len())
            .any(|skip| step.accepts(&frames[skip]) && match_steps(rest, &frames[skip + 1..])),
    }
}

impl Step {
    fn accepts(&self, element: &Element) -> bool {
        let name_ok = match &self.test {
            NodeTest::Any => true,
            NodeTest::Name(name) => *name == element.local_name,
        };
        name_ok && self.predicates.iter().all(|p| p.accepts(element))
    }
}

impl Predicate {
    fn accepts(&self, element: &Element) -> bool {
        match self {
            Predicate::Or(a, b) => a.accepts(element) || b.accepts(element),
            Predicate::And(a, b) => a.accepts(element) && b.accepts(element),
            Predicate::Not(p) => !p.accepts(element),
            Predicate::Exists(operand) => match operand {
                Operand::Attribute(name) => element.attribute(name).is_some(),
                other => other.value(element).is_some_and(|v| !v.is_empty()),
            },
            Predicate::Compare(operand, comparison, literal) => {
                let value = operand.value(element);
                match comparison {
                    Comparison::Equals => value.is_some_and(|v| v == literal),
                    Comparison::NotEquals => value.is_some_and(|v| v != literal),
                    Comparison::StartsWith => value.unwrap_or("").starts_with(literal.as_str()),
                    Comparison::Contains => value.unwrap_or("").contains(literal.as_str()),
                }
            }
        }
    }
}

impl Operand {
    fn value<'e>(&self, element: &'e Element) -> Option<&'e str> {
        match self {
            Operand::LocalName => Some(&element.local_name),
            Operand::NamespaceUri => Some(&element.namespace),
            Operand::Attribute(name) => element.attribute(name),
        }
    }
}

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    At,
    Star,
    AxisSep,
    Eq,
    NotEq,
    Literal(String),
    Name(String),
}

fn lex(source: &str) -> Result<Vec<(usize, Token)>, CompileError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let c = bytes[i];
        let token = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i += 2;
                Token::DoubleSlash
            }
            b'/' => {
                i += 1;
                Token::Slash
            }
            b'[' => {
                i += 1;
                Token::LBracket
            }
            b']' => {
                i += 1;
                Token::RBracket
            }
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b',' => {
                i += 1;
                Token::Comma
            }
            b'@' => {
                i += 1;
                Token::At
            }
            b'*' => {
                i += 1;
                Token::Star
            }
            b'=' => {
                i += 1;
                Token::Eq
            }
            b'!' if bytes.get(i + 1) == Some(&b'=') => {
                i += 2;
                Token::NotEq
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
                Token::AxisSep
            }
            b'\'' | b'"' => {
                let end = source[i + 1..]
                    .find(c as char)
                    .ok_or_else(|| syntax(source, start, "unterminated string literal"))?;
                let literal = source[i + 1..i + 1 + end].to_string();
                i += end + 2;
                Token::Literal(literal)
            }
            c if is_name_start(c) => {
                i = scan_name(bytes, i);
                // Prefixed name: `prefix:local`, but not the `::` axis separator.
                if bytes.get(i) == Some(&b':')
                    && bytes.get(i + 1).is_some_and(|&n| is_name_start(n))
                {
                    i = scan_name(bytes, i + 1);
                }
                Token::Name(source[start..i].to_string())
            }
            _ => {
                let ch = source[i..].chars().next().unwrap_or('?');
                return Err(syntax(source, start, &format!("unexpected character `{ch}`")));
            }
        };
        tokens.push((start, token));
    }

    Ok(tokens)
}

fn is_name_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_' || c >= 0x80
}

fn scan_name(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_alphanumeric() || matches!(c, b'_' | b'-' | b'.') || c >= 0x80 {
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn syntax(source: &str, position: usize, message: &str) -> CompileError {
    CompileError::Syntax {
        expression: source.to_string(),
        position,
        message: message.to_string(),
    }
}

fn local_part(name: &str) -> String {
    name.rsplit(':').next().unwrap_or(name).to_string()
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<(usize, Token)>,
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map_or(self.source.len(), |(offset, _)| *offset)
    }

    fn error(&self, message: &str) -> CompileError {
        let message = if self.peek().is_none() && message.starts_with("expected") {
            format!("{message}, found end of expression")
        } else {
            message.to_string()
        };
        syntax(self.source, self.position(), &message)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Name(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), CompileError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn expect_name(&mut self, what: &str) -> Result<String, CompileError> {
        match self.peek() {
            Some(Token::Name(name)) => {
                let name = local_part(name);
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error(&format!("expected {what}"))),
        }
    }

    fn expect_literal(&mut self) -> Result<String, CompileError> {
        match self.peek() {
            Some(Token::Literal(value)) => {
                let value = value.clone();
                self.pos += 1;
                Ok(value)
            }
            _ => Err(self.error("expected a string literal")),
        }
    }

    /// True if the current token is a name immediately followed by `(`.
    fn at_function_call(&self) -> Option<String> {
        match (self.peek(), self.peek_at(1)) {
            (Some(Token::Name(name)), Some(Token::LParen)) => Some(name.clone()),
            _ => None,
        }
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        let mut left = self.parse_unary()?;
        while self.eat_keyword("and") {
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        if let Some(function) = self.at_function_call() {
            let at = self.position();
            self.pos += 2;
            let expr = match function.as_str() {
                "true" => Expr::Literal(true),
                "false" => Expr::Literal(false),
                "not" => Expr::Not(Box::new(self.parse_or()?)),
                "boolean" => Expr::Boolean(Box::new(self.parse_or()?)),
                "string" => Expr::String(Box::new(self.parse_or()?)),
                other => {
                    return Err(syntax(
                        self.source,
                        at,
                        &format!("unsupported function `{other}()`"),
                    ));
                }
            };
            self.expect(&Token::RParen, "`)`")?;
            return Ok(expr);
        }

        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let expr = self.parse_or()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(expr)
            }
            Some(Token::Slash | Token::DoubleSlash) => Ok(Expr::Path(self.parse_path()?)),
            Some(_) => Err(self.error("expected an expression")),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_path(&mut self) -> Result<LocationPath, CompileError> {
        let mut steps = Vec::new();
        let mut attribute = None;

        loop {
            let mut axis = match self.peek() {
                Some(Token::Slash) => Axis::Child,
                Some(Token::DoubleSlash) => Axis::Descendant,
                _ => break,
            };
            let separator_at = self.position();
            self.pos += 1;

            let mut attribute_step = self.eat(&Token::At);
            if !attribute_step
                && let (Some(Token::Name(name)), Some(Token::AxisSep)) =
                    (self.peek(), self.peek_at(1))
            {
                let name = name.clone();
                let at = self.position();
                self.pos += 2;
                match name.as_str() {
                    "child" => {}
                    "descendant" => axis = Axis::Descendant,
                    "attribute" => attribute_step = true,
                    other => {
                        return Err(syntax(
                            self.source,
                            at,
                            &format!("unsupported axis `{other}`"),
                        ));
                    }
                }
            }

            if attribute_step {
                if steps.is_empty() || axis == Axis::Descendant {
                    return Err(syntax(
                        self.source,
                        separator_at,
                        "attribute steps must directly follow an element step",
                    ));
                }
                attribute = Some(self.expect_name("an attribute name")?);
                break;
            }

            let test = match self.peek() {
                Some(Token::Star) => NodeTest::Any,
                Some(Token::Name(name)) => NodeTest::Name(local_part(name)),
                _ => return Err(self.error("expected a node test")),
            };
            self.pos += 1;

            let mut predicates = Vec::new();
            while self.eat(&Token::LBracket) {
                predicates.push(self.parse_pred_or()?);
                self.expect(&Token::RBracket, "`]`")?;
            }
            steps.push(Step {
                axis,
                test,
                predicates,
            });
        }

        if attribute.is_some() && matches!(self.peek(), Some(Token::Slash | Token::DoubleSlash)) {
            return Err(self.error("attribute step must be the last step of a path"));
        }

        Ok(LocationPath { steps, attribute })
    }

    fn parse_pred_or(&mut self) -> Result<Predicate, CompileError> {
        let mut left = self.parse_pred_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_pred_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_pred_and(&mut self) -> Result<Predicate, CompileError> {
        let mut left = self.parse_pred_atom()?;
        while self.eat_keyword("and") {
            let right = self.parse_pred_atom()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_pred_atom(&mut self) -> Result<Predicate, CompileError> {
        if let Some(function) = self.at_function_call() {
            match function.as_str() {
                "not" => {
                    self.pos += 2;
                    let inner = self.parse_pred_or()?;
                    self.expect(&Token::RParen, "`)`")?;
                    return Ok(Predicate::Not(Box::new(inner)));
                }
                "starts-with" | "contains" => {
                    self.pos += 2;
                    let operand = self.parse_operand()?;
                    self.expect(&Token::Comma, "`,`")?;
                    let literal = self.expect_literal()?;
                    self.expect(&Token::RParen, "`)`")?;
                    let comparison = if function == "contains" {
                        Comparison::Contains
                    } else {
                        Comparison::StartsWith
                    };
                    return Ok(Predicate::Compare(operand, comparison, literal));
                }
                _ => {
                    let operand = self.parse_operand()?;
                    return self.parse_comparison(operand);
                }
            }
        }

        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_pred_or()?;
                self.expect(&Token::RParen, "`)`")?;
                Ok(inner)
            }
            Some(Token::Literal(_)) => {
                let literal = self.expect_literal()?;
                let comparison = if self.eat(&Token::Eq) {
                    Comparison::Equals
                } else if self.eat(&Token::NotEq) {
                    Comparison::NotEquals
                } else {
                    return Err(self.error("expected `=` or `!=`"));
                };
                let operand = self.parse_operand()?;
                Ok(Predicate::Compare(operand, comparison, literal))
            }
            _ => {
                let operand = self.parse_operand()?;
                self.parse_comparison(operand)
            }
        }
    }

    fn parse_comparison(&mut self, operand: Operand) -> Result<Predicate, CompileError> {
        if self.eat(&Token::Eq) {
            Ok(Predicate::Compare(
                operand,
                Comparison::Equals,
                self.expect_literal()?,
            ))
        } else if self.eat(&Token::NotEq) {
            Ok(Predicate::Compare(
                operand,
                Comparison::NotEquals,
                self.expect_literal()?,
            ))
        } else {
            Ok(Predicate::Exists(operand))
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, CompileError> {
        if self.eat(&Token::At) {
            return Ok(Operand::Attribute(self.expect_name("an attribute name")?));
        }
        let at = self.position();
        match self.at_function_call() {
            Some(function) => {
                self.pos += 2;
                let operand = match function.as_str() {
                    "local-name" => Operand::LocalName,
                    "namespace-uri" => Operand::NamespaceUri,
                    other => {
                        return Err(syntax(
                            self.source,
                            at,
                            &format!("unsupported function `{other}()` in predicate"),
                        ));
                    }
                };
                self.expect(&Token::RParen, "`)`")?;
                Ok(operand)
            }
            None => Err(self.error("expected `@name`, `local-name()` or `namespace-uri()`")),
        }
    }
}
