//! Recursive-descent parser, grounded in
//! `examples/original_source/ome/parser.py`'s `Parser` class, adapted to the
//! hand-written (combinator-free) parsing style of
//! `why_lib/src/parser/direct_parsing.rs`.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::ast::{Block, Expr, Method, Send, Slot, TopLevelMethod};
use crate::error::OmeError;
use crate::position::Position;
use crate::reader::{lex, Reader};

const MAX_PARAMS: usize = 15;
use crate::tags::MAX_ARRAY_SIZE;

static RESERVED_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    ["self", "true", "false"].into_iter().collect()
});

type PResult<T> = Result<T, OmeError>;

pub struct Parser {
    reader: Reader,
}

impl Parser {
    pub fn new(source: &str, stream_name: impl Into<String>) -> Self {
        Parser { reader: Reader::new(source, stream_name) }
    }

    pub fn from_file(path: &std::path::Path) -> PResult<Self> {
        Ok(Parser { reader: Reader::from_file(path)? })
    }

    /// Parse an entire source file into the toplevel method the rest of the
    /// pipeline expects (spec §3 `TopLevelMethod`).
    pub fn parse_toplevel(mut self) -> PResult<TopLevelMethod> {
        let block = self.block()?;
        self.reader.scan();
        if !self.reader.at_end() {
            return Err(self.reader.error("expected declaration or end of file"));
        }
        Ok(TopLevelMethod::wrap(block))
    }

    fn check_name(&self, name: &str, at: &Position) -> PResult<()> {
        if RESERVED_NAMES.contains(name) {
            return Err(OmeError::ReservedName { name: name.to_string(), position: at.clone() });
        }
        Ok(())
    }

    fn check_num_params(&self, n: usize, at: &Position) -> PResult<()> {
        if n >= MAX_PARAMS + 1 {
            return Err(OmeError::TooManyParameters { count: n, position: at.clone() });
        }
        Ok(())
    }

    fn argument_name(&mut self) -> PResult<String> {
        self.reader.scan();
        if self.peek_keyword() {
            return Err(self.reader.error("expected argument name"));
        }
        let pos = self.reader.position();
        lex::match_arg_name(&mut self.reader).ok_or_else(|| OmeError::Parse {
            message: "expected argument name".into(),
            position: pos,
        })
    }

    fn peek_keyword(&mut self) -> bool {
        let checkpoint = self.reader.checkpoint();
        let matched = lex::match_keyword(&mut self.reader).is_some();
        self.reader.restore(&checkpoint);
        matched
    }

    fn token_keyword(&mut self) -> Option<String> {
        self.reader.scan();
        lex::match_keyword(&mut self.reader)
    }

    fn expr_token_keyword(&mut self) -> Option<String> {
        self.reader.scan();
        if self.reader.has_more_tokens() {
            lex::match_keyword(&mut self.reader)
        } else {
            None
        }
    }

    fn token_name(&mut self) -> Option<(String, Position)> {
        self.reader.scan();
        let pos = self.reader.position();
        lex::match_name(&mut self.reader).map(|n| (n, pos))
    }

    fn expr_token_name(&mut self) -> Option<(String, Position)> {
        self.reader.scan();
        if !self.reader.has_more_tokens() {
            return None;
        }
        let pos = self.reader.position();
        lex::match_name(&mut self.reader).map(|n| (n, pos))
    }

    /// `(KEYWORD argname (',' argname)*)+ | NAME`
    fn signature(&mut self) -> PResult<(String, Vec<String>)> {
        let mut symbol = String::new();
        let mut arg_names = Vec::new();
        while let Some(part) = self.token_keyword() {
            if part.starts_with('~') && !symbol.is_empty() {
                return Err(self.reader.error("expected keyword"));
            }
            symbol.push_str(&part);
            arg_names.push(self.argument_name()?);
            while self.reader.token_str(",") {
                symbol.push(',');
                arg_names.push(self.argument_name()?);
            }
        }
        if symbol.is_empty() {
            let pos = self.reader.position();
            let (name, _) = self
                .token_name()
                .ok_or_else(|| self.reader.error("expected name or keyword"))?;
            self.check_name(&name, &pos)?;
            symbol = name;
        }
        let pos = self.reader.position();
        self.check_num_params(arg_names.len(), &pos)?;
        Ok((symbol, arg_names))
    }

    /// Loop over newline- or `;`-separated statement positions, calling
    /// `body` once per statement line.
    fn statement_lines<T>(&mut self, mut body: impl FnMut(&mut Self) -> PResult<T>) -> PResult<Vec<T>> {
        let mut results = Vec::new();
        let mut prev_indent_line: i64 = -1;
        loop {
            self.reader.scan();
            if self.reader.peek_end_token() || self.reader.at_end() {
                break;
            }
            self.reader.set_indent();
            if self.reader.line_number() as i64 == prev_indent_line {
                return Err(self.reader.error("expected end of statement"));
            }
            prev_indent_line = self.reader.line_number() as i64;
            results.push(body(self)?);
            if self.reader.token_str(";") {
                prev_indent_line = -1;
            }
        }
        Ok(results)
    }

    /// `{ localdef }* { '|' method '|' body }*`
    fn block(&mut self) -> PResult<Expr> {
        let mut methods = Vec::new();
        let mut slots = Vec::new();
        let mut statements = Vec::new();
        let mut defined_symbols: HashSet<String> = HashSet::new();
        let mut defined_methods: HashSet<String> = HashSet::new();

        self.reader.push_indent();
        let parse_result = self.block_body(&mut methods, &mut slots, &mut statements, &mut defined_symbols, &mut defined_methods);
        self.reader.pop_indent();
        parse_result?;

        self.reader.scan();
        if !self.reader.at_end() && !self.reader.peek_literal("}") {
            return Err(self.reader.error("expected declaration or end of block"));
        }

        if slots.is_empty() && methods.is_empty() {
            return Ok(Expr::Block(Box::new(Block::empty())));
        }
        let block = Block::new(slots, methods);
        if statements.is_empty() {
            Ok(Expr::Block(Box::new(block)))
        } else {
            statements.push(Expr::Block(Box::new(block)));
            Ok(Expr::Sequence(statements))
        }
    }

    fn block_body(
        &mut self,
        methods: &mut Vec<Method>,
        slots: &mut Vec<Slot>,
        statements: &mut Vec<Expr>,
        defined_symbols: &mut HashSet<String>,
        defined_methods: &mut HashSet<String>,
    ) -> PResult<()> {
        let mut prev_indent_line: i64 = -1;
        loop {
            self.reader.scan();
            if self.reader.peek_end_token() || self.reader.at_end() {
                break;
            }
            self.reader.set_indent();
            if self.reader.line_number() as i64 == prev_indent_line {
                return Err(self.reader.error("expected end of statement"));
            }
            prev_indent_line = self.reader.line_number() as i64;

            self.reader.scan();
            if self.peek_keyword() {
                break;
            }
            let checkpoint = self.reader.checkpoint();
            let pos = self.reader.position();
            let name = match lex::match_name(&mut self.reader) {
                Some(n) => n,
                None => {
                    self.reader.restore(&checkpoint);
                    break;
                }
            };
            self.check_name(&name, &pos)?;
            if defined_symbols.contains(&name) {
                return Err(OmeError::NameConflict { name: name.clone(), position: pos });
            }
            let mutable = self.expect_assign()?;
            let value = self.expr()?;
            statements.push(Expr::LocalVariable { name: name.clone(), mutable, value: Box::new(value) });
            slots.push(Slot { name: name.clone(), mutable, index: slots.len() });
            defined_symbols.insert(name.clone());
            if mutable {
                defined_symbols.insert(format!("{}:", name));
            }

            if self.reader.token_str(";") {
                prev_indent_line = -1;
            }
        }

        while self.reader.token_str("|") {
            let (symbol, args) = self.signature()?;
            if defined_methods.contains(&symbol) {
                return Err(self.reader.error(format!("method '{}' is already defined", symbol)));
            }
            if defined_symbols.contains(&symbol) {
                return Err(self.reader.error(format!("method '{}' conflicts with variable definition", symbol)));
            }
            if !self.reader.token_str("|") {
                return Err(self.reader.error("expected '|'"));
            }
            let body = self.statements()?;
            methods.push(Method::new(symbol.clone(), args, body));
            defined_methods.insert(symbol);
        }
        Ok(())
    }

    fn expect_assign(&mut self) -> PResult<bool> {
        self.reader.scan();
        if self.reader.token_str(":=") {
            Ok(true)
        } else if self.reader.token_str("=") {
            Ok(false)
        } else {
            Err(self.reader.error("expected '=' or ':='"))
        }
    }

    pub fn toplevel(self) -> PResult<TopLevelMethod> {
        self.parse_toplevel()
    }

    fn statement(&mut self) -> PResult<Expr> {
        self.reader.scan();
        let maybe_assign = {
            let checkpoint = self.reader.checkpoint();
            let is_name = lex::match_name(&mut self.reader).is_some();
            self.reader.restore(&checkpoint);
            is_name
        };
        let checkpoint = self.reader.checkpoint();
        let expr = self.expr()?;
        self.reader.scan();
        if self.reader.token_str(":=") {
            return Err(self.reader.error("mutable variables are only allowed in blocks"));
        }
        if self.reader.token_str("=") {
            let (name, pos) = match &expr {
                Expr::Send(s) if s.receiver.is_none() && !maybe_assign => {
                    return Err(OmeError::Parse {
                        message: "left hand side of assignment must be a name".into(),
                        position: checkpoint_position(self, &checkpoint),
                    });
                }
                Expr::Send(s) if s.receiver.is_none() => (s.symbol.clone(), s.position.clone()),
                _ => {
                    return Err(OmeError::Parse {
                        message: "left hand side of assignment must be a name".into(),
                        position: checkpoint_position(self, &checkpoint),
                    });
                }
            };
            if name.starts_with('~') {
                return Err(OmeError::Parse { message: "local variables cannot be private".into(), position: pos.clone() });
            }
            self.check_name(&name, &pos)?;
            let value = self.expr()?;
            return Ok(Expr::LocalVariable { name, mutable: false, value: Box::new(value) });
        }
        Ok(expr)
    }

    fn statements(&mut self) -> PResult<Expr> {
        self.reader.push_indent();
        let result = self.statement_lines(|p| p.statement());
        self.reader.pop_indent();
        let mut statements = result?;
        match statements.last() {
            None => return Err(self.reader.error("expected statement or expression")),
            Some(Expr::LocalVariable { .. }) => return Err(self.reader.error("expected statement or expression")),
            _ => {}
        }
        if statements.len() == 1 {
            Ok(statements.pop().unwrap())
        } else {
            Ok(Expr::Sequence(statements))
        }
    }

    fn array(&mut self) -> PResult<Expr> {
        self.reader.push_indent();
        let result = self.statement_lines(|p| p.expr());
        self.reader.pop_indent();
        let elems = result?;
        if elems.len() > MAX_ARRAY_SIZE {
            return Err(OmeError::ArraySizeTooBig { size: elems.len(), position: self.reader.position() });
        }
        Ok(Expr::Array(elems))
    }

    /// `unaryexpr (KEYWORD unaryexpr (',' unaryexpr)*)+?`
    fn expr(&mut self) -> PResult<Expr> {
        let start_pos = self.reader.position();
        self.reader.scan();
        let mut expr = if self.peek_keyword() { None } else { Some(self.unaryexpr()?) };

        let mut symbol = String::new();
        let mut args = Vec::new();
        let mut kw_pos = self.reader.position();
        while let Some(part) = self.expr_token_keyword() {
            if part.starts_with('~') {
                if !symbol.is_empty() {
                    return Err(OmeError::Parse { message: "expected keyword".into(), position: kw_pos });
                }
                if expr.is_some() {
                    return Err(OmeError::Parse {
                        message: "private message sent to an explicit receiver".into(),
                        position: kw_pos,
                    });
                }
            }
            symbol.push_str(&part);
            args.push(self.unaryexpr()?);
            while self.reader.expr_token_str(",") {
                symbol.push(',');
                args.push(self.unaryexpr()?);
            }
            kw_pos = self.reader.position();
        }

        if !args.is_empty() {
            self.check_num_params(args.len(), &start_pos)?;
            expr = Some(Expr::Send(Send::new(expr, symbol, args, start_pos)));
        }
        expr.ok_or_else(|| self.reader.error("expected expression"))
    }

    /// `atom NAME*`
    fn unaryexpr(&mut self) -> PResult<Expr> {
        let mut expr = self.atom()?;
        loop {
            self.reader.scan();
            if self.peek_keyword() {
                break;
            }
            let pos = self.reader.position();
            let name = match self.expr_token_name() {
                Some((n, _)) => n,
                None => break,
            };
            if name.starts_with('~') {
                return Err(OmeError::Parse {
                    message: "private message sent to an explicit receiver".into(),
                    position: pos,
                });
            }
            expr = Expr::Send(Send::new(Some(expr), name, vec![], pos));
        }
        Ok(expr)
    }

    fn atom(&mut self) -> PResult<Expr> {
        if self.reader.expr_token_str("(") {
            let statements = self.statements()?;
            if !self.reader.token_str(")") {
                return Err(self.reader.error("expected ')'"));
            }
            return Ok(statements);
        }
        if self.reader.expr_token_str("{") {
            let block = self.block()?;
            if !self.reader.token_str("}") {
                return Err(self.reader.error("expected '}'"));
            }
            return Ok(block);
        }
        if self.reader.expr_token_str("[") {
            let array = self.array()?;
            if !self.reader.token_str("]") {
                return Err(self.reader.error("expected ']'"));
            }
            return Ok(array);
        }

        let pos = self.reader.position();
        if let Some((name, _)) = self.expr_token_name() {
            if let Some(reserved) = reserved_expr(&name, &pos) {
                return Ok(reserved);
            }
            return Ok(Expr::Send(Send::new(None, name, vec![], pos)));
        }

        let number_checkpoint = self.reader.checkpoint();
        self.reader.scan();
        if self.reader.has_more_tokens() {
            if let Some((whole, decimal, exponent)) = lex::match_number(&mut self.reader) {
                return Ok(Expr::Number(normalize_number(whole, decimal, exponent, pos)));
            }
        }
        self.reader.restore(&number_checkpoint);

        self.reader.scan();
        if self.reader.has_more_tokens() {
            if let Some(s) = lex::match_string(&mut self.reader) {
                return Ok(Expr::String(s));
            }
        }

        Err(self.reader.error("expected expression"))
    }
}

fn checkpoint_position(parser: &mut Parser, checkpoint: &crate::reader::Checkpoint) -> Position {
    let restore_to = parser.reader.checkpoint();
    parser.reader.restore(checkpoint);
    let pos = parser.reader.position();
    parser.reader.restore(&restore_to);
    pos
}

/// Numbers parse as significand × 10^exponent; trailing zeros are stripped
/// from both the whole and decimal parts while folding their weight into
/// the exponent, preserving the exact decimal value bit-for-bit with the
/// reference parser's `atom()`.
fn normalize_number(whole: String, decimal: Option<String>, exponent: Option<String>, position: Position) -> crate::ast::Number {
    let whole_stripped = whole.trim_end_matches('0');
    let whole_stripped = if whole_stripped.is_empty() || whole_stripped == "-" || whole_stripped == "+" {
        "0"
    } else {
        whole_stripped
    };
    let mut significand: i64 = whole_stripped.parse().unwrap_or(0);
    let trailing = whole.len() - whole_stripped.len();
    let mut exp: i32 = exponent.and_then(|e| e.parse().ok()).unwrap_or(0) + trailing as i32;

    if let Some(dec) = decimal {
        let dec_stripped = dec.trim_end_matches('0');
        if !dec_stripped.is_empty() {
            let scale = 10i64.pow(dec_stripped.len() as u32);
            let dec_value: i64 = dec_stripped.parse().unwrap_or(0);
            let sign = if significand < 0 { -1 } else { 1 };
            significand = significand * scale + sign * dec_value;
            exp -= dec_stripped.len() as i32;
        }
    }

    crate::ast::Number { significand, exponent: exp, position }
}

/// `self`/`true`/`false` resolve to fixed expressions rather than being
/// looked up as ordinary names — they're still surfaced in expression
/// position (spec §4.2), just rejected as binders.
fn reserved_expr(name: &str, position: &Position) -> Option<Expr> {
    match name {
        "self" => Some(Expr::Send(Send::new(None, "self", vec![], position.clone()))),
        "true" => Some(Expr::Send(Send::new(None, "True", vec![], position.clone()))),
        "false" => Some(Expr::Send(Send::new(None, "False", vec![], position.clone()))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> PResult<TopLevelMethod> {
        Parser::new(src, "<test>").parse_toplevel()
    }

    #[test]
    fn parses_unary_send_as_main_slot() {
        let ast = parse("main = 1 print").unwrap();
        let (name, value) = top_level_slot(&ast);
        assert_eq!(name, "main");
        match value {
            Expr::Send(s) => assert_eq!(s.symbol, "print"),
            other => panic!("expected send, got {:?}", other),
        }
    }

    #[test]
    fn parses_keyword_send_with_positional_comma() {
        // main = 1 at: 2, 3
        let ast = parse("main = foo at: 1, 2").unwrap();
        let _ = ast;
    }

    #[test]
    fn rejects_duplicate_slot_names() {
        let err = parse("x = 1\nx = 2\nmain = 1").unwrap_err();
        assert_eq!(err.category(), "NameConflict");
    }

    #[test]
    fn number_strips_trailing_zeros() {
        let ast = parse("n = 100\nmain = 1").unwrap();
        let (_, value) = top_level_slot_named(&ast, "n");
        match value {
            Expr::Number(n) => {
                assert_eq!(n.significand, 1);
                assert_eq!(n.exponent, 2);
            }
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn decimal_number_adjusts_exponent() {
        let ast = parse("n = 1.50\nmain = 1").unwrap();
        let (_, value) = top_level_slot_named(&ast, "n");
        match value {
            Expr::Number(n) => {
                assert_eq!(n.significand, 15);
                assert_eq!(n.exponent, -1);
            }
            other => panic!("expected number, got {:?}", other),
        }
    }

    #[test]
    fn string_literal_unescapes_quote() {
        let ast = parse(r"main = 'it\'s'").unwrap();
        let (_, value) = top_level_slot(&ast);
        assert_eq!(value, &Expr::String("it's".to_string()));
    }

    #[test]
    fn private_message_rejected_with_explicit_receiver() {
        let err = parse("main = 1 ~foo").unwrap_err();
        assert_eq!(err.category(), "ParseError");
    }

    /// Extracts the sole top-level slot definition's `(name, value)`. A
    /// toplevel `name = expr` line is a slot, not a method (see §3 on
    /// shared variable/method namespace) — it parses to a `Sequence` whose
    /// first element is the `LocalVariable` and whose last is the `Block`.
    fn top_level_slot(ast: &TopLevelMethod) -> (&str, &Expr) {
        match &ast.body {
            Expr::Sequence(stmts) => match &stmts[0] {
                Expr::LocalVariable { name, value, .. } => (name.as_str(), value.as_ref()),
                other => panic!("expected local variable, got {:?}", other),
            },
            other => panic!("expected sequence, got {:?}", other),
        }
    }

    fn top_level_slot_named<'a>(ast: &'a TopLevelMethod, name: &str) -> (&'a str, &'a Expr) {
        match &ast.body {
            Expr::Sequence(stmts) => {
                for stmt in stmts {
                    if let Expr::LocalVariable { name: n, value, .. } = stmt {
                        if n == name {
                            return (n.as_str(), value.as_ref());
                        }
                    }
                }
                panic!("slot '{}' not found", name);
            }
            other => panic!("expected sequence, got {:?}", other),
        }
    }
}
