//! Recursive-descent recognizer.
//!
//! Statements are line-bounded: a command starts at the head token of a line
//! (or after a `;`) and ends at the line break, except that expressions
//! continue across lines while a `(`, `[`, or `{` group is open, and block
//! constructs (`DO`, `SELECT`, `IF ... THEN DO`) span lines until their
//! `END`.
//!
//! A line that is not a recognizable statement becomes a [`CommandKind::RawLine`]
//! carrying its verbatim text. After `ADDRESS target MATCHING "pattern"`,
//! the parser enters a raw region: every subsequent line is kept verbatim
//! until the next `ADDRESS` statement or end of program, so foreign text
//! (SQL, assertions, shell) never has to tokenize as REXX.

use crate::ast::{
    ArgPattern, BinaryOp, CallArgs, CallTarget, Command, CommandKind, DoSpec, Expr, UnaryOp,
    WhenClause,
};
use crate::error::ParseError;
use crate::lexer::{tokenize, SourceLine};
use crate::token::{Token, TokenKind};

/// Statement-head keywords. Used to decide whether a line that failed to
/// tokenize is a malformed statement (fatal) or foreign text (raw line).
const STATEMENT_KEYWORDS: &[&str] = &[
    "SAY", "LET", "CALL", "RETURN", "EXIT", "SIGNAL", "PARSE", "ADDRESS", "IF", "DO", "SELECT",
    "REQUIRE", "LEAVE", "ITERATE", "NOP", "WHEN", "OTHERWISE", "END", "ELSE", "THEN",
];

pub struct Parser {
    lines: Vec<SourceLine>,
    /// Current line index.
    li: usize,
    /// Current token index within the line.
    ti: usize,
    /// Open `(`/`[`/`{` groups; expressions continue past the line break
    /// while this is non-zero.
    group_depth: usize,
}

impl Parser {
    /// Parse source text into a command list.
    pub fn parse(source: &str) -> Result<Vec<Command>, ParseError> {
        let lines = tokenize(source)?;
        let mut parser = Parser {
            lines,
            li: 0,
            ti: 0,
            group_depth: 0,
        };
        parser.parse_program()
    }

    fn parse_program(&mut self) -> Result<Vec<Command>, ParseError> {
        let mut commands = Vec::new();
        let mut matching_region = false;

        loop {
            self.skip_to_content();
            if self.at_eof() {
                break;
            }

            if matching_region {
                // Inside an ADDRESS ... MATCHING region every line is raw
                // handler text; only another ADDRESS statement ends it.
                if !self.head_is_keyword("ADDRESS") {
                    commands.push(self.take_raw_line());
                    continue;
                }
                matching_region = false;
            }

            if let Some(cmd) = self.check_line_error()? {
                commands.push(cmd);
                continue;
            }

            let command = self.parse_command()?;
            let is_label = matches!(command.kind, CommandKind::Label { .. });
            if matches!(command.kind, CommandKind::AddressMatching { .. }) {
                matching_region = true;
            }
            commands.push(command);
            if !is_label {
                self.end_statement()?;
            }
        }
        Ok(commands)
    }

    // ========== Cursor helpers ==========

    fn at_eof(&self) -> bool {
        self.li >= self.lines.len()
    }

    fn cur_line(&self) -> Option<&SourceLine> {
        self.lines.get(self.li)
    }

    fn peek(&self) -> Option<&Token> {
        self.cur_line().and_then(|l| l.tokens.get(self.ti))
    }

    /// Second token on the current line, if any.
    fn peek_second(&self) -> Option<&Token> {
        self.cur_line().and_then(|l| l.tokens.get(self.ti + 1))
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().cloned().expect("bump past end of line");
        self.ti += 1;
        token
    }

    fn at_line_end(&self) -> bool {
        self.cur_line()
            .map(|l| self.ti >= l.tokens.len())
            .unwrap_or(true)
    }

    fn next_line(&mut self) {
        self.li += 1;
        self.ti = 0;
    }

    /// Advance past blank and comment-only lines and stray `;`.
    fn skip_to_content(&mut self) {
        loop {
            if self.at_eof() {
                return;
            }
            if self.at_line_end() {
                self.next_line();
                continue;
            }
            if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon)) {
                self.ti += 1;
                continue;
            }
            return;
        }
    }

    /// Line number where the next command starts.
    fn head_line(&self) -> usize {
        self.peek()
            .map(|t| t.line)
            .or_else(|| self.cur_line().map(|l| l.number))
            .unwrap_or_else(|| self.lines.last().map(|l| l.number).unwrap_or(1))
    }

    fn head_is_keyword(&self, word: &str) -> bool {
        self.peek().map(|t| t.is_keyword(word)).unwrap_or(false)
    }

    /// A statement must end at the line break or a `;`.
    fn end_statement(&mut self) -> Result<(), ParseError> {
        if self.at_line_end() {
            self.next_line();
            return Ok(());
        }
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Semicolon) => {
                self.ti += 1;
                Ok(())
            }
            Some(kind) => Err(ParseError::UnexpectedToken {
                expected: "end of statement".to_string(),
                found: kind.to_string(),
                line: self.head_line(),
            }),
            None => Ok(()),
        }
    }

    /// Handle a line the lexer could not fully tokenize: fatal when it heads
    /// with a statement keyword, raw text otherwise.
    fn check_line_error(&mut self) -> Result<Option<Command>, ParseError> {
        let line = match self.cur_line() {
            Some(l) if l.error.is_some() && self.ti == 0 => l,
            _ => return Ok(None),
        };
        let heads_statement = line
            .tokens
            .first()
            .and_then(|t| t.identifier())
            .map(|name| {
                STATEMENT_KEYWORDS
                    .iter()
                    .any(|kw| name.eq_ignore_ascii_case(kw))
            })
            .unwrap_or(false);
        if heads_statement {
            return Err(line.error.clone().expect("line error"));
        }
        Ok(Some(self.take_raw_line()))
    }

    /// Consume the rest of the current line as a verbatim raw-line command.
    fn take_raw_line(&mut self) -> Command {
        let line = self.cur_line().expect("raw line");
        let number = line.number;
        let raw = line.raw.clone();
        self.next_line();
        Command::new(CommandKind::RawLine(raw), number)
    }

    /// Raw fallback is only sound from the start of a line: a statement
    /// already consumed part of this one.
    fn raw_line_or_error(&mut self) -> Result<Command, ParseError> {
        if self.ti == 0 {
            Ok(self.take_raw_line())
        } else {
            Err(self.unexpected("statement"))
        }
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::UnexpectedToken {
                expected: expected.to_string(),
                found: token.kind.to_string(),
                line: token.line,
            },
            None => ParseError::UnexpectedEof {
                expected: expected.to_string(),
            },
        }
    }

    fn expect_keyword(&mut self, word: &str) -> Result<Token, ParseError> {
        if self.head_is_keyword(word) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(word))
        }
    }

    fn expect_kind(&mut self, kind: &TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.peek().map(|t| &t.kind) == Some(kind) {
            Ok(self.bump())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_identifier(&mut self, what: &str) -> Result<(String, usize), ParseError> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Identifier(name),
                line,
                ..
            }) => {
                let out = (name.clone(), *line);
                self.ti += 1;
                Ok(out)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    // ========== Statements ==========

    fn parse_command(&mut self) -> Result<Command, ParseError> {
        let head = self.peek().ok_or_else(|| ParseError::UnexpectedEof {
            expected: "statement".to_string(),
        })?;
        let line = head.line;

        match head.kind.clone() {
            TokenKind::Identifier(name) => {
                let upper = name.to_ascii_uppercase();
                match upper.as_str() {
                    "SAY" => self.parse_say(line),
                    "LET" => self.parse_let(line),
                    "CALL" => self.parse_call(line),
                    "RETURN" => self.parse_return(line),
                    "EXIT" => self.parse_exit(line),
                    "SIGNAL" => self.parse_signal(line),
                    "PARSE" => self.parse_parse_arg(line),
                    "ADDRESS" => self.parse_address(line),
                    "IF" => self.parse_if(line),
                    "DO" => self.parse_do(line),
                    "SELECT" => self.parse_select(line),
                    "REQUIRE" => {
                        self.bump();
                        let expr = self.parse_expr()?;
                        Ok(Command::new(CommandKind::Require(expr), line))
                    }
                    "LEAVE" => {
                        self.bump();
                        Ok(Command::new(CommandKind::Leave, line))
                    }
                    "ITERATE" => {
                        self.bump();
                        Ok(Command::new(CommandKind::Iterate, line))
                    }
                    "NOP" => {
                        self.bump();
                        Ok(Command::new(CommandKind::Nop, line))
                    }
                    "END" => Err(ParseError::UnexpectedEnd { line }),
                    "WHEN" | "OTHERWISE" => Err(ParseError::UnexpectedToken {
                        expected: "a SELECT block".to_string(),
                        found: format!("'{}'", upper),
                        line,
                    }),
                    "ELSE" | "THEN" => Err(ParseError::UnexpectedToken {
                        expected: "statement".to_string(),
                        found: format!("'{}'", upper),
                        line,
                    }),
                    _ => self.parse_headless(name, line),
                }
            }
            TokenKind::String(_) => {
                let expr = self.parse_expr()?;
                Ok(Command::new(CommandKind::AddressCommand(expr), line))
            }
            TokenKind::Heredoc { body, .. } => {
                self.bump();
                Ok(Command::new(CommandKind::AddressHeredoc { body }, line))
            }
            _ => self.raw_line_or_error(),
        }
    }

    /// A statement that starts with a non-keyword identifier: label, bare
    /// assignment, bare call, forbidden `arr[i]`, or raw text.
    fn parse_headless(&mut self, name: String, line: usize) -> Result<Command, ParseError> {
        match self.peek_second().map(|t| t.kind.clone()) {
            Some(TokenKind::Colon) => {
                self.bump();
                self.bump();
                let procedure = if self.head_is_keyword("PROCEDURE") {
                    self.bump();
                    true
                } else {
                    false
                };
                Ok(Command::new(
                    CommandKind::Label {
                        name: name.to_ascii_uppercase(),
                        procedure,
                    },
                    line,
                ))
            }
            Some(TokenKind::Equals) => {
                self.bump();
                self.bump();
                let value = self.parse_expr()?;
                Ok(Command::new(
                    CommandKind::Assign {
                        name: name.to_ascii_uppercase(),
                        value,
                    },
                    line,
                ))
            }
            Some(TokenKind::LBracket) => {
                self.bump();
                let index = self.bracket_index_text()?;
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Equals)) {
                    Err(ParseError::ArrayAssignment { name, index, line })
                } else {
                    Err(ParseError::ArrayAccess { name, index, line })
                }
            }
            Some(TokenKind::LParen) => {
                let expr = self.parse_primary()?;
                match expr {
                    Expr::Call { name, args } => Ok(Command::new(
                        CommandKind::Call {
                            target: CallTarget::Name(name),
                            args,
                        },
                        line,
                    )),
                    _ => Err(self.unexpected("statement")),
                }
            }
            _ => self.raw_line_or_error(),
        }
    }

    fn parse_say(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let mut exprs = Vec::new();
        while !self.at_line_end()
            && !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon))
        {
            exprs.push(self.parse_expr()?);
        }
        Ok(Command::new(CommandKind::Say(exprs), line))
    }

    fn parse_let(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let (name, _) = self.expect_identifier("variable name")?;
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::LBracket)) {
            let index = self.bracket_index_text()?;
            return Err(ParseError::ArrayAssignment { name, index, line });
        }
        self.expect_kind(&TokenKind::Equals, "'='")?;
        let value = self.parse_expr()?;
        Ok(Command::new(
            CommandKind::Assign {
                name: name.to_ascii_uppercase(),
                value,
            },
            line,
        ))
    }

    fn parse_call(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let target = match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Identifier(name)) => {
                self.bump();
                CallTarget::Name(name.to_ascii_uppercase())
            }
            Some(TokenKind::String(s)) => {
                self.bump();
                if s.starts_with("./") || s.starts_with("../") {
                    CallTarget::Path(s)
                } else {
                    CallTarget::Name(s.to_ascii_uppercase())
                }
            }
            _ => return Err(self.unexpected("subroutine name or script path")),
        };
        let mut args = Vec::new();
        if !self.at_line_end()
            && !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon))
        {
            args.push(self.parse_expr()?);
            while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma)) {
                self.bump();
                args.push(self.parse_expr()?);
            }
        }
        Ok(Command::new(
            CommandKind::Call {
                target,
                args: CallArgs::Positional(args),
            },
            line,
        ))
    }

    fn parse_return(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let value = if self.at_line_end()
            || matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon))
        {
            None
        } else {
            Some(self.parse_expr()?)
        };
        Ok(Command::new(CommandKind::Return(value), line))
    }

    fn parse_exit(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let code = if self.at_line_end()
            || self.head_is_keyword("UNLESS")
            || matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon))
        {
            None
        } else {
            Some(self.parse_expr()?)
        };
        let unless = if self.head_is_keyword("UNLESS") {
            self.bump();
            let cond = self.parse_expr()?;
            if !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma)) {
                return Err(ParseError::ExitUnlessMissingComma { line });
            }
            self.bump();
            let message = self.parse_expr()?;
            Some((cond, message))
        } else {
            None
        };
        Ok(Command::new(CommandKind::Exit { code, unless }, line))
    }

    fn parse_signal(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let (name, _) = self.expect_identifier("label name")?;
        Ok(Command::new(
            CommandKind::Signal(name.to_ascii_uppercase()),
            line,
        ))
    }

    fn parse_parse_arg(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        self.expect_keyword("ARG")?;
        let mut patterns = Vec::new();
        loop {
            match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::Identifier(name)) => {
                    self.bump();
                    patterns.push(ArgPattern::Name(name.to_ascii_uppercase()));
                }
                Some(TokenKind::Dot) => {
                    self.bump();
                    patterns.push(ArgPattern::Skip);
                }
                Some(TokenKind::Comma) => {
                    self.bump();
                }
                Some(TokenKind::Semicolon) | None => break,
                _ => return Err(self.unexpected("argument name, '.', or ','")),
            }
            if self.at_line_end() {
                break;
            }
        }
        Ok(Command::new(CommandKind::ParseArg(patterns), line))
    }

    fn parse_address(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let (target, _) = self.expect_identifier("ADDRESS target")?;
        if self.at_line_end()
            || matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon))
        {
            return Ok(Command::new(CommandKind::Address { target }, line));
        }
        if self.head_is_keyword("MATCHING") {
            self.bump();
            let mut multiline = false;
            if self.head_is_keyword("MULTILINE") {
                self.bump();
                multiline = true;
            }
            let pattern = match self.peek().map(|t| t.kind.clone()) {
                Some(TokenKind::String(p)) => {
                    self.bump();
                    p
                }
                _ => return Err(self.unexpected("MATCHING pattern string")),
            };
            if self.head_is_keyword("MULTILINE") {
                self.bump();
                multiline = true;
            }
            return Ok(Command::new(
                CommandKind::AddressMatching {
                    target,
                    pattern,
                    multiline,
                },
                line,
            ));
        }
        // One-shot form: the command expression starts with a string.
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::String(_))) {
            let command = self.parse_expr()?;
            return Ok(Command::new(
                CommandKind::AddressOneShot { target, command },
                line,
            ));
        }
        Err(self.unexpected("MATCHING, a quoted command, or end of statement"))
    }

    fn parse_if(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let cond = self.parse_expr()?;
        if self.at_line_end() {
            self.next_line();
            self.skip_to_content();
        }
        self.expect_keyword("THEN")?;
        let then_branch = self.parse_branch()?;

        // ELSE may follow on the same line (after an inline statement or
        // END) or on the next content line. Probe without consuming: the
        // skipped blanks belong to the next statement when no ELSE follows.
        let saved = (self.li, self.ti);
        self.skip_to_content();
        let else_branch = if self.head_is_keyword("ELSE") {
            self.bump();
            Some(self.parse_branch()?)
        } else {
            (self.li, self.ti) = saved;
            None
        };
        Ok(Command::new(
            CommandKind::If {
                cond,
                then_branch,
                else_branch,
            },
            line,
        ))
    }

    /// A branch after `THEN`/`ELSE`/`OTHERWISE`: an inline statement, a
    /// statement on the following line, or a `DO ... END` block. A plain
    /// `DO` block is flattened into the branch so the header line is not
    /// traced twice.
    fn parse_branch(&mut self) -> Result<Vec<Command>, ParseError> {
        if self.at_line_end() {
            self.next_line();
            self.skip_to_content();
        }
        if self.at_eof() {
            return Err(ParseError::UnexpectedEof {
                expected: "statement".to_string(),
            });
        }
        if let Some(cmd) = self.check_line_error()? {
            return Ok(vec![cmd]);
        }
        let command = self.parse_command()?;
        match command.kind {
            CommandKind::Do {
                spec: DoSpec::Plain,
                body,
            } => Ok(body),
            _ => Ok(vec![command]),
        }
    }

    fn parse_do(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        let spec = if self.at_line_end()
            || matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon))
        {
            DoSpec::Plain
        } else if self.head_is_keyword("FOREVER") {
            self.bump();
            DoSpec::Forever
        } else if self.head_is_keyword("WHILE") {
            self.bump();
            DoSpec::While(self.parse_expr()?)
        } else {
            let (var, _) = self.expect_identifier("loop variable or DO header")?;
            if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Equals)) {
                self.bump();
                let from = self.parse_expr()?;
                self.expect_keyword("TO")?;
                let to = self.parse_expr()?;
                let by = if self.head_is_keyword("BY") {
                    self.bump();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                DoSpec::Counted {
                    var: var.to_ascii_uppercase(),
                    from,
                    to,
                    by,
                }
            } else if self.head_is_keyword("OVER") {
                self.bump();
                DoSpec::Over {
                    var: var.to_ascii_uppercase(),
                    collection: self.parse_expr()?,
                }
            } else {
                return Err(self.unexpected("'=' or OVER in DO header"));
            }
        };
        let body = self.parse_block_until_end("DO", line)?;
        Ok(Command::new(CommandKind::Do { spec, body }, line))
    }

    /// Statements up to the matching `END`. The `END` token is consumed;
    /// anything after it on the same line is left for the caller.
    fn parse_block_until_end(
        &mut self,
        kind: &'static str,
        open_line: usize,
    ) -> Result<Vec<Command>, ParseError> {
        // The block body starts after the header.
        self.end_statement()?;
        let mut body = Vec::new();
        loop {
            self.skip_to_content();
            if self.at_eof() {
                return Err(ParseError::MissingEnd {
                    kind,
                    line: open_line,
                });
            }
            if self.head_is_keyword("END") {
                self.bump();
                return Ok(body);
            }
            if let Some(cmd) = self.check_line_error()? {
                body.push(cmd);
                continue;
            }
            let command = self.parse_command()?;
            let is_label = matches!(command.kind, CommandKind::Label { .. });
            body.push(command);
            if !is_label {
                self.end_statement()?;
            }
        }
    }

    fn parse_select(&mut self, line: usize) -> Result<Command, ParseError> {
        self.bump();
        self.end_statement()?;
        let mut whens = Vec::new();
        let mut otherwise = None;
        loop {
            self.skip_to_content();
            if self.at_eof() {
                return Err(ParseError::MissingEnd {
                    kind: "SELECT",
                    line,
                });
            }
            if self.head_is_keyword("END") {
                self.bump();
                break;
            }
            if self.head_is_keyword("WHEN") {
                let when_line = self.peek().expect("WHEN token").line;
                self.bump();
                let cond = self.parse_expr()?;
                if self.at_line_end() {
                    self.next_line();
                    self.skip_to_content();
                }
                self.expect_keyword("THEN")?;
                let body = self.parse_branch()?;
                whens.push(WhenClause {
                    line: when_line,
                    cond,
                    body,
                });
                continue;
            }
            if self.head_is_keyword("OTHERWISE") {
                let other_line = self.peek().expect("OTHERWISE token").line;
                self.bump();
                let block = self.parse_otherwise_block(line)?;
                otherwise = Some((other_line, block));
                break;
            }
            return Err(self.unexpected("WHEN, OTHERWISE, or END"));
        }
        Ok(Command::new(CommandKind::Select { whens, otherwise }, line))
    }

    /// Statements after `OTHERWISE` up to the SELECT's `END` (consumed).
    fn parse_otherwise_block(&mut self, select_line: usize) -> Result<Vec<Command>, ParseError> {
        let mut block = Vec::new();
        // Inline statement on the OTHERWISE line itself.
        if !self.at_line_end()
            && !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Semicolon))
        {
            block.push(self.parse_command()?);
        }
        loop {
            self.skip_to_content();
            if self.at_eof() {
                return Err(ParseError::MissingEnd {
                    kind: "SELECT",
                    line: select_line,
                });
            }
            if self.head_is_keyword("END") {
                self.bump();
                return Ok(block);
            }
            if let Some(cmd) = self.check_line_error()? {
                block.push(cmd);
                continue;
            }
            let command = self.parse_command()?;
            let is_label = matches!(command.kind, CommandKind::Label { .. });
            block.push(command);
            if !is_label {
                self.end_statement()?;
            }
        }
    }

    /// Reconstruct the index text of a bracketed access for the forbidden
    /// syntax messages. The opening `[` is at the cursor.
    fn bracket_index_text(&mut self) -> Result<String, ParseError> {
        self.expect_kind(&TokenKind::LBracket, "'['")?;
        let mut depth = 1usize;
        let mut text = String::new();
        loop {
            let token = match self.peek() {
                Some(t) => t.clone(),
                None => {
                    return Err(ParseError::UnexpectedEof {
                        expected: "']'".to_string(),
                    })
                }
            };
            self.ti += 1;
            match token.kind {
                TokenKind::LBracket => {
                    depth += 1;
                    text.push('[');
                }
                TokenKind::RBracket => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(text);
                    }
                    text.push(']');
                }
                _ => text.push_str(&token.lexeme),
            }
        }
    }

    // ========== Expressions ==========

    /// Current token for the expression grammar. While a group is open the
    /// expression continues on the next line.
    fn peek_expr(&mut self) -> Option<&Token> {
        if self.group_depth > 0 {
            while !self.at_eof() && self.at_line_end() {
                self.next_line();
            }
        }
        self.peek()
    }

    fn peek_expr_kind(&mut self) -> Option<TokenKind> {
        self.peek_expr().map(|t| t.kind.clone())
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_pipe()
    }

    fn parse_pipe(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_or()?;
        while matches!(self.peek_expr_kind(), Some(TokenKind::PipeOp)) {
            let pipe_line = self.peek_expr().expect("pipe token").line;
            self.bump();
            let target = self.parse_or()?;
            lhs = match target {
                Expr::Symbol(name) => Expr::Call {
                    name,
                    args: CallArgs::Positional(vec![lhs]),
                },
                Expr::Call {
                    name,
                    args: CallArgs::Positional(mut args),
                } => {
                    args.insert(0, lhs);
                    Expr::Call {
                        name,
                        args: CallArgs::Positional(args),
                    }
                }
                _ => return Err(ParseError::InvalidPipeTarget { line: pipe_line }),
            };
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        loop {
            let is_or = match self.peek_expr() {
                Some(t) if t.kind == TokenKind::VerticalBar => true,
                Some(t) if t.is_keyword("OR") => true,
                _ => false,
            };
            if !is_or {
                return Ok(lhs);
            }
            self.bump();
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let is_and = match self.peek_expr() {
                Some(t) if t.kind == TokenKind::Ampersand => true,
                Some(t) if t.is_keyword("AND") => true,
                _ => false,
            };
            if !is_and {
                return Ok(lhs);
            }
            self.bump();
            let rhs = self.parse_comparison()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_concat()?;
        loop {
            let op = match self.peek_expr_kind() {
                Some(TokenKind::Equals) => BinaryOp::Equal,
                Some(TokenKind::DoubleEquals) => BinaryOp::StrictEqual,
                Some(TokenKind::NotEquals) => BinaryOp::NotEqual,
                Some(TokenKind::Greater) => BinaryOp::Greater,
                Some(TokenKind::Less) => BinaryOp::Less,
                Some(TokenKind::GreaterEqual) => BinaryOp::GreaterEqual,
                Some(TokenKind::LessEqual) => BinaryOp::LessEqual,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_concat()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_concat(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_additive()?;
        while matches!(self.peek_expr_kind(), Some(TokenKind::Concat)) {
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = binary(BinaryOp::Concat, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek_expr_kind() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Subtract,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = match self.peek_expr_kind() {
                Some(TokenKind::Star) => BinaryOp::Multiply,
                Some(TokenKind::Slash) => BinaryOp::Divide,
                Some(TokenKind::DoubleSlash) => BinaryOp::Remainder,
                Some(TokenKind::Percent) => BinaryOp::IntDivide,
                _ => return Ok(lhs),
            };
            self.bump();
            let rhs = self.parse_power()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        // Left-associative, classical REXX.
        let mut lhs = self.parse_unary()?;
        while matches!(self.peek_expr_kind(), Some(TokenKind::DoubleStar)) {
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = binary(BinaryOp::Power, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek_expr() {
            Some(t) if t.kind == TokenKind::Minus => Some(UnaryOp::Minus),
            Some(t) if t.kind == TokenKind::Plus => Some(UnaryOp::Plus),
            Some(t) if t.kind == TokenKind::Not => Some(UnaryOp::Not),
            Some(t) if t.is_keyword("NOT") => Some(UnaryOp::Not),
            _ => None,
        };
        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = match self.peek_expr() {
            Some(t) => t.clone(),
            None => {
                return Err(ParseError::UnexpectedEof {
                    expected: "expression".to_string(),
                })
            }
        };
        match token.kind {
            TokenKind::Number(n) => {
                self.bump();
                Ok(Expr::Number(n))
            }
            TokenKind::String(s) => {
                self.bump();
                Ok(Expr::StringLit(s))
            }
            TokenKind::Heredoc { body, .. } => {
                self.bump();
                Ok(Expr::StringLit(body))
            }
            TokenKind::LParen => {
                self.bump();
                self.group_depth += 1;
                let expr = self.parse_expr()?;
                self.expect_group_close(&TokenKind::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::LBracket => self.parse_array_literal(),
            TokenKind::LBrace => self.parse_object_literal(),
            TokenKind::Identifier(name) => {
                self.bump();
                match self.peek().map(|t| &t.kind) {
                    Some(TokenKind::LParen) => self.parse_call_args(name.to_ascii_uppercase()),
                    Some(TokenKind::LBracket) => {
                        let line = token.line;
                        let index = self.bracket_index_text()?;
                        Err(ParseError::ArrayAccess { name, index, line })
                    }
                    _ => Ok(Expr::Symbol(name.to_ascii_uppercase())),
                }
            }
            other => Err(ParseError::UnexpectedToken {
                expected: "expression".to_string(),
                found: other.to_string(),
                line: token.line,
            }),
        }
    }

    fn expect_group_close(&mut self, kind: &TokenKind, what: &str) -> Result<(), ParseError> {
        if self.peek_expr().map(|t| &t.kind) == Some(kind) {
            self.bump();
            self.group_depth -= 1;
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, ParseError> {
        self.bump();
        self.group_depth += 1;
        let mut items = Vec::new();
        if self.peek_expr().map(|t| &t.kind) != Some(&TokenKind::RBracket) {
            loop {
                items.push(self.parse_expr()?);
                match self.peek_expr_kind() {
                    Some(TokenKind::Comma) => {
                        self.bump();
                    }
                    _ => break,
                }
            }
        }
        self.expect_group_close(&TokenKind::RBracket, "']'")?;
        Ok(Expr::ArrayLit(items))
    }

    fn parse_object_literal(&mut self) -> Result<Expr, ParseError> {
        self.bump();
        self.group_depth += 1;
        let mut entries = Vec::new();
        if self.peek_expr().map(|t| &t.kind) != Some(&TokenKind::RBrace) {
            loop {
                let key = match self.peek_expr_kind() {
                    Some(TokenKind::String(s)) => {
                        self.bump();
                        s
                    }
                    Some(TokenKind::Identifier(name)) => {
                        self.bump();
                        name
                    }
                    _ => return Err(self.unexpected("object key")),
                };
                if self.peek_expr().map(|t| &t.kind) != Some(&TokenKind::Colon) {
                    return Err(self.unexpected("':'"));
                }
                self.bump();
                let value = self.parse_expr()?;
                entries.push((key, value));
                match self.peek_expr_kind() {
                    Some(TokenKind::Comma) => {
                        self.bump();
                    }
                    _ => break,
                }
            }
        }
        self.expect_group_close(&TokenKind::RBrace, "'}'")?;
        Ok(Expr::ObjectLit(entries))
    }

    /// Arguments of `name(...)`, cursor on the `(`. A first `label = expr`
    /// pair switches the whole call to named-parameter form.
    fn parse_call_args(&mut self, name: String) -> Result<Expr, ParseError> {
        let call_line = self.peek().expect("open paren").line;
        self.bump();
        self.group_depth += 1;

        if self.peek_expr().map(|t| &t.kind) == Some(&TokenKind::RParen) {
            self.bump();
            self.group_depth -= 1;
            return Ok(Expr::Call {
                name,
                args: CallArgs::Positional(Vec::new()),
            });
        }

        let named = matches!(self.peek_expr().map(|t| &t.kind), Some(TokenKind::Identifier(_)))
            && self.peek_second().map(|t| &t.kind) == Some(&TokenKind::Equals);

        if named {
            let mut entries = Vec::new();
            loop {
                let label = match self.peek_expr_kind() {
                    Some(TokenKind::Identifier(label))
                        if self.peek_second().map(|t| &t.kind) == Some(&TokenKind::Equals) =>
                    {
                        self.bump();
                        self.bump();
                        label
                    }
                    _ => {
                        return Err(ParseError::MixedArguments {
                            name,
                            line: call_line,
                        })
                    }
                };
                let value = self.parse_expr()?;
                entries.push((label, value));
                match self.peek_expr_kind() {
                    Some(TokenKind::Comma) => {
                        self.bump();
                    }
                    _ => break,
                }
            }
            self.expect_group_close(&TokenKind::RParen, "')'")?;
            return Ok(Expr::Call {
                name,
                args: CallArgs::Named(entries),
            });
        }

        let mut args = Vec::new();
        loop {
            args.push(self.parse_expr()?);
            match self.peek_expr_kind() {
                Some(TokenKind::Comma) => {
                    self.bump();
                }
                _ => break,
            }
        }
        self.expect_group_close(&TokenKind::RParen, "')'")?;
        Ok(Expr::Call {
            name,
            args: CallArgs::Positional(args),
        })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
