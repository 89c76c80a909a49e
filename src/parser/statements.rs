//! Statement parsing.

use crate::ast::{FunctionDecl, Stmt, StmtKind};
use crate::lexer::TokenKind;
use crate::parser::core::{ParseResult, Parser};

impl Parser {
    /// Parse a single statement, including its terminator.
    pub(crate) fn statement(&mut self) -> ParseResult<Stmt> {
        match self.peek().kind {
            TokenKind::Let => self.let_statement(),
            TokenKind::If => self.if_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::For => self.for_statement(),
            TokenKind::Def | TokenKind::Func => self.func_def(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Exit => {
                let span = self.advance().span;
                self.end_statement()?;
                Ok(Stmt::new(StmtKind::Exit, span))
            }
            TokenKind::Pass => {
                let span = self.advance().span;
                self.end_statement()?;
                Ok(Stmt::new(StmtKind::Pass, span))
            }
            _ => self.expression_statement(),
        }
    }

    fn expression_statement(&mut self) -> ParseResult<Stmt> {
        let expr = self.expression()?;
        let span = expr.span;
        self.end_statement()?;
        Ok(Stmt::new(StmtKind::Expression(expr), span))
    }

    fn let_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let name = self.expect_identifier()?;
        self.expect(&TokenKind::Equal)?;
        let initializer = self.expression()?;
        let span = start.merge(initializer.span);
        self.end_statement()?;
        Ok(Stmt::new(StmtKind::Let { name, initializer }, span))
    }

    fn if_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let condition = self.expression()?;
        let then_branch = self.block()?;

        let else_branch = if self.match_token(&TokenKind::Else) {
            Some(self.block()?)
        } else {
            None
        };

        let span = start.merge(self.previous_span());
        Ok(Stmt::new(
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            },
            span,
        ))
    }

    fn while_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let condition = self.expression()?;
        let body = self.block()?;
        let span = start.merge(self.previous_span());
        Ok(Stmt::new(StmtKind::While { condition, body }, span))
    }

    /// `for <name> <limit>:` counts the named variable from 0 up to the
    /// limit, exclusive.
    fn for_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let name = self.expect_identifier()?;
        let limit = self.expression()?;
        let body = self.block()?;
        let span = start.merge(self.previous_span());
        Ok(Stmt::new(StmtKind::ForCounted { name, limit, body }, span))
    }

    fn func_def(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;
        let name = self.expect_identifier()?;

        self.expect(&TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                params.push(self.expect_identifier()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RightParen)?;

        let body = self.block()?;
        let span = start.merge(self.previous_span());

        Ok(Stmt::new(
            StmtKind::FuncDef(FunctionDecl {
                name,
                params,
                body,
                span,
            }),
            span,
        ))
    }

    fn return_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.advance().span;

        let value = if self.check(&TokenKind::Newline)
            || self.check(&TokenKind::Dedent)
            || self.is_at_end()
        {
            None
        } else {
            Some(self.expression()?)
        };

        let span = match &value {
            Some(expr) => start.merge(expr.span),
            None => start,
        };
        self.end_statement()?;
        Ok(Stmt::new(StmtKind::Return(value), span))
    }
}
