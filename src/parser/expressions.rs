//! Pratt-style expression parsing.

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::error::ParserError;
use crate::lexer::TokenKind;
use crate::parser::core::{ParseResult, Parser};

/// Binding power for a binary operator token. Assignment-family tokens
/// bind loosest (and are right-associative); anything else is not a
/// binary operator.
fn precedence(kind: &TokenKind) -> Option<u8> {
    match kind {
        TokenKind::Equal
        | TokenKind::PlusEqual
        | TokenKind::MinusEqual
        | TokenKind::StarEqual
        | TokenKind::SlashEqual => Some(0),
        TokenKind::Or => Some(1),
        TokenKind::And => Some(2),
        TokenKind::EqualEqual | TokenKind::BangEqual => Some(3),
        TokenKind::Less | TokenKind::Greater | TokenKind::LessEqual | TokenKind::GreaterEqual => {
            Some(4)
        }
        TokenKind::Plus | TokenKind::Minus => Some(5),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Some(6),
        _ => None,
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    match kind {
        TokenKind::Plus => Some(BinaryOp::Add),
        TokenKind::Minus => Some(BinaryOp::Sub),
        TokenKind::Star => Some(BinaryOp::Mul),
        TokenKind::Slash => Some(BinaryOp::Div),
        TokenKind::Percent => Some(BinaryOp::Mod),
        TokenKind::EqualEqual => Some(BinaryOp::Eq),
        TokenKind::BangEqual => Some(BinaryOp::Neq),
        TokenKind::Less => Some(BinaryOp::Lt),
        TokenKind::Greater => Some(BinaryOp::Gt),
        TokenKind::LessEqual => Some(BinaryOp::Le),
        TokenKind::GreaterEqual => Some(BinaryOp::Ge),
        TokenKind::And => Some(BinaryOp::And),
        TokenKind::Or => Some(BinaryOp::Or),
        _ => None,
    }
}

impl Parser {
    /// Parse a full expression.
    pub(crate) fn expression(&mut self) -> ParseResult<Expr> {
        self.binary_expression(0)
    }

    fn binary_expression(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.prefix()?;

        loop {
            let Some(prec) = precedence(&self.peek().kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }

            // Assignment is right-associative and only valid at the
            // outermost precedence level.
            if matches!(
                self.peek().kind,
                TokenKind::Equal
                    | TokenKind::PlusEqual
                    | TokenKind::MinusEqual
                    | TokenKind::StarEqual
                    | TokenKind::SlashEqual
            ) {
                left = self.finish_assignment(left)?;
                continue;
            }

            let op_token = self.advance();
            let op = match binary_op(&op_token.kind) {
                Some(op) => op,
                None => {
                    return Err(ParserError::unexpected_token(
                        "binary operator",
                        format!("{}", op_token.kind),
                        op_token.span,
                    ));
                }
            };
            let right = self.binary_expression(prec + 1)?;
            let span = left.span.merge(right.span);
            left = Expr::new(
                ExprKind::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                },
                span,
            );
        }

        Ok(left)
    }

    /// Parse the value side of an assignment. Compound assignments
    /// desugar to a plain assignment over the matching binary operator.
    fn finish_assignment(&mut self, target: Expr) -> ParseResult<Expr> {
        let op_token = self.advance();

        let name = match &target.kind {
            ExprKind::Ident(name) => name.clone(),
            _ => return Err(ParserError::invalid_assignment_target(target.span)),
        };

        let value = self.expression()?;
        let span = target.span.merge(value.span);

        let desugared_op = match op_token.kind {
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            _ => None,
        };
        let value = match desugared_op {
            Some(op) => Expr::new(
                ExprKind::Binary {
                    left: Box::new(target),
                    op,
                    right: Box::new(value),
                },
                span,
            ),
            None => value,
        };

        Ok(Expr::new(
            ExprKind::Assign {
                name,
                value: Box::new(value),
            },
            span,
        ))
    }

    fn prefix(&mut self) -> ParseResult<Expr> {
        let token = self.peek().clone();

        match token.kind {
            TokenKind::NumberLiteral(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::NumberLiteral(value), token.span))
            }
            TokenKind::StringLiteral(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::StringLiteral(value), token.span))
            }
            TokenKind::BoolLiteral(value) => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(value), token.span))
            }
            TokenKind::Identifier(_) => self.identifier_or_call_or_member(),
            TokenKind::Minus => {
                self.advance();
                let operand = self.prefix()?;
                let span = token.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::Bang => {
                self.advance();
                let operand = self.prefix()?;
                let span = token.span.merge(operand.span);
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(&TokenKind::RightParen)?;
                let span = token.span.merge(self.previous_span());
                Ok(Expr::new(ExprKind::Grouping(Box::new(inner)), span))
            }
            TokenKind::Eof => Err(ParserError::UnexpectedEof(token.span)),
            _ => Err(ParserError::unexpected_token(
                "expression",
                format!("{}", token.kind),
                token.span,
            )),
        }
    }

    /// Parse an identifier followed by any number of call argument lists
    /// and member accesses.
    fn identifier_or_call_or_member(&mut self) -> ParseResult<Expr> {
        let name = self.expect_identifier()?;
        let mut expr = Expr::new(ExprKind::Ident(name), self.previous_span());

        loop {
            if self.check(&TokenKind::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.match_token(&TokenKind::Dot) {
                let member = self.expect_identifier()?;
                let span = expr.span.merge(self.previous_span());
                expr = Expr::new(
                    ExprKind::Member {
                        object: Box::new(expr),
                        name: member,
                    },
                    span,
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn finish_call(&mut self, callee: Expr) -> ParseResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;

        let mut args = Vec::new();
        if !self.check(&TokenKind::RightParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }

        self.expect(&TokenKind::RightParen)?;
        let span = callee.span.merge(self.previous_span());

        Ok(Expr::new(
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
            span,
        ))
    }
}
