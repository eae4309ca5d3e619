use super::lexer::{Lexer, Token, TokenKind};
use super::{Expr, ExprError};

pub(super) struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
}

impl<'a> Parser<'a> {
    pub(super) fn new(input: &'a str) -> Result<Self, ExprError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self { lexer, current })
    }

    pub(super) fn parse_expression(&mut self) -> Result<Expr, ExprError> {
        self.parse_or()
    }

    pub(super) fn expect_end(&self) -> Result<(), ExprError> {
        if matches!(self.current.kind, TokenKind::End) {
            Ok(())
        } else {
            Err(ExprError::new(
                self.current.start,
                format!("unexpected token {}", self.current.describe()),
            ))
        }
    }

    fn advance(&mut self) -> Result<(), ExprError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.parse_chain(
            Self::parse_and,
            |kind| matches!(kind, TokenKind::Or),
            "or",
            |lhs, rhs| Expr::Or(Box::new(lhs), Box::new(rhs)),
        )
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        self.parse_chain(
            Self::parse_not,
            |kind| matches!(kind, TokenKind::And),
            "and",
            |lhs, rhs| Expr::And(Box::new(lhs), Box::new(rhs)),
        )
    }

    fn parse_chain<F, P, B>(
        &mut self,
        mut parse_operand: F,
        mut is_operator: P,
        operator_name: &'static str,
        mut build: B,
    ) -> Result<Expr, ExprError>
    where
        F: FnMut(&mut Self) -> Result<Expr, ExprError>,
        P: FnMut(&TokenKind) -> bool,
        B: FnMut(Expr, Expr) -> Expr,
    {
        let mut node = parse_operand(self)?;
        while is_operator(&self.current.kind) {
            self.advance()?;
            self.ensure_operand(operator_name)?;
            let rhs = parse_operand(self)?;
            node = build(node, rhs);
        }
        Ok(node)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        if matches!(self.current.kind, TokenKind::Not) {
            self.advance()?;
            let operand = self.parse_not()?;
            return Ok(Expr::Not(Box::new(operand)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        match self.current.clone() {
            Token {
                kind: TokenKind::Ident(ident),
                ..
            } => {
                self.advance()?;
                Ok(Expr::Ident(ident))
            }
            Token {
                kind: TokenKind::LParen,
                start,
            } => {
                self.advance()?;
                let expr = self.parse_expression()?;
                if matches!(self.current.kind, TokenKind::RParen) {
                    self.advance()?;
                    Ok(expr)
                } else {
                    Err(ExprError::new(start, "missing ')'"))
                }
            }
            Token {
                kind: TokenKind::End,
                start,
            } => Err(ExprError::new(start, "expected identifier or '('")),
            token => Err(ExprError::new(
                token.start,
                format!("expected identifier or '(' but found {}", token.describe()),
            )),
        }
    }

    fn ensure_operand(&self, name: &str) -> Result<(), ExprError> {
        match self.current.kind {
            TokenKind::Or | TokenKind::And | TokenKind::RParen | TokenKind::End => Err(ExprError::new(
                self.current.start,
                format!("expected identifier or '(' after '{name}'"),
            )),
            _ => Ok(()),
        }
    }
}
