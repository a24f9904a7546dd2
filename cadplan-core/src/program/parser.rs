use super::lexer::{Lexer, Token, TokenKind};
use super::{BinaryOp, Expr, Program, ProgramError, Statement};

/// Parses program source into statements. Only syntax is checked here.
pub fn parse(source: &str) -> Result<Program, ProgramError> {
    let tokens = Lexer::new(source).tokenize()?;
    Parser { tokens, index: 0 }.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    fn parse_program(&mut self) -> Result<Program, ProgramError> {
        let mut statements = Vec::new();
        while !self.check(&TokenKind::Eof) {
            let line = self.peek().line;
            let target = self.consume_ident("expected `name = expression`")?;
            self.expect(TokenKind::Eq, "expected '=' after assignment target")?;
            let expr = self.parse_expression()?;
            statements.push(Statement { target, expr, line });
        }
        if statements.is_empty() {
            let token = self.peek();
            return Err(self.error("empty program", token));
        }
        Ok(Program { statements })
    }

    fn parse_expression(&mut self) -> Result<Expr, ProgramError> {
        let mut expr = self.parse_add_sub()?;
        while self.match_kind(&TokenKind::Pipe) {
            let name = self.consume_ident("expected operation name after '|>'")?;
            self.expect(TokenKind::LParen, "expected '(' after pipe stage name")?;
            let mut args = vec![expr];
            args.extend(self.parse_arguments()?);
            expr = Expr::Call {
                name,
                args,
                piped: true,
            };
        }
        Ok(expr)
    }

    fn parse_arguments(&mut self) -> Result<Vec<Expr>, ProgramError> {
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.match_kind(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "expected ')' after arguments")?;
        Ok(args)
    }

    fn parse_add_sub(&mut self) -> Result<Expr, ProgramError> {
        let mut expr = self.parse_mul_div()?;
        loop {
            let op = if self.match_kind(&TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_kind(&TokenKind::Minus) {
                BinaryOp::Sub
            } else {
                return Ok(expr);
            };
            let rhs = self.parse_mul_div()?;
            expr = Expr::Binary {
                lhs: Box::new(expr),
                op,
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_mul_div(&mut self) -> Result<Expr, ProgramError> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = if self.match_kind(&TokenKind::Star) {
                BinaryOp::Mul
            } else if self.match_kind(&TokenKind::Slash) {
                BinaryOp::Div
            } else {
                return Ok(expr);
            };
            let rhs = self.parse_unary()?;
            expr = Expr::Binary {
                lhs: Box::new(expr),
                op,
                rhs: Box::new(rhs),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ProgramError> {
        if self.match_kind(&TokenKind::Minus) {
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ProgramError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::Number(value))
            }
            TokenKind::Str(text) => {
                self.advance();
                Ok(Expr::Str(text))
            }
            TokenKind::Ident(name) => {
                self.advance();
                if self.match_kind(&TokenKind::LParen) {
                    Ok(Expr::Call {
                        name,
                        args: self.parse_arguments()?,
                        piped: false,
                    })
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::RParen, "expected ')' to close group")?;
                Ok(expr)
            }
            ref other => Err(self.error(
                format!("expected expression, found {}", other.describe()),
                &token,
            )),
        }
    }

    fn consume_ident(&mut self, message: &str) -> Result<String, ProgramError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(name)
            }
            ref other => Err(self.error(
                format!("{}, found {}", message, other.describe()),
                &token,
            )),
        }
    }

    fn expect(&mut self, expected: TokenKind, message: &str) -> Result<(), ProgramError> {
        if self.match_kind(&expected) {
            Ok(())
        } else {
            let token = self.peek();
            Err(self.error(
                format!("{}, found {}", message, token.kind.describe()),
                token,
            ))
        }
    }

    fn match_kind(&mut self, expected: &TokenKind) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check(&self, expected: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(expected)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.index]
    }

    fn advance(&mut self) {
        if self.index + 1 < self.tokens.len() {
            self.index += 1;
        }
    }

    fn error(&self, message: impl Into<String>, token: &Token) -> ProgramError {
        ProgramError::Syntax {
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_desugars_to_leading_argument() {
        let program = parse("p = a |> translate(1, 2, 3)").unwrap();
        match &program.statements[0].expr {
            Expr::Call { name, args, piped } => {
                assert_eq!(name, "translate");
                assert!(piped);
                assert_eq!(args[0], Expr::Variable("a".into()));
                assert_eq!(args.len(), 4);
            }
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_statements_run_across_lines() {
        let program = parse("a = 1\nb = a * 2 + 1\n\nc = max(0.1, b)").unwrap();
        let lines: Vec<usize> = program.statements.iter().map(|s| s.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
    }

    #[test]
    fn test_bare_expression_is_rejected() {
        let err = parse("extrude(rect(1, 1), 1)").unwrap_err();
        assert!(matches!(err, ProgramError::Syntax { line: 1, column: 8, .. }));
    }

    #[test]
    fn test_empty_program_is_rejected() {
        assert!(parse("# nothing here\n").is_err());
    }
}
