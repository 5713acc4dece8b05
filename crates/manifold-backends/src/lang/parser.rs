//! Recursive-descent parser for kernel source

use super::ast::{AssignOp, BinOp, Expr, Kernel, LValue, Param, Step, Stmt, Type, UnaryOp};
use super::lexer::{lex, Tok, Token};
use super::Diagnostic;

/// Parse kernel source into its `@kernel` declarations
pub fn parse_source(src: &str) -> Result<Vec<Kernel>, Diagnostic> {
    let tokens = lex(src)?;
    let mut parser = Parser { tokens, pos: 0 };
    let mut kernels = Vec::new();

    while !parser.at(&Tok::Eof) {
        kernels.push(parser.parse_kernel()?);
    }
    if kernels.is_empty() {
        return Err(Diagnostic::new(1, 1, "source contains no @kernel declarations"));
    }
    Ok(kernels)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn at(&self, tok: &Tok) -> bool {
        &self.peek().tok == tok
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> Diagnostic {
        let token = self.peek();
        Diagnostic::new(token.line, token.col, message)
    }

    fn expect(&mut self, tok: Tok) -> Result<Token, Diagnostic> {
        if self.at(&tok) {
            Ok(self.bump())
        } else {
            Err(self.error_here(format!(
                "expected {}, found {}",
                tok.describe(),
                self.peek().tok.describe()
            )))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, u32), Diagnostic> {
        match &self.peek().tok {
            Tok::Ident(name) => {
                let name = name.clone();
                let line = self.peek().line;
                self.bump();
                Ok((name, line))
            }
            other => Err(self.error_here(format!("expected identifier, found {}", other.describe()))),
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), Diagnostic> {
        match &self.peek().tok {
            Tok::Ident(name) if name == keyword => {
                self.bump();
                Ok(())
            }
            other => Err(self.error_here(format!("expected '{keyword}', found {}", other.describe()))),
        }
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().tok, Tok::Ident(name) if name == keyword)
    }

    // --------------------------------------------------------------------
    // Declarations
    // --------------------------------------------------------------------

    fn parse_kernel(&mut self) -> Result<Kernel, Diagnostic> {
        let line = self.peek().line;
        match &self.peek().tok {
            Tok::Attr(name) if name == "kernel" => {
                self.bump();
            }
            other => {
                return Err(self.error_here(format!("expected '@kernel', found {}", other.describe())));
            }
        }
        self.expect_keyword("void")?;
        let (name, _) = self.expect_ident()?;

        self.expect(Tok::LParen)?;
        let mut params = Vec::new();
        if !self.at(&Tok::RParen) {
            loop {
                params.push(self.parse_param()?);
                if self.at(&Tok::Comma) {
                    self.bump();
                } else {
                    break;
                }
            }
        }
        self.expect(Tok::RParen)?;

        let body = self.parse_block()?;
        Ok(Kernel {
            name,
            params,
            body,
            line,
        })
    }

    fn parse_param(&mut self) -> Result<Param, Diagnostic> {
        let line = self.peek().line;
        let mut is_const = false;
        if self.at_keyword("const") {
            self.bump();
            is_const = true;
        }
        let ty = self.parse_type()?;
        let mut is_pointer = false;
        if self.at(&Tok::Star) {
            self.bump();
            is_pointer = true;
        }
        let (name, _) = self.expect_ident()?;
        Ok(Param {
            name,
            ty,
            is_pointer,
            is_const,
            line,
        })
    }

    fn parse_type(&mut self) -> Result<Type, Diagnostic> {
        match &self.peek().tok {
            Tok::Ident(name) => match Type::from_name(name) {
                Some(ty) => {
                    self.bump();
                    Ok(ty)
                }
                None => Err(self.error_here(format!("unknown type name '{name}'"))),
            },
            other => Err(self.error_here(format!("expected type name, found {}", other.describe()))),
        }
    }

    fn at_type(&self) -> bool {
        matches!(&self.peek().tok, Tok::Ident(name) if Type::from_name(name).is_some())
    }

    // --------------------------------------------------------------------
    // Statements
    // --------------------------------------------------------------------

    fn parse_block(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        self.expect(Tok::LBrace)?;
        let mut stmts = Vec::new();
        while !self.at(&Tok::RBrace) {
            if self.at(&Tok::Eof) {
                return Err(self.error_here("unexpected end of source, expected '}'"));
            }
            stmts.push(self.parse_stmt()?);
        }
        self.bump();
        Ok(stmts)
    }

    fn parse_body(&mut self) -> Result<Vec<Stmt>, Diagnostic> {
        if self.at(&Tok::LBrace) {
            self.parse_block()
        } else {
            Ok(vec![self.parse_stmt()?])
        }
    }

    fn parse_stmt(&mut self) -> Result<Stmt, Diagnostic> {
        match &self.peek().tok {
            Tok::Attr(name) if name == "outer" => {
                self.bump();
                self.parse_for(true)
            }
            Tok::Attr(name) => Err(self.error_here(format!("unexpected attribute '@{name}'"))),
            Tok::Ident(name) if name == "for" => self.parse_for(false),
            Tok::Ident(name) if name == "if" => self.parse_if(),
            _ if self.at_type() => self.parse_decl(),
            Tok::Ident(_) => self.parse_assign(),
            other => Err(self.error_here(format!("expected statement, found {}", other.describe()))),
        }
    }

    fn parse_decl(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.peek().line;
        let ty = self.parse_type()?;
        let (name, _) = self.expect_ident()?;
        self.expect(Tok::Assign)?;
        let init = self.parse_expr()?;
        self.expect(Tok::Semi)?;
        Ok(Stmt::Decl { ty, name, init, line })
    }

    fn parse_assign(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.peek().line;
        let (name, _) = self.expect_ident()?;
        let target = if self.at(&Tok::LBracket) {
            self.bump();
            let index = self.parse_expr()?;
            self.expect(Tok::RBracket)?;
            LValue::Index { name, index }
        } else {
            LValue::Name(name)
        };

        let op = match &self.peek().tok {
            Tok::Assign => AssignOp::Set,
            Tok::PlusAssign => AssignOp::Add,
            Tok::MinusAssign => AssignOp::Sub,
            Tok::StarAssign => AssignOp::Mul,
            Tok::SlashAssign => AssignOp::Div,
            other => {
                return Err(self.error_here(format!(
                    "expected assignment operator, found {}",
                    other.describe()
                )));
            }
        };
        self.bump();

        let value = self.parse_expr()?;
        self.expect(Tok::Semi)?;
        Ok(Stmt::Assign {
            target,
            op,
            value,
            line,
        })
    }

    /// `for (int i = <expr>; i < <expr>; <step>) <body>`
    fn parse_for(&mut self, outer: bool) -> Result<Stmt, Diagnostic> {
        let line = self.peek().line;
        self.expect_keyword("for")?;
        self.expect(Tok::LParen)?;

        self.expect_keyword("int")?;
        let (var, _) = self.expect_ident()?;
        self.expect(Tok::Assign)?;
        let start = self.parse_expr()?;
        self.expect(Tok::Semi)?;

        let (cond_var, _) = self.expect_ident()?;
        if cond_var != var {
            return Err(self.error_here(format!(
                "loop condition must test the loop variable '{var}', found '{cond_var}'"
            )));
        }
        self.expect(Tok::Lt)?;
        let bound = self.parse_expr()?;
        self.expect(Tok::Semi)?;

        let step = self.parse_step(&var)?;
        self.expect(Tok::RParen)?;

        let body = self.parse_body()?;
        Ok(Stmt::For {
            outer,
            var,
            start,
            bound,
            step,
            body,
            line,
        })
    }

    fn parse_step(&mut self, var: &str) -> Result<Step, Diagnostic> {
        if self.at(&Tok::PlusPlus) {
            self.bump();
            let (name, _) = self.expect_ident()?;
            if name != var {
                return Err(self.error_here(format!(
                    "loop step must update the loop variable '{var}', found '{name}'"
                )));
            }
            return Ok(Step::Inc);
        }

        let (name, _) = self.expect_ident()?;
        if name != var {
            return Err(self.error_here(format!(
                "loop step must update the loop variable '{var}', found '{name}'"
            )));
        }
        match &self.peek().tok {
            Tok::PlusPlus => {
                self.bump();
                Ok(Step::Inc)
            }
            Tok::PlusAssign => {
                self.bump();
                Ok(Step::AddAssign(self.parse_expr()?))
            }
            other => Err(self.error_here(format!(
                "expected '++' or '+=' in loop step, found {}",
                other.describe()
            ))),
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, Diagnostic> {
        let line = self.peek().line;
        self.expect_keyword("if")?;
        self.expect(Tok::LParen)?;
        let cond = self.parse_expr()?;
        self.expect(Tok::RParen)?;
        let then_body = self.parse_body()?;
        let else_body = if self.at_keyword("else") {
            self.bump();
            if self.at_keyword("if") {
                vec![self.parse_if()?]
            } else {
                self.parse_body()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            cond,
            then_body,
            else_body,
            line,
        })
    }

    // --------------------------------------------------------------------
    // Expressions (precedence climbing)
    // --------------------------------------------------------------------

    fn parse_expr(&mut self) -> Result<Expr, Diagnostic> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_and()?;
        while self.at(&Tok::OrOr) {
            self.bump();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_comparison()?;
        while self.at(&Tok::AndAnd) {
            self.bump();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match &self.peek().tok {
                Tok::Lt => BinOp::Lt,
                Tok::Le => BinOp::Le,
                Tok::Gt => BinOp::Gt,
                Tok::Ge => BinOp::Ge,
                Tok::EqEq => BinOp::Eq,
                Tok::Ne => BinOp::Ne,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match &self.peek().tok {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, Diagnostic> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match &self.peek().tok {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::Percent => BinOp::Rem,
                _ => break,
            };
            self.bump();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, Diagnostic> {
        match &self.peek().tok {
            Tok::Minus => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(self.parse_unary()?),
                })
            }
            Tok::Bang => {
                self.bump();
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(self.parse_unary()?),
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, Diagnostic> {
        match &self.peek().tok {
            Tok::IntLit(v) => {
                let v = *v;
                self.bump();
                Ok(Expr::Int(v))
            }
            Tok::FloatLit(v) => {
                let v = *v;
                self.bump();
                Ok(Expr::Float(v))
            }
            Tok::Ident(name) if name == "true" => {
                self.bump();
                Ok(Expr::Bool(true))
            }
            Tok::Ident(name) if name == "false" => {
                self.bump();
                Ok(Expr::Bool(false))
            }
            Tok::Ident(_) => {
                let (name, _) = self.expect_ident()?;
                if self.at(&Tok::LBracket) {
                    self.bump();
                    let index = self.parse_expr()?;
                    self.expect(Tok::RBracket)?;
                    Ok(Expr::Index {
                        name,
                        index: Box::new(index),
                    })
                } else {
                    Ok(Expr::Name(name))
                }
            }
            Tok::LParen => {
                self.bump();
                let inner = self.parse_expr()?;
                self.expect(Tok::RParen)?;
                Ok(inner)
            }
            other => Err(self.error_here(format!("expected expression, found {}", other.describe()))),
        }
    }
}
