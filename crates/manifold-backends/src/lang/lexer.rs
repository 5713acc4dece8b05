//! Hand-rolled lexer for kernel source

use super::Diagnostic;

/// Token kind
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Tok {
    Ident(String),
    IntLit(i64),
    FloatLit(f64),
    /// `@name` attribute (`@kernel`, `@outer`)
    Attr(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semi,
    Star,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    Plus,
    PlusPlus,
    Minus,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
    AndAnd,
    OrOr,
    Bang,
    Eof,
}

impl Tok {
    /// Human-readable token description for diagnostics
    pub(super) fn describe(&self) -> String {
        match self {
            Tok::Ident(name) => format!("identifier '{name}'"),
            Tok::IntLit(v) => format!("integer literal {v}"),
            Tok::FloatLit(v) => format!("float literal {v}"),
            Tok::Attr(name) => format!("attribute '@{name}'"),
            Tok::Eof => "end of source".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Tok::LParen => "(",
            Tok::RParen => ")",
            Tok::LBrace => "{",
            Tok::RBrace => "}",
            Tok::LBracket => "[",
            Tok::RBracket => "]",
            Tok::Comma => ",",
            Tok::Semi => ";",
            Tok::Star => "*",
            Tok::Assign => "=",
            Tok::PlusAssign => "+=",
            Tok::MinusAssign => "-=",
            Tok::StarAssign => "*=",
            Tok::SlashAssign => "/=",
            Tok::Plus => "+",
            Tok::PlusPlus => "++",
            Tok::Minus => "-",
            Tok::Slash => "/",
            Tok::Percent => "%",
            Tok::Lt => "<",
            Tok::Le => "<=",
            Tok::Gt => ">",
            Tok::Ge => ">=",
            Tok::EqEq => "==",
            Tok::Ne => "!=",
            Tok::AndAnd => "&&",
            Tok::OrOr => "||",
            Tok::Bang => "!",
            _ => "",
        }
    }
}

/// A token with its source position
#[derive(Debug, Clone)]
pub(super) struct Token {
    pub tok: Tok,
    pub line: u32,
    pub col: u32,
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> Diagnostic {
        Diagnostic::new(self.line, self.col, message)
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.peek2() == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    let (line, col) = (self.line, self.col);
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some('*') if self.peek2() == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err(Diagnostic::new(line, col, "unterminated block comment"));
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_ident(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    fn lex_number(&mut self) -> Result<Tok, Diagnostic> {
        let mut text = String::new();
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek2().map(|c| c.is_ascii_digit()).unwrap_or(true) {
            is_float = true;
            text.push('.');
            self.bump();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            is_float = true;
            text.push('e');
            self.bump();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                text.push(sign);
                self.bump();
            }
            let mut saw_digit = false;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    saw_digit = true;
                    text.push(c);
                    self.bump();
                } else {
                    break;
                }
            }
            if !saw_digit {
                return Err(self.error("malformed exponent in numeric literal"));
            }
        }
        // C-style float suffix, accepted and discarded
        if matches!(self.peek(), Some('f') | Some('F')) {
            is_float = true;
            self.bump();
        }

        if is_float {
            text.parse::<f64>()
                .map(Tok::FloatLit)
                .map_err(|_| self.error(format!("invalid float literal '{text}'")))
        } else {
            text.parse::<i64>()
                .map(Tok::IntLit)
                .map_err(|_| self.error(format!("integer literal '{text}' out of range")))
        }
    }
}

/// Lex kernel source into a token stream terminated by [`Tok::Eof`]
pub(super) fn lex(src: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();

    loop {
        lexer.skip_trivia()?;
        let (line, col) = (lexer.line, lexer.col);
        let Some(c) = lexer.peek() else {
            tokens.push(Token {
                tok: Tok::Eof,
                line,
                col,
            });
            return Ok(tokens);
        };

        let tok = match c {
            '@' => {
                lexer.bump();
                let name = lexer.lex_ident();
                if name.is_empty() {
                    return Err(Diagnostic::new(line, col, "expected attribute name after '@'"));
                }
                Tok::Attr(name)
            }
            c if c.is_ascii_alphabetic() || c == '_' => Tok::Ident(lexer.lex_ident()),
            c if c.is_ascii_digit() => lexer.lex_number()?,
            '(' => {
                lexer.bump();
                Tok::LParen
            }
            ')' => {
                lexer.bump();
                Tok::RParen
            }
            '{' => {
                lexer.bump();
                Tok::LBrace
            }
            '}' => {
                lexer.bump();
                Tok::RBrace
            }
            '[' => {
                lexer.bump();
                Tok::LBracket
            }
            ']' => {
                lexer.bump();
                Tok::RBracket
            }
            ',' => {
                lexer.bump();
                Tok::Comma
            }
            ';' => {
                lexer.bump();
                Tok::Semi
            }
            '+' => {
                lexer.bump();
                match lexer.peek() {
                    Some('+') => {
                        lexer.bump();
                        Tok::PlusPlus
                    }
                    Some('=') => {
                        lexer.bump();
                        Tok::PlusAssign
                    }
                    _ => Tok::Plus,
                }
            }
            '-' => {
                lexer.bump();
                if lexer.peek() == Some('=') {
                    lexer.bump();
                    Tok::MinusAssign
                } else {
                    Tok::Minus
                }
            }
            '*' => {
                lexer.bump();
                if lexer.peek() == Some('=') {
                    lexer.bump();
                    Tok::StarAssign
                } else {
                    Tok::Star
                }
            }
            '/' => {
                lexer.bump();
                if lexer.peek() == Some('=') {
                    lexer.bump();
                    Tok::SlashAssign
                } else {
                    Tok::Slash
                }
            }
            '%' => {
                lexer.bump();
                Tok::Percent
            }
            '<' => {
                lexer.bump();
                if lexer.peek() == Some('=') {
                    lexer.bump();
                    Tok::Le
                } else {
                    Tok::Lt
                }
            }
            '>' => {
                lexer.bump();
                if lexer.peek() == Some('=') {
                    lexer.bump();
                    Tok::Ge
                } else {
                    Tok::Gt
                }
            }
            '=' => {
                lexer.bump();
                if lexer.peek() == Some('=') {
                    lexer.bump();
                    Tok::EqEq
                } else {
                    Tok::Assign
                }
            }
            '!' => {
                lexer.bump();
                if lexer.peek() == Some('=') {
                    lexer.bump();
                    Tok::Ne
                } else {
                    Tok::Bang
                }
            }
            '&' => {
                lexer.bump();
                if lexer.peek() == Some('&') {
                    lexer.bump();
                    Tok::AndAnd
                } else {
                    return Err(Diagnostic::new(line, col, "expected '&&'"));
                }
            }
            '|' => {
                lexer.bump();
                if lexer.peek() == Some('|') {
                    lexer.bump();
                    Tok::OrOr
                } else {
                    return Err(Diagnostic::new(line, col, "expected '||'"));
                }
            }
            other => {
                return Err(Diagnostic::new(line, col, format!("unexpected character '{other}'")));
            }
        };

        tokens.push(Token { tok, line, col });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        lex(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_lex_symbols_and_idents() {
        let toks = kinds("ab[i] += 2;");
        assert_eq!(
            toks,
            vec![
                Tok::Ident("ab".into()),
                Tok::LBracket,
                Tok::Ident("i".into()),
                Tok::RBracket,
                Tok::PlusAssign,
                Tok::IntLit(2),
                Tok::Semi,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_lex_attributes() {
        let toks = kinds("@kernel void f() {}");
        assert_eq!(toks[0], Tok::Attr("kernel".into()));
        assert_eq!(toks[1], Tok::Ident("void".into()));
    }

    #[test]
    fn test_lex_numbers() {
        assert_eq!(kinds("42")[0], Tok::IntLit(42));
        assert_eq!(kinds("1.5")[0], Tok::FloatLit(1.5));
        assert_eq!(kinds("2.0f")[0], Tok::FloatLit(2.0));
        assert_eq!(kinds("1e3")[0], Tok::FloatLit(1000.0));
        assert_eq!(kinds("1.5e-1")[0], Tok::FloatLit(0.15));
    }

    #[test]
    fn test_lex_comments() {
        let toks = kinds("a // trailing\n/* block\ncomment */ b");
        assert_eq!(
            toks,
            vec![Tok::Ident("a".into()), Tok::Ident("b".into()), Tok::Eof]
        );
    }

    #[test]
    fn test_lex_errors_carry_position() {
        let err = lex("a\n  $").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.col, 3);

        let err = lex("/* open").unwrap_err();
        assert!(err.message.contains("unterminated"));
    }

    #[test]
    fn test_lex_increment_vs_plus_assign() {
        assert_eq!(kinds("++i")[0], Tok::PlusPlus);
        assert_eq!(kinds("i += 1")[1], Tok::PlusAssign);
    }
}
