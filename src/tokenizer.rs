use std::fmt;

use crate::error::SyntaxError;

/// Represents the smallest meaningful units (atoms) of the statement language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // --- Keywords ---
    Select,
    Distinct,
    From,
    Where,
    Insert,
    Into,
    Values,
    Create,
    Table,
    Update,
    Set,
    Delete,
    Drop,
    As,
    Primary,
    Key,
    Unique,
    Not,
    Null,

    // --- Data Types ---
    Int,
    Float,
    Bool,
    DateTime,
    /// The `STRING` column type.
    StringType,

    // --- Identifiers & Literals ---
    /// A name representing a table or a column (e.g., `users`, `Id`).
    Ident(String),
    /// An unsigned integer literal (e.g., `42`). The parser applies any sign
    /// and narrows it to 64 bits.
    Number(u64),
    /// A 64-bit floating-point literal (e.g., `3.14`).
    FloatNumber(f64),
    /// A string literal, defined between single quotes (e.g., `'Alice'`).
    String(String),
    True,
    False,

    // --- Symbols ---
    LeftParen,
    RightParen,
    Comma,
    Semicolon,
    /// Multiplication or wildcard symbol `*`
    Star,
    Plus,
    Minus,
    Slash,
    Equal,
    NotEqual,
    Lower,
    LowerEqual,
    Greater,
    GreaterEqual,

    /// Represents the end of the input.
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Token::Select => "SELECT",
            Token::Distinct => "DISTINCT",
            Token::From => "FROM",
            Token::Where => "WHERE",
            Token::Insert => "INSERT",
            Token::Into => "INTO",
            Token::Values => "VALUES",
            Token::Create => "CREATE",
            Token::Table => "TABLE",
            Token::Update => "UPDATE",
            Token::Set => "SET",
            Token::Delete => "DELETE",
            Token::Drop => "DROP",
            Token::As => "AS",
            Token::Primary => "PRIMARY",
            Token::Key => "KEY",
            Token::Unique => "UNIQUE",
            Token::Not => "NOT",
            Token::Null => "NULL",
            Token::Int => "INT",
            Token::Float => "FLOAT",
            Token::Bool => "BOOL",
            Token::DateTime => "DATETIME",
            Token::StringType => "STRING",
            Token::Ident(name) => return write!(f, "identifier {name}"),
            Token::Number(n) => return write!(f, "{n}"),
            Token::FloatNumber(n) => return write!(f, "{n:?}"),
            Token::String(s) => return write!(f, "'{s}'"),
            Token::True => "TRUE",
            Token::False => "FALSE",
            Token::LeftParen => "'('",
            Token::RightParen => "')'",
            Token::Comma => "','",
            Token::Semicolon => "';'",
            Token::Star => "'*'",
            Token::Plus => "'+'",
            Token::Minus => "'-'",
            Token::Slash => "'/'",
            Token::Equal => "'='",
            Token::NotEqual => "'<>'",
            Token::Lower => "'<'",
            Token::LowerEqual => "'<='",
            Token::Greater => "'>'",
            Token::GreaterEqual => "'>='",
            Token::Eof => "end of input",
        };
        f.write_str(text)
    }
}

/// A lexical scanner (lexer) that converts a raw statement into a sequence of [Token]s.
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
}

impl Tokenizer {
    /// Creates a new Tokenizer for the given input string.
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Processes the entire input and returns a vector of tokens ending with
    /// [Token::Eof].
    ///
    /// # Errors
    /// Returns an error if an invalid character is encountered or if a literal
    /// (like a string) is malformed.
    ///
    /// # Example
    /// ```
    /// # use jsondb::tokenizer::{Tokenizer, Token};
    /// let mut t = Tokenizer::new("SELECT *");
    /// let tokens = t.tokenize().unwrap();
    /// assert_eq!(tokens[0], Token::Select);
    /// ```
    pub fn tokenize(&mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut tokens = Vec::new();

        while !self.is_at_end() {
            self.skip_whitespace();

            if self.is_at_end() {
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        tokens.push(Token::Eof);
        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, SyntaxError> {
        let ch = self.current_char();

        let token = match ch {
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '*' => Token::Star,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '/' => Token::Slash,
            '=' => Token::Equal,
            '<' => {
                self.advance();
                return Ok(match self.peek_char() {
                    Some('=') => self.advance_with(Token::LowerEqual),
                    Some('>') => self.advance_with(Token::NotEqual),
                    _ => Token::Lower,
                });
            }
            '>' => {
                self.advance();
                return Ok(match self.peek_char() {
                    Some('=') => self.advance_with(Token::GreaterEqual),
                    _ => Token::Greater,
                });
            }
            c if c.is_alphabetic() || c == '_' => return Ok(self.read_identifier()),
            c if c.is_ascii_digit() => return self.read_number(),
            '\'' => return self.read_string(),
            _ => return Err(SyntaxError::new("a token", format!("'{ch}'"))),
        };

        self.advance();
        Ok(token)
    }

    // --- Navigation Helpers ---

    fn current_char(&self) -> char {
        self.input[self.position]
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    fn advance_with(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn skip_whitespace(&mut self) {
        while !self.is_at_end() && self.current_char().is_whitespace() {
            self.advance();
        }
    }

    // --- Extraction Logic ---

    /// Reads a sequence of alphanumeric characters and determines if it's
    /// a reserved keyword or a user-defined identifier.
    ///
    /// Keywords are matched case-sensitively: `select` is an identifier.
    fn read_identifier(&mut self) -> Token {
        let mut ident = String::new();

        while !self.is_at_end()
            && (self.current_char().is_alphanumeric() || self.current_char() == '_')
        {
            ident.push(self.current_char());
            self.advance();
        }

        match ident.as_str() {
            "SELECT" => Token::Select,
            "DISTINCT" => Token::Distinct,
            "FROM" => Token::From,
            "WHERE" => Token::Where,
            "INSERT" => Token::Insert,
            "INTO" => Token::Into,
            "VALUES" => Token::Values,
            "CREATE" => Token::Create,
            "TABLE" => Token::Table,
            "UPDATE" => Token::Update,
            "SET" => Token::Set,
            "DELETE" => Token::Delete,
            "DROP" => Token::Drop,
            "AS" => Token::As,
            "PRIMARY" => Token::Primary,
            "KEY" => Token::Key,
            "UNIQUE" => Token::Unique,
            "NOT" => Token::Not,
            "NULL" => Token::Null,
            "INT" => Token::Int,
            "FLOAT" => Token::Float,
            "BOOL" => Token::Bool,
            "DATETIME" => Token::DateTime,
            "STRING" => Token::StringType,
            "TRUE" => Token::True,
            "FALSE" => Token::False,
            _ => Token::Ident(ident),
        }
    }

    /// Reads a numeric literal. If a dot `.` is encountered, it returns a
    /// [Token::FloatNumber], otherwise a [Token::Number].
    fn read_number(&mut self) -> Result<Token, SyntaxError> {
        let mut number = String::new();
        let mut has_dot = false;

        while !self.is_at_end()
            && (self.current_char().is_ascii_digit() || (self.current_char() == '.' && !has_dot))
        {
            if self.current_char() == '.' {
                has_dot = true;
            }
            number.push(self.current_char());
            self.advance();
        }

        if !self.is_at_end() && self.current_char() == '.' {
            return Err(SyntaxError::new("a number", format!("{number}.")));
        }

        if has_dot {
            return number
                .parse::<f64>()
                .map(Token::FloatNumber)
                .map_err(|_| SyntaxError::new("a float", number.clone()));
        }

        number
            .parse::<u64>()
            .map(Token::Number)
            .map_err(|_| SyntaxError::new("a 64-bit integer", number.clone()))
    }

    /// Reads a string literal enclosed in single quotes.
    fn read_string(&mut self) -> Result<Token, SyntaxError> {
        self.advance(); // opening quote

        let mut string = String::new();
        while !self.is_at_end() && self.current_char() != '\'' {
            string.push(self.current_char());
            self.advance();
        }

        if self.is_at_end() {
            return Err(SyntaxError::new("closing quote", "end of input"));
        }

        // closing quote
        self.advance();

        Ok(Token::String(string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Tokenizer::new(input).tokenize().unwrap()
    }

    #[test]
    fn test_tokenize_simple() {
        assert_eq!(
            tokenize("DROP TABLE users"),
            vec![
                Token::Drop,
                Token::Table,
                Token::Ident("users".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_create_table() {
        assert_eq!(
            tokenize("CREATE TABLE T (Id INT PRIMARY KEY, Seen DATETIME NOT NULL)"),
            vec![
                Token::Create,
                Token::Table,
                Token::Ident("T".into()),
                Token::LeftParen,
                Token::Ident("Id".into()),
                Token::Int,
                Token::Primary,
                Token::Key,
                Token::Comma,
                Token::Ident("Seen".into()),
                Token::DateTime,
                Token::Not,
                Token::Null,
                Token::RightParen,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert_eq!(
            tokenize("select Select SELECT"),
            vec![
                Token::Ident("select".into()),
                Token::Ident("Select".into()),
                Token::Select,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            tokenize("a<=b<>c>=d<e>f=g+h-i*j/k"),
            vec![
                Token::Ident("a".into()),
                Token::LowerEqual,
                Token::Ident("b".into()),
                Token::NotEqual,
                Token::Ident("c".into()),
                Token::GreaterEqual,
                Token::Ident("d".into()),
                Token::Lower,
                Token::Ident("e".into()),
                Token::Greater,
                Token::Ident("f".into()),
                Token::Equal,
                Token::Ident("g".into()),
                Token::Plus,
                Token::Ident("h".into()),
                Token::Minus,
                Token::Ident("i".into()),
                Token::Star,
                Token::Ident("j".into()),
                Token::Slash,
                Token::Ident("k".into()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_literals() {
        assert_eq!(
            tokenize("42, 1.5, 'Bob Dylan', '', TRUE, FALSE, NULL"),
            vec![
                Token::Number(42),
                Token::Comma,
                Token::FloatNumber(1.5),
                Token::Comma,
                Token::String("Bob Dylan".into()),
                Token::Comma,
                Token::String(String::new()),
                Token::Comma,
                Token::True,
                Token::Comma,
                Token::False,
                Token::Comma,
                Token::Null,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_errors() {
        let err = Tokenizer::new("'hello").tokenize().unwrap_err();
        assert_eq!(err.to_string(), "expected closing quote, found end of input");

        assert!(Tokenizer::new("1.2.3").tokenize().is_err());
        assert!(Tokenizer::new("99999999999999999999").tokenize().is_err());
        assert!(Tokenizer::new("a # b").tokenize().is_err());
    }
}
