//! Recursive-descent parser for the statement language.
//!
//! Binary operators all share one precedence level and chain to the left:
//! `a - b - c` parses as `(a - b) - c`, and `Id > 1 = TRUE` as
//! `(Id > 1) = TRUE`. Parentheses are the only way to group differently.
//! `NOT` takes the whole expression that follows it.

use crate::ast::*;
use crate::data_type::DataType;
use crate::error::SyntaxError;
use crate::tokenizer::{Token, Tokenizer};
use crate::value::Value;

/// Tokenizes and parses a single statement.
///
/// # Example
/// ```
/// # use jsondb::parser::parse;
/// # use jsondb::ast::Statement;
/// let statement = parse("DROP TABLE users").unwrap();
/// assert!(matches!(statement, Statement::DropTable(d) if d.name == "users"));
/// ```
pub fn parse(text: &str) -> Result<Statement, SyntaxError> {
    let tokens = Tokenizer::new(text).tokenize()?;
    Parser::new(tokens).parse()
}

pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if tokens.last() != Some(&Token::Eof) {
            tokens.push(Token::Eof);
        }
        Self {
            tokens,
            position: 0,
        }
    }

    pub fn parse(&mut self) -> Result<Statement, SyntaxError> {
        let statement = match self.current_token() {
            Token::Select => self.parse_select(),
            Token::Insert => self.parse_insert(),
            Token::Create => self.parse_create_table(),
            Token::Update => self.parse_update(),
            Token::Delete => self.parse_delete(),
            Token::Drop => self.parse_drop_table(),
            _ => Err(self.unexpected(["SELECT", "INSERT", "CREATE", "UPDATE", "DELETE", "DROP"])),
        }?;

        // semicolon is optional
        if matches!(self.current_token(), Token::Semicolon) {
            self.advance();
        }

        if !self.is_at_end() {
            return Err(self.unexpected(["end of input"]));
        }

        Ok(statement)
    }

    // --- Helpers ---

    fn current_token(&self) -> &Token {
        &self.tokens[self.position]
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() - 1 {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current_token(), Token::Eof)
    }

    fn unexpected<const N: usize>(&self, expected: [&str; N]) -> SyntaxError {
        SyntaxError::one_of(expected, self.current_token().to_string())
    }

    fn consume(&mut self, expected: Token) -> Result<(), SyntaxError> {
        if *self.current_token() == expected {
            self.advance();
            Ok(())
        } else {
            Err(SyntaxError::new(
                expected.to_string(),
                self.current_token().to_string(),
            ))
        }
    }

    /// Consumes `token` if it is next.
    fn eat(&mut self, token: Token) -> bool {
        if *self.current_token() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_ident(&mut self) -> Result<String, SyntaxError> {
        match self.current_token() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(["identifier"])),
        }
    }

    fn consume_data_type(&mut self) -> Result<DataType, SyntaxError> {
        let data_type = match self.current_token() {
            Token::Int => DataType::Int,
            Token::Float => DataType::Float,
            Token::Bool => DataType::Bool,
            Token::StringType => DataType::String,
            Token::DateTime => DataType::DateTime,
            _ => return Err(self.unexpected(["INT", "FLOAT", "BOOL", "STRING", "DATETIME"])),
        };
        self.advance();
        Ok(data_type)
    }

    /// `item (',' item)*`
    fn comma_separated<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<Vec<T>, SyntaxError> {
        let mut items = vec![item(self)?];
        while self.eat(Token::Comma) {
            items.push(item(self)?);
        }
        Ok(items)
    }

    fn parse_where(&mut self) -> Result<Option<Expr>, SyntaxError> {
        if self.eat(Token::Where) {
            self.parse_expression().map(Some)
        } else {
            Ok(None)
        }
    }

    // --- Statements ---

    fn parse_select(&mut self) -> Result<Statement, SyntaxError> {
        self.consume(Token::Select)?;
        let distinct = self.eat(Token::Distinct);

        let columns = if self.eat(Token::Star) {
            ColumnsSelect::Star
        } else {
            match self.current_token() {
                Token::Ident(_) => ColumnsSelect::Columns(self.comma_separated(Self::parse_select_item)?),
                _ => return Err(self.unexpected(["'*'", "identifier"])),
            }
        };

        self.consume(Token::From)?;
        let table = self.consume_ident()?;
        let where_clause = self.parse_where()?;

        Ok(Statement::Select(Select {
            distinct,
            columns,
            table,
            where_clause,
        }))
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, SyntaxError> {
        let column = self.consume_ident()?;
        let alias = if self.eat(Token::As) || matches!(self.current_token(), Token::Ident(_)) {
            Some(self.consume_ident()?)
        } else {
            None
        };
        Ok(SelectItem { column, alias })
    }

    fn parse_insert(&mut self) -> Result<Statement, SyntaxError> {
        self.consume(Token::Insert)?;
        self.consume(Token::Into)?;
        let table = self.consume_ident()?;

        let columns = if self.eat(Token::LeftParen) {
            let columns = self.comma_separated(Self::consume_ident)?;
            self.consume(Token::RightParen)?;
            Some(columns)
        } else {
            None
        };

        self.consume(Token::Values)?;
        self.consume(Token::LeftParen)?;
        let values = self.comma_separated(Self::parse_literal)?;
        self.consume(Token::RightParen)?;

        Ok(Statement::InsertInto(InsertInto {
            table,
            columns,
            values,
        }))
    }

    fn parse_create_table(&mut self) -> Result<Statement, SyntaxError> {
        self.consume(Token::Create)?;
        self.consume(Token::Table)?;
        let name = self.consume_ident()?;
        self.consume(Token::LeftParen)?;
        let columns = self.comma_separated(Self::parse_column_def)?;
        self.consume(Token::RightParen)?;
        Ok(Statement::CreateTable(CreateTable { name, columns }))
    }

    /// `name type` then `PRIMARY KEY`, `UNIQUE` and `NULL | NOT NULL`, each at
    /// most once and in any order.
    fn parse_column_def(&mut self) -> Result<ColumnDef, SyntaxError> {
        let name = self.consume_ident()?;
        let data_type = self.consume_data_type()?;
        let mut column = ColumnDef::new(name, data_type);

        loop {
            match self.current_token() {
                Token::Primary if !column.primary_key => {
                    self.advance();
                    self.consume(Token::Key)?;
                    column.primary_key = true;
                }
                Token::Unique if !column.unique => {
                    self.advance();
                    column.unique = true;
                }
                Token::Null if column.nullability.is_none() => {
                    self.advance();
                    column.nullability = Some(Nullability::Null);
                }
                Token::Not if column.nullability.is_none() => {
                    self.advance();
                    self.consume(Token::Null)?;
                    column.nullability = Some(Nullability::NotNull);
                }
                Token::Comma | Token::RightParen => return Ok(column),
                _ => {
                    let mut expected = vec!["','", "')'"];
                    if !column.primary_key {
                        expected.push("PRIMARY KEY");
                    }
                    if !column.unique {
                        expected.push("UNIQUE");
                    }
                    if column.nullability.is_none() {
                        expected.extend(["NULL", "NOT NULL"]);
                    }
                    return Err(SyntaxError::one_of(
                        expected,
                        self.current_token().to_string(),
                    ));
                }
            }
        }
    }

    fn parse_update(&mut self) -> Result<Statement, SyntaxError> {
        self.consume(Token::Update)?;
        let table = self.consume_ident()?;
        self.consume(Token::Set)?;
        let assignments = self.comma_separated(|parser| {
            let column = parser.consume_ident()?;
            parser.consume(Token::Equal)?;
            Ok((column, parser.parse_literal()?))
        })?;
        let where_clause = self.parse_where()?;

        Ok(Statement::Update(Update {
            table,
            assignments,
            where_clause,
        }))
    }

    fn parse_delete(&mut self) -> Result<Statement, SyntaxError> {
        self.consume(Token::Delete)?;
        self.consume(Token::From)?;
        let table = self.consume_ident()?;
        let where_clause = self.parse_where()?;
        Ok(Statement::Delete(Delete {
            table,
            where_clause,
        }))
    }

    fn parse_drop_table(&mut self) -> Result<Statement, SyntaxError> {
        self.consume(Token::Drop)?;
        self.consume(Token::Table)?;
        let name = self.consume_ident()?;
        Ok(Statement::DropTable(DropTable { name }))
    }

    // --- Expressions ---

    fn parse_expression(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.parse_unary()?;
        while let Some(op) = self.binary_op() {
            self.advance();
            let right = self.parse_unary()?;
            expr = Expr::binary(expr, op, right);
        }
        Ok(expr)
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        Some(match self.current_token() {
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Equal => BinaryOp::Eq,
            Token::NotEqual => BinaryOp::NotEq,
            Token::Lower => BinaryOp::Lt,
            Token::LowerEqual => BinaryOp::LtEq,
            Token::Greater => BinaryOp::Gt,
            Token::GreaterEqual => BinaryOp::GtEq,
            _ => return None,
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        match self.current_token() {
            Token::Not => {
                self.advance();
                Ok(Expr::Not(Box::new(self.parse_expression()?)))
            }
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.consume(Token::RightParen)?;
                Ok(Expr::Nested(Box::new(inner)))
            }
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(Expr::Column(name))
            }
            Token::Number(_)
            | Token::FloatNumber(_)
            | Token::Minus
            | Token::String(_)
            | Token::True
            | Token::False
            | Token::Null => self.parse_literal().map(Expr::Literal),
            _ => Err(self.unexpected(["NOT", "'('", "identifier", "literal"])),
        }
    }

    /// A literal value. Quoted text in the `YYYY-MM-DD HH:MM:SS` layout is a
    /// DATETIME literal.
    fn parse_literal(&mut self) -> Result<Value, SyntaxError> {
        let value = match self.current_token() {
            Token::Number(n) => Value::Int(
                i64::try_from(*n).map_err(|_| SyntaxError::new("a 64-bit integer", n.to_string()))?,
            ),
            Token::FloatNumber(f) => Value::Float(*f),
            Token::String(s) => match Value::parse_datetime(s) {
                Some(dt) => Value::DateTime(dt),
                None => Value::Text(s.as_str().into()),
            },
            Token::True => Value::Bool(true),
            Token::False => Value::Bool(false),
            Token::Null => Value::Null,
            Token::Minus => {
                self.advance();
                return match self.current_token() {
                    Token::Number(n) => {
                        let n = 0i64
                            .checked_sub_unsigned(*n)
                            .ok_or_else(|| SyntaxError::new("a 64-bit integer", format!("-{n}")))?;
                        self.advance();
                        Ok(Value::Int(n))
                    }
                    Token::FloatNumber(f) => {
                        let f = -*f;
                        self.advance();
                        Ok(Value::Float(f))
                    }
                    _ => Err(self.unexpected(["number"])),
                };
            }
            _ => return Err(self.unexpected(["literal"])),
        };
        self.advance();
        Ok(value)
    }
}
