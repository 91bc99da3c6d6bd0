//! Query Parser
//!
//! Converts the token stream from the lexer into a [`SelectQuery`].
//!
//! Precedence, loosest first: separate `where` clauses, `|`, `&`, `!`.
//! Several `where` clauses are kept apart in the AST and conjoined when the
//! plan is built, so `where a | b where c` means `(a | b) & c`.

use crate::error::{Result, TsdbError};
use crate::tsql_ast::*;
use crate::tsql_lexer::{Lexeme, Lexer, Token};

pub struct Parser {
    tokens: Vec<Lexeme>,
    position: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Lexeme>) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    /// Parse a query string
    pub fn parse(query: &str) -> Result<SelectQuery> {
        let mut lexer = Lexer::new(query);
        let tokens = lexer.tokenize()?;
        let mut parser = Parser::new(tokens);
        parser.parse_query()
    }

    pub fn parse_query(&mut self) -> Result<SelectQuery> {
        if self.current() == &Token::Select {
            self.advance();
        }

        let star_position = self.current_position();
        let projection = self.parse_projection()?;

        let from = if self.current() == &Token::From {
            self.parse_from()?
        } else {
            Vec::new()
        };

        if projection == Projection::All && from.is_empty() {
            return Err(TsdbError::syntax(star_position, "'*' requires a from clause"));
        }

        let mut conditions = Vec::new();
        while self.current() == &Token::Where {
            self.advance();
            conditions.push(self.parse_condition()?);
        }

        if self.current() != &Token::Eof {
            return Err(self.unexpected("end of query"));
        }

        Ok(SelectQuery {
            projection,
            from,
            conditions,
        })
    }

    fn parse_projection(&mut self) -> Result<Projection> {
        if self.current() == &Token::Star {
            self.advance();
            return Ok(Projection::All);
        }

        let mut fields = Vec::new();
        while let Token::Identifier(_) = self.current() {
            fields.push(self.parse_field_ref()?);
        }

        if fields.is_empty() {
            return Err(self.unexpected("field name or '*'"));
        }
        Ok(Projection::Fields(fields))
    }

    fn parse_from(&mut self) -> Result<Vec<TableRef>> {
        self.expect(&Token::From)?;

        let mut tables = Vec::new();
        while let Token::Identifier(name) = self.current() {
            tables.push(TableRef {
                name: name.clone(),
                position: self.current_position(),
            });
            self.advance();
        }

        if tables.is_empty() {
            return Err(self.unexpected("table name"));
        }
        Ok(tables)
    }

    /// Parse one `where` clause body
    fn parse_condition(&mut self) -> Result<Condition> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Condition> {
        let mut left = self.parse_and()?;

        while self.current() == &Token::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition> {
        let mut left = self.parse_unary()?;

        while self.current() == &Token::And {
            self.advance();
            let right = self.parse_unary()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Condition> {
        if self.current() == &Token::Not {
            self.advance();
            Ok(Condition::Not(Box::new(self.parse_unary()?)))
        } else {
            self.parse_primary()
        }
    }

    fn parse_primary(&mut self) -> Result<Condition> {
        match self.current() {
            Token::LeftParen => {
                self.advance();
                let condition = self.parse_or()?;
                self.expect(&Token::RightParen)?;
                Ok(condition)
            }
            Token::Identifier(_) => self.parse_comparison(),
            _ => Err(self.unexpected("condition")),
        }
    }

    fn parse_comparison(&mut self) -> Result<Condition> {
        let field = self.parse_field_ref()?;

        let op = match self.current() {
            Token::Match => CompareOp::Match,
            Token::NotMatch => CompareOp::NotMatch,
            Token::Equal => CompareOp::Equal,
            Token::NotEqual => CompareOp::NotEqual,
            Token::LessThan => CompareOp::LessThan,
            Token::LessThanEq => CompareOp::LessThanEq,
            Token::GreaterThan => CompareOp::GreaterThan,
            Token::GreaterThanEq => CompareOp::GreaterThanEq,
            _ => return Err(self.unexpected("comparison operator")),
        };
        self.advance();

        let position = self.current_position();
        let value = self.parse_literal()?;

        Ok(Condition::Compare {
            field,
            op,
            value,
            position,
        })
    }

    fn parse_field_ref(&mut self) -> Result<FieldRef> {
        let position = self.current_position();
        let first = self.parse_identifier()?;

        if self.current() == &Token::Dot {
            self.advance();
            let field = self.parse_identifier()?;
            Ok(FieldRef {
                table: Some(first),
                field,
                position,
            })
        } else {
            Ok(FieldRef {
                table: None,
                field: first,
                position,
            })
        }
    }

    // Helper methods

    fn current(&self) -> &Token {
        self.tokens
            .get(self.position)
            .map(|l| &l.token)
            .unwrap_or(&Token::Eof)
    }

    fn current_position(&self) -> usize {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .map_or(0, |l| l.position)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn unexpected(&self, expected: &str) -> TsdbError {
        TsdbError::syntax(
            self.current_position(),
            format!("expected {}, got {}", expected, self.current()),
        )
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        if std::mem::discriminant(self.current()) == std::mem::discriminant(expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&expected.to_string()))
        }
    }

    fn parse_identifier(&mut self) -> Result<String> {
        if let Token::Identifier(name) = self.current() {
            let result = name.clone();
            self.advance();
            Ok(result)
        } else {
            Err(self.unexpected("identifier"))
        }
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        let literal = match self.current() {
            Token::Integer(n) => Literal::Integer(*n),
            Token::String(s) => Literal::String(s.clone()),
            Token::Date(d) => Literal::Date(d.clone()),
            Token::Null => Literal::Null,
            _ => return Err(self.unexpected("literal")),
        };
        self.advance();
        Ok(literal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(projection: &Projection) -> Vec<String> {
        match projection {
            Projection::All => vec!["*".to_string()],
            Projection::Fields(fields) => fields.iter().map(|f| f.to_string()).collect(),
        }
    }

    #[test]
    fn test_parse_simple_select() {
        let query = Parser::parse("i-id i-input where i-input ~ \"rain\"").unwrap();
        assert_eq!(names(&query.projection), vec!["i-id", "i-input"]);
        assert!(query.from.is_empty());
        assert_eq!(query.conditions.len(), 1);

        match &query.conditions[0] {
            Condition::Compare {
                field: f,
                op,
                value,
                position,
            } => {
                assert_eq!(f.field, "i-input");
                assert_eq!(*op, CompareOp::Match);
                assert_eq!(*value, Literal::String("rain".to_string()));
                assert_eq!(*position, 29);
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_parse_select_keyword_and_from() {
        let query = Parser::parse("SELECT item.i-id parse-id FROM item parse").unwrap();
        assert_eq!(names(&query.projection), vec!["item.i-id", "parse-id"]);
        let tables: Vec<&str> = query.from.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tables, vec!["item", "parse"]);
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let query = Parser::parse("i-id where i-id = 1 | i-id = 2 & i-wf = 1").unwrap();
        match &query.conditions[0] {
            Condition::Or(_, right) => assert!(matches!(**right, Condition::And(_, _))),
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_parentheses_and_negation() {
        let query = Parser::parse("i-id where !(i-id = 1 or i-id = 2) and not i-wf = 0").unwrap();
        match &query.conditions[0] {
            Condition::And(left, right) => {
                assert!(matches!(**left, Condition::Not(_)));
                assert!(matches!(**right, Condition::Not(_)));
            }
            other => panic!("unexpected condition {:?}", other),
        }
    }

    #[test]
    fn test_multiple_where_clauses_kept_apart() {
        let query = Parser::parse("i-id where i-id = 1 | i-id = 2 where i-wf = 1").unwrap();
        assert_eq!(query.conditions.len(), 2);
        assert!(matches!(query.conditions[0], Condition::Or(_, _)));
    }

    #[test]
    fn test_literals() {
        let query =
            Parser::parse("i-id where i-date >= 2019-03-21 & i-id != -1 & i-input = null").unwrap();
        let mut literals = Vec::new();
        fn collect(c: &Condition, out: &mut Vec<Literal>) {
            match c {
                Condition::And(l, r) | Condition::Or(l, r) => {
                    collect(l, out);
                    collect(r, out);
                }
                Condition::Not(inner) => collect(inner, out),
                Condition::Compare { value, .. } => out.push(value.clone()),
            }
        }
        collect(&query.conditions[0], &mut literals);
        assert_eq!(
            literals,
            vec![
                Literal::Date("2019-03-21".to_string()),
                Literal::Integer(-1),
                Literal::Null
            ]
        );
    }

    #[test]
    fn test_star_requires_from() {
        assert!(matches!(
            Parser::parse("* from item").unwrap().projection,
            Projection::All
        ));
        match Parser::parse("select * where i-id = 1") {
            Err(TsdbError::QuerySyntax { position, .. }) => assert_eq!(position, 7),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_syntax_errors_carry_position() {
        let cases = [
            ("i-id where i-id 3", 16),
            ("i-id where (i-id = 1", 20),
            ("i-id where i-id = i-wf", 18),
            ("where i-id = 1", 0),
            ("i-id from", 9),
            ("i-id where", 10),
            ("i-id where i-id = 1 )", 20),
        ];
        for (query, expected) in cases {
            match Parser::parse(query) {
                Err(TsdbError::QuerySyntax { position, .. }) => {
                    assert_eq!(position, expected, "{}", query)
                }
                other => panic!("{}: unexpected {:?}", query, other),
            }
        }
    }
}
