//! Query statements: parsing and committed-view execution
//!
//! A deliberately small statement language covering the shapes a
//! transactional query channel needs:
//!
//! ```text
//! SELECT <field | *> FROM <coll> [WHERE META().id = $n | META().id IN $n]
//!                                [ORDER BY META().id ASC|DESC]
//! INSERT INTO <coll> VALUES ($key, $value)
//! UPDATE <coll> SET <field> = <literal> [, ...] WHERE META().id = $n
//! DELETE FROM <coll> WHERE META().id = $n
//! ```
//!
//! Collections are referenced by dotted path or bare name; parameters are
//! positional (`$1`-based). Parsing failures and execution failures are
//! distinct conditions: a statement that does not parse never touches the
//! store.
//!
//! The parsed [`Statement`] is shared with the transaction engine, which
//! routes mutating statements through its own staging rules instead of the
//! committed-view execution implemented here.

use crate::adapter::DocumentStore;
use atrium_core::{Collection, Content, StoreError, StoreResult};

/// What a SELECT emits per matching document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// The whole document
    All,
    /// A single named field, wrapped in an object
    Field(String),
}

/// Document predicate over the metadata id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaPredicate {
    /// `META().id = $n`; parameter must be a string key
    IdEq(usize),
    /// `META().id IN $n`; parameter must be an array of string keys
    IdIn(usize),
}

/// ORDER BY direction over the metadata id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Ascending key order
    Asc,
    /// Descending key order
    Desc,
}

/// A parsed statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Read documents
    Select {
        /// Projection per row
        projection: Projection,
        /// Dotted collection reference
        collection: String,
        /// Optional id predicate; absent means whole collection
        predicate: Option<MetaPredicate>,
        /// Optional key ordering
        order: Option<Order>,
    },
    /// Create one document: key and content from parameters
    Insert {
        /// Dotted collection reference
        collection: String,
        /// Parameter index of the document key
        key_param: usize,
        /// Parameter index of the document content
        value_param: usize,
    },
    /// Set fields on matching documents
    Update {
        /// Dotted collection reference
        collection: String,
        /// (field, literal) assignments, applied in order
        assignments: Vec<(String, Content)>,
        /// Which documents to update
        predicate: MetaPredicate,
    },
    /// Remove matching documents
    Delete {
        /// Dotted collection reference
        collection: String,
        /// Which documents to remove
        predicate: MetaPredicate,
    },
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(serde_json::Number),
    Param(usize),
    LParen,
    RParen,
    Comma,
    Dot,
    Eq,
    Star,
}

fn parse_error(reason: impl Into<String>) -> StoreError {
    StoreError::ParsingFailure {
        reason: reason.into(),
    }
}

fn exec_error(reason: impl Into<String>) -> StoreError {
    StoreError::ExecutionFailure {
        reason: reason.into(),
    }
}

fn tokenize(input: &str) -> StoreResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Eq);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some(ch) if ch == quote => break,
                        Some(ch) => s.push(ch),
                        None => return Err(parse_error("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '$' => {
                chars.next();
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n: usize = digits
                    .parse()
                    .map_err(|_| parse_error("malformed parameter reference"))?;
                if n == 0 {
                    return Err(parse_error("parameters are numbered from $1"));
                }
                tokens.push(Token::Param(n - 1));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut lit = String::new();
                lit.push(c);
                chars.next();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || d == '+' || d == '-'
                    {
                        lit.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let num: serde_json::Number = lit
                    .parse::<serde_json::Number>()
                    .map_err(|_| parse_error(format!("malformed number literal: {lit}")))?;
                tokens.push(Token::Num(num));
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '`' => {
                // Backtick-quoted and bare identifiers
                let quoted = c == '`';
                if quoted {
                    chars.next();
                }
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if quoted && ch == '`' {
                        chars.next();
                        break;
                    }
                    if !quoted && !(ch.is_ascii_alphanumeric() || ch == '_') {
                        break;
                    }
                    ident.push(ch);
                    chars.next();
                }
                if ident.is_empty() {
                    return Err(parse_error("empty identifier"));
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(parse_error(format!("unexpected character {other:?}"))),
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> StoreResult<()> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(parse_error(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    /// Consume a keyword, matched case-insensitively
    fn keyword(&mut self, word: &str) -> StoreResult<()> {
        match self.next() {
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(word) => Ok(()),
            other => Err(parse_error(format!("expected {word}, found {other:?}"))),
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(word))
    }

    fn ident(&mut self) -> StoreResult<String> {
        match self.next() {
            Some(Token::Ident(ident)) => Ok(ident),
            other => Err(parse_error(format!("expected identifier, found {other:?}"))),
        }
    }

    fn param(&mut self) -> StoreResult<usize> {
        match self.next() {
            Some(Token::Param(n)) => Ok(n),
            other => Err(parse_error(format!("expected parameter, found {other:?}"))),
        }
    }

    /// Dotted collection reference: one or three identifier segments
    fn collection_ref(&mut self) -> StoreResult<String> {
        let mut parts = vec![self.ident()?];
        while matches!(self.peek(), Some(Token::Dot)) {
            self.next();
            parts.push(self.ident()?);
        }
        Ok(parts.join("."))
    }

    /// `META().id`
    fn meta_id(&mut self) -> StoreResult<()> {
        match self.next() {
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("meta") => {}
            other => return Err(parse_error(format!("expected META(), found {other:?}"))),
        }
        self.expect(&Token::LParen)?;
        self.expect(&Token::RParen)?;
        self.expect(&Token::Dot)?;
        let field = self.ident()?;
        if !field.eq_ignore_ascii_case("id") {
            return Err(parse_error(format!("unsupported META() field: {field}")));
        }
        Ok(())
    }

    /// `META().id` followed by `= $n` or `IN $n`
    fn meta_predicate(&mut self) -> StoreResult<MetaPredicate> {
        self.meta_id()?;
        match self.next() {
            Some(Token::Eq) => Ok(MetaPredicate::IdEq(self.param()?)),
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("in") => {
                Ok(MetaPredicate::IdIn(self.param()?))
            }
            other => Err(parse_error(format!("expected = or IN, found {other:?}"))),
        }
    }

    fn literal(&mut self) -> StoreResult<Content> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Content::String(s)),
            Some(Token::Num(n)) => Ok(Content::Number(n)),
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("true") => {
                Ok(Content::Bool(true))
            }
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("false") => {
                Ok(Content::Bool(false))
            }
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case("null") => Ok(Content::Null),
            other => Err(parse_error(format!("expected literal, found {other:?}"))),
        }
    }

    fn end(&mut self) -> StoreResult<()> {
        match self.peek() {
            None => Ok(()),
            Some(token) => Err(parse_error(format!("trailing input at {token:?}"))),
        }
    }

    fn select(&mut self) -> StoreResult<Statement> {
        let projection = match self.next() {
            Some(Token::Star) => Projection::All,
            Some(Token::Ident(field)) => Projection::Field(field),
            other => return Err(parse_error(format!("expected projection, found {other:?}"))),
        };
        self.keyword("from")?;
        let collection = self.collection_ref()?;
        let predicate = if self.at_keyword("where") {
            self.next();
            Some(self.meta_predicate()?)
        } else {
            None
        };
        let order = if self.at_keyword("order") {
            self.next();
            self.keyword("by")?;
            // Only META().id ordering is meaningful for this language
            self.meta_id()?;
            if self.at_keyword("desc") {
                self.next();
                Some(Order::Desc)
            } else {
                if self.at_keyword("asc") {
                    self.next();
                }
                Some(Order::Asc)
            }
        } else {
            None
        };
        self.end()?;
        Ok(Statement::Select {
            projection,
            collection,
            predicate,
            order,
        })
    }

    fn insert(&mut self) -> StoreResult<Statement> {
        self.keyword("into")?;
        let collection = self.collection_ref()?;
        self.keyword("values")?;
        self.expect(&Token::LParen)?;
        let key_param = self.param()?;
        self.expect(&Token::Comma)?;
        let value_param = self.param()?;
        self.expect(&Token::RParen)?;
        self.end()?;
        Ok(Statement::Insert {
            collection,
            key_param,
            value_param,
        })
    }

    fn update(&mut self) -> StoreResult<Statement> {
        let collection = self.collection_ref()?;
        self.keyword("set")?;
        let mut assignments = Vec::new();
        loop {
            let field = self.ident()?;
            self.expect(&Token::Eq)?;
            let value = self.literal()?;
            assignments.push((field, value));
            if matches!(self.peek(), Some(Token::Comma)) {
                self.next();
            } else {
                break;
            }
        }
        self.keyword("where")?;
        let predicate = self.meta_predicate()?;
        self.end()?;
        Ok(Statement::Update {
            collection,
            assignments,
            predicate,
        })
    }

    fn delete(&mut self) -> StoreResult<Statement> {
        self.keyword("from")?;
        let collection = self.collection_ref()?;
        self.keyword("where")?;
        let predicate = self.meta_predicate()?;
        self.end()?;
        Ok(Statement::Delete {
            collection,
            predicate,
        })
    }
}

/// Parse a statement
///
/// # Errors
/// `ParsingFailure` with the parser's complaint; the statement text itself
/// is attached by callers that have query error contexts.
pub fn parse(statement: &str) -> StoreResult<Statement> {
    let tokens = tokenize(statement)?;
    let mut parser = Parser { tokens, pos: 0 };
    match parser.next() {
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("select") => parser.select(),
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("insert") => parser.insert(),
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("update") => parser.update(),
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("delete") => parser.delete(),
        _ => Err(parse_error("expected SELECT, INSERT, UPDATE or DELETE")),
    }
}

// ---------------------------------------------------------------------------
// Execution helpers (shared with the transactional query path)
// ---------------------------------------------------------------------------

/// Fetch a positional parameter
pub fn param<'a>(params: &'a [Content], index: usize) -> StoreResult<&'a Content> {
    params
        .get(index)
        .ok_or_else(|| exec_error(format!("missing parameter ${}", index + 1)))
}

/// Resolve a predicate's parameter into the set of document keys it names
pub fn predicate_keys(predicate: &MetaPredicate, params: &[Content]) -> StoreResult<Vec<String>> {
    match predicate {
        MetaPredicate::IdEq(index) => match param(params, *index)? {
            Content::String(key) => Ok(vec![key.clone()]),
            other => Err(exec_error(format!(
                "META().id = expects a string parameter, got {other}"
            ))),
        },
        MetaPredicate::IdIn(index) => match param(params, *index)? {
            Content::Array(keys) => keys
                .iter()
                .map(|k| match k {
                    Content::String(key) => Ok(key.clone()),
                    other => Err(exec_error(format!(
                        "META().id IN expects string keys, got {other}"
                    ))),
                })
                .collect(),
            other => Err(exec_error(format!(
                "META().id IN expects an array parameter, got {other}"
            ))),
        },
    }
}

/// Apply a projection to one document
pub fn project(projection: &Projection, content: &Content) -> Content {
    match projection {
        Projection::All => content.clone(),
        Projection::Field(field) => match content.get(field) {
            Some(value) => serde_json::json!({ field.as_str(): value }),
            None => serde_json::json!({}),
        },
    }
}

/// Apply UPDATE assignments to a document body
///
/// # Errors
/// `ExecutionFailure` if the body is not an object.
pub fn apply_assignments(body: &mut Content, assignments: &[(String, Content)]) -> StoreResult<()> {
    let object = body
        .as_object_mut()
        .ok_or_else(|| exec_error("UPDATE target is not an object"))?;
    for (field, value) in assignments {
        object.insert(field.clone(), value.clone());
    }
    Ok(())
}

/// Resolve a statement's collection reference
pub fn resolve_collection(reference: &str) -> StoreResult<Collection> {
    Collection::from_path(reference)
        .ok_or_else(|| exec_error(format!("unknown collection reference: {reference}")))
}

/// Execute a parsed statement against the committed view of a store
///
/// This is the non-transactional query path. The transaction engine uses the
/// same [`Statement`] but routes mutations through its staging rules.
pub fn execute<S: DocumentStore + ?Sized>(
    store: &S,
    statement: &Statement,
    params: &[Content],
) -> StoreResult<Vec<Content>> {
    match statement {
        Statement::Select {
            projection,
            collection,
            predicate,
            order,
        } => {
            let coll = resolve_collection(collection)?;
            let mut rows: Vec<(String, Content)> = match predicate {
                Some(predicate) => {
                    let mut rows = Vec::new();
                    for key in predicate_keys(predicate, params)? {
                        match store.get(&coll, &key) {
                            Ok((content, _)) => rows.push((key, content)),
                            Err(StoreError::DocumentNotFound) => {}
                            Err(err) => return Err(err),
                        }
                    }
                    rows
                }
                None => store
                    .scan(&coll)?
                    .into_iter()
                    .map(|(key, content, _)| (key, content))
                    .collect(),
            };
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            if matches!(order, Some(Order::Desc)) {
                rows.reverse();
            }
            Ok(rows
                .iter()
                .map(|(_, content)| project(projection, content))
                .collect())
        }
        Statement::Insert {
            collection,
            key_param,
            value_param,
        } => {
            let coll = resolve_collection(collection)?;
            let key = match param(params, *key_param)? {
                Content::String(key) => key.clone(),
                other => {
                    return Err(exec_error(format!(
                        "INSERT key must be a string parameter, got {other}"
                    )))
                }
            };
            let value = param(params, *value_param)?.clone();
            store.insert(&coll, &key, value)?;
            Ok(Vec::new())
        }
        Statement::Update {
            collection,
            assignments,
            predicate,
        } => {
            let coll = resolve_collection(collection)?;
            for key in predicate_keys(predicate, params)? {
                match store.get(&coll, &key) {
                    Ok((mut content, cas)) => {
                        apply_assignments(&mut content, assignments)?;
                        store.replace(&coll, &key, content, cas)?;
                    }
                    Err(StoreError::DocumentNotFound) => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(Vec::new())
        }
        Statement::Delete {
            collection,
            predicate,
        } => {
            let coll = resolve_collection(collection)?;
            for key in predicate_keys(predicate, params)? {
                match store.get(&coll, &key) {
                    Ok((_, cas)) => store.remove(&coll, &key, cas)?,
                    Err(StoreError::DocumentNotFound) => {}
                    Err(err) => return Err(err),
                }
            }
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_parse_select_with_in_and_order() {
        let stmt = parse(
            "SELECT foo FROM default._default.test WHERE META().id IN $1 ORDER BY META().id ASC",
        )
        .unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                projection: Projection::Field("foo".into()),
                collection: "default._default.test".into(),
                predicate: Some(MetaPredicate::IdIn(0)),
                order: Some(Order::Asc),
            }
        );
    }

    #[test]
    fn test_parse_select_star_unfiltered() {
        let stmt = parse("SELECT * FROM things").unwrap();
        assert_eq!(
            stmt,
            Statement::Select {
                projection: Projection::All,
                collection: "things".into(),
                predicate: None,
                order: None,
            }
        );
    }

    #[test]
    fn test_parse_insert() {
        let stmt = parse("INSERT INTO b.s.c VALUES ($1, $2)").unwrap();
        assert_eq!(
            stmt,
            Statement::Insert {
                collection: "b.s.c".into(),
                key_param: 0,
                value_param: 1,
            }
        );
    }

    #[test]
    fn test_parse_update_with_string_literal() {
        let stmt = parse("UPDATE b.s.c SET foo=\"baz\" WHERE META().id = $1").unwrap();
        assert_eq!(
            stmt,
            Statement::Update {
                collection: "b.s.c".into(),
                assignments: vec![("foo".into(), json!("baz"))],
                predicate: MetaPredicate::IdEq(0),
            }
        );
    }

    #[test]
    fn test_parse_delete() {
        let stmt = parse("DELETE FROM b.s.c WHERE META().id = $1").unwrap();
        assert_eq!(
            stmt,
            Statement::Delete {
                collection: "b.s.c".into(),
                predicate: MetaPredicate::IdEq(0),
            }
        );
    }

    #[test]
    fn test_parse_rejects_non_statements() {
        assert!(matches!(
            parse("this is not a statement"),
            Err(StoreError::ParsingFailure { .. })
        ));
        assert!(matches!(
            parse("SELECT foo FROM"),
            Err(StoreError::ParsingFailure { .. })
        ));
        assert!(matches!(
            parse(""),
            Err(StoreError::ParsingFailure { .. })
        ));
    }

    #[test]
    fn test_parameters_are_one_based() {
        assert!(matches!(
            parse("DELETE FROM c WHERE META().id = $0"),
            Err(StoreError::ParsingFailure { .. })
        ));
    }

    #[test]
    fn test_predicate_keys_type_checked() {
        let keys = predicate_keys(&MetaPredicate::IdIn(0), &[json!(["a", "b"])]).unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert!(matches!(
            predicate_keys(&MetaPredicate::IdEq(0), &[json!(42)]),
            Err(StoreError::ExecutionFailure { .. })
        ));
        assert!(matches!(
            predicate_keys(&MetaPredicate::IdEq(5), &[]),
            Err(StoreError::ExecutionFailure { .. })
        ));
    }

    #[test]
    fn test_execute_select_projects_and_orders() {
        let store = MemoryStore::new();
        let coll = Collection::new("default", "_default", "test");
        store.insert(&coll, "k1", json!({"foo": "bar"})).unwrap();
        store.insert(&coll, "k2", json!({"foo": "baz"})).unwrap();

        let stmt = parse(
            "SELECT foo FROM default._default.test WHERE META().id IN $1 ORDER BY META().id ASC",
        )
        .unwrap();
        let rows = execute(&store, &stmt, &[json!(["k1", "k2", "missing"])]).unwrap();
        assert_eq!(rows, vec![json!({"foo": "bar"}), json!({"foo": "baz"})]);

        let stmt = parse(
            "SELECT foo FROM default._default.test WHERE META().id IN $1 ORDER BY META().id DESC",
        )
        .unwrap();
        let rows = execute(&store, &stmt, &[json!(["k1", "k2"])]).unwrap();
        assert_eq!(rows, vec![json!({"foo": "baz"}), json!({"foo": "bar"})]);
    }

    #[test]
    fn test_execute_mutations_round_trip() {
        let store = MemoryStore::new();
        let coll = Collection::new("default", "_default", "test");
        store.insert(&coll, "rep", json!({"foo": "bar"})).unwrap();
        store.insert(&coll, "rem", json!({"foo": "bar"})).unwrap();

        let stmt = parse("INSERT INTO default._default.test VALUES ($1, $2)").unwrap();
        execute(&store, &stmt, &[json!("ins"), json!({"foo": "baz"})]).unwrap();

        let stmt =
            parse("UPDATE default._default.test SET foo=\"baz\" WHERE META().id = $1").unwrap();
        execute(&store, &stmt, &[json!("rep")]).unwrap();

        let stmt = parse("DELETE FROM default._default.test WHERE META().id = $1").unwrap();
        execute(&store, &stmt, &[json!("rem")]).unwrap();

        assert_eq!(store.get(&coll, "ins").unwrap().0, json!({"foo": "baz"}));
        assert_eq!(store.get(&coll, "rep").unwrap().0, json!({"foo": "baz"}));
        assert!(store.get(&coll, "rem").is_err());
    }

    #[test]
    fn test_execute_insert_collision_surfaces_exists() {
        let store = MemoryStore::new();
        let coll = Collection::new("default", "_default", "test");
        store.insert(&coll, "k", json!(1)).unwrap();
        let stmt = parse("INSERT INTO default._default.test VALUES ($1, $2)").unwrap();
        assert_eq!(
            execute(&store, &stmt, &[json!("k"), json!(2)]),
            Err(StoreError::DocumentExists)
        );
    }

    #[test]
    fn test_execute_bad_collection_reference() {
        let store = MemoryStore::new();
        let stmt = parse("SELECT * FROM a.b").unwrap();
        assert!(matches!(
            execute(&store, &stmt, &[]),
            Err(StoreError::ExecutionFailure { .. })
        ));
    }

    proptest! {
        #[test]
        fn test_parse_never_panics(input in ".{0,120}") {
            // Arbitrary input either parses or reports ParsingFailure
            match parse(&input) {
                Ok(_) => {}
                Err(StoreError::ParsingFailure { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
            }
        }
    }
}
