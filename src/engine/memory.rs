//! In-memory search engine
//!
//! A [`SearchEngine`] over a map of documents, intended for:
//! - **Unit and integration testing** of the retrieval and analysis pipeline
//! - **Development** with the command-line harness
//!
//! # Query syntax
//!
//! Conjunctive clauses separated by whitespace or `AND`, each optionally
//! negated with a leading `-`:
//!
//! ```text
//! *:*                      match everything
//! metric:cpu               field equals value ("quoted values" allowed)
//! host:*                   field present
//! start:[1000 TO *]        inclusive range, `*` is an open bound
//! ```
//!
//! # Failure injection
//!
//! [`InMemorySearchEngine::fail_on_search`], [`InMemorySearchEngine::fail_on_fetch`]
//! and [`InMemorySearchEngine::with_search_latency`] simulate index failures and
//! stalls. Call counters expose how many round trips a query made.

use async_trait::async_trait;
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, map, opt, value},
    multi::separated_list1,
    sequence::{delimited, separated_pair},
    IResult, Parser,
};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use super::traits::SearchEngine;
use crate::error::{ParseError, RetrievalError};
use crate::types::{DocId, Document, FieldValue, ScoredRef, SortDirection, SortSpec};

// ============================================================================
// Query matching
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Term {
    MatchAll,
    Exists(String),
    Equals(String, String),
    Range {
        field: String,
        lower: Option<String>,
        upper: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Clause {
    negated: bool,
    term: Term,
}

/// Compiled conjunctive query
#[derive(Debug, Clone)]
pub struct QueryMatcher {
    clauses: Vec<Clause>,
}

impl QueryMatcher {
    /// Compile query text
    pub fn parse(query: &str) -> Result<Self, ParseError> {
        if query.trim().is_empty() {
            return Ok(Self {
                clauses: vec![Clause {
                    negated: false,
                    term: Term::MatchAll,
                }],
            });
        }

        match all_consuming(parse_clauses).parse(query) {
            Ok((_, clauses)) => Ok(Self { clauses }),
            Err(e) => Err(ParseError::InvalidQuery {
                query: query.to_string(),
                reason: format!("{:?}", e),
            }),
        }
    }

    /// Whether every clause holds for the document
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|clause| clause.term.matches(doc) != clause.negated)
    }
}

impl Term {
    fn matches(&self, doc: &Document) -> bool {
        match self {
            Term::MatchAll => true,
            Term::Exists(field) => doc.get(field).is_some(),
            Term::Equals(field, literal) => doc
                .get(field)
                .and_then(|v| compare_to_literal(v, literal))
                .is_some_and(|o| o == Ordering::Equal),
            Term::Range {
                field,
                lower,
                upper,
            } => {
                let Some(v) = doc.get(field) else {
                    return false;
                };
                let above = match lower {
                    None => true,
                    Some(l) => compare_to_literal(v, l).is_some_and(|o| o != Ordering::Less),
                };
                let below = match upper {
                    None => true,
                    Some(u) => compare_to_literal(v, u).is_some_and(|o| o != Ordering::Greater),
                };
                above && below
            }
        }
    }
}

/// Compare a stored value against query literal text
fn compare_to_literal(value: &FieldValue, literal: &str) -> Option<Ordering> {
    match value {
        FieldValue::Int(_) | FieldValue::Float(_) => {
            let lit: f64 = literal.parse().ok()?;
            Some(value.as_f64()?.total_cmp(&lit))
        }
        FieldValue::Bool(b) => literal.parse::<bool>().ok().map(|l| b.cmp(&l)),
        FieldValue::Text(s) => Some(s.as_str().cmp(literal)),
    }
}

fn is_field_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn is_value_char(c: char) -> bool {
    !c.is_whitespace() && c != '[' && c != ']' && c != '"'
}

fn parse_clauses(input: &str) -> IResult<&str, Vec<Clause>> {
    delimited(
        multispace0,
        separated_list1(clause_separator, parse_clause),
        multispace0,
    )
    .parse(input)
}

fn clause_separator(input: &str) -> IResult<&str, ()> {
    value((), (multispace1, opt((tag("AND"), multispace1)))).parse(input)
}

fn parse_clause(input: &str) -> IResult<&str, Clause> {
    map((opt(char('-')), parse_term), |(neg, term)| Clause {
        negated: neg.is_some(),
        term,
    })
    .parse(input)
}

fn parse_term(input: &str) -> IResult<&str, Term> {
    alt((value(Term::MatchAll, tag("*:*")), parse_field_term)).parse(input)
}

fn parse_field_term(input: &str) -> IResult<&str, Term> {
    let (input, field) = take_while1(is_field_char).parse(input)?;
    let (input, _) = char(':').parse(input)?;
    let field = field.to_string();

    let result = alt((
        map(parse_range, |(lower, upper)| Term::Range {
            field: field.clone(),
            lower,
            upper,
        }),
        map(parse_quoted, |v: &str| Term::Equals(field.clone(), v.to_string())),
        map(take_while1(is_value_char), |v: &str| {
            if v == "*" {
                Term::Exists(field.clone())
            } else {
                Term::Equals(field.clone(), v.to_string())
            }
        }),
    ))
    .parse(input);
    result
}

fn parse_quoted(input: &str) -> IResult<&str, &str> {
    delimited(char('"'), take_while(|c: char| c != '"'), char('"')).parse(input)
}

fn parse_range(input: &str) -> IResult<&str, (Option<String>, Option<String>)> {
    delimited(
        (char('['), multispace0),
        separated_pair(
            parse_bound,
            (multispace1, tag("TO"), multispace1),
            parse_bound,
        ),
        (multispace0, char(']')),
    )
    .parse(input)
}

fn parse_bound(input: &str) -> IResult<&str, Option<String>> {
    map(
        take_while1(|c: char| !c.is_whitespace() && c != ']'),
        |b: &str| {
            if b == "*" {
                None
            } else {
                Some(b.to_string())
            }
        },
    )
    .parse(input)
}

// ============================================================================
// Ordering
// ============================================================================

/// Total order used for paging: sort value per direction (missing values
/// last), then document id ascending
fn compare_refs(a: &ScoredRef, b: &ScoredRef, direction: SortDirection) -> Ordering {
    let by_value = match (&a.sort_value, &b.sort_value) {
        (Some(x), Some(y)) => match direction {
            SortDirection::Asc => x.total_cmp(y),
            SortDirection::Desc => y.total_cmp(x),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_value.then(a.doc.cmp(&b.doc))
}

// ============================================================================
// Engine
// ============================================================================

/// In-memory document index
#[derive(Debug, Default)]
pub struct InMemorySearchEngine {
    documents: RwLock<BTreeMap<DocId, Document>>,

    /// Fail the n-th (1-based) search call and every later one
    fail_on_search: Option<usize>,

    /// Fail the n-th (1-based) fetch call and every later one
    fail_on_fetch: Option<usize>,

    /// Artificial delay before answering a search
    search_latency: Option<Duration>,

    searches: AtomicUsize,
    fetches: AtomicUsize,
}

impl InMemorySearchEngine {
    /// Create an empty engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine holding the given documents
    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let engine = Self::new();
        for doc in documents {
            engine.insert(doc);
        }
        engine
    }

    /// Fail the n-th search call (1-based) and all later ones
    pub fn fail_on_search(mut self, call: usize) -> Self {
        self.fail_on_search = Some(call);
        self
    }

    /// Fail the n-th fetch call (1-based) and all later ones
    pub fn fail_on_fetch(mut self, call: usize) -> Self {
        self.fail_on_fetch = Some(call);
        self
    }

    /// Delay every search by `latency`
    pub fn with_search_latency(mut self, latency: Duration) -> Self {
        self.search_latency = Some(latency);
        self
    }

    /// Insert or replace a document
    pub fn insert(&self, doc: Document) {
        self.documents.write().insert(doc.id, doc);
    }

    /// Number of stored documents
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Check if the index is empty
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Search calls made so far
    pub fn search_count(&self) -> usize {
        self.searches.load(AtomicOrdering::Relaxed)
    }

    /// Fetch calls made so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(AtomicOrdering::Relaxed)
    }
}

#[async_trait]
impl SearchEngine for InMemorySearchEngine {
    fn engine_id(&self) -> &str {
        "memory"
    }

    async fn search(
        &self,
        query: &str,
        after: Option<&ScoredRef>,
        limit: usize,
        sort: &SortSpec,
    ) -> Result<Vec<ScoredRef>, RetrievalError> {
        let call = self.searches.fetch_add(1, AtomicOrdering::Relaxed) + 1;

        if let Some(latency) = self.search_latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_on_search.is_some_and(|n| call >= n) {
            return Err(RetrievalError::Engine(format!(
                "injected failure on search #{}",
                call
            )));
        }

        let matcher =
            QueryMatcher::parse(query).map_err(|e| RetrievalError::Engine(e.to_string()))?;

        let mut hits: Vec<ScoredRef> = {
            let documents = self.documents.read();
            documents
                .values()
                .filter(|doc| matcher.matches(doc))
                .map(|doc| ScoredRef {
                    doc: doc.id,
                    sort_value: doc.get(&sort.field).cloned(),
                })
                .collect()
        };
        hits.sort_by(|a, b| compare_refs(a, b, sort.direction));

        Ok(hits
            .into_iter()
            .filter(|r| {
                after.map_or(true, |a| {
                    compare_refs(r, a, sort.direction) == Ordering::Greater
                })
            })
            .take(limit)
            .collect())
    }

    async fn fetch(&self, doc: DocId) -> Result<Document, RetrievalError> {
        let call = self.fetches.fetch_add(1, AtomicOrdering::Relaxed) + 1;
        if self.fail_on_fetch.is_some_and(|n| call >= n) {
            return Err(RetrievalError::Engine(format!(
                "injected failure on fetch #{}",
                call
            )));
        }

        self.documents
            .read()
            .get(&doc)
            .cloned()
            .ok_or(RetrievalError::DocumentNotFound(doc))
    }
}
