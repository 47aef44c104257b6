//! Query string compiler
//!
//! Compiles mailbox search queries with operators like:
//! - `from:alice`, `to:bob`, `subject:meeting`, `content:budget`
//! - `from:@example.com`, `to:@example.com` - address domain
//! - `type:message`
//! - `has:attachment`, `attachment:application/pdf`, `has:url` - attachments and objects
//! - `before:2024/12/01`, `after:2024-01-01` - date filters
//! - `larger:10k`, `smaller:2mb` - size filters
//! - `item:1,2,3` - item ids
//! - `appt-start:<=1700000000000`, `appt-end:>=1700000000000` - appointment span
//!
//! Everything else is free text; a trailing `*` makes a prefix match.
//! Parentheses only group visually and are otherwise ignored.

use std::ops::Bound;

use chrono::{NaiveDate, NaiveTime};

use crate::error::{IndexError, Result};
use crate::models::{ItemId, ItemType};

use super::op::{KeywordField, NumericField, QueryOp, TextField};

const OPERATORS: [&str; 14] = [
    "from",
    "to",
    "subject",
    "content",
    "type",
    "has",
    "attachment",
    "before",
    "after",
    "larger",
    "smaller",
    "item",
    "appt-start",
    "appt-end",
];

/// Compile a query string into an operation tree
pub fn compile_query(input: &str) -> Result<QueryOp> {
    let mut ops = Vec::new();
    for token in tokenize(input) {
        ops.push(match token {
            Token::Word(word) => text_op(TextField::Any, &word),
            Token::Operator(key, value) => operator_op(&key, &value)?,
        });
    }
    Ok(QueryOp::and(ops))
}

#[derive(Debug, PartialEq)]
enum Token {
    Word(String),
    Operator(String, String),
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c == '(' || c == ')'
}

/// Split a query into words and `key:value` operators
fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if is_separator(chars[i]) {
            i += 1;
            continue;
        }

        // Quoted phrase
        if chars[i] == '"' {
            let (value, consumed) = read_value(&chars[i..]);
            if !value.trim().is_empty() {
                tokens.push(Token::Word(value));
            }
            i += consumed;
            continue;
        }

        // Operator key runs up to ':'
        let start = i;
        while i < chars.len() && !is_separator(chars[i]) && chars[i] != ':' {
            i += 1;
        }
        let key: String = chars[start..i].iter().collect::<String>().to_lowercase();

        if i < chars.len() && chars[i] == ':' && OPERATORS.contains(&key.as_str()) {
            let (value, consumed) = read_value(&chars[i + 1..]);
            i += 1 + consumed;
            if !value.is_empty() {
                tokens.push(Token::Operator(key, value));
            }
            continue;
        }

        // Plain word, possibly containing ':'
        while i < chars.len() && !is_separator(chars[i]) {
            i += 1;
        }
        tokens.push(Token::Word(chars[start..i].iter().collect()));
    }

    tokens
}

/// Read a quoted or unquoted value, returning it and the chars consumed
fn read_value(chars: &[char]) -> (String, usize) {
    if chars.first() == Some(&'"') {
        let end = chars[1..]
            .iter()
            .position(|c| *c == '"')
            .map_or(chars.len(), |p| p + 1);
        let value = chars[1..end].iter().collect();
        let consumed = if end < chars.len() { end + 1 } else { end };
        return (value, consumed);
    }

    let end = chars
        .iter()
        .position(|c| is_separator(*c))
        .unwrap_or(chars.len());
    (chars[..end].iter().collect(), end)
}

fn text_op(field: TextField, value: &str) -> QueryOp {
    match value.strip_suffix('*') {
        Some(prefix) if !prefix.is_empty() && !prefix.contains(char::is_whitespace) => {
            QueryOp::Prefix {
                field,
                prefix: prefix.to_string(),
            }
        }
        _ => QueryOp::Text {
            field,
            text: value.to_string(),
        },
    }
}

fn keyword(field: KeywordField, value: &str) -> QueryOp {
    QueryOp::Keyword {
        field,
        value: value.trim().to_lowercase(),
    }
}

fn operator_op(key: &str, value: &str) -> Result<QueryOp> {
    let op = match key {
        "from" => match value.strip_prefix('@') {
            Some(domain) => keyword(KeywordField::FromDomain, domain),
            None => text_op(TextField::From, value),
        },
        "to" => match value.strip_prefix('@') {
            Some(domain) => keyword(KeywordField::ToDomain, domain),
            None => text_op(TextField::To, value),
        },
        "subject" => text_op(TextField::Subject, value),
        "content" => text_op(TextField::Content, value),
        "type" => {
            let item_type: ItemType = value.parse()?;
            keyword(KeywordField::Type, item_type.as_str())
        }
        "has" => match value.to_lowercase().as_str() {
            "attachment" => keyword(KeywordField::Attachment, "any"),
            object => keyword(KeywordField::Object, object),
        },
        "attachment" => keyword(KeywordField::Attachment, value),
        "before" => QueryOp::Range {
            field: NumericField::Date,
            lower: Bound::Unbounded,
            upper: Bound::Excluded(parse_date_ms(value)?),
        },
        "after" => QueryOp::Range {
            field: NumericField::Date,
            lower: Bound::Included(parse_date_ms(value)?),
            upper: Bound::Unbounded,
        },
        "larger" => QueryOp::Range {
            field: NumericField::Size,
            lower: Bound::Excluded(parse_size(value)?),
            upper: Bound::Unbounded,
        },
        "smaller" => QueryOp::Range {
            field: NumericField::Size,
            lower: Bound::Unbounded,
            upper: Bound::Excluded(parse_size(value)?),
        },
        "item" => QueryOp::ItemIds(parse_item_ids(value)?),
        "appt-start" => comparison(NumericField::AppointmentStart, value)?,
        "appt-end" => comparison(NumericField::AppointmentEnd, value)?,
        _ => return Err(IndexError::InvalidRequest(format!("unknown operator: {key}"))),
    };
    Ok(op)
}

/// Parse `>=N`, `<=N`, `>N`, `<N` or `N` against a numeric field
fn comparison(field: NumericField, value: &str) -> Result<QueryOp> {
    let (lower, upper, number) = if let Some(n) = value.strip_prefix(">=") {
        (Some(true), None, n)
    } else if let Some(n) = value.strip_prefix("<=") {
        (None, Some(true), n)
    } else if let Some(n) = value.strip_prefix('>') {
        (Some(false), None, n)
    } else if let Some(n) = value.strip_prefix('<') {
        (None, Some(false), n)
    } else {
        (Some(true), Some(true), value)
    };

    let n: i64 = number
        .trim()
        .parse()
        .map_err(|_| IndexError::InvalidRequest(format!("bad number: {value}")))?;
    let bound = |inclusive: Option<bool>| match inclusive {
        Some(true) => Bound::Included(n),
        Some(false) => Bound::Excluded(n),
        None => Bound::Unbounded,
    };
    Ok(QueryOp::Range {
        field,
        lower: bound(lower),
        upper: bound(upper),
    })
}

/// Parse a date as YYYY/MM/DD, YYYY-MM-DD or milliseconds since the epoch
fn parse_date_ms(value: &str) -> Result<i64> {
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    let normalized = value.replace('/', "-");
    NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
        .map(|date| date.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
        .map_err(|_| IndexError::InvalidRequest(format!("bad date: {value}")))
}

/// Parse a size such as `500`, `10k`, `10kb`, `2m` or `2mb`
fn parse_size(value: &str) -> Result<i64> {
    let lower = value.trim().to_lowercase();
    let lower = lower.strip_suffix('b').unwrap_or(&lower);
    let (number, multiplier) = if let Some(n) = lower.strip_suffix('k') {
        (n, 1024)
    } else if let Some(n) = lower.strip_suffix('m') {
        (n, 1024 * 1024)
    } else {
        (lower, 1)
    };
    number
        .parse::<i64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .ok_or_else(|| IndexError::InvalidRequest(format!("bad size: {value}")))
}

/// Parse a comma-separated list of item ids, e.g. `"4,17,23"`
pub fn parse_item_ids(value: &str) -> Result<Vec<ItemId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .map(ItemId)
                .map_err(|_| IndexError::InvalidRequest(format!("bad item id: {s}")))
        })
        .collect()
}
