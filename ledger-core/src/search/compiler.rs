//! Query document to SQL compiler
//!
//! Compilation runs in two passes. [`plan`] validates every key, column,
//! operator and operand of both groups and produces a typed predicate tree;
//! only then does the emitter write SQL text. Emission cannot fail, so a
//! rejected query never yields partial SQL.
//!
//! Untrusted values never reach the SQL text. Operands and JSON paths are
//! bound as positional `?` arguments, appended in the same order the
//! placeholders are written. Column names come from a fixed whitelist.
//!
//! `data` entries are addressed with SQLite's JSON1 functions:
//!
//! - terms use containment (`{"colors": ["red"]}` matches a `colors` array
//!   holding `"red"`; at the top level a scalar also matches an array holding it)
//! - numeric ranges accept JSON numbers and numeric strings (`"500"` and `500`
//!   compare equal) in both directions: a numeric-looking string operand is
//!   compared as a number against stored numbers and numeric strings, and as
//!   text against any other text; text ranges compare text values only

use super::dsl::{Clause, Comparisons, SearchQuery, Terms};
use super::Namespace;
use crate::types::{is_valid_key, Timestamp};
use crate::{Error, Result};
use serde_json::{Number, Value};

/// Positional argument bound to a `?` placeholder
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    /// TEXT
    Text(String),
    /// INTEGER
    Integer(i64),
    /// REAL
    Real(f64),
}

impl From<&Number> for SqlArg {
    fn from(number: &Number) -> Self {
        match number.as_i64() {
            Some(i) => SqlArg::Integer(i),
            None => SqlArg::Real(number.as_f64().unwrap_or(f64::NAN)),
        }
    }
}

/// SQL text plus arguments, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// Statement text
    pub sql: String,
    /// Placeholder arguments
    pub args: Vec<SqlArg>,
}

/// Validate and compile a query for `namespace`
pub fn compile(query: &SearchQuery, namespace: Namespace) -> Result<CompiledQuery> {
    let plan = plan(query, namespace)?;
    Ok(Emitter::new(namespace).emit(&plan))
}

// Planning

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    In,
    Nin,
    Is,
    IsNot,
}

impl Op {
    fn parse(raw: &str) -> Result<Self> {
        Ok(match raw {
            "eq" => Op::Eq,
            "ne" => Op::Ne,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "like" => Op::Like,
            "notlike" => Op::NotLike,
            "in" => Op::In,
            "nin" => Op::Nin,
            "is" => Op::Is,
            "isnot" => Op::IsNot,
            other => {
                return Err(Error::InvalidQuery(format!("Unknown operator {other:?}")));
            }
        })
    }

    fn sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::Is => "IS",
            Op::IsNot => "IS NOT",
            // Membership is desugared before emission
            Op::In | Op::Nin => "=",
        }
    }

    fn is_ordering(self) -> bool {
        matches!(self, Op::Eq | Op::Ne | Op::Gt | Op::Gte | Op::Lt | Op::Lte)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Id,
    Balance,
    Timestamp,
}

impl Column {
    fn resolve(namespace: Namespace, name: &str) -> Result<Self> {
        match (namespace, name) {
            (_, "id") => Ok(Column::Id),
            (Namespace::Accounts, "balance") => Ok(Column::Balance),
            (Namespace::Transactions, "timestamp") => Ok(Column::Timestamp),
            _ => Err(Error::InvalidQuery(format!(
                "Unknown field {name:?} for {}",
                namespace.as_str()
            ))),
        }
    }

    fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Balance => "balance",
            Column::Timestamp => "timestamp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    /// `table.column op ?`
    Column { column: Column, op: Op, value: SqlArg },
    /// JSON containment under a top-level `data` key
    Contains { key: String, value: Value },
    /// Numeric comparison, numeric strings included
    Numeric { key: String, op: Op, value: SqlArg },
    /// Numeric-looking string operand: numeric against numbers and numeric
    /// strings, text against other text
    NumericOrText {
        key: String,
        op: Op,
        number: SqlArg,
        text: String,
    },
    /// Comparison or pattern match against a text value
    Text { key: String, op: Op, value: String },
    /// Boolean value check
    Bool { key: String, expected: bool },
    /// Absent or null (`is`), present and non-null (`isnot`)
    Null { key: String, negated: bool },
    /// Disjunction; empty never matches
    AnyOf(Vec<Predicate>),
    /// Conjunction; empty always matches
    AllOf(Vec<Predicate>),
}

type Item = Vec<Predicate>;

#[derive(Debug, Clone, PartialEq)]
struct Plan {
    must: Vec<Item>,
    should: Vec<Item>,
    limit: Option<i64>,
    offset: Option<i64>,
}

fn check_key(key: &str) -> Result<()> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(Error::InvalidQuery(format!("Invalid key in search query: {key:?}")))
    }
}

/// Nested object keys become JSON path segments
fn check_nested_keys(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => map.iter().try_for_each(|(key, child)| {
            check_key(key)?;
            check_nested_keys(child)
        }),
        Value::Array(items) => items.iter().try_for_each(check_nested_keys),
        _ => Ok(()),
    }
}

fn invalid_operand(key: &str, op: &str, expected: &str) -> Error {
    Error::InvalidQuery(format!("Operator {op:?} on {key:?} expects {expected}"))
}

fn plan(query: &SearchQuery, namespace: Namespace) -> Result<Plan> {
    Ok(Plan {
        must: plan_clause(&query.must, namespace)?,
        should: plan_clause(&query.should, namespace)?,
        limit: query.size.map(|size| size.max(0)),
        offset: query.from.map(|from| from.max(0)),
    })
}

fn plan_clause(clause: &Clause, namespace: Namespace) -> Result<Vec<Item>> {
    let mut items = Vec::new();
    for field in &clause.fields {
        items.push(plan_fields(field, namespace)?);
    }
    for term in &clause.terms {
        items.push(plan_terms(term)?);
    }
    for range in &clause.ranges {
        items.push(plan_ranges(range)?);
    }
    items.retain(|item| !item.is_empty());
    Ok(items)
}

fn plan_terms(terms: &Terms) -> Result<Item> {
    terms
        .iter()
        .map(|(key, value)| {
            check_key(key)?;
            check_nested_keys(value)?;
            Ok(Predicate::Contains {
                key: key.clone(),
                value: value.clone(),
            })
        })
        .collect()
}

fn plan_fields(fields: &Comparisons, namespace: Namespace) -> Result<Item> {
    let mut item = Vec::new();
    for (name, comparisons) in fields {
        check_key(name)?;
        let column = Column::resolve(namespace, name)?;
        for (raw_op, operand) in comparisons {
            let op = Op::parse(raw_op)?;
            let predicate = match op {
                Op::In | Op::Nin => {
                    let each = if op == Op::In { Op::Eq } else { Op::Ne };
                    let values = membership_list(name, raw_op, operand)?
                        .iter()
                        .map(|value| column_predicate(column, each, raw_op, value))
                        .collect::<Result<Vec<_>>>()?;
                    if op == Op::In {
                        Predicate::AnyOf(values)
                    } else {
                        Predicate::AllOf(values)
                    }
                }
                _ => column_predicate(column, op, raw_op, operand)?,
            };
            item.push(predicate);
        }
    }
    Ok(item)
}

fn column_predicate(column: Column, op: Op, raw_op: &str, operand: &Value) -> Result<Predicate> {
    let value = match (column, op, operand) {
        (_, Op::Is | Op::IsNot, _) => {
            return Err(Error::InvalidQuery(format!(
                "Operator {raw_op:?} is not supported on field {:?}",
                column.name()
            )));
        }
        (Column::Balance, Op::Like | Op::NotLike, _) => {
            return Err(invalid_operand(column.name(), raw_op, "a text column"));
        }
        (Column::Balance, _, Value::Number(number)) => SqlArg::from(number),
        (Column::Balance, _, _) => {
            return Err(invalid_operand(column.name(), raw_op, "a number"));
        }
        (Column::Timestamp, op, Value::String(text)) if op.is_ordering() => {
            // Normalize full timestamps; keep prefixes like "2018-01-01" as-is
            match Timestamp::parse(text) {
                Ok(ts) => SqlArg::Text(ts.to_ledger_string()),
                Err(_) => SqlArg::Text(text.clone()),
            }
        }
        (_, _, Value::String(text)) => SqlArg::Text(text.clone()),
        _ => return Err(invalid_operand(column.name(), raw_op, "a string")),
    };
    Ok(Predicate::Column { column, op, value })
}

fn membership_list<'a>(key: &str, raw_op: &str, operand: &'a Value) -> Result<&'a Vec<Value>> {
    operand
        .as_array()
        .ok_or_else(|| invalid_operand(key, raw_op, "an array"))
}

fn plan_ranges(ranges: &Comparisons) -> Result<Item> {
    let mut item = Vec::new();
    for (key, comparisons) in ranges {
        check_key(key)?;
        for (raw_op, operand) in comparisons {
            let op = Op::parse(raw_op)?;
            let predicate = match op {
                Op::In | Op::Nin => {
                    let each = if op == Op::In { Op::Eq } else { Op::Ne };
                    let values = membership_list(key, raw_op, operand)?
                        .iter()
                        .map(|value| range_predicate(key, each, raw_op, value))
                        .collect::<Result<Vec<_>>>()?;
                    if op == Op::In {
                        Predicate::AnyOf(values)
                    } else {
                        Predicate::AllOf(values)
                    }
                }
                _ => range_predicate(key, op, raw_op, operand)?,
            };
            item.push(predicate);
        }
    }
    Ok(item)
}

fn range_predicate(key: &str, op: Op, raw_op: &str, operand: &Value) -> Result<Predicate> {
    let key = key.to_string();
    match (op, operand) {
        (Op::Is | Op::IsNot, Value::Null) => Ok(Predicate::Null {
            key,
            negated: op == Op::IsNot,
        }),
        (Op::Is | Op::IsNot, _) => Err(invalid_operand(&key, raw_op, "null")),
        (Op::Like | Op::NotLike, Value::String(pattern)) => Ok(Predicate::Text {
            key,
            op,
            value: pattern.clone(),
        }),
        (Op::Like | Op::NotLike, _) => Err(invalid_operand(&key, raw_op, "a string pattern")),
        (_, Value::Number(number)) => Ok(Predicate::Numeric {
            key,
            op,
            value: SqlArg::from(number),
        }),
        (_, Value::String(text)) => Ok(match numeric_operand(text) {
            Some(number) => Predicate::NumericOrText {
                key,
                op,
                number,
                text: text.clone(),
            },
            None => Predicate::Text {
                key,
                op,
                value: text.clone(),
            },
        }),
        (Op::Eq, Value::Bool(expected)) => Ok(Predicate::Bool {
            key,
            expected: *expected,
        }),
        (Op::Ne, Value::Bool(expected)) => Ok(Predicate::Bool {
            key,
            expected: !*expected,
        }),
        (_, Value::Bool(_)) => Err(invalid_operand(&key, raw_op, "a number or string")),
        _ => Err(invalid_operand(&key, raw_op, "a scalar")),
    }
}

/// String operands that compare as numbers: optional `-`, digits, at most one dot
fn numeric_operand(text: &str) -> Option<SqlArg> {
    let digits = text.strip_prefix('-').unwrap_or(text);
    let well_formed = digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if !well_formed {
        return None;
    }
    match text.parse::<i64>() {
        Ok(i) => Some(SqlArg::Integer(i)),
        Err(_) => text.parse::<f64>().ok().map(SqlArg::Real),
    }
}

// Emission

/// Location of a JSON value inside the `data` column
#[derive(Debug, Clone)]
enum JsonPath {
    /// Bound `$.a.b` path
    Bound(String),
    /// Element of an enclosing `json_each`, plus a `.a.b` suffix
    Element { alias: String, suffix: String },
}

impl JsonPath {
    fn child(&self, key: &str) -> Self {
        match self {
            JsonPath::Bound(path) => JsonPath::Bound(format!("{path}.{key}")),
            JsonPath::Element { alias, suffix } => JsonPath::Element {
                alias: alias.clone(),
                suffix: format!("{suffix}.{key}"),
            },
        }
    }
}

struct Emitter {
    namespace: Namespace,
    sql: String,
    args: Vec<SqlArg>,
    aliases: usize,
}

impl Emitter {
    fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            sql: String::new(),
            args: Vec::new(),
            aliases: 0,
        }
    }

    fn table(&self) -> &'static str {
        match self.namespace {
            Namespace::Accounts => "current_balances",
            Namespace::Transactions => "transactions",
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, arg: SqlArg) {
        self.sql.push('?');
        self.args.push(arg);
    }

    fn emit(mut self, plan: &Plan) -> CompiledQuery {
        self.push(match self.namespace {
            Namespace::Accounts => {
                "SELECT current_balances.id AS id, current_balances.balance AS balance, \
                 current_balances.data AS data FROM current_balances"
            }
            Namespace::Transactions => {
                "SELECT transactions.id AS id, transactions.timestamp AS timestamp, \
                 transactions.data AS data, \
                 (SELECT json_group_array(account_id) FROM \
                 (SELECT lines.account_id FROM lines \
                 WHERE lines.transaction_id = transactions.id ORDER BY lines.id)) AS account_array, \
                 (SELECT json_group_array(delta) FROM \
                 (SELECT lines.delta FROM lines \
                 WHERE lines.transaction_id = transactions.id ORDER BY lines.id)) AS delta_array \
                 FROM transactions"
            }
        });

        if !plan.must.is_empty() || !plan.should.is_empty() {
            self.push(" WHERE ");
            for (i, item) in plan.must.iter().enumerate() {
                if i > 0 {
                    self.push(" AND ");
                }
                self.item(item);
            }
            if !plan.should.is_empty() {
                if !plan.must.is_empty() {
                    self.push(" AND ");
                }
                self.push("(");
                for (i, item) in plan.should.iter().enumerate() {
                    if i > 0 {
                        self.push(" OR ");
                    }
                    self.item(item);
                }
                self.push(")");
            }
        }

        self.push(match self.namespace {
            Namespace::Accounts => " ORDER BY current_balances.id",
            Namespace::Transactions => " ORDER BY transactions.timestamp, transactions.id",
        });

        match (plan.limit, plan.offset) {
            (None, None) => {}
            (limit, offset) => {
                self.push(" LIMIT ");
                self.bind(SqlArg::Integer(limit.unwrap_or(-1)));
                self.push(" OFFSET ");
                self.bind(SqlArg::Integer(offset.unwrap_or(0)));
            }
        }

        CompiledQuery {
            sql: self.sql,
            args: self.args,
        }
    }

    fn item(&mut self, item: &[Predicate]) {
        self.push("(");
        for (i, predicate) in item.iter().enumerate() {
            if i > 0 {
                self.push(" AND ");
            }
            self.predicate(predicate);
        }
        self.push(")");
    }

    fn predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::Column { column, op, value } => {
                let lhs = format!("{}.{} {} ", self.table(), column.name(), op.sql());
                self.push(&lhs);
                self.bind(value.clone());
            }
            Predicate::Contains { key, value } => {
                self.contains(&JsonPath::Bound(format!("$.{key}")), value, true);
            }
            Predicate::Numeric { key, op, value } => {
                let path = JsonPath::Bound(format!("$.{key}"));
                self.push("(");
                self.numeric_guard(&path);
                self.push(" AND ");
                self.numeric_compare(&path, *op, value);
                self.push(")");
            }
            Predicate::NumericOrText {
                key,
                op,
                number,
                text,
            } => {
                let path = JsonPath::Bound(format!("$.{key}"));
                self.push("((");
                self.numeric_guard(&path);
                self.push(" AND ");
                self.numeric_compare(&path, *op, number);
                self.push(") OR (");
                self.json_type(&path);
                self.push(" = 'text' AND NOT ");
                self.numeric_text(&path);
                self.push(" AND ");
                self.json_extract(&path);
                self.push(&format!(" {} ", op.sql()));
                self.bind(SqlArg::Text(text.clone()));
                self.push("))");
            }
            Predicate::Text { key, op, value } => {
                let path = JsonPath::Bound(format!("$.{key}"));
                self.push("(");
                self.json_type(&path);
                self.push(" = 'text' AND ");
                self.json_extract(&path);
                self.push(&format!(" {} ", op.sql()));
                self.bind(SqlArg::Text(value.clone()));
                self.push(")");
            }
            Predicate::Bool { key, expected } => {
                let path = JsonPath::Bound(format!("$.{key}"));
                self.json_type(&path);
                self.push(if *expected { " = 'true'" } else { " = 'false'" });
            }
            Predicate::Null { key, negated } => {
                let path = JsonPath::Bound(format!("$.{key}"));
                self.json_extract(&path);
                self.push(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Predicate::AnyOf(predicates) => self.junction(predicates, " OR ", "(1 = 0)"),
            Predicate::AllOf(predicates) => self.junction(predicates, " AND ", "(1 = 1)"),
        }
    }

    /// JSON number, or text that reads as one
    fn numeric_guard(&mut self, path: &JsonPath) {
        self.push("(");
        self.json_type(path);
        self.push(" IN ('integer', 'real') OR (");
        self.json_type(path);
        self.push(" = 'text' AND ");
        self.numeric_text(path);
        self.push("))");
    }

    /// Unsigned decimal text only. Signed (`"-5"`) and exponent (`"1e3"`)
    /// strings stay text; stored JSON numbers of any sign are numeric.
    fn numeric_text(&mut self, path: &JsonPath) {
        self.push("(");
        self.json_extract(path);
        self.push(" GLOB '*[0-9]*' AND ");
        self.json_extract(path);
        self.push(" NOT GLOB '*[^0-9.]*' AND ");
        self.json_extract(path);
        self.push(" NOT GLOB '*.*.*')");
    }

    fn numeric_compare(&mut self, path: &JsonPath, op: Op, value: &SqlArg) {
        self.push("CAST(");
        self.json_extract(path);
        self.push(&format!(" AS REAL) {} ", op.sql()));
        self.bind(value.clone());
    }

    fn junction(&mut self, predicates: &[Predicate], joiner: &str, empty: &str) {
        if predicates.is_empty() {
            self.push(empty);
            return;
        }
        self.push("(");
        for (i, predicate) in predicates.iter().enumerate() {
            if i > 0 {
                self.push(joiner);
            }
            self.predicate(predicate);
        }
        self.push(")");
    }

    fn path(&mut self, path: &JsonPath) {
        match path {
            JsonPath::Bound(path) => self.bind(SqlArg::Text(path.clone())),
            JsonPath::Element { alias, suffix } if suffix.is_empty() => {
                self.push(&format!("{alias}.fullkey"));
            }
            JsonPath::Element { alias, suffix } => {
                self.push(&format!("({alias}.fullkey || "));
                self.bind(SqlArg::Text(suffix.clone()));
                self.push(")");
            }
        }
    }

    fn json_type(&mut self, path: &JsonPath) {
        let call = format!("json_type({}.data, ", self.table());
        self.push(&call);
        self.path(path);
        self.push(")");
    }

    fn json_extract(&mut self, path: &JsonPath) {
        let call = format!("json_extract({}.data, ", self.table());
        self.push(&call);
        self.path(path);
        self.push(")");
    }

    /// `EXISTS` over the elements of the array at `path`, one containing `needle`
    fn any_element(&mut self, path: &JsonPath, needle: &Value) {
        self.aliases += 1;
        let alias = format!("e{}", self.aliases);
        let each = format!("EXISTS (SELECT 1 FROM json_each({}.data, ", self.table());
        self.push(&each);
        self.path(path);
        self.push(&format!(") AS {alias} WHERE "));
        let element = JsonPath::Element {
            alias,
            suffix: String::new(),
        };
        self.contains(&element, needle, false);
        self.push(")");
    }

    fn contains(&mut self, path: &JsonPath, needle: &Value, top_level: bool) {
        match needle {
            Value::Object(map) => {
                self.push("(");
                self.json_type(path);
                self.push(" = 'object'");
                for (key, child) in map {
                    self.push(" AND ");
                    self.contains(&path.child(key), child, false);
                }
                self.push(")");
            }
            Value::Array(items) => {
                self.push("(");
                self.json_type(path);
                self.push(" = 'array'");
                for item in items {
                    self.push(" AND ");
                    self.any_element(path, item);
                }
                self.push(")");
            }
            scalar if top_level => {
                self.push("(");
                self.scalar_equals(path, scalar);
                self.push(" OR (");
                self.json_type(path);
                self.push(" = 'array' AND ");
                self.any_element(path, scalar);
                self.push("))");
            }
            scalar => self.scalar_equals(path, scalar),
        }
    }

    fn scalar_equals(&mut self, path: &JsonPath, scalar: &Value) {
        match scalar {
            Value::String(text) => {
                self.push("(");
                self.json_type(path);
                self.push(" = 'text' AND ");
                self.json_extract(path);
                self.push(" = ");
                self.bind(SqlArg::Text(text.clone()));
                self.push(")");
            }
            Value::Number(number) => {
                self.push("(");
                self.json_type(path);
                self.push(" IN ('integer', 'real') AND ");
                self.json_extract(path);
                self.push(" = ");
                self.bind(SqlArg::from(number));
                self.push(")");
            }
            Value::Bool(true) => {
                self.json_type(path);
                self.push(" = 'true'");
            }
            Value::Bool(false) => {
                self.json_type(path);
                self.push(" = 'false'");
            }
            Value::Null => {
                self.json_type(path);
                self.push(" = 'null'");
            }
            // Containers are handled by `contains`
            Value::Object(_) | Value::Array(_) => self.contains(path, scalar, false),
        }
    }
}
