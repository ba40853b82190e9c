use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{FILTER_VALUE_PREVIEW_LEN, MAX_FILTER_DEPTH, REGEX_SIZE_LIMIT};
use crate::types::{Article, ValidationIssue};
use crate::utils::truncate;

/// Boolean expression tree evaluated against an article's flattened fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterExpression {
    Logical(LogicalExpression),
    Relational(RelationalExpression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalExpression {
    pub op: LogicalOperator,
    #[serde(default)]
    pub children: Vec<FilterExpression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationalOperator {
    Eq,
    Contains,
    Matches,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalExpression {
    pub op: RelationalOperator,
    #[serde(default)]
    pub not: bool,
    pub left: FieldOperand,
    pub right: LiteralOperand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldOperandKind {
    Article,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOperand {
    #[serde(rename = "type")]
    pub kind: FieldOperandKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiteralOperandKind {
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralOperand {
    #[serde(rename = "type")]
    pub kind: LiteralOperandKind,
    pub value: String,
}

impl FilterExpression {
    pub fn and(children: Vec<FilterExpression>) -> Self {
        FilterExpression::Logical(LogicalExpression { op: LogicalOperator::And, children })
    }

    pub fn or(children: Vec<FilterExpression>) -> Self {
        FilterExpression::Logical(LogicalExpression { op: LogicalOperator::Or, children })
    }

    pub fn equals(field: &str, literal: &str) -> Self {
        Self::relational(RelationalOperator::Eq, field, literal)
    }

    pub fn contains(field: &str, literal: &str) -> Self {
        Self::relational(RelationalOperator::Contains, field, literal)
    }

    pub fn matches(field: &str, pattern: &str) -> Self {
        Self::relational(RelationalOperator::Matches, field, pattern)
    }

    /// Flips the negation flag of a relational leaf. Logical nodes are returned unchanged.
    pub fn negate(self) -> Self {
        match self {
            FilterExpression::Relational(mut leaf) => {
                leaf.not = !leaf.not;
                FilterExpression::Relational(leaf)
            }
            other => other,
        }
    }

    fn relational(op: RelationalOperator, field: &str, literal: &str) -> Self {
        FilterExpression::Relational(RelationalExpression {
            op,
            not: false,
            left: FieldOperand { kind: FieldOperandKind::Article, value: field.to_string() },
            right: LiteralOperand { kind: LiteralOperandKind::String, value: literal.to_string() },
        })
    }
}

/// Why a single relational leaf passed or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterExplanation {
    pub field: String,
    pub operator: RelationalOperator,
    /// The article's value, truncated. `None` when the article has no such field.
    pub reference_value: Option<String>,
    pub filter_input: String,
    pub negated: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResult {
    pub passed: bool,
    pub explain_blocked: Vec<FilterExplanation>,
    pub explain_matched: Vec<FilterExplanation>,
}

impl FilterResult {
    fn pass(explain_matched: Vec<FilterExplanation>) -> Self {
        Self { passed: true, explain_blocked: Vec::new(), explain_matched }
    }

    fn fail(explain_blocked: Vec<FilterExplanation>, explain_matched: Vec<FilterExplanation>) -> Self {
        Self { passed: false, explain_blocked, explain_matched }
    }
}

type Patterns<'a> = HashMap<&'a str, std::result::Result<Regex, regex::Error>>;

/// An expression with every `MATCHES` pattern compiled up front, reusable across articles.
pub struct CompiledFilter<'a> {
    expression: &'a FilterExpression,
    patterns: Patterns<'a>,
}

impl<'a> CompiledFilter<'a> {
    pub fn new(expression: &'a FilterExpression) -> Self {
        let mut patterns = HashMap::new();
        collect_patterns(expression, &mut patterns);
        Self { expression, patterns }
    }

    pub fn evaluate(&self, article: &Article) -> FilterResult {
        evaluate_node(self.expression, &self.patterns, article)
    }
}

fn collect_patterns<'a>(expression: &'a FilterExpression, patterns: &mut Patterns<'a>) {
    match expression {
        FilterExpression::Logical(node) => {
            for child in &node.children {
                collect_patterns(child, patterns);
            }
        }
        FilterExpression::Relational(leaf) if leaf.op == RelationalOperator::Matches => {
            let pattern = leaf.right.value.as_str();
            patterns.entry(pattern).or_insert_with(|| compile_pattern(pattern));
        }
        FilterExpression::Relational(_) => {}
    }
}

/// One-off evaluation. Prefer [`CompiledFilter`] when the same expression runs over many articles.
pub fn evaluate(expression: &FilterExpression, article: &Article) -> FilterResult {
    CompiledFilter::new(expression).evaluate(article)
}

fn evaluate_node(expression: &FilterExpression, patterns: &Patterns<'_>, article: &Article) -> FilterResult {
    match expression {
        FilterExpression::Logical(node) => evaluate_logical(node, patterns, article),
        FilterExpression::Relational(leaf) => {
            let (passed, explanation) = evaluate_relational(leaf, patterns, article);
            if passed {
                FilterResult::pass(vec![explanation])
            } else {
                FilterResult::fail(vec![explanation], Vec::new())
            }
        }
    }
}

fn evaluate_logical(node: &LogicalExpression, patterns: &Patterns<'_>, article: &Article) -> FilterResult {
    match node.op {
        LogicalOperator::And => {
            let mut matched = Vec::new();
            for child in &node.children {
                let result = evaluate_node(child, patterns, article);
                if !result.passed {
                    return FilterResult::fail(result.explain_blocked, matched);
                }
                matched.extend(result.explain_matched);
            }
            FilterResult::pass(matched)
        }
        LogicalOperator::Or => {
            if node.children.is_empty() {
                return FilterResult::pass(Vec::new());
            }
            let mut blocked = Vec::new();
            for child in &node.children {
                let result = evaluate_node(child, patterns, article);
                if result.passed {
                    return FilterResult::pass(result.explain_matched);
                }
                blocked.extend(result.explain_blocked);
            }
            FilterResult::fail(blocked, Vec::new())
        }
    }
}

fn evaluate_relational(
    leaf: &RelationalExpression,
    patterns: &Patterns<'_>,
    article: &Article,
) -> (bool, FilterExplanation) {
    let field = leaf.left.value.as_str();
    let input = leaf.right.value.as_str();
    let reference = article.field(field);

    let (matched, mut message) = match reference {
        None => (false, "Article does not have this field".to_string()),
        Some(value) => match leaf.op {
            RelationalOperator::Eq => {
                let matched = value == input;
                (matched, describe(matched, "matches filter input", "does not match filter input"))
            }
            RelationalOperator::Contains => {
                let matched = value.to_lowercase().contains(&input.to_lowercase());
                (matched, describe(matched, "contains filter input", "does not contain filter input"))
            }
            RelationalOperator::Matches => match patterns.get(input) {
                Some(Ok(pattern)) => {
                    let matched = pattern.is_match(value);
                    (matched, describe(matched, "matches regex", "does not match regex"))
                }
                Some(Err(err)) => (false, format!("Invalid regular expression: {}", err)),
                None => (false, "Regular expression was not compiled".to_string()),
            },
        },
    };

    let passed = matched != leaf.not;
    if leaf.not {
        message = format!("Negated: {}", message);
    }

    let explanation = FilterExplanation {
        field: field.to_string(),
        operator: leaf.op,
        reference_value: reference.map(|value| truncate(value, FILTER_VALUE_PREVIEW_LEN)),
        filter_input: input.to_string(),
        negated: leaf.not,
        message,
    };
    (passed, explanation)
}

fn describe(matched: bool, when_matched: &str, when_not: &str) -> String {
    format!("Reference value {}", if matched { when_matched } else { when_not })
}

fn compile_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
}

/// Structural checks beyond what deserialization enforces.
pub fn validate(expression: &FilterExpression, path: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    validate_node(expression, path, 1, &mut issues);
    issues
}

fn validate_node(expression: &FilterExpression, path: &str, depth: usize, issues: &mut Vec<ValidationIssue>) {
    match expression {
        FilterExpression::Logical(node) => {
            if depth > MAX_FILTER_DEPTH {
                issues.push(ValidationIssue::new(path, "Depth of logical expression is too deep."));
                return;
            }
            for (index, child) in node.children.iter().enumerate() {
                validate_node(child, &format!("{}.children[{}]", path, index), depth + 1, issues);
            }
        }
        FilterExpression::Relational(leaf) => {
            if leaf.left.value.trim().is_empty() {
                issues.push(ValidationIssue::new(
                    format!("{}.left.value", path),
                    "Expected a non-empty article field name",
                ));
            }
            if leaf.op == RelationalOperator::Matches {
                if let Err(err) = compile_pattern(&leaf.right.value) {
                    issues.push(ValidationIssue::new(
                        format!("{}.right.value", path),
                        format!("Invalid regular expression: {}", err),
                    ));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article() -> Article {
        Article::new("a-1")
            .with_field("title", "Rust 2.0 Released")
            .with_field("author", "Ferris")
    }

    #[test]
    fn contains_is_case_insensitive() {
        let result = evaluate(&FilterExpression::contains("title", "rust"), &article());
        assert!(result.passed);
        assert_eq!(result.explain_matched.len(), 1);
    }

    #[test]
    fn equals_is_exact() {
        let result = evaluate(&FilterExpression::equals("author", "ferris"), &article());
        assert!(!result.passed);
        assert_eq!(result.explain_blocked[0].message, "Reference value does not match filter input");
        assert_eq!(result.explain_blocked[0].reference_value.as_deref(), Some("Ferris"));
    }

    #[test]
    fn matches_uses_case_insensitive_regex() {
        let result = evaluate(&FilterExpression::matches("title", r"^rust \d"), &article());
        assert!(result.passed);
    }

    #[test]
    fn missing_field_does_not_match() {
        let result = evaluate(&FilterExpression::equals("summary", ""), &article());
        assert!(!result.passed);
        assert_eq!(result.explain_blocked[0].reference_value, None);

        let negated = evaluate(&FilterExpression::equals("summary", "").negate(), &article());
        assert!(negated.passed);
    }

    #[test]
    fn negation_inverts_leaf() {
        let result = evaluate(&FilterExpression::contains("title", "rust").negate(), &article());
        assert!(!result.passed);
        let explanation = &result.explain_blocked[0];
        assert!(explanation.negated);
        assert_eq!(explanation.message, "Negated: Reference value contains filter input");
    }

    #[test]
    fn and_reports_first_failing_child() {
        let expression = FilterExpression::and(vec![
            FilterExpression::contains("title", "rust"),
            FilterExpression::equals("author", "Nobody"),
            FilterExpression::equals("author", "Someone"),
        ]);
        let result = evaluate(&expression, &article());
        assert!(!result.passed);
        assert_eq!(result.explain_blocked.len(), 1);
        assert_eq!(result.explain_blocked[0].filter_input, "Nobody");
    }

    #[test]
    fn or_accumulates_failures() {
        let expression = FilterExpression::or(vec![
            FilterExpression::equals("author", "Nobody"),
            FilterExpression::contains("title", "python"),
        ]);
        let result = evaluate(&expression, &article());
        assert!(!result.passed);
        assert_eq!(result.explain_blocked.len(), 2);
    }

    #[test]
    fn empty_logical_nodes_pass() {
        assert!(evaluate(&FilterExpression::and(vec![]), &article()).passed);
        assert!(evaluate(&FilterExpression::or(vec![]), &article()).passed);
    }

    #[test]
    fn compiled_filter_reuses_patterns_across_articles() {
        let expression = FilterExpression::or(vec![
            FilterExpression::matches("title", r"^rust \d"),
            FilterExpression::matches("author", r"^rust \d"),
            FilterExpression::matches("author", "^ferr"),
        ]);
        let filter = CompiledFilter::new(&expression);
        assert_eq!(filter.patterns.len(), 2);

        assert!(filter.evaluate(&article()).passed);
        let other = Article::new("a-3").with_field("title", "Go 1.22").with_field("author", "Gopher");
        let result = filter.evaluate(&other);
        assert!(!result.passed);
        assert_eq!(result.explain_blocked.len(), 3);
    }

    #[test]
    fn invalid_pattern_fails_leaf() {
        let expression = FilterExpression::matches("title", "(unclosed");
        let result = CompiledFilter::new(&expression).evaluate(&article());
        assert!(!result.passed);
        assert!(result.explain_blocked[0].message.starts_with("Invalid regular expression"));
    }

    #[test]
    fn reference_value_is_truncated() {
        let long = "x".repeat(500);
        let article = Article::new("a-2").with_field("title", long.as_str());
        let result = evaluate(&FilterExpression::equals("title", "y"), &article);
        let reference = result.explain_blocked[0].reference_value.clone().unwrap_or_default();
        assert_eq!(reference.chars().count(), FILTER_VALUE_PREVIEW_LEN);
        assert!(reference.ends_with("..."));
    }

    #[test]
    fn deserializes_wire_shape() {
        let json = serde_json::json!({
            "type": "LOGICAL",
            "op": "AND",
            "children": [{
                "type": "RELATIONAL",
                "op": "CONTAINS",
                "not": true,
                "left": { "type": "ARTICLE", "value": "title" },
                "right": { "type": "STRING", "value": "sponsored" }
            }]
        });
        let expression: FilterExpression = serde_json::from_value(json).expect("valid expression");
        assert_eq!(
            expression,
            FilterExpression::and(vec![FilterExpression::contains("title", "sponsored").negate()])
        );
    }

    #[test]
    fn validation_reports_paths() {
        let mut deep = FilterExpression::contains("title", "x");
        for _ in 0..MAX_FILTER_DEPTH + 1 {
            deep = FilterExpression::and(vec![deep]);
        }
        let issues = validate(&deep, "root");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].message, "Depth of logical expression is too deep.");

        let bad_regex = FilterExpression::or(vec![
            FilterExpression::contains("title", "x"),
            FilterExpression::matches("title", "(unclosed"),
        ]);
        let issues = validate(&bad_regex, "root");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "root.children[1].right.value");
    }
}
