//! In-process numeric-value finder, the simplest of the three extractor
//! kinds (spec.md §4.2). Runs entirely inline — no subprocess, no network —
//! so `process_batch` never actually awaits anything, but still returns a
//! boxed future to satisfy the shared `Extractor` trait.

pub mod units;

use crate::registry::Extractor;
use crate::{ExtractionInput, ExtractionOutcome, ExtractorError, FieldRow};
use nlprunner_protocol::{ColumnDef, ProcessorDescriptor, SchemaType, SqlDialect, TabularSchema};
use regex::{Match, Regex};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Word fragments that tip tense detection one way or the other. A crude
/// keyword-list heuristic, in keeping with the rest of this module's
/// pattern-matching approach rather than a real tagger.
const PAST_TENSE_MARKERS: &[&str] = &["was", "were", "previously", "history of", "prior to", "had been"];
const PRESENT_TENSE_MARKERS: &[&str] = &["today", "currently", "now", "is ", "are "];

fn detect_tense(text: &str) -> (&'static str, Option<String>) {
    let lower = text.to_lowercase();
    for marker in PAST_TENSE_MARKERS {
        if lower.contains(marker) {
            return ("past", Some((*marker).to_string()));
        }
    }
    for marker in PRESENT_TENSE_MARKERS {
        if lower.contains(marker) {
            return ("present", Some((*marker).trim().to_string()));
        }
    }
    ("present", None)
}

/// Expected denominator for a fraction-style score (e.g. MMSE is "x/30").
/// A parsed value is only accepted if its denominator is one of these
/// (spec.md §8 "MMSE denominator sanity").
#[derive(Debug, Clone)]
pub struct DenominatorRule {
    pub allowed: Vec<u32>,
}

impl DenominatorRule {
    pub fn accepts(&self, denominator: u32) -> bool {
        self.allowed.contains(&denominator)
    }
}

/// One configured numeric-variable rule: how to recognize a mention of the
/// variable, parse its value, and (optionally) normalize units or validate
/// a fraction denominator.
#[derive(Debug, Clone)]
pub struct NumericRule {
    pub variable_name: String,
    pub destination_table: String,
    pub destination_column: String,
    keyword_value_re: Regex,
    fraction_re: Option<Regex>,
    pub denominator: Option<DenominatorRule>,
    pub canonical_unit: Option<&'static str>,
}

impl NumericRule {
    /// Build a rule from a keyword (matched case-insensitively) and an
    /// optional fraction denominator rule. The generated pattern captures
    /// the matched keyword and an optional unit token immediately after the
    /// number.
    pub fn new(
        variable_name: impl Into<String>,
        keyword: &str,
        destination_table: impl Into<String>,
        destination_column: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        let keyword_value_re = Regex::new(&format!(
            r"(?i)(?P<keyword>{keyword})\D{{0,6}}(?P<value>-?\d+(?:\.\d+)?)\s*(?P<unit>[a-zA-Z/%]+)?"
        ))?;
        Ok(Self {
            variable_name: variable_name.into(),
            destination_table: destination_table.into(),
            destination_column: destination_column.into(),
            keyword_value_re,
            fraction_re: None,
            denominator: None,
            canonical_unit: None,
        })
    }

    pub fn with_fraction(mut self, keyword: &str) -> Result<Self, regex::Error> {
        self.fraction_re = Some(Regex::new(&format!(
            r"(?i)(?P<keyword>{keyword})\D{{0,6}}(?P<numerator>\d+)\s*/\s*(?P<denominator>\d+)"
        ))?);
        Ok(self)
    }

    pub fn with_denominator_rule(mut self, allowed: Vec<u32>) -> Self {
        self.denominator = Some(DenominatorRule { allowed });
        self
    }

    pub fn with_canonical_unit(mut self, unit: &'static str) -> Self {
        self.canonical_unit = Some(unit);
        self
    }

    fn apply(&self, text: &str) -> Vec<FieldRow> {
        let mut rows = Vec::new();

        if let Some(fraction_re) = &self.fraction_re {
            if let Some(captures) = fraction_re.captures(text) {
                let whole = captures.get(0).unwrap();
                let keyword = captures.name("keyword");
                let numerator: f64 = captures["numerator"].parse().unwrap_or(f64::NAN);
                let denominator: u32 = captures["denominator"].parse().unwrap_or(0);

                let denominator_ok = self
                    .denominator
                    .as_ref()
                    .map(|rule| rule.accepts(denominator))
                    .unwrap_or(true);

                if denominator_ok && numerator.is_finite() {
                    rows.push(self.row(
                        text,
                        whole,
                        keyword,
                        captures["numerator"].to_string(),
                        None,
                        numerator,
                        Some(denominator),
                    ));
                }
                return rows;
            }
        }

        if let Some(captures) = self.keyword_value_re.captures(text) {
            let whole = captures.get(0).unwrap();
            let keyword = captures.name("keyword");

            let raw_value: f64 = match captures["value"].parse() {
                Ok(v) => v,
                Err(_) => return rows,
            };
            let unit_match = captures.name("unit");

            let canonical_value = match (self.canonical_unit, unit_match) {
                (Some(_canonical), Some(unit_match)) => match units::table_for(&self.variable_name) {
                    Some(table) if !table.is_canonical(unit_match.as_str()) => {
                        table.convert(raw_value, unit_match.as_str()).unwrap_or(raw_value)
                    }
                    _ => raw_value,
                },
                _ => raw_value,
            };

            rows.push(self.row(
                text,
                whole,
                keyword,
                captures["value"].to_string(),
                unit_match.map(|m| m.as_str().to_string()),
                canonical_value,
                None,
            ));
        }

        rows
    }

    /// Build the documented output row (spec.md §4.2): span/identity
    /// columns, the raw value/unit as written, the normalized value under
    /// this rule's own canonical column name, and a best-effort tense call.
    #[allow(clippy::too_many_arguments)]
    fn row(
        &self,
        text: &str,
        whole: Match<'_>,
        keyword: Option<Match<'_>>,
        value_text: String,
        units: Option<String>,
        canonical_value: f64,
        denominator: Option<u32>,
    ) -> FieldRow {
        let (tense, tense_text) = detect_tense(text);

        let mut fields = HashMap::new();
        fields.insert("variable_name".to_string(), serde_json::json!(self.variable_name));
        fields.insert("_content".to_string(), serde_json::json!(whole.as_str()));
        fields.insert("_start".to_string(), serde_json::json!(whole.start()));
        fields.insert("_end".to_string(), serde_json::json!(whole.end()));
        fields.insert(
            "variable_text".to_string(),
            serde_json::json!(keyword.map(|m| m.as_str().to_string()).unwrap_or_default()),
        );
        // Relational-comparison parsing (e.g. "greater than") isn't
        // implemented by any configured rule yet, so these stay null.
        fields.insert("relation_text".to_string(), serde_json::Value::Null);
        fields.insert("relation".to_string(), serde_json::Value::Null);
        fields.insert("value_text".to_string(), serde_json::json!(value_text));
        fields.insert("units".to_string(), units.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null));
        fields.insert("value_in_canonical_unit".to_string(), serde_json::json!(canonical_value));
        fields.insert(self.destination_column.clone(), serde_json::json!(canonical_value));
        fields.insert(
            "tense_text".to_string(),
            tense_text.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
        );
        fields.insert("tense".to_string(), serde_json::json!(tense));
        if let Some(denominator) = denominator {
            // Fraction-style scores (e.g. "MMSE 25/30") additionally carry
            // their numerator/denominator under these names (spec.md §8
            // "MMSE denominator sanity": `value=25, out_of=30`).
            fields.insert("value".to_string(), serde_json::json!(canonical_value));
            fields.insert("out_of".to_string(), serde_json::json!(denominator));
        }
        FieldRow {
            table: self.destination_table.clone(),
            fields,
        }
    }

    fn describe_columns(&self) -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("variable_name", "VARCHAR(64)", "str", false),
            ColumnDef::new("_content", "TEXT", "str", false),
            ColumnDef::new("_start", "INTEGER", "int", false),
            ColumnDef::new("_end", "INTEGER", "int", false),
            ColumnDef::new("variable_text", "VARCHAR(64)", "str", false),
            ColumnDef::new("relation_text", "VARCHAR(64)", "str", true),
            ColumnDef::new("relation", "VARCHAR(32)", "str", true),
            ColumnDef::new("value_text", "VARCHAR(64)", "str", false),
            ColumnDef::new("units", "VARCHAR(32)", "str", true),
            ColumnDef::new("value_in_canonical_unit", "REAL", "float", false),
            ColumnDef::new(self.destination_column.as_str(), "REAL", "float", true),
            ColumnDef::new("tense_text", "VARCHAR(32)", "str", true),
            ColumnDef::new("tense", "VARCHAR(16)", "str", false),
            ColumnDef::new("value", "REAL", "float", true),
            ColumnDef::new("out_of", "INTEGER", "int", true),
        ]
    }
}

/// A parser's validator sibling (spec.md §4.2, glossary "Validator
/// (processor)"): matches only the keyword, with no value requirement, so
/// its recall sets a floor against which the numeric parser's precision
/// can be checked.
#[derive(Debug, Clone)]
pub struct ValidatorRule {
    pub variable_name: String,
    pub destination_table: String,
    keyword_re: Regex,
}

impl ValidatorRule {
    pub fn new(variable_name: impl Into<String>, keyword: &str, destination_table: impl Into<String>) -> Result<Self, regex::Error> {
        let keyword_re = Regex::new(&format!(r"(?i)(?P<keyword>{keyword})"))?;
        Ok(Self {
            variable_name: variable_name.into(),
            destination_table: destination_table.into(),
            keyword_re,
        })
    }

    fn apply(&self, text: &str) -> Vec<FieldRow> {
        let Some(captures) = self.keyword_re.captures(text) else {
            return Vec::new();
        };
        let whole = captures.get(0).unwrap();
        let keyword = captures.name("keyword");

        let mut fields = HashMap::new();
        fields.insert("variable_name".to_string(), serde_json::json!(self.variable_name));
        fields.insert("_content".to_string(), serde_json::json!(whole.as_str()));
        fields.insert("_start".to_string(), serde_json::json!(whole.start()));
        fields.insert("_end".to_string(), serde_json::json!(whole.end()));
        fields.insert(
            "variable_text".to_string(),
            serde_json::json!(keyword.map(|m| m.as_str().to_string()).unwrap_or_default()),
        );
        vec![FieldRow {
            table: self.destination_table.clone(),
            fields,
        }]
    }

    fn describe_columns(&self) -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("variable_name", "VARCHAR(64)", "str", false),
            ColumnDef::new("_content", "TEXT", "str", false),
            ColumnDef::new("_start", "INTEGER", "int", false),
            ColumnDef::new("_end", "INTEGER", "int", false),
            ColumnDef::new("variable_text", "VARCHAR(64)", "str", false),
        ]
    }
}

/// Either rule kind a `RegexExtractor` can run; a numeric parser or its
/// keyword-only validator sibling.
#[derive(Debug, Clone)]
enum Rule {
    Numeric(NumericRule),
    Validator(ValidatorRule),
}

impl Rule {
    fn apply(&self, text: &str) -> Vec<FieldRow> {
        match self {
            Rule::Numeric(rule) => rule.apply(text),
            Rule::Validator(rule) => rule.apply(text),
        }
    }

    fn destination_table(&self) -> &str {
        match self {
            Rule::Numeric(rule) => &rule.destination_table,
            Rule::Validator(rule) => &rule.destination_table,
        }
    }

    fn describe_columns(&self) -> Vec<ColumnDef> {
        match self {
            Rule::Numeric(rule) => rule.describe_columns(),
            Rule::Validator(rule) => rule.describe_columns(),
        }
    }
}

/// In-process extractor: a fixed set of rules run against every content
/// item, each rule contributing zero or one row.
pub struct RegexExtractor {
    name: String,
    version: String,
    rules: Vec<Rule>,
}

impl RegexExtractor {
    fn new_numeric(name: impl Into<String>, version: impl Into<String>, rules: Vec<NumericRule>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            rules: rules.into_iter().map(Rule::Numeric).collect(),
        }
    }

    fn new_validator(name: impl Into<String>, version: impl Into<String>, rules: Vec<ValidatorRule>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            rules: rules.into_iter().map(Rule::Validator).collect(),
        }
    }

    /// The canonical CRP finder from spec.md §8's worked examples: matches
    /// "CRP" followed by a number and optional mg/L or mg/dL unit.
    pub fn crp_finder(version: impl Into<String>) -> Result<Self, regex::Error> {
        let rule = NumericRule::new("CRP", "CRP", "crp_results", "value_mg_l")?.with_canonical_unit("mg/L");
        Ok(Self::new_numeric("crp_finder", version, vec![rule]))
    }

    /// The CRP finder's validator sibling: matches the "CRP" keyword alone,
    /// with no value requirement, as a recall floor.
    pub fn crp_validator(version: impl Into<String>) -> Result<Self, regex::Error> {
        let rule = ValidatorRule::new("CRP", "CRP", "crp_validator_hits")?;
        Ok(Self::new_validator("crp_validator", version, vec![rule]))
    }

    /// The MMSE finder: matches "MMSE" followed by "x/30", rejecting any
    /// other denominator as a transcription error (spec.md §8 "MMSE
    /// denominator sanity").
    pub fn mmse_finder(version: impl Into<String>) -> Result<Self, regex::Error> {
        let rule = NumericRule::new("MMSE", "MMSE", "mmse_results", "score")?
            .with_fraction("MMSE")?
            .with_denominator_rule(vec![30]);
        Ok(Self::new_numeric("mmse_finder", version, vec![rule]))
    }

    /// The MMSE finder's validator sibling: matches the "MMSE" keyword
    /// alone, with no value requirement, as a recall floor.
    pub fn mmse_validator(version: impl Into<String>) -> Result<Self, regex::Error> {
        let rule = ValidatorRule::new("MMSE", "MMSE", "mmse_validator_hits")?;
        Ok(Self::new_validator("mmse_validator", version, vec![rule]))
    }
}

impl Extractor for RegexExtractor {
    fn describe(&self) -> ProcessorDescriptor {
        let mut tables: HashMap<String, Vec<ColumnDef>> = HashMap::new();
        for rule in &self.rules {
            tables.entry(rule.destination_table().to_string()).or_insert_with(|| rule.describe_columns());
        }
        ProcessorDescriptor {
            name: self.name.clone(),
            title: self.name.clone(),
            version: self.version.clone(),
            is_default_version: true,
            schema_type: SchemaType::Tabular,
            tabular_schema: Some(TabularSchema::multi_table(tables)),
            sql_dialect: Some(SqlDialect::Sqlite),
        }
    }

    fn process_batch<'a>(
        &'a self,
        inputs: Vec<ExtractionInput>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<ExtractionOutcome>, ExtractorError>> + Send + 'a>> {
        Box::pin(async move {
            Ok(inputs
                .into_iter()
                .map(|input| {
                    let rows: Vec<FieldRow> = self.rules.iter().flat_map(|rule| rule.apply(&input.text)).collect();
                    ExtractionOutcome::success(input.record_id, rows)
                })
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(extractor: &RegexExtractor, text: &str) -> Vec<FieldRow> {
        let input = ExtractionInput {
            record_id: "r1".to_string(),
            text: text.to_string(),
        };
        futures_block_on(extractor.process_batch(vec![input]))
            .unwrap()
            .remove(0)
            .rows
    }

    // No tokio runtime needed: the regex extractor never actually awaits,
    // so a trivial inline poll suffices and keeps these tests runtime-free.
    fn futures_block_on<F: Future>(mut fut: Pin<Box<F>>) -> F::Output {
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
        fn noop(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            RawWaker::new(std::ptr::null(), &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        let waker = unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) };
        let mut cx = Context::from_waker(&waker);
        match fut.as_mut().poll(&mut cx) {
            Poll::Ready(output) => output,
            Poll::Pending => panic!("regex extractor future should never be pending"),
        }
    }

    #[test]
    fn crp_happy_path_matches_spec_scenario_one() {
        let extractor = RegexExtractor::crp_finder("1.0").unwrap();
        let rows = run(&extractor, "CRP 45 mg/L today.");
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.fields["variable_name"], serde_json::json!("CRP"));
        assert_eq!(row.fields["value_text"], serde_json::json!("45"));
        assert_eq!(row.fields["units"], serde_json::json!("mg/L"));
        assert_eq!(row.fields["value_mg_l"], serde_json::json!(45.0));
        assert_eq!(row.fields["tense"], serde_json::json!("present"));
    }

    #[test]
    fn crp_mg_dl_is_converted_to_mg_l() {
        let extractor = RegexExtractor::crp_finder("1.0").unwrap();
        let rows = run(&extractor, "Bloods: CRP 4.5 mg/dL today");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["value_mg_l"], serde_json::json!(45.0));
    }

    #[test]
    fn crp_mg_l_is_passed_through() {
        let extractor = RegexExtractor::crp_finder("1.0").unwrap();
        let rows = run(&extractor, "CRP 45 mg/L");
        assert_eq!(rows[0].fields["value_mg_l"], serde_json::json!(45.0));
    }

    #[test]
    fn mmse_accepts_30_point_denominator() {
        // spec.md §8 scenario 3: "MMSE 25/30" -> value=25, out_of=30.
        let extractor = RegexExtractor::mmse_finder("1.0").unwrap();
        let rows = run(&extractor, "MMSE 25/30 today");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["value"], serde_json::json!(25.0));
        assert_eq!(rows[0].fields["out_of"], serde_json::json!(30));
        assert_eq!(rows[0].fields["score"], serde_json::json!(25.0));
    }

    #[test]
    fn mmse_rejects_29_point_denominator() {
        // spec.md §8 scenario 3: "MMSE 25/29" -> no row, denominator disallowed.
        let extractor = RegexExtractor::mmse_finder("1.0").unwrap();
        let rows = run(&extractor, "MMSE 27/29");
        assert!(rows.is_empty());
    }

    #[test]
    fn mmse_rejects_implausible_denominator() {
        let extractor = RegexExtractor::mmse_finder("1.0").unwrap();
        let rows = run(&extractor, "MMSE 9/100");
        assert!(rows.is_empty());
    }

    #[test]
    fn no_match_yields_no_rows() {
        let extractor = RegexExtractor::crp_finder("1.0").unwrap();
        let rows = run(&extractor, "No relevant bloods mentioned");
        assert!(rows.is_empty());
    }

    #[test]
    fn crp_validator_matches_keyword_without_a_value() {
        let extractor = RegexExtractor::crp_validator("1.0").unwrap();
        let rows = run(&extractor, "Patient mentions CRP but no figure given.");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["variable_text"], serde_json::json!("CRP"));
    }

    #[test]
    fn crp_validator_recall_is_a_superset_of_the_finder() {
        let validator = RegexExtractor::crp_validator("1.0").unwrap();
        let finder = RegexExtractor::crp_finder("1.0").unwrap();
        let text = "CRP was raised, no number documented.";
        assert!(!run(&validator, text).is_empty());
        assert!(run(&finder, text).is_empty());
    }

    #[test]
    fn mmse_validator_matches_keyword_without_a_fraction() {
        let extractor = RegexExtractor::mmse_validator("1.0").unwrap();
        let rows = run(&extractor, "MMSE deferred due to fatigue.");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["variable_text"], serde_json::json!("MMSE"));
    }
}
