//! eXist-db XQuery adapter for MARC21 record collections.
//!
//! The whole disjunction compiles into a single XQuery document: one bracketed
//! path predicate per AND-group, unioned and wrapped in `subsequence(...)`
//! under the MARC21-slim default namespace. The compiled query executes once;
//! the response is a `<collection>` of `<record>` elements whose control
//! fields are scalar and whose data fields repeat.

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use bibfed_common::config::SourceConfig;
use bibfed_common::models::{FieldPath, Operator, Query, SourceRecord};
use bibfed_error::{BibfedError, ErrorCode, ErrorContext, Result};

use crate::dispatch::FanOut;
use crate::sources::{
    ensure_endpoint, ensure_limit, parse_adapter_config, unsupported_object_type,
    AdapterProvider, QueryJob, SourceAdapter,
};

/// The object type this backend serves.
const OBJECT_TYPE: &str = "marcRecord";

/// Control number fields hold a scalar value directly on the record.
static CONTROL_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^00[1-8]$").unwrap());

/// 4-character codes select a subfield of a (repeatable) data field.
static DATA_FIELD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{3}[a-z0-9]$").unwrap());

const NAMESPACE_DECLARATION: &str =
    "declare default element namespace 'http://www.loc.gov/MARC21/slim';";

#[derive(Debug, Deserialize, Clone)]
pub struct ExistDbSourceConfig {
    pub endpoint: String,
    pub document_path: String,
    pub limit: usize,
}

/// A value test against one MARC field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldTest {
    /// `controlfield[@tag='001'] = value`
    Control { tag: String },
    /// `datafield[@tag='245']/subfield[@code='a'] = value`
    Data { tag: String, code: char },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Predicate {
    test: FieldTest,
    value: String,
}

impl Predicate {
    fn serialize(&self) -> String {
        let escaped = escape_xml(&self.value);
        match &self.test {
            FieldTest::Control { tag } => {
                format!("[controlfield[@tag='{}'] = '{}']", tag, escaped)
            }
            FieldTest::Data { tag, code } => format!(
                "[datafield[@tag='{}']/subfield[@code='{}'] = '{}']",
                tag, code, escaped
            ),
        }
    }
}

/// One OR-branch: its predicates AND-ed onto the record path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct RecordSelection {
    predicates: Vec<Predicate>,
}

impl RecordSelection {
    fn serialize(&self) -> String {
        let mut path = String::from("/collection/record");
        for predicate in &self.predicates {
            path.push_str(&predicate.serialize());
        }
        path
    }
}

/// The complete query: a union of selections wrapped in `subsequence(...)`.
/// Values are escaped during serialization, never earlier.
#[derive(Debug, Clone, PartialEq, Eq)]
struct XqueryDocument {
    selections: Vec<RecordSelection>,
    offset: usize,
    limit: usize,
}

impl XqueryDocument {
    fn serialize(&self) -> String {
        let paths: Vec<String> = self.selections.iter().map(RecordSelection::serialize).collect();
        let union = format!("(\n   {}\n)", paths.join("\n | "));
        format!(
            "{}\nsubsequence({},{},{})",
            NAMESPACE_DECLARATION, union, self.offset, self.limit
        )
    }
}

/// Escape the five XML special characters before interpolation.
fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[derive(Debug)]
pub struct ExistDbAdapter {
    config: ExistDbSourceConfig,
    client: reqwest::Client,
}

impl ExistDbAdapter {
    pub fn new(config: ExistDbSourceConfig) -> Result<Self> {
        ensure_endpoint(&config.endpoint)?;
        ensure_limit(config.limit)?;
        Ok(ExistDbAdapter {
            config,
            client: reqwest::Client::new(),
        })
    }

    /// All OR-branches fold into one document; an empty query selects every
    /// record within the limit.
    fn compile(&self, query: &Query) -> Result<XqueryDocument> {
        let unconditional = vec![Vec::new()];
        let branches = if query.branches.is_empty() {
            &unconditional
        } else {
            &query.branches
        };

        let selections = branches
            .iter()
            .map(|group| {
                let predicates = group
                    .iter()
                    .map(|condition| {
                        if condition.operator != Operator::Eq {
                            return Err(BibfedError::new(
                                ErrorCode::UnsupportedOperator,
                                format!("unknown operator: {}", condition.operator),
                            ));
                        }
                        let field = condition.field.segments().concat();
                        let test = classify_field(&field)?;
                        Ok(Predicate {
                            test,
                            value: condition.value.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(RecordSelection { predicates })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(XqueryDocument {
            selections,
            offset: 0,
            limit: self.config.limit,
        })
    }
}

fn classify_field(field: &str) -> Result<FieldTest> {
    if CONTROL_FIELD.is_match(field) {
        Ok(FieldTest::Control {
            tag: field.to_string(),
        })
    } else if DATA_FIELD.is_match(field) {
        Ok(FieldTest::Data {
            tag: field[0..3].to_string(),
            code: field.chars().nth(3).unwrap(),
        })
    } else {
        Err(BibfedError::new(
            ErrorCode::UnknownField,
            format!("unknown field: {}", field),
        )
        .with_context(ErrorContext::UnknownField {
            field: field.to_string(),
            source_type: "existdb".to_string(),
            allowed_fields: Vec::new(),
        })
        .with_hint("expected a 001-008 control number or a tag+subfield code like 245a"))
    }
}

async fn fetch_records(client: reqwest::Client, url: String) -> Result<Vec<SourceRecord>> {
    debug!(%url, "dispatching xquery");
    let response = client.get(&url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(BibfedError::new(
            ErrorCode::UnexpectedStatus,
            format!("unexpected http status code: {}", status.as_u16()),
        )
        .with_context(ErrorContext::Transport {
            endpoint: url,
            status: Some(status.as_u16()),
        }));
    }
    // Fully buffer the body before parsing starts.
    let body = response.text().await?;
    parse_marc_collection(&body)
}

/// Reshape a MARC21-slim collection into source records: control fields as
/// scalar strings, data fields as arrays of subfield maps (a tag may repeat).
/// The record id is the 001 control number.
fn parse_marc_collection(xml: &str) -> Result<Vec<SourceRecord>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records: Vec<SourceRecord> = Vec::new();
    let mut record: Option<Map<String, Value>> = None;
    let mut control_tag: Option<String> = None;
    let mut datafield: Option<(String, Map<String, Value>)> = None;
    let mut subfield_code: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Err(e) => return Err(e.into()),
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                text.clear();
                match start.name().local_name().as_ref() {
                    b"record" => record = Some(Map::new()),
                    b"controlfield" => control_tag = attribute(&start, b"tag")?,
                    b"datafield" => {
                        if let Some(tag) = attribute(&start, b"tag")? {
                            datafield = Some((tag, Map::new()));
                        }
                    }
                    b"subfield" => subfield_code = attribute(&start, b"code")?,
                    _ => {}
                }
            }
            Ok(Event::Text(event)) => {
                let unescaped = event.unescape()?;
                text.push_str(&unescaped);
            }
            Ok(Event::End(end)) => match end.name().local_name().as_ref() {
                b"controlfield" => {
                    if let (Some(tag), Some(fields)) = (control_tag.take(), record.as_mut()) {
                        fields.insert(tag, Value::String(text.clone()));
                    }
                    text.clear();
                }
                b"subfield" => {
                    if let (Some(code), Some((_, subfields))) =
                        (subfield_code.take(), datafield.as_mut())
                    {
                        subfields.insert(code, Value::String(text.clone()));
                    }
                    text.clear();
                }
                b"datafield" => {
                    if let (Some((tag, subfields)), Some(fields)) =
                        (datafield.take(), record.as_mut())
                    {
                        let entry = fields
                            .entry(tag)
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Value::Array(values) = entry {
                            values.push(Value::Object(subfields));
                        }
                    }
                }
                b"record" => {
                    if let Some(fields) = record.take() {
                        records.push(finish_record(fields)?);
                    }
                }
                _ => {}
            },
            Ok(_) => {}
        }
    }

    Ok(records)
}

fn finish_record(fields: Map<String, Value>) -> Result<SourceRecord> {
    let id = fields
        .get("001")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            BibfedError::new(
                ErrorCode::MalformedResponse,
                "record without a 001 control number",
            )
            .with_context(ErrorContext::Parse {
                source_type: "existdb".to_string(),
                detail: None,
            })
        })?
        .to_string();
    Ok(SourceRecord {
        id,
        record_type: OBJECT_TYPE.to_string(),
        fields: Value::Object(fields),
    })
}

fn attribute(start: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Result<Option<String>> {
    for attr in start.attributes() {
        let attr = attr.map_err(|e| {
            BibfedError::new(
                ErrorCode::MalformedResponse,
                format!("invalid XML attribute: {}", e),
            )
        })?;
        if attr.key.local_name().as_ref() == name {
            let value = attr.unescape_value().map_err(BibfedError::from)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

impl SourceAdapter for ExistDbAdapter {
    fn source_type(&self) -> &'static str {
        "existdb"
    }

    fn object_type(&self) -> &str {
        OBJECT_TYPE
    }

    fn id_field(&self) -> FieldPath {
        FieldPath::named("001")
    }

    fn query(&self, object_type: &str, query: &Query, _fields: &[FieldPath]) -> Result<QueryJob> {
        if object_type != OBJECT_TYPE {
            return Err(unsupported_object_type(object_type, OBJECT_TYPE));
        }
        let document = self.compile(query)?;
        let url = format!(
            "{}{}?_query={}",
            self.config.endpoint,
            self.config.document_path,
            urlencoding::encode(&document.serialize())
        );
        // The OR is folded into the single compiled query, so the dispatch
        // degenerates to one branch — cancel and latch behave uniformly.
        Ok(QueryJob::new(FanOut::spawn(vec![fetch_records(
            self.client.clone(),
            url,
        )])))
    }
}

pub struct ExistDbAdapterProvider;

impl AdapterProvider for ExistDbAdapterProvider {
    fn type_name(&self) -> &'static str {
        "existdb"
    }

    fn build(&self, source: &SourceConfig) -> Result<Box<dyn SourceAdapter>> {
        let config: ExistDbSourceConfig = parse_adapter_config(source)?;
        Ok(Box::new(ExistDbAdapter::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bibfed_common::models::Condition;

    fn adapter(limit: usize) -> ExistDbAdapter {
        ExistDbAdapter::new(ExistDbSourceConfig {
            endpoint: "http://localhost:8080/exist/rest".to_string(),
            document_path: "/db/marc/records.xml".to_string(),
            limit,
        })
        .expect("valid config")
    }

    fn eq(field: &str, value: &str) -> Condition {
        Condition::eq(FieldPath::named(field), value)
    }

    #[test]
    fn test_compile_datafield_predicate() {
        let query = Query::new(vec![vec![eq("245a", "Moby Dick")]]);
        let document = adapter(10).compile(&query).expect("compilation failed");
        let compiled = document.serialize();

        assert!(compiled
            .contains("[datafield[@tag='245']/subfield[@code='a'] = 'Moby Dick']"));
        assert!(compiled.starts_with(
            "declare default element namespace 'http://www.loc.gov/MARC21/slim';"
        ));
        assert!(compiled.contains("subsequence((\n   /collection/record"));
        assert!(compiled.ends_with(",0,10)"));
    }

    #[test]
    fn test_compile_controlfield_predicate() {
        let query = Query::new(vec![vec![eq("001", "123456")]]);
        let document = adapter(10).compile(&query).expect("compilation failed");
        assert!(document
            .serialize()
            .contains("[controlfield[@tag='001'] = '123456']"));
    }

    #[test]
    fn test_compile_escapes_xml_special_characters() {
        let query = Query::new(vec![vec![eq("245a", r#"Tom & <'Jerry'> "Show""#)]]);
        let document = adapter(10).compile(&query).expect("compilation failed");
        assert!(document.serialize().contains(
            "= 'Tom &amp; &lt;&apos;Jerry&apos;&gt; &quot;Show&quot;'"
        ));
    }

    #[test]
    fn test_compile_unions_or_branches_into_one_query() {
        let query = Query::new(vec![vec![eq("245a", "Foo")], vec![eq("100a", "Bar")]]);
        let document = adapter(10).compile(&query).expect("compilation failed");
        let compiled = document.serialize();

        assert!(compiled.contains("\n | "));
        assert_eq!(compiled.matches("/collection/record").count(), 2);
        // one document, however many branches
        assert_eq!(compiled.matches("subsequence(").count(), 1);
    }

    #[test]
    fn test_compile_and_group_concatenates_predicates() {
        let query = Query::new(vec![vec![eq("245a", "Foo"), eq("008", "maps")]]);
        let document = adapter(10).compile(&query).expect("compilation failed");
        assert!(document.serialize().contains(
            "/collection/record[datafield[@tag='245']/subfield[@code='a'] = 'Foo'][controlfield[@tag='008'] = 'maps']"
        ));
    }

    #[test]
    fn test_compile_empty_query_selects_everything() {
        let document = adapter(50)
            .compile(&Query::unconditional())
            .expect("compilation failed");
        assert_eq!(
            document.serialize(),
            "declare default element namespace 'http://www.loc.gov/MARC21/slim';\nsubsequence((\n   /collection/record\n),0,50)"
        );
    }

    #[test]
    fn test_compile_rejects_unknown_field() {
        let err = adapter(10)
            .compile(&Query::new(vec![vec![eq("24a", "Foo")]]))
            .expect_err("must fail");
        assert_eq!(err.code, ErrorCode::UnknownField);

        // 009 is outside the control number range
        let err = adapter(10)
            .compile(&Query::new(vec![vec![eq("009", "x")]]))
            .expect_err("must fail");
        assert_eq!(err.code, ErrorCode::UnknownField);
    }

    #[test]
    fn test_compile_rejects_unsupported_operator() {
        let query = Query::new(vec![vec![Condition {
            operator: Operator::Other("~".to_string()),
            field: FieldPath::named("245a"),
            value: "Foo".to_string(),
        }]]);
        let err = adapter(10).compile(&query).expect_err("must fail");
        assert_eq!(err.code, ErrorCode::UnsupportedOperator);
    }

    #[test]
    fn test_construction_rejects_bad_config() {
        let err = ExistDbAdapter::new(ExistDbSourceConfig {
            endpoint: "file:///etc/passwd".to_string(),
            document_path: "/db/marc.xml".to_string(),
            limit: 10,
        })
        .expect_err("must fail");
        assert_eq!(err.code, ErrorCode::InvalidEndpoint);
    }

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<collection xmlns="http://www.loc.gov/MARC21/slim">
  <record>
    <controlfield tag="001">990000123</controlfield>
    <controlfield tag="008">741216s1974</controlfield>
    <datafield tag="245" ind1="1" ind2="0">
      <subfield code="a">Moby Dick</subfield>
      <subfield code="c">Herman Melville</subfield>
    </datafield>
    <datafield tag="650" ind1=" " ind2="0">
      <subfield code="a">Whaling</subfield>
    </datafield>
    <datafield tag="650" ind1=" " ind2="0">
      <subfield code="a">Sea stories</subfield>
    </datafield>
  </record>
  <record>
    <controlfield tag="001">990000456</controlfield>
    <datafield tag="245" ind1="1" ind2="0">
      <subfield code="a">Typee</subfield>
    </datafield>
  </record>
</collection>"#;

    #[test]
    fn test_parse_marc_collection() {
        let records = parse_marc_collection(SAMPLE).expect("parse failed");
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.id, "990000123");
        assert_eq!(first.record_type, "marcRecord");
        // control fields are scalar
        assert_eq!(
            first.fields.get("008").and_then(|v| v.as_str()),
            Some("741216s1974")
        );
        // data fields are arrays of subfield maps
        let title = first.fields.get("245").and_then(|v| v.as_array()).unwrap();
        assert_eq!(title.len(), 1);
        assert_eq!(
            title[0].get("a").and_then(|v| v.as_str()),
            Some("Moby Dick")
        );
        assert_eq!(
            title[0].get("c").and_then(|v| v.as_str()),
            Some("Herman Melville")
        );
        // repeated tags accumulate
        let subjects = first.fields.get("650").and_then(|v| v.as_array()).unwrap();
        assert_eq!(subjects.len(), 2);

        assert_eq!(records[1].id, "990000456");
    }

    #[test]
    fn test_parse_rejects_record_without_control_number() {
        let xml = r#"<collection><record>
            <datafield tag="245"><subfield code="a">Foo</subfield></datafield>
        </record></collection>"#;
        let err = parse_marc_collection(xml).expect_err("must fail");
        assert_eq!(err.code, ErrorCode::MalformedResponse);
    }

    #[test]
    fn test_parse_rejects_invalid_xml() {
        let err = parse_marc_collection("<collection><record>").err();
        // unclosed tags surface as either a reader error or an empty set;
        // the reader flags truncated documents
        assert!(err.is_none() || err.unwrap().code == ErrorCode::MalformedResponse);
    }
}
