//! Single-pass streaming evaluation of compiled probes.
//!
//! All probes registered with a [`SniffEngine`] are evaluated together while
//! the document is read once. Reading stops as soon as every location path
//! the probes reference has been decided, or when the document element
//! closes. Input in another encoding is transcoded to UTF-8 first.

use std::io::{BufRead, BufReader, Read};

use encoding_rs_io::DecodeReaderBytesBuilder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::reader::NsReader;
use tracing::trace;

use super::decode;

use super::expr::{Element, Expr, LocationPath};
use super::results::{ProbeValue, SniffResults};
use crate::error::{CompileError, SniffError};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Handle to a probe compiled into a [`SniffEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeId(usize);

impl ProbeId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
struct Probe {
    source: String,
    expr: Expr,
}

#[derive(Debug, Clone)]
struct TrackedPath {
    path: LocationPath,
    /// Some probe reads the string value, so text must be collected.
    needs_text: bool,
}

/// Shared evaluation context for every compiled probe.
#[derive(Debug, Clone, Default)]
pub struct SniffEngine {
    probes: Vec<Probe>,
    paths: Vec<TrackedPath>,
}

#[derive(Debug, Clone, Default)]
struct NodeMatch {
    matched: bool,
    value: Option<String>,
}

impl SniffEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and register an expression.
    pub fn compile(&mut self, source: &str) -> Result<ProbeId, CompileError> {
        let expr = Expr::parse(source)?;
        Ok(self.register(source, expr))
    }

    /// Register an already parsed expression.
    pub fn register(&mut self, source: &str, expr: Expr) -> ProbeId {
        self.track_paths(&expr, true);
        self.probes.push(Probe {
            source: source.to_string(),
            expr,
        });
        ProbeId(self.probes.len() - 1)
    }

    fn track_paths(&mut self, expr: &Expr, text: bool) {
        match expr {
            Expr::Or(a, b) | Expr::And(a, b) => {
                self.track_paths(a, false);
                self.track_paths(b, false);
            }
            Expr::Not(inner) | Expr::Boolean(inner) => self.track_paths(inner, false),
            Expr::String(inner) => self.track_paths(inner, true),
            Expr::Literal(_) => {}
            Expr::Path(path) => match self.paths.iter_mut().find(|t| t.path == *path) {
                Some(tracked) => tracked.needs_text |= text,
                None => self.paths.push(TrackedPath {
                    path: path.clone(),
                    needs_text: text,
                }),
            },
        }
    }

    pub fn expr(&self, probe: ProbeId) -> Option<&Expr> {
        self.probes.get(probe.0).map(|p| &p.expr)
    }

    pub fn source(&self, probe: ProbeId) -> Option<&str> {
        self.probes.get(probe.0).map(|p| p.source.as_str())
    }

    pub fn len(&self) -> usize {
        self.probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Stream `input` once and evaluate every registered probe against it.
    pub fn sniff(&self, input: impl Read) -> Result<SniffResults, SniffError> {
        let mut input = BufReader::new(input);
        let encoding = if self.paths.is_empty() {
            None
        } else {
            decode::transcoding(input.fill_buf()?)
        };
        let nodes = match encoding {
            Some(encoding) => {
                trace!(encoding = encoding.name(), "transcoding to UTF-8");
                let utf8 = DecodeReaderBytesBuilder::new()
                    .encoding(Some(encoding))
                    .build(input);
                self.scan(BufReader::new(utf8))?
            }
            None => self.scan(input)?,
        };
        let values = self
            .probes
            .iter()
            .map(|probe| self.evaluate(&probe.expr, &nodes).into_probe_value())
            .collect();
        Ok(SniffResults::new(values))
    }

    fn scan<R: BufRead>(&self, input: R) -> Result<Vec<NodeMatch>, SniffError> {
        let mut nodes = vec![NodeMatch::default(); self.paths.len()];
        if self.paths.is_empty() {
            return Ok(nodes);
        }

        let mut reader = NsReader::from_reader(input);
        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        // (path index, depth of the element whose text is being collected)
        let mut captures: Vec<(usize, usize)> = Vec::new();
        let mut unresolved = self.paths.len();
        let mut seen_root = false;

        loop {
            buf.clear();
            let (namespace, event) = reader.read_resolved_event_into(&mut buf)?;
            match event {
                Event::Text(text) if !seen_root => {
                    let bytes: &[u8] = &text;
                    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
                    if !bytes.iter().all(u8::is_ascii_whitespace) {
                        return Err(SniffError::TextBeforeRoot);
                    }
                }
                Event::Start(start) => {
                    seen_root = true;
                    stack.push(element(&namespace, &start)?);
                    self.open_element(&stack, &mut nodes, &mut captures, &mut unresolved);
                }
                Event::Empty(start) => {
                    seen_root = true;
                    stack.push(element(&namespace, &start)?);
                    self.open_element(&stack, &mut nodes, &mut captures, &mut unresolved);
                    close_element(&mut stack, &mut captures, &mut unresolved);
                }
                Event::End(_) => close_element(&mut stack, &mut captures, &mut unresolved),
                Event::Text(text) if !captures.is_empty() => {
                    let text = text.unescape()?;
                    for &(index, _) in &captures {
                        push_text(&mut nodes[index], &text);
                    }
                }
                Event::CData(data) if !captures.is_empty() => {
                    let text = String::from_utf8_lossy(&data);
                    for &(index, _) in &captures {
                        push_text(&mut nodes[index], &text);
                    }
                }
                Event::Eof => break,
                _ => {}
            }

            if unresolved == 0 {
                trace!("all location paths resolved, stopping early");
                break;
            }
            if seen_root && stack.is_empty() {
                break;
            }
        }

        Ok(nodes)
    }

    fn open_element(
        &self,
        stack: &[Element],
        nodes: &mut [NodeMatch],
        captures: &mut Vec<(usize, usize)>,
        unresolved: &mut usize,
    ) {
        let depth = stack.len();
        let Some(current) = stack.last() else {
            return;
        };

        for (index, tracked) in self.paths.iter().enumerate() {
            let node = &mut nodes[index];
            let path = &tracked.path;
            if node.matched
                || path.max_depth().is_some_and(|max| max != depth)
                || !path.selects(stack)
            {
                continue;
            }
            match &path.attribute {
                Some(name) => {
                    if let Some(value) = current.attribute(name) {
                        node.matched = true;
                        node.value = Some(value.to_string());
                        *unresolved -= 1;
                    }
                }
                None if tracked.needs_text => {
                    node.matched = true;
                    node.value = Some(String::new());
                    captures.push((index, depth));
                }
                None => {
                    node.matched = true;
                    *unresolved -= 1;
                }
            }
        }
    }

    fn evaluate<'n>(&self, expr: &Expr, nodes: &'n [NodeMatch]) -> Value<'n> {
        match expr {
            Expr::Or(a, b) => {
                Value::Boolean(self.evaluate(a, nodes).truthy() || self.evaluate(b, nodes).truthy())
            }
            Expr::And(a, b) => {
                Value::Boolean(self.evaluate(a, nodes).truthy() && self.evaluate(b, nodes).truthy())
            }
            Expr::Not(inner) => Value::Boolean(!self.evaluate(inner, nodes).truthy()),
            Expr::Boolean(inner) => Value::Boolean(self.evaluate(inner, nodes).truthy()),
            Expr::String(inner) => Value::String(self.evaluate(inner, nodes).into_string()),
            Expr::Literal(value) => Value::Boolean(*value),
            Expr::Path(path) => match self.paths.iter().position(|t| t.path == *path) {
                Some(index) => Value::Nodes(&nodes[index]),
                None => Value::Boolean(false),
            },
        }
    }
}

enum Value<'n> {
    Boolean(bool),
    String(String),
    Nodes(&'n NodeMatch),
}

impl Value<'_> {
    fn truthy(&self) -> bool {
        match self {
            Value::Boolean(value) => *value,
            Value::String(value) => !value.is_empty(),
            Value::Nodes(node) => node.matched,
        }
    }

    fn into_string(self) -> String {
        match self {
            Value::Boolean(value) => value.to_string(),
            Value::String(value) => value,
            Value::Nodes(node) => node.value.clone().unwrap_or_default(),
        }
    }

    fn into_probe_value(self) -> ProbeValue {
        match self {
            Value::Boolean(value) => ProbeValue::Boolean(value),
            Value::String(value) => ProbeValue::String(value),
            Value::Nodes(node) => ProbeValue::NodeSet {
                matched: node.matched,
                first: node.value.clone(),
            },
        }
    }
}

fn element(namespace: &ResolveResult, start: &BytesStart) -> Result<Element, SniffError> {
    let namespace = match namespace {
        ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.as_ref()).into_owned(),
        _ => String::new(),
    };
    let local_name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();

    let mut attributes = Vec::new();
    for attribute in start.attributes() {
        let attribute = attribute?;
        let key = attribute.key.as_ref();
        if key == b"xmlns" || key.starts_with(b"xmlns:") {
            continue;
        }
        let name = String::from_utf8_lossy(attribute.key.local_name().as_ref()).into_owned();
        let value = attribute.unescape_value()?.into_owned();
        attributes.push((name, value));
    }

    Ok(Element {
        local_name,
        namespace,
        attributes,
    })
}

fn close_element(
    stack: &mut Vec<Element>,
    captures: &mut Vec<(usize, usize)>,
    unresolved: &mut usize,
) {
    let depth = stack.len();
    captures.retain(|&(_, open_depth)| {
        if open_depth == depth {
            *unresolved -= 1;
            false
        } else {
            true
        }
    });
    stack.pop();
}

fn push_text(node: &mut NodeMatch, text: &str) {
    node.value.get_or_insert_with(String::new).push_str(text);
}

#[cfg(test)]
mod tests {
    use super::*;

    const WFS_CAPABILITIES: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<wfs:WFS_Capabilities xmlns:wfs="http://www.opengis.net/wfs/2.0"
    xmlns:ows="http://www.opengis.net/ows/1.1" version="2.0.0">
  <ows:ServiceIdentification>
    <ows:Title>Protected Sites &amp; Parks</ows:Title>
    <ows:Abstract><![CDATA[Sites <protected> by law]]></ows:Abstract>
  </ows:ServiceIdentification>
  <wfs:FeatureTypeList/>
</wfs:WFS_Capabilities>"#;

    fn engine_with(sources: &[&str]) -> (SniffEngine, Vec<ProbeId>) {
        let mut engine = SniffEngine::new();
        let ids = sources
            .iter()
            .map(|source| engine.compile(source).unwrap())
            .collect();
        (engine, ids)
    }

    #[test]
    fn root_element_probe_matches() {
        let (engine, ids) = engine_with(&[
            "boolean(/*[local-name() = 'WFS_Capabilities' and starts-with(@version, '2.0')])",
            "boolean(/*[local-name() = 'WMS_Capabilities'])",
        ]);
        let results = engine.sniff(WFS_CAPABILITIES.as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
        assert_eq!(results.boolean(ids[1]), Ok(false));
    }

    #[test]
    fn namespace_predicate_uses_resolved_namespace() {
        let (engine, ids) = engine_with(&[
            "boolean(/*[namespace-uri() = 'http://www.opengis.net/wfs/2.0'])",
            "boolean(/*[namespace-uri() = 'http://www.opengis.net/wfs'])",
        ]);
        let results = engine.sniff(WFS_CAPABILITIES.as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
        assert_eq!(results.boolean(ids[1]), Ok(false));
    }

    #[test]
    fn string_probe_collects_unescaped_text() {
        let (engine, ids) = engine_with(&[
            "string(/*/*[local-name() = 'ServiceIdentification']/*[local-name() = 'Title'])",
            "string(//Abstract)",
        ]);
        let results = engine.sniff(WFS_CAPABILITIES.as_bytes()).unwrap();
        assert_eq!(results.string(ids[0]).unwrap(), "Protected Sites & Parks");
        assert_eq!(results.string(ids[1]).unwrap(), "Sites <protected> by law");
    }

    #[test]
    fn attribute_path_yields_attribute_value() {
        let (engine, ids) = engine_with(&["string(/*/@version)", "boolean(/*/@updateSequence)"]);
        let results = engine.sniff(WFS_CAPABILITIES.as_bytes()).unwrap();
        assert_eq!(results.string(ids[0]).unwrap(), "2.0.0");
        assert_eq!(results.boolean(ids[1]), Ok(false));
    }

    #[test]
    fn empty_elements_are_matched() {
        let (engine, ids) = engine_with(&["boolean(//FeatureTypeList)"]);
        let results = engine.sniff(WFS_CAPABILITIES.as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
    }

    #[test]
    fn probes_sharing_a_path_register_it_once() {
        let (engine, ids) = engine_with(&["boolean(/a)", "not(/a)", "string(/a)"]);
        assert_eq!(engine.paths.len(), 1);
        let results = engine.sniff("<a>x</a>".as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
        assert_eq!(results.boolean(ids[1]), Ok(false));
        assert_eq!(results.string(ids[2]).unwrap(), "x");
    }

    #[test]
    fn malformed_xml_is_an_error() {
        let (engine, _) = engine_with(&["boolean(//never)"]);
        let err = engine.sniff("<a><b></a>".as_bytes()).unwrap_err();
        assert!(matches!(err, SniffError::Xml(_)), "{err}");
    }

    #[test]
    fn resolved_root_probe_stops_before_malformed_tail() {
        let (engine, ids) = engine_with(&["boolean(/*[local-name() = 'a'])"]);
        let results = engine.sniff("<a><b></c>".as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
    }

    #[test]
    fn empty_input_matches_nothing() {
        let (engine, ids) = engine_with(&["boolean(/*)"]);
        let results = engine.sniff("".as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(false));
    }

    #[test]
    fn text_before_the_root_element_is_an_error() {
        let (engine, _) = engine_with(&["boolean(/*)"]);
        for input in [r#"{"d": "<p>x</p>"}"#, "plain <b>text</b>", "\u{feff}x<a/>"] {
            let err = engine.sniff(input.as_bytes()).unwrap_err();
            assert!(matches!(err, SniffError::TextBeforeRoot), "{input}: {err}");
        }
    }

    #[test]
    fn whitespace_and_prolog_before_the_root_are_accepted() {
        let (engine, ids) = engine_with(&["boolean(/*[local-name() = 'a'])"]);
        let input = "\u{feff}<?xml version=\"1.0\"?>\n<!-- c -->\n  <!DOCTYPE a>\n<a/>";
        let results = engine.sniff(input.as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
    }

    #[test]
    fn declared_latin1_document_is_decoded() {
        let (engine, ids) = engine_with(&[
            "boolean(/*[local-name() = 'a'])",
            "string(/a/@title)",
            "string(/a/t)",
        ]);
        let input: &[u8] =
            b"<?xml version=\"1.0\" encoding=\"ISO-8859-1\"?><a title=\"Stra\xdfe\"><t>Stra\xdfe</t></a>";
        let results = engine.sniff(input).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
        assert_eq!(results.string(ids[1]).unwrap(), "Stra\u{df}e");
        assert_eq!(results.string(ids[2]).unwrap(), "Stra\u{df}e");
    }

    #[test]
    fn utf16le_document_with_bom_is_decoded() {
        let (engine, ids) = engine_with(&["boolean(/*[local-name() = 'a'])", "string(/a/@title)"]);
        let text = "<?xml version=\"1.0\" encoding=\"UTF-16\"?><a title=\"Stra\u{df}e\"><b/></a>";
        let mut input = vec![0xFF, 0xFE];
        input.extend(text.encode_utf16().flat_map(u16::to_le_bytes));
        let results = engine.sniff(input.as_slice()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
        assert_eq!(results.string(ids[1]).unwrap(), "Stra\u{df}e");
    }

    #[test]
    fn utf8_bom_is_skipped() {
        let (engine, ids) = engine_with(&["boolean(/*[local-name() = 'a'])"]);
        let results = engine.sniff("\u{feff}<a/>".as_bytes()).unwrap();
        assert_eq!(results.boolean(ids[0]), Ok(true));
    }

    #[test]
    fn empty_engine_reads_nothing() {
        let engine = SniffEngine::new();
        let results = engine.sniff("not even xml <".as_bytes()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn source_and_expr_are_kept() {
        let (engine, ids) = engine_with(&["true()"]);
        assert_eq!(engine.source(ids[0]), Some("true()"));
        assert_eq!(engine.expr(ids[0]), Some(&Expr::Literal(true)));
        assert_eq!(engine.len(), 1);
    }
}
