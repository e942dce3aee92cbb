//! Typed tree for NcML aggregation descriptors.
//!
//! The document shape is fixed:
//!
//! ```text
//! <netcdf xmlns="http://www.unidata.ucar.edu/namespaces/netcdf/ncml-2.2">
//!   <aggregation dimName="time" type="joinExisting">
//!     <netcdf location="/data/S2A_20240101T103021_T31UFT.nc" ncoords="1"/>
//!   </aggregation>
//! </netcdf>
//! ```
//!
//! so the tree is modelled as plain structs with fixed accessors instead of
//! a generic element/attribute map. Parsing is a single pass over quick-xml
//! events; serialization goes through the quick-xml writer.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// NcML 2.2 namespace expected by netCDF-Java / THREDDS.
pub const NCML_NAMESPACE: &str = "http://www.unidata.ucar.edu/namespaces/netcdf/ncml-2.2";

/// Join dimension used when the caller does not name one.
pub const DEFAULT_DIMENSION: &str = "time";

const ROOT_ELEMENT: &str = "netcdf";
const AGGREGATION_ELEMENT: &str = "aggregation";
const MEMBER_ELEMENT: &str = "netcdf";

// =============================================================================
// AGGREGATION TYPE
// =============================================================================

/// Strategy used by the reader to combine members along the join dimension.
///
/// Unknown identifiers are kept verbatim in [`AggregationType::Other`] so a
/// descriptor written by newer tooling survives a load/save cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AggregationType {
    #[default]
    JoinExisting,
    JoinNew,
    Union,
    Tiled,
    ForecastModelRunCollection,
    ForecastModelRunSingleCollection,
    Other(String),
}

impl AggregationType {
    /// Identifier as written in the `type` attribute.
    pub fn as_str(&self) -> &str {
        match self {
            Self::JoinExisting => "joinExisting",
            Self::JoinNew => "joinNew",
            Self::Union => "union",
            Self::Tiled => "tiled",
            Self::ForecastModelRunCollection => "forecastModelRunCollection",
            Self::ForecastModelRunSingleCollection => "forecastModelRunSingleCollection",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "joinExisting" => Self::JoinExisting,
            "joinNew" => Self::JoinNew,
            "union" => Self::Union,
            "tiled" => Self::Tiled,
            "forecastModelRunCollection" => Self::ForecastModelRunCollection,
            "forecastModelRunSingleCollection" => Self::ForecastModelRunSingleCollection,
            other => Self::Other(other.to_string()),
        })
    }
}

impl From<&str> for AggregationType {
    fn from(value: &str) -> Self {
        match value.parse() {
            Ok(parsed) => parsed,
            Err(never) => match never {},
        }
    }
}

impl From<String> for AggregationType {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<AggregationType> for String {
    fn from(value: AggregationType) -> Self {
        match value {
            AggregationType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

// =============================================================================
// TREE
// =============================================================================

/// One `<netcdf location=".."/>` entry inside the aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    location: String,
    ncoords: Option<u64>,
}

impl Member {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            ncoords: None,
        }
    }

    /// Number of coordinate values this member contributes along the join
    /// dimension. Lets the reader skip opening the file to find out.
    pub fn with_ncoords(mut self, ncoords: u64) -> Self {
        self.ncoords = Some(ncoords);
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn ncoords(&self) -> Option<u64> {
        self.ncoords
    }
}

/// Checks a member location before it enters the tree.
///
/// A location must not be blank and may only hold characters of the XML 1.0
/// `Char` production, otherwise the saved file would not be well-formed.
pub fn check_location(location: &str) -> Result<(), &'static str> {
    if location.trim().is_empty() {
        return Err("location cannot be empty");
    }
    if !location.chars().all(is_xml_char) {
        return Err("location contains a character XML 1.0 cannot represent");
    }
    Ok(())
}

fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\t' | '\n' | '\r'
            | '\u{20}'..='\u{D7FF}'
            | '\u{E000}'..='\u{FFFD}'
            | '\u{10000}'..='\u{10FFFF}'
    )
}

/// The `<aggregation>` element and its ordered members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    dimension_name: String,
    aggregation_type: AggregationType,
    members: Vec<Member>,
}

impl Aggregation {
    pub fn new(dimension_name: impl Into<String>, aggregation_type: AggregationType) -> Self {
        Self {
            dimension_name: dimension_name.into(),
            aggregation_type,
            members: Vec::new(),
        }
    }

    pub fn dimension_name(&self) -> &str {
        &self.dimension_name
    }

    pub fn aggregation_type(&self) -> &AggregationType {
        &self.aggregation_type
    }

    pub fn set_dimension_name(&mut self, dimension_name: impl Into<String>) {
        self.dimension_name = dimension_name.into();
    }

    pub fn set_aggregation_type(&mut self, aggregation_type: AggregationType) {
        self.aggregation_type = aggregation_type;
    }

    /// Members in document order.
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Index of the member registered under `location`, compared verbatim.
    pub fn position(&self, location: &str) -> Option<usize> {
        self.members.iter().position(|m| m.location == location)
    }

    pub(crate) fn push(&mut self, member: Member) {
        self.members.push(member);
    }

    pub(crate) fn remove(&mut self, index: usize) -> Member {
        self.members.remove(index)
    }

    pub(crate) fn clear(&mut self) {
        self.members.clear();
    }
}

/// Whole descriptor document: the root `<netcdf>` and its aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcmlDocument {
    namespace: Option<String>,
    aggregation: Aggregation,
}

impl NcmlDocument {
    /// Minimal skeleton with an empty member set.
    pub fn new(dimension_name: impl Into<String>, aggregation_type: AggregationType) -> Self {
        Self {
            namespace: Some(NCML_NAMESPACE.to_string()),
            aggregation: Aggregation::new(dimension_name, aggregation_type),
        }
    }

    /// Namespace bound to the root element, if the file declared one.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn aggregation(&self) -> &Aggregation {
        &self.aggregation
    }

    pub fn aggregation_mut(&mut self) -> &mut Aggregation {
        &mut self.aggregation
    }

    pub fn members(&self) -> &[Member] {
        self.aggregation.members()
    }

    /// Parses raw file contents. See [`NcmlDocument::parse`].
    pub fn from_bytes(
        bytes: &[u8],
        default_dimension: &str,
        default_type: &AggregationType,
    ) -> Result<Self, ParseError> {
        let xml = String::from_utf8(bytes.to_vec())?;
        Self::parse(&xml, default_dimension, default_type)
    }

    /// Parses an NcML document.
    ///
    /// The defaults are used only when the file lacks the corresponding
    /// information: a root without `<aggregation>`, or an aggregation without
    /// `dimName` / `type`. Values stored in the file always win.
    pub fn parse(
        xml: &str,
        default_dimension: &str,
        default_type: &AggregationType,
    ) -> Result<Self, ParseError> {
        let mut reader = Reader::from_str(xml);
        let mut open: Vec<Vec<u8>> = Vec::new();
        let mut builder = TreeBuilder::new(default_dimension, default_type);

        loop {
            let event = match reader.read_event() {
                Ok(event) => event,
                Err(source) => {
                    return Err(ParseError::Syntax {
                        position: reader.buffer_position(),
                        source,
                    });
                }
            };
            match event {
                Event::Start(element) => {
                    builder.open(&element, &open)?;
                    open.push(element.local_name().as_ref().to_vec());
                }
                Event::Empty(element) => builder.open(&element, &open)?,
                Event::End(_) => {
                    open.pop();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if let Some(unclosed) = open.last() {
            return Err(ParseError::structure(format!(
                "document ends inside <{}>",
                String::from_utf8_lossy(unclosed)
            )));
        }
        builder.finish()
    }

    /// Serializes the document as indented UTF-8 XML with a declaration.
    pub fn to_xml(&self) -> io::Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        emit(
            &mut writer,
            Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)),
        )?;

        let mut root = BytesStart::new(ROOT_ELEMENT);
        if let Some(namespace) = &self.namespace {
            root.push_attribute(("xmlns", namespace.as_str()));
        }
        emit(&mut writer, Event::Start(root))?;

        let aggregation = &self.aggregation;
        let mut element = BytesStart::new(AGGREGATION_ELEMENT);
        element.push_attribute(("dimName", aggregation.dimension_name()));
        element.push_attribute(("type", aggregation.aggregation_type().as_str()));

        if aggregation.members.is_empty() {
            emit(&mut writer, Event::Empty(element))?;
        } else {
            emit(&mut writer, Event::Start(element))?;
            for member in &aggregation.members {
                let mut entry = BytesStart::new(MEMBER_ELEMENT);
                entry.push_attribute(("location", member.location()));
                if let Some(ncoords) = member.ncoords() {
                    let ncoords = ncoords.to_string();
                    entry.push_attribute(("ncoords", ncoords.as_str()));
                }
                emit(&mut writer, Event::Empty(entry))?;
            }
            emit(&mut writer, Event::End(BytesEnd::new(AGGREGATION_ELEMENT)))?;
        }

        emit(&mut writer, Event::End(BytesEnd::new(ROOT_ELEMENT)))?;

        let mut xml = String::from_utf8(writer.into_inner()).map_err(io::Error::other)?;
        xml.push('\n');
        Ok(xml)
    }
}

fn emit(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> io::Result<()> {
    writer.write_event(event).map_err(io::Error::other)
}

// =============================================================================
// PARSER STATE
// =============================================================================

struct TreeBuilder<'d> {
    default_dimension: &'d str,
    default_type: &'d AggregationType,
    root_seen: bool,
    namespace: Option<String>,
    aggregation: Option<Aggregation>,
    locations: HashSet<String>,
}

impl<'d> TreeBuilder<'d> {
    fn new(default_dimension: &'d str, default_type: &'d AggregationType) -> Self {
        Self {
            default_dimension,
            default_type,
            root_seen: false,
            namespace: None,
            aggregation: None,
            locations: HashSet::new(),
        }
    }

    /// Handles an opening (or self-closing) tag given its open ancestors.
    fn open(&mut self, element: &BytesStart<'_>, ancestors: &[Vec<u8>]) -> Result<(), ParseError> {
        let local_name = element.local_name();
        match (ancestors, local_name.as_ref()) {
            ([], _) if self.root_seen => Err(ParseError::structure(
                "document has more than one top-level element",
            )),
            ([], b"netcdf") => {
                self.root_seen = true;
                let namespace = root_namespace(element)?;
                if let Some(found) = namespace.as_deref().filter(|ns| *ns != NCML_NAMESPACE) {
                    return Err(ParseError::structure(format!(
                        "root <netcdf> is bound to namespace '{found}', expected '{NCML_NAMESPACE}'"
                    )));
                }
                self.namespace = namespace;
                Ok(())
            }
            ([], other) => Err(ParseError::structure(format!(
                "expected root element <netcdf>, found <{}>",
                String::from_utf8_lossy(other)
            ))),
            ([_], b"aggregation") => {
                if self.aggregation.is_some() {
                    return Err(ParseError::structure(
                        "descriptor declares more than one <aggregation>",
                    ));
                }
                let dimension_name = attribute(element, b"dimName")?
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| self.default_dimension.to_string());
                let aggregation_type = attribute(element, b"type")?
                    .filter(|v| !v.is_empty())
                    .map(AggregationType::from)
                    .unwrap_or_else(|| self.default_type.clone());
                self.aggregation = Some(Aggregation::new(dimension_name, aggregation_type));
                Ok(())
            }
            ([_, parent], b"netcdf") if parent.as_slice() == b"aggregation" => self.member(element),
            (_, other) => {
                tracing::debug!(
                    element = %String::from_utf8_lossy(other),
                    depth = ancestors.len(),
                    "skipping unsupported NcML element"
                );
                Ok(())
            }
        }
    }

    fn member(&mut self, element: &BytesStart<'_>) -> Result<(), ParseError> {
        let Some(location) = attribute(element, b"location")? else {
            return Err(ParseError::structure(
                "aggregation member is missing its location attribute",
            ));
        };
        check_location(&location).map_err(|reason| {
            ParseError::structure(format!("aggregation member {location:?}: {reason}"))
        })?;

        let ncoords = match attribute(element, b"ncoords")? {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                ParseError::structure(format!(
                    "member '{location}' has invalid ncoords '{raw}'"
                ))
            })?),
            None => None,
        };

        if !self.locations.insert(location.clone()) {
            tracing::warn!(%location, "duplicate aggregation member ignored");
            return Ok(());
        }

        let aggregation = self
            .aggregation
            .as_mut()
            .ok_or_else(|| ParseError::structure("member found outside <aggregation>"))?;
        aggregation.push(Member { location, ncoords });
        Ok(())
    }

    fn finish(self) -> Result<NcmlDocument, ParseError> {
        if !self.root_seen {
            return Err(ParseError::structure("document has no root element"));
        }
        let aggregation = match self.aggregation {
            Some(aggregation) => aggregation,
            None => {
                tracing::warn!("descriptor has no <aggregation>, starting an empty one");
                Aggregation::new(self.default_dimension, self.default_type.clone())
            }
        };
        Ok(NcmlDocument {
            namespace: self.namespace,
            aggregation,
        })
    }
}

fn attribute(element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, ParseError> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == name {
            let value = attr.unescape_value().map_err(ParseError::Value)?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

/// Namespace bound to the root's own prefix (or the default namespace).
fn root_namespace(element: &BytesStart<'_>) -> Result<Option<String>, ParseError> {
    let binding = match element.name().prefix() {
        Some(prefix) => [b"xmlns:".as_slice(), prefix.as_ref()].concat(),
        None => b"xmlns".to_vec(),
    };
    attribute(element, &binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SAMPLE: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<netcdf xmlns="http://www.unidata.ucar.edu/namespaces/netcdf/ncml-2.2">
  <aggregation dimName="time" type="joinExisting">
    <netcdf location="/data/a.nc" ncoords="1"/>
    <netcdf location="/data/b.nc"/>
  </aggregation>
</netcdf>
"#;

    fn parse(xml: &str) -> Result<NcmlDocument, ParseError> {
        NcmlDocument::parse(xml, DEFAULT_DIMENSION, &AggregationType::JoinExisting)
    }

    #[test]
    fn parses_members_in_document_order() {
        let doc = parse(SAMPLE).expect("parse");
        let locations: Vec<_> = doc.members().iter().map(Member::location).collect();
        assert_eq!(locations, ["/data/a.nc", "/data/b.nc"]);
        assert_eq!(doc.members()[0].ncoords(), Some(1));
        assert_eq!(doc.members()[1].ncoords(), None);
        assert_eq!(doc.namespace(), Some(NCML_NAMESPACE));
    }

    #[test]
    fn stored_attributes_win_over_defaults() {
        let xml = r#"<netcdf><aggregation dimName="step" type="joinNew"/></netcdf>"#;
        let doc = parse(xml).expect("parse");
        assert_eq!(doc.aggregation().dimension_name(), "step");
        assert_eq!(doc.aggregation().aggregation_type(), &AggregationType::JoinNew);
        assert_eq!(doc.namespace(), None);
    }

    #[test]
    fn missing_aggregation_falls_back_to_defaults() {
        let doc = NcmlDocument::parse("<netcdf/>", "band", &AggregationType::Union).expect("parse");
        assert_eq!(doc.aggregation().dimension_name(), "band");
        assert_eq!(doc.aggregation().aggregation_type(), &AggregationType::Union);
        assert!(doc.members().is_empty());
    }

    #[test]
    fn prefixed_documents_are_accepted() {
        let xml = r#"<ncml:netcdf xmlns:ncml="http://www.unidata.ucar.edu/namespaces/netcdf/ncml-2.2">
  <ncml:aggregation dimName="time" type="joinExisting">
    <ncml:netcdf location="x.nc"/>
  </ncml:aggregation>
</ncml:netcdf>"#;
        let doc = parse(xml).expect("parse");
        assert_eq!(doc.namespace(), Some(NCML_NAMESPACE));
        assert_eq!(doc.members().len(), 1);
    }

    #[test]
    fn duplicate_locations_collapse_to_first() {
        let xml = r#"<netcdf><aggregation dimName="time" type="joinExisting">
<netcdf location="a.nc" ncoords="2"/><netcdf location="b.nc"/><netcdf location="a.nc"/>
</aggregation></netcdf>"#;
        let doc = parse(xml).expect("parse");
        let locations: Vec<_> = doc.members().iter().map(Member::location).collect();
        assert_eq!(locations, ["a.nc", "b.nc"]);
        assert_eq!(doc.members()[0].ncoords(), Some(2));
    }

    #[test]
    fn unknown_elements_are_skipped() {
        let xml = r#"<netcdf><variable name="x"/><aggregation dimName="time" type="joinExisting">
<scan location="/data" suffix=".nc"/><netcdf location="a.nc"><variable name="v"/></netcdf>
</aggregation></netcdf>"#;
        let doc = parse(xml).expect("parse");
        assert_eq!(doc.members().len(), 1);
    }

    #[test]
    fn rejects_structural_problems() {
        assert_matches!(parse(""), Err(ParseError::Structure(_)));
        assert_matches!(parse("<dataset/>"), Err(ParseError::Structure(_)));
        assert_matches!(parse("<netcdf/><netcdf/>"), Err(ParseError::Structure(_)));
        assert_matches!(
            parse(r#"<netcdf><aggregation/><aggregation/></netcdf>"#),
            Err(ParseError::Structure(_))
        );
        assert_matches!(
            parse(r#"<netcdf><aggregation><netcdf/></aggregation></netcdf>"#),
            Err(ParseError::Structure(_))
        );
        assert_matches!(
            parse(r#"<netcdf><aggregation><netcdf location=""/></aggregation></netcdf>"#),
            Err(ParseError::Structure(_))
        );
        assert_matches!(
            parse(r#"<netcdf><aggregation><netcdf location="a" ncoords="x"/></aggregation></netcdf>"#),
            Err(ParseError::Structure(_))
        );
        assert_matches!(parse("<netcdf><aggregation>"), Err(ParseError::Structure(_)));
    }

    #[test]
    fn rejects_locations_that_cannot_be_written_back() {
        let blank = r#"<netcdf><aggregation><netcdf location="   "/></aggregation></netcdf>"#;
        assert_matches!(parse(blank), Err(ParseError::Structure(_)));

        let control_ref = r#"<netcdf><aggregation><netcdf location="a&#1;b.nc"/></aggregation></netcdf>"#;
        assert!(parse(control_ref).is_err());

        let control_raw = "<netcdf><aggregation><netcdf location=\"a\u{1}b.nc\"/></aggregation></netcdf>";
        assert!(parse(control_raw).is_err());
    }

    #[test]
    fn check_location_follows_xml_char_range() {
        assert_eq!(check_location("/data/a b.nc"), Ok(()));
        assert_eq!(check_location("/données/ünïcode.nc"), Ok(()));
        assert_eq!(check_location("tab\there.nc"), Ok(()));
        assert!(check_location("").is_err());
        assert!(check_location(" \t").is_err());
        assert!(check_location("a\u{1}b.nc").is_err());
        assert!(check_location("a\u{0}b.nc").is_err());
        assert!(check_location("a\u{FFFE}b.nc").is_err());
    }

    #[test]
    fn rejects_foreign_root_namespace() {
        let xml = r#"<netcdf xmlns="urn:something-else"><aggregation dimName="time" type="union"/></netcdf>"#;
        assert_matches!(parse(xml), Err(ParseError::Structure(message)) if message.contains("urn:something-else"));

        let prefixed = r#"<x:netcdf xmlns:x="urn:other"><x:aggregation/></x:netcdf>"#;
        assert_matches!(parse(prefixed), Err(ParseError::Structure(_)));
    }

    #[test]
    fn rejects_broken_markup() {
        assert!(parse("<netcdf><aggregation></netcdf>").is_err());
        assert!(parse("<netcdf").is_err());
        assert!(NcmlDocument::from_bytes(&[0xff, 0xfe], "time", &AggregationType::JoinExisting).is_err());
    }

    #[test]
    fn serializes_and_parses_back() {
        let mut doc = NcmlDocument::new("time", AggregationType::JoinExisting);
        doc.aggregation_mut().push(Member::new("/data/a&b.nc").with_ncoords(1));
        doc.aggregation_mut().push(Member::new("/data/\"quoted\".nc"));

        let xml = doc.to_xml().expect("serialize");
        assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(xml.contains(NCML_NAMESPACE));
        assert!(xml.contains("&amp;"));

        let reparsed = parse(&xml).expect("reparse");
        assert_eq!(reparsed, doc);
    }

    #[test]
    fn empty_aggregation_is_self_closing() {
        let doc = NcmlDocument::new("time", AggregationType::Other("custom".into()));
        let xml = doc.to_xml().expect("serialize");
        assert!(xml.contains(r#"<aggregation dimName="time" type="custom"/>"#));
    }

    #[test]
    fn aggregation_type_round_trips_unknown_identifiers() {
        assert_eq!(AggregationType::from("joinExisting"), AggregationType::JoinExisting);
        assert_eq!(AggregationType::from("tiled"), AggregationType::Tiled);
        let custom = AggregationType::from("myJoin");
        assert_eq!(custom.as_str(), "myJoin");
        assert_eq!(String::from(custom), "myJoin");
        assert_eq!(AggregationType::default().to_string(), "joinExisting");
    }
}
