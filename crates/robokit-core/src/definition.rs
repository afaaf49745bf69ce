//! Declarative unit definitions.
//!
//! A definition document lists the units of a system together with their
//! configuration:
//!
//! ```xml
//! <units>
//!   <unit id="producer">
//!     <type>string-producer</type>
//!     <config name="default">
//!       <value name="target" type="String">consumer</value>
//!       <value name="period_ms" type="int">250</value>
//!       <config name="retry">
//!         <value name="attempts" type="int">3</value>
//!       </config>
//!       <list name="steps">
//!         <config><value name="angle" type="double">12.5</value></config>
//!       </list>
//!     </config>
//!   </unit>
//!   <unit id="consumer">
//!     <type>string-consumer</type>
//!   </unit>
//! </units>
//! ```
//!
//! | Value `type` | Stored as |
//! |---|---|
//! | `String`, `string` (default) | [`ConfigValue::String`], trimmed |
//! | `int`, `integer`, `long`, `short` (any case) | [`ConfigValue::Integer`] |
//! | `float`, `double` (any case) | [`ConfigValue::Float`] |
//! | `boolean`, `bool` (any case) | [`ConfigValue::Boolean`] |
//!
//! A unit without a `<config>` block is added but never initialized.  A
//! declaration missing its id or its type is logged and skipped; unknown
//! elements are logged and ignored together with their content.
//!
//! Parsing is a small state machine fed with element and text events.  Text
//! may arrive in several fragments per element; fragments are concatenated.

use robokit_types::{ConfigValue, Configuration, ConfigurationBuilder, DefinitionError};
use tracing::{error, warn};

/// One `<unit>` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub id: String,
    pub type_name: String,
    /// `None` when the declaration has no `<config>` block.
    pub config: Option<Configuration>,
}

/// Parse `source` and return every complete declaration, in document order.
///
/// # Errors
///
/// [`DefinitionError`] for malformed documents.
pub fn declarations(source: &str) -> Result<Vec<Declaration>, DefinitionError> {
    let mut found = Vec::new();
    parse(source, |declaration| {
        found.push(declaration);
        Ok::<(), DefinitionError>(())
    })?;
    Ok(found)
}

/// Parse `source` and hand each complete declaration to `sink`, in document
/// order.  The whole document is parsed before the first declaration is
/// handed over; the first error from `sink` stops the walk.
pub(crate) fn parse<E, F>(source: &str, mut sink: F) -> Result<(), E>
where
    E: From<DefinitionError>,
    F: FnMut(Declaration) -> Result<(), E>,
{
    let document = roxmltree::Document::parse(source)
        .map_err(|e| DefinitionError::Malformed(e.to_string()))?;
    let mut machine = StateMachine::new();
    walk(document.root_element(), &mut machine, &mut sink)
}

fn walk<E, F>(node: roxmltree::Node<'_, '_>, machine: &mut StateMachine, sink: &mut F) -> Result<(), E>
where
    E: From<DefinitionError>,
    F: FnMut(Declaration) -> Result<(), E>,
{
    machine.start_element(node.tag_name().name(), |key| node.attribute(key))?;
    for child in node.children() {
        if child.is_element() {
            walk(child, machine, sink)?;
        } else if child.is_text() {
            machine.text(child.text().unwrap_or_default());
        }
    }
    if let Some(declaration) = machine.end_element()? {
        sink(declaration)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

const KNOWN_ELEMENTS: [&str; 6] = ["units", "unit", "type", "config", "list", "value"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl ValueKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "string" => Some(ValueKind::String),
            "int" | "integer" | "long" | "short" => Some(ValueKind::Integer),
            "float" | "double" => Some(ValueKind::Float),
            "boolean" | "bool" => Some(ValueKind::Boolean),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::Boolean => "boolean",
        }
    }

    fn convert(self, name: &str, text: &str) -> Result<ConfigValue, DefinitionError> {
        let text = text.trim();
        let invalid = || DefinitionError::InvalidValue {
            name: name.to_string(),
            kind: self.as_str().to_string(),
            value: text.to_string(),
        };
        match self {
            ValueKind::String => Ok(ConfigValue::String(text.to_string())),
            ValueKind::Integer => text.parse().map(ConfigValue::Integer).map_err(|_| invalid()),
            ValueKind::Float => text.parse().map(ConfigValue::Float).map_err(|_| invalid()),
            ValueKind::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" => Ok(ConfigValue::Boolean(true)),
                "false" => Ok(ConfigValue::Boolean(false)),
                _ => Err(invalid()),
            },
        }
    }
}

#[derive(Debug)]
enum Frame {
    Root,
    Units,
    Unit {
        id: Option<String>,
        type_name: Option<String>,
        config: Option<Configuration>,
        /// First bad value inside the declaration; reported only if the
        /// declaration is otherwise complete.
        invalid: Option<DefinitionError>,
    },
    Type {
        text: String,
    },
    Config {
        name: String,
        builder: ConfigurationBuilder,
    },
    List {
        name: String,
        items: Vec<Configuration>,
    },
    Value {
        name: String,
        kind: ValueKind,
        text: String,
    },
    Ignored,
}

impl Frame {
    fn element(&self) -> &'static str {
        match self {
            Frame::Root => "document",
            Frame::Units => "units",
            Frame::Unit { .. } => "unit",
            Frame::Type { .. } => "type",
            Frame::Config { .. } => "config",
            Frame::List { .. } => "list",
            Frame::Value { .. } => "value",
            Frame::Ignored => "ignored",
        }
    }
}

struct StateMachine {
    stack: Vec<Frame>,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            stack: vec![Frame::Root],
        }
    }

    fn top(&self) -> &Frame {
        static ROOT: Frame = Frame::Root;
        // The root frame is never popped.
        self.stack.last().unwrap_or(&ROOT)
    }

    fn start_element<'a>(
        &mut self,
        name: &str,
        attribute: impl Fn(&str) -> Option<&'a str>,
    ) -> Result<(), DefinitionError> {
        let attr = |key: &str| {
            attribute(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let named = |what: &str| {
            attr("name").ok_or_else(|| {
                DefinitionError::Malformed(format!("<{what}> without a name attribute"))
            })
        };

        let mut deferred = None;
        let frame = match (self.top(), name) {
            (Frame::Ignored, _) => Frame::Ignored,
            (Frame::Root, "units") => Frame::Units,
            (Frame::Root, other) => {
                return Err(DefinitionError::Malformed(format!(
                    "expected <units> as the document element, found <{other}>"
                )));
            }
            (Frame::Units, "unit") => Frame::Unit {
                id: attr("id"),
                type_name: None,
                config: None,
                invalid: None,
            },
            (Frame::Unit { .. }, "type") => Frame::Type {
                text: String::new(),
            },
            (Frame::Unit { .. }, "config") => Frame::Config {
                name: attr("name").unwrap_or_else(|| "default".to_string()),
                builder: ConfigurationBuilder::new(),
            },
            (Frame::Config { .. }, "config") => Frame::Config {
                name: named("config")?,
                builder: ConfigurationBuilder::new(),
            },
            (Frame::Config { .. }, "list") => Frame::List {
                name: named("list")?,
                items: Vec::new(),
            },
            (Frame::Config { .. }, "value") => {
                let name = named("value")?;
                let kind = match attr("type") {
                    None => Some(ValueKind::String),
                    Some(kind) => ValueKind::parse(&kind).or_else(|| {
                        deferred = Some(DefinitionError::UnknownValueType {
                            name: name.clone(),
                            kind,
                        });
                        None
                    }),
                };
                match kind {
                    Some(kind) => Frame::Value {
                        name,
                        kind,
                        text: String::new(),
                    },
                    None => Frame::Ignored,
                }
            }
            (Frame::List { .. }, "config") => Frame::Config {
                name: String::new(),
                builder: ConfigurationBuilder::new(),
            },
            (parent, element) if KNOWN_ELEMENTS.contains(&element) => {
                return Err(DefinitionError::UnexpectedElement {
                    element: element.to_string(),
                    parent: parent.element().to_string(),
                });
            }
            (parent, element) => {
                warn!(element, parent = parent.element(), "ignoring unknown definition element");
                Frame::Ignored
            }
        };
        if let Some(error) = deferred {
            self.defer(error);
        }
        self.stack.push(frame);
        Ok(())
    }

    /// Attach a value error to the innermost unit declaration.
    fn defer(&mut self, error: DefinitionError) {
        let unit = self.stack.iter_mut().rev().find_map(|frame| match frame {
            Frame::Unit { invalid, .. } => Some(invalid),
            _ => None,
        });
        if let Some(invalid) = unit
            && invalid.is_none()
        {
            *invalid = Some(error);
        }
    }

    fn text(&mut self, fragment: &str) {
        match self.stack.last_mut() {
            Some(Frame::Type { text }) | Some(Frame::Value { text, .. }) => text.push_str(fragment),
            _ => {}
        }
    }

    fn end_element(&mut self) -> Result<Option<Declaration>, DefinitionError> {
        if self.stack.len() <= 1 {
            return Err(DefinitionError::Malformed("unbalanced end of element".to_string()));
        }
        let Some(frame) = self.stack.pop() else {
            return Ok(None);
        };
        match frame {
            Frame::Type { text } => {
                if let Some(Frame::Unit { type_name, .. }) = self.stack.last_mut() {
                    let text = text.trim();
                    *type_name = (!text.is_empty()).then(|| text.to_string());
                }
                Ok(None)
            }
            Frame::Value { name, kind, text } => {
                match kind.convert(&name, &text) {
                    Ok(value) => {
                        if let Some(Frame::Config { builder, .. }) = self.stack.last_mut() {
                            builder.insert(name, value);
                        }
                    }
                    Err(e) => self.defer(e),
                }
                Ok(None)
            }
            Frame::Config { name, builder } => {
                let config = builder.build();
                match self.stack.last_mut() {
                    Some(Frame::Unit { id, config: slot, .. }) => {
                        if slot.is_some() {
                            warn!(unit = ?id, "unit declares more than one config block; keeping the last");
                        }
                        *slot = Some(config);
                    }
                    Some(Frame::Config { builder, .. }) => {
                        builder.insert(name, ConfigValue::Config(config));
                    }
                    Some(Frame::List { items, .. }) => items.push(config),
                    _ => {}
                }
                Ok(None)
            }
            Frame::List { name, items } => {
                if let Some(Frame::Config { builder, .. }) = self.stack.last_mut() {
                    builder.insert(name, ConfigValue::List(items));
                }
                Ok(None)
            }
            Frame::Unit {
                id,
                type_name,
                config,
                invalid,
            } => match (declaration(id, type_name, config), invalid) {
                (Some(_), Some(e)) => Err(e),
                (found, _) => Ok(found),
            },
            Frame::Root | Frame::Units | Frame::Ignored => Ok(None),
        }
    }
}

fn declaration(
    id: Option<String>,
    type_name: Option<String>,
    config: Option<Configuration>,
) -> Option<Declaration> {
    match (id, type_name) {
        (Some(id), Some(type_name)) => Some(Declaration {
            id,
            type_name,
            config,
        }),
        (None, type_name) => {
            error!(type_name = ?type_name, "unit declaration without an id; skipped");
            None
        }
        (Some(id), None) => {
            error!(unit = %id, "unit declaration without a type; skipped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0"?>
        <units>
          <unit id="producer">
            <type>string-producer</type>
            <config name="default">
              <value name="target" type="String"> consumer </value>
              <value name="period_ms" type="int">250</value>
              <value name="gain" type="double">0.75</value>
              <value name="verbose" type="boolean">true</value>
              <value name="label">front panel</value>
              <config name="retry">
                <value name="attempts" type="Integer">3</value>
              </config>
              <list name="steps">
                <config><value name="angle" type="float">12.5</value></config>
                <config><value name="angle" type="float">-4</value></config>
              </list>
            </config>
          </unit>
          <unit id="consumer">
            <type>string-consumer</type>
          </unit>
        </units>"#;

    #[test]
    fn parses_units_in_document_order() {
        let found = declarations(SAMPLE).unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["producer", "consumer"]);
        assert_eq!(found[1].type_name, "string-consumer");
        assert!(found[1].config.is_none());
    }

    #[test]
    fn typed_values_and_nesting() {
        let found = declarations(SAMPLE).unwrap();
        let config = found[0].config.as_ref().unwrap();
        assert_eq!(config.require_string("target").unwrap(), "consumer");
        assert_eq!(config.require_i64("period_ms").unwrap(), 250);
        assert_eq!(config.require_f64("gain").unwrap(), 0.75);
        assert!(config.require_bool("verbose").unwrap());
        assert_eq!(config.get_string("label", ""), "front panel");
        assert_eq!(config.require_child("retry").unwrap().get_i64("attempts", 0), 3);
        let steps = config.children("steps");
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].get_f64("angle", 0.0), -4.0);
    }

    #[test]
    fn fragmented_text_is_concatenated() {
        let mut machine = StateMachine::new();
        let none = |_: &str| None::<&str>;
        let id = |key: &str| (key == "id").then_some("lcd");
        machine.start_element("units", none).unwrap();
        machine.start_element("unit", id).unwrap();
        machine.start_element("type", none).unwrap();
        machine.text("disp");
        machine.text("lay-un");
        machine.text("it");
        assert_eq!(machine.end_element().unwrap(), None);
        let declaration = machine.end_element().unwrap().unwrap();
        assert_eq!(declaration.type_name, "display-unit");
        assert_eq!(declaration.id, "lcd");
    }

    #[test]
    fn declaration_without_id_or_type_is_skipped() {
        let doc = r#"
            <units>
              <unit><type>lcd</type></unit>
              <unit id="  "><type>lcd</type></unit>
              <unit id="no-type"></unit>
              <unit id="ok"><type>lcd</type></unit>
            </units>"#;
        let found = declarations(doc).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "ok");
    }

    #[test]
    fn unknown_elements_are_ignored() {
        let doc = r#"
            <units>
              <comment><unit id="hidden"><type>x</type></unit></comment>
              <unit id="a"><type>x</type><notes>hello</notes></unit>
            </units>"#;
        let found = declarations(doc).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "a");
    }

    #[test]
    fn misplaced_element_is_rejected() {
        let doc = r#"<units><value name="x">1</value></units>"#;
        let err = declarations(doc).unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UnexpectedElement {
                element: "value".to_string(),
                parent: "units".to_string(),
            }
        );
    }

    #[test]
    fn invalid_typed_value_is_rejected() {
        let doc = r#"
            <units><unit id="a"><type>x</type>
              <config><value name="address" type="int">0x20</value></config>
            </unit></units>"#;
        let err = declarations(doc).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidValue { name, .. } if name == "address"));
    }

    #[test]
    fn unknown_value_type_is_rejected() {
        let doc = r#"
            <units><unit id="a"><type>x</type>
              <config><value name="when" type="date">today</value></config>
            </unit></units>"#;
        let err = declarations(doc).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownValueType { .. }));
    }

    #[test]
    fn bad_values_in_skipped_declarations_are_not_reported() {
        let doc = r#"
            <units>
              <unit><type>x</type>
                <config><value name="n" type="int">abc</value></config>
              </unit>
              <unit id="no-type">
                <config><value name="when" type="date">today</value></config>
              </unit>
              <unit id="ok"><type>x</type></unit>
            </units>"#;
        let found = declarations(doc).unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[test]
    fn nested_bad_value_fails_its_declaration() {
        let doc = r#"
            <units><unit id="a"><type>x</type>
              <config>
                <list name="steps">
                  <config><value name="angle" type="float">steep</value></config>
                </list>
              </config>
            </unit></units>"#;
        let err = declarations(doc).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidValue { name, .. } if name == "angle"));
    }

    #[test]
    fn wrong_document_element_is_malformed() {
        let err = declarations("<robots/>").unwrap_err();
        assert!(matches!(err, DefinitionError::Malformed(_)));
        let err = declarations("<units><unit>").unwrap_err();
        assert!(matches!(err, DefinitionError::Malformed(_)));
    }

    #[test]
    fn sink_error_stops_parsing() {
        let mut seen = Vec::new();
        let result: Result<(), DefinitionError> = parse(SAMPLE, |d| {
            seen.push(d.id);
            Err(DefinitionError::Malformed("stop".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(seen, vec!["producer".to_string()]);
    }
}
