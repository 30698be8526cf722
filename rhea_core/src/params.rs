//! # Typed Parameter Model
//!
//! Coercion of loosely-typed user arguments into the typed, validated
//! parameter variants the worker consumes, and rendering of those variants
//! back into environment-map entries for the command templater.
//!
//! Coercion is strict where the descriptor is strict (`BadValue` carries the
//! parameter name) and forgiving where tool authors historically are:
//! numerics accept lexical strings, booleans accept the literal words, and a
//! select falls back to its flagged default when the exact value is absent.

use serde_json::Value;

use crate::descriptor::{ParamDecl, ParamKind};
use crate::error::{Result, RheaError};
use rhea_common::Handle;

/// A validated, typed parameter bound to a concrete value.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolParam {
    /// A file input carried as a content-addressed handle. The local path is
    /// bound at staging time by the worker.
    File {
        name: String,
        handle: Handle,
        filename: Option<String>,
        format: Option<String>,
    },
    Text {
        name: String,
        value: String,
    },
    Integer {
        name: String,
        value: i64,
    },
    Float {
        name: String,
        value: f64,
    },
    Boolean {
        name: String,
        value: bool,
        truevalue: String,
        falsevalue: String,
    },
    Select {
        name: String,
        value: String,
    },
    MultiSelect {
        name: String,
        values: Vec<String>,
    },
}

impl ToolParam {
    pub fn name(&self) -> &str {
        match self {
            ToolParam::File { name, .. }
            | ToolParam::Text { name, .. }
            | ToolParam::Integer { name, .. }
            | ToolParam::Float { name, .. }
            | ToolParam::Boolean { name, .. }
            | ToolParam::Select { name, .. }
            | ToolParam::MultiSelect { name, .. } => name,
        }
    }

    /// Coerce a raw argument value against its declaration.
    pub fn coerce(decl: &ParamDecl, value: &Value) -> Result<ToolParam> {
        let name = decl
            .effective_name()
            .ok_or_else(|| RheaError::bad_value("<unnamed>", "declaration has no name"))?;

        match decl.kind {
            ParamKind::Data => coerce_file(decl, &name, value),
            ParamKind::Text => coerce_text(decl, &name, value),
            ParamKind::Integer => coerce_integer(decl, &name, value),
            ParamKind::Float => coerce_float(decl, &name, value),
            ParamKind::Boolean => coerce_boolean(decl, &name, value),
            ParamKind::Select if decl.multiple => coerce_multi_select(decl, &name, value),
            ParamKind::Select => coerce_select(decl, &name, value),
        }
    }

    /// Render the value for the worker's environment map. `None` for files,
    /// whose rendering is the staged local path chosen by the worker.
    pub fn render(&self) -> Option<String> {
        match self {
            ToolParam::File { .. } => None,
            ToolParam::Text { value, .. } => Some(value.clone()),
            ToolParam::Integer { value, .. } => Some(value.to_string()),
            ToolParam::Float { value, .. } => Some(format_float(*value)),
            ToolParam::Boolean {
                value,
                truevalue,
                falsevalue,
                ..
            } => Some(if *value {
                truevalue.clone()
            } else {
                falsevalue.clone()
            }),
            ToolParam::Select { value, .. } => Some(value.clone()),
            ToolParam::MultiSelect { values, .. } => Some(values.join(",")),
        }
    }
}

fn coerce_file(decl: &ParamDecl, name: &str, value: &Value) -> Result<ToolParam> {
    let Some(key) = value.as_str() else {
        return Err(RheaError::bad_value(
            name,
            "file parameter requires an object-store handle",
        ));
    };
    if key.is_empty() {
        return Err(RheaError::bad_value(name, "empty object-store handle"));
    }
    Ok(ToolParam::File {
        name: name.to_string(),
        handle: Handle::new(key),
        filename: None,
        format: decl.format.clone(),
    })
}

fn coerce_text(decl: &ParamDecl, name: &str, value: &Value) -> Result<ToolParam> {
    match value {
        Value::Null if decl.optional => Ok(ToolParam::Text {
            name: name.to_string(),
            value: String::new(),
        }),
        Value::String(s) => Ok(ToolParam::Text {
            name: name.to_string(),
            value: s.clone(),
        }),
        _ => Err(RheaError::bad_value(name, "expected a string")),
    }
}

fn coerce_integer(decl: &ParamDecl, name: &str, value: &Value) -> Result<ToolParam> {
    let parsed = match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| RheaError::bad_value(name, "expected an integer"))?,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| RheaError::bad_value(name, "not parseable as an integer"))?,
        _ => return Err(RheaError::bad_value(name, "expected an integer")),
    };
    check_range(decl, name, parsed as f64)?;
    Ok(ToolParam::Integer {
        name: name.to_string(),
        value: parsed,
    })
}

fn coerce_float(decl: &ParamDecl, name: &str, value: &Value) -> Result<ToolParam> {
    let parsed = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| RheaError::bad_value(name, "expected a number"))?,
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| RheaError::bad_value(name, "not parseable as a number"))?,
        _ => return Err(RheaError::bad_value(name, "expected a number")),
    };
    check_range(decl, name, parsed)?;
    Ok(ToolParam::Float {
        name: name.to_string(),
        value: parsed,
    })
}

fn coerce_boolean(decl: &ParamDecl, name: &str, value: &Value) -> Result<ToolParam> {
    let parsed = match value {
        Value::Bool(b) => *b,
        Value::String(s) if s.eq_ignore_ascii_case("true") => true,
        Value::String(s) if s.eq_ignore_ascii_case("false") => false,
        _ => return Err(RheaError::bad_value(name, "expected a boolean")),
    };
    Ok(ToolParam::Boolean {
        name: name.to_string(),
        value: parsed,
        truevalue: decl.truevalue.clone().unwrap_or_else(|| "true".to_string()),
        falsevalue: decl
            .falsevalue
            .clone()
            .unwrap_or_else(|| "false".to_string()),
    })
}

fn coerce_select(decl: &ParamDecl, name: &str, value: &Value) -> Result<ToolParam> {
    if decl.options.is_empty() {
        return Err(RheaError::bad_value(name, "select has no options"));
    }

    // An explicitly provided value must name a declared option.
    if let Some(requested) = value.as_str() {
        return match decl.options.iter().find(|o| o.value == requested) {
            Some(option) => Ok(ToolParam::Select {
                name: name.to_string(),
                value: option.value.clone(),
            }),
            None => Err(RheaError::bad_value(
                name,
                format!("'{requested}' not in select options"),
            )),
        };
    }

    // Value absent: fall back to the option flagged as selected.
    if let Some(option) = decl.options.iter().find(|o| o.selected) {
        return Ok(ToolParam::Select {
            name: name.to_string(),
            value: option.value.clone(),
        });
    }

    if decl.optional {
        return Ok(ToolParam::Select {
            name: name.to_string(),
            value: String::new(),
        });
    }

    Err(RheaError::bad_value(
        name,
        format!("value {value} not in select options"),
    ))
}

fn coerce_multi_select(decl: &ParamDecl, name: &str, value: &Value) -> Result<ToolParam> {
    let Some(joined) = value.as_str() else {
        return Err(RheaError::bad_value(
            name,
            "multi-select expects a comma-separated string",
        ));
    };
    let mut values = Vec::new();
    for element in joined.split(',') {
        match coerce_select(decl, name, &Value::String(element.trim().to_string()))? {
            ToolParam::Select { value, .. } => values.push(value),
            _ => unreachable!(),
        }
    }
    if values.is_empty() {
        return Err(RheaError::bad_value(name, "multi-select resolved empty"));
    }
    Ok(ToolParam::MultiSelect {
        name: name.to_string(),
        values,
    })
}

fn check_range(decl: &ParamDecl, name: &str, value: f64) -> Result<()> {
    if let Some(min) = decl.min
        && value < min
    {
        return Err(RheaError::bad_value(name, format!("{value} below minimum {min}")));
    }
    if let Some(max) = decl.max
        && value > max
    {
        return Err(RheaError::bad_value(name, format!("{value} above maximum {max}")));
    }
    Ok(())
}

/// Decimal text without a trailing `.0` surprise for whole floats.
fn format_float(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::SelectOption;
    use serde_json::json;

    fn decl(kind: ParamKind) -> ParamDecl {
        ParamDecl {
            name: Some("p".to_string()),
            argument: None,
            kind,
            format: None,
            label: None,
            help: None,
            optional: false,
            multiple: false,
            value: None,
            truevalue: None,
            falsevalue: None,
            checked: None,
            min: None,
            max: None,
            options: Vec::new(),
        }
    }

    fn select_decl(optional: bool) -> ParamDecl {
        let mut d = decl(ParamKind::Select);
        d.optional = optional;
        d.options = vec![
            SelectOption {
                value: "a".to_string(),
                text: None,
                selected: true,
            },
            SelectOption {
                value: "b".to_string(),
                text: None,
                selected: false,
            },
        ];
        d
    }

    #[test]
    fn integer_accepts_lexical_strings() {
        let p = ToolParam::coerce(&decl(ParamKind::Integer), &json!("42")).unwrap();
        assert_eq!(p, ToolParam::Integer { name: "p".into(), value: 42 });
        assert!(ToolParam::coerce(&decl(ParamKind::Integer), &json!("4.2")).is_err());
    }

    #[test]
    fn integer_respects_declared_bounds() {
        let mut d = decl(ParamKind::Integer);
        d.min = Some(1.0);
        d.max = Some(10.0);
        assert!(ToolParam::coerce(&d, &json!(5)).is_ok());
        assert!(ToolParam::coerce(&d, &json!(0)).is_err());
        assert!(ToolParam::coerce(&d, &json!(11)).is_err());
    }

    #[test]
    fn boolean_accepts_literal_words_case_insensitive() {
        let d = decl(ParamKind::Boolean);
        for (raw, expected) in [(json!(true), true), (json!("TRUE"), true), (json!("false"), false)] {
            match ToolParam::coerce(&d, &raw).unwrap() {
                ToolParam::Boolean { value, .. } => assert_eq!(value, expected),
                other => panic!("unexpected variant: {other:?}"),
            }
        }
        assert!(ToolParam::coerce(&d, &json!("yes")).is_err());
    }

    #[test]
    fn boolean_renders_declared_true_false_strings() {
        let mut d = decl(ParamKind::Boolean);
        d.truevalue = Some("--header".to_string());
        d.falsevalue = Some(String::new());
        let on = ToolParam::coerce(&d, &json!(true)).unwrap();
        let off = ToolParam::coerce(&d, &json!(false)).unwrap();
        assert_eq!(on.render().as_deref(), Some("--header"));
        assert_eq!(off.render().as_deref(), Some(""));
    }

    #[test]
    fn select_falls_back_to_flagged_default() {
        // Seed scenario: options [a (selected), b], optional.
        let d = select_decl(true);
        let p = ToolParam::coerce(&d, &Value::Null).unwrap();
        assert_eq!(p.render().as_deref(), Some("a"));
    }

    #[test]
    fn select_rejects_values_outside_the_declared_options() {
        // An explicit unknown value is a BadValue even when a flagged
        // default exists; the fallback is only for absent values.
        let d = select_decl(true);
        let err = ToolParam::coerce(&d, &json!("c")).unwrap_err();
        assert!(matches!(err, RheaError::BadValue { .. }));

        // Absent value, no flagged default, not optional: BadValue too.
        let mut d = select_decl(false);
        d.options[0].selected = false;
        let err = ToolParam::coerce(&d, &Value::Null).unwrap_err();
        assert!(matches!(err, RheaError::BadValue { .. }));

        // Absent value, no flagged default, optional: empty.
        let mut d = select_decl(true);
        d.options[0].selected = false;
        let p = ToolParam::coerce(&d, &Value::Null).unwrap();
        assert_eq!(p.render().as_deref(), Some(""));
    }

    #[test]
    fn multi_select_splits_on_comma() {
        let mut d = select_decl(false);
        d.multiple = true;
        let p = ToolParam::coerce(&d, &json!("a,b")).unwrap();
        assert_eq!(p.render().as_deref(), Some("a,b"));
    }

    #[test]
    fn optional_text_renders_empty_for_null() {
        let mut d = decl(ParamKind::Text);
        d.optional = true;
        let p = ToolParam::coerce(&d, &Value::Null).unwrap();
        assert_eq!(p.render().as_deref(), Some(""));
    }

    #[test]
    fn file_requires_a_handle_string() {
        let d = decl(ParamKind::Data);
        assert!(ToolParam::coerce(&d, &json!(5)).is_err());
        let p = ToolParam::coerce(&d, &json!("abcdef123")).unwrap();
        match p {
            ToolParam::File { handle, .. } => assert_eq!(handle.as_str(), "abcdef123"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn coercion_is_idempotent_through_render() {
        // coerce(decl, render(coerce(decl, v))) == coerce(decl, v)
        let d = decl(ParamKind::Integer);
        let first = ToolParam::coerce(&d, &json!("7")).unwrap();
        let rendered = first.render().unwrap();
        let second = ToolParam::coerce(&d, &json!(rendered)).unwrap();
        assert_eq!(first, second);

        let d = select_decl(true);
        let first = ToolParam::coerce(&d, &json!("b")).unwrap();
        let second = ToolParam::coerce(&d, &json!(first.render().unwrap())).unwrap();
        assert_eq!(first, second);
    }
}
