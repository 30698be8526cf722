//! Input-schema projection and argument binding for tool calls.
//!
//! A declared parameter's name is its argument key over the transport.
//! Parameters declared only with `--argument` derive their name by stripping
//! the dashes, and dotted names (conditional grouping) are rewritten with
//! underscores to fit flat-key RPCs. The same rules run in reverse when a
//! call's arguments are bound back onto the declarations.

use serde_json::{Map, Value, json};

use crate::descriptor::{ParamDecl, ParamKind, ToolDescriptor};
use crate::error::Result;
use crate::params::ToolParam;

/// JSON schema for the `find_tools` baseline tool.
pub fn find_tools_schema() -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "query".to_string(),
        json!({
            "type": "string",
            "description": "Natural-language description of the task to find tools for"
        }),
    );

    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert("required".to_string(), json!(["query"]));
    schema
}

/// Project a descriptor's declared inputs into a flat JSON input schema.
pub fn input_schema_for(tool: &ToolDescriptor) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for decl in &tool.inputs.params {
        let Some(name) = decl.effective_name() else {
            continue;
        };
        let key = flat_key(&name);
        properties.insert(key.clone(), property_for(decl));
        if !decl.optional {
            required.push(Value::String(key));
        }
    }

    for conditional in &tool.inputs.conditionals {
        if let Some(pivot_name) = conditional.param.effective_name() {
            properties.insert(
                flat_key(&format!("{}.{}", conditional.name, pivot_name)),
                property_for(&conditional.param),
            );
        }
        for when in &conditional.whens {
            for decl in &when.params {
                let Some(name) = decl.effective_name() else {
                    continue;
                };
                properties
                    .entry(flat_key(&format!("{}.{}", conditional.name, name)))
                    .or_insert_with(|| property_for(decl));
            }
        }
    }

    let mut schema = Map::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".to_string(), Value::Array(required));
    }
    schema
}

/// Bind call arguments onto the declarations, yielding typed params.
pub fn project_params(tool: &ToolDescriptor, args: &Map<String, Value>) -> Result<Vec<ToolParam>> {
    let mut params = Vec::new();

    for decl in &tool.inputs.params {
        let Some(name) = decl.effective_name() else {
            continue;
        };
        if let Some(value) = lookup_arg(args, &name) {
            params.push(ToolParam::coerce(decl, value)?);
        }
    }

    for conditional in &tool.inputs.conditionals {
        let mut group: Vec<(&ParamDecl, String)> = Vec::new();
        if let Some(pivot_name) = conditional.param.effective_name() {
            group.push((&conditional.param, pivot_name));
        }
        for when in &conditional.whens {
            for decl in &when.params {
                if let Some(name) = decl.effective_name() {
                    group.push((decl, name));
                }
            }
        }

        for (decl, name) in group {
            let dotted = format!("{}.{}", conditional.name, name);
            if let Some(value) = lookup_arg(args, &dotted) {
                let mut bound = decl.clone();
                bound.name = Some(dotted);
                bound.argument = None;
                params.push(ToolParam::coerce(&bound, value)?);
            }
        }
    }

    Ok(params)
}

/// Look an argument up under its declared name or its flat-key spelling.
/// JSON nulls count as absent.
fn lookup_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    args.get(name)
        .or_else(|| args.get(&flat_key(name)))
        .filter(|v| !v.is_null())
}

fn flat_key(name: &str) -> String {
    name.replace('.', "_")
}

fn property_for(decl: &ParamDecl) -> Value {
    let description = decl
        .help
        .clone()
        .or_else(|| decl.label.clone())
        .unwrap_or_default();

    match decl.kind {
        ParamKind::Data => json!({
            "type": "string",
            "description": if description.is_empty() {
                "Object-store handle of an uploaded file".to_string()
            } else {
                format!("{description} (object-store handle of an uploaded file)")
            },
        }),
        ParamKind::Text => json!({ "type": "string", "description": description }),
        ParamKind::Integer => {
            let mut prop = json!({ "type": "integer", "description": description });
            if let Some(min) = decl.min {
                prop["minimum"] = json!(min as i64);
            }
            if let Some(max) = decl.max {
                prop["maximum"] = json!(max as i64);
            }
            prop
        }
        ParamKind::Float => {
            let mut prop = json!({ "type": "number", "description": description });
            if let Some(min) = decl.min {
                prop["minimum"] = json!(min);
            }
            if let Some(max) = decl.max {
                prop["maximum"] = json!(max);
            }
            prop
        }
        ParamKind::Boolean => json!({ "type": "boolean", "description": description }),
        ParamKind::Select if decl.multiple => {
            let values: Vec<&str> = decl.options.iter().map(|o| o.value.as_str()).collect();
            json!({
                "type": "string",
                "description": format!(
                    "{description} (comma-separated subset of: {})",
                    values.join(", ")
                ),
            })
        }
        ParamKind::Select => {
            let values: Vec<&str> = decl.options.iter().map(|o| o.value.as_str()).collect();
            json!({
                "type": "string",
                "enum": values,
                "description": description,
            })
        }
    }
}
