//! # Tool Descriptor Model and Catalog
//!
//! Data structures for the declarative tool descriptors the core consumes.
//! Descriptors are produced by an external parser from XML-like definitions
//! and handed to the server as a JSON catalog; they are read-only for the
//! server's lifetime.
//!
//! ## Core Data Structures
//!
//! - **`ToolDescriptor`**: one executable tool — identity, declared inputs
//!   (flat params plus conditional groups), declared outputs (data and
//!   collection), package requirements, the templated command string,
//!   configfile templates, and embedded test cases.
//! - **`ToolCatalog`**: the build-once map of all descriptors shared across
//!   sessions. A reload swaps the whole map behind a single pointer
//!   exchange; individual descriptors are never mutated.

use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, RwLock},
};

/// Declared parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// A file input, passed by object-store handle.
    Data,
    Text,
    Integer,
    Float,
    Boolean,
    Select,
}

/// One option of a select parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub selected: bool,
}

/// A single declared input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDecl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Command-line argument spelling (e.g. `--header`). When `name` is
    /// absent the name is derived by stripping the leading dashes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    #[serde(rename = "type")]
    pub kind: ParamKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(default)]
    pub optional: bool,
    /// Select with `multiple` accepts a comma-separated list of values.
    #[serde(default)]
    pub multiple: bool,
    /// Declared default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truevalue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub falsevalue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<SelectOption>,
}

impl ParamDecl {
    /// The effective parameter name: declared `name`, or the `argument`
    /// spelling with leading dashes stripped.
    pub fn effective_name(&self) -> Option<String> {
        if let Some(name) = &self.name {
            return Some(name.clone());
        }
        self.argument
            .as_ref()
            .map(|arg| arg.trim_start_matches('-').to_string())
    }
}

/// One branch of a conditional parameter group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct When {
    pub value: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
}

/// A pivot parameter selecting one of several nested parameter groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conditional {
    pub name: String,
    pub param: ParamDecl,
    #[serde(default)]
    pub whens: Vec<When>,
}

/// Declared inputs: a flat parameter list plus a tree of conditionals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inputs {
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditionals: Vec<Conditional>,
}

/// A filter attached to a data output. Filter expressions are opaque to the
/// core; their presence only downgrades packaging to best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputFilter {
    pub expression: String,
}

/// A named data output, optionally taken from the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_work_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<OutputFilter>,
}

/// Discovery rule for a collection output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverDatasets {
    /// Regex matched against discovered basenames; capture group 1, when
    /// present, becomes the artifact's logical name.
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default)]
    pub recurse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
}

/// A collection output discovered by pattern after the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionOutput {
    pub name: String,
    #[serde(rename = "type", default = "default_collection_type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discover_datasets: Option<DiscoverDatasets>,
}

fn default_collection_type() -> String {
    "list".to_string()
}

/// Declared outputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Outputs {
    #[serde(default)]
    pub data: Vec<DataOutput>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collection: Vec<CollectionOutput>,
}

/// A package requirement (name pinned to a version).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub name: String,
    pub version: String,
}

/// An auxiliary template rendered to disk and exposed to the command through
/// a named environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub name: String,
    pub text: String,
}

/// Content assertions of an embedded test case.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssertContents {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub has_text: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_has_text: Vec<String>,
}

/// A parameter literal in a test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestParam {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// A conditional block inside a test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestConditional {
    pub name: String,
    pub param: TestParam,
    #[serde(default)]
    pub whens: Vec<TestWhen>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestWhen {
    pub value: String,
    #[serde(default)]
    pub params: Vec<TestParam>,
}

/// Expected output of a test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assert_contents: Option<AssertContents>,
}

/// One embedded test case of a descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolTest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<TestParam>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditional: Option<TestConditional>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TestOutput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_num_outputs: Option<u32>,
}

/// Immutable description of a single executable tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Optional interpreter prefixed before the command (e.g. `python`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    /// The templated command string.
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_command: Option<String>,
    #[serde(default)]
    pub inputs: Inputs,
    #[serde(default)]
    pub outputs: Outputs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub configfiles: Vec<ConfigFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tests: Vec<ToolTest>,
}

impl ToolDescriptor {
    /// The MCP-safe name this tool binds under.
    pub fn sanitized_name(&self) -> String {
        sanitize_tool_name(&self.name.to_lowercase())
    }
}

/// Normalize a human tool name into `[A-Za-z0-9_-]`: non-ASCII dropped,
/// disallowed runs collapsed into a single `_`, separators trimmed.
pub fn sanitize_tool_name(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.chars() {
        if !ch.is_ascii() {
            continue;
        }
        if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch);
        } else {
            pending_sep = true;
        }
    }
    out.trim_matches(|c| c == '_' || c == '-').to_string()
}

/// The read-only descriptor catalog shared across sessions.
///
/// Lookups clone an `Arc` snapshot, so readers never block behind a reload;
/// a reload builds the replacement maps off to the side and swaps them in.
#[derive(Debug)]
pub struct ToolCatalog {
    tools: RwLock<Arc<HashMap<String, Arc<ToolDescriptor>>>>,
    by_name: RwLock<Arc<HashMap<String, String>>>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        let (tools, by_name) = Self::build_maps(tools);
        Self {
            tools: RwLock::new(Arc::new(tools)),
            by_name: RwLock::new(Arc::new(by_name)),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Load a catalog from a JSON file holding either an array of
    /// descriptors or a map of tool id to descriptor.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::new(parse_catalog(&contents)?))
    }

    /// Replace the entire catalog. A single pointer swap, visible atomically
    /// to all sessions.
    pub fn reload(&self, tools: Vec<ToolDescriptor>) {
        let (tools, by_name) = Self::build_maps(tools);
        *self.tools.write().unwrap() = Arc::new(tools);
        *self.by_name.write().unwrap() = Arc::new(by_name);
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<ToolDescriptor>> {
        self.tools.read().unwrap().get(tool_id).cloned()
    }

    /// Resolve a (sanitized or raw) tool name to its descriptor.
    pub fn resolve_name(&self, name: &str) -> Option<Arc<ToolDescriptor>> {
        let by_name = self.by_name.read().unwrap().clone();
        let id = by_name
            .get(name)
            .or_else(|| by_name.get(&sanitize_tool_name(&name.to_lowercase())))?;
        self.get(id)
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<String> {
        self.tools.read().unwrap().keys().cloned().collect()
    }

    fn build_maps(
        tools: Vec<ToolDescriptor>,
    ) -> (
        HashMap<String, Arc<ToolDescriptor>>,
        HashMap<String, String>,
    ) {
        let mut map = HashMap::with_capacity(tools.len());
        let mut by_name = HashMap::with_capacity(tools.len() * 2);
        for tool in tools {
            let tool = Arc::new(tool);
            by_name.insert(tool.name.clone(), tool.id.clone());
            by_name.insert(tool.sanitized_name(), tool.id.clone());
            map.insert(tool.id.clone(), tool);
        }
        (map, by_name)
    }
}

fn parse_catalog(contents: &str) -> anyhow::Result<Vec<ToolDescriptor>> {
    match serde_json::from_str::<Vec<ToolDescriptor>>(contents) {
        Ok(tools) => Ok(tools),
        Err(_) => {
            let map: HashMap<String, ToolDescriptor> = serde_json::from_str(contents)?;
            Ok(map.into_values().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_tool(id: &str, name: &str) -> ToolDescriptor {
        ToolDescriptor {
            id: id.to_string(),
            name: name.to_string(),
            version: None,
            description: String::new(),
            long_description: None,
            documentation: None,
            requirements: Vec::new(),
            interpreter: None,
            command: "true".to_string(),
            version_command: None,
            inputs: Inputs::default(),
            outputs: Outputs::default(),
            configfiles: Vec::new(),
            tests: Vec::new(),
        }
    }

    #[test]
    fn sanitize_collapses_and_trims() {
        assert_eq!(sanitize_tool_name("CSV to Tabular"), "CSV_to_Tabular");
        assert_eq!(sanitize_tool_name("bwa-mem (v2)"), "bwa-mem_v2");
        assert_eq!(sanitize_tool_name("  --weird!!name--  "), "weird_name");
        assert_eq!(sanitize_tool_name("déjà vu"), "dj_vu");
    }

    #[test]
    fn effective_name_strips_argument_dashes() {
        let decl = ParamDecl {
            name: None,
            argument: Some("--header".to_string()),
            kind: ParamKind::Boolean,
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
        };
        assert_eq!(decl.effective_name().as_deref(), Some("header"));
    }

    #[test]
    fn catalog_resolves_raw_and_sanitized_names() {
        let catalog = ToolCatalog::new(vec![minimal_tool("abc123", "CSV to Tabular")]);

        assert!(catalog.get("abc123").is_some());
        assert!(catalog.resolve_name("CSV to Tabular").is_some());
        assert!(catalog.resolve_name("csv_to_tabular").is_some());
        assert!(catalog.resolve_name("unknown").is_none());
    }

    #[test]
    fn reload_swaps_whole_map() {
        let catalog = ToolCatalog::new(vec![minimal_tool("a", "Tool A")]);
        assert_eq!(catalog.len(), 1);

        catalog.reload(vec![minimal_tool("b", "Tool B"), minimal_tool("c", "Tool C")]);
        assert_eq!(catalog.len(), 2);
        assert!(catalog.get("a").is_none());
        assert!(catalog.get("b").is_some());
    }

    #[test]
    fn catalog_parses_map_or_array_form() {
        let array = r#"[{"id": "t1", "name": "T1", "command": "true"}]"#;
        let map = r#"{"t1": {"id": "t1", "name": "T1", "command": "true"}}"#;
        assert_eq!(parse_catalog(array).unwrap().len(), 1);
        assert_eq!(parse_catalog(map).unwrap().len(), 1);
    }
}
