//! # Command Templater
//!
//! Turns the templated command string carried in a tool descriptor into a
//! shell script a POSIX shell can execute. The template language mixes shell
//! syntax with two embedded constructs: conditional directives
//! (`#if EXPR:` … `#else` … `#end if`) and variable references (`$foo`,
//! `${foo}`, `$foo.bar`).
//!
//! Rendering proceeds in ordered passes, each idempotent on its own output:
//!
//! 1. **Placeholder neutralization** — resource reservation placeholders of
//!    the form `"\${NAME:-N}"` resolve to a caller-chosen value or their
//!    declared default. Resolved first because `#if` may inspect them.
//! 2. **Conditional expansion** — a truth-stack walk over the template
//!    lines. Inside a conditional, known `$name` references are spliced as
//!    literals; top-level lines pass through untouched so the shell can
//!    apply its own quoting to file paths at runtime.
//! 3. **Whitespace normalization** — consecutive whitespace collapses to
//!    single spaces.
//! 4. **Escape normalization** — `\$` becomes `$` for runtime expansion.
//! 5. **Quoting repair** — `'$X'` is rewritten to `"$X"`, and bare
//!    `$VAR`/`${VAR}` outside quoted spans are wrapped in double quotes.
//! 6. **Dotted-name flattening** — `$a.b` becomes `$a_b` so POSIX shells
//!    can expand it.
//!
//! Unknown variables never fail (the shell gets them); only malformed `#if`
//! constructs are fatal. Configfiles go through passes 1–2 only, preserving
//! their line structure.

pub mod expr;

pub use expr::TemplateValue;

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::error::{Result, RheaError};

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(\\)?\$(?:\{([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*)\}|([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*))",
    )
    .unwrap()
});

static RESERVATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""?\\\$\{([A-Za-z_][A-Za-z0-9_]*):-(\d+)\}"?"#).unwrap()
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ESCAPED_DOLLAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\\\$").unwrap());
static SINGLE_QUOTED_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"'(\$[^']+)'").unwrap());
static QUOTED_SPAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap());
static BARE_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\\)?(\$(?:\{[^}]+\}|[A-Za-z_][A-Za-z0-9_]*))").unwrap()
});
static DOTTED_BRACED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\}").unwrap()
});
static DOTTED_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)").unwrap()
});

/// The variable environment a template renders against. Dotted names build
/// nested records so both `$cond` and `$cond.field` resolve.
#[derive(Debug, Clone, Default)]
pub struct TemplateEnv {
    entries: BTreeMap<String, TemplateValue>,
}

impl TemplateEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a scalar. A dotted name creates or extends a record.
    pub fn set_scalar(&mut self, name: &str, value: impl Into<String>) {
        self.set(name, TemplateValue::scalar(value));
    }

    pub fn set(&mut self, name: &str, value: TemplateValue) {
        let mut parts = name.split('.');
        let root = parts.next().expect("split yields at least one part");
        let rest: Vec<&str> = parts.collect();

        if rest.is_empty() {
            self.entries.insert(root.to_string(), value);
            return;
        }

        let entry = self
            .entries
            .remove(root)
            .unwrap_or_else(|| TemplateValue::scalar(""));
        let mut record = into_record(entry);
        insert_nested(&mut record, &rest, value);
        self.entries.insert(root.to_string(), record);
    }

    /// Append a scalar under a name, turning an existing binding into a
    /// list. Repeated file parameters accumulate this way.
    pub fn append_scalar(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.remove(name) {
            None => {
                self.entries.insert(name.to_string(), TemplateValue::scalar(value));
            }
            Some(TemplateValue::List(mut items)) => {
                items.push(value);
                self.entries.insert(name.to_string(), TemplateValue::List(items));
            }
            Some(existing) => {
                self.entries.insert(
                    name.to_string(),
                    TemplateValue::List(vec![existing.literal(), value]),
                );
            }
        }
    }

    /// Resolve a possibly-dotted reference.
    pub fn lookup(&self, path: &str) -> Option<&TemplateValue> {
        let mut parts = path.split('.');
        let mut current = self.entries.get(parts.next()?)?;
        for part in parts {
            match current {
                TemplateValue::Record { fields, .. } => current = fields.get(part)?,
                _ => return None,
            }
        }
        Some(current)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Flatten into process-environment pairs: dotted fields become
    /// underscore-joined names, lists join on commas.
    pub fn to_process_env(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for (name, value) in &self.entries {
            flatten_value(name, value, &mut out);
        }
        out
    }
}

fn into_record(value: TemplateValue) -> TemplateValue {
    match value {
        TemplateValue::Record { .. } => value,
        other => TemplateValue::Record {
            value: other.literal(),
            fields: BTreeMap::new(),
        },
    }
}

fn insert_nested(record: &mut TemplateValue, path: &[&str], value: TemplateValue) {
    let TemplateValue::Record { fields, .. } = record else {
        unreachable!("insert_nested is only called on records");
    };
    if path.len() == 1 {
        fields.insert(path[0].to_string(), value);
        return;
    }
    let next = fields
        .remove(path[0])
        .unwrap_or_else(|| TemplateValue::scalar(""));
    let mut next = into_record(next);
    insert_nested(&mut next, &path[1..], value);
    fields.insert(path[0].to_string(), next);
}

fn flatten_value(name: &str, value: &TemplateValue, out: &mut Vec<(String, String)>) {
    out.push((name.to_string(), value.literal()));
    if let TemplateValue::Record { fields, .. } = value {
        for (field, nested) in fields {
            flatten_value(&format!("{name}_{field}"), nested, out);
        }
    }
}

/// Renders descriptor command strings and configfiles against an
/// environment, applying the pass pipeline described at module level.
#[derive(Debug, Clone, Default)]
pub struct CommandTemplater {
    /// Caller-chosen values for resource reservation placeholders.
    overrides: BTreeMap<String, i64>,
}

impl CommandTemplater {
    pub fn new() -> Self {
        Self::default()
    }

    /// Choose a value for a reservation placeholder (e.g. slot count).
    pub fn with_override(mut self, name: impl Into<String>, value: i64) -> Self {
        self.overrides.insert(name.into(), value);
        self
    }

    /// Render a command template into an executable shell script.
    pub fn render_script(&self, template: &str, env: &TemplateEnv) -> Result<String> {
        let cmd = self.neutralize_placeholders(template);
        let cmd = expand_conditionals(&cmd, env)?;
        let cmd = collapse_whitespace(&cmd);
        let cmd = unescape_dollars(&cmd);
        // Flattening runs before quoting repair so a flattened `$a_b`
        // reference gets wrapped like any other variable.
        let cmd = flatten_dotted(&cmd);
        let cmd = repair_quoting(&cmd);
        Ok(format!("#!/usr/bin/env bash\n{cmd}\n"))
    }

    /// Render a configfile template: placeholders and conditionals only, so
    /// the file's line structure survives.
    pub fn render_text(&self, template: &str, env: &TemplateEnv) -> Result<String> {
        let text = self.neutralize_placeholders(template);
        expand_conditionals(&text, env)
    }

    fn neutralize_placeholders(&self, template: &str) -> String {
        RESERVATION
            .replace_all(template, |caps: &Captures| {
                match self.overrides.get(&caps[1]) {
                    Some(value) => value.to_string(),
                    None => caps[2].to_string(),
                }
            })
            .into_owned()
    }
}

#[derive(Debug)]
enum Segment<'a> {
    Text(&'a str),
    If(&'a str),
    Else,
    EndIf,
}

/// Split one template line into text and directive segments. Directives may
/// share a line with their body (`#if $x: --flag #end if`).
fn split_directives(line: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = line;

    loop {
        let next = ["#if", "#end if", "#else"]
            .iter()
            .filter_map(|d| rest.find(d).map(|i| (i, *d)))
            .min_by_key(|(i, _)| *i);

        let Some((idx, directive)) = next else {
            // Whole lines survive even when blank (configfiles depend on
            // their line structure); whitespace trailing a directive does
            // not.
            if !rest.trim().is_empty() || segments.is_empty() {
                segments.push(Segment::Text(rest));
            }
            return segments;
        };

        if idx > 0 && !rest[..idx].trim().is_empty() {
            segments.push(Segment::Text(&rest[..idx]));
        }

        match directive {
            "#end if" => {
                segments.push(Segment::EndIf);
                rest = &rest[idx + directive.len()..];
            }
            "#else" => {
                segments.push(Segment::Else);
                rest = &rest[idx + directive.len()..];
                rest = rest.strip_prefix(':').unwrap_or(rest);
            }
            _ => {
                let after = &rest[idx + "#if".len()..];
                match after.find(':') {
                    Some(colon) => {
                        segments.push(Segment::If(after[..colon].trim()));
                        rest = &after[colon + 1..];
                    }
                    None => {
                        segments.push(Segment::If(after.trim()));
                        rest = "";
                    }
                }
            }
        }
    }
}

struct Frame {
    parent_active: bool,
    branch_taken: bool,
    current: bool,
}

fn expand_conditionals(template: &str, env: &TemplateEnv) -> Result<String> {
    let mut frames: Vec<Frame> = Vec::new();
    let mut out: Vec<String> = Vec::new();

    for line in template.lines() {
        for segment in split_directives(line) {
            match segment {
                Segment::If(expr_src) => {
                    let parent_active = frames.last().map_or(true, |f| f.current);
                    let substituted = substitute_expr(expr_src, env);
                    let value = expr::eval_predicate(&substituted).map_err(|e| {
                        RheaError::Template(format!("bad #if expression '{expr_src}': {e}"))
                    })?;
                    frames.push(Frame {
                        parent_active,
                        branch_taken: value,
                        current: parent_active && value,
                    });
                }
                Segment::Else => {
                    let frame = frames
                        .last_mut()
                        .ok_or_else(|| RheaError::Template("#else outside #if".to_string()))?;
                    frame.current = frame.parent_active && !frame.branch_taken;
                }
                Segment::EndIf => {
                    frames
                        .pop()
                        .ok_or_else(|| RheaError::Template("#end if without #if".to_string()))?;
                }
                Segment::Text(text) => {
                    let active = frames.last().map_or(true, |f| f.current);
                    if active {
                        if frames.is_empty() {
                            out.push(text.to_string());
                        } else {
                            out.push(substitute_literals(text, env));
                        }
                    }
                }
            }
        }
    }

    if !frames.is_empty() {
        return Err(RheaError::Template("unterminated #if".to_string()));
    }
    Ok(out.join("\n"))
}

/// Substitute `$name` references inside an `#if` expression with quoted
/// literals from the environment. Unknown references become the empty
/// string, matching the historical behavior of missing optional params.
fn substitute_expr(expr: &str, env: &TemplateEnv) -> String {
    VAR_REF
        .replace_all(expr, |caps: &Captures| {
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            let literal = name
                .and_then(|n| env.lookup(n))
                .map(|v| v.literal())
                .unwrap_or_default();
            format!("\"{}\"", literal.replace('\\', "\\\\").replace('"', "\\\""))
        })
        .into_owned()
}

/// Splice known parameter values into a line inside a conditional body.
/// References the environment does not know stay untouched for the shell.
fn substitute_literals(text: &str, env: &TemplateEnv) -> String {
    VAR_REF
        .replace_all(text, |caps: &Captures| {
            if caps.get(1).is_some() {
                return caps[0].to_string();
            }
            let name = caps.get(2).or_else(|| caps.get(3)).map(|m| m.as_str());
            match name.and_then(|n| env.lookup(n)) {
                Some(value) => value.literal(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn collapse_whitespace(cmd: &str) -> String {
    WHITESPACE.replace_all(cmd, " ").trim().to_string()
}

fn unescape_dollars(cmd: &str) -> String {
    ESCAPED_DOLLAR.replace_all(cmd, "$").into_owned()
}

fn repair_quoting(cmd: &str) -> String {
    let fixed = SINGLE_QUOTED_VAR
        .replace_all(cmd, |caps: &Captures| format!("\"{}\"", &caps[1]))
        .into_owned();

    // Literal quoted spans are preserved byte-for-byte; only the gaps
    // between them get their variables wrapped.
    let mut out = String::with_capacity(fixed.len());
    let mut last = 0;
    for span in QUOTED_SPAN.find_iter(&fixed) {
        out.push_str(&wrap_bare_vars(&fixed[last..span.start()]));
        out.push_str(span.as_str());
        last = span.end();
    }
    out.push_str(&wrap_bare_vars(&fixed[last..]));
    out
}

fn wrap_bare_vars(segment: &str) -> String {
    BARE_VAR
        .replace_all(segment, |caps: &Captures| {
            if caps.get(1).is_some() {
                caps[0].to_string()
            } else {
                format!("\"{}\"", &caps[2])
            }
        })
        .into_owned()
}

fn flatten_dotted(cmd: &str) -> String {
    let mut current = cmd.to_string();
    loop {
        let pass = DOTTED_BRACED
            .replace_all(&current, |caps: &Captures| {
                format!("${{{}_{}}}", &caps[1], &caps[2])
            })
            .into_owned();
        let pass = DOTTED_BARE
            .replace_all(&pass, |caps: &Captures| {
                format!("${}_{}", &caps[1], &caps[2])
            })
            .into_owned();
        if pass == current {
            return current;
        }
        current = pass;
    }
}
