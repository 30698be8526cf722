//! # Test Harness Projector
//!
//! Derives concrete invocations from the test cases embedded in a tool
//! descriptor: typed parameters bound to real store handles, plus the
//! expected-content assertions to run against the outputs.
//!
//! File test parameters name a fixture by basename; the projector finds the
//! object under the tool's resource prefix, re-stores it as an input
//! envelope, and binds the resulting handle. Conditional test parameters are
//! materialized twice — once under the bare name and once under
//! `{conditional}_{param}` — because tool templates are inconsistent about
//! which spelling they reference. That duplication is a deliberate
//! interoperability shim, not tidiness worth fixing.

use bytes::Bytes;

use crate::descriptor::{AssertContents, ParamKind, TestParam, ToolDescriptor, ToolTest};
use crate::error::{Result, RheaError};
use crate::params::ToolParam;
use crate::worker::InvocationResult;
use rhea_common::{BlobStore, FileEnvelope};

/// An expected-content check against one named output.
#[derive(Debug, Clone)]
pub struct OutputAssertion {
    /// Output name to match; `None` matches any output.
    pub output_name: Option<String>,
    pub contents: AssertContents,
}

impl OutputAssertion {
    /// All `has_text` fragments present, no `not_has_text` fragment present.
    pub fn check(&self, bytes: &[u8]) -> bool {
        let text = String::from_utf8_lossy(bytes);
        self.contents.has_text.iter().all(|t| text.contains(t))
            && self.contents.not_has_text.iter().all(|t| !text.contains(t))
    }
}

/// A fully-materialized invocation derived from an embedded test case.
#[derive(Debug, Clone)]
pub struct ProjectedCase {
    pub params: Vec<ToolParam>,
    pub assertions: Vec<OutputAssertion>,
    pub expect_num_outputs: Option<u32>,
}

/// Projects descriptor test cases into runnable invocations.
pub struct TestProjector {
    store: BlobStore,
}

impl TestProjector {
    pub fn new(store: BlobStore) -> Self {
        Self { store }
    }

    pub async fn project(&self, tool: &ToolDescriptor, test: &ToolTest) -> Result<ProjectedCase> {
        let mut params = Vec::new();

        for decl in &tool.inputs.params {
            let Some(name) = decl.effective_name() else {
                continue;
            };
            let Some(test_param) = test.params.iter().find(|p| p.name == name) else {
                continue;
            };

            if decl.kind == ParamKind::Data {
                params.push(self.file_param(tool, decl, test_param).await?);
            } else if let Some(value) = &test_param.value {
                params.push(ToolParam::coerce(
                    decl,
                    &serde_json::Value::String(value.clone()),
                )?);
            }
        }

        if let Some(conditional) = &test.conditional {
            let pivot = &conditional.param;
            push_duplicated(&mut params, &conditional.name, pivot);

            let matching_when = conditional
                .whens
                .iter()
                .find(|w| Some(&w.value) == pivot.value.as_ref());
            if let Some(when) = matching_when {
                for nested in &when.params {
                    push_duplicated(&mut params, &conditional.name, nested);
                }
            }
        }

        let assertions = test
            .outputs
            .iter()
            .filter_map(|out| {
                out.assert_contents.as_ref().map(|contents| OutputAssertion {
                    output_name: out.name.clone(),
                    contents: contents.clone(),
                })
            })
            .collect();

        Ok(ProjectedCase {
            params,
            assertions,
            expect_num_outputs: test.expect_num_outputs,
        })
    }

    /// Check a run's outputs against the projected assertions.
    pub async fn verify(&self, case: &ProjectedCase, result: &InvocationResult) -> Result<bool> {
        if let Some(expected) = case.expect_num_outputs
            && result.files.len() as u32 != expected
        {
            return Ok(false);
        }

        for assertion in &case.assertions {
            let matched = match &assertion.output_name {
                Some(name) => result.files.iter().find(|f| &f.name == name),
                None => result.files.first(),
            };
            let Some(proxy) = matched else {
                return Ok(false);
            };
            let envelope = FileEnvelope::from_handle(&proxy.handle, &self.store).await?;
            if !assertion.check(&envelope.contents) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resolve a file test parameter: find the fixture under the tool's
    /// resource prefix by basename, re-store it, bind the handle.
    async fn file_param(
        &self,
        tool: &ToolDescriptor,
        decl: &crate::descriptor::ParamDecl,
        test_param: &TestParam,
    ) -> Result<ToolParam> {
        let wanted = test_param.value.as_deref().ok_or_else(|| {
            RheaError::bad_value(&test_param.name, "file test parameter has no value")
        })?;

        let prefix = format!("{}/", tool.id);
        let entries = self.store.iter_prefix(&prefix).await?;
        for (relative, bytes) in entries {
            let basename = relative.rsplit('/').next().unwrap_or(&relative);
            if basename == wanted {
                let proxy = FileEnvelope::from_buffer(wanted, Bytes::from(bytes.to_vec()))
                    .to_store(&self.store)
                    .await?;
                return Ok(ToolParam::File {
                    name: test_param.name.clone(),
                    handle: proxy.handle,
                    filename: Some(wanted.to_string()),
                    format: decl.format.clone(),
                });
            }
        }

        Err(RheaError::NotFound(format!(
            "test fixture '{wanted}' not under prefix '{prefix}'"
        )))
    }
}

/// Materialize a conditional test parameter under both spellings the
/// template might use.
fn push_duplicated(params: &mut Vec<ToolParam>, conditional_name: &str, param: &TestParam) {
    let Some(value) = &param.value else {
        return;
    };
    params.push(ToolParam::Text {
        name: param.name.clone(),
        value: value.clone(),
    });
    params.push(ToolParam::Text {
        name: format!("{conditional_name}_{}", param.name),
        value: value.clone(),
    });
}
