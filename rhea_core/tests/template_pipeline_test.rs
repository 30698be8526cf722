//! Rendering pipeline checks over realistic tool command templates.

use rhea_core::RheaError;
use rhea_core::template::{CommandTemplater, TemplateEnv};

fn env_with(pairs: &[(&str, &str)]) -> TemplateEnv {
    let mut env = TemplateEnv::new();
    for (k, v) in pairs {
        env.set_scalar(k, *v);
    }
    env
}

/// No rendered script ever carries an unexpanded directive or a `\$` escape.
fn assert_fully_rendered(script: &str) {
    assert!(!script.contains("#if"), "unexpanded #if in: {script}");
    assert!(!script.contains("#end if"), "unexpanded #end if in: {script}");
    assert!(!script.contains("#else"), "unexpanded #else in: {script}");
    assert!(!script.contains("\\$"), "unexpanded escape in: {script}");
}

#[test]
fn conditional_branching_matches_declared_flag() {
    let templater = CommandTemplater::new();
    let template = "csv_to_tabular #if $header: --header #end if '$input1' > '$output1'";

    let with_header = templater
        .render_script(template, &env_with(&[("header", "true")]))
        .unwrap();
    assert!(with_header.contains("--header"));
    assert_fully_rendered(&with_header);

    let without_header = templater
        .render_script(template, &env_with(&[("header", "false")]))
        .unwrap();
    assert!(!without_header.contains("--header"));
    assert_fully_rendered(&without_header);
}

#[test]
fn resource_placeholder_defaults_and_overrides() {
    let template = r#"aligner -t "\${GALAXY_SLOTS:-4}" -i "$input""#;

    let defaulted = CommandTemplater::new()
        .render_script(template, &TemplateEnv::new())
        .unwrap();
    assert!(defaulted.contains("-t 4"));
    assert_fully_rendered(&defaulted);

    let overridden = CommandTemplater::new()
        .with_override("GALAXY_SLOTS", 8)
        .render_script(template, &TemplateEnv::new())
        .unwrap();
    assert!(overridden.contains("-t 8"));
    assert!(!overridden.contains("-t 4"));
}

#[test]
fn placeholders_resolve_before_conditionals_inspect_them() {
    // The #if sees the resolved value, not the placeholder text.
    let template = "#if \\${GALAXY_SLOTS:-4} == 8:\nparallel\n#else\nserial\n#end if";

    let defaulted = CommandTemplater::new()
        .render_script(template, &TemplateEnv::new())
        .unwrap();
    assert!(defaulted.contains("serial"));

    let overridden = CommandTemplater::new()
        .with_override("GALAXY_SLOTS", 8)
        .render_script(template, &TemplateEnv::new())
        .unwrap();
    assert!(overridden.contains("parallel"));
}

#[test]
fn multi_line_galaxy_style_template_renders_clean() {
    let template = "\n        bwa mem\n        -t \"\\${GALAXY_SLOTS:-1}\"\n        #if $reference_source.source == \"history\":\n            '$reference_source.own_file'\n        #else\n            '${reference_source.index.fields.path}'\n        #end if\n        '$fastq_input'\n        > '$output_sam'\n    ";
    let mut env = TemplateEnv::new();
    env.set_scalar("reference_source.source", "history");
    env.set_scalar("reference_source.own_file", "/scratch/in/ref.fa");

    let script = CommandTemplater::new().render_script(template, &env).unwrap();

    assert!(script.starts_with("#!/usr/bin/env bash\n"));
    assert_fully_rendered(&script);
    // The chosen branch spliced the literal path.
    assert!(script.contains("/scratch/in/ref.fa"));
    assert!(!script.contains("index.fields.path"));
    // Top-level references stay as quoted shell variables.
    assert!(script.contains("\"$fastq_input\""));
    assert!(script.contains("\"$output_sam\""));
}

#[test]
fn templater_is_idempotent_on_its_own_output() {
    let templater = CommandTemplater::new();
    let env = env_with(&[("mode", "fast")]);
    let template = "tool #if $mode == \"fast\": --quick #end if \\$runtime > '$out'";

    let first = templater.render_script(template, &env).unwrap();
    let body = first.strip_prefix("#!/usr/bin/env bash\n").unwrap().trim_end();

    // Second pass: same template semantics with escapes restored.
    let restored = body.replace('$', "\\$");
    let second = templater.render_script(&restored, &env).unwrap();
    let second_body = second
        .strip_prefix("#!/usr/bin/env bash\n")
        .unwrap()
        .trim_end();

    assert_eq!(body, second_body);
}

#[test]
fn malformed_directives_are_fatal() {
    let templater = CommandTemplater::new();
    let env = TemplateEnv::new();

    for template in [
        "#if $x == :\nbody\n#end if",
        "#if $x:\nnever closed",
        "body\n#end if",
        "#else\nbody",
        "#if $x import os:\nbody\n#end if",
    ] {
        let err = templater.render_script(template, &env).unwrap_err();
        assert!(
            matches!(err, RheaError::Template(_)),
            "expected template error for: {template}"
        );
    }
}

#[test]
fn configfiles_keep_their_line_structure() {
    let templater = CommandTemplater::new();
    let mut env = TemplateEnv::new();
    env.set_scalar("genome", "hg38");

    let text = templater
        .render_text("[params]\ngenome=$genome\n#if $genome == \"hg38\":\nbuild=latest\n#end if", &env)
        .unwrap();

    // render_text runs conditionals only: lines survive, and top-level
    // variable references are left for the consumer.
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "[params]");
    assert_eq!(lines[1], "genome=$genome");
    assert_eq!(lines[2], "build=latest");
}
