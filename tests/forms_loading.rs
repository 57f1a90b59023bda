use sajilo::forms::types::{FinalizeAction, FormKind};
use sajilo::forms::{load_forms, FormLoadError, FormRegistry};
use std::fs;
use tempfile::TempDir;

const SHORT_COMPLAINT: &str = r#"
[form]
kind = "complaint"
help = "info.complaint"
confirm = false
finalize = "persist"
reference_prefix = "GRV"

[[fields]]
name = "complaint_description"
prompt = "ask.complaint_description"
validator = { kind = "text", min_len = 10 }
"#;

#[test]
fn override_replaces_only_its_kind() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("complaint.toml"), SHORT_COMPLAINT).unwrap();
    fs::write(tmp.path().join("README.md"), "not a form").unwrap();

    let registry = FormRegistry::with_overrides(Some(tmp.path())).unwrap();
    let complaint = registry.get(FormKind::Complaint).unwrap();
    assert_eq!(complaint.reference_prefix, "GRV");
    assert_eq!(complaint.fields.len(), 1);
    assert!(!complaint.confirm);

    let feedback = registry.get(FormKind::Feedback).unwrap();
    assert_eq!(feedback.finalize, FinalizeAction::Persist);
    assert_eq!(registry.kinds().len(), FormKind::ALL.len());
}

#[test]
fn every_structural_problem_is_reported() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("feedback.toml"),
        r#"
[form]
kind = "feedback"
finalize = "persist"
reference_prefix = "F-B"

[[fields]]
name = "name"
prompt = "ask.name"
validator = { kind = "text", min_len = 2 }
transitions = [{ on = "_any", target = "nowhere" }]

[[fields]]
name = "name"
prompt = "ask.name"
validator = { kind = "numeric", max_digits = 0 }
"#,
    )
    .unwrap();
    fs::write(
        tmp.path().join("operator_search.toml"),
        r#"
[form]
kind = "operator_search"
finalize = "lookup"

[[fields]]
name = "query"
prompt = "ask.operator_query"
validator = { kind = "choice", options = [] }
"#,
    )
    .unwrap();

    let err = load_forms(tmp.path()).unwrap_err();
    let FormLoadError::Invalid(problems) = &err else {
        panic!("expected collected problems, got {err}");
    };
    let joined = problems.join("\n");
    for needle in [
        "duplicate field name 'name'",
        "target 'nowhere' does not exist",
        "max_digits must be between",
        "reference prefix 'F-B'",
        "choice validator requires options",
        "lookup forms must name a directory table",
    ] {
        assert!(joined.contains(needle), "missing '{needle}' in:\n{joined}");
    }
}

#[test]
fn branch_cycle_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("status_check.toml"),
        r#"
[form]
kind = "status_check"
finalize = "status"

[[fields]]
name = "reference"
prompt = "ask.reference"
validator = { kind = "text", min_len = 4 }
transitions = [{ on = "_any", target = "again" }]

[[fields]]
name = "again"
prompt = "ask.reference"
validator = { kind = "text", min_len = 4 }
transitions = [{ on = "_any", target = "reference" }]
"#,
    )
    .unwrap();

    let err = load_forms(tmp.path()).unwrap_err();
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn duplicate_kind_within_directory_is_rejected() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("a.toml"), SHORT_COMPLAINT).unwrap();
    fs::write(tmp.path().join("b.toml"), SHORT_COMPLAINT).unwrap();

    let err = load_forms(tmp.path()).unwrap_err();
    assert!(err.to_string().contains("duplicate form kind 'complaint'"), "{err}");
}

#[test]
fn unparsable_file_names_its_origin() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("broken.toml"), "[form\nkind = ").unwrap();

    let err = FormRegistry::with_overrides(Some(tmp.path())).unwrap_err();
    assert!(matches!(err, FormLoadError::Parse { .. }));
    assert!(err.to_string().contains("broken.toml"));
}

#[test]
fn unknown_form_kind_is_a_parse_error() {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("parking.toml"),
        "[form]\nkind = \"parking_permit\"\nfinalize = \"persist\"\n",
    )
    .unwrap();

    assert!(matches!(load_forms(tmp.path()), Err(FormLoadError::Parse { .. })));
}
