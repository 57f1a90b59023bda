use super::types::*;
use std::collections::{HashMap, HashSet, VecDeque};

/// Largest digit bound a `u64` can hold for every value.
const MAX_NUMERIC_DIGITS: u32 = 18;

/// A structural problem that prevents a form from loading.
#[derive(Debug, Clone, thiserror::Error)]
#[error("form '{form}': {message}")]
pub struct DefinitionError {
    pub form: FormKind,
    pub message: String,
}

fn default_prefix(kind: FormKind) -> &'static str {
    match kind {
        FormKind::ExGratiaApplication => "EXG",
        FormKind::Complaint => "CMP",
        FormKind::Feedback => "FB",
        FormKind::OperatorSearch | FormKind::HomestaySearch | FormKind::StatusCheck => "REF",
    }
}

/// Build a validated `FormDefinition` from a parsed TOML definition.
/// Every problem found is reported, not just the first.
pub fn build_form_definition(toml: &FormDefinitionToml) -> Result<FormDefinition, Vec<DefinitionError>> {
    let kind = toml.form.kind;
    let mut errors = Vec::new();
    let mut err = |message: String| errors.push(DefinitionError { form: kind, message });

    if toml.fields.is_empty() {
        err("form has no fields".to_string());
    }

    let mut seen = HashSet::new();
    for field in &toml.fields {
        if field.name.trim().is_empty() {
            err("field with empty name".to_string());
        } else if !seen.insert(field.name.as_str()) {
            err(format!("duplicate field name '{}'", field.name));
        }
        if field.prompt.trim().is_empty() {
            err(format!("field '{}': empty prompt key", field.name));
        }
    }

    let location_fields = toml
        .fields
        .iter()
        .filter(|f| matches!(f.validator, ValidatorSpec::Location))
        .count();
    if location_fields > 1 {
        err(format!("{location_fields} location fields; at most one is allowed"));
    }

    let names: HashSet<&str> = toml.fields.iter().map(|f| f.name.as_str()).collect();

    for field in &toml.fields {
        match &field.validator {
            ValidatorSpec::Choice { options } => {
                if options.is_empty() {
                    err(format!("field '{}': choice validator requires options", field.name));
                }
                let mut ids = HashSet::new();
                for opt in options {
                    if !ids.insert(opt.id.to_lowercase()) {
                        err(format!("field '{}': duplicate option '{}'", field.name, opt.id));
                    }
                }
                for tr in &field.transitions {
                    if tr.on != ANY_VALUE && !options.iter().any(|o| o.id.eq_ignore_ascii_case(&tr.on)) {
                        err(format!(
                            "field '{}': transition on '{}' matches no option",
                            field.name, tr.on
                        ));
                    }
                }
            }
            ValidatorSpec::Numeric { max_digits } => {
                if *max_digits == 0 || *max_digits > MAX_NUMERIC_DIGITS {
                    err(format!(
                        "field '{}': max_digits must be between 1 and {MAX_NUMERIC_DIGITS}",
                        field.name
                    ));
                }
            }
            _ => {}
        }

        for tr in &field.transitions {
            if !names.contains(tr.target.as_str()) {
                err(format!(
                    "field '{}': transition target '{}' does not exist",
                    field.name, tr.target
                ));
            }
        }
    }

    if toml.form.finalize == FinalizeAction::Lookup
        && toml.form.directory.as_deref().map_or(true, |d| d.trim().is_empty())
    {
        err("lookup forms must name a directory table".to_string());
    }

    if let Some(prefix) = &toml.form.reference_prefix {
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            err(format!("reference prefix '{prefix}' must be non-empty ASCII alphanumerics"));
        }
    }

    if errors.is_empty() && has_cycles(&toml.fields) {
        errors.push(DefinitionError {
            form: kind,
            message: "field transitions form a cycle".to_string(),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let reachable = find_reachable_fields(&toml.fields);
    for (i, field) in toml.fields.iter().enumerate() {
        if !reachable.contains(&i) {
            tracing::warn!("form '{}': field '{}' is unreachable from the first field", kind, field.name);
        }
    }

    Ok(FormDefinition {
        kind,
        description: toml.form.description.clone(),
        help: toml.form.help.clone(),
        confirm: toml.form.confirm,
        finalize: toml.form.finalize,
        reference_prefix: toml
            .form
            .reference_prefix
            .clone()
            .unwrap_or_else(|| default_prefix(kind).to_string()),
        directory: toml.form.directory.clone(),
        fields: toml
            .fields
            .iter()
            .map(|f| FieldSpec {
                name: f.name.clone(),
                prompt: f.prompt.clone(),
                validator: f.validator.clone(),
                transitions: f.transitions.clone(),
            })
            .collect(),
    })
}

/// Possible next fields after `index`: transition targets plus the
/// fall-through unless an `_any` transition always overrides it.
fn successors(fields: &[FieldToml], index: usize) -> Vec<usize> {
    let by_name: HashMap<&str, usize> = fields.iter().enumerate().map(|(i, f)| (f.name.as_str(), i)).collect();
    let field = &fields[index];
    let mut next: Vec<usize> = field
        .transitions
        .iter()
        .filter_map(|t| by_name.get(t.target.as_str()).copied())
        .collect();
    let always_jumps = field.transitions.iter().any(|t| t.on == ANY_VALUE);
    if !always_jumps && index + 1 < fields.len() {
        next.push(index + 1);
    }
    next
}

/// BFS from the first field.
fn find_reachable_fields(fields: &[FieldToml]) -> HashSet<usize> {
    let mut reachable = HashSet::new();
    if fields.is_empty() {
        return reachable;
    }
    let mut queue = VecDeque::from([0usize]);
    while let Some(current) = queue.pop_front() {
        if !reachable.insert(current) {
            continue;
        }
        queue.extend(successors(fields, current));
    }
    reachable
}

fn has_cycles(fields: &[FieldToml]) -> bool {
    let mut visited = HashSet::new();
    let mut stack = HashSet::new();
    (0..fields.len()).any(|i| dfs_cycle(fields, i, &mut visited, &mut stack))
}

fn dfs_cycle(fields: &[FieldToml], node: usize, visited: &mut HashSet<usize>, stack: &mut HashSet<usize>) -> bool {
    if stack.contains(&node) {
        return true;
    }
    if !visited.insert(node) {
        return false;
    }
    stack.insert(node);
    for next in successors(fields, node) {
        if dfs_cycle(fields, next, visited, stack) {
            return true;
        }
    }
    stack.remove(&node);
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> FormDefinitionToml {
        toml::from_str(src).unwrap()
    }

    fn minimal_form() -> &'static str {
        r#"
[form]
kind = "feedback"
finalize = "persist"
confirm = true

[[fields]]
name = "name"
prompt = "ask.name"
validator = { kind = "text", min_len = 2 }

[[fields]]
name = "message"
prompt = "ask.message"
validator = { kind = "free_form" }
"#
    }

    #[test]
    fn valid_form_passes() {
        let def = build_form_definition(&parse(minimal_form())).unwrap();
        assert_eq!(def.kind, FormKind::Feedback);
        assert_eq!(def.fields.len(), 2);
        assert_eq!(def.reference_prefix, "FB");
        assert!(def.confirm);
    }

    #[test]
    fn empty_form_errors() {
        let toml = parse("[form]\nkind = \"complaint\"\nfinalize = \"persist\"\n");
        let errs = build_form_definition(&toml).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("no fields")));
    }

    #[test]
    fn duplicate_field_names_error() {
        let src = format!(
            "{}\n[[fields]]\nname = \"name\"\nprompt = \"ask.again\"\nvalidator = {{ kind = \"free_form\" }}\n",
            minimal_form()
        );
        let errs = build_form_definition(&parse(&src)).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("duplicate field name 'name'")));
    }

    #[test]
    fn orphan_transition_target_errors() {
        let src = r#"
[form]
kind = "complaint"
finalize = "persist"

[[fields]]
name = "a"
prompt = "ask.a"
validator = { kind = "free_form" }
transitions = [{ on = "_any", target = "ghost" }]
"#;
        let errs = build_form_definition(&parse(src)).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("'ghost' does not exist")));
    }

    #[test]
    fn choice_problems_are_all_reported() {
        let src = r#"
[form]
kind = "complaint"
finalize = "persist"

[[fields]]
name = "empty_choice"
prompt = "ask.a"
validator = { kind = "choice", options = [] }

[[fields]]
name = "kind"
prompt = "ask.b"
validator = { kind = "choice", options = [{ id = "x", label = "opt.x" }] }
transitions = [{ on = "y", target = "empty_choice" }]
"#;
        let errs = build_form_definition(&parse(src)).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("requires options")));
        assert!(errs.iter().any(|e| e.message.contains("on 'y' matches no option")));
    }

    #[test]
    fn second_location_field_errors() {
        let src = r#"
[form]
kind = "complaint"
finalize = "persist"

[[fields]]
name = "here"
prompt = "ask.here"
validator = { kind = "location" }

[[fields]]
name = "there"
prompt = "ask.there"
validator = { kind = "location" }
"#;
        let errs = build_form_definition(&parse(src)).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("location fields")));
    }

    #[test]
    fn lookup_without_directory_errors() {
        let src = r#"
[form]
kind = "operator_search"
finalize = "lookup"

[[fields]]
name = "query"
prompt = "ask.query"
validator = { kind = "text", min_len = 2 }
"#;
        let errs = build_form_definition(&parse(src)).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("directory table")));
    }

    #[test]
    fn numeric_bound_out_of_range_errors() {
        let src = r#"
[form]
kind = "complaint"
finalize = "persist"

[[fields]]
name = "ward"
prompt = "ask.ward"
validator = { kind = "numeric", max_digits = 25 }
"#;
        let errs = build_form_definition(&parse(src)).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("max_digits")));
    }

    #[test]
    fn backward_transition_is_a_cycle() {
        let src = r#"
[form]
kind = "complaint"
finalize = "persist"

[[fields]]
name = "a"
prompt = "ask.a"
validator = { kind = "free_form" }

[[fields]]
name = "b"
prompt = "ask.b"
validator = { kind = "free_form" }
transitions = [{ on = "_any", target = "a" }]
"#;
        let errs = build_form_definition(&parse(src)).unwrap_err();
        assert!(errs.iter().any(|e| e.message.contains("cycle")));
    }

    #[test]
    fn branch_fields_are_reachable() {
        let src = r#"
[form]
kind = "complaint"
finalize = "persist"

[[fields]]
name = "pick"
prompt = "ask.pick"
validator = { kind = "choice", options = [{ id = "a", label = "opt.a" }, { id = "b", label = "opt.b" }] }
transitions = [{ on = "a", target = "only_a" }, { on = "b", target = "only_b" }]

[[fields]]
name = "only_a"
prompt = "ask.only_a"
validator = { kind = "free_form" }
transitions = [{ on = "_any", target = "tail" }]

[[fields]]
name = "only_b"
prompt = "ask.only_b"
validator = { kind = "free_form" }

[[fields]]
name = "tail"
prompt = "ask.tail"
validator = { kind = "free_form" }
"#;
        let toml = parse(src);
        assert_eq!(find_reachable_fields(&toml.fields).len(), 4);
        assert!(!has_cycles(&toml.fields));
        assert!(build_form_definition(&toml).is_ok());
    }
}
