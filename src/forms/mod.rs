pub mod fields;
pub mod phrases;
pub mod types;
pub mod validate;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use types::{FormDefinition, FormKind};
use validate::DefinitionError;

/// Form files compiled into the binary.
const BUILTIN_FORMS: &[(&str, &str)] = &[
    (
        "ex_gratia_application.toml",
        include_str!("../../forms/ex_gratia_application.toml"),
    ),
    ("complaint.toml", include_str!("../../forms/complaint.toml")),
    ("feedback.toml", include_str!("../../forms/feedback.toml")),
    ("operator_search.toml", include_str!("../../forms/operator_search.toml")),
    ("homestay_search.toml", include_str!("../../forms/homestay_search.toml")),
    ("status_check.toml", include_str!("../../forms/status_check.toml")),
];

#[derive(Debug, thiserror::Error)]
pub enum FormLoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {origin}: {message}")]
    Parse { origin: String, message: String },
    #[error("invalid form definitions:\n  {}", .0.join("\n  "))]
    Invalid(Vec<String>),
    #[error("no definition for form '{0}'")]
    Missing(FormKind),
}

fn parse_and_build(
    origin: &str,
    content: &str,
    definitions: &mut HashMap<FormKind, FormDefinition>,
    problems: &mut Vec<String>,
) -> Result<(), FormLoadError> {
    let toml_def: types::FormDefinitionToml = toml::from_str(content).map_err(|e| FormLoadError::Parse {
        origin: origin.to_string(),
        message: e.to_string(),
    })?;

    match validate::build_form_definition(&toml_def) {
        Ok(def) => {
            if definitions.contains_key(&def.kind) {
                problems.push(format!("duplicate form kind '{}' in {origin}", def.kind));
            } else {
                tracing::debug!("loaded form '{}' from {origin}", def.kind);
                definitions.insert(def.kind, def);
            }
        }
        Err(errors) => {
            problems.extend(errors.iter().map(|e: &DefinitionError| format!("{e} ({origin})")));
        }
    }
    Ok(())
}

/// Load and validate all form TOML files from the given directory.
///
/// A missing directory yields an empty map. Any parse or validation failure
/// fails the whole load, with every problem listed.
pub fn load_forms(dir: &Path) -> Result<HashMap<FormKind, FormDefinition>, FormLoadError> {
    if !dir.exists() {
        tracing::debug!("forms directory does not exist: {}", dir.display());
        return Ok(HashMap::new());
    }

    let read_err = |source| FormLoadError::Read {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(read_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    paths.sort();

    let mut definitions = HashMap::new();
    let mut problems = Vec::new();
    for path in paths {
        let content = std::fs::read_to_string(&path).map_err(|source| FormLoadError::Read {
            path: path.clone(),
            source,
        })?;
        parse_and_build(&path.display().to_string(), &content, &mut definitions, &mut problems)?;
    }

    if !problems.is_empty() {
        return Err(FormLoadError::Invalid(problems));
    }
    Ok(definitions)
}

/// Validated definitions for every form kind.
#[derive(Debug, Clone)]
pub struct FormRegistry {
    forms: HashMap<FormKind, Arc<FormDefinition>>,
}

impl FormRegistry {
    /// Definitions compiled into the binary.
    pub fn builtin() -> Result<Self, FormLoadError> {
        let mut definitions = HashMap::new();
        let mut problems = Vec::new();
        for (name, content) in BUILTIN_FORMS {
            parse_and_build(&format!("builtin:{name}"), content, &mut definitions, &mut problems)?;
        }
        if !problems.is_empty() {
            return Err(FormLoadError::Invalid(problems));
        }
        Self::from_definitions(definitions)
    }

    /// Built-ins, with any kind defined in `dir` replaced by the file's version.
    pub fn with_overrides(dir: Option<&Path>) -> Result<Self, FormLoadError> {
        let mut registry = Self::builtin()?;
        if let Some(dir) = dir {
            for (kind, def) in load_forms(dir)? {
                tracing::info!("form '{kind}' overridden from {}", dir.display());
                registry.forms.insert(kind, Arc::new(def));
            }
        }
        Ok(registry)
    }

    /// Build from a complete set of definitions; every kind must be present.
    pub fn from_definitions(definitions: HashMap<FormKind, FormDefinition>) -> Result<Self, FormLoadError> {
        if let Some(missing) = FormKind::ALL.into_iter().find(|k| !definitions.contains_key(k)) {
            return Err(FormLoadError::Missing(missing));
        }
        Ok(Self {
            forms: definitions.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        })
    }

    pub fn get(&self, kind: FormKind) -> Option<Arc<FormDefinition>> {
        self.forms.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<FormKind> {
        let mut kinds: Vec<FormKind> = self.forms.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fields::FieldValue;
    use types::{FinalizeAction, ValidatorSpec};

    #[test]
    fn builtin_forms_all_load() {
        let registry = FormRegistry::builtin().unwrap();
        assert_eq!(registry.kinds(), FormKind::ALL.to_vec());
    }

    #[test]
    fn ex_gratia_field_sequence() {
        let registry = FormRegistry::builtin().unwrap();
        let def = registry.get(FormKind::ExGratiaApplication).unwrap();
        assert_eq!(def.finalize, FinalizeAction::Submit);
        assert!(def.confirm);
        assert_eq!(def.fields[0].name, "name");
        assert_eq!(def.fields[1].name, "father_name");
        assert_eq!(def.fields.last().map(|f| f.name.as_str()), Some("location"));
        assert!(def.fields.last().is_some_and(|f| f.is_side_effect()));
        let ward = &def.fields[def.index_of("ward").unwrap()];
        assert_eq!(ward.validator, ValidatorSpec::Numeric { max_digits: 4 });
    }

    #[test]
    fn ex_gratia_damage_branches_converge() {
        let registry = FormRegistry::builtin().unwrap();
        let def = registry.get(FormKind::ExGratiaApplication).unwrap();
        let damage = def.index_of("damage_type").unwrap();
        let description = def.index_of("damage_description").unwrap();

        for (choice, follow_up) in [
            ("house", "house_damage_extent"),
            ("crop", "crop_area"),
            ("livestock", "livestock_count"),
        ] {
            let next = def.next_after(damage, &FieldValue::Choice(choice.into())).unwrap();
            assert_eq!(def.fields[next].name, follow_up);
            let after = def.next_after(next, &FieldValue::Text("x".into())).unwrap();
            assert_eq!(after, description, "{choice} branch converges");
        }
    }

    #[test]
    fn lookup_forms_name_their_tables() {
        let registry = FormRegistry::builtin().unwrap();
        assert_eq!(
            registry.get(FormKind::OperatorSearch).unwrap().directory.as_deref(),
            Some("operators")
        );
        assert_eq!(
            registry.get(FormKind::HomestaySearch).unwrap().directory.as_deref(),
            Some("homestays")
        );
    }

    #[test]
    fn missing_directory_is_empty() {
        let defs = load_forms(Path::new("/nonexistent/forms")).unwrap();
        assert!(defs.is_empty());
    }

    #[test]
    fn incomplete_registry_is_rejected() {
        let err = FormRegistry::from_definitions(HashMap::new()).unwrap_err();
        assert!(matches!(err, FormLoadError::Missing(_)));
    }
}
