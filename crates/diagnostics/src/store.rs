// diagnostics/store.rs
// Merged view of read-only builtin templates and user-defined templates
// persisted as one JSON document.

use crate::template::{normalize_template, DiagnosticTemplate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("template name is required")]
    NameRequired,

    #[error("detector type is required")]
    DetectorTypeRequired,

    #[error("template id is required")]
    IdRequired,

    #[error("built-in template {0:?} is read-only; duplicate to customize")]
    BuiltinReadOnly(String),

    #[error("invalid template store file: {0}")]
    InvalidStoreFile(String),

    #[error("invalid template {0}")]
    InvalidTemplate(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk shape of the custom store: `{"templates": [...]}`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredTemplates {
    templates: Vec<DiagnosticTemplate>,
}

#[derive(Debug)]
pub struct TemplateStore {
    path: PathBuf,
    builtins: HashMap<String, DiagnosticTemplate>,
    custom: RwLock<HashMap<String, DiagnosticTemplate>>,
}

/// `<home>/.esx-doctor/templates.json`, with a working-directory fallback
/// when no home directory is resolvable.
pub fn default_store_path() -> PathBuf {
    match dirs::home_dir() {
        Some(home) => home.join(".esx-doctor").join("templates.json"),
        None => PathBuf::from(".esx-doctor-templates.json"),
    }
}

impl TemplateStore {
    /// Build a store over `path` (default location when `None`). A missing
    /// file yields an empty custom map; an unreadable or invalid one fails
    /// the load. Loaded entries colliding with a builtin ID are dropped.
    pub fn open(
        path: Option<PathBuf>,
        builtins: Vec<DiagnosticTemplate>,
    ) -> Result<Self, StoreError> {
        let path = path.unwrap_or_else(default_store_path);
        let builtins: HashMap<String, DiagnosticTemplate> = builtins
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let custom = Self::load_custom(&path, &builtins)?;
        Ok(Self {
            path,
            builtins,
            custom: RwLock::new(custom),
        })
    }

    fn load_custom(
        path: &Path,
        builtins: &HashMap<String, DiagnosticTemplate>,
    ) -> Result<HashMap<String, DiagnosticTemplate>, StoreError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(HashMap::new());
            }
            Err(err) => return Err(err.into()),
        };
        let stored: StoredTemplates = serde_json::from_str(&data)
            .map_err(|err| StoreError::InvalidStoreFile(err.to_string()))?;
        let mut custom = HashMap::new();
        for t in stored.templates {
            let id = t.id.trim();
            if id.is_empty() || builtins.contains_key(id) {
                continue;
            }
            let t = normalize_template(t);
            custom.insert(t.id.clone(), t);
        }
        Ok(custom)
    }

    /// Serialize the whole custom map, write-then-rename into place. Called
    /// with the write lock held so mutations persist one at a time.
    fn persist_custom(&self, custom: &HashMap<String, DiagnosticTemplate>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o755));
            }
        }
        let mut templates: Vec<DiagnosticTemplate> = custom.values().cloned().collect();
        templates.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        let data = serde_json::to_vec_pretty(&StoredTemplates { templates })
            .map_err(|err| StoreError::InvalidStoreFile(err.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644));
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Union of builtins and custom templates, sorted case-insensitively by
    /// name with ID as tiebreak.
    pub fn list(&self) -> Vec<DiagnosticTemplate> {
        let custom = self.custom.read().expect("template store lock poisoned");
        let mut out: Vec<DiagnosticTemplate> = self
            .builtins
            .values()
            .chain(custom.values())
            .cloned()
            .map(normalize_template)
            .collect();
        out.sort_by(|a, b| {
            let an = a.name.to_lowercase();
            let bn = b.name.to_lowercase();
            an.cmp(&bn).then_with(|| a.id.cmp(&b.id))
        });
        out
    }

    /// Resolve templates for an engine run. An empty ID list selects every
    /// enabled template; explicit IDs prefer custom over builtin.
    pub fn select(&self, ids: &[String]) -> Vec<DiagnosticTemplate> {
        let custom = self.custom.read().expect("template store lock poisoned");
        if ids.is_empty() {
            return self
                .builtins
                .values()
                .chain(custom.values())
                .filter(|t| t.enabled)
                .cloned()
                .map(normalize_template)
                .collect();
        }
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            if let Some(t) = custom.get(id).or_else(|| self.builtins.get(id)) {
                out.push(normalize_template(t.clone()));
            }
        }
        out
    }

    /// Insert or replace a custom template. Empty IDs are derived from the
    /// name; builtin IDs are rejected.
    pub fn upsert(&self, t: DiagnosticTemplate) -> Result<DiagnosticTemplate, StoreError> {
        let mut t = normalize_template(t);
        if t.id.is_empty() {
            t.id = template_id_from_name(&t.name);
        }
        if t.name.is_empty() {
            return Err(StoreError::NameRequired);
        }
        if t.detector.kind.is_empty() {
            return Err(StoreError::DetectorTypeRequired);
        }
        if self.builtins.contains_key(&t.id) {
            return Err(StoreError::BuiltinReadOnly(t.id));
        }
        let mut custom = self.custom.write().expect("template store lock poisoned");
        custom.insert(t.id.clone(), t.clone());
        self.persist_custom(&custom)?;
        Ok(t)
    }

    /// Delete a custom template. Builtins reject; unknown IDs succeed.
    pub fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StoreError::IdRequired);
        }
        if self.builtins.contains_key(id) {
            return Err(StoreError::BuiltinReadOnly(id.to_string()));
        }
        let mut custom = self.custom.write().expect("template store lock poisoned");
        custom.remove(id);
        self.persist_custom(&custom)
    }

    /// Bulk import. With `replace`, the existing custom map is dropped
    /// first. Entries colliding with builtins or missing name/detector type
    /// are skipped silently.
    pub fn import(
        &self,
        templates: Vec<DiagnosticTemplate>,
        replace: bool,
    ) -> Result<(), StoreError> {
        let mut custom = self.custom.write().expect("template store lock poisoned");
        if replace {
            custom.clear();
        }
        for t in templates {
            let mut t = normalize_template(t);
            if t.id.is_empty() {
                t.id = template_id_from_name(&t.name);
            }
            if self.builtins.contains_key(&t.id) {
                continue;
            }
            if t.name.is_empty() || t.detector.kind.is_empty() {
                continue;
            }
            custom.insert(t.id.clone(), t);
        }
        self.persist_custom(&custom)
    }

    pub fn export(&self) -> Vec<DiagnosticTemplate> {
        self.list()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Derive a custom-template ID from its display name: lowercase, runs of
/// non-alphanumerics collapsed to a single `.`, `custom.` prefix.
fn template_id_from_name(name: &str) -> String {
    let name = name.trim().to_lowercase();
    let mut slug = String::with_capacity(name.len());
    let mut last_dot = false;
    for ch in name.chars() {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            slug.push(ch);
            last_dot = false;
        } else if !last_dot {
            slug.push('.');
            last_dot = true;
        }
    }
    let slug = slug.trim_matches('.');
    if slug.is_empty() {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        return format!("custom.{}", nanos);
    }
    format!("custom.{}", slug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;
    use tempfile::TempDir;

    fn builtin(id: &str, name: &str) -> DiagnosticTemplate {
        let mut t = DiagnosticTemplate {
            id: id.into(),
            name: name.into(),
            enabled: true,
            severity: Severity::High,
            ..Default::default()
        };
        t.detector.kind = "high_ready".into();
        t
    }

    fn custom(name: &str) -> DiagnosticTemplate {
        let mut t = DiagnosticTemplate {
            name: name.into(),
            enabled: true,
            ..Default::default()
        };
        t.detector.kind = "threshold_sustained".into();
        t
    }

    fn store_at(dir: &TempDir) -> TemplateStore {
        TemplateStore::open(
            Some(dir.path().join("templates.json")),
            vec![builtin("b1", "Builtin One")],
        )
        .unwrap()
    }

    #[test]
    fn test_missing_file_yields_empty_custom() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_invalid_json_fails_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("templates.json");
        fs::write(&path, "not json").unwrap();
        let err = TemplateStore::open(Some(path), vec![]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidStoreFile(_)));
    }

    #[test]
    fn test_upsert_delete_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);

        let saved = store.upsert(custom("My Rule")).unwrap();
        assert_eq!(saved.id, "custom.my.rule");

        let data = fs::read_to_string(store.path()).unwrap();
        let stored: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(stored["templates"].as_array().unwrap().len(), 1);
        assert_eq!(stored["templates"][0]["id"], "custom.my.rule");

        store.delete("custom.my.rule").unwrap();
        let data = fs::read_to_string(store.path()).unwrap();
        let stored: serde_json::Value = serde_json::from_str(&data).unwrap();
        assert_eq!(stored["templates"].as_array().unwrap().len(), 0);

        let err = store.delete("b1").unwrap_err();
        assert!(matches!(err, StoreError::BuiltinReadOnly(_)));
    }

    #[test]
    fn test_delete_missing_id_is_silent() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        store.delete("custom.never.existed").unwrap();
    }

    #[test]
    fn test_upsert_builtin_id_rejected_and_store_untouched() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        let mut t = custom("Evil");
        t.id = "b1".into();
        let err = store.upsert(t).unwrap_err();
        assert!(matches!(err, StoreError::BuiltinReadOnly(_)));
        // Nothing persisted, nothing in the custom view.
        assert!(!store.path().exists());
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn test_upsert_requires_name() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        let mut t = custom("x");
        t.name = String::new();
        t.id = "custom.x".into();
        assert!(matches!(store.upsert(t), Err(StoreError::NameRequired)));
    }

    #[test]
    fn test_load_drops_builtin_collisions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("templates.json");
        let mut shadowed = custom("Shadow");
        shadowed.id = "b1".into();
        let mut kept = custom("Kept");
        kept.id = "custom.kept".into();
        let doc = serde_json::json!({"templates": [shadowed, kept]});
        fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store =
            TemplateStore::open(Some(path), vec![builtin("b1", "Builtin One")]).unwrap();
        let listed = store.list();
        assert_eq!(listed.len(), 2);
        let b1 = listed.iter().find(|t| t.id == "b1").unwrap();
        assert_eq!(b1.name, "Builtin One");
    }

    #[test]
    fn test_list_sorted_case_insensitively_with_id_tiebreak() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        store.upsert(custom("alpha rule")).unwrap();
        store.upsert(custom("Zeta Rule")).unwrap();
        let names: Vec<String> = store.list().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["alpha rule", "Builtin One", "Zeta Rule"]);
    }

    #[test]
    fn test_select_prefers_custom_over_builtin() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        store.upsert(custom("Mine")).unwrap();

        // Empty list: all enabled.
        assert_eq!(store.select(&[]).len(), 2);

        let picked = store.select(&["custom.mine".to_string(), "b1".to_string()]);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].id, "custom.mine");
        assert_eq!(picked[1].id, "b1");

        // Unknown and blank IDs resolve to nothing.
        assert!(store.select(&["nope".to_string(), "  ".to_string()]).is_empty());
    }

    #[test]
    fn test_import_replace_and_skip_rules() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        store.upsert(custom("Old Rule")).unwrap();

        let mut colliding = custom("Collides");
        colliding.id = "b1".into();
        let mut nameless = custom("");
        nameless.id = "custom.nameless".into();
        let incoming = vec![custom("New Rule"), colliding, nameless];

        store.import(incoming, true).unwrap();
        let listed = store.list();
        // Builtin plus the one valid import; the old rule was replaced away.
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|t| t.id == "custom.new.rule"));
        assert!(!listed.iter().any(|t| t.id == "custom.old.rule"));
    }

    #[test]
    fn test_import_merge_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let store = store_at(&dir);
        store.upsert(custom("Old Rule")).unwrap();
        store.import(vec![custom("New Rule")], false).unwrap();
        let listed = store.list();
        assert!(listed.iter().any(|t| t.id == "custom.old.rule"));
        assert!(listed.iter().any(|t| t.id == "custom.new.rule"));
    }

    #[test]
    fn test_persistence_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("templates.json");
        {
            let store =
                TemplateStore::open(Some(path.clone()), vec![builtin("b1", "Builtin One")])
                    .unwrap();
            store.upsert(custom("Durable Rule")).unwrap();
        }
        let store =
            TemplateStore::open(Some(path), vec![builtin("b1", "Builtin One")]).unwrap();
        assert!(store.list().iter().any(|t| t.id == "custom.durable.rule"));
    }

    #[test]
    fn test_id_slug_derivation() {
        assert_eq!(template_id_from_name("My Rule"), "custom.my.rule");
        assert_eq!(template_id_from_name("  CPU -- hot!  "), "custom.cpu.hot");
        assert_eq!(template_id_from_name("a1 b2"), "custom.a1.b2");
        assert!(template_id_from_name("???").starts_with("custom."));
    }
}
