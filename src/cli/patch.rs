use std::path::PathBuf;

use anyhow::{bail, Result};

use super::Session;
use crate::content::patch::{apply_patches, load_patch_file, parse_assignment, FieldPatch, PatchOutcome};

#[derive(Debug, Clone, Default)]
pub struct PatchConfig {
    pub file: Option<PathBuf>,
    pub id: Option<String>,
    pub content: Option<String>,
    pub content_en: Option<String>,
    /// `key=value` overrides merged into `details`.
    pub set: Vec<String>,
    /// `key=value` overrides merged into `details_en`.
    pub set_en: Vec<String>,
}

impl PatchConfig {
    /// Patches from the file (if any) followed by the one built from flags.
    pub fn patches(&self) -> Result<Vec<FieldPatch>> {
        let mut out = match &self.file {
            Some(path) => load_patch_file(path)?,
            None => Vec::new(),
        };
        if let Some(id) = &self.id {
            let mut patch = FieldPatch {
                id: id.clone(),
                content: self.content.clone(),
                content_en: self.content_en.clone(),
                ..Default::default()
            };
            for raw in &self.set {
                let (k, v) = parse_assignment(raw)?;
                patch.details.insert(k, v);
            }
            for raw in &self.set_en {
                let (k, v) = parse_assignment(raw)?;
                patch.details_en.insert(k, v);
            }
            out.push(patch);
        } else if self.content.is_some() || self.content_en.is_some() || !self.set.is_empty() || !self.set_en.is_empty() {
            bail!("field overrides need --id");
        }
        if out.is_empty() {
            bail!("nothing to patch: pass --file or --id");
        }
        if let Some(empty) = out.iter().find(|p| p.is_empty()) {
            bail!("patch for {} has no fields", empty.id);
        }
        Ok(out)
    }
}

pub async fn run(session: &Session, cfg: PatchConfig) -> Result<Vec<(String, PatchOutcome)>> {
    let patches = cfg.patches()?;
    let results = apply_patches(session.store(), &patches).await;
    for (id, outcome) in &results {
        match outcome {
            PatchOutcome::Updated(fields) => println!("{id}: updated {}", fields.join(", ")),
            PatchOutcome::NoChanges => println!("{id}: already up to date"),
            PatchOutcome::NotFound => println!("{id}: not found, skipped"),
            PatchOutcome::Rejected(reason) => println!("{id}: rejected ({reason})"),
            PatchOutcome::Failed(reason) => println!("{id}: failed ({reason})"),
        }
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flags_build_one_patch() {
        let cfg = PatchConfig {
            id: Some("B26-00378".into()),
            set: vec!["choice_a=날씨 탓하며 수다".into()],
            set_en: vec!["choice_a=Blame the weather".into()],
            ..Default::default()
        };
        let patches = cfg.patches().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].details["choice_a"], json!("날씨 탓하며 수다"));
        assert_eq!(patches[0].details_en["choice_a"], json!("Blame the weather"));
    }

    #[test]
    fn file_and_flags_combine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patches.json");
        std::fs::write(&path, r#"[{ "id": "T26-00362", "content_en": "Found a secret passage?" }]"#).unwrap();
        let cfg = PatchConfig {
            file: Some(path),
            id: Some("T26-00001".into()),
            content: Some("새 질문".into()),
            ..Default::default()
        };
        let ids: Vec<String> = cfg.patches().unwrap().into_iter().map(|p| p.id).collect();
        assert_eq!(ids, vec!["T26-00362", "T26-00001"]);
    }

    #[test]
    fn invalid_invocations_are_refused() {
        assert!(PatchConfig::default().patches().is_err());
        let no_id = PatchConfig { content: Some("x".into()), ..Default::default() };
        assert!(no_id.patches().is_err());
        let empty = PatchConfig { id: Some("T-1".into()), ..Default::default() };
        assert!(empty.patches().is_err());
    }
}
