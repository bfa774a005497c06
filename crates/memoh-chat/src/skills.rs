//! Skill loading — SKILL.md instruction documents the gateway can inject
//! into the agent's context.
//!
//! A skill is a directory containing a `SKILL.md` file with YAML
//! frontmatter (`name`, `description`, optional `metadata`) followed by the
//! markdown body that becomes the skill content.

use std::path::PathBuf;

use memoh_protocol::UsableSkill;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid frontmatter: {0}")]
    Frontmatter(String),
}

/// Resolves skill tags to their full instruction documents. Failures are
/// never fatal to a chat round — the resolver logs and continues without
/// the skill.
pub trait SkillLoader: Send + Sync {
    fn load_usable(&self, names: &[String]) -> Result<Vec<UsableSkill>, SkillError>;
}

/// Directory-backed loader: `{root}/{name}/SKILL.md`.
pub struct DirSkillLoader {
    root: PathBuf,
}

impl DirSkillLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SkillLoader for DirSkillLoader {
    fn load_usable(&self, names: &[String]) -> Result<Vec<UsableSkill>, SkillError> {
        let mut skills = Vec::new();
        for name in names {
            let path = self.root.join(name).join("SKILL.md");
            if !path.is_file() {
                debug!(skill = %name, "skill tag has no document; skipping");
                continue;
            }
            let raw = std::fs::read_to_string(&path)?;
            match parse_skill_md(&raw) {
                Some((meta, body)) => skills.push(UsableSkill {
                    name: meta.name,
                    description: meta.description,
                    content: body,
                    metadata: meta.metadata,
                }),
                None => {
                    return Err(SkillError::Frontmatter(format!(
                        "{} has no valid frontmatter",
                        path.display()
                    )))
                }
            }
        }
        Ok(skills)
    }
}

#[derive(Debug, Deserialize)]
struct SkillMeta {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
}

/// Parse a SKILL.md file: a document that opens with a `---` fence, YAML
/// until the next `---` line, markdown body after it.
fn parse_skill_md(content: &str) -> Option<(SkillMeta, String)> {
    let (yaml, body) = split_frontmatter(content)?;
    let meta: SkillMeta = serde_yaml::from_str(&yaml).ok()?;
    Some((meta, body))
}

/// Line-oriented frontmatter split. Leading blank lines before the opening
/// fence are tolerated; a document whose fence never closes is rejected
/// rather than treated as all-YAML.
fn split_frontmatter(content: &str) -> Option<(String, String)> {
    let mut lines = content.lines();

    let opening = lines.by_ref().find(|line| !line.trim().is_empty())?;
    if opening.trim_end() != "---" {
        return None;
    }

    let mut yaml = String::new();
    let mut closed = false;
    for line in lines.by_ref() {
        if line.trim_end() == "---" {
            closed = true;
            break;
        }
        yaml.push_str(line);
        yaml.push('\n');
    }
    if !closed {
        return None;
    }

    let body = lines.collect::<Vec<_>>().join("\n");
    Some((yaml, body.trim_start_matches('\n').to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_frontmatter_and_body() {
        let doc = "---\nname: digest\ndescription: summarize things\n---\nAlways be brief.\n";
        let (meta, body) = parse_skill_md(doc).unwrap();
        assert_eq!(meta.name, "digest");
        assert_eq!(meta.description, "summarize things");
        assert_eq!(body, "Always be brief.");
    }

    #[test]
    fn tolerates_blank_lines_before_the_fence() {
        let doc = "\n\n---\nname: digest\n---\nbody";
        let (meta, body) = parse_skill_md(doc).unwrap();
        assert_eq!(meta.name, "digest");
        assert_eq!(body, "body");
    }

    #[test]
    fn empty_body_is_allowed() {
        let doc = "---\nname: digest\n---";
        let (meta, body) = parse_skill_md(doc).unwrap();
        assert_eq!(meta.name, "digest");
        assert!(body.is_empty());
    }

    #[test]
    fn rejects_documents_without_frontmatter() {
        assert!(parse_skill_md("just markdown").is_none());
        // An unterminated fence is not silently treated as all-YAML.
        assert!(parse_skill_md("---\nname: digest\nno closing fence").is_none());
    }
}
