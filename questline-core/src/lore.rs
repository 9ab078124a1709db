//! Canonical lore consumed read-only by context assembly and the Lorekeeper.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::error::PersistenceError;

/// Kinds of canonical lore entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoreKind {
    Place,
    Faction,
    Figure,
    Creature,
    Custom,
}

/// A single named piece of canon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreEntry {
    pub name: String,
    pub kind: LoreKind,
    pub description: String,
}

/// A static, versioned body of canonical lore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoreBook {
    pub version: u32,
    pub setting: String,
    pub entries: Vec<LoreEntry>,
    /// Terms that must never appear in generated content (anachronisms, retired canon).
    #[serde(default)]
    pub forbidden_terms: Vec<String>,
    /// Free-form rules the setting follows.
    #[serde(default)]
    pub rules: Vec<String>,
}

impl LoreBook {
    /// Load a lore book from a JSON file.
    pub async fn load_json(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let content = fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Names of every canonical entry.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// A prompt-ready excerpt bounded to `max_chars` characters.
    ///
    /// Entries are added whole, in order, until the next would overflow.
    pub fn excerpt(&self, max_chars: usize) -> String {
        let mut excerpt = format!("Setting: {} (canon v{})\n", self.setting, self.version);

        for rule in &self.rules {
            let line = format!("Rule: {rule}\n");
            if excerpt.chars().count() + line.chars().count() > max_chars {
                return excerpt;
            }
            excerpt.push_str(&line);
        }

        for entry in &self.entries {
            let line = format!("- {} ({:?}): {}\n", entry.name, entry.kind, entry.description);
            if excerpt.chars().count() + line.chars().count() > max_chars {
                break;
            }
            excerpt.push_str(&line);
        }

        excerpt
    }
}

impl Default for LoreBook {
    fn default() -> Self {
        let entry = |name: &str, kind: LoreKind, description: &str| LoreEntry {
            name: name.to_string(),
            kind,
            description: description.to_string(),
        };

        Self {
            version: 1,
            setting: "The Vale of Emberfall".to_string(),
            entries: vec![
                entry(
                    "Emberfall",
                    LoreKind::Place,
                    "A river town rebuilt around the cooled crater of a fallen star.",
                ),
                entry(
                    "The Ashen Road",
                    LoreKind::Place,
                    "The trade road climbing from Emberfall to the northern passes.",
                ),
                entry(
                    "Wardens of the Lantern",
                    LoreKind::Faction,
                    "Volunteer watchmen who keep the road lamps lit through the long nights.",
                ),
                entry(
                    "Mother Quill",
                    LoreKind::Figure,
                    "The town archivist, who trades favours for forgotten stories.",
                ),
                entry(
                    "Cinder Hounds",
                    LoreKind::Creature,
                    "Lean scavengers drawn to warmth and spilled lamp oil.",
                ),
                entry(
                    "The Glasswood",
                    LoreKind::Place,
                    "A forest of brittle crystal trees east of the crater.",
                ),
            ],
            forbidden_terms: vec![
                "gunpowder".to_string(),
                "electricity".to_string(),
                "smartphone".to_string(),
                "dragon".to_string(),
            ],
            rules: vec![
                "Magic is rare, costly and never casual.".to_string(),
                "There are no dragons in the Vale.".to_string(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_respects_bound() {
        let lore = LoreBook::default();
        let excerpt = lore.excerpt(200);
        assert!(excerpt.chars().count() <= 200);
        assert!(excerpt.starts_with("Setting: The Vale of Emberfall"));
    }

    #[test]
    fn test_excerpt_includes_entries_when_room() {
        let lore = LoreBook::default();
        let excerpt = lore.excerpt(10_000);
        for name in lore.names() {
            assert!(excerpt.contains(name), "missing {name}");
        }
    }

    #[tokio::test]
    async fn test_load_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("lore.json");
        let lore = LoreBook::default();
        tokio::fs::write(&path, serde_json::to_string(&lore).unwrap())
            .await
            .unwrap();

        let loaded = LoreBook::load_json(&path).await.unwrap();
        assert_eq!(loaded.setting, lore.setting);
        assert_eq!(loaded.entries.len(), lore.entries.len());
    }
}
