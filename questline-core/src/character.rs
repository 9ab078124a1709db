//! Characters and their six core stats.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Stat experience needed to raise a stat by one point.
pub const STAT_XP_PER_POINT: u32 = 100;

/// Unique identifier for a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharacterId(Uuid);

impl CharacterId {
    /// Create a new unique character ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CharacterId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CharacterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six character stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stat {
    #[serde(rename = "STR", alias = "str", alias = "strength", alias = "Strength")]
    Strength,
    #[serde(rename = "DEX", alias = "dex", alias = "dexterity", alias = "Dexterity")]
    Dexterity,
    #[serde(rename = "CON", alias = "con", alias = "constitution", alias = "Constitution")]
    Constitution,
    #[serde(rename = "INT", alias = "int", alias = "intelligence", alias = "Intelligence")]
    Intelligence,
    #[serde(rename = "WIS", alias = "wis", alias = "wisdom", alias = "Wisdom")]
    Wisdom,
    #[serde(rename = "CHA", alias = "cha", alias = "charisma", alias = "Charisma")]
    Charisma,
}

impl Stat {
    /// All stats in canonical order.
    pub const ALL: [Stat; 6] = [
        Stat::Strength,
        Stat::Dexterity,
        Stat::Constitution,
        Stat::Intelligence,
        Stat::Wisdom,
        Stat::Charisma,
    ];

    /// Three-letter code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Stat::Strength => "STR",
            Stat::Dexterity => "DEX",
            Stat::Constitution => "CON",
            Stat::Intelligence => "INT",
            Stat::Wisdom => "WIS",
            Stat::Charisma => "CHA",
        }
    }

    /// Display name.
    pub fn name(&self) -> &'static str {
        match self {
            Stat::Strength => "Strength",
            Stat::Dexterity => "Dexterity",
            Stat::Constitution => "Constitution",
            Stat::Intelligence => "Intelligence",
            Stat::Wisdom => "Wisdom",
            Stat::Charisma => "Charisma",
        }
    }
}

impl std::str::FromStr for Stat {
    type Err = String;

    /// Accepts the three-letter code or the full name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Stat::ALL
            .into_iter()
            .find(|stat| {
                stat.code().eq_ignore_ascii_case(needle) || stat.name().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| format!("unknown stat '{needle}'"))
    }
}

impl std::fmt::Display for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Stat values for a character. Missing entries mean incomplete data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatBlock {
    values: BTreeMap<Stat, u32>,
}

impl StatBlock {
    /// Build a complete block in canonical order (STR, DEX, CON, INT, WIS, CHA).
    pub fn new(values: [u32; 6]) -> Self {
        Self {
            values: Stat::ALL.into_iter().zip(values).collect(),
        }
    }

    /// An empty block (used to model partial character data).
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, stat: Stat) -> Option<u32> {
        self.values.get(&stat).copied()
    }

    pub fn set(&mut self, stat: Stat, value: u32) {
        self.values.insert(stat, value);
    }

    /// Stats with no recorded value.
    pub fn missing(&self) -> Vec<Stat> {
        Stat::ALL
            .into_iter()
            .filter(|s| !self.values.contains_key(s))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }

    /// Mean over recorded stats (0.0 when none are recorded).
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.values().map(|v| f64::from(*v)).sum::<f64>() / self.values.len() as f64
    }

    /// The lowest recorded stat; ties resolve to canonical order.
    pub fn weakest(&self) -> Option<(Stat, u32)> {
        Stat::ALL
            .into_iter()
            .filter_map(|s| self.get(s).map(|v| (s, v)))
            .min_by_key(|(_, v)| *v)
    }

    /// Recorded stats sorted by value, highest first; ties resolve to canonical order.
    pub fn ranked(&self) -> Vec<(Stat, u32)> {
        let mut ranked: Vec<(Stat, u32)> = Stat::ALL
            .into_iter()
            .filter_map(|s| self.get(s).map(|v| (s, v)))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    /// The `n` highest stats.
    pub fn strongest(&self, n: usize) -> Vec<Stat> {
        self.ranked().into_iter().take(n).map(|(s, _)| s).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Stat, u32)> + '_ {
        self.values.iter().map(|(s, v)| (*s, *v))
    }
}

/// A player character as seen by the quest pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: CharacterId,
    pub name: String,
    pub level: u32,
    /// Total experience earned.
    pub xp: u32,
    pub stats: StatBlock,
    /// Experience accumulated per stat toward the next point.
    #[serde(default)]
    pub stat_xp: BTreeMap<Stat, u32>,
    #[serde(default)]
    pub backstory: Option<String>,
}

impl Character {
    /// Create a level-1 character with the given stats.
    pub fn new(name: impl Into<String>, stats: StatBlock) -> Self {
        Self {
            id: CharacterId::new(),
            name: name.into(),
            level: 1,
            xp: 0,
            stats,
            stat_xp: BTreeMap::new(),
            backstory: None,
        }
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_backstory(mut self, backstory: impl Into<String>) -> Self {
        self.backstory = Some(backstory.into());
        self
    }

    /// Award experience toward a stat. Returns the number of stat points gained.
    pub fn award(&mut self, stat: Stat, xp: u32) -> u32 {
        self.xp = self.xp.saturating_add(xp);

        let pool = self.stat_xp.entry(stat).or_insert(0);
        *pool = pool.saturating_add(xp);
        let gained = *pool / STAT_XP_PER_POINT;
        *pool %= STAT_XP_PER_POINT;

        if gained > 0 {
            let current = self.stats.get(stat).unwrap_or(0);
            self.stats.set(stat, current.saturating_add(gained));
        }
        gained
    }
}
