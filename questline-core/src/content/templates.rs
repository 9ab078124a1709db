//! Zero-network quest templates.
//!
//! Every template is structurally valid for any character and decision, so
//! the fallback path can never fail.

use super::quest::{ContentMetadata, GeneratedContent, Objective, WorldEffect};
use crate::character::{Character, Stat};
use crate::decision::{ContentType, Decision};

/// Build the fallback quest for `decision`.
pub(crate) fn fallback_quest(decision: &Decision, character: &Character) -> GeneratedContent {
    let xp = decision.difficulty.base_xp();
    let strongest = character.stats.strongest(3);
    let pick = |i: usize, default: Stat| strongest.get(i).copied().unwrap_or(default);

    let theme = if decision.theme.trim().is_empty() {
        "local trouble".to_string()
    } else {
        decision.theme.trim().to_string()
    };

    let (title, description, objectives, world_effects) = match decision.content_type {
        ContentType::Corrective => {
            let stat = decision
                .target_stat
                .or_else(|| character.stats.weakest().map(|(s, _)| s))
                .unwrap_or(Stat::Constitution);
            (
                format!("{} Drills at the Emberfall Yard", stat.name()),
                format!(
                    "The Wardens of the Lantern have noticed that {} hesitates when {} matters. \
                     Their drill sergeant offers a week of patient practice at the Emberfall yard, \
                     one honest step at a time, with {} as the focus.",
                    character.name,
                    stat_phrase(stat),
                    theme
                ),
                vec![
                    Objective::new(
                        format!(
                            "Complete a morning drill focused on {} at the yard",
                            stat.name().to_lowercase()
                        ),
                        stat,
                        xp,
                    ),
                    Objective::new(
                        "Report your progress to the drill sergeant before sundown",
                        stat,
                        xp,
                    ),
                ],
                Vec::new(),
            )
        }
        ContentType::Side => (
            "Errands along the Ashen Road".to_string(),
            format!(
                "Traders bound for Emberfall need a dependable escort and a steady hand with \
                 their cargo. {} can earn goodwill and a little coin by seeing the caravan \
                 safely to the gate. Word is the job touches on {}.",
                character.name, theme
            ),
            vec![
                Objective::new(
                    "Escort the caravan from the Glasswood edge to the Emberfall gate",
                    pick(0, Stat::Dexterity),
                    xp,
                ),
                Objective::new(
                    "Help the traders unload and tally their goods",
                    pick(1, Stat::Intelligence),
                    xp,
                ),
            ],
            vec![WorldEffect::new("caravan_escorted", "true")],
        ),
        ContentType::Main => (
            "The Lantern Wardens' Summons".to_string(),
            format!(
                "A runner from the Wardens of the Lantern brings word that Cinder Hounds were \
                 sighted near the Ashen Road. The wardens ask {} to scout the road and report \
                 before the next watch, with an eye on {}.",
                character.name, theme
            ),
            vec![
                Objective::new(
                    "Scout the Ashen Road for tracks of the Cinder Hounds",
                    pick(0, Stat::Dexterity),
                    xp,
                ),
                Objective::new(
                    "Deliver a written report to the Wardens of the Lantern",
                    Stat::Intelligence,
                    xp,
                ),
                Objective::new(
                    "Return to Emberfall and rest before the next watch",
                    Stat::Constitution,
                    xp,
                ),
            ],
            vec![WorldEffect::new("ashen_road_scouted", "true")],
        ),
    };

    GeneratedContent {
        title,
        description,
        objectives,
        world_effects,
        metadata: ContentMetadata::fallback(),
    }
}

fn stat_phrase(stat: Stat) -> &'static str {
    match stat {
        Stat::Strength => "raw strength",
        Stat::Dexterity => "quick hands",
        Stat::Constitution => "endurance",
        Stat::Intelligence => "careful study",
        Stat::Wisdom => "sound judgement",
        Stat::Charisma => "a persuasive word",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::StatBlock;
    use crate::decision::Difficulty;

    #[test]
    fn test_every_content_type_is_structurally_valid() {
        let character = Character::new("Mira", StatBlock::new([8, 14, 13, 12, 15, 16]));
        let decisions = [
            Decision::corrective(Stat::Strength, Difficulty::Easy, "weak"),
            Decision::side("lost goods", "balanced"),
            Decision {
                content_type: ContentType::Main,
                ..Decision::side("", "story")
            },
        ];

        for decision in &decisions {
            let content = fallback_quest(decision, &character);
            assert!(content.check_structure().is_ok(), "{:?}", decision.content_type);
            assert!(content.metadata.is_fallback);
        }
    }

    #[test]
    fn test_fallback_is_deterministic() {
        let character = Character::new("Mira", StatBlock::new([8, 14, 13, 12, 15, 16]));
        let decision = Decision::corrective(Stat::Strength, Difficulty::Medium, "weak");
        assert_eq!(
            fallback_quest(&decision, &character),
            fallback_quest(&decision, &character)
        );
        assert!(fallback_quest(&decision, &character)
            .objectives
            .iter()
            .all(|o| o.reward_stat == Stat::Strength));
    }

    #[test]
    fn test_incomplete_character_still_yields_content() {
        let character = Character::new("Nobody", StatBlock::empty());
        let decision = Decision::side("anything", "r");
        assert!(fallback_quest(&decision, &character)
            .check_structure()
            .is_ok());
    }
}
