use std::sync::Arc;

use crate::domain::lead::{LeadRecord, LeadScore, Urgency};
use crate::territory::TerritoryDirectory;

/// Required fields a lead may have and still count as exploratory.
const EXPLORATORY_MAX_PRESENT: usize = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoringPolicy {
    /// Turns after which a lead with almost no data is scored `C`. `None` disables `C`.
    pub exploratory_min_turns: Option<u32>,
}

#[derive(Clone)]
pub struct LeadScorer {
    policy: ScoringPolicy,
    territories: Arc<dyn TerritoryDirectory>,
}

impl LeadScorer {
    pub fn new(policy: ScoringPolicy, territories: Arc<dyn TerritoryDirectory>) -> Self {
        Self { policy, territories }
    }

    pub fn policy(&self) -> ScoringPolicy {
        self.policy
    }

    /// Pure over the record: reads it, never writes it.
    pub fn score(&self, record: &LeadRecord) -> Option<LeadScore> {
        let data = &record.data;

        if data.required_fields_complete() {
            let covered =
                data.zone.as_deref().is_some_and(|zone| self.territories.covers(zone));
            let hot = data.urgency == Some(Urgency::Alta)
                && covered
                && data.machine.model.is_some();
            return Some(if hot { LeadScore::A } else { LeadScore::B });
        }

        let exploratory = data.required_fields_present() <= EXPLORATORY_MAX_PRESENT
            && self.policy.exploratory_min_turns.is_some_and(|min_turns| record.turns >= min_turns);
        exploratory.then_some(LeadScore::C)
    }
}

impl std::fmt::Debug for LeadScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeadScorer").field("policy", &self.policy).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::domain::lead::{Channel, ContactId, LeadRecord, LeadScore, Urgency};
    use crate::territory::{Salesperson, StaticTerritoryDirectory, Territory};

    use super::{LeadScorer, ScoringPolicy};

    fn scorer(exploratory_min_turns: Option<u32>) -> LeadScorer {
        let directory = StaticTerritoryDirectory::new(vec![Territory {
            zone: "Buenos Aires".to_owned(),
            aliases: Vec::new(),
            salesperson: Salesperson { id: "sp-ba".to_owned(), name: "Marta".to_owned() },
        }]);
        LeadScorer::new(ScoringPolicy { exploratory_min_turns }, Arc::new(directory))
    }

    fn complete_record(zone: &str) -> LeadRecord {
        let mut record = LeadRecord::new(ContactId("c-1".to_owned()), Channel::Instagram);
        record.data.name = Some("Juan".to_owned());
        record.data.zone = Some(zone.to_owned());
        record.data.machine.brand = Some("Bobcat".to_owned());
        record.data.machine.model = Some("S70".to_owned());
        record.data.implement_of_interest = Some("balde".to_owned());
        record.data.urgency = Some(Urgency::Alta);
        record
    }

    #[test]
    fn incomplete_record_has_no_score() {
        let mut record = LeadRecord::new(ContactId("c-1".to_owned()), Channel::Whatsapp);
        record.data.implement_of_interest = Some("balde".to_owned());
        record.data.machine.brand = Some("Bobcat".to_owned());
        record.turns = 10;

        assert_eq!(scorer(Some(3)).score(&record), None);
    }

    #[test]
    fn hot_lead_in_covered_zone_scores_a() {
        assert_eq!(scorer(Some(3)).score(&complete_record("buenos aires")), Some(LeadScore::A));
    }

    #[test]
    fn complete_lead_without_urgency_coverage_or_model_scores_b() {
        let scorer = scorer(Some(3));

        let mut record = complete_record("Buenos Aires");
        record.data.urgency = Some(Urgency::Media);
        assert_eq!(scorer.score(&record), Some(LeadScore::B));

        let record = complete_record("Jujuy");
        assert_eq!(scorer.score(&record), Some(LeadScore::B));

        let mut record = complete_record("Buenos Aires");
        record.data.machine.model = None;
        assert_eq!(scorer.score(&record), Some(LeadScore::B));
    }

    #[test]
    fn exploratory_lead_scores_c_after_enough_turns() {
        let scorer = scorer(Some(3));
        let mut record = LeadRecord::new(ContactId("c-1".to_owned()), Channel::Whatsapp);
        record.data.implement_of_interest = Some("balde".to_owned());

        record.turns = 2;
        assert_eq!(scorer.score(&record), None);

        record.turns = 4;
        assert_eq!(scorer.score(&record), Some(LeadScore::C));
    }

    #[test]
    fn exploratory_score_is_disabled_without_threshold() {
        let mut record = LeadRecord::new(ContactId("c-1".to_owned()), Channel::Whatsapp);
        record.turns = 50;

        assert_eq!(scorer(None).score(&record), None);
    }

    #[test]
    fn scoring_is_deterministic_and_leaves_record_untouched() {
        let scorer = scorer(Some(3));
        let record = complete_record("Buenos Aires");
        let before = record.clone();

        assert_eq!(scorer.score(&record), scorer.score(&record));
        assert_eq!(record, before);
    }
}
