use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use exam_core::model::{Category, Question, QuestionId, SessionPolicy};

/// A category whose pool held fewer questions than the policy asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deficiency {
    pub category: Category,
    pub requested: u32,
    pub available: u32,
}

/// Result of assembling a question set.
#[derive(Debug, Clone, PartialEq)]
pub struct Assembly {
    pub questions: Vec<Question>,
    pub requested: u32,
    pub deficiencies: Vec<Deficiency>,
    /// Ids drawn more than once (from overlapping pools) and dropped.
    pub duplicates_removed: Vec<QuestionId>,
}

impl Assembly {
    #[must_use]
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// True when the set has exactly the size the policy asked for.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        u32::try_from(self.questions.len()).is_ok_and(|n| n == self.requested)
    }

    #[must_use]
    pub fn question_ids(&self) -> Vec<QuestionId> {
        self.questions.iter().map(|q| q.id().clone()).collect()
    }
}

/// Draws a session's questions from per-category pools according to a policy.
///
/// Stateless; every call makes a fresh random draw.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionAssembler;

impl SessionAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Assemble using the thread-local RNG.
    #[must_use]
    pub fn assemble(
        &self,
        pools: &HashMap<Category, Vec<Question>>,
        policy: &SessionPolicy,
    ) -> Assembly {
        let mut rng = rand::rng();
        self.assemble_with(pools, policy, &mut rng)
    }

    /// Assemble with a caller-supplied RNG.
    ///
    /// - Each category draws its count without replacement; short pools give
    ///   what they have and are reported as deficiencies.
    /// - The combined list is shuffled so categories interleave.
    /// - Repeated ids are dropped, keeping the first occurrence.
    pub fn assemble_with<R: Rng + ?Sized>(
        &self,
        pools: &HashMap<Category, Vec<Question>>,
        policy: &SessionPolicy,
        rng: &mut R,
    ) -> Assembly {
        let mut drawn: Vec<&Question> = Vec::new();
        let mut deficiencies = Vec::new();

        for (category, count) in policy.iter() {
            let pool = pools.get(category).map_or(&[][..], Vec::as_slice);
            let want = usize::try_from(count).unwrap_or(usize::MAX);

            if pool.len() < want {
                let available = u32::try_from(pool.len()).unwrap_or(u32::MAX);
                warn!(
                    category = %category,
                    requested = count,
                    available,
                    "question pool smaller than policy requires"
                );
                deficiencies.push(Deficiency {
                    category: category.clone(),
                    requested: count,
                    available,
                });
            }

            let mut candidates: Vec<&Question> = pool.iter().collect();
            candidates.shuffle(rng);
            candidates.truncate(want);
            drawn.extend(candidates);
        }

        drawn.shuffle(rng);

        let mut seen = HashSet::with_capacity(drawn.len());
        let mut questions = Vec::with_capacity(drawn.len());
        let mut duplicates_removed = Vec::new();
        for question in drawn {
            if seen.insert(question.id()) {
                questions.push(question.clone());
            } else {
                duplicates_removed.push(question.id().clone());
            }
        }

        if !duplicates_removed.is_empty() {
            warn!(
                count = duplicates_removed.len(),
                ids = ?duplicates_removed,
                "removed duplicate questions from assembled session"
            );
        }

        Assembly {
            questions,
            requested: policy.total(),
            deficiencies,
            duplicates_removed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{Difficulty, QuestionType};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tracing_test::traced_test;

    fn q(id: &str, d: Difficulty) -> Question {
        Question::new(
            QuestionId::new(id),
            QuestionType::SentenceCompletion,
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            1,
            d,
        )
        .unwrap()
    }

    fn pool(prefix: &str, n: usize, d: Difficulty) -> Vec<Question> {
        (0..n).map(|i| q(&format!("{prefix}{i}"), d)).collect()
    }

    fn ids(assembly: &Assembly) -> HashSet<String> {
        assembly
            .questions
            .iter()
            .map(|q| q.id().as_str().to_owned())
            .collect()
    }

    #[test]
    fn one_question_per_difficulty_yields_all_three() {
        let mut pools = HashMap::new();
        pools.insert(Category::from(Difficulty::Easy), vec![q("E1", Difficulty::Easy)]);
        pools.insert(Category::from(Difficulty::Medium), vec![q("M1", Difficulty::Medium)]);
        pools.insert(Category::from(Difficulty::Hard), vec![q("H1", Difficulty::Hard)]);
        let policy = SessionPolicy::new([
            (Difficulty::Easy, 1),
            (Difficulty::Medium, 1),
            (Difficulty::Hard, 1),
        ])
        .unwrap();

        let assembly = SessionAssembler::new().assemble(&pools, &policy);

        assert_eq!(assembly.len(), 3);
        assert!(assembly.is_complete());
        let expected: HashSet<String> = ["E1", "M1", "H1"].iter().map(|s| (*s).to_owned()).collect();
        assert_eq!(ids(&assembly), expected);
    }

    #[test]
    #[traced_test]
    fn short_pool_is_partially_fulfilled() {
        let mut pools = HashMap::new();
        pools.insert(Category::from(Difficulty::Easy), pool("e", 3, Difficulty::Easy));
        pools.insert(Category::from(Difficulty::Hard), pool("h", 10, Difficulty::Hard));
        let policy = SessionPolicy::new([(Difficulty::Easy, 5), (Difficulty::Hard, 2)]).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let assembly = SessionAssembler::new().assemble_with(&pools, &policy, &mut rng);

        let easy = assembly
            .questions
            .iter()
            .filter(|q| q.difficulty() == Difficulty::Easy)
            .count();
        assert_eq!(easy, 3);
        assert_eq!(assembly.len(), 5);
        assert!(!assembly.is_complete());
        assert_eq!(
            assembly.deficiencies,
            vec![Deficiency {
                category: Category::from(Difficulty::Easy),
                requested: 5,
                available: 3,
            }]
        );
        assert!(logs_contain("question pool smaller than policy requires"));
    }

    #[test]
    fn missing_pool_counts_as_empty() {
        let policy = SessionPolicy::new([(QuestionType::Vocabulary, 2)]).unwrap();
        let assembly = SessionAssembler::new().assemble(&HashMap::new(), &policy);
        assert!(assembly.is_empty());
        assert_eq!(assembly.deficiencies[0].available, 0);
    }

    #[test]
    #[traced_test]
    fn overlapping_pools_never_emit_an_id_twice() {
        let shared = q("shared", Difficulty::Medium);
        let mut pools = HashMap::new();
        pools.insert(Category::new("grammar"), vec![shared.clone()]);
        pools.insert(Category::new("tenses"), vec![shared]);
        let policy = SessionPolicy::new([(Category::new("grammar"), 1), (Category::new("tenses"), 1)])
            .unwrap();

        let assembly = SessionAssembler::new().assemble(&pools, &policy);

        assert_eq!(assembly.len(), 1);
        assert_eq!(assembly.duplicates_removed, vec![QuestionId::new("shared")]);
        assert!(logs_contain("removed duplicate questions"));
    }

    #[test]
    fn draws_without_replacement_and_interleaves() {
        let mut pools = HashMap::new();
        pools.insert(Category::from(Difficulty::Easy), pool("e", 20, Difficulty::Easy));
        pools.insert(Category::from(Difficulty::Hard), pool("h", 20, Difficulty::Hard));
        let policy = SessionPolicy::new([(Difficulty::Easy, 10), (Difficulty::Hard, 10)]).unwrap();

        let mut rng = StdRng::seed_from_u64(3);
        let assembly = SessionAssembler::new().assemble_with(&pools, &policy, &mut rng);

        assert_eq!(assembly.len(), 20);
        assert_eq!(ids(&assembly).len(), 20);
        assert!(assembly.duplicates_removed.is_empty());
        // a blocked layout would put every easy question ahead of every hard one
        let first_half_easy = assembly.questions[..10]
            .iter()
            .filter(|q| q.difficulty() == Difficulty::Easy)
            .count();
        assert!(first_half_easy > 0 && first_half_easy < 10);
    }
}
