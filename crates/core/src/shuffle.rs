//! Deterministic per-participant answer-option ordering.
//!
//! The same question shown to the same participant always gets the same
//! option order, on every platform and in every run, while different
//! participants (or different questions) see different orders. The generator
//! is a plain 32-bit LCG: reproducible, not secure.

use crate::model::{ParticipantId, Question};

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;

/// Polynomial rolling hash (base 31) over UTF-16 code units, folded into 32 bits.
///
/// Accumulates as a wrapping `i32` and returns its absolute value, which keeps
/// seeds identical to those produced by the web client.
#[must_use]
pub fn seed_hash(input: &str) -> u32 {
    let hash = input
        .encode_utf16()
        .fold(0_i32, |acc, unit| {
            acc.wrapping_mul(31).wrapping_add(i32::from(unit))
        });
    hash.unsigned_abs()
}

/// Seed for a (question, participant) pair.
#[must_use]
pub fn shuffle_seed(question_id: &str, participant: &ParticipantId) -> u32 {
    seed_hash(&format!("{question_id}:{}", participant.as_str()))
}

/// Linear congruential generator modulo 2^32.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    #[must_use]
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(LCG_MULTIPLIER)
            .wrapping_add(LCG_INCREMENT);
        self.state
    }

    /// Uniform index in `0..bound`; equals `floor(next / 2^32 * bound)`.
    pub fn next_below(&mut self, bound: usize) -> usize {
        let scaled = (u64::from(self.next_u32()) * bound as u64) >> 32;
        // scaled < bound, so it fits back into usize
        usize::try_from(scaled).unwrap_or(0)
    }
}

/// A question whose options were reordered for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffledQuestion {
    question: Question,
    /// `order[displayed] == original` option index.
    order: Vec<usize>,
}

impl ShuffledQuestion {
    /// Identity ordering, used when shuffling is disabled.
    #[must_use]
    pub fn unshuffled(question: Question) -> Self {
        let order = (0..question.options().len()).collect();
        Self { question, order }
    }

    /// The question as displayed: permuted options and remapped correct index.
    #[must_use]
    pub fn question(&self) -> &Question {
        &self.question
    }

    #[must_use]
    pub fn options(&self) -> &[String] {
        self.question.options()
    }

    #[must_use]
    pub fn correct_answer(&self) -> usize {
        self.question.correct_answer()
    }

    /// Original option index behind a displayed position.
    #[must_use]
    pub fn original_index(&self, displayed: usize) -> Option<usize> {
        self.order.get(displayed).copied()
    }

    /// Displayed position of an original option index.
    #[must_use]
    pub fn displayed_index(&self, original: usize) -> Option<usize> {
        self.order.iter().position(|&o| o == original)
    }

    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }
}

/// Reorder `question`'s options for `participant`.
///
/// Questions with fewer than two options come back unchanged. The new correct
/// index is found by following where the original correct slot moved, never by
/// comparing option text.
#[must_use]
pub fn shuffle(question: &Question, participant: &ParticipantId) -> ShuffledQuestion {
    let len = question.options().len();
    if len < 2 {
        return ShuffledQuestion::unshuffled(question.clone());
    }

    let mut rng = Lcg::new(shuffle_seed(question.id().as_str(), participant));
    let mut order: Vec<usize> = (0..len).collect();
    for i in (1..len).rev() {
        let j = rng.next_below(i + 1);
        order.swap(i, j);
    }

    let original_correct = question.correct_answer();
    let correct = order
        .iter()
        .position(|&o| o == original_correct)
        .unwrap_or(original_correct);
    let options = order
        .iter()
        .map(|&o| question.options()[o].clone())
        .collect();

    ShuffledQuestion {
        question: question.reordered(options, correct),
        order,
    }
}
