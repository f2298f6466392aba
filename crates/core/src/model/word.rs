use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::model::ids::{UserId, WordId, WordSetId};
use crate::model::progress::ProgressError;

/// Named vocabulary collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordSet {
    pub id: WordSetId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default = "default_global")]
    pub is_global: bool,
    #[serde(default)]
    pub word_count: usize,
}

fn default_global() -> bool {
    true
}

/// One english/chinese pair inside a word set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub id: WordId,
    pub english: String,
    pub chinese: String,
    pub word_set_name: String,
}

/// Fixed-size partition of a word set into groups numbered from 1.
///
/// Word indices are 0-based; the last group may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupPlan {
    total_words: usize,
    group_size: usize,
}

impl GroupPlan {
    /// # Errors
    ///
    /// Returns `InvalidGroupSize` when `group_size` is zero.
    pub fn new(total_words: usize, group_size: usize) -> Result<Self, ProgressError> {
        if group_size == 0 {
            return Err(ProgressError::InvalidGroupSize);
        }
        Ok(Self {
            total_words,
            group_size,
        })
    }

    #[must_use]
    pub fn total_words(&self) -> usize {
        self.total_words
    }

    #[must_use]
    pub fn group_size(&self) -> usize {
        self.group_size
    }

    /// `ceil(total_words / group_size)`.
    #[must_use]
    pub fn total_groups(&self) -> u32 {
        u32::try_from(self.total_words.div_ceil(self.group_size)).unwrap_or(u32::MAX)
    }

    /// Index range of the words in `group`, or `None` for an unknown group.
    #[must_use]
    pub fn words_in_group(&self, group: u32) -> Option<Range<usize>> {
        if group == 0 || group > self.total_groups() {
            return None;
        }
        let start = usize::try_from(group - 1).ok()? * self.group_size;
        let end = (start + self.group_size).min(self.total_words);
        Some(start..end)
    }

    /// Indices of every word in groups `1..=group`.
    #[must_use]
    pub fn words_through_group(&self, group: u32) -> Option<Range<usize>> {
        let last = self.words_in_group(group)?;
        Some(0..last.end)
    }

    /// Group number holding the word at `index`.
    #[must_use]
    pub fn group_of(&self, index: usize) -> Option<u32> {
        if index >= self.total_words {
            return None;
        }
        u32::try_from(index / self.group_size + 1).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_splits_into_groups() {
        let plan = GroupPlan::new(12, 5).unwrap();
        assert_eq!(plan.total_groups(), 3);
        assert_eq!(plan.words_in_group(1), Some(0..5));
        assert_eq!(plan.words_in_group(3), Some(10..12));
        assert_eq!(plan.words_in_group(4), None);
        assert_eq!(plan.words_in_group(0), None);
    }

    #[test]
    fn plan_maps_word_to_group() {
        let plan = GroupPlan::new(12, 5).unwrap();
        assert_eq!(plan.group_of(0), Some(1));
        assert_eq!(plan.group_of(5), Some(2));
        assert_eq!(plan.group_of(11), Some(3));
        assert_eq!(plan.group_of(12), None);
        assert_eq!(plan.words_through_group(2), Some(0..10));
    }

    #[test]
    fn zero_group_size_is_rejected() {
        assert_eq!(GroupPlan::new(3, 0), Err(ProgressError::InvalidGroupSize));
    }

    #[test]
    fn word_set_defaults() {
        let set: WordSet =
            serde_json::from_str(r#"{"id":1,"name":"Unit 1","owner_id":"admin-001"}"#).unwrap();
        assert!(set.is_global);
        assert_eq!(set.word_count, 0);
    }
}
