use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use storage::{LocalDatabase, StoreName};
use tracing::warn;
use tutor_core::model::{Word, WordSet};

use crate::api::ApiClient;
use crate::error::StoreError;
use crate::stores::{is_offline, lock, persist};

/// A word as kept locally, with its place in the backend's list.
#[derive(Serialize, Deserialize)]
struct CachedWord {
    #[serde(flatten)]
    word: Word,
    #[serde(default)]
    position: Option<usize>,
}

/// Read-only access to word sets and their words.
pub struct WordStore {
    api: ApiClient,
    local: LocalDatabase,
    word_sets: Mutex<Vec<WordSet>>,
    words: Mutex<BTreeMap<String, Vec<Word>>>,
}

impl WordStore {
    #[must_use]
    pub fn new(api: ApiClient, local: LocalDatabase) -> Self {
        Self {
            api,
            local,
            word_sets: Mutex::new(Vec::new()),
            words: Mutex::new(BTreeMap::new()),
        }
    }

    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails and no local copy helps.
    pub async fn fetch_word_sets(&self) -> Result<Vec<WordSet>, StoreError> {
        let sets: Vec<WordSet> = match self.api.get(&["api", "words", "sets"]).await {
            Ok(sets) => sets,
            Err(err) if is_offline(&err) => {
                let cached: Vec<WordSet> = self.local.load_all(StoreName::WordSets).await?;
                if cached.is_empty() {
                    return Err(err.into());
                }
                warn!(count = cached.len(), "backend unreachable, using local word sets");
                cached
            }
            Err(err) => return Err(err.into()),
        };

        for set in &sets {
            persist(&self.local, StoreName::WordSets, &set.name, set).await;
        }
        lock(&self.word_sets).clone_from(&sets);
        Ok(sets)
    }

    /// Words of one set in backend order; the position is the word index.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Api` when the call fails and no local copy helps.
    pub async fn fetch_words(&self, word_set_name: &str) -> Result<Vec<Word>, StoreError> {
        let words: Vec<Word> = match self
            .api
            .get(&["api", "words", "sets", word_set_name, "words"])
            .await
        {
            Ok(words) => words,
            Err(err) if is_offline(&err) => {
                let mut cached: Vec<CachedWord> = self
                    .local
                    .load_all::<CachedWord>(StoreName::Words)
                    .await?
                    .into_iter()
                    .filter(|c| c.word.word_set_name == word_set_name)
                    .collect();
                if cached.is_empty() {
                    return Err(err.into());
                }
                cached.sort_by_key(|c| (c.position.unwrap_or(usize::MAX), c.word.id));
                warn!(word_set = word_set_name, count = cached.len(), "backend unreachable, using local words");
                cached.into_iter().map(|c| c.word).collect()
            }
            Err(err) => return Err(err.into()),
        };

        for (position, word) in words.iter().enumerate() {
            let cached = CachedWord {
                word: word.clone(),
                position: Some(position),
            };
            persist(&self.local, StoreName::Words, &word.id.to_string(), &cached).await;
        }
        lock(&self.words).insert(word_set_name.to_owned(), words.clone());
        Ok(words)
    }

    #[must_use]
    pub fn word_sets(&self) -> Vec<WordSet> {
        lock(&self.word_sets).clone()
    }

    /// Mirrored words of one set, empty until fetched.
    #[must_use]
    pub fn words(&self, word_set_name: &str) -> Vec<Word> {
        lock(&self.words).get(word_set_name).cloned().unwrap_or_default()
    }
}
