//! # Vocabularies
//!
//! Vocabularies are loaded once when the service starts and shared read-only by
//! every worker for the lifetime of the service. Loading is delegated to a
//! [`VocabularyLoader`] so that deployments can plug in their own formats;
//! [`PlainVocabLoader`] reads the simplest one, a token per line.
//!
//! The loaded set is ordered like the configured paths: index `0` is the source
//! side and the last entry is the target side. Paths that repeat (a shared
//! source/target vocabulary, for instance) are loaded once and the resulting
//! handle is shared.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ConfigError, VocabError};

/// Index of a word inside a vocabulary.
pub type WordId = u32;

/// End-of-sentence marker, always id `0`.
pub const EOS: &str = "</s>";
/// Unknown-word marker, always id `1`.
pub const UNK: &str = "<unk>";

pub const EOS_ID: WordId = 0;
pub const UNK_ID: WordId = 1;

/// A read-only mapping between words and ids.
pub trait Vocabulary: Debug + Send + Sync + 'static {
    /// Number of entries, including the reserved markers.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split `text` on whitespace and map each word to its id.
    fn encode(&self, text: &str) -> Vec<WordId>;

    /// Map ids back to words, joined by single spaces. `</s>` is dropped.
    fn decode(&self, words: &[WordId]) -> String;
}

/// A loader for one vocabulary file.
pub trait VocabularyLoader: Send + Sync {
    /// Load the vocabulary at `path`, which sits at `index` in the configured list.
    fn load(&self, path: &Path, index: usize) -> Result<Arc<dyn Vocabulary>, VocabError>;
}

/// An in-memory vocabulary built from a word list.
#[derive(Debug, Clone)]
pub struct PlainVocab {
    words: Vec<String>,
    ids: HashMap<String, WordId>,
}

impl PlainVocab {
    /// Build a vocabulary from `words`. `</s>` and `<unk>` are reserved as ids
    /// `0` and `1`; occurrences of them in `words` are skipped, as are duplicates.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut vocab = Self {
            words: Vec::new(),
            ids: HashMap::new(),
        };
        vocab.insert(EOS.to_string());
        vocab.insert(UNK.to_string());
        for word in words {
            vocab.insert(word.into());
        }
        vocab
    }

    fn insert(&mut self, word: String) {
        if self.ids.contains_key(&word) {
            return;
        }
        self.ids.insert(word.clone(), self.words.len() as WordId);
        self.words.push(word);
    }
}

impl Vocabulary for PlainVocab {
    fn len(&self) -> usize {
        self.words.len()
    }

    fn encode(&self, text: &str) -> Vec<WordId> {
        text.split_whitespace()
            .map(|word| self.ids.get(word).copied().unwrap_or(UNK_ID))
            .collect()
    }

    fn decode(&self, words: &[WordId]) -> String {
        words
            .iter()
            .filter(|&&id| id != EOS_ID)
            .map(|&id| self.words.get(id as usize).map(String::as_str).unwrap_or(UNK))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Reads vocabularies with one token per line. Blank lines are ignored and
/// anything after the first tab on a line (frequency columns) is discarded.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainVocabLoader;

impl VocabularyLoader for PlainVocabLoader {
    fn load(&self, path: &Path, _index: usize) -> Result<Arc<dyn Vocabulary>, VocabError> {
        let contents = std::fs::read_to_string(path).map_err(|source| VocabError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let words: Vec<&str> = contents
            .lines()
            .map(|line| line.split('\t').next().unwrap_or_default().trim())
            .filter(|word| !word.is_empty())
            .collect();
        if words.is_empty() {
            return Err(VocabError::Empty { path: path.to_path_buf() });
        }

        Ok(Arc::new(PlainVocab::new(words)))
    }
}

/// The ordered, shared vocabulary set.
#[derive(Debug, Clone)]
pub struct Vocabularies {
    list: Vec<Arc<dyn Vocabulary>>,
}

impl Vocabularies {
    pub fn new(list: Vec<Arc<dyn Vocabulary>>) -> Self {
        Self { list }
    }

    /// Look up a vocabulary by position. Negative indices count from the end,
    /// so `-1` is always the target vocabulary.
    pub fn get(&self, index: isize) -> Option<Arc<dyn Vocabulary>> {
        let len = self.list.len() as isize;
        let resolved = if index < 0 { index + len } else { index };
        if resolved < 0 || resolved >= len {
            return None;
        }
        self.list.get(resolved as usize).cloned()
    }

    pub fn source(&self) -> Option<&Arc<dyn Vocabulary>> {
        self.list.first()
    }

    pub fn target(&self) -> Option<&Arc<dyn Vocabulary>> {
        self.list.last()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Vocabulary>> {
        self.list.iter()
    }
}

/// Load every configured vocabulary, sharing one instance per distinct path.
pub fn load_vocabularies(
    paths: &[PathBuf],
    loader: &dyn VocabularyLoader,
) -> Result<Vocabularies, ConfigError> {
    // source and target at minimum
    if paths.len() < 2 {
        return Err(ConfigError::InsufficientVocabularies { found: paths.len() });
    }

    let mut loaded: HashMap<&Path, Arc<dyn Vocabulary>> = HashMap::new();
    let mut list = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let vocab = match loaded.get(path.as_path()) {
            Some(vocab) => vocab.clone(),
            None => {
                let vocab = loader.load(path, index)?;
                tracing::debug!(path = %path.display(), index, entries = vocab.len(), "loaded vocabulary");
                loaded.insert(path.as_path(), vocab.clone());
                vocab
            }
        };
        list.push(vocab);
    }

    Ok(Vocabularies::new(list))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl VocabularyLoader for CountingLoader {
        fn load(&self, path: &Path, _index: usize) -> Result<Arc<dyn Vocabulary>, VocabError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let name = path.to_string_lossy().to_string();
            Ok(Arc::new(PlainVocab::new([name])))
        }
    }

    #[test]
    fn test_plain_vocab_reserves_markers() {
        let vocab = PlainVocab::new(["hello", "</s>", "world", "hello"]);
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.encode("hello world"), vec![2, 3]);
        assert_eq!(vocab.encode("hello there"), vec![2, UNK_ID]);
    }

    #[test]
    fn test_plain_vocab_decode() {
        let vocab = PlainVocab::new(["hello", "world"]);
        assert_eq!(vocab.decode(&[2, 3, EOS_ID]), "hello world");
        assert_eq!(vocab.decode(&[3, 42]), "world <unk>");
        assert_eq!(vocab.decode(&[]), "");
    }

    #[test]
    fn test_identical_paths_share_one_instance() {
        let loader = CountingLoader::default();
        let paths = vec![
            PathBuf::from("shared.vocab"),
            PathBuf::from("factors.vocab"),
            PathBuf::from("shared.vocab"),
        ];

        let vocabs = load_vocabularies(&paths, &loader).unwrap();

        assert_eq!(vocabs.len(), 3);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        let first = vocabs.get(0).unwrap();
        let last = vocabs.get(2).unwrap();
        assert!(Arc::ptr_eq(&first, &last));
        assert!(!Arc::ptr_eq(&first, &vocabs.get(1).unwrap()));
    }

    #[test]
    fn test_negative_indices_count_from_end() {
        let loader = CountingLoader::default();
        let paths = vec![PathBuf::from("src"), PathBuf::from("trg")];
        let vocabs = load_vocabularies(&paths, &loader).unwrap();

        assert!(Arc::ptr_eq(&vocabs.get(-1).unwrap(), vocabs.target().unwrap()));
        assert!(Arc::ptr_eq(&vocabs.get(-2).unwrap(), vocabs.source().unwrap()));
        assert!(vocabs.get(-3).is_none());
        assert!(vocabs.get(2).is_none());
    }

    #[test]
    fn test_too_few_vocabularies() {
        let loader = CountingLoader::default();
        let err = load_vocabularies(&[PathBuf::from("one")], &loader).unwrap_err();
        assert!(matches!(err, ConfigError::InsufficientVocabularies { found: 1 }));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_plain_loader_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("words.vocab");
        std::fs::write(&path, "guten\t12\n\ntag\n<unk>\n").unwrap();

        let vocab = PlainVocabLoader.load(&path, 0).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.encode("guten tag"), vec![2, 3]);

        let empty = dir.path().join("empty.vocab");
        std::fs::write(&empty, "\n\n").unwrap();
        assert!(matches!(PlainVocabLoader.load(&empty, 1), Err(VocabError::Empty { .. })));
        assert!(matches!(
            PlainVocabLoader.load(&dir.path().join("nope"), 1),
            Err(VocabError::Io { .. })
        ));
    }
}
