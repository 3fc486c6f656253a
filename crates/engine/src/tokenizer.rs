//! Tokenizers: a word-level vocabulary for tests and demos, or a pretrained
//! `tokenizer.json` when one is available.

use crate::config::SpecialTokens;
use anyhow::{anyhow, Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const COMMON_WORDS: &[&str] = &[
    "the", "a", "is", "in", "to", "of", "and", "for", "on", "with", "as", "at", "by", "from",
    "it", "this", "that", "are", "was", "be", "have", "has", "had", "not", "can", "will",
    "would", "could", "should", "said", "there", "their", "they", "we", "you", "he", "she", "i",
    "my", "your", "our", "but", "or", "so", "if", "then", "when", "where", "what", "how", "why",
    "who", "which", "do", "does", "did", "go", "come", "see", "get", "make", "know", "think",
    "take", "want", "use", "find", "give", "tell", "work", "call", "try", "ask", "need", "feel",
    "become", "leave", "put", "new", "first", "last", "long", "great", "little", "own", "other",
    "old", "right", "big", "high", "different", "small", "large", "next", "early", "young",
    "important", "few", "public", "bad", "same", "able", "year", "people", "time", "day", "man",
    "world", "life", "hand", "part", "child", "eye", "woman", "place", "week", "case", "point",
    "government", "company", "number", "group", "problem", "fact", "report", "study", "city",
    "country", "state", "system", "program", "question", "news", "model", "text", "summary",
    "quick", "brown", "fox", "jumps", "over", "lazy", "dog",
];

/// Word-level tokenizer with BART-compatible special token ids.
pub struct WordTokenizer {
    vocab: HashMap<String, u32>,
    reverse_vocab: HashMap<u32, String>,
    special: SpecialTokens,
}

impl WordTokenizer {
    /// Built-in vocabulary of common English words, capped at `vocab_size`.
    pub fn new(vocab_size: usize) -> Self {
        Self::from_words(COMMON_WORDS.iter().copied(), vocab_size)
    }

    pub fn from_words<'a>(words: impl IntoIterator<Item = &'a str>, vocab_size: usize) -> Self {
        let special = SpecialTokens::default();
        let mut tokenizer = Self {
            vocab: HashMap::new(),
            reverse_vocab: HashMap::new(),
            special,
        };
        tokenizer.insert("<s>", special.bos);
        tokenizer.insert("<pad>", special.pad);
        tokenizer.insert("</s>", special.eos);
        tokenizer.insert("<unk>", special.unk);

        let mut next_id = special.max_id() + 1;
        for word in words {
            if next_id as usize >= vocab_size {
                break;
            }
            let word = word.to_lowercase();
            if tokenizer.vocab.contains_key(&word) {
                continue;
            }
            tokenizer.insert(&word, next_id);
            next_id += 1;
        }
        tokenizer
    }

    /// Load a `{"token": id}` JSON vocabulary. The four special tokens must be present.
    pub fn from_vocab_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let blob = fs::read(path)
            .with_context(|| format!("failed to read vocabulary {}", path.display()))?;
        let entries: HashMap<String, u32> =
            serde_json::from_slice(&blob).context("failed to parse vocabulary json")?;

        let special = SpecialTokens {
            bos: lookup(&entries, "<s>")?,
            pad: lookup(&entries, "<pad>")?,
            eos: lookup(&entries, "</s>")?,
            unk: lookup(&entries, "<unk>")?,
            decoder_start: lookup(&entries, "</s>")?,
        };

        let mut tokenizer = Self {
            vocab: HashMap::with_capacity(entries.len()),
            reverse_vocab: HashMap::with_capacity(entries.len()),
            special,
        };
        for (token, id) in entries {
            tokenizer.insert(&token, id);
        }
        Ok(tokenizer)
    }

    fn insert(&mut self, token: &str, id: u32) {
        self.vocab.insert(token.to_string(), id);
        self.reverse_vocab.insert(id, token.to_string());
    }

    pub fn special_tokens(&self) -> SpecialTokens {
        self.special
    }

    /// One past the largest id in use.
    pub fn vocab_size(&self) -> usize {
        self.reverse_vocab
            .keys()
            .max()
            .map(|&id| id as usize + 1)
            .unwrap_or(0)
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.reverse_vocab.contains_key(&id)
    }

    /// `<s> words... </s>`, unknown words mapped to `<unk>`.
    pub fn encode(&self, text: &str) -> Vec<u32> {
        let mut ids = Vec::with_capacity(text.len() / 4 + 2);
        ids.push(self.special.bos);
        ids.extend(text.split_whitespace().map(|word| {
            self.vocab
                .get(&word.to_lowercase())
                .copied()
                .unwrap_or(self.special.unk)
        }));
        ids.push(self.special.eos);
        ids
    }

    pub fn decode(&self, ids: &[u32]) -> String {
        ids.iter()
            .filter(|&&id| !self.special.is_control(id))
            .filter_map(|id| self.reverse_vocab.get(id))
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn lookup(entries: &HashMap<String, u32>, token: &str) -> Result<u32> {
    entries
        .get(token)
        .copied()
        .ok_or_else(|| anyhow!("vocabulary is missing special token {token}"))
}

pub enum Tokenizer {
    Word(WordTokenizer),
    Pretrained(Box<tokenizers::Tokenizer>),
}

impl Tokenizer {
    /// Load a Hugging Face `tokenizer.json`.
    pub fn from_pretrained_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow!("failed to load tokenizer {}: {e}", path.display()))?;
        Ok(Self::Pretrained(Box::new(tokenizer)))
    }

    /// Encode `text` and keep at most the leading `max_tokens` ids.
    pub fn encode(&self, text: &str, max_tokens: usize) -> Result<Vec<u32>> {
        let mut ids = match self {
            Tokenizer::Word(word) => word.encode(text),
            Tokenizer::Pretrained(tokenizer) => tokenizer
                .encode(text, true)
                .map_err(|e| anyhow!("tokenization failed: {e}"))?
                .get_ids()
                .to_vec(),
        };
        ids.truncate(max_tokens);
        Ok(ids)
    }

    /// Decode ids, skipping special tokens.
    pub fn decode(&self, ids: &[u32]) -> Result<String> {
        match self {
            Tokenizer::Word(word) => Ok(word.decode(ids)),
            Tokenizer::Pretrained(tokenizer) => tokenizer
                .decode(ids, true)
                .map_err(|e| anyhow!("detokenization failed: {e}")),
        }
    }

    pub fn vocab_size(&self) -> usize {
        match self {
            Tokenizer::Word(word) => word.vocab_size(),
            Tokenizer::Pretrained(tokenizer) => tokenizer.get_vocab_size(true),
        }
    }

    /// Whether `id` maps back to a token.
    pub fn contains_id(&self, id: u32) -> bool {
        match self {
            Tokenizer::Word(word) => word.contains_id(id),
            Tokenizer::Pretrained(tokenizer) => tokenizer.id_to_token(id).is_some(),
        }
    }

    /// Special ids as the tokenizer defines them, if it defines them itself.
    pub fn special_tokens(&self) -> Option<SpecialTokens> {
        match self {
            Tokenizer::Word(word) => Some(word.special_tokens()),
            Tokenizer::Pretrained(_) => None,
        }
    }
}

impl From<WordTokenizer> for Tokenizer {
    fn from(value: WordTokenizer) -> Self {
        Tokenizer::Word(value)
    }
}
