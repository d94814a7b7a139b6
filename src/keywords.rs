//! # Expressive Keywords
//!
//! Keyword vocabularies for classifying direction text, a prioritized matcher, and
//! the static embedding tables that turn marking text into numeric vectors.
//!
//! ## Matching Order
//! Direction text is standardized (commas and periods removed, lowercased) and
//! then tried against a vocabulary in a fixed order:
//! 1. **Exact** - the whole text is a keyword (`a tempo`)
//! 2. **Token** - one whitespace-separated word is a keyword (`poco cresc` → `cresc`)
//! 3. **Substring** - a keyword longer than two characters occurs inside the text
//!    (`sempre più mosso` → `più mosso`)
//!
//! The first stage that succeeds decides the match, so results never depend on the
//! order of the vocabulary lists.
//!
//! ## Embeddings
//! [`KeywordEmbedding`] is the lookup service used by the feature record. The
//! built-in [`EmbeddingTables`] map dynamics to 4 slots (level, change, accent,
//! character) and tempos to 3 slots (base, modifier, gradual change).

use crate::directions::MarkingCategory;

pub const ABS_TEMPOS: &[&str] = &[
    "adagio",
    "lento",
    "andante",
    "andantino",
    "moderato",
    "allegretto",
    "allegro",
    "vivace",
    "presto",
    "prestissimo",
    "maestoso",
    "lullaby",
    "tempo i",
    "freely, with expression",
    "agitato",
];

pub const REL_TEMPOS: &[&str] = &[
    "animato",
    "pesante",
    "veloce",
    "acc",
    "accel",
    "rit",
    "ritardando",
    "accelerando",
    "rall",
    "rallentando",
    "ritenuto",
    "a tempo",
    "stretto",
    "slentando",
    "meno mosso",
    "più mosso",
    "allargando",
    "smorzando",
    "appassionato",
];

/// `dynamic` matches any direction whose kind is dynamic letters.
pub const ABS_DYNAMICS: &[&str] = &[
    "ppp", "pp", "p", "piano", "mp", "mf", "f", "forte", "ff", "fff", "fp", "dynamic",
];

pub const REL_DYNAMICS: &[&str] = &[
    "crescendo",
    "diminuendo",
    "cresc",
    "dim",
    "dimin",
    "sotto voce",
    "mezza voce",
    "sf",
    "fz",
    "sfz",
    "sffz",
    "con forza",
    "con fuoco",
    "smorzando",
    "appassionato",
];

/// Accents notated as dynamics that only affect the note they sit on.
pub const POINT_ACCENTS: &[&str] = &["sf", "fz", "sfz", "sffz"];

/// Text of a `tempo i` marking, restored to the opening tempo.
pub const TEMPO_PRIMO: &str = "tempo i";

/// Strip punctuation and case so `Cresc.` and `cresc` compare equal.
pub fn standardize(text: &str) -> String {
    text.replace([',', '.'], "").trim().to_lowercase()
}

/// Which stage of the matcher accepted the text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeywordMatch {
    Exact,
    Token,
    Substring,
}

/// Prioritized matcher over one vocabulary
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[&str]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| standardize(k)).collect(),
        }
    }

    /// Whether `word` is literally one of the keywords (no standardization).
    pub fn contains(&self, word: &str) -> bool {
        self.keywords.iter().any(|k| k == word)
    }

    pub fn match_text(&self, text: &str) -> Option<KeywordMatch> {
        let text = standardize(text);
        if text.is_empty() {
            return None;
        }
        if self.contains(&text) {
            return Some(KeywordMatch::Exact);
        }
        if text.split_whitespace().any(|word| self.contains(word)) {
            return Some(KeywordMatch::Token);
        }
        if self
            .keywords
            .iter()
            .any(|k| k.chars().count() > 2 && text.contains(k.as_str()))
        {
            return Some(KeywordMatch::Substring);
        }
        None
    }
}

/// Lookup from marking text to a fixed-length numeric vector
pub trait KeywordEmbedding {
    fn dimension(&self, category: MarkingCategory) -> usize;
    fn embed(&self, category: MarkingCategory, text: &str) -> Vec<f64>;
}

#[derive(Debug, Clone)]
struct EmbeddingKey {
    key: String,
    slot: usize,
    value: f64,
}

/// One keyword → (slot, value) table
#[derive(Debug, Clone, Default)]
pub struct EmbeddingTable {
    keys: Vec<EmbeddingKey>,
}

impl EmbeddingTable {
    fn with(mut self, key: &str, slot: usize, value: f64) -> Self {
        self.keys.push(EmbeddingKey {
            key: standardize(key),
            slot,
            value,
        });
        self
    }

    pub fn dimension(&self) -> usize {
        self.keys.iter().map(|k| k.slot + 1).max().unwrap_or(0)
    }

    /// Each key found in the text as a whole-word phrase writes its value into its
    /// slot; later (more specific) entries overwrite earlier ones.
    pub fn embed(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.dimension()];
        let padded = format!(" {} ", standardize(text));
        for entry in &self.keys {
            if padded.contains(&format!(" {} ", entry.key)) {
                vector[entry.slot] = entry.value;
            }
        }
        vector
    }
}

pub fn dynamic_table() -> EmbeddingTable {
    EmbeddingTable::default()
        .with("ppp", 0, -0.9)
        .with("pp", 0, -0.7)
        .with("piano", 0, -0.4)
        .with("p", 0, -0.4)
        .with("mp", 0, -0.2)
        .with("mf", 0, 0.2)
        .with("f", 0, 0.4)
        .with("forte", 0, 0.4)
        .with("ff", 0, 0.7)
        .with("fff", 0, 0.9)
        .with("più p", 0, -0.5)
        .with("più f", 0, 0.5)
        .with("più forte possibile", 0, 1.0)
        .with("cresc", 1, 0.7)
        .with("crescendo", 1, 0.7)
        .with("allargando", 1, 0.4)
        .with("dim", 1, -0.7)
        .with("diminuendo", 1, -0.7)
        .with("decresc", 1, -0.7)
        .with("smorz", 1, -0.4)
        .with("poco a poco meno f", 1, -0.2)
        .with("poco cresc", 1, 0.5)
        .with("molto cresc", 1, 1.0)
        .with("fz", 2, 0.3)
        .with("sf", 2, 0.5)
        .with("sfz", 2, 0.7)
        .with("ffz", 2, 0.8)
        .with("sffz", 2, 0.9)
        .with("con forza", 3, 0.5)
        .with("con fuoco", 3, 0.7)
        .with("con più fuoco possibile", 3, 1.0)
        .with("sotto voce", 3, -0.5)
        .with("mezza voce", 3, -0.3)
        .with("appassionato", 3, 0.5)
}

pub fn tempo_table() -> EmbeddingTable {
    EmbeddingTable::default()
        .with("freely, with expression", 0, 0.2)
        .with("lento", 0, -0.9)
        .with("adagio", 0, -0.7)
        .with("andante", 0, -0.5)
        .with("andantino", 0, -0.3)
        .with("moderato", 0, 0.0)
        .with("allegretto", 0, 0.3)
        .with("allegro", 0, 0.5)
        .with("vivace", 0, 0.6)
        .with("presto", 0, 0.8)
        .with("prestissimo", 0, 0.9)
        .with("molto allegro", 0, 0.85)
        .with("a tempo", 1, 0.05)
        .with("meno mosso", 1, -0.8)
        .with("ritenuto", 1, -0.5)
        .with("animato", 1, 0.5)
        .with("più animato", 1, 0.6)
        .with("agitato", 1, 0.4)
        .with("più mosso", 1, 0.8)
        .with("stretto", 1, 0.5)
        .with("appassionato", 1, 0.2)
        .with("poco ritenuto", 1, -0.3)
        .with("molto agitato", 1, 0.7)
        .with("allargando", 2, -0.2)
        .with("ritardando", 2, -0.5)
        .with("rit", 2, -0.5)
        .with("rallentando", 2, -0.5)
        .with("rall", 2, -0.5)
        .with("slentando", 2, -0.3)
        .with("acc", 2, 0.5)
        .with("accel", 2, 0.5)
        .with("accelerando", 2, 0.5)
        .with("smorz", 2, -0.5)
        .with("poco rall", 2, -0.3)
        .with("poco rit", 2, -0.3)
}

/// The built-in dynamic and tempo tables
#[derive(Debug, Clone)]
pub struct EmbeddingTables {
    dynamic: EmbeddingTable,
    tempo: EmbeddingTable,
}

impl Default for EmbeddingTables {
    fn default() -> Self {
        Self {
            dynamic: dynamic_table(),
            tempo: tempo_table(),
        }
    }
}

impl KeywordEmbedding for EmbeddingTables {
    fn dimension(&self, category: MarkingCategory) -> usize {
        match category {
            MarkingCategory::Dynamic => self.dynamic.dimension(),
            MarkingCategory::Tempo => self.tempo.dimension(),
        }
    }

    fn embed(&self, category: MarkingCategory, text: &str) -> Vec<f64> {
        match category {
            MarkingCategory::Dynamic => self.dynamic.embed(text),
            MarkingCategory::Tempo => self.tempo.embed(text),
        }
    }
}
