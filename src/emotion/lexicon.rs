//! Emotion lexicon: keyword, pattern and symbol markers per emotion
//!
//! The lexicon is data. A built-in one ships with the crate and a TOML file
//! with the same shape can replace it (`[emotion] lexicon_path`).

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use super::Emotion;
use crate::{Error, Result};

/// Built-in lexicon source
const DEFAULT_LEXICON: &str = include_str!("default_lexicon.toml");

/// Pattern matches count for this fraction of the rule weight
const PATTERN_FACTOR: f32 = 0.8;

/// Symbol occurrences count for this fraction of the rule weight
const SYMBOL_FACTOR: f32 = 0.6;

/// Lexicon file schema
#[derive(Debug, Deserialize)]
struct LexiconFile {
    emotions: Vec<RuleFile>,
    #[serde(default)]
    modifiers: BTreeMap<String, f32>,
}

#[derive(Debug, Deserialize)]
struct RuleFile {
    emotion: Emotion,
    weight: f32,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    symbols: Vec<String>,
}

/// Markers for one emotion
#[derive(Debug, Clone)]
pub struct EmotionRule {
    /// Emotion these markers indicate
    pub emotion: Emotion,
    /// Base weight of one marker
    pub weight: f32,
    keywords: Vec<String>,
    patterns: Vec<Regex>,
    symbols: Vec<String>,
}

impl EmotionRule {
    /// Score `text` (already lowercased) against this rule
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn score(&self, text: &str) -> f32 {
        let keyword_hits = self.keywords.iter().filter(|k| text.contains(k.as_str())).count();
        let pattern_hits: usize = self.patterns.iter().map(|p| p.find_iter(text).count()).sum();
        let symbol_hits: usize = self.symbols.iter().map(|s| text.matches(s.as_str()).count()).sum();

        self.weight
            * (keyword_hits as f32
                + pattern_hits as f32 * PATTERN_FACTOR
                + symbol_hits as f32 * SYMBOL_FACTOR)
    }

    /// Matched keywords followed by matched pattern text, in lexicon order
    pub fn triggers<'a>(&'a self, text: &'a str) -> impl Iterator<Item = String> + 'a {
        let keywords = self
            .keywords
            .iter()
            .filter(move |k| text.contains(k.as_str()))
            .cloned();
        let patterns = self
            .patterns
            .iter()
            .flat_map(move |p| p.find_iter(text).map(|m| m.as_str().to_string()));
        keywords.chain(patterns)
    }
}

/// Compiled emotion lexicon
#[derive(Debug, Clone)]
pub struct Lexicon {
    rules: Vec<EmotionRule>,
    /// Intensity modifiers, longest first
    modifiers: Vec<(String, f32)>,
}

impl Lexicon {
    /// The lexicon shipped with the crate
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_toml_str(DEFAULT_LEXICON).expect("built-in lexicon is valid")
    }

    /// Parse and compile a TOML lexicon
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed, a pattern does not compile, or
    /// a weight is not positive
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: LexiconFile = toml::from_str(content)?;

        let mut rules = Vec::with_capacity(file.emotions.len());
        for rule in file.emotions {
            if rule.emotion == Emotion::Neutral {
                return Err(Error::Config("lexicon cannot define neutral markers".to_string()));
            }
            if rule.weight <= 0.0 {
                return Err(Error::Config(format!(
                    "lexicon weight for {} must be positive",
                    rule.emotion
                )));
            }
            let patterns = rule
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| Error::Config(format!("lexicon pattern {p:?}: {e}")))
                })
                .collect::<Result<Vec<_>>>()?;

            rules.push(EmotionRule {
                emotion: rule.emotion,
                weight: rule.weight,
                keywords: rule.keywords.iter().map(|k| k.to_lowercase()).collect(),
                patterns,
                symbols: rule.symbols,
            });
        }

        let mut modifiers: Vec<(String, f32)> = file.modifiers.into_iter().collect();
        modifiers.sort_by(|a, b| b.0.chars().count().cmp(&a.0.chars().count()));

        Ok(Self { rules, modifiers })
    }

    /// Load a lexicon file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let lexicon = Self::from_toml_str(&content)?;
        tracing::info!(path = %path.display(), rules = lexicon.rules.len(), "loaded emotion lexicon");
        Ok(lexicon)
    }

    /// Rules in lexicon order
    #[must_use]
    pub fn rules(&self) -> &[EmotionRule] {
        &self.rules
    }

    /// Product of all intensity modifiers present in `text`
    ///
    /// Text is scanned left to right; lexicon keywords are skipped as whole
    /// words so a modifier inside a keyword (the 太 of 太棒了) does not count.
    #[must_use]
    pub fn modifier_product(&self, text: &str) -> f32 {
        let mut product = 1.0;
        let mut rest = text;

        while let Some(c) = rest.chars().next() {
            let keyword_len = self
                .rules
                .iter()
                .flat_map(|r| r.keywords.iter())
                .filter(|k| rest.starts_with(k.as_str()))
                .map(String::len)
                .max();
            let modifier = self.modifiers.iter().find(|(m, _)| rest.starts_with(m.as_str()));

            let skip = match (keyword_len, modifier) {
                (Some(k), Some((m, _))) if k >= m.len() => k,
                (_, Some((m, factor))) => {
                    product *= factor;
                    m.len()
                }
                (Some(k), None) => k,
                (None, None) => c.len_utf8(),
            };
            rest = &rest[skip..];
        }

        product
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Count runs of three or more identical characters
#[must_use]
pub fn repeated_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut prev = None;
    let mut len = 0;

    for c in text.chars() {
        if Some(c) == prev {
            len += 1;
        } else {
            if len >= 3 {
                runs += 1;
            }
            prev = Some(c);
            len = 1;
        }
    }
    if len >= 3 {
        runs += 1;
    }

    runs
}
