//! Cleanup of raw OCR text into a canonical candidate string.

use serde::{Deserialize, Serialize};

/// Where the character-confusion remap is allowed to act.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RemapScope {
    /// Only tokens whose alphanumerics are at least half ASCII digits.
    #[default]
    NumericTokens,
    /// Every occurrence anywhere in the text.
    Everywhere,
}

/// Lookup data for the normalizer. Injected so tests can swap it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionTable {
    /// Letters the engine tends to read in place of digits.
    pub chars: Vec<(char, char)>,
    /// Literal spellings replaced before anything else, in order.
    pub literals: Vec<(String, String)>,
    pub scope: RemapScope,
}

impl ConfusionTable {
    pub fn invoice() -> Self {
        let literal = |from: &str, to: &str| (from.to_string(), to.to_string());
        Self {
            chars: vec![('O', '0'), ('o', '0'), ('I', '1'), ('l', '1'), ('S', '5'), ('B', '8')],
            literals: vec![
                literal("DESCRICAO", "DESCRIÇÃO"),
                literal("DESCRIÇAO", "DESCRIÇÃO"),
                literal("DESCRICÃO", "DESCRIÇÃO"),
                literal("KGR", "KG"),
            ],
            scope: RemapScope::NumericTokens,
        }
    }

    fn remap(&self, c: char) -> char {
        self.chars
            .iter()
            .find(|(from, _)| *from == c)
            .map(|(_, to)| *to)
            .unwrap_or(c)
    }
}

impl Default for ConfusionTable {
    fn default() -> Self {
        Self::invoice()
    }
}

#[derive(Debug, Clone, Default)]
pub struct TextNormalizer {
    table: ConfusionTable,
}

impl TextNormalizer {
    pub fn new(table: ConfusionTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ConfusionTable {
        &self.table
    }

    /// Total: never fails, empty in gives empty out.
    pub fn normalize(&self, raw: &str) -> String {
        let text = self.canonicalize_literals(raw);
        let text = self.remap_confusions(&text);
        clean_lines(&text)
    }

    fn canonicalize_literals(&self, text: &str) -> String {
        self.table
            .literals
            .iter()
            .fold(text.to_string(), |acc, (from, to)| acc.replace(from.as_str(), to))
    }

    fn remap_confusions(&self, text: &str) -> String {
        match self.table.scope {
            RemapScope::Everywhere => text.chars().map(|c| self.table.remap(c)).collect(),
            RemapScope::NumericTokens => {
                let mut out = String::with_capacity(text.len());
                let mut token = String::new();
                for c in text.chars() {
                    if c.is_whitespace() {
                        self.flush_token(&mut token, &mut out);
                        out.push(c);
                    } else {
                        token.push(c);
                    }
                }
                self.flush_token(&mut token, &mut out);
                out
            }
        }
    }

    fn flush_token(&self, token: &mut String, out: &mut String) {
        if is_numeric_token(token) {
            out.extend(token.chars().map(|c| self.table.remap(c)));
        } else {
            out.push_str(token);
        }
        token.clear();
    }
}

fn is_numeric_token(token: &str) -> bool {
    let (digits, alnum) = token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .fold((0usize, 0usize), |(d, a), c| (d + usize::from(c.is_ascii_digit()), a + 1));
    digits > 0 && digits * 2 >= alnum
}

/// Trim each line, strip a leading run of symbols, drop lines left empty.
fn clean_lines(text: &str) -> String {
    text.lines()
        .map(|line| line.trim().trim_start_matches(|c: char| !c.is_alphanumeric() && !c.is_whitespace()))
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}
