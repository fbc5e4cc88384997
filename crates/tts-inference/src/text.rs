//! Phonemised text to acoustic model symbol ids.

use std::collections::HashMap;

use tracing::warn;
use tts_core::{Result, TtsError};

const PAD: &str = "_";
const PUNCTUATION: &str = ";:,.!?¡¿—…\"«»“” ";
const LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const LETTERS_IPA: &str = "ɑɐɒæɓʙβɔɕçɗɖðʤəɘɚɛɜɝɞɟʄɡɠɢʛɦɧħɥʜɨɪʝɭɬɫɮʟɱɯɰŋɳɲɴøɵɸθœɶʘɹɺɾɻʀʁɽʂʃʈʧʉʊʋⱱʌɣɤʍχʎʏʑʐʒʔʡʕʢǀǁǂǃˈˌːˑʼʴʰʱʲʷˠˤ˞↓↑→↗↘'̩'ᵻ";

/// Blank id interleaved between symbols.
pub const BLANK_ID: i64 = 0;

/// Symbol table of the acoustic model: pad, punctuation, ASCII then IPA letters.
#[derive(Debug, Clone)]
pub struct SymbolEncoder {
    ids: HashMap<char, i64>,
    symbols: Vec<char>,
}

impl Default for SymbolEncoder {
    fn default() -> Self {
        let symbols: Vec<char> = PAD
            .chars()
            .chain(PUNCTUATION.chars())
            .chain(LETTERS.chars())
            .chain(LETTERS_IPA.chars())
            .collect();
        let mut ids = HashMap::with_capacity(symbols.len());
        for (i, &c) in symbols.iter().enumerate() {
            ids.insert(c, i as i64);
        }
        Self { ids, symbols }
    }
}

impl SymbolEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn id_of(&self, symbol: char) -> Option<i64> {
        self.ids.get(&symbol).copied()
    }

    /// Maps each known character to its id. Unknown characters are dropped.
    pub fn to_sequence(&self, phonemes: &str) -> Vec<i64> {
        let mut seq = Vec::with_capacity(phonemes.chars().count());
        for c in phonemes.chars() {
            match self.id_of(c) {
                Some(id) => seq.push(id),
                None => warn!(symbol = %c.escape_unicode(), "skipping symbol not in the table"),
            }
        }
        seq
    }

    /// `[0, s1, 0, s2, ..., sN, 0]`. Fails if nothing in `phonemes` is known.
    pub fn encode(&self, phonemes: &str) -> Result<Vec<i64>> {
        let seq = self.to_sequence(phonemes);
        if seq.is_empty() {
            return Err(TtsError::EmptyInput(format!(
                "no known symbols in input text {phonemes:?}"
            )));
        }
        Ok(intersperse(&seq, BLANK_ID))
    }

    pub fn decode(&self, ids: &[i64]) -> String {
        ids.iter()
            .filter_map(|&id| usize::try_from(id).ok())
            .filter_map(|id| self.symbols.get(id))
            .collect()
    }
}

pub fn intersperse(seq: &[i64], item: i64) -> Vec<i64> {
    let mut out = vec![item; seq.len() * 2 + 1];
    for (i, &id) in seq.iter().enumerate() {
        out[2 * i + 1] = id;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_layout() {
        let enc = SymbolEncoder::new();
        assert_eq!(enc.id_of('_'), Some(0));
        assert_eq!(enc.id_of(';'), Some(1));
        assert_eq!(enc.id_of(' '), Some(16));
        assert_eq!(enc.id_of('A'), Some(17));
        assert_eq!(enc.id_of('a'), Some(43));
        assert_eq!(enc.id_of('ɑ'), Some(69));
    }

    #[test]
    fn duplicate_symbols_take_the_later_id() {
        let enc = SymbolEncoder::new();
        let last = enc.len() as i64 - 1;
        // "'" appears twice near the end of the IPA block; "ᵻ" is last.
        assert_eq!(enc.id_of('ᵻ'), Some(last));
        assert_eq!(enc.id_of('\''), Some(last - 1));
    }

    #[test]
    fn encode_intersperses_blanks() {
        let enc = SymbolEncoder::new();
        let ids = enc.encode("ab").unwrap();
        assert_eq!(ids, vec![0, 43, 0, 44, 0]);
        assert_eq!(enc.decode(&ids), "_a_b_");
    }

    #[test]
    fn unknown_symbols_are_skipped() {
        let enc = SymbolEncoder::new();
        assert_eq!(enc.to_sequence("a#b"), vec![43, 44]);
        assert!(matches!(enc.encode("###"), Err(TtsError::EmptyInput(_))));
    }

    #[test]
    fn intersperse_empty() {
        assert_eq!(intersperse(&[], 0), vec![0]);
    }
}
