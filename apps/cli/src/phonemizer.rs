use std::{
    path::Path,
    process::{Command, Stdio},
};

use anyhow::{bail, Context, Result};
use clap::ValueEnum;

/// Turns plain text into the IPA the symbol table expects.
pub trait Phonemizer {
    fn name(&self) -> &str;
    fn phonemize(&self, text: &str) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PhonemizerMode {
    Auto,
    EspeakNg,
    Espeak,
}

/// American English IPA with stress marks from an espeak binary.
#[derive(Debug)]
pub struct EspeakPhonemizer {
    program: String,
}

impl Phonemizer for EspeakPhonemizer {
    fn name(&self) -> &str {
        &self.program
    }

    fn phonemize(&self, text: &str) -> Result<String> {
        let output = Command::new(&self.program)
            .args(["-q", "--ipa", "-v", "en-us"])
            .arg(clean_text(text))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .with_context(|| {
                format!(
                    "failed to execute phonemizer program '{}': ensure it is installed",
                    self.program
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("phonemizer '{}' failed: {}", self.program, stderr.trim());
        }

        let stdout =
            String::from_utf8(output.stdout).context("phonemizer emitted non-utf8 output")?;
        let phonemes = join_clauses(&stdout);
        if phonemes.is_empty() {
            bail!("phonemizer '{}' returned empty phoneme output", self.program);
        }
        Ok(phonemes)
    }
}

pub fn detect_phonemizer(mode: PhonemizerMode) -> Result<Box<dyn Phonemizer>> {
    let candidates: &[&str] = match mode {
        PhonemizerMode::Auto => &["espeak-ng", "espeak"],
        PhonemizerMode::EspeakNg => &["espeak-ng"],
        PhonemizerMode::Espeak => &["espeak"],
    };
    match candidates.iter().find(|program| executable_in_path(program)) {
        Some(program) => Ok(Box::new(EspeakPhonemizer {
            program: program.to_string(),
        })),
        None => bail!(
            "no espeak phonemizer found on PATH (tried: {}); pass --phonemes to give IPA directly",
            candidates.join(", ")
        ),
    }
}

fn executable_in_path(command: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| is_executable(&dir.join(command)))
}

fn is_executable(path: &Path) -> bool {
    if cfg!(windows) {
        path.with_extension("exe").is_file() || path.is_file()
    } else {
        path.is_file()
    }
}

/// Lowercases and collapses whitespace before phonemization.
fn clean_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// espeak prints one line per clause.
fn join_clauses(stdout: &str) -> String {
    stdout.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_lowercases_and_collapses() {
        assert_eq!(clean_text("  Hello\tWORLD \n again "), "hello world again");
    }

    #[test]
    fn clauses_are_joined_on_one_line() {
        assert_eq!(join_clauses(" həlˈoʊ\n wˈɜːld\n"), "həlˈoʊ wˈɜːld");
        assert_eq!(join_clauses("\n \n"), "");
    }

    #[test]
    fn unknown_program_is_not_on_path() {
        assert!(!executable_in_path("nsf-tts-no-such-phonemizer"));
    }

    #[test]
    fn missing_binary_reports_the_program() {
        let phonemizer = EspeakPhonemizer {
            program: "nsf-tts-no-such-phonemizer".to_string(),
        };
        let err = phonemizer.phonemize("hello").unwrap_err();
        assert!(format!("{err:#}").contains("nsf-tts-no-such-phonemizer"));
    }
}
