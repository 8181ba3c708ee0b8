//! Languages the engine ships with and the files each voice needs.

use crate::engine::DictionaryVolume;
use crate::error::{EloquenceError, EloquenceResult};
use glob::MatchOptions;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One engine language dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    /// Three-letter code, also the dictionary file prefix
    pub code: &'static str,
    /// Dialect id passed to the engine
    pub dialect: i32,
    /// Display name
    pub name: &'static str,
}

/// Dialects the engine supports
pub const LANGUAGES: [Language; 10] = [
    Language { code: "enu", dialect: 65_536, name: "American English" },
    Language { code: "eng", dialect: 65_537, name: "British English" },
    Language { code: "esp", dialect: 131_072, name: "Castilian Spanish" },
    Language { code: "esm", dialect: 131_073, name: "Latin American Spanish" },
    Language { code: "fra", dialect: 196_608, name: "French" },
    Language { code: "frc", dialect: 196_609, name: "French Canadian" },
    Language { code: "deu", dialect: 262_144, name: "German" },
    Language { code: "ita", dialect: 327_680, name: "Italian" },
    Language { code: "ptb", dialect: 458_752, name: "Brazilian Portuguese" },
    Language { code: "fin", dialect: 589_824, name: "Finnish" },
];

/// Language used when configuration names none
pub const DEFAULT_LANGUAGE: &str = "enu";

/// Find a language by its code
#[must_use]
pub fn language_by_code(code: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|lang| lang.code.eq_ignore_ascii_case(code))
}

/// Find a language by its dialect id
#[must_use]
pub fn language_by_dialect(dialect: i32) -> Option<&'static Language> {
    LANGUAGES.iter().find(|lang| lang.dialect == dialect)
}

/// Resolve a voice given as a language code or a numeric dialect id
///
/// # Errors
///
/// Returns an error if the voice matches no known language
pub fn resolve_voice(voice: &str) -> EloquenceResult<&'static Language> {
    let voice = voice.trim();
    language_by_code(voice)
        .or_else(|| voice.parse().ok().and_then(language_by_dialect))
        .ok_or_else(|| EloquenceError::voice_not_found(voice))
}

/// Ordered set of directories holding voice data and dictionaries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResources {
    dirs: Vec<PathBuf>,
    voice_dir: Option<PathBuf>,
}

impl VoiceResources {
    /// Build from candidate directories; missing and duplicate entries are skipped
    #[must_use]
    pub fn new<I>(candidates: I) -> Self
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for dir in candidates {
            if dir.is_dir() && !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        let voice_dir = dirs
            .iter()
            .find(|dir| contains_voice_data(dir))
            .or_else(|| dirs.first())
            .cloned();
        debug!("Voice resources: dirs={:?} voice_dir={:?}", dirs, voice_dir);
        Self { dirs, voice_dir }
    }

    /// Directory the active voice data lives in
    #[must_use]
    pub fn voice_directory(&self) -> Option<&Path> {
        self.voice_dir.as_deref()
    }

    /// All searched directories, in order
    #[must_use]
    pub fn directories(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// First existing file among `names`, searching the voice directory first
    #[must_use]
    pub fn find(&self, names: &[&str]) -> Option<PathBuf> {
        let ordered = self
            .voice_dir
            .iter()
            .chain(self.dirs.iter().filter(|dir| Some(*dir) != self.voice_dir.as_ref()));
        for dir in ordered {
            for name in names {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Dictionary file for a language, e.g. `enumain.dic` falling back to `main.dic`
    #[must_use]
    pub fn dictionary(&self, language: &str, volume: DictionaryVolume) -> Option<PathBuf> {
        let prefixed = format!("{}{}.dic", language.to_ascii_lowercase(), volume.stem());
        let generic = format!("{}.dic", volume.stem());
        self.find(&[prefixed.as_str(), generic.as_str()])
    }
}

fn contains_voice_data(dir: &Path) -> bool {
    let pattern = dir.join("*.syn");
    let options = MatchOptions {
        case_sensitive: false,
        ..MatchOptions::new()
    };
    glob::glob_with(&pattern.to_string_lossy(), options)
        .map(|mut paths| paths.any(|entry| entry.is_ok()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_language_lookup() {
        assert_eq!(language_by_code("ENU").unwrap().dialect, 65_536);
        assert_eq!(language_by_dialect(262_144).unwrap().code, "deu");
        assert!(language_by_code("xyz").is_none());
    }

    #[test]
    fn test_resolve_voice_accepts_code_or_id() {
        assert_eq!(resolve_voice("fin").unwrap().dialect, 589_824);
        assert_eq!(resolve_voice("196609").unwrap().code, "frc");
        assert_eq!(
            resolve_voice("klingon").unwrap_err(),
            EloquenceError::voice_not_found("klingon")
        );
    }

    #[test]
    fn test_voice_directory_prefers_syn_data() {
        let plain = TempDir::new().unwrap();
        let voices = TempDir::new().unwrap();
        fs::write(voices.path().join("ENU50.SYN"), b"voice").unwrap();

        let resources = VoiceResources::new(vec![
            plain.path().to_path_buf(),
            voices.path().to_path_buf(),
        ]);
        assert_eq!(resources.voice_directory(), Some(voices.path()));
        assert_eq!(resources.directories().len(), 2);
    }

    #[test]
    fn test_missing_directories_skipped() {
        let dir = TempDir::new().unwrap();
        let resources = VoiceResources::new(vec![
            dir.path().join("missing"),
            dir.path().to_path_buf(),
            dir.path().to_path_buf(),
        ]);
        assert_eq!(resources.directories(), &[dir.path().to_path_buf()]);
        assert_eq!(resources.voice_directory(), Some(dir.path()));
    }

    #[test]
    fn test_dictionary_prefers_language_prefix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("main.dic"), b"").unwrap();
        fs::write(dir.path().join("enumain.dic"), b"").unwrap();
        fs::write(dir.path().join("root.dic"), b"").unwrap();

        let resources = VoiceResources::new(vec![dir.path().to_path_buf()]);
        assert_eq!(
            resources.dictionary("enu", DictionaryVolume::Main),
            Some(dir.path().join("enumain.dic"))
        );
        assert_eq!(
            resources.dictionary("enu", DictionaryVolume::Root),
            Some(dir.path().join("root.dic"))
        );
        assert_eq!(resources.dictionary("enu", DictionaryVolume::Abbreviation), None);
    }
}
