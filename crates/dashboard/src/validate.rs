//! Fixed-pattern request validators. All are pure predicates; callers turn a
//! negative result into a 400 plus a security log line. The filename and
//! free-text patterns admit the Turkish alphabet alongside ASCII.

use std::sync::OnceLock;

use regex::Regex;

fn session_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9-]{36}$").expect("session id pattern"))
}

fn file_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("file id pattern"))
}

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-ZçğıöşüÇĞIİÖŞÜ0-9._\s-]+$").expect("filename pattern")
    })
}

fn text_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^[a-zA-ZçğıöşüÇĞIİÖŞÜ0-9\s.,;:!?'"()_-]+$"#).expect("text pattern")
    })
}

/// Session ids are 36-character token-like strings (the UUID wire shape).
pub fn valid_session_id(raw: &str) -> bool {
    session_id_pattern().is_match(raw)
}

pub fn valid_file_id(raw: &str) -> bool {
    file_id_pattern().is_match(raw)
}

/// Accepts Turkish-alphabet filenames such as `rapor_İşlem.csv`; rejects
/// anything with a path separator, so `../etc/passwd` fails the pattern.
pub fn valid_filename(raw: &str) -> bool {
    if raw.is_empty() || raw.chars().count() > 255 {
        return false;
    }
    filename_pattern().is_match(raw)
}

pub fn valid_text(raw: &str) -> bool {
    !raw.is_empty() && text_pattern().is_match(raw)
}

/// Strips angle brackets and quote characters, trims, and caps the result at
/// 1000 characters. Turkish letters pass through untouched.
pub fn sanitize_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '<' | '>' | '"' | '\''))
        .collect::<String>()
        .trim()
        .chars()
        .take(1000)
        .collect()
}
