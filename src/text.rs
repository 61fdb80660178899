//! Small string helpers shared by submission, city resolution and rendering.
use once_cell::sync::Lazy;
use regex::Regex;

/// Placeholder substituted with the city name in every per-city template.
pub const CITY_PLACEHOLDER: &str = "{city}";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static NON_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\D").expect("valid regex"));

pub fn substitute_city(template: &str, city: &str) -> String {
    template.replace(CITY_PLACEHOLDER, city)
}

/// Trim and collapse runs of whitespace (including newlines) into one space.
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

pub fn digits_only(text: &str) -> String {
    NON_DIGITS.replace_all(text, "").into_owned()
}

/// Replace Latin accented letters with their ASCII base letter. Anything
/// else outside ASCII becomes `?`.
pub fn fold_accents(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' | 'Å' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        c if c.is_ascii() => c,
        _ => '?',
    }
}

/// Key used for case- and accent-insensitive comparisons and ordering.
pub fn match_key(text: &str) -> String {
    fold_accents(text.trim()).to_lowercase()
}
