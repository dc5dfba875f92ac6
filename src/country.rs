//! Resolves the free-text comment that a donor attaches to a payment into one of a fixed set of
//! country names.

/// The countries we tally. Every one of these is always present in the totals, even at zero.
pub const COUNTRIES: [&str; 40] = [
    "United States",
    "India",
    "China",
    "Japan",
    "Germany",
    "United Kingdom",
    "France",
    "Italy",
    "Canada",
    "Australia",
    "Brazil",
    "Mexico",
    "Spain",
    "Netherlands",
    "Turkey",
    "South Korea",
    "Indonesia",
    "Saudi Arabia",
    "United Arab Emirates",
    "Israel",
    "Sweden",
    "Switzerland",
    "Poland",
    "Ukraine",
    "Russia",
    "Argentina",
    "Colombia",
    "South Africa",
    "Nigeria",
    "Egypt",
    "Vietnam",
    "Thailand",
    "Malaysia",
    "Singapore",
    "Philippines",
    "Kazakhstan",
    "Norway",
    "Denmark",
    "Ireland",
    "Austria",
];

/// Upper-cased spellings that map to a canonical name.
const ALIASES: [(&str, &str); 10] = [
    ("USA", "United States"),
    ("US", "United States"),
    ("U.S.", "United States"),
    ("UK", "United Kingdom"),
    ("UAE", "United Arab Emirates"),
    ("KOREA", "South Korea"),
    ("SOUTH KOREA", "South Korea"),
    ("RUSSIA", "Russia"),
    ("CHINA", "China"),
    ("INDIA", "India"),
];

/// Returns the canonical country for `raw`, or `None` if it does not name one of `COUNTRIES`.
///
/// The checks are applied in order and the first hit wins:
/// 1. an exact match
/// 2. an alias match on the upper-cased input
/// 3. a match on the input with its first letter capitalized (inputs shorter than 3 characters
///    are fully upper-cased instead)
/// 4. a case-insensitive match
///
/// # Examples
/// ```
/// # use ton_donations::country::normalize;
/// assert_eq!(normalize(" france "), Some("France"));
/// assert_eq!(normalize("usa"), Some("United States"));
/// assert_eq!(normalize("thanks for the stream!"), None);
/// ```
pub fn normalize(raw: &str) -> Option<&'static str> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Some(c) = canonical(s) {
        return Some(c);
    }

    let upper = s.to_uppercase();
    if let Some((_, c)) = ALIASES.iter().find(|(alias, _)| *alias == upper) {
        return Some(c);
    }

    let title = if s.chars().count() < 3 {
        upper
    } else {
        capitalize_first(s)
    };
    if let Some(c) = canonical(&title) {
        return Some(c);
    }

    let lower = s.to_lowercase();
    COUNTRIES
        .iter()
        .copied()
        .find(|c| c.to_lowercase() == lower)
}

/// Returns the `'static` vocabulary entry equal to `s`.
fn canonical(s: &str) -> Option<&'static str> {
    COUNTRIES.iter().copied().find(|c| *c == s)
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
