//! Best-effort language detection for routing reply-template variants.
//!
//! Script-level checks cover the non-Latin languages the corpus carries;
//! Latin-script languages are separated by stopword counting. Unknown
//! input defaults to English.

fn is_kana(c: char) -> bool {
    matches!(c, '\u{3040}'..='\u{309F}' | '\u{30A0}'..='\u{30FF}')
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7AF}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}')
}

fn is_han(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

fn is_arabic(c: char) -> bool {
    matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}')
}

fn is_thai(c: char) -> bool {
    matches!(c, '\u{0E00}'..='\u{0E7F}')
}

/// Detect the language of `text`, returning an ISO 639-1 code.
///
/// Kana wins over han: Japanese mail mixes kanji with kana, while Chinese
/// mail carries no kana at all.
pub fn detect_language(text: &str) -> &'static str {
    let mut has_kana = false;
    let mut has_hangul = false;
    let mut has_han = false;
    let mut has_arabic = false;
    let mut has_thai = false;

    for c in text.chars() {
        has_kana |= is_kana(c);
        has_hangul |= is_hangul(c);
        has_han |= is_han(c);
        has_arabic |= is_arabic(c);
        has_thai |= is_thai(c);
    }

    if has_kana {
        return "ja";
    }
    if has_hangul {
        return "ko";
    }
    if has_han {
        return "zh";
    }
    if has_arabic {
        return "ar";
    }
    if has_thai {
        return "th";
    }
    latin_language(text)
}

/// Stopword tables for Latin-script separation. Words were picked to be
/// distinctive; the few overlaps (una, die) are resolved by counting.
const STOPWORDS: &[(&str, &[&str])] = &[
    (
        "es",
        &[
            "el", "los", "las", "una", "pero", "porque", "gracias", "hola", "usted", "puedo",
            "tengo", "ayuda",
        ],
    ),
    (
        "pt",
        &[
            "não", "você", "obrigado", "obrigada", "olá", "estou", "meu", "minha", "ajuda",
            "quero", "pelo", "isso",
        ],
    ),
    (
        "fr",
        &[
            "le", "les", "des", "une", "est", "vous", "je", "pas", "bonjour", "merci", "avec",
            "pour",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "ich", "sie", "ein", "eine", "mit",
            "bitte",
        ],
    ),
    (
        "it",
        &[
            "il", "gli", "una", "non", "che", "sono", "grazie", "ciao", "questo", "vorrei",
            "aiuto", "della",
        ],
    ),
];

/// Minimum stopword hits before a Latin-script guess beats the English
/// default. One accidental hit ("die", "pour") must not flip the result.
const MIN_STOPWORD_HITS: usize = 2;

fn latin_language(text: &str) -> &'static str {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();

    let mut best = "en";
    let mut best_hits = 0;
    for (code, stopwords) in STOPWORDS {
        let hits = words
            .iter()
            .filter(|w| stopwords.contains(&w.as_str()))
            .count();
        if hits > best_hits {
            best_hits = hits;
            best = code;
        }
    }

    if best_hits >= MIN_STOPWORD_HITS {
        best
    } else {
        "en"
    }
}
