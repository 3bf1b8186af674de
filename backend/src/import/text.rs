//! String folding shared by alias matching, id slugs and catalog lookups.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Case-folds, strips diacritics and trims: `" Sección "` becomes `"seccion"`.
pub fn fold(s: &str) -> String {
    s.to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

fn strip_accent(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' => 'a',
        'é' | 'è' | 'ë' | 'ê' => 'e',
        'í' | 'ì' | 'ï' | 'î' => 'i',
        'ó' | 'ò' | 'ö' | 'ô' => 'o',
        'ú' | 'ù' | 'ü' | 'û' => 'u',
        'ñ' => 'n',
        other => other,
    }
}

fn slug_part(part: &str) -> String {
    let lowered = part.to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut in_space = false;
    for c in lowered.chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        let c = strip_accent(c);
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-' {
            out.push(c);
        }
    }
    out
}

/// Joins the slug of each non-empty part with `-`.
///
/// `slug(&["2024-03-05", "1ro Básico", "A", "jsmith"])` is
/// `"2024-03-05-1ro_basico-a-jsmith"`.
pub fn slug(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| slug_part(p))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_strips_case_and_accents() {
        assert_eq!(fold("  1ro Básico "), "1ro basico");
        assert_eq!(fold("SECCIÓN"), "seccion");
        assert_eq!(fold("Muñoz"), "munoz");
    }

    #[test]
    fn slug_builds_composite_ids() {
        assert_eq!(
            slug(&["2024-03-05", "1ro Básico", "A", "jsmith"]),
            "2024-03-05-1ro_basico-a-jsmith"
        );
        assert_eq!(slug(&["05/03/2024", "2do  Medio", "", "12.345.678-9"]), "05032024-2do_medio-12345678-9");
    }

    #[test]
    fn slug_is_stable() {
        let parts = ["2024-03-05", "Kínder", "B", "ana.pérez"];
        assert_eq!(slug(&parts), slug(&parts));
        assert_eq!(slug(&parts), "2024-03-05-kinder-b-anaperez");
    }

    #[test]
    fn slug_drops_symbols_and_unknown_letters() {
        assert_eq!(slug(&["Ça va?", "ÑANDÚ"]), "a_va-nandu");
    }
}
