// ABOUTME: Jaro-Winkler similarity used to suggest replacements for unknown names

/// Jaro similarity between two strings, in the range 0.0 to 1.0.
fn jaro_similarity(str1: &str, str2: &str) -> f64 {
    if str1 == str2 {
        return 1.0;
    }
    let chars1: Vec<char> = str1.chars().collect();
    let chars2: Vec<char> = str2.chars().collect();
    if chars1.is_empty() || chars2.is_empty() {
        return 0.0;
    }
    let max_len = chars1.len().max(chars2.len());
    let match_distance = (max_len / 2).saturating_sub(1);
    let mut matches1 = vec![false; chars1.len()];
    let mut matches2 = vec![false; chars2.len()];
    let mut matches = 0usize;

    for (i, c1) in chars1.iter().enumerate() {
        let start = i.saturating_sub(match_distance);
        let end = (i + match_distance + 1).min(chars2.len());
        for j in start..end {
            if !matches2[j] && *c1 == chars2[j] {
                matches1[i] = true;
                matches2[j] = true;
                matches += 1;
                break;
            }
        }
    }

    if matches == 0 {
        return 0.0;
    }

    let mut transpositions = 0usize;
    let mut k = 0usize;
    for (i, matched) in matches1.iter().enumerate() {
        if !matched {
            continue;
        }
        while !matches2[k] {
            k += 1;
        }
        if chars1[i] != chars2[k] {
            transpositions += 1;
        }
        k += 1;
    }

    let matches = matches as f64;
    ((matches / chars1.len() as f64)
        + (matches / chars2.len() as f64)
        + ((matches - transpositions as f64 / 2.0) / matches))
        / 3.0
}

/// Jaro-Winkler similarity: the Jaro similarity boosted for strings sharing
/// a common prefix of up to four characters.
pub fn jaro_winkler_similarity(str1: &str, str2: &str) -> f64 {
    const SCALE: f64 = 0.1;
    let jaro = jaro_similarity(str1, str2);
    if jaro <= 0.7 {
        return jaro;
    }
    let prefix = str1
        .chars()
        .zip(str2.chars())
        .take(4)
        .take_while(|(c1, c2)| c1 == c2)
        .count();
    jaro + SCALE * prefix as f64 * (1.0 - jaro)
}

fn is_symbol_name(option: &str) -> bool {
    let mut chars = option.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Select the closest match for *word* among *options*, filtering out
/// candidates that are not valid symbol names. Returns `None` when there are
/// no viable candidates.
pub fn suggest_symbol<'a, I>(word: &str, options: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    options
        .into_iter()
        .filter(|option| is_symbol_name(option))
        .map(|option| (option, jaro_winkler_similarity(word, option)))
        .max_by(|(_, s1), (_, s2)| s1.total_cmp(s2))
        .map(|(option, _)| option.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_strings_score_one() {
        assert_eq!(jaro_winkler_similarity("symbol", "symbol"), 1.0);
    }

    #[test]
    fn test_disjoint_strings_score_zero() {
        assert_eq!(jaro_winkler_similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn test_transposition_scores_high() {
        let score = jaro_winkler_similarity("nmae", "name");
        assert!(score > 0.85, "got {score}");
    }

    #[test]
    fn test_suggest_picks_the_closest_option() {
        let suggestion = suggest_symbol("nmae", ["name", "age", "email"]);
        assert_eq!(suggestion.as_deref(), Some("name"));
    }

    #[test]
    fn test_suggest_filters_invalid_symbol_names() {
        let suggestion = suggest_symbol("nmae", ["nmae!", "not a symbol"]);
        assert_eq!(suggestion, None);
    }

    #[test]
    fn test_suggest_with_no_options() {
        assert_eq!(suggest_symbol("word", []), None);
    }
}
