/// Up to `max_units` units immediately before `index`, in document order,
/// whose combined length stays within `budget_chars`.
///
/// The nearest unit is taken first; a unit that would overflow the budget
/// ends the walk.
pub fn preceding_context(texts: &[String], index: usize, max_units: usize, budget_chars: usize) -> Vec<String> {
    let mut picked = Vec::new();
    let mut used = 0usize;
    for text in texts[..index.min(texts.len())].iter().rev().take(max_units) {
        let len = text.chars().count();
        if used + len > budget_chars {
            break;
        }
        used += len;
        picked.push(text.clone());
    }
    picked.reverse();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts() -> Vec<String> {
        ["one", "two", "three", "four"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn nearest_units_in_document_order() {
        assert_eq!(preceding_context(&texts(), 3, 2, 100), vec!["two", "three"]);
    }

    #[test]
    fn first_unit_has_no_context() {
        assert!(preceding_context(&texts(), 0, 2, 100).is_empty());
    }

    #[test]
    fn budget_stops_the_walk() {
        // "three" (5) fits, "two" (3) would make 8 > 7
        assert_eq!(preceding_context(&texts(), 3, 2, 7), vec!["three"]);
        assert!(preceding_context(&texts(), 3, 2, 4).is_empty());
    }

    #[test]
    fn index_past_end_is_clamped() {
        assert_eq!(preceding_context(&texts(), 10, 1, 100), vec!["four"]);
    }
}
