//! Payment-frequency label resolution.
//!
//! Contracts arrive with a free-text payment frequency: Arabic or English,
//! inconsistently spelled, sometimes wrapped in extra words ("أقساط ربع
//! سنوية"). This module maps such a label to a month-step, the number of
//! months between successive installment due dates. A step of 0 means
//! "unrecognized" and is a normal outcome, not an error; callers fall back to
//! a single installment for the full term.
//!
//! The resolver only runs at the input boundary (contract creation and
//! amendment). The resolved step is persisted on the contract so downstream
//! logic never re-parses the text.

/// Known labels and their month-step, in priority order for equal-length
/// matches.
const FREQUENCY_TABLE: &[(&str, i32)] = &[
    ("شهري", 1),
    ("MONTHLY", 1),
    ("كل شهر", 1),
    ("ربع سنوي", 3),
    ("QUARTERLY", 3),
    ("كل 3 أشهر", 3),
    ("3 أشهر", 3),
    ("3 شهور", 3),
    ("أربع دفعات", 3),
    ("اربع دفعات", 3),
    ("3 دفعات", 4),
    ("كل 4 أشهر", 4),
    ("نصف سنوي", 6),
    ("HALF_YEARLY", 6),
    ("HALF-YEARLY", 6),
    ("كل 6 أشهر", 6),
    ("6 أشهر", 6),
    ("6 شهور", 6),
    ("دفعتين", 6),
    ("سنوي", 12),
    ("YEARLY", 12),
    ("كل سنة", 12),
    ("دفعة واحدة", 12),
];

/// Resolve a free-text payment-frequency label to a month-step.
///
/// Matching: the normalized (trimmed, case-folded) input must equal or
/// contain a table key. The longest matching key wins, so "6 أشهر" is never
/// shadowed by a shorter key that happens to be a substring of the input;
/// ties between equal-length keys are broken by table order. If no key
/// matches, the first run of ASCII digits in the input is taken as the step
/// when it lands in 1..=12 (covers ad-hoc labels like "كل 5 أشهر").
///
/// Returns 0 when nothing matches. Never fails.
pub fn resolve_month_step(label: Option<&str>) -> i32 {
    let normalized = label.map(str::trim).unwrap_or_default().to_uppercase();
    if normalized.is_empty() {
        return 0;
    }

    let mut best: Option<(usize, i32)> = None;
    for (key, step) in FREQUENCY_TABLE {
        if !normalized.contains(&key.to_uppercase()) {
            continue;
        }
        let key_length = key.chars().count();
        if best.is_none_or(|(best_length, _)| key_length > best_length) {
            best = Some((key_length, *step));
        }
    }

    if let Some((_, step)) = best {
        return step;
    }

    digit_fallback(&normalized)
}

fn digit_fallback(normalized: &str) -> i32 {
    let digits: String = normalized
        .chars()
        .skip_while(|character| !character.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();

    match digits.parse::<i32>() {
        Ok(step) if (1..=12).contains(&step) => step,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::resolve_month_step;

    #[test]
    fn resolves_known_arabic_labels() {
        assert_eq!(resolve_month_step(Some("شهري")), 1);
        assert_eq!(resolve_month_step(Some("ربع سنوي")), 3);
        assert_eq!(resolve_month_step(Some("نصف سنوي")), 6);
        assert_eq!(resolve_month_step(Some("سنوي")), 12);
        assert_eq!(resolve_month_step(Some("دفعتين")), 6);
        assert_eq!(resolve_month_step(Some("دفعة واحدة")), 12);
    }

    #[test]
    fn resolves_english_labels_case_insensitively() {
        assert_eq!(resolve_month_step(Some("MONTHLY")), 1);
        assert_eq!(resolve_month_step(Some("quarterly")), 3);
        assert_eq!(resolve_month_step(Some("half_yearly")), 6);
        assert_eq!(resolve_month_step(Some("Yearly")), 12);
    }

    #[test]
    fn matches_labels_embedded_in_extra_words() {
        assert_eq!(resolve_month_step(Some("أقساط ربع سنوية")), 3);
        assert_eq!(resolve_month_step(Some("  كل 6 أشهر تقريباً ")), 6);
    }

    #[test]
    fn longest_key_wins_over_substrings() {
        // "ربع سنوي" and "نصف سنوي" both contain the shorter key "سنوي" (12);
        // the longer, more specific key must take priority.
        assert_eq!(resolve_month_step(Some("ربع سنوي")), 3);
        assert_eq!(resolve_month_step(Some("نصف سنوي")), 6);
        assert_eq!(resolve_month_step(Some("6 أشهر")), 6);
    }

    #[test]
    fn falls_back_to_a_digit_in_the_label() {
        assert_eq!(resolve_month_step(Some("كل 5 أشهر")), 5);
        assert_eq!(resolve_month_step(Some("every 2 months")), 2);
        // Out of the 1..=12 range, not a plausible month-step.
        assert_eq!(resolve_month_step(Some("كل 15 أشهر")), 0);
    }

    #[test]
    fn unrecognized_input_yields_zero() {
        assert_eq!(resolve_month_step(None), 0);
        assert_eq!(resolve_month_step(Some("")), 0);
        assert_eq!(resolve_month_step(Some("   ")), 0);
        assert_eq!(resolve_month_step(Some("سداد مرن")), 0);
    }
}
