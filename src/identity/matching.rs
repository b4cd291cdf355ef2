//! Matching heuristics for pairing external and internal user records.
//!
//! The two systems share no guaranteed key, so candidates are paired by a
//! fixed precedence of signals, strongest first:
//!
//! 1. explicit backlink (external id stored on the internal record)
//! 2. exact email, case-insensitive and trimmed
//! 3. email local part (text before `@`)
//! 4. exact username, case-insensitive
//! 5. fuzzy name: containment or word overlap after diacritic folding
//!
//! The first rule that produces a hit wins and scanning stops, which keeps
//! false positives down while still catching informally-named accounts.
//! Everything here is pure so the policy can be tested without I/O.

use std::collections::HashSet;

use crate::models::{ExternalUser, InternalUser};

/// Which signal produced a pairing. Ordered strongest to weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchRule {
    Backlink,
    Email,
    EmailLocalPart,
    Username,
    FuzzyName,
}

const RULES: &[MatchRule] = &[
    MatchRule::Backlink,
    MatchRule::Email,
    MatchRule::EmailLocalPart,
    MatchRule::Username,
    MatchRule::FuzzyName,
];

/// Find the internal user matching an external one, if any.
///
/// Rules are tried in precedence order across the whole internal roster, so
/// a backlink on any internal user always beats a heuristic hit on another.
pub fn find_match<'a>(
    external: &ExternalUser,
    internals: &'a [InternalUser],
) -> Option<(&'a InternalUser, MatchRule)> {
    for &rule in RULES {
        if let Some(user) = internals.iter().find(|int| matches_rule(external, int, rule)) {
            return Some((user, rule));
        }
    }
    None
}

fn matches_rule(external: &ExternalUser, internal: &InternalUser, rule: MatchRule) -> bool {
    match rule {
        MatchRule::Backlink => internal
            .external_id
            .as_deref()
            .is_some_and(|id| id == external.id),
        MatchRule::Email => match (&external.email, &internal.email) {
            (Some(a), Some(b)) => emails_equal(a, b),
            _ => false,
        },
        MatchRule::EmailLocalPart => match (&external.email, &internal.email) {
            (Some(a), Some(b)) => email_local_parts_equal(a, b),
            _ => false,
        },
        MatchRule::Username => match (&external.username, &internal.username) {
            (Some(a), Some(b)) => {
                let (a, b) = (a.trim(), b.trim());
                !a.is_empty() && a.eq_ignore_ascii_case(b)
            }
            _ => false,
        },
        MatchRule::FuzzyName => {
            let ext_names = [external.username.as_deref(), external.display_name.as_deref()];
            let int_names = [internal.name.as_deref(), internal.username.as_deref()];
            ext_names
                .iter()
                .flatten()
                .any(|e| int_names.iter().flatten().any(|i| fuzzy_name_match(e, i)))
        }
    }
}

fn emails_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    !a.is_empty() && a.eq_ignore_ascii_case(b)
}

fn email_local_parts_equal(a: &str, b: &str) -> bool {
    match (a.trim().split_once('@'), b.trim().split_once('@')) {
        (Some((a_local, _)), Some((b_local, _))) => {
            !a_local.is_empty() && a_local.eq_ignore_ascii_case(b_local)
        }
        _ => false,
    }
}

/// Fuzzy comparison of two personal names.
///
/// Both sides are lowercased, diacritic-folded, and whitespace-normalized.
/// A match is containment of one side in the other, or sharing at least two
/// words; a single shared word counts only when one side is itself a single
/// word (informal accounts like "minh" vs "Minh Nguyen").
pub fn fuzzy_name_match(left: &str, right: &str) -> bool {
    let left = normalize_name(left);
    let right = normalize_name(right);
    if left.is_empty() || right.is_empty() {
        return false;
    }
    if left == right || left.contains(&right) || right.contains(&left) {
        return true;
    }

    let left_words: HashSet<&str> = left.split_whitespace().collect();
    let right_words: HashSet<&str> = right.split_whitespace().collect();
    let shared = left_words.intersection(&right_words).count();
    shared >= 2 || (shared == 1 && (left_words.len() == 1 || right_words.len() == 1))
}

/// Lowercase, fold diacritics, and collapse runs of whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_space = false;
    for c in name.trim().chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lower in c.to_lowercase() {
            out.push(fold_diacritic(lower));
        }
    }
    out
}

/// ASCII-fold the precomposed Latin letters that show up in practice
/// (Western European plus the full Vietnamese set).
fn fold_diacritic(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' | 'ạ' | 'ả' | 'ấ' | 'ầ' | 'ẩ'
        | 'ẫ' | 'ậ' | 'ắ' | 'ằ' | 'ẳ' | 'ẵ' | 'ặ' => 'a',
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' | 'ẹ' | 'ẻ' | 'ẽ' | 'ế' | 'ề'
        | 'ể' | 'ễ' | 'ệ' => 'e',
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ỉ' | 'ị' => 'i',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' | 'ơ' | 'ọ' | 'ỏ' | 'ố' | 'ồ'
        | 'ổ' | 'ỗ' | 'ộ' | 'ớ' | 'ờ' | 'ở' | 'ỡ' | 'ợ' => 'o',
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ư' | 'ụ' | 'ủ' | 'ứ' | 'ừ'
        | 'ử' | 'ữ' | 'ự' => 'u',
        'ý' | 'ÿ' | 'ỳ' | 'ỵ' | 'ỷ' | 'ỹ' => 'y',
        'đ' => 'd',
        'ñ' | 'ń' => 'n',
        'ç' | 'ć' | 'č' => 'c',
        'ß' => 's',
        _ => c,
    }
}
