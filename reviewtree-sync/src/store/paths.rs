/// How closely two identifiers matched, best first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathMatch {
    Exact,
    Suffix,
    Basename,
}

/// Canonical form used for every comparison: `/` separators, no leading
/// `./` or `/`, no empty segments.
pub fn normalize(value: &str) -> String {
    let value = value.replace('\\', "/");
    let mut rest = value.as_str();
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            break;
        }
    }
    rest.split('/')
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn basename(value: &str) -> String {
    let normalized = normalize(value);
    match normalized.rsplit_once('/') {
        Some((_, name)) => name.to_string(),
        None => normalized,
    }
}

pub fn match_tier(candidate: &str, target: &str) -> Option<PathMatch> {
    let candidate = normalize(candidate);
    let target = normalize(target);
    if candidate.is_empty() || target.is_empty() {
        return None;
    }
    if candidate == target {
        return Some(PathMatch::Exact);
    }
    let (longer, shorter) = if candidate.len() >= target.len() {
        (&candidate, &target)
    } else {
        (&target, &candidate)
    };
    if !longer.ends_with(&format!("/{shorter}")) {
        return None;
    }
    // A bare name only pins down the last segment.
    if shorter.contains('/') {
        Some(PathMatch::Suffix)
    } else {
        Some(PathMatch::Basename)
    }
}

/// Loose equivalence: exact, suffix, or a bare name equal to the basename.
pub fn matches(candidate: &str, target: &str) -> bool {
    match_tier(candidate, target).is_some()
}

/// Exact or multi-segment suffix match; a bare name is not enough.
pub fn matches_strictly(candidate: &str, target: &str) -> bool {
    matches!(
        match_tier(candidate, target),
        Some(PathMatch::Exact | PathMatch::Suffix)
    )
}

/// Child path under `parent`; the root's empty path contributes nothing.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

/// Both arguments are expected to be normalized already.
pub fn is_under(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Moves `path` from under `old_prefix` to under `new_prefix`.
pub fn rebase(path: &str, old_prefix: &str, new_prefix: &str) -> Option<String> {
    if path == old_prefix {
        return Some(new_prefix.to_string());
    }
    let rest = path.strip_prefix(old_prefix)?.strip_prefix('/')?;
    Some(join(new_prefix, rest))
}
