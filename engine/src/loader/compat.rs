//! Host version compatibility
//!
//! `grafanaDependency` uses npm-style ranges: whitespace-separated
//! comparators (`>=9.2.0 <11`) and `||` alternatives. They are rewritten into
//! `semver` requirements, one per alternative.

use semver::{Version, VersionReq};

/// Whether `host` satisfies `constraint`
///
/// A prerelease host version is compared by its release part, so a
/// `10.4.0-pre` host satisfies `>=10.4.0`.
///
/// # Errors
///
/// Returns the parse error of the first alternative that is not a valid
/// requirement.
pub fn satisfies(constraint: &str, host: &Version) -> Result<bool, semver::Error> {
    let host = Version::new(host.major, host.minor, host.patch);

    let mut requirements = Vec::new();
    for alternative in constraint.split("||") {
        requirements.push(VersionReq::parse(&to_semver_req(alternative))?);
    }

    Ok(requirements.iter().any(|req| req.matches(&host)))
}

/// Join whitespace-separated comparators with commas, keeping a bare
/// operator attached to the version that follows it
fn to_semver_req(alternative: &str) -> String {
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op = String::new();

    for token in alternative.split_whitespace() {
        let token = token.trim_end_matches(',');
        if token.is_empty() {
            continue;
        }
        if token.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(token);
            continue;
        }
        comparators.push(format!("{}{}", std::mem::take(&mut pending_op), token));
    }

    if comparators.is_empty() {
        "*".to_string()
    } else {
        comparators.join(", ")
    }
}
