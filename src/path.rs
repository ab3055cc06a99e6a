use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::path::PathBuf;

/// Characters that are not portable in file names.
static UNSAFE_PATH_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[*|"<>?:]"#).unwrap());

static GROUP_REFERENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$(\$|[0-9]+)").unwrap());

/// Turns a replacement written with numbered `$n` references, where the number
/// ends at the first non-digit, into `regex` syntax: `$1derived` becomes
/// `${1}derived` and `$$` stays a literal dollar.
pub fn replacement_template(raw: &str) -> String {
    GROUP_REFERENCE
        .replace_all(raw, |caps: &Captures| match &caps[1] {
            "$" => "$$".to_string(),
            group => format!("${{{group}}}"),
        })
        .into_owned()
}

/// Maps resource IRIs onto the local filesystem.
///
/// Rules are tried in config order; the one whose match is longest wins and
/// its replacement is applied to the first match only. Fragments are dropped
/// before matching.
pub struct IriPathResolver {
    rules: Vec<(Regex, String)>,
}

impl IriPathResolver {
    pub fn new(rules: &[(String, String)]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|(pattern, replacement)| {
                Regex::new(pattern)
                    .with_context(|| format!("Invalid iriToPath pattern: {}", pattern))
                    .map(|re| (re, replacement_template(replacement)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn resolve(&self, iri: &str) -> Result<PathBuf> {
        let iri = match iri.find('#') {
            Some(pos) => &iri[..pos],
            None => iri,
        };

        let mut best: Option<(&Regex, &str, usize)> = None;
        for (re, replacement) in &self.rules {
            if let Some(m) = re.find(iri) {
                if best.map_or(true, |(_, _, len)| m.len() > len) {
                    best = Some((re, replacement.as_str(), m.len()));
                }
            }
        }

        let Some((re, replacement, _)) = best else {
            bail!("No IRI mapping found for {}", iri);
        };
        let mapped = re.replace(iri, replacement);
        Ok(PathBuf::from(
            UNSAFE_PATH_CHARS.replace_all(&mapped, "_").into_owned(),
        ))
    }

    /// Like [`resolve`](Self::resolve), appending `extension` unless the path
    /// already ends with it.
    pub fn resolve_with_extension(&self, iri: &str, extension: &str) -> Result<PathBuf> {
        let path = self.resolve(iri)?;
        Ok(with_extension(path, extension))
    }
}

pub fn with_extension(path: PathBuf, extension: &str) -> PathBuf {
    if extension.is_empty() || path.as_os_str().to_string_lossy().ends_with(extension) {
        return path;
    }
    let mut raw = path.into_os_string();
    raw.push(extension);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(rules: &[(&str, &str)]) -> IriPathResolver {
        let rules: Vec<(String, String)> = rules
            .iter()
            .map(|(p, r)| (p.to_string(), r.to_string()))
            .collect();
        IriPathResolver::new(&rules).unwrap()
    }

    #[test]
    fn longest_match_wins() {
        let r = resolver(&[("http://a.org/", "/x/"), ("http://a.org/pods/", "/y/")]);
        assert_eq!(r.resolve("http://a.org/pods/p1").unwrap(), PathBuf::from("/y/p1"));
    }

    #[test]
    fn first_rule_wins_ties() {
        let r = resolver(&[("^http://a.org/", "/first/"), ("http://a.org/", "/second/")]);
        assert_eq!(r.resolve("http://a.org/z").unwrap(), PathBuf::from("/first/z"));
    }

    #[test]
    fn fragment_is_stripped() {
        let r = resolver(&[("http://a.org/", "/x/")]);
        assert_eq!(r.resolve("http://a.org/card#me").unwrap(), PathBuf::from("/x/card"));
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        let r = resolver(&[("http://a.org/", "/x/")]);
        assert_eq!(
            r.resolve("http://a.org/q?a=1:2*3|\"<>").unwrap(),
            PathBuf::from("/x/q_a=1_2_3____")
        );
    }

    #[test]
    fn capture_groups_in_replacement() {
        let r = resolver(&[(r"^http://localhost:3000/pods/([0-9]+)/", "out/pod-$1/")]);
        assert_eq!(
            r.resolve("http://localhost:3000/pods/007/derived/cset0").unwrap(),
            PathBuf::from("out/pod-007/derived/cset0")
        );
    }

    #[test]
    fn numbered_group_followed_by_text() {
        let r = resolver(&[(r"^http://localhost:3000/pods/([0-9]+)/", "out/pod$1derived/")]);
        assert_eq!(
            r.resolve("http://localhost:3000/pods/07/x").unwrap(),
            PathBuf::from("out/pod07derived/x")
        );
    }

    #[test]
    fn replacement_template_rewrites_references() {
        assert_eq!(replacement_template("a$1b"), "a${1}b");
        assert_eq!(replacement_template("$12/$2"), "${12}/${2}");
        assert_eq!(replacement_template("cost$$1"), "cost$$1");
        assert_eq!(replacement_template("${name}"), "${name}");
    }

    #[test]
    fn unmapped_iri_is_error() {
        let r = resolver(&[("http://a.org/", "/x/")]);
        let err = r.resolve("http://b.org/x").unwrap_err();
        assert!(err.to_string().contains("No IRI mapping found for http://b.org/x"));
    }

    #[test]
    fn extension_appended_once() {
        let r = resolver(&[("http://a.org/", "/x/")]);
        assert_eq!(
            r.resolve_with_extension("http://a.org/cset0", ".rq").unwrap(),
            PathBuf::from("/x/cset0.rq")
        );
        assert_eq!(
            r.resolve_with_extension("http://a.org/cset0.rq", ".rq").unwrap(),
            PathBuf::from("/x/cset0.rq")
        );
    }
}
