use ahash::AHashSet;
use indexmap::IndexMap;

/// Identifier characters accepted in the output. Conservative: ASCII only.
const BASE62: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Reserved words that can never be emitted as identifiers.
const RESERVED: &[&str] = &[
    "break", "case", "catch", "continue", "debugger", "default", "delete", "do", "else", "false", "finally", "for",
    "function", "if", "in", "instanceof", "new", "null", "return", "switch", "this", "throw", "true", "try", "typeof",
    "var", "void", "while", "with",
];

/// Issues fresh identifiers for declared abstracts and materialized objects.
#[derive(Debug)]
pub struct NameGenerator {
    prefix: String,
    counter: u32,
    forbidden: AHashSet<String>,
    /// Per-build unique suffix appended to every generated name.
    unique_suffix: String,
    /// When set, a `$hint` fragment derived from provenance is appended.
    debug_names: bool,
}

impl NameGenerator {
    pub fn new(unique_suffix: Option<&str>, debug_names: bool) -> Self {
        let mut forbidden = AHashSet::new();
        for word in RESERVED {
            forbidden.insert((*word).to_owned());
        }
        Self {
            prefix: "_".to_owned(),
            counter: 0,
            forbidden,
            unique_suffix: unique_suffix.unwrap_or("").to_owned(),
            debug_names,
        }
    }

    /// Marks a name as taken so generated identifiers never collide with it.
    pub fn forbid(&mut self, name: &str) {
        self.forbidden.insert(name.to_owned());
    }

    fn base62(mut n: u32) -> String {
        let mut out = Vec::new();
        loop {
            out.push(BASE62[(n % 62) as usize]);
            n /= 62;
            if n == 0 {
                break;
            }
        }
        out.reverse();
        String::from_utf8(out).expect("base62 output is ascii")
    }

    /// Generates the next identifier, skipping forbidden names.
    pub fn generate(&mut self, hint: Option<&str>) -> String {
        loop {
            let mut name = format!("{}{}", self.prefix, Self::base62(self.counter));
            self.counter += 1;
            if self.debug_names
                && let Some(hint) = hint
            {
                let clean: String = hint.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
                if !clean.is_empty() {
                    name.push('$');
                    name.push_str(&clean);
                }
            }
            name.push_str(&self.unique_suffix);
            if !self.forbidden.contains(&name) {
                return name;
            }
        }
    }
}

/// Memoizes identifiers for referenced host paths and owns the prelude
/// declarations that introduce them.
#[derive(Debug, Default)]
pub struct PreludeGenerator {
    /// path → identifier, in first-reference order.
    memoized: IndexMap<String, String>,
}

impl PreludeGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached identifier for `path`, creating a prelude
    /// declaration on first use.
    ///
    /// A path that is already a valid, single identifier is returned as-is:
    /// it needs no indirection.
    pub fn reference(&mut self, path: &str, names: &mut NameGenerator) -> String {
        if is_identifier(path) {
            return path.to_owned();
        }
        if let Some(ident) = self.memoized.get(path) {
            return ident.clone();
        }
        let last_segment = path.rsplit('.').next().unwrap_or(path);
        let ident = names.generate(Some(last_segment));
        self.memoized.insert(path.to_owned(), ident.clone());
        ident
    }

    /// The `(identifier, path)` pairs to declare at the top of the output, in
    /// first-reference order.
    pub fn declarations(&self) -> impl Iterator<Item = (&str, &str)> {
        self.memoized.iter().map(|(path, ident)| (ident.as_str(), path.as_str()))
    }
}

/// Whether `s` is a single valid output identifier (ASCII-conservative).
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_alphabetic() || first == '_' || first == '$') {
        return false;
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
        return false;
    }
    !RESERVED.contains(&s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_monotone_base62() {
        let mut names = NameGenerator::new(None, false);
        assert_eq!(names.generate(None), "_0");
        assert_eq!(names.generate(None), "_1");
        for _ in 2..10 {
            names.generate(None);
        }
        assert_eq!(names.generate(None), "_a");
    }

    #[test]
    fn forbidden_names_are_skipped() {
        let mut names = NameGenerator::new(None, false);
        names.forbid("_0");
        assert_eq!(names.generate(None), "_1");
    }

    #[test]
    fn unique_suffix_and_debug_hint() {
        let mut names = NameGenerator::new(Some("X"), true);
        assert_eq!(names.generate(Some("config")), "_0$configX");
    }

    #[test]
    fn prelude_memoizes_paths() {
        let mut names = NameGenerator::new(None, false);
        let mut prelude = PreludeGenerator::new();
        let a = prelude.reference("global.Object.prototype", &mut names);
        let b = prelude.reference("global.Object.prototype", &mut names);
        assert_eq!(a, b);
        assert_eq!(prelude.reference("src", &mut names), "src");
        assert_eq!(prelude.declarations().count(), 1);
    }

    #[test]
    fn identifier_check_is_conservative() {
        assert!(is_identifier("foo"));
        assert!(is_identifier("_0$a"));
        assert!(!is_identifier("for"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier("1a"));
        assert!(!is_identifier("é"));
    }
}
