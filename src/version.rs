use std::fmt;

use lazy_static::lazy_static;
use log::debug;
use regex::Regex;

lazy_static! {
    static ref VERSION_REGEX: Regex = Regex::new(
        r"^(0|[1-9]\d*)(?:\.(0|[1-9]\d*))?(?:\.(0|[1-9]\d*))?(?:-((?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:0|[1-9]\d*|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+([0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?$"
    )
    .unwrap();
}

/// A semantic version used by VERSION conditions.
///
/// Minor and patch may be omitted and default to zero. Build metadata is accepted but never takes
/// part in comparison, so `1.0.0+a == 1.0.0+b`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(semver::Version);

impl Version {
    pub fn parse(s: &str) -> Option<Version> {
        let captures = VERSION_REGEX.captures(s)?;

        let component = |i: usize| -> Option<u64> {
            match captures.get(i) {
                Some(m) => m.as_str().parse().ok(),
                None => Some(0),
            }
        };

        let prerelease = match captures.get(4) {
            Some(m) => match semver::Prerelease::new(m.as_str()) {
                Ok(pre) => pre,
                Err(e) => {
                    debug!("invalid prerelease in version {}: {}", s, e);
                    return None;
                }
            },
            None => semver::Prerelease::EMPTY,
        };

        let mut version = semver::Version::new(component(1)?, component(2)?, component(3)?);
        version.pre = prerelease;
        Some(Version(version))
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use test_case::test_case;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test_case("1", 1, 0, 0)]
    #[test_case("1.2", 1, 2, 0)]
    #[test_case("1.2.3", 1, 2, 3)]
    #[test_case("0.0.1-beta.1+build.5", 0, 0, 1)]
    fn parses_core_components(s: &str, major: u64, minor: u64, patch: u64) {
        let version = v(s);
        assert_eq!((major, minor, patch), (version.major(), version.minor(), version.patch()));
    }

    #[test_case("")]
    #[test_case("01.0.0")]
    #[test_case("1.0.0.0")]
    #[test_case("a.b.c")]
    #[test_case("1.0.0-")]
    #[test_case("1.0.0-01")]
    fn rejects_invalid(s: &str) {
        assert_that!(Version::parse(s)).is_none();
    }

    #[test]
    fn compares_core_then_prerelease() {
        assert!(v("2.0.0") > v("1.9.9"));
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("1.0") == v("1.0.0"));

        assert!(v("1.0.0") > v("1.0.0-rc.1"), "release > prerelease");
        assert!(v("1.0.0-rc.10") > v("1.0.0-rc.2"), "numeric identifiers compare as numbers");
        assert!(v("1.0.0-rc.2.red") > v("1.0.0-rc.2.green"));
        assert!(
            v("1.0.0-rc.2.green.1") > v("1.0.0-rc.2.green"),
            "more identifiers makes it greater"
        );
    }

    #[test]
    fn ignores_build_metadata() {
        assert_eq!(v("1.0.0+a"), v("1.0.0+b"));
        assert_eq!(v("1.0.0+build"), v("1.0.0"));
    }
}
