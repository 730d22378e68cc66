use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::TargetError;

/// Unique identity of a target: `//package/path:name`.
///
/// The package may be empty (`//:name` is a target in the workspace root).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Label {
    package: String,
    name: String,
}

impl Label {
    /// Parse a label from its canonical string form.
    ///
    /// # Errors
    /// Returns an error if the string is not of the form `//package:name` or
    /// uses characters outside `[A-Za-z0-9_.+-]` (plus `/` in the package).
    pub fn parse(s: &str) -> Result<Self, TargetError> {
        let invalid = |reason: &str| TargetError::InvalidLabel {
            label: s.to_owned(),
            reason: reason.to_owned(),
        };

        let Some(rest) = s.strip_prefix("//") else {
            return Err(invalid("labels must start with `//`"));
        };
        let Some((package, name)) = rest.split_once(':') else {
            return Err(invalid("missing `:` before the target name"));
        };
        if name.is_empty() {
            return Err(invalid("target name is empty"));
        }
        if name.contains(':') {
            return Err(invalid("more than one `:`"));
        }
        if !name.chars().all(is_name_char) {
            return Err(invalid("target name contains an unsupported character"));
        }
        if !package.is_empty() {
            for segment in package.split('/') {
                if segment.is_empty() {
                    return Err(invalid("package path has an empty segment"));
                }
                if segment == "." || segment == ".." {
                    return Err(invalid("package path must not contain `.` or `..`"));
                }
                if !segment.chars().all(is_name_char) {
                    return Err(invalid("package path contains an unsupported character"));
                }
            }
        }

        Ok(Self {
            package: package.to_owned(),
            name: name.to_owned(),
        })
    }

    /// The package path, without the leading `//`.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The target name after the `:`.
    pub fn name(&self) -> &str {
        &self.name
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '+' | '-')
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "//{}:{}", self.package, self.name)
    }
}

impl FromStr for Label {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Label {
    type Error = TargetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Label> for String {
    fn from(label: Label) -> Self {
        label.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_package_and_name() {
        let label = Label::parse("//java/com/example:lib").unwrap();
        assert_eq!(label.package(), "java/com/example");
        assert_eq!(label.name(), "lib");
        assert_eq!(label.to_string(), "//java/com/example:lib");
    }

    #[test]
    fn parse_root_package() {
        let label: Label = "//:all-srcs".parse().unwrap();
        assert_eq!(label.package(), "");
        assert_eq!(label.name(), "all-srcs");
    }

    #[test]
    fn rejects_missing_prefix() {
        let err = Label::parse("java:lib").unwrap_err().to_string();
        assert!(err.contains("must start with"), "error was: {err}");
    }

    #[test]
    fn rejects_missing_colon_and_empty_name() {
        assert!(Label::parse("//java/lib").is_err());
        assert!(Label::parse("//java:").is_err());
        assert!(Label::parse("//java:a:b").is_err());
    }

    #[test]
    fn rejects_bad_package_segments() {
        assert!(Label::parse("//java//x:lib").is_err());
        assert!(Label::parse("//java/../x:lib").is_err());
        assert!(Label::parse("//java x:lib").is_err());
    }

    #[test]
    fn serializes_as_string() {
        let label = Label::parse("//a/b:c").unwrap();
        let json = serde_json::to_string(&label).unwrap();
        assert_eq!(json, "\"//a/b:c\"");
        let back: Label = serde_json::from_str(&json).unwrap();
        assert_eq!(back, label);
        assert!(serde_json::from_str::<Label>("\"not-a-label\"").is_err());
    }
}
