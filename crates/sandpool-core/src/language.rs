//! Supported execution languages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SandboxError;

/// A language runtime that owns its own container pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    /// Ships a preinstalled `node_modules` cache in its base image
    Nodejs,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::Python, Language::Nodejs];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Nodejs => "nodejs",
        }
    }

    /// File extension of the user's entry module.
    pub fn source_extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::Nodejs => "js",
        }
    }

    pub fn has_dependency_cache(&self) -> bool {
        matches!(self, Language::Nodejs)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" => Ok(Language::Python),
            "nodejs" | "javascript" | "node" => Ok(Language::Nodejs),
            other => Err(SandboxError::UnsupportedLanguage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("python3".parse::<Language>().unwrap(), Language::Python);
        assert_eq!("JavaScript".parse::<Language>().unwrap(), Language::Nodejs);
        assert_eq!(" node ".parse::<Language>().unwrap(), Language::Nodejs);
    }

    #[test]
    fn test_parse_unknown_language() {
        let err = "ruby".parse::<Language>().unwrap_err();
        assert!(matches!(err, SandboxError::UnsupportedLanguage(ref l) if l == "ruby"));
    }

    #[test]
    fn test_serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Language::Nodejs).unwrap();
        assert_eq!(json, "\"nodejs\"");
    }
}
