//! Static security gate for submitted code
//!
//! Every submission passes through here before a container is touched. Python
//! source is parsed and walked for deny-listed imports, calls and a handful of
//! obfuscation patterns; the verdict carries one finding per hit so the caller
//! can show the user why the code was refused.
//!
//! Languages without an analyzer are let through with a single informational
//! finding. That is a fail-open policy with an audit trail: callers that need
//! strict gating check [`CodeSafetyVerdict::requires_manual_review`].

use rustpython_parser::{ast, Parse};
use serde::{Deserialize, Serialize};

use crate::language::Language;

mod analyzer;
pub mod policy;

pub use policy::SecurityPolicy;


/// Marker used for the fail-open finding of unsupported languages
pub const UNSUPPORTED_ANALYSIS_PREFIX: &str = "Static analysis is not supported";

/// One reason a submission was considered unsafe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub description: String,
    /// 1-based source line, or -1 when not tied to a line
    pub line: i64,
}

impl SecurityFinding {
    pub fn unlocated(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            line: -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSafetyVerdict {
    pub is_safe: bool,
    pub findings: Vec<SecurityFinding>,
}

impl CodeSafetyVerdict {
    fn from_findings(findings: Vec<SecurityFinding>) -> Self {
        Self {
            is_safe: findings.is_empty(),
            findings,
        }
    }

    /// True for the fail-open verdict given to languages without an analyzer
    pub fn requires_manual_review(&self) -> bool {
        self.is_safe
            && self.findings.len() == 1
            && self.findings[0]
                .description
                .starts_with(UNSUPPORTED_ANALYSIS_PREFIX)
    }
}

/// Stateless analyzer parameterised by a deny-list policy
#[derive(Debug, Clone, Default)]
pub struct SecurityGate {
    policy: SecurityPolicy,
}

impl SecurityGate {
    pub fn new(policy: SecurityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn analyze(&self, code: &str, language: Language) -> CodeSafetyVerdict {
        match language {
            Language::Python => self.analyze_python(code),
            other => {
                log::warn!(
                    "Security analysis for language '{}' is not supported, allowing code with a review notice",
                    other
                );
                CodeSafetyVerdict {
                    is_safe: true,
                    findings: vec![SecurityFinding::unlocated(format!(
                        "{} for language '{}'; manual review recommended",
                        UNSUPPORTED_ANALYSIS_PREFIX, other
                    ))],
                }
            }
        }
    }

    fn analyze_python(&self, code: &str) -> CodeSafetyVerdict {
        let suite = match ast::Suite::parse(code, "<submission>") {
            Ok(suite) => suite,
            Err(e) => {
                return CodeSafetyVerdict {
                    is_safe: false,
                    findings: vec![SecurityFinding::unlocated(format!("Parsing Error: {}", e))],
                };
            }
        };

        let findings = analyzer::PythonAnalyzer::new(&self.policy, code).analyze(&suite);
        CodeSafetyVerdict::from_findings(findings)
    }
}

/// Analyze `code` with the default deny-lists
pub fn analyze_code_safety(code: &str, language: Language) -> CodeSafetyVerdict {
    SecurityGate::default().analyze(code, language)
}
