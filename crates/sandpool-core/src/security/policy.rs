//! Deny-lists consulted by the Python analyzer.

use std::collections::HashSet;

/// Modules whose mere import is reported
pub const DANGEROUS_IMPORTS: &[&str] = &[
    // process control
    "os",
    "sys",
    "signal",
    // filesystem
    "shutil",
    "pathlib",
    "tempfile",
    "glob",
    // subprocess spawning
    "subprocess",
    "pty",
    "commands",
    // raw sockets and network clients
    "socket",
    "ssl",
    "http.client",
    "urllib",
    "requests",
    "ftplib",
    "telnetlib",
    "smtplib",
    // reflection and native access
    "ctypes",
    "cffi",
    "importlib",
    "inspect",
    "builtins",
    "gc",
    // threading and async primitives
    "threading",
    "multiprocessing",
    "asyncio",
    "concurrent",
    // insecure deserialization
    "pickle",
    "cPickle",
    "marshal",
    "shelve",
    "dill",
];

/// Callees reported by bare name or by full dotted path
pub const DANGEROUS_CALLS: &[&str] = &[
    // dynamic evaluation
    "eval",
    "exec",
    "compile",
    "__import__",
    "breakpoint",
    // raw I/O and processes
    "input",
    "open",
    "system",
    "popen",
    "spawn",
    "fork",
    "kill",
    // filesystem mutation
    "remove",
    "unlink",
    "rename",
    "rmdir",
    "removedirs",
    "rmtree",
    "chdir",
    "chmod",
    "chown",
    // reflection
    "getattr",
    "setattr",
    "delattr",
    "globals",
    "locals",
    "vars",
    // dotted forms
    "os.system",
    "os.popen",
    "subprocess.call",
    "subprocess.run",
    "subprocess.Popen",
    "subprocess.check_output",
    "shutil.rmtree",
    "pickle.load",
    "pickle.loads",
    "pickle.dump",
    "pickle.dumps",
    "marshal.load",
    "marshal.loads",
];

/// Tunable knobs of the analyzer
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    dangerous_imports: HashSet<String>,
    dangerous_calls: HashSet<String>,
    /// Report every binary operation between two literals. Catches
    /// `"os." + "system"` style command assembly but also plain arithmetic
    /// such as `1 + 2`; treat it as a heuristic, not a boundary.
    pub flag_constant_binops: bool,
}

impl Default for SecurityPolicy {
    fn default() -> Self {
        Self {
            dangerous_imports: DANGEROUS_IMPORTS.iter().map(|s| s.to_string()).collect(),
            dangerous_calls: DANGEROUS_CALLS.iter().map(|s| s.to_string()).collect(),
            flag_constant_binops: true,
        }
    }
}

impl SecurityPolicy {
    pub fn with_import(mut self, module: &str) -> Self {
        self.dangerous_imports.insert(module.to_string());
        self
    }

    pub fn with_call(mut self, callee: &str) -> Self {
        self.dangerous_calls.insert(callee.to_string());
        self
    }

    pub fn flag_constant_binops(mut self, enabled: bool) -> Self {
        self.flag_constant_binops = enabled;
        self
    }

    /// `os.path` matches through its top-level package `os`
    pub fn is_dangerous_module(&self, module: &str) -> bool {
        if self.dangerous_imports.contains(module) {
            return true;
        }
        module
            .split('.')
            .next()
            .map(|root| self.dangerous_imports.contains(root))
            .unwrap_or(false)
    }

    pub fn is_dangerous_call(&self, name: &str) -> bool {
        self.dangerous_calls.contains(name)
    }
}
