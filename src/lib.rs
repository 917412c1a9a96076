//! Script generation and fingerprinting core for build steps.
//!
//! Consumes an abstracted step model ([`Step`]), produces a serializable
//! [`StepSpec`] record, and turns that record into runnable scripts and
//! process argument vectors for either of two interpreter dialects.
//! Nothing in this crate executes the generated scripts; that is the job
//! of an external executor.

/// Include directive expansion with digest tracking
mod include;
/// Script language dialects
mod lang;
/// Path normalization for target interpreters
mod paths;
/// Serialized step specification
mod spec;
/// Abstracted build step model
mod step;

pub use include::{
    expand_template, BashResolver, IncludeMode, IncludeResolver, PwshResolver, SOURCES_VAR,
    TMP_CLEANUP_VAR,
};
pub use lang::{
    resolve_script, Dialect, ScriptLanguage, ALL_PATHS_VAR, BASH_FINGERPRINT_SNIPPETS, CWD_VAR,
    DEP_PATHS_VAR, SANDBOX_ENV_FILE, TOOL_PATHS_VAR, TRAP_EXIT_STATUS,
};
pub use paths::{absolute, PathNormalizer, TargetPlatform};
pub use spec::{spec_version, SandboxSpec, StepSpec};
pub use step::{SandboxSetup, Step, ToolRef};
