/// Bash-like dialect (native POSIX or MSYS2 on Windows)
mod bash;
pub use bash::Bash;

/// PowerShell-like dialect
mod pwsh;
pub use pwsh::Pwsh;

/// Fingerprint helper function library
mod snippets;
pub use snippets::BASH_FINGERPRINT_SNIPPETS;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use util::PathEncodingError;

use crate::include::{expand_template, IncludeResolver};
use crate::paths::TargetPlatform;
use crate::spec::StepSpec;

/// Associative table of all transitive dependency paths in generated scripts.
pub const ALL_PATHS_VAR: &str = "RIG_ALL_PATHS";
/// Associative table of direct dependency paths.
pub const DEP_PATHS_VAR: &str = "RIG_DEP_PATHS";
/// Associative table of tool paths.
pub const TOOL_PATHS_VAR: &str = "RIG_TOOL_PATHS";
/// Working-directory variable exported to the script.
pub const CWD_VAR: &str = "RIG_CWD";

/// Exit status used when the generated script's error trap fires, so the
/// executor can tell a trap firing apart from the script's own exit code.
pub const TRAP_EXIT_STATUS: u8 = 99;

/// Environment snapshot location inside a sandbox.
pub const SANDBOX_ENV_FILE: &str = "/rig/env";

/// Interpreter dialect used for a step's generated scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptLanguage {
    #[serde(rename = "bash")]
    Bash,
    #[serde(rename = "PowerShell")]
    Pwsh,
}

impl ScriptLanguage {
    /// Dispatch by enumeration key; each variant is a standalone value
    /// implementing [`Dialect`].
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::Bash => &Bash,
            Self::Pwsh => &Pwsh,
        }
    }
}

/// One interpreter dialect's formatting and launch rules. All operations are
/// pure functions of their inputs except for the single script-file write in
/// [`Dialect::setup_shell`] and [`Dialect::setup_call`].
pub trait Dialect: Sync {
    /// Separator inserted between fingerprint fragments. Resets the working
    /// directory so independently-authored fragments cannot leak state into
    /// one another.
    fn glue(&self) -> &'static str;

    /// New include resolver for one script template of this dialect.
    fn resolver(
        &self,
        base_dir: &Path,
        orig_text: &str,
        source_name: &str,
        var_base: &str,
    ) -> Box<dyn IncludeResolver>;

    /// The setup preamble: dependency/tool path tables and the effective
    /// environment. With `keep_env`, also sources the host's interactive
    /// shell initialization (used for interactive sessions only).
    fn format_setup(
        &self,
        spec: &StepSpec,
        platform: TargetPlatform,
        keep_env: bool,
    ) -> Result<String>;

    /// The full runnable script: setup, environment snapshot, strict mode,
    /// error trap with call-stack attribution, guaranteed temp-file cleanup,
    /// and the user body between literal begin/end markers.
    fn format_script(&self, spec: &StepSpec, platform: TargetPlatform) -> Result<String>;

    /// Write the setup preamble to its script file and return the argument
    /// vector for an interactive session pre-loaded with that environment.
    fn setup_shell(
        &self,
        spec: &StepSpec,
        tmp_dir: &Path,
        platform: TargetPlatform,
        keep_env: bool,
    ) -> Result<Vec<String>>;

    /// Write the full script to its script file and return the
    /// non-interactive invocation argument vector.
    fn setup_call(
        &self,
        spec: &StepSpec,
        tmp_dir: &Path,
        platform: TargetPlatform,
        keep_env: bool,
        trace: bool,
    ) -> Result<Vec<String>>;

    /// Assemble the fingerprint script from fragments. Helper snippets are
    /// appended only when their name occurs in the joined fragments, so
    /// unreferenced helpers never perturb the cache key; the emitted text is
    /// ordered exports, strict mode, helpers, then the joined script.
    /// Empty fragments produce empty text, not an empty-but-present script.
    fn mangle_fingerprints(&self, fragments: &[&str], env: &BTreeMap<String, String>) -> String;

    /// Argument vector executing `spec.fingerprint_script` directly. The
    /// working-directory env entry is re-normalized for the target.
    fn setup_fingerprint(
        &self,
        spec: &StepSpec,
        env: &mut BTreeMap<String, String>,
        platform: TargetPlatform,
    ) -> Vec<String>;
}

/// Resolve include directives in `text` and assemble the final script body
/// plus its digest chain for the given dialect.
pub fn resolve_script(
    language: ScriptLanguage,
    base_dir: &Path,
    text: &str,
    source_name: &str,
    var_base: &str,
) -> Result<(String, String)> {
    let mut resolver = language.dialect().resolver(base_dir, text, source_name, var_base);
    let body = expand_template(resolver.as_mut(), text)?;
    Ok(resolver.finalize(&body))
}

/// Script location rule shared by both dialects: sandboxed steps read the
/// script from a fixed absolute path visible inside the sandbox, everything
/// else from the caller's temp dir. Returns (exec path, real write path).
fn script_paths(
    spec: &StepSpec,
    tmp_dir: &Path,
    sandbox_name: &str,
    plain_name: &str,
) -> Result<(String, PathBuf)> {
    if spec.has_sandbox() {
        let real = tmp_dir.join(sandbox_name.trim_start_matches('/'));
        Ok((sandbox_name.to_owned(), real))
    } else {
        let real = tmp_dir.join(plain_name);
        let exec = real.to_str().ok_or(PathEncodingError)?.to_owned();
        Ok((exec, real))
    }
}
