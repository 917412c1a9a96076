use std::collections::BTreeMap;

use crate::lang::ScriptLanguage;

/// One unit of build work (checkout, build, or package) as exposed by the
/// recipe/dependency-graph layer. Object-safe so the graph side can hand us
/// trait objects without this crate knowing its concrete types.
///
/// Paths returned here are host-native; normalization for the target
/// interpreter happens at script-formatting time.
pub trait Step {
    /// Name of the package this step belongs to.
    fn package_name(&self) -> &str;

    /// Whether this step actually exists. Graph placeholders are invalid and
    /// are skipped when collecting dependencies and mounts.
    fn is_valid(&self) -> bool;

    /// Dialect this step's scripts are written in.
    fn script_language(&self) -> ScriptLanguage;

    /// Variables declared for this step.
    fn environment(&self) -> BTreeMap<String, String>;

    /// Directories prepended to `PATH` in the generated script.
    fn search_paths(&self) -> Vec<String>;

    /// Directories exported as the library search path.
    fn library_paths(&self) -> Vec<String>;

    /// Working directory as seen by the build system.
    fn workspace_path(&self) -> String;

    /// Working directory as seen from `scope`'s execution context
    /// (differs from [`Step::workspace_path`] when `scope` is sandboxed).
    fn exec_path(&self, scope: &dyn Step) -> String;

    /// Steps whose results are passed as arguments to this step's script,
    /// most recent first.
    fn arguments(&self) -> Vec<&dyn Step>;

    /// All transitive dependency steps.
    fn all_dep_steps(&self) -> Vec<&dyn Step>;

    /// Tools available to this step: tool name to providing step plus a
    /// relative path inside that step's result.
    fn tools(&self) -> Vec<(String, ToolRef<'_>)>;

    /// Sandbox declared for this step, if any.
    fn sandbox(&self) -> Option<SandboxSetup<'_>>;

    /// Whether the sandboxed step may reach the network.
    fn has_net_access(&self) -> bool;

    fn is_checkout_step(&self) -> bool;
    fn is_package_step(&self) -> bool;

    fn pre_run_cmds(&self) -> Vec<String>;
    fn script(&self) -> String;
    fn post_run_cmds(&self) -> Vec<String>;
    fn fingerprint_script(&self) -> String;

    /// Remote-execution (CI) variants; default to the local scripts.
    fn remote_pre_run_cmds(&self) -> Vec<String> {
        self.pre_run_cmds()
    }
    fn remote_script(&self) -> String {
        self.script()
    }
    fn remote_post_run_cmds(&self) -> Vec<String> {
        self.post_run_cmds()
    }
}

/// A tool provided by another step.
pub struct ToolRef<'a> {
    /// Step whose result contains the tool.
    pub step: &'a dyn Step,
    /// Path of the tool relative to that step's result.
    pub path: String,
}

/// Sandbox as declared by a step.
pub struct SandboxSetup<'a> {
    /// Step providing the sandbox root filesystem.
    pub step: &'a dyn Step,
    /// Search paths valid inside the sandbox.
    pub paths: Vec<String>,
    /// Host paths bind-mounted into the sandbox as (host, sandbox) pairs.
    pub host_mounts: Vec<(String, String)>,
}
