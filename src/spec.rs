use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use util::PathEncodingError;

use crate::lang::{Dialect, ScriptLanguage};
use crate::step::Step;

/// Bumped whenever the serialized spec format changes incompatibly.
const FORMAT_REVISION: u32 = 1;

static SPEC_VERSION: LazyLock<String> = LazyLock::new(|| {
    let mut hasher = Sha1::new();
    hasher.update(b"rigger-step-spec-");
    hasher.update(FORMAT_REVISION.to_le_bytes());
    hex::encode(hasher.finalize())
});

/// Fingerprint of the current spec input format. A persisted spec whose
/// version field differs is rejected wholesale on load; this is a
/// compatibility gate, not a semantic field.
pub fn spec_version() -> &'static str {
    &SPEC_VERSION
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("spec was created by an incompatible tool version (re-run the build driver to regenerate it)")]
    IncompatibleSpec,
    #[error("spec has no version field")]
    MissingVersion,
}

/// Sandbox sub-record; present if and only if the step runs sandboxed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxSpec {
    /// Workspace path of the step providing the sandbox root filesystem.
    pub root: String,
    /// Search paths valid inside the sandbox.
    pub paths: Vec<String>,
    /// Host bind-mounts as (host, sandbox) pairs.
    pub host_mounts: Vec<(String, String)>,
    pub net_access: bool,
    /// Dependency results mounted into the sandbox as
    /// (workspace path, execution path) pairs.
    pub dep_mounts: Vec<(String, String)>,
}

/// Everything needed to regenerate a step's script without the original
/// [`Step`] object. Built once per step per invocation, optionally persisted,
/// and never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    pub version: String,
    pub language: ScriptLanguage,
    pub environment: BTreeMap<String, String>,
    pub search_paths: Vec<String>,
    pub library_paths: Vec<String>,
    /// Working directory as seen by the build system.
    pub workspace_path: String,
    /// Working directory as seen inside an optional sandbox.
    pub execution_path: String,
    /// Paths passed to the script as positional arguments.
    pub arguments: Vec<String>,
    /// (name, path) per transitive dependency, sorted by name.
    /// Sorted order is an invariant: it keeps serialized output byte-stable
    /// and thus keeps fingerprints stable.
    pub all_dep_paths: Vec<(String, String)>,
    /// (name, path) per direct dependency, sorted by name.
    pub direct_dep_paths: Vec<(String, String)>,
    /// (name, path) per tool, sorted by name.
    pub tool_paths: Vec<(String, String)>,
    /// `Some(false)` for checkout steps, `Some(true)` for package steps,
    /// `None` otherwise.
    pub clean: Option<bool>,
    pub sandbox: Option<SandboxSpec>,
    pub pre_run_cmds: Vec<String>,
    pub script: String,
    pub post_run_cmds: Vec<String>,
    pub fingerprint_script: String,
    /// Where the generated script snapshots its environment.
    pub env_file: String,
    /// Host environment variables the executor may pass through.
    pub env_whitelist: Vec<String>,
    pub log_file: Option<String>,
    /// Remote (CI-driven) execution; affects formatting only.
    pub is_remote: bool,
}

impl StepSpec {
    /// Capture `step` into a self-contained spec record.
    pub fn from_step(
        step: &dyn Step,
        env_file: &str,
        env_whitelist: &[String],
        log_file: Option<&str>,
        is_remote: bool,
    ) -> Result<Self> {
        log::debug!("building step spec for package {}", step.package_name());

        let mut all_dep_paths: Vec<(String, String)> = step
            .all_dep_steps()
            .iter()
            .map(|d| (d.package_name().to_owned(), d.exec_path(step)))
            .collect();
        all_dep_paths.sort();

        let mut direct_dep_paths: Vec<(String, String)> = step
            .arguments()
            .iter()
            .filter(|a| a.is_valid())
            .map(|a| (a.package_name().to_owned(), a.exec_path(step)))
            .collect();
        direct_dep_paths.sort();

        let mut tool_paths = Vec::new();
        for (name, tool) in step.tools() {
            let path = Path::new(&tool.step.exec_path(step)).join(&tool.path);
            let path = path.to_str().ok_or(PathEncodingError)?.to_owned();
            tool_paths.push((name, path));
        }
        tool_paths.sort();

        let clean = if step.is_checkout_step() {
            Some(false)
        } else if step.is_package_step() {
            Some(true)
        } else {
            None
        };

        let sandbox = match step.sandbox() {
            Some(sb) => {
                let mut dep_mounts: Vec<(String, String)> = step
                    .all_dep_steps()
                    .iter()
                    .filter(|d| d.is_valid())
                    .map(|d| (d.workspace_path(), d.exec_path(step)))
                    .collect();

                // also mount earlier steps of the same package, so their
                // intermediate artifacts are visible even when they are not
                // declared dependencies:
                let mut extra: &dyn Step = step;
                while extra.is_valid() {
                    let args = extra.arguments();
                    let Some(first) = args.first().copied() else {
                        break;
                    };
                    extra = first;
                    if extra.is_valid() {
                        dep_mounts.push((extra.workspace_path(), extra.exec_path(step)));
                    }
                }

                Some(SandboxSpec {
                    root: sb.step.workspace_path(),
                    paths: sb.paths,
                    host_mounts: sb.host_mounts,
                    net_access: step.has_net_access(),
                    dep_mounts,
                })
            }
            None => None,
        };

        let (pre_run_cmds, script, post_run_cmds) = if is_remote {
            (
                step.remote_pre_run_cmds(),
                step.remote_script(),
                step.remote_post_run_cmds(),
            )
        } else {
            (step.pre_run_cmds(), step.script(), step.post_run_cmds())
        };

        let mut env_whitelist = env_whitelist.to_vec();
        env_whitelist.sort();

        let arguments = step.arguments().iter().map(|a| a.exec_path(step)).collect();

        Ok(Self {
            version: spec_version().to_owned(),
            language: step.script_language(),
            environment: step.environment(),
            search_paths: step.search_paths(),
            library_paths: step.library_paths(),
            workspace_path: step.workspace_path(),
            execution_path: step.exec_path(step),
            arguments,
            all_dep_paths,
            direct_dep_paths,
            tool_paths,
            clean,
            sandbox,
            pre_run_cmds,
            script,
            post_run_cmds,
            fingerprint_script: step.fingerprint_script(),
            env_file: env_file.to_owned(),
            env_whitelist,
            log_file: log_file.map(str::to_owned),
            is_remote,
        })
    }

    pub fn has_sandbox(&self) -> bool {
        self.sandbox.is_some()
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.language.dialect()
    }

    /// Sorted-key, human-diffable JSON rendering.
    pub fn to_string_pretty(&self) -> Result<String> {
        // via Value so top-level object keys come out sorted:
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }

    pub fn to_writer(&self, mut w: impl Write) -> Result<()> {
        let text = self.to_string_pretty()?;
        w.write_all(text.as_bytes())?;
        Ok(())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        Self::from_value(value)
    }

    pub fn from_reader(r: impl Read) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_reader(r)?;
        Self::from_value(value)
    }

    /// The version gate fires before any other field is interpreted: a
    /// mismatched record may assign different meanings to every field.
    fn from_value(value: serde_json::Value) -> Result<Self> {
        match value.get("version") {
            Some(serde_json::Value::String(v)) if v == spec_version() => {}
            Some(_) => return Err(Error::IncompatibleSpec.into()),
            None => return Err(Error::MissingVersion.into()),
        }
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;

    pub(crate) fn minimal_spec(language: ScriptLanguage) -> StepSpec {
        StepSpec {
            version: spec_version().to_owned(),
            language,
            environment: BTreeMap::from([
                ("CC".to_owned(), "gcc".to_owned()),
                ("NAME".to_owned(), "with space".to_owned()),
            ]),
            search_paths: vec!["/opt/tools/bin".to_owned()],
            library_paths: vec!["/opt/tools/lib".to_owned()],
            workspace_path: "/work/pkg/build".to_owned(),
            execution_path: "/work/pkg/build".to_owned(),
            arguments: vec!["/work/dep/dist".to_owned()],
            all_dep_paths: vec![("dep".to_owned(), "/work/dep/dist".to_owned())],
            direct_dep_paths: vec![("dep".to_owned(), "/work/dep/dist".to_owned())],
            tool_paths: vec![("cc".to_owned(), "/work/toolchain/bin".to_owned())],
            clean: None,
            sandbox: None,
            pre_run_cmds: Vec::new(),
            script: "echo hi".to_owned(),
            post_run_cmds: Vec::new(),
            fingerprint_script: String::new(),
            env_file: "/work/pkg/env".to_owned(),
            env_whitelist: vec!["TERM".to_owned()],
            log_file: None,
            is_remote: false,
        }
    }

    fn sandboxed_spec() -> StepSpec {
        let mut spec = minimal_spec(ScriptLanguage::Bash);
        spec.sandbox = Some(SandboxSpec {
            root: "/work/sandbox/root".to_owned(),
            paths: vec!["/usr/bin".to_owned(), "/bin".to_owned()],
            host_mounts: vec![("/etc/resolv.conf".to_owned(), "/etc/resolv.conf".to_owned())],
            net_access: true,
            dep_mounts: vec![("/work/dep/dist".to_owned(), "/deps/dep".to_owned())],
        });
        spec
    }

    #[test]
    fn test_round_trip() -> Result<()> {
        let spec = minimal_spec(ScriptLanguage::Bash);
        let text = spec.to_string_pretty()?;
        let loaded = StepSpec::from_slice(text.as_bytes())?;
        assert_eq!(spec, loaded);
        Ok(())
    }

    #[test]
    fn test_round_trip_with_sandbox() -> Result<()> {
        let spec = sandboxed_spec();
        let text = spec.to_string_pretty()?;
        let loaded = StepSpec::from_slice(text.as_bytes())?;
        assert_eq!(spec, loaded);
        Ok(())
    }

    #[test]
    fn test_version_gate() -> Result<()> {
        let spec = minimal_spec(ScriptLanguage::Pwsh);
        let mut value = serde_json::to_value(&spec)?;
        value["version"] = serde_json::Value::String("0".repeat(40));
        let bytes = serde_json::to_vec(&value)?;

        let err = StepSpec::from_slice(&bytes).unwrap_err();
        assert!(err.to_string().contains("incompatible"));
        Ok(())
    }

    #[test]
    fn test_missing_version_rejected() -> Result<()> {
        let spec = minimal_spec(ScriptLanguage::Bash);
        let mut value = serde_json::to_value(&spec)?;
        value.as_object_mut().expect("spec is an object").remove("version");
        let bytes = serde_json::to_vec(&value)?;

        assert!(StepSpec::from_slice(&bytes).is_err());
        Ok(())
    }

    #[test]
    fn test_serialized_keys_are_sorted() -> Result<()> {
        let text = minimal_spec(ScriptLanguage::Bash).to_string_pretty()?;
        // top-level keys sit at the first indent level of the pretty output:
        let keys: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("  \"") && l.contains("\":"))
            .filter_map(|l| l.split('"').nth(1))
            .collect();
        assert!(!keys.is_empty());
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        Ok(())
    }

    #[test]
    fn test_serialization_is_deterministic() -> Result<()> {
        let spec = sandboxed_spec();
        assert_eq!(spec.to_string_pretty()?, spec.to_string_pretty()?);
        Ok(())
    }

    #[test]
    fn test_language_field_uses_wire_names() -> Result<()> {
        let text = minimal_spec(ScriptLanguage::Pwsh).to_string_pretty()?;
        assert!(text.contains("\"PowerShell\""));
        let text = minimal_spec(ScriptLanguage::Bash).to_string_pretty()?;
        assert!(text.contains("\"bash\""));
        Ok(())
    }
}
