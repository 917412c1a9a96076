use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use util::{join_scripts, quote_bash, HashMap};

use crate::include::{BashResolver, IncludeResolver};
use crate::paths::{absolute, PathNormalizer, TargetPlatform};
use crate::spec::StepSpec;

use super::snippets::BASH_FINGERPRINT_SNIPPETS;
use super::{
    script_paths, Dialect, ScriptLanguage, ALL_PATHS_VAR, CWD_VAR, DEP_PATHS_VAR,
    SANDBOX_ENV_FILE, TOOL_PATHS_VAR,
};

/// POSIX shell dialect. On Windows the generated scripts run under an MSYS2
/// emulation layer, so all embedded paths are rewritten to `/c/...` form.
#[derive(Debug)]
pub struct Bash;

const GLUE: &str = "\ncd \"${RIG_CWD}\"\n";

/// Sourced only for interactive "keep environment" sessions.
const KEEP_ENV_PREAMBLE: &str = "\
[[ -e /etc/bash.bashrc ]] && source /etc/bash.bashrc
[[ -e ~/.bashrc ]] && source ~/.bashrc
";

// strict mode must be in effect before the trap machinery is defined.
const STRICT_MODE: &str = "\
# Error handling
set -o errtrace -o nounset -o pipefail
";

const ERROR_HANDLER_HEAD: &str = "\
rig_handle_error()
{
    set +x";

// keep the exit status here in sync with TRAP_EXIT_STATUS.
const ERROR_HANDLER_TAIL: &str = r#"    echo "Call stack (most recent call first)"
    i=0
    while caller $i >/dev/null ; do
            j=${BASH_LINENO[$i]}
            while [[ $j -ge 0 && -z ${_RIG_SOURCES[$j]:+true} ]] ; do
                    : $(( j-- ))
            done
            echo "    #$i: ${_RIG_SOURCES[$j]}, line $(( BASH_LINENO[$i] - j )), in ${FUNCNAME[$((i+1))]}"
            : $(( i++ ))
    done

    exit $1
}
declare -A _RIG_SOURCES=( [0]="setup prolog" )
trap 'rig_handle_error $? >&2 ; exit 99' ERR
trap 'for i in "${_RIG_TMP_CLEANUP[@]-}" ; do /bin/rm -f "$i" ; done' EXIT
"#;

impl Dialect for Bash {
    fn glue(&self) -> &'static str {
        GLUE
    }

    fn resolver(
        &self,
        base_dir: &Path,
        orig_text: &str,
        source_name: &str,
        var_base: &str,
    ) -> Box<dyn IncludeResolver> {
        Box::new(BashResolver::new(base_dir, orig_text, source_name, var_base))
    }

    fn format_setup(
        &self,
        spec: &StepSpec,
        platform: TargetPlatform,
        keep_env: bool,
    ) -> Result<String> {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, platform);

        let mut env: HashMap<String, String> = spec
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), quote_bash(v)))
            .collect();

        // bash always joins PATH with ':', even under emulation:
        let mut path = Vec::with_capacity(spec.search_paths.len() + 1);
        for p in &spec.search_paths {
            path.push(quote_bash(&norm.normalize_absolute(p)?));
        }
        match &spec.sandbox {
            None => path.push("$PATH".to_owned()),
            Some(sb) => path.extend(sb.paths.iter().map(|p| quote_bash(p))),
        }
        env.insert("PATH".to_owned(), path.join(":"));

        let mut lib_path = Vec::with_capacity(spec.library_paths.len());
        for p in &spec.library_paths {
            lib_path.push(quote_bash(&norm.normalize_absolute(p)?));
        }
        env.insert("LD_LIBRARY_PATH".to_owned(), lib_path.join(":"));
        env.insert(
            CWD_VAR.to_owned(),
            quote_bash(&norm.normalize_absolute(&spec.execution_path)?),
        );

        let mut ret = Vec::with_capacity(8);
        if keep_env {
            ret.push(KEEP_ENV_PREAMBLE.to_owned());
        }

        ret.push("# Dependency and tool path tables:".to_owned());
        ret.push(assoc_array(ALL_PATHS_VAR, &spec.all_dep_paths, &norm)?);
        ret.push(assoc_array(DEP_PATHS_VAR, &spec.direct_dep_paths, &norm)?);
        ret.push(assoc_array(TOOL_PATHS_VAR, &spec.tool_paths, &norm)?);
        ret.push(String::new());
        ret.push("# Environment:".to_owned());

        let mut exports: Vec<(String, String)> = env.into_iter().collect();
        exports.sort();
        ret.push(
            exports
                .iter()
                .map(|(k, v)| format!("export {k}={v}"))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        Ok(ret.join("\n"))
    }

    fn format_script(&self, spec: &StepSpec, platform: TargetPlatform) -> Result<String> {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, platform);
        let env_file = if spec.has_sandbox() {
            SANDBOX_ENV_FILE.to_owned()
        } else {
            absolute(&spec.env_file)?
        };

        // raw escape codes; remote log collectors get the plain variant.
        let fail_echo = if spec.is_remote {
            "echo \"Step failed with return status $1; Command: ${BASH_COMMAND}\""
        } else {
            "echo \"\u{1b}[31;1mStep failed with return status $1; Command:\u{1b}[0;31m ${BASH_COMMAND}\u{1b}[0m\""
        };

        let ret = [
            self.format_setup(spec, platform, false)?,
            String::new(),
            format!(
                "# Setup\ndeclare -p > {}\ncd \"${{{CWD_VAR}}}\"\n",
                norm.normalize(&env_file)
            ),
            STRICT_MODE.to_owned(),
            ERROR_HANDLER_HEAD.to_owned(),
            fail_echo.to_owned(),
            ERROR_HANDLER_TAIL.to_owned(),
            String::new(),
            "# BEGIN BUILD SCRIPT".to_owned(),
            spec.script.clone(),
            "# END BUILD SCRIPT".to_owned(),
        ];
        Ok(ret.join("\n"))
    }

    fn setup_shell(
        &self,
        spec: &StepSpec,
        tmp_dir: &Path,
        platform: TargetPlatform,
        keep_env: bool,
    ) -> Result<Vec<String>> {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, platform);
        let (exec_script, real_script) = script_paths(spec, tmp_dir, "/.script", "script")?;

        log::debug!("writing bash setup script to {}", real_script.display());
        std::fs::write(&real_script, self.format_setup(spec, platform, keep_env)?)
            .with_context(|| format!("writing setup script {}", real_script.display()))?;

        let mut args = vec![
            "bash".to_owned(),
            "--rcfile".to_owned(),
            norm.normalize(&exec_script),
            "-s".to_owned(),
            "--".to_owned(),
        ];
        for a in &spec.arguments {
            args.push(norm.normalize_absolute(a)?);
        }
        Ok(args)
    }

    fn setup_call(
        &self,
        spec: &StepSpec,
        tmp_dir: &Path,
        platform: TargetPlatform,
        _keep_env: bool,
        trace: bool,
    ) -> Result<Vec<String>> {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, platform);
        let (exec_script, real_script) = script_paths(spec, tmp_dir, "/.script", "script")?;

        log::debug!("writing bash script to {}", real_script.display());
        std::fs::write(&real_script, self.format_script(spec, platform)?)
            .with_context(|| format!("writing script {}", real_script.display()))?;

        let mut args = vec!["bash".to_owned()];
        if trace {
            args.push("-x".to_owned());
        }
        args.push("--".to_owned());
        args.push(norm.normalize(&exec_script));
        for a in &spec.arguments {
            args.push(norm.normalize_absolute(a)?);
        }
        Ok(args)
    }

    fn mangle_fingerprints(&self, fragments: &[&str], env: &BTreeMap<String, String>) -> String {
        let script = join_scripts(fragments.iter().copied(), self.glue());

        // steps with no fingerprint contribution produce no script at all:
        if script.is_empty() {
            return script;
        }

        let mut ret = Vec::with_capacity(8);
        ret.push(script.clone());
        for (name, snippet) in BASH_FINGERPRINT_SNIPPETS {
            if script.contains(name) {
                ret.push((*snippet).to_owned());
            }
        }
        ret.push("set -o errexit".to_owned());
        ret.push("set -o nounset".to_owned());
        ret.push("set -o pipefail".to_owned());
        for (n, v) in env {
            ret.push(format!("export {}={}", n, quote_bash(v)));
        }

        // reverse append order: the strict interpreter needs variables and
        // helper definitions in effect before the body that uses them.
        ret.reverse();
        ret.join("\n")
    }

    fn setup_fingerprint(
        &self,
        spec: &StepSpec,
        env: &mut BTreeMap<String, String>,
        platform: TargetPlatform,
    ) -> Vec<String> {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, platform);
        if let Some(cwd) = env.get(CWD_VAR) {
            let munged = norm.normalize(cwd);
            env.insert(CWD_VAR.to_owned(), munged);
        }
        vec![
            "bash".to_owned(),
            "-x".to_owned(),
            "-c".to_owned(),
            spec.fingerprint_script.clone(),
        ]
    }
}

fn assoc_array(name: &str, pairs: &[(String, String)], norm: &PathNormalizer) -> Result<String> {
    let mut entries = Vec::with_capacity(pairs.len());
    for (n, p) in pairs {
        entries.push(format!(
            "[{}]={}",
            quote_bash(n),
            quote_bash(&norm.normalize_absolute(p)?)
        ));
    }
    entries.sort();
    Ok(format!("declare -A {}=( {} )", name, entries.join(" ")))
}
