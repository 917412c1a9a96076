use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use util::{escape_pwsh, join_scripts, quote_pwsh, HashMap};

use crate::include::{IncludeResolver, PwshResolver};
use crate::paths::{absolute, PathNormalizer, TargetPlatform};
use crate::spec::StepSpec;

use super::{
    script_paths, Dialect, ScriptLanguage, ALL_PATHS_VAR, CWD_VAR, DEP_PATHS_VAR,
    SANDBOX_ENV_FILE, TOOL_PATHS_VAR,
};

/// PowerShell dialect. Runs natively on Windows (`powershell`) and on POSIX
/// hosts (`pwsh`); paths are used as-is on both.
#[derive(Debug)]
pub struct Pwsh;

const GLUE: &str = "\ncd $Env:RIG_CWD\n";

const STRICT_MODE: &str = "\
# Error handling
$ErrorActionPreference=\"Stop\"
Set-PSDebug -Strict
";

// keep the exit status here in sync with TRAP_EXIT_STATUS.
const ERROR_TRAP: &str = r#"trap {
    Write-Host "Step failed; Command: $($_.InvocationInfo.Line)"
    Write-Host "Call stack (most recent call first)"
    Get-PSCallStack | ForEach-Object { Write-Host "    $_" }
    exit 99
}
"#;

const CLEANUP_HEAD: &str = "\
try {
    $_RIG_TMP_CLEANUP = @()
";

const CLEANUP_TAIL: &str = "\
} finally {
    foreach($f in $_RIG_TMP_CLEANUP) {
        Remove-Item $f -Force
    }
}";

fn interpreter(platform: TargetPlatform) -> &'static str {
    match platform {
        TargetPlatform::Windows => "powershell",
        TargetPlatform::Posix => "pwsh",
    }
}

impl Dialect for Pwsh {
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
        Box::new(PwshResolver::new(base_dir, orig_text, source_name, var_base))
    }

    fn format_setup(
        &self,
        spec: &StepSpec,
        platform: TargetPlatform,
        _keep_env: bool,
    ) -> Result<String> {
        let norm = PathNormalizer::new(ScriptLanguage::Pwsh, platform);
        let path_sep = platform.path_sep();

        let mut env: HashMap<String, String> = spec
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), escape_pwsh(v)))
            .collect();

        let mut path = Vec::with_capacity(spec.search_paths.len() + 1);
        for p in &spec.search_paths {
            path.push(escape_pwsh(&norm.normalize_absolute(p)?));
        }
        match &spec.sandbox {
            None => path.push("$Env:PATH".to_owned()),
            Some(sb) => path.extend(sb.paths.iter().map(|p| escape_pwsh(p))),
        }
        env.insert("PATH".to_owned(), join_with(&path, path_sep));

        let mut lib_path = Vec::with_capacity(spec.library_paths.len());
        for p in &spec.library_paths {
            lib_path.push(escape_pwsh(&norm.normalize_absolute(p)?));
        }
        env.insert("LD_LIBRARY_PATH".to_owned(), join_with(&lib_path, path_sep));
        env.insert(
            CWD_VAR.to_owned(),
            escape_pwsh(&norm.normalize_absolute(&spec.execution_path)?),
        );

        let mut ret = Vec::with_capacity(8);
        ret.push("# Dependency and tool path tables:".to_owned());
        ret.push(hashtable(ALL_PATHS_VAR, &spec.all_dep_paths, &norm)?);
        ret.push(hashtable(DEP_PATHS_VAR, &spec.direct_dep_paths, &norm)?);
        ret.push(hashtable(TOOL_PATHS_VAR, &spec.tool_paths, &norm)?);
        ret.push(String::new());
        ret.push("# Environment:".to_owned());

        let mut exports: Vec<(String, String)> = env.into_iter().collect();
        exports.sort();
        ret.push(
            exports
                .iter()
                .map(|(k, v)| format!("$Env:{k}=\"{v}\""))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        Ok(ret.join("\n"))
    }

    fn format_script(&self, spec: &StepSpec, platform: TargetPlatform) -> Result<String> {
        let env_file = if spec.has_sandbox() {
            SANDBOX_ENV_FILE.to_owned()
        } else {
            absolute(&spec.env_file)?
        };

        let ret = [
            self.format_setup(spec, platform, false)?,
            String::new(),
            format!(
                "# Setup\nGet-ChildItem Env: | Select-Object Name,Value | Export-Csv {env_file}\ncd $Env:{CWD_VAR}\n"
            ),
            STRICT_MODE.to_owned(),
            ERROR_TRAP.to_owned(),
            String::new(),
            CLEANUP_HEAD.to_owned(),
            "# BEGIN BUILD SCRIPT".to_owned(),
            spec.script.clone(),
            "# END BUILD SCRIPT".to_owned(),
            CLEANUP_TAIL.to_owned(),
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
        let (exec_script, real_script) = script_paths(spec, tmp_dir, "/.script.ps1", "script.ps1")?;

        log::debug!("writing pwsh setup script to {}", real_script.display());
        std::fs::write(&real_script, self.format_setup(spec, platform, keep_env)?)
            .with_context(|| format!("writing setup script {}", real_script.display()))?;

        let mut args = vec![
            interpreter(platform).to_owned(),
            "-ExecutionPolicy".to_owned(),
            "Bypass".to_owned(),
            "-NoExit".to_owned(),
            "-File".to_owned(),
            exec_script,
        ];
        for a in &spec.arguments {
            args.push(absolute(a)?);
        }
        Ok(args)
    }

    fn setup_call(
        &self,
        spec: &StepSpec,
        tmp_dir: &Path,
        platform: TargetPlatform,
        _keep_env: bool,
        _trace: bool,
    ) -> Result<Vec<String>> {
        let (exec_script, real_script) = script_paths(spec, tmp_dir, "/.script.ps1", "script.ps1")?;

        log::debug!("writing pwsh script to {}", real_script.display());
        std::fs::write(&real_script, self.format_script(spec, platform)?)
            .with_context(|| format!("writing script {}", real_script.display()))?;

        let mut args = vec![
            interpreter(platform).to_owned(),
            "-ExecutionPolicy".to_owned(),
            "Bypass".to_owned(),
            "-File".to_owned(),
            exec_script,
        ];
        for a in &spec.arguments {
            args.push(absolute(a)?);
        }
        Ok(args)
    }

    fn mangle_fingerprints(&self, fragments: &[&str], env: &BTreeMap<String, String>) -> String {
        let script = join_scripts(fragments.iter().copied(), self.glue());

        if script.is_empty() {
            return script;
        }

        let mut ret = Vec::with_capacity(4);
        ret.push(script);
        ret.push("$ErrorActionPreference=\"Stop\"".to_owned());
        ret.push("Set-PSDebug -Strict".to_owned());
        // each pair exports its own name and escaped value:
        for (n, v) in env {
            ret.push(format!("$Env:{}=\"{}\"", n, escape_pwsh(v)));
        }

        ret.reverse();
        ret.join("\n")
    }

    fn setup_fingerprint(
        &self,
        spec: &StepSpec,
        env: &mut BTreeMap<String, String>,
        platform: TargetPlatform,
    ) -> Vec<String> {
        let norm = PathNormalizer::new(ScriptLanguage::Pwsh, platform);
        if let Some(cwd) = env.get(CWD_VAR) {
            let munged = norm.normalize(cwd);
            env.insert(CWD_VAR.to_owned(), munged);
        }
        vec![
            interpreter(platform).to_owned(),
            "-c".to_owned(),
            spec.fingerprint_script.clone(),
        ]
    }
}

fn join_with(parts: &[String], sep: char) -> String {
    let mut out = String::new();
    for p in parts {
        if !out.is_empty() {
            out.push(sep);
        }
        out.push_str(p);
    }
    out
}

fn hashtable(name: &str, pairs: &[(String, String)], norm: &PathNormalizer) -> Result<String> {
    let mut entries = Vec::with_capacity(pairs.len());
    for (n, p) in pairs {
        entries.push(format!(
            "{} = \"{}\"",
            quote_pwsh(n),
            escape_pwsh(&norm.normalize_absolute(p)?)
        ));
    }
    entries.sort();
    Ok(format!("${}=@{{ {} }}", name, entries.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::TRAP_EXIT_STATUS;
    use crate::spec::tests::minimal_spec;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn test_format_script_block_order() -> Result<()> {
        let mut spec = minimal_spec(ScriptLanguage::Pwsh);
        spec.script = "Write-Host hi".to_owned();
        let text = Pwsh.format_script(&spec, TargetPlatform::Posix)?;

        let needles = [
            "# Environment:",
            "$ErrorActionPreference=\"Stop\"",
            "trap {",
            "try {",
            "# BEGIN BUILD SCRIPT",
            "Write-Host hi",
            "# END BUILD SCRIPT",
            "} finally {",
        ];
        let mut last = 0;
        for n in needles {
            let at = text.find(n).unwrap_or_else(|| panic!("missing: {n}"));
            assert!(at >= last, "{n} out of order");
            last = at;
        }
        Ok(())
    }

    #[test]
    fn test_trap_uses_reserved_exit_status() {
        assert!(ERROR_TRAP.contains(&format!("exit {TRAP_EXIT_STATUS}")));
    }

    #[test]
    fn test_env_exports_escaped() -> Result<()> {
        let mut spec = minimal_spec(ScriptLanguage::Pwsh);
        spec.environment.insert("MSG".to_owned(), "say \"hi\" $now".to_owned());
        let text = Pwsh.format_setup(&spec, TargetPlatform::Posix, false)?;
        assert!(text.contains("$Env:MSG=\"say `\"hi`\" `$now\""));
        Ok(())
    }

    #[test]
    fn test_path_separator_follows_platform() -> Result<()> {
        let mut spec = minimal_spec(ScriptLanguage::Pwsh);
        spec.search_paths = vec!["/a".to_owned(), "/b".to_owned()];
        let posix = Pwsh.format_setup(&spec, TargetPlatform::Posix, false)?;
        assert!(posix.contains("/a:/b:$Env:PATH"));

        let win = Pwsh.format_setup(&spec, TargetPlatform::Windows, false)?;
        assert!(win.contains("/a;/b;$Env:PATH"));
        Ok(())
    }

    #[test]
    fn test_setup_call_argv() -> Result<()> {
        let dir = tempdir()?;
        let spec = minimal_spec(ScriptLanguage::Pwsh);
        let args = Pwsh.setup_call(&spec, dir.path(), TargetPlatform::Posix, false, false)?;

        let script_file = dir.path().join("script.ps1");
        assert!(script_file.exists());
        assert_eq!(args[0], "pwsh");
        assert_eq!(args[1], "-ExecutionPolicy");
        assert_eq!(args[2], "Bypass");
        assert_eq!(args[3], "-File");
        assert_eq!(args[4], script_file.to_str().unwrap());
        Ok(())
    }

    #[test]
    fn test_setup_shell_is_interactive() -> Result<()> {
        let dir = tempdir()?;
        let spec = minimal_spec(ScriptLanguage::Pwsh);
        let args = Pwsh.setup_shell(&spec, dir.path(), TargetPlatform::Windows, false)?;
        assert_eq!(args[0], "powershell");
        assert!(args.contains(&"-NoExit".to_owned()));
        Ok(())
    }

    // pins the intended behavior: every pair exports its own name and value
    // (a naive port could format all exports from one stale loop variable).
    #[test]
    fn test_mangle_exports_each_pair() {
        let env = BTreeMap::from([
            ("ALPHA".to_owned(), "1".to_owned()),
            ("BETA".to_owned(), "two words".to_owned()),
        ]);
        let out = Pwsh.mangle_fingerprints(&["Get-Date"], &env);
        assert!(out.contains("$Env:ALPHA=\"1\""));
        assert!(out.contains("$Env:BETA=\"two words\""));
        // exports precede strict mode, body comes last:
        assert!(out.find("$Env:ALPHA").unwrap() < out.find("Set-PSDebug").unwrap());
        assert!(out.ends_with("Get-Date"));
    }

    #[test]
    fn test_mangle_empty() {
        assert_eq!(Pwsh.mangle_fingerprints(&[], &BTreeMap::new()), "");
    }

    #[test]
    fn test_mangle_glue_resets_cwd() {
        let out = Pwsh.mangle_fingerprints(&["Get-Date", "Get-Location"], &BTreeMap::new());
        assert!(out.contains("Get-Date\ncd $Env:RIG_CWD\nGet-Location"));
    }

    #[test]
    fn test_hashtable_entries_quoted_and_sorted() -> Result<()> {
        let mut spec = minimal_spec(ScriptLanguage::Pwsh);
        spec.tool_paths = vec![
            ("zip".to_owned(), "/t/zip".to_owned()),
            ("ar".to_owned(), "/t/ar".to_owned()),
        ];
        let text = Pwsh.format_setup(&spec, TargetPlatform::Posix, false)?;
        let line = text
            .lines()
            .find(|l| l.contains(TOOL_PATHS_VAR))
            .expect("table line");
        assert!(line.find("\"ar\"").unwrap() < line.find("\"zip\"").unwrap());
        Ok(())
    }
}
