use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

use util::{quote_bash, quote_pwsh, slice_string, PathEncodingError};

/// Script-level array holding temp files to delete on every exit path.
pub const TMP_CLEANUP_VAR: &str = "_RIG_TMP_CLEANUP";
/// Script-level table attributing line numbers to source fragments.
pub const SOURCES_VAR: &str = "_RIG_SOURCES";

/// base64 here-documents wrap at this column.
const B64_WIDTH: usize = 76;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no files matched in include pattern '{0}'")]
    NoFilesMatched(String),
    #[error("unterminated include directive near '{0}'")]
    UnterminatedDirective(String),
    #[error("literal include '{0}' is not valid UTF-8")]
    LiteralNotUtf8(String),
}

/// How an include directive's content ends up in the generated script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeMode {
    /// Materialized as a temp file by the prolog; the substitution text is a
    /// reference to that file's path.
    File,
    /// Substituted inline as a dialect-quoted string literal.
    Literal,
}

/// Expands include directives for one script template, accumulating prolog
/// lines and a digest per inclusion. One resolver per template; counters and
/// buffers are instance state, never shared.
pub trait IncludeResolver {
    /// Expand one directive, returning its substitution text.
    fn resolve_include(&mut self, mode: IncludeMode, pattern: &str) -> Result<String>;

    /// Prepend the accumulated prolog to the expanded `body`. Returns the
    /// assembled script text and the digest chain (newline-joined hex
    /// digests, first entry covering the unexpanded template).
    fn finalize(self: Box<Self>, body: &str) -> (String, String);
}

/// State shared by both dialect resolvers.
#[derive(Debug)]
struct ResolverCore {
    base_dir: PathBuf,
    source_name: String,
    var_base: String,
    digests: Vec<String>,
    prolog: Vec<String>,
    count: usize,
}

impl ResolverCore {
    fn new(base_dir: &Path, orig_text: &str, source_name: &str, var_base: &str) -> Self {
        Self {
            base_dir: base_dir.to_owned(),
            source_name: source_name.to_owned(),
            var_base: var_base.to_owned(),
            // index 0: the template itself, so even include-free templates
            // contribute a stable identity:
            digests: vec![sha1_hex(orig_text.as_bytes())],
            prolog: Vec::new(),
            count: 0,
        }
    }

    /// Read all files matching `pattern` below the base dir in sorted path
    /// order, recording the digest of the concatenated content.
    fn read_pattern(&mut self, pattern: &str) -> Result<Vec<u8>> {
        let full = self.base_dir.join(pattern);
        let full = full.to_str().ok_or(PathEncodingError)?;

        let mut paths = glob::glob(full)
            .with_context(|| format!("invalid include pattern '{pattern}'"))?
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("error including '{pattern}'"))?;
        paths.sort();
        if paths.is_empty() {
            return Err(Error::NoFilesMatched(pattern.to_owned()).into());
        }

        let mut content = Vec::new();
        for path in &paths {
            log::trace!("including {}", path.display());
            let bytes = std::fs::read(path)
                .with_context(|| format!("error including '{}'", path.display()))?;
            content.extend_from_slice(&bytes);
        }

        self.digests.push(sha1_hex(&content));
        Ok(content)
    }

    fn next_var(&mut self) -> String {
        let var = format!("_{}{}", self.var_base, self.count);
        self.count += 1;
        var
    }
}

fn sha1_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Include resolver emitting bash prolog lines.
#[derive(Debug)]
pub struct BashResolver {
    core: ResolverCore,
}

impl BashResolver {
    pub fn new(base_dir: &Path, orig_text: &str, source_name: &str, var_base: &str) -> Self {
        Self {
            core: ResolverCore::new(base_dir, orig_text, source_name, var_base),
        }
    }
}

impl IncludeResolver for BashResolver {
    fn resolve_include(&mut self, mode: IncludeMode, pattern: &str) -> Result<String> {
        let content = self.core.read_pattern(pattern)?;
        match mode {
            IncludeMode::File => {
                let var = self.core.next_var();
                let prolog = &mut self.core.prolog;
                prolog.push(format!("{var}=$(mktemp)"));
                // register for cleanup before first use:
                prolog.push(format!("{TMP_CLEANUP_VAR}+=( ${{{var}}} )"));
                prolog.push(format!("base64 -d > ${{{var}}} <<EOF"));
                let encoded = BASE64.encode(&content);
                prolog.extend(slice_string(&encoded, B64_WIDTH).iter().map(|s| (*s).to_owned()));
                prolog.push("EOF".to_owned());
                Ok(format!("${{{var}}}"))
            }
            IncludeMode::Literal => {
                let text = String::from_utf8(content)
                    .map_err(|_| Error::LiteralNotUtf8(pattern.to_owned()))?;
                Ok(quote_bash(&text))
            }
        }
    }

    fn finalize(self: Box<Self>, body: &str) -> (String, String) {
        let core = self.core;
        let mut lines = core.prolog;
        lines.push(format!("{SOURCES_VAR}[$LINENO]={}", quote_bash(&core.source_name)));
        lines.push(body.to_owned());
        (lines.join("\n"), core.digests.join("\n"))
    }
}

/// Include resolver emitting PowerShell prolog lines.
#[derive(Debug)]
pub struct PwshResolver {
    core: ResolverCore,
}

impl PwshResolver {
    pub fn new(base_dir: &Path, orig_text: &str, source_name: &str, var_base: &str) -> Self {
        Self {
            core: ResolverCore::new(base_dir, orig_text, source_name, var_base),
        }
    }
}

impl IncludeResolver for PwshResolver {
    fn resolve_include(&mut self, mode: IncludeMode, pattern: &str) -> Result<String> {
        let content = self.core.read_pattern(pattern)?;
        match mode {
            IncludeMode::File => {
                let var = format!("${}", self.core.next_var());
                let prolog = &mut self.core.prolog;
                prolog.push(format!("{var} = (New-TemporaryFile).FullName"));
                prolog.push(format!("${TMP_CLEANUP_VAR} += {var}"));
                prolog.push("[Convert]::FromBase64String(@'".to_owned());
                let encoded = BASE64.encode(&content);
                prolog.extend(slice_string(&encoded, B64_WIDTH).iter().map(|s| (*s).to_owned()));
                prolog.push(format!("'@) | Set-Content {var} -AsByteStream"));
                Ok(var)
            }
            IncludeMode::Literal => {
                let text = String::from_utf8(content)
                    .map_err(|_| Error::LiteralNotUtf8(pattern.to_owned()))?;
                Ok(quote_pwsh(&text))
            }
        }
    }

    fn finalize(self: Box<Self>, body: &str) -> (String, String) {
        let core = self.core;
        let mut lines = core.prolog;
        lines.push(body.to_owned());
        (lines.join("\n"), core.digests.join("\n"))
    }
}

/// Expand `$<<PATTERN>>` (embed-file) and `$<'PATTERN'>` (embed-literal)
/// include directives in `text`, driving `resolver` for each one.
/// A lone `$<` that opens neither directive form is kept verbatim.
pub fn expand_template(resolver: &mut dyn IncludeResolver, text: &str) -> Result<String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find("$<") {
        out.push_str(&rest[..at]);
        let tail = &rest[at + 2..];
        if let Some(inner) = tail.strip_prefix('<') {
            let end = inner
                .find(">>")
                .ok_or_else(|| Error::UnterminatedDirective(head_of(&rest[at..])))?;
            out.push_str(&resolver.resolve_include(IncludeMode::File, &inner[..end])?);
            rest = &inner[end + 2..];
        } else if let Some(inner) = tail.strip_prefix('\'') {
            let end = inner
                .find("'>")
                .ok_or_else(|| Error::UnterminatedDirective(head_of(&rest[at..])))?;
            out.push_str(&resolver.resolve_include(IncludeMode::Literal, &inner[..end])?);
            rest = &inner[end + 2..];
        } else {
            out.push_str("$<");
            rest = tail;
        }
    }
    out.push_str(rest);
    Ok(out)
}

fn head_of(s: &str) -> String {
    s.chars().take(24).collect()
}
