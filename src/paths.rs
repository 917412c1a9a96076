use anyhow::Result;

use util::PathEncodingError;

use crate::lang::ScriptLanguage;

/// Platform the generated script will eventually run on.
/// Threaded explicitly into path normalization so that generation logic for
/// every platform/dialect combination is testable from a single host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetPlatform {
    Posix,
    Windows,
}

impl TargetPlatform {
    /// The platform we are generating on.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }

    /// Separator used when joining `PATH`-like lists for this platform.
    pub fn path_sep(self) -> char {
        match self {
            Self::Posix => ':',
            Self::Windows => ';',
        }
    }
}

/// Translates host-native paths into the syntax the target interpreter
/// expects. Bash on Windows runs under a POSIX emulation layer (MSYS2) that
/// wants `C:\foo\bar` written as `/c/foo/bar`; every other platform/dialect
/// combination keeps paths unchanged.
#[derive(Debug, Clone, Copy)]
pub struct PathNormalizer {
    language: ScriptLanguage,
    platform: TargetPlatform,
}

impl PathNormalizer {
    pub fn new(language: ScriptLanguage, platform: TargetPlatform) -> Self {
        Self { language, platform }
    }

    pub fn normalize(&self, path: &str) -> String {
        if self.platform == TargetPlatform::Windows && self.language == ScriptLanguage::Bash {
            let bytes = path.as_bytes();
            if bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' && bytes[2] == b'\\' {
                let drive = (bytes[0] as char).to_ascii_lowercase();
                format!("/{}/{}", drive, path[3..].replace('\\', "/"))
            } else {
                path.replace('\\', "/")
            }
        } else {
            path.to_owned()
        }
    }

    /// Absolutize, then normalize.
    pub fn normalize_absolute(&self, path: &str) -> Result<String> {
        Ok(self.normalize(&absolute(path)?))
    }
}

/// Absolute form of `path` relative to the current directory, without
/// resolving symlinks, checked for UTF-8 validity.
pub fn absolute(path: &str) -> Result<String> {
    let p = std::path::absolute(path)?;
    Ok(p.to_str().ok_or(PathEncodingError)?.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_munge_drive_path_for_emulated_bash() {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, TargetPlatform::Windows);
        assert_eq!(norm.normalize("C:\\foo\\bar"), "/c/foo/bar");
    }

    #[test]
    fn test_munge_undriven_path_for_emulated_bash() {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, TargetPlatform::Windows);
        assert_eq!(norm.normalize("foo\\bar"), "foo/bar");
    }

    #[test]
    fn test_native_bash_unchanged() {
        let norm = PathNormalizer::new(ScriptLanguage::Bash, TargetPlatform::Posix);
        assert_eq!(norm.normalize("C:\\foo\\bar"), "C:\\foo\\bar");
        assert_eq!(norm.normalize("/foo/bar"), "/foo/bar");
    }

    #[test]
    fn test_pwsh_unchanged_on_windows() {
        let norm = PathNormalizer::new(ScriptLanguage::Pwsh, TargetPlatform::Windows);
        assert_eq!(norm.normalize("C:\\foo\\bar"), "C:\\foo\\bar");
    }

    #[test]
    fn test_absolute_is_utf8_and_absolute() -> anyhow::Result<()> {
        let abs = absolute("some/relative/path")?;
        assert!(std::path::Path::new(&abs).is_absolute());
        Ok(())
    }
}
