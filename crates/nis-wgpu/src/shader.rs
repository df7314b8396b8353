//! Shader source lookup, defines and include expansion
//!
//! The compute shader is an external asset. It is looked up by name in an
//! ordered list of candidate directories, and `#include "file"` directives are
//! resolved against the directory the shader was found in.

use crate::error::{Result, ScalerError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// File name of the scaler compute shader
pub const SHADER_FILE_NAME: &str = "NIS_Main.glsl";
/// Entry point of the scaler compute shader
pub const ENTRY_POINT: &str = "main";

static INCLUDE_DIRECTIVE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^\s*#\s*include\s+[<"](?<name>[^">]+)[">]\s*$"#).unwrap());

/// Preprocessor defines passed to the shader compiler, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderDefines {
    entries: Vec<(String, String)>,
}

impl ShaderDefines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a define, replacing the value of an existing one with the same name
    pub fn add(&mut self, name: &str, value: impl ToString) -> &mut Self {
        let value = value.to_string();
        match self.entries.iter_mut().find(|(existing, _)| existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
        self
    }

    /// Looks up the value of a define
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.iter().find(|(existing, _)| existing == name).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Finds the first candidate directory that contains `file_name`
///
/// Every candidate is tried in order before giving up; a missing or unreadable
/// directory only counts as a miss.
pub fn locate_shader(candidate_dirs: &[PathBuf], file_name: &str) -> Result<PathBuf> {
    candidate_dirs
        .iter()
        .map(|dir| dir.join(file_name))
        .find(|path| path.is_file())
        .ok_or_else(|| ScalerError::ResourceNotFound {
            name: file_name.to_string(),
            searched: candidate_dirs.to_vec(),
        })
}

/// Resolves `#include` directives against a single directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeResolver {
    root: PathBuf,
}

impl IncludeResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory that include names are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reads `path` and splices every included file into it, recursively
    pub fn expand(&self, path: &Path) -> Result<String> {
        let mut stack = Vec::new();
        let mut output = String::new();
        self.expand_into(path, &mut stack, &mut output)?;
        Ok(output)
    }

    fn expand_into(&self, path: &Path, stack: &mut Vec<PathBuf>, output: &mut String) -> Result<()> {
        if stack.iter().any(|open| open == path) {
            return Err(ScalerError::IncludeCycle(path.to_path_buf()));
        }

        let source = std::fs::read_to_string(path).map_err(|source| ScalerError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        stack.push(path.to_path_buf());
        for line in source.lines() {
            match INCLUDE_DIRECTIVE.captures(line) {
                Some(captures) => {
                    let name = &captures["name"];
                    let included = self.root.join(name);
                    if !included.is_file() {
                        return Err(ScalerError::IncludeNotFound {
                            name: name.to_string(),
                            from: path.to_path_buf(),
                        });
                    }
                    self.expand_into(&included, stack, output)?;
                }
                None => {
                    output.push_str(line);
                    output.push('\n');
                }
            }
        }
        stack.pop();

        Ok(())
    }
}

/// Everything a device needs to compile the scaler's compute shader
#[derive(Debug, Clone)]
pub struct ComputeShaderDesc {
    /// Label for debugging
    pub label: &'static str,
    /// Resolved path of the shader source
    pub path: PathBuf,
    /// Entry point function name
    pub entry_point: &'static str,
    /// Compile-time constants
    pub defines: ShaderDefines,
    /// Resolver for `#include` directives
    pub includes: IncludeResolver,
}

impl ComputeShaderDesc {
    /// Reads the shader source with all includes expanded
    pub fn load_source(&self) -> Result<String> {
        self.includes.expand(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_defines_keep_order_and_replace() {
        let mut defines = ShaderDefines::new();
        defines.add("A", 1).add("B", true).add("C", "x");
        defines.add("A", 7);

        let entries: Vec<_> = defines.iter().collect();
        assert_eq!(entries, vec![("A", "7"), ("B", "true"), ("C", "x")]);
        assert_eq!(defines.get("B"), Some("true"));
        assert_eq!(defines.get("D"), None);
        assert_eq!(defines.len(), 3);
    }

    #[test]
    fn test_locate_prefers_first_hit() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(first.path().join("a.glsl"), "").unwrap();
        fs::write(second.path().join("a.glsl"), "").unwrap();

        let found = locate_shader(&[first.path().to_path_buf(), second.path().to_path_buf()], "a.glsl").unwrap();
        assert_eq!(found, first.path().join("a.glsl"));
    }

    #[test]
    fn test_locate_skips_missing_directories() {
        let present = tempfile::tempdir().unwrap();
        fs::write(present.path().join("a.glsl"), "").unwrap();

        let candidates = vec![PathBuf::from("/nonexistent/shader/dir"), present.path().to_path_buf()];
        assert_eq!(locate_shader(&candidates, "a.glsl").unwrap(), present.path().join("a.glsl"));
    }

    #[test]
    fn test_locate_reports_searched_directories() {
        let empty = tempfile::tempdir().unwrap();
        let candidates = vec![empty.path().to_path_buf(), PathBuf::from("missing")];

        match locate_shader(&candidates, "a.glsl") {
            Err(ScalerError::ResourceNotFound { name, searched }) => {
                assert_eq!(name, "a.glsl");
                assert_eq!(searched, candidates);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_directory_named_like_shader_is_not_a_hit() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("a.glsl")).unwrap();
        assert!(locate_shader(&[dir.path().to_path_buf()], "a.glsl").is_err());
    }

    #[test]
    fn test_expand_nested_includes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.glsl"), "#version 450\n#include \"core.h\"\nvoid main() {}\n").unwrap();
        fs::write(dir.path().join("core.h"), "  #include <util.h>\nfloat core;\n").unwrap();
        fs::write(dir.path().join("util.h"), "float util;\n").unwrap();

        let resolver = IncludeResolver::new(dir.path());
        let source = resolver.expand(&dir.path().join("main.glsl")).unwrap();
        assert_eq!(source, "#version 450\nfloat util;\nfloat core;\nvoid main() {}\n");
    }

    #[test]
    fn test_expand_missing_include() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.glsl"), "#include \"absent.h\"\n").unwrap();

        let err = IncludeResolver::new(dir.path()).expand(&dir.path().join("main.glsl")).unwrap_err();
        assert!(matches!(err, ScalerError::IncludeNotFound { ref name, .. } if name == "absent.h"));
    }

    #[test]
    fn test_expand_detects_cycles() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.h"), "#include \"b.h\"\n").unwrap();
        fs::write(dir.path().join("b.h"), "#include \"a.h\"\n").unwrap();

        let err = IncludeResolver::new(dir.path()).expand(&dir.path().join("a.h")).unwrap_err();
        assert!(matches!(err, ScalerError::IncludeCycle(_)));
    }

    #[test]
    fn test_repeated_include_is_not_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.glsl"), "#include \"x.h\"\n#include \"x.h\"\n").unwrap();
        fs::write(dir.path().join("x.h"), "x\n").unwrap();

        let source = IncludeResolver::new(dir.path()).expand(&dir.path().join("main.glsl")).unwrap();
        assert_eq!(source, "x\nx\n");
    }
}
