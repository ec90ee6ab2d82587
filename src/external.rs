use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{Context, Result};

/// External decompiler invoked as `<program> <args...> <file.class>`.
///
/// The command prints Java source on stdout.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ExternalCommand {
    program: PathBuf,
    args: Vec<String>,
}

impl ExternalCommand {
    /// Build from an argv prefix such as `["java", "-jar", "cfr.jar"]`.
    pub(crate) fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .context("decompiler command must not be empty")?;
        Ok(Self {
            program: PathBuf::from(program),
            args: args.to_vec(),
        })
    }

    /// Write the class bytes under `scratch_dir` and return the command's stdout.
    pub(crate) fn decompile(
        &self,
        internal_name: &str,
        class_bytes: &[u8],
        scratch_dir: &Path,
    ) -> Result<String> {
        let class_path = scratch_dir.join(format!("{internal_name}.class"));
        if let Some(parent) = class_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(&class_path, class_bytes)
            .with_context(|| format!("failed to write {}", class_path.display()))?;

        tracing::debug!(
            program = %self.program.display(),
            class = internal_name,
            "running external decompiler"
        );
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(&class_path)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("run {}", self.program.display()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} failed with {}: stderr={}",
                self.program.display(),
                output.status,
                stderr.trim()
            );
        }
        let source = String::from_utf8(output.stdout)
            .with_context(|| format!("{} printed non UTF-8 output", self.program.display()))?;
        if source.trim().is_empty() {
            anyhow::bail!("{} returned empty output", self.program.display());
        }
        Ok(source)
    }
}
