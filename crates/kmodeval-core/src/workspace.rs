//! Isolated build/run directory for one evaluation attempt.
//!
//! One workspace per candidate attempt, never shared. Release runs exactly
//! once per acquire on every exit path: [`EvalWorkspace::close`] removes
//! the tree eagerly and reports errors; if the workspace is instead dropped
//! (early return, panic), the owned `TempDir` removes it on drop.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::debug;

use crate::candidate::DriverCandidate;
use crate::error::{EvalError, Result};

/// Filename the candidate source is written under.
pub const DRIVER_FILE: &str = "driver_under_test.c";

/// Filename of the built module artifact.
pub const ARTIFACT_FILE: &str = "driver_under_test.ko";

/// An exclusively owned temporary build directory.
#[derive(Debug)]
pub struct EvalWorkspace {
    dir: TempDir,
}

impl EvalWorkspace {
    /// Create a fresh uniquely named workspace directory.
    ///
    /// Failure (disk full, permissions) is an environment error; no further
    /// stages run for the candidate.
    pub fn acquire() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("kmodeval-")
            .tempdir()
            .map_err(EvalError::Workspace)?;
        debug!(path = %dir.path().display(), "workspace acquired");
        Ok(Self { dir })
    }

    /// Path of the workspace root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path the driver source is written to.
    pub fn driver_path(&self) -> PathBuf {
        self.dir.path().join(DRIVER_FILE)
    }

    /// Path the build artifact is expected at.
    pub fn artifact_path(&self) -> PathBuf {
        self.dir.path().join(ARTIFACT_FILE)
    }

    /// Whether the build artifact exists.
    pub fn artifact_exists(&self) -> bool {
        self.artifact_path().is_file()
    }

    /// Write the candidate source, tagging printk format strings with the
    /// candidate's log marker so kernel log lines can be attributed to this
    /// attempt.
    pub async fn write_driver(&self, candidate: &DriverCandidate) -> Result<()> {
        let tagged = tag_printk_lines(&candidate.source, &candidate.log_marker());
        tokio::fs::write(self.driver_path(), tagged).await?;
        Ok(())
    }

    /// Write the generated Makefile targeting the configured kernel build
    /// tree.
    pub async fn write_makefile(&self, kernel_build_dir: &str) -> Result<()> {
        let makefile = format!(
            "obj-m += driver_under_test.o\n\
             \n\
             KDIR ?= {kernel_build_dir}\n\
             PWD := $(shell pwd)\n\
             \n\
             all:\n\
             \tmake -C $(KDIR) M=$(PWD) modules\n\
             \n\
             clean:\n\
             \tmake -C $(KDIR) M=$(PWD) clean\n"
        );
        tokio::fs::write(self.path().join("Makefile"), makefile).await?;
        Ok(())
    }

    /// Recursively delete the workspace, consuming it.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(EvalError::Workspace)?;
        debug!(path = %path.display(), "workspace released");
        Ok(())
    }
}

/// Prefix printk format strings with a marker string.
fn tag_printk_lines(source: &str, marker: &str) -> String {
    source.replace(
        "printk(KERN_INFO \"",
        &format!("printk(KERN_INFO \"{marker} "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(source: &str) -> DriverCandidate {
        DriverCandidate::new(
            source.to_string(),
            "model".to_string(),
            "p0".to_string(),
            "prompt".to_string(),
            0.5,
        )
    }

    #[test]
    fn test_acquire_creates_unique_dirs() {
        let a = EvalWorkspace::acquire().unwrap();
        let b = EvalWorkspace::acquire().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
        assert!(b.path().is_dir());
    }

    #[test]
    fn test_close_removes_directory() {
        let ws = EvalWorkspace::acquire().unwrap();
        let path = ws.path().to_path_buf();
        assert!(path.is_dir());
        ws.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_removes_directory() {
        let path;
        {
            let ws = EvalWorkspace::acquire().unwrap();
            path = ws.path().to_path_buf();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_release_runs_on_panic_path() {
        let path = std::sync::Arc::new(std::sync::Mutex::new(PathBuf::new()));
        let path_clone = path.clone();
        let result = std::panic::catch_unwind(move || {
            let ws = EvalWorkspace::acquire().unwrap();
            *path_clone.lock().unwrap() = ws.path().to_path_buf();
            panic!("downstream stage exploded");
        });
        assert!(result.is_err());
        assert!(!path.lock().unwrap().exists());
    }

    #[tokio::test]
    async fn test_write_driver_tags_printk() {
        let ws = EvalWorkspace::acquire().unwrap();
        let c = candidate("printk(KERN_INFO \"hello\\n\");\n");
        ws.write_driver(&c).await.unwrap();
        let written = tokio::fs::read_to_string(ws.driver_path()).await.unwrap();
        assert!(written.contains(&c.log_marker()));
        assert!(written.contains("hello"));
        ws.close().unwrap();
    }

    #[tokio::test]
    async fn test_write_makefile_targets_build_tree() {
        let ws = EvalWorkspace::acquire().unwrap();
        ws.write_makefile("/lib/modules/$(shell uname -r)/build")
            .await
            .unwrap();
        let makefile = tokio::fs::read_to_string(ws.path().join("Makefile"))
            .await
            .unwrap();
        assert!(makefile.contains("obj-m += driver_under_test.o"));
        assert!(makefile.contains("KDIR ?= /lib/modules/$(shell uname -r)/build"));
        ws.close().unwrap();
    }

    #[test]
    fn test_artifact_detection() {
        let ws = EvalWorkspace::acquire().unwrap();
        assert!(!ws.artifact_exists());
        std::fs::write(ws.artifact_path(), b"\x7fELF").unwrap();
        assert!(ws.artifact_exists());
        ws.close().unwrap();
    }
}
