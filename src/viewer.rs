use std::{
    ffi::OsString,
    io,
    path::Path,
    process::{Child, Command},
};

/// Environment variable overriding the viewer program.
pub const VIEWER_ENV: &str = "IMUTILS_VIEWER";
pub const DEFAULT_VIEWER: &str = "napari";

/// External program a dataset directory is handed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewerCommand {
    pub program: OsString,
    /// Arguments placed before the dataset path.
    pub args: Vec<OsString>,
}

impl Default for ViewerCommand {
    /// The program named by `IMUTILS_VIEWER`, or napari.
    fn default() -> Self {
        Self::with_override(std::env::var_os(VIEWER_ENV))
    }
}

impl ViewerCommand {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `program` unless it is missing or empty, else the default viewer.
    fn with_override(program: Option<OsString>) -> Self {
        Self::new(
            program
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_VIEWER.into()),
        )
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn command(&self, path: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).arg(path);
        cmd
    }

    /// Spawn the viewer on `path` without waiting for it.
    pub fn open(&self, path: impl AsRef<Path>) -> crate::Result<Child> {
        let path = path.as_ref();
        log::info!(
            "opening {} in {}",
            path.display(),
            self.program.to_string_lossy()
        );
        self.command(path).spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                crate::Error::ViewerUnavailable {
                    program: self.program.to_string_lossy().into_owned(),
                    source: e,
                }
            }
            _ => crate::Error::Io(e),
        })
    }
}
