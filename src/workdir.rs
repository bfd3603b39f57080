use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

/// File name of one captured frame, e.g. `Camera1_00000042.jpeg`.
pub fn frame_file_name(camera: &str, frame: u64) -> String {
    format!("{camera}_{frame:08}.jpeg")
}

/// Turn a printer job file name into something safe for paths and encoders.
///
/// Keeps only the file name, replaces spaces, colons and parentheses with
/// underscores, drops the `.gcode` extension, collapses doubled underscores
/// and trims one trailing underscore.
pub fn sanitize_jobname(jobname: &str) -> String {
    let base = jobname
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(jobname);
    let mut name = base
        .replace(' ', "_")
        .replace(".gcode", "")
        .replace([':', '(', ')'], "_")
        .replace("__", "_");
    if name.ends_with('_') {
        name.pop();
    }
    name
}

/// The per-job directory that frames are written into.
///
/// Directories live under `<base>/<printer>/` and are named
/// `<pid>_<n>`, with the sanitized job name appended once the printer
/// reports one. The directory itself is only created when the first frame
/// is about to be written.
#[derive(Debug)]
pub struct WorkingDir {
    top: PathBuf,
    prefix: String,
    increment: u32,
    current: Option<PathBuf>,
    named: bool,
}

impl WorkingDir {
    /// Prepare the printer's top directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the top directory cannot be created.
    pub fn new(base_dir: &Path, printer_host: &str) -> io::Result<Self> {
        let printer = printer_host.replace(['.', ':', '/'], "-");
        let top = base_dir.join(printer);
        fs::create_dir_all(&top)?;
        debug!("The top level dir is {}", top.display());

        let mut workdir = Self {
            top,
            prefix: std::process::id().to_string(),
            increment: 0,
            current: None,
            named: false,
        };
        while workdir.next_path().exists() {
            workdir.increment += 1;
        }
        Ok(workdir)
    }

    fn next_path(&self) -> PathBuf {
        self.top.join(format!("{}_{}", self.prefix, self.increment))
    }

    /// The current directory, if one has been created.
    pub fn path(&self) -> Option<&Path> {
        self.current.as_deref()
    }

    /// Whether the job name has been applied to the directory name.
    pub fn is_named(&self) -> bool {
        self.named
    }

    /// Create the directory if needed and return it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn ensure(&mut self) -> io::Result<&Path> {
        if self.current.is_none() {
            let path = self.next_path();
            fs::create_dir_all(&path)?;
            debug!("Created working directory: {}", path.display());
            self.current = Some(path);
            self.named = false;
        }
        Ok(self.current.as_deref().unwrap_or(&self.top))
    }

    /// Append the sanitized job name to the directory name.
    ///
    /// An empty job name is ignored so a later tick can try again.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails; the old name stays in use.
    pub fn apply_jobname(&mut self, jobname: &str) -> io::Result<()> {
        let Some(current) = self.current.clone() else {
            return Ok(());
        };
        let jobname = sanitize_jobname(jobname);
        if jobname.is_empty() {
            return Ok(());
        }
        if current.to_string_lossy().ends_with(&jobname) {
            self.named = true;
            return Ok(());
        }

        let mut renamed = current.clone().into_os_string();
        renamed.push(format!("_{jobname}"));
        let renamed = PathBuf::from(renamed);
        fs::rename(&current, &renamed)?;
        debug!("Renamed working directory: {}", renamed.display());
        self.current = Some(renamed);
        self.named = true;
        Ok(())
    }

    /// Path of a frame inside the current directory.
    pub fn frame_path(&self, camera: &str, frame: u64) -> Option<PathBuf> {
        self.current
            .as_ref()
            .map(|dir| dir.join(frame_file_name(camera, frame)))
    }

    /// Delete the current directory; the next frame creates a fresh one.
    pub fn discard(&mut self) {
        if let Some(dir) = self.current.take() {
            if let Err(e) = fs::remove_dir_all(&dir) {
                warn!("Could not delete {}: {}", dir.display(), e);
            } else {
                debug!("Deleted working directory {}", dir.display());
            }
        }
        self.named = false;
    }

    /// Leave the current directory in place and move on to a new one.
    pub fn start_new(&mut self) {
        if self.current.take().is_some() {
            self.increment += 1;
            while self.next_path().exists() {
                self.increment += 1;
            }
        }
        self.named = false;
    }

    /// Delete every directory this process created under the top directory.
    pub fn delete_own(&mut self) {
        self.current = None;
        self.named = false;
        let own = format!("{}_", self.prefix);
        let entries = match fs::read_dir(&self.top) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not list {}: {}", self.top.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_own = entry.file_name().to_string_lossy().starts_with(&own);
            if is_own && path.is_dir() {
                match fs::remove_dir_all(&path) {
                    Ok(()) => info!("Deleted {}", path.display()),
                    Err(e) => warn!("Could not delete {}: {}", path.display(), e),
                }
            }
        }
    }
}
