//! Builds the versioned release artifact and locates it deterministically.
//!
//! The packager is purely local: it reads the current version from the source tree, runs
//! the configured build command, and then expects to find exactly one file in the dist
//! directory named `<name>-<version>…<ext>`. Zero or multiple matches are fatal
//! precondition failures, raised before any remote contact is made. Artifacts are built
//! fresh on every install or update run and never reused across runs.

use crate::error::Error;
use crate::registry::PackageSpec;
use regex::Regex;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

/// A built, versioned package file ready for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseArtifact {
    /// The version string read from the source tree at build time.
    pub version: String,

    /// Local path of the artifact file.
    pub path: PathBuf,

    /// Bare file name, reused as the upload name in the site home.
    pub file_name: String,
}

/// Builds release artifacts according to a site's [PackageSpec].
#[derive(Clone, Debug)]
pub struct Packager {
    spec: PackageSpec,
}

impl Packager {
    pub fn new(spec: PackageSpec) -> Self {
        Packager { spec }
    }

    /// Builds the artifact and locates it.
    ///
    /// # Errors
    ///
    /// Returns [Error::Version] if no version string can be read, [Error::Build] if the
    /// build command fails, and [Error::MissingArtifact] or [Error::AmbiguousArtifact] if
    /// the dist directory does not contain exactly one matching file.
    pub fn build(&self) -> Result<ReleaseArtifact, Error> {
        let version = self.read_version()?;
        self.run_build()?;
        self.locate(&version)
    }

    /// Reads the current package version from the configured version file.
    ///
    /// The first dotted-numeric match wins, so both a bare `VERSION` file and a
    /// `__version__ = "2.1.0"` assignment work.
    pub fn read_version(&self) -> Result<String, Error> {
        let path = &self.spec.version_file;
        let text = fs::read_to_string(path).map_err(|_| Error::Version { path: path.clone() })?;

        // Matches 2.1, 2.1.0, 2.1.0rc1, and similar.
        let pattern = Regex::new(r"\d+\.\d+[0-9A-Za-z.\-]*").unwrap();
        match pattern.find(&text) {
            Some(found) => Ok(found.as_str().to_string()),
            None => Err(Error::Version { path: path.clone() }),
        }
    }

    fn run_build(&self) -> Result<(), Error> {
        let command = &self.spec.build;
        let words = shlex::split(command).unwrap_or_default();
        let (program, args) = match words.split_first() {
            Some(split) => split,
            None => {
                return Err(Error::Build {
                    command: command.clone(),
                    detail: "empty build command".to_string(),
                })
            }
        };

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Build {
                command: command.clone(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            let code = match output.status.code() {
                Some(i) => format!("exit code {i}"),
                None => "error".to_string(),
            };
            return Err(Error::Build {
                command: command.clone(),
                detail: format!("{code}\n{}", String::from_utf8_lossy(&output.stderr)),
            });
        }
        Ok(())
    }

    /// Finds the one artifact in the dist directory matching `version`.
    ///
    /// The match rule is deliberately a prefix-and-suffix check, and the exactly-one
    /// requirement is what keeps it honest: `pkg-2.1.0.tar.gz` alongside a stale
    /// `pkg-2.1.0-old.tar.gz` both match the prefix and must fail as ambiguous rather
    /// than silently uploading either.
    fn locate(&self, version: &str) -> Result<ReleaseArtifact, Error> {
        let prefix = format!("{}-{}", self.spec.name, version);
        let suffix = format!(".{}", self.spec.ext);
        let dir = &self.spec.dist_dir;

        let mut matches: Vec<String> = Vec::new();
        let entries = fs::read_dir(dir).map_err(|_| Error::MissingArtifact {
            prefix: prefix.clone(),
            ext: self.spec.ext.clone(),
            dir: dir.clone(),
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && name.ends_with(&suffix) {
                matches.push(name);
            }
        }
        matches.sort();

        match matches.len() {
            0 => Err(Error::MissingArtifact {
                prefix,
                ext: self.spec.ext.clone(),
                dir: dir.clone(),
            }),
            1 => {
                let file_name = matches.pop().unwrap();
                Ok(ReleaseArtifact {
                    version: version.to_string(),
                    path: dir.join(&file_name),
                    file_name,
                })
            }
            _ => Err(Error::AmbiguousArtifact {
                prefix,
                ext: self.spec.ext.clone(),
                dir: dir.clone(),
                matches,
            }),
        }
    }
}
