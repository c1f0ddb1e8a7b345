//! Image build: YAML image definitions turned into `disk-image-create` runs.
//!
//! Definition files carry a `disk_images:` list. When several files define the
//! same `imagename`, later files extend the list fields and override the
//! scalar ones, so a distro-specific file can layer on top of a common one.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::contract::{CommandRunner, ImageBuilder};
use crate::error::BuildError;
use crate::process::Invocation;

pub const DEFAULT_BUILD_ARCH: &str = "amd64";
pub const DEFAULT_BUILD_TYPE: &str = "qcow2";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImageDefinition {
    pub imagename: String,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default, rename = "type")]
    pub image_type: Option<String>,
    #[serde(default)]
    pub distro: Option<String>,
    #[serde(default)]
    pub elements: Vec<String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub environment: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct DefinitionFile {
    #[serde(default)]
    disk_images: Vec<ImageDefinition>,
}

impl ImageDefinition {
    pub fn arch(&self) -> &str {
        self.arch.as_deref().unwrap_or(DEFAULT_BUILD_ARCH)
    }

    pub fn image_type(&self) -> &str {
        self.image_type.as_deref().unwrap_or(DEFAULT_BUILD_TYPE)
    }

    /// File the build produces: `<dir>/<imagename>.<type>`.
    pub fn output_file(&self, output_directory: &Path) -> PathBuf {
        output_directory.join(format!("{}.{}", self.imagename, self.image_type()))
    }

    /// `disk-image-create -a <arch> -o <dir>/<name> -t <type> [-p pkgs] [options] [distro] <elements>`
    pub fn invocation(&self, output_directory: &Path) -> Invocation {
        let mut inv = Invocation::new("disk-image-create")
            .arg("-a")
            .arg(self.arch())
            .arg("-o")
            .arg(output_directory.join(&self.imagename).to_string_lossy())
            .arg("-t")
            .arg(self.image_type());
        if !self.packages.is_empty() {
            inv = inv.arg("-p").arg(self.packages.join(","));
        }
        for option in &self.options {
            inv = inv.args(option.split_whitespace());
        }
        if let Some(distro) = &self.distro {
            inv = inv.arg(distro.as_str());
        }
        inv = inv.args(self.elements.iter().map(String::as_str));
        for (key, value) in &self.environment {
            inv = inv.env(key.as_str(), scalar(value));
        }
        inv
    }

    fn extend(&mut self, other: ImageDefinition) {
        if other.arch.is_some() {
            self.arch = other.arch;
        }
        if other.image_type.is_some() {
            self.image_type = other.image_type;
        }
        if other.distro.is_some() {
            self.distro = other.distro;
        }
        self.elements.extend(other.elements);
        self.packages.extend(other.packages);
        self.options.extend(other.options);
        self.environment.extend(other.environment);
    }
}

fn scalar(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}

/// Reads every file in order and merges definitions by `imagename`.
///
/// The result keeps the order in which names were first seen.
pub fn load_definitions(files: &[PathBuf]) -> Result<Vec<ImageDefinition>, BuildError> {
    let mut merged: Vec<ImageDefinition> = Vec::new();
    for path in files {
        let text = fs::read_to_string(path).map_err(|source| BuildError::Read {
            path: path.clone(),
            source,
        })?;
        let file: DefinitionFile = if text.trim().is_empty() {
            DefinitionFile::default()
        } else {
            serde_yaml::from_str(&text).map_err(|source| BuildError::Parse {
                path: path.clone(),
                source,
            })?
        };
        debug!(path = %path.display(), images = file.disk_images.len(), "Read image build config");

        for def in file.disk_images {
            match merged.iter_mut().find(|d| d.imagename == def.imagename) {
                Some(existing) => existing.extend(def),
                None => merged.push(def),
            }
        }
    }
    Ok(merged)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub skipped: Vec<String>,
}

/// Builds images with diskimage-builder through a [`CommandRunner`].
pub struct DibImageBuilder<'a, R: CommandRunner + ?Sized> {
    runner: &'a R,
}

impl<'a, R: CommandRunner + ?Sized> DibImageBuilder<'a, R> {
    pub fn new(runner: &'a R) -> Self {
        DibImageBuilder { runner }
    }
}

impl<R: CommandRunner + ?Sized> ImageBuilder for DibImageBuilder<'_, R> {
    fn build(&self, config: &BuildConfig) -> Result<BuildReport, BuildError> {
        config.trace_loaded();
        let mut definitions = load_definitions(&config.config_files)?;

        if let Some(wanted) = &config.images {
            if let Some(missing) = wanted
                .iter()
                .find(|name| !definitions.iter().any(|d| &d.imagename == *name))
            {
                return Err(BuildError::UnknownImage(missing.clone()));
            }
            definitions.retain(|d| wanted.contains(&d.imagename));
        }

        let mut report = BuildReport::default();
        for def in &definitions {
            let output = def.output_file(&config.output_directory);
            if config.skip && output.exists() {
                println!("Image file \"{}\" already exists, skipping build.", output.display());
                info!(image = %def.imagename, "Skipping build, output exists");
                report.skipped.push(def.imagename.clone());
                continue;
            }
            info!(image = %def.imagename, arch = def.arch(), image_type = def.image_type(), "Building image");
            self.runner.run(&def.invocation(&config.output_directory))?;
            report.built.push(def.imagename.clone());
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockCommandRunner;
    use std::fs::write;
    use tempfile::tempdir;

    const COMMON: &str = r#"
disk_images:
  - imagename: overcloud-full
    arch: amd64
    type: qcow2
    elements:
      - overcloud-full
      - overcloud-controller
    packages:
      - python-psutil
    options:
      - "--min-tmpfs 5"
    environment:
      DIB_PYTHON_VERSION: 2
  - imagename: ironic-python-agent
    arch: amd64
    type: qcow2
    elements:
      - ironic-agent
"#;

    const CENTOS: &str = r#"
disk_images:
  - imagename: overcloud-full
    distro: centos7
    elements:
      - epel
    packages:
      - tmux
    environment:
      DIB_EPEL_DISABLED: "1"
"#;

    #[test]
    fn definitions_merge_by_name() {
        let dir = tempdir().unwrap();
        let common = dir.path().join("common.yaml");
        let centos = dir.path().join("centos.yaml");
        write(&common, COMMON).unwrap();
        write(&centos, CENTOS).unwrap();

        let defs = load_definitions(&[common, centos]).unwrap();
        assert_eq!(defs.len(), 2);
        let full = &defs[0];
        assert_eq!(full.imagename, "overcloud-full");
        assert_eq!(full.elements, vec!["overcloud-full", "overcloud-controller", "epel"]);
        assert_eq!(full.packages, vec!["python-psutil", "tmux"]);
        assert_eq!(full.distro.as_deref(), Some("centos7"));
        assert_eq!(full.environment.len(), 2);
    }

    #[test]
    fn invocation_orders_arguments() {
        let dir = tempdir().unwrap();
        let common = dir.path().join("common.yaml");
        let centos = dir.path().join("centos.yaml");
        write(&common, COMMON).unwrap();
        write(&centos, CENTOS).unwrap();
        let defs = load_definitions(&[common, centos]).unwrap();

        let inv = defs[0].invocation(Path::new("/tmp/out"));
        assert_eq!(
            inv.argv(),
            vec![
                "disk-image-create",
                "-a",
                "amd64",
                "-o",
                "/tmp/out/overcloud-full",
                "-t",
                "qcow2",
                "-p",
                "python-psutil,tmux",
                "--min-tmpfs",
                "5",
                "centos7",
                "overcloud-full",
                "overcloud-controller",
                "epel",
            ]
        );
        assert!(inv.env.contains(&("DIB_PYTHON_VERSION".to_owned(), "2".to_owned())));
        assert!(inv.env.contains(&("DIB_EPEL_DISABLED".to_owned(), "1".to_owned())));
    }

    #[test]
    fn defaults_apply_when_arch_and_type_missing() {
        let def = ImageDefinition {
            imagename: "bare".into(),
            elements: vec!["base".into()],
            ..ImageDefinition::default()
        };
        assert_eq!(def.arch(), DEFAULT_BUILD_ARCH);
        assert_eq!(def.output_file(Path::new(".")), PathBuf::from("./bare.qcow2"));
    }

    #[test]
    fn existing_output_is_skipped_unless_no_skip() {
        let dir = tempdir().unwrap();
        let config_file = dir.path().join("images.yaml");
        write(&config_file, COMMON).unwrap();
        write(dir.path().join("overcloud-full.qcow2"), b"built").unwrap();

        let mut config = BuildConfig {
            config_files: vec![config_file],
            output_directory: dir.path().to_path_buf(),
            ..BuildConfig::default()
        };

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|inv| inv.args.iter().any(|a| a == "ironic-agent"))
            .times(1)
            .returning(|_| Ok(()));
        let report = DibImageBuilder::new(&runner).build(&config).unwrap();
        assert_eq!(report.built, vec!["ironic-python-agent"]);
        assert_eq!(report.skipped, vec!["overcloud-full"]);

        config.skip = false;
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(2).returning(|_| Ok(()));
        let report = DibImageBuilder::new(&runner).build(&config).unwrap();
        assert_eq!(report.built.len(), 2);
        assert!(report.skipped.is_empty());
    }

    #[test]
    fn unknown_image_filter_is_rejected() {
        let dir = tempdir().unwrap();
        let config_file = dir.path().join("images.yaml");
        write(&config_file, COMMON).unwrap();
        let config = BuildConfig {
            config_files: vec![config_file],
            output_directory: dir.path().to_path_buf(),
            images: Some(vec!["nope".into()]),
            ..BuildConfig::default()
        };
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();
        let err = DibImageBuilder::new(&runner).build(&config).unwrap_err();
        assert!(matches!(err, BuildError::UnknownImage(name) if name == "nope"));
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let err = load_definitions(&[PathBuf::from("/nonexistent/images.yaml")]).unwrap_err();
        assert!(matches!(err, BuildError::Read { .. }));
    }
}
