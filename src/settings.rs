use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, ensure, Context, Result};
use clap::Parser;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::containment::{ContainmentConfig, ContainmentMode, Margin, RawMargin};
use crate::geometry::Geometry;

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
        [geometry]
        detector = "toy"

        [containment]
        margin = [1.0, 2.0, 3.0]
        cathode_margin = 0.5
        mode = "tpc"
    "#;

    #[test]
    fn parses_settings() {
        let settings = Settings::from_toml(TOML).unwrap();
        assert_eq!(settings.geometry.detector.as_deref(), Some("toy"));
        assert_eq!(settings.geometry.geometry_dir, PathBuf::from("geometry"));
        assert_eq!(settings.containment.margin, Margin::PerAxis([1.0, 2.0, 3.0]));
        assert_eq!(settings.containment.cathode_margin, Some(0.5));
        assert_eq!(settings.containment.mode, ContainmentMode::Tpc);
        assert!(!settings.containment.allow_multi_module);
    }

    #[test]
    fn rejects_bad_margin_and_mode() {
        let bad_margin = TOML.replace("[1.0, 2.0, 3.0]", "[1.0, 2.0]");
        assert!(Settings::from_toml(&bad_margin).is_err());

        let bad_mode = TOML.replace("\"tpc\"", "\"global\"");
        assert!(Settings::from_toml(&bad_mode).is_err());
    }

    #[test]
    fn needs_a_boundary_source() {
        let settings = Settings::from_toml(&TOML.replace("detector = \"toy\"", "")).unwrap();
        assert!(validate_config(&settings).is_err());
    }

    #[test]
    fn default_config_builds_toy_detector() {
        let settings = load_default_config().unwrap();
        let geometry = settings.build_geometry().unwrap();
        assert_eq!(geometry.num_modules(), 2);
        assert!(settings.containment_config(&geometry).is_ok());
    }

    #[test]
    fn margin_from_cli_values() {
        assert_eq!(margin_from_values(&[2.0]).unwrap(), Margin::Scalar(2.0));
        assert_eq!(
            margin_from_values(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            Margin::PerWall([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]])
        );
        assert!(margin_from_values(&[1.0, 2.0]).is_err());
    }
}

/// Runtime configuration for the application.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Settings {
    pub geometry: GeometrySettings,
    pub containment: ContainmentSettings,
}

/// Where the detector description comes from.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GeometrySettings {
    /// Name of a preset found in `geometry_dir`.
    pub detector: Option<String>,
    #[serde(default = "default_geometry_dir")]
    pub geometry_dir: PathBuf,
    /// Explicit boundary file, takes precedence over the preset.
    pub boundaries: Option<PathBuf>,
    pub sources: Option<PathBuf>,
    pub opdets: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ContainmentSettings {
    pub margin: Margin,
    pub cathode_margin: Option<f64>,
    #[serde(default = "default_mode")]
    pub mode: ContainmentMode,
    #[serde(default)]
    pub allow_multi_module: bool,
}

fn default_geometry_dir() -> PathBuf {
    PathBuf::from("geometry")
}

fn default_mode() -> ContainmentMode {
    ContainmentMode::Module
}

impl Settings {
    /// Parses settings from a TOML string, without validation.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(source, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Builds the geometry from explicit files if given, else from the preset.
    pub fn build_geometry(&self) -> Result<Geometry> {
        let g = &self.geometry;
        if let Some(boundaries) = &g.boundaries {
            return Geometry::from_files(boundaries, g.sources.as_deref(), g.opdets.as_deref())
                .with_context(|| format!("failed to build geometry from {}", boundaries.display()));
        }
        match &g.detector {
            Some(name) => Geometry::from_preset(name, &g.geometry_dir)
                .with_context(|| format!("failed to build geometry for detector `{}`", name)),
            None => bail!("must minimally provide a detector name or a boundary file"),
        }
    }

    /// Defines the containment volumes described by these settings.
    pub fn containment_config(&self, geometry: &Geometry) -> Result<ContainmentConfig> {
        let c = &self.containment;
        Ok(geometry.define_containment_volumes(c.margin, c.cathode_margin, c.mode)?)
    }

    /// Makes relative paths relative to `root`.
    fn resolve_paths(&mut self, root: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = root.join(&*p);
            }
        };
        resolve(&mut self.geometry.geometry_dir);
        for path in [
            &mut self.geometry.boundaries,
            &mut self.geometry.sources,
            &mut self.geometry.opdets,
        ]
        .into_iter()
        .flatten()
        {
            resolve(path);
        }
    }
}

/// Loads `config/default.toml` from the project root.
pub fn load_default_config() -> Result<Settings> {
    let root = retrieve_project_root()?;
    let default_config_file = root.join("config/default.toml");

    let mut config: Settings = Config::builder()
        .add_source(File::from(default_config_file).required(true))
        .build()
        .context("Error loading configuration")?
        .try_deserialize()
        .context("Error deserializing configuration")?;

    config.resolve_paths(&root);
    validate_config(&config)?;

    Ok(config)
}

/// Loads the configuration file, environment overrides (prefix `TPCGEO`)
/// and command-line overrides, in increasing order of precedence.
pub fn load_config(args: &CliArgs) -> Result<Settings> {
    let root = retrieve_project_root()?;

    let config_file = match &args.config {
        Some(path) => path.clone(),
        None => {
            // Check if local config exists, if not use default
            let local_config = root.join("config/local.toml");
            if local_config.exists() {
                log::info!("Using local configuration: {:?}", local_config);
                local_config
            } else {
                root.join("config/default.toml")
            }
        }
    };

    let mut config: Settings = Config::builder()
        .add_source(File::from(config_file.as_path()).required(true))
        .add_source(
            Environment::with_prefix("TPCGEO")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Error loading configuration {}", config_file.display()))?
        .try_deserialize()
        .context("Error deserializing configuration")?;

    if let Some(detector) = &args.detector {
        config.geometry.detector = Some(detector.clone());
    }
    if let Some(dir) = &args.geometry_dir {
        config.geometry.geometry_dir = dir.clone();
    }
    if let Some(boundaries) = &args.boundaries {
        config.geometry.boundaries = Some(boundaries.clone());
    }
    if let Some(sources) = &args.sources {
        config.geometry.sources = Some(sources.clone());
    }
    if let Some(opdets) = &args.opdets {
        config.geometry.opdets = Some(opdets.clone());
    }
    if let Some(margin) = &args.margin {
        config.containment.margin = margin_from_values(margin)?;
    }
    if let Some(cathode_margin) = args.cathode_margin {
        config.containment.cathode_margin = Some(cathode_margin);
    }
    if let Some(mode) = &args.mode {
        config.containment.mode = mode.parse()?;
    }
    if args.allow_multi_module {
        config.containment.allow_multi_module = true;
    }

    config.resolve_paths(&root);
    validate_config(&config)?;

    log::debug!("{:#?}", config);

    Ok(config)
}

/// Retrieve the project root directory.
/// This function tries to find the project root directory in different ways:
/// 1. If the CARGO_MANIFEST_DIR environment variable is set, use it.
/// 2. If the TPCGEO_ROOT_DIR environment variable is set, use it.
/// 3. If the "config" subdirectory is found in the executable directory or any of its parents, use it.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        // When running through cargo (e.g. cargo run, cargo test)
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("TPCGEO_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    // Fallback: walk upward from the executable directory
    let exe_path = env::current_exe().context("Failed to get current executable path")?;
    let mut current_dir = exe_path.parent();
    while let Some(dir) = current_dir {
        if dir.join("config").is_dir() {
            return Ok(dir.to_path_buf());
        }
        current_dir = dir.parent();
    }
    bail!("Could not find project root directory")
}

fn validate_config(config: &Settings) -> Result<()> {
    ensure!(
        config.geometry.detector.is_some() || config.geometry.boundaries.is_some(),
        "Must minimally provide a detector name or a boundary file"
    );
    if let Some(cathode_margin) = config.containment.cathode_margin {
        ensure!(
            cathode_margin >= 0.0,
            "Cathode margin must be non-negative, got {}",
            cathode_margin
        );
    }
    Ok(())
}

/// Interprets 1, 3 or 6 command-line values as a margin.
fn margin_from_values(values: &[f64]) -> Result<Margin> {
    let raw = match values {
        [m] => RawMargin::Scalar(*m),
        [_, _, _] => RawMargin::Flat(values.to_vec()),
        [_, _, _, _, _, _] => RawMargin::Nested(values.chunks(2).map(<[f64]>::to_vec).collect()),
        _ => bail!(
            "Margin takes 1, 3 or 6 values, got {}",
            values.len()
        ),
    };
    Ok(Margin::try_from(raw)?)
}

#[derive(Parser, Debug)]
#[command(version, about = "TPC detector geometry queries")]
pub struct CliArgs {
    /// Configuration file, defaults to config/local.toml or config/default.toml.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name of the detector preset.
    #[arg(short, long)]
    pub detector: Option<String>,

    /// Directory holding the detector presets.
    #[arg(long)]
    pub geometry_dir: Option<PathBuf>,

    /// Path to a (N_m, N_t, 3, 2) boundary file, overrides the preset.
    #[arg(long)]
    pub boundaries: Option<PathBuf>,

    /// Path to a (N_m, N_t, N_s, 2) sources file.
    #[arg(long)]
    pub sources: Option<PathBuf>,

    /// Path to a (N_m[, N_t], N_p, 3) optical detector file.
    #[arg(long)]
    pub opdets: Option<PathBuf>,

    /// Path to a (N, 3) point cloud to query.
    #[arg(short, long)]
    pub points: Option<PathBuf>,

    /// Path to the (N, 2) logical [module, tpc] source of each point.
    #[arg(long, requires = "points")]
    pub point_sources: Option<PathBuf>,

    /// Containment margin: one value for all walls, one per axis, or two per axis.
    #[arg(short, long, num_args = 1..=6, value_delimiter = ' ')]
    pub margin: Option<Vec<f64>>,

    /// Margin applied to the cathode walls instead.
    #[arg(long)]
    pub cathode_margin: Option<f64>,

    /// Containment mode: tpc, source, module or detector.
    #[arg(long)]
    pub mode: Option<String>,

    /// Allow point clouds to span several modules in source mode.
    #[arg(long)]
    pub allow_multi_module: bool,

    /// Move the point cloud into this module.
    #[arg(short, long, requires = "points")]
    pub target: Option<usize>,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Settings:
  - Detector: {}
  - Geometry Directory: {}
  - Containment Margin: {:?}
  - Cathode Margin: {:?}
  - Containment Mode: {}
  - Allow Multi Module: {}
  ",
            self.geometry.detector.as_deref().unwrap_or("-"),
            self.geometry.geometry_dir.display(),
            self.containment.margin.walls(),
            self.containment.cathode_margin,
            self.containment.mode,
            self.containment.allow_multi_module,
        )
    }
}
