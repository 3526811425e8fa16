use anyhow::Result;
use clap::Parser;
use log::info;

use tpcgeo::loader::{load_point_sources, load_points};
use tpcgeo::report::{DetectorSummary, PointReport, Report};
use tpcgeo::settings::{self, CliArgs};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let settings = settings::load_config(&args)?;
    info!("{}", settings);

    let geometry = settings.build_geometry()?;
    let config = settings.containment_config(&geometry)?;
    info!(
        "detector has {} modules of {} TPCs",
        geometry.num_modules(),
        geometry.num_tpcs_per_module()
    );

    let points = match &args.points {
        Some(path) => {
            let points = load_points(path)?;
            let sources = args
                .point_sources
                .as_deref()
                .map(load_point_sources)
                .transpose()?;
            info!("loaded {} points from {}", points.len(), path.display());
            Some(PointReport::new(
                &geometry,
                &config,
                &points,
                sources.as_deref(),
                settings.containment.allow_multi_module,
                args.target,
            )?)
        }
        None => None,
    };

    let report = Report {
        detector: DetectorSummary::new(&geometry),
        points,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
