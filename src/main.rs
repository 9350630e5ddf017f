//! Lens-session binary: resolve desired settings against a device's capabilities.
//!
//! Usage: `lens-session <capabilities.json | /dev/videoN> [desired.json]`

use std::path::Path;

use lens_session::device::JsonCapabilitySource;
use lens_session::error::CapabilityError;
use lens_session::partition::partition;
use lens_session::resolver::resolve_with_report;
use lens_session::validation::validate_capability_model;
use lens_session::{CapabilityModel, CapabilitySource, DesiredSettings};
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> lens_session::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(source) = args.next() else {
        eprintln!("Usage: lens-session <capabilities.json | /dev/videoN> [desired.json]");
        std::process::exit(2);
    };

    let caps = query_capabilities(&source)?;
    println!("Capabilities: {}", serde_json::to_string_pretty(&caps)?);
    for issue in validate_capability_model(&caps) {
        println!("Warning: {issue}");
    }

    let desired = match args.next() {
        Some(path) => {
            let json = std::fs::read_to_string(path).map_err(CapabilityError::from)?;
            DesiredSettings::from_json(&json)?
        }
        None => DesiredSettings::default(),
    };

    let resolution = resolve_with_report(desired, &caps)?;
    for adjustment in &resolution.adjustments {
        println!("Adjusted {adjustment}");
    }

    let (perpetual, transient) = partition(resolution.settings);
    println!("Perpetual: {}", serde_json::to_string_pretty(&perpetual)?);
    println!("Transient: {}", serde_json::to_string_pretty(&transient)?);
    Ok(())
}

fn query_capabilities(source: &str) -> lens_session::Result<CapabilityModel> {
    if let Some(index) = source
        .strip_prefix("/dev/video")
        .and_then(|index| index.parse::<usize>().ok())
    {
        return query_device(index);
    }
    Ok(JsonCapabilitySource::new(Path::new(source)).capabilities()?)
}

#[cfg(feature = "v4l2")]
fn query_device(index: usize) -> lens_session::Result<CapabilityModel> {
    use lens_session::device::V4L2CapabilitySource;
    use lens_session::LensId;

    Ok(V4L2CapabilitySource::new()
        .with_device(LensId::Back, index)
        .capabilities()?)
}

#[cfg(not(feature = "v4l2"))]
fn query_device(_index: usize) -> lens_session::Result<CapabilityModel> {
    Err(CapabilityError::BackendUnavailable("built without the v4l2 feature").into())
}
