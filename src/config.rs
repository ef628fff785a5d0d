use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::archive::loader::LoadSource;
use crate::geo::LatLon;
use crate::overlay::DEFAULT_REFERENCE_ID;
use crate::stream::StreamInput;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Offline tactical map: MBTiles basemap, live unit tracking and annotations", long_about = None)]
pub struct Cli {
    /// MBTiles archive to open at startup
    #[arg(long, env = "TAC_MAP_ARCHIVE", conflicts_with = "archive_url")]
    pub archive: Option<PathBuf>,
    /// Fetch the MBTiles archive over HTTP instead
    #[arg(long, env = "TAC_MAP_ARCHIVE_URL")]
    pub archive_url: Option<String>,
    /// Newline-delimited JSON unit stream; `-` for stdin
    #[arg(long, env = "TAC_MAP_STREAM")]
    pub stream: Option<String>,
    /// Recorded session to review
    #[arg(long, env = "TAC_MAP_REPLAY")]
    pub replay: Option<PathBuf>,
    /// Unit distances are measured from
    #[arg(long, default_value = DEFAULT_REFERENCE_ID)]
    pub reference_id: String,
    /// Braille dots per map tile edge
    #[arg(long, default_value_t = 64)]
    pub tile_size: u32,
    /// Minimum spacing between accepted stream messages
    #[arg(long, default_value_t = 100)]
    pub throttle_ms: u64,
    /// Quiet period before queued updates are applied
    #[arg(long, default_value_t = 50)]
    pub debounce_ms: u64,
    /// Queued updates applied per frame
    #[arg(long, default_value_t = 2)]
    pub batch_size: usize,
    /// Trail length cap per unit, 0 for unlimited
    #[arg(long, default_value_t = 0)]
    pub max_trail_points: usize,
    /// Where annotation exports are written
    #[arg(long, default_value = ".")]
    pub export_dir: PathBuf,
    #[arg(long, default_value_t = 28.5471399, allow_negative_numbers = true)]
    pub center_lat: f64,
    #[arg(long, default_value_t = 77.1945754, allow_negative_numbers = true)]
    pub center_lon: f64,
    #[arg(long, default_value_t = 15.0, value_parser = finite_zoom)]
    pub zoom: f64,
    #[arg(long, default_value_t = 10.0, value_parser = finite_zoom)]
    pub min_zoom: f64,
    #[arg(long, default_value_t = 21.0, value_parser = finite_zoom)]
    pub max_zoom: f64,
    /// Also write the full log here
    #[arg(long, env = "TAC_MAP_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

/// Parse a zoom level, rejecting NaN and infinities
fn finite_zoom(s: &str) -> Result<f64, String> {
    let z: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if z.is_finite() {
        Ok(z)
    } else {
        Err(format!("`{s}` is not a finite zoom level"))
    }
}

/// Resolved viewer settings
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub archive: Option<LoadSource>,
    pub stream: Option<StreamInput>,
    pub replay: Option<PathBuf>,
    pub reference_id: String,
    pub tile_size: f64,
    pub throttle: Duration,
    pub debounce: Duration,
    pub batch_size: usize,
    pub max_trail_points: usize,
    pub export_dir: PathBuf,
    pub center: LatLon,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Zoom cap used by fit-to-bounds
    pub fit_max_zoom: f64,
    pub fit_padding_px: f64,
    /// Decoded tiles kept in memory
    pub tile_cache: usize,
    /// Output pixels per braille dot in PNG exports
    pub export_scale: f64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            archive: None,
            stream: None,
            replay: None,
            reference_id: DEFAULT_REFERENCE_ID.to_owned(),
            tile_size: 64.0,
            throttle: Duration::from_millis(100),
            debounce: Duration::from_millis(50),
            batch_size: 2,
            max_trail_points: 0,
            export_dir: PathBuf::from("."),
            center: LatLon::new(28.5471399, 77.1945754),
            zoom: 15.0,
            min_zoom: 10.0,
            max_zoom: 21.0,
            fit_max_zoom: 18.0,
            fit_padding_px: 20.0,
            tile_cache: 512,
            export_scale: 4.0,
        }
    }
}

impl From<Cli> for ViewerConfig {
    fn from(cli: Cli) -> Self {
        let archive = match (cli.archive, cli.archive_url) {
            (Some(path), _) => Some(LoadSource::File(path)),
            (None, Some(url)) => Some(LoadSource::Url(url)),
            (None, None) => None,
        };
        let max_zoom = cli.max_zoom.clamp(0.0, 21.0);
        Self {
            archive,
            stream: cli.stream.as_deref().map(StreamInput::from_arg),
            replay: cli.replay,
            reference_id: cli.reference_id,
            tile_size: f64::from(cli.tile_size.max(8)),
            throttle: Duration::from_millis(cli.throttle_ms),
            debounce: Duration::from_millis(cli.debounce_ms),
            batch_size: cli.batch_size.max(1),
            max_trail_points: cli.max_trail_points,
            export_dir: cli.export_dir,
            center: LatLon::new(cli.center_lat, cli.center_lon),
            zoom: cli.zoom.clamp(cli.min_zoom.min(max_zoom), max_zoom),
            min_zoom: cli.min_zoom.clamp(0.0, max_zoom),
            max_zoom,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ViewerConfig::from(Cli::parse_from(["tac-map"]));
        assert!(cfg.archive.is_none());
        assert_eq!(cfg.reference_id, "1");
        assert_eq!(cfg.throttle, Duration::from_millis(100));
        assert_eq!(cfg.debounce, Duration::from_millis(50));
        assert_eq!(cfg.batch_size, 2);
        assert_eq!(cfg.center, LatLon::new(28.5471399, 77.1945754));
        assert_eq!((cfg.min_zoom, cfg.zoom, cfg.max_zoom), (10.0, 15.0, 21.0));
    }

    #[test]
    fn test_sources_and_limits() {
        let cfg = ViewerConfig::from(Cli::parse_from([
            "tac-map",
            "--archive-url",
            "http://localhost/range.mbtiles",
            "--stream",
            "-",
            "--center-lon=-3.5",
            "--zoom",
            "30",
            "--batch-size",
            "0",
        ]));
        assert_eq!(cfg.archive, Some(LoadSource::Url("http://localhost/range.mbtiles".into())));
        assert_eq!(cfg.stream, Some(StreamInput::Stdin));
        assert_eq!(cfg.center.lon, -3.5);
        assert_eq!(cfg.zoom, 21.0);
        assert_eq!(cfg.batch_size, 1);
    }

    #[test]
    fn test_non_finite_zoom_rejected() {
        assert!(Cli::try_parse_from(["tac-map", "--max-zoom", "NaN"]).is_err());
        assert!(Cli::try_parse_from(["tac-map", "--zoom", "inf"]).is_err());
        let cli = Cli::try_parse_from(["tac-map", "--min-zoom", "12.5"]).unwrap();
        assert_eq!(cli.min_zoom, 12.5);
    }

    #[test]
    fn test_archive_flags_conflict() {
        let res = Cli::try_parse_from(["tac-map", "--archive", "a.mbtiles", "--archive-url", "http://x"]);
        assert!(res.is_err());
    }
}
