//! highd-hsm: roadway structure, traffic flow, AADT and HSM crash
//! predictions from highD recordings.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use tracing_subscriber::EnvFilter;

use highd_core::config::{self, Config};

mod pipeline;
mod report;

use pipeline::{RecordingOutputs, RecordingProcessor};

#[derive(Parser)]
#[command(
    name = "highd-hsm",
    version,
    about = "Estimate roadway structure, traffic flow and HSM crash predictions from highD recordings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every recording directory under DATA_ROOT
    EstimateAll {
        /// Directory containing one subdirectory per recording
        data_root: PathBuf,

        /// Output directory (one subdirectory per recording)
        out: PathBuf,

        #[command(flatten)]
        opts: EstimateArgs,
    },

    /// Process a single recording directory
    EstimateOne {
        /// Directory with recordingMeta.csv, tracksMeta.csv and tracks.csv
        recording_dir: PathBuf,

        /// Output directory
        out: PathBuf,

        #[command(flatten)]
        opts: EstimateArgs,
    },

    /// Write the default config file
    InitConfig {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,

        /// Config file path (default: ~/.highd-hsm/config.yaml)
        #[arg(long, env = "HIGHD_HSM_CONFIG")]
        config: Option<PathBuf>,

        /// Debug logging
        #[arg(short, long)]
        verbose: bool,
    },
}

/// Options shared by the estimate commands. Each one set here overrides
/// the config file.
#[derive(Args, Debug, Clone, Default)]
struct EstimateArgs {
    /// Area type (urban, rural)
    #[arg(long)]
    area: Option<String>,

    /// Facility type
    #[arg(long)]
    facility: Option<String>,

    /// Local calibration factor C
    #[arg(long)]
    calibration: Option<f64>,

    /// CMF for collision types without an override
    #[arg(long)]
    default_cmf: Option<f64>,

    /// Per collision type CMF, e.g. --cmf sv=0.9 (repeatable)
    #[arg(long = "cmf", value_name = "TYPE=VALUE", value_parser = parse_cmf)]
    cmf: Vec<(String, f64)>,

    /// AADT factor JSON (F_DOW, F_MOY, HOD_share)
    #[arg(long)]
    aadt_factors: Option<PathBuf>,

    /// Ignore temporal factors and expand hourly flow by 24 hours
    #[arg(long)]
    baseline_aadt: bool,

    /// SPF coefficient CSV
    #[arg(long)]
    coefficients: Option<PathBuf>,

    /// Severity distribution CSV
    #[arg(long)]
    severity: Option<PathBuf>,

    /// Skip report.md and report.html
    #[arg(long)]
    no_report: bool,

    /// Config file path (default: ~/.highd-hsm/config.yaml)
    #[arg(long, env = "HIGHD_HSM_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_cmf(s: &str) -> Result<(String, f64), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=VALUE, got '{s}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing collision type in '{s}'"));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("invalid CMF value in '{s}'"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("CMF must be a non-negative number, got {value}"));
    }
    Ok((key.to_string(), value))
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::EstimateAll {
            data_root,
            out,
            opts,
        } => {
            init_logging(opts.verbose);
            cmd_estimate_all(&data_root, &out, &opts);
        }
        Commands::EstimateOne {
            recording_dir,
            out,
            opts,
        } => {
            init_logging(opts.verbose);
            cmd_estimate_one(&recording_dir, &out, &opts);
        }
        Commands::InitConfig {
            force,
            config,
            verbose,
        } => {
            init_logging(verbose);
            cmd_init_config(config, force);
        }
    }
}

/// Log to stderr. `RUST_LOG` applies unless `-v` asks for debug output.
fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Config file, then command-line overrides.
fn effective_config(opts: &EstimateArgs) -> Config {
    let path = opts.config.clone().unwrap_or_else(config::config_file);
    let mut cfg = config::load_config(&path);
    apply_overrides(&mut cfg, opts);
    tracing::debug!(
        "config: facility={} area={} C={} reports={}",
        cfg.pipeline.facility,
        cfg.pipeline.area_type,
        cfg.hsm.calibration_factor,
        cfg.pipeline.output_reports
    );
    cfg
}

fn apply_overrides(cfg: &mut Config, opts: &EstimateArgs) {
    let pipeline = &mut cfg.pipeline;
    if let Some(area) = &opts.area {
        pipeline.area_type = highd_core::normalize_key(area);
    }
    if let Some(facility) = &opts.facility {
        pipeline.facility = highd_core::normalize_key(facility);
    }
    if opts.aadt_factors.is_some() {
        pipeline.aadt_factors_path = opts.aadt_factors.clone();
    }
    if opts.coefficients.is_some() {
        pipeline.coefficients_path = opts.coefficients.clone();
    }
    if opts.severity.is_some() {
        pipeline.severity_path = opts.severity.clone();
    }
    if opts.no_report {
        pipeline.output_reports = false;
    }

    let hsm = &mut cfg.hsm;
    if let Some(c) = opts.calibration {
        hsm.calibration_factor = c;
    }
    if let Some(cmf) = opts.default_cmf {
        hsm.default_cmf = cmf;
    }
    for (key, value) in &opts.cmf {
        hsm.set_cmf(key, *value);
    }
}

fn build_processor(opts: &EstimateArgs) -> RecordingProcessor {
    let cfg = effective_config(opts);
    let processor =
        RecordingProcessor::from_config(cfg.pipeline, cfg.hsm).unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        });
    if opts.baseline_aadt {
        processor.without_aadt_factors()
    } else {
        processor
    }
}

fn cmd_estimate_all(data_root: &Path, out: &Path, opts: &EstimateArgs) {
    let processor = build_processor(opts);
    let results = pipeline::process_all(data_root, out, &processor).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    println!();
    println!(
        "Processed {} recording(s) from {} ({}/{})",
        results.len(),
        data_root.display(),
        processor.pipeline().facility,
        processor.pipeline().area_type
    );
    println!("Output: {}", out.display());
    print_summary(&results);
}

fn cmd_estimate_one(recording_dir: &Path, out: &Path, opts: &EstimateArgs) {
    let processor = build_processor(opts);
    let outputs = processor.process(recording_dir, out).unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let name = recording_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| outputs.structure.recording_id.clone());
    println!();
    println!("Output: {}", out.display());
    print_summary(&[(name, outputs)]);
}

fn cmd_init_config(path: Option<PathBuf>, force: bool) {
    let path = path.unwrap_or_else(config::config_file);
    if path.exists() && !force {
        eprintln!(
            "Error: {} already exists (use --force to overwrite)",
            path.display()
        );
        std::process::exit(1);
    }

    match config::save_config(&Config::default(), &path) {
        Ok(written) => println!("{}", written.display()),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    }
}

fn print_summary(results: &[(String, RecordingOutputs)]) {
    println!();
    if results.is_empty() {
        println!("No recordings processed.");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec![
        "Recording",
        "Lanes",
        "Flow (veh/h)",
        "AADT",
        "Crashes/yr",
        "FI",
        "PDO",
        "Econ. loss (USD)",
    ]);

    for (name, outputs) in results {
        let prediction = &outputs.prediction;
        table.add_row(vec![
            Cell::new(name),
            Cell::new(outputs.structure.lane_count_total),
            Cell::new(report::format_number(outputs.flow.hourly_flow_total, 1)),
            Cell::new(report::format_number(outputs.aadt.aadt_total, 0)),
            Cell::new(format!("{:.3}", prediction.total_all_sev)),
            Cell::new(format!("{:.3}", prediction.total_fi)),
            Cell::new(format!("{:.3}", prediction.total_pdo)),
            Cell::new(report::format_number(prediction.economic_loss.total, 0)),
        ]);
    }

    println!("{table}");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
