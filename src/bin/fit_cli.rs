//! Command-line runner for the built-in fitting scenarios.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bspline_fitter::geom::{
    CurveFitOptions, FitJob, FitResult, Point3, SurfaceFitOptions, fit_batch,
    fit_curve_with_progress, fit_surface_with_progress,
};
use serde::Serialize;

const USAGE: &str = r#"fit_cli (bspline-fitter)

USAGE:
  fit_cli list
  fit_cli run <scenario|all> [options]

SCENARIOS:
  line_curve
  arc_curve
  helix_curve
  planar_surface
  saddle_surface

OPTIONS (run):
  --progress         Print one line per LM iteration to stderr
  --json <path>      Write the fitted results as JSON
  --max-iter <N>     Iteration cap (default 100)
  --smooth <S>       Initial smoothing weight in [0, 1]
  --overwrite        Overwrite an existing JSON file
  -h, --help         Show this help
"#;

fn main() {
    if let Err(err) = run() {
        eprintln!("fit_cli error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut args = Args::new(args);

    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    match command.as_str() {
        "list" => {
            for scenario in Scenario::ALL {
                println!("{}", scenario.name());
            }
            Ok(())
        }
        "run" => cmd_run(&mut args),
        "-h" | "--help" | "help" => {
            print_usage();
            Ok(())
        }
        other => Err(format!("unknown command `{other}`\n\n{USAGE}")),
    }
}

fn print_usage() {
    println!("{USAGE}");
}

#[derive(Debug, Clone, Copy)]
struct RunSettings {
    progress: bool,
    max_iterations: Option<usize>,
    smoothing: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    scenario: &'static str,
    result: FitResult,
}

fn cmd_run(args: &mut Args) -> Result<(), String> {
    let scenario_name = args.next().ok_or("missing scenario name")?;

    let mut json_path: Option<PathBuf> = None;
    let mut overwrite = false;
    let mut settings = RunSettings {
        progress: false,
        max_iterations: None,
        smoothing: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--progress" => settings.progress = true,
            "--json" => json_path = Some(PathBuf::from(args.value("--json")?)),
            "--max-iter" => {
                let raw = args.value("--max-iter")?;
                let n = raw
                    .parse::<usize>()
                    .map_err(|e| format!("invalid --max-iter `{raw}`: {e}"))?;
                settings.max_iterations = Some(n);
            }
            "--smooth" => {
                let raw = args.value("--smooth")?;
                let s = raw
                    .parse::<f64>()
                    .map_err(|e| format!("invalid --smooth `{raw}`: {e}"))?;
                settings.smoothing = Some(s);
            }
            "--overwrite" => overwrite = true,
            "-h" | "--help" => {
                print_usage();
                return Ok(());
            }
            other => return Err(format!("unknown option `{other}`\n\n{USAGE}")),
        }
    }

    let scenarios: Vec<Scenario> = if scenario_name == "all" {
        Scenario::ALL.to_vec()
    } else {
        vec![Scenario::from_name(&scenario_name).ok_or_else(|| unknown_scenario(&scenario_name))?]
    };

    let jobs: Vec<FitJob> = scenarios.iter().map(|s| s.job(settings)).collect();
    let results = if settings.progress || jobs.len() == 1 {
        jobs.iter()
            .zip(&scenarios)
            .map(|(job, scenario)| run_with_progress(*scenario, job, settings.progress))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        let workers = std::thread::available_parallelism().map_or(1, |n| n.get());
        fit_batch(&jobs, workers)
            .into_iter()
            .zip(&scenarios)
            .map(|(outcome, scenario)| outcome.map_err(|e| format!("{}: {e}", scenario.name())))
            .collect::<Result<Vec<_>, _>>()?
    };

    let reports: Vec<ScenarioReport> = scenarios
        .iter()
        .zip(results)
        .map(|(scenario, result)| ScenarioReport {
            scenario: scenario.name(),
            result,
        })
        .collect();

    for report in &reports {
        println!("{}", summary_line(report));
    }

    if let Some(path) = json_path.as_deref() {
        write_json(path, &reports, overwrite)?;
        eprintln!("wrote {}", path.display());
    }

    Ok(())
}

fn run_with_progress(
    scenario: Scenario,
    job: &FitJob,
    progress: bool,
) -> Result<FitResult, String> {
    let mut stderr = io::stderr().lock();
    let sink: Option<&mut dyn Write> = if progress {
        let _ = writeln!(stderr, "== {}", scenario.name());
        Some(&mut stderr as &mut dyn Write)
    } else {
        None
    };

    let result = match job {
        FitJob::Curve {
            cloud,
            control_points,
            options,
        } => fit_curve_with_progress(cloud, control_points, *options, sink).map(FitResult::Curve),
        FitJob::Surface {
            cloud,
            nu,
            nv,
            control_points,
            options,
        } => fit_surface_with_progress(cloud, *nu, *nv, control_points, *options, sink)
            .map(FitResult::Surface),
    };
    result.map_err(|e| format!("{}: {e}", scenario.name()))
}

fn summary_line(report: &ScenarioReport) -> String {
    let diagnostics = match &report.result {
        FitResult::Curve(fit) => fit.diagnostics.summary(),
        FitResult::Surface(fit) => fit.diagnostics.summary(),
    };
    let detail = match &report.result {
        FitResult::Curve(fit) => format!(
            "cps={} dotmin={:.4} nmin={}",
            fit.control_points.len(),
            fit.min_polygon_dot,
            fit.min_points_per_span
        ),
        FitResult::Surface(fit) => {
            format!("grid={}x{} nmin={}", fit.nu, fit.nv, fit.min_points_per_cell)
        }
    };
    format!(
        "{}: rms={:.6e} max={:.6e} iterations={} {detail} | {diagnostics}",
        report.scenario,
        report.result.rms_error(),
        report.result.max_error(),
        report.result.iterations(),
    )
}

fn write_json(path: &Path, reports: &[ScenarioReport], overwrite: bool) -> Result<(), String> {
    if path.exists() && !overwrite {
        return Err(format!(
            "refusing to overwrite existing file {} (use --overwrite)",
            path.display()
        ));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("create dir {}: {e}", parent.display()))?;
    }
    let text = serde_json::to_string_pretty(reports).map_err(|e| format!("encode json: {e}"))?;
    fs::write(path, format!("{text}\n")).map_err(|e| format!("write {}: {e}", path.display()))
}

fn unknown_scenario(name: &str) -> String {
    let mut msg = format!("unknown scenario `{name}`\n\navailable scenarios:\n");
    for scenario in Scenario::ALL {
        msg.push_str("  ");
        msg.push_str(scenario.name());
        msg.push('\n');
    }
    msg
}

// ============================================================================
// Scenarios
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scenario {
    LineCurve,
    ArcCurve,
    HelixCurve,
    PlanarSurface,
    SaddleSurface,
}

impl Scenario {
    const ALL: &'static [Scenario] = &[
        Scenario::LineCurve,
        Scenario::ArcCurve,
        Scenario::HelixCurve,
        Scenario::PlanarSurface,
        Scenario::SaddleSurface,
    ];

    fn name(self) -> &'static str {
        match self {
            Scenario::LineCurve => "line_curve",
            Scenario::ArcCurve => "arc_curve",
            Scenario::HelixCurve => "helix_curve",
            Scenario::PlanarSurface => "planar_surface",
            Scenario::SaddleSurface => "saddle_surface",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    fn job(self, settings: RunSettings) -> FitJob {
        match self {
            Scenario::LineCurve => {
                let cloud: Vec<Point3> =
                    (0..=10).map(|k| Point3::new(f64::from(k), 0.0, 0.0)).collect();
                curve_job(cloud, 5, 0.0, settings)
            }
            Scenario::ArcCurve => {
                let cloud: Vec<Point3> = (0..40)
                    .map(|k| {
                        let a = std::f64::consts::PI * f64::from(k) / 39.0;
                        Point3::new(2.0 * a.cos(), 2.0 * a.sin(), 0.0)
                    })
                    .collect();
                curve_job(cloud, 7, 0.05, settings)
            }
            Scenario::HelixCurve => {
                let cloud: Vec<Point3> = (0..80)
                    .map(|k| {
                        let a = 4.0 * std::f64::consts::PI * f64::from(k) / 79.0;
                        Point3::new(a.cos(), a.sin(), 0.1 * a)
                    })
                    .collect();
                curve_job(cloud, 14, 0.1, settings)
            }
            Scenario::PlanarSurface => surface_job(5, 5, 5, 0.1, settings, |_, _| 0.0),
            Scenario::SaddleSurface => surface_job(12, 6, 6, 0.05, settings, |x, y| {
                (x - 0.5) * (x - 0.5) - (y - 0.5) * (y - 0.5)
            }),
        }
    }
}

fn curve_job(cloud: Vec<Point3>, n: usize, smoothing: f64, settings: RunSettings) -> FitJob {
    let mut control_points = vec![Point3::ORIGIN; n];
    control_points[0] = cloud[0];
    control_points[n - 1] = cloud[cloud.len() - 1];
    let mut options =
        CurveFitOptions::ordered().with_smoothing(settings.smoothing.unwrap_or(smoothing));
    if let Some(max) = settings.max_iterations {
        options = options.with_max_iterations(max);
    }
    FitJob::Curve {
        cloud,
        control_points,
        options,
    }
}

fn surface_job(
    samples: u32,
    nu: usize,
    nv: usize,
    smoothing: f64,
    settings: RunSettings,
    height: impl Fn(f64, f64) -> f64,
) -> FitJob {
    let step = f64::from(samples - 1);
    let mut cloud = Vec::new();
    for j in 0..samples {
        for i in 0..samples {
            let (x, y) = (f64::from(i) / step, f64::from(j) / step);
            cloud.push(Point3::new(x, y, height(x, y)));
        }
    }
    let mut control_points = vec![Point3::ORIGIN; nu * nv];
    for j in 0..nv {
        for i in 0..nu {
            if i == 0 || j == 0 || i == nu - 1 || j == nv - 1 {
                let x = i as f64 / (nu - 1) as f64;
                let y = j as f64 / (nv - 1) as f64;
                control_points[i + nu * j] = Point3::new(x, y, height(x, y));
            }
        }
    }
    let mut options =
        SurfaceFitOptions::default().with_smoothing(settings.smoothing.unwrap_or(smoothing));
    if let Some(max) = settings.max_iterations {
        options = options.with_max_iterations(max);
    }
    FitJob::Surface {
        cloud,
        nu,
        nv,
        control_points,
        options,
    }
}

struct Args {
    args: Vec<String>,
    pos: usize,
}

impl Args {
    fn new(args: Vec<String>) -> Self {
        Self { args, pos: 0 }
    }

    fn next(&mut self) -> Option<String> {
        let arg = self.args.get(self.pos)?.clone();
        self.pos += 1;
        Some(arg)
    }

    fn value(&mut self, flag: &str) -> Result<String, String> {
        self.next().ok_or_else(|| format!("missing value for {flag}"))
    }
}
