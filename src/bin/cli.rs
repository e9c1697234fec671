use anyhow::{anyhow, bail, Context};
use lensaf::focus::{select_step_size, FailurePolicy, ResultSink, PRESET_STEP_SIZES};
use lensaf::lens::{DriveTiming, EvfStepDriver};
use lensaf::report::LogOnlySink;
use lensaf::testing::{OpticsModel, SimulatedLens, SimulatedSampler, StarFieldSpec};
use lensaf::{
    AutofocusRunner, CameraInfo, JsonReportSink, LensAfConfig, MetricKind, SearchResult,
    SearchStrategy,
};
use std::env;
use std::path::PathBuf;

const USAGE: &str = "Usage: lensaf-cli <command> [args]

Commands:
  simulate [--config <file>] [--strategy bracket|backtrack] [--metric hfr|contrast]
           [--iterations <n>] [--step <index>] [--focus <position>] [--noise <adu>]
           [--probe] [--return-to-best] [--realtime] [--report-dir <dir>] [--no-report] [--json]
  profiles [--config <file>] [--json]
  config show [--config <file>]
  config init [<file>]";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    lensaf::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "simulate" => cmd_simulate(&args).await,
        "profiles" => cmd_profiles(&args),
        "config" => cmd_config(&args),
        "--version" | "version" => {
            let info = lensaf::get_info();
            println!("{} {}", info.name, info.version);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("{}", USAGE);
            std::process::exit(1);
        }
    }
}

/// Value following `flag`, if present
fn flag_value<'a>(args: &'a [String], flag: &str) -> anyhow::Result<Option<&'a str>> {
    match args.iter().position(|a| a == flag) {
        Some(i) => args
            .get(i + 1)
            .map(|v| Some(v.as_str()))
            .ok_or_else(|| anyhow!("{} requires a value", flag)),
        None => Ok(None),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn load_config(args: &[String]) -> anyhow::Result<LensAfConfig> {
    let config = match flag_value(args, "--config")? {
        Some(path) => LensAfConfig::load_layered(path)
            .with_context(|| format!("loading configuration from {}", path))?,
        None => LensAfConfig::load_or_default(),
    };
    Ok(config)
}

fn parse_strategy(s: &str) -> anyhow::Result<SearchStrategy> {
    match s {
        "bracket" => Ok(SearchStrategy::CalibrateThenBracket),
        "backtrack" | "sample-all" => Ok(SearchStrategy::CalibrateThenSampleAllThenBacktrack),
        _ => bail!("Unknown strategy: {} (expected bracket or backtrack)", s),
    }
}

fn parse_metric(s: &str) -> anyhow::Result<MetricKind> {
    match s {
        "hfr" => Ok(MetricKind::Hfr),
        "contrast" => Ok(MetricKind::Contrast),
        _ => bail!("Unknown metric: {} (expected hfr or contrast)", s),
    }
}

async fn cmd_simulate(args: &[String]) -> anyhow::Result<()> {
    let mut config = load_config(args)?;

    if let Some(s) = flag_value(args, "--strategy")? {
        config.autofocus.strategy = parse_strategy(s)?;
    }
    if let Some(s) = flag_value(args, "--metric")? {
        config.autofocus.metric = parse_metric(s)?;
    }
    if let Some(n) = flag_value(args, "--iterations")? {
        config.autofocus.max_iterations = n.parse().context("--iterations")?;
    }
    if let Some(n) = flag_value(args, "--step")? {
        config.step.selected_index = n.parse().context("--step")?;
    }
    if has_flag(args, "--probe") {
        config.autofocus.probe_direction = true;
    }
    if has_flag(args, "--return-to-best") {
        config.autofocus.failure_policy = FailurePolicy::ReturnToBest;
    }
    if let Some(dir) = flag_value(args, "--report-dir")? {
        config.report.directory = Some(PathBuf::from(dir));
    }
    config.validate()?;

    let mut optics = OpticsModel::default();
    if let Some(p) = flag_value(args, "--focus")? {
        optics.focus_position = p.parse().context("--focus")?;
    }
    let mut field = StarFieldSpec::default();
    if let Some(n) = flag_value(args, "--noise")? {
        field.noise = n.parse().context("--noise")?;
    }

    let timing = if has_flag(args, "--realtime") {
        config.drive_timing()
    } else {
        DriveTiming {
            calibration_moves: config.lens.calibration_moves,
            ..DriveTiming::immediate()
        }
    };

    let lens = SimulatedLens::default();
    let driver = EvfStepDriver::new(lens.clone(), timing);
    let sampler = SimulatedSampler::new(lens.clone(), optics)
        .with_field(field)
        .with_sensitivity(config.autofocus.star_sensitivity);

    let sink: Box<dyn ResultSink + Send> = if has_flag(args, "--no-report") || !config.report.enabled {
        Box::new(LogOnlySink)
    } else {
        let info = CameraInfo {
            lens_name: Some("Simulated lens".to_string()),
            camera_name: Some("lensaf simulator".to_string()),
            firmware: Some(lensaf::VERSION.to_string()),
        };
        Box::new(JsonReportSink::new(config.report_directory(), info))
    };

    let runner = AutofocusRunner::new();
    let handle = runner.clone();
    ctrlc::set_handler(move || {
        if !handle.abort() {
            std::process::exit(130);
        }
    })?;

    let search = config.search_configuration()?;
    let result = runner.run(search, driver, sampler, sink).await?;

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result, config.autofocus.metric, &lens, &optics);
    }
    Ok(())
}

fn print_result(result: &SearchResult, metric: MetricKind, lens: &SimulatedLens, optics: &OpticsModel) {
    for sample in &result.samples {
        println!(
            "  #{:<3} offset {:>3}  {} {:.3}",
            sample.iteration,
            sample.offset,
            metric.label(),
            sample.metric
        );
    }
    println!(
        "{} after {} samples in {:.2}s (step {})",
        if result.succeeded { "Focused" } else { "Not focused" },
        result.samples.len(),
        result.elapsed.as_secs_f64(),
        result.step_size_description
    );
    if let Some(best) = result.best_sample() {
        println!("Best sample: #{} {} {:.3}", best.iteration, metric.label(), best.metric);
    }
    println!(
        "Lens position {} (true focus {})",
        lens.position(),
        optics.focus_position
    );
}

fn cmd_profiles(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args)?;
    let count = PRESET_STEP_SIZES.len() as u32 + 2;
    let profiles = (0..count)
        .map(|i| select_step_size(i, &config.step.custom).map(|s| (i, s)))
        .collect::<Result<Vec<_>, _>>()?;

    if has_flag(args, "--json") {
        println!("{}", serde_json::to_string(&profiles)?);
    } else {
        for (index, step) in profiles {
            let marker = if index == config.step.selected_index { "*" } else { " " };
            let kind = if index as usize >= PRESET_STEP_SIZES.len() { "custom" } else { "preset" };
            println!("{} {}: {} ({})", marker, index, step, kind);
        }
    }
    Ok(())
}

fn cmd_config(args: &[String]) -> anyhow::Result<()> {
    match args.get(2).map(String::as_str) {
        Some("show") => {
            let config = load_config(args)?;
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Some("init") => {
            let path = args
                .get(3)
                .map(PathBuf::from)
                .unwrap_or_else(LensAfConfig::default_path);
            if path.exists() {
                bail!("{:?} already exists", path);
            }
            LensAfConfig::default().save_to_file(&path)?;
            println!("Wrote {:?}", path);
            Ok(())
        }
        _ => {
            eprintln!("Usage: lensaf-cli config show|init");
            std::process::exit(1);
        }
    }
}
