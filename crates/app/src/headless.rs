use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use procgraph_core::{
    presets, sample_grid, sample_grid_parallel, Columns, CompEnv, Plan, SampleSettings,
};
use serde::Serialize;

#[derive(Debug, Default, PartialEq)]
pub(crate) struct RunArgs {
    plan_path: Option<PathBuf>,
    preset: Option<String>,
    segments: Option<[u32; 2]>,
    wrap_x: bool,
    wrap_y: bool,
    parallel: bool,
    seed: Option<u64>,
    out_path: Option<PathBuf>,
    print: bool,
    pub(crate) verbose: bool,
}

#[derive(Serialize)]
struct SampleOutput<'a> {
    settings: &'a SampleSettings,
    #[serde(flatten)]
    columns: &'a Columns,
}

pub(crate) fn parse_args(args: &[String]) -> Result<RunArgs, String> {
    let mut parsed = RunArgs::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--plan" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--plan requires a path".to_string())?;
                parsed.plan_path = Some(PathBuf::from(value));
            }
            "--preset" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--preset requires a name".to_string())?;
                parsed.preset = Some(value.clone());
            }
            "--segments" => {
                let x = parse_value("--segments", iter.next())?;
                let y = parse_value("--segments", iter.next())?;
                parsed.segments = Some([x, y]);
            }
            "--wrap-x" => parsed.wrap_x = true,
            "--wrap-y" => parsed.wrap_y = true,
            "--parallel" => parsed.parallel = true,
            "--seed" => parsed.seed = Some(parse_value("--seed", iter.next())?),
            "--out" => {
                let value = iter
                    .next()
                    .ok_or_else(|| "--out requires a path".to_string())?;
                parsed.out_path = Some(PathBuf::from(value));
            }
            "--print" => parsed.print = true,
            "--verbose" | "-v" => parsed.verbose = true,
            "--help" | "-h" => {
                print_help();
                process::exit(0);
            }
            other => return Err(format!("unknown argument '{other}'")),
        }
    }

    Ok(parsed)
}

fn parse_value<T: FromStr>(flag: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{flag} requires a value"))?;
    value
        .parse()
        .map_err(|_| format!("{flag}: invalid value '{value}'"))
}

pub(crate) fn print_help() {
    println!(
        "Usage: procgraph [options]\n  --plan <path>\n  --preset <{}>\n  --segments <x> <y>\n  --wrap-x\n  --wrap-y\n  --parallel\n  --seed <n>\n  --out <path>\n  --print\n  --verbose",
        presets::PRESET_NAMES.join("|")
    );
}

/// Loads the environment, samples it and writes the columns as JSON to
/// `--out` and/or stdout.
pub(crate) fn run(args: &RunArgs) -> Result<(), String> {
    let (mut env, mut settings) = load_environment(args)?;
    apply_overrides(&mut settings, args);
    tracing::info!(
        "sampling {:?} segments for outputs {:?}",
        settings.segments,
        env.outputs()
    );

    let columns = if args.parallel {
        sample_grid_parallel(&env, &settings, args.seed.unwrap_or_default())
    } else {
        sample_grid(&mut env, &settings)
    }
    .map_err(|err| format!("sampling failed: {err}"))?;

    let output = SampleOutput {
        settings: &settings,
        columns: &columns,
    };
    let json = serde_json::to_string_pretty(&output).map_err(|err| err.to_string())?;

    if let Some(path) = &args.out_path {
        std::fs::write(path, &json).map_err(|err| format!("{}: {err}", path.display()))?;
        tracing::info!("wrote {} vertices to {:?}", columns.vertex_count, path);
    }
    if args.print || args.out_path.is_none() {
        println!("{json}");
    }

    tracing::info!("completed");
    Ok(())
}

fn load_environment(args: &RunArgs) -> Result<(CompEnv, SampleSettings), String> {
    match (&args.plan_path, &args.preset) {
        (Some(_), Some(_)) => Err("use either --plan or --preset, not both".to_string()),
        (Some(path), None) => {
            let plan = load_plan(path)?;
            let env = plan.build().map_err(|err| err.to_string())?;
            // Plan seeds are fixed per node; --seed derives a new set.
            let env = match args.seed {
                Some(seed) => env.fork(seed),
                None => env,
            };
            Ok((env, plan.settings))
        }
        (None, preset) => {
            let name = preset.as_deref().unwrap_or("bark");
            let env = presets::by_name(name, args.seed)
                .ok_or_else(|| format!("unknown preset '{name}'"))?
                .map_err(|err| err.to_string())?;
            let settings = SampleSettings {
                wrap_x: true,
                ..Default::default()
            };
            Ok((env, settings))
        }
    }
}

fn load_plan(path: &Path) -> Result<Plan, String> {
    let data = std::fs::read_to_string(path).map_err(|err| format!("{}: {err}", path.display()))?;
    Plan::from_json(&data).map_err(|err| err.to_string())
}

fn apply_overrides(settings: &mut SampleSettings, args: &RunArgs) {
    if let Some(segments) = args.segments {
        settings.segments = segments;
    }
    settings.wrap_x |= args.wrap_x;
    settings.wrap_y |= args.wrap_y;
}
