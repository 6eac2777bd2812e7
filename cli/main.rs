#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::Parser;
use env_logger::Env;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;

use irt_calibrate::calibrate::ability::Initialization;
use irt_calibrate::calibrate::data::{load_examinees, load_item_placements};
use irt_calibrate::calibrate::estimate::{CalibrationObserver, IterationReport, calibrate};
use irt_calibrate::calibrate::layout::AreaLayout;
use irt_calibrate::calibrate::matrix::MatrixBuilder;
use irt_calibrate::calibrate::model::CalibrationConfig;

#[derive(Parser)]
#[command(
    name = "irt-calibrate",
    version,
    about = "Calibrate 3PL item parameters (c = 0.2) and examinee proficiency by alternating logistic regressions"
)]
struct Cli {
    /// Items table: semicolon-separated CO_PROVA, CO_POSICAO, CO_ITEM, SG_AREA[, TP_LINGUA]
    items: PathBuf,

    /// Examinee microdata: semicolon-separated, one row per examinee
    microdata: PathBuf,

    /// TOML file with calibration settings; flags below take precedence
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Knowledge areas to calibrate, comma separated (default: MT,CH,CN,LC)
    #[arg(long, value_delimiter = ',', value_name = "AREA")]
    areas: Option<Vec<String>>,

    /// Number of item/ability passes
    #[arg(long, value_name = "N")]
    iterations: Option<usize>,

    /// Step of the damped ability update, in (0, 1]
    #[arg(long)]
    damping: Option<f64>,

    /// Inverse L2 regularization strength C of both logistic fits
    #[arg(long, value_name = "C")]
    inverse_regularization: Option<f64>,

    /// Read at most this many microdata rows
    #[arg(long, value_name = "N")]
    max_rows: Option<usize>,

    /// Highest form code treated as a standard form
    #[arg(long, value_name = "CODE")]
    max_standard_form: Option<i64>,

    /// Answer character meaning "not administered"
    #[arg(long, value_name = "CHAR")]
    no_answer: Option<char>,
}

impl Cli {
    /// File settings first, then command-line overrides.
    fn resolve_config(&self) -> Result<CalibrationConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => CalibrationConfig::load(path)?,
            None => CalibrationConfig::default(),
        };
        if let Some(areas) = &self.areas {
            config.areas = areas.iter().map(|a| a.trim().to_uppercase()).collect();
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(damping) = self.damping {
            config.damping = damping;
        }
        if let Some(c) = self.inverse_regularization {
            config.solver.inverse_regularization = c;
        }
        if let Some(max_rows) = self.max_rows {
            config.max_rows = Some(max_rows);
        }
        if let Some(max_standard_form) = self.max_standard_form {
            config.max_standard_form = max_standard_form;
        }
        if let Some(no_answer) = self.no_answer {
            config.no_answer = no_answer;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Prints the per-area report to stdout as the passes complete.
struct AreaReporter;

impl CalibrationObserver for AreaReporter {
    fn on_start(&mut self, initialization: &Initialization, target_mean: f64, target_sd: f64) {
        println!("  Ground-truth score mean      = {target_mean:10.4}");
        println!("  Ground-truth score stddev    = {target_sd:10.4}\n");
        println!("  Correct count mean           = {:10.4}", initialization.raw_mean);
        println!("  Correct count stddev         = {:10.4}\n", initialization.raw_sd);
        if initialization.zero_variance {
            println!("  (all examinees share one correct count; abilities start at 0)\n");
        }
    }

    fn on_iteration(&mut self, report: &IterationReport) {
        let log_likelihood = report
            .log_likelihood
            .map_or_else(|| "n/a".to_string(), |ll| format!("{ll:.4}"));
        println!(
            "  Iteration {:3}: RMSE = {:8.3}  R2 = {:6.3}  mean logL = {}  degenerate items = {}  kept abilities = {}  not converged = {}",
            report.iteration,
            report.fit.rmse,
            report.fit.r2,
            log_likelihood,
            report.items.degenerate() + report.items.empty,
            report.abilities.degenerate() + report.abilities.empty,
            report.items.not_converged + report.abilities.not_converged
        );
    }
}

fn run_area(
    area: &str,
    items: &Path,
    microdata: &Path,
    config: &CalibrationConfig,
) -> Result<(), Box<dyn Error>> {
    let placements = load_item_placements(items, area, config.max_standard_form)?;
    let layout = AreaLayout::from_placements(&placements)?;
    let table = load_examinees(microdata, area, layout.has_variants(), config)?;
    let built = MatrixBuilder::new(&layout)
        .with_no_answer(config.no_answer)
        .build(&table.records);

    println!(
        "  Participants                 = {} ({} items, {} forms)",
        built.matrix.n_examinees(),
        built.matrix.n_items(),
        layout.forms().count()
    );
    if built.summary.malformed_rows > 0 || built.summary.excluded_examinees > 0 {
        println!(
            "  Skipped                      = {} malformed rows, {} without responses",
            built.summary.malformed_rows, built.summary.excluded_examinees
        );
    }
    println!();

    let outcome = calibrate(&built, config, &mut AreaReporter)?;
    println!(
        "\n  Final: RMSE = {:.3}  R2 = {:.3}",
        outcome.final_fit.rmse, outcome.final_fit.r2
    );
    for (column, params) in outcome.state.items.iter().enumerate() {
        log::debug!(
            "item {}: a = {:.4}, b = {:.4}",
            layout.items().item_id(column),
            params.a,
            params.b
        );
    }
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let config = cli.resolve_config()?;
    let mut failed = Vec::new();
    for area in &config.areas {
        println!("\nKnowledge area {area}:\n");
        if let Err(e) = run_area(area, &cli.items, &cli.microdata, &config) {
            eprintln!("Error in area {area}: {e}");
            failed.push(area.as_str());
        }
    }
    if !failed.is_empty() {
        return Err(format!("calibration failed for area(s): {}", failed.join(", ")).into());
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
