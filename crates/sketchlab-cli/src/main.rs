use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use sketchlab_core::{Algorithm, Datatype, Mode, SeedDeriver};
use sketchlab_runner::{
    CampaignController, CampaignFile, CampaignPlan, CampaignReport, ExecutorKind,
    ResolvedCampaign, ResultStore, RunOverrides,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "sketchlab",
    version = "0.3.0",
    about = "Resumable benchmark campaigns for cardinality sketches"
)]
struct Cli {
    /// Debug logging for sketchlab crates. RUST_LOG takes precedence.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExecutorArg {
    #[value(name = "docker")]
    Docker,
    #[value(name = "local")]
    Local,
}

impl From<ExecutorArg> for ExecutorKind {
    fn from(value: ExecutorArg) -> Self {
        match value {
            ExecutorArg::Docker => ExecutorKind::Docker,
            ExecutorArg::Local => ExecutorKind::Local,
        }
    }
}

#[derive(Args, Clone, Debug)]
struct CampaignArgs {
    /// YAML campaign file; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    image: Option<String>,
    /// CPU the trial container is pinned to.
    #[arg(long)]
    cpu: Option<usize>,
    /// Memory ceiling in bytes; swap is disabled.
    #[arg(long)]
    max_memory: Option<u64>,
    #[arg(long)]
    random_seed: Option<u64>,
    #[arg(long)]
    algorithm: Option<Algorithm>,
    #[arg(short = 'm')]
    m: Option<u64>,
    #[arg(short = 'n')]
    n: Option<u64>,
    #[arg(long)]
    mode: Option<Mode>,
    #[arg(long)]
    datatype: Option<Datatype>,
    #[arg(long)]
    results_dir: Option<PathBuf>,
    #[arg(long, value_enum)]
    executor: Option<ExecutorArg>,
    /// Kill a trial after this many seconds; 0 disables the limit.
    #[arg(long)]
    trial_timeout_secs: Option<u64>,
}

impl CampaignArgs {
    fn resolve(self) -> Result<ResolvedCampaign> {
        let file = match &self.config {
            Some(path) => CampaignFile::load(path)?,
            None => CampaignFile::default(),
        };
        let overrides = RunOverrides {
            image: self.image,
            cpu: self.cpu,
            max_memory: self.max_memory,
            random_seed: self.random_seed,
            results_dir: self.results_dir,
            executor: self.executor.map(Into::into),
            trial_timeout_secs: self.trial_timeout_secs,
            mode: self.mode,
            algorithm: self.algorithm,
            datatype: self.datatype,
            m: self.m,
            n: self.n,
        };
        ResolvedCampaign::resolve(file, overrides)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run every instance that has no stored record yet.
    Run {
        #[command(flatten)]
        campaign: CampaignArgs,
        #[arg(long)]
        json: bool,
    },
    /// Show the work list without launching anything.
    Plan {
        #[command(flatten)]
        campaign: CampaignArgs,
        /// Print every pending instance.
        #[arg(long)]
        list: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the seed of one repetition.
    Seed {
        datatype: Datatype,
        m: u64,
        n: u64,
        repetition: usize,
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        random_seed: Option<u64>,
        #[arg(long)]
        json: bool,
    },
    /// Flatten stored records to CSV.
    Export {
        #[arg(long, default_value = "results")]
        results_dir: PathBuf,
        /// Output file; stdout when omitted.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, requires = "out")]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: bool) {
    // Targets match by prefix, so this covers sketchlab_runner and sketchlab_core too.
    let default = if verbose { "sketchlab=debug" } else { "sketchlab=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run { campaign, json } => {
            let resolved = campaign.resolve()?;
            info!(
                executor = resolved.executor.as_str(),
                image = %resolved.image,
                results_dir = %resolved.campaign.results_dir.display(),
                "starting campaign"
            );
            let sandbox = resolved.sandbox();
            let mut controller = CampaignController::new(resolved.campaign.clone(), sandbox)?;
            let report = controller.run()?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "executor": resolved.executor.as_str(),
                    "image": resolved.image,
                    "results_dir": resolved.campaign.results_dir.display().to_string(),
                    "report": serde_json::to_value(&report)?,
                })));
            }
            print_report(&report);
        }
        Commands::Plan {
            campaign,
            list,
            json,
        } => {
            let resolved = campaign.resolve()?;
            let plan = sketchlab_runner::plan_campaign(&resolved.campaign)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "plan",
                    "enumerated": plan.enumerated,
                    "already_complete": plan.already_complete,
                    "repetitions": plan.repetitions,
                    "pending": plan.pending.iter().map(|i| i.stub()).collect::<Vec<_>>(),
                })));
            }
            print_plan(&plan, list);
        }
        Commands::Seed {
            datatype,
            m,
            n,
            repetition,
            config,
            random_seed,
            json,
        } => {
            let file = match &config {
                Some(path) => CampaignFile::load(path)?,
                None => CampaignFile::default(),
            };
            file.grid.validate()?;
            let campaign_seed = random_seed
                .or(file.random_seed)
                .unwrap_or(sketchlab_core::DEFAULT_CAMPAIGN_SEED);
            let deriver = SeedDeriver::new(campaign_seed, &file.grid);
            let seed = deriver.seed(datatype, m, n, repetition)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "seed",
                    "campaign_seed": campaign_seed,
                    "datatype": datatype.as_str(),
                    "m": m,
                    "n": n,
                    "repetition": repetition,
                    "seed": seed,
                })));
            }
            println!("{}", seed);
        }
        Commands::Export {
            results_dir,
            out,
            json,
        } => {
            if !results_dir.is_dir() {
                anyhow::bail!("results directory {} does not exist", results_dir.display());
            }
            let store = ResultStore::open(&results_dir)?;
            let summary = match &out {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("creating {}", path.display()))?;
                    let mut writer = BufWriter::new(file);
                    let summary = sketchlab_runner::export_csv(&store, &mut writer)?;
                    writer.flush()?;
                    summary
                }
                None => sketchlab_runner::export_csv(&store, io::stdout().lock())?,
            };
            info!(
                records = summary.records,
                rows = summary.rows,
                "exported results"
            );
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "export",
                    "out": out.map(|p| p.display().to_string()),
                    "summary": serde_json::to_value(summary)?,
                })));
            }
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Plan { json, .. }
        | Commands::Seed { json, .. }
        | Commands::Export { json, .. } => *json,
    }
}

fn print_report(report: &CampaignReport) {
    println!("enumerated: {}", report.enumerated);
    println!("already_complete: {}", report.already_complete);
    println!("completed: {}", report.completed);
    println!("claimed_elsewhere: {}", report.claimed_elsewhere);
    println!("abandoned: {}", report.abandoned.len());
    for abandoned in &report.abandoned {
        println!(
            "  {} (repetition {}): {}",
            abandoned.instance, abandoned.repetition, abandoned.reason
        );
    }
}

fn print_plan(plan: &CampaignPlan, list: bool) {
    println!("enumerated: {}", plan.enumerated);
    println!("already_complete: {}", plan.already_complete);
    println!("pending: {}", plan.pending.len());
    println!("repetitions: {}", plan.repetitions);
    if list {
        for instance in &plan.pending {
            println!("  {}", instance.stub());
        }
    }
}
