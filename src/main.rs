use clap::{Parser, Subcommand};
use squash::config::{self, Settings};
use squash::scheduler::{self, Job, JobEvent, Scheduler};
use squash::{catalog, output, service};
use std::path::PathBuf;
use std::sync::mpsc::Sender;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once; only called while building the CLI.
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "squash")]
#[command(about = "Batch-compress a directory tree of images")]
#[command(long_about = "\
Batch-compress a directory tree of images

Every PNG, JPEG and WebP file under INPUT_DIR is matched against the transform
rules, sent to the transcoding service once per matching rule, and written
under OUTPUT_DIR.

Settings are read from the environment, then .env, then .env.local (later
files win). Key settings:

  HOST=https://squoosh.app         # transcoding service (required)
  INPUT_DIR=./images               # required
  OUTPUT_DIR=./compressed          # required
  MAX_CONCURRENCY=4                # 1-10 jobs in flight
  CUSTOM_RULES=png->webp,->jpeg    # input->output, `->kind` is the catch-all
  ALL_TO=jpeg                      # catch-all kind when no rules are set
  OVERWRITE=false                  # otherwise `photo (1).jpg` on collision

Run 'squash gen-config' to print a documented .env with every setting.")]
#[command(version = version_string())]
struct Cli {
    /// Env file layered over the environment; repeat to add more (later wins)
    #[arg(
        long = "env-file",
        value_name = "PATH",
        global = true,
        default_values = [".env", ".env.local"]
    )]
    env_files: Vec<PathBuf>,

    /// Increase diagnostic output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print the final summary
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Compress every matching image (the default)
    Run,
    /// Resolve settings and list the jobs a run would schedule
    Check {
        /// Print the jobs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a stock .env with all settings documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    setup_logging(cli.verbose, cli.quiet);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let settings = config::load_settings(&cli.env_files)?;
            let transcoder = service::connect(&settings)?;

            let (tx, rx) = std::sync::mpsc::channel();
            let quiet = cli.quiet;
            let printer = std::thread::spawn(move || {
                for event in rx {
                    if quiet {
                        continue;
                    }
                    for line in output::format_job_event(&event) {
                        println!("{}", line);
                    }
                }
            });
            let summary = Scheduler::new(&settings, &*transcoder)
                .run(discover(&settings, Some(&tx)), Some(&tx));
            drop(tx);
            printer.join().map_err(|_| "output thread panicked")?;

            output::print_summary(&summary?, settings.max_concurrency);
        }
        Command::Check { json } => {
            let settings = config::load_settings(&cli.env_files)?;
            let jobs: Vec<Job> = discover(&settings, None).collect();
            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
            } else {
                output::print_plan(&settings, &jobs);
            }
        }
        Command::GenConfig => {
            print!("{}", config::stock_env_template());
        }
    }

    Ok(())
}

/// Jobs for every eligible file under the input root, in walk order.
fn discover<'a>(
    settings: &'a Settings,
    events: Option<&'a Sender<JobEvent>>,
) -> impl Iterator<Item = Job> + 'a {
    let catalog = catalog::enumerate(
        &settings.input_dir,
        &settings.exclude_dirs,
        &settings.exclude_files,
        &settings.rules,
    );
    scheduler::jobs(catalog, &settings.rules, events)
}

fn setup_logging(verbose: u8, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        match verbose {
            0 => tracing_subscriber::EnvFilter::new("warn"),
            1 => tracing_subscriber::EnvFilter::new("info"),
            2 => tracing_subscriber::EnvFilter::new("debug"),
            _ => tracing_subscriber::EnvFilter::new("trace"),
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
