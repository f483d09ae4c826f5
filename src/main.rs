// src/main.rs

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use pkgtx::config::Config;
use pkgtx::db::{self, models::InstalledPackage, models::to_db_id};
use pkgtx::header::ScriptletKind;
use pkgtx::packages::PackageRef;
use pkgtx::problem::ProblemSet;
use pkgtx::transaction::{ItemAction, Transaction, TransactionCallbacks, TransactionItem};
use pkgtx::ts::{ProblemFilter, TransactionFlags};
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "pkgtx")]
#[command(author, version, about = "Install, upgrade and erase RPM packages transactionally", long_about = None)]
struct Cli {
    /// Install root directory
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override a configuration option
    #[arg(long, value_name = "KEY=VALUE", global = true)]
    setopt: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Options that control how a transaction is run
#[derive(Args, Debug, Default, Clone)]
struct RunArgs {
    /// Check everything but don't change the system
    #[arg(long)]
    test: bool,

    /// Don't run package scriptlets
    #[arg(long)]
    noscripts: bool,

    /// Only update the package database
    #[arg(long)]
    justdb: bool,

    /// Write scriptlet output to this file
    #[arg(long, value_name = "PATH")]
    script_out: Option<PathBuf>,

    /// Run even when preparation finds file conflicts, old packages or
    /// foreign architectures
    #[arg(long)]
    ignore_problems: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install package files
    Install {
        /// Paths to the package files
        #[arg(required = true)]
        packages: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Upgrade installed packages from package files
    Upgrade {
        /// Paths to the package files
        #[arg(required = true)]
        packages: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Reinstall installed packages from package files
    Reinstall {
        /// Paths to the package files
        #[arg(required = true)]
        packages: Vec<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Erase installed packages
    Erase {
        /// Names of installed packages
        #[arg(required = true)]
        names: Vec<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Check whether package files could be installed, without running
    Check {
        /// Paths to the package files
        #[arg(required = true)]
        packages: Vec<PathBuf>,
    },
    /// List installed packages
    List {
        /// Only show packages whose name contains this text
        pattern: Option<String>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        shell: clap_complete::Shell,
    },
}

/// Prints one line per finished element
#[derive(Debug, Default)]
struct CliProgress {
    total: u64,
    done: u64,
}

impl TransactionCallbacks for CliProgress {
    fn transaction_start(&mut self, total: u64) {
        self.total = total;
    }

    fn install_start(&mut self, item: &TransactionItem, _name: &str, total: u64) {
        debug!("Unpacking {} ({} bytes)", item.pkg(), total);
    }

    fn install_stop(&mut self, item: &TransactionItem, _name: &str) {
        self.done += 1;
        let verb = match item.action() {
            ItemAction::Upgrade => "Upgraded",
            ItemAction::Reinstall => "Reinstalled",
            _ => "Installed",
        };
        println!("[{}/{}] {} {}", self.done, self.total, verb, item.pkg());
    }

    fn uninstall_stop(&mut self, item: &TransactionItem, _name: &str) {
        self.done += 1;
        println!("[{}/{}] Erased {}", self.done, self.total, item.pkg());
    }

    fn script_error(&mut self, _item: Option<&TransactionItem>, name: &str, scriptlet: ScriptletKind, rc: i32) {
        eprintln!("warning: {} scriptlet of {} failed, exit status {}", scriptlet, name, rc);
    }

    fn transaction_stop(&mut self) {
        println!("Transaction complete: {} of {} element(s) processed", self.done, self.total);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    for opt in &cli.setopt {
        let (key, value) = opt
            .split_once('=')
            .with_context(|| format!("--setopt expects KEY=VALUE, got '{}'", opt))?;
        config.set(key.trim(), value.trim())?;
    }

    if let Some(root) = &cli.root {
        config.installroot = root.clone();
    }

    Ok(config)
}

fn print_problems(problems: &ProblemSet) {
    eprintln!("Transaction problems:");
    for problem in problems {
        eprintln!("  {}", problem);
    }
}

fn file_items(packages: &[PathBuf], action: ItemAction) -> Result<Vec<TransactionItem>> {
    packages
        .iter()
        .map(|path| {
            let pkg = PackageRef::from_file(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(TransactionItem::new(pkg, action))
        })
        .collect()
}

fn erase_items(config: &Config, names: &[String]) -> Result<Vec<TransactionItem>> {
    let db_path = db::database_path(config.installroot(), &config.dbpath);
    let conn = db::open(&db_path).context("No packages are installed")?;

    let mut items = Vec::new();
    for name in names {
        let installed = InstalledPackage::find_by_name(&conn, name)?;
        if installed.is_empty() {
            bail!("Package '{}' is not installed", name);
        }
        for package in installed {
            let id = to_db_id(package.id.unwrap_or_default())?;
            items.push(TransactionItem::erase(PackageRef::installed(package.nevra(), id)));
        }
    }
    Ok(items)
}

fn run_transaction(config: &Config, items: &[TransactionItem], args: &RunArgs) -> Result<()> {
    let mut tx = Transaction::new(config)?;

    let mut flags = tx.flags();
    flags.set(TransactionFlags::TEST, args.test || flags.contains(TransactionFlags::TEST));
    flags.set(TransactionFlags::NOSCRIPTS, args.noscripts || flags.contains(TransactionFlags::NOSCRIPTS));
    flags.set(TransactionFlags::JUSTDB, args.justdb || flags.contains(TransactionFlags::JUSTDB));
    tx.set_flags(flags);

    if args.ignore_problems {
        tx.set_problem_filter(ProblemFilter::all());
    }
    if let Some(path) = &args.script_out {
        tx.set_script_out_file(path)?;
    }
    tx.register_cb(Box::new(CliProgress::default()));

    for item in items {
        tx.add(item)?;
    }

    if !tx.check() {
        print_problems(&tx.problems());
        bail!("Transaction check failed");
    }

    let rc = tx.run()?;
    if rc > 0 {
        print_problems(&tx.problems());
        bail!("Transaction not run: {} problem(s)", rc);
    } else if rc < 0 {
        bail!("Transaction failed, elements processed so far stay applied");
    }

    if flags.contains(TransactionFlags::TEST) {
        println!("Test transaction succeeded, nothing was changed");
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Install { packages, run }) => {
            let config = load_config(&cli)?;
            let items = file_items(packages, ItemAction::Install)?;
            run_transaction(&config, &items, run)
        }
        Some(Commands::Upgrade { packages, run }) => {
            let config = load_config(&cli)?;
            let items = file_items(packages, ItemAction::Upgrade)?;
            run_transaction(&config, &items, run)
        }
        Some(Commands::Reinstall { packages, run }) => {
            let config = load_config(&cli)?;
            let items = file_items(packages, ItemAction::Reinstall)?;
            run_transaction(&config, &items, run)
        }
        Some(Commands::Erase { names, run }) => {
            let config = load_config(&cli)?;
            let items = erase_items(&config, names)?;
            run_transaction(&config, &items, run)
        }
        Some(Commands::Check { packages }) => {
            let config = load_config(&cli)?;
            let items = file_items(packages, ItemAction::Upgrade)?;

            let mut tx = Transaction::new(&config)?;
            for item in &items {
                tx.add(item)?;
            }
            if tx.check() {
                println!("No problems found");
                Ok(())
            } else {
                print_problems(&tx.problems());
                bail!("{} problem(s) found", tx.problems().len());
            }
        }
        Some(Commands::List { pattern }) => {
            let config = load_config(&cli)?;
            let db_path = db::database_path(config.installroot(), &config.dbpath);
            info!("Reading package database at {}", db_path.display());

            let packages = match db::open(&db_path) {
                Ok(conn) => InstalledPackage::list_all(&conn)?,
                Err(pkgtx::Error::DatabaseNotFound(_)) => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            let matching: Vec<_> = packages
                .iter()
                .filter(|p| pattern.as_deref().is_none_or(|pat| p.name.contains(pat)))
                .collect();

            if matching.is_empty() {
                println!("No packages found.");
            } else {
                for package in &matching {
                    println!("{}", package.nevra());
                }
                println!("\nTotal: {} package(s)", matching.len());
            }
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(*shell, &mut Cli::command(), "pkgtx", &mut std::io::stdout());
            Ok(())
        }
        None => {
            println!("pkgtx v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'pkgtx --help' for usage information");
            Ok(())
        }
    }
}
