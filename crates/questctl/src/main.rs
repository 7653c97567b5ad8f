//! Questline Control - command-line intake for the progression engine.
//!
//! Opens the engine directly against the configured store, logs in, runs one
//! command and prints the result.

mod commands;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quest_common::{ItemCategory, PropEffect, QuestError, TaskType};

#[derive(Parser)]
#[command(name = "questctl")]
#[command(about = "Questline - campus progression from the command line", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the XDG config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, short, global = true)]
    user: Option<String>,

    #[arg(long, short, global = true)]
    password: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register,

    /// Show level, coins, attributes and active effects
    Status,

    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Browse and stock the shop
    #[command(subcommand)]
    Shop(ShopCommand),

    /// Owned items
    #[command(subcommand)]
    Inventory(InventoryCommand),

    /// Spend attribute points
    #[command(subcommand)]
    Attrs(AttrsCommand),

    /// Achievements and the gallery
    #[command(subcommand)]
    Achievement(AchievementCommand),

    /// Run a periodic reset now
    #[command(subcommand)]
    Reset(ResetCommand),

    /// Daily check-in; the first one each day may bring a surprise
    Checkin,

    /// Growth snapshots over time
    #[command(subcommand)]
    History(HistoryCommand),
}

#[derive(Subcommand)]
enum TaskCommand {
    Add(TaskSpec),
    List {
        #[arg(long = "type")]
        task_type: Option<TaskType>,
    },
    Complete {
        id: i64,
    },
    /// Add progress; completes the task at its goal
    Progress {
        id: i64,
        #[arg(allow_hyphen_values = true)]
        delta: i64,
    },
    Fail {
        id: i64,
        /// Spend a forgiveness coupon (or a live coupon effect)
        #[arg(long)]
        forgive: bool,
    },
    Remove {
        id: i64,
    },
}

#[derive(Args)]
pub struct TaskSpec {
    pub name: String,
    #[arg(long = "type", default_value = "daily")]
    pub task_type: TaskType,
    #[arg(long, default_value_t = 1)]
    pub difficulty: u8,
    #[arg(long, default_value_t = 0)]
    pub coins: i64,
    #[arg(long, default_value_t = 0)]
    pub growth: i64,
    #[arg(long, default_value_t = 1)]
    pub goal: i64,
    /// Deadline in days from now
    #[arg(long, default_value_t = 7)]
    pub days: i64,
    #[arg(long, default_value_t = 0)]
    pub coupons: u32,
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Subcommand)]
enum ShopCommand {
    List {
        /// Include unavailable items
        #[arg(long)]
        all: bool,
    },
    Add(ItemSpec),
    Buy {
        id: i64,
        #[arg(long, short, default_value_t = 1)]
        quantity: i64,
    },
}

#[derive(Args)]
pub struct ItemSpec {
    pub name: String,
    #[arg(long, default_value = "physical")]
    pub category: ItemCategory,
    /// Requested price; the category formula has the final say
    #[arg(long, default_value_t = 0)]
    pub price: i64,
    #[arg(long, default_value_t = 0)]
    pub limit: u32,
    #[arg(long, default_value_t = 0)]
    pub level: u32,
    #[arg(long)]
    pub effect: Option<PropEffect>,
    /// Prop duration in minutes
    #[arg(long, default_value_t = 0)]
    pub duration: i64,
    /// Physical redemption instructions
    #[arg(long, default_value = "")]
    pub redeem: String,
    /// Lucky table, e.g. "coins:50:0.7,growth:20:0.2,item:4:0.1"
    #[arg(long)]
    pub lucky: Option<String>,
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Subcommand)]
enum InventoryCommand {
    List,
    Use { id: i64 },
}

#[derive(Subcommand)]
enum AttrsCommand {
    Assign(AttributeSpec),
}

#[derive(Args)]
pub struct AttributeSpec {
    #[arg(long, default_value_t = 0)]
    pub execution: i32,
    #[arg(long, default_value_t = 0)]
    pub perseverance: i32,
    #[arg(long, default_value_t = 0)]
    pub decision: i32,
    #[arg(long, default_value_t = 0)]
    pub knowledge: i32,
    #[arg(long, default_value_t = 0)]
    pub social: i32,
    #[arg(long, default_value_t = 0)]
    pub pride: i32,
}

#[derive(Subcommand)]
enum AchievementCommand {
    List {
        #[arg(long)]
        group: Option<String>,
    },
    Create(AchievementSpec),
    /// Feed a custom achievement's counters
    Progress {
        id: i64,
        #[arg(default_value_t = 1)]
        delta: i64,
    },
}

#[derive(Args)]
pub struct AchievementSpec {
    pub name: String,
    #[arg(long)]
    pub level: Option<i64>,
    #[arg(long)]
    pub pride: Option<i64>,
    #[arg(long)]
    pub coins_target: Option<i64>,
    #[arg(long)]
    pub tasks: Option<i64>,
    /// Target of a counter fed by `achievement progress`
    #[arg(long)]
    pub counter: Option<i64>,
    /// Reward coins; any reward makes this count toward the monthly cap
    #[arg(long, default_value_t = 0)]
    pub reward: i64,
    #[arg(long, default_value = "")]
    pub group: String,
    #[arg(long, default_value = "")]
    pub description: String,
}

#[derive(Subcommand)]
enum ResetCommand {
    Daily,
    Weekly,
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// Record the current state
    Capture,
    List {
        /// Only the last N days
        #[arg(long)]
        days: Option<i64>,
        /// Full timeline as CSV
        #[arg(long)]
        csv: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::error(&format!("{:#}", e));
            let code = e.downcast_ref::<QuestError>().map(|q| q.code()).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let session = commands::Session::open(cli.config.as_deref(), cli.user, cli.password, cli.json)?;

    match cli.command {
        Commands::Register => session.register(),
        Commands::Status => session.status(),
        Commands::Task(cmd) => match cmd {
            TaskCommand::Add(spec) => session.task_add(spec),
            TaskCommand::List { task_type } => session.task_list(task_type),
            TaskCommand::Complete { id } => session.task_complete(id),
            TaskCommand::Progress { id, delta } => session.task_progress(id, delta),
            TaskCommand::Fail { id, forgive } => session.task_fail(id, forgive),
            TaskCommand::Remove { id } => session.task_remove(id),
        },
        Commands::Shop(cmd) => match cmd {
            ShopCommand::List { all } => session.shop_list(all),
            ShopCommand::Add(spec) => session.shop_add(spec),
            ShopCommand::Buy { id, quantity } => session.shop_buy(id, quantity),
        },
        Commands::Inventory(cmd) => match cmd {
            InventoryCommand::List => session.inventory_list(),
            InventoryCommand::Use { id } => session.inventory_use(id),
        },
        Commands::Attrs(AttrsCommand::Assign(spec)) => session.attrs_assign(spec),
        Commands::Achievement(cmd) => match cmd {
            AchievementCommand::List { group } => session.achievement_list(group),
            AchievementCommand::Create(spec) => session.achievement_create(spec),
            AchievementCommand::Progress { id, delta } => session.achievement_progress(id, delta),
        },
        Commands::Reset(cmd) => match cmd {
            ResetCommand::Daily => session.reset(TaskType::Daily),
            ResetCommand::Weekly => session.reset(TaskType::Weekly),
        },
        Commands::Checkin => session.check_in(),
        Commands::History(cmd) => match cmd {
            HistoryCommand::Capture => session.history_capture(),
            HistoryCommand::List { days, csv } => session.history_list(days, csv),
        },
    }
}
