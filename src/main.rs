// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use clap::{Args, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use star_coins::persist::PersistentRoster;
use star_coins::{
    spreadsheet, view, BatchTarget, ClassDeletion, DeleteStrategy, ImportMode, LoadOutcome,
    Roster, Selection, SortKey, SqliteBlobStore, StoreConfig,
};

type Store = PersistentRoster<SqliteBlobStore>;

#[derive(Parser)]
#[command(name = "star-coins", version, about = "Classroom star coin tracker")]
struct Cli {
    /// Database file (overrides STAR_COINS_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive terminal UI (default)
    Ui,
    /// List students
    List {
        #[command(flatten)]
        view: ViewArgs,
        /// Case-insensitive name filter
        #[arg(long)]
        search: Option<String>,
        /// name, coins-desc or coins-asc
        #[arg(long, default_value = "name")]
        sort: SortKey,
    },
    /// Show statistics
    Stats {
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Manage classes
    #[command(subcommand)]
    Class(ClassCommand),
    /// Manage students
    #[command(subcommand)]
    Student(StudentCommand),
    /// Adjust one student's coins
    #[command(subcommand)]
    Coins(CoinsCommand),
    /// Adjust coins of the whole current class or of named students
    Batch {
        /// Amount to add (negative to subtract)
        #[arg(allow_hyphen_values = true)]
        amount: i64,
        /// Comma-separated student names instead of the whole class
        #[arg(long, value_delimiter = ',')]
        students: Vec<String>,
        /// Class of the named students when names are ambiguous
        #[arg(long)]
        class: Option<String>,
    },
    /// Import students from an Excel (.xlsx/.xls/.ods) or CSV file
    Import {
        file: PathBuf,
        /// append or replace
        #[arg(long, default_value = "append")]
        mode: ImportMode,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Export students to an Excel or CSV file (by extension)
    Export {
        #[command(flatten)]
        view: ViewArgs,
        /// Output file, .xlsx or .csv (default: generated from class name and date)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Write the import template
    Template {
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args)]
struct ViewArgs {
    /// Class name (default: current selection)
    #[arg(long, conflicts_with = "all")]
    class: Option<String>,
    /// All classes
    #[arg(long)]
    all: bool,
}

#[derive(Subcommand)]
enum ClassCommand {
    /// List classes
    List,
    /// Create a class and select it
    Add { name: String },
    /// Delete a class
    Delete {
        name: String,
        /// Move its students to this class
        #[arg(long, conflicts_with = "force")]
        transfer_to: Option<String>,
        /// Delete its students too
        #[arg(long)]
        force: bool,
    },
    /// Change the current selection
    Select {
        name: Option<String>,
        #[arg(long, conflicts_with = "name")]
        all: bool,
    },
}

#[derive(Subcommand)]
enum StudentCommand {
    /// Add a student to a class (default: current class)
    Add {
        name: String,
        #[arg(long)]
        class: Option<String>,
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        coins: i64,
    },
    /// Delete a student
    Delete {
        name: String,
        #[arg(long)]
        class: Option<String>,
    },
    /// Rename, rebalance or move a student
    Edit {
        name: String,
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        new_name: Option<String>,
        #[arg(long, allow_hyphen_values = true)]
        coins: Option<i64>,
        #[arg(long)]
        move_to: Option<String>,
    },
}

#[derive(Subcommand)]
enum CoinsCommand {
    /// Add coins
    Add {
        name: String,
        #[arg(default_value_t = 1)]
        amount: i64,
        #[arg(long)]
        class: Option<String>,
    },
    /// Subtract coins (balances may go negative)
    Sub {
        name: String,
        #[arg(default_value_t = 1)]
        amount: i64,
        #[arg(long)]
        class: Option<String>,
    },
}

fn main() -> Result<()> {
    // Diagnostics go to stderr; RUST_LOG overrides
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = StoreConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    let store = SqliteBlobStore::open(&config.db_path)
        .with_context(|| format!("Failed to open database {:?}", config.db_path))?;
    let (mut roster, outcome) = PersistentRoster::open(store).context("Failed to load roster")?;
    match outcome {
        LoadOutcome::Loaded => {}
        LoadOutcome::Seeded => println!("✓ New roster created with sample data"),
        LoadOutcome::Recovered(err) => {
            eprintln!("⚠️  Stored data was unreadable ({}), reset to sample data", err)
        }
    }

    match cli.command.unwrap_or(Command::Ui) {
        Command::Ui => run_ui_mode(roster)?,
        Command::List { view, search, sort } => {
            let selection = view_selection(roster.roster(), &view)?;
            print_students(roster.roster(), &selection, search.as_deref(), sort);
        }
        Command::Stats { view } => {
            let selection = view_selection(roster.roster(), &view)?;
            print_stats(roster.roster(), &selection);
        }
        Command::Class(cmd) => run_class(&mut roster, cmd)?,
        Command::Student(cmd) => run_student(&mut roster, cmd)?,
        Command::Coins(cmd) => run_coins(&mut roster, cmd)?,
        Command::Batch { amount, students, class } => {
            let target = if students.is_empty() {
                BatchTarget::CurrentClass
            } else {
                let ids = students
                    .iter()
                    .map(|name| find_student(roster.roster(), name, class.as_deref()))
                    .collect::<Result<Vec<_>>>()?;
                BatchTarget::Students(ids)
            };
            let count = roster.apply(|r| r.batch_adjust(&target, amount))?;
            println!("✓ {} 名学生每人 {:+} 星币", count, amount);
        }
        Command::Import { file, mode, yes } => run_import(&mut roster, &file, mode, yes)?,
        Command::Export { view, out } => {
            let selection = view_selection(roster.roster(), &view)?;
            let path = out.unwrap_or_else(|| {
                let label = roster.roster().selection_label(&selection);
                PathBuf::from(spreadsheet::export_file_name(&label, Local::now().date_naive()))
            });
            let sheet = roster.roster().selection_label(&selection);
            let rows = roster.roster().export_snapshot(&selection)?;
            let count = spreadsheet::save_rows(&path, &sheet, rows)
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("✓ 已导出 {} 名学生的数据 → {}", count, path.display());
        }
        Command::Template { out } => {
            let path = out.unwrap_or_else(|| PathBuf::from(spreadsheet::TEMPLATE_FILE_NAME));
            spreadsheet::save_template(&path)
                .with_context(|| format!("Failed to write {:?}", path))?;
            println!("✓ 模板已保存 → {}", path.display());
        }
    }

    Ok(())
}

// ============================================================================
// Name resolution
// ============================================================================

fn find_class(roster: &Roster, name: &str) -> Result<Selection> {
    roster
        .class_by_name(name.trim())
        .map(|c| Selection::Class(c.id.clone()))
        .ok_or_else(|| anyhow!("班级“{}”不存在", name))
}

fn view_selection(roster: &Roster, view: &ViewArgs) -> Result<Selection> {
    if view.all {
        return Ok(Selection::AllClasses);
    }
    match &view.class {
        Some(name) => find_class(roster, name),
        None => Ok(roster.current_selection().clone()),
    }
}

/// Resolve a student by name, narrowed by class name if given, otherwise by
/// the current class, otherwise across every class.
fn find_student(roster: &Roster, name: &str, class: Option<&str>) -> Result<String> {
    let scope = match class {
        Some(class) => find_class(roster, class)?,
        None if roster.current_selection().is_concrete() => roster.current_selection().clone(),
        None => Selection::AllClasses,
    };

    let matches: Vec<_> = roster
        .students()
        .iter()
        .filter(|s| s.name == name.trim() && scope.includes(&s.class_id))
        .collect();

    match matches.as_slice() {
        [student] => Ok(student.id.clone()),
        [] => bail!("学生“{}”不存在", name),
        _ => bail!("多个班级都有学生“{}”，请用 --class 指定班级", name),
    }
}

// ============================================================================
// Subcommands
// ============================================================================

fn run_class(roster: &mut Store, cmd: ClassCommand) -> Result<()> {
    match cmd {
        ClassCommand::List => {
            let current = roster.roster().current_selection().clone();
            let marker = |selected: bool| if selected { "→" } else { " " };
            println!("{} 📊 所有班级", marker(current == Selection::AllClasses));
            for class in roster.roster().classes() {
                let count = roster.roster().students_in(&class.id).count();
                println!(
                    "{} {} ({}人)",
                    marker(current.class_id() == Some(class.id.as_str())),
                    class.name,
                    count
                );
            }
        }
        ClassCommand::Add { name } => {
            roster.apply(|r| r.create_class(&name))?;
            println!("✓ 班级“{}”添加成功", name.trim());
        }
        ClassCommand::Delete { name, transfer_to, force } => {
            let class = find_class(roster.roster(), &name)?;
            let target = transfer_to
                .as_deref()
                .map(|t| find_class(roster.roster(), t))
                .transpose()?;
            let strategy = if force { DeleteStrategy::Force } else { DeleteStrategy::Transfer };

            let outcome = roster.apply(|r| {
                r.delete_class(&class, strategy, target.as_ref().and_then(|t| t.class_id()))
            })?;
            match outcome {
                ClassDeletion::Empty { name } => println!("✓ 已删除空班级“{}”", name),
                ClassDeletion::Transferred { name, count, target } => {
                    println!("✓ 已将 {} 名学生从“{}”转移到“{}”", count, name, target)
                }
                ClassDeletion::Cascaded { name, count } => {
                    println!("⚠️  已删除班级“{}”及其 {} 名学生", name, count)
                }
            }
        }
        ClassCommand::Select { name, all } => {
            let selection = match (name, all) {
                (_, true) => Selection::AllClasses,
                (Some(name), false) => find_class(roster.roster(), &name)?,
                (None, false) => bail!("请指定班级名称或 --all"),
            };
            roster.apply(|r| r.select_class(selection.clone()))?;
            println!("✓ 已切换到班级：{}", roster.roster().selection_label(&selection));
        }
    }
    Ok(())
}

fn run_student(roster: &mut Store, cmd: StudentCommand) -> Result<()> {
    match cmd {
        StudentCommand::Add { name, class, coins } => {
            let class = match class {
                Some(class) => find_class(roster.roster(), &class)?,
                None => roster.roster().current_selection().clone(),
            };
            roster.apply(|r| r.add_student(&name, &class, coins))?;
            println!("✓ 学生“{}”添加成功", name.trim());
        }
        StudentCommand::Delete { name, class } => {
            let id = find_student(roster.roster(), &name, class.as_deref())?;
            let removed = roster.apply(|r| r.delete_student(&id))?;
            println!("✓ 学生“{}”已删除", removed.name);
        }
        StudentCommand::Edit { name, class, new_name, coins, move_to } => {
            let id = find_student(roster.roster(), &name, class.as_deref())?;
            let current = roster
                .roster()
                .student(&id)
                .cloned()
                .ok_or_else(|| anyhow!("学生“{}”不存在", name))?;
            let new_class = match move_to {
                Some(target) => find_class(roster.roster(), &target)?,
                None => Selection::Class(current.class_id.clone()),
            };
            let new_name = new_name.unwrap_or(current.name);
            let coins = coins.unwrap_or(current.coins);

            roster.apply(|r| r.edit_student(&id, &new_name, coins, &new_class))?;
            println!("✓ 学生信息已更新");
        }
    }
    Ok(())
}

fn run_coins(roster: &mut Store, cmd: CoinsCommand) -> Result<()> {
    let (name, delta, class) = match cmd {
        CoinsCommand::Add { name, amount, class } => (name, amount, class),
        CoinsCommand::Sub { name, amount, class } => {
            let delta = amount
                .checked_neg()
                .ok_or_else(|| anyhow!("amount out of range"))?;
            (name, delta, class)
        }
    };

    let id = find_student(roster.roster(), &name, class.as_deref())?;
    let balance = roster.apply(|r| r.adjust_coins(&id, delta))?;
    println!("✓ {} {:+} 星币（现有 {}）", name.trim(), delta, balance);
    Ok(())
}

fn run_import(roster: &mut Store, file: &Path, mode: ImportMode, yes: bool) -> Result<()> {
    let rows =
        spreadsheet::load_rows(file).with_context(|| format!("Failed to read {:?}", file))?;
    if rows.is_empty() {
        bail!("文件为空或格式不正确");
    }

    let plan = roster.roster().plan_import(&rows, mode)?;
    println!("{}", plan.summary());

    if !yes && !confirm("\n确定要继续吗？[y/N] ")? {
        println!("已取消导入");
        return Ok(());
    }

    let summary = roster.apply(|r| r.commit_import(plan))?;
    println!("✓ {}", summary.message());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

// ============================================================================
// Output
// ============================================================================

fn print_students(roster: &Roster, selection: &Selection, search: Option<&str>, sort: SortKey) {
    let rows = view::student_rows(roster, selection, search, sort);
    if rows.is_empty() {
        let empty = if search.is_some() {
            "没有找到匹配的学生"
        } else {
            "当前班级暂无学生"
        };
        println!("{}", empty);
        return;
    }

    println!("{:<16} {:<16} {:>8}", "姓名", "班级", "星币");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for row in rows {
        println!("{:<16} {:<16} {:>8}", row.name, row.class_name, row.coins);
    }
}

fn print_stats(roster: &Roster, selection: &Selection) {
    let stats = view::stats(roster, selection);
    println!("📊 {}", roster.selection_label(selection));
    println!("   学生总数: {}", stats.total_students);
    println!("   星币最多: {}", stats.top_student_text(selection));
    println!("   平均星币: {}", stats.average_coins);
}

#[cfg(feature = "tui")]
fn run_ui_mode(roster: Store) -> Result<()> {
    let mut app = ui::App::new(roster);
    ui::run_ui(&mut app)?;
    Ok(())
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_roster: Store) -> Result<()> {
    eprintln!("❌ TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the subcommands: star-coins --help");
    std::process::exit(1);
}
