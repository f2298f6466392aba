use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use services::config::parse_base_url;
use services::{AppServices, Clock, ClientConfig, FanoutNotifier, LearningFlowService, MemoryNotifier, TracingNotifier};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt as log_fmt};
use tutor_core::model::{AntiForgetSessionId, StudentId, Task3Eligibility, TaskNumber};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    MissingCommand,
    UnknownCommand(String),
    WrongArity { command: &'static str, usage: &'static str },
    InvalidApiUrl { raw: String },
    InvalidDbUrl { raw: String },
    InvalidGroupSize { raw: String },
    InvalidPolicy { raw: String },
    InvalidNumber { what: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::MissingCommand => write!(f, "no command given"),
            ArgsError::UnknownCommand(name) => write!(f, "unknown command: {name}"),
            ArgsError::WrongArity { command, usage } => write!(f, "usage: tutor {command} {usage}"),
            ArgsError::InvalidApiUrl { raw } => write!(f, "invalid --api value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidGroupSize { raw } => write!(f, "invalid --group-size value: {raw}"),
            ArgsError::InvalidPolicy { raw } => write!(f, "invalid --task3-policy value: {raw}"),
            ArgsError::InvalidNumber { what, raw } => write!(f, "invalid {what}: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Login { username: String, password: String },
    Logout,
    Whoami,
    Students,
    DeductHours { student: StudentId, hours: f64 },
    WordSets,
    Schedules,
    Progress { student: StudentId, word_set: String },
    CompleteTask { student: StudentId, word_set: String, group: u32, task: TaskNumber },
    Sessions { student: StudentId },
    CompleteReview { session: AntiForgetSessionId },
    Backup { dir: PathBuf },
    Restore { file: PathBuf },
}

impl Command {
    fn parse(words: Vec<String>) -> Result<Self, ArgsError> {
        let mut words = words.into_iter();
        let name = words.next().ok_or(ArgsError::MissingCommand)?;
        let rest: Vec<String> = words.collect();

        let command = match name.as_str() {
            "login" => {
                let [username, password] = take::<2>(rest, "login", "<username> <password>")?;
                Command::Login { username, password }
            }
            "logout" => {
                take::<0>(rest, "logout", "")?;
                Command::Logout
            }
            "whoami" => {
                take::<0>(rest, "whoami", "")?;
                Command::Whoami
            }
            "students" => {
                take::<0>(rest, "students", "")?;
                Command::Students
            }
            "deduct-hours" => {
                let [student, hours] = take::<2>(rest, "deduct-hours", "<student_id> <hours>")?;
                Command::DeductHours {
                    student: parse_student(&student)?,
                    hours: hours
                        .parse()
                        .map_err(|_| ArgsError::InvalidNumber { what: "hours", raw: hours.clone() })?,
                }
            }
            "word-sets" => {
                take::<0>(rest, "word-sets", "")?;
                Command::WordSets
            }
            "schedules" => {
                take::<0>(rest, "schedules", "")?;
                Command::Schedules
            }
            "progress" => {
                let [student, word_set] = take::<2>(rest, "progress", "<student_id> <word_set>")?;
                Command::Progress {
                    student: parse_student(&student)?,
                    word_set,
                }
            }
            "complete-task" => {
                let [student, word_set, group, task] =
                    take::<4>(rest, "complete-task", "<student_id> <word_set> <group> <task>")?;
                let task = task
                    .parse::<u8>()
                    .ok()
                    .and_then(|n| TaskNumber::try_from(n).ok())
                    .ok_or_else(|| ArgsError::InvalidNumber { what: "task", raw: task.clone() })?;
                Command::CompleteTask {
                    student: parse_student(&student)?,
                    word_set,
                    group: group
                        .parse()
                        .map_err(|_| ArgsError::InvalidNumber { what: "group", raw: group.clone() })?,
                    task,
                }
            }
            "sessions" => {
                let [student] = take::<1>(rest, "sessions", "<student_id>")?;
                Command::Sessions {
                    student: parse_student(&student)?,
                }
            }
            "complete-review" => {
                let [session] = take::<1>(rest, "complete-review", "<session_id>")?;
                Command::CompleteReview {
                    session: AntiForgetSessionId::new(session),
                }
            }
            "backup" => {
                let [dir] = take::<1>(rest, "backup", "<dir>")?;
                Command::Backup { dir: dir.into() }
            }
            "restore" => {
                let [file] = take::<1>(rest, "restore", "<file>")?;
                Command::Restore { file: file.into() }
            }
            _ => return Err(ArgsError::UnknownCommand(name)),
        };
        Ok(command)
    }

    fn needs_session(&self) -> bool {
        !matches!(
            self,
            Command::Login { .. } | Command::Logout | Command::Backup { .. } | Command::Restore { .. }
        )
    }
}

fn take<const N: usize>(
    rest: Vec<String>,
    command: &'static str,
    usage: &'static str,
) -> Result<[String; N], ArgsError> {
    rest.try_into()
        .map_err(|_| ArgsError::WrongArity { command, usage })
}

fn parse_student(raw: &str) -> Result<StudentId, ArgsError> {
    raw.parse().map_err(|_| ArgsError::InvalidNumber {
        what: "student id",
        raw: raw.to_owned(),
    })
}

fn require_value(args: &mut impl Iterator<Item = String>, flag: &'static str) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

#[derive(Debug, Clone)]
struct Args {
    config: ClientConfig,
    command: Command,
}

impl Args {
    fn parse(mut config: ClientConfig) -> Result<Self, ArgsError> {
        let mut words = Vec::new();

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--api" => {
                    let value = require_value(&mut args, "--api")?;
                    config.api_base_url =
                        parse_base_url(&value).map_err(|_| ArgsError::InvalidApiUrl { raw: value.clone() })?;
                }
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    config.db_url = value;
                }
                "--blob" => {
                    config.blob_path = require_value(&mut args, "--blob")?.into();
                }
                "--group-size" => {
                    let value = require_value(&mut args, "--group-size")?;
                    config.group_size = value
                        .parse::<usize>()
                        .ok()
                        .filter(|size| *size > 0)
                        .ok_or_else(|| ArgsError::InvalidGroupSize { raw: value.clone() })?;
                }
                "--task3-policy" => {
                    let value = require_value(&mut args, "--task3-policy")?;
                    config.task3_policy = value
                        .parse::<Task3Eligibility>()
                        .map_err(|_| ArgsError::InvalidPolicy { raw: value.clone() })?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                flag if flag.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => words.push(arg),
            }
        }

        Ok(Self {
            config,
            command: Command::parse(words)?,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  tutor [options] <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  login <username> <password>                   Sign in and keep the session");
    eprintln!("  logout                                        Forget the saved session");
    eprintln!("  whoami                                        Show the signed-in user");
    eprintln!("  students                                      List students");
    eprintln!("  deduct-hours <student_id> <hours>             Deduct lesson hours");
    eprintln!("  word-sets                                     List word sets");
    eprintln!("  schedules                                     Upcoming lessons by day");
    eprintln!("  progress <student_id> <word_set>              Group and task progress");
    eprintln!("  complete-task <student_id> <word_set> <g> <t> Mark task t of group g done");
    eprintln!("  sessions <student_id>                         Anti-forget review sessions");
    eprintln!("  complete-review <session_id>                  Count one anti-forget review");
    eprintln!("  backup <dir>                                  Write a dated JSON backup");
    eprintln!("  restore <file>                                Import a JSON backup");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --api <url>               Backend base URL (env: TUTOR_API_BASE_URL)");
    eprintln!("  --db <sqlite_url>         SQLite URL (env: TUTOR_DB_URL)");
    eprintln!("  --blob <path>             JSON backup store path (env: TUTOR_BLOB_PATH)");
    eprintln!("  --group-size <n>          Words per group (env: TUTOR_GROUP_SIZE)");
    eprintln!("  --task3-policy <policy>   contiguous or count (env: TUTOR_TASK3_POLICY)");
    eprintln!("  -h, --help                Show this help");
}

async fn execute(services: &AppServices, command: Command, clock: Clock) -> Result<(), Box<dyn std::error::Error>> {
    if command.needs_session() && services.auth().initialize().await?.is_none() {
        return Err("not signed in, run `tutor login` first".into());
    }

    match command {
        Command::Login { username, password } => {
            let user = services.auth().login(&username, &password).await?;
            println!("signed in as {} ({})", user.display_name, user.role);
        }
        Command::Logout => {
            services.auth().logout().await;
            println!("signed out");
        }
        Command::Whoami => {
            if let Some(user) = services.context().current_user() {
                println!("{} ({}) id={}", user.display_name, user.role, user.id);
            }
        }
        Command::Students => {
            for student in services.students().fetch_students().await? {
                println!("{:>5}  {:<24} {:>6.1}h", student.id, student.name, student.remaining_hours);
            }
        }
        Command::DeductHours { student, hours } => {
            let reply = services.students().deduct_hours(student, hours).await?;
            println!("{} ({:.1}h left)", reply.message, reply.remaining_hours);
        }
        Command::WordSets => {
            for set in services.words().fetch_word_sets().await? {
                let scope = if set.is_global { "global" } else { "own" };
                println!("{:<24} {:>4} words  {scope}", set.name, set.word_count);
            }
        }
        Command::Schedules => {
            let context = services.context();
            let teacher = (!context.is_admin()).then(|| context.current_user_id()).flatten();
            let schedules = services.schedules();
            schedules.fetch_schedules(teacher.as_ref()).await?;
            println!("{} review lesson(s) today", schedules.today_review_count());
            for group in schedules.grouped_upcoming() {
                let expanded = schedules.is_expanded(group.date).await;
                println!("{} {}", if expanded { "-" } else { "+" }, group.date);
                if expanded {
                    for lesson in &group.schedules {
                        println!("    {} {:<16} {}", lesson.time, lesson.student_name, lesson.word_set_name);
                    }
                }
            }
        }
        Command::Progress { student, word_set } => {
            let session = services.learning_flow().start(student, &word_set).await?;
            let progress = &session.progress;
            println!(
                "{} words in {} groups, current group {}",
                progress.total_words(),
                progress.total_groups(),
                progress.current_group()
            );
            for group in progress.groups() {
                let done: Vec<String> = group.completed_tasks().iter().map(ToString::to_string).collect();
                let words = LearningFlowService::group_words(&session, group.group_number)?.len();
                println!("  group {:>2}  {words} words  done: [{}]", group.group_number, done.join(", "));
            }
        }
        Command::CompleteTask {
            student,
            word_set,
            group,
            task,
        } => {
            let flow = services.learning_flow();
            let mut session = flow.start(student, &word_set).await?;
            flow.complete_task(&mut session, group, task).await?;
            println!("{task} of group {group} done, current group {}", session.progress.current_group());
        }
        Command::Sessions { student } => {
            for session in services.anti_forget().fetch_student_sessions(student).await? {
                let stats = session.stats();
                println!(
                    "{}  {:<16} {}/{} reviews  {} starred",
                    session.id, session.word_set_name, stats.current_review, stats.total_reviews, stats.starred_words
                );
            }
        }
        Command::CompleteReview { session } => {
            let counter = services.anti_forget().complete_review(&session).await?;
            let state = if counter.is_completed { "completed" } else { "in progress" };
            println!("review {}/{} {state}", counter.current, counter.total);
        }
        Command::Backup { dir } => {
            let path = services.local().backup_to_file(&dir, clock.today()).await?;
            println!("backup written to {}", path.display());
        }
        Command::Restore { file } => {
            let restored = services.local().restore_from_file(&file).await?;
            println!("restored {restored} record(s)");
        }
    }
    Ok(())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = match Args::parse(ClientConfig::from_env()?) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("{err}");
            print_usage();
            return Err(err.into());
        }
    };

    debug!(api = %args.config.api_base_url, db = %args.config.db_url, "starting");
    let clock = Clock::default();
    let shown = MemoryNotifier::new();
    let notifier = FanoutNotifier::new(vec![Arc::new(TracingNotifier), Arc::new(shown.clone())]);
    let services = AppServices::new_sqlite(args.config, clock, Arc::new(notifier)).await?;

    let result = execute(&services, args.command, clock).await;
    for notification in shown.take() {
        eprintln!("{notification}");
        if notification.requires_login() {
            eprintln!("run `tutor login` to sign in again");
        }
    }
    result
}

#[tokio::main]
async fn main() {
    log_fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|w| (*w).to_owned()).collect()
    }

    #[test]
    fn parses_complete_task() {
        let command = Command::parse(words(&["complete-task", "3", "Unit 1", "2", "3"])).unwrap();
        assert_eq!(
            command,
            Command::CompleteTask {
                student: StudentId::new(3),
                word_set: "Unit 1".into(),
                group: 2,
                task: TaskNumber::Task3,
            }
        );
        assert!(command.needs_session());
    }

    #[test]
    fn rejects_task_out_of_range() {
        let err = Command::parse(words(&["complete-task", "3", "Unit 1", "2", "4"])).unwrap_err();
        assert_eq!(err.to_string(), "invalid task: 4");
    }

    #[test]
    fn reports_usage_on_wrong_arity() {
        let err = Command::parse(words(&["login", "alice"])).unwrap_err();
        assert_eq!(err.to_string(), "usage: tutor login <username> <password>");
    }

    #[test]
    fn local_commands_skip_the_session() {
        assert!(!Command::parse(words(&["backup", "/tmp"])).unwrap().needs_session());
        assert!(!Command::parse(words(&["logout"])).unwrap().needs_session());
        assert!(matches!(
            Command::parse(Vec::new()),
            Err(ArgsError::MissingCommand)
        ));
        assert!(matches!(
            Command::parse(words(&["dance"])),
            Err(ArgsError::UnknownCommand(name)) if name == "dance"
        ));
    }
}
