use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use client::api::{tasks_api, users_api, ApiError};
use client::auth::ProfileUpdate;
use client::navigation::{History, NavigationListener, Navigator};
use client::router::{self, GuardDecision, Route};
use client::{AuthService, Config};
use secrecy::SecretString;
use shared::{
    CreateTaskRequest, LoginCredentials, SignupCredentials, Task, TaskStatus, UpdateTaskRequest,
    UpdateUserRequest, User, UserRole,
};
use tracing::level_filters::LevelFilter;
use tracing::{debug, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Task management from the command line")]
struct Cli {
    #[clap(flatten)]
    config: Config,

    #[arg(long, global = true, help = "Print results as JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an account and start a session
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
        password: SecretString,
    },
    /// Start a session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "TASKDECK_PASSWORD", hide_env_values = true)]
        password: SecretString,
    },
    /// End the session and forget cached data
    Logout,
    /// Show the logged-in user
    Profile {
        #[arg(long, help = "Bypass the cached profile")]
        refresh: bool,
    },
    /// Change name and/or password of the logged-in user
    UpdateProfile {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        password: Option<SecretString>,
        #[arg(long)]
        confirm_password: Option<SecretString>,
    },
    /// Upload a profile picture (jpg, jpeg, png, gif, webp, at most 5MB)
    UploadPicture { file: PathBuf },
    #[command(subcommand)]
    Tasks(TasksCommand),
    #[command(subcommand)]
    Users(UsersCommand),
    /// Check whether a view may be opened with the current session
    Open { path: String },
}

#[derive(Subcommand, Debug)]
enum TasksCommand {
    List,
    Get {
        id: String,
    },
    Create {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    Update {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        status: Option<TaskStatus>,
    },
    Delete {
        id: String,
    },
    /// Count tasks per status
    Stats,
}

#[derive(Subcommand, Debug)]
enum UsersCommand {
    List,
    Get {
        id: String,
    },
    Update {
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        role: Option<UserRole>,
    },
    Delete {
        id: String,
    },
}

impl Command {
    fn route(&self) -> Route {
        match self {
            Command::Signup { .. } => Route::Signup,
            Command::Login { .. } => Route::Login,
            Command::Logout => Route::Login,
            Command::Profile { .. } | Command::UpdateProfile { .. } | Command::UploadPicture { .. } => {
                Route::Profile
            }
            Command::Tasks(_) => Route::Tasks,
            Command::Users(_) => Route::Users,
            Command::Open { path } => Route::from_path(path),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .from_env_lossy(),
        )
        .init();

    debug!(config = ?cli.config, "Starting taskdeck");
    let auth = cli.config.connect()?;
    let history = Arc::new(History::new(cli.command.route()));
    let listener = NavigationListener::new(history.clone());
    let mut events = auth.client().subscribe();

    let result = match &cli.command {
        Command::Open { .. } => open(&history, &auth),
        Command::Logout => {
            auth.logout();
            println!("Logged out successfully");
            Ok(())
        }
        command => match router::enforce(history.as_ref(), auth.session()) {
            GuardDecision::Allowed => run(command, &auth, cli.json).await,
            GuardDecision::Redirect(route) => {
                Err(anyhow::anyhow!("This view is not available, go to {route}"))
            }
            GuardDecision::Unresolved => Err(anyhow::anyhow!("Session is not restored yet")),
        },
    };

    for route in listener.drain(&mut events) {
        eprintln!("Your session has expired, please log in again ({route})");
    }
    if let Err(error) = result {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
    Ok(())
}

fn open(history: &History, auth: &AuthService) -> anyhow::Result<()> {
    let route = history.current();
    match router::enforce(history, auth.session()) {
        GuardDecision::Allowed => println!("{route}: allowed"),
        GuardDecision::Redirect(target) => println!("{route}: redirect to {target}"),
        GuardDecision::Unresolved => println!("{route}: unresolved"),
    }
    Ok(())
}

async fn run(command: &Command, auth: &AuthService, json: bool) -> anyhow::Result<()> {
    execute(command, auth, json)
        .await
        .map_err(|error| anyhow::anyhow!(error.message()))
}

async fn execute(command: &Command, auth: &AuthService, json: bool) -> Result<(), ApiError> {
    let client = auth.client();
    match command {
        Command::Signup {
            name,
            email,
            password,
        } => {
            let outcome = auth
                .signup(SignupCredentials {
                    name: name.clone(),
                    email: email.clone(),
                    password: password.clone(),
                })
                .await?;
            println!("{}", outcome.message);
            print_user(&outcome.user, json)?;
        }
        Command::Login { email, password } => {
            let outcome = auth
                .login(LoginCredentials {
                    email: email.clone(),
                    password: password.clone(),
                })
                .await?;
            info!(user_id = %outcome.user.id, "Login succeeded");
            println!("{}", outcome.message);
            print_user(&outcome.user, json)?;
        }
        Command::Profile { refresh } => {
            let user = if *refresh {
                auth.refresh_profile().await?
            } else {
                auth.get_profile().await?
            };
            print_user(&user, json)?;
        }
        Command::UpdateProfile {
            name,
            password,
            confirm_password,
        } => {
            let user = auth
                .update_profile(ProfileUpdate {
                    name: name.clone(),
                    password: password.clone(),
                    password_confirmation: confirm_password.clone(),
                })
                .await?;
            println!("Profile updated successfully!");
            print_user(&user, json)?;
        }
        Command::UploadPicture { file } => {
            let user = auth.upload_profile_picture(file).await?;
            println!("Profile picture updated successfully!");
            print_user(&user, json)?;
        }
        Command::Tasks(command) => match command {
            TasksCommand::List => {
                let tasks = tasks_api::get_tasks(client).await?;
                print_tasks(&tasks, json)?;
            }
            TasksCommand::Get { id } => {
                let task = tasks_api::get_task(client, id).await?;
                print_tasks(std::slice::from_ref(&task), json)?;
            }
            TasksCommand::Create {
                title,
                description,
                status,
            } => {
                let response = tasks_api::create_task(
                    client,
                    &CreateTaskRequest {
                        title: title.clone(),
                        description: description.clone(),
                        status: *status,
                    },
                )
                .await?;
                println!("{}", or_default(&response.message, "Task created successfully!"));
                print_tasks(std::slice::from_ref(&response.data), json)?;
            }
            TasksCommand::Update {
                id,
                title,
                description,
                status,
            } => {
                let response = tasks_api::update_task(
                    client,
                    id,
                    &UpdateTaskRequest {
                        title: title.clone(),
                        description: description.clone(),
                        status: *status,
                    },
                )
                .await?;
                println!("{}", or_default(&response.message, "Task updated successfully!"));
                print_tasks(std::slice::from_ref(&response.data), json)?;
            }
            TasksCommand::Delete { id } => {
                let response = tasks_api::delete_task(client, id).await?;
                println!("{}", or_default(&response.message, "Task deleted successfully!"));
            }
            TasksCommand::Stats => {
                let tasks = tasks_api::get_tasks(client).await?;
                let stats = tasks_api::TaskStats::from_tasks(&tasks);
                println!(
                    "Total: {total}, In progress: {in_progress}, Completed: {completed}, Cancelled: {cancelled}",
                    total = stats.total,
                    in_progress = stats.in_progress,
                    completed = stats.completed,
                    cancelled = stats.cancelled,
                );
            }
        },
        Command::Users(command) => match command {
            UsersCommand::List => {
                let users = users_api::get_users(client).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&users)?);
                } else {
                    for user in &users {
                        print_user(user, false)?;
                    }
                }
            }
            UsersCommand::Get { id } => {
                let user = users_api::get_user(client, id).await?;
                print_user(&user, json)?;
            }
            UsersCommand::Update {
                id,
                name,
                email,
                role,
            } => {
                let response = users_api::update_user(
                    client,
                    id,
                    &UpdateUserRequest {
                        name: name.clone(),
                        email: email.clone(),
                        role: *role,
                        ..Default::default()
                    },
                )
                .await?;
                println!("{}", or_default(&response.message, "User updated successfully!"));
                print_user(&response.data, json)?;
            }
            UsersCommand::Delete { id } => {
                let response = users_api::delete_user(client, id).await?;
                println!("{}", or_default(&response.message, "User deleted successfully!"));
            }
        },
        Command::Logout | Command::Open { .. } => {}
    }
    Ok(())
}

fn or_default<'a>(message: &'a str, fallback: &'a str) -> &'a str {
    if message.trim().is_empty() {
        fallback
    } else {
        message
    }
}

fn print_user(user: &User, json: bool) -> Result<(), ApiError> {
    if json {
        println!("{}", serde_json::to_string_pretty(user)?);
        return Ok(());
    }
    println!(
        "{id}  {name} <{email}>  {role}  joined {created}",
        id = user.id,
        name = user.name,
        email = user.email,
        role = user.role,
        created = user.created_at.format("%b %e, %Y"),
    );
    Ok(())
}

fn print_tasks(tasks: &[Task], json: bool) -> Result<(), ApiError> {
    if json {
        println!("{}", serde_json::to_string_pretty(tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks yet. Create your first task to get started!");
    }
    for task in tasks {
        println!(
            "{id}  [{status}]  {title}  {description}",
            id = task.id,
            status = task.status,
            title = task.title,
            description = task.description.as_deref().unwrap_or("No description"),
        );
    }
    Ok(())
}
