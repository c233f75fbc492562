//! CLI tool for managing SMTP AUTH user accounts.
//!
//! ```bash
//! mail-user add user@example.com password123 --db sqlite://users.db
//! mail-user delete user@example.com --db sqlite://users.db
//! mail-user list --db sqlite://users.db
//! mail-user exists user@example.com --db sqlite://users.db
//! ```

use clap::{Parser, Subcommand};
use mail_rs::security::SqliteUserStore;

#[derive(Parser)]
#[command(name = "mail-user")]
#[command(about = "Manage SMTP AUTH user accounts", long_about = None)]
struct Cli {
    /// Database URL (e.g. sqlite://users.db)
    #[arg(short, long, default_value = "sqlite://users.db")]
    db: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new user, or replace an existing user's password
    Add { email: String, password: String },
    /// Delete a user
    Delete { email: String },
    /// List all users
    List,
    /// Check if a user exists
    Exists { email: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let store = SqliteUserStore::connect(&cli.db).await?;

    match cli.command {
        Commands::Add { email, password } => {
            store.create_user(&email, &password).await?;
            println!("user {email} added");
        }
        Commands::Delete { email } => {
            if !store.user_exists(&email).await? {
                eprintln!("user {email} does not exist");
                std::process::exit(1);
            }
            store.delete_user(&email).await?;
            println!("user {email} deleted");
        }
        Commands::List => {
            let users = store.list_users().await?;
            if users.is_empty() {
                println!("no users found");
            } else {
                println!("{:<30} {:<20}", "email", "created_at");
                for (email, created_at) in &users {
                    println!("{email:<30} {created_at:<20}");
                }
            }
        }
        Commands::Exists { email } => {
            if store.user_exists(&email).await? {
                println!("user {email} exists");
            } else {
                println!("user {email} does not exist");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
