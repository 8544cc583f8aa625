use clap::{Args, Subcommand, ValueEnum};
use rand::Rng;
use std::io::{self, Write};

use roster_core::{local_id, Repository, User};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct UserCommand {
    #[command(subcommand)]
    pub command: UserSubcommand,
}

#[derive(Subcommand)]
pub enum UserSubcommand {
    /// Create a new user (stored locally until the next sync)
    Create {
        /// First name
        first_name: String,

        /// Last name
        last_name: String,

        /// Email address
        #[arg(long)]
        email: Option<String>,

        /// Age in years
        #[arg(long)]
        age: Option<i32>,

        /// Login name
        #[arg(long)]
        username: Option<String>,

        /// Job title
        #[arg(long)]
        position: Option<String>,

        /// Avatar URL
        #[arg(long)]
        image: Option<String>,
    },

    /// List all users
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show a user's details
    Show {
        /// User ID
        id: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing user
    Update {
        /// User ID
        id: String,

        /// New first name
        #[arg(long)]
        first_name: Option<String>,

        /// New last name
        #[arg(long)]
        last_name: Option<String>,

        /// New email address
        #[arg(long)]
        email: Option<String>,

        /// New age
        #[arg(long)]
        age: Option<i32>,

        /// New login name
        #[arg(long)]
        username: Option<String>,

        /// New job title
        #[arg(long)]
        position: Option<String>,

        /// New avatar URL
        #[arg(long)]
        image: Option<String>,
    },

    /// Delete a user (removed from the server on the next sync)
    Delete {
        /// User ID
        id: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Add randomly generated test users
    Sample {
        /// Number of users to add
        #[arg(long, short = 'n', default_value_t = 1)]
        count: usize,
    },
}

impl UserSubcommand {
    /// True for subcommands that change local data.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            UserSubcommand::Create { .. }
                | UserSubcommand::Update { .. }
                | UserSubcommand::Delete { .. }
                | UserSubcommand::Sample { .. }
        )
    }
}

impl UserCommand {
    pub async fn run(&self, repo: &Repository) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            UserSubcommand::Create {
                first_name,
                last_name,
                email,
                age,
                username,
                position,
                image,
            } => {
                if first_name.trim().is_empty() {
                    return Err("First name cannot be empty".into());
                }
                check_age(*age)?;

                let user = User {
                    id: local_id::generate(),
                    first_name: first_name.trim().to_string(),
                    last_name: last_name.trim().to_string(),
                    email: email.clone().unwrap_or_default(),
                    age: age.unwrap_or_default(),
                    user_name: username.clone().unwrap_or_default(),
                    position_title: position.clone().unwrap_or_default(),
                    image: image.clone().unwrap_or_default(),
                    ..User::default()
                };
                let id = user.id.clone();

                println!("{}", repo.insert(user).await?);
                println!("ID: {}", id);
                Ok(())
            }

            UserSubcommand::List { format } => {
                let users = repo.list_active().await?;

                match format {
                    OutputFormat::Json => {
                        let values = users
                            .iter()
                            .map(user_json)
                            .collect::<Result<Vec<_>, _>>()?;
                        println!("{}", serde_json::to_string_pretty(&values)?);
                    }
                    OutputFormat::Text => {
                        if users.is_empty() {
                            println!("No users found");
                            return Ok(());
                        }

                        println!(
                            "{:<40}  {:<28}  {:<28}  SYNC",
                            "ID", "NAME", "EMAIL"
                        );
                        println!("{}", "-".repeat(110));
                        for user in &users {
                            println!(
                                "{:<40}  {:<28}  {:<28}  {}",
                                user.id,
                                truncate(&user.full_name(), 28),
                                truncate(&user.email, 28),
                                if user.pending_sync { "pending" } else { "synced" }
                            );
                        }
                        println!("\nTotal: {} user(s)", users.len());
                    }
                }
                Ok(())
            }

            UserSubcommand::Show { id, format } => match repo.get(id).await? {
                Some(user) => {
                    match format {
                        OutputFormat::Json => {
                            println!("{}", serde_json::to_string_pretty(&user_json(&user)?)?);
                        }
                        OutputFormat::Text => {
                            print!("{}", user);
                        }
                    }
                    Ok(())
                }
                None => Err(format!("User not found: {}", id).into()),
            },

            UserSubcommand::Update {
                id,
                first_name,
                last_name,
                email,
                age,
                username,
                position,
                image,
            } => {
                if first_name.is_none()
                    && last_name.is_none()
                    && email.is_none()
                    && age.is_none()
                    && username.is_none()
                    && position.is_none()
                    && image.is_none()
                {
                    return Err("Nothing to update. Provide at least one option.".into());
                }
                check_age(*age)?;

                let mut user = match repo.get(id).await? {
                    Some(u) => u,
                    None => return Err(format!("User not found: {}", id).into()),
                };

                if let Some(v) = first_name {
                    user.first_name = v.clone();
                }
                if let Some(v) = last_name {
                    user.last_name = v.clone();
                }
                if let Some(v) = email {
                    user.email = v.clone();
                }
                if let Some(v) = age {
                    user.age = *v;
                }
                if let Some(v) = username {
                    user.user_name = v.clone();
                }
                if let Some(v) = position {
                    user.position_title = v.clone();
                }
                if let Some(v) = image {
                    user.image = v.clone();
                }

                println!("{}", repo.update(user).await?);
                Ok(())
            }

            UserSubcommand::Delete { id, force } => {
                let user = match repo.get(id).await? {
                    Some(u) => u,
                    None => return Err(format!("User not found: {}", id).into()),
                };

                // Confirm deletion unless --force is used
                if !force {
                    print!("Delete user '{}'? [y/N] ", user.full_name());
                    io::stdout().flush()?;

                    let mut input = String::new();
                    io::stdin().read_line(&mut input)?;

                    if !input.trim().eq_ignore_ascii_case("y") {
                        println!("Deletion cancelled.");
                        return Ok(());
                    }
                }

                println!("{}", repo.delete(user).await?);
                Ok(())
            }

            UserSubcommand::Sample { count } => {
                let mut rng = rand::rng();
                for _ in 0..*count {
                    let user = sample_user(&mut rng);
                    let name = user.full_name();
                    println!("{}: {}", repo.insert(user).await?, name);
                }
                Ok(())
            }
        }
    }
}

fn check_age(age: Option<i32>) -> Result<(), Box<dyn std::error::Error>> {
    if age.is_some_and(|a| a < 0) {
        return Err("Age cannot be negative".into());
    }
    Ok(())
}

/// A throwaway user with a local id and randomized details.
pub fn sample_user<R: Rng + ?Sized>(rng: &mut R) -> User {
    let id = local_id::generate();
    let tag = id.trim_start_matches(local_id::LOCAL_PREFIX)[..8].to_string();

    User {
        id,
        first_name: "Test".to_string(),
        last_name: format!("User {}", rng.random_range(1..100)),
        email: format!("test{}@example.com", tag),
        age: rng.random_range(18..90),
        user_name: "user_test".to_string(),
        position_title: "Tester".to_string(),
        image: format!(
            "https://randomuser.me/api/portraits/lego/{}.jpg",
            rng.random_range(1..9)
        ),
        ..User::default()
    }
}

/// Wire form plus the local id and sync state, for JSON output.
fn user_json(user: &User) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(user)?;
    if let Some(obj) = value.as_object_mut() {
        obj.insert("id".to_string(), user.id.clone().into());
        obj.insert("pendingSync".to_string(), user.pending_sync.into());
    }
    Ok(value)
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max - 3).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roster_core::{MemoryRemote, MemoryUserStore};
    use std::sync::Arc;

    fn update_age(id: &str, age: i32) -> UserCommand {
        UserCommand {
            command: UserSubcommand::Update {
                id: id.to_string(),
                first_name: None,
                last_name: None,
                email: None,
                age: Some(age),
                username: None,
                position: None,
                image: None,
            },
        }
    }

    #[tokio::test]
    async fn test_update_rejects_negative_age() {
        let repo = Repository::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryRemote::new()),
        );
        repo.insert(User::new("Ada", "Lovelace").with_id("local_a").with_age(36))
            .await
            .unwrap();

        let err = update_age("local_a", -5).run(&repo).await.unwrap_err();
        assert_eq!(err.to_string(), "Age cannot be negative");
        assert_eq!(repo.get("local_a").await.unwrap().unwrap().age, 36);

        update_age("local_a", 37).run(&repo).await.unwrap();
        assert_eq!(repo.get("local_a").await.unwrap().unwrap().age, 37);
    }

    #[test]
    fn test_sample_user_is_local_and_plausible() {
        let mut rng = rand::rng();
        let user = sample_user(&mut rng);

        assert!(user.is_local());
        assert_eq!(user.first_name, "Test");
        assert!(user.last_name.starts_with("User "));
        assert!((18..90).contains(&user.age));
        assert!(user.email.ends_with("@example.com"));
        assert!(user.image.starts_with("https://randomuser.me/"));
        assert!(!user.pending_sync);
    }

    #[test]
    fn test_sample_users_have_distinct_ids() {
        let mut rng = rand::rng();
        let a = sample_user(&mut rng);
        let b = sample_user(&mut rng);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_user_json_includes_local_id() {
        let user = User::new("Ada", "Lovelace").with_id("local_abc").mark_created();
        let value = user_json(&user).unwrap();
        assert_eq!(value["id"], "local_abc");
        assert_eq!(value["pendingSync"], true);
        assert_eq!(value["firstName"], "Ada");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer name", 10), "a much ...");
    }
}
