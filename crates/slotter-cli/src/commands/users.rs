use std::path::PathBuf;

use anyhow::Result;

use slotter_core::{Store, UserStatus};

use super::open_store;

const STATUSES: [UserStatus; 4] = [
    UserStatus::InProgress,
    UserStatus::Waiting,
    UserStatus::Applied,
    UserStatus::Registered,
];

pub fn execute(db: Option<PathBuf>) -> Result<()> {
    let store = open_store(db)?;

    let mut any = false;
    for status in STATUSES {
        for user in store.users_by_status(status)? {
            any = true;
            let who = user
                .login
                .or(user.chat_handle)
                .unwrap_or_else(|| "-".into());
            let city = user.city.unwrap_or_else(|| "-".into());
            println!(
                "{:>4}  {:<12} {:<32} {}",
                user.id,
                status.as_str(),
                who,
                city
            );
        }
    }
    if !any {
        println!("No users registered yet");
    }

    if let Some(job) = store.last_job()? {
        let url = job.url.as_deref().unwrap_or("-");
        println!(
            "\nLast attempt: user {} {} at {} ({})",
            job.user_id,
            job.status.as_str(),
            job.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
            url
        );
    }
    Ok(())
}
